//! Query planner.
//!
//! Produces the fixed-size, category-weighted probe query set for a job.
//! The category share table lives in `geolens-core::categories`; the planner
//! only distributes the budget and renders query text from the profile.

use tracing::{debug, instrument};

use geolens_core::defaults::QUERY_BUDGET;
use geolens_core::{AuditSpec, NewProbeQuery, QueryCategory, Result, TargetProfile};

/// Configuration for the query planner.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Total probe queries per job (spec override wins).
    pub query_budget: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            query_budget: QUERY_BUDGET,
        }
    }
}

impl PlannerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `GEOLENS_QUERY_BUDGET` | `20` | Probe queries per job |
    pub fn from_env() -> Self {
        let query_budget = std::env::var("GEOLENS_QUERY_BUDGET")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(QUERY_BUDGET)
            .max(1);
        Self { query_budget }
    }
}

/// Plans the probe query set for an audit job.
pub struct QueryPlanner {
    config: PlannerConfig,
}

impl QueryPlanner {
    /// Create a new planner.
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Plan the query set for a profile.
    ///
    /// Fails fast if the profile is missing required fields; a placeholder
    /// profile is never substituted.
    #[instrument(skip(self, profile, spec), fields(profile_id = %profile.id))]
    pub fn plan(&self, profile: &TargetProfile, spec: &AuditSpec) -> Result<Vec<NewProbeQuery>> {
        profile.validate_required()?;

        let categories = spec.effective_categories();
        let budget = spec
            .query_budget
            .unwrap_or(self.config.query_budget)
            .max(categories.len());

        let allotments = distribute_budget(&categories, budget);
        let mut queries = Vec::with_capacity(budget);

        for (category, count) in allotments {
            for text in category_queries(category, profile, count) {
                queries.push(NewProbeQuery {
                    text,
                    category,
                    weight: category.weight(),
                });
            }
        }

        debug!(
            query_count = queries.len(),
            category_count = categories.len(),
            "Planned probe queries"
        );
        Ok(queries)
    }
}

/// Distribute `budget` queries across `categories` by the strategic weight
/// table, largest-remainder rounding, minimum one query per category.
pub fn distribute_budget(
    categories: &[QueryCategory],
    budget: usize,
) -> Vec<(QueryCategory, usize)> {
    if categories.is_empty() {
        return Vec::new();
    }

    let total_weight: f32 = categories.iter().map(|c| c.weight()).sum();
    let mut shares: Vec<(QueryCategory, usize, f32)> = categories
        .iter()
        .map(|&category| {
            let exact = category.weight() / total_weight * budget as f32;
            (category, exact.floor() as usize, exact.fract())
        })
        .collect();

    // Hand out the rounding remainder to the largest fractional parts.
    let assigned: usize = shares.iter().map(|(_, n, _)| n).sum();
    let mut leftover = budget.saturating_sub(assigned);
    let mut order: Vec<usize> = (0..shares.len()).collect();
    order.sort_by(|&a, &b| shares[b].2.total_cmp(&shares[a].2));
    for &idx in order.iter().cycle().take(leftover.min(budget)) {
        shares[idx].1 += 1;
        leftover -= 1;
        if leftover == 0 {
            break;
        }
    }

    // Every category gets at least one query, funded by the largest share.
    loop {
        let Some(zero_idx) = shares.iter().position(|(_, n, _)| *n == 0) else {
            break;
        };
        let Some(max_idx) = shares
            .iter()
            .enumerate()
            .max_by_key(|(_, (_, n, _))| *n)
            .map(|(i, _)| i)
        else {
            break;
        };
        if shares[max_idx].1 <= 1 {
            break;
        }
        shares[max_idx].1 -= 1;
        shares[zero_idx].1 += 1;
    }

    shares
        .into_iter()
        .map(|(category, count, _)| (category, count))
        .collect()
}

/// Render `count` probe queries for one category from the profile.
fn category_queries(
    category: QueryCategory,
    profile: &TargetProfile,
    count: usize,
) -> Vec<String> {
    fn competitor(profile: &TargetProfile, i: usize) -> &str {
        if profile.competitors.is_empty() {
            "its main competitors"
        } else {
            &profile.competitors[i % profile.competitors.len()]
        }
    }

    let company = profile.company_name.as_str();
    let industry = profile.industry.as_deref().unwrap_or("software");

    let templates: Vec<String> = match category {
        QueryCategory::Awareness => vec![
            format!("What are the best {industry} tools available today?"),
            format!("Which {industry} solutions do experts recommend?"),
            format!("What should I look for when choosing {industry} software?"),
            format!("Who are the leading providers in the {industry} space?"),
        ],
        QueryCategory::Consideration => vec![
            format!("Is {company} a good choice for {industry}?"),
            format!("What are the pros and cons of {company}?"),
            format!("What do users say about {company}?"),
            format!("What are the main features of {company}?"),
        ],
        QueryCategory::Comparison => vec![
            format!("{company} vs {}: which is better?", competitor(profile, 0)),
            format!("How does {company} compare to {}?", competitor(profile, 1)),
            format!("Compare {company} with {} for a mid-sized team.", competitor(profile, 2)),
            format!("Which is more reliable, {company} or {}?", competitor(profile, 3)),
        ],
        QueryCategory::Purchase => vec![
            format!("Is {company} worth paying for?"),
            format!("How is {company} priced and is it good value?"),
            format!("Should my team buy {company} this year?"),
            format!("What does {company} cost compared to alternatives?"),
        ],
        QueryCategory::Advocacy => vec![
            format!("What are the best alternatives to {company}?"),
            format!("Why do teams switch away from {company}?"),
            format!("Is it worth migrating from {company} to something else?"),
            format!("What do long-term customers think of {company}?"),
        ],
    };

    let qualifiers = [
        "",
        " Focus on small businesses.",
        " Focus on enterprise teams.",
        " Focus on this year's landscape.",
        " Focus on value for money.",
    ];

    (0..count)
        .map(|i| {
            let base = &templates[i % templates.len()];
            let qualifier = qualifiers[(i / templates.len()) % qualifiers.len()];
            format!("{base}{qualifier}")
        })
        .collect()
}
