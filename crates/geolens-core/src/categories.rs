//! Probe query categories and the strategic weight table.
//!
//! Categories are a closed enumeration with one centrally defined mapping
//! (category → funnel stage → planning weight). Call sites never re-declare
//! category strings or weights.

use serde::{Deserialize, Serialize};

/// Buyer-journey segment a probe query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCategory {
    /// "What tools exist for X?": unbranded discovery queries.
    Awareness,
    /// "Is <company> good for X?": evaluation of the target itself.
    Consideration,
    /// "<company> vs <competitor>": head-to-head comparison queries.
    Comparison,
    /// "Should I buy <company>?": purchase-intent queries.
    Purchase,
    /// "Alternatives to <company>": retention/switching queries.
    Advocacy,
}

/// Funnel stage a category maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunnelStage {
    Top,
    Middle,
    Bottom,
}

impl QueryCategory {
    /// All categories in planning order.
    pub const ALL: [QueryCategory; 5] = [
        QueryCategory::Awareness,
        QueryCategory::Consideration,
        QueryCategory::Comparison,
        QueryCategory::Purchase,
        QueryCategory::Advocacy,
    ];

    /// Planning weight: fraction of the query budget this category receives.
    ///
    /// Comparison carries the largest share; competitive queries produce
    /// disproportionate downstream signal (competitor mentions, gaps).
    /// Weights sum to 1.0.
    pub fn weight(&self) -> f32 {
        match self {
            QueryCategory::Awareness => 0.15,
            QueryCategory::Consideration => 0.20,
            QueryCategory::Comparison => 0.30,
            QueryCategory::Purchase => 0.20,
            QueryCategory::Advocacy => 0.15,
        }
    }

    /// Funnel stage this category belongs to.
    pub fn funnel_stage(&self) -> FunnelStage {
        match self {
            QueryCategory::Awareness => FunnelStage::Top,
            QueryCategory::Consideration | QueryCategory::Comparison => FunnelStage::Middle,
            QueryCategory::Purchase | QueryCategory::Advocacy => FunnelStage::Bottom,
        }
    }

    /// Stable slug used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryCategory::Awareness => "awareness",
            QueryCategory::Consideration => "consideration",
            QueryCategory::Comparison => "comparison",
            QueryCategory::Purchase => "purchase",
            QueryCategory::Advocacy => "advocacy",
        }
    }

    /// Parse a stored slug back into a category.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "awareness" => Some(QueryCategory::Awareness),
            "consideration" => Some(QueryCategory::Consideration),
            "comparison" => Some(QueryCategory::Comparison),
            "purchase" => Some(QueryCategory::Purchase),
            "advocacy" => Some(QueryCategory::Advocacy),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
