//! Score weighting policy.
//!
//! The weights combining sub-scores into composite scores are configuration,
//! not constants: they are read from the environment at startup and passed
//! into the validation layer explicitly.

/// Weights for combining the four visibility sub-scores into the composite
/// score, plus the three context sub-score weights.
///
/// Weights are normalized on construction so callers can supply any positive
/// values; a zero sum falls back to equal weighting.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreWeights {
    pub relevance: f64,
    pub prominence: f64,
    pub accuracy: f64,
    pub authority: f64,
    pub feature_coverage: f64,
    pub value_prop: f64,
    pub competitor_context: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            relevance: 0.25,
            prominence: 0.25,
            accuracy: 0.25,
            authority: 0.25,
            feature_coverage: 1.0 / 3.0,
            value_prop: 1.0 / 3.0,
            competitor_context: 1.0 / 3.0,
        }
    }
}

impl ScoreWeights {
    /// Load weights from environment variables with fallback to defaults.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `GEOLENS_WEIGHT_RELEVANCE` | `0.25` |
    /// | `GEOLENS_WEIGHT_PROMINENCE` | `0.25` |
    /// | `GEOLENS_WEIGHT_ACCURACY` | `0.25` |
    /// | `GEOLENS_WEIGHT_AUTHORITY` | `0.25` |
    ///
    /// Invalid or non-positive values are logged and replaced with the
    /// default for that slot. The visibility group is normalized to sum
    /// to 1.0 after loading.
    pub fn from_env() -> Self {
        let mut weights = Self::default();

        let read = |var: &str, slot: &mut f64| {
            if let Ok(val) = std::env::var(var) {
                match val.parse::<f64>() {
                    Ok(w) if w > 0.0 && w.is_finite() => *slot = w,
                    _ => {
                        tracing::warn!(value = %val, variable = var, "Invalid score weight, using default")
                    }
                }
            }
        };

        read("GEOLENS_WEIGHT_RELEVANCE", &mut weights.relevance);
        read("GEOLENS_WEIGHT_PROMINENCE", &mut weights.prominence);
        read("GEOLENS_WEIGHT_ACCURACY", &mut weights.accuracy);
        read("GEOLENS_WEIGHT_AUTHORITY", &mut weights.authority);

        weights.normalize();
        weights
    }

    /// Normalize the visibility and context weight groups to sum to 1.0.
    pub fn normalize(&mut self) {
        let vis_sum = self.relevance + self.prominence + self.accuracy + self.authority;
        if vis_sum > 0.0 && vis_sum.is_finite() {
            self.relevance /= vis_sum;
            self.prominence /= vis_sum;
            self.accuracy /= vis_sum;
            self.authority /= vis_sum;
        } else {
            self.relevance = 0.25;
            self.prominence = 0.25;
            self.accuracy = 0.25;
            self.authority = 0.25;
        }

        let ctx_sum = self.feature_coverage + self.value_prop + self.competitor_context;
        if ctx_sum > 0.0 && ctx_sum.is_finite() {
            self.feature_coverage /= ctx_sum;
            self.value_prop /= ctx_sum;
            self.competitor_context /= ctx_sum;
        } else {
            self.feature_coverage = 1.0 / 3.0;
            self.value_prop = 1.0 / 3.0;
            self.competitor_context = 1.0 / 3.0;
        }
    }
}
