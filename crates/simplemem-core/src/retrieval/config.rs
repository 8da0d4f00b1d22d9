//! Configuration for hybrid retrieval.

use serde::{Deserialize, Serialize};

/// Upper bound on `reflection_rounds`.
pub const MAX_REFLECTION_ROUNDS: usize = 5;

/// Which entries form the default candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateMode {
    /// Active atoms and molecules.
    #[default]
    Mixed,
    /// Molecules only.
    MoleculesOnly,
}

/// Per-layer pre-selection before hybrid ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerLimits {
    /// Top candidates by dense similarity. Default: 25
    pub semantic_top_k: usize,
    /// Top candidates by BM25. Default: 5
    pub keyword_top_k: usize,
    /// Top candidates matching the soft constraints. Default: 5
    pub structured_top_k: usize,
}

impl Default for LayerLimits {
    fn default() -> Self {
        Self {
            semantic_top_k: 25,
            keyword_top_k: 5,
            structured_top_k: 5,
        }
    }
}

/// Configuration for retrieval.
///
/// Score: `semantic_weight * cos + lexical_weight * bm25_norm + constraint_bonus * soft_match`.
/// Depth: `floor(k_base * (1 + depth_factor * complexity))`, clamped to `[k_min, k_max]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Weight of the dense layer. Default: 0.6
    pub semantic_weight: f32,
    /// Weight of the normalized BM25 layer. Default: 0.3
    pub lexical_weight: f32,
    /// Bonus for satisfying every soft constraint. Default: 0.1
    pub constraint_bonus: f32,
    /// Base result count. Default: 5
    pub k_base: usize,
    /// Lower bound on result count. Default: 3
    pub k_min: usize,
    /// Upper bound on result count. Default: 20
    pub k_max: usize,
    /// How strongly complexity widens retrieval. Default: 1.0
    pub depth_factor: f32,
    /// Context budget in estimated tokens when the caller gives none. Default: 2000
    pub token_budget: usize,
    /// Default candidate set.
    pub candidate_mode: CandidateMode,
    /// Optional per-layer pre-selection.
    pub layer_limits: Option<LayerLimits>,
    /// Decompose queries with the planner when one is configured.
    pub planning: bool,
    /// Follow-up rounds asked of the reflector when one is configured.
    /// 0 disables reflection. Default: 0
    pub reflection_rounds: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            semantic_weight: 0.6,
            lexical_weight: 0.3,
            constraint_bonus: 0.1,
            k_base: 5,
            k_min: 3,
            k_max: 20,
            depth_factor: 1.0,
            token_budget: 2000,
            candidate_mode: CandidateMode::Mixed,
            layer_limits: None,
            planning: false,
            reflection_rounds: 0,
        }
    }
}

impl RetrievalConfig {
    /// Few results under a tight budget.
    pub fn focused() -> Self {
        Self {
            k_base: 3,
            k_max: 8,
            depth_factor: 0.5,
            token_budget: 800,
            ..Default::default()
        }
    }

    /// Wide recall with per-layer pre-selection, query planning and reflection.
    pub fn broad() -> Self {
        Self {
            k_base: 8,
            k_max: 40,
            depth_factor: 2.0,
            token_budget: 4000,
            layer_limits: Some(LayerLimits::default()),
            planning: true,
            reflection_rounds: 2,
            ..Default::default()
        }
    }

    /// Result count for a query of the given complexity.
    pub fn depth_for(&self, complexity: f32) -> usize {
        let c = if complexity.is_finite() {
            complexity.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let k = (self.k_base as f32 * (1.0 + self.depth_factor * c)).floor() as usize;
        k.clamp(self.k_min, self.k_max)
    }

    /// Validate configuration values are in valid ranges.
    pub fn validate(&self) -> Result<(), &'static str> {
        for weight in [self.semantic_weight, self.lexical_weight, self.constraint_bonus] {
            if !weight.is_finite() || weight < 0.0 {
                return Err("score weights must be non-negative");
            }
        }
        if self.k_base == 0 || self.k_min == 0 {
            return Err("k_base and k_min must be at least 1");
        }
        if self.k_min > self.k_max {
            return Err("k_min must not exceed k_max");
        }
        if !self.depth_factor.is_finite() || self.depth_factor < 0.0 {
            return Err("depth_factor must be non-negative");
        }
        if self.token_budget == 0 {
            return Err("token_budget must be greater than 0");
        }
        if self.reflection_rounds > MAX_REFLECTION_ROUNDS {
            return Err("reflection_rounds must be at most 5");
        }
        if let Some(limits) = &self.layer_limits {
            if limits.semantic_top_k + limits.keyword_top_k + limits.structured_top_k == 0 {
                return Err("layer_limits must select at least one candidate");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RetrievalConfig::default();
        assert!((config.semantic_weight - 0.6).abs() < 0.01);
        assert_eq!(config.candidate_mode, CandidateMode::Mixed);
        assert!(config.layer_limits.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(RetrievalConfig::focused().validate().is_ok());
        let broad = RetrievalConfig::broad();
        assert!(broad.validate().is_ok());
        assert_eq!(broad.layer_limits, Some(LayerLimits::default()));
        assert_eq!(broad.reflection_rounds, 2);
        assert_eq!(RetrievalConfig::default().reflection_rounds, 0);
    }

    #[test]
    fn test_depth_for() {
        let config = RetrievalConfig::default();
        assert_eq!(config.depth_for(0.0), 5);
        assert_eq!(config.depth_for(0.5), 7);
        assert_eq!(config.depth_for(1.0), 10);
        assert_eq!(config.depth_for(f32::NAN), 5);

        let tight = RetrievalConfig {
            k_base: 1,
            k_min: 3,
            k_max: 4,
            depth_factor: 10.0,
            ..Default::default()
        };
        assert_eq!(tight.depth_for(0.0), 3);
        assert_eq!(tight.depth_for(1.0), 4);
    }

    #[test]
    fn test_validation_errors() {
        let inverted = RetrievalConfig {
            k_min: 10,
            k_max: 2,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        let negative = RetrievalConfig {
            lexical_weight: -0.1,
            ..Default::default()
        };
        assert!(negative.validate().is_err());

        let endless = RetrievalConfig {
            reflection_rounds: MAX_REFLECTION_ROUNDS + 1,
            ..Default::default()
        };
        assert!(endless.validate().is_err());

        let empty_limits = RetrievalConfig {
            layer_limits: Some(LayerLimits {
                semantic_top_k: 0,
                keyword_top_k: 0,
                structured_top_k: 0,
            }),
            ..Default::default()
        };
        assert!(empty_limits.validate().is_err());
    }
}
