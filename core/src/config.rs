use crate::error::{ClaimError, ClaimResult};
use serde::{Deserialize, Serialize};

/// Default embedding dimensionality for both channels.
pub const DEFAULT_EMBEDDING_DIM: usize = 128;

/// Default width of the hashed feature space fed to the projection model.
pub const DEFAULT_FEATURE_DIM: usize = 1024;

// ── Embedder selection ────────────────────────────────────────────

/// Which embedder backs the pipeline. Chosen here, never by branching
/// in pipeline code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmbedderConfig {
    /// Deterministic signed feature hashing. Used for tests and as fallback.
    Hashing {
        #[serde(default = "default_dim")]
        text_dim: usize,
        #[serde(default = "default_dim")]
        image_dim: usize,
    },
    /// Linear projection model over hashed features. Weights come from
    /// `weights_path` when set, otherwise they are drawn from `seed`.
    Projection {
        #[serde(default = "default_dim")]
        text_dim: usize,
        #[serde(default = "default_dim")]
        image_dim: usize,
        #[serde(default = "default_feature_dim")]
        feature_dim: usize,
        #[serde(default)]
        seed: u64,
        #[serde(default)]
        weights_path: Option<String>,
    },
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self::Hashing {
            text_dim: DEFAULT_EMBEDDING_DIM,
            image_dim: DEFAULT_EMBEDDING_DIM,
        }
    }
}

fn default_dim() -> usize {
    DEFAULT_EMBEDDING_DIM
}

fn default_feature_dim() -> usize {
    DEFAULT_FEATURE_DIM
}

// ── Scoring policy ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    /// Minimum blended score for a candidate to count as a match (inclusive).
    pub relevance_floor: f64,
    /// Breakdowns retained per analysis. `matched_count` still counts all matches.
    pub max_matches: usize,
    /// Risk score with no matches = severity * this factor.
    pub baseline_severity_factor: f64,
    pub rules: RuleThresholds,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            relevance_floor: 0.5,
            max_matches: 10,
            baseline_severity_factor: 0.25,
            rules: RuleThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuleThresholds {
    /// Image channel must exceed this for the image-similarity factor.
    pub image_rule: f64,
    /// Text channel must exceed this for the narrative-reuse factor.
    pub text_rule: f64,
    /// Spatial AND temporal must exceed this for the recurring-pattern factor.
    pub pattern_rule: f64,
    /// Severity at or above this is "elevated".
    pub high_severity: f64,
    /// Severity below this is "low".
    pub low_severity: f64,
    /// Matched count at or above this triggers the multiple-matches factor.
    pub multiple_match_count: usize,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            image_rule: 0.8,
            text_rule: 0.85,
            pattern_rule: 0.7,
            high_severity: 0.7,
            low_severity: 0.3,
            multiple_match_count: 3,
        }
    }
}

impl RuleThresholds {
    fn validate(&self) -> ClaimResult<()> {
        for (name, value) in [
            ("image_rule", self.image_rule),
            ("text_rule", self.text_rule),
            ("pattern_rule", self.pattern_rule),
            ("high_severity", self.high_severity),
            ("low_severity", self.low_severity),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ClaimError::Config(format!(
                    "rules.{name} must be in [0, 1], got {value}"
                )));
            }
        }
        if self.low_severity > self.high_severity {
            return Err(ClaimError::Config(format!(
                "rules.low_severity ({}) must not exceed rules.high_severity ({})",
                self.low_severity, self.high_severity
            )));
        }
        Ok(())
    }
}

// ── Candidate selection ───────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CandidateConfig {
    /// Only compare against fingerprints with the same incident type.
    pub same_incident_type_only: bool,
    /// Cap on candidates fetched, newest first. None = full corpus.
    pub window_limit: Option<usize>,
}

// ── Intake limits ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IntakeConfig {
    pub max_images: usize,
    pub max_image_bytes: usize,
    pub max_description_chars: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_images: 20,
            max_image_bytes: 10 * 1024 * 1024,
            max_description_chars: 10_000,
        }
    }
}

// ── Top level ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub embedder: EmbedderConfig,
    pub scoring: ScoringConfig,
    pub candidates: CandidateConfig,
    pub intake: IntakeConfig,
}

impl PipelineConfig {
    /// Load from `{data_dir}/pipeline.json`.
    /// In tests, use PipelineConfig::default().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/pipeline.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ClaimResult<()> {
        let s = &self.scoring;
        if !(0.0..=1.0).contains(&s.relevance_floor) {
            return Err(ClaimError::Config(format!(
                "relevance_floor must be in [0, 1], got {}",
                s.relevance_floor
            )));
        }
        if !(0.0..=1.0).contains(&s.baseline_severity_factor) {
            return Err(ClaimError::Config(format!(
                "baseline_severity_factor must be in [0, 1], got {}",
                s.baseline_severity_factor
            )));
        }
        if s.max_matches == 0 {
            return Err(ClaimError::Config("max_matches must be at least 1".into()));
        }
        s.rules.validate()?;
        let (text_dim, image_dim) = match &self.embedder {
            EmbedderConfig::Hashing { text_dim, image_dim } => (*text_dim, *image_dim),
            EmbedderConfig::Projection {
                text_dim,
                image_dim,
                feature_dim,
                ..
            } => {
                if *feature_dim == 0 {
                    return Err(ClaimError::Config("feature_dim must be non-zero".into()));
                }
                (*text_dim, *image_dim)
            }
        };
        if text_dim == 0 || image_dim == 0 {
            return Err(ClaimError::Config(
                "embedding dimensions must be non-zero".into(),
            ));
        }
        if self.intake.max_images == 0 {
            return Err(ClaimError::Config("max_images must be at least 1".into()));
        }
        if self.intake.max_image_bytes == 0 {
            return Err(ClaimError::Config("max_image_bytes must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{ "scoring": { "relevance_floor": 0.6 },
                        "embedder": { "kind": "projection", "seed": 42 } }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.scoring.relevance_floor, 0.6);
        assert_eq!(config.scoring.max_matches, 10);
        assert_eq!(
            config.embedder,
            EmbedderConfig::Projection {
                text_dim: 128,
                image_dim: 128,
                feature_dim: 1024,
                seed: 42,
                weights_path: None,
            }
        );
    }

    #[test]
    fn out_of_range_floor_rejected() {
        let mut config = PipelineConfig::default();
        config.scoring.relevance_floor = 1.5;
        assert!(matches!(config.validate(), Err(ClaimError::Config(_))));
    }

    #[test]
    fn zero_dimension_rejected() {
        let config = PipelineConfig {
            embedder: EmbedderConfig::Hashing {
                text_dim: 0,
                image_dim: 128,
            },
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_rule_threshold_rejected() {
        let mut config = PipelineConfig::default();
        config.scoring.rules.text_rule = 1.2;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("text_rule"), "{err}");

        let mut config = PipelineConfig::default();
        config.scoring.rules.image_rule = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.scoring.rules.low_severity = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_image_byte_limit_rejected() {
        let json = r#"{ "intake": { "max_image_bytes": 0 } }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert!(matches!(config.validate(), Err(ClaimError::Config(_))));
    }
}
