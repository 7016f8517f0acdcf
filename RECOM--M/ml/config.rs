use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    data::{dataset::ParseMode, split::validate_ratios},
    error::{RecomError, RecomResult},
    evaluation::Metric,
    factorization::{predictor::ColdStartPolicy, trainer::AlsParams},
};

/// Complete configuration of one training run.
///
/// Every section is optional in the TOML document; missing values fall back
/// to the defaults of the production job (80/20 split, rank 10, 5 iterations,
/// regularization 0.1, cold-start drop, strict parsing, RMSE).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Training/test partitioning.
    pub split: SplitSection,
    /// Factorization hyperparameters.
    pub als: AlsSection,
    /// Cold-start handling.
    pub predict: PredictSection,
    /// Input parsing.
    pub input: InputSection,
    /// Held-out metric.
    pub evaluation: EvaluationSection,
}

/// `[split]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SplitSection {
    /// Training and test proportions, in that order.
    pub ratios: Vec<f64>,
    /// Seed for record assignment; fresh entropy when absent.
    pub seed: Option<u64>,
}

impl Default for SplitSection {
    fn default() -> Self {
        Self {
            ratios: vec![0.8, 0.2],
            seed: None,
        }
    }
}

/// `[als]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlsSection {
    /// Latent dimension.
    pub rank: usize,
    /// Alternating passes.
    pub max_iterations: usize,
    /// Norm penalty.
    pub regularization: f64,
    /// Optional relative-improvement stopping rule.
    pub tolerance: Option<f64>,
    /// Seed for factor initialization.
    pub seed: Option<u64>,
    /// Clamp factors to be non-negative.
    pub nonnegative: bool,
}

impl Default for AlsSection {
    fn default() -> Self {
        let params = AlsParams::default();
        Self {
            rank: params.rank,
            max_iterations: params.max_iterations,
            regularization: params.regularization,
            tolerance: params.tolerance,
            seed: params.seed,
            nonnegative: params.nonnegative,
        }
    }
}

/// `[predict]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PredictSection {
    /// Policy for ids unseen in training.
    pub cold_start: ColdStartPolicy,
    /// Fallback for `default_value`; training mean when absent.
    pub default_value: Option<f32>,
}

/// `[input]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputSection {
    /// Malformed-line handling.
    pub mode: ParseMode,
}

/// `[evaluation]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvaluationSection {
    /// Metric reported for the test split.
    pub metric: Metric,
}

impl PipelineConfig {
    /// Loads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> RecomResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            RecomError::Config(format!("reading {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
            .map_err(|err| match err {
                RecomError::Config(reason) => {
                    RecomError::Config(format!("{}: {reason}", path.display()))
                }
                other => other,
            })
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(raw: &str) -> RecomResult<Self> {
        let config: Self = toml::from_str(raw).map_err(|err| RecomError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Uses `seed` for both the split and the factor initialization.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.split.seed = Some(seed);
        self.als.seed = Some(seed);
        self
    }

    /// Checks every section before any data is read.
    pub fn validate(&self) -> RecomResult<()> {
        validate_ratios(&self.split.ratios)?;
        if self.split.ratios.len() != 2 {
            return Err(RecomError::InvalidRatio {
                ratios: self.split.ratios.clone(),
                reason: "expected exactly two ratios (training, test)".into(),
            });
        }
        self.als_params().validate()
    }

    /// Trainer parameters assembled from `[als]` and `[predict]`.
    #[must_use]
    pub fn als_params(&self) -> AlsParams {
        AlsParams {
            rank: self.als.rank,
            max_iterations: self.als.max_iterations,
            regularization: self.als.regularization,
            tolerance: self.als.tolerance,
            seed: self.als.seed,
            nonnegative: self.als.nonnegative,
            cold_start_policy: self.predict.cold_start,
            default_value: self.predict.default_value,
        }
    }
}
