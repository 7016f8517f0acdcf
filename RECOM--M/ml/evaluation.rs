use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    data::dataset::InteractionDataset,
    error::{RecomError, RecomResult},
    factorization::model::LatentFactorModel,
    telemetry::RecomTelemetry,
};

/// Regression metric computed over scorable records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Root-mean-square error.
    #[default]
    Rmse,
    /// Mean squared error.
    Mse,
    /// Mean absolute error.
    Mae,
    /// Coefficient of determination.
    R2,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rmse => "rmse",
            Self::Mse => "mse",
            Self::Mae => "mae",
            Self::R2 => "r2",
        };
        f.write_str(name)
    }
}

/// Outcome of scoring a held-out subset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Metric that `value` holds.
    pub metric: Metric,
    /// Metric value over the scored records.
    pub value: f64,
    /// Records that received a prediction.
    pub scored: usize,
    /// Records excluded as cold start.
    pub dropped: usize,
}

impl EvaluationReport {
    /// Renders a concise summary string.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "[eval] {}={:.4} scored={} dropped={}",
            self.metric, self.value, self.scored, self.dropped
        )
    }
}

/// Running sums over `(prediction, actual)` pairs.
#[derive(Debug, Clone, Copy, Default)]
struct Moments {
    count: usize,
    squared_error: f64,
    absolute_error: f64,
    actual: f64,
    actual_squared: f64,
}

impl Moments {
    fn observe(prediction: f32, actual: f32) -> Self {
        let error = f64::from(prediction) - f64::from(actual);
        let actual = f64::from(actual);
        Self {
            count: 1,
            squared_error: error * error,
            absolute_error: error.abs(),
            actual,
            actual_squared: actual * actual,
        }
    }

    fn merge(self, other: Self) -> Self {
        Self {
            count: self.count + other.count,
            squared_error: self.squared_error + other.squared_error,
            absolute_error: self.absolute_error + other.absolute_error,
            actual: self.actual + other.actual,
            actual_squared: self.actual_squared + other.actual_squared,
        }
    }

    fn value(&self, metric: Metric) -> f64 {
        let n = self.count as f64;
        let mse = self.squared_error / n;
        match metric {
            Metric::Rmse => mse.sqrt(),
            Metric::Mse => mse,
            Metric::Mae => self.absolute_error / n,
            Metric::R2 => {
                let mean = self.actual / n;
                let total = (self.actual_squared - n * mean * mean).max(0.0);
                if total > 0.0 {
                    1.0 - self.squared_error / total
                } else if self.squared_error == 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Scores a held-out subset with a trained model.
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    metric: Metric,
    telemetry: Option<RecomTelemetry>,
}

impl Evaluator {
    /// Creates an evaluator for `metric`.
    #[must_use]
    pub const fn new(metric: Metric) -> Self {
        Self {
            metric,
            telemetry: None,
        }
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: RecomTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Computes the metric over every record the model can score.
    ///
    /// Records whose prediction is absent are excluded from both the error
    /// sum and the denominator. Fails when nothing at all can be scored.
    pub fn evaluate(
        &self,
        model: &LatentFactorModel,
        test: &InteractionDataset,
    ) -> RecomResult<EvaluationReport> {
        let moments = test
            .records()
            .par_iter()
            .filter_map(|record| {
                model
                    .predict(record.user_id(), record.item_id())
                    .map(|prediction| Moments::observe(prediction, record.rating()))
            })
            .reduce(Moments::default, Moments::merge);
        if moments.count == 0 {
            return Err(RecomError::NoScorableRecords {
                records: test.len(),
            });
        }
        let report = EvaluationReport {
            metric: self.metric,
            value: moments.value(self.metric),
            scored: moments.count,
            dropped: test.len() - moments.count,
        };
        if let Some(tel) = &self.telemetry {
            let _ = tel.log(
                LogLevel::Info,
                "recom_evaluation_complete",
                json!({
                    "metric": report.metric,
                    "value": report.value,
                    "scored": report.scored,
                    "dropped": report.dropped,
                }),
            );
        }
        Ok(report)
    }
}

/// Root-mean-square error of `model` over the scorable records of `test`.
pub fn evaluate(model: &LatentFactorModel, test: &InteractionDataset) -> RecomResult<f64> {
    Evaluator::new(Metric::Rmse)
        .evaluate(model, test)
        .map(|report| report.value)
}
