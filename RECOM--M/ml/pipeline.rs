use std::{fmt, path::Path};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_logging::LogLevel;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::PipelineConfig,
    data::{dataset::InteractionDataset, split::random_split_seeded},
    error::RecomError,
    evaluation::{EvaluationReport, Evaluator, Metric},
    factorization::{model::LatentFactorModel, trainer::AlsTrainer},
    store::ModelStore,
    telemetry::RecomTelemetry,
};

/// Stage of the training job, used to qualify failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Configuration validation.
    Config,
    /// Reading and parsing input records.
    Parse,
    /// Training/test partitioning.
    Split,
    /// ALS fitting.
    Train,
    /// Model persistence.
    Save,
    /// Held-out scoring.
    Evaluate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Config => "config",
            Self::Parse => "parse",
            Self::Split => "split",
            Self::Train => "train",
            Self::Save => "save",
            Self::Evaluate => "evaluate",
        };
        f.write_str(name)
    }
}

/// A failure tagged with the stage that produced it.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    /// Failing stage.
    pub stage: Stage,
    /// Underlying error.
    #[source]
    pub source: RecomError,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Identifier of the saved model.
    pub model_id: Uuid,
    /// Records parsed from the input.
    pub input_records: usize,
    /// Lines dropped as malformed (lenient mode only).
    pub malformed_lines: usize,
    /// Records in the training split.
    pub training_records: usize,
    /// Records in the test split.
    pub test_records: usize,
    /// Users with learned factors.
    pub users: usize,
    /// Items with learned factors.
    pub items: usize,
    /// ALS iterations run.
    pub iterations: usize,
    /// Training RMSE after the last iteration.
    pub training_rmse: Option<f64>,
    /// Held-out metric.
    pub evaluation: EvaluationReport,
}

impl PipelineReport {
    /// The human-readable result line printed after training.
    #[must_use]
    pub fn summary(&self) -> String {
        let label = match self.evaluation.metric {
            Metric::Rmse => "Root mean square error",
            Metric::Mse => "Mean squared error",
            Metric::Mae => "Mean absolute error",
            Metric::R2 => "R squared",
        };
        format!("{label} = {}", self.evaluation.value)
    }
}

/// Parse → split → train → save → evaluate, as one job.
#[derive(Debug, Clone, Default)]
pub struct TrainingPipeline {
    config: PipelineConfig,
    telemetry: Option<RecomTelemetry>,
}

impl TrainingPipeline {
    /// Creates a pipeline from a configuration.
    #[must_use]
    pub const fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            telemetry: None,
        }
    }

    /// Attaches telemetry sinks for structured logging.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: RecomTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the whole job from an input file or directory to a model directory.
    pub fn run(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<PipelineReport, PipelineError> {
        let input = input.as_ref();
        self.config.validate().map_err(at(Stage::Config))?;

        let (dataset, summary) =
            InteractionDataset::load(input, self.config.input.mode).map_err(at(Stage::Parse))?;
        for err in &summary.malformed {
            self.log(
                LogLevel::Warn,
                "recom_malformed_line",
                json!({ "error": err.to_string() }),
            );
        }
        self.log(
            LogLevel::Info,
            "recom_parse_complete",
            json!({
                "input": input.display().to_string(),
                "files": summary.files,
                "records": dataset.len(),
                "malformed": summary.malformed.len(),
            }),
        );

        let mut report = self.run_dataset(&dataset, output)?;
        report.malformed_lines = summary.malformed.len();
        Ok(report)
    }

    /// Runs the job on already-loaded records.
    pub fn run_dataset(
        &self,
        dataset: &InteractionDataset,
        output: impl AsRef<Path>,
    ) -> Result<PipelineReport, PipelineError> {
        let output = output.as_ref();
        self.config.validate().map_err(at(Stage::Config))?;

        let mut parts = random_split_seeded(dataset, &self.config.split.ratios, self.config.split.seed)
            .map_err(at(Stage::Split))?;
        let test = parts.pop().unwrap_or_default();
        let training = parts.pop().unwrap_or_default();
        self.log(
            LogLevel::Info,
            "recom_split_complete",
            json!({ "training": training.len(), "test": test.len() }),
        );

        let model = self.train(&training).map_err(at(Stage::Train))?;

        ModelStore::save(&model, output).map_err(at(Stage::Save))?;
        self.log(
            LogLevel::Info,
            "recom_model_saved",
            json!({ "model_id": model.id().to_string(), "path": output.display().to_string() }),
        );

        let mut evaluator = Evaluator::new(self.config.evaluation.metric);
        if let Some(tel) = &self.telemetry {
            evaluator = evaluator.with_telemetry(tel.clone());
        }
        let evaluation = evaluator.evaluate(&model, &test).map_err(at(Stage::Evaluate))?;

        Ok(PipelineReport {
            model_id: model.id(),
            input_records: dataset.len(),
            malformed_lines: 0,
            training_records: training.len(),
            test_records: test.len(),
            users: model.num_users(),
            items: model.num_items(),
            iterations: model.iterations(),
            training_rmse: model.training_history().last().copied(),
            evaluation,
        })
    }

    fn train(&self, training: &InteractionDataset) -> Result<LatentFactorModel, RecomError> {
        let mut trainer = AlsTrainer::new(self.config.als_params());
        if let Some(tel) = &self.telemetry {
            trainer = trainer.with_telemetry(tel.clone());
        }
        trainer.fit(training)
    }

    fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Some(tel) = &self.telemetry {
            let _ = tel.log(level, message, metadata);
        }
    }
}

fn at(stage: Stage) -> impl Fn(RecomError) -> PipelineError {
    move |source| PipelineError { stage, source }
}
