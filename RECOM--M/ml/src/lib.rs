#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::module_name_repetitions
)]

//! Collaborative-filtering trainer: review records in, latent-factor model out.
//!
//! The stack is leaf-first: [`data`] parses and partitions interaction records,
//! [`factorization`] fits and scores an alternating-least-squares model,
//! [`evaluation`] measures held-out accuracy and [`store`] persists the result.
//! [`pipeline`] wires the stages together the way the training job runs them.

/// Error taxonomy shared by every stage.
#[path = "../error.rs"]
pub mod error;

/// Interaction records, datasets and random splits.
#[path = "../data/main.rs"]
pub mod data;

/// Alternating least squares training and prediction.
#[path = "../factorization/main.rs"]
pub mod factorization;

/// Regression metrics over held-out records.
#[path = "../evaluation.rs"]
pub mod evaluation;

/// Directory-based model persistence.
#[path = "../store.rs"]
pub mod store;

/// TOML pipeline configuration.
#[path = "../config.rs"]
pub mod config;

/// Structured logging hooks.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// End-to-end training job.
#[path = "../pipeline.rs"]
pub mod pipeline;

pub use config::{
    AlsSection, EvaluationSection, InputSection, PipelineConfig, PredictSection, SplitSection,
};
pub use data::{
    dataset::{InteractionDataset, LoadSummary, ParseMode},
    record::{parse_line, Interaction, ItemId, Timestamp, UserId, FIELD_DELIMITER},
    split::random_split,
};
pub use error::{RecomError, RecomResult};
pub use evaluation::{evaluate, EvaluationReport, Evaluator, Metric};
pub use factorization::{
    model::LatentFactorModel,
    predictor::{ColdStartPolicy, ScoredInteraction},
    trainer::{AlsParams, AlsTrainer},
};
pub use pipeline::{PipelineError, PipelineReport, Stage, TrainingPipeline};
pub use store::ModelStore;
pub use telemetry::{RecomTelemetry, RecomTelemetryBuilder};
