//! Latent-factor collaborative filtering fitted by alternating least squares.

/// Dense symmetric positive-definite solves for the normal equations.
pub mod solver;

/// The trained, immutable factor model.
pub mod model;

/// ALS training loop.
pub mod trainer;

/// Rating prediction, cold-start handling and top-N ranking.
pub mod predictor;

pub use model::LatentFactorModel;
pub use predictor::{predict, ColdStartPolicy, ScoredInteraction};
pub use trainer::{train, AlsParams, AlsTrainer};
