use indexmap::IndexMap;
use ndarray::{Array1, Array2, ArrayView1};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use uuid::Uuid;

use super::{
    model::{LatentFactorModel, ModelParts},
    predictor::ColdStartPolicy,
    solver::cholesky_solve,
};
use crate::{
    data::dataset::InteractionDataset,
    error::{RecomError, RecomResult},
    telemetry::RecomTelemetry,
};

/// Diagonal jitter retried when a normal-equation system is singular
/// (possible only with zero regularization).
const SINGULAR_JITTER: f64 = 1e-6;

/// ALS hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlsParams {
    /// Latent dimension `k`.
    pub rank: usize,
    /// Number of alternating passes.
    pub max_iterations: usize,
    /// Penalty on squared factor norms, scaled per row by its rating count.
    pub regularization: f64,
    /// Stop early once the relative improvement of training RMSE drops below this.
    pub tolerance: Option<f64>,
    /// Seed for the initial item factors; fresh entropy when `None`.
    pub seed: Option<u64>,
    /// Clamp solved factors to be non-negative.
    pub nonnegative: bool,
    /// Cold-start policy stamped on the trained model.
    pub cold_start_policy: ColdStartPolicy,
    /// Cold-start fallback; the training mean rating when `None`.
    pub default_value: Option<f32>,
}

impl Default for AlsParams {
    fn default() -> Self {
        Self {
            rank: 10,
            max_iterations: 5,
            regularization: 0.1,
            tolerance: None,
            seed: None,
            nonnegative: false,
            cold_start_policy: ColdStartPolicy::Drop,
            default_value: None,
        }
    }
}

impl AlsParams {
    /// Parameters with the given core hyperparameters and defaults elsewhere.
    #[must_use]
    pub fn new(rank: usize, max_iterations: usize, regularization: f64) -> Self {
        Self {
            rank,
            max_iterations,
            regularization,
            ..Self::default()
        }
    }

    /// Sets the seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets the early-stopping tolerance.
    #[must_use]
    pub const fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    /// Sets the cold-start policy.
    #[must_use]
    pub const fn with_cold_start_policy(mut self, policy: ColdStartPolicy) -> Self {
        self.cold_start_policy = policy;
        self
    }

    /// Enables or disables non-negative factors.
    #[must_use]
    pub const fn with_nonnegative(mut self, nonnegative: bool) -> Self {
        self.nonnegative = nonnegative;
        self
    }

    /// Rejects out-of-range values before any data is touched.
    pub fn validate(&self) -> RecomResult<()> {
        if self.rank == 0 {
            return Err(RecomError::hyperparameter("rank", "must be at least 1"));
        }
        if self.max_iterations == 0 {
            return Err(RecomError::hyperparameter(
                "max_iterations",
                "must be at least 1",
            ));
        }
        if !self.regularization.is_finite() || self.regularization < 0.0 {
            return Err(RecomError::hyperparameter(
                "regularization",
                format!("must be a finite value >= 0, got {}", self.regularization),
            ));
        }
        if let Some(tolerance) = self.tolerance {
            if !tolerance.is_finite() || tolerance < 0.0 {
                return Err(RecomError::hyperparameter(
                    "tolerance",
                    format!("must be a finite value >= 0, got {tolerance}"),
                ));
            }
        }
        if let Some(value) = self.default_value {
            if !value.is_finite() {
                return Err(RecomError::hyperparameter(
                    "default_value",
                    "must be finite",
                ));
            }
        }
        Ok(())
    }
}

/// Ratings of one row (a user or an item) as `(column index, rating)` pairs.
type RowRatings = Vec<(usize, f32)>;

/// Alternating least squares trainer.
#[derive(Debug, Clone, Default)]
pub struct AlsTrainer {
    params: AlsParams,
    telemetry: Option<RecomTelemetry>,
}

impl AlsTrainer {
    /// Creates a trainer.
    #[must_use]
    pub const fn new(params: AlsParams) -> Self {
        Self {
            params,
            telemetry: None,
        }
    }

    /// Attaches telemetry for per-iteration logging.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: RecomTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Configured hyperparameters.
    #[must_use]
    pub const fn params(&self) -> &AlsParams {
        &self.params
    }

    /// Fits user and item factors to `training`.
    ///
    /// Item factors start as random unit vectors; each iteration solves every
    /// user row against the fixed item factors, then every item row against
    /// the freshly solved user factors. Rows within a phase are solved in
    /// parallel and swapped in only once the whole phase is done.
    pub fn fit(&self, training: &InteractionDataset) -> RecomResult<LatentFactorModel> {
        let params = &self.params;
        params.validate()?;
        if training.is_empty() {
            return Err(RecomError::EmptyTrainingSet);
        }

        let mut user_index: IndexMap<u32, usize> = IndexMap::new();
        let mut item_index: IndexMap<u32, usize> = IndexMap::new();
        let mut by_user: Vec<RowRatings> = Vec::new();
        let mut by_item: Vec<RowRatings> = Vec::new();
        for record in training {
            let next_user = user_index.len();
            let user = *user_index.entry(record.user_id()).or_insert(next_user);
            let next_item = item_index.len();
            let item = *item_index.entry(record.item_id()).or_insert(next_item);
            if user == by_user.len() {
                by_user.push(Vec::new());
            }
            if item == by_item.len() {
                by_item.push(Vec::new());
            }
            by_user[user].push((item, record.rating()));
            by_item[item].push((user, record.rating()));
        }

        let mut rng = params
            .seed
            .map_or_else(SmallRng::from_entropy, SmallRng::seed_from_u64);
        let mut item_factors = random_unit_rows(&mut rng, item_index.len(), params.rank);
        let mut user_factors = Array2::<f32>::zeros((user_index.len(), params.rank));

        self.log(
            LogLevel::Info,
            "recom_training_start",
            json!({
                "records": training.len(),
                "users": user_index.len(),
                "items": item_index.len(),
                "rank": params.rank,
                "max_iterations": params.max_iterations,
                "regularization": params.regularization,
            }),
        );

        let mut history: Vec<f64> = Vec::with_capacity(params.max_iterations);
        for iteration in 0..params.max_iterations {
            user_factors = self.solve_phase(&by_user, &item_factors);
            item_factors = self.solve_phase(&by_item, &user_factors);

            let rmse = training_rmse(&by_user, &user_factors, &item_factors);
            self.log(
                LogLevel::Debug,
                "recom_als_iteration",
                json!({ "iteration": iteration + 1, "training_rmse": rmse }),
            );
            let previous = history.last().copied();
            history.push(rmse);
            if let (Some(tolerance), Some(previous)) = (params.tolerance, previous) {
                if previous > 0.0 && (previous - rmse) / previous < tolerance {
                    self.log(
                        LogLevel::Info,
                        "recom_als_converged",
                        json!({ "iteration": iteration + 1, "training_rmse": rmse }),
                    );
                    break;
                }
            }
        }

        let default_value = params.default_value.unwrap_or_else(|| {
            training
                .mean_rating()
                .map_or(0.0, |mean| mean as f32)
        });
        let model = LatentFactorModel::from_parts(ModelParts {
            id: Uuid::new_v4(),
            rank: params.rank,
            regularization: params.regularization,
            cold_start_policy: params.cold_start_policy,
            default_value,
            user_index,
            user_factors,
            item_index,
            item_factors,
            training_history: history,
        });
        self.log(
            LogLevel::Info,
            "recom_training_complete",
            json!({
                "model_id": model.id().to_string(),
                "iterations": model.iterations(),
                "training_rmse": model.training_history().last(),
            }),
        );
        Ok(model)
    }

    /// Solves every row of one side against the fixed factors of the other.
    fn solve_phase(&self, rows: &[RowRatings], fixed: &Array2<f32>) -> Array2<f32> {
        let rank = self.params.rank;
        let solved: Vec<Array1<f32>> = rows
            .par_iter()
            .map(|ratings| self.solve_row(ratings, fixed))
            .collect();
        let mut out = Array2::<f32>::zeros((rows.len(), rank));
        for (mut row, vector) in out.rows_mut().into_iter().zip(solved) {
            row.assign(&vector);
        }
        out
    }

    /// Minimizes `Σ (r − xᵀy)² + λ·n·‖x‖²` over `x` for one row with `n` ratings.
    fn solve_row(&self, ratings: &[(usize, f32)], fixed: &Array2<f32>) -> Array1<f32> {
        let rank = self.params.rank;
        let mut gram = Array2::<f64>::zeros((rank, rank));
        let mut rhs = Array1::<f64>::zeros(rank);
        for &(col, rating) in ratings {
            let y = fixed.row(col).mapv(f64::from);
            for i in 0..rank {
                rhs[i] += f64::from(rating) * y[i];
                for j in 0..rank {
                    gram[[i, j]] += y[i] * y[j];
                }
            }
        }
        let penalty = self.params.regularization * ratings.len() as f64;
        for i in 0..rank {
            gram[[i, i]] += penalty;
        }

        let solution = cholesky_solve(&gram, &rhs).or_else(|| {
            for i in 0..rank {
                gram[[i, i]] += SINGULAR_JITTER;
            }
            cholesky_solve(&gram, &rhs)
        });
        let Some(solution) = solution else {
            return Array1::zeros(rank);
        };
        let clamp = self.params.nonnegative;
        solution.mapv(|v| {
            let v = v as f32;
            if clamp {
                v.max(0.0)
            } else {
                v
            }
        })
    }

    fn log(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        if let Some(tel) = &self.telemetry {
            let _ = tel.log(level, message, metadata);
        }
    }
}

/// Trains with default settings apart from the three core hyperparameters.
pub fn train(
    training: &InteractionDataset,
    k: usize,
    max_iterations: usize,
    regularization: f64,
) -> RecomResult<LatentFactorModel> {
    AlsTrainer::new(AlsParams::new(k, max_iterations, regularization)).fit(training)
}

fn random_unit_rows(rng: &mut SmallRng, rows: usize, rank: usize) -> Array2<f32> {
    let mut factors = Array2::from_shape_fn((rows, rank), |_| rng.gen_range(0.0f32..1.0) + 1e-3);
    for mut row in factors.rows_mut() {
        let norm = row.dot(&row).sqrt();
        row.mapv_inplace(|v| v / norm);
    }
    factors
}

fn training_rmse(by_user: &[RowRatings], users: &Array2<f32>, items: &Array2<f32>) -> f64 {
    let (sum, count) = by_user
        .par_iter()
        .enumerate()
        .map(|(user, ratings)| {
            let x: ArrayView1<'_, f32> = users.row(user);
            ratings.iter().fold((0.0f64, 0usize), |(sum, count), &(item, rating)| {
                let err = f64::from(x.dot(&items.row(item)) - rating);
                (sum + err * err, count + 1)
            })
        })
        .reduce(|| (0.0, 0), |a, b| (a.0 + b.0, a.1 + b.1));
    if count == 0 {
        0.0
    } else {
        (sum / count as f64).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::record::Interaction;

    fn scenario() -> InteractionDataset {
        InteractionDataset::new(vec![
            Interaction::new(1, 1, 5.0, 100),
            Interaction::new(1, 2, 4.0, 101),
            Interaction::new(2, 1, 1.0, 102),
        ])
    }

    /// Ratings generated from rank-2 ground truth so a rank-2 fit can explain them.
    fn low_rank_dataset() -> InteractionDataset {
        let users: Vec<[f32; 2]> = (0..30u8)
            .map(|u| [1.0 + f32::from(u % 5) * 0.3, 0.5 + f32::from(u % 3) * 0.4])
            .collect();
        let items: Vec<[f32; 2]> = (0..20u8)
            .map(|i| [0.8 + f32::from(i % 4) * 0.2, 1.2 - f32::from(i % 6) * 0.15])
            .collect();
        let mut records = Vec::new();
        for (u, uf) in users.iter().enumerate() {
            for (i, itf) in items.iter().enumerate() {
                if (u + i) % 3 != 0 {
                    let rating = uf[0] * itf[0] + uf[1] * itf[1];
                    records.push(Interaction::new(u as u32, i as u32, rating, 0));
                }
            }
        }
        InteractionDataset::new(records)
    }

    #[test]
    fn scenario_trains_and_scores_known_pairs() {
        let model = train(&scenario(), 2, 5, 0.1).unwrap();
        assert_eq!(model.num_users(), 2);
        assert_eq!(model.num_items(), 2);
        assert_eq!(model.rank(), 2);
        for user in [1, 2] {
            assert_eq!(model.user_factor(user).unwrap().len(), 2);
        }
        for item in [1, 2] {
            assert_eq!(model.item_factor(item).unwrap().len(), 2);
        }
        assert!(model.predict(1, 1).unwrap().is_finite());
        assert_eq!(model.predict(3, 1), None);
        assert_eq!(model.iterations(), 5);
    }

    #[test]
    fn rejects_invalid_hyperparameters() {
        let data = scenario();
        for (k, iterations, reg, name) in [
            (0, 5, 0.1, "rank"),
            (2, 0, 0.1, "max_iterations"),
            (2, 5, -0.5, "regularization"),
            (2, 5, f64::NAN, "regularization"),
        ] {
            match train(&data, k, iterations, reg) {
                Err(RecomError::InvalidHyperparameter { name: got, .. }) => assert_eq!(got, name),
                other => panic!("expected invalid hyperparameter, got {other:?}"),
            }
        }
    }

    #[test]
    fn hyperparameters_checked_before_empty_data() {
        let err = train(&InteractionDataset::default(), 0, 5, 0.1).unwrap_err();
        assert!(matches!(err, RecomError::InvalidHyperparameter { .. }));
    }

    #[test]
    fn rejects_empty_training_set() {
        let err = train(&InteractionDataset::default(), 2, 5, 0.1).unwrap_err();
        assert!(matches!(err, RecomError::EmptyTrainingSet));
    }

    #[test]
    fn fits_low_rank_ratings_closely() {
        let params = AlsParams::new(2, 15, 0.01).with_seed(5);
        let model = AlsTrainer::new(params).fit(&low_rank_dataset()).unwrap();
        let final_rmse = *model.training_history().last().unwrap();
        assert!(final_rmse < 0.15, "training rmse {final_rmse}");
    }

    #[test]
    fn seeded_training_is_reproducible() {
        let params = AlsParams::new(3, 4, 0.1).with_seed(99);
        let first = AlsTrainer::new(params.clone()).fit(&low_rank_dataset()).unwrap();
        let second = AlsTrainer::new(params).fit(&low_rank_dataset()).unwrap();
        assert_eq!(first.predict(3, 4), second.predict(3, 4));
        for (a, b) in first.training_history().iter().zip(second.training_history()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn tolerance_stops_early() {
        let params = AlsParams::new(2, 50, 0.01).with_seed(1).with_tolerance(0.5);
        let model = AlsTrainer::new(params).fit(&low_rank_dataset()).unwrap();
        assert!(model.iterations() < 50);
    }

    #[test]
    fn nonnegative_factors_stay_non_negative() {
        let params = AlsParams::new(3, 5, 0.1).with_seed(2).with_nonnegative(true);
        let model = AlsTrainer::new(params).fit(&scenario()).unwrap();
        assert!(model
            .user_rows()
            .chain(model.item_rows())
            .all(|(_, row)| row.iter().all(|v| *v >= 0.0)));
    }

    #[test]
    fn default_value_is_training_mean() {
        let model = train(&scenario(), 2, 3, 0.1).unwrap();
        assert!((model.default_value() - 10.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn zero_regularization_still_trains() {
        let model = train(&scenario(), 4, 3, 0.0).unwrap();
        assert!(model.predict(2, 1).unwrap().is_finite());
    }
}
