use indexmap::IndexMap;
use ndarray::{Array2, ArrayView1};
use uuid::Uuid;

use super::predictor::ColdStartPolicy;
use crate::data::record::{ItemId, UserId};

/// Trained latent-factor model.
///
/// Every user and item seen in training owns exactly one row of length
/// `rank`; ids never seen have no row. The model is never mutated after
/// training: policy changes produce a new value.
#[derive(Debug, Clone)]
pub struct LatentFactorModel {
    id: Uuid,
    rank: usize,
    regularization: f64,
    cold_start_policy: ColdStartPolicy,
    default_value: f32,
    user_index: IndexMap<UserId, usize>,
    user_factors: Array2<f32>,
    item_index: IndexMap<ItemId, usize>,
    item_factors: Array2<f32>,
    training_history: Vec<f64>,
}

/// Raw pieces a model is assembled from by the trainer and the store.
#[derive(Debug)]
pub(crate) struct ModelParts {
    pub id: Uuid,
    pub rank: usize,
    pub regularization: f64,
    pub cold_start_policy: ColdStartPolicy,
    pub default_value: f32,
    pub user_index: IndexMap<UserId, usize>,
    pub user_factors: Array2<f32>,
    pub item_index: IndexMap<ItemId, usize>,
    pub item_factors: Array2<f32>,
    pub training_history: Vec<f64>,
}

impl LatentFactorModel {
    pub(crate) fn from_parts(parts: ModelParts) -> Self {
        debug_assert_eq!(parts.user_factors.dim(), (parts.user_index.len(), parts.rank));
        debug_assert_eq!(parts.item_factors.dim(), (parts.item_index.len(), parts.rank));
        Self {
            id: parts.id,
            rank: parts.rank,
            regularization: parts.regularization,
            cold_start_policy: parts.cold_start_policy,
            default_value: parts.default_value,
            user_index: parts.user_index,
            user_factors: parts.user_factors,
            item_index: parts.item_index,
            item_factors: parts.item_factors,
            training_history: parts.training_history,
        }
    }

    /// Identifier assigned when the model was trained.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Latent dimension `k`.
    #[must_use]
    pub const fn rank(&self) -> usize {
        self.rank
    }

    /// Regularization strength used in training.
    #[must_use]
    pub const fn regularization(&self) -> f64 {
        self.regularization
    }

    /// How ids unseen in training are scored.
    #[must_use]
    pub const fn cold_start_policy(&self) -> ColdStartPolicy {
        self.cold_start_policy
    }

    /// Fallback used by [`ColdStartPolicy::DefaultValue`].
    #[must_use]
    pub const fn default_value(&self) -> f32 {
        self.default_value
    }

    /// Training RMSE after each completed iteration.
    #[must_use]
    pub fn training_history(&self) -> &[f64] {
        &self.training_history
    }

    /// Number of iterations actually run.
    #[must_use]
    pub fn iterations(&self) -> usize {
        self.training_history.len()
    }

    /// Number of users with a factor vector.
    #[must_use]
    pub fn num_users(&self) -> usize {
        self.user_index.len()
    }

    /// Number of items with a factor vector.
    #[must_use]
    pub fn num_items(&self) -> usize {
        self.item_index.len()
    }

    /// Users with a factor vector, in first-seen order.
    pub fn users(&self) -> impl Iterator<Item = UserId> + '_ {
        self.user_index.keys().copied()
    }

    /// Items with a factor vector, in first-seen order.
    pub fn items(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.item_index.keys().copied()
    }

    /// Factor vector of `user`, if it was seen in training.
    #[must_use]
    pub fn user_factor(&self, user: UserId) -> Option<ArrayView1<'_, f32>> {
        self.user_index
            .get(&user)
            .map(|&row| self.user_factors.row(row))
    }

    /// Factor vector of `item`, if it was seen in training.
    #[must_use]
    pub fn item_factor(&self, item: ItemId) -> Option<ArrayView1<'_, f32>> {
        self.item_index
            .get(&item)
            .map(|&row| self.item_factors.row(row))
    }

    /// Returns a copy scoring cold-start pairs with `policy`.
    #[must_use]
    pub fn with_cold_start_policy(mut self, policy: ColdStartPolicy) -> Self {
        self.cold_start_policy = policy;
        self
    }

    /// Returns a copy whose [`ColdStartPolicy::DefaultValue`] fallback is `value`.
    #[must_use]
    pub fn with_default_value(mut self, value: f32) -> Self {
        self.default_value = value;
        self
    }

    /// `(user, factor vector)` pairs in row order.
    pub fn user_rows(&self) -> impl Iterator<Item = (UserId, ArrayView1<'_, f32>)> + '_ {
        self.users().zip(self.user_factors.rows())
    }

    /// `(item, factor vector)` pairs in row order.
    pub fn item_rows(&self) -> impl Iterator<Item = (ItemId, ArrayView1<'_, f32>)> + '_ {
        self.items().zip(self.item_factors.rows())
    }

    pub(crate) const fn user_factors(&self) -> &Array2<f32> {
        &self.user_factors
    }

    pub(crate) const fn item_factors(&self) -> &Array2<f32> {
        &self.item_factors
    }
}
