use std::cmp::Ordering;

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use super::model::LatentFactorModel;
use crate::data::{
    dataset::InteractionDataset,
    record::{Interaction, ItemId, UserId},
};

/// How a pair involving an id unseen in training is scored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColdStartPolicy {
    /// No prediction; the pair is left out of any aggregate.
    #[default]
    Drop,
    /// The model's fallback value (the training mean unless overridden).
    DefaultValue,
}

/// A record paired with its prediction, `None` when dropped as cold start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredInteraction {
    /// The scored record.
    pub record: Interaction,
    /// Predicted rating.
    pub prediction: Option<f32>,
}

impl LatentFactorModel {
    /// Dot product of the two factor vectors when both ids were seen in training.
    ///
    /// Ignores the cold-start policy.
    #[must_use]
    pub fn score(&self, user: UserId, item: ItemId) -> Option<f32> {
        let user_vec = self.user_factor(user)?;
        let item_vec = self.item_factor(item)?;
        Some(user_vec.dot(&item_vec))
    }

    /// Predicted rating for `(user, item)` under the model's cold-start policy.
    #[must_use]
    pub fn predict(&self, user: UserId, item: ItemId) -> Option<f32> {
        match (self.score(user, item), self.cold_start_policy()) {
            (Some(score), _) => Some(score),
            (None, ColdStartPolicy::Drop) => None,
            (None, ColdStartPolicy::DefaultValue) => Some(self.default_value()),
        }
    }

    /// Scores every record of `dataset`, keeping cold-start gaps explicit.
    #[must_use]
    pub fn transform(&self, dataset: &InteractionDataset) -> Vec<ScoredInteraction> {
        dataset
            .iter()
            .map(|record| ScoredInteraction {
                record: *record,
                prediction: self.predict(record.user_id(), record.item_id()),
            })
            .collect()
    }

    /// The `n` highest-scoring items for `user`, best first.
    ///
    /// `None` when the user was not seen in training.
    #[must_use]
    pub fn recommend_for_user(&self, user: UserId, n: usize) -> Option<Vec<(ItemId, f32)>> {
        let user_vec = self.user_factor(user)?;
        Some(top_n(self.items(), self.item_factors(), user_vec, n))
    }

    /// The `n` users with the highest score for `item`, best first.
    ///
    /// `None` when the item was not seen in training.
    #[must_use]
    pub fn recommend_for_item(&self, item: ItemId, n: usize) -> Option<Vec<(UserId, f32)>> {
        let item_vec = self.item_factor(item)?;
        Some(top_n(self.users(), self.user_factors(), item_vec, n))
    }
}

/// Predicted rating for `(user, item)`; see [`LatentFactorModel::predict`].
#[must_use]
pub fn predict(model: &LatentFactorModel, user: UserId, item: ItemId) -> Option<f32> {
    model.predict(user, item)
}

fn top_n(
    ids: impl Iterator<Item = u32>,
    candidates: &Array2<f32>,
    query: ArrayView1<'_, f32>,
    n: usize,
) -> Vec<(u32, f32)> {
    let scores = candidates.dot(&query);
    let mut ranked: Vec<(u32, f32)> = ids.zip(scores.iter().copied()).collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked.truncate(n);
    ranked
}
