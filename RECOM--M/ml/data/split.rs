use rand::{rngs::SmallRng, Rng, SeedableRng};

use super::dataset::InteractionDataset;
use crate::error::{RecomError, RecomResult};

/// Allowed distance between the ratio sum and 1.0.
pub const RATIO_TOLERANCE: f64 = 1e-6;

/// Checks that ratios are non-empty, positive, finite and sum to one.
pub fn validate_ratios(ratios: &[f64]) -> RecomResult<()> {
    let invalid = |reason: &str| RecomError::InvalidRatio {
        ratios: ratios.to_vec(),
        reason: reason.to_owned(),
    };
    if ratios.is_empty() {
        return Err(invalid("at least one ratio is required"));
    }
    if ratios.iter().any(|ratio| !ratio.is_finite() || *ratio <= 0.0) {
        return Err(invalid("every ratio must be a positive finite number"));
    }
    let total: f64 = ratios.iter().sum();
    if (total - 1.0).abs() > RATIO_TOLERANCE {
        return Err(invalid(&format!("ratios sum to {total}, expected 1.0")));
    }
    Ok(())
}

/// Assigns each record independently to one bucket with probability equal to
/// its ratio.
///
/// Bucket sizes are therefore approximate. Every record lands in exactly one
/// bucket and the relative order of records within a bucket is preserved.
pub fn random_split<R: Rng>(
    dataset: &InteractionDataset,
    ratios: &[f64],
    rng: &mut R,
) -> RecomResult<Vec<InteractionDataset>> {
    validate_ratios(ratios)?;
    let mut bounds = Vec::with_capacity(ratios.len());
    let mut acc = 0.0;
    for ratio in ratios {
        acc += ratio;
        bounds.push(acc);
    }
    let last = ratios.len() - 1;

    let mut buckets: Vec<Vec<_>> = vec![Vec::new(); ratios.len()];
    for record in dataset {
        let draw: f64 = rng.gen();
        let bucket = bounds
            .iter()
            .position(|bound| draw < *bound)
            .unwrap_or(last);
        buckets[bucket].push(*record);
    }
    Ok(buckets.into_iter().map(InteractionDataset::new).collect())
}

/// [`random_split`] with a `SmallRng` seeded from `seed`, or from entropy when absent.
pub fn random_split_seeded(
    dataset: &InteractionDataset,
    ratios: &[f64],
    seed: Option<u64>,
) -> RecomResult<Vec<InteractionDataset>> {
    let mut rng = seed.map_or_else(SmallRng::from_entropy, SmallRng::seed_from_u64);
    random_split(dataset, ratios, &mut rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::record::Interaction;
    use proptest::prelude::*;

    fn dataset(size: u32) -> InteractionDataset {
        (0..size)
            .map(|idx| Interaction::new(idx % 17, idx % 23, (idx % 5) as f32 + 1.0, i64::from(idx)))
            .collect()
    }

    fn sorted_keys(parts: &[InteractionDataset]) -> Vec<i64> {
        let mut keys: Vec<i64> = parts.iter().flat_map(InteractionDataset::timestamps).collect();
        keys.sort_unstable();
        keys
    }

    #[test]
    fn partitions_cover_the_dataset_exactly_once() {
        let data = dataset(1000);
        for ratios in [vec![0.8, 0.2], vec![0.5, 0.25, 0.25], vec![1.0]] {
            let parts = random_split_seeded(&data, &ratios, Some(7)).unwrap();
            assert_eq!(parts.len(), ratios.len());
            assert_eq!(parts.iter().map(InteractionDataset::len).sum::<usize>(), 1000);
            assert_eq!(sorted_keys(&parts), (0..1000).collect::<Vec<i64>>());
        }
    }

    #[test]
    fn sizes_approximate_ratios() {
        let parts = random_split_seeded(&dataset(10_000), &[0.8, 0.2], Some(11)).unwrap();
        let train = parts[0].len() as f64 / 10_000.0;
        assert!((train - 0.8).abs() < 0.03, "training share {train}");
    }

    #[test]
    fn same_seed_same_partition() {
        let data = dataset(200);
        let first = random_split_seeded(&data, &[0.7, 0.3], Some(3)).unwrap();
        let second = random_split_seeded(&data, &[0.7, 0.3], Some(3)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_invalid_ratios() {
        let data = dataset(10);
        for ratios in [vec![], vec![0.5, 0.4], vec![1.2, -0.2], vec![0.0, 1.0], vec![f64::NAN]] {
            let err = random_split_seeded(&data, &ratios, Some(1)).unwrap_err();
            assert!(matches!(err, RecomError::InvalidRatio { .. }), "{ratios:?}");
        }
    }

    #[test]
    fn tolerates_rounding_in_ratio_sum() {
        assert!(validate_ratios(&[0.1, 0.2, 0.7]).is_ok());
        assert!(validate_ratios(&[1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0]).is_ok());
    }

    proptest! {
        #[test]
        fn union_of_parts_is_the_dataset(
            size in 0u32..400,
            weights in prop::collection::vec(0.01f64..1.0, 1..5),
            seed in any::<u64>()
        ) {
            let total: f64 = weights.iter().sum();
            let ratios: Vec<f64> = weights.iter().map(|w| w / total).collect();
            let parts = random_split_seeded(&dataset(size), &ratios, Some(seed)).unwrap();
            prop_assert_eq!(parts.len(), ratios.len());
            prop_assert_eq!(sorted_keys(&parts), (0..i64::from(size)).collect::<Vec<i64>>());
        }
    }
}
