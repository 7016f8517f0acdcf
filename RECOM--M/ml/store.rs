//! A saved model is a directory:
//!
//! ```text
//! <model>/metadata.json      hyperparameters, policy, format version
//! <model>/userFactors.jsonl  {"id": <user>, "features": [...]} per line
//! <model>/itemFactors.jsonl  {"id": <item>, "features": [...]} per line
//! ```
//!
//! Factor files are sorted by id so identical models produce identical bytes.

use std::{
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{RecomError, RecomResult, StorageCause},
    factorization::{
        model::{LatentFactorModel, ModelParts},
        predictor::ColdStartPolicy,
    },
};

/// Layout version written to and required in `metadata.json`.
pub const FORMAT_VERSION: u32 = 1;

const METADATA_FILE: &str = "metadata.json";
const USER_FACTORS_FILE: &str = "userFactors.jsonl";
const ITEM_FACTORS_FILE: &str = "itemFactors.jsonl";

#[derive(Debug, Serialize, Deserialize)]
struct ModelMetadata {
    format_version: u32,
    model_id: Uuid,
    saved_at: DateTime<Utc>,
    rank: usize,
    regularization: f64,
    cold_start_policy: ColdStartPolicy,
    default_value: f32,
    num_users: usize,
    num_items: usize,
    #[serde(default)]
    training_history: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FactorRow {
    id: u32,
    features: Vec<f32>,
}

/// Saves and loads [`LatentFactorModel`]s as directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelStore;

impl ModelStore {
    /// Writes `model` to `destination`, replacing whatever was there.
    pub fn save(model: &LatentFactorModel, destination: impl AsRef<Path>) -> RecomResult<()> {
        let destination = destination.as_ref();
        write_model(model, destination).map_err(|source| RecomError::StorageWrite {
            path: destination.to_path_buf(),
            source,
        })
    }

    /// Reads a model previously written by [`ModelStore::save`].
    pub fn load(source: impl AsRef<Path>) -> RecomResult<LatentFactorModel> {
        let source = source.as_ref();
        read_model(source).map_err(|cause| RecomError::StorageRead {
            path: source.to_path_buf(),
            source: cause,
        })
    }
}

fn write_model(model: &LatentFactorModel, destination: &Path) -> Result<(), StorageCause> {
    if destination.is_dir() {
        fs::remove_dir_all(destination)?;
    } else if destination.exists() {
        fs::remove_file(destination)?;
    }
    fs::create_dir_all(destination)?;

    let metadata = ModelMetadata {
        format_version: FORMAT_VERSION,
        model_id: model.id(),
        saved_at: Utc::now(),
        rank: model.rank(),
        regularization: model.regularization(),
        cold_start_policy: model.cold_start_policy(),
        default_value: model.default_value(),
        num_users: model.num_users(),
        num_items: model.num_items(),
        training_history: model.training_history().to_vec(),
    };
    let file = File::create(destination.join(METADATA_FILE))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &metadata)?;
    writer.write_all(b"\n")?;
    writer.flush()?;

    write_factors(&destination.join(USER_FACTORS_FILE), model.user_rows())?;
    write_factors(&destination.join(ITEM_FACTORS_FILE), model.item_rows())?;
    Ok(())
}

fn write_factors<'a>(
    path: &Path,
    rows: impl Iterator<Item = (u32, ArrayView1<'a, f32>)>,
) -> Result<(), StorageCause> {
    let mut rows: Vec<(u32, ArrayView1<'a, f32>)> = rows.collect();
    rows.sort_by_key(|(id, _)| *id);
    let mut writer = BufWriter::new(File::create(path)?);
    for (id, features) in rows {
        let row = FactorRow {
            id,
            features: features.to_vec(),
        };
        serde_json::to_writer(&mut writer, &row)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

fn read_model(source: &Path) -> Result<LatentFactorModel, StorageCause> {
    if !source.is_dir() {
        return Err(StorageCause::Format(format!(
            "{} is not a model directory",
            source.display()
        )));
    }
    let file = File::open(source.join(METADATA_FILE))?;
    let metadata: ModelMetadata = serde_json::from_reader(BufReader::new(file))?;
    if metadata.format_version != FORMAT_VERSION {
        return Err(StorageCause::Format(format!(
            "format version {} is not supported (expected {FORMAT_VERSION})",
            metadata.format_version
        )));
    }
    if metadata.rank == 0 {
        return Err(StorageCause::Format("rank must be at least 1".into()));
    }

    let (user_index, user_factors) =
        read_factors(&source.join(USER_FACTORS_FILE), metadata.rank, metadata.num_users)?;
    let (item_index, item_factors) =
        read_factors(&source.join(ITEM_FACTORS_FILE), metadata.rank, metadata.num_items)?;

    Ok(LatentFactorModel::from_parts(ModelParts {
        id: metadata.model_id,
        rank: metadata.rank,
        regularization: metadata.regularization,
        cold_start_policy: metadata.cold_start_policy,
        default_value: metadata.default_value,
        user_index,
        user_factors,
        item_index,
        item_factors,
        training_history: metadata.training_history,
    }))
}

fn read_factors(
    path: &Path,
    rank: usize,
    expected_rows: usize,
) -> Result<(IndexMap<u32, usize>, Array2<f32>), StorageCause> {
    let reader = BufReader::new(File::open(path)?);
    // Row counts come from metadata.json and are only trusted after the count check below.
    let mut index = IndexMap::new();
    let mut values = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row: FactorRow = serde_json::from_str(&line)?;
        if row.features.len() != rank {
            return Err(StorageCause::Format(format!(
                "factor for id {} has length {}, expected {rank}",
                row.id,
                row.features.len()
            )));
        }
        let next = index.len();
        if index.insert(row.id, next).is_some() {
            return Err(StorageCause::Format(format!("duplicate factor for id {}", row.id)));
        }
        values.extend(row.features);
    }
    if index.len() != expected_rows {
        return Err(StorageCause::Format(format!(
            "{} holds {} factors, metadata declares {expected_rows}",
            path.display(),
            index.len()
        )));
    }
    let factors = Array2::from_shape_vec((index.len(), rank), values)
        .map_err(|err| StorageCause::Format(err.to_string()))?;
    Ok((index, factors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{dataset::InteractionDataset, record::Interaction};
    use crate::factorization::trainer::{AlsParams, AlsTrainer};
    use tempfile::tempdir;

    fn trained() -> LatentFactorModel {
        let data = InteractionDataset::new(vec![
            Interaction::new(3, 1, 5.0, 100),
            Interaction::new(1, 2, 4.0, 101),
            Interaction::new(2, 1, 1.0, 102),
            Interaction::new(2, 3, 2.5, 103),
        ]);
        AlsTrainer::new(AlsParams::new(3, 4, 0.1).with_seed(17))
            .fit(&data)
            .unwrap()
    }

    #[test]
    fn round_trip_preserves_factors_and_settings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model");
        let model = trained();
        ModelStore::save(&model, &path).unwrap();
        let loaded = ModelStore::load(&path).unwrap();

        assert_eq!(loaded.id(), model.id());
        assert_eq!(loaded.rank(), model.rank());
        assert_eq!(loaded.cold_start_policy(), model.cold_start_policy());
        assert!((loaded.regularization() - model.regularization()).abs() < 1e-12);
        assert_eq!(loaded.training_history(), model.training_history());
        for (user, row) in model.user_rows() {
            let other = loaded.user_factor(user).unwrap();
            assert!(row.iter().zip(other.iter()).all(|(a, b)| (a - b).abs() < 1e-6));
        }
        for (item, row) in model.item_rows() {
            let other = loaded.item_factor(item).unwrap();
            assert!(row.iter().zip(other.iter()).all(|(a, b)| (a - b).abs() < 1e-6));
        }
        assert_eq!(loaded.predict(3, 1), model.predict(3, 1));
        assert_eq!(loaded.predict(42, 1), None);
    }

    #[test]
    fn save_overwrites_previous_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("stale.txt"), "old run").unwrap();
        ModelStore::save(&trained(), &path).unwrap();
        assert!(!path.join("stale.txt").exists());
        assert!(path.join(METADATA_FILE).exists());
        assert!(ModelStore::load(&path).is_ok());
    }

    #[test]
    fn load_rejects_missing_directory() {
        let dir = tempdir().unwrap();
        let err = ModelStore::load(dir.path().join("nothing")).unwrap_err();
        assert!(matches!(err, RecomError::StorageRead { .. }));
    }

    #[test]
    fn load_rejects_version_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model");
        ModelStore::save(&trained(), &path).unwrap();
        let raw = fs::read_to_string(path.join(METADATA_FILE)).unwrap();
        let mut metadata: serde_json::Value = serde_json::from_str(&raw).unwrap();
        metadata["format_version"] = serde_json::json!(FORMAT_VERSION + 1);
        fs::write(path.join(METADATA_FILE), metadata.to_string()).unwrap();
        match ModelStore::load(&path) {
            Err(RecomError::StorageRead {
                source: StorageCause::Format(reason),
                ..
            }) => assert!(reason.contains("format version")),
            other => panic!("expected format error, got {other:?}"),
        }
    }

    #[test]
    fn load_rejects_wrong_factor_length() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model");
        ModelStore::save(&trained(), &path).unwrap();
        fs::write(
            path.join(ITEM_FACTORS_FILE),
            "{\"id\":1,\"features\":[0.5]}\n{\"id\":2,\"features\":[0.5]}\n{\"id\":3,\"features\":[0.5]}\n",
        )
        .unwrap();
        assert!(matches!(
            ModelStore::load(&path),
            Err(RecomError::StorageRead { .. })
        ));
    }

    #[test]
    fn load_rejects_inflated_row_count() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model");
        ModelStore::save(&trained(), &path).unwrap();
        let raw = fs::read_to_string(path.join(METADATA_FILE)).unwrap();
        let mut metadata: serde_json::Value = serde_json::from_str(&raw).unwrap();
        metadata["num_users"] = serde_json::json!(u64::MAX / 2);
        metadata["rank"] = serde_json::json!(u64::MAX / 4);
        fs::write(path.join(METADATA_FILE), metadata.to_string()).unwrap();
        assert!(matches!(
            ModelStore::load(&path),
            Err(RecomError::StorageRead { .. })
        ));
    }

    #[test]
    fn save_into_unwritable_location_fails() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let err = ModelStore::save(&trained(), blocker.join("model")).unwrap_err();
        assert!(matches!(err, RecomError::StorageWrite { .. }));
    }
}
