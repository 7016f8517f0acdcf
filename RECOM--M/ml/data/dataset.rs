use std::{
    collections::HashSet,
    fs::{self, File},
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use super::record::{parse_line, Interaction, ItemId, Timestamp, UserId};
use crate::error::{RecomError, RecomResult};

/// How malformed lines are treated while loading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    /// The first malformed line aborts the load.
    #[default]
    Strict,
    /// Malformed lines are dropped and reported in the [`LoadSummary`].
    Lenient,
}

/// What a load consumed and what it rejected.
#[derive(Debug, Default)]
pub struct LoadSummary {
    /// Files read (1 for a single-file input).
    pub files: usize,
    /// Non-blank lines seen.
    pub lines: usize,
    /// Errors for every line dropped in lenient mode, with line numbers attached.
    pub malformed: Vec<RecomError>,
}

/// Read-only, ordered collection of interaction records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionDataset {
    records: Vec<Interaction>,
}

impl InteractionDataset {
    /// Wraps already-parsed records.
    #[must_use]
    pub const fn new(records: Vec<Interaction>) -> Self {
        Self { records }
    }

    /// Parses records from a lazily produced sequence of lines.
    ///
    /// Blank lines are skipped. Line numbers in reported errors are 1-based
    /// positions in `lines`.
    pub fn from_lines<I, S>(lines: I, mode: ParseMode) -> RecomResult<(Self, LoadSummary)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut records = Vec::new();
        let mut summary = LoadSummary {
            files: 1,
            ..LoadSummary::default()
        };
        ingest(
            lines
                .into_iter()
                .map(|line| Ok::<RecomResult<S>, std::io::Error>(Ok(line))),
            mode,
            &mut records,
            &mut summary,
        )
        .map_err(|err| match err {
            IngestError::Record(err) => err,
            IngestError::Io(source) => RecomError::Input {
                path: PathBuf::from("<lines>"),
                source,
            },
        })?;
        Ok((Self::new(records), summary))
    }

    /// Loads a file, or every visible file of a directory in name order.
    ///
    /// Directory entries starting with `.` or `_` (checksums, `_SUCCESS`
    /// markers) and nested directories are ignored.
    pub fn load(path: impl AsRef<Path>, mode: ParseMode) -> RecomResult<(Self, LoadSummary)> {
        let path = path.as_ref();
        let input_error = |source| RecomError::Input {
            path: path.to_path_buf(),
            source,
        };
        let metadata = fs::metadata(path).map_err(input_error)?;
        let files = if metadata.is_dir() {
            list_input_files(path).map_err(input_error)?
        } else {
            vec![path.to_path_buf()]
        };

        let mut records = Vec::new();
        let mut summary = LoadSummary::default();
        for file in files {
            let reader = File::open(&file).map(BufReader::new).map_err(|source| {
                RecomError::Input {
                    path: file.clone(),
                    source,
                }
            })?;
            summary.files += 1;
            let lines = reader.split(b'\n').map(|bytes| bytes.map(decode_line));
            ingest(lines, mode, &mut records, &mut summary).map_err(|err| match err {
                IngestError::Record(err) => err,
                IngestError::Io(source) => RecomError::Input {
                    path: file.clone(),
                    source,
                },
            })?;
        }
        Ok((Self::new(records), summary))
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the dataset holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in load order.
    #[must_use]
    pub fn records(&self) -> &[Interaction] {
        &self.records
    }

    /// Iterates the records without re-parsing anything.
    pub fn iter(&self) -> std::slice::Iter<'_, Interaction> {
        self.records.iter()
    }

    /// User id column.
    pub fn user_ids(&self) -> impl Iterator<Item = UserId> + '_ {
        self.records.iter().map(Interaction::user_id)
    }

    /// Item id column.
    pub fn item_ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.records.iter().map(Interaction::item_id)
    }

    /// Rating column.
    pub fn ratings(&self) -> impl Iterator<Item = f32> + '_ {
        self.records.iter().map(Interaction::rating)
    }

    /// Timestamp column.
    pub fn timestamps(&self) -> impl Iterator<Item = Timestamp> + '_ {
        self.records.iter().map(Interaction::timestamp)
    }

    /// Count of distinct users.
    #[must_use]
    pub fn distinct_users(&self) -> usize {
        self.user_ids().collect::<HashSet<_>>().len()
    }

    /// Count of distinct items.
    #[must_use]
    pub fn distinct_items(&self) -> usize {
        self.item_ids().collect::<HashSet<_>>().len()
    }

    /// Mean rating, or `None` for an empty dataset.
    #[must_use]
    pub fn mean_rating(&self) -> Option<f64> {
        if self.records.is_empty() {
            return None;
        }
        let total: f64 = self.ratings().map(f64::from).sum();
        Some(total / self.records.len() as f64)
    }
}

impl FromIterator<Interaction> for InteractionDataset {
    fn from_iter<T: IntoIterator<Item = Interaction>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a InteractionDataset {
    type Item = &'a Interaction;
    type IntoIter = std::slice::Iter<'a, Interaction>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

enum IngestError {
    Record(RecomError),
    Io(std::io::Error),
}

fn ingest<I, S>(
    lines: I,
    mode: ParseMode,
    records: &mut Vec<Interaction>,
    summary: &mut LoadSummary,
) -> Result<(), IngestError>
where
    I: Iterator<Item = std::io::Result<RecomResult<S>>>,
    S: AsRef<str>,
{
    for (idx, line) in lines.enumerate() {
        let parsed = match line.map_err(IngestError::Io)? {
            Ok(line) if line.as_ref().trim().is_empty() => continue,
            Ok(line) => parse_line(line.as_ref()),
            Err(err) => Err(err),
        };
        summary.lines += 1;
        match parsed {
            Ok(record) => records.push(record),
            Err(err) => {
                let err = err.at_line(idx + 1);
                match mode {
                    ParseMode::Strict => return Err(IngestError::Record(err)),
                    ParseMode::Lenient => summary.malformed.push(err),
                }
            }
        }
    }
    Ok(())
}

/// Undecodable bytes make the line malformed instead of failing the read.
fn decode_line(mut bytes: Vec<u8>) -> RecomResult<String> {
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    String::from_utf8(bytes).map_err(|err| {
        let reason = format!("not valid UTF-8: {}", err.utf8_error());
        RecomError::malformed(&String::from_utf8_lossy(err.as_bytes()), reason)
    })
}

fn list_input_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let hidden = name
            .to_str()
            .is_some_and(|name| name.starts_with('.') || name.starts_with('_'));
        if hidden || entry.file_type()?.is_dir() {
            continue;
        }
        files.push(entry.path());
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> InteractionDataset {
        InteractionDataset::new(vec![
            Interaction::new(1, 10, 5.0, 100),
            Interaction::new(1, 11, 3.0, 101),
            Interaction::new(2, 10, 1.0, 102),
        ])
    }

    #[test]
    fn exposes_columns_and_statistics() {
        let dataset = sample();
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.user_ids().collect::<Vec<_>>(), vec![1, 1, 2]);
        assert_eq!(dataset.item_ids().collect::<Vec<_>>(), vec![10, 11, 10]);
        assert_eq!(dataset.timestamps().collect::<Vec<_>>(), vec![100, 101, 102]);
        assert_eq!(dataset.distinct_users(), 2);
        assert_eq!(dataset.distinct_items(), 2);
        assert!((dataset.mean_rating().unwrap() - 3.0).abs() < 1e-9);
        // re-iteration yields the same view
        let first: Vec<f32> = dataset.ratings().collect();
        let second: Vec<f32> = dataset.ratings().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_dataset_has_no_mean() {
        assert!(InteractionDataset::default().mean_rating().is_none());
    }

    #[test]
    fn strict_mode_aborts_on_first_bad_line() {
        let lines = ["1,2,3.0,4", "1,2,oops,4", "5,6,1.0,7"];
        let err = InteractionDataset::from_lines(lines, ParseMode::Strict).unwrap_err();
        match err {
            RecomError::MalformedRecord { line_number, .. } => assert_eq!(line_number, Some(2)),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn lenient_mode_drops_and_counts_bad_lines() {
        let lines = ["1,2,3.0,4", "", "1,2", "5,6,1.0,7"];
        let (dataset, summary) = InteractionDataset::from_lines(lines, ParseMode::Lenient).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(summary.lines, 3);
        assert_eq!(summary.malformed.len(), 1);
    }

    #[test]
    fn loads_directory_skipping_hidden_entries() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("part-00001"), "3,4,2.0,11\n").unwrap();
        fs::write(dir.path().join("part-00000"), "1,2,5.0,10\n\n").unwrap();
        fs::write(dir.path().join("_SUCCESS"), "").unwrap();
        fs::write(dir.path().join(".part-00000.crc"), "garbage").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let (dataset, summary) = InteractionDataset::load(dir.path(), ParseMode::Strict).unwrap();
        assert_eq!(summary.files, 2);
        assert_eq!(
            dataset.records(),
            &[Interaction::new(1, 2, 5.0, 10), Interaction::new(3, 4, 2.0, 11)]
        );
    }

    #[test]
    fn lenient_load_drops_undecodable_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reviews.csv");
        fs::write(&path, b"1,2,3.0,4\r\n1,\xff\xfe,3.0,4\n5,6,1.0,7\n").unwrap();

        let (dataset, summary) = InteractionDataset::load(&path, ParseMode::Lenient).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(summary.lines, 3);
        assert_eq!(summary.malformed.len(), 1);
        assert!(matches!(
            summary.malformed[0],
            RecomError::MalformedRecord {
                line_number: Some(2),
                ..
            }
        ));

        let err = InteractionDataset::load(&path, ParseMode::Strict).unwrap_err();
        assert!(matches!(err, RecomError::MalformedRecord { .. }));
    }

    #[test]
    fn missing_input_is_reported() {
        let dir = tempdir().unwrap();
        let err = InteractionDataset::load(dir.path().join("absent.csv"), ParseMode::Strict)
            .unwrap_err();
        assert!(matches!(err, RecomError::Input { .. }));
    }
}
