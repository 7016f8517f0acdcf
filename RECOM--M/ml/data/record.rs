use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{RecomError, RecomResult};

/// Alias for user identifiers.
pub type UserId = u32;
/// Alias for item identifiers.
pub type ItemId = u32;
/// Alias for unix timestamps (seconds).
pub type Timestamp = i64;

/// Separator between the four fields of an input line.
pub const FIELD_DELIMITER: char = ',';

const FIELD_COUNT: usize = 4;

/// One user's rating of one item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    user_id: UserId,
    item_id: ItemId,
    rating: f32,
    timestamp: Timestamp,
}

impl Interaction {
    /// Creates a record.
    #[must_use]
    pub const fn new(user_id: UserId, item_id: ItemId, rating: f32, timestamp: Timestamp) -> Self {
        Self {
            user_id,
            item_id,
            rating,
            timestamp,
        }
    }

    /// Reviewing user.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Reviewed item.
    #[must_use]
    pub const fn item_id(&self) -> ItemId {
        self.item_id
    }

    /// Score given by the user.
    #[must_use]
    pub const fn rating(&self) -> f32 {
        self.rating
    }

    /// When the review happened.
    #[must_use]
    pub const fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

/// Renders the record in its input form, `user,item,rating,timestamp`.
impl fmt::Display for Interaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{d}{}{d}{}{d}{}",
            self.user_id,
            self.item_id,
            self.rating,
            self.timestamp,
            d = FIELD_DELIMITER
        )
    }
}

impl FromStr for Interaction {
    type Err = RecomError;

    fn from_str(s: &str) -> RecomResult<Self> {
        parse_line(s)
    }
}

/// Parses `user,item,rating,timestamp` into a record.
///
/// All-or-nothing: any field count other than four, an id that is not a
/// non-negative integer, a rating that is not a finite number or a timestamp
/// that is not an integer rejects the whole line.
pub fn parse_line(line: &str) -> RecomResult<Interaction> {
    let fields: Vec<&str> = line.split(FIELD_DELIMITER).map(str::trim).collect();
    if fields.len() != FIELD_COUNT {
        return Err(RecomError::malformed(
            line,
            format!("expected {FIELD_COUNT} fields, found {}", fields.len()),
        ));
    }
    let user_id = parse_field::<UserId>(line, fields[0], "user_id")?;
    let item_id = parse_field::<ItemId>(line, fields[1], "item_id")?;
    let rating = parse_field::<f32>(line, fields[2], "rating")?;
    if !rating.is_finite() {
        return Err(RecomError::malformed(line, "rating must be a finite number"));
    }
    let timestamp = parse_field::<Timestamp>(line, fields[3], "timestamp")?;
    Ok(Interaction::new(user_id, item_id, rating, timestamp))
}

fn parse_field<T>(line: &str, raw: &str, name: &str) -> RecomResult<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse::<T>()
        .map_err(|err| RecomError::malformed(line, format!("field `{name}` = `{raw}`: {err}")))
}
