use anyhow::Error;
use derive_more::{Deref, From, Into};
use log::warn;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as DeError, ser};
use stack_string::StackString;
use std::fmt;
use time::{OffsetDateTime, UtcOffset, format_description::well_known::Rfc3339, macros::datetime};

/// UTC timestamp that (de)serializes as RFC3339.
#[derive(Debug, Clone, Copy, Deref, Into, From, PartialEq, Eq)]
pub struct DateTimeType(OffsetDateTime);

impl DateTimeType {
    /// Parse an RFC3339 string, falling back to the zero time on failure.
    pub fn parse_or_sentinel(s: &str) -> Self {
        convert_str_to_datetime(s).map_or_else(
            |e| {
                warn!("unparseable timestamp {s:?}, using zero time: {e}");
                Self(sentinel_datetime())
            },
            Self,
        )
    }

    pub fn is_sentinel(&self) -> bool {
        self.0 == sentinel_datetime()
    }
}

impl fmt::Display for DateTimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        if let Ok(s) = convert_datetime_to_str(self.0) {
            write!(f, "{s}")?;
        }
        Ok(())
    }
}

/// `0001-01-01T00:00:00Z`, stored whenever a timestamp is absent or invalid.
#[must_use]
pub fn sentinel_datetime() -> OffsetDateTime {
    datetime!(0001-01-01 00:00:00).assume_utc()
}

impl Serialize for DateTimeType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&convert_datetime_to_str(self.0).map_err(ser::Error::custom)?)
    }
}

impl<'de> Deserialize<'de> for DateTimeType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = StackString::deserialize(deserializer)?;
        convert_str_to_datetime(&s)
            .map(Self)
            .map_err(DeError::custom)
    }
}

/// # Errors
/// Returns error if the datetime cannot be represented as RFC3339
pub fn convert_datetime_to_str(datetime: OffsetDateTime) -> Result<StackString, Error> {
    datetime
        .to_offset(UtcOffset::UTC)
        .format(&Rfc3339)
        .map(Into::into)
        .map_err(Into::into)
}

/// # Errors
/// Return error if `s` is not a valid RFC3339 timestamp
pub fn convert_str_to_datetime(s: &str) -> Result<OffsetDateTime, Error> {
    OffsetDateTime::parse(s, &Rfc3339)
        .map(|x| x.to_offset(UtcOffset::UTC))
        .map_err(Into::into)
}
