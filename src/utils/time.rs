//! RFC 3339 timestamp helpers for serde.
//!
//! The chat service emits naive UTC timestamps for some fields (no `Z` or
//! offset).  Deserialization accepts those and treats them as UTC.

use serde::{Deserialize, Deserializer, Serializer};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Parse an RFC 3339 timestamp, assuming UTC when the offset is missing.
pub fn parse_lenient(s: &str) -> Result<OffsetDateTime, time::error::Parse> {
    match OffsetDateTime::parse(s, &Rfc3339) {
        Ok(datetime) => Ok(datetime),
        Err(err) => {
            let with_zone = format!("{s}Z");
            OffsetDateTime::parse(&with_zone, &Rfc3339).map_err(|_| err)
        }
    }
}

/// Deserialize an RFC 3339 formatted string into an OffsetDateTime
pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_lenient(&s).map_err(serde::de::Error::custom)
}

/// Serialize an OffsetDateTime into an RFC 3339 formatted string
pub fn serialize<S>(datetime: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = datetime
        .format(&Rfc3339)
        .map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&s)
}

/// The same conversions for `Option<OffsetDateTime>`; `null` maps to `None`.
pub mod option {
    use super::*;

    /// Deserialize an optional RFC 3339 string.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        s.map(|s| parse_lenient(&s).map_err(serde::de::Error::custom))
            .transpose()
    }

    /// Serialize an optional OffsetDateTime.
    pub fn serialize<S>(datetime: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match datetime {
            Some(datetime) => super::serialize(datetime, serializer),
            None => serializer.serialize_none(),
        }
    }
}

/// Optional timestamps on inbound records.
///
/// A value that is not a valid RFC 3339 string reads as `None` rather than
/// failing the whole record.
pub mod lenient {
    use serde_json::Value;

    use super::*;

    /// Deserialize an optional timestamp, discarding invalid values.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(value.as_str().and_then(|s| parse_lenient(s).ok()))
    }

    /// Serialize an optional OffsetDateTime.
    pub fn serialize<S>(datetime: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        super::option::serialize(datetime, serializer)
    }
}
