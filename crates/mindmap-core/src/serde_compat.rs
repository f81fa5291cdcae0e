//! Deserialization helpers that keep older snapshots loadable.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

/// Older snapshots stored "unset" ids as empty strings.
pub(crate) fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()))
}

/// An empty vector means "no embedding".
pub(crate) fn empty_vec_as_none<'de, D>(deserializer: D) -> Result<Option<Vec<f32>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<f32>>::deserialize(deserializer)?;
    Ok(raw.filter(|v| !v.is_empty()))
}

/// Timestamps are written as RFC 3339 but may be read back from float UNIX
/// seconds as well.
pub(crate) mod timestamp {
    use super::*;
    use serde::{Serialize, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        ts.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Epoch(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Epoch(secs) => {
                let millis = (secs * 1000.0).round() as i64;
                DateTime::from_timestamp_millis(millis)
                    .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {secs}")))
            }
            Raw::Text(text) => DateTime::parse_from_rfc3339(&text)
                .map(|d| d.with_timezone(&Utc))
                .map_err(D::Error::custom),
        }
    }
}
