//! Serde helpers that write large integers as decimal strings.
//!
//! Tick counts exceed the 2^53 range a JSON number can carry through most
//! consumers, so they are emitted as `"123"`. Reading accepts either a
//! string or a plain number.

use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Raw {
    Text(String),
    Int(i64),
}

fn parse_raw<E: serde::de::Error>(raw: Raw) -> Result<i64, E> {
    match raw {
        Raw::Int(v) => Ok(v),
        Raw::Text(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| E::custom(format!("invalid decimal integer {s:?}: {e}"))),
    }
}

pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let raw = Raw::deserialize(deserializer)?;
    parse_raw(raw)
}

/// Same encoding for `Option<i64>`; `None` stays `null`.
pub mod option {
    use super::{parse_raw, Raw};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<i64>, D::Error> {
        match Option::<Raw>::deserialize(deserializer)? {
            Some(raw) => parse_raw(raw).map(Some),
            None => Ok(None),
        }
    }
}
