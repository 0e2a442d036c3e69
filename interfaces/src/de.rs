//! Lenient field decoders for LMS exports.
//!
//! Forum exports are inconsistent about numeric fields: the same export can
//! carry `"parent": 0` on one record and `"parent": "0"` on the next. These
//! helpers accept both forms and treat empty strings and `null` as absent.

use serde::de::{Deserializer, Error};
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberLike {
    Int(i64),
    Float(f64),
    Text(String),
}

impl NumberLike {
    fn into_i64<E: Error>(self) -> Result<Option<i64>, E> {
        match self {
            NumberLike::Int(value) => Ok(Some(value)),
            NumberLike::Float(value) if value.fract() == 0.0 => Ok(Some(value as i64)),
            NumberLike::Float(value) => Err(E::custom(format!("expected an integer, found {}", value))),
            NumberLike::Text(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Ok(None);
                }
                trimmed
                    .parse::<i64>()
                    .map(Some)
                    .map_err(|_| E::custom(format!("expected an integer, found {:?}", text)))
            }
        }
    }
}

fn non_negative<E: Error>(value: i64) -> Result<u64, E> {
    u64::try_from(value).map_err(|_| E::custom(format!("identifier must not be negative, found {}", value)))
}

/// Required identifier, number or numeric string.
pub fn id<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberLike::deserialize(deserializer)?.into_i64()? {
        Some(value) => non_negative(value),
        None => Err(D::Error::custom("identifier is empty")),
    }
}

/// Optional identifier; `null` and `""` decode to `None`.
pub fn opt_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberLike>::deserialize(deserializer)? {
        Some(number) => number.into_i64()?.map(non_negative).transpose(),
        None => Ok(None),
    }
}

/// Optional signed integer such as an epoch timestamp.
pub fn opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberLike>::deserialize(deserializer)? {
        Some(number) => number.into_i64(),
        None => Ok(None),
    }
}

/// Free-form scalar rendered as a string. Generated JSON frequently answers
/// `"overall_score": 7` where a string was requested.
pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(text)) => Ok(text),
        Some(Value::Number(number)) => Ok(number.to_string()),
        Some(Value::Bool(flag)) => Ok(flag.to_string()),
        Some(other) => Err(D::Error::custom(format!("expected a scalar, found {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Probe {
        #[serde(deserialize_with = "id")]
        id: u64,
        #[serde(default, deserialize_with = "opt_id")]
        parent: Option<u64>,
        #[serde(default, deserialize_with = "string_or_number")]
        score: String,
    }

    #[test]
    fn test_numbers_and_strings_decode_alike() {
        let a: Probe = serde_json::from_str(r#"{"id": 7, "parent": 0, "score": 8}"#).unwrap();
        let b: Probe = serde_json::from_str(r#"{"id": "7", "parent": "0", "score": "8"}"#).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.parent, Some(0));
        assert_eq!(b.parent, Some(0));
        assert_eq!(a.score, "8");
        assert_eq!(b.score, "8");
    }

    #[test]
    fn test_null_and_empty_parent_are_absent() {
        let a: Probe = serde_json::from_str(r#"{"id": 1, "parent": null}"#).unwrap();
        let b: Probe = serde_json::from_str(r#"{"id": 1, "parent": ""}"#).unwrap();
        let c: Probe = serde_json::from_str(r#"{"id": 1}"#).unwrap();
        assert_eq!(a.parent, None);
        assert_eq!(b.parent, None);
        assert_eq!(c.parent, None);
        assert_eq!(c.score, "");
    }

    #[test]
    fn test_rejects_negative_and_garbage_ids() {
        assert!(serde_json::from_str::<Probe>(r#"{"id": -3}"#).is_err());
        assert!(serde_json::from_str::<Probe>(r#"{"id": "abc"}"#).is_err());
        assert!(serde_json::from_str::<Probe>(r#"{"id": 1, "score": [1]}"#).is_err());
    }
}
