//! Serde helpers for the persisted store shape.
//!
//! Historical store files carry most counters as decimal strings (`"length": "140"`)
//! while a few are plain numbers. Readers accept either form; writers emit the
//! historical form so other tooling keeps working.

use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
#[serde(untagged)]
enum CountRepr {
    Number(i64),
    Float(f64),
    Text(String),
}

impl CountRepr {
    fn into_i64(self) -> Result<i64, String> {
        match self {
            Self::Number(value) => Ok(value),
            Self::Float(value)
                if value.fract() == 0.0
                    && value >= i64::MIN as f64
                    && value < i64::MAX as f64 =>
            {
                Ok(value as i64)
            }
            Self::Float(value) => Err(format!("expected an integer count, got `{value}`")),
            Self::Text(text) => text
                .trim()
                .parse::<i64>()
                .map_err(|_| format!("expected an integer count, got `{text}`")),
        }
    }
}

/// Parse a loosely typed JSON count. Negative values mean "unknown".
pub fn count_from_value(value: &Value) -> Option<u64> {
    let signed = match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    u64::try_from(signed).ok()
}

/// `u64` written as a decimal string.
pub mod count {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::CountRepr;

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let signed = CountRepr::deserialize(deserializer)?
            .into_i64()
            .map_err(serde::de::Error::custom)?;
        Ok(u64::try_from(signed).unwrap_or(0))
    }
}

/// `u64` written as a JSON number, read from a number or a string.
pub mod number {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::CountRepr;

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(*value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let signed = CountRepr::deserialize(deserializer)?
            .into_i64()
            .map_err(serde::de::Error::custom)?;
        Ok(u64::try_from(signed).unwrap_or(0))
    }
}

/// `Option<u64>` written as a decimal string; `null`, `-1` and `"-1"` read as `None`.
pub mod opt_count {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::CountRepr;

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.collect_str(value),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<u64>, D::Error> {
        match Option::<CountRepr>::deserialize(deserializer)? {
            Some(repr) => {
                let signed = repr.into_i64().map_err(serde::de::Error::custom)?;
                Ok(u64::try_from(signed).ok())
            }
            None => Ok(None),
        }
    }
}

/// `Vec<String>` written as a single `|`-joined string.
pub mod pipe_list {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[String], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.join("|"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<String>, D::Error> {
        let joined = String::deserialize(deserializer)?;
        Ok(split_pipe_list(&joined))
    }

    pub fn split_pipe_list(joined: &str) -> Vec<String> {
        joined
            .split('|')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(ToString::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::count_from_value;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        #[serde(with = "super::count")]
        plain: u64,
        #[serde(default, with = "super::opt_count")]
        maybe: Option<u64>,
        #[serde(with = "super::pipe_list")]
        langs: Vec<String>,
    }

    #[test]
    fn counts_are_written_as_strings() {
        let sample = Sample {
            plain: 8,
            maybe: Some(140),
            langs: vec!["sv".to_string(), "fi".to_string()],
        };
        let value = serde_json::to_value(&sample).expect("serialize");
        assert_eq!(value, json!({"plain": "8", "maybe": "140", "langs": "sv|fi"}));
    }

    #[test]
    fn counts_accept_numbers_and_negative_unknowns() {
        let sample: Sample =
            serde_json::from_value(json!({"plain": 3, "maybe": -1, "langs": "sv| fi |"}))
                .expect("deserialize");
        assert_eq!(sample.plain, 3);
        assert_eq!(sample.maybe, None);
        assert_eq!(sample.langs, vec!["sv", "fi"]);
    }

    #[test]
    fn integral_floats_are_counts_and_fractions_are_rejected() {
        let sample: Sample =
            serde_json::from_value(json!({"plain": 140.0, "maybe": 7.0, "langs": "sv"}))
                .expect("integral floats");
        assert_eq!(sample.plain, 140);
        assert_eq!(sample.maybe, Some(7));

        let error = serde_json::from_value::<Sample>(json!({"plain": 140.5, "langs": "sv"}))
            .expect_err("fractional count");
        assert!(error.to_string().contains("expected an integer count"));
        assert!(serde_json::from_value::<Sample>(json!({"plain": 1e300, "langs": "sv"})).is_err());
    }

    #[test]
    fn count_from_value_handles_strings() {
        assert_eq!(count_from_value(&json!("42")), Some(42));
        assert_eq!(count_from_value(&json!(-1)), None);
        assert_eq!(count_from_value(&json!(null)), None);
    }
}
