//! Serialization utilities for common data types
//!
//! Durations in configuration files are written as human strings
//! (`"500ms"`, `"10s"`, `"1m 30s"`). For JSON producers that only emit
//! numbers, a bare integer is read as milliseconds.

use std::fmt;
use std::time::Duration;

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};

use crate::time::duration::{format_duration, parse_duration_ms};

/// Serde serialization result type
type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

struct DurationVisitor;

impl Visitor<'_> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a duration string such as \"10s\" or an integer number of milliseconds")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
        parse_duration_ms(v).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
        Ok(Duration::from_millis(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
        u64::try_from(v)
            .map(Duration::from_millis)
            .map_err(|_| E::custom(format!("negative duration: {v}")))
    }
}

/// `Duration` as a human string.
///
/// # Usage
/// ```rust
/// use std::time::Duration;
///
/// use porter_common::duration_str;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Example {
///     #[serde(with = "duration_str")]
///     timeout: Duration,
/// }
///
/// let parsed: Example = serde_json::from_str(r#"{"timeout":"1m 30s"}"#).unwrap();
/// assert_eq!(parsed.timeout, Duration::from_secs(90));
/// ```
pub mod duration_str {
    use super::*;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(DurationVisitor)
    }
}

/// `Option<Duration>` as an optional human string.
pub mod option_duration_str {
    use super::*;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OptionVisitor;

        impl<'de> Visitor<'de> for OptionVisitor {
            type Value = Option<Duration>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an optional duration")
            }

            fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(None)
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(None)
            }

            fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
                d.deserialize_any(DurationVisitor).map(Some)
            }
        }

        deserializer.deserialize_option(OptionVisitor)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for serialization utilities

    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Required {
        #[serde(with = "duration_str")]
        timeout: Duration,
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Optional {
        #[serde(default, with = "option_duration_str", skip_serializing_if = "Option::is_none")]
        timeout: Option<Duration>,
    }

    #[test]
    fn test_duration_str_accepts_strings_and_millis() {
        let from_str: Required = serde_json::from_str(r#"{"timeout":"250ms"}"#).unwrap();
        assert_eq!(from_str.timeout, Duration::from_millis(250));

        let from_int: Required = serde_json::from_str(r#"{"timeout":2000}"#).unwrap();
        assert_eq!(from_int.timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_duration_str_serializes_human_string() {
        let json = serde_json::to_string(&Required { timeout: Duration::from_secs(10) }).unwrap();
        assert_eq!(json, r#"{"timeout":"10s"}"#);
    }

    #[test]
    fn test_duration_str_rejects_garbage() {
        assert!(serde_json::from_str::<Required>(r#"{"timeout":"soon"}"#).is_err());
        assert!(serde_json::from_str::<Required>(r#"{"timeout":-5}"#).is_err());
    }

    #[test]
    fn test_option_duration_str() {
        let missing: Optional = serde_json::from_str("{}").unwrap();
        assert_eq!(missing.timeout, None);

        let null: Optional = serde_json::from_str(r#"{"timeout":null}"#).unwrap();
        assert_eq!(null.timeout, None);

        let present: Optional = serde_json::from_str(r#"{"timeout":"1m"}"#).unwrap();
        assert_eq!(present.timeout, Some(Duration::from_secs(60)));
        assert_eq!(serde_json::to_string(&present).unwrap(), r#"{"timeout":"1m"}"#);
    }
}
