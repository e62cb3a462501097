//! Serde helpers for human-readable durations in configuration.

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};
use std::{fmt, time::Duration};

/// Duration as seconds (number) or a humantime string such as `"5s"` or `"1h30m"`
pub mod duration {
    use super::*;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let duration_str = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&duration_str)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a duration as seconds (number) or human-readable string (e.g., '5s', '1h30m')")
            }

            fn visit_u64<E>(self, seconds: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Duration::from_secs(seconds))
            }

            fn visit_i64<E>(self, seconds: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u64::try_from(seconds)
                    .map(Duration::from_secs)
                    .map_err(|_| de::Error::custom(format!("Negative duration: {seconds}")))
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if let Ok(seconds) = value.trim().parse::<u64>() {
                    return Ok(Duration::from_secs(seconds));
                }
                humantime::parse_duration(value)
                    .map_err(|e| de::Error::custom(format!("Invalid duration '{value}': {e}")))
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

/// Parse a default duration constant, used by the `default_*` functions.
pub(crate) fn parse_default(value: &str) -> Duration {
    humantime::parse_duration(value).unwrap_or(Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Holder {
        #[serde(with = "duration")]
        value: Duration,
    }

    #[test]
    fn parses_human_readable_strings() {
        let parsed: Holder = toml::from_str("value = \"1h30m\"").unwrap();
        assert_eq!(parsed.value, Duration::from_secs(5400));
    }

    #[test]
    fn parses_plain_seconds() {
        let parsed: Holder = toml::from_str("value = 45").unwrap();
        assert_eq!(parsed.value, Duration::from_secs(45));

        let parsed: Holder = toml::from_str("value = \"45\"").unwrap();
        assert_eq!(parsed.value, Duration::from_secs(45));
    }

    #[test]
    fn rejects_garbage() {
        assert!(toml::from_str::<Holder>("value = \"soon\"").is_err());
    }

    #[test]
    fn serializes_as_humantime() {
        let rendered = toml::to_string(&Holder { value: Duration::from_secs(90) }).unwrap();
        assert!(rendered.contains("1m 30s"));
    }
}
