//! Log levels.

use crate::error::ConfigError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Severity of a log line.
///
/// Ordered from least to most verbose: a configured threshold of `Info`
/// enables `Fatal`, `Error`, `Warn` and `Info`; `Off` enables nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Level {
    #[default]
    Off,
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
}

impl Level {
    /// Returns the upper-case name (`""` for `Off`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "",
            Self::Fatal => "FATAL",
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
        }
    }

    /// Returns `true` if a line at this level passes `threshold`.
    #[inline]
    pub fn enabled(self, threshold: Level) -> bool {
        self != Self::Off && self <= threshold
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ConfigError;

    /// Case-insensitive; an empty string means `Info`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "INFO" => Ok(Self::Info),
            "OFF" => Ok(Self::Off),
            "FATAL" => Ok(Self::Fatal),
            "ERROR" => Ok(Self::Error),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "DEBUG" => Ok(Self::Debug),
            _ => Err(ConfigError::InvalidLevel(s.to_string())),
        }
    }
}

impl Serialize for Level {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Off => serializer.serialize_str("OFF"),
            level => serializer.serialize_str(level.as_str()),
        }
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold() {
        assert!(Level::Error.enabled(Level::Info));
        assert!(Level::Info.enabled(Level::Info));
        assert!(!Level::Debug.enabled(Level::Info));
        assert!(!Level::Fatal.enabled(Level::Off));
        assert!(!Level::Off.enabled(Level::Debug));
    }

    #[test]
    fn test_parse() {
        assert_eq!("debug".parse::<Level>().unwrap(), Level::Debug);
        assert_eq!("".parse::<Level>().unwrap(), Level::Info);
        assert_eq!(" Warn ".parse::<Level>().unwrap(), Level::Warn);
        assert_eq!("off".parse::<Level>().unwrap(), Level::Off);
        assert!("verbose".parse::<Level>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Level::Fatal.to_string(), "FATAL");
        assert_eq!(Level::Info.to_string(), "INFO");
    }
}
