//! Enum types for catalog records

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    #[default]
    Active,
    Inactive,
}

impl RecordStatus {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Inactive => "inactive",
        }
    }

    /// The status a toggle action moves to.
    pub fn toggled(&self) -> Self {
        match self {
            RecordStatus::Active => RecordStatus::Inactive,
            RecordStatus::Inactive => RecordStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, RecordStatus::Active)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = RecordStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(RecordStatus::Active),
            "inactive" => Ok(RecordStatus::Inactive),
            _ => Err(RecordStatusParseError(s.to_string())),
        }
    }
}

/// Error when parsing an invalid record status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordStatusParseError(pub String);

impl fmt::Display for RecordStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid record status: {}", self.0)
    }
}

impl std::error::Error for RecordStatusParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_is_involution() {
        for status in [RecordStatus::Active, RecordStatus::Inactive] {
            assert_ne!(status.toggled(), status);
            assert_eq!(status.toggled().toggled(), status);
        }
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("ACTIVE".parse::<RecordStatus>(), Ok(RecordStatus::Active));
        assert_eq!(" inactive ".parse::<RecordStatus>(), Ok(RecordStatus::Inactive));
        assert!("archived".parse::<RecordStatus>().is_err());
    }

    #[test]
    fn test_serde_uses_lowercase() {
        let json = serde_json::to_string(&RecordStatus::Inactive).unwrap();
        assert_eq!(json, "\"inactive\"");
        let back: RecordStatus = serde_json::from_str("\"active\"").unwrap();
        assert_eq!(back, RecordStatus::Active);
    }
}
