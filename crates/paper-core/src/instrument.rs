//! Instrument identification.
//!
//! The venue mints one token per tradable outcome (a "CLOB token id").
//! It is the subscription key and the correlation key for every inbound
//! price event, so it is kept opaque and never parsed.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque venue token identifying one tradable outcome.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(String);

impl InstrumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create from untrusted input, rejecting blank tokens.
    pub fn parse(id: &str) -> Result<Self> {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidInstrumentId(id.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstrumentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for InstrumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for InstrumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trims_and_rejects_blank() {
        assert_eq!(InstrumentId::parse("  tok1 ").unwrap().as_str(), "tok1");
        assert!(InstrumentId::parse("   ").is_err());
    }

    #[test]
    fn test_serde_transparent() {
        let id = InstrumentId::new("7132");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"7132\"");
        let back: InstrumentId = serde_json::from_str("\"7132\"").unwrap();
        assert_eq!(back, id);
    }
}
