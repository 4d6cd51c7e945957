//! Instrument Descriptors

use serde::Serialize;

use crate::error::{Error, Result};
use crate::observer::{LabelSet, ValueKind};

/// Maximum instrument name length in bytes
pub const MAX_NAME_LENGTH: usize = 255;

/// Static description of an observer instrument
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstrumentDescriptor {
    pub name: String,
    pub description: String,
    pub unit: String,
    /// Permitted label keys; empty means unconstrained
    pub label_keys: Vec<String>,
    pub kind: ValueKind,
}

impl InstrumentDescriptor {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            unit: String::new(),
            label_keys: Vec::new(),
            kind,
        }
    }

    /// Validate the instrument name
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)
    }

    /// Check that every key of `labels` is declared
    pub fn check_labels(&self, labels: &LabelSet) -> Result<()> {
        if self.label_keys.is_empty() {
            return Ok(());
        }
        match labels
            .keys()
            .find(|key| !self.label_keys.iter().any(|k| k == key))
        {
            Some(key) => Err(Error::UnexpectedLabelKey {
                instrument: self.name.clone(),
                key: key.to_string(),
            }),
            None => Ok(()),
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidInstrumentName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let Some(first) = name.chars().next() else {
        return Err(invalid("name is empty"));
    };
    if !first.is_ascii_alphabetic() {
        return Err(invalid("name must start with an ASCII letter"));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(invalid("name exceeds 255 bytes"));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        return Err(invalid(&format!("character {:?} is not allowed", c)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_valid_names() {
        for name in ["queue_depth", "http.server.active", "cpu-temp", "a"] {
            assert!(validate_name(name).is_ok(), "{} should be valid", name);
        }
    }

    #[test]
    fn test_invalid_names() {
        assert_matches!(validate_name(""), Err(Error::InvalidInstrumentName { .. }));
        assert_matches!(validate_name("9lives"), Err(Error::InvalidInstrumentName { .. }));
        assert_matches!(validate_name("has space"), Err(Error::InvalidInstrumentName { .. }));
        assert_matches!(
            validate_name(&"a".repeat(256)),
            Err(Error::InvalidInstrumentName { .. })
        );
    }

    #[test]
    fn test_check_labels() {
        let mut descriptor = InstrumentDescriptor::new("requests", ValueKind::Integer);
        let labels = LabelSet::from([("method", "GET"), ("region", "eu")]);

        assert!(descriptor.check_labels(&labels).is_ok());

        descriptor.label_keys = vec!["method".to_string()];
        assert_matches!(
            descriptor.check_labels(&labels),
            Err(Error::UnexpectedLabelKey { key, .. }) if key == "region"
        );
        assert!(descriptor
            .check_labels(&LabelSet::from([("method", "PUT")]))
            .is_ok());
    }
}
