//! Shared validation result type and input guards.
//!
//! Manifest validation, schema validation and output validation all report
//! through [`ValidationResult`], which collects every problem rather than
//! stopping at the first one.

pub mod input_guards;

pub use input_guards::{GuardError, GuardResult, validate_non_empty_string, validate_path_safe};

use serde::Deserialize;
use serde::ser::{Serialize, SerializeStruct, Serializer};

/// Outcome of a validation pass
///
/// Errors block the caller; warnings are informational and always surfaced.
/// Serializes with a derived `valid` flag alongside both lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Fold another result into this one
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        !self.has_errors()
    }
}

impl Serialize for ValidationResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ValidationResult", 3)?;
        state.serialize_field("valid", &self.is_valid())?;
        state.serialize_field("errors", &self.errors)?;
        state.serialize_field("warnings", &self.warnings)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_do_not_invalidate() {
        let mut result = ValidationResult::new();
        result.add_warning("duplicate heading");
        assert!(result.is_valid());

        result.add_error("unclosed code block");
        assert!(!result.is_valid());
    }

    #[test]
    fn merge_keeps_everything() {
        let mut a = ValidationResult::new();
        a.add_error("one");
        let mut b = ValidationResult::new();
        b.add_error("two");
        b.add_warning("three");

        a.merge(b);
        assert_eq!(a.errors, vec!["one", "two"]);
        assert_eq!(a.warnings, vec!["three"]);
    }

    #[test]
    fn serialized_result_carries_valid_flag() {
        let mut result = ValidationResult::new();
        result.add_warning("long line");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["valid"], serde_json::Value::Bool(true));

        result.add_error("bad heading");
        let json = serde_json::to_string(&result).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["valid"], serde_json::Value::Bool(false));

        let back: ValidationResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
