//! Flag domain types

use serde::{Deserialize, Serialize};

/// Atomically updatable `(text, int)` pair scoped to an experiment.
///
/// Used for cross-node synchronization during experiments. On `set`, a
/// `None` field means "leave unchanged". The platform guarantees atomicity
/// of updates, not any invariant over the values themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagValues {
    pub text_value: Option<String>,
    pub int_value: Option<i64>,
}

impl FlagValues {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            text_value: Some(value.into()),
            int_value: None,
        }
    }

    pub fn both(text: impl Into<String>, int: i64) -> Self {
        Self {
            text_value: Some(text.into()),
            int_value: Some(int),
        }
    }

    /// A set request must change at least one field.
    pub fn is_empty(&self) -> bool {
        self.text_value.is_none() && self.int_value.is_none()
    }

    /// Whether this value matches an expected `(text, int)` tuple.
    pub fn matches(&self, text: &str, int: i64) -> bool {
        self.text_value.as_deref() == Some(text) && self.int_value == Some(int)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barrier_tuple_matching() {
        let flag = FlagValues::both("stage_1", 3);
        assert!(flag.matches("stage_1", 3));
        assert!(!flag.matches("stage_1", 2));
        assert!(!flag.matches("stage_2", 3));
    }

    #[test]
    fn empty_set_request_is_detected() {
        assert!(FlagValues::default().is_empty());
        assert!(!FlagValues::text("x").is_empty());
    }
}
