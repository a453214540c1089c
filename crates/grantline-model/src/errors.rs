use thiserror::Error;

/// Shape every composite key must follow; included in key errors so operators
/// can fix import ids without reading source.
pub const KEY_SHAPE: &str = "<policy_id>:<member_id>:<member_type>";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("malformed key {key:?}: {reason}; expected {}", KEY_SHAPE)]
    MalformedKey { key: String, reason: String },
    #[error("schema violation: {0}")]
    SchemaViolation(String),
}

impl ModelError {
    pub fn malformed_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ModelError::MalformedKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn schema(reason: impl Into<String>) -> Self {
        ModelError::SchemaViolation(reason.into())
    }
}

pub type ModelResult<T> = Result<T, ModelError>;
