use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("missing required field: {field}")]
    Validation { field: &'static str },
    #[error("not found: {0}")]
    NotFound(String),
}

impl StoreError {
    pub(crate) fn missing(field: &'static str) -> Self {
        StoreError::Validation { field }
    }
}

/// Rejects empty and whitespace-only values.
pub(crate) fn require(value: &str, field: &'static str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::missing(field));
    }
    Ok(())
}
