use thiserror::Error;

/// Malformed or contradictory definition fields.
///
/// Raised at construction/override time. `index` names the offending
/// definition when it is known.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", render(.index, .message))]
pub struct ValidationError {
    pub index: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { index: None, message: message.into() }
    }

    pub fn for_index(index: impl Into<String>, message: impl Into<String>) -> Self {
        Self { index: Some(index.into()), message: message.into() }
    }
}

fn render(index: &Option<String>, message: &str) -> String {
    match index {
        Some(name) => format!("invalid index definition {}: {}", name, message),
        None => format!("invalid definition: {}", message),
    }
}

pub type ValidationResult<T> = Result<T, ValidationError>;
