// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Error taxonomy for the fairness audit pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BiasError {
    /// Bad caller input: missing column, missing file, empty field, unknown model
    #[error("Validation error: {0}")]
    Validation(String),

    /// Fewer than two sensitive-attribute groups in the evaluated partition
    #[error("Insufficient groups: found {found} distinct value(s) of the sensitive attribute, need at least 2")]
    InsufficientGroups { found: usize },

    /// Chart or PDF could not be produced
    #[error("Render error: {0}")]
    Render(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BiasError {
    pub fn validation(msg: impl Into<String>) -> Self {
        BiasError::Validation(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        BiasError::Render(msg.into())
    }

    /// Whether the message can be shown to the caller verbatim.
    ///
    /// Everything else is logged and reported as a generic failure.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, BiasError::Validation(_) | BiasError::InsufficientGroups { .. })
    }
}

pub type Result<T> = std::result::Result<T, BiasError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_facing_classification() {
        assert!(BiasError::validation("Target column 'y' not found").is_user_facing());
        assert!(BiasError::InsufficientGroups { found: 1 }.is_user_facing());
        assert!(!BiasError::render("disk full").is_user_facing());

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(!BiasError::from(io).is_user_facing());
    }

    #[test]
    fn test_messages() {
        let err = BiasError::InsufficientGroups { found: 1 };
        assert!(err.to_string().contains("found 1 distinct"));

        let err = BiasError::validation("Model 'SVM' not available");
        assert_eq!(err.to_string(), "Validation error: Model 'SVM' not available");
    }
}
