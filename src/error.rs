use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Failed to read policy file {path}: {cause}")]
    ReadFailed { path: String, cause: String },

    #[error("Failed to parse policy {origin}: {cause}")]
    ParseFailed { origin: String, cause: String },

    #[error("Failed to serialize policy: {cause}")]
    SerializeFailed { cause: String },

    #[error("Duplicate dataset type '{name}': defined in {first_section} and {second_section}")]
    DuplicateDatasetType {
        name: String,
        first_section: String,
        second_section: String,
    },

    #[error("Unknown dataset type: {name}")]
    UnknownDatasetType { name: String },

    #[error("Malformed template '{template}': {cause}")]
    MalformedTemplate { template: String, cause: String },

    #[error("Cannot render template '{template}': {cause}")]
    RenderFailed { template: String, cause: String },

    #[error("Policy validation failed: {errors} error(s), {warnings} warning(s)")]
    ValidationFailed {
        errors: usize,
        warnings: usize,
        log: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for PolicyError {
    fn from(err: std::io::Error) -> Self {
        PolicyError::Internal(format!("IO error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, PolicyError>;
