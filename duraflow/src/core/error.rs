use thiserror::Error;

/// Core error type for the duraflow execution engine.
///
/// Carries the `#[source]` of serde failures so the full chain is available
/// when a step result or definition cannot be encoded.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Serialization failed when encoding a value to JSON.
    #[error("serialization failed")]
    Serialization(#[source] serde_json::Error),

    /// Deserialization failed when decoding JSON into the requested type.
    #[error("deserialization into {type_name} failed")]
    Deserialization {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// An invalid status string was encountered during parsing.
    #[error("invalid execution status: {0}")]
    InvalidStatus(String),

    /// A workflow definition is malformed (bad argument slot, wrong type).
    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
