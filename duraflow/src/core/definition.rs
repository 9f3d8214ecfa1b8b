//! Explicit workflow definitions.
//!
//! A definition names a registered service, one of its methods, and the
//! ordered arguments to pass. Context slots are marked by type only: when the
//! run is reconstructed the live execution context is substituted there,
//! whatever value was captured.

use super::error::{CoreError, Result};
use super::serialization::type_tag;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type name marking the execution-context argument slot.
pub const EXECUTION_CONTEXT_TYPE: &str = "duraflow::ExecutionContext";

/// Identifier of a logical service, resolved through a service lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(String);

impl ServiceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ServiceId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// One positional argument descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowParameter {
    /// Declared type of the slot.
    pub type_name: String,
    /// Captured literal, absent for context slots.
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

impl WorkflowParameter {
    /// A slot that receives the live execution context.
    pub fn context() -> Self {
        Self {
            type_name: EXECUTION_CONTEXT_TYPE.to_string(),
            value: None,
        }
    }

    /// A literal argument captured now.
    pub fn value<T: Serialize>(value: &T) -> Result<Self> {
        let value = serde_json::to_value(value).map_err(CoreError::Serialization)?;
        Ok(Self {
            type_name: type_tag::<T>().to_string(),
            value: Some(value),
        })
    }

    pub fn is_context(&self) -> bool {
        self.type_name == EXECUTION_CONTEXT_TYPE
    }
}

/// What to run: `service.method(parameters...)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub service: ServiceId,
    pub method: String,
    #[serde(default)]
    pub parameters: Vec<WorkflowParameter>,
}

impl WorkflowDefinition {
    /// Starts a definition for `service.method` with no arguments.
    ///
    /// ```
    /// use duraflow::core::WorkflowDefinition;
    ///
    /// let definition = WorkflowDefinition::call("video", "transcribe")
    ///     .with_context()
    ///     .arg(&"talk.mp4")
    ///     .unwrap();
    /// assert_eq!(definition.parameters.len(), 2);
    /// assert!(definition.parameters[0].is_context());
    /// ```
    pub fn call(service: impl Into<ServiceId>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            parameters: Vec::new(),
        }
    }

    /// Appends an execution-context slot.
    pub fn with_context(mut self) -> Self {
        self.parameters.push(WorkflowParameter::context());
        self
    }

    /// Appends a literal argument.
    ///
    /// # Errors
    /// Returns `CoreError::Serialization` if the value cannot be captured.
    pub fn arg<T: Serialize>(mut self, value: &T) -> Result<Self> {
        self.parameters.push(WorkflowParameter::value(value)?);
        Ok(self)
    }

    /// Encodes the definition into the persisted `definition` blob.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(CoreError::Serialization)
    }

    /// Decodes a persisted `definition` blob.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|source| CoreError::Deserialization {
            type_name: type_tag::<Self>(),
            source,
        })
    }

    /// Decodes the literal at `index` as `T`.
    pub fn decode_arg<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let parameter = self.parameters.get(index).ok_or_else(|| {
            CoreError::InvalidDefinition(format!(
                "{}.{} has no argument at position {}",
                self.service, self.method, index
            ))
        })?;
        let value = parameter.value.clone().ok_or_else(|| {
            CoreError::InvalidDefinition(format!(
                "argument {} of {}.{} carries no value",
                index, self.service, self.method
            ))
        })?;
        serde_json::from_value(value).map_err(|source| CoreError::Deserialization {
            type_name: type_tag::<T>(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_round_trip() {
        let definition = WorkflowDefinition::call("video", "transcribe")
            .with_context()
            .arg(&"talk.mp4")
            .unwrap()
            .arg(&3u8)
            .unwrap();

        let bytes = definition.to_bytes().unwrap();
        let restored = WorkflowDefinition::from_bytes(&bytes).unwrap();
        assert_eq!(restored, definition);
        assert_eq!(restored.service.as_str(), "video");
        assert_eq!(restored.parameters[1].type_name, "&str");
        assert_eq!(restored.decode_arg::<String>(1).unwrap(), "talk.mp4");
        assert_eq!(restored.decode_arg::<u8>(2).unwrap(), 3);
    }

    #[test]
    fn test_decode_arg_rejects_context_slot() {
        let definition = WorkflowDefinition::call("s", "m").with_context();
        assert!(matches!(
            definition.decode_arg::<String>(0),
            Err(CoreError::InvalidDefinition(_))
        ));
        assert!(matches!(
            definition.decode_arg::<String>(5),
            Err(CoreError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn test_malformed_blob() {
        assert!(matches!(
            WorkflowDefinition::from_bytes(b"not json"),
            Err(CoreError::Deserialization { .. })
        ));
    }
}
