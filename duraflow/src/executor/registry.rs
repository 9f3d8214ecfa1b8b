//! Service registry for reconstructing runs.
//!
//! A definition only names `service.method`. The registry maps that pair to
//! a typed async handler registered at startup, so nothing is resolved by
//! reflection at run time.

use super::context::ExecutionContext;
use super::error::{ExecutionError, Result};
use crate::core::{type_tag, ServiceId, WorkflowParameter};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Type-erased method handler.
///
/// Wrapped in Arc so a lookup can hand it out without holding the registry.
pub type MethodHandler =
    Arc<dyn Fn(CallArgs) -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync>;

/// One reconstructed positional argument.
#[derive(Clone)]
pub enum Argument {
    /// The live context of the run being resumed.
    Context(Arc<ExecutionContext>),
    /// A captured literal and its declared type.
    Value {
        type_name: String,
        value: Option<serde_json::Value>,
    },
}

impl Argument {
    /// Builds an argument from its descriptor, substituting `context` for
    /// context slots regardless of any captured value.
    pub fn from_parameter(parameter: &WorkflowParameter, context: &Arc<ExecutionContext>) -> Self {
        if parameter.is_context() {
            Argument::Context(context.clone())
        } else {
            Argument::Value {
                type_name: parameter.type_name.clone(),
                value: parameter.value.clone(),
            }
        }
    }
}

impl std::fmt::Debug for Argument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Argument::Context(ctx) => f.debug_tuple("Context").field(&ctx.execution_id()).finish(),
            Argument::Value { type_name, value } => f
                .debug_struct("Value")
                .field("type_name", type_name)
                .field("value", value)
                .finish(),
        }
    }
}

/// Positional arguments handed to a handler.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    args: Vec<Argument>,
}

impl CallArgs {
    pub fn new(args: Vec<Argument>) -> Self {
        Self { args }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// The execution context at position `index`.
    pub fn context(&self, index: usize) -> Result<Arc<ExecutionContext>> {
        match self.args.get(index) {
            Some(Argument::Context(ctx)) => Ok(ctx.clone()),
            Some(Argument::Value { type_name, .. }) => Err(ExecutionError::Serialization(
                format!(
                    "argument {} is a {}, not an execution context",
                    index, type_name
                ),
            )),
            None => Err(missing(index)),
        }
    }

    /// Decodes the literal at position `index` as `T`.
    pub fn value<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        match self.args.get(index) {
            Some(Argument::Value { type_name, value }) => {
                let expected = type_tag::<T>();
                if type_name != expected {
                    debug!(index, captured = %type_name, expected, "Argument decoded as a different type");
                }
                let value = value.clone().unwrap_or(serde_json::Value::Null);
                serde_json::from_value(value).map_err(|e| {
                    ExecutionError::Serialization(format!(
                        "argument {} does not decode as {}: {}",
                        index, expected, e
                    ))
                })
            }
            Some(Argument::Context(_)) => Err(ExecutionError::Serialization(format!(
                "argument {} is an execution context slot",
                index
            ))),
            None => Err(missing(index)),
        }
    }
}

fn missing(index: usize) -> ExecutionError {
    ExecutionError::Serialization(format!("no argument at position {}", index))
}

/// Resolves `service.method` to a callable handler.
pub trait ServiceLookup: Send + Sync {
    /// # Errors
    /// Returns `ExecutionError::NotFound` if the service or the method is unknown.
    fn lookup(&self, service: &ServiceId, method: &str) -> Result<MethodHandler>;
}

/// Registry of services and their methods, populated at startup.
///
/// # Example
///
/// ```no_run
/// use duraflow::executor::{CallArgs, Registry};
///
/// let mut registry = Registry::new();
/// registry.register("greeter", "hello", |args: CallArgs| async move {
///     let ctx = args.context(0)?;
///     let name: String = args.value(1)?;
///     ctx.step("greet", || async move { Ok(format!("hello {}", name)) })
///         .await
/// });
/// ```
#[derive(Default)]
pub struct Registry {
    services: HashMap<ServiceId, HashMap<String, MethodHandler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` as `service.method`, replacing any previous one.
    ///
    /// The handler's result is serialized to JSON when the run completes.
    pub fn register<F, Fut, R>(
        &mut self,
        service: impl Into<ServiceId>,
        method: impl Into<String>,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        let service = service.into();
        let method = method.into();

        let boxed: MethodHandler = Arc::new(move |args: CallArgs| {
            let fut = handler(args);
            Box::pin(async move {
                let result = fut.await?;
                serde_json::to_value(&result).map_err(|e| {
                    ExecutionError::Serialization(format!(
                        "result of type {} is not serializable: {}",
                        type_tag::<R>(),
                        e
                    ))
                })
            })
        });

        debug!(service = %service, method = %method, "Registered service method");
        self.services
            .entry(service)
            .or_default()
            .insert(method, boxed);
        self
    }

    /// Total number of registered methods.
    pub fn len(&self) -> usize {
        self.services.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ServiceLookup for Registry {
    fn lookup(&self, service: &ServiceId, method: &str) -> Result<MethodHandler> {
        let methods = self
            .services
            .get(service)
            .ok_or_else(|| ExecutionError::NotFound(format!("service '{}'", service)))?;
        methods.get(method).cloned().ok_or_else(|| {
            ExecutionError::NotFound(format!("method '{}' on service '{}'", method, service))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::WorkflowDefinition;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register("math", "double", |args: CallArgs| async move {
                let n: i64 = args.value(0)?;
                Ok(n * 2)
            })
            .register("math", "ctx_id", |args: CallArgs| async move {
                let ctx = args.context(0)?;
                Ok(ctx.execution_id())
            });
        registry
    }

    #[tokio::test]
    async fn test_lookup_and_invoke() {
        let registry = registry();
        assert_eq!(registry.len(), 2);

        let handler = registry.lookup(&"math".into(), "double").unwrap();
        let definition = WorkflowDefinition::call("math", "double").arg(&21i64).unwrap();
        let ctx = Arc::new(ExecutionContext::placeholder());
        let args = definition
            .parameters
            .iter()
            .map(|p| Argument::from_parameter(p, &ctx))
            .collect();

        let value = handler(CallArgs::new(args)).await.unwrap();
        assert_eq!(value, serde_json::json!(42));
    }

    #[test]
    fn test_unknown_service_or_method() {
        let registry = registry();
        assert!(matches!(
            registry.lookup(&"video".into(), "double"),
            Err(ExecutionError::NotFound(_))
        ));
        assert!(matches!(
            registry.lookup(&"math".into(), "triple"),
            Err(ExecutionError::NotFound(_))
        ));
    }

    #[test]
    fn test_context_slot_ignores_captured_value() {
        let ctx = Arc::new(ExecutionContext::placeholder());
        let mut parameter = WorkflowParameter::context();
        parameter.value = Some(serde_json::json!("stale"));

        let args = CallArgs::new(vec![Argument::from_parameter(&parameter, &ctx)]);
        assert!(args.context(0).is_ok());
        assert!(args.value::<String>(0).is_err());
        assert!(args.context(1).is_err());
    }
}
