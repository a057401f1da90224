//! Method name → handler table consulted for every inbound call.

use std::{collections::BTreeMap, fmt, future::Future, marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use trirpc_common::{envelope::codes, RpcError};

/// Failure reported by a handler
#[derive(Debug, thiserror::Error)]
pub enum MethodError {
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    Failed(String),
}

impl MethodError {
    pub fn failed(message: impl fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("method not found: {0}")]
    UnknownMethod(String),

    #[error(transparent)]
    Method(#[from] MethodError),
}

impl From<DispatchError> for RpcError {
    fn from(err: DispatchError) -> Self {
        let code = match &err {
            DispatchError::UnknownMethod(_) => codes::METHOD_NOT_FOUND,
            DispatchError::Method(MethodError::InvalidParams(_)) => codes::INVALID_PARAMS,
            DispatchError::Method(MethodError::Failed(_)) => codes::SERVER_ERROR,
        };
        RpcError::new(code, err.to_string())
    }
}

/// Something callable by name. Handlers run concurrently, one task per
/// connection, so they must be shareable.
#[async_trait]
pub trait MethodHandler: Send + Sync + 'static {
    async fn invoke(&self, args: Value) -> Result<Value, MethodError>;
}

/// Adapts a typed async function into a [`MethodHandler`]
struct TypedHandler<F, A, R> {
    f:       F,
    _marker: PhantomData<fn(A) -> R>,
}

#[async_trait]
impl<F, Fut, A, R> MethodHandler for TypedHandler<F, A, R>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, MethodError>> + Send,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
{
    async fn invoke(&self, args: Value) -> Result<Value, MethodError> {
        let args: A =
            serde_json::from_value(args).map_err(|e| MethodError::InvalidParams(e.to_string()))?;
        let result = (self.f)(args).await?;
        serde_json::to_value(result)
            .map_err(|e| MethodError::failed(format_args!("failed to encode result: {e}")))
    }
}

/// The servable surface: every method is registered explicitly at startup and
/// the table is read-only afterwards.
#[derive(Default, Clone)]
pub struct MethodRegistry {
    methods: BTreeMap<String, Arc<dyn MethodHandler>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, replacing any earlier registration.
    pub fn register<H: MethodHandler>(&mut self, name: impl Into<String>, handler: H) -> &mut Self {
        let name = name.into();
        if self.methods.insert(name.clone(), Arc::new(handler)).is_some() {
            tracing::warn!("Method {} registered twice, keeping the latest handler", name);
        }
        self
    }

    /// Registers an async function taking and returning serde types. Arguments
    /// that do not deserialize into `A` are reported as invalid params.
    pub fn register_fn<F, Fut, A, R>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, MethodError>> + Send,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
    {
        self.register(
            name,
            TypedHandler {
                f,
                _marker: PhantomData,
            },
        )
    }

    /// Registered method names, sorted
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub async fn dispatch(&self, method: &str, args: Value) -> Result<Value, DispatchError> {
        let handler = self
            .methods
            .get(method)
            .ok_or_else(|| DispatchError::UnknownMethod(method.to_string()))?;
        Ok(handler.invoke(args).await?)
    }
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    struct Echo;

    #[async_trait]
    impl MethodHandler for Echo {
        async fn invoke(&self, args: Value) -> Result<Value, MethodError> {
            Ok(args)
        }
    }

    #[derive(Deserialize)]
    struct Pair {
        a: i64,
        b: i64,
    }

    fn registry() -> MethodRegistry {
        let mut registry = MethodRegistry::new();
        registry
            .register("Test.Echo", Echo)
            .register_fn("Test.Add", |pair: Pair| async move {
                Ok::<_, MethodError>(pair.a + pair.b)
            })
            .register_fn("Test.Fail", |_: Value| async move {
                Err::<Value, _>(MethodError::failed("nope"))
            });
        registry
    }

    #[tokio::test]
    async fn dispatches_by_name() {
        let registry = registry();
        assert_eq!(
            registry.dispatch("Test.Echo", json!({"x": 1})).await.unwrap(),
            json!({"x": 1})
        );
        assert_eq!(
            registry.dispatch("Test.Add", json!({"a": 2, "b": 3})).await.unwrap(),
            json!(5)
        );
    }

    #[tokio::test]
    async fn unknown_method_maps_to_method_not_found() {
        let err = registry().dispatch("Test.Missing", Value::Null).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownMethod(ref name) if name == "Test.Missing"));
        assert_eq!(RpcError::from(err).code, codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn undecodable_args_map_to_invalid_params() {
        let err = registry()
            .dispatch("Test.Add", json!({"a": "two"}))
            .await
            .unwrap_err();
        assert_eq!(RpcError::from(err).code, codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn handler_failure_keeps_its_message() {
        let err = registry().dispatch("Test.Fail", Value::Null).await.unwrap_err();
        let rpc = RpcError::from(err);
        assert_eq!(rpc.code, codes::SERVER_ERROR);
        assert_eq!(rpc.message, "nope");
    }

    #[test]
    fn surface_is_enumerable() {
        let registry = registry();
        assert_eq!(
            registry.methods().collect::<Vec<_>>(),
            ["Test.Add", "Test.Echo", "Test.Fail"]
        );
        assert!(registry.contains("Test.Echo"));
        assert!(!registry.contains("Test.Missing"));
    }
}
