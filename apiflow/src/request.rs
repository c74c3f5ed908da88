//! Request descriptors and operation types.
//!
//! A [`RequestDescriptor`] is the unit of work submitted to the orchestrator.
//! It names the logical endpoint, carries the call parameters, and wraps an
//! already-built call thunk. The orchestrator never builds URLs or touches
//! credentials; it only decides when and how the thunk runs.
//!
//! # Example
//!
//! ```
//! use apiflow::request::{EndpointId, RequestDescriptor};
//! use serde_json::json;
//!
//! let descriptor = RequestDescriptor::new(
//!     EndpointId::new("users.list"),
//!     json!({ "page": 1 }),
//!     || async { Ok(json!([{ "id": 1 }])) },
//! );
//! assert_eq!(descriptor.endpoint().as_str(), "users.list");
//! ```

use crate::error::ApiError;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Call parameters. Opaque to the orchestrator except for prefetch keys.
pub type Params = Value;

/// Decoded response payload.
pub type ApiResponse = Value;

/// The eventual outcome of one call.
pub type OperationFuture<T> = BoxFuture<'static, Result<T, ApiError>>;

/// Global counter for request IDs.
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Logical name of a remote operation, independent of its URL.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndpointId({})", self.0)
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EndpointId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier for one request lifecycle (timing, progress).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct RequestId(u64);

impl RequestId {
    /// Creates a request ID from a raw value.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Allocates the next process-unique request ID.
    pub fn next() -> Self {
        Self(REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Re-invocable call thunk.
///
/// Calls are `Fn` rather than `FnOnce` so a descriptor parked in the request
/// queue can be replayed after a credential refresh.
pub type Call = Arc<dyn Fn() -> OperationFuture<ApiResponse> + Send + Sync>;

/// The unit of work submitted into the orchestrator.
///
/// Immutable once built. Cloning shares the underlying thunk.
#[derive(Clone)]
pub struct RequestDescriptor {
    endpoint: EndpointId,
    params: Params,
    call: Call,
}

impl RequestDescriptor {
    /// Builds a descriptor from an async closure.
    pub fn new<F, Fut>(endpoint: impl Into<EndpointId>, params: Params, call: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ApiResponse, ApiError>> + Send + 'static,
    {
        Self {
            endpoint: endpoint.into(),
            params,
            call: Arc::new(move || call().boxed()),
        }
    }

    /// Builds a descriptor from an existing shared thunk.
    pub fn from_call(endpoint: impl Into<EndpointId>, params: Params, call: Call) -> Self {
        Self {
            endpoint: endpoint.into(),
            params,
            call,
        }
    }

    pub fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Starts one invocation of the call.
    pub fn invoke(&self) -> OperationFuture<ApiResponse> {
        (self.call)()
    }
}

impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("endpoint", &self.endpoint)
            .field("params", &self.params)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_endpoint_display() {
        let id = EndpointId::new("orders.get");
        assert_eq!(id.to_string(), "orders.get");
        assert_eq!(format!("{:?}", id), "EndpointId(orders.get)");
        assert_eq!(EndpointId::from("orders.get"), id);
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = RequestId::next();
        let b = RequestId::next();
        assert_ne!(a, b);
        assert_eq!(RequestId::new(7).to_string(), "req-7");
    }

    #[tokio::test]
    async fn test_descriptor_can_be_invoked_repeatedly() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let descriptor = RequestDescriptor::new("stats", json!({}), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(json!(n)) }
        });

        assert_eq!(descriptor.invoke().await.unwrap(), json!(0));
        assert_eq!(descriptor.clone().invoke().await.unwrap(), json!(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_debug_omits_thunk() {
        let descriptor = RequestDescriptor::new("a", json!({ "x": 1 }), || async { Ok(json!(null)) });
        let debug = format!("{:?}", descriptor);
        assert!(debug.contains("EndpointId(a)"));
        assert!(debug.contains("\"x\""));
    }
}
