//! Ambient execution context capture
//!
//! Everything a worker needs to reconstruct the dispatching caller's
//! environment: service bindings enumerated from an injected registry,
//! request-like ambient state, and caller-captured variables, all folded
//! into one transportable, order-preserving snapshot.

pub mod registry;
pub mod request;
pub mod snapshot;

pub use registry::{Binding, BindingRegistry, CapturedBinding, FactorySpec, InMemoryBindingRegistry};
pub use request::RequestContext;
pub use snapshot::{ContextSnapshot, SnapshotBuilder, DEFAULT_DENY_LIST};
