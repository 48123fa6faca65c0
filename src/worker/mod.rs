//! Worker-side execution
//!
//! Everything that runs inside an isolated worker: constructing a fresh
//! runtime environment ([`bootstrap`]), the re-established ambient context
//! handed to task code ([`runtime`]), and the entry point that decodes a
//! packaged unit and invokes the handler ([`entry`]).

pub mod bootstrap;
pub mod entry;
pub mod runtime;

pub use bootstrap::{LocalBootstrap, RuntimeBootstrap};
pub use entry::WorkerEntry;
pub use runtime::{WorkerContext, WorkerRuntime};
