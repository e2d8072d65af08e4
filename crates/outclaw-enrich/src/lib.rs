//! OutClaw enrichment: the waterfall resolver and its HTTP providers.
//!
//! ```text
//!   callers ──enqueue──▶ ResolverHandle ──mpsc──▶ resolver task
//!                             │                        │ waterfall
//!                             └──subscribe──◀ broadcast┘ over providers
//! ```
//!
//! Providers are ranked; each carries an independent rate-limit cooldown.
//! The pending queue and cooldown table survive restarts via a JSON
//! snapshot.

pub mod http_provider;
pub mod resolver;
pub mod store;

pub use http_provider::HttpProvider;
pub use resolver::{EnrichEvent, ResolverHandle, ResolverState};
pub use store::SnapshotStore;
