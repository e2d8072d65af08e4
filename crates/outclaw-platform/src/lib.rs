//! OutClaw platform administration.

pub mod teardown;

pub use teardown::{spawn_teardown_queue, teardown_tenant};
