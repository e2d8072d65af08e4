//! # OutClaw Scheduler
//!
//! The orchestration core: durable, per-account pacing of risky external
//! actions. Everything here is a long-lived tokio task with a mailbox;
//! cross-task signals are fire-and-forget sends, and scheduling state is
//! checkpointed so a process restart loses no in-flight work.
//!
//! ## Architecture
//! ```text
//! Campaign trigger → Fanout
//!   └── one Sequencer per (account, node) target
//!         ├── HoursGate.ensure_available (wakes on window updates)
//!         ├── delay steps (compensated against gate waits)
//!         └── action steps → AccountThrottler.enqueue → wait for signal
//!
//! AccountThrottler (one per account, single flight)
//!   ├── two-band priority queue (workflow steps > filler)
//!   ├── ActionExecutor → retry / restriction / completion
//!   └── sqlite checkpoints (items + restrictions)
//!
//! Plug loop (per account) → random filler action every 20-60 min
//! DurableQueue (email, teardown) → paced FIFO with JSON snapshot
//! ```

pub mod fanout;
pub mod hours;
pub mod persistence;
pub mod plug;
pub mod queue;
pub mod sequencer;
pub mod throttler;

pub use fanout::{CampaignTrigger, CancelHub};
pub use hours::HoursGate;
pub use persistence::SchedulerDb;
pub use plug::PlugSettings;
pub use queue::{QueueHandle, spawn_durable_queue};
pub use sequencer::{SequencerDeps, SequencerInput};
pub use throttler::{ThrottlerHandle, ThrottlerRegistry};
