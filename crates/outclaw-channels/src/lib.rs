//! OutClaw delivery channels.
//!
//! Currently one channel: paced SMTP email dispatch. The queue front is
//! shared infrastructure, so new channels plug in as another
//! `EmailTransport`-style trait plus a `spawn_*_queue` wrapper.

pub mod email;

pub use email::{SmtpChannel, spawn_email_queue};
