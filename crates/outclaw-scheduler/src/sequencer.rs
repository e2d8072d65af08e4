//! Bot Job Sequencer — drives one lead through one workflow node's steps,
//! strictly in order, never skipping or reordering.
//!
//! The step list and tool catalog are fetched once per run (a fixed
//! snapshot). Delays are compensated against time already spent waiting for
//! working hours, so a lead never pays for both. Action steps are submitted
//! to the account's throttler and the run suspends, unbounded, until the
//! completion signal for that step arrives — the throttler is the sole
//! source of progress truth. A cancel-all signal unwinds any suspension
//! point; the throttler itself is never cancelled by it.

use crate::hours::HoursGate;
use crate::throttler::ThrottlerRegistry;
use outclaw_core::error::{OutClawError, Result};
use outclaw_core::traits::CatalogSource;
use outclaw_core::types::{StepKind, WorkItem};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Shared collaborators a sequencer run needs.
#[derive(Clone)]
pub struct SequencerDeps {
    pub catalog: Arc<dyn CatalogSource>,
    pub gate: Arc<HoursGate>,
    pub registry: Arc<ThrottlerRegistry>,
}

/// One (account, lead, workflow-node) run.
#[derive(Debug, Clone)]
pub struct SequencerInput {
    pub account_id: String,
    pub tenant_id: String,
    pub workflow_def_id: String,
    pub workflow_instance_id: String,
    pub node_id: String,
    pub lead_id: String,
    pub target_url: String,
}

/// Execute every step of the node for this lead. Returns `Canceled` if the
/// cancel-all signal fires at any suspension point.
pub async fn run(
    deps: &SequencerDeps,
    input: &SequencerInput,
    mut cancel: watch::Receiver<bool>,
) -> Result<()> {
    let steps = deps
        .catalog
        .steps(&input.workflow_def_id, &input.node_id)
        .await?;
    if steps.is_empty() {
        tracing::debug!(
            "🪹 No steps for node {} — nothing to do for lead {}",
            input.node_id,
            input.lead_id
        );
        return Ok(());
    }
    let tools = deps.catalog.tools().await?;

    // Starting the throttler on first use is race-tolerant: concurrent
    // starters all get the same instance from the registry.
    let handle = deps.registry.handle(&input.account_id);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    tracing::info!(
        "▶️ Sequencer start: account={} lead={} node={} ({} steps)",
        input.account_id,
        input.lead_id,
        input.node_id,
        steps.len()
    );

    for step in &steps {
        let waited = tokio::select! {
            res = deps.gate.ensure_available(&input.account_id) => res?,
            _ = cancelled(&mut cancel) => return Err(OutClawError::Canceled),
        };

        match &step.kind {
            StepKind::Delay { ms } => {
                let remaining = compensated_delay(*ms, waited);
                if remaining > 0 {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(remaining)) => {}
                        _ = cancelled(&mut cancel) => return Err(OutClawError::Canceled),
                    }
                }
            }
            StepKind::Action { tool, payload } => {
                let action = tools
                    .resolve(tool)
                    .ok_or_else(|| OutClawError::catalog(format!("Unknown tool: {tool}")))?;
                let item = WorkItem::step(
                    &input.account_id,
                    &input.tenant_id,
                    &input.workflow_instance_id,
                    &input.workflow_def_id,
                    &input.node_id,
                    &step.id,
                    &input.lead_id,
                    action,
                    &input.target_url,
                    payload.clone(),
                );
                handle.enqueue(item, Some(done_tx.clone()));

                // Unbounded wait for this step's signal, no timeout.
                // Stale signals from earlier steps are skipped.
                loop {
                    tokio::select! {
                        sig = done_rx.recv() => match sig {
                            Some(sig) if sig.step_id == step.id => break,
                            Some(_) => continue,
                            None => {
                                return Err(OutClawError::executor(
                                    "Throttler completion channel closed",
                                ));
                            }
                        },
                        _ = cancelled(&mut cancel) => return Err(OutClawError::Canceled),
                    }
                }
            }
        }
    }

    deps.catalog
        .save_activity(&input.lead_id, &input.tenant_id, "completed", &input.account_id)
        .await?;
    tracing::info!(
        "🏁 Sequencer done: account={} lead={} node={}",
        input.account_id,
        input.lead_id,
        input.node_id
    );
    Ok(())
}

/// Time already spent waiting for working hours counts against a requested
/// delay, so a lead never pays for both waits back to back.
fn compensated_delay(requested_ms: u64, waited: Duration) -> u64 {
    requested_ms.saturating_sub(waited.as_millis() as u64)
}

/// Resolves when the cancel flag flips to true; pends forever otherwise,
/// including when the sender side is gone.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
