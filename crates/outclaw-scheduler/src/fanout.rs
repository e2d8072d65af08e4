//! Campaign Fanout — turns one workflow trigger into N detached sequencer
//! runs, one per (account, node) target. Fire-and-forget: no fan-in, no
//! join; a stuck target never blocks its siblings.
//!
//! Also owns the per-tenant cancel hub. `cancel_all` flips a watch flag
//! every running sequencer for that tenant holds, unwinding each run at its
//! current suspension point. Throttlers are deliberately NOT cancelled by
//! this — their lifecycle is decoupled.

use crate::sequencer::{self, SequencerDeps, SequencerInput};
use outclaw_core::error::{OutClawError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// One campaign trigger: start the workflow for every configured target.
#[derive(Debug, Clone)]
pub struct CampaignTrigger {
    pub tenant_id: String,
    pub workflow_def_id: String,
    pub workflow_instance_id: String,
}

/// Per-tenant cancel-all signal fanout.
#[derive(Default)]
pub struct CancelHub {
    senders: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl CancelHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A cancel receiver for a new run under this tenant. A previously
    /// fired cancel does not leak into new runs: the channel is replaced
    /// once tripped.
    pub fn subscribe(&self, tenant_id: &str) -> watch::Receiver<bool> {
        let mut senders = match self.senders.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        match senders.get(tenant_id) {
            Some(tx) if !*tx.borrow() => tx.subscribe(),
            _ => {
                let (tx, rx) = watch::channel(false);
                senders.insert(tenant_id.to_string(), tx);
                rx
            }
        }
    }

    /// Abort every running sequencer for the tenant.
    pub fn cancel_all(&self, tenant_id: &str) {
        let senders = match self.senders.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(tx) = senders.get(tenant_id) {
            tracing::info!("🚫 Cancel-all for tenant {tenant_id}");
            let _ = tx.send(true);
        }
    }
}

/// Resolve the trigger's targets and spawn one detached sequencer per
/// target. Returns the number of runs started.
pub async fn launch(
    deps: Arc<SequencerDeps>,
    hub: Arc<CancelHub>,
    trigger: CampaignTrigger,
) -> Result<usize> {
    let targets = deps
        .catalog
        .campaign_targets(&trigger.workflow_def_id)
        .await?;
    tracing::info!(
        "📣 Campaign {} fanning out to {} target(s)",
        trigger.workflow_def_id,
        targets.len()
    );

    for target in &targets {
        let input = SequencerInput {
            account_id: target.account_id.clone(),
            tenant_id: trigger.tenant_id.clone(),
            workflow_def_id: trigger.workflow_def_id.clone(),
            workflow_instance_id: trigger.workflow_instance_id.clone(),
            node_id: target.node_id.clone(),
            lead_id: target.lead_id.clone(),
            target_url: target.target_url.clone(),
        };
        let cancel = hub.subscribe(&trigger.tenant_id);
        let deps = deps.clone();
        tokio::spawn(async move {
            match sequencer::run(&deps, &input, cancel).await {
                Ok(()) => {}
                Err(OutClawError::Canceled) => {
                    tracing::info!(
                        "🚫 Sequencer canceled: account={} lead={}",
                        input.account_id,
                        input.lead_id
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Sequencer failed: account={} lead={}: {e}",
                        input.account_id,
                        input.lead_id
                    );
                }
            }
        });
    }
    Ok(targets.len())
}
