//! Subscription teardown — queued wind-down of a canceled tenant.
//!
//! Cancellations arrive in bursts (billing webhooks retry), so they drain
//! through the durable queue one tenant at a time. Each teardown runs a
//! fixed sequence of cleanup steps; a failing step is logged and the rest
//! still run, so a flaky proxy API cannot leave accounts half-enabled.

use outclaw_core::error::Result;
use outclaw_core::traits::SubscriptionAdmin;
use outclaw_core::types::TeardownRequest;
use outclaw_scheduler::queue::{QueueHandle, spawn_durable_queue};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Spawn the teardown queue in front of a tenant admin.
pub fn spawn_teardown_queue(
    admin: Arc<dyn SubscriptionAdmin>,
    snapshot_path: PathBuf,
    pacing_secs: u64,
) -> QueueHandle<TeardownRequest> {
    spawn_durable_queue(
        "teardown",
        snapshot_path,
        Duration::from_secs(pacing_secs),
        move |req: TeardownRequest| {
            let admin = admin.clone();
            async move { teardown_tenant(admin.as_ref(), &req.tenant_id).await }
        },
    )
}

/// Wind a tenant down. Steps run in a fixed order; each failure is logged
/// and the remaining steps still execute.
pub async fn teardown_tenant(admin: &dyn SubscriptionAdmin, tenant_id: &str) -> Result<()> {
    tracing::info!("🧹 Tearing down subscription for tenant {tenant_id}");

    if let Err(e) = admin.cancel_running_work(tenant_id).await {
        tracing::warn!("⚠️ cancel_running_work failed for {tenant_id}: {e}");
    }
    if let Err(e) = admin.disable_all_proxies(tenant_id).await {
        tracing::warn!("⚠️ disable_all_proxies failed for {tenant_id}: {e}");
    }
    if let Err(e) = admin.disable_all_accounts(tenant_id).await {
        tracing::warn!("⚠️ disable_all_accounts failed for {tenant_id}: {e}");
    }
    if let Err(e) = admin.delete_subscription_record(tenant_id).await {
        tracing::warn!("⚠️ delete_subscription_record failed for {tenant_id}: {e}");
    }

    tracing::info!("✅ Teardown complete for tenant {tenant_id}");
    Ok(())
}
