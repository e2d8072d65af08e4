//! Plug Scheduler — periodic low-priority filler actions per account.
//!
//! Simulates organic activity between workflow steps: pick one random
//! configured filler action, push it through the account's throttler at
//! filler priority, wait (bounded) for it to finish, then sleep a random
//! 20-60 minute interval. The loop restarts itself every 50 iterations to
//! bound accumulated history; an account with zero filler actions exits
//! immediately instead of looping forever.

use crate::throttler::ThrottlerRegistry;
use outclaw_core::config::SchedulerConfig;
use outclaw_core::error::{OutClawError, Result};
use outclaw_core::traits::CatalogSource;
use outclaw_core::types::WorkItem;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Iterations per cycle before the loop restarts fresh.
const RESTART_ITERATIONS: u32 = 50;

/// Plug loop tuning, lifted from the scheduler config.
#[derive(Debug, Clone)]
pub struct PlugSettings {
    pub priority: i32,
    pub min_sleep_secs: u64,
    pub max_sleep_secs: u64,
    pub timeout_secs: u64,
}

impl PlugSettings {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            priority: config.plug_priority,
            min_sleep_secs: config.plug_min_sleep_secs,
            max_sleep_secs: config.plug_max_sleep_secs,
            timeout_secs: config.plug_timeout_secs,
        }
    }
}

enum CycleEnd {
    /// Account has no filler actions configured.
    NoActions,
    /// Iteration budget reached; restart fresh.
    Budget,
}

/// Spawn the detached filler loop for one account.
pub fn spawn(
    account_id: String,
    tenant_id: String,
    catalog: Arc<dyn CatalogSource>,
    registry: Arc<ThrottlerRegistry>,
    settings: PlugSettings,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match run_cycle(
                &account_id,
                &tenant_id,
                catalog.as_ref(),
                &registry,
                &settings,
                RESTART_ITERATIONS,
            )
            .await
            {
                Ok(CycleEnd::NoActions) => {
                    tracing::info!("🔌 No plug actions for account {account_id}, loop exits");
                    break;
                }
                Ok(CycleEnd::Budget) => {
                    tracing::debug!("🔄 Plug loop restart for account {account_id}");
                }
                Err(e) => {
                    tracing::warn!("⚠️ Plug loop for account {account_id} stopped: {e}");
                    break;
                }
            }
        }
    })
}

async fn run_cycle(
    account_id: &str,
    tenant_id: &str,
    catalog: &dyn CatalogSource,
    registry: &ThrottlerRegistry,
    settings: &PlugSettings,
    iterations: u32,
) -> Result<CycleEnd> {
    let actions = catalog.plug_actions(account_id).await?;
    if actions.is_empty() {
        return Ok(CycleEnd::NoActions);
    }

    let handle = registry.handle(account_id);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    for _ in 0..iterations {
        let (action, sleep_secs) = {
            let mut rng = rand::thread_rng();
            let action = actions[rng.gen_range(0..actions.len())].clone();
            let sleep_secs = rng.gen_range(settings.min_sleep_secs..=settings.max_sleep_secs);
            (action, sleep_secs)
        };

        let item = WorkItem::plug(account_id, tenant_id, &action, settings.priority);
        let step_id = item.step_id.clone();
        tracing::debug!("🔌 [{account_id}] plug action {action}");
        handle.enqueue(item, Some(done_tx.clone()));

        // Bounded wait: an action stuck behind a long workflow queue must
        // not freeze the filler loop forever.
        let wait = async {
            while let Some(sig) = done_rx.recv().await {
                if sig.step_id == step_id {
                    return Ok(());
                }
            }
            Err(OutClawError::executor("Throttler completion channel closed"))
        };
        match tokio::time::timeout(Duration::from_secs(settings.timeout_secs), wait).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::debug!("⏲️ [{account_id}] plug action {action} timed out, moving on");
            }
        }

        tokio::time::sleep(Duration::from_secs(sleep_secs)).await;
    }
    Ok(CycleEnd::Budget)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SchedulerDb;
    use async_trait::async_trait;
    use outclaw_core::traits::{ActionExecutor, CampaignTarget, LeadSink};
    use outclaw_core::types::{LeadProfile, ProgressResult, Step, ToolCatalog};
    use std::sync::Mutex;

    struct FakeCatalog {
        plugs: Vec<String>,
    }

    #[async_trait]
    impl CatalogSource for FakeCatalog {
        async fn steps(&self, _workflow_def_id: &str, _node_id: &str) -> Result<Vec<Step>> {
            Ok(Vec::new())
        }

        async fn tools(&self) -> Result<ToolCatalog> {
            Ok(ToolCatalog::new())
        }

        async fn campaign_targets(&self, _workflow_def_id: &str) -> Result<Vec<CampaignTarget>> {
            Ok(Vec::new())
        }

        async fn plug_actions(&self, _account_id: &str) -> Result<Vec<String>> {
            Ok(self.plugs.clone())
        }

        async fn save_activity(
            &self,
            _lead_id: &str,
            _tenant_id: &str,
            _status: &str,
            _account_id: &str,
        ) -> Result<()> {
            Ok(())
        }
    }

    struct RecordingExecutor {
        items: Mutex<Vec<WorkItem>>,
    }

    #[async_trait]
    impl ActionExecutor for RecordingExecutor {
        async fn execute(&self, item: &WorkItem) -> Result<ProgressResult> {
            self.items.lock().unwrap().push(item.clone());
            Ok(ProgressResult::done())
        }
    }

    struct NullSink;

    #[async_trait]
    impl LeadSink for NullSink {
        async fn create_or_bind(
            &self,
            _tenant_id: &str,
            _workflow_def_id: &str,
            _platform: &str,
            _profile: &LeadProfile,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn fast_settings() -> PlugSettings {
        PlugSettings {
            priority: -10,
            min_sleep_secs: 0,
            max_sleep_secs: 0,
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_no_actions_exits_immediately() {
        let catalog = FakeCatalog { plugs: Vec::new() };
        let executor = Arc::new(RecordingExecutor {
            items: Mutex::new(Vec::new()),
        });
        let db = Arc::new(SchedulerDb::open_in_memory().unwrap());
        let registry = ThrottlerRegistry::new(executor.clone(), Arc::new(NullSink), db, 10);

        let end = run_cycle("acc-1", "t1", &catalog, &registry, &fast_settings(), 3)
            .await
            .unwrap();
        assert!(matches!(end, CycleEnd::NoActions));
        assert!(executor.items.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submits_filler_items_until_budget() {
        let catalog = FakeCatalog {
            plugs: vec!["linkedin.like_post".into(), "linkedin.view_feed".into()],
        };
        let executor = Arc::new(RecordingExecutor {
            items: Mutex::new(Vec::new()),
        });
        let db = Arc::new(SchedulerDb::open_in_memory().unwrap());
        let registry = ThrottlerRegistry::new(executor.clone(), Arc::new(NullSink), db, 10);

        let end = run_cycle("acc-1", "t1", &catalog, &registry, &fast_settings(), 3)
            .await
            .unwrap();
        assert!(matches!(end, CycleEnd::Budget));

        let items = executor.items.lock().unwrap();
        assert_eq!(items.len(), 3);
        for item in items.iter() {
            assert!(item.is_filler());
            assert!(item.ignore_lead_binding);
            assert!(item.action_name.starts_with("linkedin."));
        }
    }
}
