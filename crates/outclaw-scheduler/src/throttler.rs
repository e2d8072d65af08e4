//! Account Throttler — the single serialization point per account.
//!
//! One throttler task per account guarantees at most one in-flight external
//! action for that account at any time. Pending work is ordered in two
//! bands: normal workflow steps (priority >= 0) always beat filler items
//! (priority < 0); within a band, ascending priority, ties broken by
//! arrival. The throttler translates executor outcomes into retry, backoff,
//! and restriction decisions, and checkpoints its queue so a restart loses
//! nothing.
//!
//! ## Architecture
//! ```text
//! Sequencer ──enqueue(item, done)──► per-account mailbox
//! Plug loop ──enqueue(item, done)──►   │
//!                                      ▼
//!                            Throttler task (single flight)
//!                              ├── pop highest-priority ready item
//!                              ├── ActionExecutor.execute(item)
//!                              ├── restriction → record, drop, signal done
//!                              ├── should_repeat → requeue after delay
//!                              ├── finished → signal done (step_id)
//!                              └── discovered leads → LeadSink
//! ```

use crate::persistence::{PersistedItem, PersistedRestriction, SchedulerDb};
use chrono::{DateTime, Utc};
use outclaw_core::traits::{ActionExecutor, LeadSink};
use outclaw_core::types::{
    ProgressResult, RestrictionKind, StepOutcome, StepSignal, ThrottlerStatus, WorkItem,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Sleep ceiling while idle with no delayed items pending.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// Messages a throttler accepts on its mailbox.
pub enum ThrottlerMsg {
    /// Append a work item; `done` receives the completion signal.
    Enqueue {
        item: WorkItem,
        done: Option<mpsc::UnboundedSender<StepSignal>>,
    },
    /// Read contract for the UI status widget.
    Status {
        reply: oneshot::Sender<ThrottlerStatus>,
    },
}

/// Cheap, cloneable address of one account's throttler task.
#[derive(Clone)]
pub struct ThrottlerHandle {
    tx: mpsc::UnboundedSender<ThrottlerMsg>,
}

impl ThrottlerHandle {
    /// Fire-and-forget submission. A send to a dead throttler is silently
    /// dropped — the registry will start a fresh one on next use.
    pub fn enqueue(&self, item: WorkItem, done: Option<mpsc::UnboundedSender<StepSignal>>) {
        let _ = self.tx.send(ThrottlerMsg::Enqueue { item, done });
    }

    /// Current/next action for the account, `None` if the task is gone.
    pub async fn status(&self) -> Option<ThrottlerStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(ThrottlerMsg::Status { reply }).ok()?;
        rx.await.ok()
    }
}

/// Starts and addresses per-account throttlers. Concurrent starters for the
/// same account converge on one instance: the registry map is the arbiter
/// and losing starters simply get the existing handle.
pub struct ThrottlerRegistry {
    executor: Arc<dyn ActionExecutor>,
    leads: Arc<dyn LeadSink>,
    db: Arc<SchedulerDb>,
    default_retry_ms: u64,
    handles: Mutex<HashMap<String, ThrottlerHandle>>,
}

impl ThrottlerRegistry {
    pub fn new(
        executor: Arc<dyn ActionExecutor>,
        leads: Arc<dyn LeadSink>,
        db: Arc<SchedulerDb>,
        default_retry_ms: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            executor,
            leads,
            db,
            default_retry_ms,
            handles: Mutex::new(HashMap::new()),
        })
    }

    /// Get the account's throttler, starting it on first use. The task is
    /// detached: it outlives its callers and is never cancelled by a
    /// sequencer cancel-all.
    pub fn handle(&self, account_id: &str) -> ThrottlerHandle {
        let mut handles = match self.handles.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = handles.get(account_id) {
            return handle.clone();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ThrottlerHandle { tx };
        handles.insert(account_id.to_string(), handle.clone());

        let throttler = Throttler::load(
            account_id,
            self.executor.clone(),
            self.leads.clone(),
            self.db.clone(),
            self.default_retry_ms,
        );
        tracing::info!("🚦 Throttler started for account {account_id}");
        tokio::spawn(throttler.run(rx));
        handle
    }
}

struct Entry {
    item: WorkItem,
    seq: u64,
    not_before: Option<DateTime<Utc>>,
    done: Option<mpsc::UnboundedSender<StepSignal>>,
}

impl Entry {
    /// Two-band ordering key: filler band after normal, then priority, then
    /// arrival.
    fn order_key(&self) -> (u8, i32, u64) {
        let band = if self.item.is_filler() { 1 } else { 0 };
        (band, self.item.priority, self.seq)
    }

    fn ready(&self, now: DateTime<Utc>) -> bool {
        self.not_before.is_none_or(|t| t <= now)
    }
}

struct ActiveRestriction {
    kind: RestrictionKind,
    message: String,
    expires_at: Option<DateTime<Utc>>,
}

struct Throttler {
    account_id: String,
    executor: Arc<dyn ActionExecutor>,
    leads: Arc<dyn LeadSink>,
    db: Arc<SchedulerDb>,
    default_retry_ms: u64,
    queue: Vec<Entry>,
    restrictions: HashMap<String, ActiveRestriction>,
    next_seq: u64,
    /// Action name currently held by the executor.
    current: Option<String>,
}

impl Throttler {
    fn load(
        account_id: &str,
        executor: Arc<dyn ActionExecutor>,
        leads: Arc<dyn LeadSink>,
        db: Arc<SchedulerDb>,
        default_retry_ms: u64,
    ) -> Self {
        let mut queue = Vec::new();
        let mut next_seq = 0u64;
        match db.load_items(account_id) {
            Ok(items) => {
                for p in items {
                    next_seq = next_seq.max(p.seq + 1);
                    queue.push(Entry {
                        item: p.item,
                        seq: p.seq,
                        not_before: p.not_before,
                        done: None,
                    });
                }
                if !queue.is_empty() {
                    tracing::info!(
                        "♻️ Throttler {account_id} recovered {} checkpointed item(s)",
                        queue.len()
                    );
                }
            }
            Err(e) => tracing::warn!("⚠️ Throttler {account_id} checkpoint load failed: {e}"),
        }

        let mut restrictions = HashMap::new();
        match db.load_restrictions(account_id) {
            Ok(rows) => {
                for r in rows {
                    restrictions.insert(
                        r.action,
                        ActiveRestriction {
                            kind: r.kind,
                            message: r.message,
                            expires_at: r.expires_at,
                        },
                    );
                }
            }
            Err(e) => tracing::warn!("⚠️ Throttler {account_id} restriction load failed: {e}"),
        }

        Self {
            account_id: account_id.to_string(),
            executor,
            leads,
            db,
            default_retry_ms,
            queue,
            restrictions,
            next_seq,
            current: None,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ThrottlerMsg>) {
        let mut mailbox_open = true;
        loop {
            self.prune_restrictions();

            // Drain everything already in the mailbox before picking work.
            while let Ok(msg) = rx.try_recv() {
                self.handle(msg);
            }

            let now = Utc::now();
            if let Some(idx) = self.next_ready(now) {
                let entry = self.queue.remove(idx);
                self.checkpoint();
                self.dispatch(entry, &mut rx, &mut mailbox_open).await;
                continue;
            }

            if !mailbox_open && self.queue.is_empty() {
                break;
            }

            // Nothing ready: wait for a message or the next delayed item.
            let sleep_for = self
                .queue
                .iter()
                .filter_map(|e| e.not_before)
                .min()
                .map(|t| (t - Utc::now()).to_std().unwrap_or(Duration::ZERO))
                .unwrap_or(IDLE_WAIT);

            if mailbox_open {
                tokio::select! {
                    msg = rx.recv() => match msg {
                        Some(msg) => self.handle(msg),
                        None => mailbox_open = false,
                    },
                    _ = tokio::time::sleep(sleep_for) => {}
                }
            } else {
                tokio::time::sleep(sleep_for).await;
            }
        }
        tracing::info!("🛑 Throttler stopped for account {}", self.account_id);
    }

    fn handle(&mut self, msg: ThrottlerMsg) {
        match msg {
            ThrottlerMsg::Enqueue { item, done } => {
                // A restricted action is dropped immediately; the waiter is
                // still released so the sequencer never deadlocks.
                if let Some(kind) = self.active_restriction(&item.action_name) {
                    tracing::info!(
                        "⛔ [{}] {} restricted ({kind:?}), dropping step {}",
                        self.account_id,
                        item.action_name,
                        item.step_id
                    );
                    signal(&done, &item, StepOutcome::Restricted(kind));
                    return;
                }
                tracing::debug!(
                    "📥 [{}] enqueue {} (step {}, priority {})",
                    self.account_id,
                    item.action_name,
                    item.step_id,
                    item.priority
                );
                let seq = self.next_seq;
                self.next_seq += 1;
                self.queue.push(Entry {
                    item,
                    seq,
                    not_before: None,
                    done,
                });
                self.checkpoint();
            }
            ThrottlerMsg::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    /// Execute one item while keeping the mailbox responsive: enqueues are
    /// accepted and status queries answered mid-flight, but nothing else
    /// runs — single flight per account is the whole point.
    async fn dispatch(
        &mut self,
        entry: Entry,
        rx: &mut mpsc::UnboundedReceiver<ThrottlerMsg>,
        mailbox_open: &mut bool,
    ) {
        // Items that queued before a restriction landed.
        if let Some(kind) = self.active_restriction(&entry.item.action_name) {
            signal(&entry.done, &entry.item, StepOutcome::Restricted(kind));
            return;
        }

        self.current = Some(entry.item.action_name.clone());
        tracing::debug!(
            "🚀 [{}] executing {} (step {}, attempt {})",
            self.account_id,
            entry.item.action_name,
            entry.item.step_id,
            entry.item.retry_count + 1
        );

        let executor = self.executor.clone();
        let item = entry.item.clone();
        let fut = async move { executor.execute(&item).await };
        tokio::pin!(fut);

        let result = loop {
            if !*mailbox_open {
                break (&mut fut).await;
            }
            tokio::select! {
                res = &mut fut => break res,
                msg = rx.recv() => match msg {
                    Some(msg) => self.handle(msg),
                    None => *mailbox_open = false,
                },
            }
        };

        self.current = None;
        self.apply(entry, result).await;
    }

    async fn apply(
        &mut self,
        entry: Entry,
        result: outclaw_core::error::Result<ProgressResult>,
    ) {
        let result = match result {
            Ok(result) => result,
            Err(e) => {
                // Transient executor failure: never drop the step, retry
                // with the configured default backoff.
                tracing::warn!(
                    "⚠️ [{}] {} failed transiently: {e}",
                    self.account_id,
                    entry.item.action_name
                );
                self.requeue(entry, self.default_retry_ms);
                return;
            }
        };

        // Scraped leads ride along independent of the primary outcome.
        for lead in &result.discovered_leads {
            let platform = platform_of(&entry.item.action_name);
            if let Err(e) = self
                .leads
                .create_or_bind(
                    &entry.item.tenant_id,
                    &entry.item.workflow_def_id,
                    platform,
                    lead,
                )
                .await
            {
                tracing::warn!("⚠️ [{}] lead forwarding failed: {e}", self.account_id);
            }
        }

        if let Some(restriction) = result.restriction {
            let expires_at = match restriction.kind {
                RestrictionKind::Weekly => Some(Utc::now() + chrono::Duration::days(7)),
                RestrictionKind::Permanent => None,
            };
            tracing::warn!(
                "⛔ [{}] {} restricted ({:?}): {}",
                self.account_id,
                entry.item.action_name,
                restriction.kind,
                restriction.message
            );
            self.restrictions.insert(
                entry.item.action_name.clone(),
                ActiveRestriction {
                    kind: restriction.kind,
                    message: restriction.message,
                    expires_at,
                },
            );
            self.checkpoint_restrictions();
            signal(&entry.done, &entry.item, StepOutcome::Restricted(restriction.kind));
        } else if result.should_repeat {
            self.requeue(entry, result.retry_after_ms);
        } else {
            // `finished`, or an empty result — either way the waiting
            // sequencer is released.
            if !result.finished {
                tracing::debug!(
                    "❔ [{}] executor returned no outcome for {}, treating as finished",
                    self.account_id,
                    entry.item.step_id
                );
            }
            signal(&entry.done, &entry.item, StepOutcome::Completed);
        }
    }

    fn requeue(&mut self, mut entry: Entry, delay_ms: u64) {
        entry.item.retry_count += 1;
        entry.not_before = Some(Utc::now() + chrono::Duration::milliseconds(delay_ms as i64));
        tracing::debug!(
            "🔁 [{}] requeue {} in {}ms (attempt {})",
            self.account_id,
            entry.item.step_id,
            delay_ms,
            entry.item.retry_count
        );
        self.queue.push(entry);
        self.checkpoint();
    }

    /// Index of the best ready entry: normal band before filler, then
    /// ascending priority, then arrival order.
    fn next_ready(&self, now: DateTime<Utc>) -> Option<usize> {
        self.queue
            .iter()
            .enumerate()
            .filter(|(_, e)| e.ready(now))
            .min_by_key(|(_, e)| e.order_key())
            .map(|(idx, _)| idx)
    }

    fn active_restriction(&self, action: &str) -> Option<RestrictionKind> {
        let r = self.restrictions.get(action)?;
        match r.expires_at {
            Some(t) if t <= Utc::now() => None,
            _ => Some(r.kind),
        }
    }

    fn prune_restrictions(&mut self) {
        let now = Utc::now();
        let before = self.restrictions.len();
        self.restrictions
            .retain(|_, r| r.expires_at.is_none_or(|t| t > now));
        if self.restrictions.len() != before {
            self.checkpoint_restrictions();
        }
    }

    fn status(&self) -> ThrottlerStatus {
        let now = Utc::now();
        let next = self
            .next_ready(now)
            .map(|idx| self.queue[idx].item.action_name.clone());
        let ready = self.queue.iter().filter(|e| e.ready(now)).count();
        ThrottlerStatus {
            in_flight: self.current.clone(),
            next,
            queued: ready,
            delayed: self.queue.len() - ready,
        }
    }

    fn checkpoint(&self) {
        let items: Vec<PersistedItem> = self
            .queue
            .iter()
            .map(|e| PersistedItem {
                item: e.item.clone(),
                seq: e.seq,
                not_before: e.not_before,
            })
            .collect();
        if let Err(e) = self.db.save_items(&self.account_id, &items) {
            tracing::warn!("⚠️ [{}] checkpoint failed: {e}", self.account_id);
        }
    }

    fn checkpoint_restrictions(&self) {
        let rows: Vec<PersistedRestriction> = self
            .restrictions
            .iter()
            .map(|(action, r)| PersistedRestriction {
                action: action.clone(),
                kind: r.kind,
                message: r.message.clone(),
                expires_at: r.expires_at,
            })
            .collect();
        if let Err(e) = self.db.save_restrictions(&self.account_id, &rows) {
            tracing::warn!("⚠️ [{}] restriction checkpoint failed: {e}", self.account_id);
        }
    }
}

fn signal(
    done: &Option<mpsc::UnboundedSender<StepSignal>>,
    item: &WorkItem,
    outcome: StepOutcome,
) {
    if let Some(done) = done {
        let _ = done.send(StepSignal {
            step_id: item.step_id.clone(),
            workflow_instance_id: item.workflow_instance_id.clone(),
            outcome,
        });
    }
}

/// Action names are namespaced `platform.verb`; the platform prefix rides
/// along when forwarding discovered leads.
fn platform_of(action: &str) -> &str {
    action.split('.').next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use outclaw_core::error::Result;
    use outclaw_core::types::LeadProfile;
    use std::sync::atomic::{AtomicU32, Ordering};

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

    /// Records execution order and tracks in-flight concurrency.
    struct RecordingExecutor {
        log: Mutex<Vec<String>>,
        results: Mutex<Vec<ProgressResult>>,
        in_flight: AtomicU32,
        max_in_flight: AtomicU32,
        busy_ms: u64,
    }

    impl RecordingExecutor {
        fn new(busy_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                log: Mutex::new(Vec::new()),
                results: Mutex::new(Vec::new()),
                in_flight: AtomicU32::new(0),
                max_in_flight: AtomicU32::new(0),
                busy_ms,
            })
        }

        fn push_result(&self, result: ProgressResult) {
            self.results.lock().unwrap().push(result);
        }
    }

    #[async_trait]
    impl ActionExecutor for RecordingExecutor {
        async fn execute(&self, item: &WorkItem) -> Result<ProgressResult> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.log.lock().unwrap().push(item.step_id.clone());
            if self.busy_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.busy_ms)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                Ok(ProgressResult::done())
            } else {
                Ok(results.remove(0))
            }
        }
    }

    fn registry(executor: Arc<RecordingExecutor>) -> Arc<ThrottlerRegistry> {
        let db = Arc::new(SchedulerDb::open_in_memory().unwrap());
        ThrottlerRegistry::new(executor, Arc::new(NullSink), db, 10)
    }

    fn item(step: &str, priority: i32) -> WorkItem {
        let mut item = WorkItem::step(
            "acc-1",
            "t1",
            "wi-1",
            "wd-1",
            "n1",
            step,
            "lead-1",
            "linkedin.visit",
            "https://example.com/in/a",
            serde_json::Value::Null,
        );
        item.priority = priority;
        item
    }

    #[tokio::test]
    async fn test_completion_signal() {
        let executor = RecordingExecutor::new(0);
        let registry = registry(executor);
        let handle = registry.handle("acc-1");

        let (tx, mut rx) = mpsc::unbounded_channel();
        handle.enqueue(item("s1", 0), Some(tx));

        let sig = rx.recv().await.unwrap();
        assert_eq!(sig.step_id, "s1");
        assert_eq!(sig.outcome, StepOutcome::Completed);
    }

    #[tokio::test]
    async fn test_priority_order_and_filler_band() {
        let executor = RecordingExecutor::new(100);
        let registry = registry(executor.clone());
        let handle = registry.handle("acc-1");

        let (tx, mut rx) = mpsc::unbounded_channel();
        // First item occupies the executor while the rest land in the queue.
        handle.enqueue(item("first", 0), Some(tx.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.enqueue(item("filler", -10), Some(tx.clone()));
        handle.enqueue(item("low", 3), Some(tx.clone()));
        handle.enqueue(item("high", 1), Some(tx));

        for _ in 0..4 {
            rx.recv().await.unwrap();
        }
        let log = executor.log.lock().unwrap().clone();
        assert_eq!(log, vec!["first", "high", "low", "filler"]);
        assert_eq!(executor.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_flight_per_account() {
        let executor = RecordingExecutor::new(30);
        let registry = registry(executor.clone());
        let handle = registry.handle("acc-1");

        let (tx, mut rx) = mpsc::unbounded_channel();
        for i in 0..5 {
            handle.enqueue(item(&format!("s{i}"), 0), Some(tx.clone()));
        }
        for _ in 0..5 {
            rx.recv().await.unwrap();
        }
        assert_eq!(executor.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_permanent_restriction_releases_waiter_and_bars_action() {
        let executor = RecordingExecutor::new(0);
        executor.push_result(ProgressResult::restricted(
            RestrictionKind::Permanent,
            "invite cap reached",
        ));
        let registry = registry(executor.clone());
        let handle = registry.handle("acc-1");

        let (tx, mut rx) = mpsc::unbounded_channel();
        handle.enqueue(item("s1", 0), Some(tx.clone()));
        let sig = rx.recv().await.unwrap();
        assert_eq!(sig.step_id, "s1");
        assert_eq!(sig.outcome, StepOutcome::Restricted(RestrictionKind::Permanent));

        // Same action again: dropped at enqueue, executor never invoked.
        handle.enqueue(item("s2", 0), Some(tx));
        let sig = rx.recv().await.unwrap();
        assert_eq!(sig.step_id, "s2");
        assert_eq!(sig.outcome, StepOutcome::Restricted(RestrictionKind::Permanent));
        assert_eq!(executor.log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_should_repeat_retries_then_completes() {
        let executor = RecordingExecutor::new(0);
        executor.push_result(ProgressResult::retry_in(20));
        let registry = registry(executor.clone());
        let handle = registry.handle("acc-1");

        let (tx, mut rx) = mpsc::unbounded_channel();
        handle.enqueue(item("s1", 0), Some(tx));
        let sig = rx.recv().await.unwrap();
        assert_eq!(sig.outcome, StepOutcome::Completed);
        // Executed twice: the retry honored the backoff then finished.
        assert_eq!(executor.log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_recovers_checkpointed_items_on_start() {
        let db = Arc::new(SchedulerDb::open_in_memory().unwrap());
        db.save_items(
            "acc-1",
            &[
                PersistedItem {
                    item: item("r1", 0),
                    seq: 0,
                    not_before: None,
                },
                PersistedItem {
                    item: item("r2", 0),
                    seq: 1,
                    not_before: None,
                },
            ],
        )
        .unwrap();

        let executor = RecordingExecutor::new(0);
        let registry = ThrottlerRegistry::new(executor.clone(), Arc::new(NullSink), db, 10);
        let _handle = registry.handle("acc-1");

        // Recovered items have no live waiter; poll the executor log.
        for _ in 0..50 {
            if executor.log.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let log = executor.log.lock().unwrap().clone();
        assert_eq!(log, vec!["r1", "r2"]);
    }

    #[tokio::test]
    async fn test_status_reports_queue() {
        let executor = RecordingExecutor::new(100);
        let registry = registry(executor);
        let handle = registry.handle("acc-1");

        let (tx, mut rx) = mpsc::unbounded_channel();
        handle.enqueue(item("s1", 0), Some(tx.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.enqueue(item("s2", 0), Some(tx));

        let status = handle.status().await.unwrap();
        assert_eq!(status.in_flight.as_deref(), Some("linkedin.visit"));
        assert_eq!(status.queued, 1);

        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
    }
}
