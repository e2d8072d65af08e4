//! Enrichment Waterfall Resolver — sequential fallback across ranked
//! providers until one yields a usable profile.
//!
//! Each provider carries an independent rate-limit cooldown; a rate-limited
//! provider is skipped (not marked tested) and may be retried once its
//! cooldown clears. A request whose tested set covers every configured
//! provider is dropped with an `Exhausted` event rather than retried
//! forever. The loop snapshots its queue + cooldown table and restarts
//! itself after a fixed iteration budget to bound accumulated history.
//!
//! Resolution is published on a broadcast bus keyed by correlation id —
//! callers hold no live handle into the resolver.

use crate::store::SnapshotStore;
use chrono::{DateTime, Utc};
use outclaw_core::traits::EnrichProvider;
use outclaw_core::types::{EnrichOutcome, EnrichmentRequest, ProviderReply};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Sleep ceiling while idle with no cooldown pending.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// State carried across resolver restarts.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ResolverState {
    pub queue: VecDeque<EnrichmentRequest>,
    /// Provider name → earliest time it may be tried again.
    pub cooldowns: HashMap<String, DateTime<Utc>>,
}

/// Terminal event for one request, published on the broadcast bus.
#[derive(Debug, Clone)]
pub struct EnrichEvent {
    pub callback_id: String,
    pub identifier: String,
    pub outcome: EnrichOutcome,
}

enum ResolverMsg {
    Enqueue(EnrichmentRequest),
    Withdraw { callback_id: String },
}

/// Cheap, cloneable address of the resolver task.
#[derive(Clone)]
pub struct ResolverHandle {
    tx: mpsc::UnboundedSender<ResolverMsg>,
    events: broadcast::Sender<EnrichEvent>,
}

impl ResolverHandle {
    /// Fire-and-forget submission.
    pub fn enqueue(&self, request: EnrichmentRequest) {
        let _ = self.tx.send(ResolverMsg::Enqueue(request));
    }

    /// Remove a pending request before it resolves.
    pub fn withdraw(&self, callback_id: &str) {
        let _ = self.tx.send(ResolverMsg::Withdraw {
            callback_id: callback_id.to_string(),
        });
    }

    /// Subscribe to resolution events.
    pub fn subscribe(&self) -> broadcast::Receiver<EnrichEvent> {
        self.events.subscribe()
    }
}

enum RunEnd {
    /// Iteration budget reached; restart from the snapshot.
    Budget,
    /// Mailbox closed; shut down.
    Closed,
}

/// Spawn the resolver task over an ordered provider list (first =
/// preferred).
pub fn spawn(
    providers: Vec<Arc<dyn EnrichProvider>>,
    store: SnapshotStore,
    iteration_budget: u32,
) -> ResolverHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(256);
    let handle = ResolverHandle {
        tx,
        events: events.clone(),
    };

    tokio::spawn(async move {
        tracing::info!(
            "💧 Enrichment resolver started ({} provider(s))",
            providers.len()
        );
        loop {
            let state = store.load();
            match run(&providers, state, &mut rx, &events, &store, iteration_budget).await {
                RunEnd::Budget => {
                    tracing::debug!("🔄 Resolver restart (iteration budget reached)");
                }
                RunEnd::Closed => break,
            }
        }
        tracing::info!("🛑 Enrichment resolver stopped");
    });
    handle
}

async fn run(
    providers: &[Arc<dyn EnrichProvider>],
    mut state: ResolverState,
    rx: &mut mpsc::UnboundedReceiver<ResolverMsg>,
    events: &broadcast::Sender<EnrichEvent>,
    store: &SnapshotStore,
    iteration_budget: u32,
) -> RunEnd {
    for _ in 0..iteration_budget {
        while let Ok(msg) = rx.try_recv() {
            apply(&mut state, msg);
        }

        // 1. Suspend until the queue is non-empty.
        if state.queue.is_empty() {
            store.save(&state);
            match rx.recv().await {
                Some(msg) => apply(&mut state, msg),
                None => return RunEnd::Closed,
            }
            continue;
        }

        drop_exhausted(&mut state, providers, events);
        if state.queue.is_empty() {
            continue;
        }

        let now = Utc::now();

        // 2. Providers currently off cooldown.
        let available: Vec<&str> = providers
            .iter()
            .map(|p| p.name())
            .filter(|name| off_cooldown(&state.cooldowns, name, now))
            .collect();
        if available.is_empty() {
            match wait_for_work(&state, rx).await {
                Some(Some(msg)) => apply(&mut state, msg),
                Some(None) => {}
                None => return RunEnd::Closed,
            }
            continue;
        }

        // 3. First queued request with at least one untested, available
        // provider — plain FIFO, not a priority scheduler.
        let pick = state.queue.iter().position(|req| {
            available
                .iter()
                .any(|name| !req.tested_providers.iter().any(|t| t == name))
        });
        let Some(pos) = pick else {
            // 4. Nothing eligible: wait for a new item or the nearest
            // cooldown expiry.
            match wait_for_work(&state, rx).await {
                Some(Some(msg)) => apply(&mut state, msg),
                Some(None) => {}
                None => return RunEnd::Closed,
            }
            continue;
        };

        // 5. Attempt providers in configured priority order.
        let mut request = match state.queue.remove(pos) {
            Some(request) => request,
            None => continue,
        };
        let mut resolved = false;
        for provider in providers {
            let name = provider.name();
            if request.tested_providers.iter().any(|t| t == name) {
                continue;
            }
            if !off_cooldown(&state.cooldowns, name, Utc::now()) {
                continue;
            }
            match provider.enrich(&request.platform, &request.partial).await {
                Ok(ProviderReply::Hit(profile)) => {
                    tracing::info!(
                        "✨ Enriched {} via {name}: {}",
                        request.identifier,
                        profile.url
                    );
                    publish(events, &request, EnrichOutcome::Resolved(profile));
                    resolved = true;
                    break;
                }
                Ok(ProviderReply::Miss) => {
                    request.tested_providers.push(name.to_string());
                }
                Ok(ProviderReply::RateLimited { delay_ms }) => {
                    // Not marked tested — retried once the cooldown clears.
                    let until = Utc::now() + chrono::Duration::milliseconds(delay_ms as i64);
                    tracing::debug!("🧊 Provider {name} on cooldown for {delay_ms}ms");
                    state.cooldowns.insert(name.to_string(), until);
                }
                Err(e) => {
                    // Provider errors count as a miss, never fatal to the
                    // waterfall.
                    tracing::warn!("⚠️ Provider {name} failed: {e}");
                    request.tested_providers.push(name.to_string());
                }
            }
        }

        if !resolved {
            if tested_all(&request, providers) {
                tracing::info!("🫙 Request {} exhausted all providers", request.identifier);
                publish(events, &request, EnrichOutcome::Exhausted);
            } else {
                state.queue.insert(pos.min(state.queue.len()), request);
            }
        }

        // 6. Persist; the restart itself happens at the budget boundary.
        store.save(&state);
    }
    store.save(&state);
    RunEnd::Budget
}

fn apply(state: &mut ResolverState, msg: ResolverMsg) {
    match msg {
        ResolverMsg::Enqueue(request) => {
            tracing::debug!("📥 Enrichment request queued: {}", request.identifier);
            state.queue.push_back(request);
        }
        ResolverMsg::Withdraw { callback_id } => {
            state.queue.retain(|r| r.callback_id != callback_id);
        }
    }
}

/// Wait until a new message arrives or the earliest cooldown expires.
/// Outer `None` = mailbox closed; inner `None` = timer fired.
async fn wait_for_work(
    state: &ResolverState,
    rx: &mut mpsc::UnboundedReceiver<ResolverMsg>,
) -> Option<Option<ResolverMsg>> {
    let now = Utc::now();
    let sleep_for = state
        .cooldowns
        .values()
        .filter(|&&t| t > now)
        .min()
        .map(|&t| (t - now).to_std().unwrap_or(Duration::ZERO))
        .unwrap_or(IDLE_WAIT);
    tokio::select! {
        msg = rx.recv() => msg.map(|m| Some(m)),
        _ = tokio::time::sleep(sleep_for) => Some(None),
    }
}

fn off_cooldown(cooldowns: &HashMap<String, DateTime<Utc>>, name: &str, now: DateTime<Utc>) -> bool {
    cooldowns.get(name).is_none_or(|&t| t <= now)
}

fn tested_all(request: &EnrichmentRequest, providers: &[Arc<dyn EnrichProvider>]) -> bool {
    providers
        .iter()
        .all(|p| request.tested_providers.iter().any(|t| t == p.name()))
}

fn drop_exhausted(
    state: &mut ResolverState,
    providers: &[Arc<dyn EnrichProvider>],
    events: &broadcast::Sender<EnrichEvent>,
) {
    let mut kept = VecDeque::with_capacity(state.queue.len());
    for request in state.queue.drain(..) {
        if tested_all(&request, providers) {
            tracing::info!("🫙 Request {} exhausted all providers", request.identifier);
            publish(events, &request, EnrichOutcome::Exhausted);
        } else {
            kept.push_back(request);
        }
    }
    state.queue = kept;
}

fn publish(
    events: &broadcast::Sender<EnrichEvent>,
    request: &EnrichmentRequest,
    outcome: EnrichOutcome,
) {
    // No subscribers is fine — the event is simply dropped.
    let _ = events.send(EnrichEvent {
        callback_id: request.callback_id.clone(),
        identifier: request.identifier.clone(),
        outcome,
    });
}
