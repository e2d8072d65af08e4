//! Core data model — the value objects that flow between schedulers.
//!
//! Everything here is a plain serde type: work items and enrichment requests
//! are checkpointed to disk between restarts, so no live handles, no
//! non-serializable state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One unit of external work, owned exclusively by an account's throttler
/// queue from enqueue until a terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique item ID.
    pub id: String,
    /// Account (bot identity) that performs the action.
    pub account_id: String,
    pub tenant_id: String,
    /// Running workflow instance this step belongs to.
    pub workflow_instance_id: String,
    /// Workflow definition the instance was started from.
    pub workflow_def_id: String,
    pub created_at: DateTime<Utc>,
    /// Freeform action payload (message text, note, etc.).
    pub payload: serde_json::Value,
    /// Concrete executor action, resolved via the tool catalog.
    pub action_name: String,
    /// Profile URL the action targets.
    pub target_url: String,
    /// Step this item was submitted for — the completion correlation key.
    pub step_id: String,
    /// Workflow node that produced the step list.
    pub node_id: String,
    /// Lower value = runs earlier. Negative = filler band (plug actions,
    /// list imports) — always behind normal workflow steps.
    pub priority: i32,
    pub lead_id: String,
    /// How many times the executor asked us to repeat this item.
    pub retry_count: u32,
    /// Optional suffix appended to the target URL (e.g. "/recent-activity").
    #[serde(default)]
    pub url_suffix: Option<String>,
    /// Skip the lead-binding check in the executor (filler actions).
    #[serde(default)]
    pub ignore_lead_binding: bool,
}

impl WorkItem {
    /// Create a normal workflow-step item.
    #[allow(clippy::too_many_arguments)]
    pub fn step(
        account_id: &str,
        tenant_id: &str,
        workflow_instance_id: &str,
        workflow_def_id: &str,
        node_id: &str,
        step_id: &str,
        lead_id: &str,
        action_name: &str,
        target_url: &str,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            tenant_id: tenant_id.to_string(),
            workflow_instance_id: workflow_instance_id.to_string(),
            workflow_def_id: workflow_def_id.to_string(),
            created_at: Utc::now(),
            payload,
            action_name: action_name.to_string(),
            target_url: target_url.to_string(),
            step_id: step_id.to_string(),
            node_id: node_id.to_string(),
            priority: 0,
            lead_id: lead_id.to_string(),
            retry_count: 0,
            url_suffix: None,
            ignore_lead_binding: false,
        }
    }

    /// Create a low-priority filler ("plug") item for an account.
    pub fn plug(account_id: &str, tenant_id: &str, action_name: &str, priority: i32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            tenant_id: tenant_id.to_string(),
            workflow_instance_id: String::new(),
            workflow_def_id: String::new(),
            created_at: Utc::now(),
            payload: serde_json::Value::Null,
            action_name: action_name.to_string(),
            target_url: String::new(),
            step_id: format!("plug-{}", uuid::Uuid::new_v4()),
            node_id: String::new(),
            priority,
            lead_id: String::new(),
            retry_count: 0,
            url_suffix: None,
            ignore_lead_binding: true,
        }
    }

    /// Whether this item is in the filler band.
    pub fn is_filler(&self) -> bool {
        self.priority < 0
    }
}

/// Outcome of one Action Executor invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressResult {
    /// The action completed; notify the originating sequencer.
    #[serde(default)]
    pub finished: bool,
    /// Minimum delay before the item may run again (when `should_repeat`).
    #[serde(default)]
    pub retry_after_ms: u64,
    /// The executor wants the same item requeued (pagination, transient UI
    /// state, soft rate limit on the platform side).
    #[serde(default)]
    pub should_repeat: bool,
    /// Platform barred the action — terminal for this item.
    #[serde(default)]
    pub restriction: Option<Restriction>,
    /// Leads scraped as a side effect (list imports, search pages).
    #[serde(default)]
    pub discovered_leads: Vec<LeadProfile>,
}

impl ProgressResult {
    pub fn done() -> Self {
        Self {
            finished: true,
            ..Default::default()
        }
    }

    pub fn retry_in(ms: u64) -> Self {
        Self {
            should_repeat: true,
            retry_after_ms: ms,
            ..Default::default()
        }
    }

    pub fn restricted(kind: RestrictionKind, message: &str) -> Self {
        Self {
            restriction: Some(Restriction {
                kind,
                message: message.to_string(),
            }),
            ..Default::default()
        }
    }
}

/// A platform-imposed block on an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Restriction {
    pub kind: RestrictionKind,
    pub message: String,
}

/// Restriction scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestrictionKind {
    /// Resets on a rolling 7-day boundary.
    Weekly,
    /// Never retried.
    Permanent,
}

/// Per-account availability windows. Exactly 7 weekday slots, Monday = 0;
/// an empty slot means unavailable all day. Minutes since local midnight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingHoursState {
    pub windows_by_weekday: [Vec<(u16, u16)>; 7],
    pub utc_offset_hours: i32,
}

impl WorkingHoursState {
    /// Same window every day of the week.
    pub fn uniform(start_min: u16, end_min: u16, utc_offset_hours: i32) -> Self {
        Self {
            windows_by_weekday: std::array::from_fn(|_| vec![(start_min, end_min)]),
            utc_offset_hours,
        }
    }

    /// Closed all week.
    pub fn closed(utc_offset_hours: i32) -> Self {
        Self {
            windows_by_weekday: std::array::from_fn(|_| Vec::new()),
            utc_offset_hours,
        }
    }
}

/// One step of a workflow node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub kind: StepKind,
}

/// What a step does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepKind {
    /// Pure pause between actions.
    Delay { ms: u64 },
    /// Platform action, named by its logical tool id.
    Action {
        tool: String,
        payload: serde_json::Value,
    },
}

/// Static tool registration table: logical tool id → executor action name.
/// Built once at startup; no runtime reflection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCatalog {
    actions: HashMap<String, String>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: &str, action_name: &str) {
        self.actions.insert(tool.to_string(), action_name.to_string());
    }

    /// Resolve a logical tool id to its concrete executor action.
    pub fn resolve(&self, tool: &str) -> Option<&str> {
        self.actions.get(tool).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// A usable profile discovered on the external platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadProfile {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub headline: Option<String>,
}

/// Partial identity used to look a lead up across enrichment providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialIdentity {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub urls: Vec<String>,
}

/// One pending lookup in the enrichment resolver queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentRequest {
    /// Lead identifier on the caller's side.
    pub identifier: String,
    /// Correlation id echoed back in the resolution event.
    pub callback_id: String,
    /// Target platform ("linkedin", ...).
    pub platform: String,
    pub partial: PartialIdentity,
    /// Providers that gave a definitive miss for this request.
    #[serde(default)]
    pub tested_providers: Vec<String>,
}

impl EnrichmentRequest {
    pub fn new(identifier: &str, platform: &str, partial: PartialIdentity) -> Self {
        Self {
            identifier: identifier.to_string(),
            callback_id: uuid::Uuid::new_v4().to_string(),
            platform: platform.to_string(),
            partial,
            tested_providers: Vec::new(),
        }
    }
}

/// What a single provider said about a request.
#[derive(Debug, Clone)]
pub enum ProviderReply {
    /// Found a usable profile.
    Hit(LeadProfile),
    /// Definitive miss — do not ask this provider again for this request.
    Miss,
    /// Provider is rate-limited; retry after the given delay.
    RateLimited { delay_ms: u64 },
}

/// Terminal outcome of an enrichment request, published on the event bus.
#[derive(Debug, Clone)]
pub enum EnrichOutcome {
    Resolved(LeadProfile),
    /// Every configured provider gave a definitive miss.
    Exhausted,
}

/// Completion signal from a throttler back to the originating sequencer.
#[derive(Debug, Clone)]
pub struct StepSignal {
    pub step_id: String,
    pub workflow_instance_id: String,
    pub outcome: StepOutcome,
}

/// How a work item ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    /// The action was barred; the step is abandoned but the run continues.
    Restricted(RestrictionKind),
}

/// Read contract for the UI status widget: what an account is doing now.
#[derive(Debug, Clone, Serialize)]
pub struct ThrottlerStatus {
    /// Action currently held by the executor, if any.
    pub in_flight: Option<String>,
    /// Next action that would be popped.
    pub next: Option<String>,
    pub queued: usize,
    pub delayed: usize,
}

/// One outbound email, queued for paced dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRequest {
    pub to: String,
    pub subject: String,
    pub html: String,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub attachment: Option<EmailAttachment>,
}

/// A single attachment, content base64-encoded for snapshot friendliness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    pub content_b64: String,
}

/// One tenant queued for subscription teardown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeardownRequest {
    pub tenant_id: String,
    pub requested_at: DateTime<Utc>,
}

impl TeardownRequest {
    pub fn new(tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            requested_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filler_band() {
        let step = WorkItem::step(
            "acc", "t1", "wi", "wd", "n1", "s1", "l1", "visit", "https://x/p", serde_json::Value::Null,
        );
        assert!(!step.is_filler());
        let plug = WorkItem::plug("acc", "t1", "like_post", -10);
        assert!(plug.is_filler());
        assert!(plug.ignore_lead_binding);
    }

    #[test]
    fn test_catalog_resolve() {
        let mut catalog = ToolCatalog::new();
        catalog.register("connect", "linkedin.send_invite");
        assert_eq!(catalog.resolve("connect"), Some("linkedin.send_invite"));
        assert_eq!(catalog.resolve("unknown"), None);
    }

    #[test]
    fn test_work_item_roundtrip() {
        let item = WorkItem::step(
            "acc", "t1", "wi", "wd", "n1", "s1", "l1", "msg", "https://x/p",
            serde_json::json!({"text": "hi"}),
        );
        let json = serde_json::to_string(&item).unwrap();
        let back: WorkItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back.step_id, "s1");
        assert_eq!(back.payload["text"], "hi");
    }
}
