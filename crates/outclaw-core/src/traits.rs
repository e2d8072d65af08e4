//! Collaborator contracts — the narrow seams to everything the core does
//! not own: browser automation, the workflow catalog, lead persistence,
//! enrichment APIs, SMTP, and account administration.
//!
//! The orchestration core only ever talks to these traits; production
//! implementations live at the edges, tests inject fakes.

use crate::error::Result;
use crate::types::{
    EmailRequest, LeadProfile, PartialIdentity, ProgressResult, ProviderReply, Step, ToolCatalog,
    WorkItem, WorkingHoursState,
};
use async_trait::async_trait;

/// Source of per-account availability windows.
#[async_trait]
pub trait WorkingHoursSource: Send + Sync {
    async fn working_hours(&self, account_id: &str) -> Result<WorkingHoursState>;
}

/// Workflow definitions, tool registrations, and activity logging.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Ordered step list for one workflow node.
    async fn steps(&self, workflow_def_id: &str, node_id: &str) -> Result<Vec<Step>>;

    /// The static tool registration table.
    async fn tools(&self) -> Result<ToolCatalog>;

    /// All (account, node) pairs a campaign trigger fans out to.
    async fn campaign_targets(&self, workflow_def_id: &str) -> Result<Vec<CampaignTarget>>;

    /// Filler actions configured for an account (action names).
    async fn plug_actions(&self, account_id: &str) -> Result<Vec<String>>;

    /// Record a terminal activity entry for a lead/workflow/account triple.
    async fn save_activity(
        &self,
        lead_id: &str,
        tenant_id: &str,
        status: &str,
        account_id: &str,
    ) -> Result<()>;
}

/// One (account, node) pair a campaign runs against.
#[derive(Debug, Clone)]
pub struct CampaignTarget {
    pub account_id: String,
    pub node_id: String,
    pub lead_id: String,
    pub target_url: String,
}

/// Wraps the real browser automation. One call = one external action.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, item: &WorkItem) -> Result<ProgressResult>;
}

/// One ranked enrichment provider in the waterfall.
#[async_trait]
pub trait EnrichProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn enrich(&self, platform: &str, partial: &PartialIdentity) -> Result<ProviderReply>;
}

/// Lead persistence — creates or binds a discovered profile.
#[async_trait]
pub trait LeadSink: Send + Sync {
    async fn create_or_bind(
        &self,
        tenant_id: &str,
        workflow_def_id: &str,
        platform: &str,
        profile: &LeadProfile,
    ) -> Result<()>;
}

/// Outbound email transport.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, req: &EmailRequest) -> Result<()>;
}

/// Tenant administration used by subscription teardown.
#[async_trait]
pub trait SubscriptionAdmin: Send + Sync {
    async fn cancel_running_work(&self, tenant_id: &str) -> Result<()>;
    async fn disable_all_proxies(&self, tenant_id: &str) -> Result<()>;
    async fn disable_all_accounts(&self, tenant_id: &str) -> Result<()>;
    async fn delete_subscription_record(&self, tenant_id: &str) -> Result<()>;
}
