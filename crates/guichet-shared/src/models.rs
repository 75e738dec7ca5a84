//! Domain model structs shared by the server store and the client cache.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can travel over
//! the HTTP API and the realtime event stream unchanged.

use std::collections::HashMap;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{
    CampaignId, CampaignStatus, ContactId, ConversationId, Direction, EnrollmentId,
    EnrollmentStatus, ListId, MessageChannel, MessageId, MessageStatus, OrgId, PropertyId,
    PropertyKind, Role, TaskId, TaskStatus, TemplateId, UserId, WorkflowId,
};

// ---------------------------------------------------------------------------
// Organization
// ---------------------------------------------------------------------------

/// A tenant.  Every other record carries this id and every query filters by it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Organization {
    pub id: OrgId,
    /// Display name shown in the workspace switcher.
    pub name: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A member account.  Credentials live in the server store and are never
/// part of this struct.  `org_id` stays empty between signup and
/// onboarding; such users land on the onboarding screen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub org_id: Option<OrgId>,
    /// Login identifier, globally unique.
    pub email: String,
    pub display_name: String,
    pub role: Role,
    /// Set once the signup-confirmation or invitation link is consumed.
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Integration
// ---------------------------------------------------------------------------

/// Connection state of a messaging provider for one organization.
/// Dispatch over a channel is refused until its provider is configured.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Integration {
    pub org_id: OrgId,
    /// Provider key, e.g. `whatsapp` or `email`.
    pub provider: String,
    pub configured: bool,
    pub connected_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

/// A CRM contact.  Besides the fixed columns it carries a free-form map of
/// organization-defined properties, all stored as strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub id: ContactId,
    pub org_id: OrgId,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    /// Pipeline stage tag, free-form.
    pub stage: Option<String>,
    /// Custom property values keyed by the property key.  Values are raw
    /// strings; interpretation is up to the property's declared kind.
    pub custom: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    /// Built-in field names addressable by segments and template bindings.
    pub const BUILTIN_FIELDS: [&'static str; 5] = ["name", "email", "phone", "company", "stage"];
}

// ---------------------------------------------------------------------------
// Property definition
// ---------------------------------------------------------------------------

/// Schema entry for a custom contact property.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PropertyDefinition {
    pub id: PropertyId,
    pub org_id: OrgId,
    /// Key under which values are stored in [`Contact::custom`].
    pub key: String,
    /// Label shown in the contact table header.
    pub label: String,
    pub kind: PropertyKind,
    /// Allowed values when `kind` is [`PropertyKind::Select`], empty otherwise.
    pub options: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Lists and segments
// ---------------------------------------------------------------------------

/// Comparison operator of a single segment predicate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
}

/// One predicate of a list's filter set.  A filter with an empty field or
/// empty value matches everything, so half-edited rows never hide contacts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SegmentFilter {
    /// Built-in field name or custom property key.
    pub field: String,
    pub comparison: Comparison,
    /// Right-hand side, always entered as text.
    pub value: String,
}

/// A contact list: conjunctive filters plus manual inclusions and
/// exclusions.  Membership is resolved on demand, never materialized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactList {
    pub id: ListId,
    pub org_id: OrgId,
    pub name: String,
    /// All filters must match (AND).  Empty means "match everyone".
    pub filters: Vec<SegmentFilter>,
    /// Contacts that belong regardless of the filters.
    pub included: Vec<ContactId>,
    /// Contacts marked inactive for this list.  Exclusion beats both the
    /// filters and a manual inclusion.
    pub excluded: Vec<ContactId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Conversations and messages
// ---------------------------------------------------------------------------

/// One inbox thread, 1:1 with a contact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub org_id: OrgId,
    pub contact_id: ContactId,
    /// Timestamp of the newest message, used for inbox ordering.
    pub last_message_at: Option<DateTime<Utc>>,
    /// Inbound messages not yet opened by an agent.
    pub unread_count: u32,
    pub created_at: DateTime<Utc>,
}

/// A single chat message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub org_id: OrgId,
    pub conversation_id: ConversationId,
    pub direction: Direction,
    pub body: String,
    pub status: MessageStatus,
    /// When the message was sent or received, as reported by the provider.
    /// Part of the realtime dedup key together with `id`.
    pub timestamp: DateTime<Utc>,
    /// Agent who sent an outbound message manually, if any.
    pub author_id: Option<UserId>,
    /// Set when the message was produced by a campaign send.
    pub campaign_id: Option<CampaignId>,
    /// Set when the message was produced by a workflow step.
    pub enrollment_id: Option<EnrollmentId>,
    /// Provider failure reason when `status` is failed.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message templates
// ---------------------------------------------------------------------------

/// A reusable message body with `{{variable}}` placeholders.  Synced
/// templates keep the provider's id in `remote_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageTemplate {
    pub id: TemplateId,
    pub org_id: OrgId,
    pub name: String,
    pub channel: MessageChannel,
    /// BCP 47 language tag, e.g. `en` or `fr`.
    pub language: String,
    pub body: String,
    /// Placeholder names in order of first appearance, without duplicates.
    /// Recomputed from `body` on every save.
    pub variables: Vec<String>,
    /// Provider-side template id when this template was synced.
    pub remote_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

/// Where the value for one template variable comes from at send time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BindingSource {
    /// Read from the contact: built-in field name or custom property key.
    ContactField(String),
    /// A literal value, identical for every recipient.
    Fixed(String),
}

/// Maps one placeholder of a template or step body to its value source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VariableBinding {
    /// Placeholder name, without braces.
    pub var: String,
    pub source: BindingSource,
}

/// A multi-step outbound sequence bound to one source list.  Contacts that
/// match the list while the workflow is active get enrolled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Workflow {
    pub id: WorkflowId,
    pub org_id: OrgId,
    pub name: String,
    /// The list whose members are enrolled.
    pub list_id: ListId,
    /// Only active workflows accept new enrollments and advance existing ones.
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One step of a workflow.  Positions are dense, starting at 1; deleting a
/// step renumbers the remainder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowStep {
    pub id: Uuid,
    pub workflow_id: WorkflowId,
    /// 1-based position within the workflow.
    pub position: u32,
    pub channel: MessageChannel,
    /// For template channels: the template to render.
    pub template_id: Option<TemplateId>,
    /// For email steps: subject line, may contain placeholders.
    pub subject: Option<String>,
    /// For email steps: free-form body, may contain placeholders.
    pub body: Option<String>,
    /// Value source for each placeholder the step's content uses.
    pub mappings: Vec<VariableBinding>,
    /// Days to wait after the previous step (0 for the first step = send
    /// as soon as the enrollment is picked up).
    pub delay_days: u32,
    /// Optional UTC time of day the send is aligned to.
    pub send_time: Option<NaiveTime>,
}

// ---------------------------------------------------------------------------
// Enrollments
// ---------------------------------------------------------------------------

/// A contact's progress through one workflow.  At most one active
/// enrollment exists per (workflow, contact) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Enrollment {
    pub id: EnrollmentId,
    pub org_id: OrgId,
    pub workflow_id: WorkflowId,
    pub contact_id: ContactId,
    pub status: EnrollmentStatus,
    /// Position of the last step sent, 0 before the first send.
    pub current_step: u32,
    /// When the next step is due.  `None` once the enrollment is terminal.
    pub next_send_at: Option<DateTime<Utc>>,
    /// Consecutive delivery failures for the current step.
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Campaigns
// ---------------------------------------------------------------------------

/// Per-campaign delivery counters.  They only ever increase; status
/// receipts arriving out of order must not decrement anything.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CampaignStats {
    pub sent: u32,
    pub delivered: u32,
    pub read: u32,
    pub failed: u32,
}

/// A one-shot bulk send to a fixed recipient set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Campaign {
    pub id: CampaignId,
    pub org_id: OrgId,
    pub name: String,
    pub channel: MessageChannel,
    /// Recipients frozen at compose time, from manual picks, a resolved
    /// list, or both.
    pub recipient_ids: Vec<ContactId>,
    /// For template channels: the template to render per recipient.
    pub template_id: Option<TemplateId>,
    /// For email campaigns: subject line.
    pub subject: Option<String>,
    /// For email campaigns: body, may contain placeholders.
    pub body: Option<String>,
    /// Value source for each placeholder the content uses.
    pub mappings: Vec<VariableBinding>,
    /// Launch time.  `None` while drafting an immediate send; the dispatch
    /// call stamps it, so every armed campaign has one.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: CampaignStatus,
    pub stats: CampaignStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// A kanban card, optionally tied to a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub org_id: OrgId,
    pub title: String,
    pub description: Option<String>,
    pub assignee_id: Option<UserId>,
    pub conversation_id: Option<ConversationId>,
    pub due_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
