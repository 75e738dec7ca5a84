//! v001 -- Initial schema creation.
//!
//! Creates every tenant-scoped table: organizations and members, the CRM
//! tables, the inbox tables, and the outbound machinery (templates,
//! workflows, enrollments, campaigns).

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Organizations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS organizations (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    name       TEXT NOT NULL,
    created_at TEXT NOT NULL                  -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Users (members)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id             TEXT PRIMARY KEY NOT NULL, -- UUID v4
    org_id         TEXT,                      -- NULL until onboarding completes
    email          TEXT NOT NULL UNIQUE,
    display_name   TEXT NOT NULL,
    role           TEXT NOT NULL,             -- admin | agent
    password_hash  TEXT,                      -- bcrypt; NULL until a password is set
    email_verified INTEGER NOT NULL DEFAULT 0,
    created_at     TEXT NOT NULL,

    FOREIGN KEY (org_id) REFERENCES organizations(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_users_org ON users(org_id);

-- ----------------------------------------------------------------
-- Integrations (provider connection state per organization)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS integrations (
    org_id       TEXT NOT NULL,
    provider     TEXT NOT NULL,               -- whatsapp | email
    configured   INTEGER NOT NULL DEFAULT 0,
    connected_at TEXT,

    PRIMARY KEY (org_id, provider),
    FOREIGN KEY (org_id) REFERENCES organizations(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Contacts
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contacts (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    org_id     TEXT NOT NULL,
    name       TEXT NOT NULL,
    email      TEXT,
    phone      TEXT,
    company    TEXT,
    stage      TEXT,
    custom     TEXT NOT NULL DEFAULT '{}',    -- JSON object: property key -> value
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (org_id) REFERENCES organizations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_contacts_org ON contacts(org_id);

-- ----------------------------------------------------------------
-- Custom property definitions
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS properties (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    org_id     TEXT NOT NULL,
    key        TEXT NOT NULL,
    label      TEXT NOT NULL,
    kind       TEXT NOT NULL,                 -- text | number | date | ...
    options    TEXT NOT NULL DEFAULT '[]',    -- JSON array, select kind only
    created_at TEXT NOT NULL,

    UNIQUE (org_id, key),
    FOREIGN KEY (org_id) REFERENCES organizations(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Contact lists (segments)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS lists (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    org_id     TEXT NOT NULL,
    name       TEXT NOT NULL,
    filters    TEXT NOT NULL DEFAULT '[]',    -- JSON array of predicates
    included   TEXT NOT NULL DEFAULT '[]',    -- JSON array of contact ids
    excluded   TEXT NOT NULL DEFAULT '[]',    -- JSON array of contact ids
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (org_id) REFERENCES organizations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_lists_org ON lists(org_id);

-- ----------------------------------------------------------------
-- Conversations (one inbox thread per contact)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id              TEXT PRIMARY KEY NOT NULL, -- UUID v4
    org_id          TEXT NOT NULL,
    contact_id      TEXT NOT NULL UNIQUE,
    last_message_at TEXT,
    unread_count    INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,

    FOREIGN KEY (org_id) REFERENCES organizations(id) ON DELETE CASCADE,
    FOREIGN KEY (contact_id) REFERENCES contacts(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_conversations_org_activity
    ON conversations(org_id, last_message_at DESC);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL, -- UUID v4
    org_id          TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    direction       TEXT NOT NULL,             -- inbound | outbound
    body            TEXT NOT NULL,
    status          TEXT NOT NULL,             -- pending | sent | delivered | read | failed
    timestamp       TEXT NOT NULL,             -- provider-reported time
    author_id       TEXT,                      -- agent who sent it manually
    campaign_id     TEXT,
    enrollment_id   TEXT,
    error           TEXT,
    created_at      TEXT NOT NULL,

    FOREIGN KEY (org_id) REFERENCES organizations(id) ON DELETE CASCADE,
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation_id, timestamp DESC);

-- ----------------------------------------------------------------
-- Message templates
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS templates (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    org_id     TEXT NOT NULL,
    name       TEXT NOT NULL,
    channel    TEXT NOT NULL,                 -- whatsapp_template | email
    language   TEXT NOT NULL,
    body       TEXT NOT NULL,
    variables  TEXT NOT NULL DEFAULT '[]',    -- JSON array, derived from body
    remote_id  TEXT,                          -- provider template id when synced
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (org_id) REFERENCES organizations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_templates_org ON templates(org_id);

-- ----------------------------------------------------------------
-- Workflows and steps
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS workflows (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    org_id     TEXT NOT NULL,
    name       TEXT NOT NULL,
    list_id    TEXT NOT NULL,                 -- source segment
    active     INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (org_id) REFERENCES organizations(id) ON DELETE CASCADE,
    FOREIGN KEY (list_id) REFERENCES lists(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_workflows_org ON workflows(org_id);

CREATE TABLE IF NOT EXISTS workflow_steps (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    workflow_id TEXT NOT NULL,
    position    INTEGER NOT NULL,             -- dense, 1-based
    channel     TEXT NOT NULL,
    template_id TEXT,
    subject     TEXT,
    body        TEXT,
    mappings    TEXT NOT NULL DEFAULT '[]',   -- JSON array of variable bindings
    delay_days  INTEGER NOT NULL DEFAULT 0,
    send_time   TEXT,                         -- HH:MM:SS, UTC

    UNIQUE (workflow_id, position),
    FOREIGN KEY (workflow_id) REFERENCES workflows(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Enrollments
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS enrollments (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    org_id       TEXT NOT NULL,
    workflow_id  TEXT NOT NULL,
    contact_id   TEXT NOT NULL,
    status       TEXT NOT NULL,               -- active | completed | failed | paused
    current_step INTEGER NOT NULL DEFAULT 0,  -- last step sent, 0 before the first
    next_send_at TEXT,
    retry_count  INTEGER NOT NULL DEFAULT 0,
    last_error   TEXT,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,

    FOREIGN KEY (org_id) REFERENCES organizations(id) ON DELETE CASCADE,
    FOREIGN KEY (workflow_id) REFERENCES workflows(id) ON DELETE CASCADE,
    FOREIGN KEY (contact_id) REFERENCES contacts(id) ON DELETE CASCADE
);

-- One live run per contact per workflow.
CREATE UNIQUE INDEX IF NOT EXISTS idx_enrollments_one_active
    ON enrollments(workflow_id, contact_id) WHERE status = 'active';

CREATE INDEX IF NOT EXISTS idx_enrollments_due
    ON enrollments(status, next_send_at);

-- ----------------------------------------------------------------
-- Campaigns
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS campaigns (
    id             TEXT PRIMARY KEY NOT NULL, -- UUID v4
    org_id         TEXT NOT NULL,
    name           TEXT NOT NULL,
    channel        TEXT NOT NULL,
    recipient_ids  TEXT NOT NULL DEFAULT '[]', -- JSON array, frozen at compose time
    template_id    TEXT,
    subject        TEXT,
    body           TEXT,
    mappings       TEXT NOT NULL DEFAULT '[]',
    scheduled_at   TEXT,
    status         TEXT NOT NULL,             -- draft | scheduled | sending | sent | failed
    stat_sent      INTEGER NOT NULL DEFAULT 0,
    stat_delivered INTEGER NOT NULL DEFAULT 0,
    stat_read      INTEGER NOT NULL DEFAULT 0,
    stat_failed    INTEGER NOT NULL DEFAULT 0,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,

    FOREIGN KEY (org_id) REFERENCES organizations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_campaigns_org ON campaigns(org_id);
CREATE INDEX IF NOT EXISTS idx_campaigns_due ON campaigns(status, scheduled_at);

-- ----------------------------------------------------------------
-- Tasks (kanban)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS tasks (
    id              TEXT PRIMARY KEY NOT NULL, -- UUID v4
    org_id          TEXT NOT NULL,
    title           TEXT NOT NULL,
    description     TEXT,
    assignee_id     TEXT,
    conversation_id TEXT,
    due_at          TEXT,
    status          TEXT NOT NULL,            -- todo | in_progress | done
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,

    FOREIGN KEY (org_id) REFERENCES organizations(id) ON DELETE CASCADE,
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_org ON tasks(org_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
