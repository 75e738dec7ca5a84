//! Background dispatch loop.
//!
//! One task owns all time-driven work: launching due campaigns, advancing
//! due workflow enrollments and enrolling contacts that newly match an
//! active workflow's list.  Routes nudge it over a command channel when a
//! user action should not wait for the next tick.
//!
//! Every send goes through [`crate::outbound::deliver`], so failures come
//! back as persisted `failed` messages rather than errors; the loop turns
//! them into retry schedules or terminal states.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use guichet_shared::constants::{ENROLLMENT_MAX_RETRIES, ENROLLMENT_RETRY_DELAY_SECS};
use guichet_shared::models::{Contact, Enrollment, VariableBinding, WorkflowStep};
use guichet_shared::types::{
    CampaignId, CampaignStatus, EnrollmentId, EnrollmentStatus, MessageChannel, MessageStatus,
    OrgId, WorkflowId,
};
use guichet_shared::{segment, template};
use guichet_store::{Database, StoreError};

use crate::error::ServerError;
use crate::outbound::{self, Outbound};
use crate::realtime::EventHub;
use crate::senders::SenderSet;

/// Work a route wants done ahead of the next tick.
#[derive(Debug)]
pub enum DispatchCommand {
    /// Launch a campaign now (it must already be in `scheduled` status).
    RunCampaign {
        org_id: OrgId,
        campaign_id: CampaignId,
    },
    /// Re-resolve one workflow's list and enroll new matches.
    SyncWorkflow {
        org_id: OrgId,
        workflow_id: WorkflowId,
    },
}

pub struct Dispatcher {
    db: Arc<Mutex<Database>>,
    hub: EventHub,
    senders: SenderSet,
}

impl Dispatcher {
    pub fn new(db: Arc<Mutex<Database>>, hub: EventHub, senders: SenderSet) -> Self {
        Self { db, hub, senders }
    }

    /// Run forever, ticking every `tick_secs` and draining commands as they
    /// arrive.
    pub fn spawn(
        self,
        tick_secs: u64,
        mut commands: mpsc::Receiver<DispatchCommand>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(tick_secs));
            info!(tick_secs, "Dispatcher started");
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.tick(Utc::now()).await;
                    }
                    cmd = commands.recv() => {
                        match cmd {
                            Some(cmd) => self.handle_command(cmd).await,
                            None => {
                                info!("Dispatcher command channel closed, stopping");
                                return;
                            }
                        }
                    }
                }
            }
        })
    }

    pub async fn handle_command(&self, cmd: DispatchCommand) {
        match cmd {
            DispatchCommand::RunCampaign {
                org_id,
                campaign_id,
            } => {
                if let Err(e) = self.run_campaign(org_id, campaign_id).await {
                    warn!(campaign = %campaign_id, error = %e, "Campaign run failed");
                }
            }
            DispatchCommand::SyncWorkflow {
                org_id,
                workflow_id,
            } => {
                if let Err(e) = self.sync_workflow(org_id, workflow_id, Utc::now()).await {
                    warn!(workflow = %workflow_id, error = %e, "Workflow sync failed");
                }
            }
        }
    }

    /// One pass over everything that is due at `now`.
    pub async fn tick(&self, now: DateTime<Utc>) {
        if let Err(e) = self.sync_all_workflows(now).await {
            warn!(error = %e, "Enrollment sync pass failed");
        }
        if let Err(e) = self.process_due_campaigns(now).await {
            warn!(error = %e, "Campaign pass failed");
        }
        if let Err(e) = self.process_due_enrollments(now).await {
            warn!(error = %e, "Enrollment pass failed");
        }
    }

    // -----------------------------------------------------------------------
    // Campaigns
    // -----------------------------------------------------------------------

    async fn process_due_campaigns(&self, now: DateTime<Utc>) -> Result<(), ServerError> {
        let due = {
            let db = self.db.lock().await;
            db.list_due_campaigns(now)?
        };

        for campaign in due {
            if let Err(e) = self.run_campaign(campaign.org_id, campaign.id).await {
                warn!(campaign = %campaign.id, error = %e, "Campaign run failed");
            }
        }
        Ok(())
    }

    /// Send a campaign to every recipient and settle its terminal status.
    pub async fn run_campaign(
        &self,
        org_id: OrgId,
        campaign_id: CampaignId,
    ) -> Result<(), ServerError> {
        // Claiming the campaign also guards against double launches: once
        // it is terminal the status update refuses to move it.
        let (campaign, template_body) = {
            let db = self.db.lock().await;
            let campaign = db.get_campaign(org_id, campaign_id)?;
            if !db.set_campaign_status(org_id, campaign_id, CampaignStatus::Sending)? {
                debug!(campaign = %campaign_id, "Campaign already terminal, skipping");
                return Ok(());
            }
            let template_body = match campaign.template_id {
                Some(template_id) => Some(db.get_template(org_id, template_id)?.body),
                None => None,
            };
            (campaign, template_body)
        };

        let mut sent = 0u32;
        let mut attempted = 0u32;

        for contact_id in &campaign.recipient_ids {
            let contact = {
                let db = self.db.lock().await;
                match db.get_contact(org_id, *contact_id) {
                    Ok(contact) => contact,
                    Err(StoreError::NotFound) => {
                        debug!(contact = %contact_id, "Recipient deleted since compose, skipping");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            };
            attempted += 1;

            let (subject, body) = match render_content(
                campaign.channel,
                template_body.as_deref(),
                campaign.subject.as_deref(),
                campaign.body.as_deref(),
                &campaign.mappings,
                &contact,
            ) {
                Ok(rendered) => rendered,
                Err(reason) => {
                    warn!(campaign = %campaign_id, error = %reason, "Campaign content unusable");
                    let db = self.db.lock().await;
                    db.set_campaign_status(org_id, campaign_id, CampaignStatus::Failed)?;
                    return Ok(());
                }
            };

            let outbound = Outbound {
                org_id,
                channel: campaign.channel,
                subject,
                body,
                author_id: None,
                campaign_id: Some(campaign_id),
                enrollment_id: None,
            };
            let message =
                outbound::deliver(&self.db, &self.hub, &self.senders, &contact, &outbound)
                    .await?;

            let db = self.db.lock().await;
            if message.status == MessageStatus::Sent {
                sent += 1;
                db.bump_campaign_stat(org_id, campaign_id, MessageStatus::Sent)?;
            } else {
                db.bump_campaign_stat(org_id, campaign_id, MessageStatus::Failed)?;
            }
        }

        let final_status = if sent > 0 {
            CampaignStatus::Sent
        } else {
            CampaignStatus::Failed
        };
        {
            let db = self.db.lock().await;
            db.set_campaign_status(org_id, campaign_id, final_status)?;
        }
        info!(
            campaign = %campaign_id,
            attempted,
            sent,
            status = final_status.as_str(),
            "Campaign finished"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Workflow enrollments
    // -----------------------------------------------------------------------

    async fn process_due_enrollments(&self, now: DateTime<Utc>) -> Result<(), ServerError> {
        let due = {
            let db = self.db.lock().await;
            db.list_due_enrollments(now, 100)?
        };

        for enrollment in due {
            if let Err(e) = self.advance_enrollment(&enrollment, now).await {
                warn!(enrollment = %enrollment.id, error = %e, "Enrollment advance failed");
            }
        }
        Ok(())
    }

    /// Send the enrollment's next step and reschedule or settle it.
    async fn advance_enrollment(
        &self,
        enrollment: &Enrollment,
        now: DateTime<Utc>,
    ) -> Result<(), ServerError> {
        let org_id = enrollment.org_id;
        let next_position = enrollment.current_step + 1;

        let (step, contact, template_body) = {
            let db = self.db.lock().await;

            let workflow = match db.get_workflow(org_id, enrollment.workflow_id) {
                Ok(workflow) => workflow,
                Err(StoreError::NotFound) => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            // Deactivated workflows hold their enrollments in place.
            if !workflow.active {
                return Ok(());
            }

            let step = match db.get_step_at(org_id, enrollment.workflow_id, next_position) {
                Ok(step) => step,
                Err(StoreError::NotFound) => {
                    // Steps were removed under the enrollment; there is
                    // nothing left to send.  Release the guard first, the
                    // settle call takes its own.
                    drop(db);
                    self.settle(enrollment, EnrollmentStatus::Completed, None, 0, None)
                        .await?;
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            let contact = match db.get_contact(org_id, enrollment.contact_id) {
                Ok(contact) => contact,
                Err(StoreError::NotFound) => {
                    drop(db);
                    self.settle(
                        enrollment,
                        EnrollmentStatus::Failed,
                        None,
                        enrollment.retry_count,
                        Some("Contact deleted".to_string()),
                    )
                    .await?;
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            let template_body = match step.template_id {
                Some(template_id) => Some(db.get_template(org_id, template_id)?.body),
                None => None,
            };

            (step, contact, template_body)
        };

        let (subject, body) = match render_content(
            step.channel,
            template_body.as_deref(),
            step.subject.as_deref(),
            step.body.as_deref(),
            &step.mappings,
            &contact,
        ) {
            Ok(rendered) => rendered,
            Err(reason) => {
                self.record_failure(enrollment, now, reason).await?;
                return Ok(());
            }
        };

        let outbound = Outbound {
            org_id,
            channel: step.channel,
            subject,
            body,
            author_id: None,
            campaign_id: None,
            enrollment_id: Some(enrollment.id),
        };
        let message =
            outbound::deliver(&self.db, &self.hub, &self.senders, &contact, &outbound).await?;

        if message.status == MessageStatus::Sent {
            let following = {
                let db = self.db.lock().await;
                match db.get_step_at(org_id, enrollment.workflow_id, next_position + 1) {
                    Ok(step) => Some(step),
                    Err(StoreError::NotFound) => None,
                    Err(e) => return Err(e.into()),
                }
            };
            match following {
                Some(next_step) => {
                    let mut updated = enrollment.clone();
                    updated.current_step = next_position;
                    updated.next_send_at = Some(schedule_for(&next_step, now));
                    updated.retry_count = 0;
                    updated.last_error = None;
                    updated.updated_at = Utc::now();
                    let db = self.db.lock().await;
                    db.update_enrollment(&updated)?;
                }
                None => {
                    self.settle(
                        enrollment,
                        EnrollmentStatus::Completed,
                        Some(next_position),
                        0,
                        None,
                    )
                    .await?;
                }
            }
        } else {
            let reason = message
                .error
                .unwrap_or_else(|| "Send failed".to_string());
            self.record_failure(enrollment, now, reason).await?;
        }
        Ok(())
    }

    /// Count a failed step send: schedule a retry, or give up after
    /// [`ENROLLMENT_MAX_RETRIES`] consecutive failures.
    async fn record_failure(
        &self,
        enrollment: &Enrollment,
        now: DateTime<Utc>,
        reason: String,
    ) -> Result<(), ServerError> {
        let retry_count = enrollment.retry_count + 1;
        if retry_count >= ENROLLMENT_MAX_RETRIES {
            info!(
                enrollment = %enrollment.id,
                retries = retry_count,
                "Enrollment exhausted its retries"
            );
            self.settle(
                enrollment,
                EnrollmentStatus::Failed,
                None,
                retry_count,
                Some(reason),
            )
            .await
        } else {
            let mut updated = enrollment.clone();
            updated.retry_count = retry_count;
            updated.next_send_at = Some(now + Duration::seconds(ENROLLMENT_RETRY_DELAY_SECS));
            updated.last_error = Some(reason);
            updated.updated_at = Utc::now();
            let db = self.db.lock().await;
            db.update_enrollment(&updated)?;
            Ok(())
        }
    }

    /// Write a terminal or otherwise final enrollment state.
    async fn settle(
        &self,
        enrollment: &Enrollment,
        status: EnrollmentStatus,
        current_step: Option<u32>,
        retry_count: u32,
        last_error: Option<String>,
    ) -> Result<(), ServerError> {
        let mut updated = enrollment.clone();
        updated.status = status;
        if let Some(step) = current_step {
            updated.current_step = step;
        }
        updated.next_send_at = None;
        updated.retry_count = retry_count;
        updated.last_error = last_error;
        updated.updated_at = Utc::now();
        let db = self.db.lock().await;
        db.update_enrollment(&updated)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Enrollment creation
    // -----------------------------------------------------------------------

    async fn sync_all_workflows(&self, now: DateTime<Utc>) -> Result<(), ServerError> {
        let workflows = {
            let db = self.db.lock().await;
            db.list_active_workflows()?
        };
        for workflow in workflows {
            if let Err(e) = self.sync_workflow(workflow.org_id, workflow.id, now).await {
                warn!(workflow = %workflow.id, error = %e, "Workflow sync failed");
            }
        }
        Ok(())
    }

    /// Enroll contacts that match the workflow's list and have never been
    /// enrolled in it.  Contacts with a past (terminal or paused) run are
    /// not re-entered automatically; that takes an explicit enroll call.
    pub async fn sync_workflow(
        &self,
        org_id: OrgId,
        workflow_id: WorkflowId,
        now: DateTime<Utc>,
    ) -> Result<usize, ServerError> {
        let db = self.db.lock().await;

        let workflow = db.get_workflow(org_id, workflow_id)?;
        if !workflow.active {
            return Ok(0);
        }
        let steps = db.list_steps(org_id, workflow_id)?;
        let Some(first_step) = steps.first() else {
            return Ok(0);
        };

        let list = match db.get_list(org_id, workflow.list_id) {
            Ok(list) => list,
            Err(StoreError::NotFound) => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let contacts = db.list_contacts(org_id)?;
        let members = segment::resolve_members(&list, &contacts);

        let already_enrolled: HashSet<_> = db
            .list_enrollments(org_id, workflow_id)?
            .into_iter()
            .map(|e| e.contact_id)
            .collect();

        let mut created = 0;
        for contact_id in members {
            if already_enrolled.contains(&contact_id) {
                continue;
            }
            let enrollment = Enrollment {
                id: EnrollmentId::new(),
                org_id,
                workflow_id,
                contact_id,
                status: EnrollmentStatus::Active,
                current_step: 0,
                next_send_at: Some(schedule_for(first_step, now)),
                retry_count: 0,
                last_error: None,
                created_at: now,
                updated_at: now,
            };
            db.insert_enrollment(&enrollment)?;
            created += 1;
        }

        if created > 0 {
            info!(workflow = %workflow_id, created, "Enrolled new list members");
        }
        Ok(created)
    }
}

// ---------------------------------------------------------------------------
// Scheduling and rendering helpers
// ---------------------------------------------------------------------------

/// When a step becomes due, counting from `after`: the step's delay in
/// days, then aligned forward to its time of day when one is set.
pub fn schedule_for(step: &WorkflowStep, after: DateTime<Utc>) -> DateTime<Utc> {
    let base = after + Duration::days(i64::from(step.delay_days));
    match step.send_time {
        Some(time) => {
            let aligned = base.date_naive().and_time(time).and_utc();
            if aligned < base {
                aligned + Duration::days(1)
            } else {
                aligned
            }
        }
        None => base,
    }
}

/// Render one recipient's subject and body.  Returns a reason when the
/// channel's required content is missing.
fn render_content(
    channel: MessageChannel,
    template_body: Option<&str>,
    subject: Option<&str>,
    body: Option<&str>,
    mappings: &[VariableBinding],
    contact: &Contact,
) -> Result<(Option<String>, String), String> {
    let values = template::resolve_bindings(mappings, contact);
    match channel {
        MessageChannel::WhatsappTemplate => {
            let raw = template_body.ok_or_else(|| "No template selected".to_string())?;
            Ok((None, template::render(raw, &values)))
        }
        MessageChannel::Email => {
            let raw = body.ok_or_else(|| "No email body".to_string())?;
            let subject = subject.map(|s| template::render(s, &values));
            Ok((subject, template::render(raw, &values)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::senders::testing::RecordingSender;
    use chrono::NaiveTime;
    use guichet_shared::models::{
        BindingSource, Campaign, CampaignStats, Contact, ContactList, Organization,
        SegmentFilter, Workflow,
    };
    use guichet_shared::models::Comparison;
    use guichet_shared::types::{ContactId, ListId};
    use std::sync::Arc;

    struct Harness {
        dispatcher: Dispatcher,
        db: Arc<Mutex<Database>>,
        email: Arc<RecordingSender>,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("dispatch.db")).unwrap();
        let db = Arc::new(Mutex::new(db));
        let email = Arc::new(RecordingSender::new("email"));
        let whatsapp = Arc::new(RecordingSender::new("whatsapp"));
        let senders = SenderSet {
            whatsapp,
            email: email.clone(),
            catalog: Arc::new(crate::senders::SandboxCatalog),
        };
        let dispatcher = Dispatcher::new(db.clone(), EventHub::new(), senders);
        Harness {
            dispatcher,
            db,
            email,
            _dir: dir,
        }
    }

    fn organization(org: OrgId) -> Organization {
        Organization {
            id: org,
            name: "Acme".to_string(),
            created_at: Utc::now(),
        }
    }

    fn contact(org: OrgId, name: &str, email: &str) -> Contact {
        Contact {
            id: ContactId::new(),
            org_id: org,
            name: name.to_string(),
            email: Some(email.to_string()),
            phone: None,
            company: None,
            stage: None,
            custom: Default::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn email_campaign(org: OrgId, recipients: Vec<ContactId>) -> Campaign {
        Campaign {
            id: CampaignId::new(),
            org_id: org,
            name: "Launch".to_string(),
            channel: MessageChannel::Email,
            recipient_ids: recipients,
            template_id: None,
            subject: Some("Hello {{name}}".to_string()),
            body: Some("Hi {{name}}, welcome aboard.".to_string()),
            mappings: vec![VariableBinding {
                var: "name".to_string(),
                source: BindingSource::ContactField("name".to_string()),
            }],
            // Due scans only pick up campaigns with a launch time; routes
            // run immediate sends through a RunCampaign command instead.
            scheduled_at: Some(Utc::now() - Duration::seconds(5)),
            status: CampaignStatus::Scheduled,
            stats: CampaignStats::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn email_workflow(org: OrgId, list: ListId, delays: &[u32]) -> (Workflow, Vec<WorkflowStep>) {
        let workflow = Workflow {
            id: WorkflowId::new(),
            org_id: org,
            name: "Drip".to_string(),
            list_id: list,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let steps = delays
            .iter()
            .enumerate()
            .map(|(i, delay)| WorkflowStep {
                id: uuid::Uuid::new_v4(),
                workflow_id: workflow.id,
                position: (i + 1) as u32,
                channel: MessageChannel::Email,
                template_id: None,
                subject: Some(format!("Step {}", i + 1)),
                body: Some(format!("Body {} for {{{{name}}}}", i + 1)),
                mappings: vec![VariableBinding {
                    var: "name".to_string(),
                    source: BindingSource::ContactField("name".to_string()),
                }],
                delay_days: *delay,
                send_time: None,
            })
            .collect();
        (workflow, steps)
    }

    fn everyone_list(org: OrgId) -> ContactList {
        ContactList {
            id: ListId::new(),
            org_id: org,
            name: "Everyone".to_string(),
            filters: vec![],
            included: vec![],
            excluded: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn campaign_renders_per_recipient_and_settles_sent() {
        let h = harness();
        let org = OrgId::new();
        let ada = contact(org, "Ada", "ada@example.com");
        let bob = contact(org, "Bob", "bob@example.com");
        let campaign = email_campaign(org, vec![ada.id, bob.id]);
        {
            let db = h.db.lock().await;
            db.insert_organization(&organization(org)).unwrap();
            db.insert_contact(&ada).unwrap();
            db.insert_contact(&bob).unwrap();
            db.insert_campaign(&campaign).unwrap();
        }

        h.dispatcher.tick(Utc::now()).await;

        let sent = h.email.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].subject.as_deref(), Some("Hello Ada"));
        assert_eq!(sent[0].body, "Hi Ada, welcome aboard.");
        assert_eq!(sent[1].subject.as_deref(), Some("Hello Bob"));
        drop(sent);

        let db = h.db.lock().await;
        let reloaded = db.get_campaign(org, campaign.id).unwrap();
        assert_eq!(reloaded.status, CampaignStatus::Sent);
        assert_eq!(reloaded.stats.sent, 2);
        assert_eq!(reloaded.stats.failed, 0);
    }

    #[tokio::test]
    async fn campaign_with_no_successful_send_fails() {
        let h = harness();
        let org = OrgId::new();
        let ada = contact(org, "Ada", "ada@example.com");
        let campaign = email_campaign(org, vec![ada.id]);
        {
            let db = h.db.lock().await;
            db.insert_organization(&organization(org)).unwrap();
            db.insert_contact(&ada).unwrap();
            db.insert_campaign(&campaign).unwrap();
        }
        h.email.set_failure("smtp down");

        h.dispatcher.tick(Utc::now()).await;

        let db = h.db.lock().await;
        let reloaded = db.get_campaign(org, campaign.id).unwrap();
        assert_eq!(reloaded.status, CampaignStatus::Failed);
        assert_eq!(reloaded.stats.sent, 0);
        assert_eq!(reloaded.stats.failed, 1);
    }

    #[tokio::test]
    async fn campaign_run_is_not_repeated_once_terminal() {
        let h = harness();
        let org = OrgId::new();
        let ada = contact(org, "Ada", "ada@example.com");
        let campaign = email_campaign(org, vec![ada.id]);
        {
            let db = h.db.lock().await;
            db.insert_organization(&organization(org)).unwrap();
            db.insert_contact(&ada).unwrap();
            db.insert_campaign(&campaign).unwrap();
        }

        h.dispatcher.tick(Utc::now()).await;
        // A stray launch command after the run must not send again.
        h.dispatcher.run_campaign(org, campaign.id).await.unwrap();

        assert_eq!(h.email.sent_count(), 1);
        let db = h.db.lock().await;
        let reloaded = db.get_campaign(org, campaign.id).unwrap();
        assert_eq!(reloaded.stats.sent, 1);
    }

    #[tokio::test]
    async fn scan_enrolls_list_members_exactly_once() {
        let h = harness();
        let org = OrgId::new();
        let ada = contact(org, "Ada", "ada@example.com");
        let list = ContactList {
            filters: vec![SegmentFilter {
                field: "name".to_string(),
                comparison: Comparison::Equals,
                value: "Ada".to_string(),
            }],
            ..everyone_list(org)
        };
        let (workflow, steps) = email_workflow(org, list.id, &[0, 2]);
        {
            let mut db = h.db.lock().await;
            db.insert_organization(&organization(org)).unwrap();
            db.insert_contact(&ada).unwrap();
            db.insert_list(&list).unwrap();
            db.insert_workflow(&workflow).unwrap();
            db.replace_steps(org, workflow.id, &steps).unwrap();
        }

        let now = Utc::now();
        let created = h.dispatcher.sync_workflow(org, workflow.id, now).await.unwrap();
        assert_eq!(created, 1);

        // A second scan finds the existing enrollment and adds nothing.
        let created = h.dispatcher.sync_workflow(org, workflow.id, now).await.unwrap();
        assert_eq!(created, 0);

        let db = h.db.lock().await;
        let enrollments = db.list_enrollments(org, workflow.id).unwrap();
        assert_eq!(enrollments.len(), 1);
        assert_eq!(enrollments[0].contact_id, ada.id);
        assert_eq!(enrollments[0].status, EnrollmentStatus::Active);
        assert_eq!(enrollments[0].current_step, 0);
    }

    #[tokio::test]
    async fn enrollment_advances_through_steps_to_completion() {
        let h = harness();
        let org = OrgId::new();
        let ada = contact(org, "Ada", "ada@example.com");
        let list = everyone_list(org);
        let (workflow, steps) = email_workflow(org, list.id, &[0, 0]);
        {
            let mut db = h.db.lock().await;
            db.insert_organization(&organization(org)).unwrap();
            db.insert_contact(&ada).unwrap();
            db.insert_list(&list).unwrap();
            db.insert_workflow(&workflow).unwrap();
            db.replace_steps(org, workflow.id, &steps).unwrap();
        }

        let t0 = Utc::now();
        h.dispatcher.sync_workflow(org, workflow.id, t0).await.unwrap();

        // First due pass sends step 1 and schedules step 2.
        h.dispatcher.tick(t0 + Duration::seconds(1)).await;
        {
            let db = h.db.lock().await;
            let e = &db.list_enrollments(org, workflow.id).unwrap()[0];
            assert_eq!(e.status, EnrollmentStatus::Active);
            assert_eq!(e.current_step, 1);
            assert!(e.next_send_at.is_some());
        }

        // Second pass sends step 2 and completes the run.
        h.dispatcher.tick(t0 + Duration::seconds(2)).await;
        let db = h.db.lock().await;
        let e = &db.list_enrollments(org, workflow.id).unwrap()[0];
        assert_eq!(e.status, EnrollmentStatus::Completed);
        assert_eq!(e.current_step, 2);
        assert!(e.next_send_at.is_none());

        let sent = h.email.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].body, "Body 1 for Ada");
        assert_eq!(sent[1].body, "Body 2 for Ada");
    }

    #[tokio::test]
    async fn failed_step_retries_then_gives_up() {
        let h = harness();
        let org = OrgId::new();
        let ada = contact(org, "Ada", "ada@example.com");
        let list = everyone_list(org);
        let (workflow, steps) = email_workflow(org, list.id, &[0]);
        {
            let mut db = h.db.lock().await;
            db.insert_organization(&organization(org)).unwrap();
            db.insert_contact(&ada).unwrap();
            db.insert_list(&list).unwrap();
            db.insert_workflow(&workflow).unwrap();
            db.replace_steps(org, workflow.id, &steps).unwrap();
        }
        h.email.set_failure("mailbox full");

        let t0 = Utc::now();
        h.dispatcher.sync_workflow(org, workflow.id, t0).await.unwrap();

        let mut now = t0 + Duration::seconds(1);
        h.dispatcher.tick(now).await;
        {
            let db = h.db.lock().await;
            let e = &db.list_enrollments(org, workflow.id).unwrap()[0];
            assert_eq!(e.status, EnrollmentStatus::Active);
            assert_eq!(e.retry_count, 1);
            assert_eq!(e.last_error.as_deref(), Some("Provider rejected the message: mailbox full"));
            let due = e.next_send_at.unwrap();
            assert!(due > now);
        }

        // Each retry waits out the delay, then fails again.
        for expected_retry in 2..=ENROLLMENT_MAX_RETRIES {
            now = now + Duration::seconds(ENROLLMENT_RETRY_DELAY_SECS + 1);
            h.dispatcher.tick(now).await;
            let db = h.db.lock().await;
            let e = &db.list_enrollments(org, workflow.id).unwrap()[0];
            assert_eq!(e.retry_count, expected_retry);
        }

        let db = h.db.lock().await;
        let e = &db.list_enrollments(org, workflow.id).unwrap()[0];
        assert_eq!(e.status, EnrollmentStatus::Failed);
        assert!(e.next_send_at.is_none());
    }

    #[tokio::test]
    async fn inactive_workflow_neither_enrolls_nor_advances() {
        let h = harness();
        let org = OrgId::new();
        let ada = contact(org, "Ada", "ada@example.com");
        let list = everyone_list(org);
        let (mut workflow, steps) = email_workflow(org, list.id, &[0]);
        {
            let mut db = h.db.lock().await;
            db.insert_organization(&organization(org)).unwrap();
            db.insert_contact(&ada).unwrap();
            db.insert_list(&list).unwrap();
            db.insert_workflow(&workflow).unwrap();
            db.replace_steps(org, workflow.id, &steps).unwrap();
        }

        let t0 = Utc::now();
        h.dispatcher.sync_workflow(org, workflow.id, t0).await.unwrap();

        // Deactivate after the enrollment exists, then tick.
        workflow.active = false;
        workflow.updated_at = Utc::now();
        let eve = contact(org, "Eve", "eve@example.com");
        {
            let db = h.db.lock().await;
            db.update_workflow(&workflow).unwrap();
            db.insert_contact(&eve).unwrap();
        }
        h.dispatcher.tick(t0 + Duration::seconds(1)).await;

        assert_eq!(h.email.sent_count(), 0);
        let db = h.db.lock().await;
        let enrollments = db.list_enrollments(org, workflow.id).unwrap();
        // Eve matches the list but arrived after deactivation.
        assert_eq!(enrollments.len(), 1);
        assert_eq!(enrollments[0].status, EnrollmentStatus::Active);
        assert_eq!(enrollments[0].current_step, 0);
    }

    #[test]
    fn schedule_aligns_to_send_time() {
        let step = WorkflowStep {
            id: uuid::Uuid::new_v4(),
            workflow_id: WorkflowId::new(),
            position: 1,
            channel: MessageChannel::Email,
            template_id: None,
            subject: None,
            body: Some("x".to_string()),
            mappings: vec![],
            delay_days: 1,
            send_time: Some(NaiveTime::from_hms_opt(9, 0, 0).unwrap()),
        };
        let after = DateTime::parse_from_rfc3339("2026-03-10T15:30:00Z")
            .unwrap()
            .with_timezone(&Utc);

        // Base lands at 15:30 the next day; 09:00 already passed, so the
        // send rolls to the morning after.
        let due = schedule_for(&step, after);
        assert_eq!(due.to_rfc3339(), "2026-03-12T09:00:00+00:00");

        let plain = WorkflowStep {
            send_time: None,
            ..step
        };
        assert_eq!(schedule_for(&plain, after), after + Duration::days(1));
    }
}
