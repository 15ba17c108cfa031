//! Background loops: scheduled-trigger evaluation and SLA deadline
//! monitoring.
//!
//! Each loop runs on its own interval with a re-entrancy guard, so a slow
//! tick is skipped rather than stacked. Per-definition and per-ticket
//! failures are isolated; one bad row never stops the sweep.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::core::RuntimeContext;
use crate::engine::{ExecuteRequest, WorkflowEngine};
use crate::model::{ScheduleSpec, TriggerType};
use crate::store::{DefinitionStore, NotificationSender, SlaStore, UserDirectory};

/// Scheduled-trigger sweep cadence.
pub const TRIGGER_INTERVAL: Duration = Duration::from_secs(60);
/// SLA deadline sweep cadence.
pub const SLA_INTERVAL: Duration = Duration::from_secs(300);
/// Tickets whose first-response deadline falls inside this window get a
/// warning.
pub const RESPONSE_WARNING_WINDOW_HOURS: i64 = 2;
/// Tickets whose resolution deadline falls inside this window get a
/// warning.
pub const RESOLUTION_WARNING_WINDOW_HOURS: i64 = 4;
/// Below this many minutes remaining, the assignee's manager is pulled in.
pub const MANAGER_ESCALATION_MINUTES: i64 = 30;

/// Whether a schedule is due at `now`, given when it last fired.
fn schedule_due(spec: &ScheduleSpec, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match spec {
        ScheduleSpec::Interval { minutes } => last
            .map(|l| now - l >= ChronoDuration::minutes(*minutes as i64))
            .unwrap_or(true),
        ScheduleSpec::Daily { hour, minute } => {
            now.hour() == *hour
                && now.minute() == *minute
                && last.map(|l| l.date_naive() != now.date_naive()).unwrap_or(true)
        }
        ScheduleSpec::Weekly { weekday, hour } => {
            now.weekday().num_days_from_monday() == *weekday
                && now.hour() == *hour
                && last.map(|l| l.date_naive() != now.date_naive()).unwrap_or(true)
        }
    }
}

struct TriggerInner {
    definitions: Arc<dyn DefinitionStore>,
    engine: WorkflowEngine,
    runtime: RuntimeContext,
    running: AtomicBool,
    last_triggered: Mutex<HashMap<String, DateTime<Utc>>>,
}

/// Fires `scheduled` definitions whose schedule matches the current tick.
#[derive(Clone)]
pub struct TriggerScheduler {
    inner: Arc<TriggerInner>,
}

impl TriggerScheduler {
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        engine: WorkflowEngine,
        runtime: RuntimeContext,
    ) -> Self {
        TriggerScheduler {
            inner: Arc::new(TriggerInner {
                definitions,
                engine,
                runtime,
                running: AtomicBool::new(false),
                last_triggered: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn start(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TRIGGER_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                scheduler.tick_once().await;
            }
        })
    }

    /// One sweep over the active scheduled definitions. Skipped entirely if
    /// a previous sweep is still in flight.
    pub async fn tick_once(&self) {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("trigger sweep already running, skipping tick");
            return;
        }
        let now = self.inner.runtime.now();
        let definitions = self.inner.definitions.list_active(TriggerType::Scheduled).await;
        for definition in definitions {
            let Some(spec) = &definition.schedule else {
                continue;
            };
            let last = self.inner.last_triggered.lock().get(&definition.id).copied();
            if !schedule_due(spec, last, now) {
                continue;
            }
            self.inner
                .last_triggered
                .lock()
                .insert(definition.id.clone(), now);
            let request = ExecuteRequest::new(
                &definition.id,
                json!({"scheduled_at": now.to_rfc3339()}),
            )
            .triggered_by("scheduler");
            match self.inner.engine.execute_workflow(request).await {
                Ok(execution) => {
                    tracing::info!(
                        definition_id = %definition.id,
                        execution_id = %execution.id,
                        "scheduled workflow triggered"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        definition_id = %definition.id,
                        error = %err,
                        "scheduled workflow failed to trigger"
                    );
                }
            }
        }
        self.inner.running.store(false, Ordering::SeqCst);
    }
}

struct SlaInner {
    sla: Arc<dyn SlaStore>,
    definitions: Arc<dyn DefinitionStore>,
    engine: WorkflowEngine,
    notifier: Arc<dyn NotificationSender>,
    directory: Arc<dyn UserDirectory>,
    runtime: RuntimeContext,
    running: AtomicBool,
    /// Tickets already warned this process lifetime.
    warned: Mutex<HashSet<String>>,
}

/// Watches approaching SLA deadlines. A tenant with an `sla_warning`
/// definition gets a workflow execution per at-risk ticket; everyone else
/// gets the built-in notification escalation.
#[derive(Clone)]
pub struct SlaMonitor {
    inner: Arc<SlaInner>,
}

impl SlaMonitor {
    pub fn new(
        sla: Arc<dyn SlaStore>,
        definitions: Arc<dyn DefinitionStore>,
        engine: WorkflowEngine,
        notifier: Arc<dyn NotificationSender>,
        directory: Arc<dyn UserDirectory>,
        runtime: RuntimeContext,
    ) -> Self {
        SlaMonitor {
            inner: Arc::new(SlaInner {
                sla,
                definitions,
                engine,
                notifier,
                directory,
                runtime,
                running: AtomicBool::new(false),
                warned: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn start(&self) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SLA_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                monitor.tick_once().await;
            }
        })
    }

    pub async fn tick_once(&self) {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("SLA sweep already running, skipping tick");
            return;
        }
        let now = self.inner.runtime.now();
        let records = self
            .inner
            .sla
            .due_within(
                now,
                ChronoDuration::hours(RESPONSE_WARNING_WINDOW_HOURS),
                ChronoDuration::hours(RESOLUTION_WARNING_WINDOW_HOURS),
            )
            .await;
        for record in records {
            if !self.inner.warned.lock().insert(record.ticket_id.clone()) {
                continue;
            }
            if let Err(err) = self.warn(&record, now).await {
                tracing::warn!(
                    ticket_id = %record.ticket_id,
                    error = %err,
                    "SLA warning failed"
                );
            }
        }
        self.inner.running.store(false, Ordering::SeqCst);
    }

    async fn warn(
        &self,
        record: &crate::store::SlaRecord,
        now: DateTime<Utc>,
    ) -> crate::error::WorkflowResult<()> {
        let minutes_remaining = record.minutes_remaining(now).unwrap_or(0);
        if let Some(definition) = self
            .inner
            .definitions
            .find_for_tenant(&record.tenant_id, TriggerType::SlaWarning)
            .await
        {
            let request = ExecuteRequest::new(
                &definition.id,
                json!({
                    "ticket_id": record.ticket_id,
                    "tenant_id": record.tenant_id,
                    "assignee_id": record.assignee_id,
                    "minutes_remaining": minutes_remaining,
                }),
            )
            .entity("ticket", &record.ticket_id)
            .triggered_by("sla_monitor");
            let execution = self.inner.engine.execute_workflow(request).await?;
            tracing::info!(
                ticket_id = %record.ticket_id,
                execution_id = %execution.id,
                "SLA warning workflow triggered"
            );
            return Ok(());
        }

        // Built-in escalation path for tenants without a custom workflow.
        let Some(assignee) = &record.assignee_id else {
            tracing::warn!(ticket_id = %record.ticket_id, "SLA at risk with no assignee");
            return Ok(());
        };
        let subject = format!("SLA warning for ticket {}", record.ticket_id);
        let message = format!(
            "Ticket {} breaches its SLA in {} minute(s).",
            record.ticket_id, minutes_remaining
        );
        self.inner
            .notifier
            .create_in_app(assignee, &subject, &message)
            .await
            .map_err(crate::error::WorkflowError::from)?;
        self.inner
            .notifier
            .send_email(assignee, &subject, &message)
            .await
            .map_err(crate::error::WorkflowError::from)?;
        if minutes_remaining < MANAGER_ESCALATION_MINUTES {
            if let Some(manager) = self.inner.directory.manager_of(assignee).await {
                self.inner
                    .notifier
                    .create_in_app(&manager, &subject, &message)
                    .await
                    .map_err(crate::error::WorkflowError::from)?;
            }
        }
        tracing::info!(
            ticket_id = %record.ticket_id,
            assignee = %assignee,
            minutes_remaining,
            "SLA warning notifications sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FakeIdGenerator, FakeTimeProvider};
    use crate::engine::EngineBuilder;
    use crate::store::{
        ExecutionStore, InMemoryDefinitionStore, InMemoryDirectory, InMemoryExecutionStore,
        InMemorySlaStore, RecordingNotificationSender, RecordingTicketActions, SlaRecord,
    };
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_interval_schedule_due() {
        let spec = ScheduleSpec::Interval { minutes: 15 };
        let now = at(2026, 3, 2, 10, 0);
        assert!(schedule_due(&spec, None, now));
        assert!(!schedule_due(&spec, Some(at(2026, 3, 2, 9, 50)), now));
        assert!(schedule_due(&spec, Some(at(2026, 3, 2, 9, 45)), now));
    }

    #[test]
    fn test_daily_schedule_due() {
        let spec = ScheduleSpec::Daily { hour: 9, minute: 30 };
        assert!(schedule_due(&spec, None, at(2026, 3, 2, 9, 30)));
        assert!(!schedule_due(&spec, None, at(2026, 3, 2, 9, 31)));
        // Already fired today.
        assert!(!schedule_due(
            &spec,
            Some(at(2026, 3, 2, 9, 30)),
            at(2026, 3, 2, 9, 30)
        ));
        assert!(schedule_due(
            &spec,
            Some(at(2026, 3, 1, 9, 30)),
            at(2026, 3, 2, 9, 30)
        ));
    }

    #[test]
    fn test_weekly_schedule_due() {
        // 2026-03-02 is a Monday.
        let spec = ScheduleSpec::Weekly { weekday: 0, hour: 8 };
        assert!(schedule_due(&spec, None, at(2026, 3, 2, 8, 15)));
        assert!(!schedule_due(&spec, None, at(2026, 3, 3, 8, 15)));
        assert!(!schedule_due(&spec, None, at(2026, 3, 2, 9, 0)));
    }

    struct Harness {
        definitions: Arc<InMemoryDefinitionStore>,
        store: Arc<InMemoryExecutionStore>,
        notifier: Arc<RecordingNotificationSender>,
        directory: Arc<InMemoryDirectory>,
        sla: Arc<InMemorySlaStore>,
        engine: WorkflowEngine,
        runtime: RuntimeContext,
        time: Arc<FakeTimeProvider>,
    }

    fn harness(now: DateTime<Utc>) -> Harness {
        let definitions = Arc::new(InMemoryDefinitionStore::new());
        let store = Arc::new(InMemoryExecutionStore::new());
        let notifier = Arc::new(RecordingNotificationSender::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let sla = Arc::new(InMemorySlaStore::new());
        let time = Arc::new(FakeTimeProvider::new(now));
        let runtime = RuntimeContext {
            time_provider: time.clone(),
            id_generator: Arc::new(FakeIdGenerator::new("id")),
        };
        let engine = EngineBuilder::new(
            definitions.clone(),
            store.clone(),
            notifier.clone(),
            Arc::new(RecordingTicketActions::new()),
        )
        .runtime(runtime.clone())
        .build();
        Harness {
            definitions,
            store,
            notifier,
            directory,
            sla,
            engine,
            runtime,
            time,
        }
    }

    fn simple_definition(id: &str, trigger: &str, schedule: serde_json::Value) -> crate::model::WorkflowDefinition {
        serde_json::from_value(json!({
            "id": id,
            "name": id,
            "tenant_id": "acme",
            "trigger_type": trigger,
            "schedule": schedule,
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "end", "type": "end"}
            ],
            "edges": [{"source": "start", "target": "end"}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_trigger_scheduler_fires_due_definitions() {
        let h = harness(at(2026, 3, 2, 10, 0));
        h.definitions.insert(simple_definition(
            "wf-sched",
            "scheduled",
            json!({"kind": "interval", "minutes": 15}),
        ));
        let scheduler =
            TriggerScheduler::new(h.definitions.clone(), h.engine.clone(), h.runtime.clone());

        scheduler.tick_once().await;
        assert_eq!(
            h.store.execution_history("wf-sched", 10, 0).await.unwrap().len(),
            1
        );

        // Within the interval nothing new fires.
        h.time.advance(ChronoDuration::minutes(5));
        scheduler.tick_once().await;
        assert_eq!(
            h.store.execution_history("wf-sched", 10, 0).await.unwrap().len(),
            1
        );

        h.time.advance(ChronoDuration::minutes(10));
        scheduler.tick_once().await;
        assert_eq!(
            h.store.execution_history("wf-sched", 10, 0).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_sla_default_escalation_notifies_assignee_and_manager() {
        let now = at(2026, 3, 2, 10, 0);
        let h = harness(now);
        h.directory.set_manager("agent-1", "boss-1");
        h.sla.insert(SlaRecord {
            ticket_id: "T-1".into(),
            tenant_id: "acme".into(),
            assignee_id: Some("agent-1".into()),
            response_due_at: Some(now + ChronoDuration::minutes(20)),
            resolution_due_at: None,
            ticket_status: "open".into(),
        });
        let monitor = SlaMonitor::new(
            h.sla.clone(),
            h.definitions.clone(),
            h.engine.clone(),
            h.notifier.clone(),
            h.directory.clone(),
            h.runtime.clone(),
        );
        monitor.tick_once().await;

        let in_app = h.notifier.sent_on("in_app");
        let recipients: Vec<&str> = in_app.iter().map(|n| n.recipient.as_str()).collect();
        assert!(recipients.contains(&"agent-1"));
        // 20 minutes remaining pulls the manager in.
        assert!(recipients.contains(&"boss-1"));

        // The same ticket is not warned twice.
        monitor.tick_once().await;
        assert_eq!(h.notifier.sent_on("in_app").len(), in_app.len());
    }

    #[tokio::test]
    async fn test_sla_outside_manager_window_skips_manager() {
        let now = at(2026, 3, 2, 10, 0);
        let h = harness(now);
        h.directory.set_manager("agent-1", "boss-1");
        h.sla.insert(SlaRecord {
            ticket_id: "T-2".into(),
            tenant_id: "acme".into(),
            assignee_id: Some("agent-1".into()),
            response_due_at: Some(now + ChronoDuration::minutes(90)),
            resolution_due_at: None,
            ticket_status: "open".into(),
        });
        let monitor = SlaMonitor::new(
            h.sla.clone(),
            h.definitions.clone(),
            h.engine.clone(),
            h.notifier.clone(),
            h.directory.clone(),
            h.runtime.clone(),
        );
        monitor.tick_once().await;
        let recipients: Vec<String> = h
            .notifier
            .sent_on("in_app")
            .iter()
            .map(|n| n.recipient.clone())
            .collect();
        assert_eq!(recipients, vec!["agent-1"]);
    }

    #[tokio::test]
    async fn test_sla_tenant_workflow_takes_precedence() {
        let now = at(2026, 3, 2, 10, 0);
        let h = harness(now);
        h.definitions.insert(simple_definition(
            "wf-sla",
            "sla_warning",
            serde_json::Value::Null,
        ));
        h.sla.insert(SlaRecord {
            ticket_id: "T-3".into(),
            tenant_id: "acme".into(),
            assignee_id: Some("agent-1".into()),
            response_due_at: Some(now + ChronoDuration::minutes(45)),
            resolution_due_at: None,
            ticket_status: "open".into(),
        });
        let monitor = SlaMonitor::new(
            h.sla.clone(),
            h.definitions.clone(),
            h.engine.clone(),
            h.notifier.clone(),
            h.directory.clone(),
            h.runtime.clone(),
        );
        monitor.tick_once().await;

        let executions = h.store.execution_history("wf-sla", 10, 0).await.unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].entity_id, "T-3");
        assert_eq!(executions[0].trigger_payload["minutes_remaining"], json!(45));
        // No direct notifications when a workflow handles the warning.
        assert!(h.notifier.sent_on("in_app").is_empty());
    }
}
