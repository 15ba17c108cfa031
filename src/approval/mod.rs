//! Multi-level approval lifecycle: approver resolution, decision intake,
//! completion policies, delegation, escalation timers, and timeout actions.
//!
//! The manager never drives graph traversal itself; when a request resolves
//! it hands the outcome back to the engine through [`ExecutionResumer`].

pub mod tokens;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{EngineEvent, EventEmitter, RuntimeContext, Segment, VariablePool};
use crate::error::{WorkflowError, WorkflowResult};
use crate::model::{
    ApprovalMetadata, ApprovalNodeConfig, ApprovalStatus, ApproverSource, ApproverSpec,
    CompletionPolicy, DelegationRecord, EscalationLevel, TimeoutAction, WorkflowApproval,
    WorkflowExecution,
};
use crate::store::{DefinitionStore, ExecutionStore, NotificationSender, UserDirectory};

pub use tokens::{TokenRegistry, TOKEN_TTL_HOURS};

/// Seam back into the engine for resuming parked executions.
#[async_trait]
pub trait ExecutionResumer: Send + Sync {
    async fn resume(
        &self,
        execution_id: &str,
        resume_data: Value,
    ) -> WorkflowResult<WorkflowExecution>;
}

/// Aggregate state of one approval request after a decision lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Pending,
    Approved,
    Rejected,
}

pub struct ApprovalManagerBuilder {
    definitions: Arc<dyn DefinitionStore>,
    store: Arc<dyn ExecutionStore>,
    notifier: Arc<dyn NotificationSender>,
    directory: Arc<dyn UserDirectory>,
    runtime: RuntimeContext,
    events: EventEmitter,
}

impl ApprovalManagerBuilder {
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        store: Arc<dyn ExecutionStore>,
        notifier: Arc<dyn NotificationSender>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        ApprovalManagerBuilder {
            definitions,
            store,
            notifier,
            directory,
            runtime: RuntimeContext::default(),
            events: EventEmitter::disabled(),
        }
    }

    pub fn runtime(mut self, runtime: RuntimeContext) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> ApprovalManager {
        ApprovalManager {
            inner: Arc::new(ManagerInner {
                definitions: self.definitions,
                store: self.store,
                notifier: self.notifier,
                directory: self.directory,
                runtime: self.runtime,
                events: self.events,
                tokens: TokenRegistry::new(),
                resumer: RwLock::new(None),
            }),
        }
    }
}

struct ManagerInner {
    definitions: Arc<dyn DefinitionStore>,
    store: Arc<dyn ExecutionStore>,
    notifier: Arc<dyn NotificationSender>,
    directory: Arc<dyn UserDirectory>,
    runtime: RuntimeContext,
    events: EventEmitter,
    tokens: TokenRegistry,
    resumer: RwLock<Option<Arc<dyn ExecutionResumer>>>,
}

#[derive(Clone)]
pub struct ApprovalManager {
    inner: Arc<ManagerInner>,
}

/// Resolved approver before a record exists for it.
struct ResolvedApprover {
    user_id: String,
    source: ApproverSource,
    order: i32,
    optional: bool,
}

impl ApprovalManager {
    pub fn set_resumer(&self, resumer: Arc<dyn ExecutionResumer>) {
        *self.inner.resumer.write() = Some(resumer);
    }

    /// Open an approval request for a parked approval node: create one
    /// pending record per resolved approver, notify them, and arm the
    /// escalation and timeout timers.
    pub async fn request_approval(
        &self,
        execution: &WorkflowExecution,
        step_id: &str,
        node_id: &str,
        config: &ApprovalNodeConfig,
        variables: &VariablePool,
    ) -> WorkflowResult<Vec<WorkflowApproval>> {
        let resolved = self.resolve_approvers(&config.approvers, variables).await;
        if resolved.is_empty() {
            return Err(WorkflowError::InternalError(format!(
                "approval node {} resolved no approvers",
                node_id
            )));
        }
        let now = self.inner.runtime.now();
        let mut records = Vec::with_capacity(resolved.len());
        for approver in &resolved {
            let approval = WorkflowApproval {
                id: self.inner.runtime.next_id(),
                execution_id: execution.id.clone(),
                step_id: step_id.to_string(),
                node_id: node_id.to_string(),
                approver_id: approver.user_id.clone(),
                status: ApprovalStatus::Pending,
                comments: None,
                requested_at: now,
                resolved_at: None,
                metadata: ApprovalMetadata {
                    source: Some(approver.source),
                    order: approver.order,
                    optional: approver.optional,
                    escalation_level: 0,
                    delegation_chain: Vec::new(),
                },
            };
            self.inner.store.create_approval(&approval).await?;
            records.push(approval);
        }
        tracing::info!(
            execution_id = %execution.id,
            node_id = %node_id,
            approvers = records.len(),
            "approval request opened"
        );

        // The sequential policy notifies one approver at a time; everyone
        // else hears about the request up front.
        match config.completion_policy {
            CompletionPolicy::Multiple => {
                if let Some(first) = records.iter().min_by_key(|a| a.metadata.order) {
                    self.notify_approver(first, config, variables).await;
                }
            }
            _ => {
                for approval in &records {
                    self.notify_approver(approval, config, variables).await;
                }
            }
        }

        self.schedule_escalations(execution, step_id, node_id, config, variables);
        self.schedule_timeout(execution, step_id, node_id, config);
        Ok(records)
    }

    /// Record a decision made in-app by the assigned approver.
    pub async fn process_approval(
        &self,
        approval_id: &str,
        approver_id: &str,
        approved: bool,
        comments: Option<String>,
    ) -> WorkflowResult<ApprovalOutcome> {
        let approval = self
            .inner
            .store
            .get_approval(approval_id)
            .await?
            .ok_or_else(|| WorkflowError::ApprovalNotFound(approval_id.to_string()))?;
        if approval.status.is_resolved() {
            return Err(WorkflowError::ApprovalNotPending {
                approval_id: approval_id.to_string(),
            });
        }
        if approval.approver_id != approver_id {
            return Err(WorkflowError::NotAssignedApprover {
                approval_id: approval_id.to_string(),
                user_id: approver_id.to_string(),
            });
        }
        self.record_decision(approval, approved, comments).await
    }

    /// Record a decision made through a magic link. The token binds the
    /// identity, so no approver check is needed.
    pub async fn process_approval_by_token(
        &self,
        token: &str,
        approved: bool,
        comments: Option<String>,
    ) -> WorkflowResult<ApprovalOutcome> {
        let approval_id = self.inner.tokens.redeem(token, self.inner.runtime.now())?;
        let approval = self
            .inner
            .store
            .get_approval(&approval_id)
            .await?
            .ok_or_else(|| WorkflowError::ApprovalNotFound(approval_id.clone()))?;
        if approval.status.is_resolved() {
            return Err(WorkflowError::ApprovalNotPending { approval_id });
        }
        self.record_decision(approval, approved, comments).await
    }

    /// Hand a pending approval to another user. The superseded record is
    /// marked `delegated` and a fresh record is created for the new
    /// assignee, carrying the delegation chain forward.
    pub async fn delegate_approval(
        &self,
        approval_id: &str,
        from_user: &str,
        to_user: &str,
        reason: Option<String>,
    ) -> WorkflowResult<WorkflowApproval> {
        let mut approval = self
            .inner
            .store
            .get_approval(approval_id)
            .await?
            .ok_or_else(|| WorkflowError::ApprovalNotFound(approval_id.to_string()))?;
        if approval.status.is_resolved() {
            return Err(WorkflowError::ApprovalNotPending {
                approval_id: approval_id.to_string(),
            });
        }
        if approval.approver_id != from_user {
            return Err(WorkflowError::NotAssignedApprover {
                approval_id: approval_id.to_string(),
                user_id: from_user.to_string(),
            });
        }
        let (execution, config) = self.config_for(&approval).await?;
        if !config.allow_delegation {
            return Err(WorkflowError::DelegationNotAllowed);
        }
        let now = self.inner.runtime.now();
        approval.status = ApprovalStatus::Delegated;
        approval.resolved_at = Some(now);
        self.inner.store.update_approval(&approval).await?;
        self.inner.tokens.revoke_for(&approval.id);

        let mut metadata = approval.metadata.clone();
        metadata.delegation_chain.push(DelegationRecord {
            from: from_user.to_string(),
            to: to_user.to_string(),
            reason,
            at: now,
        });
        let delegate = WorkflowApproval {
            id: self.inner.runtime.next_id(),
            execution_id: approval.execution_id.clone(),
            step_id: approval.step_id.clone(),
            node_id: approval.node_id.clone(),
            approver_id: to_user.to_string(),
            status: ApprovalStatus::Pending,
            comments: None,
            requested_at: now,
            resolved_at: None,
            metadata,
        };
        self.inner.store.create_approval(&delegate).await?;
        tracing::info!(
            approval_id = %approval.id,
            delegate_approval_id = %delegate.id,
            from = %from_user,
            to = %to_user,
            "approval delegated"
        );
        let variables = VariablePool::from_value(&execution.variables);
        self.notify_approver(&delegate, &config, &variables).await;
        Ok(delegate)
    }

    async fn record_decision(
        &self,
        mut approval: WorkflowApproval,
        approved: bool,
        comments: Option<String>,
    ) -> WorkflowResult<ApprovalOutcome> {
        let now = self.inner.runtime.now();
        approval.status = if approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };
        approval.resolved_at = Some(now);
        approval.comments = comments;
        self.inner.store.update_approval(&approval).await?;
        self.inner.tokens.revoke_for(&approval.id);
        self.inner.events.emit(EngineEvent::ApprovalReceived {
            execution_id: approval.execution_id.clone(),
            approval_id: approval.id.clone(),
            approver_id: approval.approver_id.clone(),
            approved,
            timestamp: now,
        });
        tracing::info!(
            approval_id = %approval.id,
            approver_id = %approval.approver_id,
            approved,
            "approval decision recorded"
        );

        let (execution, config) = self.config_for(&approval).await?;
        let approvals = self
            .inner
            .store
            .approvals_for_step(&approval.execution_id, &approval.step_id)
            .await?;
        let outcome = evaluate_policy(config.completion_policy, &approvals);
        match outcome {
            ApprovalOutcome::Approved => {
                self.finalize_request(&approval.execution_id, true, &approvals)
                    .await?;
            }
            ApprovalOutcome::Rejected => {
                self.finalize_request(&approval.execution_id, false, &approvals)
                    .await?;
            }
            ApprovalOutcome::Pending => {
                if config.completion_policy == CompletionPolicy::Multiple {
                    let next = approvals
                        .iter()
                        .filter(|a| a.status == ApprovalStatus::Pending)
                        .min_by_key(|a| a.metadata.order);
                    if let Some(next) = next {
                        let variables = VariablePool::from_value(&execution.variables);
                        self.notify_approver(next, &config, &variables).await;
                    }
                }
            }
        }
        Ok(outcome)
    }

    /// Cancel the remaining pending records and hand the outcome back to
    /// the engine.
    async fn finalize_request(
        &self,
        execution_id: &str,
        approved: bool,
        approvals: &[WorkflowApproval],
    ) -> WorkflowResult<()> {
        let now = self.inner.runtime.now();
        for approval in approvals {
            if approval.status == ApprovalStatus::Pending {
                let mut cancelled = approval.clone();
                cancelled.status = ApprovalStatus::Cancelled;
                cancelled.resolved_at = Some(now);
                self.inner.store.update_approval(&cancelled).await?;
                self.inner.tokens.revoke_for(&cancelled.id);
            }
        }
        let summary: Vec<Value> = approvals
            .iter()
            .map(|a| {
                json!({
                    "approval_id": a.id,
                    "approver_id": a.approver_id,
                    "status": a.status,
                    "comments": a.comments,
                })
            })
            .collect();
        let resumer = self.inner.resumer.read().clone();
        match resumer {
            Some(resumer) => {
                resumer
                    .resume(execution_id, json!({"approved": approved, "approvals": summary}))
                    .await?;
            }
            None => {
                tracing::warn!(
                    execution_id = %execution_id,
                    "approval resolved but no resumer is attached"
                );
            }
        }
        Ok(())
    }

    async fn resolve_approvers(
        &self,
        specs: &[ApproverSpec],
        variables: &VariablePool,
    ) -> Vec<ResolvedApprover> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        for spec in specs {
            let user_ids: Vec<String> = match spec.source {
                ApproverSource::User => vec![spec.value.clone()],
                ApproverSource::Role => self.inner.directory.users_with_role(&spec.value).await,
                ApproverSource::Department => {
                    self.inner.directory.department_members(&spec.value).await
                }
                ApproverSource::Dynamic => {
                    let path = spec
                        .value
                        .strip_prefix("${")
                        .and_then(|s| s.strip_suffix('}'))
                        .unwrap_or(&spec.value);
                    match variables.get(path) {
                        Some(Segment::String(user)) => vec![user],
                        Some(Segment::Array(users)) => users
                            .iter()
                            .filter_map(|s| match s {
                                Segment::String(user) => Some(user.clone()),
                                _ => None,
                            })
                            .collect(),
                        other => {
                            tracing::warn!(
                                path = %path,
                                "dynamic approver path resolved to {:?}",
                                other
                            );
                            Vec::new()
                        }
                    }
                }
            };
            for user_id in user_ids {
                if seen.insert(user_id.clone()) {
                    resolved.push(ResolvedApprover {
                        user_id,
                        source: spec.source,
                        order: spec.order,
                        optional: spec.optional,
                    });
                }
            }
        }
        resolved
    }

    /// Best-effort delivery across channels; a failed channel never blocks
    /// the request.
    async fn notify_approver(
        &self,
        approval: &WorkflowApproval,
        config: &ApprovalNodeConfig,
        variables: &VariablePool,
    ) {
        let title = config
            .title
            .as_deref()
            .map(|t| variables.resolve_template(t))
            .unwrap_or_else(|| "Approval requested".to_string());
        let description = config
            .description
            .as_deref()
            .map(|t| variables.resolve_template(t))
            .unwrap_or_default();
        let mut body = format!("<p>{}</p>", description);
        if let Some(base) = &config.magic_link_base_url {
            let token = self
                .inner
                .tokens
                .issue(&approval.id, self.inner.runtime.now());
            body.push_str(&format!(
                "<p><a href=\"{}/approvals/{}?token={}\">Review this request</a></p>",
                base.trim_end_matches('/'),
                approval.id,
                token
            ));
        }
        if let Err(err) = self
            .inner
            .notifier
            .send_email(&approval.approver_id, &title, &body)
            .await
        {
            tracing::warn!(approval_id = %approval.id, error = %err, "approval email failed");
        }
        if let Err(err) = self
            .inner
            .notifier
            .create_in_app(&approval.approver_id, &title, &description)
            .await
        {
            tracing::warn!(approval_id = %approval.id, error = %err, "in-app notification failed");
        }
        if config.notify_messaging_channel {
            if let Err(err) = self
                .inner
                .notifier
                .send_messaging_channel(&approval.approver_id, &title)
                .await
            {
                tracing::warn!(
                    approval_id = %approval.id,
                    error = %err,
                    "messaging-channel notification failed"
                );
            }
        }
    }

    fn schedule_escalations(
        &self,
        execution: &WorkflowExecution,
        step_id: &str,
        node_id: &str,
        config: &ApprovalNodeConfig,
        variables: &VariablePool,
    ) {
        for (index, level) in config.escalation.iter().enumerate() {
            let manager = self.clone();
            let execution_id = execution.id.clone();
            let step_id = step_id.to_string();
            let node_id = node_id.to_string();
            let level = level.clone();
            let level_no = index as u32 + 1;
            let policy = config.completion_policy;
            let config = config.clone();
            let variables = variables.clone();
            tokio::spawn(async move {
                tokio::time::sleep(hours_to_duration(level.after_hours)).await;
                if let Err(err) = manager
                    .escalate_if_pending(
                        &execution_id,
                        &step_id,
                        &node_id,
                        &level,
                        level_no,
                        policy,
                        &config,
                        &variables,
                    )
                    .await
                {
                    tracing::warn!(
                        execution_id = %execution_id,
                        level = level_no,
                        error = %err,
                        "escalation failed"
                    );
                }
            });
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn escalate_if_pending(
        &self,
        execution_id: &str,
        step_id: &str,
        node_id: &str,
        level: &EscalationLevel,
        level_no: u32,
        policy: CompletionPolicy,
        config: &ApprovalNodeConfig,
        variables: &VariablePool,
    ) -> WorkflowResult<()> {
        let approvals = self
            .inner
            .store
            .approvals_for_step(execution_id, step_id)
            .await?;
        if evaluate_policy(policy, &approvals) != ApprovalOutcome::Pending {
            return Ok(());
        }
        let already: HashSet<String> = approvals.iter().map(|a| a.approver_id.clone()).collect();
        let resolved = self.resolve_approvers(&level.approvers, variables).await;
        let now = self.inner.runtime.now();
        let mut added = 0usize;
        for approver in resolved {
            if already.contains(&approver.user_id) {
                continue;
            }
            let approval = WorkflowApproval {
                id: self.inner.runtime.next_id(),
                execution_id: execution_id.to_string(),
                step_id: step_id.to_string(),
                node_id: node_id.to_string(),
                approver_id: approver.user_id.clone(),
                status: ApprovalStatus::Pending,
                comments: None,
                requested_at: now,
                resolved_at: None,
                metadata: ApprovalMetadata {
                    source: Some(approver.source),
                    order: approver.order,
                    optional: approver.optional,
                    escalation_level: level_no,
                    delegation_chain: Vec::new(),
                },
            };
            self.inner.store.create_approval(&approval).await?;
            self.notify_approver(&approval, config, variables).await;
            added += 1;
        }
        self.inner.events.emit(EngineEvent::EscalationTriggered {
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            level: level_no,
            timestamp: now,
        });
        tracing::info!(
            execution_id = %execution_id,
            node_id = %node_id,
            level = level_no,
            added,
            "approval escalated"
        );
        Ok(())
    }

    fn schedule_timeout(
        &self,
        execution: &WorkflowExecution,
        step_id: &str,
        node_id: &str,
        config: &ApprovalNodeConfig,
    ) {
        let Some(hours) = config.auto_approve_after_hours else {
            return;
        };
        let manager = self.clone();
        let execution_id = execution.id.clone();
        let step_id = step_id.to_string();
        let node_id = node_id.to_string();
        let policy = config.completion_policy;
        let action = config.timeout_action;
        tokio::spawn(async move {
            tokio::time::sleep(hours_to_duration(hours)).await;
            if let Err(err) = manager
                .handle_timeout(&execution_id, &step_id, &node_id, policy, action)
                .await
            {
                tracing::warn!(
                    execution_id = %execution_id,
                    error = %err,
                    "approval timeout handling failed"
                );
            }
        });
    }

    async fn handle_timeout(
        &self,
        execution_id: &str,
        step_id: &str,
        node_id: &str,
        policy: CompletionPolicy,
        action: TimeoutAction,
    ) -> WorkflowResult<()> {
        let mut approvals = self
            .inner
            .store
            .approvals_for_step(execution_id, step_id)
            .await?;
        if evaluate_policy(policy, &approvals) != ApprovalOutcome::Pending {
            return Ok(());
        }
        let now = self.inner.runtime.now();
        self.inner.events.emit(EngineEvent::TimeoutOccurred {
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            timestamp: now,
        });
        match action {
            TimeoutAction::Notify => {
                for approval in approvals.iter().filter(|a| a.status == ApprovalStatus::Pending)
                {
                    if let Err(err) = self
                        .inner
                        .notifier
                        .create_in_app(
                            &approval.approver_id,
                            "Approval still pending",
                            "An approval request assigned to you has passed its deadline.",
                        )
                        .await
                    {
                        tracing::warn!(
                            approval_id = %approval.id,
                            error = %err,
                            "timeout reminder failed"
                        );
                    }
                }
                Ok(())
            }
            TimeoutAction::AutoApprove | TimeoutAction::AutoReject => {
                let approved = action == TimeoutAction::AutoApprove;
                for approval in approvals.iter_mut() {
                    if approval.status == ApprovalStatus::Pending {
                        approval.status = ApprovalStatus::Timeout;
                        approval.resolved_at = Some(now);
                        approval.comments =
                            Some(format!("auto-resolved after timeout: {:?}", action));
                        self.inner.store.update_approval(approval).await?;
                        self.inner.tokens.revoke_for(&approval.id);
                    }
                }
                tracing::info!(
                    execution_id = %execution_id,
                    node_id = %node_id,
                    approved,
                    "approval request auto-resolved after timeout"
                );
                self.finalize_request(execution_id, approved, &approvals).await
            }
        }
    }

    async fn config_for(
        &self,
        approval: &WorkflowApproval,
    ) -> WorkflowResult<(WorkflowExecution, ApprovalNodeConfig)> {
        let execution = self
            .inner
            .store
            .get_execution(&approval.execution_id)
            .await?
            .ok_or_else(|| WorkflowError::ExecutionNotFound(approval.execution_id.clone()))?;
        let definition = self
            .inner
            .definitions
            .get(&execution.definition_id)
            .await
            .ok_or_else(|| WorkflowError::WorkflowNotFound(execution.definition_id.clone()))?;
        let node = definition
            .nodes
            .iter()
            .find(|n| n.id == approval.node_id)
            .ok_or_else(|| WorkflowError::NodeNotFound(approval.node_id.clone()))?;
        let config: ApprovalNodeConfig = serde_json::from_value(node.config.clone())
            .map_err(|e| WorkflowError::InternalError(format!("approval config: {}", e)))?;
        Ok((execution, config))
    }
}

fn hours_to_duration(hours: f64) -> Duration {
    Duration::from_secs_f64((hours * 3600.0).max(0.0))
}

/// Evaluate the completion policy over the current records. Cancelled and
/// delegated records are out of scope (a delegation is continued by its
/// replacement record); a rejection by any required approver rejects the
/// whole request.
pub fn evaluate_policy(
    policy: CompletionPolicy,
    approvals: &[WorkflowApproval],
) -> ApprovalOutcome {
    let considered: Vec<&WorkflowApproval> = approvals
        .iter()
        .filter(|a| {
            a.status != ApprovalStatus::Cancelled && a.status != ApprovalStatus::Delegated
        })
        .collect();
    if considered.is_empty() {
        return ApprovalOutcome::Pending;
    }
    let required: Vec<&&WorkflowApproval> = considered
        .iter()
        .filter(|a| !a.metadata.optional)
        .collect();
    if required
        .iter()
        .any(|a| a.status == ApprovalStatus::Rejected)
    {
        return ApprovalOutcome::Rejected;
    }
    let approved = |a: &WorkflowApproval| a.status == ApprovalStatus::Approved;
    match policy {
        CompletionPolicy::Single => {
            if considered.iter().any(|a| approved(a)) {
                ApprovalOutcome::Approved
            } else {
                ApprovalOutcome::Pending
            }
        }
        CompletionPolicy::Multiple | CompletionPolicy::Unanimous => {
            if !required.is_empty() && required.iter().all(|a| approved(a)) {
                ApprovalOutcome::Approved
            } else if required.is_empty() && considered.iter().all(|a| approved(a)) {
                ApprovalOutcome::Approved
            } else {
                ApprovalOutcome::Pending
            }
        }
        CompletionPolicy::Majority => {
            // Counted over every live record, optional approvers included.
            let total = considered.len();
            let approvals_count = considered.iter().filter(|a| approved(a)).count();
            if approvals_count * 2 > total {
                ApprovalOutcome::Approved
            } else {
                ApprovalOutcome::Pending
            }
        }
    }
}
