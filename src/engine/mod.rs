//! Graph traversal engine.
//!
//! One call to [`WorkflowEngine::execute_workflow`] drives an execution from
//! the start node until it completes, fails, is cancelled, or parks on a
//! waiting node. Parked executions continue only through an explicit
//! [`WorkflowEngine::resume_execution`] call; there is no background poller.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::approval::{ApprovalManager, ExecutionResumer};
use crate::core::{
    backoff_delay, EngineEvent, EventEmitter, ExecutionContext, RuntimeContext, Segment,
    VariablePool,
};
use crate::error::{WorkflowError, WorkflowResult};
use crate::evaluator::all_conditions_pass;
use crate::graph::CompiledGraph;
use crate::metrics::MetricsCollector;
use crate::model::{
    ApprovalNodeConfig, ExecutionStatus, LogLevel, NodeType, StepExecution, StepStatus,
    WorkflowDefinition, WorkflowExecution, WorkflowNode,
};
use crate::nodes::{NodeAction, NodeContext, NodeExecutors, NodeRunResult, SubWorkflowRunner};
use crate::store::{DefinitionStore, ExecutionStore, NotificationSender, TicketActions};

use async_trait::async_trait;

/// Traversal step ceiling, a guard against unbounded loop nodes.
const DEFAULT_MAX_STEPS: u32 = 1000;

/// Invocation parameters for one trigger.
#[derive(Debug, Clone, Default)]
pub struct ExecuteRequest {
    pub definition_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub payload: Value,
    pub triggered_by: Option<String>,
    pub correlation_id: Option<String>,
}

impl ExecuteRequest {
    pub fn new(definition_id: &str, payload: Value) -> Self {
        ExecuteRequest {
            definition_id: definition_id.to_string(),
            payload,
            ..Default::default()
        }
    }

    pub fn entity(mut self, entity_type: &str, entity_id: &str) -> Self {
        self.entity_type = entity_type.to_string();
        self.entity_id = entity_id.to_string();
        self
    }

    pub fn triggered_by(mut self, user_id: &str) -> Self {
        self.triggered_by = Some(user_id.to_string());
        self
    }

    pub fn correlation(mut self, correlation_id: &str) -> Self {
        self.correlation_id = Some(correlation_id.to_string());
        self
    }
}

pub struct EngineBuilder {
    definitions: Arc<dyn DefinitionStore>,
    store: Arc<dyn ExecutionStore>,
    notifier: Arc<dyn NotificationSender>,
    tickets: Arc<dyn TicketActions>,
    runtime: RuntimeContext,
    events: EventEmitter,
    metrics: Arc<MetricsCollector>,
    max_steps: u32,
}

impl EngineBuilder {
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        store: Arc<dyn ExecutionStore>,
        notifier: Arc<dyn NotificationSender>,
        tickets: Arc<dyn TicketActions>,
    ) -> Self {
        EngineBuilder {
            definitions,
            store,
            notifier,
            tickets,
            runtime: RuntimeContext::default(),
            events: EventEmitter::disabled(),
            metrics: Arc::new(MetricsCollector::new()),
            max_steps: DEFAULT_MAX_STEPS,
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

    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn build(self) -> WorkflowEngine {
        WorkflowEngine {
            inner: Arc::new(EngineInner {
                definitions: self.definitions,
                store: self.store,
                notifier: self.notifier,
                tickets: self.tickets,
                executors: NodeExecutors::new(),
                runtime: self.runtime,
                events: self.events,
                metrics: self.metrics,
                contexts: RwLock::new(HashMap::new()),
                approvals: RwLock::new(None),
                max_steps: self.max_steps,
            }),
        }
    }
}

struct EngineInner {
    definitions: Arc<dyn DefinitionStore>,
    store: Arc<dyn ExecutionStore>,
    notifier: Arc<dyn NotificationSender>,
    tickets: Arc<dyn TicketActions>,
    executors: NodeExecutors,
    runtime: RuntimeContext,
    events: EventEmitter,
    metrics: Arc<MetricsCollector>,
    /// Live contexts for non-terminal executions, keyed by execution id.
    contexts: RwLock<HashMap<String, Arc<ExecutionContext>>>,
    approvals: RwLock<Option<ApprovalManager>>,
    max_steps: u32,
}

#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

/// Outcome of running one node through its retry policy.
enum AttemptOutcome {
    Done(NodeRunResult, String),
    Cancelled,
}

impl WorkflowEngine {
    pub fn metrics(&self) -> &MetricsCollector {
        &self.inner.metrics
    }

    /// Wire the approval manager in after construction. The manager resumes
    /// parked executions back through this engine.
    pub fn attach_approvals(&self, manager: ApprovalManager) {
        manager.set_resumer(Arc::new(EngineResumer(self.clone())));
        *self.inner.approvals.write() = Some(manager);
    }

    /// Trigger one execution and drive it to a boundary: terminal status or
    /// a waiting node.
    pub async fn execute_workflow(
        &self,
        request: ExecuteRequest,
    ) -> WorkflowResult<WorkflowExecution> {
        let definition = self
            .inner
            .definitions
            .get(&request.definition_id)
            .await
            .ok_or_else(|| WorkflowError::WorkflowNotFound(request.definition_id.clone()))?;
        if !definition.is_active {
            return Err(WorkflowError::WorkflowInactive(definition.id.clone()));
        }
        let trigger_pool = VariablePool::from_value(&request.payload);
        if !all_conditions_pass(&definition.trigger_conditions, &trigger_pool) {
            return Err(WorkflowError::TriggerConditionsNotMet(definition.id.clone()));
        }
        let graph = Arc::new(CompiledGraph::build(&definition)?);

        let pool = VariablePool::from_value(&definition.variables);
        pool.merge_value(&request.payload);
        let execution_id = self.inner.runtime.next_id();
        let ctx = Arc::new(ExecutionContext::new(&execution_id, pool));

        let mut execution = WorkflowExecution {
            id: execution_id.clone(),
            definition_id: definition.id.clone(),
            entity_type: request.entity_type,
            entity_id: request.entity_id,
            triggered_by: request.triggered_by,
            trigger_payload: request.payload,
            status: ExecutionStatus::Pending,
            current_node_id: Some(graph.start_node().id.clone()),
            progress: 0,
            variables: ctx.variables.snapshot(),
            log: Vec::new(),
            retry_count: 0,
            started_at: self.inner.runtime.now(),
            completed_at: None,
            error_message: None,
            correlation_id: request.correlation_id,
        };
        self.inner.store.create_execution(&execution).await?;
        self.inner
            .contexts
            .write()
            .insert(execution_id.clone(), ctx.clone());

        execution.status = ExecutionStatus::Running;
        self.inner.store.update_execution(&execution).await?;
        self.inner.events.emit(EngineEvent::WorkflowStarted {
            execution_id: execution_id.clone(),
            definition_id: definition.id.clone(),
            correlation_id: execution.correlation_id.clone(),
            timestamp: self.inner.runtime.now(),
        });
        tracing::info!(
            execution_id = %execution_id,
            definition_id = %definition.id,
            "workflow execution started"
        );

        match self.run_to_boundary(&definition, &graph, &mut execution, &ctx).await {
            Ok(()) => Ok(execution),
            Err(err) => {
                self.finalize_failure(&mut execution, &ctx, &err).await?;
                Err(err)
            }
        }
    }

    /// Resume a parked execution with external input, advancing past the
    /// waiting node along its outgoing edges.
    pub async fn resume_execution(
        &self,
        execution_id: &str,
        resume_data: Value,
    ) -> WorkflowResult<WorkflowExecution> {
        let mut execution = self
            .inner
            .store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.to_string()))?;
        if execution.status.is_terminal() {
            return Err(WorkflowError::ExecutionNotActive {
                execution_id: execution_id.to_string(),
                status: execution.status.to_string(),
            });
        }
        let definition = self
            .inner
            .definitions
            .get(&execution.definition_id)
            .await
            .ok_or_else(|| WorkflowError::WorkflowNotFound(execution.definition_id.clone()))?;
        let graph = Arc::new(CompiledGraph::build(&definition)?);
        let ctx = self.context_for(&execution);
        if ctx.is_cancelled() {
            return Err(WorkflowError::ExecutionNotActive {
                execution_id: execution_id.to_string(),
                status: ExecutionStatus::Cancelled.to_string(),
            });
        }
        let current = execution.current_node_id.clone().ok_or_else(|| {
            WorkflowError::InternalError(format!(
                "execution {} has no current node to resume from",
                execution_id
            ))
        })?;

        // Resume data is visible both at the top level and under the
        // waiting node's id, so edge conditions can use either form.
        ctx.variables.merge_value(&resume_data);
        if let Value::Object(map) = &resume_data {
            for (key, value) in map {
                ctx.variables
                    .set(&format!("{}.{}", current, key), Segment::from_value(value));
            }
        }
        ctx.log(
            LogLevel::Info,
            Some(&current),
            format!("Execution resumed at node {}", current),
        );
        self.close_pending_step(execution_id, &current, StepStatus::Completed)
            .await?;
        execution.status = ExecutionStatus::Running;
        execution.variables = ctx.variables.snapshot();
        self.inner.store.update_execution(&execution).await?;
        tracing::info!(execution_id = %execution_id, node_id = %current, "execution resumed");

        let next = self.select_next(&graph, &current, &ctx);
        let next = match next {
            Ok(next) => next,
            Err(err) => {
                self.finalize_failure(&mut execution, &ctx, &err).await?;
                return Err(err);
            }
        };
        execution.current_node_id = Some(next);
        match self.run_to_boundary(&definition, &graph, &mut execution, &ctx).await {
            Ok(()) => Ok(execution),
            Err(err) => {
                self.finalize_failure(&mut execution, &ctx, &err).await?;
                Err(err)
            }
        }
    }

    /// Cooperatively cancel an execution. A running traversal observes the
    /// flag at the next node boundary; a parked execution is finalized here.
    pub async fn cancel_execution(
        &self,
        execution_id: &str,
        reason: Option<String>,
    ) -> WorkflowResult<WorkflowExecution> {
        let mut execution = self
            .inner
            .store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.to_string()))?;
        if execution.status.is_terminal() {
            return Err(WorkflowError::ExecutionNotActive {
                execution_id: execution_id.to_string(),
                status: execution.status.to_string(),
            });
        }
        if let Some(ctx) = self.inner.contexts.read().get(execution_id) {
            ctx.cancel();
        }
        // A parked execution leaves its waiting step open; close it as skipped
        // since the input it was waiting for will never arrive.
        if execution.status == ExecutionStatus::WaitingInput {
            if let Some(current) = execution.current_node_id.clone() {
                self.close_pending_step(execution_id, &current, StepStatus::Skipped)
                    .await?;
            }
        }
        execution.status = ExecutionStatus::Cancelled;
        execution.completed_at = Some(self.inner.runtime.now());
        execution.error_message = reason.clone();
        self.inner.store.update_execution(&execution).await?;
        self.inner.contexts.write().remove(execution_id);
        self.inner.events.emit(EngineEvent::WorkflowCancelled {
            execution_id: execution_id.to_string(),
            reason,
            correlation_id: execution.correlation_id.clone(),
            timestamp: self.inner.runtime.now(),
        });
        tracing::info!(execution_id = %execution_id, "execution cancelled");
        Ok(execution)
    }

    pub async fn get_execution(&self, execution_id: &str) -> WorkflowResult<WorkflowExecution> {
        self.inner
            .store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.to_string()))
    }

    /// Finalize the open step left behind by a waiting node. Resume closes
    /// it as completed; cancellation closes it as skipped.
    async fn close_pending_step(
        &self,
        execution_id: &str,
        node_id: &str,
        status: StepStatus,
    ) -> WorkflowResult<()> {
        let steps = self.inner.store.steps_for_execution(execution_id).await?;
        let open = steps
            .into_iter()
            .rev()
            .find(|s| s.node_id == node_id && s.status == StepStatus::Pending);
        if let Some(mut step) = open {
            step.status = status;
            step.finished_at = Some(self.inner.runtime.now());
            if status == StepStatus::Skipped {
                step.error_message = Some("execution cancelled while awaiting input".to_string());
            }
            self.inner.store.update_step(&step).await?;
        }
        Ok(())
    }

    /// Cached live context, or one rebuilt from the persisted variable
    /// snapshot. Retry and loop counters do not survive a rebuild.
    fn context_for(&self, execution: &WorkflowExecution) -> Arc<ExecutionContext> {
        if let Some(ctx) = self.inner.contexts.read().get(&execution.id) {
            return ctx.clone();
        }
        let ctx = Arc::new(ExecutionContext::new(
            &execution.id,
            VariablePool::from_value(&execution.variables),
        ));
        self.inner
            .contexts
            .write()
            .insert(execution.id.clone(), ctx.clone());
        ctx
    }

    fn services_for(&self, execution: &WorkflowExecution) -> NodeContext {
        NodeContext {
            execution_id: execution.id.clone(),
            entity_id: execution.entity_id.clone(),
            runtime: self.inner.runtime.clone(),
            notifier: self.inner.notifier.clone(),
            tickets: self.inner.tickets.clone(),
            sub_workflows: Some(Arc::new(EngineSubWorkflows(self.clone()))),
        }
    }

    async fn run_to_boundary(
        &self,
        definition: &WorkflowDefinition,
        graph: &Arc<CompiledGraph>,
        execution: &mut WorkflowExecution,
        ctx: &Arc<ExecutionContext>,
    ) -> WorkflowResult<()> {
        let services = self.services_for(execution);
        let mut steps_taken: u32 = 0;
        loop {
            if ctx.is_cancelled() {
                self.finalize_cancelled(execution, ctx).await?;
                return Ok(());
            }
            steps_taken += 1;
            if steps_taken > self.inner.max_steps {
                return Err(WorkflowError::InternalError(format!(
                    "execution {} exceeded {} steps",
                    execution.id, self.inner.max_steps
                )));
            }
            let current = execution.current_node_id.clone().ok_or_else(|| {
                WorkflowError::InternalError(format!(
                    "execution {} lost its current node",
                    execution.id
                ))
            })?;
            let node = graph.node(&current)?.clone();

            let (result, step_id) =
                match self.run_node_with_retry(&node, ctx, &services).await? {
                    AttemptOutcome::Done(result, step_id) => (result, step_id),
                    AttemptOutcome::Cancelled => {
                        self.finalize_cancelled(execution, ctx).await?;
                        return Ok(());
                    }
                };
            self.merge_outputs(&node.id, &result, ctx);

            let percent = (steps_taken as u64 * 100 / graph.node_count().max(1) as u64).min(99);
            execution.progress = execution.progress.max(percent as u8);
            execution.retry_count = ctx.total_retries();
            execution.variables = ctx.variables.snapshot();
            execution.log = ctx.log_entries();
            self.inner.store.update_execution(execution).await?;

            match result.action {
                NodeAction::Continue => {
                    let next = self.select_next(graph, &node.id, ctx)?;
                    execution.current_node_id = Some(next);
                }
                NodeAction::Branch { target } => {
                    graph.node(&target)?;
                    ctx.log(
                        LogLevel::Info,
                        Some(&node.id),
                        format!("Branching to node {}", target),
                    );
                    execution.current_node_id = Some(target);
                }
                NodeAction::Parallel { targets } => {
                    self.run_parallel(graph, &services, &targets, ctx).await?;
                    execution.variables = ctx.variables.snapshot();
                    let next = self.select_next(graph, &node.id, ctx)?;
                    execution.current_node_id = Some(next);
                }
                NodeAction::Wait => {
                    execution.status = ExecutionStatus::WaitingInput;
                    execution.current_node_id = Some(node.id.clone());
                    self.inner.store.update_execution(execution).await?;
                    tracing::info!(
                        execution_id = %execution.id,
                        node_id = %node.id,
                        "execution waiting for external input"
                    );
                    if node.node_type == NodeType::Approval {
                        self.open_approvals(execution, &node, &step_id, ctx).await?;
                    }
                    return Ok(());
                }
                NodeAction::Complete => {
                    self.finalize_completed(definition, execution, ctx).await?;
                    return Ok(());
                }
                NodeAction::Fail(message) => {
                    return Err(WorkflowError::NodeExecutionFailed {
                        node_id: node.id.clone(),
                        error: message,
                    });
                }
                NodeAction::Retry { .. } => {
                    // Retry is consumed inside run_node_with_retry.
                    return Err(WorkflowError::UnknownResultAction {
                        node_id: node.id.clone(),
                        action: result.action.name().to_string(),
                    });
                }
            }
        }
    }

    /// One node through its retry policy. Every attempt gets its own step
    /// record; the delay between attempts follows the node's backoff config
    /// unless the node asked for an explicit delay.
    async fn run_node_with_retry(
        &self,
        node: &WorkflowNode,
        ctx: &ExecutionContext,
        services: &NodeContext,
    ) -> WorkflowResult<AttemptOutcome> {
        let retry_config = node.retry.clone().unwrap_or_default();
        let max_attempts = retry_config.max_attempts.max(1);
        let executor = self.inner.executors.executor(node.node_type)?;
        loop {
            let prior_retries = ctx.retry_count(&node.id);
            let step_id = self.inner.runtime.next_id();
            let mut step = StepExecution {
                id: step_id.clone(),
                execution_id: ctx.execution_id.clone(),
                node_id: node.id.clone(),
                status: StepStatus::Running,
                input: node.config.clone(),
                output: Value::Null,
                error_message: None,
                started_at: self.inner.runtime.now(),
                finished_at: None,
                retry_count: prior_retries,
            };
            self.inner.store.create_step(&step).await?;
            self.inner.events.emit(EngineEvent::StepStarted {
                execution_id: ctx.execution_id.clone(),
                step_id: step_id.clone(),
                node_id: node.id.clone(),
                timestamp: step.started_at,
            });
            ctx.log(
                LogLevel::Info,
                Some(&node.id),
                format!("Executing node {} ({})", node.id, node.node_type),
            );

            let outcome = tokio::time::timeout(
                Duration::from_millis(node.timeout_ms()),
                executor.execute(&node.id, &node.config, ctx, services),
            )
            .await;
            let finished_at = self.inner.runtime.now();

            let (message, timed_out, explicit_delay) = match outcome {
                Ok(Ok(result)) => {
                    if let NodeAction::Retry { delay } = result.action {
                        step.status = StepStatus::Failed;
                        step.error_message = Some("transient failure, retry requested".into());
                        step.finished_at = Some(finished_at);
                        self.inner.store.update_step(&step).await?;
                        ("transient failure, retry requested".to_string(), false, delay)
                    } else {
                        // A waiting step stays pending until the execution
                        // is resumed or cancelled; everything else is done.
                        step.status = if result.action == NodeAction::Wait {
                            StepStatus::Pending
                        } else {
                            StepStatus::Completed
                        };
                        step.output =
                            Value::Object(result.outputs.clone().into_iter().collect());
                        if step.status == StepStatus::Completed {
                            step.finished_at = Some(finished_at);
                        }
                        self.inner.store.update_step(&step).await?;
                        self.inner.events.emit(EngineEvent::StepCompleted {
                            execution_id: ctx.execution_id.clone(),
                            step_id: step_id.clone(),
                            node_id: node.id.clone(),
                            output: step.output.clone(),
                            timestamp: finished_at,
                        });
                        return Ok(AttemptOutcome::Done(result, step_id));
                    }
                }
                Ok(Err(err)) => {
                    let message = err.to_string();
                    step.status = StepStatus::Failed;
                    step.error_message = Some(message.clone());
                    step.finished_at = Some(finished_at);
                    self.inner.store.update_step(&step).await?;
                    (message, false, None)
                }
                Err(_) => {
                    let message = format!("Node timed out: {}", node.id);
                    step.status = StepStatus::Timeout;
                    step.error_message = Some(message.clone());
                    step.finished_at = Some(finished_at);
                    self.inner.store.update_step(&step).await?;
                    self.inner.events.emit(EngineEvent::TimeoutOccurred {
                        execution_id: ctx.execution_id.clone(),
                        node_id: node.id.clone(),
                        timestamp: finished_at,
                    });
                    (message, true, None)
                }
            };

            let attempts_used = prior_retries + 1;
            if attempts_used >= max_attempts {
                ctx.log(
                    LogLevel::Error,
                    Some(&node.id),
                    format!("Node failed after {} attempt(s): {}", attempts_used, message),
                );
                return Err(if timed_out {
                    WorkflowError::Timeout(node.id.clone())
                } else {
                    WorkflowError::NodeExecutionFailed {
                        node_id: node.id.clone(),
                        error: message,
                    }
                });
            }
            let retries = ctx.increment_retry(&node.id);
            let delay = explicit_delay.unwrap_or_else(|| backoff_delay(&retry_config, retries));
            ctx.log(
                LogLevel::Warn,
                Some(&node.id),
                format!(
                    "Attempt {} failed ({}), retrying in {}ms",
                    attempts_used,
                    message,
                    delay.as_millis()
                ),
            );
            self.inner.events.emit(EngineEvent::RetryAttempted {
                execution_id: ctx.execution_id.clone(),
                node_id: node.id.clone(),
                attempt: retries,
                delay_ms: delay.as_millis() as u64,
                timestamp: self.inner.runtime.now(),
            });
            if ctx.is_cancelled() {
                return Ok(AttemptOutcome::Cancelled);
            }
            tokio::time::sleep(delay).await;
            if ctx.is_cancelled() {
                return Ok(AttemptOutcome::Cancelled);
            }
        }
    }

    /// Fan out to each target on its own task with a forked context, then
    /// merge the branch variables back in declaration order so later
    /// branches win on key collisions.
    async fn run_parallel(
        &self,
        graph: &Arc<CompiledGraph>,
        services: &NodeContext,
        targets: &[String],
        ctx: &Arc<ExecutionContext>,
    ) -> WorkflowResult<()> {
        for target in targets {
            graph.node(target)?;
        }
        let mut join_set = JoinSet::new();
        for (index, target) in targets.iter().enumerate() {
            let engine = self.clone();
            let graph = graph.clone();
            let services = services.clone();
            let child = Arc::new(ctx.fork());
            let target = target.clone();
            join_set.spawn(async move {
                let result = engine.run_branch(&graph, &services, &child, target).await;
                (index, child, result)
            });
        }

        let mut branches: Vec<Option<(Arc<ExecutionContext>, WorkflowResult<()>)>> =
            targets.iter().map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, child, result)) => branches[index] = Some((child, result)),
                Err(err) => {
                    return Err(WorkflowError::InternalError(format!(
                        "parallel branch task failed: {}",
                        err
                    )));
                }
            }
        }

        let mut failures = Vec::new();
        for (child, result) in branches.into_iter().flatten() {
            match result {
                Ok(()) => ctx.variables.merge(&child.variables),
                Err(err) => failures.push(err.to_string()),
            }
        }
        if !failures.is_empty() {
            return Err(WorkflowError::ParallelExecutionFailed { failures });
        }
        Ok(())
    }

    /// Sequential traversal of one parallel branch. A branch ends at a
    /// completing node or at a node with no outgoing edges; waiting nodes
    /// are not supported inside a fan-out.
    ///
    /// Boxed with an explicit `Send` bound: branches can fan out again, and
    /// the resulting `run_branch` -> `run_parallel` -> `run_branch` cycle
    /// needs a named future type for the spawn's `Send` proof.
    fn run_branch<'a>(
        &'a self,
        graph: &'a Arc<CompiledGraph>,
        services: &'a NodeContext,
        ctx: &'a Arc<ExecutionContext>,
        start: String,
    ) -> Pin<Box<dyn Future<Output = WorkflowResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut current = start;
            let mut steps_taken: u32 = 0;
            loop {
                if ctx.is_cancelled() {
                    return Ok(());
                }
                steps_taken += 1;
                if steps_taken > self.inner.max_steps {
                    return Err(WorkflowError::InternalError(format!(
                        "parallel branch exceeded {} steps",
                        self.inner.max_steps
                    )));
                }
                let node = graph.node(&current)?.clone();
                let result = match self.run_node_with_retry(&node, ctx, services).await? {
                    AttemptOutcome::Done(result, _) => result,
                    AttemptOutcome::Cancelled => return Ok(()),
                };
                self.merge_outputs(&node.id, &result, ctx);
                match result.action {
                    NodeAction::Continue => {
                        if graph.outgoing_edges(&node.id).is_empty() {
                            return Ok(());
                        }
                        current = self.select_next(graph, &node.id, ctx)?;
                    }
                    NodeAction::Branch { target } => {
                        graph.node(&target)?;
                        current = target;
                    }
                    NodeAction::Parallel { targets } => {
                        self.run_parallel(graph, services, &targets, ctx).await?;
                        if graph.outgoing_edges(&node.id).is_empty() {
                            return Ok(());
                        }
                        current = self.select_next(graph, &node.id, ctx)?;
                    }
                    NodeAction::Complete => return Ok(()),
                    NodeAction::Wait => {
                        return Err(WorkflowError::NodeExecutionFailed {
                            node_id: node.id.clone(),
                            error: "waiting nodes are not supported inside a parallel branch"
                                .into(),
                        });
                    }
                    NodeAction::Fail(message) => {
                        return Err(WorkflowError::NodeExecutionFailed {
                            node_id: node.id.clone(),
                            error: message,
                        });
                    }
                    NodeAction::Retry { .. } => {
                        return Err(WorkflowError::UnknownResultAction {
                            node_id: node.id.clone(),
                            action: result.action.name().to_string(),
                        });
                    }
                }
            }
        })
    }

    fn merge_outputs(&self, node_id: &str, result: &NodeRunResult, ctx: &ExecutionContext) {
        if result.outputs.is_empty() {
            return;
        }
        let object = Value::Object(result.outputs.clone().into_iter().collect());
        ctx.variables.set(node_id, Segment::from_value(&object));
    }

    /// First matching edge in evaluation order: conditioned edges by
    /// descending priority, then the unconditioned default.
    fn select_next(
        &self,
        graph: &CompiledGraph,
        node_id: &str,
        ctx: &ExecutionContext,
    ) -> WorkflowResult<String> {
        let edges = graph.outgoing_edges(node_id);
        if edges.is_empty() {
            return Err(WorkflowError::NoOutgoingEdges(node_id.to_string()));
        }
        for edge in edges {
            if all_conditions_pass(&edge.conditions, &ctx.variables) {
                return Ok(edge.target.clone());
            }
        }
        Err(WorkflowError::NoMatchingEdge(node_id.to_string()))
    }

    async fn open_approvals(
        &self,
        execution: &WorkflowExecution,
        node: &WorkflowNode,
        step_id: &str,
        ctx: &ExecutionContext,
    ) -> WorkflowResult<()> {
        let manager = self.inner.approvals.read().clone();
        let Some(manager) = manager else {
            tracing::warn!(
                execution_id = %execution.id,
                node_id = %node.id,
                "approval node reached but no approval manager is attached"
            );
            return Ok(());
        };
        // The executor already validated the config shape.
        let config: ApprovalNodeConfig = serde_json::from_value(node.config.clone())
            .map_err(|e| WorkflowError::InternalError(format!("approval config: {}", e)))?;
        manager
            .request_approval(execution, step_id, &node.id, &config, &ctx.variables)
            .await?;
        Ok(())
    }

    async fn finalize_completed(
        &self,
        definition: &WorkflowDefinition,
        execution: &mut WorkflowExecution,
        ctx: &ExecutionContext,
    ) -> WorkflowResult<()> {
        let now = self.inner.runtime.now();
        execution.status = ExecutionStatus::Completed;
        execution.progress = 100;
        execution.completed_at = Some(now);
        execution.variables = ctx.variables.snapshot();
        execution.log = ctx.log_entries();
        self.inner.store.update_execution(execution).await?;
        self.inner.store.increment_success(&definition.id).await?;
        self.inner.contexts.write().remove(&execution.id);
        let duration = (now - execution.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.inner
            .metrics
            .record_execution(&definition.id, true, duration, None);
        self.inner.events.emit(EngineEvent::WorkflowCompleted {
            execution_id: execution.id.clone(),
            outputs: execution.variables.clone(),
            correlation_id: execution.correlation_id.clone(),
            timestamp: now,
        });
        tracing::info!(execution_id = %execution.id, "workflow execution completed");
        Ok(())
    }

    async fn finalize_failure(
        &self,
        execution: &mut WorkflowExecution,
        ctx: &ExecutionContext,
        error: &WorkflowError,
    ) -> WorkflowResult<()> {
        let now = self.inner.runtime.now();
        execution.status = ExecutionStatus::Failed;
        execution.completed_at = Some(now);
        execution.error_message = Some(error.to_string());
        execution.retry_count = ctx.total_retries();
        execution.variables = ctx.variables.snapshot();
        execution.log = ctx.log_entries();
        self.inner.store.update_execution(execution).await?;
        self.inner
            .store
            .increment_failure(&execution.definition_id)
            .await?;
        self.inner.contexts.write().remove(&execution.id);
        let duration = (now - execution.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.inner.metrics.record_execution(
            &execution.definition_id,
            false,
            duration,
            Some(&error.to_string()),
        );
        let node_id = match error {
            WorkflowError::NodeExecutionFailed { node_id, .. } => Some(node_id.clone()),
            WorkflowError::Timeout(node_id) => Some(node_id.clone()),
            _ => None,
        };
        self.inner.events.emit(EngineEvent::ErrorOccurred {
            execution_id: execution.id.clone(),
            node_id,
            error: error.to_string(),
            timestamp: now,
        });
        self.inner.events.emit(EngineEvent::WorkflowFailed {
            execution_id: execution.id.clone(),
            error: error.to_string(),
            correlation_id: execution.correlation_id.clone(),
            timestamp: now,
        });
        tracing::warn!(
            execution_id = %execution.id,
            error = %error,
            "workflow execution failed"
        );
        Ok(())
    }

    async fn finalize_cancelled(
        &self,
        execution: &mut WorkflowExecution,
        ctx: &ExecutionContext,
    ) -> WorkflowResult<()> {
        let now = self.inner.runtime.now();
        execution.status = ExecutionStatus::Cancelled;
        execution.completed_at = Some(now);
        execution.variables = ctx.variables.snapshot();
        execution.log = ctx.log_entries();
        self.inner.store.update_execution(execution).await?;
        self.inner.contexts.write().remove(&execution.id);
        self.inner.events.emit(EngineEvent::WorkflowCancelled {
            execution_id: execution.id.clone(),
            reason: execution.error_message.clone(),
            correlation_id: execution.correlation_id.clone(),
            timestamp: now,
        });
        tracing::info!(execution_id = %execution.id, "execution observed cancellation");
        Ok(())
    }
}

struct EngineResumer(WorkflowEngine);

#[async_trait]
impl ExecutionResumer for EngineResumer {
    async fn resume(
        &self,
        execution_id: &str,
        resume_data: Value,
    ) -> WorkflowResult<WorkflowExecution> {
        self.0.resume_execution(execution_id, resume_data).await
    }
}

struct EngineSubWorkflows(WorkflowEngine);

#[async_trait]
impl SubWorkflowRunner for EngineSubWorkflows {
    async fn run(
        &self,
        definition_id: &str,
        payload: Value,
        parent_execution_id: &str,
    ) -> Result<Value, crate::error::NodeError> {
        let request = ExecuteRequest::new(definition_id, payload)
            .triggered_by("sub_workflow")
            .correlation(parent_execution_id);
        let execution = self
            .0
            .execute_workflow(request)
            .await
            .map_err(|e| crate::error::NodeError::ExecutionError(e.to_string()))?;
        Ok(execution.variables)
    }
}
