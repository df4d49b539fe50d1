//! Workflow scheduler
//!
//! The `Scheduler` is responsible for:
//! - Applying start/pause/resume/cancel transitions to live instances
//! - Dispatching ready tasks to the shared [`DispatchPool`]
//! - Recording attempt outcomes, scheduling retries and skipping dependents
//! - Finalizing instances once nothing can make progress
//!
//! Each live instance is an `InstanceRun` guarded by its own async mutex, so
//! transitions of one instance are serialized while different instances
//! progress independently. The store is written through after every
//! transition; the in-memory run is authoritative while it is live.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::executor::{RetryDecision, TaskError, TaskExecutor};
use crate::error::EngineError;
use crate::events::{event_types, EngineEvent, EventBus};
use crate::graph::{resolve, TaskGraph};
use crate::handler::{TaskContext, TaskOutput};
use crate::persistence::{StoreError, WorkflowStore};
use crate::worker::{DispatchPool, PoolError};
use crate::workflow::{
    AttemptOutcome, AttemptRecord, TaskDefinition, TaskFailure, TaskFailureKind, TaskState,
    TaskStatus, WorkflowDefinition, WorkflowInstance, WorkflowStatus,
};

/// Where a task is in the dispatch pipeline
///
/// Orthogonal to the persisted [`TaskStatus`]: a `PENDING` task may be idle,
/// queued for a slot or waiting out its retry delay.
#[derive(Debug)]
enum TaskPhase {
    Idle,
    Queued,
    Executing,
    RetryWait(JoinHandle<()>),
}

/// Mutable state of a live instance
struct RunState {
    instance: WorkflowInstance,
    definition: Arc<WorkflowDefinition>,
    graph: Arc<TaskGraph>,
    tasks: Vec<TaskState>,
    index: HashMap<String, usize>,
    phases: HashMap<String, TaskPhase>,
    cancel_requested: bool,
    awaiting_capacity: bool,
    finalized: bool,
}

impl RunState {
    fn task(&self, task_id: &str) -> Option<&TaskState> {
        self.index.get(task_id).map(|&i| &self.tasks[i])
    }

    fn status_of(&self, task_id: &str) -> Option<TaskStatus> {
        self.task(task_id).map(|t| t.status)
    }

    fn is_idle(&self, task_id: &str) -> bool {
        matches!(self.phases.get(task_id), None | Some(TaskPhase::Idle))
    }

    fn set_phase(&mut self, task_id: &str, phase: TaskPhase) {
        self.phases.insert(task_id.to_string(), phase);
    }

    fn is_executing(&self) -> bool {
        self.phases
            .values()
            .any(|p| matches!(p, TaskPhase::Executing))
    }

    /// Pending tasks whose dependencies have all completed
    fn ready_tasks(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| self.is_idle(&t.task_id))
            .filter(|t| {
                self.graph
                    .dependencies(&t.task_id)
                    .all(|dep| self.status_of(dep) == Some(TaskStatus::Completed))
            })
            .map(|t| t.task_id.clone())
            .collect()
    }

    fn next_instance(&self, status: WorkflowStatus) -> WorkflowInstance {
        let mut next = self.instance.clone();
        next.status = status;
        next.updated_at = Utc::now();
        if status.is_terminal() {
            next.completed_at = Some(next.updated_at);
        }
        next
    }
}

/// A live workflow instance
struct InstanceRun {
    instance_id: Uuid,
    tenant_id: String,
    cancel: CancellationToken,
    state: Mutex<RunState>,
}

/// Everything a worker slot needs for one attempt
struct Attempt {
    task: TaskDefinition,
    ctx: TaskContext,
    number: u32,
    started_at: DateTime<Utc>,
}

/// Drives workflow instances through their lifecycle
pub(crate) struct Scheduler {
    store: Arc<dyn WorkflowStore>,
    executor: TaskExecutor,
    pool: DispatchPool,
    events: EventBus,
    runs: DashMap<Uuid, Arc<InstanceRun>>,
}

impl Scheduler {
    pub(crate) fn new(
        store: Arc<dyn WorkflowStore>,
        executor: TaskExecutor,
        pool: DispatchPool,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            executor,
            pool,
            events,
            runs: DashMap::new(),
        }
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.events
    }

    pub(crate) fn pool(&self) -> &DispatchPool {
        &self.pool
    }

    /// Number of instances currently held in memory
    pub(crate) fn live_count(&self) -> usize {
        self.runs.len()
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// `PENDING -> RUNNING`, then dispatch every ready task
    #[instrument(skip(self))]
    pub(crate) async fn start(
        self: &Arc<Self>,
        tenant_id: &str,
        instance_id: Uuid,
    ) -> Result<(), EngineError> {
        let run = self.load_run(tenant_id, instance_id).await?;
        let mut state = run.state.lock().await;

        let from = state.instance.status;
        if from != WorkflowStatus::Pending || state.cancel_requested {
            return Err(EngineError::InvalidTransition {
                from,
                to: WorkflowStatus::Running,
            });
        }

        let next = state.next_instance(WorkflowStatus::Running);
        self.store.update_status(tenant_id, &next).await?;
        state.instance = next;

        info!(tasks = state.tasks.len(), "workflow started");
        self.emit_workflow(&run, event_types::WORKFLOW_STARTED).await;

        self.dispatch_ready(&run, &mut state);
        self.maybe_finalize(&run, &mut state).await?;
        Ok(())
    }

    /// `RUNNING -> PAUSED`; in-flight attempts finish, nothing new starts
    #[instrument(skip(self))]
    pub(crate) async fn pause(
        self: &Arc<Self>,
        tenant_id: &str,
        instance_id: Uuid,
    ) -> Result<(), EngineError> {
        let run = self.load_run(tenant_id, instance_id).await?;
        let mut state = run.state.lock().await;

        let from = state.instance.status;
        if from != WorkflowStatus::Running || state.cancel_requested {
            return Err(EngineError::InvalidTransition {
                from,
                to: WorkflowStatus::Paused,
            });
        }

        let next = state.next_instance(WorkflowStatus::Paused);
        self.store.update_status(tenant_id, &next).await?;
        state.instance = next;

        info!("workflow paused");
        self.emit_workflow(&run, event_types::WORKFLOW_PAUSED).await;
        Ok(())
    }

    /// `PAUSED -> RUNNING`, then re-evaluate readiness
    #[instrument(skip(self))]
    pub(crate) async fn resume(
        self: &Arc<Self>,
        tenant_id: &str,
        instance_id: Uuid,
    ) -> Result<(), EngineError> {
        let run = self.load_run(tenant_id, instance_id).await?;
        let mut state = run.state.lock().await;

        let from = state.instance.status;
        if from != WorkflowStatus::Paused || state.cancel_requested {
            return Err(EngineError::InvalidTransition {
                from,
                to: WorkflowStatus::Running,
            });
        }

        let next = state.next_instance(WorkflowStatus::Running);
        self.store.update_status(tenant_id, &next).await?;
        state.instance = next;

        info!("workflow resumed");
        self.emit_workflow(&run, event_types::WORKFLOW_RESUMED).await;

        self.dispatch_ready(&run, &mut state);
        self.maybe_finalize(&run, &mut state).await?;
        Ok(())
    }

    /// Cancel every non-terminal task and signal in-flight attempts
    ///
    /// The instance becomes `CANCELLED` as soon as no attempt is executing,
    /// which is immediately for instances that are not running anything.
    #[instrument(skip(self))]
    pub(crate) async fn cancel(
        self: &Arc<Self>,
        tenant_id: &str,
        instance_id: Uuid,
    ) -> Result<(), EngineError> {
        let run = self.load_run(tenant_id, instance_id).await?;
        let mut state = run.state.lock().await;

        let from = state.instance.status;
        if !from.can_transition_to(WorkflowStatus::Cancelled) || state.cancel_requested {
            return Err(EngineError::InvalidTransition {
                from,
                to: WorkflowStatus::Cancelled,
            });
        }

        state.cancel_requested = true;
        run.cancel.cancel();
        info!(%from, "workflow cancellation requested");
        self.emit_workflow(&run, event_types::WORKFLOW_CANCEL_REQUESTED)
            .await;

        let now = Utc::now();
        for i in 0..state.tasks.len() {
            if state.tasks[i].status.is_terminal() {
                continue;
            }

            let task_id = state.tasks[i].task_id.clone();
            match state.phases.remove(&task_id) {
                Some(TaskPhase::RetryWait(handle)) => handle.abort(),
                // Executing attempts keep their phase until they return.
                Some(TaskPhase::Executing) => state.set_phase(&task_id, TaskPhase::Executing),
                _ => {}
            }

            let mut next = state.tasks[i].clone();
            next.status = TaskStatus::Cancelled;
            next.finished_at = Some(now);
            self.write_task(&run, &next).await;
            state.tasks[i] = next;
            self.emit_task(&run, event_types::TASK_CANCELLED, &task_id, json!({}))
                .await;
        }

        self.maybe_finalize(&run, &mut state).await?;
        Ok(())
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Reload an instance left `RUNNING` by a previous process and resume dispatch
    #[instrument(skip(self, instance), fields(instance_id = %instance.instance_id, tenant_id = %instance.tenant_id))]
    pub(crate) async fn recover_instance(
        self: &Arc<Self>,
        instance: &WorkflowInstance,
    ) -> Result<bool, EngineError> {
        if self.runs.contains_key(&instance.instance_id) {
            return Ok(false);
        }

        let run = self
            .load_run(&instance.tenant_id, instance.instance_id)
            .await?;
        let mut state = run.state.lock().await;
        info!(tasks = state.tasks.len(), "recovering workflow");

        self.dispatch_ready(&run, &mut state);
        self.maybe_finalize(&run, &mut state).await?;
        Ok(true)
    }

    // =========================================================================
    // Run table
    // =========================================================================

    /// Get the live run for an instance, loading it from the store if needed
    ///
    /// Tasks a crashed process left `RUNNING` get an interrupted attempt in
    /// their history. They are reset to `PENDING` while attempts remain,
    /// giving at-least-once execution, fail once the budget is spent, and
    /// become `CANCELLED` when the instance was being cancelled.
    async fn load_run(
        &self,
        tenant_id: &str,
        instance_id: Uuid,
    ) -> Result<Arc<InstanceRun>, EngineError> {
        if let Some(run) = self.runs.get(&instance_id) {
            if run.tenant_id != tenant_id {
                return Err(EngineError::InstanceNotFound(instance_id));
            }
            return Ok(run.value().clone());
        }

        let instance = self.store.get(tenant_id, instance_id).await?;
        let definition = self
            .store
            .get_definition(tenant_id, &instance.definition_ref)
            .await?;
        let graph = resolve(&definition)?;
        let mut tasks = self.store.get_task_states(tenant_id, instance_id).await?;

        let is_terminal = instance.status.is_terminal();
        let cancel_requested =
            !is_terminal && tasks.iter().any(|t| t.status == TaskStatus::Cancelled);
        let mut exhausted = Vec::new();
        for task in tasks
            .iter_mut()
            .filter(|t| !is_terminal && t.status == TaskStatus::Running)
        {
            let max_attempts = definition
                .task(&task.task_id)
                .map_or(1, |t| t.retry_policy().max_attempts());
            interrupt(task, max_attempts, cancel_requested);
            if task.status == TaskStatus::Failed {
                exhausted.push(task.task_id.clone());
            }
            warn!(task_id = %task.task_id, status = %task.status, "reset interrupted task");
            self.store
                .update_task_state(tenant_id, instance_id, task)
                .await?;
        }

        let index = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.task_id.clone(), i))
            .collect();
        let cancel = CancellationToken::new();
        if cancel_requested {
            cancel.cancel();
        }

        let run = Arc::new(InstanceRun {
            instance_id,
            tenant_id: tenant_id.to_string(),
            cancel,
            state: Mutex::new(RunState {
                instance,
                definition: Arc::new(definition),
                graph: Arc::new(graph),
                tasks,
                index,
                phases: HashMap::new(),
                cancel_requested,
                awaiting_capacity: false,
                finalized: is_terminal,
            }),
        });

        if is_terminal {
            return Ok(run);
        }

        if !exhausted.is_empty() {
            let mut state = run.state.lock().await;
            for task_id in &exhausted {
                let attempt = state.task(task_id).map_or(0, |t| t.attempt_count);
                self.emit_task(
                    &run,
                    event_types::TASK_FAILED,
                    task_id,
                    json!({ "attempt": attempt, "error": "interrupted" }),
                )
                .await;
                self.skip_dependents(&run, &mut state, task_id).await;
            }
        }

        let live = self
            .runs
            .entry(instance_id)
            .or_insert_with(|| run)
            .value()
            .clone();
        Ok(live)
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Queue every ready task of a running instance
    fn dispatch_ready(self: &Arc<Self>, run: &Arc<InstanceRun>, state: &mut RunState) {
        if state.instance.status != WorkflowStatus::Running
            || state.cancel_requested
            || state.finalized
            || state.awaiting_capacity
        {
            return;
        }

        for task_id in state.ready_tasks() {
            let job = Box::pin(self.clone().run_job(run.clone(), task_id.clone()));
            match self.pool.enqueue(&run.tenant_id, job) {
                Ok(()) => {
                    debug!(instance_id = %run.instance_id, %task_id, "task queued");
                    state.set_phase(&task_id, TaskPhase::Queued);
                }
                Err(PoolError::Saturated { capacity }) => {
                    debug!(instance_id = %run.instance_id, capacity, "admission queue full, waiting");
                    state.awaiting_capacity = true;
                    self.redispatch_when_capacity(run);
                    break;
                }
                Err(e) => {
                    warn!(instance_id = %run.instance_id, %task_id, error = %e, "task not dispatched");
                    break;
                }
            }
        }
    }

    fn redispatch_when_capacity(self: &Arc<Self>, run: &Arc<InstanceRun>) {
        let scheduler = self.clone();
        let run = run.clone();
        tokio::spawn(async move {
            scheduler.pool.wait_for_capacity().await;
            let mut state = run.state.lock().await;
            state.awaiting_capacity = false;
            if scheduler.pool.is_accepting() {
                scheduler.dispatch_ready(&run, &mut state);
            }
        });
    }

    /// Body of one pool job: begin, run and record a single attempt
    async fn run_job(self: Arc<Self>, run: Arc<InstanceRun>, task_id: String) {
        let Some(attempt) = self.begin_attempt(&run, &task_id).await else {
            return;
        };

        let result = self.executor.run_attempt(&attempt.task, &attempt.ctx).await;
        self.finish_attempt(&run, &task_id, attempt, result).await;
    }

    async fn begin_attempt(&self, run: &Arc<InstanceRun>, task_id: &str) -> Option<Attempt> {
        let mut state = run.state.lock().await;

        if !matches!(state.phases.get(task_id), Some(TaskPhase::Queued)) {
            return None;
        }
        state.set_phase(task_id, TaskPhase::Idle);

        // Paused or cancelled while queued; resume re-dispatches.
        if state.instance.status != WorkflowStatus::Running
            || state.cancel_requested
            || state.status_of(task_id) != Some(TaskStatus::Pending)
        {
            debug!(instance_id = %run.instance_id, %task_id, "queued task withdrawn");
            return None;
        }

        let task = state.definition.task(task_id)?.clone();
        let &i = state.index.get(task_id)?;
        let started_at = Utc::now();

        let mut next = state.tasks[i].clone();
        next.status = TaskStatus::Running;
        next.attempt_count += 1;
        next.started_at.get_or_insert(started_at);
        let number = next.attempt_count;

        self.write_task(run, &next).await;
        state.tasks[i] = next;
        state.set_phase(task_id, TaskPhase::Executing);

        let ctx = TaskContext::new(
            run.instance_id,
            run.tenant_id.clone(),
            task_id,
            task.handler_ref.clone(),
            number,
            task.retry_policy().max_attempts(),
        )
        .with_input(task.input.clone())
        .with_snapshot(Arc::new(state.instance.context.clone()))
        .with_cancellation(run.cancel.child_token());

        debug!(instance_id = %run.instance_id, %task_id, attempt = number, "task attempt started");
        self.emit_task(run, event_types::TASK_STARTED, task_id, json!({ "attempt": number }))
            .await;

        Some(Attempt {
            task,
            ctx,
            number,
            started_at,
        })
    }

    async fn finish_attempt(
        self: &Arc<Self>,
        run: &Arc<InstanceRun>,
        task_id: &str,
        attempt: Attempt,
        result: Result<TaskOutput, TaskError>,
    ) {
        let mut state = run.state.lock().await;
        state.phases.remove(task_id);

        let Some(&i) = state.index.get(task_id) else {
            return;
        };
        let finished_at = Utc::now();
        let number = attempt.number;
        let failure = result.as_ref().err().map(|e| e.to_failure(number));

        let mut next = state.tasks[i].clone();
        let mut record = AttemptRecord {
            attempt: number,
            started_at: attempt.started_at,
            finished_at,
            outcome: AttemptOutcome::Completed,
            error: failure.clone(),
        };

        // Cancelled while in flight: keep the history, drop the outcome.
        if state.cancel_requested || next.status == TaskStatus::Cancelled {
            record.outcome = AttemptOutcome::Discarded;
            next.history.push(record);
            self.write_task(run, &next).await;
            state.tasks[i] = next;
            debug!(instance_id = %run.instance_id, %task_id, "attempt discarded after cancel");
            self.finalize_logged(run, &mut state).await;
            return;
        }

        match result {
            Ok(output) => {
                next.history.push(record);
                next.status = TaskStatus::Completed;
                next.result = Some(output.result);
                next.error = None;
                next.finished_at = Some(finished_at);
                self.write_task(run, &next).await;
                state.tasks[i] = next;

                if !output.context_updates.is_empty() {
                    let mut instance = state.instance.clone();
                    instance.context.extend(output.context_updates);
                    instance.updated_at = finished_at;
                    self.write_instance(run, &instance).await;
                    state.instance = instance;
                }

                info!(instance_id = %run.instance_id, %task_id, attempt = number, "task completed");
                self.emit_task(run, event_types::TASK_COMPLETED, task_id, json!({ "attempt": number }))
                    .await;
            }
            Err(err) => {
                record.outcome = AttemptOutcome::Failed;
                next.history.push(record);
                next.error = failure;

                match self.executor.retry_decision(&attempt.task, number, &err) {
                    RetryDecision::Retry { delay } => {
                        next.status = TaskStatus::Pending;
                        self.write_task(run, &next).await;
                        state.tasks[i] = next;

                        warn!(
                            instance_id = %run.instance_id, %task_id, attempt = number,
                            error = %err, ?delay, "task attempt failed, retrying"
                        );
                        self.emit_task(
                            run,
                            event_types::TASK_RETRYING,
                            task_id,
                            json!({
                                "attempt": number,
                                "delay_ms": delay.as_millis() as u64,
                                "error": err.to_string(),
                            }),
                        )
                        .await;

                        let handle = tokio::spawn(self.clone().retry_after(
                            run.clone(),
                            task_id.to_string(),
                            delay,
                        ));
                        state.set_phase(task_id, TaskPhase::RetryWait(handle));
                    }
                    RetryDecision::GiveUp => {
                        next.status = TaskStatus::Failed;
                        next.finished_at = Some(finished_at);
                        self.write_task(run, &next).await;
                        state.tasks[i] = next;

                        warn!(
                            instance_id = %run.instance_id, %task_id, attempt = number,
                            error = %err, "task failed"
                        );
                        self.emit_task(
                            run,
                            event_types::TASK_FAILED,
                            task_id,
                            json!({ "attempt": number, "error": err.to_string() }),
                        )
                        .await;

                        self.skip_dependents(run, &mut state, task_id).await;
                    }
                }
            }
        }

        self.dispatch_ready(run, &mut state);
        self.finalize_logged(run, &mut state).await;
    }

    /// Mark every direct or transitive dependent of a failed task `SKIPPED`
    async fn skip_dependents(&self, run: &Arc<InstanceRun>, state: &mut RunState, failed: &str) {
        let now = Utc::now();
        let graph = state.graph.clone();

        for dependent in graph.transitive_dependents(failed) {
            let Some(&i) = state.index.get(&dependent) else {
                continue;
            };
            if state.tasks[i].status.is_terminal() {
                continue;
            }

            let mut next = state.tasks[i].clone();
            next.status = TaskStatus::Skipped;
            next.finished_at = Some(now);
            self.write_task(run, &next).await;
            state.tasks[i] = next;

            debug!(instance_id = %run.instance_id, task_id = %dependent, %failed, "task skipped");
            self.emit_task(
                run,
                event_types::TASK_SKIPPED,
                &dependent,
                json!({ "failed_dependency": failed }),
            )
            .await;
        }
    }

    /// Retry timer: re-dispatch after the fixed delay without holding a slot
    async fn retry_after(
        self: Arc<Self>,
        run: Arc<InstanceRun>,
        task_id: String,
        delay: Duration,
    ) {
        tokio::time::sleep(delay).await;

        let mut state = run.state.lock().await;
        if !matches!(state.phases.get(&task_id), Some(TaskPhase::RetryWait(_))) {
            return;
        }
        state.set_phase(&task_id, TaskPhase::Idle);
        self.dispatch_ready(&run, &mut state);
    }

    // =========================================================================
    // Finalization
    // =========================================================================

    /// Move the instance to its terminal status once nothing can progress
    async fn maybe_finalize(
        &self,
        run: &Arc<InstanceRun>,
        state: &mut RunState,
    ) -> Result<(), StoreError> {
        if state.finalized || state.is_executing() {
            return Ok(());
        }

        let status = if state.cancel_requested {
            WorkflowStatus::Cancelled
        } else if state.instance.status == WorkflowStatus::Pending
            || !state.tasks.iter().all(|t| t.status.is_terminal())
        {
            return Ok(());
        } else if state.tasks.iter().all(|t| t.status == TaskStatus::Completed) {
            WorkflowStatus::Completed
        } else {
            WorkflowStatus::Failed
        };

        let next = state.next_instance(status);
        let written = self.store.update_status(&run.tenant_id, &next).await;
        if let Err(e) = &written {
            error!(instance_id = %run.instance_id, error = %e, "failed to persist terminal status");
        }
        state.instance = next;
        state.finalized = true;

        let event_type = match status {
            WorkflowStatus::Completed => event_types::WORKFLOW_COMPLETED,
            WorkflowStatus::Cancelled => event_types::WORKFLOW_CANCELLED,
            _ => event_types::WORKFLOW_FAILED,
        };
        info!(instance_id = %run.instance_id, %status, "workflow finished");
        self.emit_workflow(run, event_type).await;

        self.runs
            .remove_if(&run.instance_id, |_, live| Arc::ptr_eq(live, run));
        written
    }

    async fn finalize_logged(&self, run: &Arc<InstanceRun>, state: &mut RunState) {
        // Already logged inside; the run is finalized in memory regardless.
        let _ = self.maybe_finalize(run, state).await;
    }

    // =========================================================================
    // Write-through and events
    // =========================================================================

    async fn write_task(&self, run: &InstanceRun, task: &TaskState) {
        if let Err(e) = self
            .store
            .update_task_state(&run.tenant_id, run.instance_id, task)
            .await
        {
            error!(
                instance_id = %run.instance_id, task_id = %task.task_id,
                error = %e, "failed to persist task state"
            );
        }
    }

    async fn write_instance(&self, run: &InstanceRun, instance: &WorkflowInstance) {
        if let Err(e) = self.store.update_status(&run.tenant_id, instance).await {
            error!(instance_id = %run.instance_id, error = %e, "failed to persist instance");
        }
    }

    async fn emit_workflow(&self, run: &InstanceRun, event_type: &str) {
        self.events
            .emit(EngineEvent::workflow(
                event_type,
                &run.tenant_id,
                run.instance_id,
            ))
            .await;
    }

    async fn emit_task(
        &self,
        run: &InstanceRun,
        event_type: &str,
        task_id: &str,
        data: serde_json::Value,
    ) {
        self.events
            .emit(
                EngineEvent::task(event_type, &run.tenant_id, run.instance_id, task_id)
                    .with_data(data),
            )
            .await;
    }
}

/// Record the attempt a crashed process left in flight and settle the task
///
/// The lost attempt counts against the budget, so `attempt_count` never
/// exceeds `max_attempts` across restarts.
fn interrupt(task: &mut TaskState, max_attempts: u32, cancel_requested: bool) {
    let now = Utc::now();
    let attempt = task.attempt_count.max(1);
    task.attempt_count = attempt;

    let failure = TaskFailure {
        kind: TaskFailureKind::Interrupted,
        message: "attempt interrupted before it returned".to_string(),
        retryable: true,
        attempt,
    };
    // Only the first attempt's start is stored; the last finish is a closer bound.
    let started_at = task
        .history
        .last()
        .map(|r| r.finished_at)
        .or(task.started_at)
        .unwrap_or(now);
    task.history.push(AttemptRecord {
        attempt,
        started_at,
        finished_at: now,
        outcome: AttemptOutcome::Interrupted,
        error: Some(failure.clone()),
    });

    if cancel_requested {
        task.status = TaskStatus::Cancelled;
        task.finished_at = Some(now);
    } else if attempt >= max_attempts {
        task.status = TaskStatus::Failed;
        task.error = Some(failure);
        task.finished_at = Some(now);
    } else {
        task.status = TaskStatus::Pending;
        task.error = Some(failure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowContext;

    fn run_state(definition: WorkflowDefinition) -> RunState {
        let graph = resolve(&definition).unwrap();
        let instance = WorkflowInstance::new("t1", &definition, WorkflowContext::new());
        let tasks: Vec<TaskState> = definition
            .tasks
            .iter()
            .map(|t| TaskState::pending(&t.id))
            .collect();
        let index = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.task_id.clone(), i))
            .collect();

        RunState {
            instance,
            definition: Arc::new(definition),
            graph: Arc::new(graph),
            tasks,
            index,
            phases: HashMap::new(),
            cancel_requested: false,
            awaiting_capacity: false,
            finalized: false,
        }
    }

    fn set_status(state: &mut RunState, task_id: &str, status: TaskStatus) {
        let i = state.index[task_id];
        state.tasks[i].status = status;
    }

    #[test]
    fn test_ready_tasks_follow_dependencies() {
        let mut state = run_state(
            WorkflowDefinition::new("diamond", 1)
                .with_task(TaskDefinition::new("a", "x"))
                .with_task(TaskDefinition::new("b", "x"))
                .with_task(TaskDefinition::new("c", "x").depends_on(["a", "b"])),
        );

        assert_eq!(state.ready_tasks(), vec!["a", "b"]);

        state.set_phase("a", TaskPhase::Queued);
        assert_eq!(state.ready_tasks(), vec!["b"]);

        set_status(&mut state, "a", TaskStatus::Completed);
        state.set_phase("a", TaskPhase::Idle);
        set_status(&mut state, "b", TaskStatus::Running);
        state.set_phase("b", TaskPhase::Executing);
        assert!(state.ready_tasks().is_empty());
        assert!(state.is_executing());

        set_status(&mut state, "b", TaskStatus::Completed);
        state.phases.remove("b");
        assert_eq!(state.ready_tasks(), vec!["c"]);
    }

    #[test]
    fn test_failed_dependency_never_becomes_ready() {
        let mut state = run_state(
            WorkflowDefinition::new("chain", 1)
                .with_task(TaskDefinition::new("a", "x"))
                .with_task(TaskDefinition::new("b", "x").depends_on(["a"])),
        );

        set_status(&mut state, "a", TaskStatus::Failed);
        assert!(state.ready_tasks().is_empty());
    }

    fn running(attempt_count: u32) -> TaskState {
        let mut task = TaskState::pending("a");
        task.status = TaskStatus::Running;
        task.attempt_count = attempt_count;
        task.started_at = Some(Utc::now());
        task
    }

    #[test]
    fn test_interrupt_retries_while_attempts_remain() {
        let mut task = running(1);
        interrupt(&mut task, 3, false);

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempt_count, 1);
        assert_eq!(task.history.len(), 1);
        assert_eq!(task.history[0].outcome, AttemptOutcome::Interrupted);
        assert_eq!(
            task.error.as_ref().map(|e| e.kind),
            Some(TaskFailureKind::Interrupted)
        );
        assert!(task.finished_at.is_none());
    }

    #[test]
    fn test_interrupt_fails_when_budget_spent() {
        let mut task = running(1);
        interrupt(&mut task, 1, false);

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempt_count, 1);
        assert!(task.finished_at.is_some());
        assert_eq!(task.history[0].attempt, 1);
    }

    #[test]
    fn test_interrupt_cancels_during_cancel() {
        let mut task = running(1);
        interrupt(&mut task, 3, true);

        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.history.len(), 1);
        assert!(task.error.is_none());
    }

    #[test]
    fn test_next_instance_stamps_completion() {
        let state = run_state(WorkflowDefinition::new("empty", 1));

        let running = state.next_instance(WorkflowStatus::Running);
        assert!(running.completed_at.is_none());

        let done = state.next_instance(WorkflowStatus::Completed);
        assert_eq!(done.completed_at, Some(done.updated_at));
        assert_eq!(done.instance_id, state.instance.instance_id);
    }
}
