//! Session execution: start, resume and the scheduler loop
//!
//! The parent flow runs one node at a time. After each node the scheduler
//! merges the node's update, evaluates the outgoing edge and commits a
//! checkpoint with the pending next step before doing anything else.
//!
//! A fan-out runs its branches as separate tasks (bounded by
//! `max_concurrency`). Branch states are private; only accumulator fields
//! flow back, combined in branch order once every branch has finished, so
//! the joined state does not depend on which branch finished first.
//!
//! A parallel step runs each of its nodes once on the same state. Their full
//! updates are merged in declaration order, and a non-accumulating field may
//! be written by only one of them.
//!
//! Every node runs inside the session's [`Runtime`], which carries the call's
//! [`RunConfig`] and the graph's store.

use super::{CompiledGraph, RunOutcome, RunStatus};
use crate::config::JoinPolicy;
use crate::error::{GraphError, Result};
use crate::graph::{NodeId, END, START};
use crate::interrupt::{should_pause_before, InterruptWhen};
use crate::runtime::{self, get_runtime, get_store, RunConfig, Runtime};
use crate::send::RoutingDecision;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use stategraph_checkpoint::{
    BranchFailure, CheckpointId, CheckpointMetadata, CheckpointSaver, CheckpointSource,
    InMemoryCheckpointSaver, InterruptMarker, Pending, PendingBranch,
};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

/// Where a session stands between two steps
struct Cursor {
    state: Value,
    pending: Pending,
    step: i32,
    checkpoint_id: CheckpointId,
    /// Marker of the checkpoint a resume started from, until the first step runs
    resumed_from: Option<InterruptMarker>,
    config: RunConfig,
}

/// Task results of a fan-out or parallel step, by index
type TaskResults = JoinSet<(usize, Result<Value>)>;

/// Joined result of a fan-out batch or parallel step
struct BatchOutcome {
    delta: Value,
    failures: Vec<BranchFailure>,
}

impl CompiledGraph {
    /// Start a new session under a fresh id
    pub async fn start(&self, input: Value) -> Result<RunOutcome> {
        let session_id = Uuid::new_v4().to_string();
        self.start_with_session(&session_id, input).await
    }

    /// Start a new session under a caller-chosen id
    ///
    /// Runs until the flow completes, an interrupt point is reached, or a
    /// step fails. On failure the session keeps its last checkpoint and can
    /// be resumed from there.
    pub async fn start_with_session(&self, session_id: &str, input: Value) -> Result<RunOutcome> {
        self.start_with_config(session_id, input, RunConfig::default())
            .await
    }

    /// Start a new session whose nodes see `config`
    ///
    /// The configurable values are recorded on every checkpoint of the
    /// session, so later resumes run with them too.
    #[tracing::instrument(skip(self, input, config), fields(graph_id = %self.graph_id))]
    pub async fn start_with_config(
        &self,
        session_id: &str,
        input: Value,
        config: RunConfig,
    ) -> Result<RunOutcome> {
        let _guard = self.lock_session(session_id).await;

        if self.checkpointer.get(session_id).await?.is_some() {
            return Err(GraphError::Validation(format!(
                "session '{}' already exists",
                session_id
            )));
        }

        self.start_on(self.checkpointer.as_ref(), session_id, input, config)
            .await
            .map_err(|e| {
                tracing::error!(session_id, error = %e, "Session failed");
                e
            })
    }

    /// Continue a session from its latest checkpoint
    ///
    /// A non-empty `patch` is merged through the reducers and committed as
    /// an update checkpoint first. A session parked before a node runs that
    /// node instead of parking again.
    ///
    /// # Errors
    ///
    /// - [`GraphError::SessionNotFound`] when the session has no checkpoint
    /// - [`GraphError::SessionFinished`] when it already completed
    /// - any execution error, with the session left at its last checkpoint
    pub async fn resume(&self, session_id: &str, patch: Value) -> Result<RunOutcome> {
        self.resume_with_config(session_id, patch, RunConfig::default())
            .await
    }

    /// Continue a session with some configurable values replaced
    ///
    /// Keys in `config` override the ones recorded on the session from here
    /// on; the others keep their recorded values.
    #[tracing::instrument(skip(self, patch, config), fields(graph_id = %self.graph_id))]
    pub async fn resume_with_config(
        &self,
        session_id: &str,
        patch: Value,
        config: RunConfig,
    ) -> Result<RunOutcome> {
        let _guard = self.lock_session(session_id).await;
        let saver = self.checkpointer.as_ref();

        let checkpoint = saver
            .get(session_id)
            .await?
            .ok_or_else(|| GraphError::SessionNotFound(session_id.to_string()))?;

        if checkpoint.is_done() {
            return Err(GraphError::SessionFinished(session_id.to_string()));
        }
        if let Some(owner) = &checkpoint.metadata.graph_id {
            if owner != &self.graph_id {
                return Err(GraphError::Validation(format!(
                    "session '{}' belongs to graph '{}', not '{}'",
                    session_id, owner, self.graph_id
                )));
            }
        }

        let step = checkpoint.metadata.step.unwrap_or(-1);
        let mut cursor = Cursor {
            state: checkpoint.state,
            pending: checkpoint.pending,
            step,
            checkpoint_id: checkpoint.id,
            resumed_from: checkpoint.metadata.interrupt,
            config: RunConfig {
                configurable: checkpoint.metadata.configurable,
            }
            .overlaid(&config),
        };

        if has_content(&patch) {
            cursor.state = self
                .schema
                .merge(&cursor.state, &patch)
                .map_err(|e| GraphError::from_state("<patch>", e))?;

            let mut metadata = self.step_metadata(&cursor, CheckpointSource::Update, step);
            metadata.interrupt = cursor.resumed_from.clone();
            cursor.checkpoint_id = saver
                .save(session_id, cursor.state.clone(), cursor.pending.clone(), metadata)
                .await?;
        }

        tracing::info!(
            session_id,
            interrupted_at = ?cursor.resumed_from.as_ref().map(|m| m.node.as_str()),
            "Resuming session"
        );

        self.run(saver, session_id, cursor).await.map_err(|e| {
            tracing::error!(session_id, error = %e, "Session failed");
            e
        })
    }

    /// Run a throwaway session to completion and return its final state
    ///
    /// Nothing is written to the graph's checkpointer. Reaching an interrupt
    /// point is an error here, since nothing could resume the session. Called
    /// from inside a node, the run sees that node's configurable values.
    pub async fn invoke(&self, input: Value) -> Result<Value> {
        let saver = InMemoryCheckpointSaver::new();
        let session_id = Uuid::new_v4().to_string();
        let config = get_runtime()
            .map(|runtime| runtime.config().clone())
            .unwrap_or_default();

        let outcome = self.start_on(&saver, &session_id, input, config).await?;
        match outcome.status {
            RunStatus::Completed => Ok(outcome.state),
            RunStatus::Interrupted { node, when } => Err(GraphError::Interrupted { node, when }),
        }
    }

    async fn start_on(
        &self,
        saver: &dyn CheckpointSaver,
        session_id: &str,
        input: Value,
        config: RunConfig,
    ) -> Result<RunOutcome> {
        tracing::info!(session_id, "Starting session");

        let state = self
            .schema
            .instantiate(&input)
            .map_err(|e| GraphError::from_state("<input>", e))?;
        let pending = self.pending_for(self.graph.next(START, &state)?);

        let mut cursor = Cursor {
            state,
            pending,
            step: -1,
            checkpoint_id: 0,
            resumed_from: None,
            config,
        };
        let mut metadata = self.step_metadata(&cursor, CheckpointSource::Input, -1);
        metadata.interrupt = self.parked_marker(&cursor.pending);
        cursor.checkpoint_id = saver
            .save(session_id, cursor.state.clone(), cursor.pending.clone(), metadata)
            .await?;

        self.run(saver, session_id, cursor).await
    }

    /// Drive the session inside its runtime
    async fn run(
        &self,
        saver: &dyn CheckpointSaver,
        session_id: &str,
        cursor: Cursor,
    ) -> Result<RunOutcome> {
        // a subgraph without its own store shares its parent's
        let store = self.store.clone().or_else(get_store);
        let runtime = Runtime::new(session_id, cursor.config.clone()).with_store(store);
        runtime::scoped(Some(runtime), self.drive(saver, session_id, cursor)).await
    }

    async fn drive(
        &self,
        saver: &dyn CheckpointSaver,
        session_id: &str,
        mut cursor: Cursor,
    ) -> Result<RunOutcome> {
        let mut executed = 0usize;

        loop {
            match cursor.pending.clone() {
                Pending::Done => {
                    tracing::info!(
                        session_id,
                        checkpoint_id = cursor.checkpoint_id,
                        "Session completed"
                    );
                    return Ok(outcome(session_id, RunStatus::Completed, cursor));
                }

                Pending::Node { node } => {
                    if should_pause_before(
                        &self.interrupt_config,
                        &node,
                        cursor.resumed_from.as_ref(),
                    ) {
                        if cursor.resumed_from.is_some() {
                            // the resumed checkpoint carries another marker, so
                            // record this park or the next resume stops here again
                            let mut metadata =
                                self.step_metadata(&cursor, CheckpointSource::Update, cursor.step);
                            metadata.interrupt = self.parked_marker(&cursor.pending);
                            cursor.checkpoint_id = saver
                                .save(session_id, cursor.state.clone(), cursor.pending.clone(), metadata)
                                .await?;
                        }
                        tracing::info!(session_id, node = %node, "Interrupted before node");
                        let status = RunStatus::Interrupted {
                            node,
                            when: InterruptWhen::Before,
                        };
                        return Ok(outcome(session_id, status, cursor));
                    }
                    cursor.resumed_from = None;
                    self.count_step(&mut executed)?;

                    tracing::debug!(session_id, node = %node, step = cursor.step + 1, "Executing node");
                    let update = self
                        .graph
                        .nodes
                        .invoke(session_id, &node, cursor.state.clone())
                        .await?;
                    self.schema
                        .apply(&mut cursor.state, &update)
                        .map_err(|e| GraphError::from_state(node.as_str(), e))?;

                    let next = self.pending_for(self.graph.next(&node, &cursor.state)?);
                    let pause_after =
                        self.interrupt_config.should_interrupt_after(&node) && !next.is_done();

                    let mut metadata =
                        self.step_metadata(&cursor, CheckpointSource::Loop, cursor.step + 1);
                    metadata.interrupt = if pause_after {
                        Some(InterruptMarker {
                            node: node.clone(),
                            when: InterruptWhen::After,
                        })
                    } else {
                        self.parked_marker(&next)
                    };

                    cursor.checkpoint_id = saver
                        .save(session_id, cursor.state.clone(), next.clone(), metadata)
                        .await?;
                    cursor.step += 1;
                    cursor.pending = next;

                    if pause_after {
                        tracing::info!(session_id, node = %node, "Interrupted after node");
                        let status = RunStatus::Interrupted {
                            node,
                            when: InterruptWhen::After,
                        };
                        return Ok(outcome(session_id, status, cursor));
                    }
                }

                Pending::Branches { branches, join } => {
                    cursor.resumed_from = None;
                    self.count_step(&mut executed)?;

                    tracing::debug!(
                        session_id,
                        join = %join,
                        branches = branches.len(),
                        "Running fan-out"
                    );
                    let batch = self.run_batch(session_id, branches, join.clone()).await?;
                    self.schema
                        .apply(&mut cursor.state, &batch.delta)
                        .map_err(|e| GraphError::from_state(join.as_str(), e))?;

                    let next = self.pending_for(self.graph.after_join(&join, &cursor.state)?);
                    self.commit_batch(saver, session_id, &mut cursor, next, batch.failures)
                        .await?;
                }

                Pending::Parallel { nodes, join } => {
                    cursor.resumed_from = None;
                    self.count_step(&mut executed)?;

                    tracing::debug!(session_id, nodes = ?nodes, join = %join, "Running parallel step");
                    let batch = self.run_parallel(session_id, &nodes, &join, &cursor.state).await?;
                    self.schema
                        .apply(&mut cursor.state, &batch.delta)
                        .map_err(|e| GraphError::from_state(join.as_str(), e))?;

                    let next = if join == END {
                        Pending::Done
                    } else {
                        Pending::node(join)
                    };
                    self.commit_batch(saver, session_id, &mut cursor, next, batch.failures)
                        .await?;
                }
            }
        }
    }

    /// Commit the checkpoint that closes a fan-out or parallel step
    async fn commit_batch(
        &self,
        saver: &dyn CheckpointSaver,
        session_id: &str,
        cursor: &mut Cursor,
        next: Pending,
        failures: Vec<BranchFailure>,
    ) -> Result<()> {
        let mut metadata = self
            .step_metadata(cursor, CheckpointSource::Loop, cursor.step + 1)
            .with_failed_branches(failures);
        metadata.interrupt = self.parked_marker(&next);

        cursor.checkpoint_id = saver
            .save(session_id, cursor.state.clone(), next.clone(), metadata)
            .await?;
        cursor.step += 1;
        cursor.pending = next;
        Ok(())
    }

    /// Run every branch of a fan-out and join their accumulator updates
    ///
    /// Boxed because branches may fan out again.
    fn run_batch<'a>(
        &'a self,
        session_id: &'a str,
        branches: Vec<PendingBranch>,
        join: NodeId,
    ) -> BoxFuture<'a, Result<BatchOutcome>> {
        Box::pin(async move {
            let total = branches.len();
            let permits = self.permits();

            let mut tasks = TaskResults::new();
            for (index, branch) in branches.iter().cloned().enumerate() {
                let engine = self.clone();
                let session_id = session_id.to_string();
                let join = join.clone();
                let permits = permits.clone();

                tasks.spawn(runtime::scoped(get_runtime(), async move {
                    let _permit = match permits {
                        Some(permits) => permits.acquire_owned().await.ok(),
                        None => None,
                    };
                    let entry = branch.node.clone();
                    let result = AssertUnwindSafe(engine.run_branch(&session_id, branch, &join))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| {
                            Err(GraphError::node_execution(
                                session_id.as_str(),
                                entry,
                                panic_message(panic.as_ref()),
                            ))
                        });
                    (index, result)
                }));
            }

            let mut delta = json!({});
            let mut failures = Vec::new();
            let results = join_in_order(&mut tasks, total, session_id, &join).await?;
            for (index, result) in results.into_iter().enumerate() {
                match result {
                    Ok(contribution) => {
                        delta = self
                            .schema
                            .combine(&delta, &contribution)
                            .map_err(|e| GraphError::from_state(join.as_str(), e))?;
                    }
                    Err(err) if err.is_recoverable() => failures.push(BranchFailure {
                        index,
                        node: branches[index].node.clone(),
                        error: err.to_string(),
                    }),
                    Err(err) => return Err(err),
                }
            }

            self.settle(session_id, &join, total, &failures)?;
            Ok(BatchOutcome { delta, failures })
        })
    }

    /// Run the nodes of a parallel step on one state and merge their updates
    ///
    /// Updates merge in declaration order. A non-accumulating field written
    /// by two of the nodes is a [`GraphError::ConflictingUpdate`].
    async fn run_parallel(
        &self,
        session_id: &str,
        nodes: &[NodeId],
        join: &str,
        state: &Value,
    ) -> Result<BatchOutcome> {
        let permits = self.permits();

        let mut tasks = TaskResults::new();
        for (index, node) in nodes.iter().cloned().enumerate() {
            let engine = self.clone();
            let session_id = session_id.to_string();
            let state = state.clone();
            let permits = permits.clone();

            tasks.spawn(runtime::scoped(get_runtime(), async move {
                let _permit = match permits {
                    Some(permits) => permits.acquire_owned().await.ok(),
                    None => None,
                };
                let result = AssertUnwindSafe(engine.graph.nodes.invoke(&session_id, &node, state))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        Err(GraphError::node_execution(
                            session_id.as_str(),
                            node.as_str(),
                            panic_message(panic.as_ref()),
                        ))
                    });
                (index, result)
            }));
        }

        let mut delta = json!({});
        let mut writers: HashMap<String, NodeId> = HashMap::new();
        let mut failures = Vec::new();
        let results = join_in_order(&mut tasks, nodes.len(), session_id, join).await?;
        for (index, result) in results.into_iter().enumerate() {
            let node = &nodes[index];
            let update = match result {
                Ok(update) => update,
                Err(err) if err.is_recoverable() => {
                    failures.push(BranchFailure {
                        index,
                        node: node.clone(),
                        error: err.to_string(),
                    });
                    continue;
                }
                Err(err) => return Err(err),
            };

            delta = self
                .schema
                .combine(&delta, &update)
                .map_err(|e| GraphError::from_state(node.as_str(), e))?;
            for field in update.as_object().into_iter().flat_map(|obj| obj.keys()) {
                if self.schema.reducer(field).is_some_and(|r| r.is_accumulator()) {
                    continue;
                }
                if let Some(first) = writers.insert(field.clone(), node.clone()) {
                    return Err(GraphError::ConflictingUpdate {
                        field: field.clone(),
                        nodes: vec![first, node.clone()],
                    });
                }
            }
        }

        self.settle(session_id, join, nodes.len(), &failures)?;
        Ok(BatchOutcome { delta, failures })
    }

    /// Apply the join policy to the failed tasks of a step
    fn settle(&self, session_id: &str, join: &str, total: usize, failures: &[BranchFailure]) -> Result<()> {
        if failures.is_empty() {
            return Ok(());
        }
        match self.config.join_policy {
            JoinPolicy::Abort => {
                tracing::error!(
                    session_id,
                    join = %join,
                    failed = failures.len(),
                    total,
                    "Parallel tasks failed"
                );
                Err(GraphError::JoinFailure {
                    session_id: session_id.to_string(),
                    join: join.to_string(),
                    total,
                    failures: failures.to_vec(),
                })
            }
            JoinPolicy::Tolerate => {
                for failure in failures {
                    tracing::warn!(
                        session_id,
                        join = %join,
                        branch = failure.index,
                        node = %failure.node,
                        error = %failure.error,
                        "Tolerating failed branch"
                    );
                }
                Ok(())
            }
        }
    }

    /// Run one branch from its entry node until it reaches `join` or ends
    ///
    /// A branch whose entry is the join node runs just that node. Returns the
    /// combined accumulator updates of every node it ran.
    async fn run_branch(&self, session_id: &str, branch: PendingBranch, join: &str) -> Result<Value> {
        let PendingBranch { node: entry, state: input } = branch;
        let mut state = self
            .schema
            .instantiate(&input)
            .map_err(|e| GraphError::from_state(entry.as_str(), e))?;

        let entry_only = entry == join;
        let mut contribution = json!({});
        let mut step = RoutingDecision::Single(entry);
        let mut executed = 0usize;

        loop {
            match step {
                RoutingDecision::Terminal => break,
                RoutingDecision::Single(current) => {
                    if current == join && !(entry_only && executed == 0) {
                        break;
                    }
                    if self.interrupt_config.is_interrupt_point(&current) {
                        return Err(GraphError::Validation(format!(
                            "interrupt point '{}' cannot run inside a fan-out branch",
                            current
                        )));
                    }
                    self.count_step(&mut executed)?;

                    tracing::debug!(session_id, node = %current, "Executing branch node");
                    let update = self
                        .graph
                        .nodes
                        .invoke(session_id, &current, state.clone())
                        .await?;
                    let attribute = |e| GraphError::from_state(current.as_str(), e);
                    self.schema.apply(&mut state, &update).map_err(attribute)?;
                    let delta = self.schema.accumulator_delta(&update).map_err(attribute)?;
                    contribution = self.schema.combine(&contribution, &delta).map_err(attribute)?;

                    if entry_only {
                        break;
                    }
                    step = self.graph.next(&current, &state)?;
                }
                RoutingDecision::FanOut { sends, join: inner } => {
                    let nested = self
                        .run_batch(
                            session_id,
                            sends.into_iter().map(PendingBranch::from).collect(),
                            inner.clone(),
                        )
                        .await?;
                    let attribute = |e| GraphError::from_state(inner.as_str(), e);
                    self.schema.apply(&mut state, &nested.delta).map_err(attribute)?;
                    contribution = self
                        .schema
                        .combine(&contribution, &nested.delta)
                        .map_err(attribute)?;
                    step = self.graph.after_join(&inner, &state)?;
                }
                RoutingDecision::Parallel { nodes, join: inner } => {
                    self.count_step(&mut executed)?;
                    let batch = self.run_parallel(session_id, &nodes, &inner, &state).await?;
                    let attribute = |e| GraphError::from_state(inner.as_str(), e);
                    self.schema.apply(&mut state, &batch.delta).map_err(attribute)?;
                    let delta = self.schema.accumulator_delta(&batch.delta).map_err(attribute)?;
                    contribution = self.schema.combine(&contribution, &delta).map_err(attribute)?;
                    step = if inner == END {
                        RoutingDecision::Terminal
                    } else {
                        RoutingDecision::Single(inner)
                    };
                }
            }
        }

        Ok(contribution)
    }

    fn permits(&self) -> Option<Arc<Semaphore>> {
        self.config
            .max_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit)))
    }

    fn pending_for(&self, decision: RoutingDecision) -> Pending {
        match decision {
            RoutingDecision::Single(node) => Pending::node(node),
            RoutingDecision::Terminal => Pending::Done,
            RoutingDecision::FanOut { sends, join } => Pending::Branches {
                branches: sends.into_iter().map(PendingBranch::from).collect(),
                join,
            },
            RoutingDecision::Parallel { nodes, join } => Pending::Parallel { nodes, join },
        }
    }

    /// Marker for a checkpoint whose pending node is an interrupt-before point
    fn parked_marker(&self, pending: &Pending) -> Option<InterruptMarker> {
        match pending {
            Pending::Node { node } if self.interrupt_config.should_interrupt_before(node) => {
                Some(InterruptMarker {
                    node: node.clone(),
                    when: InterruptWhen::Before,
                })
            }
            _ => None,
        }
    }

    pub(crate) fn metadata(&self, source: CheckpointSource, step: i32) -> CheckpointMetadata {
        CheckpointMetadata::new()
            .with_source(source)
            .with_step(step)
            .with_graph_id(self.graph_id.as_str())
    }

    /// Metadata for a checkpoint of the cursor's session
    fn step_metadata(&self, cursor: &Cursor, source: CheckpointSource, step: i32) -> CheckpointMetadata {
        self.metadata(source, step)
            .with_configurable(cursor.config.configurable.clone())
    }

    fn count_step(&self, executed: &mut usize) -> Result<()> {
        if *executed >= self.config.max_steps {
            return Err(GraphError::RecursionLimit {
                limit: self.config.max_steps,
            });
        }
        *executed += 1;
        Ok(())
    }
}

fn outcome(session_id: &str, status: RunStatus, cursor: Cursor) -> RunOutcome {
    RunOutcome {
        session_id: session_id.to_string(),
        status,
        state: cursor.state,
        checkpoint_id: cursor.checkpoint_id,
    }
}

/// Collect task results in index order once every task has finished
async fn join_in_order(
    tasks: &mut TaskResults,
    total: usize,
    session_id: &str,
    join: &str,
) -> Result<Vec<Result<Value>>> {
    let mut ordered: Vec<Option<Result<Value>>> = (0..total).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        let (index, result) = joined.map_err(|e| {
            GraphError::node_execution(session_id, join, format!("branch task failed: {}", e))
        })?;
        ordered[index] = Some(result);
    }
    Ok(ordered
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| {
                Err(GraphError::node_execution(session_id, join, "branch task did not report"))
            })
        })
        .collect())
}

/// Whether a resume patch would change anything
pub(crate) fn has_content(patch: &Value) -> bool {
    match patch {
        Value::Null => false,
        Value::Object(obj) => !obj.is_empty(),
        _ => true,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("branch panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("branch panicked: {}", message)
    } else {
        "branch panicked".to_string()
    }
}
