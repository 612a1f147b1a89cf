use super::*;
use crate::builder::StateGraph;
use crate::config::{ExecutionConfig, JoinPolicy};
use crate::error::GraphError;
use crate::graph::{END, START};
use crate::interrupt::InterruptWhen;
use crate::state::{AppendReducer, OverwriteReducer, StateSchema, SumReducer};
use futures::StreamExt;
use serde_json::{json, Value};
use stategraph_checkpoint::{CheckpointSaver, CheckpointSource, InMemoryCheckpointSaver, Pending};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn schema() -> StateSchema {
    StateSchema::new()
        .with_field("value", Box::new(OverwriteReducer))
        .with_field("log", Box::new(AppendReducer))
        .with_field("total", Box::new(SumReducer))
        .with_field("item", Box::new(OverwriteReducer))
}

fn logging(name: &'static str) -> impl Fn(Value) -> crate::NodeFuture + Send + Sync + 'static {
    move |_: Value| -> crate::NodeFuture { Box::pin(async move { Ok(json!({"log": [name]})) }) }
}

fn three_step(interrupt_before: &[&str], interrupt_after: &[&str]) -> (CompiledGraph, Arc<InMemoryCheckpointSaver>) {
    let mut graph = StateGraph::new(schema());
    graph
        .add_node("a", logging("a"))
        .add_node("b", logging("b"))
        .add_node("c", logging("c"))
        .add_edge(START, "a")
        .add_edge("a", "b")
        .add_edge("b", "c")
        .add_edge("c", END)
        .interrupt_before(interrupt_before.iter().copied())
        .interrupt_after(interrupt_after.iter().copied());

    let saver = Arc::new(InMemoryCheckpointSaver::new());
    let compiled = graph.compile_with_checkpointer(saver.clone()).unwrap();
    (compiled, saver)
}

#[tokio::test]
async fn test_one_checkpoint_per_step() {
    let (graph, saver) = three_step(&[], &[]);
    let outcome = graph.start_with_session("s1", json!({})).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.state["log"], json!(["a", "b", "c"]));
    // input checkpoint plus one per node
    assert_eq!(saver.checkpoint_count().await, 4);

    let history: Vec<StateSnapshot> = graph
        .get_state_history("s1", None)
        .await
        .unwrap()
        .map(|s| s.unwrap())
        .collect()
        .await;
    let steps: Vec<i32> = history.iter().filter_map(|s| s.metadata.step).collect();
    assert_eq!(steps, vec![2, 1, 0, -1]);
    assert_eq!(history[3].metadata.source, Some(CheckpointSource::Input));
    assert_eq!(history[3].next, vec!["a".to_string()]);
    assert!(history[0].is_done());
}

#[tokio::test]
async fn test_interrupt_before_parks_and_resumes_once() {
    let (graph, _saver) = three_step(&["b"], &[]);

    let outcome = graph.start_with_session("s1", json!({})).await.unwrap();
    assert_eq!(
        outcome.status,
        RunStatus::Interrupted {
            node: "b".into(),
            when: InterruptWhen::Before
        }
    );
    assert_eq!(outcome.state["log"], json!(["a"]));

    let snapshot = graph.get_state("s1").await.unwrap().unwrap();
    assert_eq!(snapshot.next, vec!["b".to_string()]);
    assert_eq!(snapshot.interrupted_at(), Some("b"));

    let done = graph.resume("s1", json!({"value": 7})).await.unwrap();
    assert!(done.status.is_completed());
    assert_eq!(done.state["log"], json!(["a", "b", "c"]));
    assert_eq!(done.state["value"], json!(7));

    assert!(matches!(
        graph.resume("s1", json!({})).await,
        Err(GraphError::SessionFinished(_))
    ));
}

#[tokio::test]
async fn test_interrupt_after_commits_then_pauses() {
    let (graph, _saver) = three_step(&[], &["a"]);

    let outcome = graph.start_with_session("s1", json!({})).await.unwrap();
    assert_eq!(
        outcome.status,
        RunStatus::Interrupted {
            node: "a".into(),
            when: InterruptWhen::After
        }
    );
    let snapshot = graph.get_state("s1").await.unwrap().unwrap();
    assert_eq!(snapshot.values["log"], json!(["a"]));
    assert_eq!(snapshot.next, vec!["b".to_string()]);

    let done = graph.resume("s1", Value::Null).await.unwrap();
    assert_eq!(done.state["log"], json!(["a", "b", "c"]));
}

#[tokio::test]
async fn test_interrupt_after_then_before_on_next_node() {
    let (graph, _saver) = three_step(&["b"], &["a"]);

    let outcome = graph.start_with_session("s1", json!({})).await.unwrap();
    assert_eq!(
        outcome.status,
        RunStatus::Interrupted {
            node: "a".into(),
            when: InterruptWhen::After
        }
    );

    let parked = graph.resume("s1", Value::Null).await.unwrap();
    assert_eq!(
        parked.status,
        RunStatus::Interrupted {
            node: "b".into(),
            when: InterruptWhen::Before
        }
    );
    let snapshot = graph.get_state("s1").await.unwrap().unwrap();
    assert_eq!(snapshot.interrupted_at(), Some("b"));
    assert_eq!(snapshot.checkpoint_id, parked.checkpoint_id);

    // the second resume runs b instead of parking at it again
    let done = graph.resume("s1", Value::Null).await.unwrap();
    assert!(done.status.is_completed());
    assert_eq!(done.state["log"], json!(["a", "b", "c"]));
}

#[tokio::test]
async fn test_patched_resume_after_interrupt_after_reaches_completion() {
    let (graph, _saver) = three_step(&["b"], &["a"]);
    graph.start_with_session("s1", json!({})).await.unwrap();

    let parked = graph.resume("s1", json!({"value": 1})).await.unwrap();
    assert!(parked.status.is_interrupted());

    let done = graph.resume("s1", json!({"value": 2})).await.unwrap();
    assert!(done.status.is_completed());
    assert_eq!(done.state["value"], json!(2));
    assert_eq!(done.state["log"], json!(["a", "b", "c"]));
}

#[tokio::test]
async fn test_resume_patch_goes_through_reducers() {
    let (graph, _saver) = three_step(&["b"], &[]);
    graph.start_with_session("s1", json!({})).await.unwrap();

    let done = graph
        .resume("s1", json!({"log": ["human"], "total": 5}))
        .await
        .unwrap();
    assert_eq!(done.state["log"], json!(["a", "human", "b", "c"]));
    assert_eq!(done.state["total"], json!(5));

    let history: Vec<StateSnapshot> = graph
        .get_state_history("s1", None)
        .await
        .unwrap()
        .map(|s| s.unwrap())
        .collect()
        .await;
    assert!(history
        .iter()
        .any(|s| s.metadata.source == Some(CheckpointSource::Update)));
}

#[tokio::test]
async fn test_patch_with_unknown_field_is_rejected() {
    let (graph, _saver) = three_step(&["b"], &[]);
    graph.start_with_session("s1", json!({})).await.unwrap();

    let err = graph.resume("s1", json!({"mood": "sad"})).await.unwrap_err();
    assert!(matches!(err, GraphError::UnknownField { ref field, .. } if field == "mood"));

    // still parked
    let snapshot = graph.get_state("s1").await.unwrap().unwrap();
    assert_eq!(snapshot.interrupted_at(), Some("b"));
}

#[tokio::test]
async fn test_failed_node_is_resumable() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();

    let mut graph = StateGraph::new(schema());
    graph
        .add_node("a", logging("a"))
        .add_node("flaky", move |_| {
            let counter = counter.clone();
            Box::pin(async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err("upstream timeout".into());
                }
                Ok(json!({"log": ["flaky"]}))
            })
        })
        .add_edge(START, "a")
        .add_edge("a", "flaky")
        .add_edge("flaky", END);
    let graph = graph.compile().unwrap();

    let err = graph.start_with_session("s1", json!({})).await.unwrap_err();
    match &err {
        GraphError::NodeExecution { session_id, node, error } => {
            assert_eq!(session_id, "s1");
            assert_eq!(node, "flaky");
            assert!(error.contains("upstream timeout"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_recoverable());

    // last committed checkpoint still points at the failed node
    let snapshot = graph.get_state("s1").await.unwrap().unwrap();
    assert_eq!(snapshot.next, vec!["flaky".to_string()]);
    assert_eq!(snapshot.values["log"], json!(["a"]));

    let done = graph.resume("s1", Value::Null).await.unwrap();
    assert_eq!(done.state["log"], json!(["a", "flaky"]));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_recursion_limit() {
    let mut graph = StateGraph::new(schema());
    graph
        .add_node("spin", |_| Box::pin(async move { Ok(json!({"total": 1})) }))
        .add_edge(START, "spin")
        .add_edge("spin", "spin")
        .with_config(ExecutionConfig::default().with_max_steps(5));
    let graph = graph.compile().unwrap();

    let err = graph.start_with_session("s1", json!({})).await.unwrap_err();
    assert!(matches!(err, GraphError::RecursionLimit { limit: 5 }));
    let snapshot = graph.get_state("s1").await.unwrap().unwrap();
    assert_eq!(snapshot.values["total"], json!(5));
}

#[tokio::test]
async fn test_invoke_cannot_park() {
    let (graph, saver) = three_step(&["c"], &[]);
    let err = graph.invoke(json!({})).await.unwrap_err();
    assert!(matches!(
        err,
        GraphError::Interrupted { ref node, when: InterruptWhen::Before } if node == "c"
    ));
    // throwaway sessions never reach the graph's checkpointer
    assert_eq!(saver.session_count().await, 0);
}

#[tokio::test]
async fn test_unknown_session() {
    let (graph, _saver) = three_step(&[], &[]);
    assert!(matches!(
        graph.resume("missing", json!({})).await,
        Err(GraphError::SessionNotFound(_))
    ));
    assert!(graph.get_state("missing").await.unwrap().is_none());
    assert!(matches!(
        graph.update_state("missing", json!({"value": 1})).await,
        Err(GraphError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_duplicate_session_id_rejected() {
    let (graph, _saver) = three_step(&["b"], &[]);
    graph.start_with_session("s1", json!({})).await.unwrap();
    assert!(matches!(
        graph.start_with_session("s1", json!({})).await,
        Err(GraphError::Validation(_))
    ));
}

#[tokio::test]
async fn test_update_state_keeps_interrupt() {
    let (graph, _saver) = three_step(&["b"], &[]);
    graph.start_with_session("s1", json!({})).await.unwrap();

    graph.update_state("s1", json!({"value": 3})).await.unwrap();
    let snapshot = graph.get_state("s1").await.unwrap().unwrap();
    assert_eq!(snapshot.values["value"], json!(3));
    assert_eq!(snapshot.metadata.source, Some(CheckpointSource::Update));
    assert_eq!(snapshot.interrupted_at(), Some("b"));

    // resuming after an out-of-band update still runs b rather than parking again
    let done = graph.resume("s1", Value::Null).await.unwrap();
    assert_eq!(done.state["log"], json!(["a", "b", "c"]));
}

#[tokio::test]
async fn test_abandon_forgets_session() {
    let (graph, saver) = three_step(&["b"], &[]);
    graph.start_with_session("s1", json!({})).await.unwrap();

    graph.abandon("s1").await.unwrap();
    assert_eq!(saver.session_count().await, 0);
    assert!(matches!(
        graph.resume("s1", json!({})).await,
        Err(GraphError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_session_locks_released_after_calls() {
    let (graph, _saver) = three_step(&["b"], &[]);
    for i in 0..5 {
        graph
            .start_with_session(&format!("s{}", i), json!({}))
            .await
            .unwrap();
    }
    assert_eq!(graph.locked_sessions().await, 0);

    graph.resume("s0", Value::Null).await.unwrap();
    graph.update_state("s1", json!({"value": 1})).await.unwrap();
    graph.abandon("s2").await.unwrap();
    assert_eq!(graph.locked_sessions().await, 0);
}

#[tokio::test]
async fn test_calls_on_one_session_are_serialized() {
    let (graph, _saver) = three_step(&["b"], &[]);
    graph.start_with_session("s1", json!({})).await.unwrap();

    let held = graph.lock_session("s1").await;
    assert_eq!(graph.locked_sessions().await, 1);

    let contender = {
        let graph = graph.clone();
        tokio::spawn(async move { graph.resume("s1", Value::Null).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(!contender.is_finished());

    drop(held);
    let done = contender.await.unwrap().unwrap();
    assert!(done.status.is_completed());

    // a second caller queued behind the first sees the finished session
    let (first, second) = tokio::join!(graph.resume("s1", Value::Null), graph.resume("s1", Value::Null));
    assert!(matches!(first, Err(GraphError::SessionFinished(_))));
    assert!(matches!(second, Err(GraphError::SessionFinished(_))));
    assert_eq!(graph.locked_sessions().await, 0);
}

#[tokio::test]
async fn test_concurrent_resumes_run_the_session_once() {
    let (graph, _saver) = three_step(&["b"], &[]);
    graph.start_with_session("s1", json!({})).await.unwrap();

    let (first, second) = tokio::join!(graph.resume("s1", Value::Null), graph.resume("s1", Value::Null));
    let completed = [&first, &second]
        .iter()
        .filter(|r| matches!(r, Ok(outcome) if outcome.status.is_completed()))
        .count();
    let finished = [&first, &second]
        .iter()
        .filter(|r| matches!(r, Err(GraphError::SessionFinished(_))))
        .count();
    assert_eq!((completed, finished), (1, 1));

    let snapshot = graph.get_state("s1").await.unwrap().unwrap();
    assert_eq!(snapshot.values["log"], json!(["a", "b", "c"]));
}

#[tokio::test]
async fn test_fan_out_joins_accumulators_only() {
    let mut graph = StateGraph::new(schema());
    graph
        .add_node("split", |_| Box::pin(async move { Ok(json!({"value": "split"})) }))
        .add_node("work", |state| {
            Box::pin(async move {
                let item = state["item"].as_i64().unwrap_or(0);
                Ok(json!({"total": item, "log": [format!("work-{}", item)], "value": "branch"}))
            })
        })
        .add_node("report", logging("report"))
        .add_edge(START, "split")
        .add_fan_out(
            "split",
            |_| {
                (1..=3)
                    .map(|i| crate::send::Send::new("work", json!({"item": i})))
                    .collect()
            },
            ["work"],
            "report",
        )
        .add_edge("work", "report")
        .add_edge("report", END);
    let graph = graph.compile().unwrap();

    let outcome = graph.start_with_session("s1", json!({})).await.unwrap();
    assert_eq!(outcome.state["total"], json!(6));
    assert_eq!(outcome.state["log"], json!(["work-1", "work-2", "work-3", "report"]));
    // overwrite fields written inside branches stay in the branch
    assert_eq!(outcome.state["value"], json!("split"));

    let history: Vec<StateSnapshot> = graph
        .get_state_history("s1", None)
        .await
        .unwrap()
        .map(|s| s.unwrap())
        .collect()
        .await;
    // input, split, join, report
    assert_eq!(history.len(), 4);
    let after_split = &history[2];
    assert_eq!(after_split.next, vec!["work", "work", "work"]);
    assert_eq!(after_split.join.as_deref(), Some("report"));
}

#[tokio::test]
async fn test_empty_fan_out_goes_to_join() {
    let mut graph = StateGraph::new(schema());
    graph
        .add_node("split", logging("split"))
        .add_node("work", logging("work"))
        .add_node("report", logging("report"))
        .add_edge(START, "split")
        .add_fan_out("split", |_| Vec::new(), ["work"], "report")
        .add_edge("report", END);
    let graph = graph.compile().unwrap();

    let state = graph.invoke(json!({})).await.unwrap();
    assert_eq!(state["log"], json!(["split", "report"]));
}

#[tokio::test]
async fn test_join_policies() {
    fn build(policy: JoinPolicy) -> CompiledGraph {
        let mut graph = StateGraph::new(schema());
        graph
            .add_node("split", logging("split"))
            .add_node("work", |state| {
                Box::pin(async move {
                    let item = state["item"].as_i64().unwrap_or(0);
                    if item == 2 {
                        return Err("item 2 is cursed".into());
                    }
                    Ok(json!({"total": item}))
                })
            })
            .add_node("report", logging("report"))
            .add_edge(START, "split")
            .add_fan_out(
                "split",
                |_| {
                    (1..=3)
                        .map(|i| crate::send::Send::new("work", json!({"item": i})))
                        .collect()
                },
                ["work"],
                "report",
            )
            .add_edge("report", END)
            .with_config(ExecutionConfig::default().with_join_policy(policy));
        graph.compile().unwrap()
    }

    let abort = build(JoinPolicy::Abort);
    let err = abort.start_with_session("s1", json!({})).await.unwrap_err();
    match err {
        GraphError::JoinFailure { join, total, failures, .. } => {
            assert_eq!(join, "report");
            assert_eq!(total, 3);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].index, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    // parent stays before the fan-out
    let snapshot = abort.get_state("s1").await.unwrap().unwrap();
    assert_eq!(snapshot.values["total"], json!(0));
    assert_eq!(snapshot.join.as_deref(), Some("report"));

    let tolerate = build(JoinPolicy::Tolerate);
    let outcome = tolerate.start_with_session("s1", json!({})).await.unwrap();
    assert_eq!(outcome.state["total"], json!(4));
    assert_eq!(outcome.state["log"], json!(["split", "report"]));

    let history: Vec<StateSnapshot> = tolerate
        .get_state_history("s1", None)
        .await
        .unwrap()
        .map(|s| s.unwrap())
        .collect()
        .await;
    let join_checkpoint = history
        .iter()
        .find(|s| !s.metadata.failed_branches.is_empty())
        .unwrap();
    assert_eq!(join_checkpoint.metadata.failed_branches[0].index, 1);
    assert_eq!(join_checkpoint.next, vec!["report".to_string()]);
}

#[tokio::test]
async fn test_interrupt_inside_branch_is_rejected() {
    let mut graph = StateGraph::new(schema());
    graph
        .add_node("split", logging("split"))
        .add_node("work", logging("work"))
        .add_edge(START, "split")
        .add_fan_out(
            "split",
            |_| vec![crate::send::Send::new("work", json!({}))],
            ["work"],
            END,
        )
        .interrupt_before(["work"]);
    let graph = graph.compile().unwrap();

    assert!(matches!(
        graph.start_with_session("s1", json!({})).await,
        Err(GraphError::Validation(_))
    ));
}

#[tokio::test]
async fn test_pending_fan_out_is_persisted() {
    let mut graph = StateGraph::new(schema());
    graph
        .add_node("split", logging("split"))
        .add_node("work", |state| {
            Box::pin(async move { Ok(json!({"total": state["item"].clone()})) })
        })
        .add_node("gate", logging("gate"))
        .add_edge(START, "split")
        .add_edge("split", "gate")
        .add_fan_out(
            "gate",
            |state| {
                let n = state["value"].as_i64().unwrap_or(0);
                (0..n)
                    .map(|i| crate::send::Send::new("work", json!({"item": i + 1})))
                    .collect()
            },
            ["work"],
            END,
        )
        .interrupt_after(["gate"]);
    let graph = graph.compile().unwrap();

    let outcome = graph.start_with_session("s1", json!({"value": 2})).await.unwrap();
    assert!(outcome.status.is_interrupted());

    let checkpoint = graph.checkpointer().load("s1").await.unwrap();
    match &checkpoint.pending {
        Pending::Branches { branches, join } => {
            assert_eq!(branches.len(), 2);
            assert_eq!(join, END);
        }
        other => panic!("unexpected pending: {other:?}"),
    }

    // the branch list was fixed when the router ran
    let done = graph.resume("s1", json!({"value": 10})).await.unwrap();
    assert_eq!(done.state["total"], json!(3));
}

fn writers(left: Value, right: Value) -> StateGraph {
    let mut graph = StateGraph::new(schema());
    graph
        .add_node("split", logging("split"))
        .add_node("left", move |_| {
            let update = left.clone();
            Box::pin(async move {
                // finishes last, yet merges first
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Ok(update)
            })
        })
        .add_node("right", move |_| {
            let update = right.clone();
            Box::pin(async move { Ok(update) })
        })
        .add_node("join", logging("join"))
        .add_edge(START, "split")
        .add_edge("split", "left")
        .add_edge("split", "right")
        .add_edge("left", "join")
        .add_edge("right", "join")
        .add_edge("join", END);
    graph
}

#[tokio::test]
async fn test_parallel_step_merges_updates_in_declaration_order() {
    let graph = writers(
        json!({"value": "from-left", "log": ["left"], "total": 1}),
        json!({"item": "from-right", "log": ["right"], "total": 2}),
    )
    .compile()
    .unwrap();

    let outcome = graph.start_with_session("s1", json!({})).await.unwrap();
    assert!(outcome.status.is_completed());
    assert_eq!(outcome.state["value"], json!("from-left"));
    assert_eq!(outcome.state["item"], json!("from-right"));
    assert_eq!(outcome.state["total"], json!(3));
    assert_eq!(outcome.state["log"], json!(["split", "left", "right", "join"]));

    let history: Vec<StateSnapshot> = graph
        .get_state_history("s1", None)
        .await
        .unwrap()
        .map(|s| s.unwrap())
        .collect()
        .await;
    // input, split, the parallel step, join
    assert_eq!(history.len(), 4);
    assert_eq!(history[2].next, vec!["left".to_string(), "right".to_string()]);
    assert_eq!(history[2].join.as_deref(), Some("join"));
    assert_eq!(history[1].next, vec!["join".to_string()]);
}

#[tokio::test]
async fn test_parallel_write_conflict_commits_nothing() {
    let graph = writers(json!({"value": "a", "total": 1}), json!({"value": "b", "total": 2}))
        .compile()
        .unwrap();

    let err = graph.start_with_session("s1", json!({})).await.unwrap_err();
    match err {
        GraphError::ConflictingUpdate { field, nodes } => {
            assert_eq!(field, "value");
            assert_eq!(nodes, vec!["left".to_string(), "right".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }

    let snapshot = graph.get_state("s1").await.unwrap().unwrap();
    assert_eq!(snapshot.values["total"], json!(0));
    assert_eq!(snapshot.next, vec!["left".to_string(), "right".to_string()]);
}

#[tokio::test]
async fn test_parallel_step_parks_before_join() {
    let mut graph = writers(json!({"log": ["left"]}), json!({"log": ["right"]}));
    graph.interrupt_before(["join"]);
    let graph = graph.compile().unwrap();

    let outcome = graph.start_with_session("s1", json!({})).await.unwrap();
    assert_eq!(
        outcome.status,
        RunStatus::Interrupted {
            node: "join".into(),
            when: InterruptWhen::Before
        }
    );
    assert_eq!(outcome.state["log"], json!(["split", "left", "right"]));

    let done = graph.resume("s1", Value::Null).await.unwrap();
    assert_eq!(done.state["log"], json!(["split", "left", "right", "join"]));
}

#[tokio::test]
async fn test_parallel_target_cannot_be_interrupt_point() {
    let mut graph = writers(json!(null), json!(null));
    graph.interrupt_after(["left"]);
    assert!(matches!(graph.compile(), Err(GraphError::Validation(_))));
}

#[tokio::test]
async fn test_conditional_fan_out_joining_on_its_target() {
    let mut graph = StateGraph::new(schema());
    graph
        .add_node("review", logging("review"))
        .add_node("redo", logging("redo"))
        .add_node("work", |state| {
            Box::pin(async move {
                let item = state["item"].as_i64().unwrap_or(0);
                Ok(json!({"total": item, "log": [format!("work-{}", item)]}))
            })
        })
        .add_node("report", logging("report"))
        .add_edge(START, "review")
        .add_conditional_fan_out(
            "review",
            |state: &Value| -> crate::send::Route {
                let n = state["value"].as_i64().unwrap_or(0);
                if n == 0 {
                    crate::send::Route::Node("redo".into())
                } else {
                    crate::send::Route::Sends(
                        (1..=n)
                            .map(|i| crate::send::Send::new("work", json!({"item": i})))
                            .collect(),
                    )
                }
            },
            ["redo", "work"],
            "work",
        )
        .add_edge("redo", END)
        .add_edge("work", "report")
        .add_edge("report", END);
    let graph = graph.compile().unwrap();

    let fanned = graph.invoke(json!({"value": 3})).await.unwrap();
    assert_eq!(fanned["total"], json!(6));
    assert_eq!(
        fanned["log"],
        json!(["review", "work-1", "work-2", "work-3", "report"])
    );

    let single = graph.invoke(json!({"value": 0})).await.unwrap();
    assert_eq!(single["log"], json!(["review", "redo"]));

    // no sends: the parent still moves past the join target without running it
    let empty = graph.invoke(json!({"value": -1})).await.unwrap();
    assert_eq!(empty["log"], json!(["review", "report"]));
}
