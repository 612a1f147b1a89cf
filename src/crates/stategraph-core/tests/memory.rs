//! Sessions that keep long-term memories per user in a store

use serde_json::{json, Value};
use stategraph_core::store::namespace;
use stategraph_core::{
    get_runtime, get_store, AppendReducer, BoxError, CompiledGraph, InMemoryStore,
    OverwriteReducer, RunConfig, Send, StateGraph, StateSchema, Store, END, START,
};
use std::sync::Arc;
use uuid::Uuid;

/// User and category of the running session
fn owner() -> (String, String) {
    let runtime = get_runtime();
    let config = runtime.as_ref().map(|runtime| runtime.config());
    let value = |key: &str, default: &str| {
        config
            .and_then(|config| config.get_str(key))
            .unwrap_or(default)
            .to_string()
    };
    (value("user_id", "default-user"), value("todo_category", "general"))
}

async fn assistant(_state: Value) -> Result<Value, BoxError> {
    let store = get_store().ok_or("no store attached")?;
    let (user, category) = owner();

    let todos = store
        .search(&namespace(["todo", category.as_str(), user.as_str()]), None)
        .await?;
    let tasks: Vec<&str> = todos
        .iter()
        .filter_map(|item| item.value["task"].as_str())
        .collect();
    let reply = if tasks.is_empty() {
        format!("{} has nothing to do in {}", user, category)
    } else {
        format!("{} should: {}", user, tasks.join(", "))
    };
    Ok(json!({"reply": reply, "messages": [reply]}))
}

async fn update_todos(state: Value) -> Result<Value, BoxError> {
    let store = get_store().ok_or("no store attached")?;
    let (user, category) = owner();
    let task = state["command"].as_str().unwrap_or_default().trim_start_matches("todo:").trim();

    let todos = namespace(["todo", category.as_str(), user.as_str()]);
    let key = format!("{:04}", store.search(&todos, None).await?.len());
    store.put(&todos, &key, json!({"task": task})).await?;
    Ok(json!({"command": "", "messages": [format!("saved {}", task)]}))
}

fn todo_graph() -> StateGraph {
    let schema = StateSchema::new()
        .with_field_default("command", Box::new(OverwriteReducer), json!(""))
        .with_field("reply", Box::new(OverwriteReducer))
        .with_field("messages", Box::new(AppendReducer));

    let mut graph = StateGraph::new(schema);
    graph
        .add_node("assistant", |state| Box::pin(assistant(state)))
        .add_node("update_todos", |state| Box::pin(update_todos(state)))
        .add_conditional_edge(
            START,
            |state| {
                if state["command"].as_str().unwrap_or_default().starts_with("todo:") {
                    "update_todos".to_string()
                } else {
                    "assistant".to_string()
                }
            },
            ["assistant", "update_todos"],
        )
        .add_edge("update_todos", "assistant")
        .add_edge("assistant", END);
    graph
}

fn user(user_id: &str, category: &str) -> RunConfig {
    RunConfig::new()
        .with("user_id", user_id)
        .with("todo_category", category)
}

async fn say(graph: &CompiledGraph, command: &str, config: RunConfig) -> String {
    let session_id = Uuid::new_v4().to_string();
    let outcome = graph
        .start_with_config(&session_id, json!({"command": command}), config)
        .await
        .unwrap();
    assert!(outcome.status.is_completed());
    outcome.state["reply"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_memories_outlive_sessions() {
    let store = Arc::new(InMemoryStore::new());
    let graph = todo_graph().compile().unwrap().with_store(store.clone());

    say(&graph, "todo: File taxes", user("lance", "work")).await;
    let reply = say(&graph, "todo: Book flights", user("lance", "work")).await;
    assert_eq!(reply, "lance should: File taxes, Book flights");

    // a new session for the same user sees both
    assert_eq!(
        say(&graph, "what now?", user("lance", "work")).await,
        "lance should: File taxes, Book flights"
    );

    // other users and categories are separate namespaces
    assert_eq!(say(&graph, "what now?", user("ada", "work")).await, "ada has nothing to do in work");
    assert_eq!(
        say(&graph, "what now?", user("lance", "home")).await,
        "lance has nothing to do in home"
    );
    assert_eq!(say(&graph, "hi", RunConfig::new()).await, "default-user has nothing to do in general");

    let namespaces = store.list_namespaces(&namespace(["todo"])).await.unwrap();
    assert_eq!(namespaces, vec![namespace(["todo", "work", "lance"])]);
}

#[tokio::test]
async fn test_graph_without_store_fails_node() {
    let graph = todo_graph().compile().unwrap();
    let err = graph
        .start_with_config("s1", json!({"command": "hi"}), user("lance", "work"))
        .await
        .unwrap_err();
    assert!(err.is_recoverable());
    assert!(err.to_string().contains("no store attached"));
}

#[tokio::test]
async fn test_branches_and_subgraphs_share_runtime() {
    let schema = || {
        StateSchema::new()
            .with_field("task", Box::new(OverwriteReducer))
            .with_field("saved", Box::new(AppendReducer))
    };

    // the subgraph has no store of its own
    let mut saver = StateGraph::new(schema());
    saver
        .add_node("save", |state| {
            Box::pin(async move {
                let store = get_store().ok_or("no store attached")?;
                let (user, category) = owner();
                let task = state["task"].as_str().unwrap_or_default().to_string();
                store
                    .put(&namespace(["todo", category.as_str(), user.as_str()]), &task, json!({"task": task}))
                    .await?;
                Ok::<_, BoxError>(json!({"saved": [format!("{}/{}", user, task)]}))
            })
        })
        .add_edge(START, "save")
        .add_edge("save", END);
    let saver = saver.compile().unwrap();

    let mut graph = StateGraph::new(schema());
    graph
        .add_node("plan", |_| Box::pin(async move { Ok(Value::Null) }))
        .add_subgraph("save_task", saver, ["saved"])
        .add_node("done", |_| Box::pin(async move { Ok(Value::Null) }))
        .add_edge(START, "plan")
        .add_fan_out(
            "plan",
            |_| {
                ["a", "b", "c"]
                    .iter()
                    .map(|task| Send::new("save_task", json!({"task": task})))
                    .collect()
            },
            ["save_task"],
            "done",
        )
        .add_edge("save_task", "done")
        .add_edge("done", END);

    let store = Arc::new(InMemoryStore::new());
    let graph = graph.compile().unwrap().with_store(store.clone());
    let outcome = graph
        .start_with_config("s1", json!({}), user("lance", "work"))
        .await
        .unwrap();

    assert_eq!(outcome.state["saved"], json!(["lance/a", "lance/b", "lance/c"]));
    let items = store.search(&namespace(["todo", "work", "lance"]), None).await.unwrap();
    assert_eq!(items.len(), 3);
}
