//! Human review example
//!
//! A draft is written, the session parks before `review`, and a resume
//! with feedback sends it back for another revision. The file checkpointer
//! means the resume could just as well happen in another process.

use serde_json::json;
use stategraph_core::checkpoint::FileCheckpointSaver;
use stategraph_core::{
    AppendReducer, OverwriteReducer, RunStatus, StateGraph, StateSchema, END, START,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let store = std::env::temp_dir().join("stategraph-human-review");
    let schema = StateSchema::new()
        .with_field("draft", Box::new(OverwriteReducer))
        .with_field("feedback", Box::new(AppendReducer))
        .with_field_default("approved", Box::new(OverwriteReducer), json!(false));

    let mut graph = StateGraph::new(schema);
    graph
        .add_node("write", |state| {
            Box::pin(async move {
                let notes = state["feedback"].as_array().map(|f| f.len()).unwrap_or(0);
                Ok(json!({"draft": format!("draft after {} rounds of feedback", notes)}))
            })
        })
        .add_node("review", |_| Box::pin(async move { Ok(json!(null)) }))
        .add_edge(START, "write")
        .add_edge("write", "review")
        .add_conditional_edge(
            "review",
            |state| {
                if state["approved"].as_bool().unwrap_or(false) {
                    END.to_string()
                } else {
                    "write".to_string()
                }
            },
            ["write"],
        )
        .interrupt_before(["review"]);

    let compiled = graph
        .compile()?
        .with_checkpointer(Arc::new(FileCheckpointSaver::new(&store)));

    let outcome = compiled.start(json!({})).await?;
    println!("Parked: {:?}\nState: {}\n", outcome.status, outcome.state);

    let outcome = compiled
        .resume(&outcome.session_id, json!({"feedback": ["shorter intro please"]}))
        .await?;
    println!("Parked again: {:?}\nState: {}\n", outcome.status, outcome.state);

    let outcome = compiled
        .resume(&outcome.session_id, json!({"approved": true}))
        .await?;
    assert_eq!(outcome.status, RunStatus::Completed);
    println!("Completed: {}", outcome.state);

    compiled.abandon(&outcome.session_id).await?;
    Ok(())
}
