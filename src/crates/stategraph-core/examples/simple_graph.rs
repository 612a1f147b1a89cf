//! Simple graph example
//!
//! Two sequential nodes over a schema with an overwrite and an append field,
//! run once with `invoke`.

use serde_json::json;
use stategraph_core::{AppendReducer, OverwriteReducer, StateGraph, StateSchema, END, START};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Simple Graph Example ===\n");

    let schema = StateSchema::new()
        .with_field("value", Box::new(OverwriteReducer))
        .with_field("trail", Box::new(AppendReducer));

    let mut graph = StateGraph::new(schema);
    graph
        .add_node("step1", |state| {
            Box::pin(async move {
                let value = state["value"].as_i64().unwrap_or(0);
                println!("Executing step1 on value {}", value);
                Ok(json!({"value": value + 10, "trail": ["step1"]}))
            })
        })
        .add_node("step2", |state| {
            Box::pin(async move {
                let value = state["value"].as_i64().unwrap_or(0);
                println!("Executing step2 on value {}", value);
                Ok(json!({"value": value * 2, "trail": ["step2"]}))
            })
        })
        .add_edge(START, "step1")
        .add_edge("step1", "step2")
        .add_edge("step2", END);

    let compiled = graph.compile()?;

    let input = json!({"value": 5});
    println!("Initial state: {}\n", input);

    let result = compiled.invoke(input).await?;

    println!("\nFinal state: {}", result);
    println!("Expected: value = (5 + 10) * 2 = 30, trail = [step1, step2]");

    Ok(())
}
