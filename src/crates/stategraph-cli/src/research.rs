//! Research assistant graph
//!
//! A team of analyst personas is generated for a topic, shown to a human for
//! review, and then each analyst interviews an expert in parallel. The
//! interview is a subgraph: the analyst asks, two search connectors retrieve
//! context in parallel, the expert answers, and after a bounded number of
//! turns the transcript is written up as one report section. The report body,
//! introduction and conclusion are then written in one parallel step and
//! joined by `finalize_report`.
//!
//! ```text
//! create_analysts -> human_feedback -+-> create_analysts (feedback given)
//!                                    +-> conduct_interview x analysts
//!                                          -> write_report       -+
//!                                          -> write_introduction -+-> finalize_report
//!                                          -> write_conclusion   -+
//! ```
//!
//! The session parks before `human_feedback`. Resuming with a
//! `human_analyst_feedback` patch regenerates the analysts and parks again;
//! resuming without feedback runs the interviews.

use crate::prompts;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use stategraph_core::collaborators::{
    format_documents, search_or_empty, ChatMessage, ChatModel, CollaboratorError, Role,
    SearchConnector,
};
use stategraph_core::{
    AppendReducer, BoxError, CompiledGraph, NodeFuture, OverwriteReducer, Result, Route, Send,
    StateGraph, StateSchema, END, START,
};
use std::future::Future;
use std::sync::Arc;

/// Graph id research sessions are registered under
pub const GRAPH_ID: &str = "research";

/// Name the expert's answers carry
pub const EXPERT: &str = "expert";

pub const DEFAULT_MAX_ANALYSTS: u64 = 3;
pub const DEFAULT_MAX_TURNS: u64 = 2;

/// An analyst persona
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analyst {
    pub affiliation: String,
    pub name: String,
    pub role: String,
    /// Focus, concerns and motives of the analyst
    pub description: String,
}

impl Analyst {
    pub fn persona(&self) -> String {
        format!(
            "Name: {}\nRole: {}\nAffiliation: {}\nDescription: {}\n",
            self.name, self.role, self.affiliation, self.description
        )
    }
}

#[derive(Debug, Deserialize)]
struct Perspectives {
    analysts: Vec<Analyst>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    search_query: String,
}

/// Initial state of a research session
pub fn initial_state(topic: &str, max_analysts: u64, max_turns: u64) -> Value {
    json!({
        "topic": topic,
        "max_analysts": max_analysts,
        "max_num_turns": max_turns,
    })
}

fn research_schema() -> StateSchema {
    StateSchema::new()
        .with_field("topic", Box::new(OverwriteReducer))
        .with_field_default("max_analysts", Box::new(OverwriteReducer), json!(DEFAULT_MAX_ANALYSTS))
        .with_field_default("max_num_turns", Box::new(OverwriteReducer), json!(DEFAULT_MAX_TURNS))
        .with_field_default("human_analyst_feedback", Box::new(OverwriteReducer), json!(""))
        .with_field_default("analysts", Box::new(OverwriteReducer), json!([]))
        .with_field("analyst", Box::new(OverwriteReducer))
        .with_field("sections", Box::new(AppendReducer))
        .with_field("content", Box::new(OverwriteReducer))
        .with_field("introduction", Box::new(OverwriteReducer))
        .with_field("conclusion", Box::new(OverwriteReducer))
        .with_field("final_report", Box::new(OverwriteReducer))
}

fn interview_schema() -> StateSchema {
    StateSchema::new()
        .with_field("topic", Box::new(OverwriteReducer))
        .with_field("analyst", Box::new(OverwriteReducer))
        .with_field_default("max_num_turns", Box::new(OverwriteReducer), json!(DEFAULT_MAX_TURNS))
        .with_field("messages", Box::new(AppendReducer))
        .with_field("context", Box::new(AppendReducer))
        .with_field("interview", Box::new(OverwriteReducer))
        .with_field("sections", Box::new(AppendReducer))
}

/// Wrap an async node function that calls the model
fn with_model<F, Fut>(model: &Arc<dyn ChatModel>, f: F) -> impl Fn(Value) -> NodeFuture + std::marker::Send + Sync + 'static
where
    F: Fn(Arc<dyn ChatModel>, Value) -> Fut + std::marker::Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, BoxError>> + std::marker::Send + 'static,
{
    let model = model.clone();
    move |state: Value| -> NodeFuture { Box::pin(f(model.clone(), state)) }
}

fn search_node(
    model: &Arc<dyn ChatModel>,
    connector: Arc<dyn SearchConnector>,
) -> impl Fn(Value) -> NodeFuture + std::marker::Send + Sync + 'static {
    let model = model.clone();
    move |state: Value| -> NodeFuture {
        let model = model.clone();
        let connector = connector.clone();
        Box::pin(async move { search(model.as_ref(), connector.as_ref(), state).await })
    }
}

/// Build the per-analyst interview subgraph
pub fn interview_graph(
    model: &Arc<dyn ChatModel>,
    web: Arc<dyn SearchConnector>,
    archive: Arc<dyn SearchConnector>,
) -> Result<CompiledGraph> {
    let mut graph = StateGraph::new(interview_schema());
    graph
        .add_node("ask_question", with_model(model, ask_question))
        .add_node("search_web", search_node(model, web))
        .add_node("search_archive", search_node(model, archive))
        .add_node("answer_question", with_model(model, answer_question))
        .add_node("save_interview", |state| Box::pin(async move { save_interview(state) }))
        .add_node("write_section", with_model(model, write_section))
        .add_edge(START, "ask_question")
        .add_edge("ask_question", "search_web")
        .add_edge("ask_question", "search_archive")
        .add_edge("search_web", "answer_question")
        .add_edge("search_archive", "answer_question")
        .add_conditional_edge("answer_question", route_messages, ["ask_question", "save_interview"])
        .add_edge("save_interview", "write_section")
        .add_edge("write_section", END);
    graph.compile()
}

/// Build the research graph
pub fn research_graph(
    model: Arc<dyn ChatModel>,
    web: Arc<dyn SearchConnector>,
    archive: Arc<dyn SearchConnector>,
) -> Result<CompiledGraph> {
    let interview = interview_graph(&model, web, archive)?;

    let mut graph = StateGraph::new(research_schema());
    graph
        .add_node("create_analysts", with_model(&model, create_analysts))
        .add_node("human_feedback", |_| Box::pin(async move { Ok(Value::Null) }))
        .add_subgraph("conduct_interview", interview, ["sections"])
        .add_node("write_report", with_model(&model, write_report))
        .add_node("write_introduction", with_model(&model, write_introduction))
        .add_node("write_conclusion", with_model(&model, write_conclusion))
        .add_node("finalize_report", |state| Box::pin(async move { finalize_report(state) }))
        .add_edge(START, "create_analysts")
        .add_edge("create_analysts", "human_feedback")
        .add_conditional_fan_out(
            "human_feedback",
            review_outcome,
            ["create_analysts", "conduct_interview"],
            "conduct_interview",
        )
        .add_edge("conduct_interview", "write_report")
        .add_edge("conduct_interview", "write_introduction")
        .add_edge("conduct_interview", "write_conclusion")
        .add_edge("write_report", "finalize_report")
        .add_edge("write_introduction", "finalize_report")
        .add_edge("write_conclusion", "finalize_report")
        .add_edge("finalize_report", END)
        .interrupt_before(["human_feedback"])
        .with_graph_id(GRAPH_ID);
    graph.compile()
}

/// Regenerate the analysts when feedback was given, otherwise interview each one
fn review_outcome(state: &Value) -> Route {
    if !text(state, "human_analyst_feedback").trim().is_empty() {
        return Route::from("create_analysts");
    }
    let topic = &state["topic"];
    let interviews: Vec<Send> = state["analysts"]
        .as_array()
        .into_iter()
        .flatten()
        .map(|analyst| {
            Send::new(
                "conduct_interview",
                json!({
                    "topic": topic,
                    "analyst": analyst,
                    "max_num_turns": state["max_num_turns"],
                }),
            )
        })
        .collect();
    Route::from(interviews)
}

fn text<'a>(state: &'a Value, field: &str) -> &'a str {
    state[field].as_str().unwrap_or_default()
}

fn analyst_of(state: &Value) -> std::result::Result<Analyst, BoxError> {
    Ok(serde_json::from_value(state["analyst"].clone())?)
}

fn messages_of(state: &Value) -> std::result::Result<Vec<ChatMessage>, BoxError> {
    match &state["messages"] {
        Value::Null => Ok(Vec::new()),
        messages => Ok(serde_json::from_value(messages.clone())?),
    }
}

fn sections_of(state: &Value) -> String {
    state["sections"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .collect::<Vec<_>>()
        .join("\n\n")
}

async fn create_analysts(model: Arc<dyn ChatModel>, state: Value) -> std::result::Result<Value, BoxError> {
    let max_analysts = state["max_analysts"].as_u64().unwrap_or(DEFAULT_MAX_ANALYSTS) as usize;
    let system = prompts::analyst_instructions(
        text(&state, "topic"),
        text(&state, "human_analyst_feedback"),
        max_analysts,
    );

    let response = model
        .invoke(
            &[
                ChatMessage::system(system),
                ChatMessage::human("Generate the set of analysts."),
            ],
            &[prompts::perspectives_tool()],
        )
        .await?;
    let args = response.args_for(prompts::PERSPECTIVES).ok_or_else(|| {
        CollaboratorError::InvalidResponse("model returned no analysts".to_string())
    })?;
    let mut perspectives: Perspectives = serde_json::from_value(args.clone())?;
    perspectives.analysts.truncate(max_analysts);

    tracing::info!(count = perspectives.analysts.len(), "Created analysts");
    // The feedback is consumed; the next review starts blank
    Ok(json!({"analysts": perspectives.analysts, "human_analyst_feedback": ""}))
}

async fn ask_question(model: Arc<dyn ChatModel>, state: Value) -> std::result::Result<Value, BoxError> {
    let analyst = analyst_of(&state)?;
    let mut history = messages_of(&state)?;
    let mut new_messages = Vec::new();
    if history.is_empty() {
        let opener = ChatMessage::human(format!(
            "So you said you were writing an article on {}?",
            text(&state, "topic")
        ));
        history.push(opener.clone());
        new_messages.push(opener);
    }

    let mut prompt = vec![ChatMessage::system(prompts::question_instructions(&analyst.persona()))];
    prompt.extend(history);
    let question = model.invoke(&prompt, &[]).await?;
    new_messages.push(ChatMessage::assistant(question.content).with_name(analyst.name));

    Ok(json!({"messages": new_messages}))
}

async fn search(
    model: &dyn ChatModel,
    connector: &dyn SearchConnector,
    state: Value,
) -> std::result::Result<Value, BoxError> {
    let mut prompt = vec![ChatMessage::system(prompts::SEARCH_INSTRUCTIONS)];
    prompt.extend(messages_of(&state)?);

    let response = model.invoke(&prompt, &[prompts::search_query_tool()]).await?;
    let args = response.args_for(prompts::SEARCH_QUERY).ok_or_else(|| {
        CollaboratorError::InvalidResponse("model returned no search query".to_string())
    })?;
    let query: SearchQuery = serde_json::from_value(args.clone())?;

    let documents = search_or_empty(connector, &query.search_query).await;
    tracing::debug!(connector = connector.name(), hits = documents.len(), "Retrieved context");
    if documents.is_empty() {
        return Ok(Value::Null);
    }
    Ok(json!({"context": [format_documents(&documents)]}))
}

async fn answer_question(model: Arc<dyn ChatModel>, state: Value) -> std::result::Result<Value, BoxError> {
    let analyst = analyst_of(&state)?;
    let context = state["context"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    let mut prompt = vec![ChatMessage::system(prompts::answer_instructions(&analyst.persona(), &context))];
    prompt.extend(messages_of(&state)?);
    let answer = model.invoke(&prompt, &[]).await?;

    Ok(json!({"messages": [ChatMessage::assistant(answer.content).with_name(EXPERT)]}))
}

/// Next interview step: another question or the write-up
fn route_messages(state: &Value) -> String {
    let messages: Vec<ChatMessage> = serde_json::from_value(state["messages"].clone()).unwrap_or_default();
    let max_turns = state["max_num_turns"].as_u64().unwrap_or(DEFAULT_MAX_TURNS) as usize;

    let answers = messages
        .iter()
        .filter(|m| m.role == Role::Assistant && m.name.as_deref() == Some(EXPERT))
        .count();
    if answers >= max_turns {
        return "save_interview".to_string();
    }

    // The question preceding the latest answer
    let closed = messages
        .len()
        .checked_sub(2)
        .and_then(|i| messages.get(i))
        .is_some_and(|question| question.content.contains(prompts::CLOSING_PHRASE));
    if closed {
        "save_interview".to_string()
    } else {
        "ask_question".to_string()
    }
}

fn save_interview(state: Value) -> std::result::Result<Value, BoxError> {
    let transcript = messages_of(&state)?
        .iter()
        .map(|m| {
            let speaker = match (&m.name, m.role) {
                (Some(name), _) => name.clone(),
                (None, Role::Human) => "Human".to_string(),
                (None, Role::System) => "System".to_string(),
                (None, Role::Assistant) => "AI".to_string(),
                (None, Role::Tool) => "Tool".to_string(),
            };
            format!("{}: {}", speaker, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n");
    Ok(json!({"interview": transcript}))
}

async fn write_section(model: Arc<dyn ChatModel>, state: Value) -> std::result::Result<Value, BoxError> {
    let analyst = analyst_of(&state)?;
    let context = state["context"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .collect::<Vec<_>>()
        .join("\n\n");

    let section = model
        .invoke(
            &[
                ChatMessage::system(prompts::section_writer_instructions(&analyst.description)),
                ChatMessage::human(format!(
                    "Use this source to write your section:\n\n{}\n\nInterview:\n{}",
                    context,
                    text(&state, "interview")
                )),
            ],
            &[],
        )
        .await?;
    Ok(json!({"sections": [section.content]}))
}

async fn write_report(model: Arc<dyn ChatModel>, state: Value) -> std::result::Result<Value, BoxError> {
    let system = prompts::report_writer_instructions(text(&state, "topic"), &sections_of(&state));
    let report = model
        .invoke(
            &[
                ChatMessage::system(system),
                ChatMessage::human("Write a report based upon these memos."),
            ],
            &[],
        )
        .await?;
    Ok(json!({"content": report.content}))
}

async fn write_introduction(model: Arc<dyn ChatModel>, state: Value) -> std::result::Result<Value, BoxError> {
    let system = prompts::intro_conclusion_instructions(text(&state, "topic"), &sections_of(&state));
    let intro = model
        .invoke(
            &[ChatMessage::system(system), ChatMessage::human("Write the report introduction")],
            &[],
        )
        .await?;
    Ok(json!({"introduction": intro.content}))
}

async fn write_conclusion(model: Arc<dyn ChatModel>, state: Value) -> std::result::Result<Value, BoxError> {
    let system = prompts::intro_conclusion_instructions(text(&state, "topic"), &sections_of(&state));
    let conclusion = model
        .invoke(
            &[ChatMessage::system(system), ChatMessage::human("Write the report conclusion")],
            &[],
        )
        .await?;
    Ok(json!({"conclusion": conclusion.content}))
}

fn finalize_report(state: Value) -> std::result::Result<Value, BoxError> {
    let content = text(&state, "content");
    let content = content.strip_prefix("## Insights").unwrap_or(content).trim_start();
    let (body, sources) = match content.split_once("\n## Sources\n") {
        Some((body, sources)) => (body, Some(sources)),
        None => (content, None),
    };

    let mut report = format!(
        "{}\n\n---\n\n{}\n\n---\n\n{}",
        text(&state, "introduction"),
        body.trim_end(),
        text(&state, "conclusion")
    );
    if let Some(sources) = sources {
        report.push_str("\n\n## Sources\n");
        report.push_str(sources);
    }
    Ok(json!({"final_report": report}))
}
