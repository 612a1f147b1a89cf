//! External collaborators that nodes call out to
//!
//! Nodes treat both collaborators as black boxes that may fail. A failing
//! model call fails its node; a failing search is optional and degrades to
//! no documents through [`search_or_empty`].
//!
//! Share implementations across nodes as `Arc<dyn ChatModel>` /
//! `Arc<dyn SearchConnector>`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use thiserror::Error;

/// Errors raised by collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// Role of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Assistant,
    Tool,
}

/// One message of a model conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Speaker name, e.g. the analyst persona in an interview
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(Role::Human, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Tool the model may ask to call, described by a JSON schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub args: Value,
}

/// Model reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(name: impl Into<String>, args: Value) -> Self {
        Self {
            content: String::new(),
            tool_calls: vec![ToolCall {
                name: name.into(),
                args,
            }],
        }
    }

    /// Arguments of the first call to `name`
    pub fn args_for(&self, name: &str) -> Option<&Value> {
        self.tool_calls
            .iter()
            .find(|call| call.name == name)
            .map(|call| &call.args)
    }
}

/// Chat model interface
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate a reply to `messages`, optionally offering `tools`
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> CollaboratorResult<ChatResponse>;
}

/// A retrieved document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    pub source: String,
}

impl Document {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
        }
    }
}

/// Search backend interface
#[async_trait]
pub trait SearchConnector: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    async fn search(&self, query: &str) -> CollaboratorResult<Vec<Document>>;
}

/// Run a search, treating failure as "no documents"
pub async fn search_or_empty(connector: &dyn SearchConnector, query: &str) -> Vec<Document> {
    match connector.search(query).await {
        Ok(documents) => documents,
        Err(e) => {
            tracing::warn!(connector = connector.name(), query, error = %e, "Search failed, continuing without results");
            Vec::new()
        }
    }
}

/// Format documents as `<Document source="..."/>` blocks for a prompt
pub fn format_documents(documents: &[Document]) -> String {
    documents
        .iter()
        .map(|d| format!("<Document source=\"{}\"/>\n{}\n</Document>", d.source, d.content))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Chat model that replays canned responses in order
///
/// Used for offline runs and tests. Once the script is exhausted every call
/// fails with [`CollaboratorError::Unavailable`].
#[derive(Debug, Default)]
pub struct ScriptedChatModel {
    responses: Mutex<VecDeque<ChatResponse>>,
}

impl ScriptedChatModel {
    pub fn new(responses: impl IntoIterator<Item = ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
        }
    }

    pub fn push(&self, response: ChatResponse) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(response);
        }
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn invoke(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> CollaboratorResult<ChatResponse> {
        let next = self
            .responses
            .lock()
            .map_err(|_| CollaboratorError::Unavailable("script lock poisoned".to_string()))?
            .pop_front();
        next.ok_or_else(|| CollaboratorError::Unavailable("script exhausted".to_string()))
    }
}

/// Search connector over a fixed document set
///
/// Returns every document whose content mentions a word of the query, or
/// all documents when the query is empty.
#[derive(Debug, Clone, Default)]
pub struct StaticSearch {
    name: String,
    documents: Vec<Document>,
}

impl StaticSearch {
    pub fn new(name: impl Into<String>, documents: Vec<Document>) -> Self {
        Self {
            name: name.into(),
            documents,
        }
    }
}

#[async_trait]
impl SearchConnector for StaticSearch {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &str) -> CollaboratorResult<Vec<Document>> {
        let words: Vec<String> = query
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect();
        Ok(self
            .documents
            .iter()
            .filter(|d| {
                let content = d.content.to_lowercase();
                words.is_empty() || words.iter().any(|w| content.contains(w.as_str()))
            })
            .cloned()
            .collect())
    }
}
