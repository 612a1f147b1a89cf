//! Offline collaborators for running the research assistant without a model
//!
//! [`OfflineModel`] answers every prompt of the research graph with text
//! derived from the prompt itself, so runs are deterministic no matter how
//! the interviews interleave. The built-in corpus backs the two search
//! connectors.

use crate::prompts::{self, section_after};
use async_trait::async_trait;
use serde_json::json;
use stategraph_core::collaborators::{
    ChatMessage, ChatModel, ChatResponse, CollaboratorResult, Document, Role, StaticSearch, ToolSpec,
};

/// Persona templates: name, role, affiliation, focus
const ROSTER: &[(&str, &str, &str, &str)] = &[
    ("Dr. Maya Chen", "Economist", "Institute for Energy Economics", "costs, markets and who pays"),
    ("Tomas Reyes", "Field Engineer", "Coastal Systems Lab", "how the technology performs in practice"),
    ("Priya Nair", "Policy Analyst", "Center for Public Policy", "regulation and permitting"),
    ("Jonas Berg", "Environmental Scientist", "Marine Research Council", "ecological side effects"),
];

/// Deterministic stand-in for a chat model
#[derive(Debug, Clone, Default)]
pub struct OfflineModel;

impl OfflineModel {
    pub fn new() -> Self {
        Self
    }

    fn analysts(system: &str) -> serde_json::Value {
        let topic = section_after(system, prompts::TOPIC_MARKER).unwrap_or("the topic");
        let feedback = section_after(system, prompts::FEEDBACK_MARKER).unwrap_or_default();

        let mut analysts = Vec::new();
        if !feedback.is_empty() {
            analysts.push(json!({
                "name": "Alex Morgan",
                "role": "Requested Perspective",
                "affiliation": "Editorial Board",
                "description": format!("{} as it bears on {}", feedback, topic),
            }));
        }
        analysts.extend(ROSTER.iter().map(|(name, role, affiliation, focus)| {
            json!({
                "name": name,
                "role": role,
                "affiliation": affiliation,
                "description": format!("Focuses on {} of {}", focus, topic),
            })
        }));
        json!({ "analysts": analysts })
    }

    fn question(system: &str, messages: &[ChatMessage]) -> String {
        let name = persona_field(system, "Name:").unwrap_or("an analyst");
        let focus = persona_field(system, "Description:").unwrap_or("this topic");
        let asked = messages
            .iter()
            .filter(|m| m.role == Role::Assistant && m.name.as_deref() == Some(name))
            .count();
        if asked == 0 {
            format!("Hello, I'm {}. {} - what is the least obvious fact here?", name, focus)
        } else {
            format!("Could you give one concrete example? {}", prompts::CLOSING_PHRASE)
        }
    }

    fn answer(system: &str) -> String {
        let sources = sources(system);
        if sources.is_empty() {
            return "I could not find sources on that, so I would rather not speculate.".to_string();
        }
        let citations: String = sources
            .iter()
            .enumerate()
            .map(|(i, source)| format!("\n[{}] {}", i + 1, source))
            .collect();
        format!("{} [1]{}", first_document_line(system).unwrap_or_default(), citations)
    }

    fn section(system: &str, request: &str) -> String {
        let focus = section_after(system, prompts::FOCUS_MARKER).unwrap_or("Findings");
        let sources = sources(request);
        let listed: String = sources
            .iter()
            .enumerate()
            .map(|(i, source)| format!("[{}] {}  \n", i + 1, source))
            .collect();
        format!(
            "## {}\n\n### Summary\n\n{} [1]\n\n### Sources\n{}",
            focus,
            first_document_line(request).unwrap_or("No sources were retrieved."),
            listed
        )
    }

    fn report(system: &str) -> String {
        let insights: Vec<String> = system
            .lines()
            .filter_map(|line| line.strip_prefix("## "))
            .filter(|heading| *heading != "Insights" && *heading != "Sources")
            .map(|heading| format!("- {}", heading))
            .collect();
        let listed: String = sources_listed(system)
            .iter()
            .enumerate()
            .map(|(i, source)| format!("[{}] {}\n", i + 1, source))
            .collect();
        format!("## Insights\n\n{}\n## Sources\n{}", insights.join("\n"), listed)
    }

    fn intro_or_conclusion(system: &str, request: &str) -> String {
        let topic = system
            .lines()
            .next()
            .and_then(|line| line.strip_prefix(prompts::INTRO_CONCLUSION_ROLE))
            .unwrap_or_default()
            .trim();
        let sections = system.lines().filter(|line| line.starts_with("## ")).count();
        if request.contains("introduction") {
            format!("# {}\n\n## Introduction\n\nThis report draws on {} analyst sections.", topic, sections)
        } else {
            format!("## Conclusion\n\nTogether the {} sections cover {} from every side.", sections, topic)
        }
    }
}

#[async_trait]
impl ChatModel for OfflineModel {
    async fn invoke(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> CollaboratorResult<ChatResponse> {
        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or_default();

        if tools.iter().any(|t| t.name == prompts::PERSPECTIVES) {
            return Ok(ChatResponse::tool_call(prompts::PERSPECTIVES, Self::analysts(system)));
        }
        if tools.iter().any(|t| t.name == prompts::SEARCH_QUERY) {
            return Ok(ChatResponse::tool_call(prompts::SEARCH_QUERY, json!({"search_query": last})));
        }

        let reply = if system.starts_with(prompts::QUESTION_ROLE) {
            Self::question(system, messages)
        } else if system.starts_with(prompts::ANSWER_ROLE) {
            Self::answer(system)
        } else if system.starts_with(prompts::SECTION_ROLE) {
            Self::section(system, last)
        } else if system.starts_with(prompts::REPORT_ROLE) {
            Self::report(system)
        } else if system.starts_with(prompts::INTRO_CONCLUSION_ROLE) {
            Self::intro_or_conclusion(system, last)
        } else {
            last.to_string()
        };
        Ok(ChatResponse::text(reply))
    }
}

fn persona_field<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    text.lines()
        .find_map(|line| line.strip_prefix(label))
        .map(str::trim)
}

/// Distinct `source="..."` attributes, in order of appearance
fn sources(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for chunk in text.split("source=\"").skip(1) {
        if let Some(end) = chunk.find('"') {
            let source = chunk[..end].to_string();
            if !found.contains(&source) {
                found.push(source);
            }
        }
    }
    found
}

/// Distinct entries of `[n] ...` source lists
fn sources_listed(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for line in text.lines() {
        let entry = line
            .strip_prefix('[')
            .and_then(|rest| rest.split_once("] "))
            .filter(|(number, _)| number.chars().all(|c| c.is_ascii_digit()))
            .map(|(_, source)| source.trim().to_string());
        if let Some(source) = entry {
            if !found.contains(&source) {
                found.push(source);
            }
        }
    }
    found
}

/// First content line of the first `<Document>` block
fn first_document_line(text: &str) -> Option<&str> {
    let start = text.find("<Document")?;
    text[start..]
        .lines()
        .nth(1)
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("</Document>"))
}

/// Documents the offline search connectors draw from
pub fn default_corpus() -> Vec<Document> {
    vec![
        Document::new(
            "Tidal stream turbines produce power on a schedule set by the moon, which makes their output predictable years ahead.",
            "https://example.org/tidal/predictability",
        ),
        Document::new(
            "Levelized costs of tidal energy have fallen sharply as turbine arrays grew from single prototypes to multi-megawatt farms.",
            "https://example.org/tidal/costs",
        ),
        Document::new(
            "Salt water corrosion and biofouling drive most of the maintenance cost of subsea energy equipment.",
            "archive/marine-engineering-handbook.pdf",
        ),
        Document::new(
            "Permitting for marine energy projects often takes longer than construction because several agencies share jurisdiction over the seabed.",
            "archive/ocean-policy-review.pdf",
        ),
        Document::new(
            "Studies of fish passage near slow-turning rotors report low collision rates, though long-term data is scarce.",
            "archive/marine-ecology-survey.pdf",
        ),
    ]
}

/// Split a corpus into web (URL sources) and archive connectors
pub fn connectors(corpus: Vec<Document>) -> (StaticSearch, StaticSearch) {
    let (web, archive): (Vec<Document>, Vec<Document>) = corpus
        .into_iter()
        .partition(|d| d.source.starts_with("http://") || d.source.starts_with("https://"));
    (StaticSearch::new("web", web), StaticSearch::new("archive", archive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_feedback_adds_requested_analyst() {
        let model = OfflineModel::new();
        let system = prompts::analyst_instructions("Tidal power", "Add a skeptic", 2);
        let response = model
            .invoke(&[ChatMessage::system(system)], &[prompts::perspectives_tool()])
            .await
            .unwrap();
        let analysts = &response.args_for(prompts::PERSPECTIVES).unwrap()["analysts"];
        assert_eq!(analysts[0]["role"], "Requested Perspective");
        assert!(analysts[0]["description"].as_str().unwrap().starts_with("Add a skeptic"));
    }

    #[tokio::test]
    async fn test_second_question_closes_interview() {
        let model = OfflineModel::new();
        let system = prompts::question_instructions("Name: Ada\nDescription: tides\n");
        let first = model.invoke(&[ChatMessage::system(system.clone())], &[]).await.unwrap();
        assert!(first.content.starts_with("Hello, I'm Ada."));

        let asked = ChatMessage::assistant(first.content).with_name("Ada");
        let second = model
            .invoke(&[ChatMessage::system(system), asked], &[])
            .await
            .unwrap();
        assert!(second.content.ends_with(prompts::CLOSING_PHRASE));
    }

    #[test]
    fn test_sources_deduplicated_in_order() {
        let text = "<Document source=\"b\"/>\nx\n</Document>\n<Document source=\"a\"/>\n<Document source=\"b\"/>";
        assert_eq!(sources(text), vec!["b".to_string(), "a".to_string()]);
        assert_eq!(
            sources_listed("[1] b  \n[2] a\n[1] b\nnot [3] this"),
            vec!["b".to_string(), "a".to_string()]
        );
    }

    #[test]
    fn test_connectors_split_by_source() {
        let (web, archive) = connectors(default_corpus());
        assert_eq!(stategraph_core::collaborators::SearchConnector::name(&web), "web");
        assert_eq!(stategraph_core::collaborators::SearchConnector::name(&archive), "archive");
    }
}
