//! Prompt templates of the research assistant

use stategraph_core::collaborators::ToolSpec;
use serde_json::json;

pub const PERSPECTIVES: &str = "Perspectives";
pub const SEARCH_QUERY: &str = "SearchQuery";

/// Phrase an analyst uses to end the interview
pub const CLOSING_PHRASE: &str = "Thank you so much for your help!";

pub const ANALYST_ROLE: &str = "You are tasked with creating a set of AI analyst personas.";
pub const QUESTION_ROLE: &str = "You are an analyst tasked with interviewing an expert to learn about a specific topic.";
pub const ANSWER_ROLE: &str = "You are an expert being interviewed by an analyst.";
pub const SECTION_ROLE: &str = "You are an expert technical writer.";
pub const REPORT_ROLE: &str = "You are a technical writer creating a report on this overall topic:";
pub const INTRO_CONCLUSION_ROLE: &str = "You are a technical writer finishing a report on";

/// Heading the topic, feedback and focus values sit under
pub const TOPIC_MARKER: &str = "Review the research topic:";
pub const FEEDBACK_MARKER: &str = "Examine any editorial feedback:";
pub const FOCUS_MARKER: &str = "Base the title on the analyst's focus area:";

pub fn analyst_instructions(topic: &str, feedback: &str, max_analysts: usize) -> String {
    format!(
        "{ANALYST_ROLE}\n\n\
         1. {TOPIC_MARKER}\n{topic}\n\n\
         2. {FEEDBACK_MARKER}\n{feedback}\n\n\
         3. Determine the most interesting themes based upon the topic and feedback.\n\n\
         4. Pick the top {max_analysts} themes.\n\n\
         5. Assign one analyst to each theme."
    )
}

pub fn question_instructions(goals: &str) -> String {
    format!(
        "{QUESTION_ROLE}\n\n\
         Your goal is to boil down to interesting and specific insights related to your topic.\n\n\
         Here is your topic of focus and set of goals:\n{goals}\n\n\
         Begin by introducing yourself using a name that fits your persona, and then ask your question.\n\n\
         When you are satisfied with your understanding, complete the interview with: \"{CLOSING_PHRASE}\"\n\n\
         Remember to stay in character throughout your response."
    )
}

pub const SEARCH_INSTRUCTIONS: &str = "You will be given a conversation between an analyst and an expert.\n\n\
     Your goal is to generate a well-structured query for use in retrieval related to the conversation.\n\n\
     Pay particular attention to the final question posed by the analyst and convert it into a search query.";

pub fn answer_instructions(goals: &str, context: &str) -> String {
    format!(
        "{ANSWER_ROLE}\n\n\
         Here is the analyst's area of focus:\n{goals}\n\n\
         Answer the question using only this context:\n\n{context}\n\n\
         Cite sources next to the claims they support, e.g. [1] for source 1, \
         and list the sources in order at the bottom of your answer."
    )
}

pub fn section_writer_instructions(focus: &str) -> String {
    format!(
        "{SECTION_ROLE}\n\n\
         Write a short, easily digestible section of a report based on a set of source documents.\n\n\
         Use markdown: ## for the section title, ### for the Summary and Sources sub-headings.\n\n\
         {FOCUS_MARKER}\n{focus}\n\n\
         Keep the summary under 400 words, cite sources as [1], [2] and list each source once under ### Sources."
    )
}

pub fn report_writer_instructions(topic: &str, memos: &str) -> String {
    format!(
        "{REPORT_ROLE}\n\n{topic}\n\n\
         You have a team of analysts. Each analyst interviewed an expert on a sub-topic \
         and wrote up the findings in a memo.\n\n\
         Consolidate the memos into a crisp overall summary that ties together their central ideas.\n\n\
         Start the report with a single title header: ## Insights\n\
         Do not mention analyst names. Preserve citations and gather the sources under ## Sources.\n\n\
         Here are the memos from your analysts:\n\n{memos}"
    )
}

pub fn intro_conclusion_instructions(topic: &str, sections: &str) -> String {
    format!(
        "{INTRO_CONCLUSION_ROLE} {topic}\n\n\
         You will be given all of the sections of the report. Write a crisp introduction or conclusion \
         of about 100 words, as the user asks.\n\n\
         Use # for the report title in the introduction, ## Introduction or ## Conclusion as the section header.\n\n\
         Here are the sections to reflect on:\n\n{sections}"
    )
}

/// Structured output tool for analyst creation
pub fn perspectives_tool() -> ToolSpec {
    ToolSpec {
        name: PERSPECTIVES.to_string(),
        description: "Comprehensive list of analysts with their roles and affiliations".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "analysts": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "affiliation": {"type": "string"},
                            "name": {"type": "string"},
                            "role": {"type": "string"},
                            "description": {"type": "string"}
                        },
                        "required": ["affiliation", "name", "role", "description"]
                    }
                }
            },
            "required": ["analysts"]
        }),
    }
}

/// Structured output tool for search queries
pub fn search_query_tool() -> ToolSpec {
    ToolSpec {
        name: SEARCH_QUERY.to_string(),
        description: "Search query for retrieval".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {"search_query": {"type": "string"}},
            "required": ["search_query"]
        }),
    }
}

/// Text under `marker`, up to the next blank line
pub fn section_after<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let start = text.find(marker)? + marker.len();
    let rest = &text[start..];
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let end = rest.find("\n\n").unwrap_or(rest.len());
    Some(rest[..end].trim())
}
