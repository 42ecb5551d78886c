//! Turns a crew's loosely-structured result into the stored shape.
//!
//! Crews return arbitrary JSON. [`normalize`] extracts the raw text and
//! per-task outputs, buckets findings by agent role, and never fails: a
//! malformed task entry becomes a placeholder and the rest of the batch
//! is kept.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Agent name used when a task entry does not identify its agent.
pub const UNKNOWN_AGENT: &str = "Unknown";

/// Placeholder output for a task entry that cannot be rendered.
pub const EXTRACTION_ERROR: &str = "Error extracting output";

/// Maximum characters of research output handed to evaluation.
pub const EVALUATION_OUTPUT_LIMIT: usize = 5000;

/// Maximum number of sources handed to evaluation.
pub const EVALUATION_SOURCE_LIMIT: usize = 10;

pub const URL_PATTERN: &str = r"https?://[^\s)]+";

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(URL_PATTERN).expect("valid regex"));

/// One sub-task's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub agent: String,
    pub description: String,
    pub output: String,
}

/// Stored in the job's `result` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResult {
    pub raw_output: String,
    pub tasks_output: Vec<TaskOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
}

/// Stored in the job's `research_data` column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchData {
    pub research_findings: Vec<TaskOutput>,
    pub analysis_data: Vec<TaskOutput>,
    pub all_research_content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub result: NormalizedResult,
    pub research_data: ResearchData,
}

/// What gets handed to the evaluation service.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationInput {
    pub research_output: String,
    pub sources: Vec<String>,
}

enum Role {
    Research,
    Analysis,
    Other,
}

fn role_of(agent: &str) -> Role {
    let agent = agent.to_lowercase();
    if agent.contains("research") {
        Role::Research
    } else if agent.contains("analyst") || agent.contains("analysis") {
        Role::Analysis
    } else {
        Role::Other
    }
}

/// Normalize a crew result. Never fails.
pub fn normalize(value: &serde_json::Value) -> Normalized {
    let raw_output = raw_output_of(value);
    let tasks_output: Vec<TaskOutput> = value
        .get("tasks_output")
        .and_then(|t| t.as_array())
        .map(|items| items.iter().map(task_output_of).collect())
        .unwrap_or_default();

    let mut research_data = ResearchData::default();
    let mut sections = Vec::new();
    for task in &tasks_output {
        let bucket = match role_of(&task.agent) {
            Role::Research => &mut research_data.research_findings,
            Role::Analysis => &mut research_data.analysis_data,
            Role::Other => continue,
        };
        bucket.push(task.clone());
        sections.push(format!(
            "## {}: {}\n\n{}",
            task.agent, task.description, task.output
        ));
    }
    research_data.all_research_content = sections.join("\n\n");

    Normalized {
        result: NormalizedResult {
            raw_output,
            tasks_output,
            report: None,
        },
        research_data,
    }
}

fn raw_output_of(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        _ => match value.get("raw") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(raw) => raw.to_string(),
            None => value.to_string(),
        },
    }
}

fn text_of(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn task_output_of(item: &serde_json::Value) -> TaskOutput {
    let output = item.get("raw").or_else(|| item.get("output"));
    let Some(output) = output.filter(|_| item.is_object()) else {
        return TaskOutput {
            agent: UNKNOWN_AGENT.into(),
            description: String::new(),
            output: if item.is_null() {
                EXTRACTION_ERROR.into()
            } else {
                item.to_string()
            },
        };
    };

    let agent = match item.get("agent") {
        Some(serde_json::Value::String(name)) => name.clone(),
        Some(agent) => agent
            .get("role")
            .and_then(|r| r.as_str())
            .unwrap_or(UNKNOWN_AGENT)
            .to_string(),
        None => UNKNOWN_AGENT.into(),
    };
    let description = item
        .get("description")
        .and_then(|d| d.as_str())
        .unwrap_or_default()
        .to_string();

    TaskOutput {
        agent,
        description,
        output: text_of(output),
    }
}

/// Read the report artifact, if one was written. Absence is not an error.
pub fn read_report(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(report) => Some(report),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read report file");
            None
        }
    }
}

impl Normalized {
    /// Research output and cited sources for evaluation.
    pub fn evaluation_input(&self) -> EvaluationInput {
        let content = if self.research_data.all_research_content.is_empty() {
            &self.result.raw_output
        } else {
            &self.research_data.all_research_content
        };
        let research_output = content.chars().take(EVALUATION_OUTPUT_LIMIT).collect();

        let texts = self
            .research_data
            .research_findings
            .iter()
            .map(|f| f.output.as_str())
            .chain(std::iter::once(self.result.raw_output.as_str()));
        EvaluationInput {
            research_output,
            sources: extract_sources(texts, EVALUATION_SOURCE_LIMIT),
        }
    }
}

/// URLs in `texts`, de-duplicated in first-seen order.
pub fn extract_sources<'a>(texts: impl IntoIterator<Item = &'a str>, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    for text in texts {
        for m in URL_RE.find_iter(text) {
            if sources.len() == limit {
                return sources;
            }
            if seen.insert(m.as_str()) {
                sources.push(m.as_str().to_string());
            }
        }
    }
    sources
}
