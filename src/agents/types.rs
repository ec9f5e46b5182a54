//! Shared types for the article pipeline agents.
//!
//! Every agent speaks `serde_json::Value` at the [`Agent`](super::Agent)
//! boundary so the registry can hold them uniformly and steps can persist
//! inputs/outputs verbatim. The typed structs below are what actually
//! travels inside those values.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::Usage;

// ============================================================================
// Agent Type
// ============================================================================

/// The closed set of pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Research,
    Writer,
    Seo,
    Qa,
    ProjectManager,
}

impl AgentType {
    /// All agent types in pipeline order.
    pub fn all() -> [AgentType; 5] {
        [
            AgentType::Research,
            AgentType::Writer,
            AgentType::Seo,
            AgentType::Qa,
            AgentType::ProjectManager,
        ]
    }

    /// Stable string tag used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Research => "research",
            AgentType::Writer => "writer",
            AgentType::Seo => "seo",
            AgentType::Qa => "qa",
            AgentType::ProjectManager => "project_manager",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown agent tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown agent type: '{0}'")]
pub struct UnknownAgentType(pub String);

impl FromStr for AgentType {
    type Err = UnknownAgentType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "research" => Ok(AgentType::Research),
            "writer" => Ok(AgentType::Writer),
            "seo" => Ok(AgentType::Seo),
            "qa" => Ok(AgentType::Qa),
            "project_manager" => Ok(AgentType::ProjectManager),
            _ => Err(UnknownAgentType(s.to_string())),
        }
    }
}

// ============================================================================
// Agent Outcome
// ============================================================================

/// Result of one agent execution.
///
/// Expected failures (model refused, unparseable output, provider errors)
/// come back as `success: false` with `error` set; `Err` from
/// [`Agent::execute`](super::Agent::execute) is reserved for bugs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub success: bool,
    pub output: Option<Value>,
    pub usage: Usage,
    pub error: Option<String>,
    /// Revision guidance; only QA sets this.
    pub feedback: Option<String>,
    pub continue_to_next: bool,
}

impl AgentOutcome {
    /// Successful outcome carrying `output`.
    pub fn success(output: Value, usage: Usage) -> Self {
        Self {
            success: true,
            output: Some(output),
            usage,
            error: None,
            feedback: None,
            continue_to_next: true,
        }
    }

    /// Failed outcome. Tokens spent on the failed attempt are still reported
    /// so the step can record them.
    pub fn failure(error: impl Into<String>, usage: Usage) -> Self {
        Self {
            success: false,
            output: None,
            usage,
            error: Some(error.into()),
            feedback: None,
            continue_to_next: false,
        }
    }

    /// Attaches revision feedback.
    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }

    /// Deserializes the output into a typed value.
    pub fn output_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.output.clone().unwrap_or(Value::Null))
    }
}

// ============================================================================
// Stage Payloads
// ============================================================================

/// Input for the Research agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchInput {
    pub keyword: String,
    #[serde(default)]
    pub target_word_count: Option<u32>,
}

/// Research findings that seed the writer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchOutput {
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub recommended_word_count: Option<u32>,
}

/// A drafted article.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub word_count: u32,
}

/// Input for the Writer agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WriterInput {
    pub keyword: String,
    pub target_word_count: u32,
    pub iteration: u32,
    #[serde(default)]
    pub research: Option<ResearchOutput>,
    /// The previous iteration's article, present on revisions.
    #[serde(default)]
    pub previous_article: Option<Article>,
    /// QA guidance for the revision.
    #[serde(default)]
    pub feedback: Option<String>,
}

/// Input for the SEO agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeoInput {
    pub keyword: String,
    pub article: Article,
    #[serde(default)]
    pub research: Option<ResearchOutput>,
}

/// SEO analysis of an article.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeoOutput {
    pub meta_title: String,
    pub meta_description: String,
    pub focus_keyword: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub slug: Option<String>,
    /// Rewritten article body, when the agent chose to optimize in place.
    #[serde(default)]
    pub optimized_content: Option<String>,
    #[serde(default)]
    pub score: f64,
}

/// Input for the QA agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QaInput {
    pub keyword: String,
    pub article: Article,
    pub target_word_count: u32,
    pub iteration: u32,
    #[serde(default)]
    pub seo: Option<SeoOutput>,
}

/// Quality verdict for an article.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QaOutput {
    pub passed: bool,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub feedback: String,
}

/// Input for the Project Manager agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectManagerInput {
    pub keyword: String,
    pub article: Article,
    pub iterations: u32,
    #[serde(default)]
    pub research: Option<ResearchOutput>,
    #[serde(default)]
    pub seo: Option<SeoOutput>,
    #[serde(default)]
    pub qa: Option<QaOutput>,
}

/// The assembled, publishable article record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalArticle {
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: String,
    pub meta_title: String,
    pub meta_description: String,
    #[serde(default)]
    pub meta_keywords: Vec<String>,
    pub word_count: u32,
    #[serde(default)]
    pub qa_passed: Option<bool>,
    #[serde(default)]
    pub qa_score: Option<f64>,
    pub iterations: u32,
    #[serde(default)]
    pub validation_errors: Vec<String>,
    pub ready_for_publish: bool,
}

impl FinalArticle {
    /// Minimal "not ready" record used when no assembly could happen.
    pub fn not_ready(
        keyword: &str,
        article: Option<&Article>,
        iterations: u32,
        reason: &str,
    ) -> Self {
        let title = article
            .map(|a| a.title.clone())
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| keyword.to_string());
        let content = article.map(|a| a.content.clone()).unwrap_or_default();
        let word_count = crate::utils::count_words(&content) as u32;

        Self {
            slug: crate::utils::slugify(&title),
            meta_title: title.clone(),
            title,
            excerpt: String::new(),
            meta_description: String::new(),
            meta_keywords: Vec::new(),
            content,
            word_count,
            qa_passed: None,
            qa_score: None,
            iterations,
            validation_errors: vec![reason.to_string()],
            ready_for_publish: false,
        }
    }
}
