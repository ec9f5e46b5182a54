//! Project Manager agent: deterministic assembly of the final article.
//!
//! No model call is made. Every field of [`FinalArticle`] is derived from
//! the upstream outputs with a fixed fallback chain, and anything that
//! would make the article unpublishable is collected as a validation error
//! rather than failing the stage.

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use super::types::{AgentOutcome, AgentType, FinalArticle, ProjectManagerInput};
use super::{parse_input, Agent, AgentContext, AgentResult};
use crate::llm::Usage;
use crate::storage::LogLevel;
use crate::utils::{count_words, slugify, strip_markdown, truncate_at_word};

const MAX_META_TITLE_CHARS: usize = 60;
const MAX_META_DESCRIPTION_CHARS: usize = 160;
const MAX_EXCERPT_CHARS: usize = 160;

/// Stable slug for sources with no letters or digits at all, e.g. a title
/// made only of emoji.
fn fallback_slug(source: &str) -> String {
    let digest = Uuid::new_v5(&Uuid::NAMESPACE_URL, source.as_bytes()).simple().to_string();
    format!("article-{}", &digest[..8])
}

/// Assembles and validates the publishable record.
#[derive(Debug, Default)]
pub struct ProjectManagerAgent;

impl ProjectManagerAgent {
    pub fn new() -> Self {
        Self
    }

    /// Builds the final record from the stage outputs.
    pub fn assemble(input: &ProjectManagerInput) -> FinalArticle {
        let article = &input.article;
        let seo = input.seo.as_ref();

        let title = article.title.trim().to_string();
        let content = article.content.trim().to_string();
        let word_count = count_words(&strip_markdown(&content)) as u32;

        let slug_source = seo
            .and_then(|s| s.slug.as_deref())
            .filter(|s| !s.trim().is_empty())
            .or_else(|| Some(title.as_str()).filter(|t| !t.is_empty()))
            .unwrap_or(&input.keyword);
        let slug = match slugify(slug_source) {
            slug if slug.is_empty() => fallback_slug(slug_source),
            slug => slug,
        };

        let excerpt = article
            .excerpt
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(|e| truncate_at_word(e, MAX_EXCERPT_CHARS))
            .unwrap_or_else(|| truncate_at_word(&strip_markdown(&content), MAX_EXCERPT_CHARS));

        let meta_title = seo
            .map(|s| s.meta_title.trim())
            .filter(|t| !t.is_empty())
            .map(|t| truncate_at_word(t, MAX_META_TITLE_CHARS))
            .unwrap_or_else(|| truncate_at_word(&title, MAX_META_TITLE_CHARS));

        let meta_description = seo
            .map(|s| s.meta_description.trim())
            .filter(|d| !d.is_empty())
            .map(|d| truncate_at_word(d, MAX_META_DESCRIPTION_CHARS))
            .unwrap_or_else(|| truncate_at_word(&excerpt, MAX_META_DESCRIPTION_CHARS));

        let meta_keywords = seo
            .map(|s| s.keywords.clone())
            .filter(|k| !k.is_empty())
            .or_else(|| input.research.as_ref().map(|r| r.keywords.clone()))
            .unwrap_or_default();

        let mut validation_errors = Vec::new();
        if title.is_empty() {
            validation_errors.push("Missing title".to_string());
        }
        if content.is_empty() {
            validation_errors.push("Missing content".to_string());
        } else if word_count == 0 {
            validation_errors.push("Article has no words".to_string());
        }
        if let Some(qa) = input.qa.as_ref().filter(|qa| !qa.passed) {
            let reason = if qa.issues.is_empty() {
                qa.feedback.trim().to_string()
            } else {
                qa.issues.join("; ")
            };
            validation_errors.push(format!("QA did not pass: {}", reason));
        }

        FinalArticle {
            ready_for_publish: validation_errors.is_empty(),
            title,
            slug,
            content,
            excerpt,
            meta_title,
            meta_description,
            meta_keywords,
            word_count,
            qa_passed: input.qa.as_ref().map(|qa| qa.passed),
            qa_score: input.qa.as_ref().map(|qa| qa.score),
            iterations: input.iterations,
            validation_errors,
        }
    }
}

#[async_trait]
impl Agent for ProjectManagerAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::ProjectManager
    }

    fn name(&self) -> &str {
        "Project Manager"
    }

    fn description(&self) -> &str {
        "Assembles the final article record and decides whether it is ready to publish"
    }

    fn validate_input(&self, input: &Value) -> bool {
        serde_json::from_value::<ProjectManagerInput>(input.clone()).is_ok()
    }

    async fn execute(&self, input: Value, ctx: &AgentContext) -> AgentResult<AgentOutcome> {
        let input: ProjectManagerInput = parse_input(AgentType::ProjectManager, input)?;
        ctx.on_progress("Assembling final article", None);

        let final_article = Self::assemble(&input);
        if final_article.ready_for_publish {
            ctx.log(LogLevel::Info, "Article ready for publish", None);
        } else {
            ctx.log(
                LogLevel::Warn,
                "Article not ready for publish",
                Some(json!({"validation_errors": final_article.validation_errors})),
            );
        }

        Ok(AgentOutcome::success(
            serde_json::to_value(&final_article)?,
            Usage::default(),
        ))
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["title", "slug", "content", "excerpt", "meta_title",
                         "meta_description", "word_count", "iterations",
                         "ready_for_publish"],
            "properties": {
                "title": {"type": "string"},
                "slug": {"type": "string"},
                "content": {"type": "string"},
                "excerpt": {"type": "string"},
                "meta_title": {"type": "string"},
                "meta_description": {"type": "string"},
                "meta_keywords": {"type": "array", "items": {"type": "string"}},
                "word_count": {"type": "integer"},
                "qa_passed": {"type": ["boolean", "null"]},
                "qa_score": {"type": ["number", "null"]},
                "iterations": {"type": "integer"},
                "validation_errors": {"type": "array", "items": {"type": "string"}},
                "ready_for_publish": {"type": "boolean"}
            }
        })
    }
}
