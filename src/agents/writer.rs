//! Writer agent: drafts the article and revises it from QA feedback.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::types::{AgentOutcome, AgentType, Article, WriterInput};
use super::{bullet_list, generate_typed, parse_input, Agent, AgentContext, AgentResult};
use crate::storage::LogLevel;
use crate::utils::{count_words, strip_markdown};

const DRAFT_USER_TEMPLATE: &str = r#"Write a complete article about "{keyword}".

Target length: about {words} words.
Format the body as Markdown with descriptive section headings.

Research summary:
{summary}

Key points to cover:
{key_points}

Questions to answer:
{questions}"#;

const REVISION_USER_TEMPLATE: &str = r#"Revise the article below about "{keyword}" (revision {iteration}).

Target length: about {words} words.
Keep what works; fix every problem the reviewer raised.

Reviewer feedback:
{feedback}

Current title: {title}

Current article:
{content}"#;

/// Drafts and revises the article body.
#[derive(Debug, Default)]
pub struct WriterAgent;

impl WriterAgent {
    pub fn new() -> Self {
        Self
    }

    fn build_prompt(input: &WriterInput) -> String {
        let words = input.target_word_count.to_string();

        if let Some(previous) = &input.previous_article {
            let feedback = input
                .feedback
                .as_deref()
                .filter(|f| !f.trim().is_empty())
                .unwrap_or("No specific feedback; tighten and improve the draft.");
            return REVISION_USER_TEMPLATE
                .replace("{keyword}", &input.keyword)
                .replace("{iteration}", &input.iteration.to_string())
                .replace("{words}", &words)
                .replace("{feedback}", feedback)
                .replace("{title}", &previous.title)
                .replace("{content}", &previous.content);
        }

        let (summary, key_points, questions) = match &input.research {
            Some(research) => (
                research.summary.clone(),
                bullet_list(&research.key_points, "- (none)"),
                bullet_list(&research.questions, "- (none)"),
            ),
            None => (
                "No research available; rely on general knowledge.".to_string(),
                "- (none)".to_string(),
                "- (none)".to_string(),
            ),
        };

        DRAFT_USER_TEMPLATE
            .replace("{keyword}", &input.keyword)
            .replace("{words}", &words)
            .replace("{summary}", &summary)
            .replace("{key_points}", &key_points)
            .replace("{questions}", &questions)
    }
}

#[async_trait]
impl Agent for WriterAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Writer
    }

    fn name(&self) -> &str {
        "Writer"
    }

    fn description(&self) -> &str {
        "Drafts the article, or revises the previous draft using QA feedback"
    }

    fn validate_input(&self, input: &Value) -> bool {
        serde_json::from_value::<WriterInput>(input.clone())
            .map(|i| !i.keyword.trim().is_empty() && i.target_word_count > 0)
            .unwrap_or(false)
    }

    async fn execute(&self, input: Value, ctx: &AgentContext) -> AgentResult<AgentOutcome> {
        let input: WriterInput = parse_input(AgentType::Writer, input)?;
        let revising = input.previous_article.is_some();
        ctx.log(
            LogLevel::Info,
            if revising { "Revising article" } else { "Drafting article" },
            Some(json!({
                "iteration": input.iteration,
                "target_word_count": input.target_word_count,
            })),
        );
        ctx.on_progress(
            if revising { "Revising draft" } else { "Writing first draft" },
            Some(json!({"iteration": input.iteration})),
        );

        let (mut article, usage) = match generate_typed::<Article>(
            ctx,
            Self::build_prompt(&input),
            self.output_schema(),
        )
        .await
        {
            Ok(parsed) => parsed,
            Err(outcome) => return Ok(outcome),
        };

        if article.title.trim().is_empty() || article.content.trim().is_empty() {
            return Ok(AgentOutcome::failure(
                "Writer returned an article without title or content",
                usage,
            ));
        }

        // The model's own count is unreliable.
        article.word_count = count_words(&strip_markdown(&article.content)) as u32;
        ctx.log(
            LogLevel::Info,
            "Article written",
            Some(json!({"word_count": article.word_count})),
        );

        Ok(AgentOutcome::success(serde_json::to_value(&article)?, usage))
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["title", "content"],
            "properties": {
                "title": {"type": "string"},
                "content": {"type": "string", "description": "Markdown body"},
                "excerpt": {"type": "string"},
                "word_count": {"type": "integer"}
            }
        })
    }
}
