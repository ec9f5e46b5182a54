//! QA agent: pass/fail review that drives the revision loop.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::types::{AgentOutcome, AgentType, QaInput, QaOutput};
use super::{bullet_list, generate_typed, parse_input, Agent, AgentContext, AgentResult};
use crate::storage::LogLevel;

/// Articles shorter than this share of the target always fail review.
const MIN_LENGTH_RATIO: f64 = 0.6;

const QA_USER_TEMPLATE: &str = r#"Review the article below about "{keyword}" as a demanding editor.

Check factual plausibility, structure, clarity, coverage of the topic and
whether it reads naturally. Target length is about {words} words; the
article currently has {actual_words} words. This is revision {iteration}.

Set passed to true only if the article could be published as is.
When it fails, list the concrete issues and write feedback the writer can
act on directly.

{seo_note}Title: {title}

Article:
{content}"#;

/// Reviews the article and decides whether another revision is needed.
#[derive(Debug, Default)]
pub struct QaAgent;

impl QaAgent {
    pub fn new() -> Self {
        Self
    }

    fn build_prompt(input: &QaInput) -> String {
        let seo_note = input
            .seo
            .as_ref()
            .map(|seo| format!("Focus keyword chosen by SEO: {}\n\n", seo.focus_keyword))
            .unwrap_or_default();

        QA_USER_TEMPLATE
            .replace("{keyword}", &input.keyword)
            .replace("{words}", &input.target_word_count.to_string())
            .replace("{actual_words}", &input.article.word_count.to_string())
            .replace("{iteration}", &input.iteration.to_string())
            .replace("{seo_note}", &seo_note)
            .replace("{title}", &input.article.title)
            .replace("{content}", &input.article.content)
    }

    /// Overrides a passing verdict when the article is far below target
    /// length.
    fn enforce_length(input: &QaInput, verdict: &mut QaOutput) {
        let minimum = (input.target_word_count as f64 * MIN_LENGTH_RATIO).round() as u32;
        if input.article.word_count >= minimum {
            return;
        }

        verdict.passed = false;
        verdict.issues.push(format!(
            "Article has {} words; at least {} expected",
            input.article.word_count, minimum
        ));
        if verdict.feedback.trim().is_empty() {
            verdict.feedback = format!(
                "Expand the article to roughly {} words.",
                input.target_word_count
            );
        }
    }
}

#[async_trait]
impl Agent for QaAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Qa
    }

    fn name(&self) -> &str {
        "QA"
    }

    fn description(&self) -> &str {
        "Reviews the article and returns a pass/fail verdict with revision feedback"
    }

    fn validate_input(&self, input: &Value) -> bool {
        serde_json::from_value::<QaInput>(input.clone())
            .map(|i| !i.article.content.trim().is_empty())
            .unwrap_or(false)
    }

    async fn execute(&self, input: Value, ctx: &AgentContext) -> AgentResult<AgentOutcome> {
        let input: QaInput = parse_input(AgentType::Qa, input)?;
        ctx.log(
            LogLevel::Info,
            "Reviewing article",
            Some(json!({"iteration": input.iteration})),
        );
        ctx.on_progress("Reviewing quality", None);

        let (mut verdict, usage) = match generate_typed::<QaOutput>(
            ctx,
            Self::build_prompt(&input),
            self.output_schema(),
        )
        .await
        {
            Ok(parsed) => parsed,
            Err(outcome) => return Ok(outcome),
        };

        verdict.score = verdict.score.clamp(0.0, 1.0);
        Self::enforce_length(&input, &mut verdict);

        if !verdict.passed && verdict.feedback.trim().is_empty() {
            verdict.feedback = bullet_list(&verdict.issues, "Improve overall quality.");
        }

        ctx.log(
            if verdict.passed { LogLevel::Info } else { LogLevel::Warn },
            if verdict.passed { "QA passed" } else { "QA failed" },
            Some(json!({"score": verdict.score, "issues": verdict.issues})),
        );

        let feedback = verdict.feedback.clone();
        let outcome = AgentOutcome::success(serde_json::to_value(&verdict)?, usage);
        Ok(if verdict.passed {
            outcome
        } else {
            outcome.with_feedback(feedback)
        })
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["passed", "score", "issues", "feedback"],
            "properties": {
                "passed": {"type": "boolean"},
                "score": {"type": "number", "minimum": 0, "maximum": 1},
                "issues": {"type": "array", "items": {"type": "string"}},
                "feedback": {"type": "string"}
            }
        })
    }
}
