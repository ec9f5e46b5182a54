//! Research agent: topic briefing that seeds the writer.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::types::{AgentOutcome, AgentType, ResearchInput, ResearchOutput};
use super::{generate_typed, parse_input, Agent, AgentContext, AgentResult};
use crate::storage::LogLevel;

/// Bounds applied to the model's suggested article length.
const MIN_RECOMMENDED_WORDS: u32 = 300;
const MAX_RECOMMENDED_WORDS: u32 = 5000;

const RESEARCH_USER_TEMPLATE: &str = r#"Research the topic "{keyword}" for a long-form web article.

Produce:
- a short summary of what a reader searching for this topic wants to know
- the key points the article must cover
- related keywords and phrases readers search for
- common questions the article should answer
- a recommended article length in words{length_hint}"#;

/// Gathers a briefing for the keyword.
#[derive(Debug, Default)]
pub struct ResearchAgent;

impl ResearchAgent {
    pub fn new() -> Self {
        Self
    }

    fn build_prompt(input: &ResearchInput) -> String {
        let length_hint = input
            .target_word_count
            .map(|words| format!(" (the editor is aiming for about {} words)", words))
            .unwrap_or_default();

        RESEARCH_USER_TEMPLATE
            .replace("{keyword}", &input.keyword)
            .replace("{length_hint}", &length_hint)
    }
}

#[async_trait]
impl Agent for ResearchAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Research
    }

    fn name(&self) -> &str {
        "Research"
    }

    fn description(&self) -> &str {
        "Collects key points, related keywords and reader questions for a topic"
    }

    fn validate_input(&self, input: &Value) -> bool {
        serde_json::from_value::<ResearchInput>(input.clone())
            .map(|i| !i.keyword.trim().is_empty())
            .unwrap_or(false)
    }

    async fn execute(&self, input: Value, ctx: &AgentContext) -> AgentResult<AgentOutcome> {
        let input: ResearchInput = parse_input(AgentType::Research, input)?;
        ctx.log(
            LogLevel::Info,
            format!("Researching '{}'", input.keyword),
            None,
        );
        ctx.on_progress("Researching topic", None);

        let (mut research, usage) = match generate_typed::<ResearchOutput>(
            ctx,
            Self::build_prompt(&input),
            self.output_schema(),
        )
        .await
        {
            Ok(parsed) => parsed,
            Err(outcome) => return Ok(outcome),
        };

        if research.summary.trim().is_empty() {
            return Ok(AgentOutcome::failure(
                "Research returned an empty summary",
                usage,
            ));
        }

        research.recommended_word_count = research
            .recommended_word_count
            .map(|w| w.clamp(MIN_RECOMMENDED_WORDS, MAX_RECOMMENDED_WORDS));

        ctx.log(
            LogLevel::Info,
            "Research complete",
            Some(json!({
                "key_points": research.key_points.len(),
                "keywords": research.keywords.len(),
            })),
        );

        Ok(AgentOutcome::success(serde_json::to_value(&research)?, usage))
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["summary", "key_points", "keywords"],
            "properties": {
                "summary": {"type": "string"},
                "key_points": {"type": "array", "items": {"type": "string"}},
                "keywords": {"type": "array", "items": {"type": "string"}},
                "questions": {"type": "array", "items": {"type": "string"}},
                "recommended_word_count": {"type": "integer", "minimum": 1}
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::context::test_support::{context, ScriptedLlm};
    use crate::error::LlmError;
    use std::sync::Arc;

    #[test]
    fn test_validate_input() {
        let agent = ResearchAgent::new();
        assert!(agent.validate_input(&json!({"keyword": "rust traits"})));
        assert!(!agent.validate_input(&json!({"keyword": "  "})));
        assert!(!agent.validate_input(&json!({"topic": "rust"})));
        assert!(!agent.validate_input(&json!("rust")));
    }

    #[tokio::test]
    async fn test_execute_parses_and_clamps() {
        let llm = Arc::new(ScriptedLlm::replying(
            r#"{"summary": "Traits define shared behavior", "key_points": ["bounds"], "keywords": ["rust trait"], "recommended_word_count": 12000}"#,
        ));
        let ctx = context(AgentType::Research, llm.clone());

        let outcome = ResearchAgent::new()
            .execute(json!({"keyword": "rust traits"}), &ctx)
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.usage.total_tokens, 150);
        let research: ResearchOutput = outcome.output_as().unwrap();
        assert_eq!(research.recommended_word_count, Some(MAX_RECOMMENDED_WORDS));
        assert!(llm.last_prompt().contains("rust traits"));
    }

    #[tokio::test]
    async fn test_rate_limit_becomes_failed_outcome() {
        let llm = Arc::new(ScriptedLlm::new(vec![Err(LlmError::RateLimited(
            "slow down".into(),
        ))]));
        let ctx = context(AgentType::Research, llm);

        let outcome = ResearchAgent::new()
            .execute(json!({"keyword": "rust"}), &ctx)
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("429"));
    }
}
