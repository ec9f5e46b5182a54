//! SEO agent: meta tags, slug and optional in-place optimization.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::types::{AgentOutcome, AgentType, SeoInput, SeoOutput};
use super::{generate_typed, parse_input, Agent, AgentContext, AgentResult};
use crate::storage::LogLevel;
use crate::utils::slugify;

const SEO_USER_TEMPLATE: &str = r#"Optimize the article below for the search keyword "{keyword}".

Return:
- meta_title: at most 60 characters, containing the keyword
- meta_description: at most 160 characters, compelling and specific
- focus_keyword and a list of secondary keywords
- slug: short, lowercase, hyphenated
- optimized_content: the full article body with on-page improvements, or omit it if no change is needed
- score: 0.0-1.0 rating of the article's current search readiness

Related keywords from research: {research_keywords}

Title: {title}

Article:
{content}"#;

/// Produces search metadata for the current article.
#[derive(Debug, Default)]
pub struct SeoAgent;

impl SeoAgent {
    pub fn new() -> Self {
        Self
    }

    fn build_prompt(input: &SeoInput) -> String {
        let research_keywords = input
            .research
            .as_ref()
            .map(|r| r.keywords.join(", "))
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| "(none)".to_string());

        SEO_USER_TEMPLATE
            .replace("{keyword}", &input.keyword)
            .replace("{research_keywords}", &research_keywords)
            .replace("{title}", &input.article.title)
            .replace("{content}", &input.article.content)
    }
}

#[async_trait]
impl Agent for SeoAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Seo
    }

    fn name(&self) -> &str {
        "SEO"
    }

    fn description(&self) -> &str {
        "Writes meta title, description, keywords and slug; may optimize the body"
    }

    fn validate_input(&self, input: &Value) -> bool {
        serde_json::from_value::<SeoInput>(input.clone())
            .map(|i| !i.article.content.trim().is_empty())
            .unwrap_or(false)
    }

    async fn execute(&self, input: Value, ctx: &AgentContext) -> AgentResult<AgentOutcome> {
        let input: SeoInput = parse_input(AgentType::Seo, input)?;
        ctx.log(LogLevel::Info, "Analyzing article for search", None);
        ctx.on_progress("Optimizing for search", None);

        let (mut seo, usage) = match generate_typed::<SeoOutput>(
            ctx,
            Self::build_prompt(&input),
            self.output_schema(),
        )
        .await
        {
            Ok(parsed) => parsed,
            Err(outcome) => return Ok(outcome),
        };

        seo.slug = seo
            .slug
            .as_deref()
            .map(slugify)
            .filter(|slug| !slug.is_empty());
        seo.optimized_content = seo
            .optimized_content
            .filter(|content| !content.trim().is_empty());
        if seo.focus_keyword.trim().is_empty() {
            seo.focus_keyword = input.keyword.clone();
        }
        seo.score = seo.score.clamp(0.0, 1.0);

        ctx.log(
            LogLevel::Info,
            "SEO analysis complete",
            Some(json!({
                "score": seo.score,
                "rewrote_content": seo.optimized_content.is_some(),
            })),
        );

        Ok(AgentOutcome::success(serde_json::to_value(&seo)?, usage))
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["meta_title", "meta_description", "focus_keyword"],
            "properties": {
                "meta_title": {"type": "string", "maxLength": 60},
                "meta_description": {"type": "string", "maxLength": 160},
                "focus_keyword": {"type": "string"},
                "keywords": {"type": "array", "items": {"type": "string"}},
                "slug": {"type": "string"},
                "optimized_content": {"type": "string"},
                "score": {"type": "number", "minimum": 0, "maximum": 1}
            }
        })
    }
}
