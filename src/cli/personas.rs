//! Persona seed files and built-in fallback personas.
//!
//! A seed file is YAML with a top-level `personas` list:
//!
//! ```yaml
//! personas:
//!   - name: Senior Writer
//!     agent_type: writer
//!     model: anthropic/claude-3.5-sonnet
//!     temperature: 0.8
//!     system_prompt: You write clear, example-driven technical articles.
//! ```

use std::path::Path;

use serde::Deserialize;
use uuid::Uuid;

use crate::agents::AgentType;
use crate::storage::Persona;

/// Errors raised while loading a persona file.
#[derive(Debug, thiserror::Error)]
pub enum PersonaFileError {
    #[error("Failed to read persona file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid persona file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Persona '{name}': {reason}")]
    Invalid { name: String, reason: String },
}

#[derive(Debug, Deserialize)]
struct PersonaFile {
    #[serde(default)]
    personas: Vec<PersonaSpec>,
}

#[derive(Debug, Deserialize)]
struct PersonaSpec {
    /// Stable id so re-importing replaces instead of duplicating.
    #[serde(default)]
    id: Option<Uuid>,
    name: String,
    agent_type: AgentType,
    model: String,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default = "default_temperature")]
    temperature: f64,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default = "default_is_default")]
    is_default: bool,
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_is_default() -> bool {
    true
}

impl PersonaSpec {
    fn into_persona(self) -> Result<Persona, PersonaFileError> {
        if self.model.trim().is_empty() {
            return Err(PersonaFileError::Invalid {
                name: self.name,
                reason: "model must not be empty".to_string(),
            });
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(PersonaFileError::Invalid {
                name: self.name,
                reason: format!("temperature {} is outside 0.0-2.0", self.temperature),
            });
        }

        let mut persona = Persona::new(self.name, self.agent_type, self.model)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);
        if let Some(id) = self.id {
            persona.id = id;
        }
        if let Some(prompt) = self.system_prompt {
            persona = persona.with_system_prompt(prompt);
        }
        if !self.is_default {
            persona = persona.non_default();
        }
        Ok(persona)
    }
}

/// Parses personas from YAML text.
pub fn parse_personas(yaml: &str) -> Result<Vec<Persona>, PersonaFileError> {
    let file: PersonaFile = serde_yaml::from_str(yaml)?;
    file.personas
        .into_iter()
        .map(PersonaSpec::into_persona)
        .collect()
}

/// Reads and parses a persona seed file.
pub fn load_personas(path: &Path) -> Result<Vec<Persona>, PersonaFileError> {
    let yaml = std::fs::read_to_string(path).map_err(|source| PersonaFileError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_personas(&yaml)
}

/// Default persona for `agent_type` on `model`, used when none is stored.
pub fn builtin_persona(agent_type: AgentType, model: &str) -> Persona {
    let (name, prompt, temperature) = match agent_type {
        AgentType::Research => (
            "Researcher",
            "You are a meticulous research assistant. You identify what readers actually want to know about a topic.",
            0.3,
        ),
        AgentType::Writer => (
            "Writer",
            "You are an experienced long-form writer. You write clear, well-structured articles with concrete examples.",
            0.7,
        ),
        AgentType::Seo => (
            "SEO Specialist",
            "You are an SEO specialist. You improve discoverability without making the text read worse.",
            0.3,
        ),
        AgentType::Qa => (
            "Editor",
            "You are a strict editor. You only approve articles that are accurate, complete and ready to publish.",
            0.2,
        ),
        AgentType::ProjectManager => ("Project Manager", "You assemble the final article.", 0.0),
    };

    Persona::new(name, agent_type, model)
        .with_system_prompt(prompt)
        .with_temperature(temperature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_personas_applies_defaults() {
        let yaml = r#"
personas:
  - name: Senior Writer
    agent_type: writer
    model: anthropic/claude-3.5-sonnet
    system_prompt: Write with examples.
  - name: Backup QA
    agent_type: qa
    model: openai/gpt-4o-mini
    temperature: 0.1
    is_default: false
"#;
        let personas = parse_personas(yaml).unwrap();
        assert_eq!(personas.len(), 2);

        assert_eq!(personas[0].agent_type, AgentType::Writer);
        assert_eq!(personas[0].temperature, 0.7);
        assert_eq!(personas[0].max_tokens, 4000);
        assert!(personas[0].is_default);
        assert_eq!(personas[0].system_prompt.as_deref(), Some("Write with examples."));

        assert_eq!(personas[1].temperature, 0.1);
        assert!(!personas[1].is_default);
    }

    #[test]
    fn test_parse_personas_rejects_unknown_agent() {
        let yaml = "personas:\n  - name: X\n    agent_type: editor\n    model: m\n";
        assert!(matches!(parse_personas(yaml), Err(PersonaFileError::Parse(_))));
    }

    #[test]
    fn test_parse_personas_rejects_bad_temperature() {
        let yaml = "personas:\n  - name: Hot\n    agent_type: seo\n    model: m\n    temperature: 3.5\n";
        let err = parse_personas(yaml).unwrap_err();
        assert!(err.to_string().contains("Hot"));
    }

    #[test]
    fn test_load_personas_keeps_explicit_id() {
        let id = Uuid::new_v4();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "personas:\n  - id: {}\n    name: R\n    agent_type: research\n    model: m\n",
            id
        )
        .unwrap();

        let personas = load_personas(file.path()).unwrap();
        assert_eq!(personas[0].id, id);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_personas(Path::new("/nonexistent/personas.yaml")).unwrap_err();
        assert!(matches!(err, PersonaFileError::Io { .. }));
    }

    #[test]
    fn test_builtin_personas_cover_every_agent() {
        for agent_type in AgentType::all() {
            let persona = builtin_persona(agent_type, "openai/gpt-4o-mini");
            assert_eq!(persona.agent_type, agent_type);
            assert!(persona.is_default);
            assert!(persona.system_prompt.is_some());
        }
    }
}
