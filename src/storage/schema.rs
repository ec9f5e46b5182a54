//! SQLite schema for the job, step and persona tables.
//!
//! Identifiers are stored as hyphenated UUID text, timestamps as RFC 3339
//! text and structured payloads as JSON text.

/// SQL schema for creating the jobs table.
pub const CREATE_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    keyword TEXT NOT NULL,
    status TEXT NOT NULL,
    settings TEXT NOT NULL,
    current_iteration INTEGER NOT NULL DEFAULT 1,
    current_agent TEXT,
    total_tokens_used INTEGER NOT NULL DEFAULT 0,
    progress_percent INTEGER NOT NULL DEFAULT 0,
    final_output TEXT,
    page_id TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT
)
"#;

/// SQL schema for creating the steps table.
pub const CREATE_STEPS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS steps (
    id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    agent_type TEXT NOT NULL,
    persona_id TEXT,
    iteration INTEGER NOT NULL,
    input TEXT NOT NULL,
    output TEXT,
    status TEXT NOT NULL,
    tokens_used INTEGER NOT NULL DEFAULT 0,
    prompt_tokens INTEGER NOT NULL DEFAULT 0,
    completion_tokens INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    error_detail TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT
)
"#;

/// SQL schema for creating the step_logs table.
pub const CREATE_STEP_LOGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS step_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    step_id TEXT NOT NULL REFERENCES steps(id) ON DELETE CASCADE,
    timestamp TEXT NOT NULL,
    level TEXT NOT NULL,
    message TEXT NOT NULL,
    data TEXT
)
"#;

/// SQL schema for creating the personas table.
pub const CREATE_PERSONAS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS personas (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    agent_type TEXT NOT NULL,
    model TEXT NOT NULL,
    system_prompt TEXT,
    temperature REAL NOT NULL,
    max_tokens INTEGER NOT NULL,
    is_default INTEGER NOT NULL DEFAULT 0
)
"#;

pub const CREATE_STEPS_JOB_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_steps_job_id ON steps(job_id)";

pub const CREATE_STEP_LOGS_STEP_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_step_logs_step_id ON step_logs(step_id)";

pub const CREATE_PERSONAS_TYPE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_personas_agent_type ON personas(agent_type, is_default)";

/// Returns all schema creation statements in the correct order.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_JOBS_TABLE,
        CREATE_STEPS_TABLE,
        CREATE_STEP_LOGS_TABLE,
        CREATE_PERSONAS_TABLE,
        CREATE_STEPS_JOB_INDEX,
        CREATE_STEP_LOGS_STEP_INDEX,
        CREATE_PERSONAS_TYPE_INDEX,
    ]
}

/// Table names in the schema.
pub mod tables {
    pub const JOBS: &str = "jobs";
    pub const STEPS: &str = "steps";
    pub const STEP_LOGS: &str = "step_logs";
    pub const PERSONAS: &str = "personas";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_schema_statements_order() {
        let statements = all_schema_statements();
        assert_eq!(statements.len(), 7);
        // Jobs must come first (steps reference it)
        assert!(statements[0].contains(tables::JOBS));
        assert!(statements[2].contains(tables::STEP_LOGS));
        assert!(statements[4..]
            .iter()
            .all(|s| s.starts_with("CREATE INDEX")));
    }
}
