//! CLI command definitions for article-forge.
//!
//! Jobs, steps and personas live in a SQLite database so `status` and
//! `cancel` can inspect or stop a job started by another `run` process.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use uuid::Uuid;

use super::personas::{builtin_persona, load_personas};
use crate::agents::{AgentRegistry, AgentType};
use crate::llm::{LlmProvider, OpenRouterProvider};
use crate::metrics::PipelineMetrics;
use crate::pipeline::{
    EventKind, PipelineConfig, PipelineDeps, PipelineOrchestrator, PipelineResult,
};
use crate::storage::{
    HttpPageService, Job, JobRepository, JobSettings, PageService, PersonaRepository,
    SqliteStore, StepRepository,
};

/// Default model for personas created on first run.
const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

const DEFAULT_DATABASE_URL: &str = "sqlite://article-forge.db?mode=rwc";

/// Multi-agent article generation pipeline.
#[derive(Parser)]
#[command(name = "article-forge")]
#[command(about = "Generate SEO-ready articles with a research/write/review agent pipeline")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// SQLite database holding jobs, steps and personas.
    #[arg(long, env = "ARTICLE_FORGE_DATABASE_URL", default_value = DEFAULT_DATABASE_URL, global = true)]
    pub database_url: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Generate an article for a keyword.
    Run(RunArgs),

    /// Show a job and its steps.
    Status(StatusArgs),

    /// Cancel a running job at its next checkpoint.
    Cancel(CancelArgs),

    /// Manage agent personas.
    #[command(subcommand)]
    Personas(PersonasCommand),
}

/// Arguments for `article-forge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Keyword or topic to write about.
    pub keyword: String,

    /// Maximum Writer/SEO/QA rounds.
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Target article length in words.
    #[arg(long)]
    pub word_count: Option<u32>,

    /// Stages to skip (comma-separated, e.g. research,seo).
    #[arg(long, value_delimiter = ',')]
    pub skip: Vec<AgentType>,

    /// Publish the article when it is ready.
    #[arg(long)]
    pub auto_post: bool,

    /// Parent page id for the published page.
    #[arg(long)]
    pub parent_page: Option<String>,

    /// Model for personas created on first run.
    #[arg(short = 'm', long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// OpenRouter API key.
    #[arg(long, env = "OPENROUTER_API_KEY")]
    pub api_key: Option<String>,

    /// OpenAI-compatible base URL, for gateways other than OpenRouter.
    #[arg(long, env = "OPENROUTER_BASE_URL")]
    pub base_url: Option<String>,

    /// YAML persona file to import before running.
    #[arg(long)]
    pub personas: Option<PathBuf>,

    /// Base URL of the page API used for auto-posting.
    #[arg(long, env = "ARTICLE_FORGE_PUBLISH_URL")]
    pub publish_url: Option<String>,

    /// Bearer token for the page API.
    #[arg(long, env = "ARTICLE_FORGE_PUBLISH_TOKEN")]
    pub publish_token: Option<String>,

    /// Print Prometheus metrics after the run.
    #[arg(long)]
    pub metrics: bool,

    /// Output JSON to stdout instead of progress lines.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `article-forge status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    pub job_id: Uuid,

    /// Include each step's log entries.
    #[arg(long)]
    pub logs: bool,

    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `article-forge cancel`.
#[derive(Parser, Debug)]
pub struct CancelArgs {
    pub job_id: Uuid,
}

/// `article-forge personas` subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum PersonasCommand {
    /// List stored personas.
    List {
        #[arg(short = 'j', long)]
        json: bool,
    },

    /// Import personas from a YAML file.
    Import { file: PathBuf },
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let store = open_store(&cli.database_url).await?;

    match cli.command {
        Commands::Run(args) => run_pipeline_command(store, args).await,
        Commands::Status(args) => run_status_command(store, args).await,
        Commands::Cancel(args) => run_cancel_command(store, args).await,
        Commands::Personas(command) => run_personas_command(store, command).await,
    }
}

async fn open_store(database_url: &str) -> anyhow::Result<Arc<SqliteStore>> {
    let store = SqliteStore::connect(database_url)
        .await
        .with_context(|| format!("Failed to open database {}", database_url))?;
    store.run_migrations().await.context("Failed to run migrations")?;
    Ok(Arc::new(store))
}

async fn run_pipeline_command(store: Arc<SqliteStore>, args: RunArgs) -> anyhow::Result<()> {
    let config = PipelineConfig::from_env()?;
    config.validate()?;

    let api_key = args.api_key.clone().ok_or_else(|| {
        anyhow::anyhow!(
            "OPENROUTER_API_KEY is required but not set.\n\
             Provide it via --api-key <KEY> or set the OPENROUTER_API_KEY environment variable."
        )
    })?;
    let llm: Arc<dyn LlmProvider> = match &args.base_url {
        Some(base_url) => Arc::new(OpenRouterProvider::with_custom_url(
            api_key,
            base_url.clone(),
            args.model.clone(),
        )?),
        None => Arc::new(OpenRouterProvider::with_model(api_key, args.model.clone())?),
    };

    if let Some(path) = &args.personas {
        import_personas(&store, path).await?;
    }
    seed_missing_personas(&store, &args.model).await?;

    let pages: Option<Arc<dyn PageService>> = match &args.publish_url {
        Some(url) => Some(Arc::new(HttpPageService::new(
            url.clone(),
            args.publish_token.clone(),
        )?)),
        None => {
            if args.auto_post {
                warn!("--auto-post given without --publish-url; the article will not be published");
            }
            None
        }
    };

    let mut settings = JobSettings::default().with_auto_post(args.auto_post);
    if let Some(iterations) = args.max_iterations {
        settings = settings.with_max_iterations(iterations);
    }
    if let Some(words) = args.word_count {
        settings = settings.with_target_word_count(words);
    }
    if let Some(parent) = &args.parent_page {
        settings = settings.with_parent_page(parent.clone());
    }
    for agent_type in &args.skip {
        settings = settings.with_skip(*agent_type);
    }

    let job = Job::new(args.keyword.clone(), settings);
    store.insert_job(&job).await?;
    info!(job_id = %job.id, keyword = %job.keyword, "Created job");

    let metrics = PipelineMetrics::new()?;
    let deps = PipelineDeps {
        jobs: store.clone(),
        steps: store.clone(),
        personas: store.clone(),
        pages,
        llm,
        registry: Arc::new(AgentRegistry::with_builtin_agents()),
    };
    let orchestrator = PipelineOrchestrator::new(deps, config).with_metrics(metrics.clone());

    if !args.json {
        spawn_progress_printer(&orchestrator);
    }

    let cancel_store = store.clone();
    let job_id = job.id;
    let cancel_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(job_id = %job_id, "Interrupt received, cancelling at next checkpoint");
            if let Err(e) = cancel_store.cancel_job(job_id).await {
                warn!(job_id = %job_id, error = %e, "Failed to cancel job");
            }
        }
    });

    let result = orchestrator.execute(job).await;
    cancel_task.abort();
    orchestrator.flush_logs().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result_json(&result))?);
    } else {
        print_result(&result);
    }
    if args.metrics {
        println!("{}", metrics.export());
    }

    if !result.success && !result.cancelled {
        anyhow::bail!(
            "Job {} failed: {}",
            result.job.id,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn spawn_progress_printer(orchestrator: &PipelineOrchestrator) {
    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if matches!(event.kind, EventKind::AgentProgress) {
                        continue;
                    }
                    match event.agent_type {
                        Some(agent) => println!("  [{}] {}", agent, event.message),
                        None => println!("  {}", event.message),
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn result_json(result: &PipelineResult) -> serde_json::Value {
    serde_json::json!({
        "success": result.success,
        "cancelled": result.cancelled,
        "error": result.error,
        "iterations": result.iterations,
        "total_tokens": result.total_tokens,
        "job": result.job,
    })
}

fn print_result(result: &PipelineResult) {
    let job = &result.job;
    if result.cancelled {
        println!("Job {} cancelled", job.id);
    } else if result.success {
        println!("✓ Job {} completed", job.id);
    } else {
        println!("✗ Job {} failed", job.id);
    }
    println!("  Iterations:   {}", result.iterations);
    println!("  Total tokens: {}", result.total_tokens);

    if let Some(article) = &job.final_output {
        println!("  Title:        {}", article.title);
        println!("  Slug:         {}", article.slug);
        println!("  Words:        {}", article.word_count);
        println!("  Ready:        {}", article.ready_for_publish);
        for error in &article.validation_errors {
            println!("    - {}", error);
        }
    }
    if let Some(page_id) = &job.page_id {
        println!("  Page:         {}", page_id);
    }
}

async fn run_status_command(store: Arc<SqliteStore>, args: StatusArgs) -> anyhow::Result<()> {
    let job = JobRepository::find_by_id(store.as_ref(), args.job_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Job {} not found", args.job_id))?;
    let steps = store.list_for_job(job.id).await?;

    if args.json {
        let output = serde_json::json!({ "job": job, "steps": steps });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Job {} ({})", job.id, job.keyword);
    println!("  Status:     {}", job.status.as_str());
    println!("  Progress:   {}%", job.progress_percent);
    println!("  Iteration:  {}", job.current_iteration);
    println!("  Tokens:     {}", job.total_tokens_used);
    if let Some(agent) = job.current_agent {
        println!("  Agent:      {}", agent);
    }
    if let Some(error) = &job.error {
        println!("  Error:      {}", error);
    }

    println!("  Steps:");
    for step in &steps {
        println!(
            "    {:<16} iter {}  {:<9} {:>6} tokens{}",
            step.agent_type.as_str(),
            step.iteration,
            step.status.as_str(),
            step.tokens_used,
            step.error
                .as_deref()
                .map(|e| format!("  ({})", e))
                .unwrap_or_default()
        );
        if args.logs {
            for entry in &step.logs {
                println!(
                    "      {} {:?} {}",
                    entry.timestamp.format("%H:%M:%S"),
                    entry.level,
                    entry.message
                );
            }
        }
    }
    Ok(())
}

async fn run_cancel_command(store: Arc<SqliteStore>, args: CancelArgs) -> anyhow::Result<()> {
    let job = JobRepository::find_by_id(store.as_ref(), args.job_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Job {} not found", args.job_id))?;
    if job.status.is_terminal() {
        anyhow::bail!("Job {} is already {}", job.id, job.status.as_str());
    }

    store.cancel_job(job.id).await?;
    println!("Job {} marked cancelled; it stops at its next checkpoint", job.id);
    Ok(())
}

async fn run_personas_command(
    store: Arc<SqliteStore>,
    command: PersonasCommand,
) -> anyhow::Result<()> {
    match command {
        PersonasCommand::List { json } => {
            let personas = store.list_personas().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&personas)?);
            } else if personas.is_empty() {
                println!("No personas stored. Import some with `article-forge personas import <file>`.");
            } else {
                for persona in &personas {
                    println!(
                        "{}  {:<16} {:<24} {}{}",
                        persona.id,
                        persona.agent_type.as_str(),
                        persona.name,
                        persona.model,
                        if persona.is_default { "  (default)" } else { "" }
                    );
                }
            }
        }
        PersonasCommand::Import { file } => {
            let count = import_personas(&store, &file).await?;
            println!("Imported {} personas from {}", count, file.display());
        }
    }
    Ok(())
}

async fn import_personas(store: &SqliteStore, path: &std::path::Path) -> anyhow::Result<usize> {
    let personas = load_personas(path)?;
    for persona in &personas {
        store.insert_persona(persona).await?;
    }
    info!(count = personas.len(), path = %path.display(), "Imported personas");
    Ok(personas.len())
}

/// Stores a built-in default persona for every agent type lacking one.
async fn seed_missing_personas(store: &SqliteStore, model: &str) -> anyhow::Result<()> {
    for agent_type in AgentType::all() {
        if store.find_default(agent_type).await?.is_none() {
            let persona = builtin_persona(agent_type, model);
            info!(agent = %agent_type, model, "Creating default persona");
            store.insert_persona(&persona).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args_parse_skip_list() {
        let cli = Cli::try_parse_from([
            "article-forge",
            "run",
            "rust traits",
            "--skip",
            "research,seo",
            "--max-iterations",
            "2",
            "--auto-post",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.keyword, "rust traits");
        assert_eq!(args.skip, vec![AgentType::Research, AgentType::Seo]);
        assert_eq!(args.max_iterations, Some(2));
        assert!(args.auto_post);
    }

    #[test]
    fn test_unknown_skip_agent_rejected() {
        let result = Cli::try_parse_from(["article-forge", "run", "x", "--skip", "editor"]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_seed_missing_personas_keeps_existing_defaults() {
        let store = open_store("sqlite::memory:").await.unwrap();
        let custom = builtin_persona(AgentType::Writer, "anthropic/claude-3.5-sonnet");
        store.insert_persona(&custom).await.unwrap();

        seed_missing_personas(&store, DEFAULT_MODEL).await.unwrap();

        let personas = store.list_personas().await.unwrap();
        assert_eq!(personas.len(), AgentType::all().len());
        let writer = store.find_default(AgentType::Writer).await.unwrap().unwrap();
        assert_eq!(writer.id, custom.id);
    }

    #[tokio::test]
    async fn test_cancel_rejects_finished_job() {
        let store = open_store("sqlite::memory:").await.unwrap();
        let mut job = Job::new("done", JobSettings::default());
        job.status = crate::storage::JobStatus::Completed;
        store.insert_job(&job).await.unwrap();

        let err = run_cancel_command(store, CancelArgs { job_id: job.id })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already completed"));
    }
}
