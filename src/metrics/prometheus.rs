//! Prometheus metric registration and export.

use std::time::Duration;

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

use crate::agents::AgentType;

/// Counters and histograms recorded by the orchestrator.
#[derive(Clone)]
pub struct PipelineMetrics {
    registry: Registry,
    /// Finished jobs, labeled by final status.
    jobs_total: CounterVec,
    /// Agent attempts, labeled by agent and outcome (success/failure).
    stage_attempts_total: CounterVec,
    /// Tokens charged to the job, labeled by agent.
    tokens_total: CounterVec,
    /// Wall time of one agent attempt, labeled by agent.
    stage_duration: HistogramVec,
}

impl std::fmt::Debug for PipelineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineMetrics").finish_non_exhaustive()
    }
}

impl PipelineMetrics {
    /// Creates the metrics and registers them with a fresh registry.
    ///
    /// # Errors
    ///
    /// Returns a `prometheus::Error` if a metric definition is invalid.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let jobs_total = CounterVec::new(
            Opts::new("article_forge_jobs_total", "Finished pipeline jobs"),
            &["status"],
        )?;

        let stage_attempts_total = CounterVec::new(
            Opts::new(
                "article_forge_stage_attempts_total",
                "Agent attempts by outcome",
            ),
            &["agent", "outcome"],
        )?;

        let tokens_total = CounterVec::new(
            Opts::new(
                "article_forge_tokens_total",
                "Tokens charged to jobs by successful stages",
            ),
            &["agent"],
        )?;

        let stage_duration = HistogramVec::new(
            HistogramOpts::new(
                "article_forge_stage_duration_seconds",
                "Agent attempt duration in seconds",
            )
            .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
            &["agent"],
        )?;

        registry.register(Box::new(jobs_total.clone()))?;
        registry.register(Box::new(stage_attempts_total.clone()))?;
        registry.register(Box::new(tokens_total.clone()))?;
        registry.register(Box::new(stage_duration.clone()))?;

        Ok(Self {
            registry,
            jobs_total,
            stage_attempts_total,
            tokens_total,
            stage_duration,
        })
    }

    pub fn record_job(&self, status: &str) {
        self.jobs_total.with_label_values(&[status]).inc();
    }

    /// Records one agent attempt and, when it succeeded, its tokens.
    pub fn record_stage(&self, agent: AgentType, success: bool, tokens: u64, elapsed: Duration) {
        let outcome = if success { "success" } else { "failure" };
        self.stage_attempts_total
            .with_label_values(&[agent.as_str(), outcome])
            .inc();
        self.stage_duration
            .with_label_values(&[agent.as_str()])
            .observe(elapsed.as_secs_f64());
        if success && tokens > 0 {
            self.tokens_total
                .with_label_values(&[agent.as_str()])
                .inc_by(tokens as f64);
        }
    }

    /// Renders every metric in the Prometheus text exposition format.
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            return format!("# Error encoding metrics: {}\n", e);
        }

        String::from_utf8(buffer)
            .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
