//! Prometheus metrics for pipeline runs.
//!
//! Metrics live in a [`PipelineMetrics`] instance with its own registry
//! rather than in process globals, so several orchestrators (or tests) can
//! record side by side.
//!
//! # Example
//!
//! ```ignore
//! use article_forge::metrics::PipelineMetrics;
//!
//! let metrics = PipelineMetrics::new()?;
//! metrics.record_job("completed");
//! println!("{}", metrics.export());
//! ```

pub mod prometheus;

pub use prometheus::PipelineMetrics;
