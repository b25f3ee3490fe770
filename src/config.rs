use std::path::PathBuf;

use crate::error::{PostprocessError, Result};

/// Bound on lines in flight between the reader, the workers and the writer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// What confidence to report when no ancestor reaches the threshold.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ConfidencePolicy {
    /// Keep the fraction last computed during the walk (the root's, if it was hit).
    #[default]
    CarryLast,
    /// Report 0.
    StrictZero,
}

/// Order in which filtered lines are written.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum OutputOrder {
    /// Whatever order workers finish in.
    #[default]
    Arrival,
    /// Resequenced to match the input.
    Input,
}

/// Settings for confidence re-anchoring.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub taxonomy_dir: PathBuf,
    pub threshold: f64,
    pub workers: usize,
    pub confidence_policy: ConfidencePolicy,
    pub output_order: OutputOrder,
    pub channel_capacity: usize,
}

impl FilterConfig {
    pub fn new<P: Into<PathBuf>>(taxonomy_dir: P, threshold: f64) -> Self {
        Self {
            taxonomy_dir: taxonomy_dir.into(),
            threshold,
            workers: default_workers(),
            confidence_policy: ConfidencePolicy::default(),
            output_order: OutputOrder::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_confidence_policy(mut self, policy: ConfidencePolicy) -> Self {
        self.confidence_policy = policy;
        self
    }

    pub fn with_output_order(mut self, order: OutputOrder) -> Self {
        self.output_order = order;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(PostprocessError::InvalidConfig(format!(
                "threshold {} is outside [0, 1]",
                self.threshold
            )));
        }
        if self.workers == 0 {
            return Err(PostprocessError::InvalidConfig(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(PostprocessError::InvalidConfig(
                "channel capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for the clade report.
#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub taxonomy_dir: PathBuf,
    /// Print nodes whose clade count is zero.
    pub show_zeros: bool,
    /// Refuse to report on a taxonomy with dangling parents or loops.
    pub strict_taxonomy: bool,
}

impl ReportConfig {
    pub fn new<P: Into<PathBuf>>(taxonomy_dir: P) -> Self {
        Self {
            taxonomy_dir: taxonomy_dir.into(),
            show_zeros: false,
            strict_taxonomy: false,
        }
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
