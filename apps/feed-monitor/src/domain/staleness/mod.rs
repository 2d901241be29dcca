//! Staleness Policies
//!
//! Classifies a channel from the scores of its most recent series entries.
//!
//! - Continuous channels are judged by cadence: the mean interval between
//!   the last `N` arrivals and the evaluation instant.
//! - Discrete channels are judged by recency: the age of the last arrival.
//!
//! Both comparisons are strict; a value equal to its threshold is healthy.
//!
//! The continuous rule appends the evaluation instant as if it were an
//! arrival. A quiet tail therefore inflates the mean even when the recorded
//! arrivals were perfectly regular.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::record::{ChannelKey, ChannelKind};

// =============================================================================
// Status
// =============================================================================

/// Outcome of one channel evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelStatus {
    /// Updates arrive within the expected cadence.
    Healthy,
    /// Updates have stalled or thinned beyond the threshold.
    Stale,
    /// Too few entries to judge.
    InsufficientData,
}

impl ChannelStatus {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Stale => "stale",
            Self::InsufficientData => "insufficient-data",
        }
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numbers behind an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum EvaluationDetail {
    /// Continuous rule result.
    MeanInterval {
        /// Mean of consecutive differences, seconds.
        mean_secs: f64,
        /// Configured threshold, seconds.
        threshold_secs: f64,
        /// Stored samples used (excluding the evaluation instant).
        samples: usize,
        /// Score of the newest stored sample.
        last_timestamp: f64,
    },
    /// Discrete rule result.
    Age {
        /// Seconds between the last arrival and the evaluation instant.
        age_secs: f64,
        /// Configured threshold, seconds.
        threshold_secs: f64,
        /// Score of the last arrival.
        last_timestamp: f64,
    },
    /// Not enough entries in the series.
    Insufficient {
        /// Entries available.
        available: usize,
        /// Entries required.
        required: usize,
    },
}

impl fmt::Display for EvaluationDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MeanInterval {
                mean_secs,
                threshold_secs,
                samples,
                ..
            } => write!(
                f,
                "mean interval {mean_secs:.6}s over {samples} samples (threshold {threshold_secs}s)"
            ),
            Self::Age {
                age_secs,
                threshold_secs,
                ..
            } => write!(f, "last update {age_secs:.3}s ago (threshold {threshold_secs}s)"),
            Self::Insufficient {
                available,
                required,
            } => write!(f, "{available} of {required} required samples"),
        }
    }
}

/// Status plus supporting numbers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    /// Classification.
    pub status: ChannelStatus,
    /// Supporting numbers.
    pub detail: EvaluationDetail,
}

impl Evaluation {
    const fn insufficient(available: usize, required: usize) -> Self {
        Self {
            status: ChannelStatus::InsufficientData,
            detail: EvaluationDetail::Insufficient {
                available,
                required,
            },
        }
    }
}

// =============================================================================
// Policies
// =============================================================================

/// Rule that classifies one channel kind.
pub trait StalenessPolicy: Send + Sync + fmt::Debug {
    /// Channel kind this policy judges.
    fn kind(&self) -> ChannelKind;

    /// Number of most-recent entries to read per evaluation.
    fn window(&self) -> usize;

    /// Classify from ascending `scores` at instant `now` (epoch seconds).
    fn evaluate(&self, scores: &[f64], now: f64) -> Evaluation;
}

/// Mean inter-arrival rule for continuous channels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContinuousPolicy {
    window: usize,
    threshold_secs: f64,
}

impl ContinuousPolicy {
    /// Create a policy over the last `window` samples.
    #[must_use]
    pub const fn new(window: usize, threshold_secs: f64) -> Self {
        Self {
            window,
            threshold_secs,
        }
    }
}

impl StalenessPolicy for ContinuousPolicy {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Continuous
    }

    fn window(&self) -> usize {
        self.window
    }

    fn evaluate(&self, scores: &[f64], now: f64) -> Evaluation {
        if self.window == 0 || scores.len() < self.window {
            return Evaluation::insufficient(scores.len(), self.window);
        }

        let recent = &scores[scores.len() - self.window..];
        let Some(mean_secs) = mean_interval(recent, now) else {
            return Evaluation::insufficient(scores.len(), self.window);
        };

        let status = if mean_secs > self.threshold_secs {
            ChannelStatus::Stale
        } else {
            ChannelStatus::Healthy
        };

        Evaluation {
            status,
            detail: EvaluationDetail::MeanInterval {
                mean_secs,
                threshold_secs: self.threshold_secs,
                samples: recent.len(),
                last_timestamp: recent[recent.len() - 1],
            },
        }
    }
}

/// Last-arrival age rule for discrete channels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscretePolicy {
    threshold_secs: f64,
}

impl DiscretePolicy {
    /// Create a policy with the given age threshold.
    #[must_use]
    pub const fn new(threshold_secs: f64) -> Self {
        Self { threshold_secs }
    }
}

impl StalenessPolicy for DiscretePolicy {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Discrete
    }

    fn window(&self) -> usize {
        1
    }

    fn evaluate(&self, scores: &[f64], now: f64) -> Evaluation {
        let Some(&last_timestamp) = scores.last() else {
            return Evaluation::insufficient(0, 1);
        };

        let age_secs = now - last_timestamp;
        let status = if age_secs > self.threshold_secs {
            ChannelStatus::Stale
        } else {
            ChannelStatus::Healthy
        };

        Evaluation {
            status,
            detail: EvaluationDetail::Age {
                age_secs,
                threshold_secs: self.threshold_secs,
                last_timestamp,
            },
        }
    }
}

/// Mean of consecutive differences over `scores` followed by `now`.
///
/// Returns `None` for an empty slice. Out-of-order scores yield negative
/// differences and are averaged as-is.
#[must_use]
pub fn mean_interval(scores: &[f64], now: f64) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }

    let total: f64 = scores
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .sum::<f64>()
        + (now - scores[scores.len() - 1]);

    #[allow(clippy::cast_precision_loss)]
    Some(total / scores.len() as f64)
}

// =============================================================================
// Health Events
// =============================================================================

/// Channel under watch and the rule that judges it.
#[derive(Debug, Clone)]
pub struct MonitoredChannel {
    /// Series key.
    pub key: ChannelKey,
    /// Classification rule.
    pub policy: Arc<dyn StalenessPolicy>,
}

impl MonitoredChannel {
    /// Pair a key with a policy.
    #[must_use]
    pub fn new(key: ChannelKey, policy: Arc<dyn StalenessPolicy>) -> Self {
        Self { key, policy }
    }
}

/// Structured report of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthEvent {
    /// Series key.
    pub channel_key: ChannelKey,
    /// Channel kind.
    pub kind: ChannelKind,
    /// Classification.
    pub status: ChannelStatus,
    /// Supporting numbers.
    pub detail: EvaluationDetail,
    /// Wall-clock instant of the evaluation.
    pub evaluated_at: DateTime<Utc>,
}
