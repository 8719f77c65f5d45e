use std::fmt;

use serde::{Deserialize, Serialize};

/// The canonical outcome of a step, phase, case, or campaign.
///
/// Ordering is by severity: `NotRun < Pass < Fail < Blocked < Timeout <
/// Interrupted`. Aggregation of a sequence of verdicts is the maximum
/// severity observed.
///
/// `Blocked` means "environment or precondition failed; do not blame the
/// device". `Fail` means "the device under test violated an expected
/// property".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    #[default]
    NotRun,
    Pass,
    Fail,
    Blocked,
    Timeout,
    Interrupted,
}

impl Verdict {
    /// Whether this verdict counts as a success.
    pub fn is_pass(self) -> bool {
        matches!(self, Self::Pass | Self::NotRun)
    }

    /// Whether a case with this verdict is eligible for a retry.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Fail | Self::Blocked)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRun => write!(f, "NOT_RUN"),
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
            Self::Blocked => write!(f, "BLOCKED"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::Interrupted => write!(f, "INTERRUPTED"),
        }
    }
}

/// Aggregate a sequence of verdicts into the maximum severity observed.
///
/// An empty sequence aggregates to `Pass`: a composite that ran nothing
/// (an empty set, a zero-iteration loop) reports success.
pub fn aggregate(verdicts: impl IntoIterator<Item = Verdict>) -> Verdict {
    verdicts
        .into_iter()
        .fold(Verdict::Pass, std::cmp::Ord::max)
}
