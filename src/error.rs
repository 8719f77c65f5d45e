use std::fmt;

use crate::verdict::Verdict;

/// The crate-wide error type: a classification kind, a human-readable
/// message, and optional free-form detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
    pub detail: Option<String>,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// The bench, a catalog, or a campaign file is malformed or missing.
    pub fn environment(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Environment, message)
    }

    /// The device under test misbehaved.
    pub fn device(fault: DeviceFault, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Device(fault), message)
    }

    /// Lab equipment is unreachable or returned an error.
    pub fn equipment(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Equipment, message)
    }

    /// An awaited condition was not satisfied within its deadline.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// User cancellation or an external signal.
    pub fn interrupted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Interrupted, message)
    }

    /// A programming error (unknown id, bad state) inside the engine.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn missing_parameter(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingParameter, message)
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParameter, message)
    }

    pub fn invalid_context(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidContext, message)
    }

    pub fn invalid_catalog(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidCatalog, message)
    }

    pub fn invalid_campaign(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidCampaign, message)
    }

    pub fn campaign_cycle(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CampaignCycle, message)
    }

    /// The verdict this error signals when raised from a step.
    pub fn verdict(&self) -> Verdict {
        self.kind.verdict()
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

impl std::error::Error for EngineError {}

/// Classification of engine errors. The mapping to verdicts is total and
/// stable: device faults blame the device (`Fail`), timeouts and
/// interruptions keep their own verdicts, and everything else blames the
/// environment (`Blocked`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bench, catalog, or campaign malformed or missing.
    Environment,
    /// The device misbehaved or disconnected.
    Device(DeviceFault),
    /// Lab equipment unreachable or erroring.
    Equipment,
    /// A deadline expired.
    Timeout,
    /// User cancellation or external signal.
    Interrupted,
    /// A required parameter has no bound value.
    MissingParameter,
    /// An attribute is unknown, ill-typed, or outside its allowed values.
    InvalidParameter,
    /// A context path collided with a non-map ancestor.
    InvalidContext,
    /// A catalog descriptor violated its schema or duplicated an id.
    InvalidCatalog,
    /// A campaign or test-case file violated its schema.
    InvalidCampaign,
    /// A sub-campaign chain reached its own name.
    CampaignCycle,
    /// Any other programming error inside the engine.
    Internal,
}

impl ErrorKind {
    pub fn verdict(self) -> Verdict {
        match self {
            Self::Device(_) => Verdict::Fail,
            Self::Timeout => Verdict::Timeout,
            Self::Interrupted => Verdict::Interrupted,
            Self::Environment
            | Self::Equipment
            | Self::MissingParameter
            | Self::InvalidParameter
            | Self::InvalidContext
            | Self::InvalidCatalog
            | Self::InvalidCampaign
            | Self::CampaignCycle
            | Self::Internal => Verdict::Blocked,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Environment => write!(f, "environment error"),
            Self::Device(fault) => write!(f, "device error ({fault})"),
            Self::Equipment => write!(f, "equipment error"),
            Self::Timeout => write!(f, "timeout"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::MissingParameter => write!(f, "missing parameter"),
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::InvalidContext => write!(f, "invalid context"),
            Self::InvalidCatalog => write!(f, "invalid catalog"),
            Self::InvalidCampaign => write!(f, "invalid campaign"),
            Self::CampaignCycle => write!(f, "campaign cycle"),
            Self::Internal => write!(f, "internal error"),
        }
    }
}

/// Sub-kinds of device misbehavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFault {
    ConnectionLost,
    BootError,
    AdbError,
    InvalidState,
}

impl fmt::Display for DeviceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::BootError => write!(f, "boot error"),
            Self::AdbError => write!(f, "adb error"),
            Self::InvalidState => write!(f, "invalid state"),
        }
    }
}
