pub mod parser;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::xml::AttrMap;

/// The five lifecycle phases of a test case, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Initialize,
    Setup,
    RunTest,
    TearDown,
    Finalize,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Initialize,
        Phase::Setup,
        Phase::RunTest,
        Phase::TearDown,
        Phase::Finalize,
    ];

    /// The XML root element name of this phase in a test-case file.
    pub fn element_name(self) -> &'static str {
        match self {
            Self::Initialize => "Initialize",
            Self::Setup => "Setup",
            Self::RunTest => "RunTest",
            Self::TearDown => "TearDown",
            Self::Finalize => "Finalize",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.element_name())
    }
}

/// One node of a parsed step tree. The engine interprets these trees
/// directly; composites never become step objects of their own.
#[derive(Debug, Clone, PartialEq)]
pub enum StepNode {
    /// `<TestStep Id="catalog-id" .../>` leaf.
    Step { id: String, attrs: AttrMap },
    /// `<TestStep SetId="set-name" .../>` invocation of a named set.
    SetRef { set_id: String, attrs: AttrMap },
    /// `<Loop Id="..." Nb="N">...</Loop>` bounded repetition.
    Loop {
        id: String,
        count: u32,
        children: Vec<StepNode>,
    },
    /// `<If Id="..." Condition="...">...</If>` guarded execution.
    If {
        id: String,
        condition: String,
        children: Vec<StepNode>,
    },
    /// `<Fork Id="..." Serialize="..." Delay="...">...</Fork>` parallel
    /// execution, degenerating to sequential when `serialize` is set.
    Fork {
        id: String,
        serialize: bool,
        delay: Option<Duration>,
        children: Vec<StepNode>,
    },
}

impl StepNode {
    /// The authoring-time id of this node, for messages and records.
    pub fn label(&self) -> &str {
        match self {
            Self::Step { id, .. }
            | Self::Loop { id, .. }
            | Self::If { id, .. }
            | Self::Fork { id, .. } => id,
            Self::SetRef { set_id, .. } => set_id,
        }
    }
}

/// A parsed test-case file: named step sets plus one tree per phase.
/// A phase absent from the file is an empty tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestCaseFile {
    pub use_case: Option<String>,
    pub sets: BTreeMap<String, Vec<StepNode>>,
    pub initialize: Vec<StepNode>,
    pub setup: Vec<StepNode>,
    pub run_test: Vec<StepNode>,
    pub tear_down: Vec<StepNode>,
    pub finalize: Vec<StepNode>,
}

impl TestCaseFile {
    pub fn phase(&self, phase: Phase) -> &[StepNode] {
        match phase {
            Phase::Initialize => &self.initialize,
            Phase::Setup => &self.setup,
            Phase::RunTest => &self.run_test,
            Phase::TearDown => &self.tear_down,
            Phase::Finalize => &self.finalize,
        }
    }

    pub fn phase_mut(&mut self, phase: Phase) -> &mut Vec<StepNode> {
        match phase {
            Phase::Initialize => &mut self.initialize,
            Phase::Setup => &mut self.setup,
            Phase::RunTest => &mut self.run_test,
            Phase::TearDown => &mut self.tear_down,
            Phase::Finalize => &mut self.finalize,
        }
    }
}
