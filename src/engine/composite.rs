use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::context::Context;
use crate::engine::executor::{StepFlow, StepOutcome, run_step};
use crate::engine::factory::StepFactory;
use crate::engine::watch::{CancelToken, WatcherRegistry};
use crate::error::EngineError;
use crate::testcase::StepNode;
use crate::xml::AttrMap;

/// Shared collaborators for one phase interpretation.
pub struct CompositeRuntime<'a> {
    pub factory: &'a StepFactory,
    pub sets: &'a BTreeMap<String, Vec<StepNode>>,
    pub cancel: &'a CancelToken,
    pub watchers: &'a Arc<WatcherRegistry>,
}

/// What a node sequence produced: the per-step outcomes of normally
/// completed steps, whether the sequence aborted early, and the error
/// that aborted it (if the abort was error-driven rather than a failed
/// check).
#[derive(Debug, Default)]
pub struct SequenceOutcome {
    pub steps: Vec<StepOutcome>,
    pub aborted: bool,
    pub error: Option<EngineError>,
}

impl SequenceOutcome {
    fn abort_with(err: EngineError) -> Self {
        Self {
            steps: Vec::new(),
            aborted: true,
            error: Some(err),
        }
    }

    /// Append another sequence's results; returns false when the merged
    /// sequence has aborted and interpretation must stop.
    fn absorb(&mut self, mut other: SequenceOutcome) -> bool {
        self.steps.append(&mut other.steps);
        if other.aborted {
            self.aborted = true;
            if self.error.is_none() {
                self.error = other.error;
            }
            return false;
        }
        true
    }
}

/// Interpret a node sequence in declaration order.
///
/// `forwarded` carries the calling site's attributes into set
/// invocations; a node's own attributes override forwarded ones.
pub fn run_nodes(
    nodes: &[StepNode],
    ctx: &Context,
    rt: &CompositeRuntime<'_>,
    forwarded: &AttrMap,
) -> SequenceOutcome {
    let mut out = SequenceOutcome::default();
    for node in nodes {
        if rt.cancel.is_cancelled() {
            out.aborted = true;
            if out.error.is_none() {
                out.error = Some(EngineError::interrupted("execution cancelled"));
            }
            break;
        }
        if !out.absorb(run_node(node, ctx, rt, forwarded)) {
            break;
        }
    }
    out
}

fn run_node(
    node: &StepNode,
    ctx: &Context,
    rt: &CompositeRuntime<'_>,
    forwarded: &AttrMap,
) -> SequenceOutcome {
    match node {
        StepNode::Step { id, attrs } => run_leaf(id, attrs, ctx, rt, forwarded),
        StepNode::SetRef { set_id, attrs } => {
            let Some(children) = rt.sets.get(set_id) else {
                return SequenceOutcome::abort_with(EngineError::invalid_campaign(format!(
                    "unknown step set \"{set_id}\""
                )));
            };
            debug!("set {set_id}: begin");
            run_nodes(children, ctx, rt, &merge_attrs(forwarded, attrs))
        }
        StepNode::Loop { id, count, children } => {
            let mut out = SequenceOutcome::default();
            for iteration in 0..*count {
                debug!("loop {id}: iteration {} of {count}", iteration + 1);
                if !out.absorb(run_nodes(children, ctx, rt, forwarded)) {
                    break;
                }
            }
            out
        }
        StepNode::If {
            id,
            condition,
            children,
        } => {
            if evaluate_condition(condition) {
                run_nodes(children, ctx, rt, forwarded)
            } else {
                let message = format!("Condition '{id}' is '{condition}' => False, skip");
                info!("{message}");
                SequenceOutcome {
                    steps: vec![StepOutcome::pass(id, &message)],
                    aborted: false,
                    error: None,
                }
            }
        }
        StepNode::Fork {
            id,
            serialize,
            delay,
            children,
        } => {
            if *serialize {
                run_nodes(children, ctx, rt, forwarded)
            } else {
                run_fork(id, *delay, children, ctx, rt, forwarded)
            }
        }
    }
}

fn run_leaf(
    id: &str,
    attrs: &AttrMap,
    ctx: &Context,
    rt: &CompositeRuntime<'_>,
    forwarded: &AttrMap,
) -> SequenceOutcome {
    let merged = merge_attrs(forwarded, attrs);
    let prepared = match rt.factory.instantiate(id, &merged, rt.cancel, rt.watchers) {
        Ok(prepared) => prepared,
        Err(err) => return SequenceOutcome::abort_with(err),
    };
    let (outcome, flow) = run_step(&prepared, ctx);
    let aborted = flow == StepFlow::AbortPhase;
    let error = if aborted { outcome.error.clone() } else { None };
    SequenceOutcome {
        steps: vec![outcome],
        aborted,
        error,
    }
}

/// One thread per child; each child posts its sequence outcome to the
/// result queue under its submission index. The fork waits for every
/// submitted child, re-raises the first error in submission order, and
/// keeps only normally completed children in the aggregate.
fn run_fork(
    id: &str,
    delay: Option<Duration>,
    children: &[StepNode],
    ctx: &Context,
    rt: &CompositeRuntime<'_>,
    forwarded: &AttrMap,
) -> SequenceOutcome {
    debug!("fork {id}: launching {} children", children.len());
    let (sender, receiver) = mpsc::channel::<(usize, SequenceOutcome)>();
    let mut submitted = 0usize;

    std::thread::scope(|scope| {
        for (index, child) in children.iter().enumerate() {
            if rt.cancel.is_cancelled() {
                break;
            }
            if index > 0 {
                if let Some(delay) = delay {
                    if !pause(delay, rt) {
                        break;
                    }
                }
            }
            let sender = sender.clone();
            let child_ctx = ctx.clone();
            scope.spawn(move || {
                let outcome = run_nodes(std::slice::from_ref(child), &child_ctx, rt, forwarded);
                // The receiver outlives the scope; a send cannot fail.
                let _ = sender.send((index, outcome));
            });
            submitted += 1;
        }
    });
    drop(sender);

    let mut results: Vec<(usize, SequenceOutcome)> = receiver.iter().collect();
    results.sort_by_key(|(index, _)| *index);

    let mut out = SequenceOutcome::default();
    for (_, child_outcome) in results {
        if child_outcome.aborted && child_outcome.error.is_some() {
            out.aborted = true;
            if out.error.is_none() {
                out.error = child_outcome.error;
            }
        } else {
            out.steps.extend(child_outcome.steps);
            out.aborted |= child_outcome.aborted;
        }
    }
    if submitted < children.len() {
        out.aborted = true;
        if out.error.is_none() {
            out.error = Some(EngineError::interrupted("execution cancelled"));
        }
    }
    out
}

/// Sleep between fork submissions, polling cancellation. Returns false
/// when cancelled.
fn pause(delay: Duration, rt: &CompositeRuntime<'_>) -> bool {
    let deadline = Instant::now() + delay;
    let slice = rt.factory.poll_interval();
    loop {
        if rt.cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(slice));
    }
}

fn merge_attrs(forwarded: &AttrMap, own: &AttrMap) -> AttrMap {
    let mut merged = forwarded.clone();
    for (key, value) in own {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// A condition is false when empty, the literal `false` (any case), or
/// a number whose digits are all zero once dots are stripped.
pub fn evaluate_condition(condition: &str) -> bool {
    let trimmed = condition.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("false") {
        return false;
    }
    let digits: String = trimmed.chars().filter(|c| *c != '.').collect();
    if !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
        && digits.chars().all(|c| c == '0')
    {
        return false;
    }
    true
}
