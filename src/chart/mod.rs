//! Hierarchical machine definitions.
//!
//! A [`Chart`] is the static description of a machine: nested state nodes,
//! event transitions, delayed (`after`) transitions, invocations, tags and
//! named delay functions. Charts are immutable once built and are shared
//! between the executor and the continuation protocol, which uses them to
//! resolve resumed state values and to enumerate the delays a resumed
//! configuration arms.
//!
//! Compound nesting is supported; parallel regions are not.

pub mod builder;
mod delay;
pub mod error;
pub mod executor;
mod tag;

pub use builder::{ChartBuilder, NodeBuilder, TransitionBuilder};
pub use delay::{DelayId, DelayIdError};
pub use error::{BuildError, ExecutorError, ResolveError};
pub use executor::{
    fired_channel, ActiveNode, Executor, FiredTimer, MachineSnapshot, RestoredDelay,
    ScheduleRequest, Scheduler, Step,
};
pub use tag::{Tag, CAN_INTERRUPT_TAG, NO_MIGRATE_TAG};

use crate::core::{Event, Guard, StateValue};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Delay function: computes a delay in milliseconds from context and event.
pub type DelayFn<C> = Arc<dyn Fn(&C, &Event) -> u64 + Send + Sync>;

/// Assign action: computes the next context from the current one.
pub type AssignFn<C> = Arc<dyn Fn(&C, &Event) -> C + Send + Sync>;

/// Kind of a state node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeKind {
    /// Leaf state
    Atomic,
    /// State with children and an initial child
    Compound,
    /// Terminal state; a final child of the root completes the machine
    Final,
}

/// A transition definition, shared by event and delayed transitions.
pub struct TransitionDef<C> {
    pub(crate) target: Option<String>,
    pub(crate) guard: Option<Guard<C>>,
    pub(crate) actions: Vec<AssignFn<C>>,
}

impl<C> TransitionDef<C> {
    /// Check the guard, if any (pure).
    pub fn enabled(&self, context: &C, event: &Event) -> bool {
        self.guard.as_ref().is_none_or(|g| g.check(context, event))
    }

    /// Apply the assign actions in order (pure).
    pub fn apply(&self, context: &C, event: &Event) -> C
    where
        C: Clone,
    {
        self.actions
            .iter()
            .fold(context.clone(), |current, action| action(&current, event))
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }
}

/// A delayed transition armed on entry to its owning node.
pub struct AfterDef<C> {
    pub(crate) delay: String,
    pub(crate) transition: TransitionDef<C>,
}

impl<C> AfterDef<C> {
    /// Delay function name (or literal millisecond count).
    pub fn delay(&self) -> &str {
        &self.delay
    }
}

/// A node in the state hierarchy.
pub struct StateNode<C> {
    pub(crate) key: String,
    pub(crate) kind: NodeKind,
    pub(crate) initial: Option<String>,
    pub(crate) children: Vec<StateNode<C>>,
    pub(crate) on: Vec<(String, TransitionDef<C>)>,
    pub(crate) after: Vec<AfterDef<C>>,
    pub(crate) invoke: Option<String>,
    pub(crate) tags: BTreeSet<Tag>,
}

impl<C> StateNode<C> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn child(&self, key: &str) -> Option<&StateNode<C>> {
        self.children.iter().find(|child| child.key == key)
    }

    pub fn tags(&self) -> &BTreeSet<Tag> {
        &self.tags
    }

    /// Id of the side effect invoked while this node is active.
    pub fn invoke(&self) -> Option<&str> {
        self.invoke.as_deref()
    }

    pub fn after(&self) -> &[AfterDef<C>] {
        &self.after
    }
}

/// Immutable hierarchical machine definition.
///
/// Nodes are addressed by root-relative key paths (`["review", "pending"]`)
/// or by state ids (`"<machine>.review.pending"`).
pub struct Chart<C> {
    pub(crate) id: String,
    pub(crate) root: StateNode<C>,
    pub(crate) delays: HashMap<String, DelayFn<C>>,
    pub(crate) initial_context: C,
}

impl<C> Chart<C> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn initial_context(&self) -> &C {
        &self.initial_context
    }

    pub fn root(&self) -> &StateNode<C> {
        &self.root
    }

    /// Look up a node by path. The empty path is the root.
    pub fn node(&self, path: &[String]) -> Option<&StateNode<C>> {
        path.iter()
            .try_fold(&self.root, |node, key| node.child(key))
    }

    /// State id of the node at `path`.
    pub fn state_id(&self, path: &[String]) -> String {
        if path.is_empty() {
            self.id.clone()
        } else {
            format!("{}.{}", self.id, path.join("."))
        }
    }

    /// Path of the node with the given state id, if it exists.
    pub fn path_of(&self, state_id: &str) -> Option<Vec<String>> {
        let path: Vec<String> = if state_id == self.id {
            Vec::new()
        } else {
            state_id
                .strip_prefix(&self.id)?
                .strip_prefix('.')?
                .split('.')
                .map(str::to_string)
                .collect()
        };
        self.node(&path).map(|_| path)
    }

    /// Leaf path of the machine's declared start configuration.
    pub fn initial_leaf(&self) -> Result<Vec<String>, ResolveError> {
        self.descend_initial(Vec::new())
    }

    /// Follow `initial` children from `path` down to a leaf.
    pub fn descend_initial(&self, mut path: Vec<String>) -> Result<Vec<String>, ResolveError> {
        loop {
            let node = self.node(&path).ok_or_else(|| self.unknown(&path))?;
            if node.kind != NodeKind::Compound {
                return Ok(path);
            }
            let initial = node.initial.clone().ok_or_else(|| ResolveError::MissingInitial {
                state: self.state_id(&path),
            })?;
            path.push(initial);
        }
    }

    /// Resolve a state value to the leaf path it denotes.
    ///
    /// Values naming a compound node resolve through its initial children.
    ///
    /// # Errors
    ///
    /// [`ResolveError::UnknownState`] if any key does not exist at its level,
    /// [`ResolveError::ParallelUnsupported`] for multi-region values.
    pub fn resolve(&self, value: &StateValue) -> Result<Vec<String>, ResolveError> {
        let mut path = Vec::new();
        let mut current = value;
        loop {
            match current {
                StateValue::Atomic(key) => {
                    path.push(key.clone());
                    if self.node(&path).is_none() {
                        return Err(self.unknown_value(value));
                    }
                    return self.descend_initial(path);
                }
                StateValue::Compound(children) => {
                    let mut entries = children.iter();
                    let (Some((key, child)), None) = (entries.next(), entries.next()) else {
                        return Err(if children.is_empty() {
                            self.unknown_value(value)
                        } else {
                            ResolveError::ParallelUnsupported {
                                machine: self.id.clone(),
                                state: value.to_string(),
                            }
                        });
                    };
                    path.push(key.clone());
                    if self.node(&path).is_none() {
                        return Err(self.unknown_value(value));
                    }
                    current = child;
                }
            }
        }
    }

    /// Resolve a transition target relative to its source node.
    ///
    /// `#<machine>.<path>` is absolute; anything else names a sibling of
    /// the source (or a child of the root, for root transitions).
    pub fn resolve_target(&self, source: &[String], target: &str) -> Option<Vec<String>> {
        let path = match target.strip_prefix('#') {
            Some(absolute) => self.path_of(absolute)?,
            None => {
                let mut path = source
                    .split_last()
                    .map(|(_, parent)| parent.to_vec())
                    .unwrap_or_default();
                path.extend(target.split('.').map(str::to_string));
                path
            }
        };
        self.node(&path).map(|_| path)
    }

    /// Whether `leaf` is a final child of the root.
    pub fn is_top_level_final(&self, leaf: &[String]) -> bool {
        leaf.len() == 1 && self.node(leaf).is_some_and(|n| n.kind == NodeKind::Final)
    }

    /// Every delay armed when the configuration ending in `leaf` is entered.
    pub fn reachable_delays(&self, leaf: &[String]) -> Vec<DelayId> {
        (0..=leaf.len())
            .filter_map(|depth| {
                let path = leaf.get(..depth)?;
                let node = self.node(path)?;
                let state_id = self.state_id(path);
                Some(
                    node.after
                        .iter()
                        .map(move |after| DelayId::new(after.delay.clone(), state_id.clone()))
                        .collect::<Vec<_>>(),
                )
            })
            .flatten()
            .collect()
    }

    /// Whether a delay name has an implementation (named or literal).
    pub fn has_delay(&self, name: &str) -> bool {
        self.delays.contains_key(name) || name.parse::<u64>().is_ok()
    }

    /// Evaluate a delay by name.
    ///
    /// Named delay functions win; otherwise a numeric name is a literal
    /// millisecond count. Returns `None` when no implementation exists.
    pub fn evaluate_delay(&self, name: &str, context: &C, event: &Event) -> Option<u64> {
        match self.delays.get(name) {
            Some(delay) => Some(delay(context, event)),
            None => name.parse().ok(),
        }
    }

    fn unknown(&self, path: &[String]) -> ResolveError {
        ResolveError::UnknownState {
            machine: self.id.clone(),
            state: path.join("."),
        }
    }

    fn unknown_value(&self, value: &StateValue) -> ResolveError {
        ResolveError::UnknownState {
            machine: self.id.clone(),
            state: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    fn review_chart() -> Chart<u32> {
        ChartBuilder::new("review")
            .context(0)
            .initial("draft")
            .state(NodeBuilder::new("draft").on("submit", TransitionBuilder::to("pending")))
            .state(
                NodeBuilder::new("pending")
                    .initial("queued")
                    .after("escalation", TransitionBuilder::to("#review.done"))
                    .state(
                        NodeBuilder::new("queued")
                            .after("1000", TransitionBuilder::to("assigned")),
                    )
                    .state(NodeBuilder::new("assigned")),
            )
            .state(NodeBuilder::new("done").final_state())
            .delay("escalation", |count: &u32, _| u64::from(*count) * 1_000)
            .build()
            .unwrap()
    }

    #[test]
    fn resolves_atomic_values() {
        let chart = review_chart();
        assert_eq!(chart.resolve(&StateValue::from("draft")).unwrap(), path(&["draft"]));
    }

    #[test]
    fn resolves_compound_values_through_initial() {
        let chart = review_chart();
        assert_eq!(
            chart.resolve(&StateValue::from("pending")).unwrap(),
            path(&["pending", "queued"])
        );
        let nested: StateValue = serde_json::from_value(json!({"pending": "assigned"})).unwrap();
        assert_eq!(chart.resolve(&nested).unwrap(), path(&["pending", "assigned"]));
    }

    #[test]
    fn unknown_values_do_not_resolve() {
        let chart = review_chart();
        let err = chart
            .resolve(&StateValue::from("completely-different-state"))
            .unwrap_err();
        assert!(matches!(err, ResolveError::UnknownState { .. }));

        let nested: StateValue = serde_json::from_value(json!({"draft": "inner"})).unwrap();
        assert!(chart.resolve(&nested).is_err());
    }

    #[test]
    fn parallel_values_are_rejected() {
        let chart = review_chart();
        let value: StateValue =
            serde_json::from_value(json!({"draft": "a", "pending": "queued"})).unwrap();
        assert!(matches!(
            chart.resolve(&value),
            Err(ResolveError::ParallelUnsupported { .. })
        ));
    }

    #[test]
    fn state_ids_round_trip() {
        let chart = review_chart();
        let leaf = path(&["pending", "queued"]);
        assert_eq!(chart.state_id(&leaf), "review.pending.queued");
        assert_eq!(chart.path_of("review.pending.queued"), Some(leaf));
        assert_eq!(chart.path_of("review"), Some(Vec::new()));
        assert_eq!(chart.path_of("other.pending"), None);
        assert_eq!(chart.path_of("reviewer.pending"), None);
    }

    #[test]
    fn targets_resolve_relative_and_absolute() {
        let chart = review_chart();
        let queued = path(&["pending", "queued"]);
        assert_eq!(chart.resolve_target(&queued, "assigned"), Some(path(&["pending", "assigned"])));
        assert_eq!(chart.resolve_target(&queued, "#review.done"), Some(path(&["done"])));
        assert_eq!(chart.resolve_target(&queued, "done"), None);
    }

    #[test]
    fn reachable_delays_cover_every_active_node() {
        let chart = review_chart();
        let delays: Vec<String> = chart
            .reachable_delays(&path(&["pending", "queued"]))
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            delays,
            vec![
                "after(escalation)#review.pending".to_string(),
                "after(1000)#review.pending.queued".to_string(),
            ]
        );
        assert!(chart.reachable_delays(&path(&["draft"])).is_empty());
    }

    #[test]
    fn delays_evaluate_by_name_or_literal() {
        let chart = review_chart();
        let event = Event::init();
        assert_eq!(chart.evaluate_delay("escalation", &3, &event), Some(3_000));
        assert_eq!(chart.evaluate_delay("1000", &3, &event), Some(1_000));
        assert_eq!(chart.evaluate_delay("missing", &3, &event), None);
        assert!(!chart.has_delay("missing"));
    }

    #[test]
    fn only_root_final_children_complete() {
        let chart = review_chart();
        assert!(chart.is_top_level_final(&path(&["done"])));
        assert!(!chart.is_top_level_final(&path(&["draft"])));
    }
}
