//! Fluent builders for charts, state nodes and transitions.

use super::error::BuildError;
use super::{AfterDef, AssignFn, Chart, DelayFn, NodeKind, StateNode, Tag, TransitionDef};
use crate::core::{Event, Guard};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Builder for transitions with a fluent API.
///
/// # Example
///
/// ```rust
/// use diachronic::chart::TransitionBuilder;
///
/// let greet = TransitionBuilder::<u32>::to("heyed")
///     .when(|count, _event| *count < 3)
///     .assign(|count, _event| count + 1);
/// ```
pub struct TransitionBuilder<C> {
    target: Option<String>,
    guard: Option<Guard<C>>,
    actions: Vec<AssignFn<C>>,
}

impl<C> TransitionBuilder<C> {
    /// Transition to a sibling key or an absolute `#machine.path` target.
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            guard: None,
            actions: Vec::new(),
        }
    }

    /// Targetless transition: runs actions without leaving the state.
    pub fn internal() -> Self {
        Self {
            target: None,
            guard: None,
            actions: Vec::new(),
        }
    }

    /// Add a guard predicate (optional).
    pub fn guard(mut self, guard: Guard<C>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Add a guard using a closure (optional).
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&C, &Event) -> bool + Send + Sync + 'static,
    {
        self.guard = Some(Guard::new(predicate));
        self
    }

    /// Append an assign action computing the next context.
    pub fn assign<F>(mut self, action: F) -> Self
    where
        F: Fn(&C, &Event) -> C + Send + Sync + 'static,
    {
        self.actions.push(Arc::new(action));
        self
    }

    fn build(self) -> TransitionDef<C> {
        TransitionDef {
            target: self.target,
            guard: self.guard,
            actions: self.actions,
        }
    }
}

/// Builder for a state node and its subtree.
pub struct NodeBuilder<C> {
    key: String,
    is_final: bool,
    initial: Option<String>,
    children: Vec<NodeBuilder<C>>,
    on: Vec<(String, TransitionBuilder<C>)>,
    after: Vec<(String, TransitionBuilder<C>)>,
    invoke: Option<String>,
    tags: BTreeSet<Tag>,
}

impl<C> NodeBuilder<C> {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            is_final: false,
            initial: None,
            children: Vec::new(),
            on: Vec::new(),
            after: Vec::new(),
            invoke: None,
            tags: BTreeSet::new(),
        }
    }

    /// Set the initial child (required for compound nodes).
    pub fn initial(mut self, key: impl Into<String>) -> Self {
        self.initial = Some(key.into());
        self
    }

    /// Add a child node, making this node compound.
    pub fn state(mut self, child: NodeBuilder<C>) -> Self {
        self.children.push(child);
        self
    }

    /// Add an event transition. Earlier transitions for the same event win.
    pub fn on(mut self, event: impl Into<String>, transition: TransitionBuilder<C>) -> Self {
        self.on.push((event.into(), transition));
        self
    }

    /// Add a delayed transition by delay function name or literal milliseconds.
    pub fn after(mut self, delay: impl Into<String>, transition: TransitionBuilder<C>) -> Self {
        self.after.push((delay.into(), transition));
        self
    }

    /// Add a delayed transition with a literal millisecond delay.
    pub fn after_ms(self, delay_ms: u64, transition: TransitionBuilder<C>) -> Self {
        self.after(delay_ms.to_string(), transition)
    }

    /// Mark an outstanding side effect while this node is active.
    pub fn invoke(mut self, id: impl Into<String>) -> Self {
        self.invoke = Some(id.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<Tag>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Mark this node as final.
    pub fn final_state(mut self) -> Self {
        self.is_final = true;
        self
    }

    fn build(self, parent: &str) -> Result<StateNode<C>, BuildError> {
        validate_key(&self.key)?;
        let state_id = format!("{parent}.{}", self.key);
        let children = build_children(self.children, &state_id)?;

        let kind = if self.is_final {
            if !children.is_empty() {
                return Err(BuildError::FinalWithChildren { state: state_id });
            }
            NodeKind::Final
        } else if children.is_empty() {
            NodeKind::Atomic
        } else {
            NodeKind::Compound
        };

        if kind == NodeKind::Compound {
            check_initial(&state_id, self.initial.as_deref(), &children)?;
        }

        Ok(StateNode {
            key: self.key,
            kind,
            initial: self.initial,
            children,
            on: build_transitions(self.on),
            after: self
                .after
                .into_iter()
                .map(|(delay, transition)| AfterDef {
                    delay,
                    transition: transition.build(),
                })
                .collect(),
            invoke: self.invoke,
            tags: self.tags,
        })
    }
}

/// Builder for constructing charts with a fluent API.
///
/// # Example
///
/// ```rust
/// use diachronic::chart::{ChartBuilder, NodeBuilder, TransitionBuilder};
///
/// let chart = ChartBuilder::new("greeter")
///     .context(0u32)
///     .initial("initial")
///     .state(NodeBuilder::new("initial").on("hey", TransitionBuilder::to("heyed")))
///     .state(NodeBuilder::new("heyed").after_ms(100_000, TransitionBuilder::to("initial")))
///     .build()
///     .unwrap();
///
/// assert_eq!(chart.id(), "greeter");
/// ```
pub struct ChartBuilder<C> {
    id: String,
    context: Option<C>,
    initial: Option<String>,
    states: Vec<NodeBuilder<C>>,
    on: Vec<(String, TransitionBuilder<C>)>,
    delays: HashMap<String, DelayFn<C>>,
}

impl<C> ChartBuilder<C> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            context: None,
            initial: None,
            states: Vec::new(),
            on: Vec::new(),
            delays: HashMap::new(),
        }
    }

    /// Set the initial context (required).
    pub fn context(mut self, context: C) -> Self {
        self.context = Some(context);
        self
    }

    /// Set the root's initial state (required).
    pub fn initial(mut self, key: impl Into<String>) -> Self {
        self.initial = Some(key.into());
        self
    }

    /// Add a top-level state.
    pub fn state(mut self, node: NodeBuilder<C>) -> Self {
        self.states.push(node);
        self
    }

    /// Add a root-level event transition, handled from any state.
    pub fn on(mut self, event: impl Into<String>, transition: TransitionBuilder<C>) -> Self {
        self.on.push((event.into(), transition));
        self
    }

    /// Register a named delay function.
    pub fn delay<F>(mut self, name: impl Into<String>, delay: F) -> Self
    where
        F: Fn(&C, &Event) -> u64 + Send + Sync + 'static,
    {
        self.delays.insert(name.into(), Arc::new(delay));
        self
    }

    /// Build the chart.
    ///
    /// Delay names are not checked here: a delay without an implementation
    /// is dropped (and logged) when armed, not rejected.
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError`] for missing required fields, malformed
    /// nodes, or transitions whose targets do not exist.
    pub fn build(self) -> Result<Chart<C>, BuildError> {
        if self.id.is_empty() || self.id.contains(['.', '#']) {
            return Err(BuildError::InvalidChartId);
        }
        let context = self.context.ok_or(BuildError::MissingContext)?;
        if self.states.is_empty() {
            return Err(BuildError::NoStates);
        }

        let children = build_children(self.states, &self.id)?;
        check_initial(&self.id, self.initial.as_deref(), &children)?;

        let chart = Chart {
            id: self.id,
            root: StateNode {
                key: String::new(),
                kind: NodeKind::Compound,
                initial: self.initial,
                children,
                on: build_transitions(self.on),
                after: Vec::new(),
                invoke: None,
                tags: BTreeSet::new(),
            },
            delays: self.delays,
            initial_context: context,
        };
        check_targets(&chart, &chart.root, &mut Vec::new())?;
        Ok(chart)
    }
}

fn validate_key(key: &str) -> Result<(), BuildError> {
    if key.is_empty() || key.contains(['.', '#', '(', ')']) {
        return Err(BuildError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

fn build_children<C>(
    builders: Vec<NodeBuilder<C>>,
    parent: &str,
) -> Result<Vec<StateNode<C>>, BuildError> {
    let mut seen = HashSet::new();
    builders
        .into_iter()
        .map(|builder| {
            if !seen.insert(builder.key.clone()) {
                return Err(BuildError::DuplicateState {
                    parent: parent.to_string(),
                    key: builder.key,
                });
            }
            builder.build(parent)
        })
        .collect()
}

fn build_transitions<C>(
    transitions: Vec<(String, TransitionBuilder<C>)>,
) -> Vec<(String, TransitionDef<C>)> {
    transitions
        .into_iter()
        .map(|(event, transition)| (event, transition.build()))
        .collect()
}

fn check_initial<C>(
    state_id: &str,
    initial: Option<&str>,
    children: &[StateNode<C>],
) -> Result<(), BuildError> {
    let initial = initial.ok_or_else(|| BuildError::MissingInitialState {
        state: state_id.to_string(),
    })?;
    if children.iter().any(|child| child.key == initial) {
        Ok(())
    } else {
        Err(BuildError::UnknownInitialState {
            state: state_id.to_string(),
            initial: initial.to_string(),
        })
    }
}

fn check_targets<C>(
    chart: &Chart<C>,
    node: &StateNode<C>,
    path: &mut Vec<String>,
) -> Result<(), BuildError> {
    let transitions = node
        .on
        .iter()
        .map(|(_, transition)| transition)
        .chain(node.after.iter().map(|after| &after.transition));
    for transition in transitions {
        let Some(target) = transition.target() else {
            continue;
        };
        if chart.resolve_target(path, target).is_none() {
            return Err(BuildError::UnknownTarget {
                source_state: chart.state_id(path),
                target: target.to_string(),
            });
        }
    }
    for child in &node.children {
        path.push(child.key.clone());
        check_targets(chart, child, path)?;
        path.pop();
    }
    Ok(())
}
