// Hierarchical State Machine Engine
// Generic dispatcher: state registration, leave/enter transition cascades and event bubbling

use std::fmt;
use thiserror::Error;
use tracing::{trace, warn};

// ============================================================================
// STATE IDS, SIGNALS AND OUTCOMES
// ============================================================================

/// Stable identifier of a state node.
///
/// `index` must be small and dense; the engine stores nodes in a table
/// indexed by it.
pub trait StateId: Copy + Eq + fmt::Debug {
    fn index(self) -> usize;
}

/// What a handler is asked to process.
///
/// `Entering` and `Leaving` are injected by the engine only; producers deal
/// in `Event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal<E> {
    Entering,
    Leaving,
    Event(E),
}

/// Handler verdict. `NotHandled` passes the signal on to the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    NotHandled,
}

/// Handler capability attached to every node.
pub type Handler<S, E, C> = fn(&mut Scope<'_, S, C>, Signal<E>) -> Outcome;

/// Errors raised while building a machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MachineError {
    #[error("State {0} registered twice")]
    DuplicateState(String),

    #[error("Parent {parent} of state {state} is not registered")]
    UnknownParent { state: String, parent: String },

    #[error("States cannot be registered after the first transition")]
    AlreadyStarted,
}

// ============================================================================
// HANDLER SCOPE
// ============================================================================

/// View handed to a handler for one invocation.
///
/// Gives access to the caller's context and lets the handler request a
/// transition or drop its own active child. Transitions are applied once the
/// handler has returned.
pub struct Scope<'a, S, C> {
    /// Mutable module state shared by every handler.
    pub ctx: &'a mut C,
    state: Option<S>,
    active_child: &'a mut Option<S>,
    next: &'a mut Option<S>,
}

impl<'a, S: StateId, C> Scope<'a, S, C> {
    /// State whose handler is running; `None` for the root.
    pub fn state(&self) -> Option<S> {
        self.state
    }

    /// Request a transition to `target` after this handler returns.
    pub fn transition(&mut self, target: S) {
        if let Some(previous) = self.next.replace(target) {
            warn!(?previous, ?target, "Transition request replaced");
        }
    }

    /// Leave this state without an active child so it acts as a router.
    pub fn clear_active_child(&mut self) {
        *self.active_child = None;
    }

    pub fn active_child(&self) -> Option<S> {
        *self.active_child
    }
}

// ============================================================================
// STATE NODES
// ============================================================================

struct StateNode<S, E, C> {
    name: &'static str,
    parent: Option<S>,
    initial_child: Option<S>,
    active_child: Option<S>,
    handler: Handler<S, E, C>,
}

// ============================================================================
// STATE MACHINE
// ============================================================================

/// A rooted tree of states plus the currently active path through it.
///
/// The root is implicit: it owns a name, a handler and an active child but has
/// no id. Top-level states are registered with `parent = None`.
pub struct StateMachine<S, E, C> {
    name: &'static str,
    root_handler: Handler<S, E, C>,
    root_child: Option<S>,
    nodes: Vec<Option<StateNode<S, E, C>>>,
    started: bool,
}

impl<S: StateId, E: Copy + fmt::Debug, C> StateMachine<S, E, C> {
    pub fn new(name: &'static str, root_handler: Handler<S, E, C>) -> Self {
        Self {
            name,
            root_handler,
            root_child: None,
            nodes: Vec::new(),
            started: false,
        }
    }

    /// Add a state node. Parents must be registered before their children,
    /// which keeps the parent relation acyclic.
    pub fn register(
        &mut self,
        id: S,
        name: &'static str,
        parent: Option<S>,
        initial_child: Option<S>,
        handler: Handler<S, E, C>,
    ) -> Result<(), MachineError> {
        if self.started {
            return Err(MachineError::AlreadyStarted);
        }
        if self.node(id).is_some() {
            return Err(MachineError::DuplicateState(format!("{:?}", id)));
        }
        if let Some(parent_id) = parent {
            if self.node(parent_id).is_none() {
                return Err(MachineError::UnknownParent {
                    state: format!("{:?}", id),
                    parent: format!("{:?}", parent_id),
                });
            }
        }

        let index = id.index();
        if self.nodes.len() <= index {
            self.nodes.resize_with(index + 1, || None);
        }
        self.nodes[index] = Some(StateNode {
            name,
            parent,
            initial_child,
            active_child: None,
            handler,
        });
        Ok(())
    }

    /// Machine name, reported when no state is active
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state_name(&self, id: S) -> Option<&'static str> {
        self.node(id).map(|node| node.name)
    }

    pub fn parent(&self, id: S) -> Option<S> {
        self.node(id).and_then(|node| node.parent)
    }

    /// Deepest active state, or `None` before the first transition
    pub fn active_state(&self) -> Option<S> {
        self.active_path().last().copied()
    }

    /// Name of the deepest active state (the machine name if none)
    pub fn active_leaf_name(&self) -> &'static str {
        self.active_state()
            .and_then(|id| self.state_name(id))
            .unwrap_or(self.name)
    }

    /// Active states from the top level down to the leaf
    pub fn active_path(&self) -> Vec<S> {
        let mut path = Vec::new();
        let mut cursor = self.root_child;
        while let Some(id) = cursor {
            path.push(id);
            cursor = self.node(id).and_then(|node| node.active_child);
        }
        path
    }

    /// Whether `id` lies on the active path
    pub fn is_active(&self, id: S) -> bool {
        self.active_path().contains(&id)
    }

    /// Move the machine to `target`, running leave and enter cascades.
    ///
    /// Transitions requested by handlers along the way run afterwards, in
    /// order, until the machine settles.
    pub fn transition(&mut self, ctx: &mut C, target: S) {
        self.started = true;
        let mut next = Some(target);
        while let Some(target) = next.take() {
            next = self.apply_transition(ctx, target);
        }
    }

    /// Dispatch one event from the active leaf upward until a handler claims it.
    ///
    /// An event nobody claims is dropped.
    pub fn process_event(&mut self, ctx: &mut C, event: E) {
        let mut pending = None;
        let mut cursor = self.active_state();
        loop {
            let outcome = self.deliver(ctx, cursor, Signal::Event(event), &mut pending);
            if outcome == Outcome::Handled {
                break;
            }
            match cursor {
                Some(id) => cursor = self.parent(id),
                None => {
                    trace!(?event, machine = self.name, "Unhandled event discarded");
                    break;
                }
            }
        }

        if let Some(target) = pending {
            self.transition(ctx, target);
        }
    }

    fn apply_transition(&mut self, ctx: &mut C, target: S) -> Option<S> {
        let target_path = match self.path_to(target) {
            Some(path) => path,
            None => {
                warn!(?target, machine = self.name, "Transition to unregistered state ignored");
                return None;
            }
        };
        let active_path = self.active_path();

        // The target itself is always left and re-entered when already active.
        let shared = active_path
            .iter()
            .zip(target_path.iter())
            .take_while(|(a, b)| a == b)
            .count()
            .min(target_path.len() - 1);

        trace!(
            machine = self.name,
            from = ?active_path.last(),
            to = ?target,
            "Transition"
        );

        // Leaving bubbles from the leaf and stops at the common ancestor.
        let mut ignored = None;
        for &id in active_path[shared..].iter().rev() {
            let outcome = self.deliver(ctx, Some(id), Signal::Leaving, &mut ignored);
            if outcome == Outcome::Handled {
                break;
            }
        }
        if let Some(requested) = ignored {
            warn!(?requested, "Transition requested while leaving ignored");
        }

        let mut pending = None;
        for &id in &target_path[shared..] {
            self.link_child(self.parent(id), Some(id));
            self.enter(ctx, id, &mut pending);
            if pending.is_some() {
                self.link_child(Some(id), None);
                return pending;
            }
        }

        // Descend through initial children below the target.
        let mut cursor = target;
        while let Some(child) = self.node(cursor).and_then(|node| node.active_child) {
            self.enter(ctx, child, &mut pending);
            if pending.is_some() {
                self.link_child(Some(child), None);
                return pending;
            }
            cursor = child;
        }

        None
    }

    fn enter(&mut self, ctx: &mut C, id: S, pending: &mut Option<S>) {
        if let Some(node) = self.node_mut(id) {
            node.active_child = node.initial_child;
        }
        self.deliver(ctx, Some(id), Signal::Entering, pending);
    }

    fn link_child(&mut self, parent: Option<S>, child: Option<S>) {
        match parent {
            Some(parent_id) => {
                if let Some(node) = self.node_mut(parent_id) {
                    node.active_child = child;
                }
            }
            None => self.root_child = child,
        }
    }

    fn deliver(
        &mut self,
        ctx: &mut C,
        state: Option<S>,
        signal: Signal<E>,
        next: &mut Option<S>,
    ) -> Outcome {
        let (handler, active_child, name) = match state {
            Some(id) => match self.nodes.get_mut(id.index()).and_then(Option::as_mut) {
                Some(node) => (node.handler, &mut node.active_child, node.name),
                None => return Outcome::NotHandled,
            },
            None => (self.root_handler, &mut self.root_child, self.name),
        };

        let mut scope = Scope {
            ctx,
            state,
            active_child,
            next,
        };
        let outcome = handler(&mut scope, signal);
        trace!(state = name, ?signal, ?outcome, "Dispatched");
        outcome
    }

    fn path_to(&self, target: S) -> Option<Vec<S>> {
        let mut path = Vec::new();
        let mut cursor = Some(target);
        while let Some(id) = cursor {
            let node = self.node(id)?;
            path.push(id);
            cursor = node.parent;
        }
        path.reverse();
        Some(path)
    }

    fn node(&self, id: S) -> Option<&StateNode<S, E, C>> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: S) -> Option<&mut StateNode<S, E, C>> {
        self.nodes.get_mut(id.index()).and_then(Option::as_mut)
    }
}
