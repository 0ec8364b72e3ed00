// State Machine Engine Tests
// Transition cascades, event bubbling, routers and registration rules

use pretty_assertions::assert_eq;
use sensor_link::machine::{MachineError, Outcome, Scope, Signal, StateId, StateMachine};

// ============================================================================
// TEST MACHINE
// ============================================================================
//
// root
// ├── A (initial A1)
// │   ├── A1
// │   └── A2
// ├── B
// │   └── B1
// └── Router (initial R1, cleared on entry)
//     └── R1

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Toy {
    A,
    A1,
    A2,
    B,
    B1,
    Router,
    R1,
}

impl StateId for Toy {
    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ev {
    Ping,
    Go(Toy),
}

#[derive(Default)]
struct Trace {
    log: Vec<String>,
    claims: Vec<Toy>,
    keep_leave_at: Option<Toy>,
    redirect: Option<(Toy, Toy)>,
}

fn label(state: Option<Toy>) -> String {
    state.map(|s| format!("{:?}", s)).unwrap_or_else(|| "root".to_string())
}

fn traced(scope: &mut Scope<'_, Toy, Trace>, signal: Signal<Ev>) -> Outcome {
    let state = scope.state();
    let name = label(state);
    match signal {
        Signal::Entering => {
            scope.ctx.log.push(format!("enter {}", name));
            if let Some((from, to)) = scope.ctx.redirect {
                if state == Some(from) {
                    scope.ctx.redirect = None;
                    scope.transition(to);
                }
            }
            Outcome::Handled
        }
        Signal::Leaving => {
            scope.ctx.log.push(format!("leave {}", name));
            if state.is_some() && scope.ctx.keep_leave_at == state {
                Outcome::Handled
            } else {
                Outcome::NotHandled
            }
        }
        Signal::Event(event) => {
            scope.ctx.log.push(format!("{:?} {}", event, name));
            let claimed = state.map_or(false, |s| scope.ctx.claims.contains(&s));
            if !claimed {
                return Outcome::NotHandled;
            }
            if let Ev::Go(target) = event {
                scope.transition(target);
            }
            Outcome::Handled
        }
    }
}

fn router(scope: &mut Scope<'_, Toy, Trace>, signal: Signal<Ev>) -> Outcome {
    let outcome = traced(scope, signal);
    if signal == Signal::Entering {
        scope.clear_active_child();
    }
    outcome
}

fn root(scope: &mut Scope<'_, Toy, Trace>, signal: Signal<Ev>) -> Outcome {
    if let Signal::Event(event) = signal {
        scope.ctx.log.push(format!("{:?} root", event));
    }
    Outcome::NotHandled
}

fn build() -> StateMachine<Toy, Ev, Trace> {
    let mut machine = StateMachine::new("TOY", root);
    machine.register(Toy::A, "A", None, Some(Toy::A1), traced).unwrap();
    machine.register(Toy::A1, "A1", Some(Toy::A), None, traced).unwrap();
    machine.register(Toy::A2, "A2", Some(Toy::A), None, traced).unwrap();
    machine.register(Toy::B, "B", None, None, traced).unwrap();
    machine.register(Toy::B1, "B1", Some(Toy::B), None, traced).unwrap();
    machine.register(Toy::Router, "ROUTER", None, Some(Toy::R1), router).unwrap();
    machine.register(Toy::R1, "R1", Some(Toy::Router), None, traced).unwrap();
    machine
}

/// Machine started in A1 with an empty log
fn started() -> (StateMachine<Toy, Ev, Trace>, Trace) {
    let mut machine = build();
    let mut trace = Trace::default();
    machine.transition(&mut trace, Toy::A);
    trace.log.clear();
    (machine, trace)
}

// ============================================================================
// TRANSITIONS
// ============================================================================

#[test]
fn test_initial_transition_descends_into_initial_child() {
    let mut machine = build();
    let mut trace = Trace::default();

    assert_eq!(machine.active_state(), None);
    assert_eq!(machine.active_leaf_name(), "TOY");

    machine.transition(&mut trace, Toy::A);

    assert_eq!(trace.log, vec!["enter A", "enter A1"]);
    assert_eq!(machine.active_path(), vec![Toy::A, Toy::A1]);
    assert_eq!(machine.active_leaf_name(), "A1");
}

#[test]
fn test_sibling_transition_keeps_shared_parent() {
    let (mut machine, mut trace) = started();

    machine.transition(&mut trace, Toy::A2);

    assert_eq!(trace.log, vec!["leave A1", "enter A2"]);
    assert_eq!(machine.active_path(), vec![Toy::A, Toy::A2]);
}

#[test]
fn test_cross_branch_transition_order() {
    let (mut machine, mut trace) = started();

    machine.transition(&mut trace, Toy::B1);

    assert_eq!(trace.log, vec!["leave A1", "leave A", "enter B", "enter B1"]);
    assert_eq!(machine.active_state(), Some(Toy::B1));
    assert!(!machine.is_active(Toy::A));
}

#[test]
fn test_self_transition_touches_only_the_leaf() {
    let (mut machine, mut trace) = started();

    machine.transition(&mut trace, Toy::A1);

    assert_eq!(trace.log, vec!["leave A1", "enter A1"]);
    assert_eq!(machine.active_path(), vec![Toy::A, Toy::A1]);
}

#[test]
fn test_transition_to_active_ancestor_reenters_it() {
    let (mut machine, mut trace) = started();
    machine.transition(&mut trace, Toy::A2);
    trace.log.clear();

    machine.transition(&mut trace, Toy::A);

    assert_eq!(trace.log, vec!["leave A2", "leave A", "enter A", "enter A1"]);
    assert_eq!(machine.active_state(), Some(Toy::A1));
}

#[test]
fn test_router_has_no_default_leaf() {
    let (mut machine, mut trace) = started();

    machine.transition(&mut trace, Toy::Router);

    assert_eq!(trace.log, vec!["leave A1", "leave A", "enter Router"]);
    assert_eq!(machine.active_state(), Some(Toy::Router));
    assert_eq!(machine.active_leaf_name(), "ROUTER");

    trace.log.clear();
    machine.transition(&mut trace, Toy::R1);

    assert_eq!(trace.log, vec!["enter R1"]);
    assert_eq!(machine.active_path(), vec![Toy::Router, Toy::R1]);
}

#[test]
fn test_router_child_entered_through_router() {
    let (mut machine, mut trace) = started();

    machine.transition(&mut trace, Toy::R1);

    assert_eq!(trace.log, vec!["leave A1", "leave A", "enter Router", "enter R1"]);
    assert_eq!(machine.active_state(), Some(Toy::R1));
}

#[test]
fn test_handled_leave_stops_cleanup_cascade() {
    let (mut machine, mut trace) = started();
    trace.keep_leave_at = Some(Toy::A1);

    machine.transition(&mut trace, Toy::B);

    assert_eq!(trace.log, vec!["leave A1", "enter B"]);
    assert_eq!(machine.active_path(), vec![Toy::B]);
}

#[test]
fn test_transition_requested_on_entry_runs_next() {
    let (mut machine, mut trace) = started();
    trace.redirect = Some((Toy::B1, Toy::A2));

    machine.transition(&mut trace, Toy::B1);

    assert_eq!(
        trace.log,
        vec![
            "leave A1", "leave A", "enter B", "enter B1", "leave B1", "leave B", "enter A",
            "enter A2",
        ]
    );
    assert_eq!(machine.active_path(), vec![Toy::A, Toy::A2]);
}

#[test]
fn test_redirect_from_parent_entry_skips_children() {
    let (mut machine, mut trace) = started();
    trace.redirect = Some((Toy::B, Toy::A2));

    machine.transition(&mut trace, Toy::B1);

    assert_eq!(
        trace.log,
        vec!["leave A1", "leave A", "enter B", "leave B", "enter A", "enter A2"]
    );
    assert_eq!(machine.active_state(), Some(Toy::A2));
}

// ============================================================================
// EVENT DISPATCH
// ============================================================================

#[test]
fn test_event_bubbles_until_claimed() {
    let (mut machine, mut trace) = started();
    trace.claims = vec![Toy::A];

    machine.process_event(&mut trace, Ev::Ping);

    assert_eq!(trace.log, vec!["Ping A1", "Ping A"]);
}

#[test]
fn test_leaf_claim_stops_bubbling() {
    let (mut machine, mut trace) = started();
    trace.claims = vec![Toy::A1, Toy::A];

    machine.process_event(&mut trace, Ev::Ping);

    assert_eq!(trace.log, vec!["Ping A1"]);
}

#[test]
fn test_unclaimed_event_is_inert() {
    let (mut machine, mut trace) = started();

    machine.process_event(&mut trace, Ev::Go(Toy::B));

    assert_eq!(trace.log, vec!["Go(B) A1", "Go(B) A", "Go(B) root"]);
    assert_eq!(machine.active_path(), vec![Toy::A, Toy::A1]);
}

#[test]
fn test_claimed_event_transition_applies_after_handler() {
    let (mut machine, mut trace) = started();
    trace.claims = vec![Toy::A];

    machine.process_event(&mut trace, Ev::Go(Toy::B1));

    assert_eq!(
        trace.log,
        vec!["Go(B1) A1", "Go(B1) A", "leave A1", "leave A", "enter B", "enter B1"]
    );
    assert_eq!(machine.active_state(), Some(Toy::B1));
}

#[test]
fn test_event_before_start_reaches_root() {
    let mut machine = build();
    let mut trace = Trace::default();

    machine.process_event(&mut trace, Ev::Ping);

    assert_eq!(trace.log, vec!["Ping root"]);
    assert_eq!(machine.active_state(), None);
}

// ============================================================================
// REGISTRATION
// ============================================================================

#[test]
fn test_duplicate_registration_rejected() {
    let mut machine = build();

    let result = machine.register(Toy::A, "A", None, None, traced);

    assert!(matches!(result, Err(MachineError::DuplicateState(_))));
}

#[test]
fn test_child_before_parent_rejected() {
    let mut machine: StateMachine<Toy, Ev, Trace> = StateMachine::new("TOY", root);

    let result = machine.register(Toy::A1, "A1", Some(Toy::A), None, traced);

    assert!(matches!(result, Err(MachineError::UnknownParent { .. })));
}

#[test]
fn test_registration_closed_after_first_transition() {
    let mut machine: StateMachine<Toy, Ev, Trace> = StateMachine::new("TOY", root);
    machine.register(Toy::B, "B", None, None, traced).unwrap();
    machine.transition(&mut Trace::default(), Toy::B);

    let result = machine.register(Toy::B1, "B1", Some(Toy::B), None, traced);

    assert_eq!(result, Err(MachineError::AlreadyStarted));
}

#[test]
fn test_state_metadata() {
    let machine = build();

    assert_eq!(machine.name(), "TOY");
    assert_eq!(machine.state_name(Toy::Router), Some("ROUTER"));
    assert_eq!(machine.parent(Toy::R1), Some(Toy::Router));
    assert_eq!(machine.parent(Toy::A), None);
}
