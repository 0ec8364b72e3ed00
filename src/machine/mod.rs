// Machine module - THE DISPATCHER
// Generic hierarchical state machine engine and the event queue that feeds it

mod engine;
mod queue;

pub use engine::{Handler, MachineError, Outcome, Scope, Signal, StateId, StateMachine};
pub use queue::{EventQueue, OverflowPolicy};
