// sensor-link - transport management for an embedded sensor device
//
// Owns the life cycle of one network socket (open, send/receive, close) and
// coordinates it against asynchronous signals: timer ticks, unsolicited socket
// closure and platform error codes.
//
// - machine:   generic hierarchical state machine engine and bounded event queue
// - transport: the socket state machine, platform adapter trait, TCP adapter

pub mod machine;
pub mod transport;

pub use machine::{EventQueue, OverflowPolicy, StateMachine};
pub use transport::{
    ModuleResult, OperationRecord, Platform, TransportConfig, TransportModule, TransportSignals,
};
