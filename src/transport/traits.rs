// Transport Traits and Core Types
// Defines the Platform adapter trait and the types shared by the transport state machine

use crate::machine::{MachineError, OverflowPolicy, StateId};
use crate::transport::TransportSignals;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// TRANSPORT CONFIG
// ============================================================================

/// Configuration for the transport module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Server host name or IP address (empty = not configured)
    pub server_address: String,
    /// Server port (0 = not configured)
    pub server_port: u16,
    /// Number of pending events the queue holds
    pub queue_capacity: usize,
    /// What happens when a producer pushes into a full queue
    pub overflow_policy: OverflowPolicy,
    /// Connection attempts per sojourn in the opening state
    pub max_open_attempts: u8,
    /// Ticks a receive waits for data before giving up
    pub receive_timeout_ticks: u8,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            server_address: String::new(),
            server_port: 0,
            queue_capacity: 10,
            overflow_policy: OverflowPolicy::DropOldest,
            max_open_attempts: 3,
            receive_timeout_ticks: 3,
        }
    }
}

impl TransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(mut self, address: &str, port: u16) -> Self {
        self.server_address = address.to_string();
        self.server_port = port;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    pub fn with_max_open_attempts(mut self, attempts: u8) -> Self {
        self.max_open_attempts = attempts;
        self
    }

    pub fn with_receive_timeout_ticks(mut self, ticks: u8) -> Self {
        self.receive_timeout_ticks = ticks;
        self
    }

    /// Server parameters are usable: non-empty address and non-zero port
    pub fn has_server(&self) -> bool {
        !self.server_address.is_empty() && self.server_port != 0
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.queue_capacity == 0 {
            return Err(TransportError::InvalidConfig("queue_capacity cannot be 0".to_string()));
        }
        if self.max_open_attempts == 0 {
            return Err(TransportError::InvalidConfig("max_open_attempts cannot be 0".to_string()));
        }
        if self.receive_timeout_ticks == 0 {
            return Err(TransportError::InvalidConfig(
                "receive_timeout_ticks cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// STATES AND EVENTS
// ============================================================================

/// States of the transport machine
///
/// ```text
/// Closed ── Send/Receive ──▶ Opening ── socket open ──▶ Opened ─┬─▶ Sending
///   ▲                          │                                 ├─▶ Receiving
///   └──────── retries spent ───┘                                 └─▶ Closing ──▶ Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransportState {
    Closed = 0,
    Opening = 1,
    /// Router over `Sending` and `Receiving`; has no default child
    Opened = 2,
    Sending = 3,
    Receiving = 4,
    Closing = 5,
}

impl TransportState {
    pub const ALL: [TransportState; 6] = [
        Self::Closed,
        Self::Opening,
        Self::Opened,
        Self::Sending,
        Self::Receiving,
        Self::Closing,
    ];

    /// Numeric id used in fault codes
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// Diagnostic name reported by the status surface
    pub fn name(self) -> &'static str {
        match self {
            Self::Closed => "SOCKET_CLOSED",
            Self::Opening => "OPENING_SOCKET",
            Self::Opened => "SOCKET_OPENED",
            Self::Sending => "SEND",
            Self::Receiving => "RECEIVE",
            Self::Closing => "CLOSING_SOCKET",
        }
    }

    pub fn parent(self) -> Option<Self> {
        match self {
            Self::Sending | Self::Receiving => Some(Self::Opened),
            _ => None,
        }
    }
}

impl StateId for TransportState {
    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Events driving the transport machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportEvent {
    Send,
    Receive,
    /// Internal retry driver while opening
    OpenSocket,
    CloseSocket,
    /// Raised by the platform when the peer closed the socket
    SocketClosed,
    /// Raised by the tick source when the receive countdown expires
    Timeout,
}

// ============================================================================
// FAULTS
// ============================================================================

/// Kind of failure latched into an operation record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    ParametersMissing,
    OperationFailed,
    SocketClosed,
}

impl FaultKind {
    const MASK: u8 = 0xF0;

    fn bits(self) -> u8 {
        match self {
            Self::ParametersMissing => 0x10,
            Self::OperationFailed => 0x20,
            Self::SocketClosed => 0x30,
        }
    }

    fn from_bits(bits: u8) -> Option<Self> {
        match bits & Self::MASK {
            0x10 => Some(Self::ParametersMissing),
            0x20 => Some(Self::OperationFailed),
            0x30 => Some(Self::SocketClosed),
            _ => None,
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParametersMissing => write!(f, "connection parameters missing"),
            Self::OperationFailed => write!(f, "operation failed"),
            Self::SocketClosed => write!(f, "socket closed"),
        }
    }
}

/// A fault paired with the state that was active when it happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fault {
    pub kind: FaultKind,
    pub state: TransportState,
}

impl Fault {
    pub fn new(kind: FaultKind, state: TransportState) -> Self {
        Self { kind, state }
    }

    /// Single-byte encoding: kind in the high nibble, state id in the low nibble
    pub fn code(&self) -> u8 {
        self.kind.bits() | self.state.id()
    }

    pub fn from_code(code: u8) -> Option<Self> {
        let kind = FaultKind::from_bits(code)?;
        let state = TransportState::from_id(code & !FaultKind::MASK)?;
        Some(Self { kind, state })
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.kind, self.state)
    }
}

// ============================================================================
// OPERATION RECORD
// ============================================================================

/// Sticky outcome of the current caller-initiated operation.
///
/// The first fault wins; later faults are ignored until `reset`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    fault: Option<Fault>,
    platform_code: i32,
}

impl OperationRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch a fault if none is recorded yet. Returns whether it was stored.
    pub fn record(&mut self, fault: Fault, platform_code: i32) -> bool {
        if self.fault.is_some() {
            return false;
        }
        self.fault = Some(fault);
        self.platform_code = platform_code;
        true
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn fault(&self) -> Option<Fault> {
        self.fault
    }

    /// Platform error code sampled when the fault was latched
    pub fn platform_code(&self) -> i32 {
        self.platform_code
    }

    pub fn is_ok(&self) -> bool {
        self.fault.is_none()
    }

    /// Encoded fault byte, 0 when no fault is recorded
    pub fn code(&self) -> u8 {
        self.fault.map(|fault| fault.code()).unwrap_or(0)
    }
}

// ============================================================================
// MODULE RESULT
// ============================================================================

/// Communication module variants known to the monitoring side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleType {
    Ethernet,
}

/// Tagged result handed to the monitoring collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleResult {
    pub module_type: ModuleType,
    pub record: OperationRecord,
}

impl ModuleResult {
    /// Export for the monitoring link
    pub fn to_bytes(&self) -> Result<Vec<u8>, TransportError> {
        postcard::to_allocvec(self).map_err(|e| TransportError::SerializationError(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransportError> {
        postcard::from_bytes(bytes).map_err(|e| TransportError::SerializationError(e.to_string()))
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors returned by platform primitives
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("Platform call failed with code {0}")]
    Code(i32),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for PlatformError {
    fn from(e: std::io::Error) -> Self {
        match e.raw_os_error() {
            Some(code) => Self::Code(-code),
            None => Self::Io(e.to_string()),
        }
    }
}

/// Errors raised while setting up or exporting from the transport module
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("State machine error: {0}")]
    Machine(#[from] MachineError),
}

// ============================================================================
// PLATFORM ADAPTER
// ============================================================================

/// Socket handle issued by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SocketHandle(pub u16);

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Socket primitives supplied by the device platform.
///
/// Calls are made from inside state handlers, synchronously, on the polling
/// context. Asynchronous notifications go through the `TransportSignals`
/// handed over in `subscribe`.
pub trait Platform {
    /// Open a socket to `address:port`
    fn open_socket(&mut self, address: &str, port: u16) -> Result<SocketHandle, PlatformError>;

    /// Write `data`, returning how many bytes went out
    fn send(&mut self, socket: SocketHandle, data: &[u8]) -> usize;

    /// Read into `buffer`; `Ok(0)` means nothing is available yet
    fn receive(&mut self, socket: SocketHandle, buffer: &mut [u8]) -> Result<usize, PlatformError>;

    /// Close the socket, reporting whether the platform succeeded
    fn close_socket(&mut self, socket: SocketHandle) -> bool;

    /// Wire the tick, socket-closed and error-code callbacks
    fn subscribe(&mut self, _signals: TransportSignals) {}

    /// Status line for the command layer
    fn send_response(&mut self, _response: &str) {}
}
