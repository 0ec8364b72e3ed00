// Transport Signals
// Producer-side handles used from outside the polling context: tick, socket-closed,
// platform error codes and command-layer close requests

use crate::machine::{EventQueue, OverflowPolicy};
use crate::transport::TransportEvent;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

// ============================================================================
// TIMEOUT TIMER
// ============================================================================

/// Tick countdown shared between the receive state and the tick source.
///
/// Zero means disarmed.
#[derive(Debug, Default)]
pub struct TimeoutTimer {
    remaining: AtomicU8,
}

impl TimeoutTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self, ticks: u8) {
        self.remaining.store(ticks, Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.remaining.store(0, Ordering::SeqCst);
    }

    pub fn remaining(&self) -> u8 {
        self.remaining.load(Ordering::SeqCst)
    }

    pub fn is_armed(&self) -> bool {
        self.remaining() > 0
    }

    /// Count one tick down. Returns true on the tick that reaches zero.
    pub fn tick(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |ticks| ticks.checked_sub(1))
            .map(|previous| previous == 1)
            .unwrap_or(false)
    }
}

// ============================================================================
// SHARED SIGNAL STATE
// ============================================================================

/// State reachable from both the producers and the polling context
#[derive(Debug)]
pub(crate) struct SignalState {
    pub(crate) queue: EventQueue<TransportEvent>,
    pub(crate) timer: TimeoutTimer,
    platform_code: AtomicI32,
    reset_requested: AtomicBool,
}

impl SignalState {
    pub(crate) fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            queue: EventQueue::new(capacity, policy),
            timer: TimeoutTimer::new(),
            platform_code: AtomicI32::new(0),
            reset_requested: AtomicBool::new(false),
        }
    }

    pub(crate) fn platform_code(&self) -> i32 {
        self.platform_code.load(Ordering::SeqCst)
    }

    /// Consume a pending record-reset request
    pub(crate) fn take_reset_request(&self) -> bool {
        self.reset_requested.swap(false, Ordering::SeqCst)
    }
}

// ============================================================================
// TRANSPORT SIGNALS
// ============================================================================

/// Cloneable producer handle.
///
/// Each callback pushes at most one event and never touches transport state
/// directly, so it is safe to call from timer or network threads.
#[derive(Debug, Clone)]
pub struct TransportSignals {
    shared: Arc<SignalState>,
}

impl TransportSignals {
    pub(crate) fn new(shared: Arc<SignalState>) -> Self {
        Self { shared }
    }

    /// Periodic tick (about once a second)
    pub fn on_tick(&self) {
        if self.shared.timer.tick() {
            info!("Receive timeout expired");
            self.shared.queue.push(TransportEvent::Timeout);
        }
    }

    /// The platform noticed the socket was closed under us
    pub fn on_socket_closed(&self) {
        info!("Socket closed by platform");
        self.shared.queue.push(TransportEvent::SocketClosed);
    }

    /// Latest platform-specific error code, sampled when a fault is latched
    pub fn on_platform_error(&self, code: i32) {
        debug!(code, "Platform error code");
        self.shared.platform_code.store(code, Ordering::SeqCst);
    }

    /// Events waiting for the polling context
    pub fn pending_events(&self) -> usize {
        self.shared.queue.len()
    }
}

// ============================================================================
// COMMAND LAYER
// ============================================================================

/// Close request handed to the command layer.
///
/// Invoking it starts a close operation: the record reset is applied before
/// the next event is dispatched.
#[derive(Debug, Clone)]
pub struct CloseSocketCommand {
    shared: Arc<SignalState>,
}

impl CloseSocketCommand {
    pub(crate) fn new(shared: Arc<SignalState>) -> Self {
        Self { shared }
    }

    pub fn invoke(&self) {
        info!("Close socket requested by command layer");
        self.shared.reset_requested.store(true, Ordering::SeqCst);
        self.shared.queue.push(TransportEvent::CloseSocket);
    }
}

/// Registry of entry points exposed to other subsystems
pub trait CommandRegistry {
    fn register_close_socket(&mut self, command: CloseSocketCommand);
}
