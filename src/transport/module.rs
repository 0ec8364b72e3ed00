// Transport Module
// Single-socket life cycle (open, send/receive, close) as a hierarchical state machine
// driven by a caller-owned poll loop

use crate::machine::{Handler, Outcome, Scope, Signal, StateMachine};
use crate::transport::signals::SignalState;
use crate::transport::{
    CloseSocketCommand, CommandRegistry, Fault, FaultKind, ModuleResult, ModuleType,
    OperationRecord, Platform, SocketHandle, TransportConfig, TransportError, TransportEvent,
    TransportSignals, TransportState,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

const CONNECTING_RESPONSE: &str = "STATUS CONNECTING_TO_SERVER;";

// ============================================================================
// CONTEXT
// ============================================================================

/// Mutable state every handler works on
struct TransportContext<P> {
    platform: P,
    config: TransportConfig,
    shared: Arc<SignalState>,
    tx_data: Vec<u8>,
    rx_buffer: Vec<u8>,
    received_len: usize,
    socket: Option<SocketHandle>,
    open_attempts: u8,
    record: OperationRecord,
}

impl<P: Platform> TransportContext<P> {
    fn push(&self, event: TransportEvent) {
        self.shared.queue.push(event);
    }

    /// Abandon whatever is queued after a fault
    fn flush(&self) {
        let dropped = self.shared.queue.clear();
        if dropped > 0 {
            debug!(dropped, "Event queue flushed");
        }
    }

    fn fail(&mut self, kind: FaultKind, state: TransportState) {
        let fault = Fault::new(kind, state);
        let code = self.shared.platform_code();
        if self.record.record(fault, code) {
            warn!(%fault, platform_code = code, "Transport fault");
        } else {
            debug!(%fault, "Fault ignored, operation already failed");
        }
    }

    /// Hand a peer-closed socket back to the platform. The close result is
    /// not a fault of its own.
    fn release_socket(&mut self) {
        if let Some(socket) = self.socket.take() {
            if !self.platform.close_socket(socket) {
                debug!(%socket, "Platform could not release peer-closed socket");
            }
        }
    }
}

type TransportScope<'a, P> = Scope<'a, TransportState, TransportContext<P>>;
type TransportHandler<P> = Handler<TransportState, TransportEvent, TransportContext<P>>;

// ============================================================================
// TRANSPORT MODULE
// ============================================================================

/// Socket transport for one server connection.
///
/// Public operations only store their parameters and queue a driving event;
/// the caller makes progress by polling the returned [`Operation`].
pub struct TransportModule<P: Platform> {
    machine: StateMachine<TransportState, TransportEvent, TransportContext<P>>,
    ctx: TransportContext<P>,
}

impl<P: Platform> TransportModule<P> {
    pub fn new(mut platform: P, config: TransportConfig) -> Result<Self, TransportError> {
        config.validate()?;
        info!(
            server = %config.server_address,
            port = config.server_port,
            "Transport module init"
        );

        let shared = Arc::new(SignalState::new(config.queue_capacity, config.overflow_policy));
        platform.subscribe(TransportSignals::new(shared.clone()));

        let mut machine: StateMachine<TransportState, TransportEvent, TransportContext<P>> =
            StateMachine::new("TRANSPORT", module_root::<P>);
        machine.register(TransportState::Closed, TransportState::Closed.name(), None, None, state_closed::<P>)?;
        machine.register(TransportState::Opening, TransportState::Opening.name(), None, None, state_opening::<P>)?;
        machine.register(TransportState::Opened, TransportState::Opened.name(), None, None, state_opened::<P>)?;
        for (child, handler) in [
            (TransportState::Sending, state_sending::<P> as TransportHandler<P>),
            (TransportState::Receiving, state_receiving::<P>),
        ] {
            machine.register(child, child.name(), Some(TransportState::Opened), None, handler)?;
        }
        machine.register(TransportState::Closing, TransportState::Closing.name(), None, None, state_closing::<P>)?;

        let mut ctx = TransportContext {
            platform,
            config,
            shared,
            tx_data: Vec::new(),
            rx_buffer: Vec::new(),
            received_len: 0,
            socket: None,
            open_attempts: 0,
            record: OperationRecord::new(),
        };
        machine.transition(&mut ctx, TransportState::Closed);

        Ok(Self { machine, ctx })
    }

    /// Queue a write of `data`
    pub fn send(&mut self, data: &[u8]) -> Operation<'_, P> {
        debug!(len = data.len(), "Send requested");
        self.ctx.tx_data = data.to_vec();
        self.begin(TransportEvent::Send)
    }

    /// Queue a read of up to `capacity` bytes; see [`received`](Self::received)
    pub fn receive(&mut self, capacity: usize) -> Operation<'_, P> {
        debug!(capacity, "Receive requested");
        self.ctx.rx_buffer.clear();
        self.ctx.rx_buffer.resize(capacity, 0);
        self.ctx.received_len = 0;
        self.begin(TransportEvent::Receive)
    }

    /// Queue a socket close
    pub fn close_socket(&mut self) -> Operation<'_, P> {
        debug!("Close socket requested");
        self.begin(TransportEvent::CloseSocket)
    }

    fn begin(&mut self, event: TransportEvent) -> Operation<'_, P> {
        self.ctx.record.reset();
        self.ctx.push(event);
        Operation { module: self }
    }

    /// Pop one event and dispatch it. Returns false when the queue was empty.
    pub fn process_event(&mut self) -> bool {
        if self.ctx.shared.take_reset_request() {
            self.ctx.record.reset();
        }
        match self.ctx.shared.queue.pop() {
            Some(event) => {
                debug!(?event, state = self.machine.active_leaf_name(), "Processing event");
                self.machine.process_event(&mut self.ctx, event);
                true
            }
            None => false,
        }
    }

    /// Bytes stored by the last successful receive
    pub fn received(&self) -> &[u8] {
        &self.ctx.rx_buffer[..self.ctx.received_len]
    }

    pub fn received_len(&self) -> usize {
        self.ctx.received_len
    }

    pub fn record(&self) -> &OperationRecord {
        &self.ctx.record
    }

    /// Tagged result for the monitoring collaborator
    pub fn result(&self) -> ModuleResult {
        ModuleResult {
            module_type: ModuleType::Ethernet,
            record: self.ctx.record,
        }
    }

    /// Name of the deepest active state
    pub fn status(&self) -> String {
        self.machine.active_leaf_name().to_string()
    }

    pub fn state(&self) -> Option<TransportState> {
        self.machine.active_state()
    }

    /// Producer handle for the platform's asynchronous callbacks
    pub fn signals(&self) -> TransportSignals {
        TransportSignals::new(self.ctx.shared.clone())
    }

    /// Expose the close entry point to the command layer
    pub fn register_commands<R: CommandRegistry>(&self, registry: &mut R) {
        registry.register_close_socket(CloseSocketCommand::new(self.ctx.shared.clone()));
    }

    /// Reload server parameters from the configuration collaborator
    pub fn set_server(&mut self, address: &str, port: u16) {
        info!(server = address, port, "Connection parameters loaded");
        self.ctx.config.server_address = address.to_string();
        self.ctx.config.server_port = port;
    }

    pub fn config(&self) -> &TransportConfig {
        &self.ctx.config
    }

    pub fn socket(&self) -> Option<SocketHandle> {
        self.ctx.socket
    }

    pub fn pending_events(&self) -> usize {
        self.ctx.shared.queue.len()
    }

    pub fn platform(&self) -> &P {
        &self.ctx.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.ctx.platform
    }
}

// ============================================================================
// OPERATION HANDLE
// ============================================================================

/// Polling handle returned by every public operation.
///
/// Each `poll` processes at most one event. `false` means quiescence: the
/// queue is empty and the outcome is in the operation record.
#[must_use = "an operation makes no progress unless polled"]
pub struct Operation<'a, P: Platform> {
    module: &'a mut TransportModule<P>,
}

impl<'a, P: Platform> Operation<'a, P> {
    pub fn poll(&mut self) -> bool {
        self.module.process_event()
    }

    /// Poll until quiescent or `max_polls` events were processed.
    /// Returns the number of events processed.
    pub fn drain(mut self, max_polls: usize) -> usize {
        let mut processed = 0;
        while processed < max_polls && self.poll() {
            processed += 1;
        }
        processed
    }

    pub fn module(&self) -> &TransportModule<P> {
        &*self.module
    }
}

// ============================================================================
// STATE HANDLERS
// ============================================================================

fn module_root<P: Platform>(_scope: &mut TransportScope<'_, P>, signal: Signal<TransportEvent>) -> Outcome {
    match signal {
        Signal::Entering => {
            debug!("Entering transport module");
            Outcome::Handled
        }
        Signal::Leaving => Outcome::NotHandled,
        Signal::Event(_) => Outcome::Handled,
    }
}

fn state_closed<P: Platform>(scope: &mut TransportScope<'_, P>, signal: Signal<TransportEvent>) -> Outcome {
    match signal {
        Signal::Entering => {
            debug!("Entering socket closed state");
            Outcome::Handled
        }
        Signal::Event(event @ (TransportEvent::Send | TransportEvent::Receive)) => {
            if scope.ctx.config.has_server() {
                scope.ctx.push(event);
                scope.transition(TransportState::Opening);
            } else {
                warn!(?event, "Connection parameters missing");
                scope.ctx.fail(FaultKind::ParametersMissing, TransportState::Closed);
            }
            Outcome::Handled
        }
        Signal::Leaving => {
            debug!("Leaving socket closed state");
            Outcome::NotHandled
        }
        Signal::Event(_) => Outcome::NotHandled,
    }
}

fn state_opening<P: Platform>(scope: &mut TransportScope<'_, P>, signal: Signal<TransportEvent>) -> Outcome {
    let ctx = &mut *scope.ctx;
    match signal {
        Signal::Entering => {
            debug!("Entering opening socket state");
            ctx.platform.send_response(CONNECTING_RESPONSE);
            ctx.open_attempts = 0;
            ctx.push(TransportEvent::OpenSocket);
            Outcome::Handled
        }
        Signal::Event(TransportEvent::OpenSocket) => {
            let opened = ctx
                .platform
                .open_socket(&ctx.config.server_address, ctx.config.server_port);
            match opened {
                Ok(socket) => {
                    info!(%socket, "Socket opened");
                    ctx.socket = Some(socket);
                    scope.transition(TransportState::Opened);
                }
                Err(e) => {
                    ctx.open_attempts += 1;
                    if ctx.open_attempts >= ctx.config.max_open_attempts {
                        warn!(attempts = ctx.open_attempts, error = %e, "Unable to open socket");
                        ctx.fail(FaultKind::OperationFailed, TransportState::Opening);
                        ctx.flush();
                        scope.transition(TransportState::Closed);
                    } else {
                        debug!(attempt = ctx.open_attempts, error = %e, "Unable to open socket, retrying");
                        ctx.push(TransportEvent::OpenSocket);
                    }
                }
            }
            Outcome::Handled
        }
        // Held back until the socket is open
        Signal::Event(event @ (TransportEvent::Send | TransportEvent::Receive)) => {
            ctx.push(event);
            Outcome::Handled
        }
        Signal::Leaving => {
            debug!("Leaving opening socket state");
            Outcome::NotHandled
        }
        Signal::Event(_) => Outcome::NotHandled,
    }
}

fn state_opened<P: Platform>(scope: &mut TransportScope<'_, P>, signal: Signal<TransportEvent>) -> Outcome {
    match signal {
        Signal::Entering => {
            debug!("Entering socket opened state");
            scope.clear_active_child();
            Outcome::Handled
        }
        Signal::Event(TransportEvent::Send) => {
            scope.transition(TransportState::Sending);
            Outcome::Handled
        }
        Signal::Event(TransportEvent::Receive) => {
            scope.transition(TransportState::Receiving);
            Outcome::Handled
        }
        Signal::Event(TransportEvent::CloseSocket) => {
            scope.transition(TransportState::Closing);
            Outcome::Handled
        }
        Signal::Event(TransportEvent::SocketClosed) => {
            scope.ctx.release_socket();
            scope.ctx.fail(FaultKind::SocketClosed, TransportState::Opened);
            scope.ctx.flush();
            scope.transition(TransportState::Closed);
            Outcome::Handled
        }
        Signal::Leaving => {
            debug!("Leaving socket opened state");
            Outcome::NotHandled
        }
        Signal::Event(_) => Outcome::NotHandled,
    }
}

fn state_sending<P: Platform>(scope: &mut TransportScope<'_, P>, signal: Signal<TransportEvent>) -> Outcome {
    let ctx = &mut *scope.ctx;
    match signal {
        Signal::Entering => {
            debug!("Entering send state");
            let written = match ctx.socket {
                Some(socket) => ctx.platform.send(socket, &ctx.tx_data),
                None => 0,
            };
            if written == ctx.tx_data.len() {
                debug!(written, "Data sent");
                scope.transition(TransportState::Opened);
            } else {
                warn!(written, expected = ctx.tx_data.len(), "Send failed");
                ctx.fail(FaultKind::OperationFailed, TransportState::Sending);
                ctx.flush();
                scope.transition(TransportState::Closing);
            }
            Outcome::Handled
        }
        Signal::Leaving => {
            debug!("Leaving send state");
            Outcome::NotHandled
        }
        Signal::Event(_) => Outcome::NotHandled,
    }
}

fn state_receiving<P: Platform>(scope: &mut TransportScope<'_, P>, signal: Signal<TransportEvent>) -> Outcome {
    let ctx = &mut *scope.ctx;
    match signal {
        Signal::Entering => {
            debug!("Entering receive state");
            ctx.shared.timer.arm(ctx.config.receive_timeout_ticks);
            ctx.push(TransportEvent::Receive);
            Outcome::Handled
        }
        Signal::Event(TransportEvent::Receive) => {
            let received = match ctx.socket {
                Some(socket) => ctx.platform.receive(socket, &mut ctx.rx_buffer),
                None => Ok(0),
            };
            match received {
                Ok(0) => {
                    ctx.received_len = 0;
                    ctx.push(TransportEvent::Receive);
                }
                Ok(len) => {
                    debug!(len, "Data received");
                    ctx.received_len = len.min(ctx.rx_buffer.len());
                    scope.transition(TransportState::Opened);
                }
                Err(e) => {
                    warn!(error = %e, "Receive failed");
                    ctx.received_len = 0;
                    ctx.fail(FaultKind::OperationFailed, TransportState::Receiving);
                    ctx.flush();
                    scope.transition(TransportState::Closing);
                }
            }
            Outcome::Handled
        }
        Signal::Event(TransportEvent::SocketClosed) => {
            ctx.release_socket();
            ctx.fail(FaultKind::SocketClosed, TransportState::Receiving);
            ctx.flush();
            scope.transition(TransportState::Closed);
            Outcome::Handled
        }
        Signal::Event(TransportEvent::Timeout) => {
            info!("Timeout while waiting for data");
            ctx.shared.queue.remove(TransportEvent::Receive);
            scope.transition(TransportState::Opened);
            Outcome::Handled
        }
        Signal::Leaving => {
            debug!("Leaving receive state");
            ctx.shared.timer.disarm();
            Outcome::NotHandled
        }
        Signal::Event(_) => Outcome::NotHandled,
    }
}

fn state_closing<P: Platform>(scope: &mut TransportScope<'_, P>, signal: Signal<TransportEvent>) -> Outcome {
    let ctx = &mut *scope.ctx;
    match signal {
        Signal::Entering => {
            debug!("Entering closing socket state");
            let closed = match ctx.socket.take() {
                Some(socket) => ctx.platform.close_socket(socket),
                None => true,
            };
            if closed {
                info!("Socket closed");
            } else {
                warn!("Socket could not be closed");
                ctx.fail(FaultKind::OperationFailed, TransportState::Closing);
                ctx.flush();
            }
            scope.transition(TransportState::Closed);
            Outcome::Handled
        }
        Signal::Leaving => {
            debug!("Leaving closing socket state");
            Outcome::NotHandled
        }
        Signal::Event(_) => Outcome::NotHandled,
    }
}
