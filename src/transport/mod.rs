// Transport module - THE SOCKET
// Socket life cycle state machine, its platform adapter trait and a TCP adapter

mod module;
mod signals;
mod tcp;
mod traits;

pub use traits::{
    // Platform adapter
    Platform, PlatformError, SocketHandle,
    // Configuration
    TransportConfig,
    // Machine vocabulary
    TransportEvent, TransportState,
    // Faults and results
    Fault, FaultKind, ModuleResult, ModuleType, OperationRecord,
    // Errors
    TransportError,
};

pub use module::{Operation, TransportModule};

pub use signals::{CloseSocketCommand, CommandRegistry, TimeoutTimer, TransportSignals};

pub use tcp::{TcpPlatform, TcpPlatformConfig};
