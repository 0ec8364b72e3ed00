// sensor-link CLI
// Drives one send and/or receive over TCP through the transport state machine,
// with a tokio interval standing in for the device's one-second tick

use clap::Parser;
use sensor_link::transport::{
    Operation, TcpPlatform, TcpPlatformConfig, TransportConfig, TransportModule,
};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "sensor-link", version, about = "Exercise the sensor transport over TCP")]
struct Args {
    /// Server address
    #[arg(long, default_value = "")]
    address: String,

    /// Server port
    #[arg(long, default_value_t = 0)]
    port: u16,

    /// Text to send
    #[arg(long)]
    message: Option<String>,

    /// Receive up to this many bytes after sending
    #[arg(long)]
    receive: Option<usize>,

    /// Tick period in milliseconds
    #[arg(long, default_value_t = 1000)]
    tick_ms: u64,

    /// Receive timeout in ticks
    #[arg(long, default_value_t = 3)]
    timeout_ticks: u8,

    /// Give up on an operation after this many processed events
    #[arg(long, default_value_t = 100_000)]
    max_polls: usize,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&args.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();

    let config = TransportConfig::new()
        .with_server(&args.address, args.port)
        .with_receive_timeout_ticks(args.timeout_ticks);
    let platform = TcpPlatform::new(TcpPlatformConfig::default());
    let mut module = TransportModule::new(platform, config)?;

    let signals = module.signals();
    let tick_period = Duration::from_millis(args.tick_ms.max(1));
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_period);
        loop {
            interval.tick().await;
            signals.on_tick();
        }
    });

    if let Some(message) = &args.message {
        drive("send", module.send(message.as_bytes()), args.max_polls).await;
        report(&module);
    }

    if let Some(capacity) = args.receive {
        drive("receive", module.receive(capacity), args.max_polls).await;
        report(&module);
        if module.received_len() > 0 {
            println!("received: {}", String::from_utf8_lossy(module.received()));
        }
    }

    drive("close", module.close_socket(), args.max_polls).await;
    report(&module);

    ticker.abort();
    Ok(())
}

/// Poll until quiescent, yielding to the tick task between events.
///
/// `TcpPlatform` connects and writes with blocking calls, so each poll runs
/// under `block_in_place` to keep the ticker's worker free.
async fn drive(name: &str, mut operation: Operation<'_, TcpPlatform>, max_polls: usize) {
    let mut polls = 0;
    while tokio::task::block_in_place(|| operation.poll()) {
        polls += 1;
        if polls >= max_polls {
            warn!(operation = name, polls, "Operation abandoned");
            return;
        }
        if operation.module().pending_events() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
    info!(operation = name, polls, "Operation quiescent");
}

fn report(module: &TransportModule<TcpPlatform>) {
    let result = module.result();
    match result.record.fault() {
        Some(fault) => println!(
            "status: {}  fault: {} (code 0x{:02X}, platform {})",
            module.status(),
            fault,
            fault.code(),
            result.record.platform_code()
        ),
        None => println!("status: {}  ok", module.status()),
    }
    match result.to_bytes() {
        Ok(bytes) => println!("result: {}", hex::encode(bytes)),
        Err(e) => warn!(error = %e, "Result export failed"),
    }
}
