//! URG capture tool - Main Entry Point
//!
//! Usage: `urg-tool [config.toml]`. Scans are printed to stdout as JSON lines.

use scan_stream::ScanStreamer;
use scanner_session::{Scan, ScannerSession};
use scip_protocol::{ScipError, SerialTransport};
use std::path::PathBuf;
use tracing::{info, warn};
use urg_tool::{init_logging, CaptureMode, ToolConfig};

type Session = ScannerSession<SerialTransport>;

fn connect(config: &ToolConfig) -> Result<Session, ScipError> {
    let mut session = ScannerSession::new(SerialTransport::new(), config.session.clone());
    session.connect(&config.device, config.baud_rate)?;

    if config.show_version {
        for line in session.version_lines()? {
            info!("{}", line);
        }
    }
    info!(
        "{}: {} steps, {}..{} mm, {} ms per scan",
        session.model(),
        session.data_max(),
        session.min_distance(),
        session.max_distance(),
        session.scan_msec()
    );
    Ok(session)
}

fn print_scan(scan: &Scan) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string(scan)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = ToolConfig::load(path.as_deref())?;
    init_logging(&config);

    info!("=== urg-tool v{} ===", env!("CARGO_PKG_VERSION"));

    let connect_config = config.clone();
    let mut session = tokio::task::spawn_blocking(move || connect(&connect_config)).await??;

    match config.mode {
        CaptureMode::Single => {
            let kind = config.single_kind;
            let (mut session, scan) = tokio::task::spawn_blocking(move || {
                let scan = session.capture(kind);
                (session, scan)
            })
            .await?;
            let scan = scan?;
            print_scan(&scan)?;
            tokio::task::spawn_blocking(move || session.disconnect()).await?;
        }
        CaptureMode::Stream => {
            let (task, mut rx) = ScanStreamer::new(config.stream.clone()).spawn(session);
            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            loop {
                tokio::select! {
                    scan = rx.recv() => match scan {
                        Some(scan) => print_scan(&scan)?,
                        None => break,
                    },
                    _ = &mut ctrl_c => {
                        info!("Interrupted");
                        task.stop();
                        break;
                    }
                }
            }
            drop(rx);

            let outcome = task.join().await?;
            session = outcome.session;
            match outcome.result {
                Ok(stats) => info!("{} scans, {} failures, {} restarts", stats.scans, stats.failures, stats.restarts),
                Err(e) => warn!("Stream failed: {}", e),
            }
            tokio::task::spawn_blocking(move || session.disconnect()).await?;
        }
    }

    Ok(())
}
