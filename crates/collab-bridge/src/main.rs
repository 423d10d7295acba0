//! collab-bridge: Collaborative editing from the terminal.
//!
//! Runs the sync session against a backend subprocess, with a line console on
//! stdin standing in for the editor.

use anyhow::Result;
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use collab_bridge::backend::Backend;
use collab_bridge::config::Args;
use collab_bridge::console::{self, Flow};
use collab_core::{EditorHost, EditorId, MemoryHost, NotifyLevel, Session, SessionInput};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.default_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting collab-bridge");

    let host = Arc::new(MemoryHost::new());
    let local = host.subscribe();
    let (input_tx, input_rx) = mpsc::unbounded_channel::<SessionInput<EditorId>>();

    let mut backend = match args.backend_config() {
        Some(config) => match Backend::launch(&config, input_tx.clone()) {
            Ok(backend) => Some(backend),
            Err(e) => {
                host.notify(
                    NotifyLevel::Error,
                    &format!("Error executing backend: {}", e),
                );
                None
            }
        },
        None => {
            host.notify(
                NotifyLevel::Error,
                "Backend path is not set. Please configure it in the settings.",
            );
            None
        }
    };

    let console = tokio::spawn(run_console(Arc::clone(&host), input_tx.clone()));

    let mut session = Session::new(Arc::clone(&host));
    tokio::select! {
        _ = collab_core::actor::run(&mut session, local, input_rx) => {
            info!("Console closed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    console.abort();
    if let Some(backend) = backend.as_mut() {
        if let Err(e) = backend.shutdown().await {
            warn!("Backend shutdown: {}", e);
        }
    }

    info!("Shutting down");
    Ok(())
}

/// Read console commands from stdin until `quit` or EOF.
async fn run_console(
    host: Arc<MemoryHost>,
    session: mpsc::UnboundedSender<SessionInput<EditorId>>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read console input: {}", e);
                break;
            }
        };

        let flow = match console::parse(&line) {
            Ok(Some(command)) => console::execute(command, &host, &session, &mut stdout),
            Ok(None) => Ok(Flow::Continue),
            Err(e) => {
                let _ = writeln!(stdout, "{}\n{}", e, console::USAGE);
                Ok(Flow::Continue)
            }
        };
        let _ = stdout.flush();

        match flow {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(e) => {
                let _ = writeln!(stdout, "Error: {}", e);
            }
        }
    }

    let _ = session.send(SessionInput::Shutdown);
}
