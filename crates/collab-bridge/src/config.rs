//! Command-line configuration.

use clap::Parser;
use std::path::PathBuf;

/// Port the backend listens on for peers unless told otherwise.
pub const DEFAULT_PORT: u16 = 6969;

#[derive(Parser, Debug, Clone)]
#[command(name = "collab-bridge")]
#[command(about = "Collaborative editing bridge between a local editor and a sync backend")]
pub struct Args {
    /// Path to the backend executable
    #[arg(short, long, env = "COLLAB_BACKEND_PATH")]
    pub backend: Option<PathBuf>,

    /// Port the backend listens on for peers
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,
}

impl Args {
    /// Backend launch parameters, if a backend path was configured.
    pub fn backend_config(&self) -> Option<BackendConfig> {
        self.backend.as_ref().map(|path| BackendConfig {
            path: path.clone(),
            port: self.port,
        })
    }

    /// Default tracing filter when `RUST_LOG` is not set.
    pub fn default_filter(&self) -> &'static str {
        if self.verbose {
            "debug,collab_core=debug,collab_bridge=debug"
        } else {
            "info,collab_core=info,collab_bridge=info"
        }
    }
}

/// Launch parameters for the backend subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub path: PathBuf,
    pub port: u16,
}

impl BackendConfig {
    pub fn new(path: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            path: path.into(),
            port,
        }
    }

    /// Arguments passed to the backend executable.
    pub fn args(&self) -> Vec<String> {
        vec!["--port".to_string(), self.port.to_string()]
    }
}
