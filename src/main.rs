mod calc;
mod db;
mod error;
mod ipc;
mod labels;
mod model;
mod rank;
mod reports;
mod scope;
mod store;
mod trend;

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "gradebookd")]
#[command(about = "Gradebook statistics sidecar speaking JSON lines on stdin/stdout", long_about = None)]
struct Args {
    /// Workspace directory to open at startup.
    #[arg(long, env = "GRADEBOOKD_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, env = "GRADEBOOKD_LOG", default_value = "info")]
    log_level: String,
}

/// Logs go to stderr; stdout carries responses only.
fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(&args.log_level);
    info!("gradebookd v{}", env!("CARGO_PKG_VERSION"));

    let mut state = ipc::AppState::new(labels::normalize_class_label);
    if let Some(path) = args.workspace.as_deref() {
        if let Err(e) = ipc::select_workspace(&mut state, path) {
            error!(workspace = %path.display(), error = %e, "could not open workspace");
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                warn!(error = %e, "unparseable request line");
                ipc::bad_json(e.to_string())
            }
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    info!("stdin closed, shutting down");
}
