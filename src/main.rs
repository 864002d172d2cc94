//! Entry point: CLI parsing, logging setup, and a panic hook, then handing
//! off to the supervisor for the rest of the process lifetime.

mod aggregate;
mod blacklist;
mod broadcast;
mod config;
mod error;
mod ingest;
mod kernel;
mod proto;
mod resource;
mod rules;
mod supervisor;

use std::path::{Path, PathBuf};

use clap::Parser;

use supervisor::Supervisor;

/// The compiled XDP object, built by the companion `xdp_firewall` crate and
/// linked in at compile time — there is no runtime code-load path.
static XDP_PROGRAM: &[u8] = aya::include_bytes_aligned!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/xdp-firewall/target/bpfel-unknown-none/release/xdp-firewall"
));

#[derive(Debug, Parser)]
#[command(name = "netguard", about = "XDP-based firewall and traffic observability agent")]
struct Cli {
    /// Path to the configuration file. Defaults to `config.yaml`, falling
    /// back to `config.json`, in the current directory.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("PANIC in netguard: {info}");
        default_hook(info);
    }));

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netguard=info".into()),
        )
        .init();

    let config_path = match cli.config {
        Some(path) => path,
        None => match resolve_default_config_path() {
            Some(path) => path,
            None => {
                tracing::error!("no config.yaml or config.json found in the current directory");
                std::process::exit(1);
            }
        },
    };

    let exit_code = Supervisor::new(config_path, XDP_PROGRAM).run().await;
    std::process::exit(exit_code);
}

/// Probes `config.yaml` then `config.json` in the current directory, the
/// same fallback order as the original agent's default config discovery.
fn resolve_default_config_path() -> Option<PathBuf> {
    for candidate in ["config.yaml", "config.json"] {
        let path = Path::new(candidate);
        if path.exists() {
            return Some(path.to_path_buf());
        }
    }
    None
}
