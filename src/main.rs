use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::io::{self, Write};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::Args;
use mtrace::config::Settings;
use mtrace::export::{
    export_csv, export_json, export_summary_json, generate_report, render_summary,
};
use mtrace::probe::{check_permissions, resolve_local_ip};
use mtrace::state::Session;
use mtrace::trace::collect_paths;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    init_logging(&args);

    // Check permissions early
    if let Err(e) = check_permissions() {
        eprintln!("{}", permission_hint(&e));
        std::process::exit(1);
    }

    let settings = match args.config {
        Some(ref path) => Settings::read(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?,
        None => Settings::load(),
    };
    let config = args.trace_config(&settings);
    debug!(?config, "effective configuration");

    let local_ip = match args.src {
        Some(ip) => ip,
        None => resolve_local_ip(args.dest).context("Failed to determine the local IP address")?,
    };
    info!(%local_ip, remote_ip = %args.dest, paths = args.sports.len(), "starting traces");

    let started_at = Utc::now();
    let paths = collect_paths(local_ip, args.dest, &args.sports, &args.dports, &config).await;
    let session = Session::new(started_at, local_ip, args.dest, config, paths);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match (args.json, args.csv, args.summary_only) {
        (true, _, false) => {
            export_json(&session, &mut out)?;
            writeln!(out)?;
        }
        (true, _, true) => {
            export_summary_json(&session, &mut out)?;
            writeln!(out)?;
        }
        (false, true, _) => export_csv(&session, &mut out)?,
        (false, false, false) => generate_report(&session, &mut out)?,
        (false, false, true) => render_summary(&session, &mut out)?,
    }
    out.flush()?;

    Ok(())
}

/// Logs go to stderr; RUST_LOG takes precedence over -v
fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mtrace={}", args.log_level())));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn permission_hint(err: &io::Error) -> String {
    let binary_path = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "mtrace".to_string());

    format!(
        "Insufficient permissions for raw sockets ({}).\n\n\
         Fix options:\n\
         \u{2022} Run with sudo: sudo mtrace -d <destination>\n\
         \u{2022} Add capability: sudo setcap cap_net_raw+ep {}",
        err, binary_path
    )
}
