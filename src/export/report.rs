use std::io::Write;

use crate::state::{LastRouter, Session};

/// Print every traced path: its key, then one `TTL ADDRESS RTT` line per hop
pub fn render_paths<W: Write>(session: &Session, mut writer: W) -> std::io::Result<()> {
    for (key, hops) in &session.paths {
        writeln!(writer, "{}", key)?;
        for hop in hops {
            writeln!(writer, "\t{}", hop)?;
        }
    }
    Ok(())
}

/// Print success/failure counts and the routers failed paths stopped at
pub fn render_summary<W: Write>(session: &Session, mut writer: W) -> std::io::Result<()> {
    let summary = &session.summary;
    writeln!(
        writer,
        "{} of {} paths reached {} ({} failed)",
        summary.success,
        summary.total(),
        session.remote_ip,
        summary.failed
    )?;

    if summary.failed_pairs.is_empty() {
        return Ok(());
    }

    writeln!(writer)?;
    writeln!(writer, "{:<18} {:>6}  {}", "Last router", "Paths", "Failed pairs")?;
    writeln!(writer, "{}", "-".repeat(72))?;
    for (router, pairs) in &summary.failed_pairs {
        let count = summary
            .last_success_routers
            .get(router)
            .copied()
            .unwrap_or(pairs.len());
        let label = match router {
            LastRouter::Silent => "* (no reply)".to_string(),
            LastRouter::Router(ip) => ip.to_string(),
        };
        let pairs: Vec<String> = pairs.iter().map(ToString::to_string).collect();
        writeln!(writer, "{:<18} {:>6}  {}", label, count, pairs.join(", "))?;
    }
    Ok(())
}

/// Full text report: header, per-path hops, then the summary
pub fn generate_report<W: Write>(session: &Session, mut writer: W) -> std::io::Result<()> {
    writeln!(
        writer,
        "mtrace report {} -> {}",
        session.local_ip, session.remote_ip
    )?;
    writeln!(
        writer,
        "Started: {}",
        session.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    writeln!(
        writer,
        "Max TTL: {}  Timeout: {:?}  Deadline: {:?}",
        session.config.trace.max_ttl, session.config.trace.timeout, session.config.deadline
    )?;
    writeln!(writer)?;

    render_paths(session, &mut writer)?;
    writeln!(writer)?;
    render_summary(session, &mut writer)
}
