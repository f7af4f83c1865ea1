use anyhow::Result;
use std::io::Write;

use crate::state::Session;

/// Export session to CSV format, one row per hop
pub fn export_csv<W: Write>(session: &Session, mut writer: W) -> Result<()> {
    writeln!(writer, "path,ttl,address,success,rtt_ms")?;

    for (key, hops) in &session.paths {
        for hop in hops {
            writeln!(
                writer,
                "{},{},{},{},{:.3}",
                key,
                hop.ttl,
                hop.address_str(),
                hop.is_success(),
                hop.rtt.as_secs_f64() * 1000.0
            )?;
        }
    }

    Ok(())
}
