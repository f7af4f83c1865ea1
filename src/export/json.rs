use anyhow::Result;
use std::io::Write;

use crate::state::Session;

/// Export session to pretty-printed JSON
pub fn export_json<W: Write>(session: &Session, writer: W) -> Result<()> {
    serde_json::to_writer_pretty(writer, session)?;
    Ok(())
}

/// Export only the aggregate summary, in the compact form other tools consume
pub fn export_summary_json<W: Write>(session: &Session, writer: W) -> Result<()> {
    serde_json::to_writer(writer, &session.summary)?;
    Ok(())
}
