//! Cleanup command handler

use std::sync::Arc;

use crate::clock::SystemClock;
use crate::config::Config;
use crate::db::Store;
use crate::services::{LogNotifier, SecurityServices};

pub async fn cmd_cleanup(
    config: &Config,
    sessions_days: Option<i64>,
    audit_days: Option<i64>,
) -> anyhow::Result<()> {
    let store = Store::new(&config.general.database_path).await?;
    let services =
        SecurityServices::build(&store, config, Arc::new(SystemClock), Arc::new(LogNotifier));

    let sessions_days = sessions_days.unwrap_or(config.maintenance.session_retention_days);
    let audit_days = audit_days.unwrap_or(config.audit.retention_days);

    let report = services.maintenance.run_cleanup(sessions_days).await?;
    let audit_deleted = services.audit.cleanup(audit_days).await?;
    services.audit.flush().await;

    println!("Cleanup finished");
    println!("{:-<40}", "");
    println!("  Sessions deleted:      {}", report.sessions_deleted);
    println!("  Parent links cleared:  {}", report.parent_links_cleared);
    println!("  Reset tokens deleted:  {}", report.reset_tokens_deleted);
    println!("  Audit entries deleted: {audit_deleted}");

    Ok(())
}
