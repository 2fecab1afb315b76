//! Create-admin command handler

use anyhow::Context;
use serde_json::json;
use std::sync::Arc;

use crate::clock::SystemClock;
use crate::config::Config;
use crate::db::Store;
use crate::services::tokens::{normalize_email, valid_email};
use crate::services::{AuditEntry, AuditEventType, LogNotifier, SecurityServices};

pub const ADMIN_PASSWORD_ENV: &str = "WARDEN_ADMIN_PASSWORD";

pub async fn cmd_create_admin(config: &Config, email: &str) -> anyhow::Result<()> {
    let email = normalize_email(email);
    if !valid_email(&email) {
        anyhow::bail!("Invalid email address: {email}");
    }

    let store = Store::new(&config.general.database_path).await?;
    let services =
        SecurityServices::build(&store, config, Arc::new(SystemClock), Arc::new(LogNotifier));
    let now = services.clock.now();

    if let Some(user) = store.get_user_by_email(&email).await? {
        store.set_user_admin(user.id, true, now).await?;
        println!("Promoted existing account {email} (id {}) to admin.", user.id);
        return Ok(());
    }

    let password = std::env::var(ADMIN_PASSWORD_ENV)
        .with_context(|| format!("{ADMIN_PASSWORD_ENV} must be set to create a new admin"))?;
    if password.chars().count() < config.security.min_password_length {
        anyhow::bail!(
            "Password must be at least {} characters",
            config.security.min_password_length
        );
    }

    let hash = services.hasher.hash(&password).await?;
    let user = store.create_user(&email, Some(hash), true, now).await?;

    services.audit.log(
        AuditEntry::new(AuditEventType::Register)
            .user(user.id)
            .data(json!({ "source": "cli", "is_admin": true })),
    );
    services.audit.flush().await;

    println!("Created admin {email} (id {}).", user.id);
    Ok(())
}
