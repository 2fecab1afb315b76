pub use super::audit_logs::Entity as AuditLogs;
pub use super::password_reset_tokens::Entity as PasswordResetTokens;
pub use super::sessions::Entity as Sessions;
pub use super::users::Entity as Users;
