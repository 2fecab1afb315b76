mod admin;
mod cleanup;
mod init;

pub use admin::cmd_create_admin;
pub use cleanup::cmd_cleanup;
pub use init::cmd_init;
