//! CLI command implementations.

pub mod auth;
pub mod init;
pub mod records;
pub mod status;
pub mod sync;
