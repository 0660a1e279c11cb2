//! Public library modules for the CLI crate
pub mod init;
pub mod output;
