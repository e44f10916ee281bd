//! SQLite database initialization for the document store

pub mod init;

pub use init::*;
