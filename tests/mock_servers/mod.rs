//! Mock servers for integration testing
//!
//! The CLI mock speaks the line protocol over a real TCP socket, so the
//! whole client stack runs unmodified against it.

pub mod cli;

pub use cli::MockCliServer;
