//! Gantry: run project commands inside a long-lived, lazily built container.
//!
//! A session packages the project root into a build context, makes sure the
//! session container is running (rebuilding it only when it is not), and then
//! attaches an interactive exec to the local terminal.

pub mod archive;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod session;
pub mod terminal;

#[cfg(test)]
mod testing;

pub use error::Error;
pub use session::{Orchestrator, RunRequest, SessionReport};
