//! # docqa-cli
//!
//! The `docqa` command: manage a document library, build its index, and
//! ask questions answered from it.
//!
//! Settings come from the environment (and a `.env` file), then from
//! command-line flags, which win.

pub mod cli;
pub mod commands;
pub mod render;

pub use cli::{Backend, ChatCommand, Cli, Command};
pub use commands::run;
