//! `cncd`: one device session on one endpoint, driven from a terminal or a
//! parent process over stdin/stdout.

pub mod cli;
pub mod config;
pub mod console;
pub mod logging;
