//! MiniFirewall: a rule store and packet classifier fed over a control
//! channel, plus the command-line tool that edits it.

pub mod cli;
pub mod codec;
pub mod control;
pub mod engine;
pub mod error;
pub mod models;
pub mod policy;
pub mod state;

pub use error::{MfwError, Result};
