//! Command-line surface for the headless client shell.

pub mod actions;
pub mod commands;
pub mod dispatch;
pub mod globals;
pub mod start;
pub mod telemetry;

pub use start::start;
