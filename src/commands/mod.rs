//! Command implementations behind the CLI.

mod install;
mod status;

pub use install::{ConsoleReporter, install};
pub use status::{render_status, status};
