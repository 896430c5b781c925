//! CLI subcommand implementations.

pub mod analyze;
pub mod anonymize;
pub mod util;
