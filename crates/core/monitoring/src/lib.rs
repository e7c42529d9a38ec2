//! Logging and diagnostics utilities shared by the Mend workspace crates.

pub mod logging;
