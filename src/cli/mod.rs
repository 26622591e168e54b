//! CLI Module
//!
//! Provides command-line interface functionality including:
//! - Exit codes for automation
//! - Text and JSON rendering of results

pub mod exit_codes;
pub mod output;

pub use exit_codes::{exit_code_description, print_exit_codes, to_exit_code, ExitCodes};
pub use output::{format_ports, format_probe, hex_dump, OutputFormat, ProbeReport};
