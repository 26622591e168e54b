//! CLI Exit Codes
//!
//! Standard exit codes for CLI operations and automation.

use crate::config::ConfigError;
use crate::core::transport::LinkError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// Send or receive timeout
    pub const TIMEOUT: u8 = 4;

    /// File not found
    pub const FILE_NOT_FOUND: u8 = 6;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Protocol error
    pub const PROTOCOL_ERROR: u8 = 9;

    /// User cancelled
    pub const CANCELLED: u8 = 11;

    /// Device not found
    pub const DEVICE_NOT_FOUND: u8 = 12;

    /// Device busy
    pub const DEVICE_BUSY: u8 = 13;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;

    /// Exit code for a link error
    pub fn for_link_error(err: &LinkError) -> u8 {
        match err {
            LinkError::SendTimeout(_) | LinkError::ReceiveTimeout(_) => Self::TIMEOUT,
            LinkError::NoPortFound => Self::DEVICE_NOT_FOUND,
            LinkError::NoPortSelected => Self::CANCELLED,
            LinkError::PortNotFound(_) => Self::PORT_NOT_FOUND,
            LinkError::PermissionDenied(_) => Self::PERMISSION_DENIED,
            LinkError::ReaderLocked | LinkError::WriterLocked => Self::DEVICE_BUSY,
            LinkError::ConnectionFailed(_)
            | LinkError::Disconnected
            | LinkError::TransportNotInitialized => Self::CONNECTION_FAILED,
            LinkError::ShortResponse { .. }
            | LinkError::CommandRejected { .. }
            | LinkError::Packet(_) => Self::PROTOCOL_ERROR,
            LinkError::InvalidConfiguration(_) => Self::CONFIG_ERROR,
            LinkError::Transport(_) | LinkError::Io(_) => Self::ERROR,
        }
    }

    /// Exit code for any error reaching `main`
    pub fn for_error(err: &anyhow::Error) -> u8 {
        for cause in err.chain() {
            if let Some(link) = cause.downcast_ref::<LinkError>() {
                return Self::for_link_error(link);
            }
            if cause.downcast_ref::<ConfigError>().is_some() {
                return Self::CONFIG_ERROR;
            }
            if let Some(io) = cause.downcast_ref::<std::io::Error>() {
                return match io.kind() {
                    std::io::ErrorKind::NotFound => Self::FILE_NOT_FOUND,
                    std::io::ErrorKind::PermissionDenied => Self::PERMISSION_DENIED,
                    _ => Self::ERROR,
                };
            }
        }
        Self::ERROR
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        4 => "Timeout",
        6 => "File not found",
        7 => "Permission denied",
        8 => "Configuration error",
        9 => "Protocol error",
        11 => "Operation cancelled",
        12 => "Device not found",
        13 => "Device busy",
        14 => "Port not found",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 4, 6, 7, 8, 9, 11, 12, 13, 14, 127] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}

/// Convert an exit code constant into a process exit code
pub fn to_exit_code(code: u8) -> ExitCode {
    ExitCode::from(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_link_error_codes() {
        assert_eq!(ExitCodes::for_link_error(&LinkError::ReceiveTimeout(6000)), ExitCodes::TIMEOUT);
        assert_eq!(ExitCodes::for_link_error(&LinkError::NoPortFound), ExitCodes::DEVICE_NOT_FOUND);
        assert_eq!(ExitCodes::for_link_error(&LinkError::WriterLocked), ExitCodes::DEVICE_BUSY);
        assert_eq!(
            ExitCodes::for_link_error(&LinkError::PortNotFound("COM9".into())),
            ExitCodes::PORT_NOT_FOUND
        );
    }

    #[test]
    fn test_code_found_through_context() {
        let err = Err::<(), _>(LinkError::ShortResponse { expected: 10, got: 2 })
            .context("reading flash id")
            .unwrap_err();
        assert_eq!(ExitCodes::for_error(&err), ExitCodes::PROTOCOL_ERROR);

        let plain = anyhow::anyhow!("something else");
        assert_eq!(ExitCodes::for_error(&plain), ExitCodes::ERROR);
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(exit_code_description(ExitCodes::TIMEOUT), "Timeout");
        assert_eq!(exit_code_description(200), "Unknown error");
    }
}
