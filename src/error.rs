//! Error handling for MCU Link
//!
//! Every fallible operation in the crate returns [`Result`]. The variants
//! follow the failure classes of the acquisition pipeline: link-level
//! transport failures, exhausted connect retries, unreadable descriptor
//! tables, and single-variable read/write failures.

use thiserror::Error;

/// Main error type for MCU Link operations
#[derive(Error, Debug)]
pub enum McuLinkError {
    /// Probe or link unavailable, or a link-level I/O failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Every connect attempt failed
    #[error("Connect failed after {attempts} attempt(s): {last_error}")]
    Connect { attempts: u32, last_error: String },

    /// Descriptor table unreadable or malformed
    #[error("Discovery error at address 0x{address:08X}: {message}")]
    Discovery { address: u64, message: String },

    /// A single variable could not be read
    #[error("Read error at address 0x{address:08X}: {message}")]
    Read { address: u64, message: String },

    /// A single variable could not be written
    #[error("Write error at address 0x{address:08X}: {message}")]
    Write { address: u64, message: String },

    /// Errors reported by probe-rs
    #[error("Probe error: {0}")]
    Probe(#[from] probe_rs::Error),

    /// Errors related to debug probe operations
    #[error("Debug probe error: {0}")]
    DebugProbe(#[from] probe_rs::probe::DebugProbeError),

    /// Errors related to the target registry
    #[error("Registry error: {0}")]
    Registry(#[from] probe_rs::config::RegistryError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<McuLinkError>,
    },
}

/// Coarse failure class, used to label user-visible errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transport,
    Connect,
    Discovery,
    Read,
    Write,
    Config,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorClass::Transport => "transport",
            ErrorClass::Connect => "connect",
            ErrorClass::Discovery => "discovery",
            ErrorClass::Read => "read",
            ErrorClass::Write => "write",
            ErrorClass::Config => "config",
        };
        f.write_str(label)
    }
}

impl McuLinkError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        McuLinkError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Build a transport error from anything printable
    pub fn transport(message: impl std::fmt::Display) -> Self {
        McuLinkError::Transport(message.to_string())
    }

    /// The failure class of this error, looking through added context
    pub fn class(&self) -> ErrorClass {
        match self {
            McuLinkError::Transport(_)
            | McuLinkError::Probe(_)
            | McuLinkError::DebugProbe(_)
            | McuLinkError::Registry(_)
            | McuLinkError::Io(_) => ErrorClass::Transport,
            McuLinkError::Connect { .. } => ErrorClass::Connect,
            McuLinkError::Discovery { .. } => ErrorClass::Discovery,
            McuLinkError::Read { .. } => ErrorClass::Read,
            McuLinkError::Write { .. } => ErrorClass::Write,
            McuLinkError::Config(_) | McuLinkError::Serialization(_) => ErrorClass::Config,
            McuLinkError::WithContext { source, .. } => source.class(),
        }
    }
}

/// Result type alias for MCU Link operations
pub type Result<T> = std::result::Result<T, McuLinkError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = McuLinkError::Transport("no probe attached".to_string());
        assert_eq!(err.to_string(), "Transport error: no probe attached");
    }

    #[test]
    fn test_connect_error_display() {
        let err = McuLinkError::Connect {
            attempts: 3,
            last_error: "probe busy".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Connect failed after 3 attempt(s): probe busy"
        );
    }

    #[test]
    fn test_read_error_address_format() {
        let err = McuLinkError::Read {
            address: 0x2000_0000,
            message: "Access denied".to_string(),
        };
        assert!(err.to_string().contains("0x20000000"));
        assert!(err.to_string().contains("Access denied"));
    }

    #[test]
    fn test_class_survives_context() {
        let err = McuLinkError::Discovery {
            address: 0x080F_0000,
            message: "bad magic".to_string(),
        }
        .with_context("Rediscovery");
        assert_eq!(err.class(), ErrorClass::Discovery);
        assert!(err.to_string().starts_with("Rediscovery: "));
    }

    #[test]
    fn test_result_ext_context() {
        let res: Result<()> = Err(McuLinkError::transport("link lost"));
        let err = res.context("Polling").unwrap_err();
        assert_eq!(err.class(), ErrorClass::Transport);
        assert!(err.to_string().contains("link lost"));
    }
}
