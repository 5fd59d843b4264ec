//! SDH-prefixed error types with structured error codes.
//!
//! Two layers: [`SdhError`] covers configuration, parsing, and harness plumbing;
//! [`BenchError`] is the typed boot/content failure hierarchy the executor keys
//! its retry policy on. Raw tester fault strings are classified into a
//! `BenchError` variant at the boundary, never sniffed downstream.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, SdhError>;

/// Top-level error type for the Silicon Debug Harness.
#[derive(Debug, Error)]
pub enum SdhError {
    #[error("[SDH-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[SDH-1002] missing file: {path}")]
    MissingFile { path: PathBuf },

    #[error("[SDH-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[SDH-1101] invalid recipe entry '{key}': {details}")]
    InvalidRecipe { key: String, details: String },

    #[error("[SDH-1102] unknown test type '{value}' (expected Loops, Sweep, or Shmoo)")]
    UnknownTestType { value: String },

    #[error("[SDH-1103] shmoo label '{label}' not found in {path}")]
    ShmooLabelNotFound { label: String, path: PathBuf },

    #[error("[SDH-2001] bench failure: {source}")]
    Bench {
        #[from]
        source: BenchError,
    },

    #[error("[SDH-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[SDH-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[SDH-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[SDH-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[SDH-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl SdhError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "SDH-1001",
            Self::MissingFile { .. } => "SDH-1002",
            Self::ConfigParse { .. } => "SDH-1003",
            Self::InvalidRecipe { .. } => "SDH-1101",
            Self::UnknownTestType { .. } => "SDH-1102",
            Self::ShmooLabelNotFound { .. } => "SDH-1103",
            Self::Bench { .. } => "SDH-2001",
            Self::Serialization { .. } => "SDH-2101",
            Self::Sql { .. } => "SDH-2102",
            Self::Io { .. } => "SDH-3002",
            Self::ChannelClosed { .. } => "SDH-3003",
            Self::Runtime { .. } => "SDH-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Bench { source } => source.is_recoverable(),
            Self::Io { .. }
            | Self::Sql { .. }
            | Self::ChannelClosed { .. }
            | Self::Runtime { .. } => true,
            _ => false,
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for SdhError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for SdhError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for SdhError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

// ──────────────────── bench error hierarchy ────────────────────

/// Tester-fault substrings that indicate a wedged register-access layer rather
/// than a bad boot configuration. Matched case-insensitively.
const TRANSIENT_FAULT_MARKERS: [&str; 2] = ["rsp 10", "regaccfail"];

/// Boot and content failures reported by the bench layer.
///
/// The executor's recovery policy dispatches on the variant, not on message
/// text: `Interrupted` maps straight to a cancelled iteration, transient
/// connection faults get a power-cycle plus register-access recovery window,
/// and everything else gets a plain power-cycle retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BenchError {
    /// A cancel request arrived while the bench operation was in flight.
    #[error("operation interrupted by cancel request")]
    Interrupted,

    /// The register-access path to the tester wedged mid-operation.
    #[error("transient tester connection fault: {details}")]
    TransientConnection { details: String },

    /// The unit refused the requested boot configuration.
    #[error("boot configuration failure: {details}")]
    BootConfiguration { details: String },

    /// The content session failed outside of a pass/fail verdict.
    #[error("content session failure: {details}")]
    Content { details: String },

    /// A postcode was not observed within the allotted window.
    #[error("postcode {expected:#010x} not reached within {waited_secs}s")]
    PostcodeTimeout { expected: u32, waited_secs: u64 },
}

impl BenchError {
    /// Classify a raw tester fault string from the probe layer.
    ///
    /// "RSP 10" and "regaccfail" markers identify a wedged register-access
    /// path; anything else is treated as a boot configuration failure.
    #[must_use]
    pub fn classify_boot_fault(details: &str) -> Self {
        let lowered = details.to_lowercase();
        if TRANSIENT_FAULT_MARKERS.iter().any(|m| lowered.contains(m)) {
            Self::TransientConnection {
                details: details.to_string(),
            }
        } else {
            Self::BootConfiguration {
                details: details.to_string(),
            }
        }
    }

    /// Transient connection faults need the long recovery path (power cycle,
    /// recovery delay, IPC reconnect) instead of a plain power-cycle retry.
    #[must_use]
    pub const fn is_transient_connection(&self) -> bool {
        matches!(self, Self::TransientConnection { .. })
    }

    /// Whether a retry after recovery has a chance of succeeding.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Interrupted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_errors() -> Vec<SdhError> {
        vec![
            SdhError::InvalidConfig {
                details: String::new(),
            },
            SdhError::MissingFile {
                path: PathBuf::new(),
            },
            SdhError::ConfigParse {
                context: "",
                details: String::new(),
            },
            SdhError::InvalidRecipe {
                key: String::new(),
                details: String::new(),
            },
            SdhError::UnknownTestType {
                value: String::new(),
            },
            SdhError::ShmooLabelNotFound {
                label: String::new(),
                path: PathBuf::new(),
            },
            SdhError::Bench {
                source: BenchError::Interrupted,
            },
            SdhError::Serialization {
                context: "",
                details: String::new(),
            },
            SdhError::Sql {
                context: "",
                details: String::new(),
            },
            SdhError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            SdhError::ChannelClosed { component: "" },
            SdhError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = all_errors();
        let codes: Vec<&str> = errors.iter().map(SdhError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn error_codes_have_sdh_prefix() {
        for err in &all_errors() {
            assert!(
                err.code().starts_with("SDH-"),
                "code {} must start with SDH-",
                err.code()
            );
        }
    }

    #[test]
    fn error_display_includes_code() {
        let err = SdhError::InvalidConfig {
            details: "bad value".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("SDH-1001"), "display should contain code: {msg}");
        assert!(
            msg.contains("bad value"),
            "display should contain details: {msg}"
        );
    }

    #[test]
    fn classify_rsp10_as_transient() {
        let err = BenchError::classify_boot_fault("probe error: RSP 10 while writing MSR");
        assert!(err.is_transient_connection());
        assert!(err.is_recoverable());
    }

    #[test]
    fn classify_regaccfail_as_transient_case_insensitive() {
        let err = BenchError::classify_boot_fault("ipc RegAccFail on thread 0");
        assert!(err.is_transient_connection());
    }

    #[test]
    fn classify_other_fault_as_boot_configuration() {
        let err = BenchError::classify_boot_fault("MRC training failed on channel 2");
        assert_eq!(
            err,
            BenchError::BootConfiguration {
                details: "MRC training failed on channel 2".to_string()
            }
        );
        assert!(!err.is_transient_connection());
        assert!(err.is_recoverable());
    }

    #[test]
    fn interrupted_is_not_recoverable() {
        assert!(!BenchError::Interrupted.is_recoverable());
    }

    #[test]
    fn bench_error_wraps_into_sdh() {
        let err: SdhError = BenchError::PostcodeTimeout {
            expected: 0xef00_00ff,
            waited_secs: 60,
        }
        .into();
        assert_eq!(err.code(), "SDH-2001");
        assert!(err.to_string().contains("0xef0000ff"));
    }

    #[test]
    fn retryable_classification() {
        assert!(
            SdhError::Bench {
                source: BenchError::TransientConnection {
                    details: String::new()
                }
            }
            .is_retryable()
        );
        assert!(
            !SdhError::Bench {
                source: BenchError::Interrupted
            }
            .is_retryable()
        );
        assert!(
            !SdhError::InvalidRecipe {
                key: "Loops".to_string(),
                details: String::new()
            }
            .is_retryable()
        );
    }
}
