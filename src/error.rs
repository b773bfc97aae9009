//! Error types for the lid wake patcher.

use thiserror::Error;

/// Result type alias using our error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Conditions that abort a single patch attempt, or registration as a whole.
///
/// Apart from [`Error::Registration`], none of these are fatal: the attempt is logged and
/// dropped, and other framebuffers still get their own chance when they load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("failed to register kext load callback: {0}")]
    Registration(String),

    #[error("cannot find {symbol}")]
    SymbolNotFound { symbol: &'static str },

    #[error("{symbol} resolved to 0x{addr:X}, outside of the loaded image")]
    SymbolOutsideImage { symbol: &'static str, addr: u64 },

    #[error("cannot find platform-id near {symbol} in {kext}")]
    PlatformIdNotFound {
        kext: &'static str,
        symbol: &'static str,
    },

    #[error("patch target at image offset 0x{offset:X} is out of bounds (image size: 0x{size:X})")]
    TargetOutOfBounds { offset: usize, size: usize },
}
