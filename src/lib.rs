#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(feature = "ffi")]
pub mod ffi;

pub mod error;
pub mod host;
pub mod image;
pub mod kext;
pub mod patcher;
pub mod platform;
pub mod scan;

pub use error::{Error, Result};
pub use patcher::{PatchContext, PatchStatus};
pub use platform::{Fixability, Platform};
