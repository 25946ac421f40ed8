//! Error handling for fg-core
//!
//! Re-exports the unified error type from fg-error.

pub use fg_error::{FramegovError, Result};
