//! Utility modules for kubeform

pub mod errors;
pub mod logger;
pub mod progress;
pub mod prompt;

// Re-export commonly used items
pub use errors::KubeformError;
pub use logger::{log_error, log_info, log_warn};
pub use prompt::{confirm, confirm_unless};
