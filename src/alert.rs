//! User-facing error reporting.

use tracing::error;

/// Surfaces backend failures to the user (toast, dialog, status line).
pub trait Alert: Send + Sync {
    fn error(&self, title: &str, message: &str);
}

/// Alert sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlert;

impl Alert for TracingAlert {
    fn error(&self, title: &str, message: &str) {
        error!(title, "{message}");
    }
}
