//! Helpers shared by the `praefect` binary's subcommands.

mod logging;

pub use logging::{init_logging, LogArgs, LogFormat};

/// Helper trait for exiting the process early on a fatal startup error
/// (config load, listener bind, initial node dial) instead of
/// unwinding through a `main` full of `match`.
pub trait OrBail<T> {
    fn or_bail(self, message: &str) -> T;
}

impl<T, E> OrBail<T> for Result<T, E>
where
    E: std::fmt::Display + std::fmt::Debug,
{
    fn or_bail(self, message: &str) -> T {
        match self {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!(error_details = ?e, message);
                tracing::error!(error = %e, message);
                std::process::exit(1);
            }
        }
    }
}
