use thiserror::Error;

/// Failures that end a request. Per-action problems (element not found,
/// unknown action kind) are not errors at this level: they are recorded in
/// the per-action result list and the run continues.
#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("browser session unavailable: {0}")]
    SessionUnavailable(#[source] anyhow::Error),

    #[error("navigation to {url} failed after {attempts} attempts")]
    NavigationFailed {
        url: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// Non-fatal: logged by the caller, never blocks an automation run.
    #[error("cookie persistence failed: {0}")]
    CookiePersistence(String),
}

impl AutomationError {
    /// Underlying cause, for the `detail` half of an error response.
    pub fn detail(&self) -> Option<String> {
        match self {
            AutomationError::SessionUnavailable(source) => Some(format!("{source:#}")),
            AutomationError::NavigationFailed { source, .. } => Some(format!("{source:#}")),
            _ => None,
        }
    }
}
