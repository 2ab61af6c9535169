use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid query: {0}")]
    Query(String),

    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("not signed in")]
    NotSignedIn,

    #[error("connection to backend closed")]
    Disconnected,

    #[error("backend error: {0}")]
    Backend(String),

    #[error("{0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Success,
    Warning,
    Error,
}

/// A blocking, user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub kind: AlertKind,
    pub title: String,
    pub message: String,
}

impl Alert {
    pub fn new(kind: AlertKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Alert {
            kind,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Alert::new(AlertKind::Success, "Success", message)
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Alert::new(AlertKind::Warning, title, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Alert::new(AlertKind::Error, "Error", message)
    }

    /// Alert for a failed mutation, e.g. `Alert::failed("delete appointment")`.
    pub fn failed(action: &str) -> Self {
        Alert::error(format!("Failed to {}.", action))
    }

    pub fn is_success(&self) -> bool {
        self.kind == AlertKind::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_alert_names_action() {
        let alert = Alert::failed("delete appointment");
        assert_eq!(alert.title, "Error");
        assert_eq!(alert.message, "Failed to delete appointment.");
        assert!(!alert.is_success());
        assert!(Alert::success("Saved.").is_success());
    }

    #[test]
    fn test_not_found_message() {
        let err = Error::NotFound {
            collection: "appointments".to_string(),
            id: "a1".to_string(),
        };
        assert_eq!(err.to_string(), "document appointments/a1 not found");
    }
}
