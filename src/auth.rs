use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Identity of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl Session {
    pub fn new(uid: impl Into<String>) -> Self {
        Session {
            uid: uid.into(),
            email: None,
            display_name: None,
        }
    }
}

pub trait AuthProvider: Send + Sync {
    fn current_session(&self) -> Option<Session>;
}

/// Session held in memory, set by sign-in and cleared by sign-out.
#[derive(Default)]
pub struct LocalAuth {
    session: RwLock<Option<Session>>,
}

impl LocalAuth {
    pub fn new(session: Option<Session>) -> Self {
        LocalAuth {
            session: RwLock::new(session),
        }
    }

    pub fn sign_in(&self, session: Session) {
        log::info!("Signed in as {}", session.uid);
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = Some(session);
    }

    pub fn sign_out(&self) {
        log::info!("Signed out");
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl AuthProvider for LocalAuth {
    fn current_session(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_in_and_out() {
        let auth = LocalAuth::default();
        assert!(auth.current_session().is_none());
        auth.sign_in(Session::new("u1"));
        assert_eq!(auth.current_session().map(|s| s.uid), Some("u1".to_string()));
        auth.sign_out();
        assert!(auth.current_session().is_none());
    }
}
