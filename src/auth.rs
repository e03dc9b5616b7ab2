use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

use crate::model::CourtState;
use crate::ratelimit::RateLimitStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Member,
}

/// Who is issuing a command. On the wire this is the login user name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn member(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Member,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Admin,
        }
    }

    /// Admin if the user name is listed in `admins`.
    pub fn from_login(user: &str, admins: &[String]) -> Self {
        if admins.iter().any(|a| a == user) {
            Self::admin(user)
        } else {
            Self::member(user)
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admins manage every court; owners manage their own.
    pub fn manages(&self, court: &CourtState) -> bool {
        self.is_admin() || court.owner_id == self.id
    }
}

/// Shared-password auth with per-user login throttling.
pub struct SpelplautAuthSource {
    password: String,
    limiter: Arc<dyn RateLimitStore>,
}

impl SpelplautAuthSource {
    pub fn new(password: String, limiter: Arc<dyn RateLimitStore>) -> Self {
        Self { password, limiter }
    }
}

impl std::fmt::Debug for SpelplautAuthSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpelplautAuthSource").finish_non_exhaustive()
    }
}

#[async_trait]
impl AuthSource for SpelplautAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = login.user().unwrap_or_default();
        if !self.limiter.allow(user, Instant::now()) {
            metrics::counter!(crate::observability::LOGINS_THROTTLED_TOTAL).increment(1);
            tracing::warn!(user, "login throttled");
            return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                "FATAL".into(),
                "08004".into(),
                "too many login attempts, try again later".into(),
            ))));
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OperatingWindow;
    use ulid::Ulid;

    #[test]
    fn roles_from_login() {
        let admins = vec!["admin".to_string(), "ops".to_string()];
        assert!(Actor::from_login("ops", &admins).is_admin());
        assert!(!Actor::from_login("alice", &admins).is_admin());
    }

    #[test]
    fn owners_manage_their_courts() {
        let window = OperatingWindow::new(360, 1320, None).unwrap();
        let court = CourtState::new(Ulid::new(), "Court 1".into(), "olle".into(), window, 60);
        assert!(Actor::member("olle").manages(&court));
        assert!(!Actor::member("alice").manages(&court));
        assert!(Actor::admin("root").manages(&court));
    }
}
