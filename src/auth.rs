//! Staff login. A successful login records the user id in the session under
//! a fresh token; logout destroys the session.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use ulid::Ulid;

use crate::forms::Form;
use crate::session::{SessionStore, SessionToken, UserId};
use crate::workflow::AppContext;

pub const LOGGED_IN: &str = "Logged in successfully";
pub const INVALID_CREDENTIALS: &str = "Invalid login credentials";
pub const LOG_IN_FIRST: &str = "Log in first";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login form failed validation")]
    Validation(Form),
    #[error("invalid login credentials")]
    InvalidCredentials,
}

/// Checks staff credentials.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, email: &str, password: &str) -> Result<UserId, AuthError>;
}

/// A single staff account configured at startup. Passwords are compared as
/// given; with no password configured every login is refused.
#[derive(Debug, Clone)]
pub struct StaticAuthenticator {
    user_id: UserId,
    email: String,
    password: Option<String>,
}

impl StaticAuthenticator {
    pub fn new(email: impl Into<String>, password: Option<String>) -> Self {
        Self {
            user_id: Ulid::new(),
            email: email.into(),
            password,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, email: &str, password: &str) -> Result<UserId, AuthError> {
        match &self.password {
            Some(expected) if email == self.email && password == expected => Ok(self.user_id),
            _ => Err(AuthError::InvalidCredentials),
        }
    }
}

/// Credentials as posted from the login form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl LoginForm {
    /// Both fields present and a plausible email. The returned form never
    /// carries the password.
    pub fn validate(&self) -> Result<(), Form> {
        let mut form = Form::new([
            ("email", self.email.trim()),
            ("password", self.password.as_str()),
        ]);
        form.required(&["email", "password"]);
        form.is_email("email");
        form.redact("password");
        if form.valid() { Ok(()) } else { Err(form) }
    }
}

/// Authenticate and bind the user to a renewed session. Returns the token
/// the client must use from now on.
pub async fn login(
    ctx: &AppContext,
    auth: &dyn Authenticator,
    token: SessionToken,
    input: &LoginForm,
) -> Result<SessionToken, AuthError> {
    input.validate().map_err(AuthError::Validation)?;

    let user_id = match auth.authenticate(input.email.trim(), &input.password).await {
        Ok(id) => id,
        Err(e) => {
            tracing::info!(email = %input.email.trim(), "login refused");
            ctx.session(token).put_error(INVALID_CREDENTIALS);
            return Err(e);
        }
    };

    let renewed = ctx.sessions.renew(token);
    let session = ctx.session(renewed);
    session.put_user_id(user_id);
    session.put_flash(LOGGED_IN);
    tracing::info!(%user_id, "logged in");
    Ok(renewed)
}

/// Drop the session and everything in it. Returns a fresh, empty token.
pub fn logout(ctx: &AppContext, token: SessionToken) -> SessionToken {
    if let Some(user_id) = ctx.session(token).user_id() {
        tracing::info!(%user_id, "logged out");
    }
    ctx.sessions.destroy(token);
    ctx.sessions.renew(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio_test::{assert_err, assert_ok};

    use crate::engine::Engine;
    use crate::notify::MailQueue;
    use crate::repository::EngineRepository;
    use crate::session::{InMemorySessions, ReservationDraft};

    fn ctx(name: &str) -> AppContext {
        let dir = std::env::temp_dir().join("roombook_test_auth");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        let engine = Arc::new(Engine::new(path).unwrap());
        let (mail, _rx) = MailQueue::channel(8, "desk@roombook.test");
        AppContext {
            repo: Arc::new(EngineRepository::new(engine, Duration::from_secs(3))),
            sessions: Arc::new(InMemorySessions::new(Duration::from_secs(600))),
            mail,
        }
    }

    const STAFF: &str = "admin@roombook.test";

    fn staff() -> StaticAuthenticator {
        StaticAuthenticator::new(STAFF, Some("hunter22".into()))
    }

    fn creds(email: &str, password: &str) -> LoginForm {
        LoginForm {
            email: email.into(),
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn login_renews_token_and_records_user() {
        let ctx = ctx("login.wal");
        let auth = staff();
        let token = Ulid::new();
        ctx.session(token).put_draft(ReservationDraft::default());

        let renewed = assert_ok!(login(&ctx, &auth, token, &creds(STAFF, "hunter22")).await);
        assert_ne!(renewed, token);
        assert!(!ctx.session(token).is_authenticated());

        let session = ctx.session(renewed);
        assert_eq!(session.user_id(), Some(auth.user_id()));
        assert_eq!(session.pop_flash().as_deref(), Some(LOGGED_IN));
        assert!(session.draft().is_some());
    }

    #[tokio::test]
    async fn wrong_password_sets_error() {
        let ctx = ctx("wrong_password.wal");
        let token = Ulid::new();
        let err = assert_err!(login(&ctx, &staff(), token, &creds(STAFF, "nope")).await);
        assert!(matches!(err, AuthError::InvalidCredentials));
        let session = ctx.session(token);
        assert!(!session.is_authenticated());
        assert_eq!(session.pop_error().as_deref(), Some(INVALID_CREDENTIALS));
    }

    #[tokio::test]
    async fn no_configured_password_refuses_everyone() {
        let auth = StaticAuthenticator::new(STAFF, None);
        assert_err!(auth.authenticate(STAFF, "").await);
        assert_err!(auth.authenticate(STAFF, "anything").await);
    }

    #[tokio::test]
    async fn invalid_form_keeps_email_but_not_password() {
        let ctx = ctx("login_form.wal");
        let input = creds("not-an-email", "secret");
        let err = assert_err!(login(&ctx, &staff(), Ulid::new(), &input).await);
        let form = match err {
            AuthError::Validation(form) => form,
            other => panic!("expected validation error, got {other:?}"),
        };
        assert_eq!(form.get("email"), "not-an-email");
        assert_eq!(form.error("email"), Some("Invalid email address"));
        assert_eq!(form.get("password"), "");
        assert!(form.error("password").is_none());

        let form = LoginForm::default().validate().unwrap_err();
        assert_eq!(form.error("password"), Some("This field cannot be blank"));
    }

    #[tokio::test]
    async fn logout_destroys_session() {
        let ctx = ctx("logout.wal");
        let auth = staff();
        let input = creds(STAFF, "hunter22");
        let token = assert_ok!(login(&ctx, &auth, Ulid::new(), &input).await);

        let fresh = logout(&ctx, token);
        assert_ne!(fresh, token);
        assert!(!ctx.session(token).is_authenticated());
        assert!(!ctx.session(fresh).is_authenticated());
        assert!(ctx.session(token).pop_flash().is_none());
    }
}
