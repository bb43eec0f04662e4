//! Login flows and token persistence
//!
//! [`Application`] owns the transport client and the four persisted
//! tokens (UID, access token, refresh token, base64 salted key pass).
//! The embedding application registers handlers to persist the tokens
//! whenever the transport rotates them and to react to de-auth; the core
//! itself persists nothing.

use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};

use crate::api::{Auth, AuthObserver, ClientError, Connector, DriveClient, PasswordMode};
use crate::crypto::{armor, salt_key_pass, unarmor};
use crate::error::{DriveError, DriveResult};

/// Login inputs captured from the user.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// TOTP code, required when the account has a second factor.
    pub two_fa: String,
    /// Required when the account uses two-password mode.
    pub mailbox_password: String,
}

/// The persisted session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tokens {
    pub uid: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Base64-encoded salted key pass; unlocks the keyrings.
    pub salted_key_pass: String,
}

pub type TokensUpdatedHandler = Box<dyn Fn(&Tokens) + Send + Sync>;
pub type TokensExpiredHandler = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct AppInner {
    client: Option<Arc<dyn DriveClient>>,
    tokens: Option<Tokens>,
    on_tokens_updated: Vec<TokensUpdatedHandler>,
    on_tokens_expired: Vec<TokensExpiredHandler>,
}

/// Entry point: authenticates against the drive service and hands out
/// the client used by [`Session::open`](crate::session::Session::open).
#[derive(Clone)]
pub struct Application {
    connector: Arc<dyn Connector>,
    inner: Arc<Mutex<AppInner>>,
}

impl Application {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            inner: Arc::new(Mutex::new(AppInner::default())),
        }
    }

    /// Authenticate with captured credentials.
    ///
    /// Walks the full flow: credential check, optional second factor,
    /// optional mailbox password, key-salt lookup and salted key pass
    /// derivation. Credential errors come back synchronously.
    pub async fn login_with_credentials(&self, credentials: &Credentials) -> DriveResult<()> {
        if credentials.username.is_empty() || credentials.password.is_empty() {
            return Err(DriveError::UsernamePasswordMissing);
        }

        let (client, auth) = self
            .connector
            .login(&credentials.username, &credentials.password)
            .await?;

        if auth.two_factor {
            if credentials.two_fa.is_empty() {
                return Err(DriveError::TwoFactorTokenMissing);
            }
            client.submit_two_factor(&credentials.two_fa).await?;
        }

        let key_pass = match auth.password_mode {
            PasswordMode::Single => &credentials.password,
            PasswordMode::Two => {
                if credentials.mailbox_password.is_empty() {
                    return Err(DriveError::MailboxPasswordMissing);
                }
                &credentials.mailbox_password
            }
        };

        let salts = client.get_key_salts().await?;
        let user = client.get_user().await?;

        let primary_key = user
            .keys
            .iter()
            .find(|key| key.primary)
            .or_else(|| user.keys.first())
            .ok_or_else(|| ClientError::status(422, "user has no keys"))?;
        let salt = salts
            .iter()
            .find(|salt| salt.key_id == primary_key.id)
            .ok_or_else(|| ClientError::status(422, "no salt for primary key"))?;

        let salted = salt_key_pass(key_pass.as_bytes(), &unarmor(&salt.salt)?);

        let tokens = Tokens {
            uid: auth.uid.clone(),
            access_token: auth.access_token.clone(),
            refresh_token: auth.refresh_token.clone(),
            salted_key_pass: armor(&salted),
        };

        self.install(client, tokens);
        Ok(())
    }

    /// Restore a session from previously persisted tokens.
    pub fn login_with_tokens(&self, tokens: Tokens) {
        let client =
            self.connector
                .restore(&tokens.uid, &tokens.access_token, &tokens.refresh_token);
        self.install(client, tokens);
    }

    fn install(&self, client: Arc<dyn DriveClient>, tokens: Tokens) {
        client.set_auth_observer(Arc::new(Observer {
            inner: Arc::downgrade(&self.inner),
        }));

        let mut inner = self.inner.lock().expect("application lock poisoned");
        inner.client = Some(client);
        inner.tokens = Some(tokens);
    }

    pub fn client(&self) -> Option<Arc<dyn DriveClient>> {
        self.inner
            .lock()
            .expect("application lock poisoned")
            .client
            .clone()
    }

    pub fn tokens(&self) -> Option<Tokens> {
        self.inner
            .lock()
            .expect("application lock poisoned")
            .tokens
            .clone()
    }

    /// Register a handler fired whenever the token set is rotated.
    pub fn on_tokens_updated(&self, handler: TokensUpdatedHandler) {
        self.inner
            .lock()
            .expect("application lock poisoned")
            .on_tokens_updated
            .push(handler);
    }

    /// Register a handler fired when the session is de-authenticated.
    pub fn on_tokens_expired(&self, handler: TokensExpiredHandler) {
        self.inner
            .lock()
            .expect("application lock poisoned")
            .on_tokens_expired
            .push(handler);
    }
}

/// Bridges transport auth callbacks back into the application state.
struct Observer {
    inner: Weak<Mutex<AppInner>>,
}

impl AuthObserver for Observer {
    fn tokens_updated(&self, auth: &Auth) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut inner = inner.lock().expect("application lock poisoned");

        // The salted key pass never rotates with the transport tokens.
        let salted_key_pass = inner
            .tokens
            .as_ref()
            .map(|t| t.salted_key_pass.clone())
            .unwrap_or_default();

        let tokens = Tokens {
            uid: auth.uid.clone(),
            access_token: auth.access_token.clone(),
            refresh_token: auth.refresh_token.clone(),
            salted_key_pass,
        };

        inner.tokens = Some(tokens.clone());
        for handler in &inner.on_tokens_updated {
            handler(&tokens);
        }
    }

    fn tokens_expired(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let inner = inner.lock().expect("application lock poisoned");
        for handler in &inner.on_tokens_expired {
            handler();
        }
    }
}
