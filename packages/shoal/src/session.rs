//! Auth session store: the token pair and current user, persisted across
//! restarts, with a silent-refresh loop.
//!
//! The store is the only writer of `tokens.toml`. The file always carries
//! both fixed keys — `access_token` and `refresh_token` — written together
//! on every token change and deleted together on logout, never one without
//! the other.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shoal_realtime::TokenSource;

use crate::api::{ApiClient, ApiError};
use crate::models::User;

/// On-disk token file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenFile {
    access_token: String,
    refresh_token: String,
}

#[derive(Debug, Default)]
struct SessionState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    user: Option<User>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not logged in")]
    NotAuthenticated,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("token storage: {0}")]
    Storage(#[from] std::io::Error),

    #[error("token file is corrupt: {0}")]
    Corrupt(#[from] toml::de::Error),

    #[error("encoding token file: {0}")]
    Encode(#[from] toml::ser::Error),
}

pub struct SessionStore {
    api: ApiClient,
    tokens_path: PathBuf,
    state: RwLock<SessionState>,
    /// Stops the silent-refresh loop; cancelled on logout or disposal.
    refresh_cancel: CancellationToken,
}

impl SessionStore {
    /// Create the store, hydrating the token pair from disk when present.
    pub fn load(api: ApiClient, tokens_path: PathBuf) -> Result<Self, SessionError> {
        let state = match std::fs::read_to_string(&tokens_path) {
            Ok(raw) => {
                let file: TokenFile = toml::from_str(&raw)?;
                debug!(path = %tokens_path.display(), "restored tokens");
                SessionState {
                    access_token: Some(file.access_token),
                    refresh_token: Some(file.refresh_token),
                    user: None,
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => SessionState::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            api,
            tokens_path,
            state: RwLock::new(state),
            refresh_cancel: CancellationToken::new(),
        })
    }

    pub fn is_authenticated(&self) -> bool {
        let state = self.state.read().unwrap();
        state.access_token.is_some() && state.refresh_token.is_some()
    }

    pub fn access_token(&self) -> Option<String> {
        self.state.read().unwrap().access_token.clone()
    }

    pub fn user(&self) -> Option<User> {
        self.state.read().unwrap().user.clone()
    }

    /// Log in: obtain the token pair, persist it, then fetch the profile.
    ///
    /// A failed profile fetch fails the whole login and clears the tokens
    /// again — no half-authenticated session without a user is ever left
    /// behind.
    pub async fn login(&self, username: &str, password: &str) -> Result<User, SessionError> {
        let pair = self.api.login(username, password).await?;
        self.store_tokens(pair.access, pair.refresh)?;
        match self.fetch_profile().await {
            Ok(user) => {
                info!(username = %user.username, "logged in");
                Ok(user)
            }
            Err(err) => {
                warn!(error = %err, "profile fetch failed; rolling back login");
                self.clear();
                Err(err)
            }
        }
    }

    /// Adopt a token pair issued out-of-band (registration logs straight
    /// in: the backend returns tokens with the created account).
    pub fn adopt(&self, access: String, refresh: String, user: User) -> Result<(), SessionError> {
        self.store_tokens(access, refresh)?;
        self.state.write().unwrap().user = Some(user);
        Ok(())
    }

    /// Restore a persisted session: one profile fetch validates the access
    /// token, with one refresh-and-retry on an unauthorized response. Any
    /// remaining auth failure logs the session out; transient failures
    /// keep the tokens and surface the error.
    pub async fn restore(&self) -> Result<Option<User>, SessionError> {
        if !self.is_authenticated() {
            return Ok(None);
        }
        match self.fetch_profile().await {
            Ok(user) => Ok(Some(user)),
            Err(SessionError::Api(err)) if err.unauthorized() => {
                debug!("access token rejected; refreshing");
                if let Err(err) = self.refresh().await {
                    warn!(error = %err, "refresh failed; logging out");
                    self.logout();
                    return Ok(None);
                }
                match self.fetch_profile().await {
                    Ok(user) => Ok(Some(user)),
                    Err(err) => {
                        warn!(error = %err, "refreshed token rejected; logging out");
                        self.logout();
                        Ok(None)
                    }
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Exchange the refresh token for a new access token. Only the access
    /// token changes; the refresh token is retained. On failure the caller
    /// must log out.
    pub async fn refresh(&self) -> Result<(), SessionError> {
        let refresh_token = self
            .state
            .read()
            .unwrap()
            .refresh_token
            .clone()
            .ok_or(SessionError::NotAuthenticated)?;
        let refreshed = self.api.refresh(&refresh_token).await?;
        self.state.write().unwrap().access_token = Some(refreshed.access);
        self.persist()?;
        debug!("access token refreshed");
        Ok(())
    }

    /// End the session: clear both tokens and the user, delete the token
    /// file, stop the refresh loop. Idempotent.
    pub fn logout(&self) {
        self.refresh_cancel.cancel();
        self.clear();
        info!("logged out");
    }

    /// Cancel background work without clearing the session.
    pub fn dispose(&self) {
        self.refresh_cancel.cancel();
    }

    /// Start the silent-refresh loop: one repeating timer for the store's
    /// lifetime. A failed tick forces logout.
    pub fn spawn_refresh_loop(self: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let store = self;
        let cancel = store.refresh_cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; the session was just
            // validated, so skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if !store.is_authenticated() {
                            break;
                        }
                        if let Err(err) = store.refresh().await {
                            warn!(error = %err, "silent refresh failed; logging out");
                            store.logout();
                            break;
                        }
                    }
                }
            }
            debug!("refresh loop stopped");
        })
    }

    async fn fetch_profile(&self) -> Result<User, SessionError> {
        let token = self.access_token().ok_or(SessionError::NotAuthenticated)?;
        let user = self.api.current_user(&token).await?;
        self.state.write().unwrap().user = Some(user.clone());
        Ok(user)
    }

    fn store_tokens(&self, access: String, refresh: String) -> Result<(), SessionError> {
        {
            let mut state = self.state.write().unwrap();
            state.access_token = Some(access);
            state.refresh_token = Some(refresh);
        }
        self.persist()
    }

    fn clear(&self) {
        *self.state.write().unwrap() = SessionState::default();
        match std::fs::remove_file(&self.tokens_path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(error = %err, "could not remove token file"),
        }
    }

    /// Write both fixed keys, never one without the other.
    fn persist(&self) -> Result<(), SessionError> {
        let file = {
            let state = self.state.read().unwrap();
            match (&state.access_token, &state.refresh_token) {
                (Some(access), Some(refresh)) => TokenFile {
                    access_token: access.clone(),
                    refresh_token: refresh.clone(),
                },
                _ => return Ok(()),
            }
        };
        std::fs::write(&self.tokens_path, toml::to_string(&file)?)?;
        Ok(())
    }
}

impl TokenSource for SessionStore {
    fn access_token(&self) -> Option<String> {
        SessionStore::access_token(self)
    }
}
