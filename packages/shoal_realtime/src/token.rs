//! Access-token seam between the session layer and the socket.

/// Source of the current access token.
///
/// Tokens rotate while the socket is down (silent refresh), so the
/// connection manager asks for the token at every connect instead of
/// capturing it once at construction.
pub trait TokenSource: Send + Sync {
    /// The current access token, or `None` when no session exists.
    fn access_token(&self) -> Option<String>;
}

/// A fixed token, for tests and one-shot tools.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenSource for StaticToken {
    fn access_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}
