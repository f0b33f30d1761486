//! Connection-time identity resolution.

use std::collections::HashMap;

use parley_shared::constants::{QUERY_TOKEN, QUERY_USER_ID};
use parley_shared::UserId;

use crate::auth::{TokenIssuer, TokenRejection};

/// Resolves the query parameters of a WebSocket upgrade to an identity.
///
/// `Ok(None)` means the connection stays untracked: it still receives
/// presence broadcasts but is never registered. `Err` means the connection
/// presented a credential and it was refused.
pub trait ConnectIdentifier: Send + Sync {
    fn identify(&self, params: &HashMap<String, String>)
        -> Result<Option<UserId>, TokenRejection>;
}

/// Trusts the clear-text `userId` parameter.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryIdentifier;

impl ConnectIdentifier for QueryIdentifier {
    fn identify(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<Option<UserId>, TokenRejection> {
        Ok(params.get(QUERY_USER_ID).and_then(|raw| UserId::parse(raw)))
    }
}

/// Requires a signed session token in the `token` parameter.
#[derive(Clone)]
pub struct TokenIdentifier {
    issuer: TokenIssuer,
}

impl TokenIdentifier {
    pub fn new(issuer: TokenIssuer) -> Self {
        Self { issuer }
    }
}

impl ConnectIdentifier for TokenIdentifier {
    fn identify(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<Option<UserId>, TokenRejection> {
        match params.get(QUERY_TOKEN).map(|t| t.trim()) {
            None | Some("") => Ok(None),
            Some(token) => self.issuer.verify(token).map(Some),
        }
    }
}
