//! Session token representation and expiry logic.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, saturating to zero on clock skew.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// The in-memory credential set of one signed-in session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_token: Option<String>,
    /// Unix seconds at which the access token stops being valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl TokenSet {
    /// Create a set holding only an access token with no known expiry.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            ..Self::default()
        }
    }

    /// Set the expiry to `expires_in_secs` seconds from now.
    #[must_use]
    pub fn with_expiry(mut self, expires_in_secs: u64) -> Self {
        self.expires_at = Some(unix_now().saturating_add(expires_in_secs));
        self
    }

    /// Attach a refresh token.
    #[must_use]
    pub fn with_refresh(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    #[must_use]
    pub fn with_identity(mut self, identity_token: impl Into<String>) -> Self {
        self.identity_token = Some(identity_token.into());
        self
    }

    /// Return `true` if the access token expires within `leeway`.
    ///
    /// A token without a recorded expiry never expires locally; the server
    /// still gets the final say through a 401.
    #[must_use]
    pub fn is_expired(&self, leeway: Duration) -> bool {
        let Some(expires_at) = self.expires_at else {
            return false;
        };
        unix_now().saturating_add(leeway.as_secs()) >= expires_at
    }

    /// The bearer credential to present: the identity token when the last
    /// exchange issued one, otherwise the access token.
    #[must_use]
    pub fn bearer(&self) -> Option<&str> {
        self.identity_token
            .as_deref()
            .or(self.access_token.as_deref())
    }

    /// Determine the usability of the session.
    #[must_use]
    pub fn state(&self, leeway: Duration) -> TokenState {
        let usable = self.bearer().is_some() && !self.is_expired(leeway);
        if usable {
            TokenState::Valid
        } else if self.refresh_token.is_some() {
            TokenState::Expired
        } else {
            TokenState::Invalid
        }
    }

    /// Build the set produced by a successful refresh exchange.
    ///
    /// The refresh token is rotated only when the server returns a new one.
    /// The identity token is never carried over from a previous exchange.
    #[must_use]
    pub fn from_exchange(response: TokenResponse, previous_refresh: Option<String>) -> Self {
        Self {
            access_token: Some(response.access_token),
            refresh_token: response.refresh_token.or(previous_refresh),
            identity_token: response.id_token,
            expires_at: response
                .expires_in
                .map(|secs| unix_now().saturating_add(secs)),
        }
    }
}

/// Describes the usability state of a [`TokenSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Valid,
    /// Expired or missing, but a refresh token is available for renewal.
    Expired,
    /// Nothing usable and nothing to refresh with; the user must sign in.
    Invalid,
}

/// Body of a successful `refresh_token` grant.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Keys under which a [`TokenSet`] is mirrored into a
/// [`TokenStore`](crate::TokenStore).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKey {
    AccessToken,
    RefreshToken,
    IdentityToken,
    ExpiresAt,
}

impl TokenKey {
    /// All keys, in persistence order.
    pub const ALL: [Self; 4] = [
        Self::AccessToken,
        Self::RefreshToken,
        Self::IdentityToken,
        Self::ExpiresAt,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::IdentityToken => "identity_token",
            Self::ExpiresAt => "expires_at",
        }
    }
}

impl fmt::Display for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TokenKey {
    type Err = crate::NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access_token" => Ok(Self::AccessToken),
            "refresh_token" => Ok(Self::RefreshToken),
            "identity_token" | "id_token" => Ok(Self::IdentityToken),
            "expires_at" => Ok(Self::ExpiresAt),
            other => Err(crate::NetworkError::Storage(format!(
                "unknown token key: {other}"
            ))),
        }
    }
}
