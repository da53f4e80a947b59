//! Access token parsing
//!
//! A stored token is either an opaque string or a form-encoded bag:
//!
//! ```text
//! access_token=eyJ...&token_type=DPoP&dpop_jkt=0ZcOCORZ...&exp=1767225600
//! ```

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use porter_domain::constants::{TOKEN_TYPE_BEARER, TOKEN_TYPE_DPOP};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("auth token is empty")]
    Empty,

    #[error("auth token has no access_token, id_token or token field")]
    MissingAccessToken,

    #[error("auth token exp is not unix seconds: {0}")]
    InvalidExpiry(String),

    #[error("DPoP token has no dpop_jkt holder key thumbprint")]
    MissingHolderKey,

    #[error("auth token expired at {0}")]
    Expired(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenType {
    #[default]
    Bearer,
    DPoP,
}

impl TokenType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bearer => TOKEN_TYPE_BEARER,
            Self::DPoP => TOKEN_TYPE_DPOP,
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    raw: String,
    access_token: String,
    refresh_token: Option<String>,
    token_type: TokenType,
    dpop_jkt: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

// Keeps secrets out of logs.
impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("token_type", &self.token_type)
            .field("dpop_jkt", &self.dpop_jkt)
            .field("expires_at", &self.expires_at)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

impl AuthToken {
    /// Parse an opaque or form-encoded token.
    ///
    /// # Errors
    /// See [`TokenError`].
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(TokenError::Empty);
        }

        let mut access = None;
        let mut refresh = None;
        let mut jkt = None;
        let mut declared_type = None;
        let mut exp = None;
        let mut recognised = false;

        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            let value = value.trim().to_string();
            match key.as_ref() {
                "access_token" | "id_token" | "token" => {
                    recognised = true;
                    if access.is_none() && !value.is_empty() {
                        access = Some(value);
                    }
                }
                "refresh_token" => {
                    recognised = true;
                    refresh = Some(value).filter(|v| !v.is_empty());
                }
                "dpop_jkt" => {
                    recognised = true;
                    jkt = Some(value).filter(|v| !v.is_empty());
                }
                "token_type" => {
                    recognised = true;
                    declared_type = Some(value);
                }
                "exp" => {
                    recognised = true;
                    exp = Some(value);
                }
                _ => {}
            }
        }

        if !recognised {
            return Ok(Self {
                raw: raw.to_string(),
                access_token: raw.to_string(),
                refresh_token: None,
                token_type: TokenType::Bearer,
                dpop_jkt: None,
                expires_at: None,
            });
        }

        let access_token = access.ok_or(TokenError::MissingAccessToken)?;
        let token_type = match declared_type.as_deref() {
            Some(t) if t.eq_ignore_ascii_case(TOKEN_TYPE_DPOP) => TokenType::DPoP,
            Some(t) if !t.is_empty() => TokenType::Bearer,
            _ if jkt.is_some() => TokenType::DPoP,
            _ => TokenType::Bearer,
        };
        if token_type == TokenType::DPoP && jkt.is_none() {
            return Err(TokenError::MissingHolderKey);
        }

        let expires_at = exp
            .filter(|e| !e.is_empty())
            .map(|e| {
                e.parse::<i64>()
                    .ok()
                    .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                    .ok_or(TokenError::InvalidExpiry(e))
            })
            .transpose()?;

        Ok(Self {
            raw: raw.to_string(),
            access_token,
            refresh_token: refresh,
            token_type,
            dpop_jkt: jkt,
            expires_at,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn token_type(&self) -> TokenType {
        self.token_type
    }

    /// Thumbprint of the holder key a DPoP token is bound to
    pub fn dpop_jkt(&self) -> Option<&str> {
        self.dpop_jkt.as_deref()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Fail when the token is past its expiry.
    ///
    /// # Errors
    /// [`TokenError::Expired`].
    pub fn ensure_fresh(&self) -> Result<(), TokenError> {
        match self.expires_at {
            Some(exp) if self.is_expired() => Err(TokenError::Expired(exp)),
            _ => Ok(()),
        }
    }

    /// `Authorization` header value: `<type> <access-token>`.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}
