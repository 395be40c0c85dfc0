use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Seconds shaved off the JWT `exp` claim so a request never races expiry.
pub const EXPIRY_MARGIN_SECS: i64 = 30;

/// What survives a restart: enough to skip the login screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub server_url: String,
    pub token: String,
    /// Unix seconds. `None` when the token carries no readable `exp` claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expiry: Option<i64>,
}

impl StoredSession {
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        let token = token.into();
        let token_expiry = token_expiry_from_jwt(&token);
        Self {
            server_url: server_url.into(),
            token,
            token_expiry,
        }
    }

    pub fn is_expired(&self, now_secs: i64) -> bool {
        self.token_expiry.is_some_and(|exp| now_secs >= exp)
    }
}

#[derive(Deserialize)]
struct Claims {
    exp: Option<i64>,
}

/// Reads the `exp` claim of a JWT without verifying it. Opaque tokens yield
/// `None`.
pub fn token_expiry_from_jwt(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    claims.exp.map(|exp| exp - EXPIRY_MARGIN_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt_with(payload: &str) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    #[test]
    fn expiry_applies_margin() {
        let token = jwt_with(r#"{"sub":"u1","exp":1000}"#);
        assert_eq!(token_expiry_from_jwt(&token), Some(970));
    }

    #[test]
    fn opaque_token_has_no_expiry() {
        assert_eq!(token_expiry_from_jwt("not-a-jwt"), None);
        assert_eq!(token_expiry_from_jwt("a.!!!.c"), None);
        let no_exp = jwt_with(r#"{"sub":"u1"}"#);
        assert_eq!(token_expiry_from_jwt(&no_exp), None);
    }

    #[test]
    fn session_expiry_check() {
        let session = StoredSession::new("http://x", jwt_with(r#"{"exp":1000}"#));
        assert!(!session.is_expired(969));
        assert!(session.is_expired(970));

        let opaque = StoredSession::new("http://x", "opaque");
        assert!(!opaque.is_expired(i64::MAX));
    }
}
