//! Inbound shared-secret check.
//!
//! A request is accepted when it carries the configured secret either as
//! `Authorization: Bearer <secret>` (scheme matched case-insensitively) or as
//! `x-api-key: <secret>`. The bearer header wins when both are present.

use http::HeaderMap;
use subtle::ConstantTimeEq;

const BEARER: &str = "bearer ";
const X_API_KEY: &str = "x-api-key";

#[derive(Debug, Clone, Default)]
pub struct InboundAuth {
    secret: Option<String>,
}

impl InboundAuth {
    /// An empty secret disables the check.
    pub fn new(secret: impl Into<String>) -> Self {
        let secret = secret.into();
        Self {
            secret: (!secret.is_empty()).then_some(secret),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    /// Whether the request headers present the configured secret.
    pub fn verify(&self, headers: &HeaderMap) -> bool {
        let Some(secret) = self.secret.as_deref() else {
            return true;
        };
        match presented_key(headers) {
            Some(key) => key.as_bytes().ct_eq(secret.as_bytes()).into(),
            None => false,
        }
    }
}

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            let v = v.trim();
            let prefix = v.get(..BEARER.len())?;
            prefix
                .eq_ignore_ascii_case(BEARER)
                .then(|| v[BEARER.len()..].trim())
        });

    bearer.or_else(|| {
        headers
            .get(X_API_KEY)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|k| !k.is_empty())
    })
}
