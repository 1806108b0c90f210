//! Pairing and bearer-token authentication.
//!
//! Devices pair once with a shared secret and receive an opaque
//! session token with an expiry. Tokens are random hex strings held
//! in memory; a restart revokes everything, which is acceptable for a
//! LAN service where re-pairing is one tap.

use std::collections::HashMap;
use std::sync::RwLock;

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// Session token lifetime.
const TOKEN_TTL_HOURS: i64 = 24;

/// Pairing secret length in bytes (32 hex characters).
const PAIRING_BYTES: usize = 16;

/// Session token length in bytes (64 hex characters).
const TOKEN_BYTES: usize = 32;

struct TokenEntry {
    device: String,
    expires: DateTime<Utc>,
}

/// Issues and validates bearer tokens against a fixed pairing secret.
pub struct AuthService {
    pairing_token: String,
    tokens: RwLock<HashMap<String, TokenEntry>>,
}

impl AuthService {
    /// Uses the configured pairing secret, or generates one.
    pub fn new(pairing_token: Option<String>) -> Self {
        let pairing_token = pairing_token.unwrap_or_else(|| random_hex(PAIRING_BYTES));
        Self {
            pairing_token,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// The secret a new device must present to pair.
    pub fn pairing_token(&self) -> &str {
        &self.pairing_token
    }

    /// Checks a presented pairing secret in constant time.
    pub fn validate_pairing(&self, secret: &str) -> bool {
        constant_time_eq(secret, &self.pairing_token)
    }

    /// Exchanges the pairing secret for a session token bound to a
    /// device name. Returns `None` when the secret is wrong.
    pub fn pair(&self, secret: &str, device: &str) -> Option<String> {
        if !self.validate_pairing(secret) {
            return None;
        }
        let token = random_hex(TOKEN_BYTES);
        self.tokens.write().expect("tokens lock").insert(
            token.clone(),
            TokenEntry {
                device: device.to_string(),
                expires: Utc::now() + Duration::hours(TOKEN_TTL_HOURS),
            },
        );
        tracing::info!(%device, "device paired");
        Some(token)
    }

    /// Resolves a session token to the device it was issued to.
    /// Expired tokens are removed on the spot.
    pub fn validate(&self, token: &str) -> Option<String> {
        let mut tokens = self.tokens.write().expect("tokens lock");
        match tokens.get(token) {
            Some(entry) if entry.expires > Utc::now() => Some(entry.device.clone()),
            Some(_) => {
                tokens.remove(token);
                None
            }
            None => None,
        }
    }

    /// Number of unexpired session tokens.
    pub fn session_count(&self) -> usize {
        let now = Utc::now();
        self.tokens
            .read()
            .expect("tokens lock")
            .values()
            .filter(|e| e.expires > now)
            .count()
    }
}

/// Pulls a bearer token from the `Authorization` header or, for
/// clients that cannot set headers on an upgrade request, from the
/// `token` query parameter.
pub fn token_from_request(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }

    let query = query?;
    query.split('&').find_map(|pair| {
        pair.strip_prefix("token=")
            .map(|t| t.to_string())
            .filter(|t| !t.is_empty())
    })
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill(&mut buf[..]);
    hex::encode(buf)
}

/// Constant-time string comparison, to keep pairing attempts from
/// leaking prefix matches through timing.
fn constant_time_eq(received: &str, expected: &str) -> bool {
    if received.len() != expected.len() {
        return false;
    }
    let mut diff = 0u8;
    for (a, b) in received.bytes().zip(expected.bytes()) {
        diff |= a ^ b;
    }
    diff == 0
}
