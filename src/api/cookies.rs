//! Session and CSRF cookies.
//!
//! The session cookie carries the serialized [`SessionData`] sealed with
//! AES-256-GCM, so the refresh token never leaves the server in clear text
//! and a tampered cookie simply fails to open.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use anyhow::{Context, Result};
use axum::http::{HeaderMap, HeaderValue, header::COOKIE};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use rand::Rng;
use tracing::warn;

use crate::config::Config;
use crate::services::SessionData;

pub const SESSION_COOKIE: &str = "warden_session";

const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct CookieCodec {
    cipher: Aes256Gcm,
    secure: bool,
    remember_me_secs: i64,
    csrf_cookie: String,
    csrf_max_age_secs: u64,
}

impl CookieCodec {
    pub fn from_config(config: &Config) -> Result<Self> {
        let key = if config.server.cookie_key.is_empty() {
            warn!("server.cookie_key is not set, sessions will not survive a restart");
            rand::rng().random::<[u8; 32]>().to_vec()
        } else {
            STANDARD
                .decode(config.server.cookie_key.trim())
                .context("server.cookie_key is not valid base64")?
        };

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| anyhow::anyhow!("server.cookie_key must decode to 32 bytes"))?;

        Ok(Self {
            cipher,
            secure: config.server.secure_cookies,
            remember_me_secs: config.session.remember_me_days * 24 * 60 * 60,
            csrf_cookie: config.csrf.cookie_name.clone(),
            csrf_max_age_secs: config.csrf.cookie_max_age_secs,
        })
    }

    #[must_use]
    pub fn csrf_cookie_name(&self) -> &str {
        &self.csrf_cookie
    }

    pub fn seal(&self, session: &SessionData) -> Result<String> {
        let json = serde_json::to_vec(session).context("Failed to serialize session")?;
        let nonce_bytes: [u8; NONCE_LEN] = rand::rng().random();

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), json.as_slice())
            .map_err(|_| anyhow::anyhow!("Failed to encrypt session cookie"))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(combined))
    }

    /// `None` for anything that does not decrypt to a session.
    #[must_use]
    pub fn open(&self, value: &str) -> Option<SessionData> {
        let combined = URL_SAFE_NO_PAD.decode(value.trim()).ok()?;
        if combined.len() <= NONCE_LEN {
            return None;
        }
        let (nonce, ciphertext) = combined.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .ok()?;
        serde_json::from_slice(&plain).ok()
    }

    /// Reads and opens the session cookie of a request.
    #[must_use]
    pub fn session_from_headers(&self, headers: &HeaderMap) -> Option<SessionData> {
        read_cookie(headers, SESSION_COOKIE).and_then(|value| self.open(&value))
    }

    pub fn session_cookie(&self, session: &SessionData) -> Result<HeaderValue> {
        let mut cookie = format!(
            "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Strict",
            self.seal(session)?
        );
        // Browser-session cookie unless the user asked to be remembered.
        if session.remember_me {
            cookie.push_str(&format!("; Max-Age={}", self.remember_me_secs));
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).context("Invalid session cookie")
    }

    pub fn csrf_cookie(&self, token: &str) -> Result<HeaderValue> {
        let mut cookie = format!(
            "{}={token}; Path=/; SameSite=Lax; Max-Age={}",
            self.csrf_cookie, self.csrf_max_age_secs
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).context("Invalid CSRF cookie")
    }

    pub fn clear_csrf_cookie(&self) -> Result<HeaderValue> {
        HeaderValue::from_str(&format!(
            "{}=; Path=/; SameSite=Lax; Max-Age=0",
            self.csrf_cookie
        ))
        .context("Invalid CSRF cookie")
    }
}

#[must_use]
pub fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static("warden_session=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0")
}

pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == name).then(|| val.trim().to_string())
        })
}
