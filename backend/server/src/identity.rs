//! # Identity
//!
//! Boundary to the service that checks externally issued identity assertions.
//!
//! The signature check itself is delegated to Google's `tokeninfo` endpoint. What comes back
//! is judged here: issuer, timestamps and audience. Every judgement is a [`Verification`]
//! value; [`VerifierError`] is reserved for the service itself misbehaving.
use std::sync::Arc;

use async_trait::async_trait;
use clerk::{Clock, MICROS_PER_SEC};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::database::DocumentStore;

pub const TOKENINFO_ENDPOINT: &str = "https://oauth2.googleapis.com/tokeninfo";
pub const ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Claims {
    pub subject: String,
    pub email: String,
    pub hosted_domain: Option<String>,
    pub issued_at: i64,
    pub expires_at: i64,
    pub is_elevated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Verified(Claims),
    WrongIssuer(String),
    Expired { issued_at: i64, expires_at: i64 },
    WrongAudience(String),
}

impl Verification {
    pub fn explanation(&self) -> String {
        match self {
            Verification::Verified(claims) => format!("verified {}", claims.email),
            Verification::WrongIssuer(issuer) => format!("Token has wrong issuer: {issuer}"),
            Verification::Expired {
                issued_at,
                expires_at,
            } => format!(
                "Token has expired or invalid timestamps: issued-at {issued_at} expires {expires_at}"
            ),
            Verification::WrongAudience(audience) => {
                format!("Token has wrong API token id: {audience}")
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum VerifierError {
    #[error("Identity service unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),

    #[error("Identity service answered garbage: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, assertion: &str) -> Result<Verification, VerifierError>;
}

/// Accounts allowed to edit the menu.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElevatedIds {
    #[serde(default)]
    pub devs: Vec<String>,
    #[serde(default)]
    pub sau9: Vec<String>,
}

impl ElevatedIds {
    pub fn is_elevated(&self, email: &str, hosted_domain: Option<&str>) -> bool {
        let Some((id, domain)) = email.split_once('@') else {
            return false;
        };
        let id = id.to_string();

        (self.devs.contains(&id) && domain == "gmail.com")
            || (self.sau9.contains(&id) && domain == "sau9.org" && hosted_domain == Some("sau9.org"))
    }
}

/// Fields of a `tokeninfo` answer. Numbers arrive as strings.
#[derive(Debug, Deserialize)]
pub struct TokenInfo {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    #[serde(default)]
    pub email: String,
    pub hd: Option<String>,
    pub iat: Value,
    pub exp: Value,
}

/// Applies issuer, timestamp and audience rules. `now` is in µs.
pub fn judge(
    info: TokenInfo,
    client_id: &str,
    now: i64,
    elevated: &ElevatedIds,
) -> Result<Verification, VerifierError> {
    let issued_at = micros(&info.iat)
        .ok_or_else(|| VerifierError::Malformed(format!("iat {}", info.iat)))?;
    let expires_at = micros(&info.exp)
        .ok_or_else(|| VerifierError::Malformed(format!("exp {}", info.exp)))?;

    if !ISSUERS.contains(&info.iss.as_str()) {
        return Ok(Verification::WrongIssuer(info.iss));
    }

    if issued_at >= now || expires_at <= now {
        return Ok(Verification::Expired {
            issued_at,
            expires_at,
        });
    }

    if info.aud != client_id {
        return Ok(Verification::WrongAudience(info.aud));
    }

    let is_elevated = elevated.is_elevated(&info.email, info.hd.as_deref());

    Ok(Verification::Verified(Claims {
        subject: info.sub,
        email: info.email,
        hosted_domain: info.hd,
        issued_at,
        expires_at,
        is_elevated,
    }))
}

fn micros(seconds: &Value) -> Option<i64> {
    let seconds = match seconds {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.parse().ok()?,
        _ => return None,
    };

    seconds.checked_mul(MICROS_PER_SEC)
}

pub struct GoogleVerifier {
    client: Client,
    endpoint: String,
    client_id: String,
    clock: Arc<dyn Clock>,
    documents: Arc<DocumentStore>,
}

impl GoogleVerifier {
    pub fn new(client_id: String, clock: Arc<dyn Clock>, documents: Arc<DocumentStore>) -> Self {
        Self {
            client: Client::new(),
            endpoint: TOKENINFO_ENDPOINT.to_string(),
            client_id,
            clock,
            documents,
        }
    }
}

#[async_trait]
impl IdentityVerifier for GoogleVerifier {
    async fn verify(&self, assertion: &str) -> Result<Verification, VerifierError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("id_token", assertion)])
            .send()
            .await?;

        if response.status() == StatusCode::BAD_REQUEST {
            debug!("tokeninfo refused assertion");
            return Ok(Verification::WrongIssuer("unverified".to_string()));
        }

        let info: TokenInfo = response.error_for_status()?.json().await?;
        let elevated = self.documents.elevated_ids().await;

        judge(info, &self.client_id, self.clock.now_micros(), &elevated)
    }
}
