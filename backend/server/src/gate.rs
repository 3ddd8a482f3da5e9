use std::{collections::HashSet, sync::Arc};

use clerk::{TokenStore, Validity};

use crate::error::AppError;

/// Verbs callable without an anti-CSRF token.
pub const EXEMPT_VERBS: [&str; 2] = ["ping", "gapi_validate"];

#[derive(Debug, Clone)]
pub struct VerbPolicy {
    exempt: HashSet<String>,
}

impl VerbPolicy {
    pub fn is_exempt(&self, verb: &str) -> bool {
        self.exempt.contains(verb)
    }
}

impl Default for VerbPolicy {
    fn default() -> Self {
        Self {
            exempt: EXEMPT_VERBS.iter().map(|verb| verb.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenInfo {
    pub expires_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingToken,
    ExpiredToken { expired_at: i64 },
    NeverRegistered,
}

impl From<RejectReason> for AppError {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::MissingToken => AppError::MissingToken,
            RejectReason::ExpiredToken { expired_at } => AppError::ExpiredToken { expired_at },
            RejectReason::NeverRegistered => AppError::NeverRegistered,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Exempt,
    Admitted(TokenInfo),
    Rejected(RejectReason),
}

pub struct CsrfGate {
    policy: VerbPolicy,
    tokens: Arc<TokenStore>,
}

impl CsrfGate {
    pub fn new(policy: VerbPolicy, tokens: Arc<TokenStore>) -> Self {
        Self { policy, tokens }
    }

    pub fn decide(&self, verb: &str, provided: Option<&str>) -> Decision {
        if self.policy.is_exempt(verb) {
            return Decision::Exempt;
        }

        let Some(token) = provided.filter(|token| !token.is_empty()) else {
            return Decision::Rejected(RejectReason::MissingToken);
        };

        match self.tokens.validate(token) {
            Validity::Valid { expires_at } => Decision::Admitted(TokenInfo { expires_at }),
            Validity::ExpiredKnown { expired_at } => {
                Decision::Rejected(RejectReason::ExpiredToken { expired_at })
            }
            Validity::Unknown => Decision::Rejected(RejectReason::NeverRegistered),
        }
    }
}
