//! # Dispatch
//!
//! Verb name to handler table, built once at startup.
//!
//! A handler gets the request `data` and a [`VerbContext`] holding the shared collaborators.
//! Tokens must be issued through the context: they reach the caller only if the handler
//! finishes with [`Outcome::Ok`], and are revoked otherwise. A handler returning `Err` or
//! panicking becomes a 500 with a diagnostic id; the cause only goes to the log.
use std::{collections::HashMap, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use axum::{http::StatusCode, response::Response};
use clerk::{ClerkError, Token, TokenStore};
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::{
    database::DocumentStore, envelope::RequestEnvelope, error::AppError,
    identity::IdentityVerifier, utils::diagnostic_id,
};

pub enum Outcome {
    Ok,
    Error { status: StatusCode, message: String },
    /// The handler wrote the whole reply itself.
    Deferred(Response),
}

pub struct Reply {
    pub data: Value,
    pub outcome: Outcome,
}

impl Reply {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            outcome: Outcome::Ok,
        }
    }

    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            data: Value::Null,
            outcome: Outcome::Error {
                status,
                message: message.into(),
            },
        }
    }

    pub fn deferred(response: Response) -> Self {
        Self {
            data: Value::Null,
            outcome: Outcome::Deferred(response),
        }
    }
}

#[async_trait]
pub trait VerbHandler: Send + Sync {
    async fn call(&self, data: Map<String, Value>, ctx: &VerbContext) -> anyhow::Result<Reply>;
}

/// Collaborators shared by every handler.
#[derive(Clone)]
pub struct Services {
    pub tokens: Arc<TokenStore>,
    pub documents: Arc<DocumentStore>,
    pub identity: Arc<dyn IdentityVerifier>,
}

pub struct VerbContext {
    pub services: Services,
    /// Token the request was admitted with, if any.
    pub anticsrf: Option<String>,
    issued: Mutex<Vec<Token>>,
}

impl VerbContext {
    fn new(services: Services, anticsrf: Option<String>) -> Self {
        Self {
            services,
            anticsrf,
            issued: Mutex::new(Vec::new()),
        }
    }

    pub fn issue_token(&self) -> Result<Token, ClerkError> {
        let token = self.services.tokens.register()?;
        self.issued.lock().push(token.clone());

        Ok(token)
    }

    fn into_issued(self) -> Vec<Token> {
        self.issued.into_inner()
    }
}

/// Handler result plus the token to hand back, if one was issued.
pub struct Dispatched {
    pub reply: Reply,
    pub issued: Option<Token>,
}

pub struct VerbDispatcher {
    handlers: HashMap<String, Box<dyn VerbHandler>>,
    services: Services,
}

impl VerbDispatcher {
    pub fn new(services: Services) -> Self {
        Self {
            handlers: HashMap::new(),
            services,
        }
    }

    pub fn register(mut self, verb: &str, handler: impl VerbHandler + 'static) -> Self {
        self.handlers.insert(verb.to_string(), Box::new(handler));
        self
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub async fn dispatch(&self, request: &RequestEnvelope) -> Result<Dispatched, AppError> {
        let handler = self
            .handlers
            .get(&request.verb)
            .ok_or_else(|| AppError::BadVerb(request.verb.clone()))?;

        let ctx = VerbContext::new(self.services.clone(), request.anticsrf.clone());
        let result = AssertUnwindSafe(handler.call(request.data.clone(), &ctx))
            .catch_unwind()
            .await;
        let mut issued = ctx.into_issued();

        let cause = match result {
            Ok(Ok(reply)) => {
                if !matches!(reply.outcome, Outcome::Ok) {
                    self.withdraw(&request.verb, issued);
                    return Ok(Dispatched {
                        reply,
                        issued: None,
                    });
                }

                let delivered = issued.pop();
                self.withdraw(&request.verb, issued);
                return Ok(Dispatched {
                    reply,
                    issued: delivered,
                });
            }
            Ok(Err(e)) => format!("{e:#}"),
            Err(panic) => panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "handler panicked".to_string()),
        };

        self.withdraw(&request.verb, issued);

        let id = diagnostic_id();
        error!(verb = %request.verb, %id, "Handler fault: {cause}");

        Err(AppError::HandlerFault { id })
    }

    /// Revokes tokens that will not reach the caller.
    fn withdraw(&self, verb: &str, tokens: Vec<Token>) {
        if tokens.is_empty() {
            return;
        }

        let revoked = self
            .services
            .tokens
            .revoke(tokens.iter().map(|token| token.value.as_str()));
        warn!(verb, revoked, "Withdrew undelivered tokens");
    }
}
