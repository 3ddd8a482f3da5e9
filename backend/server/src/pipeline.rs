//! # Admission
//!
//! Every `POST` goes through the same fixed stages. The first stage to refuse ends the
//! request with exactly one reply; nothing after it runs.
//!
//! 1. **ReceivedRaw**: content type must be JSON (400), a content length must be present (411)
//! 2. **Parsed**: body must decode as JSON (400)
//! 3. **StructurallyValid**: `verb`, `data` and `time.conn_init` present and typed (400)
//! 4. **FreshnessValid**: `conn_init` not after the server clock (406)
//! 5. **CsrfChecked**: exempt verb, or a live token (401)
//! 6. **Dispatched**: handler found and did not fault (500)
//! 7. **Responded**: envelope built, `conn_server` stamped (200)
use std::{fmt, sync::Arc};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use clerk::{Clock, TokenStore};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    dispatch::{Outcome, VerbDispatcher},
    envelope::{RequestEnvelope, ResponseEnvelope},
    error::AppError,
    gate::{CsrfGate, Decision, VerbPolicy},
    utils::is_json,
    validator::RequestValidator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ReceivedRaw,
    Parsed,
    StructurallyValid,
    FreshnessValid,
    CsrfChecked,
    Dispatched,
    Responded,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What the transport hands over for one request.
#[derive(Debug, Clone, Copy)]
pub struct Inbound<'a> {
    pub content_type: Option<&'a str>,
    pub content_length: Option<&'a str>,
    pub body: &'a [u8],
}

/// Refusal from some stage, already wrapped in its reply envelope.
#[derive(Debug)]
pub struct Rejection {
    pub stage: Stage,
    pub error: AppError,
    pub envelope: ResponseEnvelope,
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (self.error.status(), Json(self.envelope)).into_response()
    }
}

pub struct AdmissionPipeline {
    validator: RequestValidator,
    gate: CsrfGate,
    dispatcher: VerbDispatcher,
    clock: Arc<dyn Clock>,
}

impl AdmissionPipeline {
    pub fn new(tokens: Arc<TokenStore>, dispatcher: VerbDispatcher, clock: Arc<dyn Clock>) -> Self {
        Self {
            validator: RequestValidator::new(clock.clone()),
            gate: CsrfGate::new(VerbPolicy::default(), tokens),
            dispatcher,
            clock,
        }
    }

    pub async fn admit(&self, inbound: Inbound<'_>) -> Response {
        match self.run(inbound).await {
            Ok(response) => response,
            Err(rejection) => {
                warn!(
                    stage = %rejection.stage,
                    status = rejection.error.status().as_u16(),
                    "Rejected request: {}",
                    rejection.error
                );
                rejection.into_response()
            }
        }
    }

    async fn run(&self, inbound: Inbound<'_>) -> Result<Response, Rejection> {
        let message = self.parse(inbound)?;
        let (verb, conn_init) = salvage(&message);

        let request = self.validator.structure(message).map_err(|e| {
            self.reject(Stage::StructurallyValid, verb.as_deref(), conn_init, e)
        })?;

        self.validator
            .freshness(&request)
            .map_err(|e| self.refuse(Stage::FreshnessValid, &request, e))?;

        match self.gate.decide(&request.verb, request.anticsrf.as_deref()) {
            Decision::Exempt => debug!(verb = %request.verb, "Exempt verb"),
            Decision::Admitted(info) => {
                debug!(verb = %request.verb, expires_at = info.expires_at, "Token admitted")
            }
            Decision::Rejected(reason) => {
                return Err(self.refuse(Stage::CsrfChecked, &request, reason.into()));
            }
        }

        let dispatched = self
            .dispatcher
            .dispatch(&request)
            .await
            .map_err(|e| self.refuse(Stage::Dispatched, &request, e))?;

        let data = match dispatched.reply.outcome {
            Outcome::Ok => dispatched.reply.data,
            Outcome::Deferred(response) => return Ok(response),
            Outcome::Error { status, message } => {
                return Err(self.refuse(
                    Stage::Dispatched,
                    &request,
                    AppError::Handler { status, message },
                ));
            }
        };

        let envelope = ResponseEnvelope::success(
            &request,
            data,
            self.clock.now_micros(),
            dispatched.issued.map(|token| token.value),
        );
        debug!(stage = %Stage::Responded, response = %envelope.response, "Replying");

        Ok((StatusCode::OK, Json(envelope)).into_response())
    }

    fn parse(&self, inbound: Inbound<'_>) -> Result<Value, Rejection> {
        if !inbound.content_type.is_some_and(is_json) {
            return Err(self.reject(Stage::ReceivedRaw, None, None, AppError::NonJsonContent));
        }

        let Some(length) = inbound.content_length else {
            return Err(self.reject(Stage::ReceivedRaw, None, None, AppError::LengthRequired));
        };

        if length.trim().parse::<u64>().is_err() {
            return Err(self.reject(
                Stage::ReceivedRaw,
                None,
                None,
                AppError::MalformedPayload(format!("bad content-length: {length}")),
            ));
        }

        serde_json::from_slice(inbound.body).map_err(|e| {
            self.reject(
                Stage::Parsed,
                None,
                None,
                AppError::MalformedPayload(e.to_string()),
            )
        })
    }

    fn refuse(&self, stage: Stage, request: &RequestEnvelope, error: AppError) -> Rejection {
        self.reject(
            stage,
            Some(&request.verb),
            Some(request.time.conn_init),
            error,
        )
    }

    fn reject(
        &self,
        stage: Stage,
        verb: Option<&str>,
        conn_init: Option<i64>,
        error: AppError,
    ) -> Rejection {
        let envelope =
            ResponseEnvelope::failure(verb, conn_init, &error, self.clock.now_micros());

        Rejection {
            stage,
            error,
            envelope,
        }
    }
}

/// Verb and `conn_init` of a parsed message that may still fail the structure check, so the
/// rejection can be named after the verb.
fn salvage(message: &Value) -> (Option<String>, Option<i64>) {
    let verb = message
        .get("verb")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let conn_init = message.pointer("/time/conn_init").and_then(Value::as_i64);

    (verb, conn_init)
}
