//! # Envelopes
//!
//! Wire shapes wrapping every request and reply.
//!
//! Request
//! ```json
//! { "verb": "view_menu", "data": {}, "time": { "conn_init": 1700000000000000 }, "anticsrf": "..." }
//! ```
//!
//! Reply
//! ```json
//! { "response": "view_menu_reply", "data": {},
//!   "time": { "conn_init": 1700000000000000, "conn_server": 1700000000000420 }, "anticsrf": "..." }
//! ```
//!
//! Timestamps are microseconds since the UNIX epoch.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{error::AppError, utils::reply_name};

/// Reply name used when a request failed before its verb was known.
pub const UNKNOWN_REPLY: &str = "error_reply";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTime {
    pub conn_init: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub verb: String,
    pub data: Map<String, Value>,
    pub time: RequestTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anticsrf: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseTime {
    pub conn_init: Option<i64>,
    pub conn_server: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub response: String,
    pub data: Value,
    pub time: ResponseTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anticsrf: Option<String>,
}

impl ResponseEnvelope {
    pub fn success(
        request: &RequestEnvelope,
        data: Value,
        conn_server: i64,
        anticsrf: Option<String>,
    ) -> Self {
        Self {
            response: reply_name(&request.verb),
            data,
            time: ResponseTime {
                conn_init: Some(request.time.conn_init),
                conn_server,
            },
            anticsrf,
        }
    }

    pub fn failure(
        verb: Option<&str>,
        conn_init: Option<i64>,
        error: &AppError,
        conn_server: i64,
    ) -> Self {
        Self {
            response: verb.map_or_else(|| UNKNOWN_REPLY.to_string(), reply_name),
            data: error.body(),
            time: ResponseTime {
                conn_init,
                conn_server,
            },
            anticsrf: None,
        }
    }
}
