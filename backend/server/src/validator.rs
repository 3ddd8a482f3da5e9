use std::sync::Arc;

use clerk::Clock;
use serde_json::{Map, Value};

use crate::{
    envelope::{RequestEnvelope, RequestTime},
    error::AppError,
};

/// Structural and freshness checks on a decoded request.
pub struct RequestValidator {
    clock: Arc<dyn Clock>,
}

impl RequestValidator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn structure(&self, message: Value) -> Result<RequestEnvelope, AppError> {
        let Value::Object(mut message) = message else {
            return Err(AppError::MalformedPayload(
                "request must be a JSON object".into(),
            ));
        };

        let verb = match take(&mut message, "verb")? {
            Value::String(verb) => verb,
            _ => return Err(wrong_type("verb", "a string")),
        };

        let data = match take(&mut message, "data")? {
            Value::Object(data) => data,
            _ => return Err(wrong_type("data", "an object")),
        };

        let conn_init = match take(&mut message, "time")? {
            Value::Object(mut time) => match take(&mut time, "conn_init")
                .map_err(|_| AppError::MissingField("time.conn_init"))?
            {
                Value::Number(n) => n
                    .as_i64()
                    .ok_or_else(|| wrong_type("time.conn_init", "an integer"))?,
                _ => return Err(wrong_type("time.conn_init", "an integer")),
            },
            _ => return Err(wrong_type("time", "an object")),
        };

        let anticsrf = match message.remove("anticsrf") {
            None | Some(Value::Null) => None,
            Some(Value::String(token)) => Some(token),
            Some(_) => return Err(wrong_type("anticsrf", "a string")),
        };

        Ok(RequestEnvelope {
            verb,
            data,
            time: RequestTime { conn_init },
            anticsrf,
        })
    }

    /// Only timestamps ahead of the server clock are refused. Old ones pass.
    pub fn freshness(&self, envelope: &RequestEnvelope) -> Result<(), AppError> {
        let now = self.clock.now_micros();
        let conn_init = envelope.time.conn_init;

        if conn_init > now {
            return Err(AppError::FutureTimestamp { conn_init, now });
        }

        Ok(())
    }
}

fn take(message: &mut Map<String, Value>, key: &'static str) -> Result<Value, AppError> {
    message.remove(key).ok_or(AppError::MissingField(key))
}

fn wrong_type(key: &str, expected: &str) -> AppError {
    AppError::MalformedPayload(format!("`{key}` must be {expected}"))
}
