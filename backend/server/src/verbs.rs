//! # Verbs
//!
//! Built-in operations. `ping` and `gapi_validate` are callable without a token; everything
//! else is admitted only with a live one.
//!
//! | Verb | Data | Result |
//! |---|---|---|
//! | `ping` | `ping: "hello"` | `pingback: bool` |
//! | `gapi_validate` | `gapi_key` | `gapi_info` claims, plus a fresh `anticsrf` token |
//! | `view_menu` | | the menu document |
//! | `view_orders` | `age`, `count`, `from_end` | list of orders |
//! | `edit_menu` | `gapi_key`, `menu_data` | `result` |
//! | `sign_out` | | `revoked` count |
use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::{Map, Value, json};
use tracing::info;

use crate::{
    database::{MENU, ORDERS},
    dispatch::{Reply, Services, VerbContext, VerbDispatcher, VerbHandler},
    identity::Verification,
};

const DEFAULT_ORDER_COUNT: i64 = 10;

/// Dispatcher with every built-in verb registered.
pub fn dispatcher(services: Services) -> VerbDispatcher {
    VerbDispatcher::new(services)
        .register("ping", Ping)
        .register("gapi_validate", GapiValidate)
        .register("view_menu", ViewMenu)
        .register("view_orders", ViewOrders)
        .register("edit_menu", EditMenu)
        .register("sign_out", SignOut)
}

pub struct Ping;

#[async_trait]
impl VerbHandler for Ping {
    async fn call(&self, data: Map<String, Value>, _: &VerbContext) -> anyhow::Result<Reply> {
        Ok(Reply::ok(json!({
            "pingback": data.get("ping").and_then(Value::as_str) == Some("hello"),
        })))
    }
}

pub struct GapiValidate;

#[async_trait]
impl VerbHandler for GapiValidate {
    async fn call(&self, data: Map<String, Value>, ctx: &VerbContext) -> anyhow::Result<Reply> {
        let Some(assertion) = data.get("gapi_key").and_then(Value::as_str) else {
            return Ok(Reply::error(
                StatusCode::BAD_REQUEST,
                "JSON request to validate missing key: gapi_key",
            ));
        };

        match ctx.services.identity.verify(assertion).await? {
            Verification::Verified(claims) => {
                ctx.issue_token()?;
                info!(email = %claims.email, elevated = claims.is_elevated, "Identity verified");

                Ok(Reply::ok(json!({ "gapi_info": claims })))
            }
            refused => Ok(Reply::error(StatusCode::BAD_REQUEST, refused.explanation())),
        }
    }
}

pub struct ViewMenu;

#[async_trait]
impl VerbHandler for ViewMenu {
    async fn call(&self, _: Map<String, Value>, ctx: &VerbContext) -> anyhow::Result<Reply> {
        let menu = ctx.services.documents.get(MENU).await.unwrap_or_else(|| json!({}));

        Ok(Reply::ok(menu))
    }
}

pub struct ViewOrders;

#[async_trait]
impl VerbHandler for ViewOrders {
    async fn call(&self, data: Map<String, Value>, ctx: &VerbContext) -> anyhow::Result<Reply> {
        let age = match data.get("age").and_then(Value::as_str).unwrap_or("new") {
            "new" => "cur_orders",
            _ => "old_orders",
        };

        let Some(count) = order_count(data.get("count")) else {
            return Ok(Reply::error(
                StatusCode::BAD_REQUEST,
                "`count` must be a number",
            ));
        };

        let newest_first = data.get("from_end").and_then(Value::as_str).unwrap_or("head") != "head";

        let orders = ctx.services.documents.get(ORDERS).await.unwrap_or_default();
        let orders = orders
            .get(age)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let picked: Vec<Value> = if newest_first {
            orders.into_iter().rev().take(count).collect()
        } else {
            orders.into_iter().take(count).collect()
        };

        Ok(Reply::ok(Value::Array(picked)))
    }
}

/// Accepts a number or a numeric string; fractions round down, negatives become zero.
fn order_count(count: Option<&Value>) -> Option<usize> {
    let count = match count {
        None => DEFAULT_ORDER_COUNT as f64,
        Some(Value::Number(n)) => n.as_f64()?,
        Some(Value::String(s)) => s.trim().parse().ok()?,
        Some(_) => return None,
    };

    if !count.is_finite() {
        return None;
    }

    Some(count.max(0.0).floor() as usize)
}

pub struct EditMenu;

#[async_trait]
impl VerbHandler for EditMenu {
    async fn call(&self, mut data: Map<String, Value>, ctx: &VerbContext) -> anyhow::Result<Reply> {
        let (Some(assertion), Some(menu)) = (
            data.get("gapi_key").and_then(Value::as_str).map(str::to_owned),
            data.remove("menu_data"),
        ) else {
            return Ok(Reply::error(
                StatusCode::BAD_REQUEST,
                "JSON request to edit the menu missing key",
            ));
        };

        let claims = match ctx.services.identity.verify(&assertion).await? {
            Verification::Verified(claims) => claims,
            refused => return Ok(Reply::error(StatusCode::UNAUTHORIZED, refused.explanation())),
        };

        if !claims.is_elevated {
            return Ok(Reply::error(
                StatusCode::UNAUTHORIZED,
                "an elevated account is required to edit the menu",
            ));
        }

        ctx.services.documents.put(MENU, menu).await;
        info!(email = %claims.email, "Menu edited");

        Ok(Reply::ok(json!({ "result": "edit registered" })))
    }
}

pub struct SignOut;

#[async_trait]
impl VerbHandler for SignOut {
    async fn call(&self, _: Map<String, Value>, ctx: &VerbContext) -> anyhow::Result<Reply> {
        let revoked = match &ctx.anticsrf {
            Some(token) => ctx.services.tokens.revoke([token.as_str()]),
            None => 0,
        };

        Ok(Reply::ok(json!({ "revoked": revoked })))
    }
}
