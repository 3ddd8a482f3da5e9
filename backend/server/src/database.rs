//! # Documents
//!
//! In-memory JSON documents read by the verb handlers.
//!
//! ## Documents
//!
//! - `menu`: choosable menu entries
//! - `orders`: `cur_orders` and `old_orders` lists
//! - `elevated_ids`: accounts allowed to edit the menu, split into `devs` and `sau9`
//!
//! ## Loading
//!
//! Each document is seeded from `<JSON_DIR>/<name>.json` at startup. A missing or broken
//! file falls back to the built-in default. Edits live in memory only.
use std::{collections::HashMap, path::Path};

use serde_json::{Value, json};
use tokio::{fs, sync::RwLock};
use tracing::{info, warn};

use crate::identity::ElevatedIds;

pub const MENU: &str = "menu";
pub const ORDERS: &str = "orders";
pub const ELEVATED_IDS: &str = "elevated_ids";

pub const DOCUMENTS: [&str; 3] = [MENU, ORDERS, ELEVATED_IDS];

pub struct DocumentStore {
    documents: RwLock<HashMap<String, Value>>,
}

impl DocumentStore {
    pub fn with_defaults() -> Self {
        Self::from_documents(
            DOCUMENTS
                .iter()
                .map(|name| (name.to_string(), default_document(name))),
        )
    }

    pub fn from_documents(documents: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            documents: RwLock::new(documents.into_iter().collect()),
        }
    }

    pub async fn load(dir: &Path) -> Self {
        let mut documents = HashMap::new();

        for name in DOCUMENTS {
            let path = dir.join(format!("{name}.json"));

            let document = match fs::read_to_string(&path).await {
                Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                    warn!("Invalid JSON in {}: {e}, using default", path.display());
                    default_document(name)
                }),
                Err(_) => {
                    info!("{} not found, using default {name}", path.display());
                    default_document(name)
                }
            };

            documents.insert(name.to_string(), document);
        }

        Self {
            documents: RwLock::new(documents),
        }
    }

    pub async fn get(&self, name: &str) -> Option<Value> {
        self.documents.read().await.get(name).cloned()
    }

    pub async fn put(&self, name: &str, document: Value) {
        self.documents
            .write()
            .await
            .insert(name.to_string(), document);
    }

    pub async fn elevated_ids(&self) -> ElevatedIds {
        self.get(ELEVATED_IDS)
            .await
            .and_then(|ids| serde_json::from_value(ids).ok())
            .unwrap_or_default()
    }
}

fn default_document(name: &str) -> Value {
    match name {
        ELEVATED_IDS => json!({
            "devs": ["thebinaryminer"],
            "sau9": ["1742119", "1858067", "d_richardi", "v_schrader"],
        }),
        ORDERS => json!({
            "cur_orders": [],
            "old_orders": [],
        }),
        _ => json!({}),
    }
}
