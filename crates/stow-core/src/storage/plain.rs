//! Plain JSON engine.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::base::{BaseStorage, StorageOptions};
use super::traits::StorageEngine;
use super::watch::ValueParser;
use crate::backend::Host;
use crate::error::Result;

/// Decodes JSON text, handing back the raw string when it isn't JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonParser;

#[async_trait]
impl ValueParser for JsonParser {
    async fn parse_value(&self, raw: Option<Value>) -> Result<Option<Value>> {
        Ok(raw.map(parse_json_lossy))
    }
}

fn parse_json_lossy(raw: Value) -> Value {
    match raw {
        Value::String(text) => match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "stored value is not JSON, returning it unparsed");
                Value::String(text)
            }
        },
        other => other,
    }
}

/// Engine storing values as JSON text.
pub struct Storage {
    base: BaseStorage,
    parser: Arc<JsonParser>,
}

impl Storage {
    pub fn new(host: Host, options: StorageOptions) -> Self {
        Self {
            base: BaseStorage::new(host, options),
            parser: Arc::new(JsonParser),
        }
    }

    pub fn set_namespace(&self, namespace: impl Into<String>) {
        self.base.set_namespace(namespace)
    }
}

#[async_trait]
impl StorageEngine for Storage {
    fn base(&self) -> &BaseStorage {
        &self.base
    }

    fn parser(&self) -> Arc<dyn ValueParser> {
        self.parser.clone()
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let raw = self.base.raw_get(&self.base.namespaced_key(key)).await?;
        Ok(raw.map(parse_json_lossy))
    }

    async fn set(&self, key: &str, value: &Value) -> Result<String> {
        let text = serde_json::to_string(value)?;
        self.base
            .raw_set(&self.base.namespaced_key(key), text)
            .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.base.raw_remove(&self.base.namespaced_key(key)).await
    }
}
