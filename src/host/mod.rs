//! Host collaborator contracts.
//!
//! The loader and backup modules run inside a larger userbot host that owns
//! the Telegram connection, the key-value database, the inline-keyboard UI
//! and the string tables. None of that is implemented here; this module
//! defines the narrow interfaces the plugin machinery consumes, and the
//! host (or a test harness) provides the implementations.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// A resolved Telegram entity, as much of it as the loader cares about.
#[derive(Debug, Clone)]
pub struct Entity {
    /// Numeric peer id.
    pub id: i64,
    /// Public username, without the leading `@`.
    pub username: Option<String>,
    /// Whether the entity is a broadcast channel.
    pub is_channel: bool,
    /// Whether the current account has left (or never joined) the entity.
    pub left: bool,
}

/// Key-value database owned by the host.
///
/// Values are namespaced by an owner string (conventionally the plugin
/// class name) and stored as JSON. Each call is a single atomic step.
pub trait Database: Send + Sync {
    /// Read a value, or `None` if unset.
    fn get(&self, owner: &str, key: &str) -> Option<Value>;

    /// Write a value.
    fn set(&self, owner: &str, key: &str, value: Value);

    /// A JSON snapshot of the whole store, used by the backup job.
    fn snapshot(&self) -> Value;
}

/// Typed read helpers over [`Database`].
pub trait DatabaseExt: Database {
    /// Read and deserialize a value, falling back to `default` when the key
    /// is unset or the stored value does not deserialize.
    fn get_or<T: DeserializeOwned>(&self, owner: &str, key: &str, default: T) -> T {
        self.get(owner, key)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(default)
    }
}

impl<D: Database + ?Sized> DatabaseExt for D {}

/// The live Telegram client connection.
#[async_trait]
pub trait Client: Send + Sync {
    /// Resolve a username, `@handle` or id string to an entity.
    async fn get_entity(&self, ident: &str) -> anyhow::Result<Entity>;

    /// Join a channel by peer id.
    async fn join_channel(&self, channel_id: i64) -> anyhow::Result<()>;

    /// Upload a named document to a peer.
    async fn upload_document(
        &self,
        peer_id: i64,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> anyhow::Result<()>;
}

/// The inline-keyboard/bot UI subsystem.
///
/// The loader only needs to know whether it finished its own startup and
/// which bot username inline handlers are reachable under.
pub trait InlineUi: Send + Sync {
    /// True once the inline subsystem completed initialization.
    fn init_complete(&self) -> bool;

    /// Username of the inline bot, if one is configured.
    fn bot_username(&self) -> Option<String>;
}

/// String-table lookup by key for the active locale.
pub trait Translator: Send + Sync {
    /// A translated string for `key`, or `None` to use the built-in default.
    fn get(&self, key: &str) -> Option<String>;
}

/// Look up a user-visible string, falling back to the built-in default.
pub fn text(translator: &dyn Translator, key: &str, default: &str) -> String {
    translator.get(key).unwrap_or_else(|| default.to_string())
}

/// Where user-visible replies for one operation go, typically the message
/// that triggered it.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Replace (or send) the reply with `message`.
    async fn answer(&self, message: &str) -> anyhow::Result<()>;
}

/// Bundle of host collaborator handles handed to the loader at construction.
#[derive(Clone)]
pub struct Host {
    /// Key-value database.
    pub db: Arc<dyn Database>,
    /// Primary client connection.
    pub client: Arc<dyn Client>,
    /// Every active client connection, primary included.
    pub allclients: Vec<Arc<dyn Client>>,
    /// Inline UI subsystem.
    pub inline: Arc<dyn InlineUi>,
    /// String tables.
    pub translator: Arc<dyn Translator>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct MemoryDb {
        data: Mutex<HashMap<(String, String), Value>>,
    }

    impl Database for MemoryDb {
        fn get(&self, owner: &str, key: &str) -> Option<Value> {
            self.data
                .lock()
                .get(&(owner.to_string(), key.to_string()))
                .cloned()
        }

        fn set(&self, owner: &str, key: &str, value: Value) {
            self.data
                .lock()
                .insert((owner.to_string(), key.to_string()), value);
        }

        fn snapshot(&self) -> Value {
            Value::Null
        }
    }

    struct NoTranslations;

    impl Translator for NoTranslations {
        fn get(&self, _key: &str) -> Option<String> {
            None
        }
    }

    #[test]
    fn test_get_or_returns_default_when_unset() {
        let db = MemoryDb { data: Mutex::new(HashMap::new()) };
        let period: u64 = db.get_or("Backup", "period", 42);
        assert_eq!(period, 42);
    }

    #[test]
    fn test_get_or_deserializes_stored_value() {
        let db = MemoryDb { data: Mutex::new(HashMap::new()) };
        db.set("Backup", "period", serde_json::json!(3600));
        let period: u64 = db.get_or("Backup", "period", 0);
        assert_eq!(period, 3600);
    }

    #[test]
    fn test_get_or_falls_back_on_type_mismatch() {
        let db = MemoryDb { data: Mutex::new(HashMap::new()) };
        db.set("Backup", "period", serde_json::json!("disabled"));
        let period: u64 = db.get_or("Backup", "period", 7);
        assert_eq!(period, 7);
    }

    #[test]
    fn test_text_fallback() {
        assert_eq!(text(&NoTranslations, "no_module", "not found"), "not found");
    }
}
