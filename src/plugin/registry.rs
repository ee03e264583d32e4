//! Live registry of active plugins.
//!
//! The registry and the persisted remote-module mapping are the only state
//! shared between concurrent load operations. Every mutation is a single
//! atomic step behind the lock; lifecycle hooks and network calls never run
//! while it is held.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use super::{CommandSpec, Origin, Plugin, PluginIdentity};

/// A plugin that completed its full lifecycle and lives in the registry.
#[derive(Clone)]
pub struct RegisteredPlugin {
    /// Identity the compiled unit is registered under.
    pub identity: PluginIdentity,
    /// Where its source came from.
    pub origin: Origin,
    /// The live instance. Locked per call; the registry lock is never held
    /// while this one is.
    pub handle: Arc<Mutex<Box<dyn Plugin>>>,
}

impl std::fmt::Debug for RegisteredPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredPlugin")
            .field("identity", &self.identity)
            .field("origin", &self.origin)
            .field("handle", &"<plugin>")
            .finish()
    }
}

/// Registry of active plugins plus the command alias table.
#[derive(Default)]
pub struct Registry {
    plugins: RwLock<Vec<RegisteredPlugin>>,
    aliases: RwLock<HashMap<String, String>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a plugin. An existing entry under the same identity is
    /// replaced (explicit-name reloads); distinct loads never collide by
    /// construction.
    pub fn insert(&self, plugin: RegisteredPlugin) {
        let mut plugins = self.plugins.write();
        if let Some(existing) = plugins.iter_mut().find(|p| p.identity == plugin.identity) {
            tracing::debug!(identity = %plugin.identity, "replacing registered plugin");
            *existing = plugin;
        } else {
            plugins.push(plugin);
        }
    }

    /// Remove a plugin by identity. Returns the removed entry, if any.
    pub fn remove(&self, identity: &PluginIdentity) -> Option<RegisteredPlugin> {
        let mut plugins = self.plugins.write();
        let pos = plugins.iter().position(|p| &p.identity == identity)?;
        Some(plugins.remove(pos))
    }

    /// True if a plugin is registered under this identity.
    pub fn contains(&self, identity: &PluginIdentity) -> bool {
        self.plugins.read().iter().any(|p| &p.identity == identity)
    }

    /// Snapshot of all registered plugins.
    pub fn snapshot(&self) -> Vec<RegisteredPlugin> {
        self.plugins.read().clone()
    }

    /// Number of registered plugins.
    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.plugins.read().is_empty()
    }

    /// Remove every plugin matching `name` against the identity uid (case
    /// insensitive). Returns the removed identities.
    pub fn unload_matching(&self, name: &str) -> Vec<PluginIdentity> {
        let needle = name.to_lowercase();
        let mut plugins = self.plugins.write();
        let mut removed = Vec::new();

        plugins.retain(|p| {
            if p.identity.uid().to_lowercase() == needle {
                removed.push(p.identity.clone());
                false
            } else {
                true
            }
        });

        removed
    }

    /// Register an alias for a command, if the command is among `commands`.
    /// Returns whether the alias was added.
    pub fn add_alias(&self, alias: &str, command: &str, commands: &[CommandSpec]) -> bool {
        if commands.iter().any(|c| c.name == command) {
            self.aliases
                .write()
                .insert(alias.to_string(), command.to_string());
            true
        } else {
            false
        }
    }

    /// The command a registered alias points at.
    pub fn resolve_alias(&self, alias: &str) -> Option<String> {
        self.aliases.read().get(alias).cloned()
    }

    /// Identity-to-origin mapping for every plugin with a remote origin,
    /// in registration order. This is what gets persisted.
    pub fn remote_origins(&self) -> Vec<(String, String)> {
        self.plugins
            .read()
            .iter()
            .filter(|p| p.origin.is_remote())
            .map(|p| (p.identity.uid().to_string(), p.origin.as_str().to_string()))
            .collect()
    }
}
