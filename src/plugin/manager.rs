//! Top-level loader orchestration.
//!
//! [`Loader`] ties the resolver, manifest extractor, installer and
//! registrar together behind the operations the host's command surface
//! calls: download-and-install, load-from-file, unload, clear, preset
//! selection and the startup sweep.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::host::{text, DatabaseExt, Host, Responder};

use super::registrar::{LoadReport, Registrar, SubscribeSuggestion};
use super::resolver::{Fetch, HttpFetcher, Resolver};
use super::{
    LoadError, LoadResult, LoaderConfig, Manifest, Origin, PluginIdentity, PluginSource, Registry,
    Runtime, DB_OWNER,
};

/// Database owner for the host-wide settings table (command aliases).
const SETTINGS_OWNER: &str = "Settings";

/// What to do with a module's source after an inline load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveChoice {
    /// Save this one module.
    Once,
    /// Don't save this one module.
    No,
    /// Save this module and every future one; persisted.
    Always,
    /// Never save; persisted.
    Never,
}

/// The loader module: fetches, inspects and registers plugins at runtime.
pub struct Loader {
    config: Arc<LoaderConfig>,
    host: Host,
    resolver: Resolver,
    registrar: Registrar,
    registry: Arc<Registry>,
    fully_loaded: AtomicBool,
    sweep_started: AtomicBool,
}

impl Loader {
    /// Create a loader with the production HTTP transport.
    pub fn new(config: LoaderConfig, host: Host, runtime: Arc<dyn Runtime>) -> Self {
        Self::with_fetcher(config, host, runtime, Arc::new(HttpFetcher::new()))
    }

    /// Create a loader over a custom transport (tests).
    pub fn with_fetcher(
        config: LoaderConfig,
        host: Host,
        runtime: Arc<dyn Runtime>,
        fetch: Arc<dyn Fetch>,
    ) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(Registry::new());
        let resolver = Resolver::new(config.clone(), fetch);
        let registrar =
            Registrar::new(config.clone(), host.clone(), runtime, registry.clone());

        Self {
            config,
            host,
            resolver,
            registrar,
            registry,
            fully_loaded: AtomicBool::new(false),
            sweep_started: AtomicBool::new(false),
        }
    }

    /// The live registry of active plugins.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// True once the startup sweep finished.
    pub fn is_fully_loaded(&self) -> bool {
        self.fully_loaded.load(Ordering::SeqCst)
    }

    /// Download a module by bare name or URL and install it.
    pub async fn download_and_install(
        &self,
        identifier: &str,
        responder: Option<&dyn Responder>,
    ) -> LoadResult<LoadReport> {
        let source = match self.resolver.resolve(identifier).await {
            Ok(source) => source,
            Err(err) => {
                tracing::debug!(identifier, error = %err, "failed to resolve module");
                self.report_error(&err, responder).await;
                return Err(err);
            }
        };

        self.load_source(source, Some(identifier), false, responder).await
    }

    /// Load already-resolved source through the full pipeline.
    pub async fn load_source(
        &self,
        source: PluginSource,
        name: Option<&str>,
        save_fs: bool,
        responder: Option<&dyn Responder>,
    ) -> LoadResult<LoadReport> {
        let manifest = Manifest::extract(&source.text);

        match self.registrar.register(&source, &manifest, name, responder).await {
            Ok(report) => {
                if save_fs {
                    self.save_to_fs(&report.identity, &source);
                }

                if source.origin.is_remote() {
                    self.update_modules_in_db();
                }

                if let Some(responder) = responder {
                    let _ = responder.answer(&report.message).await;
                }

                Ok(report)
            }
            Err(err) => {
                self.report_error(&err, responder).await;
                Err(err)
            }
        }
    }

    /// Load a module from a local file. Save-to-fs follows the persisted
    /// preferences.
    pub async fn load_file(
        &self,
        path: &str,
        responder: Option<&dyn Responder>,
    ) -> LoadResult<LoadReport> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                if let Some(responder) = responder {
                    let _ = responder
                        .answer(&text(&*self.host.translator, "no_file", "File not found"))
                        .await;
                }
                return Err(err.into());
            }
        };

        let source_text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => {
                let err = LoadError::InvalidEncoding;
                self.report_error(&err, responder).await;
                return Err(err);
            }
        };

        let source = PluginSource {
            text: source_text,
            origin: Origin::Path(path.to_string()),
            blob_link: false,
        };

        self.load_source(source, None, self.save_fs_default(), responder).await
    }

    /// Load pasted or attached source text, applying a save choice.
    pub async fn load_inline(
        &self,
        source_text: String,
        choice: SaveChoice,
        responder: Option<&dyn Responder>,
    ) -> LoadResult<LoadReport> {
        let save = match choice {
            SaveChoice::Once => true,
            SaveChoice::No => false,
            SaveChoice::Always => {
                self.host.db.set(DB_OWNER, "permanent_modules_fs", serde_json::json!(true));
                self.host.db.set(DB_OWNER, "disable_modules_fs", serde_json::json!(false));
                true
            }
            SaveChoice::Never => {
                self.host.db.set(DB_OWNER, "disable_modules_fs", serde_json::json!(true));
                self.host.db.set(DB_OWNER, "permanent_modules_fs", serde_json::json!(false));
                false
            }
        };

        self.load_source(PluginSource::inline(source_text), None, save, responder).await
    }

    /// The persisted save-to-fs default: always-save is on and never-save
    /// is off.
    pub fn save_fs_default(&self) -> bool {
        let permanent: bool = self.host.db.get_or(DB_OWNER, "permanent_modules_fs", false);
        let disabled: bool = self.host.db.get_or(DB_OWNER, "disable_modules_fs", false);
        permanent && !disabled
    }

    /// Unload plugins matching `name`. Returns the unloaded identity uids.
    pub async fn unload(
        &self,
        name: &str,
        responder: Option<&dyn Responder>,
    ) -> Vec<String> {
        let removed = self.registry.unload_matching(name);
        let uids: Vec<String> = removed.iter().map(|id| id.uid().to_string()).collect();

        if !uids.is_empty() {
            let mut mapping: HashMap<String, String> =
                self.host.db.get_or(DB_OWNER, "loaded_modules", HashMap::new());
            mapping.retain(|uid, _| !uids.contains(uid));
            self.host
                .db
                .set(DB_OWNER, "loaded_modules", serde_json::json!(mapping));
        }

        if let Some(responder) = responder {
            let tr = &*self.host.translator;
            let message = if uids.is_empty() {
                text(tr, "not_unloaded", "Module not unloaded")
            } else {
                let names: Vec<String> =
                    uids.iter().map(|uid| strip_mod_suffix(uid).to_string()).collect();
                text(tr, "unloaded", "Module {names} unloaded").replace("{names}", &names.join(", "))
            };
            let _ = responder.answer(&message).await;
        }

        uids
    }

    /// Wipe every installed module: persisted mapping, saved files, preset.
    /// Remotely-sourced plugins are removed from the live registry as well.
    pub async fn clear_modules(&self, responder: Option<&dyn Responder>) {
        self.host
            .db
            .set(DB_OWNER, "loaded_modules", serde_json::json!({}));

        for plugin in self.registry.snapshot() {
            if plugin.origin.is_remote() {
                self.registry.remove(&plugin.identity);
            }
        }

        if let Some(dir) = &self.config.modules_dir {
            if let Err(err) = remove_saved_modules(dir) {
                tracing::warn!(dir = %dir.display(), error = %err, "failed to clear saved modules");
            }
        }

        self.host
            .db
            .set(DB_OWNER, "chosen_preset", serde_json::json!("none"));

        if let Some(responder) = responder {
            let _ = responder
                .answer(&text(&*self.host.translator, "all_modules_deleted", "All modules deleted"))
                .await;
        }
    }

    /// Select a module preset, warming its catalog and persisting the choice.
    pub async fn set_preset(&self, preset: &str, responder: Option<&dyn Responder>) {
        self.resolver.repo_list(Some(preset), false).await;
        self.host
            .db
            .set(DB_OWNER, "chosen_preset", serde_json::json!(preset));

        if let Some(responder) = responder {
            let _ = responder
                .answer(&text(&*self.host.translator, "preset_loaded", "Preset loaded"))
                .await;
        }
    }

    /// Called once the host's client connection is ready. Starts the bulk
    /// module sweep and the catalog prefetch as background tasks; both run
    /// at most once per process.
    pub fn client_ready(self: &Arc<Self>) {
        if self.sweep_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let loader = Arc::clone(self);
        tokio::spawn(async move {
            loader.update_modules().await;
        });

        let loader = Arc::clone(self);
        tokio::spawn(async move {
            loader.resolver.repo_list(Some("full"), false).await;
        });
    }

    /// The startup sweep: load preset modules plus the persisted mapping,
    /// then refresh the mapping and re-apply aliases.
    pub async fn update_modules(&self) {
        let todo = self.modules_to_load().await;
        tracing::debug!(count = todo.len(), "loading configured modules");

        for url in todo {
            if let Err(err) = self.download_and_install(&url, None).await {
                tracing::debug!(url, error = %err, "configured module failed to load");
            }
        }

        self.update_modules_in_db();
        self.reapply_aliases().await;
        self.fully_loaded.store(true, Ordering::SeqCst);
    }

    /// URLs to load at startup: the chosen preset's catalog entries (unless
    /// presets are disabled), then the persisted remote-module mapping.
    async fn modules_to_load(&self) -> Vec<String> {
        let preset: String = self.host.db.get_or(DB_OWNER, "chosen_preset", "none".to_string());

        let mut todo = Vec::new();

        if preset != "disable" {
            let catalog = self.resolver.repo_list(Some(&preset), true).await;
            for entries in catalog.values() {
                todo.extend(entries.values().cloned());
            }
        }

        let mapping: HashMap<String, String> =
            self.host.db.get_or(DB_OWNER, "loaded_modules", HashMap::new());
        todo.extend(mapping.into_values());

        todo.sort();
        todo.dedup();
        todo
    }

    /// Persist identity-to-origin for every remotely-sourced plugin.
    fn update_modules_in_db(&self) {
        let mapping: serde_json::Map<String, serde_json::Value> = self
            .registry
            .remote_origins()
            .into_iter()
            .map(|(uid, origin)| (uid, serde_json::json!(origin)))
            .collect();

        self.host
            .db
            .set(DB_OWNER, "loaded_modules", serde_json::Value::Object(mapping));
    }

    /// Re-apply configured aliases against the current command set, pruning
    /// the ones whose target no longer exists.
    async fn reapply_aliases(&self) {
        let aliases: HashMap<String, String> =
            self.host.db.get_or(SETTINGS_OWNER, "aliases", HashMap::new());

        if aliases.is_empty() {
            return;
        }

        let mut all_commands = Vec::new();
        for plugin in self.registry.snapshot() {
            all_commands.extend(plugin.handle.lock().await.commands());
        }

        let mut kept = HashMap::new();
        for (alias, command) in aliases {
            if self.registry.add_alias(&alias, &command, &all_commands) {
                kept.insert(alias, command);
            }
        }

        self.host
            .db
            .set(SETTINGS_OWNER, "aliases", serde_json::json!(kept));
    }

    /// Accept a subscribe suggestion: join the developer's channel.
    pub async fn subscribe(&self, suggestion: &SubscribeSuggestion) -> anyhow::Result<()> {
        self.host.client.join_channel(suggestion.channel_id).await
    }

    /// Decline a subscribe suggestion and remember the decision.
    pub fn decline_subscribe(&self, suggestion: &SubscribeSuggestion) {
        let mut declined: Vec<String> =
            self.host.db.get_or(DB_OWNER, "do_not_subscribe", Vec::new());
        if !declined.contains(&suggestion.developer) {
            declined.push(suggestion.developer.clone());
        }
        self.host
            .db
            .set(DB_OWNER, "do_not_subscribe", serde_json::json!(declined));
    }

    /// Save module source under the identity's uid in the modules dir.
    fn save_to_fs(&self, identity: &PluginIdentity, source: &PluginSource) {
        let Some(dir) = &self.config.modules_dir else {
            return;
        };

        let write = || -> std::io::Result<()> {
            std::fs::create_dir_all(dir)?;
            std::fs::write(dir.join(format!("{}.py", identity.uid())), &source.text)
        };

        if let Err(err) = write() {
            tracing::warn!(identity = %identity, error = %err, "failed to save module to fs");
        }
    }

    /// Send the localized user-visible message for a failure. Explicit
    /// rejections surface verbatim; everything else gets a generic string.
    async fn report_error(&self, err: &LoadError, responder: Option<&dyn Responder>) {
        let Some(responder) = responder else {
            return;
        };

        let tr = &*self.host.translator;
        let message = match err {
            LoadError::NotFound => text(tr, "no_module", "Module is not available in repo"),
            LoadError::InvalidEncoding => {
                text(tr, "bad_unicode", "Invalid Unicode formatting in module")
            }
            LoadError::MissingExternalTool(tool) => text(
                tr,
                "ffmpeg_required",
                "This module requires {tool}, which is not installed",
            )
            .replace("{tool}", tool),
            LoadError::InlineUnavailable => text(
                tr,
                "inline_init_failed",
                "This module requires the inline subsystem, which failed to initialize",
            ),
            LoadError::VersionTooOld { required } => text(
                tr,
                "version_incompatible",
                "This module requires host version {version}+. Please update",
            )
            .replace(
                "{version}",
                &format!("{}.{}.{}", required.0, required.1, required.2),
            ),
            LoadError::RequirementsInstallFailed => {
                text(tr, "requirements_failed", "Requirements installation failed")
            }
            LoadError::RequirementsRestartNeeded { package } => text(
                tr,
                "requirements_restart",
                "Requirements installed, but a restart is required for {package} to apply",
            )
            .replace("{package}", package),
            LoadError::Rejected(message) => message.clone(),
            LoadError::SelfUnload { message } => message
                .clone()
                .unwrap_or_else(|| text(tr, "self_unload", "Module unloaded itself")),
            LoadError::NothingToInstall
            | LoadError::LoadFailed
            | LoadError::Fetch(_)
            | LoadError::Io(_) => {
                text(tr, "load_failed", "Loading failed. See logs for details")
            }
        };

        let _ = responder.answer(&message).await;
    }
}

/// Drop the conventional `Mod` suffix from an identity for display.
fn strip_mod_suffix(name: &str) -> &str {
    name.strip_suffix("Mod").unwrap_or(name)
}

/// Delete every saved `.py` module file in `dir`.
fn remove_saved_modules(dir: &std::path::Path) -> std::io::Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "py") {
            std::fs::remove_file(path)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_mod_suffix() {
        assert_eq!(strip_mod_suffix("ExampleMod"), "Example");
        assert_eq!(strip_mod_suffix("Example"), "Example");
        assert_eq!(strip_mod_suffix("Mod"), "");
    }

    #[test]
    fn test_remove_saved_modules_only_touches_py() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "x").unwrap();
        std::fs::write(dir.path().join("keep.json"), "{}").unwrap();

        remove_saved_modules(dir.path()).unwrap();

        assert!(!dir.path().join("a.py").exists());
        assert!(dir.path().join("keep.json").exists());
    }

    #[test]
    fn test_remove_saved_modules_missing_dir_ok() {
        assert!(remove_saved_modules(std::path::Path::new("/nonexistent/telemod")).is_ok());
    }
}
