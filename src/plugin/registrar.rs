//! Plugin registration: pre-flight gates, compile, lifecycle, rollback.
//!
//! The registrar owns the only path into the live registry. A plugin is
//! visible to the rest of the host if and only if its full lifecycle
//! (compile, register, config injection, ready hook) completed; any failure
//! after registration removes the entry again before the error is returned.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::host::{text, DatabaseExt, Host, Responder};

use super::installer::{discover_requirements, Installer};
use super::manifest::parse_class_name;
use super::registry::{RegisteredPlugin, Registry};
use super::runtime::{CompileError, HookError, Runtime};
use super::{
    LoadError, LoadResult, LoaderConfig, Manifest, PluginIdentity, PluginSource, DB_OWNER,
};

/// An optional follow-up attached to a successful load: the module's author
/// is a channel the account has not joined, and host settings permit
/// suggesting a subscription. The host UI renders the choice and calls
/// [`super::Loader::subscribe`] or [`super::Loader::decline_subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeSuggestion {
    /// Channel peer id to join on acceptance.
    pub channel_id: i64,
    /// Channel username, without the leading `@`.
    pub username: String,
    /// The developer identifier to remember on decline.
    pub developer: String,
}

/// Outcome of a successful load.
#[derive(Debug)]
pub struct LoadReport {
    /// Identity the plugin was registered under.
    pub identity: PluginIdentity,
    /// Human-readable load summary.
    pub message: String,
    /// Optional subscribe follow-up.
    pub suggestion: Option<SubscribeSuggestion>,
    /// Live handle, already owned by the registry.
    pub plugin: RegisteredPlugin,
}

/// Synthesize the identity a compiled unit will be registered under.
///
/// A caller-supplied name wins (catalog URLs reduced to their bare stem);
/// otherwise the class name parsed from the source; otherwise a random
/// token. The fallback is an explicit tagged choice, never exception-driven.
pub fn synthesize_identity(
    requested: Option<&str>,
    source_text: &str,
    modules_repo: &str,
) -> PluginIdentity {
    if let Some(name) = requested {
        let name = if name.starts_with(modules_repo) {
            name.rsplit('/')
                .next()
                .and_then(|stem| stem.split(".py").next())
                .unwrap_or(name)
        } else {
            name
        };
        return PluginIdentity::named(name);
    }

    match parse_class_name(source_text) {
        Some(class_name) => PluginIdentity::parsed(&class_name),
        None => {
            tracing::debug!("can't parse class name from source, using random identity");
            PluginIdentity::random()
        }
    }
}

/// Probe for the external media tool by asking it for its version.
async fn media_tool_available(tool: &str) -> bool {
    tokio::process::Command::new(tool)
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Compiles sources into live plugins and wires them into the registry.
pub struct Registrar {
    config: Arc<LoaderConfig>,
    host: Host,
    runtime: Arc<dyn Runtime>,
    registry: Arc<Registry>,
    installer: Installer,
}

impl Registrar {
    /// Create a registrar over the shared registry.
    pub fn new(
        config: Arc<LoaderConfig>,
        host: Host,
        runtime: Arc<dyn Runtime>,
        registry: Arc<Registry>,
    ) -> Self {
        let installer = Installer::new(config.installer_program.clone());
        Self { config, host, runtime, registry, installer }
    }

    /// Run the full registration pipeline for one resolved source.
    pub async fn register(
        &self,
        source: &PluginSource,
        manifest: &Manifest,
        requested_name: Option<&str>,
        responder: Option<&dyn Responder>,
    ) -> LoadResult<LoadReport> {
        self.preflight(manifest).await?;

        let identity =
            synthesize_identity(requested_name, &source.text, &self.config.modules_repo);

        let instance = self.compile(source, manifest, &identity, responder).await?;

        let plugin = RegisteredPlugin {
            identity: identity.clone(),
            origin: source.origin.clone(),
            handle: Arc::new(Mutex::new(instance)),
        };
        self.registry.insert(plugin.clone());

        if let Err(err) = self.run_lifecycle(&plugin).await {
            self.registry.remove(&identity);
            return Err(match err {
                HookError::Rejected(message) => LoadError::Rejected(message),
                HookError::SelfUnload(message) => {
                    tracing::debug!(identity = %identity, "module unloaded itself");
                    LoadError::SelfUnload { message }
                }
                HookError::Failed(error) => {
                    tracing::error!(identity = %identity, error = %error, "ready hook failed");
                    LoadError::LoadFailed
                }
            });
        }

        self.apply_aliases(&plugin).await;

        let suggestion = self.subscribe_suggestion(manifest.developer.as_deref()).await;
        let message = self.compose_summary(source, manifest, &plugin, suggestion.as_ref()).await;

        Ok(LoadReport { identity, message, suggestion, plugin })
    }

    /// Pre-flight gates. Each short-circuits with a specific outcome and no
    /// partial registration.
    async fn preflight(&self, manifest: &Manifest) -> LoadResult<()> {
        if manifest.scopes.ffmpeg && !media_tool_available(&self.config.media_tool).await {
            return Err(LoadError::MissingExternalTool(self.config.media_tool.clone()));
        }

        if manifest.scopes.inline && !self.host.inline.init_complete() {
            return Err(LoadError::InlineUnavailable);
        }

        if let Some(required) = manifest.min_version {
            if self.config.host_version < required {
                return Err(LoadError::VersionTooOld { required });
            }
        }

        Ok(())
    }

    /// Compile the source, installing missing dependencies and retrying at
    /// most once.
    async fn compile(
        &self,
        source: &PluginSource,
        manifest: &Manifest,
        identity: &PluginIdentity,
        responder: Option<&dyn Responder>,
    ) -> LoadResult<Box<dyn super::Plugin>> {
        let mut did_requirements = false;

        loop {
            match self.runtime.compile(source, identity).await {
                Ok(instance) => return Ok(instance),
                Err(CompileError::MissingDependency { package }) => {
                    tracing::info!(
                        identity = %identity,
                        package = package.as_deref().unwrap_or("<unknown>"),
                        "module compile failed, attempting dependency installation"
                    );

                    let requirements = discover_requirements(manifest, package.as_deref());
                    if requirements.is_empty() {
                        return Err(LoadError::NothingToInstall);
                    }

                    if did_requirements {
                        let package =
                            package.unwrap_or_else(|| requirements.join(" "));
                        return Err(LoadError::RequirementsRestartNeeded { package });
                    }

                    if let Some(responder) = responder {
                        let listing = requirements
                            .iter()
                            .map(|r| format!("- {r}"))
                            .collect::<Vec<_>>()
                            .join("\n");
                        let header = text(
                            &*self.host.translator,
                            "requirements_installing",
                            "Installing requirements:",
                        );
                        let _ = responder.answer(&format!("{header}\n\n{listing}")).await;
                    }

                    self.installer.install(&requirements).await?;
                    self.runtime.invalidate_caches();
                    did_requirements = true;
                }
                Err(CompileError::Rejected(message)) => {
                    return Err(LoadError::Rejected(message));
                }
                Err(CompileError::Failed(error)) => {
                    tracing::error!(identity = %identity, error = %error, "module compile failed");
                    return Err(LoadError::LoadFailed);
                }
            }
        }
    }

    /// Config injection followed by the ready hook. The registry lock is
    /// never held here; only the plugin's own mutex is.
    async fn run_lifecycle(&self, plugin: &RegisteredPlugin) -> Result<(), HookError> {
        let mut instance = plugin.handle.lock().await;

        instance
            .configure(self.host.db.clone(), self.host.translator.clone())
            .await?;

        instance
            .client_ready(
                self.host.client.clone(),
                self.host.db.clone(),
                &self.host.allclients,
            )
            .await
    }

    /// Apply configured command aliases that target commands exposed by the
    /// new plugin.
    async fn apply_aliases(&self, plugin: &RegisteredPlugin) {
        let aliases: HashMap<String, String> =
            self.host.db.get_or("Settings", "aliases", HashMap::new());

        if aliases.is_empty() {
            return;
        }

        let commands = plugin.handle.lock().await.commands();
        for (alias, command) in &aliases {
            self.registry.add_alias(alias, command, &commands);
        }
    }

    /// Whether to attach a subscribe follow-up for the declared developer.
    async fn subscribe_suggestion(&self, developer: Option<&str>) -> Option<SubscribeSuggestion> {
        let developer = developer?;

        if !developer.starts_with('@') {
            return None;
        }

        let declined: Vec<String> = self.host.db.get_or(DB_OWNER, "do_not_subscribe", Vec::new());
        if declined.iter().any(|d| d == developer) {
            return None;
        }

        let allowed: bool =
            self.host
                .db
                .get_or(DB_OWNER, "suggest_subscribe", self.config.suggest_subscribe);
        if !allowed {
            return None;
        }

        let entity = self.host.client.get_entity(developer).await.ok()?;
        if !entity.is_channel || !entity.left {
            return None;
        }

        Some(SubscribeSuggestion {
            channel_id: entity.id,
            username: entity
                .username
                .unwrap_or_else(|| developer.trim_start_matches('@').to_string()),
            developer: developer.to_string(),
        })
    }

    /// Compose the human-readable load summary.
    async fn compose_summary(
        &self,
        source: &PluginSource,
        manifest: &Manifest,
        plugin: &RegisteredPlugin,
        suggestion: Option<&SubscribeSuggestion>,
    ) -> String {
        let tr = &*self.host.translator;

        let (display_name, version, doc, commands, inline_handlers) = {
            let instance = plugin.handle.lock().await;
            (
                instance.display_name(),
                instance.version(),
                instance.doc(),
                instance.commands(),
                instance.inline_handlers(),
            )
        };

        let version_part = version
            .map(|(a, b, c)| format!(" (v{a}.{b}.{c})"))
            .unwrap_or_default();

        let mut message = text(tr, "loaded", "Module {name}{version} loaded")
            .replace("{name}", display_name.trim())
            .replace("{version}", &version_part);

        if let Some(doc) = doc {
            message.push('\n');
            message.push_str(doc.trim());
        }

        if !manifest.scopes.disable_onload_docs {
            let mut commands = commands;
            commands.sort_by(|a, b| a.name.cmp(&b.name));
            for command in &commands {
                let doc = command
                    .doc
                    .clone()
                    .unwrap_or_else(|| text(tr, "undoc_cmd", "No docs"));
                message.push_str(&format!(
                    "\n- {}{}: {}",
                    self.config.command_prefix, command.name, doc
                ));
            }

            if self.host.inline.init_complete() {
                let bot = self.host.inline.bot_username().unwrap_or_default();
                let mut inline_handlers = inline_handlers;
                inline_handlers.sort_by(|a, b| a.name.cmp(&b.name));
                for handler in &inline_handlers {
                    let doc = handler
                        .doc
                        .clone()
                        .unwrap_or_else(|| text(tr, "undoc_ihandler", "No docs"));
                    message.push_str(&format!("\n- @{bot} {}: {}", handler.name, doc));
                }
            }
        }

        if let Some(developer) = &manifest.developer {
            message.push_str(&format!(
                "\n\n{} {developer}",
                text(tr, "developer", "Developer:")
            ));
        }

        if self.config.share_link {
            if let super::Origin::Url(url) = &source.origin {
                message.push_str(&format!("\n{} {url}", text(tr, "modlink", "Link:")));
            }
        }

        if source.blob_link {
            message.push('\n');
            message.push_str(&text(
                tr,
                "blob_link",
                "Do not use `blob` links to download modules. Consider switching to `raw` instead",
            ));
        }

        if let Some(suggestion) = suggestion {
            message.push_str(&format!(
                "\n\n{}",
                text(
                    tr,
                    "suggest_subscribe",
                    "This module is made by {dev}. Do you want to join this channel to support the developer?",
                )
                .replace("{dev}", &format!("@{}", suggestion.username))
            ));
        }

        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::IdentityKind;

    const REPO: &str = "https://mods.example.com/main/";

    #[test]
    fn test_identity_from_catalog_url_uses_stem() {
        let id = synthesize_identity(
            Some("https://mods.example.com/main/example_mod.py"),
            "",
            REPO,
        );
        assert_eq!(id.uid(), "example_mod");
        assert_eq!(id.kind(), IdentityKind::Named);
    }

    #[test]
    fn test_identity_from_foreign_url_is_escaped() {
        let id = synthesize_identity(Some("https://other.example.com/x.py"), "", REPO);
        assert_eq!(id.kind(), IdentityKind::Named);
        assert!(id.uid().contains("%d"));
        assert!(!id.uid().contains('.'));
    }

    #[test]
    fn test_identity_from_class_name() {
        let id = synthesize_identity(None, "class ExampleMod:\n    pass\n", REPO);
        assert_eq!(id.uid(), "ExampleMod");
        assert_eq!(id.kind(), IdentityKind::Parsed);
    }

    #[test]
    fn test_identity_random_fallback() {
        let id = synthesize_identity(None, "not ( valid % source", REPO);
        assert_eq!(id.kind(), IdentityKind::Random);
    }

    #[test]
    fn test_same_source_twice_distinct_without_name() {
        let text = "def f():\n    pass\n";
        let a = synthesize_identity(None, text, REPO);
        let b = synthesize_identity(None, text, REPO);
        assert_ne!(a, b);
    }

    #[test]
    fn test_same_source_twice_stable_with_name() {
        let a = synthesize_identity(Some("example"), "", REPO);
        let b = synthesize_identity(Some("example"), "", REPO);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_media_probe_success() {
        assert!(media_tool_available("true").await);
    }

    #[tokio::test]
    async fn test_media_probe_missing_tool() {
        assert!(!media_tool_available("definitely-not-a-media-tool").await);
    }
}
