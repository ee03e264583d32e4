//! The narrow trust boundary around dynamic code loading.
//!
//! Compiling fetched source text into executable code is the one unsafe
//! primitive in the loader. It is isolated behind [`Runtime`]: the host
//! hands in an engine that turns source text into a [`Plugin`] handle with
//! fixed, versioned entry points, and the registrar never touches the
//! compiled unit except through that interface.

use async_trait::async_trait;
use std::sync::Arc;

use crate::host::{Client, Database, Translator};

use super::{CommandSpec, InlineHandlerSpec, PluginIdentity, PluginSource};

/// Failure modes of the compile/instantiate step.
#[derive(Debug)]
pub enum CompileError {
    /// An import could not be resolved; names the missing package when the
    /// engine can tell.
    MissingDependency {
        /// Missing package name, as reported by the engine.
        package: Option<String>,
    },
    /// The plugin's own setup code refused the load. Surfaced verbatim.
    Rejected(String),
    /// Anything else; detail is logged, a generic message is surfaced.
    Failed(anyhow::Error),
}

/// Failure modes of the post-compile lifecycle hooks.
#[derive(Debug)]
pub enum HookError {
    /// The plugin refused the load. Surfaced verbatim.
    Rejected(String),
    /// The plugin withdrew itself, optionally with a message.
    SelfUnload(Option<String>),
    /// Anything else; detail is logged, a generic message is surfaced.
    Failed(anyhow::Error),
}

/// Engine that compiles untrusted source text into a live plugin.
///
/// Implemented by the host (an embedded interpreter, a sandboxed runtime);
/// tests use a scripted fake.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Compile `source` under `identity` and instantiate its primary class.
    async fn compile(
        &self,
        source: &PluginSource,
        identity: &PluginIdentity,
    ) -> Result<Box<dyn Plugin>, CompileError>;

    /// Drop import-system caches after packages were installed, so a retry
    /// sees them.
    fn invalidate_caches(&self) {}
}

/// A compiled, instantiated plugin.
///
/// The registrar drives `configure` and `client_ready` exactly once each,
/// in that order, and removes the plugin from the registry if either fails.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Human-readable module name for the load summary.
    fn display_name(&self) -> String;

    /// Declared module version, if any.
    fn version(&self) -> Option<(u32, u32, u32)> {
        None
    }

    /// Module-level documentation, if any.
    fn doc(&self) -> Option<String> {
        None
    }

    /// Commands this plugin exposes.
    fn commands(&self) -> Vec<CommandSpec> {
        Vec::new()
    }

    /// Inline handlers this plugin exposes.
    fn inline_handlers(&self) -> Vec<InlineHandlerSpec> {
        Vec::new()
    }

    /// Inject configuration dependencies before the ready hook.
    async fn configure(
        &mut self,
        db: Arc<dyn Database>,
        translator: Arc<dyn Translator>,
    ) -> Result<(), HookError>;

    /// The ready hook, invoked with the live client, database and the
    /// registry of all active clients.
    async fn client_ready(
        &mut self,
        client: Arc<dyn Client>,
        db: Arc<dyn Database>,
        allclients: &[Arc<dyn Client>],
    ) -> Result<(), HookError>;
}
