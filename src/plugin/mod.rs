//! Dynamic plugin loading for the userbot host.
//!
//! This module implements the loader pipeline: resolve an identifier to
//! source text, extract its manifest, compile it behind the [`Runtime`]
//! trust boundary, install missing dependencies on demand, and register the
//! live plugin with rollback on any failure.
//!
//! # Data flow
//!
//! ```text
//! identifier ──> Resolver ──> PluginSource ──> Manifest ──> Registrar
//!                                                              │
//!                                  Installer <── missing dep ──┘
//!                                  (retry compile once)
//! ```

mod config;
mod error;
mod installer;
mod manager;
mod manifest;
mod registrar;
mod registry;
mod resolver;
mod runtime;
mod types;

pub use config::{LoaderConfig, DEFAULT_MODULES_REPO};
pub use error::{LoadError, LoadResult};
pub use manager::{Loader, SaveChoice};
pub use manifest::{parse_class_name, parse_version_triple, Manifest, Scopes};
pub use registrar::{synthesize_identity, LoadReport, Registrar, SubscribeSuggestion};
pub use registry::{RegisteredPlugin, Registry};
pub use resolver::{rewrite_blob_url, Fetch, FetchResponse, HttpFetcher, Resolver};
pub use runtime::{CompileError, HookError, Plugin, Runtime};
pub use types::{
    CommandSpec, IdentityKind, InlineHandlerSpec, Origin, PluginIdentity, PluginSource,
    MODULE_NAMESPACE,
};

/// Database owner key for the loader's persisted state.
pub(crate) const DB_OWNER: &str = "Loader";
