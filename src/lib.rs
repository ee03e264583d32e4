//! # Telemod
//!
//! Dynamic module loader and backup jobs for Telegram userbot hosts.
//!
//! Telemod provides the two "glue" plugin modules a userbot host needs to
//! manage its own extensions at runtime: a loader that fetches, inspects and
//! registers remote plugin modules without restarting the process, and a
//! periodic database-backup job.
//!
//! ## Architecture
//!
//! The loader is split into four cooperating components:
//!
//! - **Resolver**: turns a bare name or URL into raw source text, via a
//!   cached remote catalog or a direct fetch
//! - **Manifest**: static inspection of source text for scope directives,
//!   version requirements and declared dependencies
//! - **Installer**: on-demand installation of missing packages through an
//!   external package manager
//! - **Registrar**: compiles the source under a synthesized identity, wires
//!   the resulting plugin into the live registry and drives its lifecycle,
//!   rolling back on any failure
//!
//! The host runtime itself (Telegram client, key-value database, inline UI,
//! translator) is consumed through the narrow contracts in [`host`]; the
//! compile step for untrusted source lives behind [`plugin::Runtime`].
//!
//! ## Quick Start
//!
//! ```ignore
//! let loader = Loader::new(LoaderConfig::default(), host, runtime);
//! loader.client_ready();
//! loader.download_and_install("example_mod", None).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::map_unwrap_or)]
#![allow(clippy::too_many_lines)]

pub mod backup;
pub mod host;
pub mod plugin;

pub use backup::BackupJob;
pub use host::{Client, Database, Entity, Host, InlineUi, Responder, Translator};
pub use plugin::{
    LoadError, LoadReport, Loader, LoaderConfig, Manifest, Plugin, PluginIdentity, PluginSource,
    Registry, Runtime,
};
