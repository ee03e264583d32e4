//! Loader configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::manifest::parse_version_triple;

/// Default primary module repository.
pub const DEFAULT_MODULES_REPO: &str =
    "https://raw.githubusercontent.com/Netuzb/FTG-Modules/main/";

/// Loader settings, fixed at construction. Runtime state (chosen preset,
/// persisted module mapping, subscribe preferences) lives in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Fully qualified URL of the primary module repo.
    pub modules_repo: String,

    /// Additional repos to load from.
    pub additional_repos: Vec<String>,

    /// Include the module link in the load summary.
    pub share_link: bool,

    /// Offer to subscribe to a module developer's channel.
    pub suggest_subscribe: bool,

    /// The host's own version, compared against `hikka_min` directives.
    pub host_version: (u32, u32, u32),

    /// Command prefix used when rendering per-command docs.
    pub command_prefix: String,

    /// Package installer executable, e.g. `pip3`.
    pub installer_program: String,

    /// External media tool probed for the `ffmpeg` scope.
    pub media_tool: String,

    /// Directory where loaded modules are saved when save-to-fs is active.
    /// `None` disables saving entirely.
    pub modules_dir: Option<PathBuf>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            modules_repo: DEFAULT_MODULES_REPO.to_string(),
            additional_repos: vec![DEFAULT_MODULES_REPO.to_string()],
            share_link: false,
            suggest_subscribe: true,
            host_version: parse_version_triple(env!("CARGO_PKG_VERSION")).unwrap_or((0, 0, 0)),
            command_prefix: ".".to_string(),
            installer_program: "pip3".to_string(),
            media_tool: "ffmpeg".to_string(),
            modules_dir: None,
        }
    }
}

impl LoaderConfig {
    /// Primary plus additional repos, in lookup order. Non-HTTP entries are
    /// skipped; the primary repo always comes first.
    pub fn repos(&self, only_primary: bool) -> Vec<String> {
        let mut repos = vec![self.modules_repo.clone()];
        if !only_primary {
            repos.extend(self.additional_repos.iter().cloned());
        }
        repos.retain(|r| r.starts_with("http"));
        repos
    }
}
