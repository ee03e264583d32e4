//! Loader error taxonomy.

use thiserror::Error;

/// Result type for load operations.
pub type LoadResult<T> = Result<T, LoadError>;

/// Everything that can go wrong while resolving, compiling and registering
/// a plugin.
///
/// The explicit variants ([`LoadError::Rejected`], [`LoadError::SelfUnload`])
/// carry messages raised by the plugin itself and are surfaced to the user
/// verbatim; every other variant maps to a generic localized message while
/// the full detail goes to the log.
#[derive(Debug, Error)]
pub enum LoadError {
    /// No module by that name in the catalog, or the URL answered 404.
    #[error("module not found")]
    NotFound,

    /// Fetched bytes were not valid UTF-8 text.
    #[error("module source is not valid UTF-8")]
    InvalidEncoding,

    /// The module requires an external media tool that is not on the host.
    #[error("required external tool '{0}' is not available")]
    MissingExternalTool(String),

    /// The module requires the inline subsystem, which did not initialize.
    #[error("inline subsystem is not initialized")]
    InlineUnavailable,

    /// The module declares a minimum host version above ours.
    #[error("module requires host version {}.{}.{}", .required.0, .required.1, .required.2)]
    VersionTooOld {
        /// Declared minimum host version.
        required: (u32, u32, u32),
    },

    /// The package installer exited non-zero.
    #[error("requirements installation failed")]
    RequirementsInstallFailed,

    /// Requirements installed, but the running process cannot pick them up
    /// without a restart.
    #[error("requirements installed, restart required for '{package}'")]
    RequirementsRestartNeeded {
        /// The package that still fails to import.
        package: String,
    },

    /// A dependency failure with no requirements to install.
    #[error("nothing to install")]
    NothingToInstall,

    /// The plugin deliberately refused to load. Message is surfaced verbatim.
    #[error("{0}")]
    Rejected(String),

    /// The plugin deliberately withdrew itself during its ready hook.
    #[error("{}", .message.as_deref().unwrap_or("module unloaded itself"))]
    SelfUnload {
        /// Optional message raised with the signal.
        message: Option<String>,
    },

    /// Unclassified failure; detail is in the log.
    #[error("loading failed")]
    LoadFailed,

    /// Network transport failure while fetching source or catalog data.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Filesystem failure (reading a local module, saving to disk).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoadError {
    /// True for failures the plugin raised on purpose; their messages are
    /// shown to the user as-is.
    pub fn is_explicit(&self) -> bool {
        matches!(self, Self::Rejected(_) | Self::SelfUnload { .. })
    }
}
