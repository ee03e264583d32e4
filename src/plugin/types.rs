//! Core plugin types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace prefix for synthesized module identities.
pub const MODULE_NAMESPACE: &str = "telemod.modules";

/// Where a plugin's source text came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    /// Fetched from a URL (catalog entry or direct link).
    Url(String),
    /// Read from a local file.
    Path(String),
    /// Supplied inline (pasted or attached source).
    Inline,
}

impl Origin {
    /// True for origins the loader persists across restarts.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Url(u) if u.starts_with("http"))
    }

    /// The origin as a display string; inline sources use the `<string>`
    /// sentinel.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Url(u) => u,
            Self::Path(p) => p,
            Self::Inline => "<string>",
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved plugin source text. Immutable once resolved.
#[derive(Debug, Clone)]
pub struct PluginSource {
    /// Raw source text.
    pub text: String,
    /// Where the text came from.
    pub origin: Origin,
    /// The origin required blob-to-raw URL rewriting before fetch.
    pub blob_link: bool,
}

impl PluginSource {
    /// Source supplied directly as text, with no meaningful origin.
    pub fn inline(text: impl Into<String>) -> Self {
        Self { text: text.into(), origin: Origin::Inline, blob_link: false }
    }
}

/// How a plugin identity was synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityKind {
    /// From a caller-supplied name.
    Named,
    /// From the primary class name parsed out of the source.
    Parsed,
    /// Random fallback token.
    Random,
}

/// Process-unique name a compiled plugin is registered under.
///
/// Collisions are avoided by construction: random identities embed a UUID,
/// and named identities are escaped to stay filename-safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PluginIdentity {
    uid: String,
    kind: IdentityKind,
}

impl PluginIdentity {
    /// Identity from a caller-supplied name. Literal `%` is escaped to `%%`
    /// and `.` is encoded as `%d` to keep the identity filename-safe.
    pub fn named(name: &str) -> Self {
        Self {
            uid: name.replace('%', "%%").replace('.', "%d"),
            kind: IdentityKind::Named,
        }
    }

    /// Identity from a class name parsed out of the source.
    pub fn parsed(class_name: &str) -> Self {
        Self { uid: class_name.to_string(), kind: IdentityKind::Parsed }
    }

    /// Random fallback identity.
    pub fn random() -> Self {
        Self {
            uid: format!("__extmod_{}", Uuid::new_v4()),
            kind: IdentityKind::Random,
        }
    }

    /// The bare identity token, without the namespace.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// How this identity was synthesized.
    pub fn kind(&self) -> IdentityKind {
        self.kind
    }

    /// The fully-qualified module name the compiled unit is registered as.
    pub fn full_name(&self) -> String {
        format!("{MODULE_NAMESPACE}.{}", self.uid)
    }
}

impl std::fmt::Display for PluginIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

/// A command exposed by a plugin, with its one-line doc.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Command name, without prefix.
    pub name: String,
    /// First line of the command's documentation.
    pub doc: Option<String>,
}

/// An inline handler exposed by a plugin, with its one-line doc.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineHandlerSpec {
    /// Handler name, as typed after the bot username.
    pub name: String,
    /// First line of the handler's documentation.
    pub doc: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_identity_escaping() {
        let id = PluginIdentity::named("my.mod%x");
        assert_eq!(id.uid(), "my%dmod%%x");
        assert_eq!(id.kind(), IdentityKind::Named);
    }

    #[test]
    fn test_full_name_uses_namespace() {
        let id = PluginIdentity::parsed("ExampleMod");
        assert_eq!(id.full_name(), "telemod.modules.ExampleMod");
    }

    #[test]
    fn test_random_identities_are_distinct() {
        let a = PluginIdentity::random();
        let b = PluginIdentity::random();
        assert_ne!(a, b);
        assert!(a.uid().starts_with("__extmod_"));
    }

    #[test]
    fn test_origin_remote() {
        assert!(Origin::Url("https://example.com/mod.py".into()).is_remote());
        assert!(!Origin::Path("/tmp/mod.py".into()).is_remote());
        assert!(!Origin::Inline.is_remote());
    }

    #[test]
    fn test_inline_origin_sentinel() {
        assert_eq!(Origin::Inline.as_str(), "<string>");
    }
}
