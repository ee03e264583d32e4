//! Manifest extraction from plugin source text.
//!
//! A manifest is derived by static inspection of the source: directive
//! comments declare required host capabilities, a minimum host version, the
//! module's author and its package requirements. Nothing here executes the
//! text or performs I/O.

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches a `# requires:` directive line with URL-safe package tokens.
static VALID_PACKAGES: Lazy<Regex> = Lazy::new(|| {
    let token = r"[-\[\]_.~:/?#@!$&'()*+,;%<=>a-zA-Z0-9]+";
    Regex::new(&format!(r"(?m)^\s*# ?requires:(?: ?)((?:{token} )*(?:{token}))\s*$"))
        .expect("requires pattern")
});

/// Matches the minimum-host-version directive, e.g. `# scope: hikka_min 1.2.3`.
static MIN_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"# ?scope: ?hikka_min ((?:\d+\.){2}\d+)").expect("version pattern"));

/// Matches the author directive, e.g. `# meta developer: @example`.
static DEVELOPER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"# ?meta developer: ?(.+)").expect("developer pattern"));

/// Matches the first top-level class declaration in the source.
static CLASS_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^class\s+([A-Za-z_][A-Za-z0-9_]*)").expect("class pattern"));

/// Host capabilities a module declares it needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Scopes {
    /// Requires the external media tool.
    pub ffmpeg: bool,
    /// Requires the inline-UI subsystem.
    pub inline: bool,
    /// Suppress the per-command docs in the load notification.
    pub disable_onload_docs: bool,
}

/// Facts extracted from a plugin's source text. Never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    /// Capability scopes requested by the module.
    pub scopes: Scopes,
    /// Declared minimum host version.
    pub min_version: Option<(u32, u32, u32)>,
    /// Declared author identifier, verbatim (trimmed).
    pub developer: Option<String>,
    /// Declared package requirements, in declaration order.
    pub requirements: Vec<String>,
}

impl Manifest {
    /// Extract a manifest from source text.
    pub fn extract(text: &str) -> Self {
        let mut scopes = Scopes::default();

        // A scope directive is a line exactly equal to `#scope:<token>`
        // once internal spaces are removed; unknown tokens are ignored.
        for line in text.lines() {
            match line.replace(' ', "").as_str() {
                "#scope:ffmpeg" => scopes.ffmpeg = true,
                "#scope:inline" => scopes.inline = true,
                "#scope:disable_onload_docs" => scopes.disable_onload_docs = true,
                _ => {}
            }
        }

        let min_version = MIN_VERSION
            .captures(text)
            .and_then(|c| parse_version_triple(&c[1]));

        let developer = DEVELOPER
            .captures(text)
            .map(|c| c[1].trim().to_string());

        let requirements = VALID_PACKAGES
            .captures(text)
            .map(|c| {
                c[1].split_whitespace()
                    .filter(|tok| !tok.starts_with(['-', '_', '.']))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self { scopes, min_version, developer, requirements }
    }
}

/// Best-effort scan for the primary class name declared in the source.
///
/// Used only for identity synthesis; `None` falls back to a random identity
/// and never aborts a load.
pub fn parse_class_name(text: &str) -> Option<String> {
    CLASS_NAME.captures(text).map(|c| c[1].to_string())
}

/// Parse `major.minor.patch` into a tuple for lexicographic comparison.
pub fn parse_version_triple(version: &str) -> Option<(u32, u32, u32)> {
    let mut parts = version.split('.').map(|p| p.parse::<u32>().ok());
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(Some(a)), Some(Some(b)), Some(Some(c)), None) => Some((a, b, c)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_directives_yields_default() {
        let manifest = Manifest::extract("class X:\n    pass\n");
        assert_eq!(manifest, Manifest::default());
    }

    #[test]
    fn test_developer_extracted_once_trimmed() {
        let manifest = Manifest::extract("# meta developer:   @example_dev  \nclass X: pass");
        assert_eq!(manifest.developer.as_deref(), Some("@example_dev"));
    }

    #[test]
    fn test_scope_detection_tolerates_spaces() {
        let manifest = Manifest::extract("# scope: ffmpeg\n#scope:inline\nclass X: pass");
        assert!(manifest.scopes.ffmpeg);
        assert!(manifest.scopes.inline);
        assert!(!manifest.scopes.disable_onload_docs);
    }

    #[test]
    fn test_unknown_scope_ignored() {
        let manifest = Manifest::extract("#scope:quantum\nclass X: pass");
        assert_eq!(manifest.scopes, Scopes::default());
    }

    #[test]
    fn test_min_version_parsed() {
        let manifest = Manifest::extract("# scope: hikka_min 1.2.10\nclass X: pass");
        assert_eq!(manifest.min_version, Some((1, 2, 10)));
    }

    #[test]
    fn test_requirements_listed_in_order() {
        let manifest = Manifest::extract("# requires: foo bar\nclass X: pass");
        assert_eq!(manifest.requirements, vec!["foo", "bar"]);
    }

    #[test]
    fn test_requirements_filter_option_injection() {
        let manifest = Manifest::extract("# requires: --index-url=evil foo\nclass X: pass");
        assert_eq!(manifest.requirements, vec!["foo"]);
    }

    #[test]
    fn test_requirements_filter_underscore_and_dot() {
        let manifest = Manifest::extract("# requires: _private .hidden pkg\nclass X: pass");
        assert_eq!(manifest.requirements, vec!["pkg"]);
    }

    #[test]
    fn test_class_name_scan() {
        let text = "import x\n\nclass LoaderMod(Module):\n    pass\n";
        assert_eq!(parse_class_name(text).as_deref(), Some("LoaderMod"));
    }

    #[test]
    fn test_class_name_absent() {
        assert_eq!(parse_class_name("def f():\n    pass\n"), None);
    }

    #[test]
    fn test_indented_class_not_primary() {
        assert_eq!(parse_class_name("    class Inner: pass\n"), None);
    }

    #[test]
    fn test_version_triple_rejects_garbage() {
        assert_eq!(parse_version_triple("1.2"), None);
        assert_eq!(parse_version_triple("1.2.x"), None);
        assert_eq!(parse_version_triple("1.2.3.4"), None);
        assert_eq!(parse_version_triple("1.2.3"), Some((1, 2, 3)));
    }
}
