//! Source resolution: repo catalogs, blob-link rewriting, fetching.
//!
//! A catalog is built from one or more configured repos, each serving a
//! `<preset>.txt` index of newline-separated relative links. Indexes are
//! cached per repo+preset pair; an unavailable index is an empty result,
//! not a failure.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;

use super::{LoadError, LoadResult, LoaderConfig, Origin, PluginSource};

/// Cache duration for catalog indexes, per repo+preset pair.
const CACHE_DURATION: Duration = Duration::from_secs(5 * 60);

/// Matches human-browsable "blob view" URLs that serve HTML instead of the
/// raw module source.
static BLOB_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(https://github\.com/.*?/.*?/blob/.*\.py)|(https://gitlab\.com/.*?/.*?/-/blob/.*\.py)$",
    )
    .expect("blob pattern")
});

/// Rewrite a blob-view URL to its raw-content form.
///
/// Returns the fetchable URL and whether a rewrite happened.
pub fn rewrite_blob_url(url: &str) -> (String, bool) {
    if BLOB_URL.is_match(url) {
        (url.replace("/blob/", "/raw/"), true)
    } else {
        (url.to_string(), false)
    }
}

/// A fetched HTTP response, status and body only.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl FetchResponse {
    /// True for 2xx statuses.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP transport used by the resolver. Injected so tests run without a
/// network.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// GET a URL. Transport failures are errors; HTTP error statuses are
    /// returned as responses.
    async fn get(&self, url: &str) -> LoadResult<FetchResponse>;
}

/// Production [`Fetch`] implementation backed by reqwest.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with the loader's default timeout and user agent.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(format!("telemod/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn get(&self, url: &str) -> LoadResult<FetchResponse> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LoadError::Fetch(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| LoadError::Fetch(e.to_string()))?
            .to_vec();

        Ok(FetchResponse { status, body })
    }
}

struct CacheSlot {
    expires: Instant,
    links: Vec<String>,
}

/// Turns a user-supplied identifier (bare name or URL) into plugin source.
pub struct Resolver {
    config: Arc<LoaderConfig>,
    fetch: Arc<dyn Fetch>,
    /// Catalog index cache, keyed by `<repo>/<preset>`.
    links_cache: RwLock<HashMap<String, CacheSlot>>,
}

impl Resolver {
    /// Create a resolver over the given transport.
    pub fn new(config: Arc<LoaderConfig>, fetch: Arc<dyn Fetch>) -> Self {
        Self { config, fetch, links_cache: RwLock::new(HashMap::new()) }
    }

    /// Resolve an identifier to source text.
    ///
    /// URLs are fetched directly (after blob rewriting); bare names are
    /// looked up in the catalog first.
    pub async fn resolve(&self, identifier: &str) -> LoadResult<PluginSource> {
        let identifier = identifier.trim();

        if is_url(identifier) {
            let (url, blob_link) = rewrite_blob_url(identifier);
            self.fetch_source(&url, blob_link).await
        } else {
            let url = self.find_link(identifier).await.ok_or(LoadError::NotFound)?;
            self.fetch_source(&url, false).await
        }
    }

    /// Fetch one module source URL.
    async fn fetch_source(&self, url: &str, blob_link: bool) -> LoadResult<PluginSource> {
        let response = self.fetch.get(url).await?;

        if response.status == 404 {
            return Err(LoadError::NotFound);
        }

        if !response.ok() {
            return Err(LoadError::Fetch(format!("HTTP {} for {url}", response.status)));
        }

        let text = String::from_utf8(response.body).map_err(|_| LoadError::InvalidEncoding)?;

        Ok(PluginSource { text, origin: Origin::Url(url.to_string()), blob_link })
    }

    /// The cached index of one repo+preset pair. Unavailable indexes yield
    /// an empty list.
    async fn repo_index(&self, repo: &str, preset: &str) -> Vec<String> {
        let repo = repo.trim_end_matches('/');
        let key = format!("{repo}/{preset}");

        if let Some(slot) = self.links_cache.read().get(&key) {
            if slot.expires > Instant::now() {
                return slot.links.clone();
            }
        }

        let url = format!("{repo}/{preset}.txt");
        let response = match self.fetch.get(&url).await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(repo, preset, error = %e, "catalog index fetch failed");
                return Vec::new();
            }
        };

        if !response.ok() {
            tracing::debug!(repo, preset, status = response.status, "catalog index unavailable");
            return Vec::new();
        }

        let body = String::from_utf8_lossy(&response.body);
        let links: Vec<String> = body
            .trim()
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        self.links_cache.write().insert(
            key,
            CacheSlot { expires: Instant::now() + CACHE_DURATION, links: links.clone() },
        );

        links
    }

    /// The catalog for a preset: repo URL to a mapping of synthesized entry
    /// keys onto absolute module links. `None` and `"none"` presets resolve
    /// to `minimal`.
    pub async fn repo_list(
        &self,
        preset: Option<&str>,
        only_primary: bool,
    ) -> HashMap<String, HashMap<String, String>> {
        let preset = match preset {
            None | Some("none") => "minimal",
            Some(p) => p,
        };

        let repos = self.config.repos(only_primary);
        let indexes = join_all(repos.iter().map(|repo| self.repo_index(repo, preset))).await;

        repos
            .into_iter()
            .zip(indexes)
            .enumerate()
            .map(|(repo_id, (repo, links))| {
                let base = repo.trim_end_matches('/').to_string();
                let entries = dedupe(links)
                    .into_iter()
                    .enumerate()
                    .map(|(i, link)| (format!("Mod/{repo_id}/{i}"), format!("{base}/{link}.py")))
                    .collect();
                (repo, entries)
            })
            .collect()
    }

    /// Every known module link, primary repo first, deduplicated.
    pub async fn links_list(&self) -> Vec<String> {
        let mut links = Vec::new();

        for repo in self.config.repos(false) {
            let base = repo.trim_end_matches('/').to_string();
            for link in dedupe(self.repo_index(&repo, "full").await) {
                links.push(format!("{base}/{link}.py"));
            }
        }

        dedupe(links)
    }

    /// The first catalog link for `module_name`, matched case-insensitively
    /// on the `/<name>.py` suffix.
    pub async fn find_link(&self, module_name: &str) -> Option<String> {
        let needle = format!("/{}.py", module_name.to_lowercase());
        self.links_list()
            .await
            .into_iter()
            .find(|link| link.to_lowercase().ends_with(&needle))
    }
}

/// True for identifiers the resolver treats as direct URLs.
fn is_url(identifier: &str) -> bool {
    identifier.starts_with("http://") || identifier.starts_with("https://")
}

/// Deduplicate preserving first-seen order.
fn dedupe(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|i| seen.insert(i.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Serves canned responses and counts requests per URL.
    struct FakeFetch {
        responses: HashMap<String, FetchResponse>,
        hits: Mutex<Vec<String>>,
    }

    impl FakeFetch {
        fn new(responses: Vec<(&str, u16, &[u8])>) -> Self {
            Self {
                responses: responses
                    .into_iter()
                    .map(|(url, status, body)| {
                        (url.to_string(), FetchResponse { status, body: body.to_vec() })
                    })
                    .collect(),
                hits: Mutex::new(Vec::new()),
            }
        }

        fn hit_count(&self, url: &str) -> usize {
            self.hits.lock().iter().filter(|u| *u == url).count()
        }
    }

    #[async_trait]
    impl Fetch for FakeFetch {
        async fn get(&self, url: &str) -> LoadResult<FetchResponse> {
            self.hits.lock().push(url.to_string());
            Ok(self
                .responses
                .get(url)
                .cloned()
                .unwrap_or(FetchResponse { status: 404, body: Vec::new() }))
        }
    }

    fn resolver_with(fetch: Arc<FakeFetch>) -> Resolver {
        let config = LoaderConfig {
            modules_repo: "https://mods.example.com/main/".to_string(),
            additional_repos: Vec::new(),
            ..LoaderConfig::default()
        };
        Resolver::new(Arc::new(config), fetch)
    }

    #[test]
    fn test_blob_url_rewritten_to_raw() {
        let (url, blob) =
            rewrite_blob_url("https://github.com/acme/mods/blob/main/example.py");
        assert_eq!(url, "https://github.com/acme/mods/raw/main/example.py");
        assert!(blob);

        let (url, blob) =
            rewrite_blob_url("https://gitlab.com/acme/mods/-/blob/main/example.py");
        assert_eq!(url, "https://gitlab.com/acme/mods/-/raw/main/example.py");
        assert!(blob);
    }

    #[test]
    fn test_raw_url_untouched() {
        let raw = "https://github.com/acme/mods/raw/main/example.py";
        let (url, blob) = rewrite_blob_url(raw);
        assert_eq!(url, raw);
        assert!(!blob);
    }

    #[test]
    fn test_non_module_blob_url_untouched() {
        let (_, blob) = rewrite_blob_url("https://github.com/acme/mods/blob/main/README.md");
        assert!(!blob);
    }

    #[tokio::test]
    async fn test_repo_list_maps_index_lines() {
        let fetch = Arc::new(FakeFetch::new(vec![(
            "https://mods.example.com/main/minimal.txt",
            200,
            b"mod_a\nmod_b\n",
        )]));
        let resolver = resolver_with(fetch);

        let list = resolver.repo_list(Some("minimal"), true).await;
        let entries = &list["https://mods.example.com/main/"];

        assert_eq!(entries.len(), 2);
        let values: Vec<&String> = entries.values().collect();
        assert!(values.contains(&&"https://mods.example.com/main/mod_a.py".to_string()));
        assert!(values.contains(&&"https://mods.example.com/main/mod_b.py".to_string()));
    }

    #[tokio::test]
    async fn test_none_preset_resolves_to_minimal() {
        let fetch = Arc::new(FakeFetch::new(vec![(
            "https://mods.example.com/main/minimal.txt",
            200,
            b"mod_a\n",
        )]));
        let resolver = resolver_with(fetch.clone());

        let list = resolver.repo_list(None, true).await;
        assert_eq!(list["https://mods.example.com/main/"].len(), 1);
        assert_eq!(fetch.hit_count("https://mods.example.com/main/minimal.txt"), 1);
    }

    #[tokio::test]
    async fn test_index_cached_between_calls() {
        let fetch = Arc::new(FakeFetch::new(vec![(
            "https://mods.example.com/main/full.txt",
            200,
            b"mod_a\n",
        )]));
        let resolver = resolver_with(fetch.clone());

        resolver.links_list().await;
        resolver.links_list().await;

        assert_eq!(fetch.hit_count("https://mods.example.com/main/full.txt"), 1);
    }

    #[test]
    fn test_unavailable_index_is_empty_not_fatal() {
        let fetch = Arc::new(FakeFetch::new(vec![(
            "https://mods.example.com/main/full.txt",
            503,
            b"oops",
        )]));
        let resolver = resolver_with(fetch);

        assert!(tokio_test::block_on(resolver.links_list()).is_empty());
    }

    #[tokio::test]
    async fn test_find_link_case_insensitive() {
        let fetch = Arc::new(FakeFetch::new(vec![(
            "https://mods.example.com/main/full.txt",
            200,
            b"ExampleMod\n",
        )]));
        let resolver = resolver_with(fetch);

        let link = resolver.find_link("examplemod").await;
        assert_eq!(link.as_deref(), Some("https://mods.example.com/main/ExampleMod.py"));
        assert!(resolver.find_link("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_resolve_bare_name_not_in_catalog() {
        let fetch = Arc::new(FakeFetch::new(vec![(
            "https://mods.example.com/main/full.txt",
            200,
            b"other\n",
        )]));
        let resolver = resolver_with(fetch);

        assert!(matches!(resolver.resolve("missing").await, Err(LoadError::NotFound)));
    }

    #[tokio::test]
    async fn test_resolve_url_404_is_not_found() {
        let fetch = Arc::new(FakeFetch::new(vec![]));
        let resolver = resolver_with(fetch);

        let result = resolver.resolve("https://mods.example.com/gone.py").await;
        assert!(matches!(result, Err(LoadError::NotFound)));
    }

    #[tokio::test]
    async fn test_resolve_url_server_error_is_fetch_error() {
        let fetch = Arc::new(FakeFetch::new(vec![(
            "https://mods.example.com/flaky.py",
            500,
            b"",
        )]));
        let resolver = resolver_with(fetch);

        let result = resolver.resolve("https://mods.example.com/flaky.py").await;
        assert!(matches!(result, Err(LoadError::Fetch(_))));
    }

    #[tokio::test]
    async fn test_resolve_invalid_utf8() {
        let fetch = Arc::new(FakeFetch::new(vec![(
            "https://mods.example.com/binary.py",
            200,
            &[0xff, 0xfe, 0x00],
        )]));
        let resolver = resolver_with(fetch);

        let result = resolver.resolve("https://mods.example.com/binary.py").await;
        assert!(matches!(result, Err(LoadError::InvalidEncoding)));
    }

    #[tokio::test]
    async fn test_resolve_blob_url_fetches_raw_form() {
        let fetch = Arc::new(FakeFetch::new(vec![(
            "https://github.com/acme/mods/raw/main/example.py",
            200,
            b"class ExampleMod: pass\n",
        )]));
        let resolver = resolver_with(fetch.clone());

        let source = resolver
            .resolve("https://github.com/acme/mods/blob/main/example.py")
            .await
            .unwrap();

        assert!(source.blob_link);
        assert_eq!(fetch.hit_count("https://github.com/acme/mods/raw/main/example.py"), 1);
        assert!(matches!(source.origin, Origin::Url(ref u) if u.contains("/raw/")));
    }
}
