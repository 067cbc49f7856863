//! Per-mirror proxy options.

use crate::error::{RepositoryError, Result};
use crate::root::RootDocument;
use cantata_config::MirrorConfig;
use cantata_core::{GlobSet, JsonMap};
use std::collections::BTreeSet;
use url::Url;

/// Credentials sent to a mirror's own host.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// HTTP basic auth.
    Basic {
        /// Username.
        username: String,
        /// Password.
        password: String,
    },
    /// Bearer token.
    Bearer(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Self::Bearer(_) => f.debug_tuple("Bearer").field(&"***").finish(),
        }
    }
}

/// Static include shard built by an eager sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeFile {
    /// Path relative to the mirror root, e.g. `include/all$<sha1>.json`.
    pub path: String,
    /// sha1 of the shard body.
    pub sha1: String,
}

/// URL templates advertised by the upstream root document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamTemplates {
    /// v2 `metadata-url`.
    pub metadata_url: Option<String>,
    /// v1 `providers-url`.
    pub providers_url: Option<String>,
    /// v1 `providers-lazy-url`, when it is a template rather than a flag.
    pub providers_lazy_url: Option<String>,
    /// v2 `metadata-changes-url`.
    pub metadata_changes_url: Option<String>,
}

impl UpstreamTemplates {
    /// Template used to look one package up in v1 format.
    #[must_use]
    pub fn v1_lookup(&self) -> Option<&str> {
        self.providers_lazy_url
            .as_deref()
            .or(self.providers_url.as_deref())
    }
}

/// Immutable description of one mirror.
///
/// Values derived from the upstream root document are set through
/// [`ProxyOptions::with_root`], which returns a new value.
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    alias: String,
    url: Url,
    credentials: Option<Credentials>,
    lazy: bool,
    upstream_lazy: bool,
    has_v2_api: bool,
    v2_sync_api: bool,
    disable_v1: bool,
    disable_v2: bool,
    available_packages: BTreeSet<String>,
    available_patterns: GlobSet,
    root_providers: JsonMap,
    templates: UpstreamTemplates,
    sync_interval: Option<u64>,
    dist_mirror: bool,
    parent_notify: bool,
    info: Option<String>,
    include: Option<IncludeFile>,
}

impl ProxyOptions {
    /// Build options from configuration.
    ///
    /// # Errors
    /// Returns error if the URL or the package patterns are invalid.
    pub fn from_config(alias: &str, config: &MirrorConfig) -> Result<Self> {
        let url = Url::parse(config.url.trim_end_matches('/')).map_err(|e| {
            RepositoryError::InvalidUrl {
                url: config.url.clone(),
                message: e.to_string(),
            }
        })?;
        let available_patterns = GlobSet::new(config.available_package_patterns.iter().cloned())
            .map_err(|e| RepositoryError::InvalidConfig {
                message: format!("mirror '{alias}': {e}"),
            })?;
        let credentials = match (&config.token, &config.http_basic) {
            (Some(token), _) => Some(Credentials::Bearer(token.clone())),
            (None, Some(basic)) => Some(Credentials::Basic {
                username: basic.username.clone(),
                password: basic.password.clone(),
            }),
            (None, None) => None,
        };

        Ok(Self {
            alias: alias.to_string(),
            url,
            credentials,
            lazy: config.lazy,
            upstream_lazy: false,
            has_v2_api: false,
            v2_sync_api: false,
            disable_v1: config.disable_v1,
            disable_v2: config.disable_v2,
            available_packages: config
                .available_packages
                .iter()
                .map(|name| name.to_lowercase())
                .collect(),
            available_patterns,
            root_providers: JsonMap::new(),
            templates: UpstreamTemplates::default(),
            sync_interval: config.sync_interval,
            dist_mirror: config.dist_mirror,
            parent_notify: config.parent_notify,
            info: config.info.clone(),
            include: None,
        })
    }

    /// Options with a bare upstream URL, used by the import crawler.
    ///
    /// # Errors
    /// Returns error if the URL is invalid.
    pub fn for_url(url: &str, credentials: Option<Credentials>) -> Result<Self> {
        let mut options = Self::from_config(
            "import",
            &MirrorConfig {
                url: url.to_string(),
                ..MirrorConfig::default()
            },
        )?;
        options.credentials = credentials;
        Ok(options)
    }

    /// Copy with values derived from a freshly fetched root document.
    #[must_use]
    pub fn with_root(&self, root: &RootDocument) -> Self {
        let mut next = self.clone();
        next.has_v2_api = root.metadata_url.is_some();
        next.v2_sync_api = root.metadata_changes_url.is_some();
        next.upstream_lazy = root.is_lazy();
        next.root_providers = if next.is_lazy() {
            JsonMap::new()
        } else {
            root.providers.clone().unwrap_or_default()
        };
        next.templates = UpstreamTemplates {
            metadata_url: root.metadata_url.clone(),
            providers_url: root.providers_url.clone(),
            providers_lazy_url: root
                .providers_lazy_url
                .as_ref()
                .and_then(|v| v.as_str())
                .filter(|template| !template.is_empty())
                .map(String::from),
            metadata_changes_url: root.metadata_changes_url.clone(),
        };
        next
    }

    /// Copy pointing at a new include shard.
    #[must_use]
    pub fn with_include(&self, include: Option<IncludeFile>) -> Self {
        let mut next = self.clone();
        next.include = include;
        next
    }

    /// Mirror alias.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Upstream root URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Credentials.
    #[must_use]
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Credentials to send to `url`: only when it is on the mirror's host.
    #[must_use]
    pub fn credentials_for(&self, url: &Url) -> Option<&Credentials> {
        let same_origin = url.scheme() == self.url.scheme()
            && url.host_str() == self.url.host_str()
            && url.port_or_known_default() == self.url.port_or_known_default();
        if same_origin {
            self.credentials.as_ref()
        } else {
            None
        }
    }

    /// Resolve a path or URL found in upstream metadata against the mirror
    /// root. Absolute paths resolve against the host.
    ///
    /// # Errors
    /// Returns error if the result is not a valid URL.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        let mut base = self.url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path).map_err(|e| RepositoryError::InvalidUrl {
            url: path.to_string(),
            message: e.to_string(),
        })
    }

    /// Lazy mode: configured, or advertised by upstream.
    #[must_use]
    pub fn is_lazy(&self) -> bool {
        self.lazy || self.upstream_lazy
    }

    /// Configured lazy flag only.
    #[must_use]
    pub fn is_configured_lazy(&self) -> bool {
        self.lazy
    }

    /// Upstream advertised `providers-lazy-url`.
    #[must_use]
    pub fn is_upstream_lazy(&self) -> bool {
        self.upstream_lazy
    }

    /// Upstream exposes v2 metadata files.
    #[must_use]
    pub fn has_v2_api(&self) -> bool {
        self.has_v2_api
    }

    /// Upstream exposes a metadata change feed.
    #[must_use]
    pub fn v2_sync_api(&self) -> bool {
        self.v2_sync_api
    }

    /// v1 provider format is not served.
    #[must_use]
    pub fn disable_v1_format(&self) -> bool {
        self.disable_v1
    }

    /// v2 metadata format is not served.
    #[must_use]
    pub fn disable_v2_format(&self) -> bool {
        self.disable_v2
    }

    /// Explicit package allowlist.
    #[must_use]
    pub fn available_packages(&self) -> &BTreeSet<String> {
        &self.available_packages
    }

    /// Glob allowlist.
    #[must_use]
    pub fn available_patterns(&self) -> &GlobSet {
        &self.available_patterns
    }

    /// Whether a package may be served through this mirror.
    ///
    /// The explicit list wins over patterns; with neither, everything is
    /// allowed.
    #[must_use]
    pub fn is_package_allowed(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        if !self.available_packages.is_empty() {
            self.available_packages.contains(&name)
        } else if !self.available_patterns.is_empty() {
            self.available_patterns.is_match(&name)
        } else {
            true
        }
    }

    /// Upstream `providers` listing, eager v1 only.
    #[must_use]
    pub fn root_providers(&self) -> &JsonMap {
        &self.root_providers
    }

    /// Upstream URL templates, known once a root document was seen.
    #[must_use]
    pub fn templates(&self) -> &UpstreamTemplates {
        &self.templates
    }

    /// Configured sync interval override.
    #[must_use]
    pub fn sync_interval(&self) -> Option<u64> {
        self.sync_interval
    }

    /// Dists are served through this server.
    #[must_use]
    pub fn is_dist_mirror(&self) -> bool {
        self.dist_mirror
    }

    /// Keep upstream `notify-batch`.
    #[must_use]
    pub fn parent_notify(&self) -> bool {
        self.parent_notify
    }

    /// Banner injected into the root document.
    #[must_use]
    pub fn info(&self) -> Option<&str> {
        self.info.as_deref()
    }

    /// Static include shard, once built.
    #[must_use]
    pub fn include(&self) -> Option<&IncludeFile> {
        self.include.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cantata_config::HttpBasic;
    use serde_json::json;

    fn config(url: &str) -> MirrorConfig {
        MirrorConfig {
            url: url.to_string(),
            ..MirrorConfig::default()
        }
    }

    #[test]
    fn token_wins_over_basic() {
        let mut cfg = config("https://repo.example.com");
        cfg.http_basic = Some(HttpBasic {
            username: "u".into(),
            password: "p".into(),
        });
        cfg.token = Some("t".into());
        let options = ProxyOptions::from_config("m", &cfg).unwrap();
        assert_eq!(options.credentials(), Some(&Credentials::Bearer("t".into())));
        assert!(!format!("{:?}", Credentials::Bearer("hunter2".into())).contains("hunter2"));
    }

    #[test]
    fn credentials_only_for_same_origin() {
        let mut cfg = config("https://repo.example.com/composer");
        cfg.token = Some("t".into());
        let options = ProxyOptions::from_config("m", &cfg).unwrap();
        let own = Url::parse("https://repo.example.com/dists/a.zip").unwrap();
        let foreign = Url::parse("https://codeload.github.com/a/b/zip/abc").unwrap();
        assert!(options.credentials_for(&own).is_some());
        assert!(options.credentials_for(&foreign).is_none());
    }

    #[test]
    fn resolve_relative_and_absolute() {
        let options =
            ProxyOptions::from_config("m", &config("https://repo.example.com/composer")).unwrap();
        assert_eq!(
            options.resolve("packages.json").unwrap().as_str(),
            "https://repo.example.com/composer/packages.json"
        );
        assert_eq!(
            options.resolve("/p2/acme/foo.json").unwrap().as_str(),
            "https://repo.example.com/p2/acme/foo.json"
        );
        assert_eq!(
            options.resolve("https://cdn.example.com/x.json").unwrap().as_str(),
            "https://cdn.example.com/x.json"
        );
    }

    #[test]
    fn allowlist_precedence() {
        let mut cfg = config("https://repo.example.com");
        cfg.available_package_patterns = vec!["acme/*".into()];
        let options = ProxyOptions::from_config("m", &cfg).unwrap();
        assert!(options.is_package_allowed("acme/foo"));
        assert!(options.is_package_allowed("ACME/Foo"));
        assert!(!options.is_package_allowed("other/foo"));

        cfg.available_packages = vec!["other/foo".into()];
        let options = ProxyOptions::from_config("m", &cfg).unwrap();
        assert!(!options.is_package_allowed("acme/foo"));
        assert!(options.is_package_allowed("other/foo"));

        let open = ProxyOptions::from_config("m", &config("https://repo.example.com")).unwrap();
        assert!(open.is_package_allowed("anything/at-all"));
    }

    #[test]
    fn with_root_returns_new_value() {
        let options = ProxyOptions::from_config("m", &config("https://repo.example.com")).unwrap();
        let root: RootDocument = serde_json::from_value(json!({
            "metadata-url": "/p2/%package%.json",
            "metadata-changes-url": "/metadata/changes.json",
            "providers": {"acme/foo": {"sha256": "abc"}}
        }))
        .unwrap();
        let derived = options.with_root(&root);
        assert!(derived.has_v2_api());
        assert!(derived.v2_sync_api());
        assert!(!derived.is_lazy());
        assert!(derived.root_providers().contains_key("acme/foo"));
        assert_eq!(
            derived.templates().metadata_url.as_deref(),
            Some("/p2/%package%.json")
        );
        assert!(!options.has_v2_api());
        assert_eq!(derived.url(), options.url());
    }

    #[test]
    fn upstream_lazy_detection() {
        let options = ProxyOptions::from_config("m", &config("https://repo.example.com")).unwrap();
        let root: RootDocument = serde_json::from_value(json!({
            "providers-lazy-url": "/p/%package%.json",
            "providers": {"acme/foo": {"sha256": "abc"}}
        }))
        .unwrap();
        let derived = options.with_root(&root);
        assert!(derived.is_lazy());
        assert!(!derived.is_configured_lazy());
        assert!(derived.root_providers().is_empty());
        assert_eq!(derived.templates().v1_lookup(), Some("/p/%package%.json"));

        let flag_off: RootDocument = serde_json::from_value(json!({
            "providers-lazy-url": false,
            "providers": {"acme/foo": {"sha256": "abc"}}
        }))
        .unwrap();
        let derived = options.with_root(&flag_off);
        assert!(!derived.is_lazy());
        assert_eq!(derived.root_providers().len(), 1);
        assert_eq!(derived.templates().v1_lookup(), None);
    }
}
