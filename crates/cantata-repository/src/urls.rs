//! URL templates pointing back at this server.

/// Builds the local URLs written into served documents.
///
/// With an empty public URL every template is a host-relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalUrls {
    public_url: String,
}

impl LocalUrls {
    /// Create from the configured public URL.
    #[must_use]
    pub fn new(public_url: &str) -> Self {
        Self {
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    /// Absolute form of a server path.
    #[must_use]
    pub fn path(&self, path: &str) -> String {
        format!("{}{path}", self.public_url)
    }

    fn mirror(&self, alias: &str, rest: &str) -> String {
        self.path(&format!("/mirror/{alias}{rest}"))
    }

    /// v2 metadata template for a mirror.
    #[must_use]
    pub fn metadata_url(&self, alias: &str) -> String {
        self.mirror(alias, "/p2/%package%.json")
    }

    /// v1 provider template for a mirror.
    #[must_use]
    pub fn providers_url(&self, alias: &str, with_hash: bool) -> String {
        if with_hash {
            self.mirror(alias, "/p/%package%$%hash%.json")
        } else {
            self.mirror(alias, "/p/%package%.json")
        }
    }

    /// Lazy v1 provider template for a mirror.
    #[must_use]
    pub fn providers_lazy_url(&self, alias: &str) -> String {
        self.mirror(alias, "/p/%package%.json")
    }

    /// Dist mirror template for a mirror.
    #[must_use]
    pub fn dist_url(&self, alias: &str) -> String {
        self.mirror(alias, "/zipball/%package%/%version%/ref%reference%.%type%")
    }
}
