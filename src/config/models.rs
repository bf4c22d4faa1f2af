//! Configuration data structures for panino applications.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files and
//! default every field, so an empty file is a valid configuration.
use serde::{Deserialize, Serialize};

use crate::core::media::APPLICATION_JSON;

/// Cross-origin resource sharing settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CorsConfig {
    /// Origins allowed to make cross-origin requests; `*` allows any
    pub allow_origins: Vec<String>,
    /// Methods allowed in cross-origin requests
    pub allow_methods: Vec<String>,
    /// Request headers allowed in cross-origin requests
    pub allow_headers: Vec<String>,
    /// Seconds browsers may cache a preflight response
    pub max_age_secs: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: Vec::new(),
            allow_methods: vec!["GET".to_string()],
            allow_headers: Vec::new(),
            max_age_secs: None,
        }
    }
}

/// Application settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Name of the app; a mounted named app resolves `name:route` in `url_for`
    pub name: Option<String>,
    /// Render unhandled errors as traceback pages
    pub debug: bool,
    /// Address the server binds to
    pub listen_addr: String,
    /// Redirect `/path` to `/path/` when only the latter exists
    pub redirect_trailing_slash: bool,
    /// Use 301 for trailing-slash redirects instead of 302
    pub trailing_slash_permanent: bool,
    /// Media type of `Response::media`
    pub media_type: String,
    /// Host header values accepted; `*` accepts any and `*.example.com` any subdomain
    pub allowed_hosts: Vec<String>,
    pub cors: Option<CorsConfig>,
    /// Compress responses with gzip
    pub gzip: bool,
    /// Smallest body, in bytes, worth compressing
    pub gzip_min_size: u16,
    /// Redirect plain HTTP requests to HTTPS
    pub hsts: bool,
    /// Tag every request and response with an `x-request-id` header
    pub request_id: bool,
}

impl AppConfig {
    /// Create a new application configuration builder
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }

    /// Status code used for trailing-slash redirects.
    pub fn trailing_slash_status(&self) -> u16 {
        if self.trailing_slash_permanent { 301 } else { 302 }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: None,
            debug: false,
            listen_addr: "127.0.0.1:8000".to_string(),
            redirect_trailing_slash: true,
            trailing_slash_permanent: true,
            media_type: APPLICATION_JSON.to_string(),
            allowed_hosts: vec!["*".to_string()],
            cors: None,
            gzip: false,
            gzip_min_size: 1024,
            hsts: false,
            request_id: false,
        }
    }
}

/// Builder for AppConfig to allow for cleaner configuration creation
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    /// Set the application name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Set the listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    pub fn redirect_trailing_slash(mut self, enabled: bool) -> Self {
        self.config.redirect_trailing_slash = enabled;
        self
    }

    pub fn trailing_slash_permanent(mut self, permanent: bool) -> Self {
        self.config.trailing_slash_permanent = permanent;
        self
    }

    pub fn media_type(mut self, media_type: impl Into<String>) -> Self {
        self.config.media_type = media_type.into();
        self
    }

    /// Replace the allowed hosts
    pub fn allowed_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn cors(mut self, cors: CorsConfig) -> Self {
        self.config.cors = Some(cors);
        self
    }

    /// Enable gzip for bodies of at least `min_size` bytes
    pub fn gzip(mut self, min_size: u16) -> Self {
        self.config.gzip = true;
        self.config.gzip_min_size = min_size;
        self
    }

    pub fn hsts(mut self, enabled: bool) -> Self {
        self.config.hsts = enabled;
        self
    }

    pub fn request_id(mut self, enabled: bool) -> Self {
        self.config.request_id = enabled;
        self
    }

    /// Build the final AppConfig
    pub fn build(self) -> Result<AppConfig, String> {
        if self.config.media_type.is_empty() {
            return Err("media_type cannot be empty".to_string());
        }
        if self.config.allowed_hosts.is_empty() {
            return Err("At least one allowed host must be configured".to_string());
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.redirect_trailing_slash);
        assert_eq!(config.trailing_slash_status(), 301);
        assert_eq!(config.media_type, "application/json");
        assert_eq!(config.allowed_hosts, vec!["*"]);
    }

    #[test]
    fn test_builder() {
        let config = AppConfig::builder()
            .name("blog")
            .trailing_slash_permanent(false)
            .allowed_hosts(["example.com"])
            .gzip(512)
            .build()
            .unwrap();
        assert_eq!(config.name.as_deref(), Some("blog"));
        assert_eq!(config.trailing_slash_status(), 302);
        assert!(config.gzip);
        assert_eq!(config.gzip_min_size, 512);

        assert!(AppConfig::builder().allowed_hosts(Vec::<String>::new()).build().is_err());
    }
}
