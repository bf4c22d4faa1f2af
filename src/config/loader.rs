use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::{models::AppConfig, validation::AppConfigValidator};

/// Prefix of environment variables overriding file settings, e.g. `PANINO_DEBUG=true`.
pub const ENV_PREFIX: &str = "PANINO";

/// Load and validate configuration from a file using the config crate
/// Supports multiple formats: YAML, JSON, TOML, etc.
pub async fn load_config(config_path: &str) -> Result<AppConfig> {
    let config = load_config_sync(config_path)?;
    AppConfigValidator::validate(&config)
        .with_context(|| format!("Invalid configuration in {config_path}"))?;
    Ok(config)
}

/// Load configuration synchronously, without validation
pub fn load_config_sync(config_path: &str) -> Result<AppConfig> {
    let config_path = Path::new(config_path);

    // Determine file format based on extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Yaml, // Default to YAML
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("allowed_hosts"),
        )
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let app_config: AppConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[tokio::test]
    async fn test_load_yaml_config() {
        let yaml_content = r#"
name: "blog"
debug: true
allowed_hosts:
  - "example.com"
  - "*.example.com"
cors:
  allow_origins: ["https://example.com"]
"#;

        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.name.as_deref(), Some("blog"));
        assert!(config.debug);
        assert_eq!(config.allowed_hosts.len(), 2);
        let cors = config.cors.unwrap();
        assert_eq!(cors.allow_origins, vec!["https://example.com"]);
        assert_eq!(cors.allow_methods, vec!["GET"]);
        assert!(config.redirect_trailing_slash);
    }

    #[tokio::test]
    async fn test_load_toml_config() {
        let toml_content = r#"
listen_addr = "0.0.0.0:9000"
trailing_slash_permanent = false
gzip = true
gzip_min_size = 256
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert!(!config.trailing_slash_permanent);
        assert!(config.gzip);
        assert_eq!(config.gzip_min_size, 256);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let json_content = r#"{ "listen_addr": "not an address", "media_type": "application/xml" }"#;

        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, "{}", json_content).unwrap();

        let path = temp_file.path().to_str().unwrap().to_string();
        assert!(load_config(&path).await.is_err());
        assert!(load_config_sync(&path).is_ok());
    }
}
