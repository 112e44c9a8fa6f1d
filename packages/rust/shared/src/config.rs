//! Application configuration for eva3d.
//!
//! The project config lives at `./eva3d.toml`, falling back to
//! `~/.eva3d/eva3d.toml`. Missing keys take their defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Eva3dError, Result};
use crate::types::{CadReference, Page};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "eva3d.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".eva3d";

// ---------------------------------------------------------------------------
// Config structs (matching eva3d.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Output and database locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// CAD fetch limits.
    #[serde(default)]
    pub fetch: FetchSettings,

    /// CAD service endpoint and credential env vars.
    #[serde(default)]
    pub cad: CadConfig,

    /// Documentation pages, one per assembly.
    #[serde(default)]
    pub pages: Vec<PageEntry>,

    /// Registered vendor mapping tables.
    #[serde(default)]
    pub vendors: Vec<VendorEntry>,
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Project-wide flat tree of printable files.
    #[serde(default = "default_stls_dir")]
    pub stls_dir: String,

    /// Compressed archive of `stls_dir`.
    #[serde(default = "default_archive")]
    pub archive: String,

    /// BOM database file.
    #[serde(default = "default_database")]
    pub database: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            stls_dir: default_stls_dir(),
            archive: default_archive(),
            database: default_database(),
        }
    }
}

fn default_stls_dir() -> String {
    "stls".into()
}
fn default_archive() -> String {
    "stls.zip".into()
}
fn default_database() -> String {
    ".eva3d/eva3d.db".into()
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    /// Maximum page fetches in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Per-request timeout against the CAD service.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_concurrency() -> u32 {
    5
}
fn default_request_timeout() -> u64 {
    60
}

/// `[cad]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadConfig {
    /// Base URL of the CAD service API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the access key (never store the key itself).
    #[serde(default = "default_access_key_env")]
    pub access_key_env: String,

    /// Name of the env var holding the secret key.
    #[serde(default = "default_secret_key_env")]
    pub secret_key_env: String,
}

impl Default for CadConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            access_key_env: default_access_key_env(),
            secret_key_env: default_secret_key_env(),
        }
    }
}

fn default_base_url() -> String {
    "https://cad.onshape.com".into()
}
fn default_access_key_env() -> String {
    "ONSHAPE_ACCESS".into()
}
fn default_secret_key_env() -> String {
    "ONSHAPE_SECRET".into()
}

/// `[[pages]]` entry, validated into a [`Page`] by [`AppConfig::pages`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageEntry {
    pub namespace: String,
    /// Page anchor directory, relative to the config file's directory.
    pub dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cad_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// `[[vendors]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorEntry {
    pub name: String,
    /// Path to the vendor mapping CSV.
    pub mapping: String,
}

impl AppConfig {
    /// Validate `[[pages]]` into typed pages, resolving directories against `root`.
    pub fn pages(&self, root: &Path) -> Result<Vec<Page>> {
        let mut seen = HashSet::new();
        let mut pages = Vec::with_capacity(self.pages.len());

        for entry in &self.pages {
            let namespace = entry.namespace.trim();
            if namespace.is_empty() {
                return Err(Eva3dError::validation(format!(
                    "page at '{}' has an empty namespace",
                    entry.dir
                )));
            }
            if !seen.insert(namespace.to_string()) {
                return Err(Eva3dError::validation(format!(
                    "duplicate page namespace '{namespace}'"
                )));
            }

            let cad = entry
                .cad_url
                .as_deref()
                .map(CadReference::parse)
                .transpose()?;

            pages.push(Page {
                namespace: namespace.to_string(),
                dir: root.join(&entry.dir),
                cad,
                title: entry.title.clone(),
            });
        }

        Ok(pages)
    }

    /// Mapping CSV path registered for `vendor`, if any.
    pub fn vendor_mapping_path(&self, vendor: &str, root: &Path) -> Option<PathBuf> {
        self.vendors
            .iter()
            .find(|v| v.name == vendor)
            .map(|v| root.join(&v.mapping))
    }
}

// ---------------------------------------------------------------------------
// Fetch config (runtime, derived from the `[fetch]` section)
// ---------------------------------------------------------------------------

/// Runtime CAD fetch configuration.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Maximum concurrent page fetches.
    pub concurrency: usize,
    /// Timeout applied to every CAD service request.
    pub request_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency() as usize,
            request_timeout: Duration::from_secs(default_request_timeout()),
        }
    }
}

impl TryFrom<&AppConfig> for FetchConfig {
    type Error = Eva3dError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        if config.fetch.request_timeout_secs == 0 {
            return Err(Eva3dError::validation(
                "[fetch].request_timeout_secs must be at least 1",
            ));
        }
        Ok(Self {
            concurrency: config.fetch.concurrency.max(1) as usize,
            request_timeout: Duration::from_secs(config.fetch.request_timeout_secs),
        })
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the user config directory (`~/.eva3d/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| Eva3dError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the user config file (`~/.eva3d/eva3d.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load config from `./eva3d.toml`, then the user config, then defaults.
///
/// Returns the config together with the directory page paths resolve against.
pub fn load_config() -> Result<(AppConfig, PathBuf)> {
    let cwd = std::env::current_dir().map_err(|e| Eva3dError::io(".", e))?;

    let local = cwd.join(CONFIG_FILE_NAME);
    if local.exists() {
        return Ok((load_config_from(&local)?, cwd));
    }

    let path = config_file_path()?;
    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok((AppConfig::default(), cwd));
    }

    Ok((load_config_from(&path)?, cwd))
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| Eva3dError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| Eva3dError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Write a default config file into `dir`. Returns the path to the created file.
pub fn init_config(dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| Eva3dError::io(dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    if path.exists() {
        return Err(Eva3dError::config(format!(
            "{} already exists",
            path.display()
        )));
    }

    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| Eva3dError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| Eva3dError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read CAD credentials from the env vars named in `[cad]`.
pub fn resolve_credentials(config: &AppConfig) -> Result<(String, String)> {
    let read = |var_name: &str| match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(Eva3dError::config(format!(
            "CAD credentials not found. Set the {var_name} environment variable."
        ))),
    };
    Ok((
        read(&config.cad.access_key_env)?,
        read(&config.cad.secret_key_env)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("stls_dir"));
        assert!(toml_str.contains("ONSHAPE_ACCESS"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.fetch.concurrency, 5);
        assert_eq!(parsed.paths.archive, "stls.zip");
    }

    #[test]
    fn config_with_pages_and_vendors() {
        let toml_str = r#"
[paths]
stls_dir = "site/stls"

[[pages]]
namespace = "hotend-dragon"
dir = "docs/hotends/dragon"

[[pages]]
namespace = "extruder-bmg"
dir = "docs/extruders/bmg"
cad_url = "https://cad.onshape.com/documents/d1/w/w1/e/e1"

[[vendors]]
name = "acme"
mapping = "vendors/acme.csv"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        let root = Path::new("/project");
        let pages = config.pages(root).expect("valid pages");
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].dir, Path::new("/project/docs/hotends/dragon"));
        assert!(pages[0].cad.is_none());
        assert_eq!(pages[1].cad.as_ref().unwrap().document_id, "d1");
        assert_eq!(
            config.vendor_mapping_path("acme", root),
            Some(PathBuf::from("/project/vendors/acme.csv"))
        );
        assert!(config.vendor_mapping_path("other", root).is_none());
    }

    #[test]
    fn duplicate_namespace_rejected() {
        let toml_str = r#"
[[pages]]
namespace = "a"
dir = "x"

[[pages]]
namespace = "a"
dir = "y"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let err = config.pages(Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("duplicate page namespace"));
    }

    #[test]
    fn bad_cad_url_rejected_at_load() {
        let toml_str = r#"
[[pages]]
namespace = "a"
dir = "x"
cad_url = "https://cad.onshape.com/not/a/document"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let err = config.pages(Path::new(".")).unwrap_err();
        assert!(matches!(err, Eva3dError::BadCadReference { .. }));
    }

    #[test]
    fn fetch_config_from_app_config() {
        let app = AppConfig::default();
        let fetch = FetchConfig::try_from(&app).unwrap();
        assert_eq!(fetch.concurrency, 5);
        assert_eq!(fetch.request_timeout, Duration::from_secs(60));
    }

    #[test]
    fn zero_request_timeout_is_rejected() {
        let mut app = AppConfig::default();
        app.fetch.request_timeout_secs = 0;
        let err = FetchConfig::try_from(&app).unwrap_err();
        assert!(matches!(err, Eva3dError::Validation { .. }));

        app.fetch.request_timeout_secs = 1;
        app.fetch.concurrency = 0;
        let fetch = FetchConfig::try_from(&app).unwrap();
        assert_eq!(fetch.concurrency, 1);
        assert_eq!(fetch.request_timeout, Duration::from_secs(1));
    }

    #[test]
    fn credentials_validation() {
        let mut config = AppConfig::default();
        // Use unique env var names to avoid interfering with other tests
        config.cad.access_key_env = "EVA3D_TEST_NONEXISTENT_ACCESS_12345".into();
        config.cad.secret_key_env = "EVA3D_TEST_NONEXISTENT_SECRET_12345".into();
        let result = resolve_credentials(&config);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("EVA3D_TEST_NONEXISTENT_ACCESS_12345")
        );
    }
}
