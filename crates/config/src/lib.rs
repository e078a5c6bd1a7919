//! Configuration for sgarchive.
//!
//! A run is configured by two documents: the main document (filtering rules,
//! display rules, archive tuning) and a connection document holding the
//! remote service credentials. The connection can also be given inline in
//! the main document. `SGARCHIVE_`-prefixed environment variables are merged
//! on top, with `__` separating nested keys (`SGARCHIVE_ARCHIVE__RETRIES=5`).
//!
//! The environment is read exactly once, in [`Config::load()`]. Everything
//! downstream receives the resulting [`Config`] by reference.

pub mod error;
mod sections;

pub use crate::sections::{ArchiveOptions, Connection, DownloadMode, Html, Ignored};
use crate::error::{ErrorKind, Result};
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::value::Dict;
use figment::Figment;
use serde::{Deserialize, Serialize};
use sgarchive_model::Filter;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "SGARCHIVE_";
const DEFAULT_FILE_NAME: &str = "config.yml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub connection: Connection,
    #[serde(default)]
    pub ignored: Ignored,
    /// Entity type → filters applied to every remote query for that type.
    #[serde(default)]
    pub filters: BTreeMap<String, Vec<Filter>>,
    #[serde(default)]
    pub html: Html,
    #[serde(default)]
    pub archive: ArchiveOptions,
}

impl Config {
    /// Load and validate the configuration rooted at `path`.
    ///
    /// The format is picked from the file extension (YAML unless the file
    /// ends in `.toml` or `.json`). A relative `connection_file` is resolved
    /// against the directory containing `path`.
    #[tracing::instrument(level = "debug")]
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            exn::bail!(ErrorKind::Load(format!("{} is not a file", path.display())));
        }
        let main = merge_file(Figment::new(), path);
        let mut figment = Figment::new();
        if let Some(connection_file) = connection_file(&main)? {
            let resolved = match path.parent() {
                Some(dir) if connection_file.is_relative() => dir.join(&connection_file),
                _ => connection_file,
            };
            figment = figment.merge(Serialized::default("connection", load_connection_file(&resolved)?));
        }
        let figment = merge_file(figment, path).merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(&figment)
    }

    /// Extract and validate a configuration from an already assembled
    /// figment.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Self = figment.extract().map_err(|e| ErrorKind::Load(e.to_string()))?;
        config.validate()?;
        tracing::debug!(
            base_url = %config.connection.base_url,
            output = %config.archive.output.display(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Where to look for the main document when none was given: `config.yml`
    /// in the working directory if present, the platform config directory
    /// otherwise.
    pub fn default_path() -> PathBuf {
        let local = PathBuf::from(DEFAULT_FILE_NAME);
        if local.is_file() {
            return local;
        }
        directories::ProjectDirs::from("", "", "sgarchive")
            .map(|dirs| dirs.config_dir().join(DEFAULT_FILE_NAME))
            .unwrap_or(local)
    }

    pub fn validate(&self) -> Result<()> {
        let base_url = self.connection.base_url.trim();
        if base_url.is_empty() {
            exn::bail!(ErrorKind::Invalid("connection.base_url must not be empty".to_string()));
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            exn::bail!(ErrorKind::Invalid(format!("connection.base_url must be http(s): {base_url}")));
        }
        if self.connection.script_name.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("connection.script_name must not be empty".to_string()));
        }
        if self.archive.concurrency == 0 {
            exn::bail!(ErrorKind::Invalid("archive.concurrency must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Filters configured for `entity_type`, empty when none are.
    pub fn filters_for(&self, entity_type: &str) -> &[Filter] {
        self.filters.get(entity_type).map(Vec::as_slice).unwrap_or_default()
    }
}

fn merge_file(figment: Figment, path: &Path) -> Figment {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => figment.merge(Toml::file(path)),
        Some("json") => figment.merge(Json::file(path)),
        _ => figment.merge(Yaml::file(path)),
    }
}

fn connection_file(main: &Figment) -> Result<Option<PathBuf>> {
    if !main.contains("connection_file") {
        return Ok(None);
    }
    let path: PathBuf = main.extract_inner("connection_file").map_err(|e| ErrorKind::Load(e.to_string()))?;
    Ok(Some(path))
}

fn load_connection_file(path: &Path) -> Result<Dict> {
    if !path.is_file() {
        exn::bail!(ErrorKind::ConnectionFile(path.to_path_buf(), "not a file".to_string()));
    }
    let dict = merge_file(Figment::new(), path)
        .extract::<Dict>()
        .map_err(|e| ErrorKind::ConnectionFile(path.to_path_buf(), e.to_string()))?;
    Ok(dict)
}
