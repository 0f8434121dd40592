use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use dynlib::Library;
use dynlib_base::{DynlibError, DynlibResult, ErrorKind, ResultExt, err};
use serde::Deserialize;
use tracing::{debug, instrument};

/// Probe manifest, usually read from `dynlib.toml`.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Libraries to open, in order.
    #[serde(default, rename = "library")]
    pub libraries: Vec<LibraryConfig>,
}

/// One library entry of the manifest.
#[derive(Debug, Deserialize)]
pub struct LibraryConfig {
    /// Path handed to the loader.
    pub path: PathBuf,
    /// Append the platform's library suffix (`.so`, `.dylib`, `.dll`) to `path`.
    #[serde(default)]
    pub append_platform_suffix: bool,
    /// Exported names that must resolve.
    #[serde(default)]
    pub symbols: Vec<String>,
}

impl LibraryConfig {
    /// The path actually opened, with the platform suffix applied if requested.
    pub fn resolved_path(&self) -> PathBuf {
        if !self.append_platform_suffix {
            return self.path.clone();
        }
        let mut path = OsString::from(self.path.as_os_str());
        path.push(Library::platform_suffix());
        PathBuf::from(path)
    }
}

/// Reads and parses the manifest at `path`.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_config(path: &Path) -> DynlibResult<Config> {
    let content = fs::read_to_string(path).map_err(|source| {
        Box::new(DynlibError::new(ErrorKind::FileError {
            path: path.to_path_buf(),
            source,
        }))
    })?;
    let config = parse_config(&content)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    debug!(libraries = config.libraries.len(), "config loaded");
    Ok(config)
}

pub fn parse_config(content: &str) -> DynlibResult<Config> {
    toml::from_str(content).map_err(|e| err!("Invalid configuration: {}", e))
}
