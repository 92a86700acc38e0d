use std::collections::BTreeMap;
use std::env;
use std::error::Error;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Environment name -> variable name -> value.
pub type EnvMap = BTreeMap<String, BTreeMap<String, String>>;

pub const CONFIG_FILENAME: &str = ".reqenv.env.yml";

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read config at {}: {}", path.display(), source)
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
        }
    }
}

/// Resolves the source config path: `REQENV_CONFIG_FILE` wins, otherwise the
/// conventional dotfile inside `dir`.
pub fn source_config_path(dir: &Path) -> PathBuf {
    resolve_path(dir, env::var_os("REQENV_CONFIG_FILE"), CONFIG_FILENAME)
}

pub(crate) fn resolve_path(
    dir: &Path,
    override_path: Option<OsString>,
    filename: &str,
) -> PathBuf {
    match override_path {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => dir.join(filename),
    }
}

/// Loads the source config: environment -> variable -> default value.
///
/// A missing file is an empty config. So is an empty or undecodable one: the
/// source config is declarative input, and starting from nothing beats
/// aborting a run over a half-typed edit. Only real I/O failures are errors.
pub fn load_source_config(path: &Path) -> Result<EnvMap, ConfigError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(source) if source.kind() == io::ErrorKind::NotFound => return Ok(EnvMap::new()),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if contents.trim().is_empty() {
        return Ok(EnvMap::new());
    }
    Ok(serde_yaml::from_str(&contents).unwrap_or_default())
}
