use crate::config::{ConfigError, EnvMap, resolve_path};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::env;
use std::error::Error;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Sentinel recorded when no environment has been selected yet.
pub const DEFAULT_ENV: &str = "no_env";

pub const RUNTIME_FILENAME: &str = ".reqenv.runtime.yml";

#[derive(Debug)]
pub enum RuntimeError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Locked {
        path: PathBuf,
    },
    Encode {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    Config(ConfigError),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Io { path, source } => {
                write!(f, "runtime io error at {}: {}", path.display(), source)
            }
            RuntimeError::Locked { path } => {
                write!(
                    f,
                    "runtime state at {} is locked by another process",
                    path.display()
                )
            }
            RuntimeError::Encode { path, source } => {
                write!(
                    f,
                    "failed to encode runtime state for {}: {}",
                    path.display(),
                    source
                )
            }
            RuntimeError::Config(error) => write!(f, "{}", error),
        }
    }
}

impl Error for RuntimeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RuntimeError::Io { source, .. } => Some(source),
            RuntimeError::Locked { .. } => None,
            RuntimeError::Encode { source, .. } => Some(source),
            RuntimeError::Config(error) => Some(error),
        }
    }
}

impl From<ConfigError> for RuntimeError {
    fn from(error: ConfigError) -> Self {
        RuntimeError::Config(error)
    }
}

/// The persisted runtime state: the remembered environment selection plus two
/// variable layers per environment. `initial` holds the last defaults seen in
/// the source config (used to detect drift); `current` holds the live values,
/// which equal `initial` until overridden.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeState {
    #[serde(default = "default_env_name")]
    pub env: String,
    #[serde(default)]
    pub initial: EnvMap,
    #[serde(default)]
    pub current: EnvMap,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            env: default_env_name(),
            initial: EnvMap::new(),
            current: EnvMap::new(),
        }
    }
}

fn default_env_name() -> String {
    DEFAULT_ENV.to_string()
}

/// Merges the source config into a prior runtime state.
///
/// Three-way merge over (last-seen default, new default, possibly-overridden
/// current value): a changed config default wins over any stored override, an
/// unchanged default preserves the override, and entries the config no longer
/// declares are pruned. Pruning runs after seeding so a freshly added key is
/// never deleted before it is ever set. The result is a fixed point:
/// reconciling it again against the same config changes nothing.
pub fn reconcile(source: &EnvMap, prior: RuntimeState) -> RuntimeState {
    let mut state = prior;

    for (env, defaults) in source {
        let initial = state.initial.entry(env.clone()).or_default();
        let current = state.current.entry(env.clone()).or_default();
        for (key, default) in defaults {
            if initial.get(key) != Some(default) {
                initial.insert(key.clone(), default.clone());
                current.insert(key.clone(), default.clone());
            }
        }
    }

    for (env, values) in &state.initial {
        let current = state.current.entry(env.clone()).or_default();
        for (key, value) in values {
            if !current.contains_key(key) {
                current.insert(key.clone(), value.clone());
            }
        }
    }

    state.initial.retain(|env, _| source.contains_key(env));
    state.current.retain(|env, _| source.contains_key(env));
    for (env, values) in &mut state.initial {
        if let Some(defaults) = source.get(env) {
            values.retain(|key, _| defaults.contains_key(key));
        }
    }
    for (env, values) in &mut state.current {
        if let Some(defaults) = source.get(env) {
            values.retain(|key, _| defaults.contains_key(key));
        }
    }

    state
}

/// Environment selection controls for one run.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Use this environment for the current run only.
    pub env: Option<String>,
    /// Use this environment and record the choice for future runs.
    pub set_env: Option<String>,
}

impl Selection {
    /// Resolves the active environment name. Precedence: run-only flag, then
    /// persisted flag (which also rewrites the recorded selection), then
    /// whatever the prior state recorded.
    pub fn resolve(&self, state: &mut RuntimeState) -> String {
        if let Some(name) = &self.set_env {
            state.env = name.clone();
        }
        if let Some(name) = &self.env {
            return name.clone();
        }
        state.env.clone()
    }
}

/// Resolves the runtime state path: `REQENV_RUNTIME_FILE` wins, otherwise the
/// conventional dotfile inside `dir`.
pub fn runtime_state_path(dir: &Path) -> PathBuf {
    resolve_path(dir, env::var_os("REQENV_RUNTIME_FILE"), RUNTIME_FILENAME)
}

/// Owns the backing runtime-state file for the whole run.
///
/// The file is opened read-write (created if absent) and held under an
/// exclusive advisory lock until dropped, so two processes can never share
/// one runtime file. Load happens once at startup, persist once at shutdown;
/// nothing touches the disk in between.
#[derive(Debug)]
pub struct RuntimeFile {
    path: PathBuf,
    file: File,
}

impl RuntimeFile {
    pub fn open(path: &Path) -> Result<Self, RuntimeError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|source| RuntimeError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        file.try_lock_exclusive().map_err(|source| {
            if is_lock_contention(&source) {
                RuntimeError::Locked {
                    path: path.to_path_buf(),
                }
            } else {
                RuntimeError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted state. Empty or undecodable contents count as "no
    /// prior state" (the file is a disposable cache); read failures are fatal.
    pub fn load(&mut self) -> Result<RuntimeState, RuntimeError> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|source| self.io_error(source))?;
        let mut contents = String::new();
        self.file
            .read_to_string(&mut contents)
            .map_err(|source| self.io_error(source))?;
        if contents.trim().is_empty() {
            return Ok(RuntimeState::default());
        }
        Ok(serde_yaml::from_str(&contents).unwrap_or_default())
    }

    /// Rewrites the file with the full state. Consumes the handle: persistence
    /// happens exactly once, after all variable access is over.
    pub fn persist(mut self, state: &RuntimeState) -> Result<(), RuntimeError> {
        let contents = serde_yaml::to_string(state).map_err(|source| RuntimeError::Encode {
            path: self.path.clone(),
            source,
        })?;
        self.file
            .set_len(0)
            .map_err(|source| self.io_error(source))?;
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|source| self.io_error(source))?;
        self.file
            .write_all(contents.as_bytes())
            .map_err(|source| self.io_error(source))?;
        self.file
            .sync_all()
            .map_err(|source| self.io_error(source))?;
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> RuntimeError {
        RuntimeError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Check if an error indicates lock contention (file is locked by another process)
fn is_lock_contention(err: &std::io::Error) -> bool {
    // Unix returns WouldBlock
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    // Windows returns raw OS error 33 (ERROR_LOCK_VIOLATION)
    #[cfg(windows)]
    if err.raw_os_error() == Some(33) {
        return true;
    }
    false
}
