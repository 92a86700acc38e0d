use crate::config::{load_source_config, source_config_path};
use crate::runtime::{
    RuntimeError, RuntimeFile, RuntimeState, Selection, reconcile, runtime_state_path,
};
use std::path::PathBuf;
use std::sync::RwLock;

/// Construction inputs for [`Runtime::init`].
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// Directory holding the reqenv dotfiles. Defaults to the working
    /// directory.
    pub dir: Option<PathBuf>,
    /// Use this environment for the current run only.
    pub env: Option<String>,
    /// Use this environment and remember it for future runs.
    pub set_env: Option<String>,
    /// Discard persisted state and rebuild purely from the source config.
    pub reset: bool,
}

/// The process-wide variable store.
///
/// Built exactly once at startup by the entry point and handed to whatever
/// needs variable access; construction is the one-shot load+reconcile
/// boundary, [`Runtime::persist`] (which consumes the store) is the one-shot
/// shutdown boundary. In between, `get`/`set` are the only operations and
/// never touch the disk.
///
/// One coarse reader/writer lock guards the state across all environments.
/// Call volume is bounded by the number of request scenarios, so shared reads
/// against exclusive writes is all the throughput this needs.
#[derive(Debug)]
pub struct Runtime {
    file: RuntimeFile,
    env: String,
    state: RwLock<RuntimeState>,
}

impl Runtime {
    /// Loads both backing files, reconciles them, and resolves the active
    /// environment.
    ///
    /// A missing source config and a missing, empty, or undecodable runtime
    /// file all degrade to empty state. Any other I/O failure, and a runtime
    /// file already locked by another process, are errors: reconciliation is
    /// all-or-nothing.
    pub fn init(options: &RuntimeOptions) -> Result<Self, RuntimeError> {
        let dir = options.dir.clone().unwrap_or_else(|| PathBuf::from("."));
        let source = load_source_config(&source_config_path(&dir))?;
        let mut file = RuntimeFile::open(&runtime_state_path(&dir))?;
        let prior = if options.reset {
            RuntimeState::default()
        } else {
            file.load()?
        };
        let mut state = reconcile(&source, prior);
        let selection = Selection {
            env: options.env.clone(),
            set_env: options.set_env.clone(),
        };
        let env = selection.resolve(&mut state);
        Ok(Self {
            file,
            env,
            state: RwLock::new(state),
        })
    }

    /// The active environment name for this run.
    pub fn env(&self) -> &str {
        &self.env
    }

    /// Whether the active environment actually exists in the reconciled
    /// state. Selecting an unknown name is not an error; reads degrade to
    /// empty values and writes to no-ops.
    pub fn has_environment(&self) -> bool {
        let state = self.read_state();
        state.initial.contains_key(&self.env)
    }

    /// Returns the current value of a variable in the active environment, or
    /// an empty string when the environment or key does not exist.
    pub fn get(&self, name: &str) -> String {
        let state = self.read_state();
        if !state.initial.contains_key(&self.env) {
            return String::new();
        }
        state
            .current
            .get(&self.env)
            .and_then(|vars| vars.get(name))
            .cloned()
            .unwrap_or_default()
    }

    /// Writes a variable into the active environment. A key the source config
    /// never declared gets an empty-string placeholder in the initial layer
    /// first, so the current layer never holds a key the initial layer lacks.
    /// No-op when the environment does not exist.
    pub fn set(&self, name: &str, value: &str) {
        let mut guard = self.write_state();
        let state = &mut *guard;
        let Some(initial) = state.initial.get_mut(&self.env) else {
            return;
        };
        if !initial.contains_key(name) {
            initial.insert(name.to_string(), String::new());
        }
        state
            .current
            .entry(self.env.clone())
            .or_default()
            .insert(name.to_string(), value.to_string());
    }

    /// A copy of the full in-memory state.
    pub fn snapshot(&self) -> RuntimeState {
        self.read_state().clone()
    }

    /// Writes the state back through the exclusively-held runtime file,
    /// overwriting prior contents in full. Consuming `self` makes this the
    /// last thing that can happen to the store.
    pub fn persist(self) -> Result<(), RuntimeError> {
        let state = self
            .state
            .into_inner()
            .unwrap_or_else(|poison| poison.into_inner());
        self.file.persist(&state)
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, RuntimeState> {
        self.state
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, RuntimeState> {
        self.state
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CONFIG_FILENAME;
    use crate::runtime::DEFAULT_ENV;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use std::thread;

    fn write_config(dir: &Path, contents: &str) {
        fs::write(dir.join(CONFIG_FILENAME), contents).unwrap();
    }

    fn options(dir: &Path, env: Option<&str>) -> RuntimeOptions {
        RuntimeOptions {
            dir: Some(dir.to_path_buf()),
            env: env.map(str::to_string),
            ..RuntimeOptions::default()
        }
    }

    #[test]
    fn first_run_seeds_defaults_and_get_reads_them() {
        let temp = tempfile::tempdir().unwrap();
        write_config(temp.path(), "staging:\n  user: alice\n");

        let runtime = Runtime::init(&options(temp.path(), Some("staging"))).unwrap();
        assert_eq!(runtime.env(), "staging");
        assert!(runtime.has_environment());
        assert_eq!(runtime.get("user"), "alice");

        let state = runtime.snapshot();
        assert_eq!(state.initial["staging"]["user"], "alice");
        assert_eq!(state.current["staging"]["user"], "alice");
    }

    #[test]
    fn get_without_any_config_degrades_to_empty() {
        let temp = tempfile::tempdir().unwrap();

        let runtime = Runtime::init(&options(temp.path(), None)).unwrap();
        assert_eq!(runtime.env(), DEFAULT_ENV);
        assert!(!runtime.has_environment());
        assert_eq!(runtime.get("anything"), "");
    }

    #[test]
    fn set_on_unknown_environment_is_a_noop() {
        let temp = tempfile::tempdir().unwrap();
        write_config(temp.path(), "staging:\n  user: alice\n");

        let runtime = Runtime::init(&options(temp.path(), Some("nowhere"))).unwrap();
        runtime.set("user", "bob");

        let state = runtime.snapshot();
        assert!(!state.initial.contains_key("nowhere"));
        assert!(!state.current.contains_key("nowhere"));
    }

    #[test]
    fn set_of_undeclared_key_inserts_initial_placeholder() {
        let temp = tempfile::tempdir().unwrap();
        write_config(temp.path(), "staging:\n  user: alice\n");

        let runtime = Runtime::init(&options(temp.path(), Some("staging"))).unwrap();
        runtime.set("token", "abc123");

        let state = runtime.snapshot();
        assert_eq!(state.initial["staging"]["token"], "");
        assert_eq!(state.current["staging"]["token"], "abc123");
        assert_eq!(runtime.get("token"), "abc123");
    }

    #[test]
    fn override_survives_a_restart() {
        let temp = tempfile::tempdir().unwrap();
        write_config(temp.path(), "staging:\n  user: alice\n");

        let runtime = Runtime::init(&options(temp.path(), Some("staging"))).unwrap();
        runtime.set("user", "bob");
        runtime.persist().unwrap();

        let runtime = Runtime::init(&options(temp.path(), Some("staging"))).unwrap();
        assert_eq!(runtime.get("user"), "bob");
        assert_eq!(runtime.snapshot().initial["staging"]["user"], "alice");
    }

    #[test]
    fn config_edit_wins_over_persisted_override() {
        let temp = tempfile::tempdir().unwrap();
        write_config(temp.path(), "staging:\n  user: alice\n");

        let runtime = Runtime::init(&options(temp.path(), Some("staging"))).unwrap();
        runtime.set("user", "bob");
        runtime.persist().unwrap();

        write_config(temp.path(), "staging:\n  user: carol\n");
        let runtime = Runtime::init(&options(temp.path(), Some("staging"))).unwrap();
        assert_eq!(runtime.get("user"), "carol");
    }

    #[test]
    fn reset_rebuilds_purely_from_config() {
        let temp = tempfile::tempdir().unwrap();
        write_config(temp.path(), "staging:\n  user: alice\n");

        let runtime = Runtime::init(&options(temp.path(), Some("staging"))).unwrap();
        runtime.set("user", "bob");
        runtime.persist().unwrap();

        let opts = RuntimeOptions {
            reset: true,
            ..options(temp.path(), Some("staging"))
        };
        let runtime = Runtime::init(&opts).unwrap();
        assert_eq!(runtime.get("user"), "alice");
        // reset also forgets the recorded selection
        assert_eq!(runtime.snapshot().env, DEFAULT_ENV);
    }

    #[test]
    fn removed_environment_is_gone_after_restart() {
        let temp = tempfile::tempdir().unwrap();
        write_config(temp.path(), "staging:\n  user: alice\nold:\n  user: gone\n");

        let runtime = Runtime::init(&options(temp.path(), Some("old"))).unwrap();
        runtime.set("user", "overridden");
        runtime.persist().unwrap();

        write_config(temp.path(), "staging:\n  user: alice\n");
        let runtime = Runtime::init(&options(temp.path(), Some("old"))).unwrap();
        assert!(!runtime.has_environment());
        assert_eq!(runtime.get("user"), "");
        let state = runtime.snapshot();
        assert!(!state.initial.contains_key("old"));
        assert!(!state.current.contains_key("old"));
    }

    #[test]
    fn set_env_persists_selection_and_env_flag_does_not() {
        let temp = tempfile::tempdir().unwrap();
        write_config(temp.path(), "staging:\n  user: alice\n");

        let opts = RuntimeOptions {
            set_env: Some("staging".to_string()),
            ..options(temp.path(), None)
        };
        let runtime = Runtime::init(&opts).unwrap();
        assert_eq!(runtime.env(), "staging");
        runtime.persist().unwrap();

        let runtime = Runtime::init(&options(temp.path(), Some("production"))).unwrap();
        assert_eq!(runtime.env(), "production");
        runtime.persist().unwrap();

        // the remembered selection is still staging
        let runtime = Runtime::init(&options(temp.path(), None)).unwrap();
        assert_eq!(runtime.env(), "staging");
    }

    #[test]
    fn concurrent_readers_and_writers_keep_state_consistent() {
        let temp = tempfile::tempdir().unwrap();
        write_config(temp.path(), "staging:\n  counter: '0'\n  user: alice\n");

        let runtime = Arc::new(Runtime::init(&options(temp.path(), Some("staging"))).unwrap());

        let mut handles = Vec::new();
        for worker in 0..8 {
            let runtime = Arc::clone(&runtime);
            handles.push(thread::spawn(move || {
                for round in 0..50 {
                    runtime.set("counter", &format!("{worker}:{round}"));
                    let seen = runtime.get("counter");
                    assert!(!seen.is_empty());
                    assert_eq!(runtime.get("user"), "alice");
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let final_value = runtime.get("counter");
        assert!(final_value.contains(':'));
        let state = runtime.snapshot();
        assert_eq!(
            state.initial["staging"].keys().collect::<Vec<_>>(),
            state.current["staging"].keys().collect::<Vec<_>>()
        );
    }

    #[test]
    fn persisted_file_round_trips_through_init() {
        let temp = tempfile::tempdir().unwrap();
        write_config(temp.path(), "staging:\n  user: alice\n  base_url: https://s\n");

        let runtime = Runtime::init(&options(temp.path(), Some("staging"))).unwrap();
        runtime.set("user", "bob");
        let before = runtime.snapshot();
        runtime.persist().unwrap();

        let runtime = Runtime::init(&options(temp.path(), Some("staging"))).unwrap();
        assert_eq!(runtime.snapshot(), before);
    }
}
