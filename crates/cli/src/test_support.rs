use std::sync::{Mutex, OnceLock};

/// Variables that change how [`crate::config::Config::load`] resolves.
pub(crate) const CONFIG_ENV_KEYS: [&str; 3] =
    ["OPENAI_API_KEY", "OPENAI_BASE_URL", "ZENCHAT_MODEL"];

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// Puts the saved values back when dropped, including after a failed assert.
struct RestoreEnv {
    saved: Vec<(String, Option<String>)>,
}

impl Drop for RestoreEnv {
    fn drop(&mut self) {
        for (key, value) in self.saved.drain(..).rev() {
            apply(&key, value.as_deref());
        }
    }
}

fn apply(key: &str, value: Option<&str>) {
    // SAFETY: only called while `env_lock` is held, so no other test thread
    // touches the process environment at the same time.
    unsafe {
        match value {
            Some(value) => std::env::set_var(key, value),
            None => std::env::remove_var(key),
        }
    }
}

/// Runs `run` with the config variables cleared and `overrides` applied.
///
/// `None` removes a variable. Everything touched is restored afterwards.
pub(crate) fn with_env<R>(overrides: &[(&str, Option<&str>)], run: impl FnOnce() -> R) -> R {
    let _guard = env_lock()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let keys = CONFIG_ENV_KEYS
        .iter()
        .copied()
        .chain(overrides.iter().map(|(key, _)| *key));
    let mut restore = RestoreEnv { saved: Vec::new() };
    for key in keys {
        restore.saved.push((key.to_string(), std::env::var(key).ok()));
        apply(key, None);
    }
    for (key, value) in overrides {
        apply(key, *value);
    }

    run()
}
