use std::{env, str::FromStr};

const THREAD_NAME_VAR: &str = "COMPACT_PROCESS_THREAD_NAME";
const STACK_SIZE_VAR: &str = "COMPACT_PROCESS_STACK_SIZE";
const THREAD_SAFE_VAR: &str = "COMPACT_PROCESS_THREAD_SAFE";

/// Settings shared by every process spawned through one
/// [`Registry`](crate::Registry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Worker threads are named `<thread_name>-<process id>-<index>`.
    pub thread_name: String,
    /// Stack size for worker threads; the platform default when `None`.
    pub stack_size: Option<usize>,
    /// Guard runtime handle counts with a re-entrant lock.
    pub thread_safe_handles: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            thread_name: "process".to_owned(),
            stack_size: None,
            thread_safe_handles: true,
        }
    }
}

impl Config {
    /// Defaults, overridden by `COMPACT_PROCESS_THREAD_NAME`,
    /// `COMPACT_PROCESS_STACK_SIZE` and `COMPACT_PROCESS_THREAD_SAFE`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(name) = env::var(THREAD_NAME_VAR)
            && !name.trim().is_empty()
        {
            config.thread_name = name;
        }
        if let Some(size) = parse_var::<usize>(STACK_SIZE_VAR) {
            config.stack_size = Some(size);
        }
        if let Some(flag) = env::var(THREAD_SAFE_VAR).ok().and_then(|v| parse_flag(&v)) {
            config.thread_safe_handles = flag;
        }
        config
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub fn with_thread_safe_handles(mut self, enabled: bool) -> Self {
        self.thread_safe_handles = enabled;
        self
    }
}

fn parse_var<T>(name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!("Ignoring {name}={raw:?}: {err}");
            None
        }
    }
}

pub(crate) fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!("Ignoring {THREAD_SAFE_VAR}={raw:?}: expected a boolean");
            None
        }
    }
}
