//! Single-task processes running a command through the OS shell.

use std::{
    env,
    path::{Path, PathBuf},
    process::{Command, ExitStatus},
};

use tracing::{debug, info, warn};

use crate::{Error, Process, Registry, TaskError, process::TaskResult};

impl Registry {
    /// Spawns a one-task process that runs `command` through the shell and
    /// yields its exit code. A non-zero code is a regular result, not a
    /// task failure.
    ///
    /// A bare program name that exists in the current directory runs that
    /// local file; anything else is handed to the shell as written.
    pub fn spawn_shell(&self, command: impl Into<String>) -> Result<Process<i32>, Error> {
        let command = command.into();
        self.spawn_one(move |_| {
            let invocation = match env::current_dir() {
                Ok(cwd) => resolve_invocation(&command, &cwd),
                Err(err) => {
                    warn!(%err, "cannot read the working directory, running command as given");
                    command.clone()
                }
            };
            run(&invocation)
        })
    }
}

/// Rewrites a bare program name to its absolute path under `cwd` when such
/// a file exists there.
pub(crate) fn resolve_invocation(command: &str, cwd: &Path) -> String {
    let command = command.trim_start();
    let (program, args) = match command.find(char::is_whitespace) {
        Some(split) => command.split_at(split),
        None => (command, ""),
    };
    let path = Path::new(program);

    let bare = path
        .parent()
        .is_none_or(|dir| dir.as_os_str().is_empty() || dir == Path::new("."));
    if bare {
        let local: PathBuf = cwd.join(path.file_name().unwrap_or(path.as_os_str()));
        if local.is_file() {
            return format!("{}{args}", quote(&local));
        }
        debug!(program, "no local executable, the shell resolves it from PATH");
    } else if cwd.join(path).exists() {
        warn!(
            path = %path.display(),
            "the shell may still fall back to a PATH lookup for this command"
        );
    }
    command.to_owned()
}

fn run(invocation: &str) -> TaskResult<i32> {
    info!("shell > {invocation}");
    let status = shell(invocation)
        .status()
        .map_err(|err| TaskError::failed(format_args!("could not start the shell: {err}")))?;
    Ok(exit_code(status))
}

#[cfg(unix)]
fn shell(invocation: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(invocation);
    command
}

#[cfg(not(unix))]
fn shell(invocation: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(invocation);
    command
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(unix)]
fn quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}

#[cfg(not(unix))]
fn quote(path: &Path) -> String {
    format!("\"{}\"", path.display())
}
