/*! Running external programs

Every process `macos-utils` starts goes through [`execute`] (or [`execute_interactive`] for tools which
insist on a confirmation prompt). Output is always captured, and the partial output is handed back alongside
any error which happens after the process was spawned so callers can log it.
*/
use std::{
    collections::HashMap,
    process::{ExitStatus, Stdio},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::Command,
    task::JoinHandle,
    time::Instant,
};

use crate::settings::{DSCACHEUTIL_PATH, YES_PATH};

/// How long output is still read once a process is gone, as descendants may hold its pipes open
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// A single point in time by which all work must be done
///
/// One deadline is created at the top of a command and threaded through every process invocation, so the
/// whole multi-step workflow shares one budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline, processes may run forever
    pub fn none() -> Self {
        Self(None)
    }

    pub fn after(budget: Duration) -> Self {
        Self(Some(Instant::now() + budget))
    }

    /// Like [`Deadline::after`], but a zero `timeout` disables the deadline
    pub fn from_timeout(timeout: Duration) -> Self {
        if timeout.is_zero() {
            Self::none()
        } else {
            Self::after(timeout)
        }
    }

    /// The time left, `None` if there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.0
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }
}

/// The captured output of a process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// What a process reads on stdin
#[derive(Debug, Default)]
pub enum CommandInput {
    #[default]
    Null,
    Bytes(Vec<u8>),
    /// An already-open pipe, for example the stdout of another process
    Pipe(Stdio),
}

/// A description of a process to run
#[derive(Debug)]
pub struct CommandInvocation {
    argv: Vec<String>,
    run_as_user: Option<String>,
    env: Vec<String>,
    stdin: CommandInput,
    deadline: Deadline,
}

impl CommandInvocation {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            run_as_user: None,
            env: Vec::new(),
            stdin: CommandInput::Null,
            deadline: Deadline::none(),
        }
    }

    /// Run as `user` instead of the current user (requires root)
    pub fn run_as_user(mut self, user: impl Into<String>) -> Self {
        self.run_as_user = Some(user.into());
        self
    }

    /// Override an environment variable, `pair` must be of the form `KEY=VALUE`
    pub fn env(mut self, pair: impl Into<String>) -> Self {
        self.env.push(pair.into());
        self
    }

    pub fn stdin(mut self, stdin: CommandInput) -> Self {
        self.stdin = stdin;
        self
    }

    pub fn deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

impl std::fmt::Display for CommandInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.argv.join(" "))
    }
}

/// An error from running an external program
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("Invalid command invocation: {0}")]
    InvalidInvocation(String),
    #[error("Looking up user `{user}`: {reason}")]
    UserResolution { user: String, reason: String },
    #[error("Spawning `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Waiting for `{program}` to exit")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
        output: CommandOutput,
    },
    #[error("`{program}` did not finish before the deadline and was terminated")]
    Timeout {
        program: String,
        output: CommandOutput,
    },
    #[error("`{program}` failed with {status}, stderr: [{}]", .output.stderr.trim())]
    Failed {
        program: String,
        status: ExitStatus,
        output: CommandOutput,
    },
}

impl CommandError {
    /// Whatever the process wrote before the error, if it was spawned
    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            CommandError::Wait { output, .. }
            | CommandError::Timeout { output, .. }
            | CommandError::Failed { output, .. } => Some(output),
            CommandError::InvalidInvocation(_)
            | CommandError::UserResolution { .. }
            | CommandError::Spawn { .. } => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CommandError::Timeout { .. })
    }
}

/// Run a process to completion (or until its deadline) and capture its output
#[tracing::instrument(level = "debug", skip_all, fields(command = %invocation))]
pub async fn execute(invocation: CommandInvocation) -> Result<CommandOutput, CommandError> {
    let CommandInvocation {
        argv,
        run_as_user,
        env,
        stdin,
        deadline,
    } = invocation;

    let Some((program, args)) = argv.split_first() else {
        return Err(CommandError::InvalidInvocation(
            "must provide a command".into(),
        ));
    };

    let mut command = Command::new(program);
    command.args(args);

    for pair in &env {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            CommandError::InvalidInvocation(format!(
                "environment override `{pair}` is not of the form `KEY=VALUE`"
            ))
        })?;
        command.env(key, value);
    }

    if let Some(user) = run_as_user {
        let (uid, gid) = resolve_user(&user, deadline).await?;
        tracing::trace!(user = %user, uid, gid, "Running as user");
        command.uid(uid).gid(gid);
    }

    let stdin_bytes = match stdin {
        CommandInput::Null => {
            command.stdin(Stdio::null());
            None
        },
        CommandInput::Bytes(bytes) => {
            command.stdin(Stdio::piped());
            Some(bytes)
        },
        CommandInput::Pipe(pipe) => {
            command.stdin(pipe);
            None
        },
    };

    run(program, command, stdin_bytes, deadline).await
}

/// Run a process with an endless stream of `y` answers on stdin
///
/// `diskutil repairDisk` asks for confirmation before it touches the partition map.
#[tracing::instrument(level = "debug", skip_all, fields(command = %invocation))]
pub async fn execute_interactive(
    invocation: CommandInvocation,
) -> Result<CommandOutput, CommandError> {
    let mut yes = std::process::Command::new(YES_PATH)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| CommandError::Spawn {
            program: YES_PATH.into(),
            source,
        })?;

    let result = match yes.stdout.take() {
        Some(answers) => {
            execute(invocation.stdin(CommandInput::Pipe(Stdio::from(answers)))).await
        },
        None => Err(CommandError::InvalidInvocation(format!(
            "`{YES_PATH}` did not provide a stdout pipe"
        ))),
    };

    // `yes` usually dies of SIGPIPE once the reader exits
    if let Err(err) = yes.kill() {
        tracing::trace!(%err, "Stopping `{YES_PATH}`");
    }
    if let Err(err) = yes.wait() {
        tracing::trace!(%err, "Reaping `{YES_PATH}`");
    }

    result
}

async fn run(
    program: &str,
    mut command: Command,
    stdin_bytes: Option<Vec<u8>>,
    deadline: Deadline,
) -> Result<CommandOutput, CommandError> {
    if deadline.is_expired() {
        return Err(CommandError::Timeout {
            program: program.into(),
            output: CommandOutput::default(),
        });
    }

    tracing::trace!("Executing");
    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| CommandError::Spawn {
            program: program.into(),
            source,
        })?;

    if let (Some(bytes), Some(mut pipe)) = (stdin_bytes, child.stdin.take()) {
        tokio::spawn(async move {
            if let Err(err) = pipe.write_all(&bytes).await {
                tracing::trace!(%err, "Writing stdin");
            }
        });
    }

    let pipes = Pipes::capture(child.stdout.take(), child.stderr.take());

    let waited = match deadline.remaining() {
        Some(budget) => tokio::time::timeout(budget, child.wait()).await.ok(),
        None => Some(child.wait().await),
    };

    let Some(status) = waited else {
        if let Err(err) = child.kill().await {
            tracing::warn!(%err, "Killing `{program}` after the deadline passed");
        }
        let output = pipes.collect(Some(DRAIN_GRACE)).await;
        return Err(CommandError::Timeout {
            program: program.into(),
            output,
        });
    };

    let output = pipes
        .collect(deadline.remaining().map(|left| left.max(DRAIN_GRACE)))
        .await;
    let status = match status {
        Ok(status) => status,
        Err(source) => {
            return Err(CommandError::Wait {
                program: program.into(),
                source,
                output,
            })
        },
    };

    if status.success() {
        tracing::trace!(
            stderr = %output.stderr,
            stdout = %output.stdout,
            "Command success"
        );
        Ok(output)
    } else {
        Err(CommandError::Failed {
            program: program.into(),
            status,
            output,
        })
    }
}

/// Bytes read from a pipe so far, readable even if the reader never finishes
#[derive(Debug, Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn extend(&self, bytes: &[u8]) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(bytes);
    }

    fn text(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// The stdout and stderr readers of a running process
struct Pipes {
    stdout: Captured,
    stderr: Captured,
    readers: [JoinHandle<()>; 2],
}

impl Pipes {
    fn capture<O, E>(stdout: Option<O>, stderr: Option<E>) -> Self
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let (out, err) = (Captured::default(), Captured::default());
        Self {
            readers: [
                tokio::spawn(drain(stdout, out.clone())),
                tokio::spawn(drain(stderr, err.clone())),
            ],
            stdout: out,
            stderr: err,
        }
    }

    /// Wait up to `limit` for both pipes to close, then take what was read
    async fn collect(self, limit: Option<Duration>) -> CommandOutput {
        let Self {
            stdout,
            stderr,
            mut readers,
        } = self;

        let [out_reader, err_reader] = &mut readers;
        let closed = async {
            let _ = tokio::join!(out_reader, err_reader);
        };
        let finished = match limit {
            Some(limit) => tokio::time::timeout(limit, closed).await.is_ok(),
            None => {
                closed.await;
                true
            },
        };
        if !finished {
            tracing::debug!("Output pipes still held open, keeping partial output");
            for reader in &readers {
                reader.abort();
            }
        }

        CommandOutput {
            stdout: stdout.text(),
            stderr: stderr.text(),
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>, captured: Captured) {
    let Some(mut pipe) = pipe else {
        return;
    };
    let mut chunk = [0; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) => break,
            Ok(read) => captured.extend(&chunk[..read]),
            Err(err) => {
                // Keep whatever was read before the failure
                tracing::trace!(%err, "Reading child output");
                break;
            },
        }
    }
}

/// Find the uid and gid of `user`
///
/// `getpwnam` does not always know about users created during first boot, so fall back to the directory
/// service cache.
#[tracing::instrument(level = "debug", skip(deadline))]
async fn resolve_user(user: &str, deadline: Deadline) -> Result<(u32, u32), CommandError> {
    match nix::unistd::User::from_name(user) {
        Ok(Some(found)) => return Ok((found.uid.as_raw(), found.gid.as_raw())),
        Ok(None) => tracing::debug!("User unknown to `getpwnam`, asking `dscacheutil`"),
        Err(err) => tracing::debug!(%err, "`getpwnam` failed, asking `dscacheutil`"),
    }

    let mut command = Command::new(DSCACHEUTIL_PATH);
    command
        .args(["-q", "user", "-a", "name", user])
        .stdin(Stdio::null());
    let output = run(DSCACHEUTIL_PATH, command, None, deadline)
        .await
        .map_err(|err| CommandError::UserResolution {
            user: user.into(),
            reason: format!("`{DSCACHEUTIL_PATH}` failed: {err}"),
        })?;

    parse_user_ids(user, &output.stdout)
}

/// Read the uid and gid of `user` out of `dscacheutil -q user` output
fn parse_user_ids(user: &str, text: &str) -> Result<(u32, u32), CommandError> {
    let values = extract_key_values(text, &["uid", "gid"]);
    let parse = |key: &str| -> Result<u32, CommandError> {
        let raw = values.get(key).ok_or_else(|| CommandError::UserResolution {
            user: user.into(),
            reason: format!("no `{key}` in `{DSCACHEUTIL_PATH}` output"),
        })?;
        raw.parse().map_err(|err| CommandError::UserResolution {
            user: user.into(),
            reason: format!("parsing {key} `{raw}`: {err}"),
        })
    };

    Ok((parse("uid")?, parse("gid")?))
}

/// Pick `key: value` lines out of `dscacheutil` style output, matching keys case-insensitively
pub(crate) fn extract_key_values(text: &str, keys: &[&str]) -> HashMap<String, String> {
    let mut extracted = HashMap::new();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(": ") else {
            continue;
        };
        if let Some(wanted) = keys.iter().find(|k| k.eq_ignore_ascii_case(key.trim())) {
            extracted.insert(wanted.to_string(), value.trim().to_string());
        }
    }
    extracted
}
