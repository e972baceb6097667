//! Child process execution with a wall-clock deadline.
//!
//! The child runs in its own process group so a timeout or interrupt can take
//! down everything it spawned. `ChildGuard` kills and reaps on drop, covering
//! every early return. The group is always signalled while the leader is still
//! unreaped, so its id cannot have been recycled.
use super::CancelToken;
use crate::util::truncate_bytes;
use anyhow::{anyhow, Context, Result};
use crossbeam_channel::Receiver;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long pipes may stay open past the deadline before capture is cut off.
const DRAIN_GRACE: Duration = Duration::from_millis(250);
const READ_CHUNK: usize = 8 * 1024;

/// One command invocation inside a sandbox scope.
pub struct StepRequest<'a> {
    pub argv: &'a [String],
    pub cwd: &'a Path,
    pub env: &'a [(String, String)],
    pub deadline: Instant,
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },
    TimedOut,
    Interrupted,
}

impl StepOutcome {
    pub fn success(&self) -> bool {
        matches!(
            self,
            StepOutcome::Exited {
                code: Some(0),
                ..
            }
        )
    }
}

#[derive(Debug, Clone)]
pub struct StepOutput {
    pub outcome: StepOutcome,
    pub stdout: String,
    pub stderr: String,
}

struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn terminate(&mut self) {
        kill_process_group(&self.child);
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.reaped = true;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            self.terminate();
        }
    }
}

/// Run one command to completion, deadline, or cancellation.
pub fn run_step(request: &StepRequest<'_>, cancel: &CancelToken) -> Result<StepOutput> {
    let (program, args) = request
        .argv
        .split_first()
        .ok_or_else(|| anyhow!("empty command"))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(request.cwd)
        .env_clear()
        .envs(request.env.iter().map(|(key, value)| (key, value)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let child = cmd.spawn().with_context(|| format!("spawn {program}"))?;
    let mut guard = ChildGuard {
        child,
        reaped: false,
    };
    let stdout = spawn_reader(guard.child.stdout.take(), request.max_output_bytes);
    let stderr = spawn_reader(guard.child.stderr.take(), request.max_output_bytes);

    let outcome = loop {
        if let Some(status) = reap_if_exited(&mut guard)? {
            break exit_outcome(status);
        }
        if cancel.is_cancelled() {
            guard.terminate();
            break StepOutcome::Interrupted;
        }
        if Instant::now() >= request.deadline {
            guard.terminate();
            break StepOutcome::TimedOut;
        }
        thread::sleep(POLL_INTERVAL);
    };

    // A descendant that left the group can keep a pipe open indefinitely.
    let now = Instant::now();
    let drain_from = match outcome {
        StepOutcome::Exited { .. } => request.deadline.max(now),
        StepOutcome::TimedOut | StepOutcome::Interrupted => now,
    };
    let drain_until = drain_from.checked_add(DRAIN_GRACE).unwrap_or(drain_from);
    Ok(StepOutput {
        outcome,
        stdout: stdout.finish(drain_until, request.max_output_bytes),
        stderr: stderr.finish(drain_until, request.max_output_bytes),
    })
}

/// Reap the child if it has exited, first killing anything left in its group.
#[cfg(target_os = "linux")]
fn reap_if_exited(guard: &mut ChildGuard) -> Result<Option<ExitStatus>> {
    if !leader_exited(&guard.child)? {
        return Ok(None);
    }
    // Stragglers left in the group would hold the pipes open.
    kill_process_group(&guard.child);
    let status = guard.child.wait().context("reap child")?;
    guard.reaped = true;
    Ok(Some(status))
}

#[cfg(not(target_os = "linux"))]
fn reap_if_exited(guard: &mut ChildGuard) -> Result<Option<ExitStatus>> {
    let status = guard.child.try_wait().context("poll child status")?;
    if status.is_some() {
        guard.reaped = true;
    }
    Ok(status)
}

/// True once the child has exited, leaving it waitable.
#[cfg(target_os = "linux")]
fn leader_exited(child: &Child) -> Result<bool> {
    let pid: libc::id_t = child.id();
    // SAFETY: an all-zero siginfo_t is a valid out-parameter for waitid(2).
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    // SAFETY: `info` outlives the call; WNOWAIT keeps the child a zombie so the
    // later `Child::wait` still reaps it.
    let rc = unsafe {
        libc::waitid(
            libc::P_PID,
            pid,
            &mut info,
            libc::WEXITED | libc::WNOHANG | libc::WNOWAIT,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error()).context("poll child status");
    }
    // SAFETY: with WNOHANG, si_pid stays zero until the child has exited.
    Ok(unsafe { info.si_pid() } != 0)
}

/// Output captured from one pipe by a background thread.
struct PipeCapture {
    buf: Arc<Mutex<Vec<u8>>>,
    done: Receiver<()>,
}

impl PipeCapture {
    /// Wait for end-of-file until `until`, then take what was captured.
    fn finish(self, until: Instant, max_bytes: usize) -> String {
        if self.done.recv_deadline(until).is_err() {
            tracing::warn!("output pipe still open after the step ended; capture cut off");
        }
        let bytes = std::mem::take(&mut *lock(&self.buf));
        truncate_bytes(&bytes, max_bytes)
    }
}

fn lock(buf: &Mutex<Vec<u8>>) -> MutexGuard<'_, Vec<u8>> {
    buf.lock().unwrap_or_else(PoisonError::into_inner)
}

fn spawn_reader<R>(pipe: Option<R>, max_bytes: usize) -> PipeCapture
where
    R: Read + Send + 'static,
{
    let buf = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done) = crossbeam_channel::bounded(1);
    let shared = Arc::clone(&buf);
    let limit = max_bytes.saturating_add(1);
    thread::spawn(move || {
        if let Some(mut pipe) = pipe {
            let mut chunk = [0u8; READ_CHUNK];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(read) => {
                        // Past the limit keep draining so the child never
                        // blocks on a full pipe.
                        let mut buf = lock(&shared);
                        let room = limit.saturating_sub(buf.len());
                        buf.extend_from_slice(&chunk[..read.min(room)]);
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(_) => break,
                }
            }
        }
        let _ = done_tx.send(());
    });
    PipeCapture { buf, done }
}

fn exit_outcome(status: ExitStatus) -> StepOutcome {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;
    StepOutcome::Exited {
        code: status.code(),
        signal,
    }
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    if let Ok(pid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: kill(2) with a negative pid signals the group created for
        // this child via process_group(0); failure (ESRCH) is ignored.
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}
