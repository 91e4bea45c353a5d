use async_trait::async_trait;
use nix::sys::resource::{setrlimit, Resource};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitid, Id, WaitPidFlag};
use nix::unistd::Pid;
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::Instant,
};
use tokio::{
    io::{self, AsyncRead, AsyncReadExt},
    process::Command,
    task::JoinHandle,
    time::{self, Duration},
};
use tracing::{debug, error, warn};

use crate::{
    config::InterpreterConfig,
    error::Error,
    types::{ExecutionOutcome, ExecutionStatus, ResourceLimits, TIMEOUT_EXIT_CODE},
    Result,
};

const CHILD_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Runs a staged artifact to completion or deadline.
///
/// `Ok` carries every outcome the service can report as data, including spawn failures.
/// `Err` is reserved for faults in the runner itself.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, artifact: &Path, timeout: Duration) -> Result<ExecutionOutcome>;
}

/// Spawns the configured interpreter in its own process group.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    interpreter: InterpreterConfig,
    working_dir: PathBuf,
    limits: ResourceLimits,
    kill_grace: Duration,
}

impl ProcessRunner {
    pub fn new(
        interpreter: InterpreterConfig,
        working_dir: impl Into<PathBuf>,
        limits: ResourceLimits,
        kill_grace: Duration,
    ) -> Self {
        Self {
            interpreter,
            working_dir: working_dir.into(),
            limits,
            kill_grace,
        }
    }

    /// Arguments handed to the interpreter. The snippet itself is only ever reached through
    /// the artifact path.
    pub fn command_args(&self, artifact: &Path) -> Vec<OsString> {
        let mut args = Vec::with_capacity(3);
        if let Some(profile) = &self.interpreter.profile {
            args.push(OsString::from(&self.interpreter.profile_flag));
            args.push(profile.as_os_str().to_owned());
        }
        args.push(artifact.as_os_str().to_owned());
        args
    }

    fn build_command(&self, program: &Path, artifact: &Path) -> Command {
        let mut command = Command::new(program);
        command
            .args(self.command_args(artifact))
            .env_clear()
            .env("PATH", CHILD_PATH)
            .env("HOME", &self.working_dir)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let cpu_time = self.limits.cpu_time;
        let file_size = self.limits.file_size;

        unsafe {
            command.pre_exec(move || {
                setrlimit(Resource::RLIMIT_CPU, cpu_time, cpu_time)
                    .map_err(std::io::Error::from)?;
                setrlimit(Resource::RLIMIT_FSIZE, file_size, file_size)
                    .map_err(std::io::Error::from)?;
                Ok(())
            });
        }

        command
    }

    /// SIGTERM to the whole group, then SIGKILL once the grace window is over.
    async fn terminate(&self, exited: &mut JoinHandle<()>, group: &ProcessGroup) {
        group.signal(Signal::SIGTERM);
        if time::timeout(self.kill_grace, exited).await.is_err() {
            debug!("Process group {:?} ignored SIGTERM", group.pgid);
        }
        // Members that trapped SIGTERM or outlived the leader go down here.
        group.signal(Signal::SIGKILL);
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    async fn run(&self, artifact: &Path, timeout: Duration) -> Result<ExecutionOutcome> {
        let program = match which::which(&self.interpreter.program) {
            Ok(path) => path,
            Err(e) => {
                error!("Interpreter {} not found: {}", self.interpreter.program, e);
                return Ok(ExecutionOutcome::spawn_failed(format!(
                    "interpreter {} not found: {}",
                    self.interpreter.program, e
                )));
            }
        };

        debug!("Runner execute - Program: {:?}", program);
        debug!("Runner execute - Artifact: {:?}", artifact);

        let mut command = self.build_command(&program, artifact);
        let start = Instant::now();
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to spawn {:?}: {}", program, e);
                return Ok(ExecutionOutcome::spawn_failed(format!(
                    "failed to spawn interpreter: {}",
                    e
                )));
            }
        };

        let mut group = ProcessGroup::new(child.id());
        let limit = self.limits.output_limit;
        let stdout = capture(child.stdout.take(), limit);
        let stderr = capture(child.stderr.take(), limit);

        // The leader stays unreaped until the group has been signalled, which keeps its pid
        // and therefore the group id reserved.
        let mut exited = leader_exit(child.id());
        let completed = time::timeout(timeout, &mut exited).await.is_ok();
        if completed {
            // Background children the snippet left behind die with the request.
            group.signal(Signal::SIGKILL);
        } else {
            warn!(
                "Execution exceeded {}s deadline, terminating process group",
                timeout.as_secs()
            );
            self.terminate(&mut exited, &group).await;
        }

        let exit = child
            .wait()
            .await
            .map_err(|e| Error::Process(format!("Failed to reap process: {}", e)))?;
        group.disarm();

        let (status, exit_code) = if completed {
            (ExecutionStatus::Completed, exit_code_of(exit))
        } else {
            (ExecutionStatus::TimedOut, TIMEOUT_EXIT_CODE)
        };

        let stdout = collect(stdout, self.kill_grace).await;
        let stderr = collect(stderr, self.kill_grace).await;

        Ok(ExecutionOutcome {
            stdout,
            stderr,
            exit_code,
            status,
            elapsed: start.elapsed(),
        })
    }
}

/// Kills the process group with SIGKILL when dropped while armed, so a cancelled request
/// cannot leave the interpreter or its children running.
struct ProcessGroup {
    pgid: Option<Pid>,
    armed: bool,
}

impl ProcessGroup {
    fn new(leader: Option<u32>) -> Self {
        Self {
            pgid: leader.map(|id| Pid::from_raw(id as i32)),
            armed: true,
        }
    }

    fn signal(&self, signal: Signal) {
        if let Some(pgid) = self.pgid {
            match killpg(pgid, signal) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => error!("Failed to send {} to process group {}: {}", signal, pgid, e),
            }
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if self.armed {
            self.signal(Signal::SIGKILL);
        }
    }
}

/// Resolves once the leader has exited, without reaping it.
fn leader_exit(leader: Option<u32>) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let Some(pid) = leader else {
            return;
        };
        let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT;
        loop {
            match waitid(Id::Pid(Pid::from_raw(pid as i32)), flags) {
                Err(Errno::EINTR) => continue,
                Ok(_) => return,
                Err(e) => {
                    debug!("waitid on {} failed: {}", pid, e);
                    return;
                }
            }
        }
    })
}

type Capture = Option<JoinHandle<std::io::Result<Vec<u8>>>>;

/// Keeps the first `limit` bytes of `pipe` and drains the rest, so the child never blocks on
/// a full pipe and memory stays bounded.
fn capture<R>(pipe: Option<R>, limit: u64) -> Capture
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pipe.map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            (&mut pipe).take(limit).read_to_end(&mut buf).await?;
            let dropped = io::copy(&mut pipe, &mut io::sink()).await?;
            if dropped > 0 {
                warn!("Discarded {} bytes of output over the {} byte limit", dropped, limit);
            }
            Ok(buf)
        })
    })
}

/// Pipes close once every group member is gone. A descendant that escaped the group could
/// hold them open, so reading is bounded by `grace`.
async fn collect(handle: Capture, grace: Duration) -> Vec<u8> {
    let Some(mut handle) = handle else {
        return Vec::new();
    };
    match time::timeout(grace, &mut handle).await {
        Ok(Ok(Ok(buf))) => buf,
        Ok(Ok(Err(e))) => {
            error!("Failed to read process output: {}", e);
            Vec::new()
        }
        Ok(Err(e)) => {
            error!("Output reader task failed: {}", e);
            Vec::new()
        }
        Err(_) => {
            warn!("Output stream still open after process exit, discarding");
            handle.abort();
            Vec::new()
        }
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}
