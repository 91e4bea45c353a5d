use std::path::{Path, PathBuf};

use crate::{config::InterpreterConfig, runner::ProcessRunner, types::ResourceLimits, Result};

pub mod defaults {
    use crate::config::{Credential, InterpreterConfig, ServiceConfig};
    use std::path::Path;
    use tokio::time::Duration;

    pub const TEST_API_KEY: &str = "test-api-key";

    pub fn shell_interpreter() -> InterpreterConfig {
        InterpreterConfig {
            program: "sh".to_string(),
            profile: None,
            profile_flag: "-c".to_string(),
            extension: "sh".to_string(),
        }
    }

    pub fn default_timeout() -> Duration {
        Duration::from_secs(5)
    }

    pub fn kill_grace() -> Duration {
        Duration::from_millis(200)
    }

    pub fn test_config(scratch_dir: &Path) -> ServiceConfig {
        ServiceConfig::new(Credential::new(TEST_API_KEY))
            .with_interpreter(shell_interpreter())
            .with_scratch_dir(scratch_dir)
            .with_timeout(default_timeout())
            .with_kill_grace(kill_grace())
    }
}

pub fn shell_runner(working_dir: &Path) -> ProcessRunner {
    ProcessRunner::new(
        defaults::shell_interpreter(),
        working_dir,
        ResourceLimits::default(),
        defaults::kill_grace(),
    )
}

/// Writes a shell script next to where the runner would look for it.
pub fn write_script(dir: &Path, body: &str) -> Result<PathBuf> {
    let path = dir.join(format!("script-{}.sh", uuid::Uuid::new_v4().simple()));
    std::fs::write(&path, body)?;
    Ok(path)
}

pub fn scratch_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

/// True while `pid` is a live process. Zombies waiting for a reaper count as gone.
pub fn process_alive(pid: i32) -> bool {
    #[cfg(target_os = "linux")]
    {
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
            return false;
        };
        // The state field follows the parenthesised command name.
        match stat.rsplit_once(')') {
            Some((_, rest)) => !matches!(rest.trim_start().chars().next(), Some('Z' | 'X')),
            None => false,
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        kill(Pid::from_raw(pid), None).is_ok()
    }
}

pub fn interpreter(program: &str) -> InterpreterConfig {
    InterpreterConfig {
        program: program.to_string(),
        ..defaults::shell_interpreter()
    }
}

/// True if `pid` has exited but not been reaped yet.
#[cfg(target_os = "linux")]
pub fn is_zombie(pid: i32) -> bool {
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| {
            let (_, rest) = stat.rsplit_once(')')?;
            rest.trim_start().chars().next()
        })
        == Some('Z')
}
