//! Startup and shutdown of user processes.
//!
//! An executable init file, if present, is spawned as a process-group
//! leader once the compositor is ready; the whole group receives SIGTERM
//! when the compositor exits. `SIGCHLD` is set to ignore in `main`, so
//! spawned children are reaped by the kernel.

use std::env;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use tracing::{debug, info};

/// A running init process group.
#[derive(Debug)]
pub struct InitProcess {
    pgid: libc::pid_t,
}

impl InitProcess {
    /// Sends SIGTERM to the whole init process group.
    pub fn terminate(self) {
        info!(pgid = self.pgid, "terminating init process group");
        unsafe {
            libc::kill(-self.pgid, libc::SIGTERM);
        }
    }
}

/// The first executable init file in the search order.
pub fn locate_init() -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME") {
        candidates.push(PathBuf::from(xdg).join("firth/init"));
    }
    if let Some(home) = env::var_os("HOME") {
        candidates.push(PathBuf::from(home).join(".config/firth/init"));
    }
    candidates.push(PathBuf::from("/etc/firth/init"));
    candidates.into_iter().find(|path| is_executable(path))
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Spawns the init file, if one exists, as a process-group leader with the
/// control socket path in its environment.
pub fn spawn_init(socket_path: &Path) -> Result<Option<InitProcess>> {
    let Some(path) = locate_init() else {
        debug!("no init file found");
        return Ok(None);
    };

    let mut command = Command::new(&path);
    command.env(firth_ipc::SOCKET_ENV, socket_path);
    command.stdin(Stdio::null());
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = command
        .spawn()
        .with_context(|| format!("spawning init file {}", path.display()))?;
    info!(path = %path.display(), pid = child.id(), "spawned init");
    Ok(Some(InitProcess { pgid: child.id() as libc::pid_t }))
}

/// Spawns a command with the default shell in its own session, returning
/// the pid.
pub fn spawn_shell(command: &str) -> Result<u32> {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command).stdin(Stdio::null());
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
    let child = cmd.spawn().with_context(|| format!("spawning {command}"))?;
    Ok(child.id())
}
