//! The control socket.
//!
//! One JSON object per line: a [`firth_ipc::Request`] in, a
//! [`firth_ipc::Reply`] out, then the connection closes. The listener is a
//! level-triggered source on the compositor event loop; commands run on the
//! loop thread like every other event.

use std::env;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use calloop::generic::Generic;
use calloop::{Interest, LoopHandle, Mode, PostAction};
use tracing::{info, warn};

use firth_ipc::{Reply, Request};

use crate::compositor::State;

/// Grace period for a connected client to send its request.
const CLIENT_TIMEOUT: Duration = Duration::from_millis(100);

/// The default socket path for this compositor instance.
pub fn default_socket_path() -> PathBuf {
    let dir = env::var_os("XDG_RUNTIME_DIR").map(PathBuf::from).unwrap_or_else(env::temp_dir);
    dir.join(format!("firth.{}.sock", std::process::id()))
}

/// Binds the control socket and registers it on the event loop. The path
/// is exported so spawned processes can find it.
pub fn start(handle: &LoopHandle<'static, State>) -> Result<PathBuf> {
    let path = default_socket_path();
    let _ = fs::remove_file(&path);

    let listener = UnixListener::bind(&path)
        .with_context(|| format!("binding control socket {}", path.display()))?;
    listener.set_nonblocking(true)?;
    env::set_var(firth_ipc::SOCKET_ENV, &path);

    handle
        .insert_source(
            Generic::new(listener, Interest::READ, Mode::Level),
            |_, listener, state: &mut State| {
                loop {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            if let Err(err) = handle_client(stream, state) {
                                warn!("control client error: {err}");
                            }
                        }
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                        Err(err) => {
                            warn!("control socket accept failed: {err}");
                            break;
                        }
                    }
                }
                Ok(PostAction::Continue)
            },
        )
        .map_err(|err| anyhow!("registering control socket: {err}"))?;

    info!(path = %path.display(), "control socket listening");
    Ok(path)
}

fn handle_client(stream: UnixStream, state: &mut State) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(CLIENT_TIMEOUT))?;
    stream.set_write_timeout(Some(CLIENT_TIMEOUT))?;

    let mut line = String::new();
    BufReader::new(&stream).read_line(&mut line)?;

    let reply = match serde_json::from_str::<Request>(&line) {
        Ok(request) => state.run_command(request.command),
        Err(err) => Reply::Err { message: format!("invalid request: {err}") },
    };

    let mut stream = &stream;
    let json = serde_json::to_string(&reply).map_err(io::Error::other)?;
    stream.write_all(json.as_bytes())?;
    stream.write_all(b"\n")?;
    Ok(())
}
