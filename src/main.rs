use anyhow::{Context, Result};
use calloop::EventLoop;
use tracing::info;
use tracing_subscriber::EnvFilter;

use firth::compositor::State;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("firth=debug,warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Spawned children are reaped by the kernel.
    unsafe {
        libc::signal(libc::SIGCHLD, libc::SIG_IGN);
    }

    let mut event_loop: EventLoop<'static, State> =
        EventLoop::try_new().context("creating the event loop")?;
    let mut state = State::new(event_loop.handle(), event_loop.get_signal());
    state.bootstrap()?;

    info!("running");
    event_loop
        .run(None, &mut state, |state| {
            // The backend consumes repaint requests here once attached.
            let _ = state.take_repaints();
        })
        .context("event loop")?;

    state.shutdown();
    Ok(())
}
