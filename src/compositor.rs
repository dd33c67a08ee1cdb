//! Compositor state glue.
//!
//! Ties the core (root, seat, input manager) to the event loop: the
//! transaction deadline timer, the control socket, and the startup/shutdown
//! of the init process. The display-server backend drives this state
//! through the entry points below and provides the [`SeatHandler`] and
//! [`LayoutTransport`] implementations.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use calloop::timer::{TimeoutAction, Timer};
use calloop::{LoopHandle, LoopSignal, RegistrationToken};
use tracing::{debug, info, trace, warn};

use firth_ipc::{Command, Reply};

use crate::config::Settings;
use crate::control;
use crate::input::InputManager;
use crate::ipc;
use crate::protocols::layout::{LayoutErrorCode, LayoutEvent, LayoutTransport};
use crate::root::{Root, TimerRequest};
use crate::seat::{CursorImage, SeatHandler};
use crate::shell::SurfaceHandle;
use crate::startup::{self, InitProcess};
use crate::types::LayoutId;

/// Seat handler for running without a display backend attached.
#[derive(Debug, Default)]
pub struct NullSeatHandler;

impl SeatHandler for NullSeatHandler {
    fn keyboard_enter(&mut self, surface: SurfaceHandle) {
        trace!(?surface, "keyboard enter");
    }

    fn keyboard_leave(&mut self) {
        trace!("keyboard leave");
    }

    fn pointer_enter(&mut self, surface: SurfaceHandle, x: f64, y: f64) {
        trace!(?surface, x, y, "pointer enter");
    }

    fn pointer_motion(&mut self, x: f64, y: f64) {
        trace!(x, y, "pointer motion");
    }

    fn pointer_leave(&mut self) {
        trace!("pointer leave");
    }

    fn set_cursor_image(&mut self, image: CursorImage) {
        trace!(?image, "cursor image");
    }

    fn warp_pointer(&mut self, x: f64, y: f64) {
        trace!(x, y, "pointer warp");
    }
}

/// Layout transport for running without connected layout clients.
#[derive(Debug, Default)]
pub struct NullLayoutTransport;

impl LayoutTransport for NullLayoutTransport {
    fn event(&mut self, layout: LayoutId, event: LayoutEvent) {
        trace!(%layout, ?event, "layout event dropped (no transport)");
    }

    fn error(&mut self, layout: LayoutId, code: LayoutErrorCode, message: &str) {
        warn!(%layout, ?code, message, "layout protocol error (no transport)");
    }
}

/// Everything the event loop dispatches into.
pub struct State {
    pub root: Root,
    pub input: InputManager,
    pub seat_handler: Box<dyn SeatHandler>,
    pub layout_transport: Box<dyn LayoutTransport>,
    loop_handle: LoopHandle<'static, State>,
    loop_signal: LoopSignal,
    deadline_token: Option<RegistrationToken>,
    pub socket_path: Option<PathBuf>,
    init: Option<InitProcess>,
}

impl State {
    pub fn new(loop_handle: LoopHandle<'static, State>, loop_signal: LoopSignal) -> Self {
        Self {
            root: Root::new(Settings::new()),
            input: InputManager::new(),
            seat_handler: Box::new(NullSeatHandler),
            layout_transport: Box::new(NullLayoutTransport),
            loop_handle,
            loop_signal,
            deadline_token: None,
            socket_path: None,
            init: None,
        }
    }

    /// Binds the control socket and spawns the init file.
    pub fn bootstrap(&mut self) -> Result<()> {
        let socket_path = ipc::start(&self.loop_handle)?;
        self.init = startup::spawn_init(&socket_path)?;
        self.socket_path = Some(socket_path);
        Ok(())
    }

    /// Runs one control command, wiring its timer request and exit flag.
    pub fn run_command(&mut self, command: Command) -> Reply {
        debug!(?command, "control command");
        let result = control::run_command(
            &mut self.root,
            &mut self.input,
            self.seat_handler.as_mut(),
            self.layout_transport.as_mut(),
            command,
        );
        match result {
            Ok(outcome) => {
                self.apply_timer(outcome.timer);
                if outcome.exit {
                    info!("exit requested");
                    self.loop_signal.stop();
                }
                Reply::Ok { value: outcome.value }
            }
            Err(message) => Reply::Err { message },
        }
    }

    /// Applies a deadline-timer request from the transaction engine.
    pub fn apply_timer(&mut self, request: TimerRequest) {
        match request {
            TimerRequest::None => {}
            TimerRequest::Cancel => {
                if let Some(token) = self.deadline_token.take() {
                    self.loop_handle.remove(token);
                }
            }
            TimerRequest::Schedule(duration) => {
                if let Some(token) = self.deadline_token.take() {
                    self.loop_handle.remove(token);
                }
                let timer = Timer::from_duration(duration);
                let token = self
                    .loop_handle
                    .insert_source(timer, |_: Instant, _: &mut (), state: &mut State| {
                        state.deadline_token = None;
                        let request = state
                            .root
                            .handle_deadline(state.layout_transport.as_mut());
                        state.apply_timer(request);
                        TimeoutAction::Drop
                    })
                    .expect("inserting the deadline timer");
                self.deadline_token = Some(token);
            }
        }
    }

    /// A client acknowledged a configure (backend entry point).
    pub fn on_configure_acked(&mut self, view: crate::types::ViewId, serial: u32) {
        let request =
            self.root
                .notify_configured(view, serial, self.layout_transport.as_mut());
        self.apply_timer(request);
    }

    /// Drains and returns the outputs that need repainting.
    pub fn take_repaints(&mut self) -> Vec<crate::types::OutputId> {
        let mut repaint = Vec::new();
        for output in &mut self.root.outputs {
            if std::mem::take(&mut output.needs_repaint) {
                repaint.push(output.id);
            }
        }
        repaint
    }

    /// Tears down startup processes; the socket file goes with it.
    pub fn shutdown(&mut self) {
        if let Some(init) = self.init.take() {
            init.terminate();
        }
        if let Some(path) = self.socket_path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}
