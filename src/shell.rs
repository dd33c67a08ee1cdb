//! The shell capability set.
//!
//! The core drives client windows through a small set of capabilities with
//! two variants, xdg-shell-like and x11-like. The one semantic difference
//! the core cares about is that xdg configures return an acknowledgement
//! serial while x11 configures do not; the x11 side records the
//! [`X11_CONFIGURE_SERIAL`] sentinel instead, and its acknowledgement is the
//! next surface commit observed by the backend.

use crate::geometry::Rect;
use crate::view::SizeConstraints;

/// Configure serial recorded for x11-like shells, which have none.
pub const X11_CONFIGURE_SERIAL: u32 = u32::MAX;

/// Opaque token for a backing wl_surface, minted by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u64);

/// A surface found by hit-testing, with surface-local coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceHit {
    pub surface: SurfaceHandle,
    pub x: f64,
    pub y: f64,
}

/// Capabilities shared by both shell kinds.
pub trait ShellSurface {
    /// Asks the client to close. The eventual unmap is observed
    /// asynchronously.
    fn close(&mut self);

    fn constraints(&self) -> SizeConstraints;

    fn set_activated(&mut self, activated: bool);

    fn set_fullscreen(&mut self, fullscreen: bool);

    /// The size the client asked for before the compositor placed it.
    fn natural_size(&self) -> (u32, u32);

    /// The surface under a view-local point, if any.
    fn surface_at(&self, x: f64, y: f64) -> Option<SurfaceHit>;

    /// Visits every surface belonging to the window, popups included.
    fn for_each_surface(&self, f: &mut dyn FnMut(SurfaceHandle));

    fn app_id(&self) -> Option<String>;
}

/// An xdg-toplevel-like window: configures are acknowledged by serial.
pub trait XdgShellSurface: ShellSurface {
    /// Sends a configure for the given geometry and returns its serial.
    fn configure(&mut self, rect: Rect) -> u32;
}

/// An xwayland-like window: configures apply without a serial handshake.
pub trait X11ShellSurface: ShellSurface {
    fn configure(&mut self, rect: Rect);
}

/// The shell backing a view.
pub enum Shell {
    Xdg(Box<dyn XdgShellSurface>),
    X11(Box<dyn X11ShellSurface>),
}

impl Shell {
    /// Forwards a configure, returning the serial to await (the x11
    /// sentinel when the shell has no serials).
    pub fn configure(&mut self, rect: Rect) -> u32 {
        match self {
            Shell::Xdg(shell) => shell.configure(rect),
            Shell::X11(shell) => {
                shell.configure(rect);
                X11_CONFIGURE_SERIAL
            }
        }
    }

    fn common(&self) -> &dyn ShellSurface {
        match self {
            Shell::Xdg(shell) => shell.as_ref(),
            Shell::X11(shell) => shell.as_ref(),
        }
    }

    fn common_mut(&mut self) -> &mut dyn ShellSurface {
        match self {
            Shell::Xdg(shell) => shell.as_mut(),
            Shell::X11(shell) => shell.as_mut(),
        }
    }

    pub fn close(&mut self) {
        self.common_mut().close();
    }

    pub fn constraints(&self) -> SizeConstraints {
        self.common().constraints()
    }

    pub fn set_activated(&mut self, activated: bool) {
        self.common_mut().set_activated(activated);
    }

    pub fn set_fullscreen(&mut self, fullscreen: bool) {
        self.common_mut().set_fullscreen(fullscreen);
    }

    pub fn natural_size(&self) -> (u32, u32) {
        self.common().natural_size()
    }

    pub fn surface_at(&self, x: f64, y: f64) -> Option<SurfaceHit> {
        self.common().surface_at(x, y)
    }

    pub fn for_each_surface(&self, f: &mut dyn FnMut(SurfaceHandle)) {
        self.common().for_each_surface(f);
    }

    pub fn app_id(&self) -> Option<String> {
        self.common().app_id()
    }
}

impl std::fmt::Debug for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Shell::Xdg(_) => f.write_str("Shell::Xdg"),
            Shell::X11(_) => f.write_str("Shell::X11"),
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Recording shells for driving the transaction engine in tests.

    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[derive(Debug, Default)]
    pub struct MockShellState {
        pub configures: Vec<(Rect, u32)>,
        pub closed: bool,
        pub activated: Option<bool>,
        pub fullscreen: Option<bool>,
        pub next_serial: u32,
        pub constraints: SizeConstraints,
        pub natural_size: (u32, u32),
        pub app_id: Option<String>,
        pub surface: Option<SurfaceHandle>,
    }

    /// Shared handle to a mock shell's recorded state.
    #[derive(Debug, Clone, Default)]
    pub struct MockShellHandle(pub Rc<RefCell<MockShellState>>);

    impl MockShellHandle {
        pub fn new() -> Self {
            let handle = Self::default();
            handle.0.borrow_mut().natural_size = (640, 480);
            handle
        }

        pub fn last_serial(&self) -> Option<u32> {
            self.0.borrow().configures.last().map(|&(_, serial)| serial)
        }

        pub fn configure_count(&self) -> usize {
            self.0.borrow().configures.len()
        }
    }

    pub struct MockShell {
        pub state: MockShellHandle,
    }

    impl ShellSurface for MockShell {
        fn close(&mut self) {
            self.state.0.borrow_mut().closed = true;
        }

        fn constraints(&self) -> SizeConstraints {
            self.state.0.borrow().constraints
        }

        fn set_activated(&mut self, activated: bool) {
            self.state.0.borrow_mut().activated = Some(activated);
        }

        fn set_fullscreen(&mut self, fullscreen: bool) {
            self.state.0.borrow_mut().fullscreen = Some(fullscreen);
        }

        fn natural_size(&self) -> (u32, u32) {
            self.state.0.borrow().natural_size
        }

        fn surface_at(&self, x: f64, y: f64) -> Option<SurfaceHit> {
            self.state.0.borrow().surface.map(|surface| SurfaceHit { surface, x, y })
        }

        fn for_each_surface(&self, f: &mut dyn FnMut(SurfaceHandle)) {
            if let Some(surface) = self.state.0.borrow().surface {
                f(surface);
            }
        }

        fn app_id(&self) -> Option<String> {
            self.state.0.borrow().app_id.clone()
        }
    }

    impl XdgShellSurface for MockShell {
        fn configure(&mut self, rect: Rect) -> u32 {
            let mut state = self.state.0.borrow_mut();
            state.next_serial += 1;
            let serial = state.next_serial;
            state.configures.push((rect, serial));
            serial
        }
    }

    impl X11ShellSurface for MockShell {
        fn configure(&mut self, rect: Rect) {
            let mut state = self.state.0.borrow_mut();
            state.configures.push((rect, X11_CONFIGURE_SERIAL));
        }
    }

    /// A fresh xdg mock shell plus the handle observing it.
    pub fn xdg() -> (Shell, MockShellHandle) {
        let state = MockShellHandle::new();
        (Shell::Xdg(Box::new(MockShell { state: state.clone() })), state)
    }

    /// A fresh x11 mock shell plus the handle observing it.
    pub fn x11() -> (Shell, MockShellHandle) {
        let state = MockShellHandle::new();
        (Shell::X11(Box::new(MockShell { state: state.clone() })), state)
    }
}
