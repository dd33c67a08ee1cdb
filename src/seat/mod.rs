//! Per-seat focus state.
//!
//! A seat focuses at most one target: a view, a layer surface, or nothing.
//! Focus changes commit through the transaction engine like every other
//! state change (the focus count lives in the view snapshots), while
//! keyboard enter/leave is delivered to the backend immediately through
//! [`SeatHandler`].

use tracing::debug;

use crate::output::Output;
use crate::protocols::layout::LayoutTransport;
use crate::root::{Root, TimerRequest};
use crate::shell::SurfaceHandle;
use crate::types::{ClientId, LayerSurfaceId, OutputId, ViewId};
use crate::view::View;

pub mod cursor;

pub use cursor::{Cursor, CursorMode};

/// Mode id of the normal mode.
pub const MODE_NORMAL: usize = 0;
/// Mode id of the locked mode entered while an input inhibitor is active.
pub const MODE_LOCKED: usize = 1;

/// What a seat's keyboard is focused on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FocusTarget {
    #[default]
    None,
    View(ViewId),
    Layer(LayerSurfaceId),
}

/// Image shown for the pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorImage {
    Default,
    Move,
    Resize,
}

/// Backend half of a seat: keyboard and pointer notifications.
pub trait SeatHandler {
    fn keyboard_enter(&mut self, surface: SurfaceHandle);
    fn keyboard_leave(&mut self);
    fn pointer_enter(&mut self, surface: SurfaceHandle, x: f64, y: f64);
    /// Motion within the surface that already has pointer focus.
    fn pointer_motion(&mut self, x: f64, y: f64);
    fn pointer_leave(&mut self);
    fn set_cursor_image(&mut self, image: CursorImage);
    /// Warps the hardware cursor to a global position.
    fn warp_pointer(&mut self, x: f64, y: f64);
}

/// One seat: focus, mode stack, cursor.
pub struct Seat {
    pub name: String,
    pub focused: FocusTarget,
    pub focused_output: Option<OutputId>,
    /// Most-recently-focused views, front first. Drives `focus(None)` and
    /// the "focused first" hit-test order.
    focus_stack: Vec<ViewId>,
    pub mode: usize,
    previous_mode: usize,
    modes: Vec<String>,
    pub cursor: Cursor,
}

impl Seat {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            focused: FocusTarget::None,
            focused_output: None,
            focus_stack: Vec::new(),
            mode: MODE_NORMAL,
            previous_mode: MODE_NORMAL,
            modes: vec!["normal".to_owned(), "locked".to_owned()],
            cursor: Cursor::new(),
        }
    }

    /// The view currently holding keyboard focus, if any.
    pub fn focused_view(&self) -> Option<ViewId> {
        match self.focused {
            FocusTarget::View(id) => Some(id),
            _ => None,
        }
    }

    fn allowed(view: &View, exclusive: Option<ClientId>) -> bool {
        exclusive.map_or(true, |client| view.client == client)
    }

    /// Sets keyboard focus.
    ///
    /// `Some(view)` focuses that view if the exclusive-client gate allows
    /// it; `None` falls back to the most recently focused view visible on
    /// the focused output, clearing focus if there is none.
    pub fn focus(
        &mut self,
        root: &mut Root,
        handler: &mut dyn SeatHandler,
        target: Option<ViewId>,
        exclusive: Option<ClientId>,
        transport: &mut dyn LayoutTransport,
    ) -> TimerRequest {
        let resolved = match target {
            Some(id) => match root.view(id) {
                Some(view) if Self::allowed(view, exclusive) => Some(id),
                _ => return TimerRequest::None,
            },
            None => self.best_candidate(root, exclusive),
        };

        match resolved {
            Some(id) => self.set_target(root, handler, FocusTarget::View(id), transport),
            None => self.set_target(root, handler, FocusTarget::None, transport),
        }
    }

    /// Focuses a keyboard-interactive layer surface.
    pub fn focus_layer(
        &mut self,
        root: &mut Root,
        handler: &mut dyn SeatHandler,
        layer_surface: LayerSurfaceId,
        transport: &mut dyn LayoutTransport,
    ) -> TimerRequest {
        self.set_target(root, handler, FocusTarget::Layer(layer_surface), transport)
    }

    /// Drops every reference to an unmapping view and refocuses.
    pub fn forget_view(
        &mut self,
        root: &mut Root,
        handler: &mut dyn SeatHandler,
        view: ViewId,
        exclusive: Option<ClientId>,
        transport: &mut dyn LayoutTransport,
    ) -> TimerRequest {
        self.focus_stack.retain(|&id| id != view);
        if self.focused == FocusTarget::View(view) {
            self.focused = FocusTarget::None;
            handler.keyboard_leave();
            return self.focus(root, handler, None, exclusive, transport);
        }
        TimerRequest::None
    }

    /// The most recently focused view still visible under the focused
    /// output's pending tags.
    fn best_candidate(&self, root: &Root, exclusive: Option<ClientId>) -> Option<ViewId> {
        let output_id = self.focused_output?;
        let output = root.output(output_id)?;
        let tags = output.pending.tags.get();
        self.focus_stack.iter().copied().find(|&id| {
            output
                .stack
                .get(id)
                .map_or(false, |view| view.visible_on(tags) && Self::allowed(view, exclusive))
        })
    }

    fn set_target(
        &mut self,
        root: &mut Root,
        handler: &mut dyn SeatHandler,
        target: FocusTarget,
        transport: &mut dyn LayoutTransport,
    ) -> TimerRequest {
        if self.focused == target {
            return TimerRequest::None;
        }

        // Deactivate the previous target.
        if let FocusTarget::View(old) = self.focused {
            if let Some(view) = root.view_mut(old) {
                view.pending.focus = view.pending.focus.saturating_sub(1);
                view.set_activated(false);
            }
        }

        self.focused = target;
        match target {
            FocusTarget::View(id) => {
                let Some(view) = root.view_mut(id) else {
                    self.focused = FocusTarget::None;
                    handler.keyboard_leave();
                    return TimerRequest::None;
                };
                view.pending.focus += 1;
                view.set_activated(true);
                let surface = view.surface;
                self.focused_output = Some(view.output);
                self.focus_stack.retain(|&existing| existing != id);
                self.focus_stack.insert(0, id);
                debug!(view = %id, "keyboard focus");
                match surface {
                    Some(surface) => handler.keyboard_enter(surface),
                    None => handler.keyboard_leave(),
                }
            }
            FocusTarget::Layer(id) => {
                let surface = root
                    .outputs
                    .iter()
                    .find_map(|output| output.layer_surface(id))
                    .and_then(|surface| surface.surface);
                debug!(layer_surface = %id, "keyboard focus");
                match surface {
                    Some(surface) => handler.keyboard_enter(surface),
                    None => handler.keyboard_leave(),
                }
            }
            FocusTarget::None => handler.keyboard_leave(),
        }

        root.commit_pending_state(transport)
    }

    // ------------------------------------------------------------------
    // Modes
    // ------------------------------------------------------------------

    /// Declares a named mode, returning its id.
    pub fn declare_mode(&mut self, name: &str) -> Result<usize, String> {
        if self.modes.iter().any(|mode| mode == name) {
            return Err(format!("mode {name} already declared"));
        }
        self.modes.push(name.to_owned());
        Ok(self.modes.len() - 1)
    }

    /// Enters a mode by name. The locked mode is managed by the input
    /// inhibitor and cannot be entered explicitly.
    pub fn enter_mode(&mut self, name: &str) -> Result<(), String> {
        let id = self
            .modes
            .iter()
            .position(|mode| mode == name)
            .ok_or_else(|| format!("unknown mode {name}"))?;
        if id == MODE_LOCKED {
            return Err("the locked mode cannot be entered".to_owned());
        }
        self.mode = id;
        Ok(())
    }

    /// Enters the locked mode, remembering the current one.
    pub fn enter_locked_mode(&mut self) {
        if self.mode != MODE_LOCKED {
            self.previous_mode = self.mode;
            self.mode = MODE_LOCKED;
        }
    }

    /// Leaves the locked mode, restoring the remembered one.
    pub fn leave_locked_mode(&mut self) {
        if self.mode == MODE_LOCKED {
            self.mode = self.previous_mode;
        }
    }

    /// Picks the output after/before the focused one in root order.
    pub fn neighbor_output(&self, root: &Root, forward: bool) -> Option<OutputId> {
        if root.outputs.is_empty() {
            return None;
        }
        let current = self
            .focused_output
            .and_then(|id| root.outputs.iter().position(|output| output.id == id))
            .unwrap_or(0);
        let len = root.outputs.len();
        let next = if forward { (current + 1) % len } else { (current + len - 1) % len };
        Some(root.outputs[next].id)
    }

    /// The focused output, falling back to the first one.
    pub fn output<'a>(&self, root: &'a Root) -> Option<&'a Output> {
        self.focused_output
            .and_then(|id| root.output(id))
            .or_else(|| root.outputs.first())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::geometry::Rect;
    use crate::protocols::layout::tests::RecordingTransport;
    use crate::shell::mock;
    use crate::types::Tags;

    /// Handler recording keyboard/pointer notifications.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingHandler {
        pub keyboard: Vec<Option<SurfaceHandle>>,
        pub pointer: Vec<Option<(SurfaceHandle, f64, f64)>>,
        pub motions: Vec<(f64, f64)>,
        pub images: Vec<CursorImage>,
        pub warps: Vec<(f64, f64)>,
    }

    impl SeatHandler for RecordingHandler {
        fn keyboard_enter(&mut self, surface: SurfaceHandle) {
            self.keyboard.push(Some(surface));
        }

        fn keyboard_leave(&mut self) {
            self.keyboard.push(None);
        }

        fn pointer_enter(&mut self, surface: SurfaceHandle, x: f64, y: f64) {
            self.pointer.push(Some((surface, x, y)));
        }

        fn pointer_motion(&mut self, x: f64, y: f64) {
            self.motions.push((x, y));
        }

        fn pointer_leave(&mut self) {
            self.pointer.push(None);
        }

        fn set_cursor_image(&mut self, image: CursorImage) {
            self.images.push(image);
        }

        fn warp_pointer(&mut self, x: f64, y: f64) {
            self.warps.push((x, y));
        }
    }

    pub(crate) fn root_with_output() -> (Root, OutputId) {
        let mut root = Root::new(Settings::default());
        let output = root.add_output("TEST-1".to_owned(), Rect::new(0, 0, 800, 600));
        (root, output)
    }

    pub(crate) fn map(
        root: &mut Root,
        output: OutputId,
        transport: &mut RecordingTransport,
    ) -> ViewId {
        let (shell, handle) = mock::xdg();
        let surface = SurfaceHandle(id_seed());
        handle.0.borrow_mut().surface = Some(surface);
        let (id, _) = root
            .map_view(output, ClientId::next(), shell, Some(surface), transport)
            .unwrap();
        settle(root, transport);
        id
    }

    /// Acknowledges every outstanding configure until the engine is idle.
    pub(crate) fn settle(root: &mut Root, transport: &mut RecordingTransport) {
        loop {
            let pending: Vec<(ViewId, u32)> = root
                .outputs
                .iter()
                .flat_map(|output| {
                    output.stack.ids().filter_map(|id| {
                        output.stack.get(id).unwrap().pending_serial.map(|serial| (id, serial))
                    })
                })
                .collect();
            if pending.is_empty() {
                break;
            }
            for (id, serial) in pending {
                let _ = root.notify_configured(id, serial, transport);
            }
        }
    }

    fn id_seed() -> u64 {
        use std::sync::atomic::{AtomicU64, Ordering};
        static NEXT: AtomicU64 = AtomicU64::new(100);
        NEXT.fetch_add(1, Ordering::Relaxed)
    }

    #[test]
    fn focus_activates_and_deactivates_symmetrically() {
        let (mut root, output) = root_with_output();
        let mut transport = RecordingTransport::default();
        let mut handler = RecordingHandler::default();
        let mut seat = Seat::new("default");
        let a = map(&mut root, output, &mut transport);
        let b = map(&mut root, output, &mut transport);

        let _ = seat.focus(&mut root, &mut handler, Some(a), None, &mut transport);
        assert_eq!(seat.focused, FocusTarget::View(a));
        assert_eq!(root.view(a).unwrap().current.focus, 1);

        let _ = seat.focus(&mut root, &mut handler, Some(b), None, &mut transport);
        assert_eq!(root.view(a).unwrap().current.focus, 0);
        assert_eq!(root.view(b).unwrap().current.focus, 1);
        // Enter notifications arrived for both, in order.
        assert_eq!(handler.keyboard.len(), 2);
    }

    #[test]
    fn focus_none_picks_most_recently_focused_visible() {
        let (mut root, output) = root_with_output();
        let mut transport = RecordingTransport::default();
        let mut handler = RecordingHandler::default();
        let mut seat = Seat::new("default");
        let a = map(&mut root, output, &mut transport);
        let b = map(&mut root, output, &mut transport);

        let _ = seat.focus(&mut root, &mut handler, Some(a), None, &mut transport);
        let _ = seat.focus(&mut root, &mut handler, Some(b), None, &mut transport);

        let _ = root.unmap_view(b, &mut transport);
        let _ = seat.forget_view(&mut root, &mut handler, b, None, &mut transport);
        assert_eq!(seat.focused, FocusTarget::View(a));
    }

    #[test]
    fn focus_respects_exclusive_client() {
        let (mut root, output) = root_with_output();
        let mut transport = RecordingTransport::default();
        let mut handler = RecordingHandler::default();
        let mut seat = Seat::new("default");
        let a = map(&mut root, output, &mut transport);
        let other = ClientId::next();

        let _ = seat.focus(&mut root, &mut handler, Some(a), Some(other), &mut transport);
        assert_eq!(seat.focused, FocusTarget::None);
    }

    #[test]
    fn hidden_views_are_not_refocused() {
        let (mut root, output) = root_with_output();
        let mut transport = RecordingTransport::default();
        let mut handler = RecordingHandler::default();
        let mut seat = Seat::new("default");
        let a = map(&mut root, output, &mut transport);
        let _ = seat.focus(&mut root, &mut handler, Some(a), None, &mut transport);

        // Move the view to tag 2 while the output shows tag 1.
        root.view_mut(a).unwrap().pending.tags = Tags::new(0b10).unwrap();
        let _ = seat.focus(&mut root, &mut handler, None, None, &mut transport);
        assert_eq!(seat.focused, FocusTarget::None);
    }

    #[test]
    fn layer_surfaces_can_take_keyboard_focus() {
        use crate::output::tests::bar;
        use crate::output::{Anchors, Layer};

        let (mut root, output) = root_with_output();
        let mut transport = RecordingTransport::default();
        let mut handler = RecordingHandler::default();
        let mut seat = Seat::new("default");

        let surface = SurfaceHandle(77);
        let mut panel = bar(
            Layer::Top,
            Anchors { top: true, left: true, right: true, ..Default::default() },
            (0, 30),
            30,
        );
        panel.keyboard_interactive = true;
        panel.surface = Some(surface);
        let panel_id = panel.id;
        root.output_mut(output).unwrap().add_layer_surface(panel);

        let _ = seat.focus_layer(&mut root, &mut handler, panel_id, &mut transport);
        assert_eq!(seat.focused, FocusTarget::Layer(panel_id));
        assert_eq!(handler.keyboard.last(), Some(&Some(surface)));
    }

    #[test]
    fn locked_mode_round_trip() {
        let mut seat = Seat::new("default");
        let custom = seat.declare_mode("passthrough-keys").unwrap();
        seat.enter_mode("passthrough-keys").unwrap();
        assert_eq!(seat.mode, custom);

        seat.enter_locked_mode();
        assert_eq!(seat.mode, MODE_LOCKED);
        assert!(seat.enter_mode("locked").is_err());
        seat.leave_locked_mode();
        assert_eq!(seat.mode, custom);
    }
}
