//! Pointer state machine and hit-testing.
//!
//! The cursor is in one of three modes: `passthrough` steers events to the
//! surface under it, `move` and `resize` are interactive grabs on a view.
//! Grabs start on a modified button press and end when the last button is
//! released. The hit-testing order must stay consistent with the render
//! order so input lands on what the user sees.

use tracing::debug;

use crate::output::{Layer, Output};
use crate::protocols::layout::LayoutTransport;
use crate::root::{Root, TimerRequest};
use crate::shell::{SurfaceHandle, SurfaceHit};
use crate::types::{ClientId, LayerSurfaceId, ViewId};

use super::{CursorImage, Seat, SeatHandler};

/// The cursor's interaction mode. Grab payloads are only valid in their
/// mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorMode {
    #[default]
    Passthrough,
    Move {
        view: ViewId,
    },
    Resize {
        view: ViewId,
        /// Distance from the pointer to the view's right edge at grab time.
        offset_x: i32,
        /// Distance from the pointer to the view's bottom edge at grab time.
        offset_y: i32,
    },
}

/// Pointer buttons the core routes specially.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonState {
    Pressed,
    Released,
}

/// Per-seat pointer state.
#[derive(Debug, Default)]
pub struct Cursor {
    pub mode: CursorMode,
    /// Global position.
    pub x: f64,
    pub y: f64,
    /// Number of buttons currently held down.
    pub pressed_count: u32,
    /// Surface with pointer focus, independent from keyboard focus.
    pub pointer_focus: Option<SurfaceHandle>,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }
}

/// What hit-testing found under a point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HitTarget {
    View { view: ViewId, client: ClientId, hit: SurfaceHit },
    Layer { layer_surface: LayerSurfaceId, client: ClientId, hit: SurfaceHit },
}

impl HitTarget {
    pub fn hit(&self) -> SurfaceHit {
        match self {
            HitTarget::View { hit, .. } | HitTarget::Layer { hit, .. } => *hit,
        }
    }

    pub fn client(&self) -> ClientId {
        match self {
            HitTarget::View { client, .. } | HitTarget::Layer { client, .. } => *client,
        }
    }
}

/// Returns the topmost surface at an output-local point.
///
/// Order, topmost first: overlay (popups, then toplevels), popups of the
/// lower layers, top layer, views (focused first, then stack order over the
/// committed tags), bottom layer, background layer.
pub fn hit_test(output: &Output, x: f64, y: f64, focused: Option<ViewId>) -> Option<HitTarget> {
    let layer_at = |layer: Layer, popup: bool| -> Option<HitTarget> {
        output.layer_list(layer).iter().rev().find_map(|surface| {
            let hit = if popup {
                surface.handle.popup_at(x, y)
            } else {
                surface.handle.toplevel_at(x, y)
            }?;
            Some(HitTarget::Layer { layer_surface: surface.id, client: surface.client, hit })
        })
    };
    let layer_toplevel_at = |layer| layer_at(layer, false);
    let layer_popup_at = |layer| layer_at(layer, true);

    let view_at = |id: ViewId| -> Option<HitTarget> {
        let view = output.stack.get(id)?;
        let rect = view.current.rect;
        if !rect.contains(x, y) {
            return None;
        }
        let hit = view.shell.surface_at(x - rect.x as f64, y - rect.y as f64)?;
        Some(HitTarget::View { view: id, client: view.client, hit })
    };
    let views_at = || -> Option<HitTarget> {
        let tags = output.current.tags.get();
        if let Some(id) = focused {
            if let Some(target) = view_at(id) {
                return Some(target);
            }
        }
        output
            .stack
            .iter(tags)
            .filter(|&(id, _)| Some(id) != focused)
            .find_map(|(id, _)| view_at(id))
    };

    layer_popup_at(Layer::Overlay)
        .or_else(|| layer_toplevel_at(Layer::Overlay))
        .or_else(|| layer_popup_at(Layer::Top))
        .or_else(|| layer_popup_at(Layer::Bottom))
        .or_else(|| layer_popup_at(Layer::Background))
        .or_else(|| layer_toplevel_at(Layer::Top))
        .or_else(views_at)
        .or_else(|| layer_toplevel_at(Layer::Bottom))
        .or_else(|| layer_toplevel_at(Layer::Background))
}

/// The output containing a global point.
pub fn output_at(root: &Root, x: f64, y: f64) -> Option<&Output> {
    root.outputs.iter().find(|output| output.geometry.contains(x, y))
}

impl Seat {
    /// Handles relative pointer motion.
    pub fn pointer_motion(
        &mut self,
        root: &mut Root,
        handler: &mut dyn SeatHandler,
        dx: f64,
        dy: f64,
        exclusive: Option<ClientId>,
    ) {
        match self.cursor.mode {
            CursorMode::Passthrough => self.motion_passthrough(root, handler, dx, dy, exclusive),
            CursorMode::Move { view } => self.motion_move(root, view, dx, dy),
            CursorMode::Resize { view, offset_x, offset_y } => {
                self.motion_resize(root, handler, view, dx, dy, offset_x, offset_y);
            }
        }
    }

    /// Handles a button event, switching cursor modes as needed.
    pub fn pointer_button(
        &mut self,
        root: &mut Root,
        handler: &mut dyn SeatHandler,
        button: PointerButton,
        state: ButtonState,
        modifier_held: bool,
        exclusive: Option<ClientId>,
        transport: &mut dyn LayoutTransport,
    ) -> TimerRequest {
        match state {
            ButtonState::Pressed => {
                self.cursor.pressed_count += 1;
                if self.cursor.pressed_count != 1
                    || self.cursor.mode != CursorMode::Passthrough
                {
                    return TimerRequest::None;
                }

                let target = self.view_under_cursor(root, exclusive);
                if modifier_held {
                    let Some(view) = target else { return TimerRequest::None };
                    let fullscreen =
                        root.view(view).map_or(true, |view| view.current.fullscreen);
                    if fullscreen {
                        return TimerRequest::None;
                    }
                    match button {
                        PointerButton::Left => self.begin_move(root, handler, view, transport),
                        PointerButton::Right => {
                            self.begin_resize(root, handler, view, transport)
                        }
                        PointerButton::Middle => {
                            if let Some(view) = root.view_mut(view) {
                                view.close();
                            }
                            TimerRequest::None
                        }
                    }
                } else if let Some(view) = target {
                    self.focus(root, handler, Some(view), exclusive, transport)
                } else {
                    TimerRequest::None
                }
            }
            ButtonState::Released => {
                self.cursor.pressed_count = self.cursor.pressed_count.saturating_sub(1);
                if self.cursor.pressed_count == 0 && self.cursor.mode != CursorMode::Passthrough
                {
                    debug!("leaving cursor grab");
                    self.cursor.mode = CursorMode::Passthrough;
                    handler.set_cursor_image(CursorImage::Default);
                    self.rehome_pointer(root, handler, exclusive);
                }
                TimerRequest::None
            }
        }
    }

    /// Re-runs hit-testing at the current cursor position, updating
    /// pointer focus.
    pub fn rehome_pointer(
        &mut self,
        root: &mut Root,
        handler: &mut dyn SeatHandler,
        exclusive: Option<ClientId>,
    ) {
        let (x, y) = (self.cursor.x, self.cursor.y);
        let target = output_at(root, x, y).and_then(|output| {
            let local_x = x - output.geometry.x as f64;
            let local_y = y - output.geometry.y as f64;
            hit_test(output, local_x, local_y, self.focused_view())
        });

        match target {
            Some(target) if Self::client_allowed(target.client(), exclusive) => {
                let hit = target.hit();
                if self.cursor.pointer_focus != Some(hit.surface) {
                    self.cursor.pointer_focus = Some(hit.surface);
                    handler.pointer_enter(hit.surface, hit.x, hit.y);
                } else {
                    handler.pointer_motion(hit.x, hit.y);
                }
            }
            _ => {
                // Nothing under the cursor, or input is disallowed.
                if self.cursor.pointer_focus.take().is_some() {
                    handler.pointer_leave();
                }
                handler.set_cursor_image(CursorImage::Default);
            }
        }
    }

    fn client_allowed(client: ClientId, exclusive: Option<ClientId>) -> bool {
        exclusive.map_or(true, |allowed| client == allowed)
    }

    fn view_under_cursor(&self, root: &Root, exclusive: Option<ClientId>) -> Option<ViewId> {
        let output = output_at(root, self.cursor.x, self.cursor.y)?;
        let local_x = self.cursor.x - output.geometry.x as f64;
        let local_y = self.cursor.y - output.geometry.y as f64;
        match hit_test(output, local_x, local_y, self.focused_view())? {
            HitTarget::View { view, client, .. } if Self::client_allowed(client, exclusive) => {
                Some(view)
            }
            _ => None,
        }
    }

    fn motion_passthrough(
        &mut self,
        root: &mut Root,
        handler: &mut dyn SeatHandler,
        dx: f64,
        dy: f64,
        exclusive: Option<ClientId>,
    ) {
        if root.outputs.is_empty() {
            return;
        }
        let mut x = self.cursor.x + dx;
        let mut y = self.cursor.y + dy;

        if output_at(root, x, y).is_none() {
            // Clip against the output the cursor is leaving (or the first
            // one if it was nowhere).
            let geometry = output_at(root, self.cursor.x, self.cursor.y)
                .unwrap_or(&root.outputs[0])
                .geometry;
            x = x.clamp(geometry.x as f64, (geometry.right() - 1) as f64);
            y = y.clamp(geometry.y as f64, (geometry.bottom() - 1) as f64);
        }

        self.cursor.x = x;
        self.cursor.y = y;
        self.rehome_pointer(root, handler, exclusive);
    }

    /// The grabbed view and the cursor translate together, clamped so the
    /// view (plus border) stays inside the output. No configure is needed:
    /// the size does not change.
    fn motion_move(&mut self, root: &mut Root, view_id: ViewId, dx: f64, dy: f64) {
        let border = root.settings.border_width;
        let Some(output_id) = root.output_of_view(view_id) else { return };
        let usable = root.output(output_id).unwrap().usable;

        let Some(view) = root.view_mut(view_id) else { return };
        let rect = view.pending.rect;
        let (x, y) = usable.clamp_position(
            rect.x + dx.round() as i32,
            rect.y + dy.round() as i32,
            rect.width,
            rect.height,
            border,
        );
        let applied_dx = x - rect.x;
        let applied_dy = y - rect.y;

        view.pending.rect.x = x;
        view.pending.rect.y = y;
        view.current.rect.x = x;
        view.current.rect.y = y;
        view.float_rect.x = x;
        view.float_rect.y = y;

        self.cursor.x += applied_dx as f64;
        self.cursor.y += applied_dy as f64;
        root.output_mut(output_id).unwrap().needs_repaint = true;
    }

    /// Resizes the grabbed view by the pointer delta, clamped by the size
    /// constraints and the output edges, then warps the cursor so the
    /// grabbed corner offset is preserved.
    fn motion_resize(
        &mut self,
        root: &mut Root,
        handler: &mut dyn SeatHandler,
        view_id: ViewId,
        dx: f64,
        dy: f64,
        offset_x: i32,
        offset_y: i32,
    ) {
        let border = root.settings.border_width as i32;
        let Some(output_id) = root.output_of_view(view_id) else { return };
        let output = root.output(output_id).unwrap();
        let usable = output.usable;
        let output_pos = (output.geometry.x, output.geometry.y);

        let Some(view) = root.view_mut(view_id) else { return };
        let rect = view.pending.rect;
        let width = (rect.width as i64 + dx.round() as i64).max(1) as u32;
        let height = (rect.height as i64 + dy.round() as i64).max(1) as u32;

        view.pending.rect.width = width;
        view.pending.rect.height = height;
        view.apply_constraints();
        // Keep the far edge inside the output.
        let max_width = (usable.right() - border - rect.x).max(1) as u32;
        let max_height = (usable.bottom() - border - rect.y).max(1) as u32;
        view.pending.rect.width = view.pending.rect.width.min(max_width);
        view.pending.rect.height = view.pending.rect.height.min(max_height);

        view.float_rect.width = view.pending.rect.width;
        view.float_rect.height = view.pending.rect.height;

        if view.needs_configure() {
            view.configure();
        }

        let rect = view.pending.rect;
        self.cursor.x = (output_pos.0 + rect.right() - offset_x) as f64;
        self.cursor.y = (output_pos.1 + rect.bottom() - offset_y) as f64;
        handler.warp_pointer(self.cursor.x, self.cursor.y);
    }

    fn begin_move(
        &mut self,
        root: &mut Root,
        handler: &mut dyn SeatHandler,
        view_id: ViewId,
        transport: &mut dyn LayoutTransport,
    ) -> TimerRequest {
        debug!(view = %view_id, "starting move grab");
        let Some(view) = root.view_mut(view_id) else { return TimerRequest::None };
        view.pending.floating = true;
        view.float_rect = view.current.rect;
        self.cursor.mode = CursorMode::Move { view: view_id };
        self.grab_pointer(handler, CursorImage::Move);
        root.request_arrange(transport)
    }

    fn begin_resize(
        &mut self,
        root: &mut Root,
        handler: &mut dyn SeatHandler,
        view_id: ViewId,
        transport: &mut dyn LayoutTransport,
    ) -> TimerRequest {
        debug!(view = %view_id, "starting resize grab");
        let Some(output_id) = root.output_of_view(view_id) else { return TimerRequest::None };
        let output_pos = {
            let geometry = root.output(output_id).unwrap().geometry;
            (geometry.x, geometry.y)
        };
        let Some(view) = root.view_mut(view_id) else { return TimerRequest::None };
        view.pending.floating = true;
        view.float_rect = view.current.rect;

        let rect = view.current.rect;
        let local_x = (self.cursor.x - output_pos.0 as f64).round() as i32;
        let local_y = (self.cursor.y - output_pos.1 as f64).round() as i32;
        self.cursor.mode = CursorMode::Resize {
            view: view_id,
            offset_x: rect.right() - local_x,
            offset_y: rect.bottom() - local_y,
        };
        self.grab_pointer(handler, CursorImage::Resize);
        root.request_arrange(transport)
    }

    /// A grab takes the pointer away from the client.
    fn grab_pointer(&mut self, handler: &mut dyn SeatHandler, image: CursorImage) {
        if self.cursor.pointer_focus.take().is_some() {
            handler.pointer_leave();
        }
        handler.set_cursor_image(image);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use crate::output::tests::bar;
    use crate::output::{Anchors, LayerShellHandle};
    use crate::protocols::layout::tests::RecordingTransport;
    use crate::seat::tests::{map, root_with_output, settle, RecordingHandler};

    struct RegionLayerHandle {
        region: Rect,
        surface: SurfaceHandle,
        popup: Option<(Rect, SurfaceHandle)>,
    }

    impl LayerShellHandle for RegionLayerHandle {
        fn configure(&mut self, _width: u32, _height: u32) {}
        fn close(&mut self) {}

        fn toplevel_at(&self, x: f64, y: f64) -> Option<SurfaceHit> {
            self.region.contains(x, y).then(|| SurfaceHit {
                surface: self.surface,
                x: x - self.region.x as f64,
                y: y - self.region.y as f64,
            })
        }

        fn popup_at(&self, x: f64, y: f64) -> Option<SurfaceHit> {
            let (region, surface) = self.popup?;
            region.contains(x, y).then(|| SurfaceHit {
                surface,
                x: x - region.x as f64,
                y: y - region.y as f64,
            })
        }
    }

    fn place(root: &mut Root, view: ViewId, rect: Rect) {
        let v = root.view_mut(view).unwrap();
        v.pending.rect = rect;
        v.current.rect = rect;
        v.inflight.rect = rect;
    }

    #[test]
    fn move_grab_floats_and_clamps() {
        let (mut root, output) = root_with_output();
        let mut transport = RecordingTransport::default();
        let mut handler = RecordingHandler::default();
        let mut seat = crate::seat::Seat::new("default");

        let view = map(&mut root, output, &mut transport);
        place(&mut root, view, Rect::new(0, 0, 400, 600));

        seat.cursor.x = 200.0;
        seat.cursor.y = 300.0;
        let _ = seat.pointer_button(
            &mut root,
            &mut handler,
            PointerButton::Left,
            ButtonState::Pressed,
            true,
            None,
            &mut transport,
        );
        assert_eq!(seat.cursor.mode, CursorMode::Move { view });
        settle(&mut root, &mut transport);
        assert!(root.view(view).unwrap().current.floating);

        seat.pointer_motion(&mut root, &mut handler, 100.0, 50.0, None);
        assert_eq!(root.view(view).unwrap().current.rect, Rect::new(100, 2, 400, 600));
        // No configure was needed: the size did not change.
        assert_eq!(root.view(view).unwrap().pending_serial, None);

        let _ = seat.pointer_button(
            &mut root,
            &mut handler,
            PointerButton::Left,
            ButtonState::Released,
            false,
            None,
            &mut transport,
        );
        assert_eq!(seat.cursor.mode, CursorMode::Passthrough);
    }

    #[test]
    fn resize_grab_respects_constraints_and_warps() {
        let (mut root, output) = root_with_output();
        let mut transport = RecordingTransport::default();
        let mut handler = RecordingHandler::default();
        let mut seat = crate::seat::Seat::new("default");

        let view = map(&mut root, output, &mut transport);
        place(&mut root, view, Rect::new(100, 100, 300, 200));
        root.view_mut(view).unwrap().constraints.min_width = 200;

        // Grab one pixel inside the bottom-right corner.
        seat.cursor.x = 399.0;
        seat.cursor.y = 299.0;
        let _ = seat.pointer_button(
            &mut root,
            &mut handler,
            PointerButton::Right,
            ButtonState::Pressed,
            true,
            None,
            &mut transport,
        );
        assert_eq!(
            seat.cursor.mode,
            CursorMode::Resize { view, offset_x: 1, offset_y: 1 },
        );
        settle(&mut root, &mut transport);

        // Shrink far below the minimum width.
        seat.pointer_motion(&mut root, &mut handler, -500.0, 10.0, None);
        let rect = root.view(view).unwrap().pending.rect;
        assert_eq!(rect.width, 200);
        assert_eq!(rect.height, 210);
        // A configure went out for the new size.
        assert!(root.view(view).unwrap().pending_serial.is_some());
        // The cursor warped to keep the grabbed corner offset.
        assert_eq!(handler.warps.last(), Some(&(299.0, 309.0)));
    }

    #[test]
    fn fullscreen_views_cannot_be_grabbed() {
        let (mut root, output) = root_with_output();
        let mut transport = RecordingTransport::default();
        let mut handler = RecordingHandler::default();
        let mut seat = crate::seat::Seat::new("default");

        let view = map(&mut root, output, &mut transport);
        place(&mut root, view, Rect::new(0, 0, 800, 600));
        root.view_mut(view).unwrap().current.fullscreen = true;

        seat.cursor.x = 400.0;
        seat.cursor.y = 300.0;
        let _ = seat.pointer_button(
            &mut root,
            &mut handler,
            PointerButton::Left,
            ButtonState::Pressed,
            true,
            None,
            &mut transport,
        );
        assert_eq!(seat.cursor.mode, CursorMode::Passthrough);
    }

    #[test]
    fn hit_test_prefers_layers_in_order() {
        let (mut root, output_id) = root_with_output();
        let mut transport = RecordingTransport::default();

        let view = map(&mut root, output_id, &mut transport);
        place(&mut root, view, Rect::new(0, 0, 800, 600));
        // Top bar covering the top 30 rows.
        let top_surface = SurfaceHandle(902);
        let mut top = bar(
            Layer::Top,
            Anchors { top: true, left: true, right: true, ..Default::default() },
            (0, 30),
            0,
        );
        top.handle = Box::new(RegionLayerHandle {
            region: Rect::new(0, 0, 800, 30),
            surface: top_surface,
            popup: None,
        });
        // Background surface covering everything, with a popup region.
        let background_surface = SurfaceHandle(903);
        let popup_surface = SurfaceHandle(904);
        let mut background = bar(Layer::Background, Anchors::default(), (0, 0), 0);
        background.handle = Box::new(RegionLayerHandle {
            region: Rect::new(0, 0, 800, 600),
            surface: background_surface,
            popup: Some((Rect::new(500, 500, 100, 50), popup_surface)),
        });
        {
            let output = root.output_mut(output_id).unwrap();
            output.add_layer_surface(top);
            output.add_layer_surface(background);
        }

        let output = root.output(output_id).unwrap();
        // Point in the top bar: the bar wins over the view.
        let target = hit_test(output, 10.0, 10.0, None).unwrap();
        assert_eq!(target.hit().surface, top_surface);
        // Point in the background popup region: the popup outranks views.
        let target = hit_test(output, 510.0, 510.0, None).unwrap();
        assert_eq!(target.hit().surface, popup_surface);
        // Elsewhere the view wins over the background toplevel.
        let target = hit_test(output, 400.0, 300.0, None).unwrap();
        assert!(matches!(target, HitTarget::View { view: v, .. } if v == view));
    }

    #[test]
    fn focused_view_wins_hit_test_ties() {
        let (mut root, output_id) = root_with_output();
        let mut transport = RecordingTransport::default();

        let a = map(&mut root, output_id, &mut transport);
        let b = map(&mut root, output_id, &mut transport);
        // Both cover the same area; `b` is later in stack order... unless
        // it has focus.
        place(&mut root, a, Rect::new(0, 0, 400, 400));
        place(&mut root, b, Rect::new(0, 0, 400, 400));

        let output = root.output(output_id).unwrap();
        // New views attach at the top, so `b` leads the stack.
        assert_eq!(output.stack.first(), Some(b));
        let first = hit_test(output, 100.0, 100.0, None).unwrap();
        assert!(matches!(first, HitTarget::View { view, .. } if view == b));

        let focused = hit_test(output, 100.0, 100.0, Some(a)).unwrap();
        assert!(matches!(focused, HitTarget::View { view, .. } if view == a));
    }
}
