//! Per-window state.
//!
//! A view carries three geometry snapshots: `current` is what is on screen,
//! `pending` is what the compositor wants next, and `inflight` is what was
//! sent to the client with the most recent configure. The transaction
//! engine in [`crate::root`] moves data between them; everything here is
//! bookkeeping local to one view.

use tracing::warn;

use crate::geometry::Rect;
use crate::shell::Shell;
use crate::shell::SurfaceHandle;
use crate::stack::Tagged;
use crate::types::{ClientId, OutputId, Tags, ViewId};

/// Min/max size constraints reported by the shell. Zero means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeConstraints {
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for SizeConstraints {
    fn default() -> Self {
        Self { min_width: 1, min_height: 1, max_width: 0, max_height: 0 }
    }
}

impl SizeConstraints {
    /// Clamps a size into the constraint box.
    pub fn clamp(&self, width: u32, height: u32) -> (u32, u32) {
        let mut width = width.max(self.min_width);
        let mut height = height.max(self.min_height);
        if self.max_width > 0 {
            width = width.min(self.max_width.max(self.min_width));
        }
        if self.max_height > 0 {
            height = height.min(self.max_height.max(self.min_height));
        }
        (width, height)
    }
}

/// One geometry snapshot of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewState {
    pub rect: Rect,
    pub tags: Tags,
    pub floating: bool,
    pub fullscreen: bool,
    /// Number of seats focusing this view.
    pub focus: u32,
}

impl ViewState {
    pub fn new(rect: Rect, tags: Tags) -> Self {
        Self { rect, tags, floating: false, fullscreen: false, focus: 0 }
    }
}

/// Result of matching a configure acknowledgement against a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// The serial matched the outstanding configure.
    Accepted,
    /// No configure was outstanding, or the serial was superseded.
    Stale,
}

/// A managed client window.
pub struct View {
    pub id: ViewId,
    pub output: OutputId,
    pub client: ClientId,
    pub shell: Shell,
    /// Backing surface token, used by hit-testing and focus notifications.
    pub surface: Option<SurfaceHandle>,
    pub current: ViewState,
    pub pending: ViewState,
    pub inflight: ViewState,
    pub constraints: SizeConstraints,
    /// Remembered floating geometry.
    pub float_rect: Rect,
    /// Set iff a configure is outstanding in an ongoing transaction.
    pub pending_serial: Option<u32>,
}

impl Tagged for View {
    fn current_tags(&self) -> u32 {
        self.current.tags.get()
    }

    fn pending_tags(&self) -> u32 {
        self.pending.tags.get()
    }
}

impl View {
    pub fn new(
        id: ViewId,
        output: OutputId,
        client: ClientId,
        shell: Shell,
        surface: Option<SurfaceHandle>,
        tags: Tags,
    ) -> Self {
        let constraints = shell.constraints();
        let state = ViewState::new(Rect::default(), tags);
        Self {
            id,
            output,
            client,
            shell,
            surface,
            current: state,
            pending: state,
            inflight: state,
            constraints,
            float_rect: Rect::default(),
            pending_serial: None,
        }
    }

    /// Whether the client must be told about `pending` before it can be
    /// committed.
    ///
    /// Only the size counts: a client never learns its position, so pure
    /// moves commit without a round-trip.
    pub fn needs_configure(&self) -> bool {
        self.pending.rect.width != self.inflight.rect.width
            || self.pending.rect.height != self.inflight.rect.height
    }

    /// Instructs the client to take `pending.rect`.
    ///
    /// Returns immediately; the acknowledgement arrives later through
    /// [`View::ack_configure`].
    pub fn configure(&mut self) {
        self.inflight = self.pending;
        let serial = self.shell.configure(self.pending.rect);
        self.pending_serial = Some(serial);
    }

    /// Matches an acknowledgement against the outstanding configure.
    pub fn ack_configure(&mut self, serial: u32) -> Ack {
        match self.pending_serial {
            Some(expected) if expected == serial => {
                self.pending_serial = None;
                Ack::Accepted
            }
            Some(expected) => {
                warn!(view = %self.id, serial, expected, "ignoring stale configure ack");
                Ack::Stale
            }
            None => {
                warn!(view = %self.id, serial, "configure ack with none outstanding");
                Ack::Stale
            }
        }
    }

    /// Clamps `pending.rect` into the size constraints.
    pub fn apply_constraints(&mut self) {
        let (width, height) =
            self.constraints.clamp(self.pending.rect.width, self.pending.rect.height);
        self.pending.rect.width = width;
        self.pending.rect.height = height;
    }

    /// Copies the non-geometry pending fields into effect.
    ///
    /// Returns true if the change affects what the layout would produce, in
    /// which case the caller triggers an arrangement.
    pub fn apply_pending(&mut self) -> bool {
        let layout_changed = self.current.tags != self.pending.tags
            || self.current.floating != self.pending.floating
            || self.current.fullscreen != self.pending.fullscreen;
        self.current.tags = self.pending.tags;
        self.current.floating = self.pending.floating;
        self.current.fullscreen = self.pending.fullscreen;
        self.current.focus = self.pending.focus;
        layout_changed
    }

    pub fn close(&mut self) {
        self.shell.close();
    }

    pub fn set_activated(&mut self, activated: bool) {
        self.shell.set_activated(activated);
    }

    pub fn set_fullscreen(&mut self, fullscreen: bool) {
        self.shell.set_fullscreen(fullscreen);
    }

    /// Whether the view shows up under the given tag mask after the next
    /// commit.
    pub fn visible_on(&self, tags: u32) -> bool {
        self.pending.tags.intersects(tags)
    }
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("id", &self.id)
            .field("output", &self.output)
            .field("current", &self.current)
            .field("pending", &self.pending)
            .field("pending_serial", &self.pending_serial)
            .finish_non_exhaustive()
    }
}
