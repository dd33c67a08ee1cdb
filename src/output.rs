//! Per-display state.
//!
//! An output owns its views (in a [`ViewStack`]) and the four layer-shell
//! lists. The output's position lives in `geometry` (global coordinates);
//! everything else on the output (usable area, view rectangles, layer
//! geometry, hit-testing) is in output-local coordinates.

use tracing::debug;

use crate::geometry::Rect;
use crate::protocols::layout::LayoutDemand;
use crate::shell::{SurfaceHandle, SurfaceHit};
use crate::stack::ViewStack;
use crate::types::{ClientId, LayerSurfaceId, OutputId, Tags, ViewId};
use crate::view::View;

/// The four layer-shell layers, bottom to top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Layer {
    Background = 0,
    Bottom = 1,
    Top = 2,
    Overlay = 3,
}

impl Layer {
    /// Scan order for exclusive-zone accounting: most restrictive first.
    pub const ARRANGE_ORDER: [Layer; 4] =
        [Layer::Overlay, Layer::Top, Layer::Bottom, Layer::Background];
}

/// Which output edges a layer surface is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Anchors {
    pub top: bool,
    pub bottom: bool,
    pub left: bool,
    pub right: bool,
}

impl Anchors {
    /// The single edge an exclusive zone applies to, if the anchors pick
    /// one out.
    fn exclusive_edge(&self) -> Option<Edge> {
        if self.top && !self.bottom {
            Some(Edge::Top)
        } else if self.bottom && !self.top {
            Some(Edge::Bottom)
        } else if self.left && !self.right {
            Some(Edge::Left)
        } else if self.right && !self.left {
            Some(Edge::Right)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Top,
    Bottom,
    Left,
    Right,
}

/// Backend half of a layer-shell surface.
pub trait LayerShellHandle {
    fn configure(&mut self, width: u32, height: u32);
    fn close(&mut self);
    /// Toplevel surface under an output-local point.
    fn toplevel_at(&self, x: f64, y: f64) -> Option<SurfaceHit>;
    /// Popup surface under an output-local point.
    fn popup_at(&self, x: f64, y: f64) -> Option<SurfaceHit>;
}

/// A layer-shell surface attached to one output.
pub struct LayerSurface {
    pub id: LayerSurfaceId,
    pub client: ClientId,
    pub layer: Layer,
    pub anchors: Anchors,
    /// Requested size; zero on an axis means "stretch between anchors".
    pub desired: (u32, u32),
    pub exclusive_zone: i32,
    pub keyboard_interactive: bool,
    /// Backing surface token, used for keyboard focus.
    pub surface: Option<SurfaceHandle>,
    /// Output-local geometry computed by the last `arrange_layers`.
    pub geometry: Rect,
    pub handle: Box<dyn LayerShellHandle>,
}

impl std::fmt::Debug for LayerSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerSurface")
            .field("id", &self.id)
            .field("layer", &self.layer)
            .field("geometry", &self.geometry)
            .field("exclusive_zone", &self.exclusive_zone)
            .finish_non_exhaustive()
    }
}

/// Tag and layout state of an output; committed and pending copies exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputState {
    pub tags: Tags,
    /// Layout namespace bound to this output; `None` falls back to the
    /// default namespace.
    pub layout: Option<String>,
}

/// One physical display.
pub struct Output {
    pub id: OutputId,
    pub name: String,
    /// Position and size in the global layout space.
    pub geometry: Rect,
    /// Output-local rectangle left after exclusive zones.
    pub usable: Rect,
    pub stack: ViewStack<View>,
    layers: [Vec<LayerSurface>; 4],
    pub current: OutputState,
    pub pending: OutputState,
    /// Tags focused before the last tag change, for `focus-previous-tags`.
    pub previous_tags: Tags,
    /// Mask applied to the focused tags when a new view spawns.
    pub spawn_tagmask: u32,
    /// Live layout demand, if a proposal is outstanding.
    pub layout_demand: Option<LayoutDemand>,
    /// Serial of the most recently applied demand, for `already_committed`
    /// detection.
    pub completed_demand_serial: Option<u32>,
    pub needs_repaint: bool,
}

impl Output {
    pub fn new(id: OutputId, name: String, geometry: Rect) -> Self {
        let state = OutputState { tags: Tags::ONE, layout: None };
        Self {
            id,
            name,
            geometry,
            usable: Rect::from_size(geometry.width, geometry.height),
            stack: ViewStack::new(),
            layers: [Vec::new(), Vec::new(), Vec::new(), Vec::new()],
            current: state.clone(),
            pending: state,
            previous_tags: Tags::ONE,
            spawn_tagmask: Tags::ALL.get(),
            layout_demand: None,
            completed_demand_serial: None,
            needs_repaint: false,
        }
    }

    /// The full output rectangle in output-local coordinates.
    pub fn local_rect(&self) -> Rect {
        Rect::from_size(self.geometry.width, self.geometry.height)
    }

    pub fn layer_list(&self, layer: Layer) -> &[LayerSurface] {
        &self.layers[layer as usize]
    }

    pub fn add_layer_surface(&mut self, surface: LayerSurface) {
        self.layers[surface.layer as usize].push(surface);
    }

    pub fn remove_layer_surface(&mut self, id: LayerSurfaceId) -> Option<LayerSurface> {
        for list in &mut self.layers {
            if let Some(pos) = list.iter().position(|s| s.id == id) {
                return Some(list.remove(pos));
            }
        }
        None
    }

    pub fn layer_surface(&self, id: LayerSurfaceId) -> Option<&LayerSurface> {
        self.layers.iter().flatten().find(|s| s.id == id)
    }

    /// Recomputes layer geometry and the usable area from exclusive zones,
    /// sending configures to surfaces whose size changed.
    ///
    /// Returns true if the usable area changed, in which case the caller
    /// re-arranges the views.
    pub fn arrange_layers(&mut self) -> bool {
        let mut usable = self.local_rect();

        for layer in Layer::ARRANGE_ORDER {
            for surface in &mut self.layers[layer as usize] {
                let geometry = place_layer_surface(surface, usable);
                if geometry.width != surface.geometry.width
                    || geometry.height != surface.geometry.height
                {
                    surface.handle.configure(geometry.width, geometry.height);
                }
                surface.geometry = geometry;

                if surface.exclusive_zone > 0 {
                    if let Some(edge) = surface.anchors.exclusive_edge() {
                        shrink_usable(&mut usable, edge, surface.exclusive_zone as u32);
                    }
                }
            }
        }

        let changed = usable != self.usable;
        self.usable = usable;
        changed
    }

    /// Computes pending geometry for every view visible on the pending
    /// tags. Fullscreen and floating views are placed directly; the ids of
    /// the remaining tiled views are returned in iteration order for the
    /// layout client.
    pub fn arrange_views(&mut self) -> Vec<ViewId> {
        let tags = self.pending.tags.get();
        let full = self.local_rect();
        let ids: Vec<ViewId> = self.stack.iter_pending(tags).map(|(id, _)| id).collect();

        let mut tiled = Vec::new();
        for id in ids {
            let view = self.stack.get_mut(id).unwrap();
            if view.pending.fullscreen {
                view.pending.rect = full;
            } else if view.pending.floating {
                view.pending.rect = view.float_rect;
            } else {
                tiled.push(id);
            }
        }

        if tiled.is_empty() {
            self.layout_demand = None;
        }
        tiled
    }

    /// Applies a committed layout proposal to the demanded views.
    ///
    /// The caller has already verified the cardinality. Geometry arrives
    /// relative to the usable-area origin.
    pub fn apply_layout(&mut self, demand: LayoutDemand) {
        debug_assert_eq!(demand.views.len(), demand.pushed.len());
        let origin = (demand.usable.x, demand.usable.y);
        for (id, rect) in demand.views.iter().zip(&demand.pushed) {
            // The view may have unmapped while the demand was live.
            let Some(view) = self.stack.get_mut(*id) else {
                debug!(view = %id, "layout proposal for unmapped view");
                continue;
            };
            view.pending.rect = rect.translated(origin.0, origin.1);
            view.apply_constraints();
        }
        self.completed_demand_serial = Some(demand.serial);
    }

    /// The tag mask new views spawn with.
    pub fn spawn_tags(&self) -> Tags {
        self.pending
            .tags
            .masked(self.spawn_tagmask)
            .unwrap_or(self.pending.tags)
    }

    /// Switches the focused tags, remembering the previous set.
    pub fn set_tags(&mut self, tags: Tags) {
        if tags != self.pending.tags {
            self.previous_tags = self.pending.tags;
            self.pending.tags = tags;
        }
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("geometry", &self.geometry)
            .field("usable", &self.usable)
            .field("views", &self.stack.len())
            .finish_non_exhaustive()
    }
}

/// Positions a layer surface inside the area it arranges against.
fn place_layer_surface(surface: &LayerSurface, area: Rect) -> Rect {
    let anchors = surface.anchors;
    let (desired_w, desired_h) = surface.desired;

    // Zero on an axis means "stretch across the area".
    let width = if desired_w > 0 { desired_w } else { area.width };
    let height = if desired_h > 0 { desired_h } else { area.height };

    let x = if anchors.left {
        area.x
    } else if anchors.right {
        area.right() - width as i32
    } else {
        area.x + (area.width as i32 - width as i32) / 2
    };
    let y = if anchors.top {
        area.y
    } else if anchors.bottom {
        area.bottom() - height as i32
    } else {
        area.y + (area.height as i32 - height as i32) / 2
    };

    Rect::new(x, y, width, height)
}

fn shrink_usable(usable: &mut Rect, edge: Edge, zone: u32) {
    let zone = zone.min(match edge {
        Edge::Top | Edge::Bottom => usable.height,
        Edge::Left | Edge::Right => usable.width,
    });
    match edge {
        Edge::Top => {
            usable.y += zone as i32;
            usable.height -= zone;
        }
        Edge::Bottom => {
            usable.height -= zone;
        }
        Edge::Left => {
            usable.x += zone as i32;
            usable.width -= zone;
        }
        Edge::Right => {
            usable.width -= zone;
        }
    }
}
