//! A trivial reference layout client.
//!
//! Implements the client side of the `layout_v2` handshake in-process: a
//! main area on the left with a vertical stack on the right. It exists to
//! exercise the protocol end to end and as the shipping example of a
//! conforming client; the compositor itself never computes positions.
//!
//! Tunables: `main_ratio` (fixed, clamped to [0.1, 0.9]), `main_count`
//! (int), `padding` (int, outer padding in pixels).

use crate::geometry::Rect;

use super::LayoutEvent;

/// Requests a layout client sends back to the compositor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutRequest {
    PushViewDimensions { serial: u32, x: i32, y: i32, width: u32, height: u32 },
    Commit { serial: u32 },
}

/// Client-side state of the reference layout.
#[derive(Debug)]
pub struct ReferenceLayout {
    pub main_ratio: f64,
    pub main_count: u32,
    pub padding: u32,
    demand: Option<(u32, u32, u32, u32)>,
}

impl Default for ReferenceLayout {
    fn default() -> Self {
        Self { main_ratio: 0.6, main_count: 1, padding: 0, demand: None }
    }
}

impl ReferenceLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one event; on `advertise_done` the placement requests for the
    /// demand are returned.
    pub fn handle_event(&mut self, event: &LayoutEvent) -> Vec<LayoutRequest> {
        match event {
            LayoutEvent::LayoutDemand { view_count, usable_width, usable_height, serial, .. } => {
                self.demand = Some((*serial, *view_count, *usable_width, *usable_height));
                Vec::new()
            }
            LayoutEvent::AdvertiseView { .. } => Vec::new(),
            LayoutEvent::AdvertiseDone { serial } => match self.demand.take() {
                Some((demanded, count, width, height)) if demanded == *serial => {
                    self.place(*serial, count, width, height)
                }
                _ => Vec::new(),
            },
            LayoutEvent::SetIntValue { name, value } => {
                self.set_int(name, *value);
                Vec::new()
            }
            LayoutEvent::ModIntValue { name, delta } => {
                match name.as_str() {
                    "main_count" => {
                        self.main_count = self.main_count.saturating_add_signed(*delta)
                    }
                    "padding" => self.padding = self.padding.saturating_add_signed(*delta),
                    _ => {}
                }
                Vec::new()
            }
            LayoutEvent::SetFixedValue { name, value } => {
                if name == "main_ratio" {
                    self.main_ratio = value.clamp(0.1, 0.9);
                }
                Vec::new()
            }
            LayoutEvent::ModFixedValue { name, delta } => {
                if name == "main_ratio" {
                    self.main_ratio = (self.main_ratio + delta).clamp(0.1, 0.9);
                }
                Vec::new()
            }
            LayoutEvent::SetStringValue { .. } | LayoutEvent::NamespaceInUse => Vec::new(),
        }
    }

    fn set_int(&mut self, name: &str, value: i32) {
        match name {
            "main_count" => self.main_count = value.max(0) as u32,
            "padding" => self.padding = value.max(0) as u32,
            _ => {}
        }
    }

    fn place(&self, serial: u32, count: u32, usable_width: u32, usable_height: u32) -> Vec<LayoutRequest> {
        let mut requests = Vec::with_capacity(count as usize + 1);
        for rect in self.geometries(count, usable_width, usable_height) {
            requests.push(LayoutRequest::PushViewDimensions {
                serial,
                x: rect.x,
                y: rect.y,
                width: rect.width,
                height: rect.height,
            });
        }
        requests.push(LayoutRequest::Commit { serial });
        requests
    }

    /// The placement itself, relative to the usable-area origin.
    pub fn geometries(&self, count: u32, usable_width: u32, usable_height: u32) -> Vec<Rect> {
        if count == 0 {
            return Vec::new();
        }

        let pad = self.padding.min(usable_width / 4).min(usable_height / 4);
        let area = Rect::new(
            pad as i32,
            pad as i32,
            usable_width.saturating_sub(2 * pad),
            usable_height.saturating_sub(2 * pad),
        );

        let main = self.main_count.min(count);
        let stacked = count - main;

        let main_width = if stacked == 0 {
            area.width
        } else if main == 0 {
            0
        } else {
            (area.width as f64 * self.main_ratio) as u32
        };

        let mut rects = Vec::with_capacity(count as usize);
        if main > 0 {
            let each = area.height / main;
            for i in 0..main {
                let y = area.y + (i * each) as i32;
                // The last one takes the rounding remainder.
                let height = if i == main - 1 { area.height - i * each } else { each };
                rects.push(Rect::new(area.x, y, main_width, height));
            }
        }
        if stacked > 0 {
            let x = area.x + main_width as i32;
            let width = area.width - main_width;
            let each = area.height / stacked;
            for i in 0..stacked {
                let y = area.y + (i * each) as i32;
                let height = if i == stacked - 1 { area.height - i * each } else { each };
                rects.push(Rect::new(x, y, width, height));
            }
        }
        rects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_view_takes_the_whole_area() {
        let layout = ReferenceLayout::new();
        assert_eq!(layout.geometries(1, 800, 600), vec![Rect::new(0, 0, 800, 600)]);
    }

    #[test]
    fn two_views_split_by_ratio() {
        let layout = ReferenceLayout { main_ratio: 0.5, ..Default::default() };
        assert_eq!(
            layout.geometries(2, 800, 600),
            vec![Rect::new(0, 0, 400, 600), Rect::new(400, 0, 400, 600)],
        );
    }

    #[test]
    fn stack_heights_cover_the_area() {
        let layout = ReferenceLayout { main_ratio: 0.6, ..Default::default() };
        let rects = layout.geometries(4, 1000, 700);
        assert_eq!(rects.len(), 4);
        assert_eq!(rects[0], Rect::new(0, 0, 600, 700));
        // Three stacked views cover the full height despite rounding.
        let covered: u32 = rects[1..].iter().map(|r| r.height).sum();
        assert_eq!(covered, 700);
        assert_eq!(rects[3].bottom(), 700);
    }

    #[test]
    fn demand_round_trip_produces_commit_last() {
        let mut layout = ReferenceLayout::new();
        assert!(layout
            .handle_event(&LayoutEvent::LayoutDemand {
                view_count: 2,
                usable_width: 800,
                usable_height: 600,
                tags: 1,
                serial: 9,
            })
            .is_empty());
        let requests = layout.handle_event(&LayoutEvent::AdvertiseDone { serial: 9 });
        assert_eq!(requests.len(), 3);
        assert_eq!(requests.last(), Some(&LayoutRequest::Commit { serial: 9 }));
    }

    #[test]
    fn tunables_apply() {
        let mut layout = ReferenceLayout::new();
        layout.handle_event(&LayoutEvent::SetFixedValue {
            name: "main_ratio".to_owned(),
            value: 2.0,
        });
        assert_eq!(layout.main_ratio, 0.9);
        layout.handle_event(&LayoutEvent::ModIntValue {
            name: "main_count".to_owned(),
            delta: 2,
        });
        assert_eq!(layout.main_count, 3);
    }
}
