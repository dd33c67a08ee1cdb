//! The `layout_v2` protocol.
//!
//! The compositor never computes tiled geometry itself: it asks an external
//! layout client to place `N` views inside a rectangle and commits or
//! discards the proposal. This module holds the compositor-side state: the
//! namespace registry, live demands, serial matching, and per-object
//! tunable values. Event delivery and client disconnection go through
//! [`LayoutTransport`], implemented by the wayland backend (and by a
//! recording transport in tests).
//!
//! Serial rules: a demand is *live* from issuance until commit or
//! supersession. Requests carrying a superseded serial are ignored without
//! error; a second commit of an already-applied serial and a commit with
//! the wrong number of dimensions are protocol errors.

use std::collections::HashMap;

use tracing::{debug, warn};

use firth_ipc::LayoutValue;

use crate::geometry::Rect;
use crate::output::Output;
use crate::types::{ClientId, LayoutId, OutputId, ViewId};

pub mod reference;

/// A per-output, short-lived record of one geometry request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutDemand {
    /// The layout object the demand was sent to.
    pub layout: LayoutId,
    pub serial: u32,
    pub view_count: u32,
    /// Usable area the geometry is relative to.
    pub usable: Rect,
    pub tags: u32,
    /// Demanded views in advertisement order.
    pub views: Vec<ViewId>,
    /// Dimensions pushed so far, in push order.
    pub pushed: Vec<Rect>,
}

/// Wire-visible events sent to a layout client.
#[derive(Debug, Clone, PartialEq)]
pub enum LayoutEvent {
    /// The requested namespace is taken; the object is now inert.
    NamespaceInUse,
    LayoutDemand {
        view_count: u32,
        usable_width: u32,
        usable_height: u32,
        tags: u32,
        serial: u32,
    },
    AdvertiseView {
        tags: u32,
        app_id: Option<String>,
        serial: u32,
    },
    AdvertiseDone {
        serial: u32,
    },
    SetIntValue { name: String, value: i32 },
    ModIntValue { name: String, delta: i32 },
    SetFixedValue { name: String, value: f64 },
    ModFixedValue { name: String, delta: f64 },
    SetStringValue { name: String, value: String },
}

/// Wire error codes. Raising one disconnects the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutErrorCode {
    CountMismatch = 0,
    AlreadyCommitted = 1,
}

/// Delivery of events and protocol errors to layout clients.
pub trait LayoutTransport {
    fn event(&mut self, layout: LayoutId, event: LayoutEvent);
    /// Posts a protocol error, disconnecting the owning client.
    fn error(&mut self, layout: LayoutId, code: LayoutErrorCode, message: &str);
}

/// One layout object bound by a client via `get_layout`.
#[derive(Debug)]
pub struct LayoutBinding {
    pub id: LayoutId,
    pub client: ClientId,
    pub output: OutputId,
    pub namespace: String,
    pub values: HashMap<String, LayoutValue>,
    /// Set after `namespace_in_use`: every request except destroy is
    /// ignored.
    pub inert: bool,
}

/// Outcome of a `commit` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The live demand was consumed and applied to the output's pending
    /// state.
    Applied,
    /// The live demand was consumed and discarded with a protocol error;
    /// the previous geometry stays.
    Rejected,
    /// No live demand was touched. A protocol error may still have been
    /// raised (double commit).
    Ignored,
}

/// The process-wide layout registry, keyed by `(output, namespace)`.
#[derive(Default)]
pub struct LayoutRegistry {
    bindings: HashMap<LayoutId, LayoutBinding>,
    demand_serial: u32,
}

impl LayoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn binding(&self, id: LayoutId) -> Option<&LayoutBinding> {
        self.bindings.get(&id)
    }

    /// Handles `get_layout(output, namespace)`.
    ///
    /// The namespace is refused if `(output, namespace)` is already bound,
    /// or if another client uses the same namespace on any output. A
    /// refused object exists but is inert.
    pub fn get_layout(
        &mut self,
        client: ClientId,
        output: OutputId,
        namespace: &str,
        transport: &mut dyn LayoutTransport,
    ) -> LayoutId {
        let id = LayoutId::next();
        let taken = self.bindings.values().any(|binding| {
            !binding.inert
                && binding.namespace == namespace
                && (binding.output == output || binding.client != client)
        });

        if taken {
            warn!(namespace, %output, "layout namespace already in use");
            transport.event(id, LayoutEvent::NamespaceInUse);
        }
        self.bindings.insert(
            id,
            LayoutBinding {
                id,
                client,
                output,
                namespace: namespace.to_owned(),
                values: HashMap::new(),
                inert: taken,
            },
        );
        id
    }

    /// Destroys a layout object. Always honored, inert or not.
    pub fn destroy(&mut self, id: LayoutId) {
        self.bindings.remove(&id);
    }

    /// Drops every binding owned by a disconnected client.
    pub fn remove_client(&mut self, client: ClientId) {
        self.bindings.retain(|_, binding| binding.client != client);
    }

    /// The active layout object for an output, resolving its namespace
    /// against the per-output override and the compositor default.
    pub fn layout_for_output(&self, output: &Output, default_namespace: &str) -> Option<LayoutId> {
        let namespace = output.pending.layout.as_deref().unwrap_or(default_namespace);
        self.get_layout_by_name(output.id, namespace)
    }

    /// The registered layout for this output with the given namespace.
    pub fn get_layout_by_name(&self, output: OutputId, namespace: &str) -> Option<LayoutId> {
        self.bindings
            .values()
            .find(|binding| {
                !binding.inert && binding.output == output && binding.namespace == namespace
            })
            .map(|binding| binding.id)
    }

    /// Issues a new demand for the given tiled views, superseding any live
    /// one, and advertises it to the bound client.
    pub fn send_demand(
        &mut self,
        layout: LayoutId,
        output: &mut Output,
        views: Vec<ViewId>,
        transport: &mut dyn LayoutTransport,
    ) {
        self.demand_serial = self.demand_serial.wrapping_add(1);
        let serial = self.demand_serial;
        let tags = output.pending.tags.get();
        let usable = output.usable;

        let descriptors: Vec<(u32, Option<String>)> = views
            .iter()
            .map(|&id| {
                let view = output.stack.get(id).unwrap();
                (view.pending.tags.get(), view.shell.app_id())
            })
            .collect();

        output.layout_demand = Some(LayoutDemand {
            layout,
            serial,
            view_count: views.len() as u32,
            usable,
            tags,
            views,
            pushed: Vec::new(),
        });

        transport.event(
            layout,
            LayoutEvent::LayoutDemand {
                view_count: descriptors.len() as u32,
                usable_width: usable.width,
                usable_height: usable.height,
                tags,
                serial,
            },
        );
        for (view_tags, app_id) in descriptors {
            transport.event(layout, LayoutEvent::AdvertiseView { tags: view_tags, app_id, serial });
        }
        transport.event(layout, LayoutEvent::AdvertiseDone { serial });
    }

    /// Handles `push_view_dimensions`. Coordinates are relative to the
    /// usable-area origin.
    pub fn push_view_dimensions(
        &mut self,
        layout: LayoutId,
        output: &mut Output,
        serial: u32,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) {
        if self.bindings.get(&layout).map_or(true, |b| b.inert) {
            return;
        }
        match &mut output.layout_demand {
            Some(demand) if demand.serial == serial => {
                demand.pushed.push(Rect::new(x, y, width, height));
            }
            _ => {
                debug!(serial, "ignoring dimensions for superseded layout demand");
            }
        }
    }

    /// Handles `commit`.
    pub fn commit(
        &mut self,
        layout: LayoutId,
        output: &mut Output,
        serial: u32,
        transport: &mut dyn LayoutTransport,
    ) -> CommitOutcome {
        let Some(binding) = self.bindings.get(&layout) else {
            return CommitOutcome::Ignored;
        };
        if binding.inert {
            return CommitOutcome::Ignored;
        }

        match output.layout_demand.take() {
            Some(demand) if demand.serial == serial => {
                if demand.pushed.len() as u32 != demand.view_count {
                    transport.error(
                        layout,
                        LayoutErrorCode::CountMismatch,
                        &format!(
                            "layout committed {} dimensions for {} views",
                            demand.pushed.len(),
                            demand.view_count,
                        ),
                    );
                    let client = binding.client;
                    self.remove_client(client);
                    return CommitOutcome::Rejected;
                }
                output.apply_layout(demand);
                CommitOutcome::Applied
            }
            other => {
                // Not the live serial: put a still-live demand back.
                output.layout_demand = other;
                if output.completed_demand_serial == Some(serial) {
                    transport.error(
                        layout,
                        LayoutErrorCode::AlreadyCommitted,
                        &format!("layout demand {serial} was already committed"),
                    );
                    let client = binding.client;
                    self.remove_client(client);
                } else {
                    debug!(serial, "ignoring commit for superseded layout demand");
                }
                CommitOutcome::Ignored
            }
        }
    }

    /// Sets a tunable value on a layout object and forwards it to the
    /// client. Returns the output to re-arrange if the object is bound and
    /// active.
    pub fn set_value(
        &mut self,
        layout: LayoutId,
        name: &str,
        value: LayoutValue,
        transport: &mut dyn LayoutTransport,
    ) -> Option<OutputId> {
        let binding = self.bindings.get_mut(&layout)?;
        if binding.inert {
            return None;
        }
        let event = match &value {
            LayoutValue::Int(v) => LayoutEvent::SetIntValue { name: name.to_owned(), value: *v },
            LayoutValue::Fixed(v) => {
                LayoutEvent::SetFixedValue { name: name.to_owned(), value: *v }
            }
            LayoutValue::String(v) => {
                LayoutEvent::SetStringValue { name: name.to_owned(), value: v.clone() }
            }
        };
        binding.values.insert(name.to_owned(), value);
        let output = binding.output;
        transport.event(layout, event);
        Some(output)
    }

    /// Modifies an int/fixed tunable by a delta. String values cannot be
    /// modified.
    pub fn mod_value(
        &mut self,
        layout: LayoutId,
        name: &str,
        delta: &LayoutValue,
        transport: &mut dyn LayoutTransport,
    ) -> Result<Option<OutputId>, String> {
        let Some(binding) = self.bindings.get_mut(&layout) else {
            return Ok(None);
        };
        if binding.inert {
            return Ok(None);
        }
        let stored = binding.values.get(name).cloned();
        let (updated, event) = match (stored, delta) {
            (Some(LayoutValue::Int(stored)), LayoutValue::Int(delta)) => (
                LayoutValue::Int(stored.saturating_add(*delta)),
                LayoutEvent::ModIntValue { name: name.to_owned(), delta: *delta },
            ),
            (None, LayoutValue::Int(delta)) => (
                LayoutValue::Int(*delta),
                LayoutEvent::ModIntValue { name: name.to_owned(), delta: *delta },
            ),
            (Some(LayoutValue::Fixed(stored)), LayoutValue::Fixed(delta)) => (
                LayoutValue::Fixed(stored + delta),
                LayoutEvent::ModFixedValue { name: name.to_owned(), delta: *delta },
            ),
            (None, LayoutValue::Fixed(delta)) => (
                LayoutValue::Fixed(*delta),
                LayoutEvent::ModFixedValue { name: name.to_owned(), delta: *delta },
            ),
            (_, LayoutValue::String(_)) => {
                return Err("string values cannot be modified".to_owned());
            }
            (Some(_), _) => {
                return Err(format!("value {name} has a different type"));
            }
        };
        binding.values.insert(name.to_owned(), updated);
        let output = binding.output;
        transport.event(layout, event);
        Ok(Some(output))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::Tags;

    /// Transport recording everything sent to layout clients.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingTransport {
        pub events: Vec<(LayoutId, LayoutEvent)>,
        pub errors: Vec<(LayoutId, LayoutErrorCode, String)>,
    }

    impl LayoutTransport for RecordingTransport {
        fn event(&mut self, layout: LayoutId, event: LayoutEvent) {
            self.events.push((layout, event));
        }

        fn error(&mut self, layout: LayoutId, code: LayoutErrorCode, message: &str) {
            self.errors.push((layout, code, message.to_owned()));
        }
    }

    fn test_output() -> Output {
        Output::new(OutputId::next(), "TEST-1".to_owned(), Rect::new(0, 0, 800, 600))
    }

    fn add_view(output: &mut Output) -> ViewId {
        use crate::shell::mock;
        use crate::view::View;
        let (shell, _) = mock::xdg();
        let id = ViewId::next();
        let view = View::new(id, output.id, ClientId::next(), shell, None, Tags::ONE);
        output.stack.append(id, view);
        id
    }

    fn demand_for(
        registry: &mut LayoutRegistry,
        layout: LayoutId,
        output: &mut Output,
        n: usize,
        transport: &mut RecordingTransport,
    ) -> u32 {
        let views: Vec<ViewId> = (0..n).map(|_| add_view(output)).collect();
        registry.send_demand(layout, output, views, transport);
        output.layout_demand.as_ref().unwrap().serial
    }

    #[test]
    fn namespace_unique_per_output_and_across_clients() {
        let mut registry = LayoutRegistry::new();
        let mut transport = RecordingTransport::default();
        let out_a = OutputId::next();
        let out_b = OutputId::next();
        let client_a = ClientId::next();
        let client_b = ClientId::next();

        let first = registry.get_layout(client_a, out_a, "tile", &mut transport);
        assert!(transport.events.is_empty());
        assert_eq!(registry.get_layout_by_name(out_a, "tile"), Some(first));

        // Same client may bind the same namespace on another output.
        let second = registry.get_layout(client_a, out_b, "tile", &mut transport);
        assert!(transport.events.is_empty());
        assert_eq!(registry.get_layout_by_name(out_b, "tile"), Some(second));

        // Same (output, namespace) pair is refused.
        let dup = registry.get_layout(client_b, out_a, "tile", &mut transport);
        assert_eq!(transport.events.last(), Some(&(dup, LayoutEvent::NamespaceInUse)));
        assert!(registry.binding(dup).unwrap().inert);

        // A different client is refused even on an unused output.
        let foreign = registry.get_layout(client_b, OutputId::next(), "tile", &mut transport);
        assert_eq!(transport.events.last(), Some(&(foreign, LayoutEvent::NamespaceInUse)));

        // Destroy on an inert object is honored.
        registry.destroy(dup);
        assert!(registry.binding(dup).is_none());
    }

    #[test]
    fn demand_advertises_views_in_order() {
        let mut registry = LayoutRegistry::new();
        let mut transport = RecordingTransport::default();
        let mut output = test_output();
        let layout =
            registry.get_layout(ClientId::next(), output.id, "tile", &mut transport);

        let serial = demand_for(&mut registry, layout, &mut output, 2, &mut transport);

        let events: Vec<_> = transport.events.iter().map(|(_, e)| e.clone()).collect();
        assert_eq!(
            events,
            vec![
                LayoutEvent::LayoutDemand {
                    view_count: 2,
                    usable_width: 800,
                    usable_height: 600,
                    tags: 1,
                    serial,
                },
                LayoutEvent::AdvertiseView { tags: 1, app_id: None, serial },
                LayoutEvent::AdvertiseView { tags: 1, app_id: None, serial },
                LayoutEvent::AdvertiseDone { serial },
            ],
        );
    }

    #[test]
    fn only_the_newest_demand_serial_wins() {
        let mut registry = LayoutRegistry::new();
        let mut transport = RecordingTransport::default();
        let mut output = test_output();
        let layout =
            registry.get_layout(ClientId::next(), output.id, "tile", &mut transport);

        // Demand with 3 views, superseded by a demand with 2.
        let old_serial = demand_for(&mut registry, layout, &mut output, 3, &mut transport);
        let old_views = output.layout_demand.as_ref().unwrap().views.clone();
        let new_serial = {
            let views = output.layout_demand.as_ref().unwrap().views[..2].to_vec();
            registry.send_demand(layout, &mut output, views, &mut transport);
            output.layout_demand.as_ref().unwrap().serial
        };
        assert_ne!(old_serial, new_serial);

        // The client answers the old demand first: ignored, no error.
        for _ in 0..3 {
            registry.push_view_dimensions(layout, &mut output, old_serial, 0, 0, 100, 100);
        }
        let outcome = registry.commit(layout, &mut output, old_serial, &mut transport);
        assert_eq!(outcome, CommitOutcome::Ignored);
        assert!(transport.errors.is_empty());
        assert!(output.layout_demand.is_some());

        // Then the new one: applied.
        registry.push_view_dimensions(layout, &mut output, new_serial, 0, 0, 400, 600);
        registry.push_view_dimensions(layout, &mut output, new_serial, 400, 0, 400, 600);
        let outcome = registry.commit(layout, &mut output, new_serial, &mut transport);
        assert_eq!(outcome, CommitOutcome::Applied);
        assert_eq!(
            output.stack.get(old_views[0]).unwrap().pending.rect,
            Rect::new(0, 0, 400, 600),
        );
        assert_eq!(
            output.stack.get(old_views[1]).unwrap().pending.rect,
            Rect::new(400, 0, 400, 600),
        );
    }

    #[test]
    fn count_mismatch_is_a_protocol_error() {
        let mut registry = LayoutRegistry::new();
        let mut transport = RecordingTransport::default();
        let mut output = test_output();
        let layout =
            registry.get_layout(ClientId::next(), output.id, "tile", &mut transport);

        let serial = demand_for(&mut registry, layout, &mut output, 3, &mut transport);
        let before: Vec<Rect> = output
            .layout_demand
            .as_ref()
            .unwrap()
            .views
            .iter()
            .map(|&id| output.stack.get(id).unwrap().pending.rect)
            .collect();

        registry.push_view_dimensions(layout, &mut output, serial, 0, 0, 400, 600);
        registry.push_view_dimensions(layout, &mut output, serial, 400, 0, 400, 600);
        let outcome = registry.commit(layout, &mut output, serial, &mut transport);

        assert_eq!(outcome, CommitOutcome::Rejected);
        assert_eq!(transport.errors.len(), 1);
        assert_eq!(transport.errors[0].1, LayoutErrorCode::CountMismatch);
        // The binding is gone with its client.
        assert!(registry.binding(layout).is_none());
        // Prior geometry stays.
        let after: Vec<Rect> = output
            .stack
            .ids()
            .map(|id| output.stack.get(id).unwrap().pending.rect)
            .collect();
        assert_eq!(after, before);
    }

    #[test]
    fn double_commit_is_a_protocol_error() {
        let mut registry = LayoutRegistry::new();
        let mut transport = RecordingTransport::default();
        let mut output = test_output();
        let layout =
            registry.get_layout(ClientId::next(), output.id, "tile", &mut transport);

        let serial = demand_for(&mut registry, layout, &mut output, 1, &mut transport);
        registry.push_view_dimensions(layout, &mut output, serial, 0, 0, 800, 600);
        assert_eq!(
            registry.commit(layout, &mut output, serial, &mut transport),
            CommitOutcome::Applied,
        );

        let outcome = registry.commit(layout, &mut output, serial, &mut transport);
        assert_eq!(outcome, CommitOutcome::Ignored);
        assert_eq!(transport.errors[0].1, LayoutErrorCode::AlreadyCommitted);
        // The offending client's bindings are gone.
        assert!(registry.binding(layout).is_none());
    }

    #[test]
    fn geometry_is_relative_to_the_usable_origin() {
        let mut registry = LayoutRegistry::new();
        let mut transport = RecordingTransport::default();
        let mut output = test_output();
        output.usable = Rect::new(0, 30, 800, 570);
        let layout =
            registry.get_layout(ClientId::next(), output.id, "tile", &mut transport);

        let serial = demand_for(&mut registry, layout, &mut output, 1, &mut transport);
        let view = output.layout_demand.as_ref().unwrap().views[0];
        registry.push_view_dimensions(layout, &mut output, serial, 0, 0, 800, 570);
        registry.commit(layout, &mut output, serial, &mut transport);

        assert_eq!(output.stack.get(view).unwrap().pending.rect, Rect::new(0, 30, 800, 570));
    }

    #[test]
    fn reference_client_completes_the_handshake() {
        use super::reference::{LayoutRequest, ReferenceLayout};

        let mut registry = LayoutRegistry::new();
        let mut transport = RecordingTransport::default();
        let mut output = test_output();
        let layout =
            registry.get_layout(ClientId::next(), output.id, "tile", &mut transport);

        demand_for(&mut registry, layout, &mut output, 3, &mut transport);
        let views = output.layout_demand.as_ref().unwrap().views.clone();

        let mut client = ReferenceLayout::new();
        let events: Vec<LayoutEvent> =
            transport.events.drain(..).map(|(_, event)| event).collect();
        let mut requests = Vec::new();
        for event in &events {
            requests.extend(client.handle_event(event));
        }

        for request in requests {
            match request {
                LayoutRequest::PushViewDimensions { serial, x, y, width, height } => {
                    registry.push_view_dimensions(
                        layout, &mut output, serial, x, y, width, height,
                    );
                }
                LayoutRequest::Commit { serial } => {
                    assert_eq!(
                        registry.commit(layout, &mut output, serial, &mut transport),
                        CommitOutcome::Applied,
                    );
                }
            }
        }

        let rects: Vec<Rect> =
            views.iter().map(|&id| output.stack.get(id).unwrap().pending.rect).collect();
        assert_eq!(
            rects,
            vec![
                Rect::new(0, 0, 480, 600),
                Rect::new(480, 0, 320, 300),
                Rect::new(480, 300, 320, 300),
            ],
        );
    }

    #[test]
    fn values_are_stored_and_forwarded() {
        let mut registry = LayoutRegistry::new();
        let mut transport = RecordingTransport::default();
        let output = OutputId::next();
        let layout = registry.get_layout(ClientId::next(), output, "tile", &mut transport);

        let touched = registry.set_value(
            layout,
            "main_ratio",
            LayoutValue::Fixed(0.5),
            &mut transport,
        );
        assert_eq!(touched, Some(output));
        assert_eq!(
            transport.events.last().unwrap().1,
            LayoutEvent::SetFixedValue { name: "main_ratio".to_owned(), value: 0.5 },
        );

        let touched = registry
            .mod_value(layout, "main_ratio", &LayoutValue::Fixed(0.1), &mut transport)
            .unwrap();
        assert_eq!(touched, Some(output));
        match registry.binding(layout).unwrap().values.get("main_ratio") {
            Some(LayoutValue::Fixed(v)) => assert!((v - 0.6).abs() < 1e-9),
            other => panic!("unexpected value {other:?}"),
        }

        let err = registry
            .mod_value(layout, "name", &LayoutValue::String("x".to_owned()), &mut transport)
            .unwrap_err();
        assert!(err.contains("cannot be modified"));
    }
}
