//! The global arrangement coordinator and transaction engine.
//!
//! Configuration changes are applied atomically across views and outputs:
//! an arrangement computes every view's pending geometry (asking layout
//! clients where needed), a transaction sends the configures and collects
//! acknowledgements, and commit flips every pending snapshot into effect at
//! once. Without this, moving a view from a stack of one to a stack of two
//! would flash intermediate states as clients resized at different speeds.
//!
//! Rendering reads only `current` snapshots, so nothing is visible until
//! commit. A transaction that is not fully acknowledged within
//! [`TRANSACTION_TIMEOUT`] commits anyway with the last-configured values.

use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::config::Settings;
use crate::geometry::Rect;
use crate::output::Output;
use crate::protocols::layout::{CommitOutcome, LayoutRegistry, LayoutTransport};
use crate::shell::{Shell, SurfaceHandle};
use crate::types::{ClientId, LayoutId, OutputId, ViewId};
use crate::view::{Ack, View};

/// How long a transaction waits for configure acknowledgements.
pub const TRANSACTION_TIMEOUT: Duration = Duration::from_millis(200);

/// Phase of the transaction engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPhase {
    Idle,
    /// Waiting for layout clients to answer outstanding demands.
    Collecting { outstanding_demands: u32 },
    /// Configures are being issued.
    Configuring,
    /// Configures are out; waiting for acknowledgements or the deadline.
    Awaiting { pending_acks: u32 },
    /// Pending state is being flipped into effect.
    Committing,
}

/// What the caller must do with the deadline timer after an engine call.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerRequest {
    /// Leave the timer as it is.
    None,
    /// Arm (or re-arm) the deadline.
    Schedule(Duration),
    /// Disarm the deadline.
    Cancel,
}

/// Global compositor state: all outputs, the transaction engine, and the
/// layout registry.
pub struct Root {
    pub outputs: Vec<Output>,
    pub registry: LayoutRegistry,
    pub settings: Settings,
    pub phase: TransactionPhase,
    /// An arrange arrived while a transaction was live; exactly one fresh
    /// arrangement runs once it settles.
    queued_arrange: bool,
}

impl Root {
    pub fn new(settings: Settings) -> Self {
        Self {
            outputs: Vec::new(),
            registry: LayoutRegistry::new(),
            settings,
            phase: TransactionPhase::Idle,
            queued_arrange: false,
        }
    }

    pub fn output(&self, id: OutputId) -> Option<&Output> {
        self.outputs.iter().find(|output| output.id == id)
    }

    pub fn output_mut(&mut self, id: OutputId) -> Option<&mut Output> {
        self.outputs.iter_mut().find(|output| output.id == id)
    }

    pub fn view(&self, id: ViewId) -> Option<&View> {
        self.outputs.iter().find_map(|output| output.stack.get(id))
    }

    pub fn view_mut(&mut self, id: ViewId) -> Option<&mut View> {
        self.outputs.iter_mut().find_map(|output| output.stack.get_mut(id))
    }

    pub fn output_of_view(&self, id: ViewId) -> Option<OutputId> {
        self.outputs
            .iter()
            .find(|output| output.stack.contains(id))
            .map(|output| output.id)
    }

    /// Adds a display and arranges its layers.
    pub fn add_output(&mut self, name: String, geometry: Rect) -> OutputId {
        let id = OutputId::next();
        let mut output = Output::new(id, name, geometry);
        output.arrange_layers();
        self.outputs.push(output);
        id
    }

    /// Removes a display, evacuating its views to the first remaining
    /// output (remove+insert, per the one-output-per-view model).
    pub fn remove_output(
        &mut self,
        id: OutputId,
        transport: &mut dyn LayoutTransport,
    ) -> TimerRequest {
        let Some(pos) = self.outputs.iter().position(|output| output.id == id) else {
            return TimerRequest::None;
        };
        let mut removed = self.outputs.remove(pos);
        if let Some(target) = self.outputs.first_mut() {
            let ids: Vec<ViewId> = removed.stack.ids().collect();
            for view_id in ids {
                let mut view = removed.stack.remove(view_id).unwrap();
                view.output = target.id;
                target.stack.append(view_id, view);
            }
        }
        self.request_arrange(transport)
    }

    // ------------------------------------------------------------------
    // View lifecycle
    // ------------------------------------------------------------------

    /// Runs mapped-phase setup for a new client window: fetches
    /// constraints, initializes the floating rectangle, attaches it to the
    /// output's stack, and starts a transaction.
    pub fn map_view(
        &mut self,
        output_id: OutputId,
        client: ClientId,
        shell: Shell,
        surface: Option<SurfaceHandle>,
        transport: &mut dyn LayoutTransport,
    ) -> Option<(ViewId, TimerRequest)> {
        let attach_mode = self.settings.attach_mode;
        let output = self.output_mut(output_id)?;
        let id = ViewId::next();
        let tags = output.spawn_tags();

        let mut view = View::new(id, output_id, client, shell, surface, tags);
        let (natural_w, natural_h) = view.shell.natural_size();
        let (natural_w, natural_h) = view.constraints.clamp(natural_w.max(1), natural_h.max(1));
        view.float_rect = output.usable.center_rect(natural_w, natural_h);
        view.pending.rect = view.float_rect;

        output.stack.attach(id, view, attach_mode);
        debug!(view = %id, output = %output_id, tags = tags.get(), "mapped view");

        Some((id, self.request_arrange(transport)))
    }

    /// Removes a view from its output. A view mid-transaction is treated
    /// as acknowledged. Seat focus references are the caller's to clear.
    pub fn unmap_view(
        &mut self,
        id: ViewId,
        transport: &mut dyn LayoutTransport,
    ) -> TimerRequest {
        let Some(output) = self.outputs.iter_mut().find(|output| output.stack.contains(id))
        else {
            return TimerRequest::None;
        };
        let view = output.stack.remove(id).unwrap();
        debug!(view = %id, "unmapped view");

        let mut request = TimerRequest::None;
        if view.pending_serial.is_some() {
            if let TransactionPhase::Awaiting { pending_acks } = self.phase {
                let pending_acks = pending_acks.saturating_sub(1);
                self.phase = TransactionPhase::Awaiting { pending_acks };
                if pending_acks == 0 {
                    request = self.commit(transport);
                }
            }
        }
        match self.request_arrange(transport) {
            TimerRequest::None => request,
            other => other,
        }
    }

    /// Moves a view to another output (modeled as remove+insert).
    pub fn send_view_to_output(
        &mut self,
        id: ViewId,
        target: OutputId,
        transport: &mut dyn LayoutTransport,
    ) -> TimerRequest {
        let Some(source) = self.outputs.iter_mut().find(|output| output.stack.contains(id))
        else {
            return TimerRequest::None;
        };
        if source.id == target {
            return TimerRequest::None;
        }
        let mut view = source.stack.remove(id).unwrap();
        let attach_mode = self.settings.attach_mode;
        let Some(dest) = self.output_mut(target) else {
            return TimerRequest::None;
        };
        view.output = target;
        view.float_rect = dest.usable.center_rect(view.float_rect.width, view.float_rect.height);
        dest.stack.attach(id, view, attach_mode);
        self.request_arrange(transport)
    }

    // ------------------------------------------------------------------
    // Arrangement and transactions
    // ------------------------------------------------------------------

    /// Requests a fresh arrangement. Queued if a transaction is live;
    /// multiple queued requests coalesce into one.
    pub fn request_arrange(&mut self, transport: &mut dyn LayoutTransport) -> TimerRequest {
        if self.phase != TransactionPhase::Idle {
            trace!("arrange queued behind a live transaction");
            self.queued_arrange = true;
            return TimerRequest::None;
        }
        self.arrange(transport)
    }

    /// Commits pending state that does not move any geometry (focus
    /// counts, border settings). A live transaction picks these up at its
    /// own commit, so this is a no-op while one is in flight.
    pub fn commit_pending_state(&mut self, transport: &mut dyn LayoutTransport) -> TimerRequest {
        if self.phase != TransactionPhase::Idle {
            return TimerRequest::None;
        }
        self.start_transaction(transport)
    }

    /// Computes pending geometry for every view on every output, sending
    /// layout demands where tiled views need placement.
    fn arrange(&mut self, transport: &mut dyn LayoutTransport) -> TimerRequest {
        let default_ns = self.settings.default_layout.clone();
        let default_ns = default_ns.as_deref().unwrap_or("");
        let mut outstanding = 0u32;

        for i in 0..self.outputs.len() {
            let tiled = self.outputs[i].arrange_views();
            if tiled.is_empty() {
                continue;
            }
            match self.registry.layout_for_output(&self.outputs[i], default_ns) {
                Some(layout) => {
                    self.registry.send_demand(layout, &mut self.outputs[i], tiled, transport);
                    outstanding += 1;
                }
                None => {
                    // Tiled views keep their previous geometry.
                    debug!(output = %self.outputs[i].id, "no layout bound, skipping tiled views");
                }
            }
        }

        if outstanding == 0 {
            self.start_transaction(transport)
        } else {
            self.phase = TransactionPhase::Collecting { outstanding_demands: outstanding };
            TimerRequest::None
        }
    }

    /// Issues configures for every view whose pending size differs from
    /// what the client believes. Commits immediately if nothing is
    /// outstanding.
    fn start_transaction(&mut self, transport: &mut dyn LayoutTransport) -> TimerRequest {
        self.phase = TransactionPhase::Configuring;
        let mut pending_acks = 0u32;

        for output in &mut self.outputs {
            let ids: Vec<ViewId> = output.stack.ids().collect();
            for id in ids {
                let view = output.stack.get_mut(id).unwrap();
                if view.needs_configure() {
                    view.configure();
                    pending_acks += 1;
                }
            }
        }

        if pending_acks == 0 {
            self.commit(transport)
        } else {
            trace!(pending_acks, "transaction awaiting acknowledgements");
            self.phase = TransactionPhase::Awaiting { pending_acks };
            TimerRequest::Schedule(TRANSACTION_TIMEOUT)
        }
    }

    /// A client acknowledged a configure.
    pub fn notify_configured(
        &mut self,
        id: ViewId,
        serial: u32,
        transport: &mut dyn LayoutTransport,
    ) -> TimerRequest {
        let Some(view) = self.view_mut(id) else {
            warn!(view = %id, serial, "configure ack for unknown view");
            return TimerRequest::None;
        };
        if view.ack_configure(serial) != Ack::Accepted {
            return TimerRequest::None;
        }

        match self.phase {
            TransactionPhase::Awaiting { pending_acks } => {
                let pending_acks = pending_acks.saturating_sub(1);
                self.phase = TransactionPhase::Awaiting { pending_acks };
                if pending_acks == 0 {
                    self.commit(transport)
                } else {
                    TimerRequest::None
                }
            }
            _ => {
                // An ack outside a transaction (interactive resize):
                // apply the configured geometry directly.
                let output_id = {
                    let view = self.view_mut(id).unwrap();
                    view.current.rect = view.inflight.rect;
                    view.output
                };
                if let Some(output) = self.output_mut(output_id) {
                    output.needs_repaint = true;
                }
                TimerRequest::None
            }
        }
    }

    /// The transaction deadline fired: commit with whatever arrived.
    pub fn handle_deadline(&mut self, transport: &mut dyn LayoutTransport) -> TimerRequest {
        match self.phase {
            TransactionPhase::Awaiting { pending_acks } => {
                warn!(pending_acks, "transaction deadline expired, committing anyway");
                self.commit(transport)
            }
            _ => TimerRequest::None,
        }
    }

    /// Atomically flips pending state into effect on every output and
    /// view, then runs the queued arrangement if one accumulated.
    fn commit(&mut self, transport: &mut dyn LayoutTransport) -> TimerRequest {
        self.phase = TransactionPhase::Committing;

        for output in &mut self.outputs {
            let ids: Vec<ViewId> = output.stack.ids().collect();
            for id in ids {
                let view = output.stack.get_mut(id).unwrap();
                if view.pending_serial.take().is_some() {
                    // Never acknowledged: the client knows only the
                    // last-configured geometry.
                    view.current.rect = view.inflight.rect;
                } else {
                    view.current.rect = view.pending.rect;
                }
                view.apply_pending();
            }
            output.current = output.pending.clone();
            output.needs_repaint = true;
        }

        trace!("transaction committed");
        self.phase = TransactionPhase::Idle;

        if self.queued_arrange {
            self.queued_arrange = false;
            match self.arrange(transport) {
                TimerRequest::None => TimerRequest::Cancel,
                other => other,
            }
        } else {
            TimerRequest::Cancel
        }
    }

    // ------------------------------------------------------------------
    // Layout protocol entry points
    // ------------------------------------------------------------------

    pub fn handle_get_layout(
        &mut self,
        client: ClientId,
        output: OutputId,
        namespace: &str,
        transport: &mut dyn LayoutTransport,
    ) -> LayoutId {
        self.registry.get_layout(client, output, namespace, transport)
    }

    pub fn handle_push_view_dimensions(
        &mut self,
        layout: LayoutId,
        serial: u32,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) {
        let Some(output_id) = self.registry.binding(layout).map(|b| b.output) else {
            return;
        };
        let Some(output) = self.outputs.iter_mut().find(|o| o.id == output_id) else {
            return;
        };
        self.registry.push_view_dimensions(layout, output, serial, x, y, width, height);
    }

    /// Handles a layout `commit` request, resuming the transaction once
    /// every demand of the current arrangement has settled.
    pub fn handle_layout_commit(
        &mut self,
        layout: LayoutId,
        serial: u32,
        transport: &mut dyn LayoutTransport,
    ) -> TimerRequest {
        let Some(output_id) = self.registry.binding(layout).map(|b| b.output) else {
            return TimerRequest::None;
        };
        let Some(output) = self.outputs.iter_mut().find(|o| o.id == output_id) else {
            return TimerRequest::None;
        };
        let outcome = self.registry.commit(layout, output, serial, transport);

        let mut settled = match outcome {
            CommitOutcome::Applied | CommitOutcome::Rejected => 1,
            CommitOutcome::Ignored => 0,
        };
        settled += self.reap_orphaned_demands();
        self.demands_settled(settled, transport)
    }

    pub fn handle_layout_destroy(
        &mut self,
        layout: LayoutId,
        transport: &mut dyn LayoutTransport,
    ) -> TimerRequest {
        self.registry.destroy(layout);
        let settled = self.reap_orphaned_demands();
        self.demands_settled(settled, transport)
    }

    /// A layout client disconnected: its bindings and live demands go.
    pub fn handle_layout_client_gone(
        &mut self,
        client: ClientId,
        transport: &mut dyn LayoutTransport,
    ) -> TimerRequest {
        self.registry.remove_client(client);
        let settled = self.reap_orphaned_demands();
        self.demands_settled(settled, transport)
    }

    /// Sets a layout tunable from the control surface, re-arranging if the
    /// object is active.
    pub fn set_layout_value(
        &mut self,
        layout: LayoutId,
        name: &str,
        value: firth_ipc::LayoutValue,
        transport: &mut dyn LayoutTransport,
    ) -> TimerRequest {
        match self.registry.set_value(layout, name, value, transport) {
            Some(_) => self.request_arrange(transport),
            None => TimerRequest::None,
        }
    }

    pub fn mod_layout_value(
        &mut self,
        layout: LayoutId,
        name: &str,
        delta: &firth_ipc::LayoutValue,
        transport: &mut dyn LayoutTransport,
    ) -> Result<TimerRequest, String> {
        match self.registry.mod_value(layout, name, delta, transport)? {
            Some(_) => Ok(self.request_arrange(transport)),
            None => Ok(TimerRequest::None),
        }
    }

    /// Drops live demands whose layout object no longer exists, returning
    /// how many were dropped.
    fn reap_orphaned_demands(&mut self) -> u32 {
        let mut dropped = 0;
        for output in &mut self.outputs {
            let orphaned = output
                .layout_demand
                .as_ref()
                .map_or(false, |demand| self.registry.binding(demand.layout).is_none());
            if orphaned {
                output.layout_demand = None;
                dropped += 1;
            }
        }
        dropped
    }

    /// Accounts settled demands against the collecting phase.
    fn demands_settled(
        &mut self,
        settled: u32,
        transport: &mut dyn LayoutTransport,
    ) -> TimerRequest {
        if settled == 0 {
            return TimerRequest::None;
        }
        match self.phase {
            TransactionPhase::Collecting { outstanding_demands } => {
                let outstanding_demands = outstanding_demands.saturating_sub(settled);
                if outstanding_demands == 0 {
                    self.start_transaction(transport)
                } else {
                    self.phase =
                        TransactionPhase::Collecting { outstanding_demands };
                    TimerRequest::None
                }
            }
            _ => TimerRequest::None,
        }
    }
}
