//! Input device management.
//!
//! The backend announces devices as it discovers them; the manager routes
//! keyboards and pointers to the single `"default"` seat. Virtual devices
//! take the same path as physical ones and are indistinguishable once
//! attached. The input-inhibitor gate also lives here: while a client holds
//! the inhibitor, focus and pointer input are withheld from every other
//! client.

use tracing::{debug, info};

use crate::protocols::layout::LayoutTransport;
use crate::root::{Root, TimerRequest};
use crate::seat::{Seat, SeatHandler};
use crate::types::{ClientId, DeviceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Keyboard,
    Pointer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDevice {
    pub id: DeviceId,
    pub name: String,
    pub kind: DeviceKind,
}

/// Device enumeration and the input-inhibitor gate for the default seat.
pub struct InputManager {
    pub seat: Seat,
    devices: Vec<InputDevice>,
    exclusive_client: Option<ClientId>,
}

impl InputManager {
    pub fn new() -> Self {
        Self { seat: Seat::new("default"), devices: Vec::new(), exclusive_client: None }
    }

    /// The client allowed to receive input, if an inhibitor is active.
    pub fn exclusive_client(&self) -> Option<ClientId> {
        self.exclusive_client
    }

    pub fn devices(&self) -> &[InputDevice] {
        &self.devices
    }

    /// Attaches a device (physical or virtual) to the seat.
    pub fn add_device(&mut self, name: impl Into<String>, kind: DeviceKind) -> DeviceId {
        let id = DeviceId::next();
        let name = name.into();
        info!(device = %id, name, ?kind, "adding input device");
        self.devices.push(InputDevice { id, name, kind });
        id
    }

    pub fn remove_device(&mut self, id: DeviceId) {
        if let Some(pos) = self.devices.iter().position(|device| device.id == id) {
            let device = self.devices.remove(pos);
            info!(device = %id, name = device.name, "removing input device");
        }
    }

    pub fn keyboards(&self) -> impl Iterator<Item = &InputDevice> {
        self.devices.iter().filter(|device| device.kind == DeviceKind::Keyboard)
    }

    pub fn pointers(&self) -> impl Iterator<Item = &InputDevice> {
        self.devices.iter().filter(|device| device.kind == DeviceKind::Pointer)
    }

    /// A client activated the input inhibitor: all other clients lose
    /// focus, and the seat enters the locked mode.
    pub fn activate_inhibitor(
        &mut self,
        root: &mut Root,
        handler: &mut dyn SeatHandler,
        client: ClientId,
        transport: &mut dyn LayoutTransport,
    ) -> TimerRequest {
        debug!(%client, "input inhibitor activated");
        self.exclusive_client = Some(client);
        self.seat.enter_locked_mode();

        let focused_belongs = self
            .seat
            .focused_view()
            .and_then(|id| root.view(id))
            .map_or(false, |view| view.client == client);
        if !focused_belongs {
            return self.seat.focus(root, handler, None, Some(client), transport);
        }
        TimerRequest::None
    }

    /// The inhibitor deactivated: restore the previous mode, re-arrange
    /// layers, and refocus.
    pub fn deactivate_inhibitor(
        &mut self,
        root: &mut Root,
        handler: &mut dyn SeatHandler,
        transport: &mut dyn LayoutTransport,
    ) -> TimerRequest {
        debug!("input inhibitor deactivated");
        self.exclusive_client = None;
        self.seat.leave_locked_mode();

        let mut usable_changed = false;
        for output in &mut root.outputs {
            usable_changed |= output.arrange_layers();
        }
        let mut timer = TimerRequest::None;
        if usable_changed {
            timer = root.request_arrange(transport);
        }
        match self.seat.focus(root, handler, None, None, transport) {
            TimerRequest::None => timer,
            other => other,
        }
    }
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new()
    }
}
