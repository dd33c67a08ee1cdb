//! Types for communicating with the firth compositor over its control socket.
//!
//! The wire format is one JSON object per line: the client writes a
//! [`Request`], the compositor answers with a [`Reply`] and closes the
//! connection. The socket path is published in the environment of processes
//! spawned by the compositor (see [`SOCKET_ENV`]).

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Name of the environment variable holding the control socket path.
pub const SOCKET_ENV: &str = "FIRTH_SOCKET";

/// Returns the control socket path from the environment, if set.
pub fn socket_path() -> Option<PathBuf> {
    env::var_os(SOCKET_ENV).map(PathBuf::from)
}

/// A single request to the compositor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub command: Command,
}

/// The compositor's answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    /// The command was accepted; some commands return a value.
    Ok { value: Option<String> },
    /// The command was rejected with a human-readable message.
    Err { message: String },
}

/// Direction for commands cycling through a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Next,
    Previous,
}

/// Where newly mapped views are inserted into the view stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttachMode {
    Top,
    Bottom,
}

/// A typed layout tunable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutValue {
    Int(i32),
    Fixed(f64),
    String(String),
}

/// A command for the compositor.
///
/// All state-changing commands take effect in the next transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "cmd")]
pub enum Command {
    /// Show views with tags intersecting the given mask on the focused
    /// output.
    SetFocusedTags { tags: u32 },
    /// Assign the given tag mask to the focused view.
    SetViewTags { tags: u32 },
    /// Toggle the given tags on the focused output.
    ToggleFocusedTags { tags: u32 },
    /// Toggle the given tags on the focused view.
    ToggleViewTags { tags: u32 },
    /// Switch the focused output back to its previously focused tags.
    FocusPreviousTags,
    /// Set the tag mask applied to newly spawned views on the focused
    /// output.
    SpawnTagmask { tags: u32 },
    /// Ask the focused view to close.
    Close,
    /// Focus the next/previous visible view in stack order.
    FocusView { direction: Direction },
    /// Swap the focused view with the next/previous visible view.
    Swap { direction: Direction },
    /// Bump the focused view (or the first view in the stack) to the top of
    /// the stack.
    Zoom,
    /// Toggle the focused view between floating and tiled.
    ToggleFloat,
    /// Toggle fullscreen on the focused view.
    ToggleFullscreen,
    /// Set the layout namespace used by outputs without an explicit one.
    DefaultLayout { namespace: String },
    /// Set the layout namespace of the focused output.
    OutputLayout { namespace: String },
    /// Set a named tunable on the focused output's layout.
    SetLayoutValue { name: String, value: LayoutValue },
    /// Modify a named int/fixed tunable on the focused output's layout.
    ModLayoutValue { name: String, value: LayoutValue },
    /// Set where newly mapped views attach to the stack.
    AttachMode { mode: AttachMode },
    /// Set the view border width in pixels.
    BorderWidth { width: u32 },
    /// Set the border color of focused views (0xRRGGBBAA).
    BorderColorFocused { color: u32 },
    /// Set the border color of unfocused views (0xRRGGBBAA).
    BorderColorUnfocused { color: u32 },
    /// Send the focused view to the next/previous output.
    SendToOutput { direction: Direction },
    /// Focus the next/previous output.
    FocusOutput { direction: Direction },
    /// Declare a new mode with the given name.
    DeclareMode { name: String },
    /// Enter the named mode.
    EnterMode { name: String },
    /// Set the cursor theme (and optionally size) of the default seat.
    SetCursorTheme { theme: String, size: Option<u32> },
    /// Spawn a command with the default shell.
    Spawn { command: String },
    /// Exit the compositor.
    Exit,
}
