//! Runtime-settable options.
//!
//! There is no configuration file: the init script mutates these over the
//! control socket at startup, the same way any later change does.

use std::env;

use crate::stack::AttachMode;

/// An RGBA color, 0xRRGGBBAA.
pub type Color = u32;

/// Keyboard configuration captured from the environment for the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XkbConfig {
    pub rules: Option<String>,
    pub model: Option<String>,
    pub layout: Option<String>,
    pub variant: Option<String>,
    pub options: Option<String>,
}

impl XkbConfig {
    /// Reads the `XKB_DEFAULT_*` variables.
    pub fn from_env() -> Self {
        Self {
            rules: env::var("XKB_DEFAULT_RULES").ok(),
            model: env::var("XKB_DEFAULT_MODEL").ok(),
            layout: env::var("XKB_DEFAULT_LAYOUT").ok(),
            variant: env::var("XKB_DEFAULT_VARIANT").ok(),
            options: env::var("XKB_DEFAULT_OPTIONS").ok(),
        }
    }
}

/// Compositor-wide settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub border_width: u32,
    pub border_color_focused: Color,
    pub border_color_unfocused: Color,
    /// Where newly mapped views are inserted.
    pub attach_mode: AttachMode,
    /// Layout namespace for outputs without an explicit binding.
    pub default_layout: Option<String>,
    /// Cursor theme and size for the default seat; exported to the
    /// environment for X11 clients when set.
    pub cursor_theme: Option<String>,
    pub cursor_size: Option<u32>,
    pub xkb: XkbConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            border_width: 2,
            border_color_focused: 0x93a1a1ff,
            border_color_unfocused: 0x586e75ff,
            attach_mode: AttachMode::Top,
            default_layout: None,
            cursor_theme: None,
            cursor_size: None,
            xkb: XkbConfig::default(),
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self { xkb: XkbConfig::from_env(), ..Default::default() }
    }

    /// Sets the cursor theme, exporting it for X11 clients.
    pub fn set_cursor_theme(&mut self, theme: String, size: Option<u32>) {
        env::set_var("XCURSOR_THEME", &theme);
        if let Some(size) = size {
            env::set_var("XCURSOR_SIZE", size.to_string());
        }
        self.cursor_theme = Some(theme);
        self.cursor_size = size;
    }
}
