//! Ids and the tag mask shared across the compositor.
//!
//! Entities are owned by their parent collection; everything else refers to
//! them by id. Ids are never reused within a compositor run.

use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Mints a fresh id.
            pub fn next() -> Self {
                static NEXT: AtomicU64 = AtomicU64::new(1);
                Self(NEXT.fetch_add(1, Ordering::Relaxed))
            }

            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type! {
    /// Id of a managed client window.
    ViewId
}
id_type! {
    /// Id of a physical display.
    OutputId
}
id_type! {
    /// Id of a layer-shell surface.
    LayerSurfaceId
}
id_type! {
    /// Id of a connected client process.
    ClientId
}
id_type! {
    /// Id of a layout object bound by a layout client.
    LayoutId
}
id_type! {
    /// Id of an attached input device.
    DeviceId
}

/// A non-empty set of the 32 workspace tags.
///
/// Views and outputs always carry at least one tag; operations that would
/// empty the set return `None` and are ignored by callers.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tags(NonZeroU32);

impl Tags {
    /// The first tag alone, the default for new outputs.
    pub const ONE: Tags = Tags(match NonZeroU32::new(1) {
        Some(n) => n,
        None => unreachable!(),
    });

    /// All 32 tags.
    pub const ALL: Tags = Tags(match NonZeroU32::new(u32::MAX) {
        Some(n) => n,
        None => unreachable!(),
    });

    pub fn new(mask: u32) -> Option<Tags> {
        NonZeroU32::new(mask).map(Tags)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }

    pub fn intersects(self, mask: u32) -> bool {
        self.get() & mask != 0
    }

    /// The set with `mask` toggled; `None` if that would empty it.
    pub fn toggled(self, mask: u32) -> Option<Tags> {
        Tags::new(self.get() ^ mask)
    }

    /// The set restricted to `mask`; `None` if nothing remains.
    pub fn masked(self, mask: u32) -> Option<Tags> {
        Tags::new(self.get() & mask)
    }
}

impl fmt::Debug for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tags({:#b})", self.get())
    }
}
