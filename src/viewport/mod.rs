//! Virtual pan/tilt viewport over the full spherical frame.
//!
//! The viewport is a `view_width x view_height` window moved over the
//! `total_width x total_height` source frame. Joystick axis 0 sets a velocity
//! (raw reading divided by [`DEFAULT_VELOCITY_DIVISOR`], integer division, so
//! small deflections are a dead zone); every tick integrates that velocity
//! into the offset, clamps it to the frame, and derives the four crop edges.
//!
//! ## Invariants
//!
//! - `0 <= x <= total_width - view_width` and `0 <= y <= total_height - view_height`
//!   after every step.
//! - The crop window is a pure function of the offset and the geometry.
//! - Clamping never zeroes velocity: reversing at a border moves immediately.
//!
//! ```rust
//! use virtualptu::viewport::{Velocity, Viewport, ViewportGeometry};
//!
//! let geometry = ViewportGeometry::new(3840, 1920, 640, 480).unwrap();
//! let mut viewport = Viewport::new(geometry);
//! let mut crop = viewport.crop();
//! for _ in 0..10 {
//!     crop = viewport.step(Velocity { x: 1, y: 0 });
//! }
//! assert_eq!(viewport.offset().x, 10);
//! assert_eq!(crop.right, 3190);
//! ```

mod controller;

pub use controller::{ViewportController, ViewportSummary};

use std::time::Duration;

use crate::input::{InputEvent, InputEventKind};
use crate::media::CropWindow;
use crate::{PtuError, Result};

/// Raw axis reading per unit of velocity.
pub const DEFAULT_VELOCITY_DIVISOR: i32 = 5000;

/// Nominal viewport tick (about 60 Hz).
pub const DEFAULT_TICK: Duration = Duration::from_millis(16);

/// Logical axes tracked; higher axis numbers are ignored.
pub const MAX_AXES: usize = 8;

/// Source frame and viewport sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewportGeometry {
    total_width: u32,
    total_height: u32,
    view_width: u32,
    view_height: u32,
}

impl ViewportGeometry {
    /// Fails unless the view is non-empty and fits inside the frame.
    pub fn new(total_width: u32, total_height: u32, view_width: u32, view_height: u32) -> Result<Self> {
        if view_width == 0 || view_height == 0 || view_width > total_width || view_height > total_height {
            return Err(PtuError::InvalidGeometry { total_width, total_height, view_width, view_height });
        }
        Ok(Self { total_width, total_height, view_width, view_height })
    }

    pub fn total_width(&self) -> u32 {
        self.total_width
    }

    pub fn total_height(&self) -> u32 {
        self.total_height
    }

    pub fn view_width(&self) -> u32 {
        self.view_width
    }

    pub fn view_height(&self) -> u32 {
        self.view_height
    }

    /// Largest valid horizontal offset.
    pub fn max_x(&self) -> i64 {
        i64::from(self.total_width - self.view_width)
    }

    /// Largest valid vertical offset.
    pub fn max_y(&self) -> i64 {
        i64::from(self.total_height - self.view_height)
    }

    /// Clamp an offset into the valid range. Hard bound, no elasticity.
    pub fn clamp(&self, offset: ViewportOffset) -> ViewportOffset {
        ViewportOffset { x: offset.x.clamp(0, self.max_x()), y: offset.y.clamp(0, self.max_y()) }
    }

    /// Crop edges for an offset.
    ///
    /// `left = x`, `top = y`, `right = total_width - view_width - x`,
    /// `bottom = total_height - view_height - y`. Out-of-range offsets are
    /// clamped first.
    pub fn crop_for(&self, offset: ViewportOffset) -> CropWindow {
        let offset = self.clamp(offset);
        // Clamped values lie in 0..=u32::MAX, so the narrowing casts are lossless.
        CropWindow {
            left: offset.x as u32,
            top: offset.y as u32,
            right: (self.max_x() - offset.x) as u32,
            bottom: (self.max_y() - offset.y) as u32,
        }
    }
}

/// Viewport position in source-frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ViewportOffset {
    pub x: i64,
    pub y: i64,
}

impl ViewportOffset {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

/// Per-tick displacement in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Velocity {
    pub x: i32,
    pub y: i32,
}

/// Raw `(x, y)` readings of one logical axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxisPair {
    pub x: i32,
    pub y: i32,
}

/// Raw readings of every tracked logical axis.
///
/// Event number `n` maps to logical axis `n / 2`; even numbers carry the x
/// component, odd numbers the y component.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AxisState {
    axes: [AxisPair; MAX_AXES],
}

impl AxisState {
    /// Record an axis reading. Returns false for untracked axes.
    pub fn update(&mut self, number: u8, value: i16) -> bool {
        let Some(axis) = self.axes.get_mut(usize::from(number / 2)) else {
            return false;
        };
        if number % 2 == 0 {
            axis.x = i32::from(value);
        } else {
            axis.y = i32::from(value);
        }
        true
    }

    pub fn axis(&self, index: usize) -> Option<AxisPair> {
        self.axes.get(index).copied()
    }

    /// Velocity from axis 0, truncating integer division by `divisor`.
    pub fn velocity(&self, divisor: i32) -> Velocity {
        let divisor = divisor.max(1);
        let stick = self.axes[0];
        Velocity { x: stick.x / divisor, y: stick.y / divisor }
    }
}

/// Viewport state: geometry, current offset and stick readings.
#[derive(Debug, Clone)]
pub struct Viewport {
    geometry: ViewportGeometry,
    offset: ViewportOffset,
    axes: AxisState,
    divisor: i32,
}

impl Viewport {
    /// Viewport at the top-left corner with the default velocity divisor.
    pub fn new(geometry: ViewportGeometry) -> Self {
        Self {
            geometry,
            offset: ViewportOffset::default(),
            axes: AxisState::default(),
            divisor: DEFAULT_VELOCITY_DIVISOR,
        }
    }

    /// Start from `offset` (clamped).
    pub fn with_offset(mut self, offset: ViewportOffset) -> Self {
        self.offset = self.geometry.clamp(offset);
        self
    }

    /// Use a different velocity divisor (values below 1 are treated as 1).
    pub fn with_divisor(mut self, divisor: i32) -> Self {
        self.divisor = divisor.max(1);
        self
    }

    pub fn geometry(&self) -> ViewportGeometry {
        self.geometry
    }

    pub fn offset(&self) -> ViewportOffset {
        self.offset
    }

    pub fn axes(&self) -> &AxisState {
        &self.axes
    }

    /// Apply an input event. Buttons do not affect the viewport.
    pub fn apply_event(&mut self, event: &InputEvent) {
        match event.kind {
            InputEventKind::Axis => {
                if !self.axes.update(event.number, event.value) {
                    tracing::trace!(number = event.number, "Ignoring untracked axis");
                }
            }
            InputEventKind::Button => {}
        }
    }

    /// Current stick velocity.
    pub fn velocity(&self) -> Velocity {
        self.axes.velocity(self.divisor)
    }

    /// Integrate one tick of `velocity` and return the new crop window.
    ///
    /// The y axis is inverted: a positive reading lowers the vertical offset,
    /// moving the view toward the top of the frame.
    pub fn step(&mut self, velocity: Velocity) -> CropWindow {
        let moved = ViewportOffset {
            x: self.offset.x + i64::from(velocity.x),
            y: self.offset.y - i64::from(velocity.y),
        };
        self.offset = self.geometry.clamp(moved);
        self.crop()
    }

    /// One tick at the current stick velocity.
    pub fn tick(&mut self) -> CropWindow {
        self.step(self.velocity())
    }

    /// Crop window of the current offset.
    pub fn crop(&self) -> CropWindow {
        self.geometry.crop_for(self.offset)
    }
}
