//! Virtual pan-tilt unit for a fixed 360° camera.
//!
//! The camera never moves; an operator "pans" and "tilts" by steering a crop
//! viewport over the full equirectangular frame with a joystick while the
//! video plays.
//!
//! # Components
//!
//! - **Device readiness** ([`device`]): bounded-retry state machine that takes
//!   the camera from detection through wake-up into streaming mode.
//! - **Frame ingestion** ([`stream`]): copies every frame out of the source
//!   callback, stamps pts/duration/offset from the frame sequence and pushes
//!   it to the media sink in delivery order.
//! - **Viewport control** ([`viewport`]): a 16 ms control loop on its own
//!   thread integrating joystick velocity into a clamped offset and
//!   publishing the four crop edges as one update.
//! - **Session orchestration** ([`session`]): wires the above together and
//!   owns startup and teardown order.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use virtualptu::{Collaborators, PtuConfig, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PtuConfig::default();
//!     let parts = Collaborators::from_config(&config)?;
//!     let report = Session::new(config, parts).run().await?;
//!     println!("pushed {} frames", report.frames_pushed);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod device;
mod error;
pub mod input;
pub mod media;
pub mod session;
pub mod stream;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod viewport;

pub use error::*;

pub use config::PtuConfig;
pub use device::{DeviceHandle, ReadinessController, Ready};
pub use media::{CropWindow, MediaSink};
pub use session::{Collaborators, Session, SessionEnd, SessionReport};
pub use stream::{Frame, FrameSource, StreamFormat, StreamMode};
pub use viewport::{Viewport, ViewportGeometry, ViewportOffset};
