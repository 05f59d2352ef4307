//! In-process camera for dry runs

use tracing::debug;

use super::DeviceHandle;
use crate::config::DeviceConfig;

/// Camera that needs a fixed number of corrective actions per phase.
///
/// Starts present, awake and streaming; builder methods make it absent or
/// require wake-ups and mode switches before it is ready.
#[derive(Debug, Clone)]
pub struct SimulatedCamera {
    present: bool,
    wakes_needed: u32,
    switches_needed: u32,
    wakes: u32,
    switches: u32,
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCamera {
    pub fn new() -> Self {
        Self { present: true, wakes_needed: 0, switches_needed: 0, wakes: 0, switches: 0 }
    }

    pub fn absent(mut self) -> Self {
        self.present = false;
        self
    }

    /// Stay asleep until `wake_ups` wake-ups were issued.
    pub fn asleep(mut self, wake_ups: u32) -> Self {
        self.wakes_needed = wake_ups;
        self
    }

    /// Stay out of streaming mode until `switches` mode switches were issued.
    pub fn not_streaming(mut self, switches: u32) -> Self {
        self.switches_needed = switches;
        self
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        let sim = &config.simulated;
        let mut camera = Self::new();
        if !sim.present {
            camera = camera.absent();
        }
        if sim.asleep {
            camera = camera.asleep(sim.wake_attempts_needed.max(1));
        }
        if !sim.streaming {
            camera = camera.not_streaming(sim.mode_attempts_needed.max(1));
        }
        camera
    }

    /// Wake-ups received so far
    pub fn wakes(&self) -> u32 {
        self.wakes
    }

    /// Mode switches received so far
    pub fn switches(&self) -> u32 {
        self.switches
    }
}

impl DeviceHandle for SimulatedCamera {
    fn detect(&mut self) -> bool {
        self.present
    }

    fn is_sleeping(&mut self) -> bool {
        self.wakes < self.wakes_needed
    }

    fn wake_up(&mut self) {
        self.wakes += 1;
        debug!(wakes = self.wakes, "Simulated camera received wake-up");
    }

    fn is_in_streaming_mode(&mut self) -> bool {
        self.switches >= self.switches_needed
    }

    fn switch_to_streaming_mode(&mut self) {
        self.switches += 1;
        debug!(switches = self.switches, "Simulated camera received mode switch");
    }
}
