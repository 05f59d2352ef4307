//! Device readiness state machine
//!
//! Three sequential gates, each a polling loop:
//!
//! 1. **Detect** - one presence check, no retry.
//! 2. **Wake** - while the camera sleeps, issue a wake-up and spend one unit
//!    of the wake budget.
//! 3. **Mode switch** - while the camera is not streaming, issue a mode
//!    switch and spend one unit of the mode budget.
//!
//! A corrective action is followed immediately by the next poll; there is no
//! delay between attempts and no cancellation mid-loop. A flapping camera is
//! treated like one that never progresses: only corrective attempts count.

use tracing::{debug, error, info, warn};

use super::{DeviceHandle, DeviceState};
use crate::{PtuError, ReadinessPhase, Result};

/// Corrective attempts allowed per phase.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Counts corrective attempts of one phase against a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    attempts: u32,
    max: u32,
}

impl RetryBudget {
    pub fn new(max: u32) -> Self {
        Self { attempts: 0, max }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max
    }

    /// Record one attempt. Returns false, leaving the count unchanged, once exhausted.
    pub fn try_spend(&mut self) -> bool {
        if self.is_exhausted() {
            return false;
        }
        self.attempts += 1;
        true
    }
}

/// The camera reached streaming mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    /// Wake-ups issued
    pub wake_attempts: u32,
    /// Mode switches issued
    pub mode_attempts: u32,
}

/// Drives a [`DeviceHandle`] into streaming mode.
#[derive(Debug)]
pub struct ReadinessController {
    max_retries: u32,
    state: DeviceState,
}

impl Default for ReadinessController {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl ReadinessController {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries, state: DeviceState::Unknown }
    }

    /// Last state reached
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Run detect, wake and mode-switch in order.
    ///
    /// Fails with [`PtuError::DeviceUnreachable`] naming the phase that gave up.
    pub fn reach_streaming_state<D>(&mut self, device: &mut D) -> Result<Ready>
    where
        D: DeviceHandle + ?Sized,
    {
        self.state = DeviceState::Unknown;

        if !device.detect() {
            error!("Camera not detected");
            return Err(self.unreachable(ReadinessPhase::Detect, 0));
        }
        self.state = DeviceState::Detected;
        debug!("Camera detected");

        let wake_attempts = self.wake(device)?;
        let mode_attempts = self.switch_mode(device)?;

        self.state = DeviceState::Streaming;
        info!(wake_attempts, mode_attempts, "Camera ready for streaming");
        Ok(Ready { wake_attempts, mode_attempts })
    }

    fn wake<D>(&mut self, device: &mut D) -> Result<u32>
    where
        D: DeviceHandle + ?Sized,
    {
        let mut budget = RetryBudget::new(self.max_retries);
        while device.is_sleeping() {
            self.state = DeviceState::Asleep;
            if !budget.try_spend() {
                error!("Camera still asleep after {} wake attempts", budget.attempts());
                return Err(self.unreachable(ReadinessPhase::Wake, budget.attempts()));
            }
            info!("Camera is asleep, waking up (attempt {}/{})", budget.attempts(), budget.max());
            device.wake_up();
        }
        self.state = DeviceState::Awake;
        Ok(budget.attempts())
    }

    fn switch_mode<D>(&mut self, device: &mut D) -> Result<u32>
    where
        D: DeviceHandle + ?Sized,
    {
        let mut budget = RetryBudget::new(self.max_retries);
        while !device.is_in_streaming_mode() {
            self.state = DeviceState::NonStreaming;
            if !budget.try_spend() {
                error!("Camera not in streaming mode after {} switch attempts", budget.attempts());
                return Err(self.unreachable(ReadinessPhase::ModeSwitch, budget.attempts()));
            }
            info!("Switching camera to streaming mode (attempt {}/{})", budget.attempts(), budget.max());
            device.switch_to_streaming_mode();
        }

        // A mode switch can re-enumerate the camera on USB.
        if budget.attempts() > 0 && !device.detect() {
            warn!("Camera not detected after mode switch; stream open may fail");
        }
        Ok(budget.attempts())
    }

    fn unreachable(&mut self, phase: ReadinessPhase, attempts: u32) -> PtuError {
        self.state = DeviceState::Unreachable;
        PtuError::DeviceUnreachable { phase, attempts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SimulatedCamera;
    use crate::test_utils::ScriptedDevice;

    #[test]
    fn budget_stops_at_max() {
        let mut budget = RetryBudget::new(2);
        assert!(budget.try_spend());
        assert!(budget.try_spend());
        assert!(budget.is_exhausted());
        assert!(!budget.try_spend());
        assert_eq!(budget.attempts(), 2);
    }

    #[test]
    fn zero_budget_is_exhausted() {
        let mut budget = RetryBudget::new(0);
        assert!(budget.is_exhausted());
        assert!(!budget.try_spend());
    }

    #[test]
    fn ready_device_needs_no_corrections() {
        let mut device = SimulatedCamera::new();
        let mut controller = ReadinessController::default();
        let ready = controller.reach_streaming_state(&mut device).unwrap();
        assert_eq!(ready, Ready { wake_attempts: 0, mode_attempts: 0 });
        assert_eq!(controller.state(), DeviceState::Streaming);
    }

    #[test]
    fn missing_device_fails_detect() {
        let mut device = ScriptedDevice::new().absent();
        let mut controller = ReadinessController::default();
        let error = controller.reach_streaming_state(&mut device).unwrap_err();
        assert!(matches!(error, PtuError::DeviceUnreachable { phase: ReadinessPhase::Detect, attempts: 0 }));
        assert_eq!(controller.state(), DeviceState::Unreachable);
        assert_eq!(device.probe().wake_calls, 0);
    }

    #[test]
    fn sleeping_four_polls_exhausts_after_three_wakes() {
        let mut device = ScriptedDevice::new().sleeping_polls(4);
        let mut controller = ReadinessController::new(3);
        let error = controller.reach_streaming_state(&mut device).unwrap_err();

        assert!(matches!(error, PtuError::DeviceUnreachable { phase: ReadinessPhase::Wake, attempts: 3 }));
        assert_eq!(device.probe().wake_calls, 3);
        assert_eq!(device.probe().mode_calls, 0);
    }

    #[test]
    fn wakes_then_switches_mode() {
        let mut device = SimulatedCamera::new().asleep(2).not_streaming(1);
        let mut controller = ReadinessController::new(3);
        let ready = controller.reach_streaming_state(&mut device).unwrap();
        assert_eq!(ready, Ready { wake_attempts: 2, mode_attempts: 1 });
    }

    #[test]
    fn mode_switch_exhaustion_names_phase() {
        let mut device = ScriptedDevice::new().non_streaming_polls(u32::MAX);
        let mut controller = ReadinessController::new(2);
        let error = controller.reach_streaming_state(&mut device).unwrap_err();
        assert!(matches!(error, PtuError::DeviceUnreachable { phase: ReadinessPhase::ModeSwitch, attempts: 2 }));
        assert_eq!(device.probe().mode_calls, 2);
        assert!(error.to_string().contains("mode-switch"));
    }

    #[test]
    fn redetects_after_mode_switch() {
        let mut device = ScriptedDevice::new().non_streaming_polls(1);
        let mut controller = ReadinessController::default();
        controller.reach_streaming_state(&mut device).unwrap();
        assert_eq!(device.probe().detect_calls, 2);
    }

    #[test]
    fn last_allowed_wake_succeeds() {
        let mut device = ScriptedDevice::new().sleeping_polls(3);
        let mut controller = ReadinessController::new(3);
        let ready = controller.reach_streaming_state(&mut device).unwrap();
        assert_eq!(ready.wake_attempts, 3);
        assert_eq!(device.probe().wake_calls, 3);
    }

    #[test]
    fn flapping_device_counts_only_corrective_attempts() {
        let mut flapping = ScriptedDevice::new().flapping();
        let ready = ReadinessController::new(3).reach_streaming_state(&mut flapping).unwrap();
        assert_eq!(ready, Ready { wake_attempts: 1, mode_attempts: 1 });

        let probe = flapping.probe();
        assert_eq!((probe.sleep_polls, probe.wake_calls), (2, 1));
        assert_eq!((probe.mode_polls, probe.mode_calls), (2, 1));

        // Same outcome as a camera that needed exactly one correction per phase.
        let mut steady = ScriptedDevice::new().sleeping_polls(1).non_streaming_polls(1);
        let steady_ready = ReadinessController::new(3).reach_streaming_state(&mut steady).unwrap();
        assert_eq!(steady_ready, ready);
        assert_eq!(steady.probe(), probe);
    }

    #[test]
    fn flapping_device_fails_with_zero_budget() {
        let mut device = ScriptedDevice::new().flapping();
        let mut controller = ReadinessController::new(0);
        let error = controller.reach_streaming_state(&mut device).unwrap_err();
        assert!(matches!(error, PtuError::DeviceUnreachable { phase: ReadinessPhase::Wake, attempts: 0 }));
        assert_eq!(device.probe().wake_calls, 0);
        assert_eq!(controller.state(), DeviceState::Unreachable);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn exhausted_budget_never_spends(max in 0u32..100, extra in 0u32..10) {
            let mut budget = RetryBudget::new(max);
            for _ in 0..max {
              prop_assert!(budget.try_spend());
            }
            for _ in 0..extra {
              prop_assert!(!budget.try_spend());
            }
            prop_assert_eq!(budget.attempts(), max);
          }

          #[test]
          fn wake_calls_never_exceed_budget(max in 0u32..8, sleeping in 0u32..16) {
            let mut device = ScriptedDevice::new().sleeping_polls(sleeping);
            let mut controller = ReadinessController::new(max);
            let result = controller.reach_streaming_state(&mut device);

            prop_assert!(device.probe().wake_calls <= max);
            if sleeping > max {
              prop_assert!(result.is_err());
              prop_assert_eq!(device.probe().wake_calls, max);
            } else {
              prop_assert!(result.is_ok());
              prop_assert_eq!(device.probe().wake_calls, sleeping);
            }
          }
        }
    }
}
