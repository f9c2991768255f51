//! LED device capability: the only way the crate touches hardware.
//!
//! The display thread depends on `LedDevice`, never on a concrete driver.
//! Two implementations exist:
//! - `ws281x::Ws281xDevice` (feature `hardware`) drives a real strip
//! - `MockDevice` keeps everything in memory and records recent rendered frames
//!
//! ## Rust concepts
//! - Traits as seams between platform code and logic
//! - `Arc<Mutex<T>>` so a test can keep inspecting a device it handed away

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors a device can report. Only `Init` is fatal to the process.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("LED device initialization failed: {0}")]
    Init(String),
    #[error("LED render failed: {0}")]
    Render(String),
    #[error("LED wait failed: {0}")]
    Wait(String),
    #[error("pixel {index} is outside the device's {len} LEDs")]
    OutOfRange { index: usize, len: usize },
    #[error("LED device already released")]
    Released,
}

/// Capability contract for an addressable LED strip.
///
/// Raw colors are 24-bit `0x00RRGGBB` values, see `Color::to_raw`.
pub trait LedDevice {
    fn init(&mut self) -> Result<(), DeviceError>;

    /// Mutable raw color buffer for `channel`, indexed `0..N`.
    fn leds_mut(&mut self, channel: usize) -> &mut [u32];

    /// Takes effect on the next `render`.
    fn set_brightness(&mut self, channel: usize, level: u8);

    /// Push the buffered colors to the LEDs.
    fn render(&mut self) -> Result<(), DeviceError>;

    /// Block until the last render has been clocked out.
    fn wait(&mut self) -> Result<(), DeviceError>;

    /// Release hardware resources. The device is unusable afterwards.
    fn fini(&mut self);
}

// ── Mock ─────────────────────────────────────────────────────────────

/// A frame as it would have appeared on the strip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub pixels: Vec<u32>,
    pub brightness: u8,
}

/// How many recent frames a `MockDevice` keeps. Older ones are dropped so
/// a long `--dry-run` stays bounded.
pub const FRAME_HISTORY: usize = 64;

/// Everything the mock has seen, shared between the device and its probes.
#[derive(Debug, Default)]
struct MockLog {
    frames: VecDeque<Frame>,
    frames_rendered: usize,
    brightness: u8,
    initialized: bool,
    finalized: bool,
    render_calls: usize,
}

/// In-memory device for tests and `--dry-run`.
///
/// Render calls can be told to fail by call number so partial-frame
/// failures can be exercised.
#[derive(Debug)]
pub struct MockDevice {
    leds: Vec<u32>,
    brightness: u8,
    fail_init: bool,
    failing_renders: Vec<usize>,
    log: Arc<Mutex<MockLog>>,
}

impl MockDevice {
    pub fn new(led_count: usize) -> Self {
        Self {
            leds: vec![0; led_count],
            brightness: 0,
            fail_init: false,
            failing_renders: Vec::new(),
            log: Arc::new(Mutex::new(MockLog::default())),
        }
    }

    /// A device whose `init` always fails.
    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Fail the given render calls (0-based, counted from device creation).
    pub fn failing_renders(mut self, calls: &[usize]) -> Self {
        self.failing_renders = calls.to_vec();
        self
    }

    /// A handle that stays valid after the device is moved into the engine.
    pub fn probe(&self) -> MockProbe {
        MockProbe {
            log: self.log.clone(),
        }
    }
}

impl LedDevice for MockDevice {
    fn init(&mut self) -> Result<(), DeviceError> {
        if self.fail_init {
            return Err(DeviceError::Init("mock configured to fail".to_string()));
        }
        self.log.lock().unwrap().initialized = true;
        Ok(())
    }

    fn leds_mut(&mut self, _channel: usize) -> &mut [u32] {
        &mut self.leds
    }

    fn set_brightness(&mut self, _channel: usize, level: u8) {
        self.brightness = level;
    }

    fn render(&mut self) -> Result<(), DeviceError> {
        let mut log = self.log.lock().unwrap();
        let call = log.render_calls;
        log.render_calls += 1;

        if self.failing_renders.contains(&call) {
            return Err(DeviceError::Render(format!("mock failure on call {call}")));
        }

        log.brightness = self.brightness;
        if log.frames.len() == FRAME_HISTORY {
            log.frames.pop_front();
        }
        log.frames.push_back(Frame {
            pixels: self.leds.clone(),
            brightness: self.brightness,
        });
        log.frames_rendered += 1;
        Ok(())
    }

    fn wait(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn fini(&mut self) {
        self.log.lock().unwrap().finalized = true;
    }
}

/// Read-only view of a `MockDevice`'s history.
#[derive(Clone, Debug)]
pub struct MockProbe {
    log: Arc<Mutex<MockLog>>,
}

impl MockProbe {
    /// The last `FRAME_HISTORY` successfully rendered frames, oldest first.
    pub fn frames(&self) -> Vec<Frame> {
        self.log.lock().unwrap().frames.iter().cloned().collect()
    }

    /// Successful renders since creation, including frames no longer kept.
    pub fn frame_count(&self) -> usize {
        self.log.lock().unwrap().frames_rendered
    }

    /// The most recent successful frame, i.e. what the strip shows.
    pub fn last_frame(&self) -> Option<Frame> {
        self.log.lock().unwrap().frames.back().cloned()
    }

    /// All render attempts, failed ones included.
    pub fn render_calls(&self) -> usize {
        self.log.lock().unwrap().render_calls
    }

    /// Brightness as of the last successful render.
    pub fn brightness(&self) -> u8 {
        self.log.lock().unwrap().brightness
    }

    pub fn initialized(&self) -> bool {
        self.log.lock().unwrap().initialized
    }

    pub fn finalized(&self) -> bool {
        self.log.lock().unwrap().finalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn mock_records_rendered_frames() {
        let mut dev = MockDevice::new(3);
        let probe = dev.probe();

        dev.init().unwrap();
        dev.set_brightness(0, 40);
        dev.leds_mut(0)[1] = 0x00ff_0000;
        dev.render().unwrap();

        assert!(probe.initialized());
        assert_eq!(
            probe.last_frame(),
            Some(Frame {
                pixels: vec![0, 0x00ff_0000, 0],
                brightness: 40
            })
        );
    }

    #[test]
    fn brightness_only_shows_after_render() {
        let mut dev = MockDevice::new(1);
        let probe = dev.probe();
        dev.render().unwrap();
        dev.set_brightness(0, 99);

        assert_eq!(probe.brightness(), 0);
        dev.render().unwrap();
        assert_eq!(probe.brightness(), 99);
    }

    #[test]
    fn failing_renders_are_counted_but_not_recorded() {
        let mut dev = MockDevice::new(1).failing_renders(&[1]);
        let probe = dev.probe();

        assert!(dev.render().is_ok());
        assert!(matches!(dev.render(), Err(DeviceError::Render(_))));
        assert!(dev.render().is_ok());

        assert_eq!(probe.render_calls(), 3);
        assert_eq!(probe.frame_count(), 2);
    }

    #[test]
    fn history_keeps_only_recent_frames() {
        let mut dev = MockDevice::new(1);
        let probe = dev.probe();

        for i in 0..(FRAME_HISTORY as u32 + 10) {
            dev.leds_mut(0)[0] = i;
            dev.render().unwrap();
        }

        let frames = probe.frames();
        assert_eq!(frames.len(), FRAME_HISTORY);
        assert_eq!(frames[0].pixels, vec![10]);
        assert_eq!(probe.frame_count(), FRAME_HISTORY + 10);
        assert_eq!(probe.last_frame().unwrap().pixels, vec![FRAME_HISTORY as u32 + 9]);
    }

    #[test]
    fn failing_init() {
        let mut dev = MockDevice::new(1).failing_init();
        assert!(matches!(dev.init(), Err(DeviceError::Init(_))));
        assert!(!dev.probe().initialized());
    }

    #[test]
    fn fini_is_observable() {
        let mut dev = MockDevice::new(1);
        let probe = dev.probe();
        dev.fini();
        assert!(probe.finalized());
    }
}
