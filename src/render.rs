//! Display thread: owns the LED device and applies commands from a channel.
//!
//! The WS281x C library is not thread-safe, so every device operation
//! happens on one dedicated thread. Producers (the weather poller and the
//! dimmer run on tokio) talk to it by sending `DisplayCommand` values
//! through an `mpsc` channel. Being the only writer is what keeps hardware
//! state race-free; there are no locks around the device.
//!
//! ## Rust concepts
//! - `std::sync::mpsc` channels between the async and sync worlds
//! - `recv_timeout()` to wait for a command *or* the next flush deadline
//! - Generic structs (`DisplayEngine<D: LedDevice>`) for swapping the device
//! - `std::mem::take` to drain a collection without cloning it

use crate::device::{DeviceError, LedDevice};
use crate::shutdown::WorkerHandle;
use crate::{Color, PixelUpdate};
use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::Span;

/// The strip is wired to the first PWM channel.
const CHANNEL: usize = 0;

// ── Commands ─────────────────────────────────────────────────────────

/// Messages the display thread understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayCommand {
    /// Buffer a new color for one LED until the next flush
    Pixel(PixelUpdate),
    /// Set device brightness; takes effect on the next render
    Brightness(u8),
    /// Re-send every LED from the current display state
    Refresh,
    /// Blank the strip, release the device and exit the thread
    Stop,
}

/// Lifecycle of the engine. Only `stop()` moves it forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnginePhase {
    Running,
    Draining,
    Closed,
}

// ── Engine ───────────────────────────────────────────────────────────

/// Debounced pixel pipeline in front of an `LedDevice`.
///
/// `state` is what the strip last successfully rendered; `pending` holds
/// at most one desired color per LED until the next `tick()`.
pub struct DisplayEngine<D: LedDevice> {
    device: Option<D>,
    state: Vec<Color>,
    pending: BTreeMap<usize, Color>,
    brightness: u8,
    phase: EnginePhase,
}

impl<D: LedDevice> DisplayEngine<D> {
    /// Initialize the device, set its brightness and blank the strip.
    ///
    /// An init failure is returned to the caller; it is the one device
    /// error that is fatal.
    pub fn new(mut device: D, led_count: usize, brightness: u8) -> Result<Self, DeviceError> {
        device.init()?;
        device.set_brightness(CHANNEL, brightness);

        let mut engine = Self {
            device: Some(device),
            state: vec![Color::BLACK; led_count],
            pending: BTreeMap::new(),
            brightness,
            phase: EnginePhase::Running,
        };
        engine.blank();
        Ok(engine)
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    /// Colors as last rendered, indexed by LED.
    pub fn state(&self) -> &[Color] {
        &self.state
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    /// Buffer `color` for LED `index`, replacing any earlier pending color.
    ///
    /// Returns `false` when the update is rejected (index out of range, or
    /// the engine is no longer running). An update matching what the strip
    /// already shows cancels any pending change for that LED.
    pub fn enqueue(&mut self, index: usize, color: Color) -> bool {
        if self.phase != EnginePhase::Running {
            tracing::debug!(index, "Display not running, dropping update");
            return false;
        }

        let Some(current) = self.state.get(index) else {
            tracing::warn!(
                index,
                led_count = self.state.len(),
                "Ignoring update for out-of-range LED"
            );
            return false;
        };

        if *current == color {
            self.pending.remove(&index);
        } else {
            self.pending.insert(index, color);
        }
        true
    }

    /// Flush pending updates, one render per LED. Returns how many landed.
    ///
    /// A failed pixel is logged and left out of `state`; the rest of the
    /// batch still goes out.
    pub fn tick(&mut self) -> usize {
        if self.phase != EnginePhase::Running || self.pending.is_empty() {
            return 0;
        }

        tracing::debug!(leds = self.pending.len(), "Updating display");
        let mut applied = 0;
        for (index, color) in std::mem::take(&mut self.pending) {
            match self.write_pixel(index, color) {
                Ok(()) => {
                    self.state[index] = color;
                    applied += 1;
                }
                Err(e) => tracing::error!(pixel = index, "Issue setting pixel: {}", e),
            }
        }
        applied
    }

    /// Re-render every LED from `state`, e.g. after a brightness change.
    pub fn refresh(&mut self) -> usize {
        if self.phase != EnginePhase::Running {
            return 0;
        }

        let mut rendered = 0;
        for index in 0..self.state.len() {
            match self.write_pixel(index, self.state[index]) {
                Ok(()) => rendered += 1,
                Err(e) => tracing::error!(pixel = index, "Issue refreshing pixel: {}", e),
            }
        }
        rendered
    }

    /// Update the brightness register. Returns `true` if the level changed.
    pub fn apply_brightness(&mut self, level: u8) -> bool {
        if self.phase != EnginePhase::Running || level == self.brightness {
            return false;
        }

        if let Some(device) = self.device.as_mut() {
            device.set_brightness(CHANNEL, level);
        }
        tracing::info!(from = self.brightness, to = level, "Brightness changed");
        self.brightness = level;
        true
    }

    /// Blank the strip and release the device. Later calls do nothing.
    pub fn stop(&mut self) {
        if self.phase != EnginePhase::Running {
            return;
        }

        self.phase = EnginePhase::Draining;
        self.pending.clear();
        self.state.fill(Color::BLACK);
        self.blank();

        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.wait() {
                tracing::warn!("Issue waiting for final render: {}", e);
            }
            device.fini();
        }
        self.phase = EnginePhase::Closed;
    }

    fn write_pixel(&mut self, index: usize, color: Color) -> Result<(), DeviceError> {
        let device = self.device.as_mut().ok_or(DeviceError::Released)?;
        let leds = device.leds_mut(CHANNEL);
        let len = leds.len();
        let slot = leds
            .get_mut(index)
            .ok_or(DeviceError::OutOfRange { index, len })?;

        let shown = *slot;
        *slot = color.to_raw();
        let result = device.render();
        if result.is_err() {
            // A rejected color must not ride along with the next render.
            device.leds_mut(CHANNEL)[index] = shown;
        }
        result
    }

    /// Zero every LED and render once.
    fn blank(&mut self) {
        let Some(device) = self.device.as_mut() else {
            return;
        };

        device.leds_mut(CHANNEL).fill(0);
        if let Err(e) = device.render() {
            tracing::error!("Issue clearing LEDs: {}", e);
        }
    }
}

// ── Display thread ───────────────────────────────────────────────────

/// Handle to a running display thread.
pub struct DisplayHandle {
    commands: Sender<DisplayCommand>,
    done: oneshot::Receiver<()>,
}

impl DisplayHandle {
    /// A sender for producers. The thread exits once every sender is gone.
    pub fn sender(&self) -> Sender<DisplayCommand> {
        self.commands.clone()
    }

    /// Turn this into a shutdown-coordinator worker. Stopping sends
    /// `DisplayCommand::Stop`, so anything queued before it is handled first.
    pub fn into_worker(self) -> WorkerHandle {
        let commands = self.commands;
        WorkerHandle::new(
            "display",
            move || {
                let _ = commands.send(DisplayCommand::Stop);
            },
            self.done,
        )
    }
}

/// Start the display thread.
///
/// The device is constructed *on* the display thread (the hardware handle
/// is not `Send`), and this call blocks until it has been initialized, so
/// an init failure comes back here before any other worker starts.
pub fn spawn_display<D, F>(
    make_device: F,
    led_count: usize,
    brightness: u8,
    flush_period: Duration,
    span: Span,
) -> Result<DisplayHandle, DeviceError>
where
    D: LedDevice,
    F: FnOnce() -> D + Send + 'static,
{
    let (commands, rx) = mpsc::channel();
    let (ready_tx, ready_rx) = mpsc::sync_channel(1);
    let (done_tx, done) = oneshot::channel();

    thread::Builder::new()
        .name("display".to_string())
        .spawn(move || {
            let _entered = span.enter();
            let engine = match DisplayEngine::new(make_device(), led_count, brightness) {
                Ok(engine) => {
                    let _ = ready_tx.send(Ok(()));
                    engine
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            render_loop(engine, rx, flush_period);
            let _ = done_tx.send(());
        })
        .map_err(|e| DeviceError::Init(format!("could not spawn display thread: {e}")))?;

    ready_rx
        .recv()
        .map_err(|_| DeviceError::Init("display thread exited during startup".to_string()))??;

    Ok(DisplayHandle { commands, done })
}

/// Main display loop: apply commands as they arrive and flush on a fixed
/// period.
///
/// Returns after `Stop` (or when every sender is dropped), with the strip
/// blanked and the device released.
pub fn render_loop<D: LedDevice>(
    mut engine: DisplayEngine<D>,
    rx: Receiver<DisplayCommand>,
    flush_period: Duration,
) {
    tracing::info!(
        leds = engine.state().len(),
        period_ms = flush_period.as_millis() as u64,
        "Display thread started"
    );

    let mut next_flush = Instant::now() + flush_period;

    loop {
        // Check the deadline first so a busy channel cannot starve flushes.
        let now = Instant::now();
        if now >= next_flush {
            engine.tick();
            next_flush += flush_period;
            if next_flush <= now {
                next_flush = now + flush_period;
            }
            continue;
        }

        match rx.recv_timeout(next_flush - now) {
            Ok(DisplayCommand::Pixel(update)) => {
                engine.enqueue(update.index, update.color);
            }
            Ok(DisplayCommand::Brightness(level)) => {
                if engine.apply_brightness(level) {
                    engine.refresh();
                }
            }
            Ok(DisplayCommand::Refresh) => {
                engine.refresh();
            }
            Ok(DisplayCommand::Stop) => {
                tracing::info!("Display stop requested");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                tracing::info!("Display channel closed, shutting down.");
                break;
            }
        }
    }

    engine.stop();
    tracing::info!("Display stopped, LEDs cleared");
}

// ── Tests ──────────────────────────────────────────────────────────
