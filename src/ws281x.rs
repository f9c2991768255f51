//! WS281x strip driver backed by the `rs_ws281x` C library bindings.
//!
//! The C library is not thread-safe, so a `Ws281xDevice` must be created and
//! used on the display thread only. `init` builds the controller (which maps
//! the PWM/DMA hardware) and `fini` drops it.

use crate::config::StripConfig;
use crate::device::{DeviceError, LedDevice};
use rs_ws281x::{ChannelBuilder, Controller, ControllerBuilder, StripType};

pub struct Ws281xDevice {
    strip: StripConfig,
    led_count: usize,
    brightness: u8,
    controller: Option<Controller>,
    // Mirror of the controller's buffer in 0x00RRGGBB form.
    raw: Vec<u32>,
}

impl Ws281xDevice {
    pub fn new(strip: StripConfig, led_count: usize, brightness: u8) -> Self {
        Self {
            strip,
            led_count,
            brightness,
            controller: None,
            raw: vec![0; led_count],
        }
    }
}

impl LedDevice for Ws281xDevice {
    fn init(&mut self) -> Result<(), DeviceError> {
        let count = i32::try_from(self.led_count)
            .map_err(|_| DeviceError::Init(format!("{} LEDs is too many", self.led_count)))?;

        let controller = ControllerBuilder::new()
            .freq(self.strip.frequency_hz)
            .dma(self.strip.dma)
            .channel(
                0,
                ChannelBuilder::new()
                    .pin(self.strip.gpio_pin)
                    .count(count)
                    .strip_type(StripType::Ws2811Rgb)
                    .brightness(self.brightness)
                    .build(),
            )
            .build()
            .map_err(|e| DeviceError::Init(e.to_string()))?;

        tracing::info!(
            pin = self.strip.gpio_pin,
            dma = self.strip.dma,
            leds = self.led_count,
            "WS281x controller ready"
        );
        self.controller = Some(controller);
        Ok(())
    }

    fn leds_mut(&mut self, _channel: usize) -> &mut [u32] {
        &mut self.raw
    }

    fn set_brightness(&mut self, channel: usize, level: u8) {
        self.brightness = level;
        if let Some(controller) = self.controller.as_mut() {
            controller.set_brightness(channel, level);
        }
    }

    fn render(&mut self) -> Result<(), DeviceError> {
        let controller = self.controller.as_mut().ok_or(DeviceError::Released)?;

        // rs_ws281x stores each LED as little-endian [B, G, R, W].
        for (led, raw) in controller.leds_mut(0).iter_mut().zip(&self.raw) {
            *led = raw.to_le_bytes();
        }

        controller
            .render()
            .map_err(|e| DeviceError::Render(e.to_string()))
    }

    fn wait(&mut self) -> Result<(), DeviceError> {
        let controller = self.controller.as_mut().ok_or(DeviceError::Released)?;
        controller.wait().map_err(|e| DeviceError::Wait(e.to_string()))
    }

    fn fini(&mut self) {
        // Dropping the controller calls ws2811_fini.
        if self.controller.take().is_some() {
            tracing::info!("WS281x controller released");
        }
    }
}
