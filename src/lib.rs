//! Live aviation-weather status board on an addressable LED strip.
//!
//! Each LED stands for one weather-reporting station and shows that
//! station's current flight category. The crate is the runtime that keeps
//! the strip in step with incoming weather and daylight:
//! - `render`: the display thread that exclusively owns the LED device
//! - `weather`: the METAR poller and the flight-category color policy
//! - `dimmer`: sunrise/sunset driven brightness control
//! - `shutdown`: signal handling and ordered worker shutdown
//!
//! Shared value types (`Color`) live here so every module, and the tests,
//! can use them without the hardware crate.

pub mod config;
pub mod device;
pub mod dimmer;
pub mod render;
pub mod shutdown;
pub mod sun;
pub mod weather;
#[cfg(feature = "hardware")]
pub mod ws281x;

use thiserror::Error;

// ── Color ──────────────────────────────────────────────────────────

/// Our own color type, decoupled from the hardware crate.
///
/// The alpha channel is carried along for completeness but the strip only
/// understands 24-bit RGB, so `to_raw` drops it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

/// Returned when a string is not a `#RRGGBB` or `#RGB` hex color.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid hex color {0:?}: expected #RRGGBB or #RGB")]
pub struct ColorError(pub String);

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);

    /// Opaque color from RGB components.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 0xff }
    }

    /// Parse `#RRGGBB` or the `#RGB` shorthand (each digit is scaled by 17,
    /// so `f` becomes `ff`).
    ///
    /// # Rust concept: working on bytes
    /// Indexing a `&str` by position is not allowed because of UTF-8, so we
    /// look at `as_bytes()`. Anything non-ASCII simply fails the hex check.
    pub fn from_hex(s: &str) -> Result<Self, ColorError> {
        let invalid = || ColorError(s.to_string());

        let digits = s.as_bytes().strip_prefix(b"#").ok_or_else(invalid)?;
        let nibble = |b: u8| (b as char).to_digit(16).map(|d| d as u8).ok_or_else(invalid);

        match digits.len() {
            6 => {
                let byte = |i: usize| {
                    Ok::<u8, ColorError>(nibble(digits[i])? << 4 | nibble(digits[i + 1])?)
                };
                Ok(Self::new(byte(0)?, byte(2)?, byte(4)?))
            }
            3 => Ok(Self::new(
                nibble(digits[0])? * 17,
                nibble(digits[1])? * 17,
                nibble(digits[2])? * 17,
            )),
            _ => Err(invalid()),
        }
    }

    /// Pack into the `0x00RRGGBB` layout the strip driver expects.
    pub const fn to_raw(self) -> u32 {
        (self.r as u32) << 16 | (self.g as u32) << 8 | self.b as u32
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

/// One desired LED color, produced by the weather poller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelUpdate {
    pub index: usize,
    pub color: Color,
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn color_new_is_opaque() {
        let c = Color::new(10, 20, 30);
        assert_eq!(c, Color { r: 10, g: 20, b: 30, a: 255 });
    }

    #[test]
    fn default_color_is_black() {
        assert_eq!(Color::default(), Color::new(0, 0, 0));
    }

    #[rstest]
    #[case("#ff0000", Color::new(255, 0, 0))]
    #[case("#f00", Color::new(255, 0, 0))]
    #[case("#32CD32", Color::new(50, 205, 50))]
    #[case("#0a0b0c", Color::new(10, 11, 12))]
    #[case("#abc", Color::new(0xaa, 0xbb, 0xcc))]
    fn from_hex_parses(#[case] input: &str, #[case] expected: Color) {
        assert_eq!(Color::from_hex(input), Ok(expected));
    }

    #[rstest]
    #[case("ff0000")]
    #[case("#ze0000")]
    #[case("#ff00")]
    #[case("#")]
    #[case("")]
    #[case("#ff00000")]
    #[case("#éé")]
    fn from_hex_rejects(#[case] input: &str) {
        assert_eq!(Color::from_hex(input), Err(ColorError(input.to_string())));
    }

    #[test]
    fn from_hex_error_names_the_input() {
        let err = Color::from_hex("#zz").unwrap_err();
        assert!(err.to_string().contains("#zz"));
    }

    #[rstest]
    #[case(Color::new(0xff, 0, 0), 0x00ff_0000)]
    #[case(Color::new(0, 0xff, 0), 0x0000_ff00)]
    #[case(Color::new(0x12, 0x34, 0x56), 0x0012_3456)]
    #[case(Color::BLACK, 0)]
    fn to_raw_packs_rgb(#[case] color: Color, #[case] raw: u32) {
        assert_eq!(color.to_raw(), raw);
    }

    #[test]
    fn to_raw_ignores_alpha() {
        let c = Color { a: 0, ..Color::new(1, 2, 3) };
        assert_eq!(c.to_raw(), Color::new(1, 2, 3).to_raw());
    }
}
