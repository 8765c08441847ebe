//! Tri-colour status LED
//!
//! Write-only: a pin that fails to switch is ignored, the indicator never
//! affects the cycle outcome.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use serde::{Deserialize, Serialize};

/// Flash pattern timing for the end-of-cycle signals.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashTiming {
    pub flashes: u8,
    pub on_ms: u32,
    pub off_ms: u32,
}

impl Default for FlashTiming {
    fn default() -> Self {
        Self {
            flashes: 3,
            on_ms: 125,
            off_ms: 75,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colour {
    Off,
    Red,
    Green,
    Blue,
    Yellow,
    Magenta,
}

impl Colour {
    /// Red, green and blue channel states.
    const fn channels(self) -> (bool, bool, bool) {
        match self {
            Self::Off => (false, false, false),
            Self::Red => (true, false, false),
            Self::Green => (false, true, false),
            Self::Blue => (false, false, true),
            Self::Yellow => (true, true, false),
            Self::Magenta => (true, false, true),
        }
    }
}

/// Operational states shown on the LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Steady yellow.
    Waking,
    /// Steady blue.
    Acquiring,
    /// Steady magenta.
    Logging,
    /// Green flashes.
    Success,
    /// Red flashes.
    Fault,
    /// Alternating red and blue flashes: one peripheral keeps failing.
    Escalated,
    Sleeping,
}

pub struct StatusIndicator<P> {
    red: P,
    green: P,
    blue: P,
    timing: FlashTiming,
    colour: Colour,
}

impl<P: OutputPin> StatusIndicator<P> {
    pub fn new(red: P, green: P, blue: P) -> Self {
        Self {
            red,
            green,
            blue,
            timing: FlashTiming::default(),
            colour: Colour::Off,
        }
    }

    pub fn set_timing(&mut self, timing: FlashTiming) {
        self.timing = timing;
    }

    pub fn colour(&self) -> Colour {
        self.colour
    }

    pub fn show<D: DelayNs>(&mut self, signal: Signal, delay: &mut D) {
        match signal {
            Signal::Waking => self.set(Colour::Yellow),
            Signal::Acquiring => self.set(Colour::Blue),
            Signal::Logging => self.set(Colour::Magenta),
            Signal::Sleeping => self.set(Colour::Off),
            Signal::Success => self.flash(&[Colour::Green], delay),
            Signal::Fault => self.flash(&[Colour::Red], delay),
            Signal::Escalated => self.flash(&[Colour::Red, Colour::Blue], delay),
        }
    }

    fn flash<D: DelayNs>(&mut self, colours: &[Colour], delay: &mut D) {
        let timing = self.timing;
        for _ in 0..timing.flashes {
            for colour in colours {
                self.set(*colour);
                delay.delay_ms(timing.on_ms);
                self.set(Colour::Off);
                delay.delay_ms(timing.off_ms);
            }
        }
    }

    fn set(&mut self, colour: Colour) {
        let (r, g, b) = colour.channels();
        drive(&mut self.red, r);
        drive(&mut self.green, g);
        drive(&mut self.blue, b);
        self.colour = colour;
    }
}

fn drive<P: OutputPin>(pin: &mut P, on: bool) {
    let _ = if on { pin.set_high() } else { pin.set_low() };
}
