//! IO device interface
use std::collections::VecDeque;

use crate::{constants::*, error::Chip8Error};

/// Screen output the framebuffer is flushed to after a draw.
pub trait Display {
    /// Turn a single pixel on or off. Must be idempotent.
    fn set_pixel(&mut self, x: usize, y: usize, on: bool);

    /// Blit the display buffer to screen output.
    ///
    /// Defaults to setting every pixel individually.
    fn flush(&mut self, display: &Framebuffer) {
        for (i, on) in display.iter().enumerate() {
            self.set_pixel(i % DISPLAY_WIDTH, i / DISPLAY_WIDTH, *on);
        }
    }
}

/// The sound buzzer. Both operations must be idempotent.
pub trait Audio {
    /// Begin a continuous tone.
    fn start(&mut self);

    /// End the tone.
    fn stop(&mut self);
}

/// Source of keypad events, polled by the scheduler at each yield point.
pub trait Input {
    fn poll(&mut self) -> Option<KeyEvent>;
}

/// Raw keypad event from the host.
///
/// The index is not validated until the event reaches the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Down(u8),
    Up(u8),
}

/// Queue of events buffered by the host.
impl Input for VecDeque<KeyEvent> {
    fn poll(&mut self) -> Option<KeyEvent> {
        self.pop_front()
    }
}

/// Devices that discard all output and never produce input.
#[derive(Debug, Default, Clone, Copy)]
pub struct Headless;

impl Display for Headless {
    fn set_pixel(&mut self, _x: usize, _y: usize, _on: bool) {}

    fn flush(&mut self, _display: &Framebuffer) {}
}

impl Audio for Headless {
    fn start(&mut self) {}

    fn stop(&mut self) {}
}

impl Input for Headless {
    fn poll(&mut self) -> Option<KeyEvent> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyCode {
    Key0 = 0,
    Key1,
    Key2,
    Key3,
    Key4,
    Key5,
    Key6,
    Key7,
    Key8,
    Key9,
    KeyA,
    KeyB,
    KeyC,
    KeyD,
    KeyE,
    KeyF = 0xF,
}

impl KeyCode {
    pub const ALL: [KeyCode; KEY_COUNT as usize] = [
        Self::Key0,
        Self::Key1,
        Self::Key2,
        Self::Key3,
        Self::Key4,
        Self::Key5,
        Self::Key6,
        Self::Key7,
        Self::Key8,
        Self::Key9,
        Self::KeyA,
        Self::KeyB,
        Self::KeyC,
        Self::KeyD,
        Self::KeyE,
        Self::KeyF,
    ];

    #[inline(always)]
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for KeyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let key_id = self.as_u8();
        write!(f, "k{key_id:x}")
    }
}

impl TryFrom<u8> for KeyCode {
    type Error = Chip8Error;

    fn try_from(key_id: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(key_id as usize)
            .copied()
            .ok_or(Chip8Error::InvalidKey(key_id))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Pixels(Vec<(usize, usize, bool)>);

    impl Display for Pixels {
        fn set_pixel(&mut self, x: usize, y: usize, on: bool) {
            self.0.push((x, y, on));
        }
    }

    #[test]
    fn test_keycode_range() {
        assert_eq!(KeyCode::try_from(0).unwrap(), KeyCode::Key0);
        assert_eq!(KeyCode::try_from(0xF).unwrap(), KeyCode::KeyF);
        assert!(matches!(
            KeyCode::try_from(16),
            Err(Chip8Error::InvalidKey(16))
        ));
        assert_eq!(KeyCode::KeyA.to_string(), "ka");
    }

    #[test]
    fn test_default_flush_sets_every_pixel() {
        let mut buffer = [false; DISPLAY_BUFFER_SIZE];
        buffer[DISPLAY_WIDTH + 3] = true;

        let mut pixels = Pixels(Vec::new());
        pixels.flush(&buffer);

        assert_eq!(pixels.0.len(), DISPLAY_BUFFER_SIZE);
        assert_eq!(pixels.0[0], (0, 0, false));
        assert_eq!(pixels.0[DISPLAY_WIDTH + 3], (3, 1, true));
        assert_eq!(pixels.0[DISPLAY_BUFFER_SIZE - 1], (63, 31, false));
    }
}
