//! Host keyboard to IKBD scancode translation.
//!
//! The numeric pad is reserved for joystick emulation (8/2/4/6 for
//! directions, 0 for fire) and F12 for quitting the runner, so neither
//! appears in the table.

use winit::keyboard::KeyCode;

/// Map a physical key to an ST scancode (US positional layout).
pub fn st_scancode(code: KeyCode) -> Option<u8> {
    let scancode = match code {
        KeyCode::Escape => 0x01,
        KeyCode::Digit1 => 0x02,
        KeyCode::Digit2 => 0x03,
        KeyCode::Digit3 => 0x04,
        KeyCode::Digit4 => 0x05,
        KeyCode::Digit5 => 0x06,
        KeyCode::Digit6 => 0x07,
        KeyCode::Digit7 => 0x08,
        KeyCode::Digit8 => 0x09,
        KeyCode::Digit9 => 0x0A,
        KeyCode::Digit0 => 0x0B,
        KeyCode::Minus => 0x0C,
        KeyCode::Equal => 0x0D,
        KeyCode::Backspace => 0x0E,
        KeyCode::Tab => 0x0F,
        KeyCode::KeyQ => 0x10,
        KeyCode::KeyW => 0x11,
        KeyCode::KeyE => 0x12,
        KeyCode::KeyR => 0x13,
        KeyCode::KeyT => 0x14,
        KeyCode::KeyY => 0x15,
        KeyCode::KeyU => 0x16,
        KeyCode::KeyI => 0x17,
        KeyCode::KeyO => 0x18,
        KeyCode::KeyP => 0x19,
        KeyCode::BracketLeft => 0x1A,
        KeyCode::BracketRight => 0x1B,
        KeyCode::Enter => 0x1C,
        KeyCode::ControlLeft | KeyCode::ControlRight => 0x1D,
        KeyCode::KeyA => 0x1E,
        KeyCode::KeyS => 0x1F,
        KeyCode::KeyD => 0x20,
        KeyCode::KeyF => 0x21,
        KeyCode::KeyG => 0x22,
        KeyCode::KeyH => 0x23,
        KeyCode::KeyJ => 0x24,
        KeyCode::KeyK => 0x25,
        KeyCode::KeyL => 0x26,
        KeyCode::Semicolon => 0x27,
        KeyCode::Quote => 0x28,
        KeyCode::Backquote => 0x29,
        KeyCode::ShiftLeft => 0x2A,
        KeyCode::Backslash => 0x2B,
        KeyCode::KeyZ => 0x2C,
        KeyCode::KeyX => 0x2D,
        KeyCode::KeyC => 0x2E,
        KeyCode::KeyV => 0x2F,
        KeyCode::KeyB => 0x30,
        KeyCode::KeyN => 0x31,
        KeyCode::KeyM => 0x32,
        KeyCode::Comma => 0x33,
        KeyCode::Period => 0x34,
        KeyCode::Slash => 0x35,
        KeyCode::ShiftRight => 0x36,
        KeyCode::AltLeft | KeyCode::AltRight => 0x38,
        KeyCode::Space => 0x39,
        KeyCode::CapsLock => 0x3A,
        KeyCode::F1 => 0x3B,
        KeyCode::F2 => 0x3C,
        KeyCode::F3 => 0x3D,
        KeyCode::F4 => 0x3E,
        KeyCode::F5 => 0x3F,
        KeyCode::F6 => 0x40,
        KeyCode::F7 => 0x41,
        KeyCode::F8 => 0x42,
        KeyCode::F9 => 0x43,
        KeyCode::F10 => 0x44,
        KeyCode::Home => 0x47,
        KeyCode::ArrowUp => 0x48,
        KeyCode::ArrowLeft => 0x4B,
        KeyCode::ArrowRight => 0x4D,
        KeyCode::ArrowDown => 0x50,
        KeyCode::Insert => 0x52,
        KeyCode::Delete => 0x53,
        // Help and Undo, the two ST-specific keys.
        KeyCode::F11 => 0x62,
        KeyCode::PageUp => 0x61,
        _ => return None,
    };
    Some(scancode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_keys_map_to_st_positions() {
        assert_eq!(st_scancode(KeyCode::Escape), Some(0x01));
        assert_eq!(st_scancode(KeyCode::KeyQ), Some(0x10));
        assert_eq!(st_scancode(KeyCode::KeyA), Some(0x1E));
        assert_eq!(st_scancode(KeyCode::Space), Some(0x39));
        assert_eq!(st_scancode(KeyCode::Enter), Some(0x1C));
    }

    #[test]
    fn joystick_keys_stay_unmapped() {
        assert_eq!(st_scancode(KeyCode::Numpad8), None);
        assert_eq!(st_scancode(KeyCode::Numpad0), None);
        assert_eq!(st_scancode(KeyCode::F12), None);
    }
}
