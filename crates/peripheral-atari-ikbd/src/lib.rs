//! Atari ST keyboard ACIA and the IKBD controller behind it.
//!
//! The 6850-style ACIA at 0xFFFC00/0xFFFC02 bridges the CPU to the
//! intelligent keyboard at 7812.5 baud, which works out to one byte per
//! 10,240 CPU cycles on an 8 MHz machine. The IKBD itself is a
//! microcontroller that scans the keyboard, tracks the mouse and
//! joysticks, and answers a small command protocol sent through the same
//! data register.
//!
//! This model keeps the serial line honest at byte granularity: bytes
//! from the IKBD wait in a transmit queue, the ACIA latches one byte at a
//! time at line rate, and the latch exerts back-pressure on the queue
//! until the CPU reads the data register.

use std::collections::VecDeque;

/// CPU cycles per serial byte: 8 MHz / 7812.5 baud, 10 bits per frame.
pub const CYCLES_PER_BYTE: u32 = 10_240;

// ACIA status register bits.
const STATUS_RDRF: u8 = 0x01;
const STATUS_TDRE: u8 = 0x02;
const STATUS_FRAMING_ERROR: u8 = 0x10;
const STATUS_OVERRUN: u8 = 0x20;
const STATUS_IRQ: u8 = 0x80;

/// Mouse reporting mode selected by IKBD commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MouseMode {
    Off,
    Relative,
    Absolute,
    Keycode,
}

/// Keyboard ACIA + IKBD controller.
pub struct AciaIkbd {
    status: u8,
    control: u8,
    rx_latch: u8,
    rx_latched: bool,
    queue: VecDeque<u8>,
    cycles_until_next_byte: i64,

    command: Vec<u8>,
    mouse_mode: MouseMode,
    joystick_enabled: bool,
    mouse_buttons: u8,
    joy_state: u8,
    sensitivity_x: i32,
    sensitivity_y: i32,
}

impl AciaIkbd {
    pub fn new() -> Self {
        let mut acia = Self {
            status: 0,
            control: 0,
            rx_latch: 0,
            rx_latched: false,
            queue: VecDeque::new(),
            cycles_until_next_byte: 0,
            command: Vec::new(),
            mouse_mode: MouseMode::Relative,
            joystick_enabled: true,
            mouse_buttons: 0,
            joy_state: 0,
            sensitivity_x: 2,
            sensitivity_y: 2,
        };
        acia.reset();
        acia
    }

    /// ACIA master reset. Leaves the IKBD-side input state alone.
    pub fn reset(&mut self) {
        self.status = STATUS_TDRE;
        self.rx_latch = 0;
        self.rx_latched = false;
        self.queue.clear();
        self.cycles_until_next_byte = 0;
        self.command.clear();
    }

    /// Interrupt line state (true = asserted, i.e. GPIP4 pulled low).
    pub fn irq_asserted(&self) -> bool {
        self.status & STATUS_IRQ != 0
    }

    pub fn read_status(&self) -> u8 {
        self.status
    }

    /// Data register read: hands over the latch and releases the line.
    pub fn read_data(&mut self) -> u8 {
        let value = self.rx_latch;
        self.rx_latched = false;
        self.status &= !(STATUS_RDRF | STATUS_IRQ | STATUS_OVERRUN | STATUS_FRAMING_ERROR);
        value
    }

    /// Control register write; both low bits set is a master reset.
    pub fn write_control(&mut self, value: u8) {
        self.control = value;
        if value & 0x03 == 0x03 {
            self.reset();
        }
    }

    /// Advance the serial line by `elapsed` CPU cycles, latching at most
    /// one queued byte per byte time.
    pub fn sync(&mut self, elapsed: u32) {
        if self.rx_latched {
            return; // back-pressure: the latch is still full
        }
        if self.queue.is_empty() {
            self.cycles_until_next_byte = 0;
            return;
        }
        self.cycles_until_next_byte -= i64::from(elapsed);
        while self.cycles_until_next_byte <= 0 {
            let Some(byte) = self.queue.pop_front() else {
                break;
            };
            self.rx_latch = byte;
            self.rx_latched = true;
            self.status |= STATUS_RDRF | STATUS_IRQ;
            self.cycles_until_next_byte = i64::from(CYCLES_PER_BYTE);
            break; // single-entry latch
        }
    }

    /// CPU-to-IKBD command byte (data register write).
    pub fn write_data(&mut self, value: u8) {
        if self.command.is_empty() {
            if command_length(value).is_none() {
                // Real IKBD behaviour: unknown opcodes are a NOP and the
                // accumulator stays empty.
                return;
            }
            self.command.push(value);
        } else {
            self.command.push(value);
        }

        let expected = command_length(self.command[0]).unwrap_or(1);
        if self.command.len() >= usize::from(expected) {
            let command = std::mem::take(&mut self.command);
            self.execute_command(&command);
        }
    }

    fn execute_command(&mut self, command: &[u8]) {
        match command[0] {
            0x08 => self.mouse_mode = MouseMode::Relative,
            0x09 => self.mouse_mode = MouseMode::Absolute,
            0x0A => self.mouse_mode = MouseMode::Keycode,
            0x12 => self.mouse_mode = MouseMode::Off,
            0x14 => {
                self.joystick_enabled = true;
                let joy = self.joy_state;
                self.push_bytes(&[0xFF, joy]);
            }
            0x15 => self.joystick_enabled = false,
            0x16 => {
                let joy = self.joy_state;
                self.push_bytes(&[0xFD, 0, joy]);
            }
            0x1A => self.joystick_enabled = false,
            0x1C => self.push_bytes(&[0xFC, 0, 0, 0, 0, 0, 0]),
            0x80 => {
                if command.get(1) == Some(&0x01) {
                    // Full IKBD reset: default modes and the self-test
                    // completion bytes.
                    self.queue.clear();
                    self.mouse_mode = MouseMode::Relative;
                    self.joystick_enabled = true;
                    self.mouse_buttons = 0;
                    self.joy_state = 0;
                    self.push_bytes(&[0xF0, 0xF1]);
                }
            }
            // Remaining documented commands are accepted and ignored.
            _ => {}
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        self.queue.extend(bytes.iter().copied());
    }

    // --- Host-side event entry points -----------------------------------

    /// Mouse motion in host counts. Scaled by the sensitivity divisors,
    /// clamped to one packet's range.
    pub fn mouse_motion(&mut self, dx: i32, dy: i32) {
        if self.mouse_mode != MouseMode::Relative {
            return;
        }
        let dx = (dx / self.sensitivity_x).clamp(-127, 127) as i8;
        let dy = (dy / self.sensitivity_y).clamp(-127, 127) as i8;
        if dx == 0 && dy == 0 {
            return;
        }
        let header = 0xF8 | self.mouse_buttons;
        self.push_bytes(&[header, dx as u8, dy as u8]);
    }

    /// Mouse button state change (left = bit 1, right = bit 0 of the
    /// packet header).
    pub fn mouse_button(&mut self, left: bool, pressed: bool) {
        let bit = if left { 0x02 } else { 0x01 };
        let before = self.mouse_buttons;
        if pressed {
            self.mouse_buttons |= bit;
        } else {
            self.mouse_buttons &= !bit;
        }
        if self.mouse_buttons != before && self.mouse_mode == MouseMode::Relative {
            let header = 0xF8 | self.mouse_buttons;
            self.push_bytes(&[header, 0, 0]);
        }
    }

    /// Joystick 1 update: direction bits 0..3 (up/down/left/right) plus
    /// fire. Fire is additionally mirrored onto the right mouse button,
    /// which many ST games read instead of the joystick port.
    pub fn joystick(&mut self, up: bool, down: bool, left: bool, right: bool, fire: bool) {
        let mut state = 0u8;
        if up {
            state |= 0x01;
        }
        if down {
            state |= 0x02;
        }
        if left {
            state |= 0x04;
        }
        if right {
            state |= 0x08;
        }
        if fire {
            state |= 0x80;
        }

        if fire {
            self.mouse_buttons |= 0x01;
        } else {
            self.mouse_buttons &= !0x01;
        }

        if state != self.joy_state {
            self.joy_state = state;
            if self.joystick_enabled {
                self.push_bytes(&[0xFF, state]);
            }
        }
    }

    /// Key transition, already translated to an ST scancode.
    pub fn key_event(&mut self, scancode: u8, pressed: bool) {
        let byte = if pressed {
            scancode & 0x7F
        } else {
            scancode | 0x80
        };
        self.queue.push_back(byte);
    }

    pub fn set_mouse_sensitivity(&mut self, x: u32, y: u32) {
        self.sensitivity_x = x.max(1) as i32;
        self.sensitivity_y = y.max(1) as i32;
    }
}

impl Default for AciaIkbd {
    fn default() -> Self {
        Self::new()
    }
}

/// Total byte count of each documented IKBD command, opcode included.
/// Unknown opcodes return `None` and are dropped on arrival.
fn command_length(opcode: u8) -> Option<u8> {
    let length = match opcode {
        0x07 => 2, // set mouse button action
        0x08 => 1, // relative mouse
        0x09 => 5, // absolute mouse + max coordinates
        0x0A => 3, // keycode mouse + deltas
        0x0B => 3, // set mouse threshold
        0x0C => 3, // set mouse scale
        0x0D => 1, // interrogate mouse position
        0x0E => 6, // load mouse position
        0x0F => 1, // y at bottom
        0x10 => 1, // y at top
        0x11 => 1, // resume
        0x12 => 1, // disable mouse
        0x13 => 1, // pause output
        0x14 => 1, // joystick auto-report
        0x15 => 1, // joystick interrogation mode
        0x16 => 1, // interrogate joystick
        0x17 => 2, // joystick monitoring
        0x18 => 1, // fire button monitoring
        0x19 => 7, // joystick keycode mode
        0x1A => 1, // disable joysticks
        0x1B => 7, // set clock
        0x1C => 1, // interrogate clock
        0x20 => 4, // memory load header
        0x21 => 3, // memory read
        0x22 => 3, // controller execute
        0x80 => 2, // reset
        _ => return None,
    };
    Some(length)
}
