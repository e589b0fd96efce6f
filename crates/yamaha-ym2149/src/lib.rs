//! Yamaha YM2149 Programmable Sound Generator emulator.
//!
//! Three square-wave tone generators, a shared 17-bit LFSR noise source,
//! and a shared 32-step envelope generator, mixed through a logarithmic
//! DAC. Internal state advances at 250 kHz (master clock / 8, one tick per
//! 32 CPU cycles on an 8 MHz Atari ST) and is resampled to the host rate
//! with a 16.16 fixed-point accumulator.
//!
//! # Register map
//!
//! | Reg | Name          | Bits | Reg | Name          | Bits |
//! |-----|---------------|------|-----|---------------|------|
//! | R0  | A period fine | 7-0  | R8  | A volume      | 4-0  |
//! | R1  | A period high | 3-0  | R9  | B volume      | 4-0  |
//! | R2  | B period fine | 7-0  | R10 | C volume      | 4-0  |
//! | R3  | B period high | 3-0  | R11 | Env fine      | 7-0  |
//! | R4  | C period fine | 7-0  | R12 | Env coarse    | 7-0  |
//! | R5  | C period high | 3-0  | R13 | Env shape     | 3-0  |
//! | R6  | Noise period  | 4-0  | R14 | I/O port A    | 7-0  |
//! | R7  | Mixer         | 7-0  | R15 | I/O port B    | 7-0  |
//!
//! On the ST, I/O port A carries the floppy drive/side select lines;
//! writes to R14 surface the decoded selection to the caller.

/// YM master clock on the Atari ST (2 MHz).
pub const MASTER_CLOCK_HZ: u32 = 2_000_000;

/// Internal generator clock: master / 8.
pub const INTERNAL_HZ: u32 = 250_000;

/// CPU cycles per internal tick on an 8 MHz machine.
const CPU_CYCLES_PER_TICK: u32 = 32;

/// 17-bit LFSR feedback mask (taps at bits 0 and 14, applied after shift).
const LFSR_FEEDBACK: u32 = 0x12000;

/// Measured YM2149 DAC response: 32 logarithmic levels scaled to 0..65535,
/// roughly 1.5 dB per step with the two lowest levels silent.
const DAC_TABLE: [u16; 32] = [
    0, 0, 305, 506, 718, 915, 1114, 1312, 1597, 1946, 2298, 2647, 3182, 3824, 4460, 5097, 6063,
    7280, 8504, 9732, 11579, 13865, 16148, 18423, 21873, 26242, 30631, 35024, 41626, 49679, 57676,
    65535,
];

/// Valid bits per register.
const REG_MASK: [u8; 16] = [
    0xFF, 0x0F, 0xFF, 0x0F, 0xFF, 0x0F, 0x1F, 0xFF, 0x1F, 0x1F, 0x1F, 0xFF, 0xFF, 0x0F, 0xFF,
    0xFF,
];

/// Fixed 4-bit volume mapped into the 5-bit DAC table.
fn vol4to5(volume: u8) -> usize {
    usize::from(volume) * 2 + 1
}

/// Floppy drive/side selection decoded from an I/O port A write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveSelect {
    /// Selected drive (0 = A, 1 = B), or none when both select lines idle.
    pub drive: Option<u8>,
    /// Selected disk side (0 or 1).
    pub side: u8,
}

#[derive(Debug, Default, Clone, Copy)]
struct ToneChannel {
    period: u16,
    counter: u16,
    output: bool,
}

impl ToneChannel {
    fn tick(&mut self) {
        self.counter += 1;
        if self.counter >= self.period.max(1) {
            self.counter = 0;
            self.output = !self.output;
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct NoiseGenerator {
    period: u8,
    counter: u16,
    lfsr: u32,
    output: bool,
}

impl NoiseGenerator {
    fn new() -> Self {
        Self {
            period: 0,
            counter: 0,
            lfsr: 1,
            output: false,
        }
    }

    fn tick(&mut self) {
        self.counter += 1;
        // The LFSR advances at half the internal rate (125 kHz at most).
        if self.counter >= 2 * u16::from(self.period.max(1)) {
            self.counter = 0;
            if self.lfsr & 1 != 0 {
                self.lfsr = (self.lfsr >> 1) ^ LFSR_FEEDBACK;
                self.output = true;
            } else {
                self.lfsr >>= 1;
                self.output = false;
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct EnvelopeGenerator {
    period: u16,
    counter: u32,
    position: u8,
    shape: u8,
}

impl EnvelopeGenerator {
    fn new() -> Self {
        Self {
            period: 0,
            counter: 0,
            position: 0,
            shape: 0,
        }
    }

    fn tick(&mut self) {
        if self.counter > 0 {
            self.counter -= 1;
        } else {
            self.counter = u32::from(self.period.max(1));
            self.position += 1;
            // Block 0 is one-shot; the sustain loop covers the last block.
            if self.position == 96 {
                self.position = 64;
            }
        }
    }

    fn restart(&mut self, shape: u8) {
        self.shape = shape & 0x0F;
        self.position = 0;
        self.counter = 0;
    }
}

/// Envelope waveform table: 16 shapes x 96 positions (three 32-step
/// blocks), levels 0..31.
///
/// Block 0 is the initial ramp. For continuous non-alternating shapes the
/// sustain blocks repeat the ramp; alternating shapes fold one full
/// up/down period into each sustain block so the 95 -> 64 wrap stays
/// seamless; hold shapes pin the final level.
fn build_envelope_table() -> [[u8; 96]; 16] {
    let ramp = |up: bool, i: usize| -> u8 {
        if up {
            i as u8
        } else {
            (31 - i) as u8
        }
    };
    let folded = |up_first: bool, i: usize| -> u8 {
        // 16 odd steps one way, 16 even steps back.
        if i < 16 {
            if up_first {
                (2 * i + 1) as u8
            } else {
                (30 - 2 * i) as u8
            }
        } else {
            let j = i - 16;
            if up_first {
                (30 - 2 * j) as u8
            } else {
                (2 * j + 1) as u8
            }
        }
    };

    let mut table = [[0u8; 96]; 16];
    for (shape, wave) in table.iter_mut().enumerate() {
        let cont = shape & 0x08 != 0;
        let attack = shape & 0x04 != 0;
        let alternate = shape & 0x02 != 0;
        let hold = shape & 0x01 != 0;

        for i in 0..32 {
            wave[i] = ramp(attack, i);
        }
        for i in 0..64 {
            wave[32 + i] = if !cont {
                0
            } else if hold {
                let end = if attack { 31 } else { 0 };
                if alternate {
                    31 - end
                } else {
                    end
                }
            } else if alternate {
                folded(!attack, i % 32)
            } else {
                ramp(attack, i % 32)
            };
        }
    }
    table
}

/// YM2149 device model.
pub struct Ym2149 {
    regs: [u8; 16],
    selected: u8,

    tones: [ToneChannel; 3],
    noise: NoiseGenerator,
    envelope: EnvelopeGenerator,
    envelope_table: [[u8; 96]; 16],

    /// CPU-cycle remainder below one internal tick.
    cycle_acc: u32,
    /// 16.16 resampler state.
    resample_acc: u32,
    resample_ratio: u32,

    // One-pole DC-removing high-pass taps.
    dc_x_prev: f32,
    dc_y_prev: f32,

    host_rate: u32,
    buffer: Vec<f32>,
}

impl Ym2149 {
    pub fn new(host_rate: u32) -> Self {
        let mut chip = Self {
            regs: [0; 16],
            selected: 0,
            tones: [ToneChannel::default(); 3],
            noise: NoiseGenerator::new(),
            envelope: EnvelopeGenerator::new(),
            envelope_table: build_envelope_table(),
            cycle_acc: 0,
            resample_acc: 0,
            resample_ratio: ((u64::from(INTERNAL_HZ) << 16) / u64::from(host_rate)) as u32,
            dc_x_prev: 0.0,
            dc_y_prev: 0.0,
            host_rate,
            buffer: Vec::with_capacity(host_rate as usize / 50 + 1),
        };
        chip.reset();
        chip
    }

    pub fn reset(&mut self) {
        self.regs = [0; 16];
        self.regs[7] = 0xFF; // everything disabled
        self.selected = 0;
        self.tones = [ToneChannel::default(); 3];
        self.noise = NoiseGenerator::new();
        self.envelope = EnvelopeGenerator::new();
        self.cycle_acc = 0;
        self.resample_acc = 0;
        self.dc_x_prev = 0.0;
        self.dc_y_prev = 0.0;
        self.buffer.clear();
    }

    /// Register-select port write (0xFF8800).
    pub fn select_register(&mut self, value: u8) {
        self.selected = value & 0x0F;
    }

    /// Read-back of the selected register (0xFF8800 read).
    pub fn read_data(&self) -> u8 {
        self.regs[usize::from(self.selected)]
    }

    /// Data port write (0xFF8802). Returns the decoded drive selection when
    /// the write hit I/O port A.
    pub fn write_data(&mut self, value: u8) -> Option<DriveSelect> {
        let reg = usize::from(self.selected);
        let value = value & REG_MASK[reg];
        self.regs[reg] = value;

        match reg {
            0 | 1 => self.tones[0].period = self.tone_period(0),
            2 | 3 => self.tones[1].period = self.tone_period(1),
            4 | 5 => self.tones[2].period = self.tone_period(2),
            6 => self.noise.period = value,
            11 | 12 => self.envelope.period = self.envelope_period(),
            13 => {
                self.envelope.period = self.envelope_period();
                self.envelope.restart(value);
            }
            14 => {
                // Port A drive select lines, all active low:
                //   bit 0 = side (low selects side 1)
                //   bit 1 = drive A, bit 2 = drive B
                let drive = if value & 0x02 == 0 {
                    Some(0)
                } else if value & 0x04 == 0 {
                    Some(1)
                } else {
                    None
                };
                return Some(DriveSelect {
                    drive,
                    side: if value & 0x01 == 0 { 1 } else { 0 },
                });
            }
            _ => {}
        }
        None
    }

    fn tone_period(&self, channel: usize) -> u16 {
        let base = channel * 2;
        u16::from(self.regs[base]) | (u16::from(self.regs[base + 1]) << 8)
    }

    fn envelope_period(&self) -> u16 {
        u16::from(self.regs[11]) | (u16::from(self.regs[12]) << 8)
    }

    /// Advance the chip by `cpu_cycles` CPU clocks, producing host-rate
    /// samples into the internal buffer.
    pub fn sync(&mut self, cpu_cycles: u32) {
        self.cycle_acc += cpu_cycles;
        let ticks = self.cycle_acc / CPU_CYCLES_PER_TICK;
        self.cycle_acc %= CPU_CYCLES_PER_TICK;

        for _ in 0..ticks {
            for tone in &mut self.tones {
                tone.tick();
            }
            self.noise.tick();
            self.envelope.tick();

            self.resample_acc += 0x10000;
            while self.resample_acc >= self.resample_ratio {
                self.resample_acc -= self.resample_ratio;
                let sample = self.mix();
                let filtered = self.dc_filter(sample);
                self.buffer.push(filtered);
            }
        }
    }

    fn mix(&self) -> f32 {
        let mixer = self.regs[7];
        let mut sum = 0u32;
        for (channel, tone) in self.tones.iter().enumerate() {
            let mut output = true;
            if mixer & (1 << channel) == 0 {
                output &= tone.output;
            }
            if mixer & (8 << channel) == 0 {
                output &= self.noise.output;
            }
            if output {
                let volume_reg = self.regs[8 + channel];
                let level = if volume_reg & 0x10 != 0 {
                    usize::from(
                        self.envelope_table[usize::from(self.envelope.shape)]
                            [usize::from(self.envelope.position)],
                    )
                } else {
                    vol4to5(volume_reg & 0x0F)
                };
                sum += u32::from(DAC_TABLE[level]);
            }
        }
        sum as f32 / (65535.0 * 3.5)
    }

    fn dc_filter(&mut self, x: f32) -> f32 {
        let y = x - self.dc_x_prev + 0.995 * self.dc_y_prev;
        self.dc_x_prev = x;
        self.dc_y_prev = y;
        y
    }

    /// Drain the accumulated host-rate samples.
    pub fn take_buffer(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.buffer)
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn host_rate(&self) -> u32 {
        self.host_rate
    }

    // Diagnostic accessors for test instrumentation
    pub fn envelope_position(&self) -> u8 {
        self.envelope.position
    }
    pub fn noise_lfsr(&self) -> u32 {
        self.noise.lfsr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 48_000;

    fn write_reg(chip: &mut Ym2149, reg: u8, value: u8) {
        chip.select_register(reg);
        chip.write_data(value);
    }

    fn tone_a_setup(chip: &mut Ym2149, period: u16) {
        write_reg(chip, 0, (period & 0xFF) as u8);
        write_reg(chip, 1, (period >> 8) as u8);
        write_reg(chip, 7, 0xFE); // tone A only
        write_reg(chip, 8, 0x0F);
    }

    #[test]
    fn reset_disables_all_channels() {
        let mut chip = Ym2149::new(SAMPLE_RATE);
        write_reg(&mut chip, 7, 0x00);
        chip.reset();
        chip.select_register(7);
        assert_eq!(chip.read_data(), 0xFF);
    }

    #[test]
    fn register_values_are_masked() {
        let mut chip = Ym2149::new(SAMPLE_RATE);
        write_reg(&mut chip, 1, 0xFF);
        chip.select_register(1);
        assert_eq!(chip.read_data(), 0x0F);
        write_reg(&mut chip, 6, 0xFF);
        chip.select_register(6);
        assert_eq!(chip.read_data(), 0x1F);
    }

    #[test]
    fn tone_produces_both_polarities() {
        let mut chip = Ym2149::new(SAMPLE_RATE);
        tone_a_setup(&mut chip, 100);
        chip.sync(2_000_000); // a quarter second
        let buf = chip.take_buffer();
        assert!(buf.len() > 1000);
        assert!(buf.iter().any(|&s| s > 0.01));
        assert!(buf.iter().any(|&s| s < -0.01));
    }

    #[test]
    fn tone_period_zero_equals_period_one() {
        let run = |period: u16| -> Vec<f32> {
            let mut chip = Ym2149::new(SAMPLE_RATE);
            tone_a_setup(&mut chip, period);
            chip.sync(800_000);
            chip.take_buffer()
        };
        assert_eq!(run(0), run(1));
    }

    #[test]
    fn resampler_tracks_host_rate() {
        let mut chip = Ym2149::new(SAMPLE_RATE);
        chip.sync(8_000_000); // one emulated second
        let produced = chip.buffer_len() as i64;
        let expected = i64::from(SAMPLE_RATE);
        assert!(
            (produced - expected).abs() < expected / 100,
            "produced {produced} samples for one second"
        );
    }

    #[test]
    fn lfsr_never_reaches_zero() {
        let mut chip = Ym2149::new(SAMPLE_RATE);
        write_reg(&mut chip, 6, 1);
        write_reg(&mut chip, 7, 0xF7); // noise on channel A
        write_reg(&mut chip, 8, 0x0F);
        for _ in 0..2_000 {
            chip.sync(3_200); // 100 internal ticks
            assert_ne!(chip.noise_lfsr(), 0);
        }
    }

    #[test]
    fn envelope_position_stays_in_range_and_wraps_to_sustain() {
        let mut chip = Ym2149::new(SAMPLE_RATE);
        write_reg(&mut chip, 11, 1);
        write_reg(&mut chip, 12, 0);
        write_reg(&mut chip, 13, 0x08); // sawtooth down, continuous
        let mut seen_sustain_wrap = false;
        let mut previous = chip.envelope_position();
        for _ in 0..10_000 {
            chip.sync(32);
            let position = chip.envelope_position();
            assert!(position <= 95);
            if previous == 95 && position == 64 {
                seen_sustain_wrap = true;
            }
            previous = position;
        }
        assert!(seen_sustain_wrap, "envelope never looped 95 -> 64");
        chip.take_buffer();
    }

    #[test]
    fn one_shot_envelope_decays_and_holds_at_zero() {
        let mut chip = Ym2149::new(SAMPLE_RATE);
        write_reg(&mut chip, 7, 0xFF);
        write_reg(&mut chip, 8, 0x10); // envelope mode
        write_reg(&mut chip, 11, 1);
        write_reg(&mut chip, 13, 0x00); // decay, no continue
        // Walk well past the first block.
        chip.sync(32 * 300);
        let position = chip.envelope_position();
        assert!(position >= 64, "one-shot should have left block 0");
        let table = build_envelope_table();
        assert_eq!(table[0][usize::from(position)], 0);
        chip.take_buffer();
    }

    #[test]
    fn envelope_shape_write_restarts() {
        let mut chip = Ym2149::new(SAMPLE_RATE);
        write_reg(&mut chip, 11, 1);
        write_reg(&mut chip, 13, 0x08);
        chip.sync(32 * 100);
        assert_ne!(chip.envelope_position(), 0);
        write_reg(&mut chip, 13, 0x08);
        assert_eq!(chip.envelope_position(), 0);
        chip.take_buffer();
    }

    #[test]
    fn envelope_table_levels_in_range() {
        let table = build_envelope_table();
        for wave in &table {
            for &level in wave.iter() {
                assert!(level <= 31);
            }
        }
        // Shape 12 (continuous attack sawtooth) ramps 0..31 in every block.
        assert_eq!(table[12][0], 0);
        assert_eq!(table[12][31], 31);
        assert_eq!(table[12][64], 0);
        assert_eq!(table[12][95], 31);
        // Shape 11 (decay then hold high) pins at 31.
        assert_eq!(table[11][40], 31);
        assert_eq!(table[11][95], 31);
    }

    #[test]
    fn dac_table_is_monotonic() {
        for pair in DAC_TABLE.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert_eq!(DAC_TABLE[31], 65535);
    }

    #[test]
    fn silent_when_everything_disabled_and_volumes_zero() {
        let mut chip = Ym2149::new(SAMPLE_RATE);
        chip.sync(1_600_000);
        let buf = chip.take_buffer();
        assert!(buf.iter().all(|&s| s.abs() < 1e-6));
    }

    #[test]
    fn port_a_write_reports_drive_select() {
        let mut chip = Ym2149::new(SAMPLE_RATE);
        chip.select_register(14);

        // Drive A selected (bit 1 low), side select line high -> side 0.
        let select = chip.write_data(0x05).expect("port A write");
        assert_eq!(select.drive, Some(0));
        assert_eq!(select.side, 0);

        // Drive B selected, side line low -> side 1.
        let select = chip.write_data(0x02).expect("port A write");
        assert_eq!(select.drive, Some(1));
        assert_eq!(select.side, 1);

        // Both select lines high: no drive.
        let select = chip.write_data(0x07).expect("port A write");
        assert_eq!(select.drive, None);

        // Non-port registers report nothing.
        chip.select_register(0);
        assert!(chip.write_data(0x10).is_none());
    }
}
