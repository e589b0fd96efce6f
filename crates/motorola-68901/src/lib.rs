//! Motorola MC68901 Multi-Function Peripheral (MFP).
//!
//! The 68901 combines four countdown timers, a 16-channel prioritised
//! interrupt controller, and an 8-bit general-purpose I/O port with
//! programmable edge detection. On the Atari ST it is the machine's only
//! interrupt controller besides the GLUE video interrupts, and its timers
//! drive everything from the 200 Hz system tick to raster effects.
//!
//! # Register map (odd addresses within the 0xFFFA00 window)
//!
//! | Offset | Register | Offset | Register |
//! |--------|----------|--------|----------|
//! | 0x01   | GPIP     | 0x15   | IMRB     |
//! | 0x03   | AER      | 0x17   | VR       |
//! | 0x05   | DDR      | 0x19   | TACR     |
//! | 0x07   | IERA     | 0x1B   | TBCR     |
//! | 0x09   | IERB     | 0x1D   | TCDCR    |
//! | 0x0B   | IPRA     | 0x1F   | TADR     |
//! | 0x0D   | IPRB     | 0x21   | TBDR     |
//! | 0x0F   | ISRA     | 0x23   | TCDR     |
//! | 0x11   | ISRB     | 0x25   | TDDR     |
//! | 0x13   | IMRA     |        |          |
//!
//! Interrupt channels are numbered 0..15, bank A (channels 8..15) above
//! bank B, bit 7 above bit 0 within a bank. Channel 15 (GPIP7) is the
//! highest priority, channel 0 (GPIP0) the lowest.

/// MFP crystal frequency on the Atari ST.
pub const MFP_HZ: u64 = 2_457_600;

/// CPU clock the cycle counts fed to [`Mfp68901::update_timers`] are in.
pub const CPU_HZ: u64 = 8_000_000;

/// Spurious-interrupt vector emitted when an IACK finds no winning channel.
pub const SPURIOUS_VECTOR: u8 = 0x18;

/// Timer prescaler divisors, indexed by the 3-bit control value.
/// Index 0 is "stopped" and never divides.
const PRESCALER_DIV: [u32; 8] = [0, 4, 10, 16, 50, 64, 100, 200];

/// Control value selecting event-count mode (timers A and B only).
const MODE_EVENT_COUNT: u8 = 8;

const REG_GPIP: u8 = 0x01;
const REG_AER: u8 = 0x03;
const REG_DDR: u8 = 0x05;
const REG_IERA: u8 = 0x07;
const REG_IERB: u8 = 0x09;
const REG_IPRA: u8 = 0x0B;
const REG_IPRB: u8 = 0x0D;
const REG_ISRA: u8 = 0x0F;
const REG_ISRB: u8 = 0x11;
const REG_IMRA: u8 = 0x13;
const REG_IMRB: u8 = 0x15;
const REG_VR: u8 = 0x17;
const REG_TACR: u8 = 0x19;
const REG_TBCR: u8 = 0x1B;
const REG_TCDCR: u8 = 0x1D;
const REG_TADR: u8 = 0x1F;
const REG_TBDR: u8 = 0x21;
const REG_TCDR: u8 = 0x23;
const REG_TDDR: u8 = 0x25;

/// Interrupt channel numbers (bank A = 8..15, bank B = 0..7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Gpip0 = 0,
    Gpip1 = 1,
    Gpip2 = 2,
    Gpip3 = 3,
    TimerD = 4,
    TimerC = 5,
    /// GPIP4 — the ACIA interrupt line on the ST.
    Acia = 6,
    /// GPIP5 — the FDC/DMA interrupt line on the ST.
    Fdc = 7,
    TimerB = 8,
    TxError = 9,
    TxEmpty = 10,
    RxError = 11,
    RxFull = 12,
    TimerA = 13,
    Gpip6 = 14,
    Gpip7 = 15,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerId {
    A = 0,
    B = 1,
    C = 2,
    D = 3,
}

const TIMER_CHANNELS: [Channel; 4] = [Channel::TimerA, Channel::TimerB, Channel::TimerC, Channel::TimerD];

#[derive(Debug, Default, Clone, Copy)]
struct Timer {
    /// Reload value (data register); 0 counts as 256.
    reload: u8,
    /// Live countdown value, 1..=256.
    counter: i32,
    /// Prescaler phase in MFP ticks, always < divisor.
    phase: u64,
}

impl Timer {
    fn reload_value(&self) -> i32 {
        if self.reload == 0 {
            256
        } else {
            i32::from(self.reload)
        }
    }
}

/// MC68901 device model.
pub struct Mfp68901 {
    gpip: u8,
    aer: u8,
    ddr: u8,
    iera: u8,
    ierb: u8,
    ipra: u8,
    iprb: u8,
    isra: u8,
    isrb: u8,
    imra: u8,
    imrb: u8,
    vr: u8,
    tacr: u8,
    tbcr: u8,
    tcdcr: u8,
    timers: [Timer; 4],
    /// Remainder of the CPU-cycle to MFP-tick rational conversion.
    mfp_acc: u64,
}

impl Mfp68901 {
    pub fn new() -> Self {
        let mut mfp = Self {
            gpip: 0,
            aer: 0,
            ddr: 0,
            iera: 0,
            ierb: 0,
            ipra: 0,
            iprb: 0,
            isra: 0,
            isrb: 0,
            imra: 0,
            imrb: 0,
            vr: 0,
            tacr: 0,
            tbcr: 0,
            tcdcr: 0,
            timers: [Timer::default(); 4],
            mfp_acc: 0,
        };
        mfp.reset();
        mfp
    }

    pub fn reset(&mut self) {
        self.gpip = 0xFF;
        self.aer = 0;
        self.ddr = 0;
        self.iera = 0;
        self.ierb = 0;
        self.ipra = 0;
        self.iprb = 0;
        self.isra = 0;
        self.isrb = 0;
        self.imra = 0;
        self.imrb = 0;
        self.vr = 0x40;
        self.tacr = 0;
        self.tbcr = 0;
        self.tcdcr = 0;
        for timer in &mut self.timers {
            *timer = Timer::default();
            timer.counter = 256;
        }
        self.mfp_acc = 0;
    }

    /// Byte read. `offset` is the address offset within the MFP window;
    /// only odd offsets select registers, even ones float high.
    pub fn read(&self, offset: u8) -> u8 {
        match offset {
            REG_GPIP => self.gpip,
            REG_AER => self.aer,
            REG_DDR => self.ddr,
            REG_IERA => self.iera,
            REG_IERB => self.ierb,
            REG_IPRA => self.ipra,
            REG_IPRB => self.iprb,
            REG_ISRA => self.isra,
            REG_ISRB => self.isrb,
            REG_IMRA => self.imra,
            REG_IMRB => self.imrb,
            REG_VR => self.vr,
            REG_TACR => self.tacr,
            REG_TBCR => self.tbcr,
            REG_TCDCR => self.tcdcr,
            REG_TADR => (self.timers[TimerId::A as usize].counter & 0xFF) as u8,
            REG_TBDR => (self.timers[TimerId::B as usize].counter & 0xFF) as u8,
            REG_TCDR => (self.timers[TimerId::C as usize].counter & 0xFF) as u8,
            REG_TDDR => (self.timers[TimerId::D as usize].counter & 0xFF) as u8,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, offset: u8, value: u8) {
        match offset {
            // Only DDR-configured output bits are CPU writable.
            REG_GPIP => self.gpip = (self.gpip & !self.ddr) | (value & self.ddr),
            REG_AER => self.aer = value,
            REG_DDR => self.ddr = value,
            // Disabling a channel also discards its pending request.
            REG_IERA => {
                self.iera = value;
                self.ipra &= value;
            }
            REG_IERB => {
                self.ierb = value;
                self.iprb &= value;
            }
            // Pending and in-service registers clear on written zeros.
            REG_IPRA => self.ipra &= value,
            REG_IPRB => self.iprb &= value,
            REG_ISRA => self.isra &= value,
            REG_ISRB => self.isrb &= value,
            REG_IMRA => self.imra = value,
            REG_IMRB => self.imrb = value,
            REG_VR => {
                self.vr = value;
                if value & 0x08 == 0 {
                    // Automatic end-of-interrupt: nothing stays in service.
                    self.isra = 0;
                    self.isrb = 0;
                }
            }
            REG_TACR => self.tacr = value & 0x0F,
            REG_TBCR => self.tbcr = value & 0x0F,
            REG_TCDCR => self.tcdcr = value & 0x77,
            REG_TADR => self.write_data_register(TimerId::A, value),
            REG_TBDR => self.write_data_register(TimerId::B, value),
            REG_TCDR => self.write_data_register(TimerId::C, value),
            REG_TDDR => self.write_data_register(TimerId::D, value),
            _ => {}
        }
    }

    fn write_data_register(&mut self, id: TimerId, value: u8) {
        let mode = self.timer_mode(id);
        let timer = &mut self.timers[id as usize];
        timer.reload = value;
        if mode == 0 {
            timer.counter = timer.reload_value();
        }
    }

    fn timer_mode(&self, id: TimerId) -> u8 {
        match id {
            TimerId::A => self.tacr & 0x0F,
            TimerId::B => self.tbcr & 0x0F,
            TimerId::C => (self.tcdcr >> 4) & 0x07,
            TimerId::D => self.tcdcr & 0x07,
        }
    }

    /// Advance all delay-mode timers by `cpu_cycles` CPU clocks.
    ///
    /// The CPU and MFP crystals are incommensurate; the conversion keeps a
    /// 64-bit remainder so long runs accumulate no drift.
    pub fn update_timers(&mut self, cpu_cycles: u32) {
        self.mfp_acc += u64::from(cpu_cycles) * MFP_HZ;
        let mfp_ticks = self.mfp_acc / CPU_HZ;
        self.mfp_acc %= CPU_HZ;
        if mfp_ticks == 0 {
            return;
        }

        for id in [TimerId::A, TimerId::B, TimerId::C, TimerId::D] {
            let mode = self.timer_mode(id);
            if mode == 0 || mode >= MODE_EVENT_COUNT {
                continue;
            }
            let div = u64::from(PRESCALER_DIV[mode as usize]);
            let timer = &mut self.timers[id as usize];
            timer.phase += mfp_ticks;
            let dec = (timer.phase / div) as i32;
            timer.phase %= div;
            if dec == 0 {
                continue;
            }
            timer.counter -= dec;
            let mut fired = false;
            while timer.counter <= 0 {
                timer.counter += timer.reload_value();
                fired = true;
            }
            if fired {
                self.raise_channel(TIMER_CHANNELS[id as usize]);
            }
        }
    }

    /// Event-count tick for timer A (display-driven on the ST).
    pub fn tick_event_count_a(&mut self) {
        self.tick_event_count(TimerId::A);
    }

    /// Event-count tick for timer B (one per visible scanline on the ST).
    pub fn tick_event_count_b(&mut self) {
        self.tick_event_count(TimerId::B);
    }

    fn tick_event_count(&mut self, id: TimerId) {
        if self.timer_mode(id) != MODE_EVENT_COUNT {
            return;
        }
        let timer = &mut self.timers[id as usize];
        timer.counter -= 1;
        if timer.counter <= 0 {
            timer.counter = timer.reload_value();
            self.raise_channel(TIMER_CHANNELS[id as usize]);
        }
    }

    /// Drive one GPIP input pin. A transition matching the AER-configured
    /// edge (1 = rising, 0 = falling) latches the pin's interrupt channel.
    pub fn set_gpip_input(&mut self, bit: u8, level: bool) {
        let mask = 1u8 << bit;
        let previous = self.gpip & mask != 0;
        if previous == level {
            return;
        }
        self.gpip = (self.gpip & !mask) | if level { mask } else { 0 };

        let rising_selected = self.aer & mask != 0;
        if level == rising_selected {
            if let Some(channel) = gpip_channel(bit) {
                self.raise_channel(channel);
            }
        }
    }

    /// Latch a pending request for `channel`, gated on its enable bit.
    pub fn raise_channel(&mut self, channel: Channel) {
        let (bank_a, bit) = channel_bank_bit(channel);
        let mask = 1u8 << bit;
        if bank_a {
            if self.iera & mask != 0 {
                self.ipra |= mask;
            }
        } else if self.ierb & mask != 0 {
            self.iprb |= mask;
        }
    }

    fn software_eoi(&self) -> bool {
        self.vr & 0x08 != 0
    }

    /// Pending+enabled+unmasked channels as a 16-bit priority word
    /// (bit 15 = channel 15 = GPIP7).
    fn pending_word(&self) -> u16 {
        let a = self.ipra & self.iera & self.imra;
        let b = self.iprb & self.ierb & self.imrb;
        (u16::from(a) << 8) | u16::from(b)
    }

    fn in_service_word(&self) -> u16 {
        (u16::from(self.isra) << 8) | u16::from(self.isrb)
    }

    /// True while the MFP is requesting the CPU interrupt (level 6 on the
    /// ST). Under software end-of-interrupt, a channel already in service
    /// masks itself and everything below it.
    pub fn irq_active(&self) -> bool {
        self.winning_channel().is_some()
    }

    fn winning_channel(&self) -> Option<u8> {
        let pending = self.pending_word();
        if pending == 0 {
            return None;
        }
        let highest_pending = 15 - pending.leading_zeros() as u8;
        if self.software_eoi() {
            let in_service = self.in_service_word();
            if in_service != 0 {
                let highest_in_service = 15 - in_service.leading_zeros() as u8;
                if highest_pending <= highest_in_service {
                    return None;
                }
            }
        }
        Some(highest_pending)
    }

    /// Interrupt-acknowledge cycle: resolve the winning channel, clear its
    /// pending bit (moving it in-service under software EOI), and produce
    /// the exception vector.
    pub fn iack(&mut self) -> u8 {
        let Some(channel) = self.winning_channel() else {
            return SPURIOUS_VECTOR;
        };
        let mask = 1u8 << (channel & 0x07);
        if channel >= 8 {
            self.ipra &= !mask;
            if self.software_eoi() {
                self.isra |= mask;
            }
        } else {
            self.iprb &= !mask;
            if self.software_eoi() {
                self.isrb |= mask;
            }
        }
        (self.vr & 0xF0) | channel
    }

    /// Current GPIP pin levels (inputs and driven outputs).
    pub fn gpip(&self) -> u8 {
        self.gpip
    }
}

impl Default for Mfp68901 {
    fn default() -> Self {
        Self::new()
    }
}

fn channel_bank_bit(channel: Channel) -> (bool, u8) {
    let index = channel as u8;
    (index >= 8, index & 0x07)
}

/// GPIP pin to interrupt channel routing.
fn gpip_channel(bit: u8) -> Option<Channel> {
    match bit {
        0 => Some(Channel::Gpip0),
        1 => Some(Channel::Gpip1),
        2 => Some(Channel::Gpip2),
        3 => Some(Channel::Gpip3),
        4 => Some(Channel::Acia),
        5 => Some(Channel::Fdc),
        6 => Some(Channel::Gpip6),
        7 => Some(Channel::Gpip7),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enable_timer_d(mfp: &mut Mfp68901, prescale_mode: u8, reload: u8) {
        mfp.write(REG_IERB, 0x10);
        mfp.write(REG_IMRB, 0x10);
        mfp.write(REG_TDDR, reload);
        mfp.write(REG_TCDCR, prescale_mode);
    }

    #[test]
    fn reset_state() {
        let mfp = Mfp68901::new();
        assert_eq!(mfp.read(REG_GPIP), 0xFF);
        assert_eq!(mfp.read(REG_AER), 0x00);
        assert_eq!(mfp.read(REG_VR), 0x40);
        assert_eq!(mfp.read(REG_IPRA), 0x00);
        assert_eq!(mfp.read(REG_IPRB), 0x00);
        assert!(!mfp.irq_active());
    }

    #[test]
    fn even_offsets_float_high() {
        let mfp = Mfp68901::new();
        assert_eq!(mfp.read(0x00), 0xFF);
        assert_eq!(mfp.read(0x16), 0xFF);
    }

    #[test]
    fn timer_d_one_shot_cadence() {
        // Prescaler 200, reload 246: one interrupt per
        // 200 * 246 MFP ticks = 49,200 / 2,457,600 s = 20.0 ms,
        // which is 160,156 CPU cycles at 8 MHz.
        let mut mfp = Mfp68901::new();
        enable_timer_d(&mut mfp, 0x07, 246);

        let mut cycles = 0u64;
        while mfp.read(REG_IPRB) & 0x10 == 0 {
            mfp.update_timers(1000);
            cycles += 1000;
            assert!(cycles < 200_000, "timer D never fired");
        }
        assert!(
            (159_000..=161_000).contains(&cycles),
            "fired after {cycles} cycles"
        );
    }

    #[test]
    fn prescaler_interrupt_count_matches_formula() {
        // 2,000,000 CPU cycles, prescaler 64, reload 100:
        // floor(2e6 * 2,457,600 / (8e6 * 64 * 100)) = 96 interrupts.
        let mut mfp = Mfp68901::new();
        enable_timer_d(&mut mfp, 0x05, 100);

        let mut count = 0u32;
        for _ in 0..2_000 {
            mfp.update_timers(1000);
            if mfp.read(REG_IPRB) & 0x10 != 0 {
                count += 1;
                mfp.write(REG_IPRB, !0x10);
            }
        }
        let expected = (2_000_000u64 * MFP_HZ / (CPU_HZ * 64 * 100)) as u32;
        assert!(
            count >= expected - 1 && count <= expected + 1,
            "counted {count}, expected about {expected}"
        );
    }

    #[test]
    fn reload_zero_counts_as_256() {
        let mut mfp = Mfp68901::new();
        mfp.write(REG_IERB, 0x10);
        mfp.write(REG_IMRB, 0x10);
        mfp.write(REG_TDDR, 0);
        mfp.write(REG_TCDCR, 0x01); // prescale 4

        // 256 * 4 = 1024 MFP ticks per interrupt = 3333.3 CPU cycles.
        mfp.update_timers(3200);
        assert_eq!(mfp.read(REG_IPRB) & 0x10, 0);
        mfp.update_timers(200);
        assert_ne!(mfp.read(REG_IPRB) & 0x10, 0);
    }

    #[test]
    fn data_register_write_loads_counter_only_when_stopped() {
        let mut mfp = Mfp68901::new();
        mfp.write(REG_TDDR, 10);
        assert_eq!(mfp.read(REG_TDDR), 10);

        mfp.write(REG_TCDCR, 0x07);
        mfp.write(REG_TDDR, 99); // running: reload only
        assert_eq!(mfp.read(REG_TDDR), 10);
    }

    #[test]
    fn event_count_mode_ticks_from_caller() {
        let mut mfp = Mfp68901::new();
        mfp.write(REG_IERA, 0x01); // timer B is bank A bit 0
        mfp.write(REG_IMRA, 0x01);
        mfp.write(REG_TBDR, 3);
        mfp.write(REG_TBCR, MODE_EVENT_COUNT);

        mfp.tick_event_count_b();
        mfp.tick_event_count_b();
        assert_eq!(mfp.read(REG_IPRA) & 0x01, 0);
        mfp.tick_event_count_b();
        assert_ne!(mfp.read(REG_IPRA) & 0x01, 0);
        // Counter reloaded for the next run.
        assert_eq!(mfp.read(REG_TBDR), 3);

        // CPU-cycle updates must not advance an event-count timer.
        mfp.write(REG_IPRA, 0x00);
        mfp.update_timers(1_000_000);
        assert_eq!(mfp.read(REG_IPRA) & 0x01, 0);
    }

    #[test]
    fn iack_returns_vector_and_clears_pending() {
        let mut mfp = Mfp68901::new();
        mfp.write(REG_IERB, 0x30);
        mfp.write(REG_IMRB, 0x30);
        mfp.raise_channel(Channel::TimerC);
        mfp.raise_channel(Channel::TimerD);

        assert!(mfp.irq_active());
        // Timer C (channel 5) outranks timer D (channel 4).
        assert_eq!(mfp.iack(), 0x45);
        assert_eq!(mfp.read(REG_IPRB), 0x10);
        assert_eq!(mfp.iack(), 0x44);
        assert!(!mfp.irq_active());
        assert_eq!(mfp.iack(), SPURIOUS_VECTOR);
    }

    #[test]
    fn software_eoi_blocks_equal_and_lower_channels() {
        let mut mfp = Mfp68901::new();
        mfp.write(REG_VR, 0x48); // base 0x40, software EOI
        mfp.write(REG_IERB, 0x30);
        mfp.write(REG_IMRB, 0x30);

        mfp.raise_channel(Channel::TimerC);
        assert_eq!(mfp.iack(), 0x45);
        assert_eq!(mfp.read(REG_ISRB), 0x20);

        // Lower-priority timer D stays blocked while C is in service.
        mfp.raise_channel(Channel::TimerD);
        assert!(!mfp.irq_active());

        // Handler writes a zero to its ISR bit (end of interrupt).
        mfp.write(REG_ISRB, !0x20);
        assert!(mfp.irq_active());
        assert_eq!(mfp.iack(), 0x44);
    }

    #[test]
    fn gpip_falling_edge_latches_fdc_and_acia() {
        let mut mfp = Mfp68901::new();
        mfp.write(REG_IERB, 0xC0);
        mfp.write(REG_IMRB, 0xC0);

        // AER = 0: falling edges. Lines idle high after reset.
        mfp.set_gpip_input(5, false);
        assert_ne!(mfp.read(REG_IPRB) & 0x80, 0, "FDC channel");
        mfp.set_gpip_input(4, false);
        assert_ne!(mfp.read(REG_IPRB) & 0x40, 0, "ACIA channel");

        // Returning high is the non-selected edge; nothing new pends.
        mfp.write(REG_IPRB, 0x00);
        mfp.set_gpip_input(5, true);
        assert_eq!(mfp.read(REG_IPRB), 0x00);
    }

    #[test]
    fn gpip_rising_edge_when_aer_set() {
        let mut mfp = Mfp68901::new();
        mfp.write(REG_IERB, 0x40);
        mfp.write(REG_IMRB, 0x40);
        mfp.write(REG_AER, 0x10);

        mfp.set_gpip_input(4, false);
        assert_eq!(mfp.read(REG_IPRB), 0x00);
        mfp.set_gpip_input(4, true);
        assert_ne!(mfp.read(REG_IPRB) & 0x40, 0);
    }

    #[test]
    fn disabled_channel_does_not_latch() {
        let mut mfp = Mfp68901::new();
        mfp.raise_channel(Channel::TimerC);
        assert_eq!(mfp.read(REG_IPRB), 0x00);
    }

    #[test]
    fn disabling_enable_clears_pending() {
        let mut mfp = Mfp68901::new();
        mfp.write(REG_IERB, 0x20);
        mfp.write(REG_IMRB, 0x20);
        mfp.raise_channel(Channel::TimerC);
        assert_ne!(mfp.read(REG_IPRB), 0x00);
        mfp.write(REG_IERB, 0x00);
        assert_eq!(mfp.read(REG_IPRB), 0x00);
    }

    #[test]
    fn masked_channel_pends_but_does_not_interrupt() {
        let mut mfp = Mfp68901::new();
        mfp.write(REG_IERB, 0x20);
        mfp.raise_channel(Channel::TimerC);
        assert_ne!(mfp.read(REG_IPRB), 0x00);
        assert!(!mfp.irq_active());
        mfp.write(REG_IMRB, 0x20);
        assert!(mfp.irq_active());
    }

    #[test]
    fn vector_uses_vr_high_nibble() {
        let mut mfp = Mfp68901::new();
        mfp.write(REG_VR, 0x80);
        mfp.write(REG_IERA, 0x20);
        mfp.write(REG_IMRA, 0x20);
        mfp.raise_channel(Channel::TimerA);
        assert_eq!(mfp.iack(), 0x8D); // channel 13
    }

    #[test]
    fn gpip_output_bits_respect_ddr() {
        let mut mfp = Mfp68901::new();
        mfp.write(REG_DDR, 0x0F);
        mfp.write(REG_GPIP, 0x05);
        assert_eq!(mfp.read(REG_GPIP), 0xF5);
    }
}
