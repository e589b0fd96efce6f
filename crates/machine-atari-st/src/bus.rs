//! The ST bus: 24-bit address decode, big-endian access, I/O dispatch.
//!
//! Memory map:
//!
//! | Range                 | Device |
//! |-----------------------|--------|
//! | 0x000000..0x000008    | ROM mirror (reset SSP/PC) |
//! | 0x000000..ram_size    | RAM |
//! | tos_base..+tos_len    | TOS ROM (write-ignored) |
//! | 0xFF8000..0xFFFFFF    | I/O |
//! | everything else       | open bus, reads all-ones |
//!
//! Three STE/Mega regions (DMA sound, blitter, extended joystick) are
//! absent on an STF and assert BERR. The access comes from inside a CPU
//! memory callback, so the fault is signalled by returning `None` through
//! the `m68000` crate's `MemoryAccess`, which raises the group-0 access
//! error before the instruction commits. While the bus-error vector is
//! still uninitialised (all zeros, as at early boot), the access is
//! swallowed and a dummy value returned instead.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use atari_shifter::Shifter;
use m68000::MemoryAccess;
use motorola_68901::Mfp68901;
use peripheral_atari_ikbd::AciaIkbd;
use wdc_wd1772::{DmaMemory, Wd1772};
use yamaha_ym2149::Ym2149;

use crate::irq::InterruptArbiter;

/// Shared mono sample queue between the machine and the host audio
/// callback. Capped at a quarter second; overflow drops the oldest
/// samples, trading a glitch for bounded latency.
#[derive(Clone)]
pub struct AudioQueue {
    inner: Arc<Mutex<VecDeque<f32>>>,
    cap: usize,
}

impl AudioQueue {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
            cap: sample_rate as usize / 4,
        }
    }

    pub fn push_samples(&self, samples: &[f32]) {
        let Ok(mut queue) = self.inner.lock() else {
            return;
        };
        for &sample in samples {
            queue.push_back(sample);
        }
        while queue.len() > self.cap {
            queue.pop_front();
        }
    }

    /// Fill `out`, repeating `last` on underrun. `last` tracks the final
    /// value handed out so the next underrun continues seamlessly.
    pub fn fill(&self, out: &mut [f32], last: &mut f32) {
        let mut queue = match self.inner.lock() {
            Ok(queue) => queue,
            Err(_) => {
                out.fill(*last);
                return;
            }
        };
        for slot in out.iter_mut() {
            *slot = queue.pop_front().unwrap_or(*last);
            *last = *slot;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// RAM access window handed to the WD1772 DMA engine.
struct RamWindow<'a> {
    ram: &'a mut [u8],
    mask: u32,
}

impl DmaMemory for RamWindow<'_> {
    fn read(&self, addr: u32) -> u8 {
        self.ram[(addr & self.mask) as usize]
    }
    fn write(&mut self, addr: u32, value: u8) {
        self.ram[(addr & self.mask) as usize] = value;
    }
}

pub struct Bus {
    pub ram: Vec<u8>,
    ram_mask: u32,
    rom: Vec<u8>,
    tos_base: u32,
    mmu_config: u8,

    pub shifter: Shifter,
    pub ym: Ym2149,
    pub mfp: Mfp68901,
    pub fdc: Wd1772,
    pub acia: Arc<Mutex<AciaIkbd>>,
    pub irq: InterruptArbiter,

    pub audio: AudioQueue,
    pub reset_requested: bool,
    debug: bool,
    rom_write_warned: bool,
}

impl Bus {
    pub fn new(
        ram_size: usize,
        rom: Vec<u8>,
        tos_base: u32,
        sample_rate: u32,
        debug: bool,
    ) -> Self {
        Self {
            ram: vec![0; ram_size],
            ram_mask: (ram_size as u32).wrapping_sub(1),
            rom,
            tos_base,
            mmu_config: 0,
            shifter: Shifter::new(),
            ym: Ym2149::new(sample_rate),
            mfp: Mfp68901::new(),
            fdc: Wd1772::new(),
            acia: Arc::new(Mutex::new(AciaIkbd::new())),
            irq: InterruptArbiter::new(),
            audio: AudioQueue::new(sample_rate),
            reset_requested: false,
            debug,
            rom_write_warned: false,
        }
    }

    pub fn tos_base(&self) -> u32 {
        self.tos_base
    }

    /// Peripheral reset: the 68000 RESET instruction pulses every device
    /// reset line but leaves CPU and RAM alone.
    pub fn reset_devices(&mut self) {
        self.shifter.reset();
        self.ym.reset();
        self.mfp.reset();
        self.fdc.reset();
        if let Ok(mut acia) = self.acia.lock() {
            acia.reset();
        }
        self.irq.reset();
        self.refresh_gpip_lines();
    }

    /// Mirror the device interrupt line states onto the MFP's GPIP pins.
    pub fn refresh_gpip_lines(&mut self) {
        let fdc_low = self.fdc.irq_asserted();
        self.mfp.set_gpip_input(5, !fdc_low);
        let acia_low = self
            .acia
            .lock()
            .map(|acia| acia.irq_asserted())
            .unwrap_or(false);
        self.mfp.set_gpip_input(4, !acia_low);
        // GPIP7: monochrome monitor detect, held high on a colour setup.
        self.mfp.set_gpip_input(7, true);
    }

    fn is_bus_error_region(addr: u32) -> bool {
        matches!(addr,
            0xFF8900..=0xFF8924   // STE DMA sound
            | 0xFF8A00..=0xFF8A3C // blitter
            | 0xFF9200..=0xFF9222 // STE extended joystick
        )
    }

    /// Guarded bus-error entry: `None` hands the fault to the CPU core,
    /// `Some(())` swallows it while the BERR vector is uninitialised.
    fn bus_error(&mut self, addr: u32, write: bool) -> Option<()> {
        if self.read32(8) == 0 {
            log::warn!(
                "bus error {} at {addr:#08X} swallowed (vector 2 uninitialised)",
                if write { "write" } else { "read" },
            );
            return Some(());
        }
        if self.debug {
            log::debug!(
                "bus error {} at {addr:#08X}",
                if write { "write" } else { "read" }
            );
        }
        None
    }

    // --- Plain (never-faulting) accessors --------------------------------

    pub fn read8(&mut self, addr: u32) -> u8 {
        let addr = addr & 0x00FF_FFFF;
        if addr < 8 {
            // The reset vectors shadow the start of ROM.
            return self.rom[addr as usize];
        }
        if addr <= self.ram_mask {
            return self.ram[addr as usize];
        }
        if addr >= self.tos_base && addr < self.tos_base + self.rom.len() as u32 {
            return self.rom[(addr - self.tos_base) as usize];
        }
        if addr >= 0xFF_8000 {
            return self.io_read8(addr);
        }
        0xFF
    }

    pub fn read16(&mut self, addr: u32) -> u16 {
        let addr = addr & 0x00FF_FFFF;
        if addr >= 0xFF_8000 {
            if let Some(value) = self.io_read16_wide(addr) {
                return value;
            }
        }
        (u16::from(self.read8(addr)) << 8) | u16::from(self.read8(addr.wrapping_add(1)))
    }

    pub fn read32(&mut self, addr: u32) -> u32 {
        (u32::from(self.read16(addr)) << 16) | u32::from(self.read16(addr.wrapping_add(2)))
    }

    pub fn write8(&mut self, addr: u32, value: u8) {
        let addr = addr & 0x00FF_FFFF;
        if addr < 8 || (addr >= self.tos_base && addr < self.tos_base + self.rom.len() as u32) {
            if !self.rom_write_warned {
                self.rom_write_warned = true;
                log::warn!("write to ROM at {addr:#08X} ignored");
            }
            return;
        }
        if addr <= self.ram_mask {
            self.ram[addr as usize] = value;
            return;
        }
        if addr >= 0xFF_8000 {
            self.io_write8(addr, value);
        }
    }

    pub fn write16(&mut self, addr: u32, value: u16) {
        let addr = addr & 0x00FF_FFFF;
        if addr >= 0xFF_8000 && self.io_write16_wide(addr, value) {
            return;
        }
        self.write8(addr, (value >> 8) as u8);
        self.write8(addr.wrapping_add(1), value as u8);
    }

    pub fn write32(&mut self, addr: u32, value: u32) {
        self.write16(addr, (value >> 16) as u16);
        self.write16(addr.wrapping_add(2), value as u16);
    }

    // --- I/O dispatch -----------------------------------------------------

    /// 16-bit registers that cannot be decomposed into byte halves
    /// without side effects.
    fn io_read16_wide(&mut self, addr: u32) -> Option<u16> {
        match addr {
            0xFF_8604 => {
                let value = self.fdc.read_register();
                self.refresh_gpip_lines();
                Some(value)
            }
            0xFF_8606 => Some(self.fdc.read_dma_status()),
            _ => None,
        }
    }

    fn io_write16_wide(&mut self, addr: u32, value: u16) -> bool {
        match addr {
            0xFF_8604 => {
                let Bus { fdc, ram, ram_mask, .. } = self;
                let mut window = RamWindow {
                    ram: ram.as_mut_slice(),
                    mask: *ram_mask,
                };
                fdc.write_register(value, &mut window);
                self.refresh_gpip_lines();
                true
            }
            0xFF_8606 => {
                self.fdc.write_dma_mode(value);
                true
            }
            // The PSG takes word writes with the payload in the high byte.
            0xFF_8800 => {
                self.ym.select_register((value >> 8) as u8);
                true
            }
            0xFF_8802 => {
                self.ym_data_write((value >> 8) as u8);
                true
            }
            _ => false,
        }
    }

    fn io_read8(&mut self, addr: u32) -> u8 {
        match addr {
            0xFF_8001 => self.mmu_config,
            0xFF_8201 => self.shifter.video_base_high(),
            0xFF_8203 => self.shifter.video_base_mid(),
            0xFF_8205 => self.shifter.video_counter_byte(16),
            0xFF_8207 => self.shifter.video_counter_byte(8),
            0xFF_8209 => self.shifter.video_counter_byte(0),
            0xFF_820A => self.shifter.sync_mode(),
            0xFF_8240..=0xFF_825F => {
                let index = ((addr - 0xFF_8240) / 2) as usize;
                let word = self.shifter.read_palette(index);
                if addr & 1 == 0 {
                    (word >> 8) as u8
                } else {
                    word as u8
                }
            }
            0xFF_8260 => self.shifter.resolution(),
            0xFF_8604 | 0xFF_8605 => {
                let word = self.io_read16_wide(0xFF_8604).unwrap_or(0xFFFF);
                if addr & 1 == 0 {
                    (word >> 8) as u8
                } else {
                    word as u8
                }
            }
            0xFF_8606 | 0xFF_8607 => {
                let word = self.fdc.read_dma_status();
                if addr & 1 == 0 {
                    (word >> 8) as u8
                } else {
                    word as u8
                }
            }
            0xFF_8609 => (self.fdc.dma_address() >> 16) as u8,
            0xFF_860B => (self.fdc.dma_address() >> 8) as u8,
            0xFF_860D => self.fdc.dma_address() as u8,
            0xFF_8800..=0xFF_88FF => {
                if addr & 2 == 0 {
                    self.ym.read_data()
                } else {
                    0xFF
                }
            }
            0xFF_FA00..=0xFF_FA2F => self.mfp.read((addr - 0xFF_FA00) as u8),
            0xFF_FC00 => self
                .acia
                .lock()
                .map(|acia| acia.read_status())
                .unwrap_or(0xFF),
            0xFF_FC02 => {
                let value = self
                    .acia
                    .lock()
                    .map(|mut acia| acia.read_data())
                    .unwrap_or(0xFF);
                self.refresh_gpip_lines();
                value
            }
            // MIDI ACIA: not modelled, but TOS probes it at boot. Always
            // report "transmit empty" so the probe terminates.
            0xFF_FC04 => 0x02,
            0xFF_FC06 => 0x00,
            _ => {
                if self.debug {
                    log::debug!("unhandled I/O read at {addr:#08X}");
                }
                0xFF
            }
        }
    }

    fn io_write8(&mut self, addr: u32, value: u8) {
        match addr {
            0xFF_8001 => {
                // Stored for read-back only; RAM sizing is fixed by the
                // host configuration.
                self.mmu_config = value;
            }
            0xFF_8201 => self.shifter.write_video_base_high(value),
            0xFF_8203 => self.shifter.write_video_base_mid(value),
            // The live video counter is read-only on the STF.
            0xFF_8205 | 0xFF_8207 | 0xFF_8209 => {}
            0xFF_820A => self.shifter.write_sync_mode(value),
            0xFF_8240..=0xFF_825F => {
                let index = ((addr - 0xFF_8240) / 2) as usize;
                let word = self.shifter.read_palette(index);
                let word = if addr & 1 == 0 {
                    (u16::from(value) << 8) | (word & 0x00FF)
                } else {
                    (word & 0xFF00) | u16::from(value)
                };
                self.shifter.write_palette(index, word);
            }
            0xFF_8260 => self.shifter.write_resolution(value),
            // Byte writes to the FDC word registers carry the payload in
            // the odd byte.
            0xFF_8605 => {
                self.io_write16_wide(0xFF_8604, u16::from(value));
            }
            0xFF_8607 => {
                self.fdc.write_dma_mode(u16::from(value));
            }
            0xFF_8604 | 0xFF_8606 => {}
            0xFF_8609 => self.fdc.set_dma_address_high(value),
            0xFF_860B => self.fdc.set_dma_address_mid(value),
            0xFF_860D => self.fdc.set_dma_address_low(value),
            0xFF_8800..=0xFF_88FF => {
                if addr & 2 == 0 {
                    self.ym.select_register(value);
                } else {
                    self.ym_data_write(value);
                }
            }
            0xFF_FA00..=0xFF_FA2F => self.mfp.write((addr - 0xFF_FA00) as u8, value),
            0xFF_FC00 => {
                if let Ok(mut acia) = self.acia.lock() {
                    acia.write_control(value);
                }
                self.refresh_gpip_lines();
            }
            0xFF_FC02 => {
                if self.debug {
                    log::debug!("IKBD command byte {value:#04X}");
                }
                if let Ok(mut acia) = self.acia.lock() {
                    acia.write_data(value);
                }
            }
            0xFF_FC04 | 0xFF_FC06 => {}
            _ => {
                if self.debug {
                    log::debug!("unhandled I/O write {value:#04X} at {addr:#08X}");
                }
            }
        }
    }

    /// PSG data write; port A carries the floppy drive select lines.
    fn ym_data_write(&mut self, value: u8) {
        if let Some(select) = self.ym.write_data(value) {
            self.fdc.set_drive_select(select.drive, select.side);
        }
    }

    /// Advance the ACIA serial line and mirror its interrupt onto GPIP4.
    pub fn acia_sync(&mut self, cycles: u32) {
        if let Ok(mut acia) = self.acia.lock() {
            acia.sync(cycles);
        }
        self.refresh_gpip_lines();
    }

    /// Drain the PSG's resampled output into the shared audio queue.
    pub fn pump_audio(&mut self) {
        let samples = self.ym.take_buffer();
        if !samples.is_empty() {
            self.audio.push_samples(&samples);
        }
    }
}

impl MemoryAccess for Bus {
    fn get_byte(&mut self, addr: u32) -> Option<u8> {
        let addr = addr & 0x00FF_FFFF;
        if Self::is_bus_error_region(addr) {
            return self.bus_error(addr, false).map(|()| 0xFF);
        }
        Some(self.read8(addr))
    }

    fn get_word(&mut self, addr: u32) -> Option<u16> {
        let addr = addr & 0x00FF_FFFF;
        if Self::is_bus_error_region(addr) {
            return self.bus_error(addr, false).map(|()| 0xFFFF);
        }
        Some(self.read16(addr))
    }

    fn set_byte(&mut self, addr: u32, value: u8) -> Option<()> {
        let addr = addr & 0x00FF_FFFF;
        if Self::is_bus_error_region(addr) {
            return self.bus_error(addr, true);
        }
        self.write8(addr, value);
        Some(())
    }

    fn set_word(&mut self, addr: u32, value: u16) -> Option<()> {
        let addr = addr & 0x00FF_FFFF;
        if Self::is_bus_error_region(addr) {
            return self.bus_error(addr, true);
        }
        self.write16(addr, value);
        Some(())
    }

    fn reset_instruction(&mut self) {
        self.reset_requested = true;
    }
}
