//! Atari ST (STF/FM) machine core.
//!
//! One `AtariSt` owns the 68000 (the external `m68000` interpreter), the
//! bus with every device behind it, and the 640x200 ARGB framebuffer. The
//! master loop is scanline-paced: each of the 313 PAL lines runs the CPU
//! for 448 + 64 cycle batches, keeps the PSG and MFP in step with the
//! same cycle counts, raises HBL, feeds the ACIA serial line, and renders
//! the 200 visible lines. VBL fires after the last line.
//!
//! Interrupts are level-sensitive. The integration layer plays the role
//! of the 68000's interrupt-acknowledge cycle: between instructions it
//! compares the arbiter's IPL with the status-register mask, asks the
//! arbiter (or the MFP, at level 6) for the vector, pushes the 6-byte
//! frame, and redirects the program counter.

pub mod bus;
pub mod clock;
pub mod config;
pub mod irq;

use m68000::cpu_details::Mc68000;
use m68000::M68000;

pub use crate::bus::{AudioQueue, Bus};
pub use crate::clock::FramePacer;
pub use crate::config::{MachineConfig, MachineError, RamSize, StModel};
pub use crate::irq::InterruptArbiter;

// Re-export the chip crates so tests and the runner reach them through
// the machine.
pub use atari_shifter;
pub use format_st;
pub use motorola_68901;
pub use peripheral_atari_ikbd;
pub use wdc_wd1772;
pub use yamaha_ym2149;

use atari_shifter::{BYTES_PER_LINE, FB_HEIGHT, FB_WIDTH};

/// CPU clock.
pub const CPU_HZ: u32 = 8_000_000;

/// PAL scanlines per frame.
pub const LINES_PER_FRAME: u32 = 313;

/// CPU cycles per scanline (448 + 64).
pub const CYCLES_PER_LINE: u32 = 512;

/// First and one-past-last scanline of the visible window.
pub const VISIBLE_LINE_START: u32 = 63;
pub const VISIBLE_LINE_END: u32 = 263;

/// Frames per second.
pub const FRAME_RATE: u32 = 50;

pub struct AtariSt {
    cpu: M68000<Mc68000>,
    pub bus: Bus,
    framebuffer: Vec<u32>,
    frame_count: u64,
    highres_reported: bool,
}

impl AtariSt {
    pub fn new(config: MachineConfig) -> Result<Self, MachineError> {
        if config.model == StModel::Ste {
            return Err(MachineError::UnsupportedModel);
        }
        let tos_base = config.tos_base()?;
        let bus = Bus::new(
            config.ram.bytes(),
            config.tos,
            tos_base,
            config.sample_rate,
            config.debug,
        );
        Ok(Self {
            cpu: M68000::new(),
            bus,
            framebuffer: vec![0xFF00_0000; FB_WIDTH * FB_HEIGHT],
            frame_count: 0,
            highres_reported: false,
        })
    }

    /// Cold reset: the CPU refetches SSP/PC from the ROM vectors and every
    /// peripheral returns to power-on state. RAM is preserved.
    pub fn reset(&mut self) {
        self.cpu = M68000::new();
        self.bus.reset_devices();
    }

    /// The 640x200 ARGB8888 output of the last completed frame.
    pub fn framebuffer(&self) -> &[u32] {
        &self.framebuffer
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Handle for the host audio sink (sole consumer of the queue).
    pub fn audio_queue(&self) -> AudioQueue {
        self.bus.audio.clone()
    }

    /// Handle for host input threads; every ACIA/IKBD operation goes
    /// through this one mutex.
    pub fn acia_handle(
        &self,
    ) -> std::sync::Arc<std::sync::Mutex<peripheral_atari_ikbd::AciaIkbd>> {
        self.bus.acia.clone()
    }

    pub fn insert_disk(&mut self, drive: u8, disk: format_st::FloppyDisk) {
        self.bus.fdc.insert_disk(drive, disk);
    }

    pub fn eject_disk(&mut self, drive: u8) -> Option<format_st::FloppyDisk> {
        self.bus.fdc.eject_disk(drive)
    }

    pub fn has_disk(&self, drive: u8) -> bool {
        self.bus.fdc.disk(drive).is_some()
    }

    fn pending_ipl(&self) -> u8 {
        self.bus.irq.ipl(self.bus.mfp.irq_active())
    }

    /// Deliver the highest pending interrupt if the SR mask admits it.
    fn service_interrupt(&mut self) {
        let level = self.pending_ipl();
        if level == 0 || level <= self.cpu.regs.sr.interrupt_mask {
            return;
        }

        let vector = if level == 6 {
            self.bus.mfp.iack()
        } else {
            self.bus.irq.acknowledge(level)
        };

        let sr_before: u16 = self.cpu.regs.sr.into();
        self.cpu.regs.sr.s = true;
        self.cpu.regs.sr.t = false;
        self.cpu.regs.sr.interrupt_mask = level;

        let pc = self.cpu.regs.pc.0;
        let sp = self.cpu.regs.a(7).wrapping_sub(6);
        self.cpu.regs.a_mut(7).0 = sp;
        self.bus.write16(sp, sr_before);
        self.bus.write32(sp.wrapping_add(2), pc);

        self.cpu.regs.pc.0 = self.bus.read32(u32::from(vector) * 4);
        self.cpu.stop = false;
    }

    /// Run the CPU for at least `budget` cycles (the interpreter may
    /// overshoot by one instruction). A stopped CPU with no deliverable
    /// interrupt idles out the batch.
    pub fn execute_for(&mut self, budget: u32) {
        let mut executed = 0u32;
        while executed < budget {
            self.service_interrupt();
            if self.cpu.stop {
                break;
            }
            let cycles = self.cpu.interpreter(&mut self.bus) as u32;
            executed += cycles.max(4);
            if self.bus.reset_requested {
                self.bus.reset_requested = false;
                self.bus.reset_devices();
            }
        }
    }

    /// Advance the machine by one PAL frame.
    pub fn run_frame(&mut self) {
        let mut counter = self.bus.shifter.video_base();

        for line in 0..LINES_PER_FRAME {
            self.execute_for(448);
            self.bus.ym.sync(448);
            self.bus.mfp.update_timers(448);

            self.execute_for(64);
            self.bus.ym.sync(64);
            self.bus.mfp.update_timers(64);

            self.bus.irq.raise_hbl();
            self.bus.acia_sync(CYCLES_PER_LINE);

            if (VISIBLE_LINE_START..VISIBLE_LINE_END).contains(&line) {
                self.bus.shifter.set_video_counter(counter);
                let row = (line - VISIBLE_LINE_START) as usize;
                let dst = &mut self.framebuffer[row * FB_WIDTH..(row + 1) * FB_WIDTH];
                match self.bus.shifter.blit_line(&self.bus.ram, counter, dst) {
                    Ok(()) => self.highres_reported = false,
                    Err(error) => {
                        if !self.highres_reported {
                            self.highres_reported = true;
                            log::warn!("scanline render disabled: {error}");
                        }
                        dst.fill(0xFF00_0000);
                    }
                }
                counter = (counter + BYTES_PER_LINE) & 0x00FF_FFFF;
                self.bus.mfp.tick_event_count_a();
                self.bus.mfp.tick_event_count_b();
            }
        }

        self.bus.irq.raise_vbl();
        self.bus.pump_audio();
        self.frame_count += 1;
    }
}
