//! WD1772 floppy disk controller behind the Atari ST DMA chip.
//!
//! The ST couples the WD1772 to a custom DMA circuit: the CPU never
//! transfers sector data itself, it programs a 24-bit DMA base address
//! (bit 0 forced low), a sector count, and a mode word that multiplexes
//! the controller's registers onto two I/O words:
//!
//! | Address  | Access | Selects |
//! |----------|--------|---------|
//! | 0xFF8604 | r/w    | FDC register (A1/A0 from the mode word) or the DMA sector count when mode bit 4 is set |
//! | 0xFF8606 | read   | DMA status: bit 0 = no error, bit 1 = sector count non-zero, bit 2 = DRQ |
//! | 0xFF8606 | write  | DMA mode word |
//! | 0xFF8609/0B/0D | r/w | DMA base address high/mid/low |
//!
//! Commands execute instantaneously against the inserted disk image and
//! finish by asserting the interrupt line (GPIP5 low on the MFP); reading
//! the status register releases the line.

use format_st::FloppyDisk;

/// DMA transfers RAM bytes through this interface; the machine supplies
/// its memory behind it.
pub trait DmaMemory {
    fn read(&self, addr: u32) -> u8;
    fn write(&mut self, addr: u32, value: u8);
}

// DMA mode word bits.
const MODE_A0: u16 = 0x0002;
const MODE_A1: u16 = 0x0004;
const MODE_HDC: u16 = 0x0008;
const MODE_SECTOR_COUNT: u16 = 0x0010;
const MODE_WRITE: u16 = 0x0100;

// Status bits, type I commands.
const ST1_BUSY: u8 = 0x01;
const ST1_INDEX: u8 = 0x02;
const ST1_TRACK0: u8 = 0x04;
const ST1_SPIN_UP: u8 = 0x20;
const ST1_WRITE_PROTECT: u8 = 0x40;
const ST1_MOTOR_ON: u8 = 0x80;

// Status bits, type II/III commands.
const ST2_RECORD_NOT_FOUND: u8 = 0x10;
const ST2_WRITE_PROTECT: u8 = 0x40;
const ST2_NOT_READY: u8 = 0x80;

/// Highest physical track the head will step to.
const MAX_HEAD_TRACK: u8 = 85;

const SECTOR_SIZE: u32 = 512;

struct Drive {
    disk: Option<FloppyDisk>,
    head_track: u8,
}

impl Drive {
    fn new() -> Self {
        Self {
            disk: None,
            head_track: 0,
        }
    }
}

/// WD1772 + DMA register block.
pub struct Wd1772 {
    command: u8,
    status: u8,
    track: u8,
    sector: u8,
    data: u8,

    dma_mode: u16,
    dma_sector_count: u8,
    dma_address: u32,
    dma_error: bool,

    drives: [Drive; 2],
    selected_drive: Option<u8>,
    side: u8,
    step_inward: bool,

    irq_asserted: bool,
}

impl Wd1772 {
    pub fn new() -> Self {
        Self {
            command: 0,
            status: 0,
            track: 0,
            sector: 0,
            data: 0,
            dma_mode: 0,
            dma_sector_count: 0,
            dma_address: 0,
            dma_error: false,
            drives: [Drive::new(), Drive::new()],
            selected_drive: None,
            side: 0,
            step_inward: true,
            irq_asserted: false,
        }
    }

    pub fn reset(&mut self) {
        self.command = 0;
        self.status = 0;
        self.track = 0;
        self.sector = 0;
        self.data = 0;
        self.dma_mode = 0;
        self.dma_sector_count = 0;
        self.dma_address = 0;
        self.dma_error = false;
        self.selected_drive = None;
        self.side = 0;
        self.step_inward = true;
        self.irq_asserted = false;
        for drive in &mut self.drives {
            drive.head_track = 0;
        }
    }

    /// Drive/side selection, decoded from YM2149 port A by the machine.
    pub fn set_drive_select(&mut self, drive: Option<u8>, side: u8) {
        self.selected_drive = drive.filter(|&d| d < 2);
        self.side = side & 1;
    }

    pub fn insert_disk(&mut self, drive: u8, disk: FloppyDisk) {
        self.drives[usize::from(drive & 1)].disk = Some(disk);
    }

    pub fn eject_disk(&mut self, drive: u8) -> Option<FloppyDisk> {
        self.drives[usize::from(drive & 1)].disk.take()
    }

    pub fn disk(&self, drive: u8) -> Option<&FloppyDisk> {
        self.drives[usize::from(drive & 1)].disk.as_ref()
    }

    pub fn disk_mut(&mut self, drive: u8) -> Option<&mut FloppyDisk> {
        self.drives[usize::from(drive & 1)].disk.as_mut()
    }

    /// Interrupt line state (true = asserted, i.e. GPIP5 pulled low).
    pub fn irq_asserted(&self) -> bool {
        self.irq_asserted
    }

    /// Word write to 0xFF8604: sector count or the selected FDC register.
    pub fn write_register(&mut self, value: u16, mem: &mut impl DmaMemory) {
        if self.dma_mode & MODE_HDC != 0 {
            return; // hard disk controller selected, FDC deaf
        }
        if self.dma_mode & MODE_SECTOR_COUNT != 0 {
            self.dma_sector_count = value as u8;
            return;
        }
        match (self.dma_mode & (MODE_A1 | MODE_A0)) >> 1 {
            0 => self.write_command(value as u8, mem),
            1 => self.track = value as u8,
            2 => self.sector = value as u8,
            _ => self.data = value as u8,
        }
    }

    /// Word read from 0xFF8604.
    pub fn read_register(&mut self) -> u16 {
        if self.dma_mode & MODE_HDC != 0 {
            return 0xFFFF;
        }
        if self.dma_mode & MODE_SECTOR_COUNT != 0 {
            return u16::from(self.dma_sector_count);
        }
        match (self.dma_mode & (MODE_A1 | MODE_A0)) >> 1 {
            0 => {
                // Status read releases the interrupt line.
                self.irq_asserted = false;
                u16::from(self.status)
            }
            1 => u16::from(self.track),
            2 => u16::from(self.sector),
            _ => u16::from(self.data),
        }
    }

    /// Word write to 0xFF8606: the DMA mode word. Flipping the transfer
    /// direction resets the sector counter and the error latch.
    pub fn write_dma_mode(&mut self, value: u16) {
        if (self.dma_mode ^ value) & MODE_WRITE != 0 {
            self.dma_sector_count = 0;
            self.dma_error = false;
        }
        self.dma_mode = value;
    }

    /// Word read from 0xFF8606: the 3-bit DMA status.
    pub fn read_dma_status(&self) -> u16 {
        let mut status = 0u16;
        if !self.dma_error {
            status |= 0x01;
        }
        if self.dma_sector_count != 0 {
            status |= 0x02;
        }
        status
    }

    pub fn dma_mode(&self) -> u16 {
        self.dma_mode
    }

    pub fn set_dma_address_high(&mut self, value: u8) {
        self.dma_address = (self.dma_address & 0x00_FFFF) | (u32::from(value) << 16);
        self.dma_address &= 0xFF_FFFE;
    }

    pub fn set_dma_address_mid(&mut self, value: u8) {
        self.dma_address = (self.dma_address & 0xFF_00FF) | (u32::from(value) << 8);
    }

    pub fn set_dma_address_low(&mut self, value: u8) {
        self.dma_address = (self.dma_address & 0xFF_FF00) | u32::from(value & 0xFE);
    }

    pub fn dma_address(&self) -> u32 {
        self.dma_address
    }

    pub fn dma_sector_count(&self) -> u8 {
        self.dma_sector_count
    }

    fn selected(&mut self) -> Option<(&mut Drive, u8)> {
        let side = self.side;
        let index = usize::from(self.selected_drive?);
        Some((&mut self.drives[index], side))
    }

    fn write_command(&mut self, command: u8, mem: &mut impl DmaMemory) {
        self.command = command;
        match command >> 4 {
            0x0 => {
                // RESTORE
                if let Some((drive, _)) = self.selected() {
                    drive.head_track = 0;
                }
                self.track = 0;
                self.finish_type1();
            }
            0x1 => {
                // SEEK to the track number in the data register
                let target = self.data;
                if let Some((drive, _)) = self.selected() {
                    let limit = drive
                        .disk
                        .as_ref()
                        .map(|disk| (disk.geometry().tracks - 1) as u8)
                        .unwrap_or(MAX_HEAD_TRACK);
                    drive.head_track = target.min(limit);
                }
                self.track = target;
                self.finish_type1();
            }
            0x2 | 0x3 => {
                let inward = self.step_inward;
                self.step(inward, command & 0x10 != 0);
            }
            0x4 | 0x5 => self.step(true, command & 0x10 != 0),
            0x6 | 0x7 => self.step(false, command & 0x10 != 0),
            0x8 | 0x9 => self.transfer_sectors(command & 0x10 != 0, false, mem),
            0xA | 0xB => self.transfer_sectors(command & 0x10 != 0, true, mem),
            0xC => self.read_address(mem),
            0xD => {
                // FORCE INTERRUPT: abort and release the line immediately.
                self.status &= !ST1_BUSY;
                self.irq_asserted = false;
            }
            0xE => self.read_track(mem),
            _ => self.write_track(),
        }
    }

    fn step(&mut self, inward: bool, update_track: bool) {
        self.step_inward = inward;
        if let Some(index) = self.selected_drive {
            let drive = &mut self.drives[usize::from(index)];
            drive.head_track = if inward {
                (drive.head_track + 1).min(MAX_HEAD_TRACK)
            } else {
                drive.head_track.saturating_sub(1)
            };
            if update_track {
                self.track = self.drives[usize::from(index)].head_track;
            }
        }
        self.finish_type1();
    }

    fn finish_type1(&mut self) {
        let mut status = ST1_MOTOR_ON | ST1_SPIN_UP;
        if let Some(drive_index) = self.selected_drive {
            let drive = &self.drives[usize::from(drive_index)];
            if drive.head_track == 0 {
                status |= ST1_TRACK0;
            }
            if let Some(disk) = &drive.disk {
                status |= ST1_INDEX;
                if disk.write_protected() {
                    status |= ST1_WRITE_PROTECT;
                }
            }
        }
        self.status = status;
        self.irq_asserted = true;
    }

    fn finish_type2(&mut self, status: u8) {
        self.status = status;
        self.irq_asserted = true;
    }

    /// READ SECTOR / WRITE SECTOR, single or multi.
    fn transfer_sectors(&mut self, multi: bool, writing: bool, mem: &mut impl DmaMemory) {
        let side = self.side;
        let Some(drive_index) = self.selected_drive else {
            self.finish_type2(ST2_NOT_READY | ST2_RECORD_NOT_FOUND);
            return;
        };
        let drive = &mut self.drives[usize::from(drive_index)];
        let Some(disk) = drive.disk.as_mut() else {
            self.finish_type2(ST2_NOT_READY | ST2_RECORD_NOT_FOUND);
            return;
        };

        if writing && disk.write_protected() {
            self.finish_type2(ST2_WRITE_PROTECT);
            return;
        }

        let geometry = disk.geometry();
        let blocks = if multi {
            u32::from(self.dma_sector_count).max(1)
        } else {
            1
        };

        let mut status = 0u8;
        for _ in 0..blocks {
            let sector = u32::from(self.sector);
            if sector == 0 || sector > geometry.sectors_per_track {
                status |= ST2_RECORD_NOT_FOUND;
                self.dma_error = true;
                break;
            }
            let lba = (u32::from(drive.head_track) * geometry.sides + u32::from(side))
                * geometry.sectors_per_track
                + (sector - 1);

            if writing {
                let Some(buf) = disk.sector_mut(lba) else {
                    status |= ST2_RECORD_NOT_FOUND;
                    self.dma_error = true;
                    break;
                };
                for byte in buf.iter_mut() {
                    *byte = mem.read(self.dma_address);
                    self.dma_address = (self.dma_address + 1) & 0xFF_FFFF;
                }
            } else {
                let Some(buf) = disk.sector(lba) else {
                    status |= ST2_RECORD_NOT_FOUND;
                    self.dma_error = true;
                    break;
                };
                for &byte in buf {
                    mem.write(self.dma_address, byte);
                    self.dma_address = (self.dma_address + 1) & 0xFF_FFFF;
                }
            }

            self.dma_sector_count = self.dma_sector_count.saturating_sub(1);
            if multi {
                // Sector register walks the track, wrapping past the end.
                self.sector = if u32::from(self.sector) >= geometry.sectors_per_track {
                    1
                } else {
                    self.sector + 1
                };
            }
            if self.dma_sector_count == 0 && multi {
                break;
            }
        }

        self.finish_type2(status);
    }

    /// READ ADDRESS: synthesise the next ID field and DMA it to memory.
    fn read_address(&mut self, mem: &mut impl DmaMemory) {
        let Some(drive_index) = self.selected_drive else {
            self.finish_type2(ST2_NOT_READY | ST2_RECORD_NOT_FOUND);
            return;
        };
        let head_track = self.drives[usize::from(drive_index)].head_track;
        let id = [head_track, self.side, self.sector.max(1), 2, 0, 0];
        for byte in id {
            mem.write(self.dma_address, byte);
            self.dma_address = (self.dma_address + 1) & 0xFF_FFFF;
        }
        self.finish_type2(0);
    }

    /// READ TRACK: the raw-gap format is not modelled; the track's sector
    /// payloads stream out in order instead.
    fn read_track(&mut self, mem: &mut impl DmaMemory) {
        let side = self.side;
        let Some(drive_index) = self.selected_drive else {
            self.finish_type2(ST2_NOT_READY | ST2_RECORD_NOT_FOUND);
            return;
        };
        let drive = &self.drives[usize::from(drive_index)];
        let Some(disk) = drive.disk.as_ref() else {
            self.finish_type2(ST2_NOT_READY | ST2_RECORD_NOT_FOUND);
            return;
        };
        let geometry = disk.geometry();
        let base =
            (u32::from(drive.head_track) * geometry.sides + u32::from(side)) * geometry.sectors_per_track;
        let mut bytes = Vec::with_capacity((geometry.sectors_per_track * SECTOR_SIZE) as usize);
        for sector in 0..geometry.sectors_per_track {
            match disk.sector(base + sector) {
                Some(buf) => bytes.extend_from_slice(buf),
                None => {
                    self.dma_error = true;
                    self.finish_type2(ST2_RECORD_NOT_FOUND);
                    return;
                }
            }
        }
        for byte in bytes {
            mem.write(self.dma_address, byte);
            self.dma_address = (self.dma_address + 1) & 0xFF_FFFF;
        }
        self.finish_type2(0);
    }

    /// WRITE TRACK (format): only the write-protect check is honoured;
    /// geometry is fixed by the image.
    fn write_track(&mut self) {
        let protected = self
            .selected_drive
            .and_then(|d| self.drives[usize::from(d)].disk.as_ref())
            .map(|disk| disk.write_protected())
            .unwrap_or(false);
        if protected {
            self.finish_type2(ST2_WRITE_PROTECT);
        } else {
            self.finish_type2(0);
        }
    }
}

impl Default for Wd1772 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use format_st::FloppyDisk;

    struct TestRam(Vec<u8>);

    impl DmaMemory for TestRam {
        fn read(&self, addr: u32) -> u8 {
            self.0[addr as usize]
        }
        fn write(&mut self, addr: u32, value: u8) {
            self.0[addr as usize] = value;
        }
    }

    fn patterned_disk() -> FloppyDisk {
        // 2 sides, 80 tracks, 9 sectors: sector n starts with byte n & 0xFF.
        let mut data = vec![0u8; 2 * 80 * 9 * 512];
        for (lba, chunk) in data.chunks_mut(512).enumerate() {
            chunk[0] = (lba & 0xFF) as u8;
            chunk[1] = (lba >> 8) as u8;
        }
        FloppyDisk::from_st_bytes(data).expect("valid image")
    }

    fn fdc_with_disk() -> Wd1772 {
        let mut fdc = Wd1772::new();
        fdc.insert_disk(0, patterned_disk());
        fdc.set_drive_select(Some(0), 0);
        fdc
    }

    fn select_fdc_register(fdc: &mut Wd1772, reg: u16) {
        let mode = fdc.dma_mode() & !(MODE_A1 | MODE_A0 | MODE_SECTOR_COUNT);
        fdc.write_dma_mode(mode | (reg << 1));
    }

    fn write_fdc(fdc: &mut Wd1772, ram: &mut TestRam, reg: u16, value: u16) {
        select_fdc_register(fdc, reg);
        fdc.write_register(value, ram);
    }

    fn set_sector_count(fdc: &mut Wd1772, ram: &mut TestRam, count: u16) {
        let mode = fdc.dma_mode() | MODE_SECTOR_COUNT;
        fdc.write_dma_mode(mode);
        fdc.write_register(count, ram);
        fdc.write_dma_mode(mode & !MODE_SECTOR_COUNT);
    }

    #[test]
    fn restore_homes_head_and_reports_track0() {
        let mut fdc = fdc_with_disk();
        let mut ram = TestRam(vec![0; 0x1000]);
        write_fdc(&mut fdc, &mut ram, 1, 40);
        write_fdc(&mut fdc, &mut ram, 0, 0x00);

        select_fdc_register(&mut fdc, 0);
        let status = fdc.read_register() as u8;
        assert_ne!(status & ST1_TRACK0, 0);
        assert_ne!(status & ST1_MOTOR_ON, 0);
        assert_eq!(fdc.read_register() & u16::from(ST1_BUSY), 0);
    }

    #[test]
    fn seek_moves_head_to_data_register() {
        let mut fdc = fdc_with_disk();
        let mut ram = TestRam(vec![0; 0x1000]);
        write_fdc(&mut fdc, &mut ram, 3, 12); // data register
        write_fdc(&mut fdc, &mut ram, 0, 0x10); // SEEK

        select_fdc_register(&mut fdc, 1);
        assert_eq!(fdc.read_register(), 12);
        select_fdc_register(&mut fdc, 0);
        assert_eq!(fdc.read_register() as u8 & ST1_TRACK0, 0);
    }

    #[test]
    fn step_in_out_clamps_at_home() {
        let mut fdc = fdc_with_disk();
        let mut ram = TestRam(vec![0; 0x1000]);
        write_fdc(&mut fdc, &mut ram, 0, 0x50); // STEP-IN, update track
        write_fdc(&mut fdc, &mut ram, 0, 0x50);
        select_fdc_register(&mut fdc, 1);
        assert_eq!(fdc.read_register(), 2);

        write_fdc(&mut fdc, &mut ram, 0, 0x70); // STEP-OUT
        write_fdc(&mut fdc, &mut ram, 0, 0x70);
        write_fdc(&mut fdc, &mut ram, 0, 0x70);
        select_fdc_register(&mut fdc, 0);
        assert_ne!(fdc.read_register() as u8 & ST1_TRACK0, 0);
    }

    #[test]
    fn read_sector_transfers_to_dma_address() {
        let mut fdc = fdc_with_disk();
        let mut ram = TestRam(vec![0; 0x10000]);
        fdc.set_dma_address_mid(0x10); // DMA base 0x001000
        set_sector_count(&mut fdc, &mut ram, 1);

        write_fdc(&mut fdc, &mut ram, 2, 3); // sector 3
        write_fdc(&mut fdc, &mut ram, 0, 0x80); // READ SECTOR

        // Track 0, side 0, sector 3 -> LBA 2.
        assert_eq!(ram.0[0x1000], 2);
        assert_eq!(fdc.dma_address(), 0x1000 + 512);
        assert_eq!(fdc.dma_sector_count(), 0);
        assert!(fdc.irq_asserted());

        select_fdc_register(&mut fdc, 0);
        let status = fdc.read_register() as u8;
        assert_eq!(status & ST2_RECORD_NOT_FOUND, 0);
        assert!(!fdc.irq_asserted(), "status read clears the line");
    }

    #[test]
    fn multi_sector_read_advances_and_wraps() {
        let mut fdc = fdc_with_disk();
        let mut ram = TestRam(vec![0; 0x10000]);
        fdc.set_dma_address_mid(0x20);
        set_sector_count(&mut fdc, &mut ram, 3);

        write_fdc(&mut fdc, &mut ram, 2, 8); // sectors 8, 9, then wrap to 1
        write_fdc(&mut fdc, &mut ram, 0, 0x90); // READ SECTOR multi

        assert_eq!(ram.0[0x2000], 7); // LBA 7 (sector 8)
        assert_eq!(ram.0[0x2000 + 512], 8); // LBA 8 (sector 9)
        assert_eq!(ram.0[0x2000 + 1024], 0); // LBA 0 (wrapped sector 1)
        assert_eq!(fdc.dma_address(), 0x2000 + 3 * 512);
        assert_eq!(fdc.dma_sector_count(), 0);
        select_fdc_register(&mut fdc, 2);
        assert_eq!(fdc.read_register(), 2, "sector register past the wrap");
    }

    #[test]
    fn side_select_changes_lba() {
        let mut fdc = fdc_with_disk();
        let mut ram = TestRam(vec![0; 0x10000]);
        fdc.set_drive_select(Some(0), 1);
        fdc.set_dma_address_mid(0x10);
        write_fdc(&mut fdc, &mut ram, 2, 1);
        write_fdc(&mut fdc, &mut ram, 0, 0x80);
        // Track 0, side 1, sector 1 -> LBA 9.
        assert_eq!(ram.0[0x1000], 9);
    }

    #[test]
    fn bogus_sector_sets_record_not_found_and_dma_error() {
        let mut fdc = fdc_with_disk();
        let mut ram = TestRam(vec![0; 0x1000]);
        write_fdc(&mut fdc, &mut ram, 2, 10); // past 9 sectors/track
        write_fdc(&mut fdc, &mut ram, 0, 0x80);

        select_fdc_register(&mut fdc, 0);
        assert_ne!(fdc.read_register() as u8 & ST2_RECORD_NOT_FOUND, 0);
        assert_eq!(fdc.read_dma_status() & 0x01, 0, "error bit active-low");
    }

    #[test]
    fn write_sector_stores_ram_bytes() {
        let mut fdc = fdc_with_disk();
        let mut ram = TestRam(vec![0; 0x10000]);
        for (i, byte) in ram.0[0x3000..0x3200].iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        fdc.set_dma_address_mid(0x30);
        write_fdc(&mut fdc, &mut ram, 2, 5);
        write_fdc(&mut fdc, &mut ram, 0, 0xA0); // WRITE SECTOR

        let disk = fdc.disk(0).expect("disk");
        let sector = disk.sector(4).expect("lba 4");
        assert_eq!(sector[0], 0);
        assert_eq!(sector[100], 100);
        assert!(disk.dirty());
    }

    #[test]
    fn write_sector_honours_write_protect() {
        let mut fdc = fdc_with_disk();
        let mut ram = TestRam(vec![0; 0x10000]);
        fdc.disk_mut(0).expect("disk").set_write_protected(true);
        write_fdc(&mut fdc, &mut ram, 2, 1);
        write_fdc(&mut fdc, &mut ram, 0, 0xA0);

        select_fdc_register(&mut fdc, 0);
        assert_ne!(fdc.read_register() as u8 & ST2_WRITE_PROTECT, 0);
        assert!(!fdc.disk(0).expect("disk").dirty());
    }

    #[test]
    fn read_address_emits_id_field() {
        let mut fdc = fdc_with_disk();
        let mut ram = TestRam(vec![0; 0x1000]);
        fdc.set_dma_address_low(0x40);
        write_fdc(&mut fdc, &mut ram, 3, 7);
        write_fdc(&mut fdc, &mut ram, 0, 0x10); // SEEK to 7
        write_fdc(&mut fdc, &mut ram, 2, 4);
        write_fdc(&mut fdc, &mut ram, 0, 0xC0); // READ ADDRESS

        assert_eq!(&ram.0[0x40..0x46], &[7, 0, 4, 2, 0, 0]);
        assert_eq!(fdc.dma_address(), 0x46);
    }

    #[test]
    fn force_interrupt_releases_line() {
        let mut fdc = fdc_with_disk();
        let mut ram = TestRam(vec![0; 0x1000]);
        write_fdc(&mut fdc, &mut ram, 0, 0x00); // RESTORE asserts the line
        assert!(fdc.irq_asserted());
        write_fdc(&mut fdc, &mut ram, 0, 0xD0);
        assert!(!fdc.irq_asserted());
    }

    #[test]
    fn direction_flip_clears_count_and_error() {
        let mut fdc = fdc_with_disk();
        let mut ram = TestRam(vec![0; 0x1000]);
        set_sector_count(&mut fdc, &mut ram, 5);
        write_fdc(&mut fdc, &mut ram, 2, 12);
        write_fdc(&mut fdc, &mut ram, 0, 0x80); // RNF, sets dma_error
        assert_eq!(fdc.read_dma_status() & 0x01, 0);

        fdc.write_dma_mode(fdc.dma_mode() | MODE_WRITE);
        assert_eq!(fdc.dma_sector_count(), 0);
        assert_eq!(fdc.read_dma_status() & 0x01, 0x01);
    }

    #[test]
    fn sector_count_readback_via_mode_bit() {
        let mut fdc = fdc_with_disk();
        let mut ram = TestRam(vec![0; 0x1000]);
        set_sector_count(&mut fdc, &mut ram, 7);
        fdc.write_dma_mode(fdc.dma_mode() | MODE_SECTOR_COUNT);
        assert_eq!(fdc.read_register(), 7);
        assert_eq!(fdc.read_dma_status() & 0x02, 0x02);
    }

    #[test]
    fn hdc_select_makes_fdc_deaf() {
        let mut fdc = fdc_with_disk();
        let mut ram = TestRam(vec![0; 0x1000]);
        fdc.write_dma_mode(MODE_HDC);
        fdc.write_register(0x80, &mut ram);
        assert!(!fdc.irq_asserted());
        assert_eq!(fdc.read_register(), 0xFFFF);
    }

    #[test]
    fn dma_address_bit0_forced_low() {
        let mut fdc = Wd1772::new();
        fdc.set_dma_address_low(0x55);
        assert_eq!(fdc.dma_address(), 0x54);
    }

    #[test]
    fn no_disk_reports_not_ready() {
        let mut fdc = Wd1772::new();
        let mut ram = TestRam(vec![0; 0x1000]);
        fdc.set_drive_select(Some(0), 0);
        write_fdc(&mut fdc, &mut ram, 0, 0x80);
        select_fdc_register(&mut fdc, 0);
        assert_ne!(fdc.read_register() as u8 & ST2_NOT_READY, 0);
    }
}
