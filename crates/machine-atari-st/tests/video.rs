//! Frame-loop rendering: video base latch, counter write-back, and the
//! bitplane decode seen through a whole frame.

use machine_atari_st::atari_shifter::palette_to_argb;
use machine_atari_st::{AtariSt, MachineConfig, RamSize};

fn test_rom() -> Vec<u8> {
    let mut rom = vec![0u8; 192 * 1024];
    rom[0..4].copy_from_slice(&0x0000_8000u32.to_be_bytes());
    rom[4..8].copy_from_slice(&0x00FC_0008u32.to_be_bytes());
    rom[8] = 0x60;
    rom[9] = 0xFE;
    rom
}

fn make_machine() -> AtariSt {
    let mut config = MachineConfig::new(test_rom());
    config.ram = RamSize::Mb1;
    AtariSt::new(config).expect("machine")
}

fn point_screen_at(st: &mut AtariSt, base: u32) {
    st.bus.write8(0xFF_8201, (base >> 16) as u8);
    st.bus.write8(0xFF_8203, (base >> 8) as u8);
}

#[test]
fn low_mode_line_renders_doubled_pixels() {
    let mut st = make_machine();
    point_screen_at(&mut st, 0x1_0000);
    st.bus.write8(0xFF_8260, 0x00); // low resolution
    st.bus.write16(0xFF_8240, 0x0000); // background black
    st.bus.write16(0xFF_8242, 0x0777); // colour 1 white

    // First 16-pixel group of the first visible line: plane 0 solid.
    st.bus.write16(0x1_0000, 0xFFFF);

    st.run_frame();

    let fb = st.framebuffer();
    assert!(fb[..32].iter().all(|&p| p == 0xFFFF_FFFF));
    assert!(fb[32..640].iter().all(|&p| p == 0xFF00_0000));
    // Second row came from base + 160 and is all background.
    assert!(fb[640..1280].iter().all(|&p| p == 0xFF00_0000));
}

#[test]
fn rows_advance_by_160_bytes() {
    let mut st = make_machine();
    point_screen_at(&mut st, 0x1_0000);
    st.bus.write16(0xFF_8242, 0x0070); // colour 1 green

    // Mark the first group of visible row 10.
    st.bus.write16(0x1_0000 + 10 * 160, 0xFFFF);
    st.run_frame();

    let fb = st.framebuffer();
    let row = &fb[10 * 640..10 * 640 + 640];
    assert!(row[..32].iter().all(|&p| p == palette_to_argb(0x0070)));
    assert!(fb[..640].iter().all(|&p| p == 0xFF00_0000));
}

#[test]
fn video_counter_registers_track_the_beam() {
    let mut st = make_machine();
    point_screen_at(&mut st, 0x1_0000);
    st.run_frame();

    // The last visible line wrote back base + 199 * 160.
    let counter = 0x1_0000 + 199 * 160;
    assert_eq!(st.bus.read8(0xFF_8205), (counter >> 16) as u8);
    assert_eq!(st.bus.read8(0xFF_8207), (counter >> 8) as u8);
    assert_eq!(st.bus.read8(0xFF_8209), counter as u8);
}

#[test]
fn medium_mode_renders_single_width() {
    let mut st = make_machine();
    point_screen_at(&mut st, 0x1_0000);
    st.bus.write8(0xFF_8260, 0x01);
    st.bus.write16(0xFF_8242, 0x0007); // colour 1 blue

    // One medium-res group: plane 0 only, top bit set.
    st.bus.write16(0x1_0000, 0x8000);
    st.bus.write16(0x1_0002, 0x0000);
    st.run_frame();

    let fb = st.framebuffer();
    assert_eq!(fb[0], palette_to_argb(0x0007));
    assert_eq!(fb[1], 0xFF00_0000);
}

#[test]
fn high_resolution_blanks_instead_of_crashing() {
    let mut st = make_machine();
    point_screen_at(&mut st, 0x1_0000);
    st.bus.write8(0xFF_8260, 0x02);
    st.bus.write16(0x1_0000, 0xFFFF);
    st.run_frame();
    assert!(st.framebuffer().iter().all(|&p| p == 0xFF00_0000));
}
