//! Interrupt delivery through the arbiter: HBL, VBL, and MFP vectors
//! observed by hand-assembled 68000 handlers.

use machine_atari_st::{AtariSt, MachineConfig, RamSize};

/// Build a 192K TOS image whose program starts at 0xFC0008.
fn test_rom(program: &[u8]) -> Vec<u8> {
    let mut rom = vec![0u8; 192 * 1024];
    rom[0..4].copy_from_slice(&0x0000_8000u32.to_be_bytes());
    rom[4..8].copy_from_slice(&0x00FC_0008u32.to_be_bytes());
    rom[8..8 + program.len()].copy_from_slice(program);
    rom
}

fn make_machine(program: &[u8]) -> AtariSt {
    let mut config = MachineConfig::new(test_rom(program));
    config.ram = RamSize::Mb1;
    AtariSt::new(config).expect("machine")
}

/// MOVE #$2100,SR (supervisor, interrupt mask 1) then spin.
const UNMASK_AND_SPIN: &[u8] = &[
    0x46, 0xFC, 0x21, 0x00, // MOVE #$2100,SR
    0x60, 0xFE, // BRA.S *
];

/// Spin with the reset-time mask (7) in place.
const SPIN_MASKED: &[u8] = &[0x60, 0xFE];

/// ADDQ.L #1,<abs>.W ; RTE
fn poke_counter_handler(st: &mut AtariSt, handler: u32, counter: u16) {
    st.bus.write16(handler, 0x52B8);
    st.bus.write16(handler + 2, counter);
    st.bus.write16(handler + 4, 0x4E73);
}

#[test]
fn hbl_and_vbl_autovectors_fire() {
    let mut st = make_machine(UNMASK_AND_SPIN);
    poke_counter_handler(&mut st, 0x2000, 0x3000);
    poke_counter_handler(&mut st, 0x2100, 0x3004);
    st.bus.write32(26 * 4, 0x2000); // HBL autovector
    st.bus.write32(28 * 4, 0x2100); // VBL autovector

    st.run_frame();
    st.run_frame();

    let hbl = st.bus.read32(0x3000);
    let vbl = st.bus.read32(0x3004);
    assert!(hbl >= 300, "expected one HBL per scanline, got {hbl}");
    assert!((1..=2).contains(&vbl), "expected one VBL per frame, got {vbl}");
}

#[test]
fn reset_mask_holds_interrupts_off() {
    let mut st = make_machine(SPIN_MASKED);
    poke_counter_handler(&mut st, 0x2000, 0x3000);
    st.bus.write32(26 * 4, 0x2000);
    st.bus.write32(28 * 4, 0x2000);

    st.run_frame();
    assert_eq!(st.bus.read32(0x3000), 0);
}

#[test]
fn mfp_timer_c_interrupts_at_programmed_rate() {
    let mut st = make_machine(UNMASK_AND_SPIN);
    poke_counter_handler(&mut st, 0x2000, 0x3000);
    // MFP vector base 0x40 (reset default), timer C = channel 5.
    st.bus.write32(0x45 * 4, 0x2000);

    st.bus.write8(0xFF_FA09, 0x20); // IERB: timer C
    st.bus.write8(0xFF_FA15, 0x20); // IMRB: timer C
    st.bus.write8(0xFF_FA23, 192); // TCDR
    st.bus.write8(0xFF_FA1D, 0x50); // TCDCR: C prescale 64

    // 2,457,600 / (64 * 192) = 200 Hz -> four interrupts per PAL frame.
    for _ in 0..5 {
        st.run_frame();
    }
    let count = st.bus.read32(0x3000);
    assert!(
        (15..=25).contains(&count),
        "expected about 20 timer C interrupts, got {count}"
    );
}

#[test]
fn mfp_outranks_vbl_and_uses_its_vector() {
    let mut st = make_machine(UNMASK_AND_SPIN);
    // The VBL handler parks the machine at a known counter; the MFP
    // handler bumps a different one. Both pend across a frame boundary,
    // and the MFP one must win the arbitration.
    poke_counter_handler(&mut st, 0x2000, 0x3000); // MFP timer C
    poke_counter_handler(&mut st, 0x2100, 0x3004); // VBL
    st.bus.write32(0x45 * 4, 0x2000);
    st.bus.write32(28 * 4, 0x2100);

    st.bus.write8(0xFF_FA09, 0x20);
    st.bus.write8(0xFF_FA15, 0x20);
    st.bus.write8(0xFF_FA23, 10); // ~61 kHz: dense but with idle gaps
    st.bus.write8(0xFF_FA1D, 0x10); // C prescale 4

    st.run_frame();
    st.run_frame();

    let mfp = st.bus.read32(0x3000);
    let vbl = st.bus.read32(0x3004);
    assert!(mfp > vbl, "MFP (level 6) should fire far more often");
    assert!(vbl >= 1, "VBL still delivered between MFP bursts");
}
