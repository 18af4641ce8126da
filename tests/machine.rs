//! Machine-level tests driving the public `Emulator` API with small
//! hand-assembled ROMs.

use monoboy::{ButtonState, Color, Emulator, EmulatorErr, SCREEN_RESOLUTION};

/// T-cycles for one full frame: 154 scan-lines of 456 dots.
const FRAME_TCYCLES: u64 = 154 * 456;

/// Build a valid 32KiB ROM-only image with `program` at the entry
/// point 0x100.
fn make_rom(title: &str, program: &[u8]) -> Vec<u8> {
    let mut rom = vec![0u8; 32 * 1024];

    rom[0x100..0x100 + program.len()].copy_from_slice(program);
    rom[0x134..0x134 + title.len()].copy_from_slice(title.as_bytes());

    let csum = rom[0x134..=0x14C]
        .iter()
        .fold(0u8, |c, &b| c.wrapping_sub(b).wrapping_sub(1));
    rom[0x14D] = csum;

    rom
}

/// Enable the LCD then spin forever.
fn lcd_on_loop() -> Vec<u8> {
    vec![
        0x3E, 0x91, // LD A, $91
        0xE0, 0x40, // LDH [LCDC], A
        0x18, 0xFE, // JR -2
    ]
}

#[test]
fn reports_cartridge_title() {
    let emu = Emulator::from_rom(&make_rom("MYGAME", &lcd_on_loop())).unwrap();
    assert_eq!(emu.title(), "MYGAME");
}

#[test]
fn rejects_banked_cartridges() {
    let mut rom = make_rom("BANKED", &[]);
    rom[0x147] = 0x03; // MBC1+RAM+BATTERY
    assert!(matches!(
        Emulator::from_rom(&rom),
        Err(EmulatorErr::UnsupportedMapper(0x03))
    ));
}

#[test]
fn frame_cadence_is_70224_tcycles() {
    let mut emu = Emulator::from_rom(&make_rom("TIMING", &lcd_on_loop())).unwrap();

    assert_eq!(FRAME_TCYCLES, 70_224);

    emu.run_frame().unwrap();
    let first = emu.tcycles();

    // The spin loop is 12 T-cycles per lap which divides the frame
    // duration evenly, so consecutive frames land exactly one frame
    // apart.
    for n in 1..=5u64 {
        emu.run_frame().unwrap();
        assert_eq!(emu.tcycles() - first, n * FRAME_TCYCLES);
    }
}

#[test]
fn lcd_off_machine_still_makes_progress() {
    // Never enables the LCD, just spins.
    let mut emu = Emulator::from_rom(&make_rom("DARK", &[0x18, 0xFE])).unwrap();

    emu.run_frame().unwrap();
    assert!(emu.tcycles() >= 2 * FRAME_TCYCLES);
}

#[test]
fn renders_a_tile_through_the_palette() {
    let program = vec![
        0x3E, 0xFF, // LD A, $FF
        0x21, 0x10, 0x80, // LD HL, $8010 (tile 1, row 0, low byte)
        0x22, // LD [HL+], A
        0x3E, 0x01, // LD A, 1
        0xEA, 0x00, 0x98, // LD [$9800], A (map tile (0,0) -> tile 1)
        0x3E, 0xE4, // LD A, %11100100
        0xE0, 0x47, // LDH [BGP], A
        0x3E, 0x91, // LD A, $91
        0xE0, 0x40, // LDH [LCDC], A
        0x18, 0xFE, // JR -2
    ];

    let mut emu = Emulator::from_rom(&make_rom("TILES", &program)).unwrap();
    emu.run_frame().unwrap();
    let frame = emu.video_frame();

    // Row 0 of tile 1 is solid color 1: a mid gray in the default
    // grayscale palette.
    let mid = Color {
        r: 170,
        g: 170,
        b: 170,
    };
    let white = Color {
        r: 255,
        g: 255,
        b: 255,
    };

    for x in 0..8 {
        assert_eq!(frame.get(x, 0), mid, "column {x}");
    }
    // The rest of the screen is color 0.
    assert_eq!(frame.get(8, 0), white);
    assert_eq!(frame.get(0, 1), white);
    assert_eq!(
        frame.get(SCREEN_RESOLUTION.0 - 1, SCREEN_RESOLUTION.1 - 1),
        white
    );
}

#[test]
fn illegal_opcode_surfaces_address_and_byte() {
    let mut emu = Emulator::from_rom(&make_rom("BAD", &[0x00, 0xD3])).unwrap();

    let err = emu.run_frame().unwrap_err();
    assert!(matches!(
        err,
        EmulatorErr::IllegalOpcode {
            pc: 0x101,
            opcode: 0xD3
        }
    ));
}

#[test]
fn save_state_round_trips_deterministically() {
    let rom = make_rom("SAVED", &lcd_on_loop());
    let mut emu = Emulator::from_rom(&rom).unwrap();
    for _ in 0..3 {
        emu.run_frame().unwrap();
    }

    let saved = emu.save_state().unwrap();
    let mut restored = Emulator::from_saved(&saved).unwrap();

    emu.run_frame().unwrap();
    restored.run_frame().unwrap();

    let (a, b) = (emu.video_frame(), restored.video_frame());
    for y in 0..SCREEN_RESOLUTION.1 {
        for x in 0..SCREEN_RESOLUTION.0 {
            assert_eq!(a.get(x, y), b.get(x, y), "pixel ({x}, {y})");
        }
    }
}

#[test]
fn rom_is_recoverable_from_save_state() {
    let rom = make_rom("KEEPROM", &lcd_on_loop());
    let emu = Emulator::from_rom(&rom).unwrap();

    let saved = emu.save_state().unwrap();
    assert_eq!(Emulator::rom_from_saved(&saved).unwrap(), rom);
}

#[test]
fn corrupt_save_state_is_rejected() {
    assert!(matches!(
        Emulator::from_saved(&[0x01, 0x02, 0x03]),
        Err(EmulatorErr::SaveFileCorrupted)
    ));
}

#[test]
fn buttons_reach_the_joypad_register() {
    // Select the d-pad group, spin until the down line goes low, then
    // enable the LCD. Frames appearing proves the press was visible to
    // the program.
    let program = vec![
        0x3E, 0x20, // LD A, $20 (select d-pad)
        0xE0, 0x00, // LDH [JOYP], A
        0xF0, 0x00, // loop: LDH A, [JOYP]
        0xE6, 0x08, // AND A, $08 (down line, active low)
        0x20, 0xFA, // JR NZ, loop
        0x3E, 0x91, // LD A, $91
        0xE0, 0x40, // LDH [LCDC], A
        0x18, 0xFE, // JR -2
    ];

    let mut emu = Emulator::from_rom(&make_rom("INPUT", &program)).unwrap();

    // Nothing pressed: the LCD stays off and no frame completes.
    emu.run_frame().unwrap();
    assert!(emu.tcycles() >= 2 * FRAME_TCYCLES);

    emu.set_buttons(ButtonState {
        down: true,
        ..Default::default()
    });

    emu.run_frame().unwrap();
    let first = emu.tcycles();
    emu.run_frame().unwrap();
    assert_eq!(emu.tcycles() - first, FRAME_TCYCLES);
}
