//! Synthetic ROM builders and emulator constructors shared by the
//! unit tests across the crate.

use crate::{gb::GameBoy, rom::ROM_BANK_SIZE};

/// Boot logo bytes, the header scan validates these with a shift-xor
/// checksum so every synthetic ROM needs them in place.
const LOGO: [u8; 48] = [
    0xce, 0xed, 0x66, 0x66, 0xcc, 0x0d, 0x00, 0x0b, 0x03, 0x73, 0x00, 0x83, 0x00, 0x0c, 0x00,
    0x0d, 0x00, 0x08, 0x11, 0x1f, 0x88, 0x89, 0x00, 0x0e, 0xdc, 0xcc, 0x6e, 0xe6, 0xdd, 0xdd,
    0xd9, 0x99, 0xbb, 0xbb, 0x67, 0x63, 0x6e, 0x0e, 0xec, 0xcc, 0xdd, 0xdc, 0x99, 0x9f, 0xbb,
    0xb9, 0x33, 0x3e,
];

/// Builds a valid ROM image with the given cartridge type, ROM size
/// and RAM size header codes. The image is the full declared size and
/// filled with NOPs (0x00).
pub fn build_rom(rom_type: u8, rom_size: u8, ram_size: u8) -> Vec<u8> {
    let banks: usize = match rom_size {
        0x00 => 2,
        0x01 => 4,
        0x02 => 8,
        0x03 => 16,
        0x04 => 32,
        0x05 => 64,
        0x06 => 128,
        0x07 => 256,
        _ => 512,
    };
    let mut rom = vec![0x00; banks * ROM_BANK_SIZE];

    rom[0x0104..0x0134].copy_from_slice(&LOGO);
    rom[0x0134..0x0138].copy_from_slice(b"TEST");
    rom[0x0147] = rom_type;
    rom[0x0148] = rom_size;
    rom[0x0149] = ram_size;

    let mut checksum: u8 = 0;
    for index in 0x0134..=0x014c {
        checksum = checksum.wrapping_sub(rom[index]).wrapping_sub(1);
    }
    rom[0x014d] = checksum;

    rom
}

/// Builds a plain 32 KiB ROM whose entry point jumps to the given
/// program at 0x0150 (the first executed instruction is that jump).
pub fn program_rom(program: &[u8]) -> Vec<u8> {
    let mut rom = build_rom(0x00, 0x00, 0x00);
    rom[0x0100] = 0xc3;
    rom[0x0101] = 0x50;
    rom[0x0102] = 0x01;
    rom[0x0150..0x0150 + program.len()].copy_from_slice(program);

    let mut checksum: u8 = 0;
    for index in 0x0134..=0x014c {
        checksum = checksum.wrapping_sub(rom[index]).wrapping_sub(1);
    }
    rom[0x014d] = checksum;
    rom
}

/// Standard emulator instance used by the tests: 44.1 kHz stereo
/// audio with a 2048 frame buffer.
pub fn build_test_gb(rom: &[u8]) -> GameBoy {
    GameBoy::new(rom, 44100, 2048).unwrap()
}
