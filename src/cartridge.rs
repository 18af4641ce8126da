use bincode::{Decode, Encode};

use crate::{info::*, macros::match_range, EmulatorErr};

/// A flat ROM-only cartridge with optional external RAM.
///
/// Anything that needs a bank controller(header type other than 0x00) is
/// rejected at load time, the core never has to re-check it later.
#[derive(Default, Encode, Decode)]
pub(crate) struct Cartridge {
    /// Cartridge ROM, fixed on load.
    rom: Box<[u8]>,
    /// External RAM, empty unless the header sizes it.
    ram: Box<[u8]>,
}

impl Cartridge {
    /// Copy the rom, validate its header and create a new cartridge.
    pub(crate) fn new(rom: &[u8]) -> Result<Self, EmulatorErr> {
        if rom.len() <= *CART_HEADER.end() {
            return Err(EmulatorErr::RomTooSmall);
        }

        let cart_type = rom[CART_TYPE];
        if cart_type != 0x00 {
            return Err(EmulatorErr::UnsupportedMapper(cart_type));
        }

        // ROM size code n means 32KiB << n, a ROM-only cartridge is
        // always a single unbanked 32KiB image.
        if rom[CART_ROM_SIZE] != 0 || rom.len() > SIZE_ROM {
            return Err(EmulatorErr::RomSizeMismatch(rom.len()));
        }

        let ram_banks = match rom[CART_RAM_SIZE] {
            0x00 => 0,
            0x02 => 1,
            0x03 => 4,
            code => return Err(EmulatorErr::UnknownRamSize(code)),
        };

        if header_checksum(rom) != rom[CART_HEADER_CSUM] {
            log::warn!("cartridge: header checksum mismatch, real hardware would refuse this ROM");
        }

        Ok(Self {
            rom: rom.to_vec().into_boxed_slice(),
            ram: vec![0; ram_banks * SIZE_EXT_RAM_BANK].into_boxed_slice(),
        })
    }

    /// ROM title from the header, trimmed of padding.
    pub(crate) fn title(&self) -> String {
        self.rom[CART_TITLE.clone()]
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
            .collect()
    }

    pub(crate) fn rom_bytes(&self) -> &[u8] {
        &self.rom
    }

    pub(crate) fn read(&self, addr: usize) -> u8 {
        match_range! { a@addr {
            ADDR_ROM => {
                // ROM images shorter than 32KiB leave the tail unmapped.
                if a < self.rom.len() {
                    self.rom[a]
                } else {
                    0xFF
                }
            }
            ADDR_EXT_RAM => {
                if self.ram.is_empty() {
                    0xFF
                } else {
                    self.ram[a % self.ram.len()]
                }
            }
            _ => { unreachable!() }
        }}
    }

    pub(crate) fn write(&mut self, addr: usize, val: u8) {
        match_range! { a@addr {
            // ROM is not writable and there is no mapper listening.
            ADDR_ROM => {}
            ADDR_EXT_RAM => {
                if !self.ram.is_empty() {
                    let a = a % self.ram.len();
                    self.ram[a] = val;
                }
            }
            _ => { unreachable!() }
        }}
    }
}

/// Header checksum over 0x134..=0x14C as computed by the boot ROM.
fn header_checksum(rom: &[u8]) -> u8 {
    rom[0x134..=0x14C]
        .iter()
        .fold(0u8, |csum, &b| csum.wrapping_sub(b).wrapping_sub(1))
}

/// A valid ROM-only image with `program` placed at the entry point 0x100,
/// for driving the core in tests.
#[cfg(test)]
pub(crate) fn test_rom(program: &[u8]) -> Vec<u8> {
    let mut rom = vec![0; SIZE_ROM];
    let title = b"TEST";
    rom[CART_TITLE.clone()][..title.len()].copy_from_slice(title);
    rom[0x100..0x100 + program.len()].copy_from_slice(program);
    rom[CART_HEADER_CSUM] = header_checksum(&rom);
    rom
}
