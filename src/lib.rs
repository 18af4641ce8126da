mod cartridge;
mod cpu;
mod emulator;
mod frame;
mod info;
mod joypad;
mod macros;
mod mem;
mod msg;
mod ppu;
mod regs;
mod timer;

pub use emulator::Emulator;
pub use frame::{Color, Frame, Palette};
pub use info::{FREQUENCY, SCREEN_RESOLUTION};
pub use msg::{ButtonState, Reply, Request};

/// Emulator error type.
///
/// Data-path oddities(reads of absent memory, writes to locked regions) are
/// absorbed by the bus like the hardware does, they never surface here.
/// Only structural failures do: a cartridge we cannot run, a corrupt save
/// file or the CPU decoding an illegal opcode.
#[derive(Debug, thiserror::Error)]
pub enum EmulatorErr {
    #[error("save file is corrupted or truncated")]
    SaveFileCorrupted,

    #[error("ROM image is too small to hold a cartridge header")]
    RomTooSmall,

    #[error("ROM size {0} bytes does not match the header's ROM size code")]
    RomSizeMismatch(usize),

    #[error("unknown RAM size code {0:#04X} in cartridge header")]
    UnknownRamSize(u8),

    #[error("cartridge type {0:#04X} needs a bank controller, only ROM-only cartridges are supported")]
    UnsupportedMapper(u8),

    #[error("illegal opcode {opcode:#04X} at {pc:#06X}")]
    IllegalOpcode { pc: u16, opcode: u8 },
}
