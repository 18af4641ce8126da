use bincode::{Decode, Encode};

use crate::{
    cartridge::Cartridge,
    info::*,
    joypad::Joypad,
    macros::match_range,
    ppu::Ppu,
    regs::{ActionButtons, DPad, IntrBits},
    timer::Timer,
};

/// The memory sub-system. Contains the `Cartridge`, `Ppu`, `Timer` and
/// `Joypad` plus the memory and registers not owned by any of them.
///
/// All CPU-visible accesses go through `read`/`write` which honor the
/// PPU's VRAM/OAM locks; `read_unrestricted` bypasses them for the OAM
/// DMA source path. One-shot latches (DIV reset, DMA start) decouple the
/// register writes from the device that reacts to them.
#[derive(Encode, Decode)]
pub(crate) struct Mmu {
    pub(crate) ppu: Ppu,
    pub(crate) timer: Timer,
    pub(crate) joypad: Joypad,
    pub(crate) cart: Cartridge,

    // Registers and memory owned by it.
    #[bincode(with_serde)]
    pub(crate) iflag: IntrBits,
    #[bincode(with_serde)]
    pub(crate) ienable: IntrBits,
    /// Last value written to the DMA register, for reads.
    dma_reg: u8,
    /// Pending DMA start request, drained on the next tick.
    dma_request: Option<u8>,

    wram: [u8; SIZE_WRAM],
    hram: [u8; SIZE_HRAM],
    /// Backing storage for IO registers without dedicated routing.
    io: [u8; SIZE_IO_REGS],
}

impl Mmu {
    pub(crate) fn new(cart: Cartridge) -> Self {
        Self {
            cart,
            ppu: Ppu::new(),
            timer: Timer::new(),
            joypad: Joypad::new(),

            iflag: Default::default(),
            ienable: Default::default(),
            dma_reg: 0,
            dma_request: None,

            wram: [0; SIZE_WRAM],
            hram: [0; SIZE_HRAM],
            io: [0; SIZE_IO_REGS],
        }
    }

    /// Advance the PPU, the OAM DMA engine and the timer by the dots
    /// matching `mcycles`.
    pub(crate) fn tick(&mut self, mcycles: u32) {
        let dots = mcycles * 4;

        let intr = self.ppu.tick(dots);
        self.add_interrupt(intr);

        self.tick_dma(dots);

        if self.timer.tick(mcycles) {
            self.add_interrupt(IntrBits {
                timer: 1,
                ..Default::default()
            });
        }
    }

    /// Reads one byte, use when executing instructions by the CPU.
    pub(crate) fn read(&self, addr: u16) -> u8 {
        self.read_impl(addr, true)
    }

    /// Read bypassing the VRAM/OAM locks, for the DMA source path.
    pub(crate) fn read_unrestricted(&self, addr: u16) -> u8 {
        self.read_impl(addr, false)
    }

    /// Writes one byte, use when executing instructions by the CPU.
    /// Writes to locked or read-only locations are dropped.
    pub(crate) fn write(&mut self, addr: u16, val: u8) {
        let addr = addr as usize;

        match_range! { a@addr {
            ADDR_ROM => { self.cart.write(addr, val) }
            ADDR_VRAM => {
                if self.ppu.vram_accessible() {
                    self.ppu.vram[a] = val;
                }
            }
            ADDR_EXT_RAM => { self.cart.write(addr, val) }
            ADDR_WRAM => { self.wram[a] = val }
            ADDR_ECHO_RAM => { self.wram[a] = val }
            ADDR_OAM => {
                if self.ppu.oam_accessible() {
                    self.ppu.oam[a] = val;
                }
            }
            ADDR_UNUSABLE => {}
            ADDR_IO_REGS => { self.write_reg(addr, val) }
            ADDR_HRAM => { self.hram[a] = val }
            ADDR_IE => { self.ienable.write(val) }
            _ => { unreachable!() }
        }}
    }

    /// Little-endian 16-bit read, low byte first.
    pub(crate) fn read16(&self, addr: u16) -> u16 {
        u16::from_le_bytes([self.read(addr), self.read(addr.wrapping_add(1))])
    }

    /// Little-endian 16-bit write, low byte first.
    pub(crate) fn write16(&mut self, addr: u16, val: u16) {
        let [l, h] = val.to_le_bytes();
        self.write(addr, l);
        self.write(addr.wrapping_add(1), h);
    }

    /// Set IF register by ORing bits of `iflag` in.
    pub(crate) fn add_interrupt(&mut self, iflag: IntrBits) {
        let val = self.iflag.read() | iflag.read();
        self.iflag.write(val);
    }

    /// Update the pressed-button state, raising the joypad interrupt on a
    /// press edge.
    pub(crate) fn set_buttons(&mut self, dpad: DPad, buttons: ActionButtons) {
        if self.joypad.set_state(dpad, buttons) {
            self.add_interrupt(IntrBits {
                joypad: 1,
                ..Default::default()
            });
        }
    }

    fn read_impl(&self, addr: u16, respect_locks: bool) -> u8 {
        let addr = addr as usize;

        match_range! { a@addr {
            ADDR_ROM => { self.cart.read(addr) }
            ADDR_VRAM => {
                if respect_locks && !self.ppu.vram_accessible() {
                    0xFF
                } else {
                    self.ppu.vram[a]
                }
            }
            ADDR_EXT_RAM => { self.cart.read(addr) }
            ADDR_WRAM => { self.wram[a] }
            // Echo RAM repeats the first 7.5KiB of WRAM.
            ADDR_ECHO_RAM => { self.wram[a] }
            ADDR_OAM => {
                if respect_locks && !self.ppu.oam_accessible() {
                    0xFF
                } else {
                    self.ppu.oam[a]
                }
            }
            ADDR_UNUSABLE => { 0xFF }
            ADDR_IO_REGS => { self.read_reg(addr) }
            ADDR_HRAM => { self.hram[a] }
            ADDR_IE => { self.ienable.read() }
            _ => { unreachable!() }
        }}
    }

    fn read_reg(&self, addr: usize) -> u8 {
        match addr {
            IO_JOYPAD => self.joypad.read(),

            IO_DIV => self.timer.get_div(),
            IO_TIMA => self.timer.tima,
            IO_TMA => self.timer.tma,
            IO_TAC => self.timer.tac.read(),

            // The IF register's unused upper bits always read as 1.
            IO_IF => 0xE0 | self.iflag.read(),

            IO_LCDC => self.ppu.lcdc.read(),
            IO_STAT => self.ppu.stat.read(),
            IO_SCY => self.ppu.scy,
            IO_SCX => self.ppu.scx,
            IO_LY => self.ppu.ly,
            IO_LYC => self.ppu.lyc,
            IO_WY => self.ppu.wy,
            IO_WX => self.ppu.wx,
            IO_BGP => self.ppu.bgp,
            IO_OBP0 => self.ppu.obp0,
            IO_OBP1 => self.ppu.obp1,
            IO_DMA => self.dma_reg,

            _ => self.io[addr - *ADDR_IO_REGS.start()],
        }
    }

    /// Writes to a register and performs the action tied to it if any.
    /// Writes to read-only registers(or register fields) are ignored.
    fn write_reg(&mut self, addr: usize, v: u8) {
        /// Set value but keep the masked bits preserved.
        macro_rules! set {
            ($target:expr, $val:expr, $keep_mask:expr) => {{
                let combined = ($target.read() & $keep_mask) | ($val & !$keep_mask);
                $target.write(combined);
            }};
        }

        match addr {
            IO_JOYPAD => {
                if self.joypad.write(v) {
                    self.add_interrupt(IntrBits {
                        joypad: 1,
                        ..Default::default()
                    });
                }
            }

            // Any write resets DIV, the timer consumes the latch.
            IO_DIV => self.timer.set_div(v),
            IO_TIMA => self.timer.tima = v,
            IO_TMA => self.timer.tma = v,
            IO_TAC => self.timer.tac.write(v),

            IO_IF => self.iflag.write(v),

            IO_LCDC => self.ppu.lcdc.write(v),
            IO_STAT => set!(self.ppu.stat, v, mask(3)),
            IO_SCY => self.ppu.scy = v,
            IO_SCX => self.ppu.scx = v,
            IO_LY => (),
            IO_LYC => self.ppu.lyc = v,
            IO_WY => self.ppu.wy = v,
            IO_WX => self.ppu.wx = v,
            IO_BGP => self.ppu.bgp = v,
            IO_OBP0 => self.ppu.obp0 = v,
            IO_OBP1 => self.ppu.obp1 = v,

            // Latch a DMA start request for the engine.
            IO_DMA => {
                self.dma_reg = v;
                self.dma_request = Some(v);
            }

            _ => self.io[addr - *ADDR_IO_REGS.start()] = v,
        }
    }

    /// Drive the OAM DMA engine: consume a pending start request, then
    /// copy one byte from the source every 4 dots while active. OAM stays
    /// locked for the CPU for the whole transfer.
    fn tick_dma(&mut self, dots: u32) {
        if let Some(high) = self.dma_request.take() {
            self.ppu.dma.begin(high);
        }

        for _ in 0..dots {
            if !self.ppu.dma.active {
                break;
            }
            if let Some((src, i)) = self.ppu.dma.step_dot() {
                self.ppu.oam[i] = self.read_unrestricted(src);
            }
        }
    }
}

#[inline(always)]
const fn mask(bit_cnt: u32) -> u8 {
    u8::MAX >> (8 - bit_cnt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::test_rom;

    fn blank_mmu() -> Mmu {
        Mmu::new(Cartridge::new(&test_rom(&[])).unwrap())
    }

    #[test]
    fn echo_ram_mirrors_wram() {
        let mut mmu = blank_mmu();

        mmu.write(0xC123, 0xAB);
        assert_eq!(mmu.read(0xE123), 0xAB);

        mmu.write(0xFDFF, 0xCD);
        assert_eq!(mmu.read(0xDDFF), 0xCD);
    }

    #[test]
    fn prohibited_region_is_inert() {
        let mut mmu = blank_mmu();

        for addr in 0xFEA0..=0xFEFF_u16 {
            assert_eq!(mmu.read(addr), 0xFF);
            mmu.write(addr, 0x00);
            assert_eq!(mmu.read(addr), 0xFF);
        }
    }

    #[test]
    fn rom_writes_are_dropped() {
        let mut mmu = blank_mmu();
        let before = mmu.read(0x1234);
        mmu.write(0x1234, before.wrapping_add(1));
        assert_eq!(mmu.read(0x1234), before);
    }

    #[test]
    fn hram_round_trips() {
        let mut mmu = blank_mmu();
        mmu.write(0xFF80, 0x5A);
        mmu.write(0xFFFE, 0xA5);
        assert_eq!(mmu.read(0xFF80), 0x5A);
        assert_eq!(mmu.read(0xFFFE), 0xA5);
    }

    #[test]
    fn if_upper_bits_read_high() {
        let mut mmu = blank_mmu();
        assert_eq!(mmu.read(0xFF0F), 0xE0);

        mmu.write(0xFF0F, 0x05);
        assert_eq!(mmu.read(0xFF0F), 0xE5);

        // Only five interrupt bits are stored.
        mmu.write(0xFF0F, 0xFF);
        assert_eq!(mmu.iflag.read(), 0x1F);
    }

    #[test]
    fn read16_is_little_endian() {
        let mut mmu = blank_mmu();
        mmu.write16(0xC000, 0xBEEF);
        assert_eq!(mmu.read(0xC000), 0xEF);
        assert_eq!(mmu.read(0xC001), 0xBE);
        assert_eq!(mmu.read16(0xC000), 0xBEEF);
    }

    #[test]
    fn unrouted_io_regs_are_plain_storage() {
        let mut mmu = blank_mmu();
        mmu.write(0xFF7F, 0x42);
        assert_eq!(mmu.read(0xFF7F), 0x42);
    }

    #[test]
    fn div_write_resets_counter() {
        let mut mmu = blank_mmu();
        mmu.tick(80);
        assert_eq!(mmu.read(0xFF04), 1);

        mmu.write(0xFF04, 0x77);
        assert_eq!(mmu.read(0xFF04), 0);
    }

    #[test]
    fn vram_locked_during_pixel_transfer() {
        let mut mmu = blank_mmu();
        mmu.write(0x8000, 0x12);
        mmu.write(0xFF40, 0x91); // LCD on

        // 84 dots into line 0: mode 3.
        mmu.tick(21);
        assert_eq!(mmu.read(0xFF41) & 0x03, 3);

        assert_eq!(mmu.read(0x8000), 0xFF);
        mmu.write(0x8000, 0x34); // dropped
        assert_eq!(mmu.read_unrestricted(0x8000), 0x12);
    }

    #[test]
    fn oam_locked_during_scan() {
        let mut mmu = blank_mmu();
        mmu.write(0xFE00, 0x12);
        mmu.write(0xFF40, 0x91);

        // 4 dots into line 0: mode 2, OAM locked, VRAM still open.
        mmu.tick(1);
        assert_eq!(mmu.read(0xFF41) & 0x03, 2);
        assert_eq!(mmu.read(0xFE00), 0xFF);
        mmu.write(0xFE00, 0x34); // dropped
        assert_eq!(mmu.read_unrestricted(0xFE00), 0x12);

        mmu.write(0x8000, 0x56);
        assert_eq!(mmu.read(0x8000), 0x56);
    }

    #[test]
    fn dma_copies_160_bytes_at_4_dots_each() {
        let mut mmu = blank_mmu();
        for i in 0..160u16 {
            mmu.write(0xC000 + i, i as u8);
        }

        mmu.write(0xFF46, 0xC0);
        assert_eq!(mmu.read(0xFF46), 0xC0);

        // One byte copied per M-cycle; OAM reads 0xFF until done.
        mmu.tick(1);
        assert_eq!(mmu.read(0xFE00), 0xFF);
        assert_eq!(mmu.read_unrestricted(0xFE00), 0);

        mmu.tick(158);
        assert_eq!(mmu.read(0xFE9F), 0xFF);

        mmu.tick(1);
        for i in 0..160usize {
            assert_eq!(mmu.read(0xFE00 + i as u16), i as u8);
        }
    }

    #[test]
    fn joypad_register_routes_to_joypad() {
        let mut mmu = blank_mmu();
        assert_eq!(mmu.read(0xFF00), 0xFF);

        mmu.write(0xFF00, 0x20); // select d-pad
        mmu.set_buttons(
            DPad {
                left: 1,
                ..Default::default()
            },
            Default::default(),
        );

        assert_eq!(mmu.read(0xFF00) & 0x0F, 0b1101);
        assert_eq!(mmu.iflag.joypad, 1);
    }

    #[test]
    fn timer_overflow_raises_interrupt_flag() {
        let mut mmu = blank_mmu();
        mmu.write(0xFF07, 0x05); // enabled, 4 M-cycle period
        mmu.write(0xFF05, 0xFE);
        mmu.write(0xFF06, 0xA0);

        mmu.tick(4);
        assert_eq!(mmu.read(0xFF05), 0xFF);
        assert_eq!(mmu.iflag.timer, 0);

        mmu.tick(4);
        assert_eq!(mmu.read(0xFF05), 0xA0);
        assert_eq!(mmu.iflag.timer, 1);

        mmu.tick(4);
        assert_eq!(mmu.read(0xFF05), 0xA1);
    }
}
