mod decoder;
mod isa;
mod table;

use bincode::{Decode, Encode};
use std::num::Wrapping;

use crate::info::{INT_JOYPAD_VEC, INT_SERIAL_VEC, INT_STAT_VEC, INT_TIMER_VEC, INT_VBLANK_VEC};
use crate::{macros::bit_fields, mem::Mmu, EmulatorErr};
use isa::{Cond, Instr, Opcode, Operand, Reg};

/// Gameboy CPU emulator.
/// Instruction semantics are implemented as specified in:
/// https://rgbds.gbdev.io/docs/v0.8.0/gbz80.7
///
/// Flags are derived from arithmetic done at a wider width than the
/// operation itself, so the carry and half-carry bits fall out of the
/// untruncated result instead of being reconstructed afterwards.
///
/// The emulator state can be saved and restored with bincode. Fields
/// holding presentation data(video frames) are snapshotted along with the
/// rest, only channel plumbing lives outside this tree.
#[derive(Encode, Decode)]
pub(crate) struct Cpu {
    // CPU owns the mmu and mmu owns the rest of the system.
    pub(crate) mmu: Mmu,
    pub(crate) state: CpuState,
    pub(crate) trace_execution: bool,

    // Machine registers
    pub(crate) pc: Wrapping<u16>,
    pub(crate) sp: Wrapping<u16>,
    #[bincode(with_serde)]
    flags: Flags,
    a: u8,
    b: u8,
    c: u8,
    d: u8,
    e: u8,
    h: u8,
    l: u8,

    /// Interrupt master enable
    ime: bool,
}

#[derive(Debug, Default, PartialEq, Eq, Encode, Decode)]
pub(crate) enum CpuState {
    #[default]
    Running,
    /// Halted from executing instructions until an interrupt becomes
    /// pending, with or without IME.
    Halted,
    /// Stopped until a joypad interrupt becomes pending. Unlike HALT the
    /// rest of the system is frozen too.
    Stopped,
}

bit_fields! {
    #[derive(serde::Serialize, serde::Deserialize)]
    struct Flags<u8> {
        _0: 4,
        c: 1,
        h: 1,
        n: 1,
        z: 1,
    }
}

/// The 0xFF00 page holding the IO registers and HRAM; LDH operands are
/// offsets into it.
const HIGH_PAGE: u16 = 0xFF00;

impl Cpu {
    pub(crate) fn new(mmu: Mmu) -> Self {
        Self {
            mmu,
            state: CpuState::Running,
            trace_execution: false,

            pc: Wrapping(0),
            sp: Wrapping(0),
            flags: Default::default(),
            a: 0,
            b: 0,
            c: 0,
            d: 0,
            e: 0,
            h: 0,
            l: 0,

            ime: false,
        }
    }

    /// Performs the next atomic step, that is, execute an instruction or
    /// handle a pending interrupt, then run the rest of the system for
    /// the same duration. Returns the number of M-cycles consumed.
    pub(crate) fn step(&mut self) -> Result<u32, EmulatorErr> {
        // Either handle an interrupt or run an instruction.
        let mcycles = if let Some(c) = self.handle_interrupt() {
            c
        } else {
            match self.state {
                CpuState::Running => self.exec_next_instr()?,
                // A halted CPU still burns cycles, the devices keep going.
                CpuState::Halted => 1,
                // A stopped CPU freezes the devices with it.
                CpuState::Stopped => return Ok(1),
            }
        };

        self.mmu.tick(mcycles);
        Ok(mcycles)
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.state == CpuState::Stopped
    }

    /// Handle an interrupt if any and return mcycles needed for it if handled.
    fn handle_interrupt(&mut self) -> Option<u32> {
        let pending = self.mmu.iflag.read() & self.mmu.ienable.read() & 0x1F;

        // A pending serviceable interrupt ends the low-power states no
        // matter the IME; STOP only listens to the joypad line.
        match self.state {
            CpuState::Halted if pending != 0 => self.state = CpuState::Running,
            CpuState::Stopped if pending & (1 << 4) != 0 => self.state = CpuState::Running,
            _ => (),
        }

        if !self.ime || pending == 0 {
            return None;
        }

        // The lowest pending bit wins. Dispatching acknowledges it,
        // blocks nested interrupts and branches through the vector.
        let bit = pending.trailing_zeros() as u8;
        self.mmu.iflag.write(self.mmu.iflag.read() & !(1 << bit));
        self.ime = false;
        self.push16(self.pc.0);
        self.pc.0 = interrupt_vector(bit);

        Some(5) // it takes 5 M-cycles to dispatch an interrupt.
    }

    fn exec_next_instr(&mut self) -> Result<u32, EmulatorErr> {
        let old_pc = self.pc.0;
        let ins = self.fetch();
        let mut mcycles = ins.mcycles;

        let (oa, ob) = (ins.op1, ins.op2);
        let a = self.get_op_val(oa);
        let b = self.get_op_val(ob);

        use Opcode::*;
        match ins.op {
            Ld | Ldh => match (oa, ob) {
                // `LD [a16], SP` stores both bytes.
                (Operand::A16(addr), Operand::Reg(Reg::SP)) => self.mmu.write16(addr, self.sp.0),

                // `LD HL, SP + e8` is an ALU op in disguise.
                (_, Operand::SPplusI8(e)) => {
                    let v = self.alu_add_sp(e);
                    self.set_reg(Reg::HL, v);
                }

                _ => {
                    self.set_op_val(oa, b);

                    // The [HL+]/[HL-] forms adjust HL after the access.
                    if let Some(d) = hl_post_delta(oa).or(hl_post_delta(ob)) {
                        let hl = self.get_reg(Reg::HL).wrapping_add_signed(d);
                        self.set_reg(Reg::HL, hl);
                    }
                }
            },

            Push => self.push16(a),
            Pop => {
                let r = self.pop16();
                self.set_op_val(oa, r);
            }

            Inc | Dec => {
                let up = matches!(ins.op, Inc);
                let r = if is_wide_reg(oa) {
                    // The 16-bit forms touch no flags.
                    if up {
                        a.wrapping_add(1)
                    } else {
                        a.wrapping_sub(1)
                    }
                } else {
                    self.alu_step(a as u8, up).into()
                };
                self.set_op_val(oa, r);
            }

            // The 16-bit adds: "ADD HL, rr" and "ADD SP, e8".
            Add if is_wide_reg(oa) => {
                let r = if let Operand::I8(e) = ob {
                    self.alu_add_sp(e)
                } else {
                    self.alu_add16(a, b)
                };
                self.set_op_val(oa, r);
            }

            Add | Adc => {
                let carry_in = if matches!(ins.op, Adc) { self.flags.c } else { 0 };
                let r = self.alu_add(a as u8, b as u8, carry_in);
                self.set_op_val(oa, r.into());
            }

            Sub | Sbc | Cp => {
                let carry_in = if matches!(ins.op, Sbc) { self.flags.c } else { 0 };
                let r = self.alu_sub(a as u8, b as u8, carry_in);
                // CP only tests, A keeps its value.
                if !matches!(ins.op, Cp) {
                    self.set_op_val(oa, r.into());
                }
            }

            And | Or | Xor => {
                let r = self.alu_logic(ins.op, a as u8, b as u8);
                self.set_op_val(oa, r.into());
            }

            Rlca | Rlc | Rrca | Rrc | Rla | Rl | Rra | Rr | Sla | Sra | Srl => {
                // The one-byte forms work on A without naming it.
                let (oa, v) = if matches!(ins.op, Rlca | Rrca | Rla | Rra) {
                    (Operand::Reg(Reg::A), self.a)
                } else {
                    (oa, a as u8)
                };
                let r = self.rotate_or_shift(ins.op, v);
                self.set_op_val(oa, r.into());
            }

            Swap => {
                let r = (a as u8).rotate_left(4);
                self.set_znhc(r == 0, false, false, false);
                self.set_op_val(oa, r.into());
            }

            // BIT reports on the bit, RES/SET rewrite it.
            Bit => {
                let is_set = b & (1 << a) != 0;
                self.flags.z = (!is_set) as u8;
                self.flags.n = 0;
                self.flags.h = 1;
            }
            Res => self.set_op_val(ob, b & !(1 << a)),
            Set => self.set_op_val(ob, b | 1 << a),

            Jr | Jp | Call | Ret | Reti | Rst => {
                if self.cond_met(oa) {
                    mcycles = ins.branch_mcycles;
                    let target = if matches!(oa, Operand::Cond(_)) { b } else { a };
                    self.jump(ins.op, target);
                }
            }

            // Interrupt and system control
            Di => self.ime = false,
            Ei => self.ime = true,
            // Halt CPU until an interrupt is pending.
            Halt => self.state = CpuState::Halted,
            Stop => {
                self.state = CpuState::Stopped;
                self.mmu.timer.reset_div();
            }

            Cpl => {
                self.a = !self.a;
                self.flags.n = 1;
                self.flags.h = 1;
            }
            // SCF sets carry, CCF flips it; N and H clear either way.
            Scf | Ccf => {
                let c = matches!(ins.op, Scf) || self.flags.c == 0;
                self.flags.n = 0;
                self.flags.h = 0;
                self.flags.c = c as u8;
            }
            Nop => (),
            Daa => self.alu_daa(),

            Illegal => {
                let opcode = self.mmu.read(old_pc);
                log::error!("cpu: illegal opcode {opcode:#04X} at {old_pc:#06X}");
                return Err(EmulatorErr::IllegalOpcode { pc: old_pc, opcode });
            }
            // The decoder resolves the prefix byte itself.
            Prefix => unreachable!(),
        }

        if self.trace_execution {
            self.print_trace(old_pc, ins, oa, ob, a, b);
        }

        Ok(mcycles as u32)
    }

    /// Fetch the instruction pointed by PC and point PC to the next
    /// instruction.
    fn fetch(&mut self) -> Instr {
        let (ins, pc) = decoder::decode(&self.mmu, self.pc.0);
        if pc < self.pc.0 {
            log::warn!("cpu: PC overflow, wrapped back to zero");
        }

        self.pc.0 = pc;
        ins
    }

    /// Get numerical value for the operand.
    fn get_op_val(&self, op: Operand) -> u16 {
        use Operand::*;
        match op {
            Reg(r) => self.get_reg(r),
            RegMem(r) => self.mmu.read(self.get_mem_addr(r)).into(),
            A8(lo) => self.mmu.read(HIGH_PAGE | u16::from(lo)).into(),
            A16(addr) => self.mmu.read(addr).into(),

            U8(u) => u.into(),
            U16(u) => u,
            // Signed immediates travel sign-extended; wrapping addition
            // then produces the right result. For `SP + e8` only the
            // offset is carried, the executor computes the sum itself.
            I8(i) | SPplusI8(i) => i as u16,
            B3(b) => b.into(),
            Tgt(t) => t.into(),

            // Conditions carry no value, branches inspect them directly.
            Absent | Cond(_) => 0,
        }
    }

    /// Store a value through a writable operand. Immediates and
    /// conditions are not locations, reaching here with one is a decoder
    /// table bug.
    fn set_op_val(&mut self, op: Operand, val: u16) {
        use Operand::*;
        match op {
            Reg(r) => self.set_reg(r, val),
            RegMem(r) => {
                let addr = self.get_mem_addr(r);
                self.mmu.write(addr, val as u8);
            }
            A8(lo) => self.mmu.write(HIGH_PAGE | u16::from(lo), val as u8),
            A16(addr) => self.mmu.write(addr, val as u8),

            _ => panic!("operand {op:?} cannot be written"),
        }
    }

    /// Memory address denoted by an indirect register operand.
    fn get_mem_addr(&self, r: Reg) -> u16 {
        match r {
            // LDH's `[C]` operand lives in the high page.
            Reg::C => HIGH_PAGE | u16::from(self.c),
            Reg::BC | Reg::DE | Reg::HL | Reg::HLinc | Reg::HLdec => self.get_reg(r),

            _ => panic!("register {r:?} is not usable as an address"),
        }
    }

    /// Value of a register; 8-bit ones occupy the low byte.
    fn get_reg(&self, r: Reg) -> u16 {
        use Reg::*;
        match r {
            A => self.a.into(),
            B => self.b.into(),
            C => self.c.into(),
            D => self.d.into(),
            E => self.e.into(),
            H => self.h.into(),
            L => self.l.into(),
            AF => pack(self.a, self.flags.read()),
            BC => pack(self.b, self.c),
            DE => pack(self.d, self.e),
            HL | HLinc | HLdec => pack(self.h, self.l),
            SP => self.sp.0,
        }
    }

    /// Set register value.
    fn set_reg(&mut self, r: Reg, v: u16) {
        use Reg::*;
        let (hi, lo) = ((v >> 8) as u8, v as u8);

        match r {
            A => self.a = lo,
            B => self.b = lo,
            C => self.c = lo,
            D => self.d = lo,
            E => self.e = lo,
            H => self.h = lo,
            L => self.l = lo,
            AF => {
                self.a = hi;
                // The flag register's low nibble is hard-wired to zero.
                self.flags.write(lo & 0xF0);
            }
            BC => {
                self.b = hi;
                self.c = lo;
            }
            DE => {
                self.d = hi;
                self.e = lo;
            }
            HL | HLinc | HLdec => {
                self.h = hi;
                self.l = lo;
            }
            SP => self.sp.0 = v,
        }
    }

    // ALU, stack and control-flow building blocks.
    //-----------------------------------------------------------------------

    /// Write all four flags at once. The unused low nibble stays zero.
    fn set_znhc(&mut self, z: bool, n: bool, h: bool, c: bool) {
        self.flags = Flags {
            _0: 0,
            c: c as u8,
            h: h as u8,
            n: n as u8,
            z: z as u8,
        };
    }

    /// 8-bit add with optional carry-in. Half-carry comes from the
    /// nibble sum, carry from the 9-bit sum.
    fn alu_add(&mut self, lhs: u8, rhs: u8, carry_in: u8) -> u8 {
        let wide = u32::from(lhs) + u32::from(rhs) + u32::from(carry_in);
        let nibbles = (lhs & 0x0F) + (rhs & 0x0F) + carry_in;
        let r = wide as u8;

        self.set_znhc(r == 0, false, nibbles > 0x0F, wide > 0xFF);
        r
    }

    /// 8-bit subtract with optional borrow-in, also used for CP.
    fn alu_sub(&mut self, lhs: u8, rhs: u8, carry_in: u8) -> u8 {
        let r = lhs.wrapping_sub(rhs).wrapping_sub(carry_in);
        let half_borrow = (lhs & 0x0F) < (rhs & 0x0F) + carry_in;
        let borrow = u16::from(lhs) < u16::from(rhs) + u16::from(carry_in);

        self.set_znhc(r == 0, true, half_borrow, borrow);
        r
    }

    /// AND/OR/XOR against A. Only AND reports a half-carry.
    fn alu_logic(&mut self, op: Opcode, lhs: u8, rhs: u8) -> u8 {
        let (r, half) = match op {
            Opcode::And => (lhs & rhs, true),
            Opcode::Or => (lhs | rhs, false),
            _ => (lhs ^ rhs, false),
        };

        self.set_znhc(r == 0, false, half, false);
        r
    }

    /// 8-bit INC/DEC: every flag except carry.
    fn alu_step(&mut self, v: u8, up: bool) -> u8 {
        let (r, half) = if up {
            (v.wrapping_add(1), v & 0x0F == 0x0F)
        } else {
            (v.wrapping_sub(1), v & 0x0F == 0x00)
        };

        let carry = self.flags.c == 1;
        self.set_znhc(r == 0, !up, half, carry);
        r
    }

    /// "ADD HL, rr": Z survives, H comes from bit 11 and C from bit 15.
    fn alu_add16(&mut self, lhs: u16, rhs: u16) -> u16 {
        let wide = u32::from(lhs) + u32::from(rhs);

        self.flags.n = 0;
        self.flags.h = ((lhs & 0x0FFF) + (rhs & 0x0FFF) > 0x0FFF) as u8;
        self.flags.c = (wide > 0xFFFF) as u8;
        wide as u16
    }

    /// "ADD SP, e8" and "LD HL, SP + e8" share their flag rule: H and C
    /// come from unsigned byte arithmetic on SP's low half.
    fn alu_add_sp(&mut self, offset: i8) -> u16 {
        let sp = self.sp.0;
        let e = offset as u8;
        let half = (sp & 0x0F) + u16::from(e & 0x0F) > 0x0F;
        let carry = (sp & 0xFF) + u16::from(e) > 0xFF;

        self.set_znhc(false, false, half, carry);
        sp.wrapping_add(offset as u16)
    }

    /// All rotates and shifts. Each produces a result plus the bit that
    /// fell off, which becomes the carry.
    fn rotate_or_shift(&mut self, op: Opcode, v: u8) -> u8 {
        use Opcode::*;
        let carry_in = self.flags.c;

        let (r, out) = match op {
            Rlc | Rlca => (v.rotate_left(1), v >> 7),
            Rrc | Rrca => (v.rotate_right(1), v & 1),
            Rl | Rla => (v << 1 | carry_in, v >> 7),
            Rr | Rra => (v >> 1 | carry_in << 7, v & 1),
            Sla => (v << 1, v >> 7),
            Sra => ((v as i8 >> 1) as u8, v & 1),
            Srl => (v >> 1, v & 1),
            _ => unreachable!(),
        };

        // The one-byte A forms always report Z clear.
        let z = r == 0 && !matches!(op, Rlca | Rrca | Rla | Rra);
        self.set_znhc(z, false, false, out == 1);
        r
    }

    /// Decimal-adjust A after a BCD addition or subtraction: build the
    /// correction from the flags and both digits, then apply it whole.
    fn alu_daa(&mut self) {
        let mut adjust = 0u8;
        let mut carry = self.flags.c == 1;

        if self.flags.n == 0 {
            if self.flags.h == 1 || self.a & 0x0F > 0x09 {
                adjust |= 0x06;
            }
            if carry || self.a > 0x99 {
                adjust |= 0x60;
                carry = true;
            }
            self.a = self.a.wrapping_add(adjust);
        } else {
            // After a subtraction only the recorded borrows matter and
            // the carry flag is left as it was.
            if self.flags.h == 1 {
                adjust |= 0x06;
            }
            if carry {
                adjust |= 0x60;
            }
            self.a = self.a.wrapping_sub(adjust);
        }

        self.flags.z = (self.a == 0) as u8;
        self.flags.h = 0;
        self.flags.c = carry as u8;
    }

    /// Push 2-bytes onto the stack.
    fn push16(&mut self, v: u16) {
        self.sp -= 2;
        self.mmu.write16(self.sp.0, v);
    }

    /// Pop 2-bytes off the stack.
    fn pop16(&mut self) -> u16 {
        let v = self.mmu.read16(self.sp.0);
        self.sp += 2;
        v
    }

    /// Evaluate a branch condition operand against the flags.
    /// Unconditional branches have no condition and always pass.
    fn cond_met(&self, op: Operand) -> bool {
        let Operand::Cond(cc) = op else { return true };

        match cc {
            Cond::Z => self.flags.z == 1,
            Cond::NZ => self.flags.z == 0,
            Cond::C => self.flags.c == 1,
            Cond::NC => self.flags.c == 0,
        }
    }

    /// Redirect control flow for a taken branch.
    fn jump(&mut self, op: Opcode, target: u16) {
        use Opcode::*;
        match op {
            Jp => self.pc.0 = target,
            // Relative to the already-advanced PC.
            Jr => self.pc.0 = self.pc.0.wrapping_add(target),

            Call | Rst => {
                self.push16(self.pc.0);
                self.pc.0 = target;
            }

            Ret | Reti => {
                self.pc.0 = self.pop16();
                if matches!(op, Reti) {
                    self.ime = true;
                }
            }

            _ => unreachable!(),
        }
    }

    fn print_trace(&self, old_pc: u16, ins: Instr, oa: Operand, ob: Operand, a: u16, b: u16) {
        let newa = self.get_op_val(oa);
        let sx = format!("[{oa}={a}|{newa} {ob}={b}]");
        eprintln!(
            "{sx:30} [Z{} N{} C{}] [PC:${:04X} IVEC({}): {:05b}] {}",
            self.flags.z,
            self.flags.n,
            self.flags.c,
            old_pc,
            self.ime as u8,
            self.mmu.iflag.read(),
            ins,
        );
    }
}

/// Join two bytes into a 16-bit register value, high byte first.
#[inline]
fn pack(hi: u8, lo: u8) -> u16 {
    u16::from(hi) << 8 | u16::from(lo)
}

/// 16-bit INC/DEC and ADD HL take whole register pairs.
fn is_wide_reg(op: Operand) -> bool {
    matches!(op, Operand::Reg(Reg::BC | Reg::DE | Reg::HL | Reg::SP))
}

/// HL adjustment performed after a `[HL+]`/`[HL-]` access.
fn hl_post_delta(op: Operand) -> Option<i16> {
    match op {
        Operand::RegMem(Reg::HLinc) => Some(1),
        Operand::RegMem(Reg::HLdec) => Some(-1),
        _ => None,
    }
}

fn interrupt_vector(bit: u8) -> u16 {
    match bit {
        0 => INT_VBLANK_VEC,
        1 => INT_STAT_VEC,
        2 => INT_TIMER_VEC,
        3 => INT_SERIAL_VEC,
        _ => INT_JOYPAD_VEC,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::{test_rom, Cartridge};

    fn test_cpu(program: &[u8]) -> Cpu {
        let cart = Cartridge::new(&test_rom(program)).unwrap();
        let mut cpu = Cpu::new(Mmu::new(cart));
        cpu.pc.0 = 0x100;
        cpu.sp.0 = 0xFFFE;
        cpu
    }

    #[test]
    fn flag_register_low_nibble_is_always_zero() {
        let mut cpu = test_cpu(&[]);

        for v in 0..=0xFF_u16 {
            cpu.set_reg(Reg::AF, 0x1200 | v);
            assert_eq!(cpu.get_reg(Reg::AF), 0x1200 | (v & 0xF0));
        }
    }

    #[test]
    fn wide_register_views_round_trip() {
        let mut cpu = test_cpu(&[]);

        for r in [Reg::BC, Reg::DE, Reg::HL, Reg::SP] {
            cpu.set_reg(r, 0xBEEF);
            assert_eq!(cpu.get_reg(r), 0xBEEF);
        }

        cpu.set_reg(Reg::HL, 0x1234);
        assert_eq!(cpu.get_reg(Reg::H), 0x12);
        assert_eq!(cpu.get_reg(Reg::L), 0x34);
    }

    #[test]
    fn ld_immediate_and_timing() {
        let mut cpu = test_cpu(&[0x3E, 0x42]); // LD A, $42
        let mcycles = cpu.step().unwrap();

        assert_eq!(cpu.a, 0x42);
        assert_eq!(cpu.pc.0, 0x102);
        assert_eq!(mcycles, 2);
    }

    #[test]
    fn ld_hl_inc_dec_move_hl() {
        // LD [HL+], A; LD [HL-], A
        let mut cpu = test_cpu(&[0x22, 0x32]);
        cpu.set_reg(Reg::HL, 0xC000);
        cpu.a = 0x7E;

        cpu.step().unwrap();
        assert_eq!(cpu.get_reg(Reg::HL), 0xC001);
        assert_eq!(cpu.mmu.read(0xC000), 0x7E);

        cpu.step().unwrap();
        assert_eq!(cpu.get_reg(Reg::HL), 0xC000);
        assert_eq!(cpu.mmu.read(0xC001), 0x7E);
    }

    #[test]
    fn add_sets_half_and_full_carry() {
        let mut cpu = test_cpu(&[0xC6, 0x01, 0xC6, 0x10]); // ADD A, 1; ADD A, $10
        cpu.a = 0x0F;

        cpu.step().unwrap();
        assert_eq!(cpu.a, 0x10);
        assert_eq!((cpu.flags.z, cpu.flags.n, cpu.flags.h, cpu.flags.c), (0, 0, 1, 0));

        cpu.a = 0xF8;
        cpu.step().unwrap();
        assert_eq!(cpu.a, 0x08);
        assert_eq!((cpu.flags.z, cpu.flags.n, cpu.flags.h, cpu.flags.c), (0, 0, 0, 1));
    }

    #[test]
    fn adc_chains_the_carry() {
        let mut cpu = test_cpu(&[0xCE, 0x00]); // ADC A, 0
        cpu.a = 0xFF;
        cpu.flags.c = 1;

        cpu.step().unwrap();
        assert_eq!(cpu.a, 0x00);
        assert_eq!((cpu.flags.z, cpu.flags.h, cpu.flags.c), (1, 1, 1));
    }

    #[test]
    fn sbc_chains_the_borrow() {
        let mut cpu = test_cpu(&[0xDE, 0xFF]); // SBC A, $FF
        cpu.a = 0x00;
        cpu.flags.c = 1;

        cpu.step().unwrap();
        assert_eq!(cpu.a, 0x00);
        assert_eq!((cpu.flags.z, cpu.flags.n, cpu.flags.h, cpu.flags.c), (1, 1, 1, 1));
    }

    #[test]
    fn cp_discards_the_result() {
        let mut cpu = test_cpu(&[0xFE, 0x42]); // CP $42
        cpu.a = 0x42;

        cpu.step().unwrap();
        assert_eq!(cpu.a, 0x42);
        assert_eq!((cpu.flags.z, cpu.flags.n), (1, 1));
    }

    #[test]
    fn sub_then_daa_adjusts_bcd() {
        let mut cpu = test_cpu(&[0x90, 0x27]); // SUB B; DAA
        cpu.a = 0x05;
        cpu.b = 0x06;

        cpu.step().unwrap();
        assert_eq!(cpu.a, 0xFF);
        assert_eq!((cpu.flags.n, cpu.flags.h, cpu.flags.c), (1, 1, 1));

        cpu.step().unwrap();
        assert_eq!(cpu.a, 0x99);
        assert_eq!((cpu.flags.n, cpu.flags.h, cpu.flags.c), (1, 0, 1));
    }

    #[test]
    fn daa_after_addition() {
        let mut cpu = test_cpu(&[0x80, 0x27]); // ADD A, B; DAA
        cpu.a = 0x45;
        cpu.b = 0x38;

        cpu.step().unwrap();
        assert_eq!(cpu.a, 0x7D);
        cpu.step().unwrap();
        assert_eq!(cpu.a, 0x83);
        assert_eq!((cpu.flags.n, cpu.flags.h, cpu.flags.c), (0, 0, 0));
    }

    #[test]
    fn add_hl_rr_half_carry_from_bit_11() {
        let mut cpu = test_cpu(&[0x09]); // ADD HL, BC
        cpu.set_reg(Reg::HL, 0x0FFF);
        cpu.set_reg(Reg::BC, 0x0001);
        cpu.flags.z = 1; // Z must be left alone

        cpu.step().unwrap();
        assert_eq!(cpu.get_reg(Reg::HL), 0x1000);
        assert_eq!((cpu.flags.z, cpu.flags.n, cpu.flags.h, cpu.flags.c), (1, 0, 1, 0));
    }

    #[test]
    fn add_sp_e8_flags_use_low_byte() {
        let mut cpu = test_cpu(&[0xE8, 0x01]); // ADD SP, +1
        cpu.sp.0 = 0x00FF;

        let mcycles = cpu.step().unwrap();
        assert_eq!(cpu.sp.0, 0x0100);
        assert_eq!(mcycles, 4);
        assert_eq!((cpu.flags.z, cpu.flags.n, cpu.flags.h, cpu.flags.c), (0, 0, 1, 1));
    }

    #[test]
    fn add_sp_negative_offset() {
        let mut cpu = test_cpu(&[0xE8, 0xFF]); // ADD SP, -1
        cpu.sp.0 = 0x0005;

        cpu.step().unwrap();
        assert_eq!(cpu.sp.0, 0x0004);
        // Unsigned byte arithmetic: 0x05 + 0xFF carries out of both
        // the nibble and the byte.
        assert_eq!((cpu.flags.h, cpu.flags.c), (1, 1));
    }

    #[test]
    fn ld_hl_sp_e8_flags_and_result() {
        let mut cpu = test_cpu(&[0xF8, 0x08]); // LD HL, SP + 8
        cpu.sp.0 = 0xFFF8;

        cpu.step().unwrap();
        assert_eq!(cpu.get_reg(Reg::HL), 0x0000);
        assert_eq!((cpu.flags.z, cpu.flags.n, cpu.flags.h, cpu.flags.c), (0, 0, 1, 1));
    }

    #[test]
    fn inc_dec_leave_carry_alone() {
        let mut cpu = test_cpu(&[0x3C, 0x3D]); // INC A; DEC A
        cpu.a = 0x0F;
        cpu.flags.c = 1;

        cpu.step().unwrap();
        assert_eq!(cpu.a, 0x10);
        assert_eq!((cpu.flags.n, cpu.flags.h, cpu.flags.c), (0, 1, 1));

        cpu.step().unwrap();
        assert_eq!(cpu.a, 0x0F);
        assert_eq!((cpu.flags.n, cpu.flags.h, cpu.flags.c), (1, 1, 1));
    }

    #[test]
    fn inc_memory_at_hl() {
        let mut cpu = test_cpu(&[0x34]); // INC [HL]
        cpu.set_reg(Reg::HL, 0xC000);
        cpu.mmu.write(0xC000, 0xFF);

        let mcycles = cpu.step().unwrap();
        assert_eq!(cpu.mmu.read(0xC000), 0x00);
        assert_eq!(cpu.flags.z, 1);
        assert_eq!(mcycles, 3);
    }

    #[test]
    fn push_pop_round_trips_with_af_mask() {
        let mut cpu = test_cpu(&[0xF5, 0xC1]); // PUSH AF; POP BC
        cpu.set_reg(Reg::AF, 0x12FF);

        cpu.step().unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.get_reg(Reg::BC), 0x12F0);
        assert_eq!(cpu.sp.0, 0xFFFE);
    }

    #[test]
    fn jr_offset_applies_after_length() {
        let mut cpu = test_cpu(&[0x18, 0x05]); // JR +5
        let mcycles = cpu.step().unwrap();
        assert_eq!(cpu.pc.0, 0x107);
        assert_eq!(mcycles, 3);

        // Backwards jump: JR -2 loops onto itself.
        let mut cpu = test_cpu(&[0x18, 0xFE]);
        cpu.step().unwrap();
        assert_eq!(cpu.pc.0, 0x100);
    }

    #[test]
    fn conditional_jr_charges_untaken_cost() {
        let mut cpu = test_cpu(&[0x20, 0x05]); // JR NZ, +5
        cpu.flags.z = 1;

        let mcycles = cpu.step().unwrap();
        assert_eq!(cpu.pc.0, 0x102);
        assert_eq!(mcycles, 2);
    }

    #[test]
    fn call_and_ret() {
        // 0x100: CALL $0110, then RET placed at 0x110.
        let mut program = vec![0xCD, 0x10, 0x01];
        program.resize(0x10, 0x00);
        program.push(0xC9);

        let mut cpu = test_cpu(&program);
        let mcycles = cpu.step().unwrap();
        assert_eq!(mcycles, 6);
        assert_eq!(cpu.pc.0, 0x110);
        assert_eq!(cpu.sp.0, 0xFFFC);
        assert_eq!(cpu.mmu.read16(0xFFFC), 0x0103);

        let mcycles = cpu.step().unwrap();
        assert_eq!(mcycles, 4);
        assert_eq!(cpu.pc.0, 0x0103);
        assert_eq!(cpu.sp.0, 0xFFFE);
    }

    #[test]
    fn rst_jumps_to_fixed_vector() {
        let mut cpu = test_cpu(&[0xEF]); // RST $28
        cpu.step().unwrap();

        assert_eq!(cpu.pc.0, 0x28);
        assert_eq!(cpu.mmu.read16(0xFFFC), 0x0101);
    }

    #[test]
    fn ldh_addresses_high_ram() {
        let mut cpu = test_cpu(&[0xE0, 0x80, 0xF0, 0x80]); // LDH [$80], A; LDH A, [$80]
        cpu.a = 0x5C;

        cpu.step().unwrap();
        assert_eq!(cpu.mmu.read(0xFF80), 0x5C);

        cpu.a = 0;
        cpu.step().unwrap();
        assert_eq!(cpu.a, 0x5C);
    }

    #[test]
    fn cb_swap_twice_is_identity() {
        let mut cpu = test_cpu(&[0xCB, 0x37, 0xCB, 0x37]); // SWAP A twice
        cpu.a = 0xA5;

        let mcycles = cpu.step().unwrap();
        assert_eq!(cpu.a, 0x5A);
        assert_eq!(mcycles, 2);

        cpu.step().unwrap();
        assert_eq!(cpu.a, 0xA5);
    }

    #[test]
    fn cb_bit_is_side_effect_free() {
        let mut cpu = test_cpu(&[0xCB, 0x7F, 0xCB, 0x40]); // BIT 7, A; BIT 0, B
        cpu.a = 0x80;
        cpu.b = 0x00;
        cpu.flags.c = 1;

        cpu.step().unwrap();
        assert_eq!(cpu.a, 0x80);
        assert_eq!((cpu.flags.z, cpu.flags.n, cpu.flags.h, cpu.flags.c), (0, 0, 1, 1));

        cpu.step().unwrap();
        assert_eq!((cpu.flags.z, cpu.flags.n, cpu.flags.h, cpu.flags.c), (1, 0, 1, 1));
    }

    #[test]
    fn cb_res_and_set() {
        let mut cpu = test_cpu(&[0xCB, 0x87, 0xCB, 0xFF]); // RES 0, A; SET 7, A
        cpu.a = 0x01;

        cpu.step().unwrap();
        assert_eq!(cpu.a, 0x00);

        cpu.step().unwrap();
        assert_eq!(cpu.a, 0x80);
    }

    #[test]
    fn cb_rl_through_carry() {
        let mut cpu = test_cpu(&[0xCB, 0x11]); // RL C
        cpu.c = 0x80;
        cpu.flags.c = 1;

        cpu.step().unwrap();
        assert_eq!(cpu.c, 0x01);
        assert_eq!(cpu.flags.c, 1);
        assert_eq!(cpu.flags.z, 0);
    }

    #[test]
    fn cb_memory_form_timing() {
        let mut cpu = test_cpu(&[0xCB, 0x46, 0xCB, 0x86]); // BIT 0, [HL]; RES 0, [HL]
        cpu.set_reg(Reg::HL, 0xC000);
        cpu.mmu.write(0xC000, 0x01);

        let mcycles = cpu.step().unwrap();
        assert_eq!(mcycles, 3);
        assert_eq!(cpu.flags.z, 0);

        let mcycles = cpu.step().unwrap();
        assert_eq!(mcycles, 4);
        assert_eq!(cpu.mmu.read(0xC000), 0x00);
    }

    #[test]
    fn rlca_reports_zero_flag_clear() {
        let mut cpu = test_cpu(&[0x07]); // RLCA
        cpu.a = 0x00;
        cpu.flags.z = 1;

        cpu.step().unwrap();
        assert_eq!(cpu.flags.z, 0);
    }

    #[test]
    fn cpl_twice_is_identity() {
        let mut cpu = test_cpu(&[0x2F, 0x2F]);
        cpu.a = 0x3C;

        cpu.step().unwrap();
        assert_eq!(cpu.a, 0xC3);
        assert_eq!((cpu.flags.n, cpu.flags.h), (1, 1));

        cpu.step().unwrap();
        assert_eq!(cpu.a, 0x3C);
    }

    #[test]
    fn ei_di_toggle_ime() {
        let mut cpu = test_cpu(&[0xFB, 0xF3, 0xFB]);

        cpu.step().unwrap();
        assert!(cpu.ime);
        cpu.step().unwrap();
        assert!(!cpu.ime);
        cpu.step().unwrap();
        assert!(cpu.ime);
    }

    #[test]
    fn interrupt_dispatch_sequence() {
        let mut cpu = test_cpu(&[]);
        cpu.pc.0 = 0x150;
        cpu.ime = true;
        cpu.mmu.ienable.write(0x01);
        cpu.mmu.iflag.write(0x01);

        let mcycles = cpu.step().unwrap();
        assert_eq!(mcycles, 5); // 20 T-cycles
        assert_eq!(cpu.pc.0, 0x0040);
        assert_eq!(cpu.sp.0, 0xFFFC);
        assert_eq!(cpu.mmu.read16(0xFFFC), 0x0150);
        assert_eq!(cpu.mmu.iflag.read(), 0);
        assert!(!cpu.ime);
    }

    #[test]
    fn interrupt_priority_prefers_lowest_bit() {
        let mut cpu = test_cpu(&[]);
        cpu.ime = true;
        cpu.mmu.ienable.write(0x1F);
        cpu.mmu.iflag.write(0b10100); // timer and joypad

        cpu.step().unwrap();
        assert_eq!(cpu.pc.0, crate::info::INT_TIMER_VEC);
        assert_eq!(cpu.mmu.iflag.read(), 0b10000);
    }

    #[test]
    fn masked_interrupts_are_not_dispatched() {
        let mut cpu = test_cpu(&[0x00]); // NOP
        cpu.ime = true;
        cpu.mmu.ienable.write(0x00);
        cpu.mmu.iflag.write(0x01);

        cpu.step().unwrap();
        assert_eq!(cpu.pc.0, 0x101);
    }

    #[test]
    fn halt_wakes_on_pending_interrupt_without_ime() {
        let mut cpu = test_cpu(&[0x76, 0x00]); // HALT; NOP
        cpu.step().unwrap();
        assert_eq!(cpu.state, CpuState::Halted);

        // Still halted, burning a cycle per step.
        let mcycles = cpu.step().unwrap();
        assert_eq!(mcycles, 1);
        assert_eq!(cpu.pc.0, 0x101);

        // A pending enabled interrupt wakes it even with IME off.
        cpu.mmu.ienable.write(0x04);
        cpu.mmu.iflag.write(0x04);
        cpu.step().unwrap();
        assert_eq!(cpu.state, CpuState::Running);
        assert_eq!(cpu.pc.0, 0x102); // executed the NOP, no vectoring
        assert_eq!(cpu.mmu.iflag.read(), 0x04);
    }

    #[test]
    fn stop_freezes_and_joypad_interrupt_wakes() {
        let mut cpu = test_cpu(&[0x10, 0x00, 0x00]); // STOP; NOP
        cpu.mmu.tick(100);

        cpu.step().unwrap();
        assert!(cpu.is_stopped());
        assert_eq!(cpu.mmu.timer.get_div(), 0);
        assert_eq!(cpu.pc.0, 0x102);

        // Frozen: the divider no longer advances.
        cpu.step().unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.mmu.timer.get_div(), 0);

        cpu.mmu.ienable.write(0x10);
        cpu.mmu.iflag.write(0x10);
        cpu.step().unwrap();
        assert!(!cpu.is_stopped());
    }

    #[test]
    fn reti_restores_ime() {
        let mut cpu = test_cpu(&[0xD9]); // RETI
        cpu.push16(0x1234);
        cpu.step().unwrap();

        assert!(cpu.ime);
        assert_eq!(cpu.pc.0, 0x1234);
    }

    #[test]
    fn illegal_opcode_is_fatal() {
        let mut cpu = test_cpu(&[0xD3]);
        let err = cpu.step().unwrap_err();

        assert!(matches!(
            err,
            EmulatorErr::IllegalOpcode {
                pc: 0x100,
                opcode: 0xD3
            }
        ));
    }

    #[test]
    fn scf_ccf() {
        let mut cpu = test_cpu(&[0x37, 0x3F]); // SCF; CCF
        cpu.flags.n = 1;
        cpu.flags.h = 1;

        cpu.step().unwrap();
        assert_eq!((cpu.flags.n, cpu.flags.h, cpu.flags.c), (0, 0, 1));

        cpu.step().unwrap();
        assert_eq!((cpu.flags.n, cpu.flags.h, cpu.flags.c), (0, 0, 0));
    }

    #[test]
    fn ld_a16_sp_stores_both_bytes() {
        let mut cpu = test_cpu(&[0x08, 0x00, 0xC0]); // LD [$C000], SP
        cpu.sp.0 = 0xABCD;

        let mcycles = cpu.step().unwrap();
        assert_eq!(mcycles, 5);
        assert_eq!(cpu.mmu.read16(0xC000), 0xABCD);
    }

    #[test]
    fn jp_hl_is_single_cycle() {
        let mut cpu = test_cpu(&[0xE9]); // JP HL
        cpu.set_reg(Reg::HL, 0x4000);

        let mcycles = cpu.step().unwrap();
        assert_eq!(mcycles, 1);
        assert_eq!(cpu.pc.0, 0x4000);
    }
}
