use super::isa::{Instr, Opcode, Operand};
use super::table;
use crate::mem::Mmu;

/// Decode the instruction at `pc` along with any immediate bytes that
/// follow it. Returns the filled-in instruction and the address of the
/// next one; the caller is responsible for noticing a PC wrap-around.
pub(crate) fn decode(mmu: &Mmu, pc: u16) -> (Instr, u16) {
    let mut ins = table::INSTR_TABLE[mmu.read(pc) as usize];
    let mut next = pc.wrapping_add(1);

    if matches!(ins.op, Opcode::Prefix) {
        // The second byte selects from the CB table, whose entries
        // already account for the prefix in their timings. No CB
        // instruction takes an immediate.
        ins = table::PREF_INSTR_TABLE[mmu.read(next) as usize];
        next = next.wrapping_add(1);
    }

    // At most one operand encodes an immediate, so one read covers both.
    let width = imm_width(ins.op1).max(imm_width(ins.op2));
    let imm = match width {
        0 => 0,
        1 => mmu.read(next).into(),
        _ => mmu.read16(next),
    };

    ins.op1 = with_imm(ins.op1, imm);
    ins.op2 = with_imm(ins.op2, imm);

    (ins, next.wrapping_add(width))
}

/// Width in bytes of the immediate a table operand asks for.
fn imm_width(op: Operand) -> u16 {
    use Operand::*;
    match op {
        U16(_) | A16(_) => 2,
        U8(_) | I8(_) | A8(_) | SPplusI8(_) => 1,
        _ => 0,
    }
}

/// Replace a placeholder operand with the immediate value read for it.
/// Operands that take no immediate pass through untouched.
fn with_imm(op: Operand, imm: u16) -> Operand {
    use Operand::*;
    match op {
        U16(_) => U16(imm),
        A16(_) => A16(imm),
        U8(_) => U8(imm as u8),
        A8(_) => A8(imm as u8),
        I8(_) => I8(imm as i8),
        SPplusI8(_) => SPplusI8(imm as i8),
        other => other,
    }
}
