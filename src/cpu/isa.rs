use core::fmt;

/// Decoded instruction with operand and timing information.
///
/// Durations are in M-cycles(= 4 T-cycles). Every instruction needs at
/// least one M-cycle for its own fetch; immediates and register-indirect
/// operands add more. Branch instructions are charged `branch_mcycles`
/// instead when the branch is taken.
#[derive(Clone, Copy)]
pub(crate) struct Instr {
    pub(crate) op: Opcode,
    pub(crate) op1: Operand,
    pub(crate) op2: Operand,
    pub(crate) mcycles: u8,
    pub(crate) branch_mcycles: u8,
}

impl Default for Instr {
    fn default() -> Self {
        Instr {
            op: Opcode::Nop,
            op1: Operand::Absent,
            op2: Operand::Absent,
            mcycles: 1,
            branch_mcycles: 1,
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opcode = format!("{:?}", self.op).to_ascii_uppercase();
        match (
            !matches!(self.op1, Operand::Absent),
            !matches!(self.op2, Operand::Absent),
        ) {
            (true, true) => write!(f, "{} {}, {}", opcode, self.op1, self.op2),
            (true, false) => write!(f, "{} {}", opcode, self.op1),
            (false, false) => write!(f, "{}", opcode),
            (false, true) => panic!("invalid: first operand absent but second present"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Operand {
    /// No operand
    Absent,
    /// Register value
    Reg(Reg),
    /// Register value as memory address
    RegMem(Reg),
    /// Branch condition
    Cond(Cond),
    /// Bit index
    B3(u8),
    /// RST target vector value
    Tgt(u8),
    /// Unsigned 8-bit imm
    U8(u8),
    /// Signed 8-bit imm
    I8(i8),
    /// Unsigned 16-bit imm
    U16(u16),
    /// 8-bit imm as memory address
    A8(u8),
    /// 16-bit imm as memory address
    A16(u16),
    /// For the operand `SP + i8`
    SPplusI8(i8),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Absent => write!(f, "<?>"),
            Operand::Reg(r) => write!(f, "{r:?}"),
            Operand::RegMem(r) => write!(f, "[{r:?}]"),
            Operand::Cond(c) => write!(f, "{c:?}"),
            Operand::B3(b) => write!(f, "{b}"),
            Operand::Tgt(t) => write!(f, "${t:04X}"),
            Operand::U8(u) => write!(f, "${u:02X}"),
            Operand::I8(i) => write!(f, "#{i:+}"),
            Operand::U16(u) => write!(f, "${u:04X}"),
            Operand::A8(a) => write!(f, "[$FF00 + ${a:02X}]"),
            Operand::A16(a) => write!(f, "[${a:04X}]"),
            Operand::SPplusI8(i) => write!(f, "SP + ${i:02X}"),
        }
    }
}

// Operation to perform for an instruction.
// These values do not correspond in any way to the actual opcode bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Opcode {
    // Memory
    Ld,
    Ldh, // Adds 0xFF00 to its address operand
    Push,
    Pop,

    // Arithmetic
    Inc,
    Dec,
    Add,
    Adc,
    Sub,
    Sbc,
    And,
    Xor,
    Or,
    Cp,

    // Bit shift and rotations
    Rla,
    Rlca,
    Rra,
    Rrca,
    Rlc,
    Rrc,
    Rl,
    Rr,
    Sla,
    Sra,
    Srl,
    Swap,
    Bit,
    Res,
    Set,

    // Branch
    Jr,
    Jp,
    Call,
    Ret,
    Reti,
    Rst,

    // Interrupt and system control
    Di,
    Ei,
    Halt,
    Stop,

    // Misc
    Cpl,
    Ccf,
    Scf,
    Nop,
    Daa,
    Prefix,

    Illegal,
}

/// All register names present in r8, r16, r16mem and r16stk are
/// represented by a single type for simplicity.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Reg {
    A,
    B,
    C,
    D,
    E,
    H,
    L,
    AF,
    BC,
    DE,
    HL,
    HLinc,
    HLdec,
    SP,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Cond {
    NZ,
    Z,
    NC,
    C,
}
