use bincode::{Decode, Encode};
use std::fmt;
use thiserror::Error;

/// One-byte opcode tags. The discriminants are the wire format shared with
/// the compiler and must not change.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub enum Opcode {
  Nop = 0x01,
  Hlt = 0x02,

  /// AX <- imm
  Mov = 0x08,
  MovBx = 0x09,
  MovCx = 0x0A,
  MovDx = 0x0B,
  MovSp = 0x0C,

  Ste = 0x10,
  Cle = 0x11,
  Stg = 0x12,
  Clg = 0x13,
  Sth = 0x14,
  Clh = 0x15,
  Stl = 0x16,
  Cll = 0x17,

  /// Push the register selected by imm (0=AX, 1=BX, 2=CX, 3=DX).
  Push = 0x1A,
  /// Pop into the register selected by imm.
  Pop = 0x1B,

  Add = 0x20,
  Sub = 0x21,
  Mul = 0x22,
  Div = 0x23,

  /// Print AX as decimal.
  Prn = 0x30,

  Jmp = 0x31,
  Jz = 0x32,
  Jnz = 0x33,
}

/// Every opcode, in wire-value order. Handy for table-driven tests.
pub const OPCODES: [Opcode; 25] = [
  Opcode::Nop,
  Opcode::Hlt,
  Opcode::Mov,
  Opcode::MovBx,
  Opcode::MovCx,
  Opcode::MovDx,
  Opcode::MovSp,
  Opcode::Ste,
  Opcode::Cle,
  Opcode::Stg,
  Opcode::Clg,
  Opcode::Sth,
  Opcode::Clh,
  Opcode::Stl,
  Opcode::Cll,
  Opcode::Push,
  Opcode::Pop,
  Opcode::Add,
  Opcode::Sub,
  Opcode::Mul,
  Opcode::Div,
  Opcode::Prn,
  Opcode::Jmp,
  Opcode::Jz,
  Opcode::Jnz,
];

impl Opcode {
  /// Number of 16-bit immediates the opcode carries.
  pub const fn arity(self) -> u16 {
    match self {
      Opcode::Nop
      | Opcode::Hlt
      | Opcode::Ste
      | Opcode::Cle
      | Opcode::Stg
      | Opcode::Clg
      | Opcode::Sth
      | Opcode::Clh
      | Opcode::Stl
      | Opcode::Cll
      | Opcode::Add
      | Opcode::Sub
      | Opcode::Mul
      | Opcode::Div
      | Opcode::Prn => 0,
      Opcode::Mov
      | Opcode::MovBx
      | Opcode::MovCx
      | Opcode::MovDx
      | Opcode::MovSp
      | Opcode::Push
      | Opcode::Pop
      | Opcode::Jmp
      | Opcode::Jz
      | Opcode::Jnz => 1,
    }
  }

  /// Encoded size in bytes: one opcode byte plus two per immediate.
  pub const fn width(self) -> u16 {
    1 + 2 * self.arity()
  }

  /// Fixed assembly mnemonic for this opcode.
  pub const fn mnemonic(self) -> &'static str {
    match self {
      Opcode::Nop => "NOP",
      Opcode::Hlt => "HLT",
      Opcode::Mov => "MOV",
      Opcode::MovBx => "MOV_BX",
      Opcode::MovCx => "MOV_CX",
      Opcode::MovDx => "MOV_DX",
      Opcode::MovSp => "MOV_SP",
      Opcode::Ste => "STE",
      Opcode::Cle => "CLE",
      Opcode::Stg => "STG",
      Opcode::Clg => "CLG",
      Opcode::Sth => "STH",
      Opcode::Clh => "CLH",
      Opcode::Stl => "STL",
      Opcode::Cll => "CLL",
      Opcode::Push => "PUSH",
      Opcode::Pop => "POP",
      Opcode::Add => "ADD",
      Opcode::Sub => "SUB",
      Opcode::Mul => "MUL",
      Opcode::Div => "DIV",
      Opcode::Prn => "PRN",
      Opcode::Jmp => "JMP",
      Opcode::Jz => "JZ",
      Opcode::Jnz => "JNZ",
    }
  }
}

impl fmt::Display for Opcode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.mnemonic())
  }
}

impl TryFrom<u8> for Opcode {
  type Error = u8;

  fn try_from(byte: u8) -> Result<Self, u8> {
    let opcode = match byte {
      0x01 => Opcode::Nop,
      0x02 => Opcode::Hlt,
      0x08 => Opcode::Mov,
      0x09 => Opcode::MovBx,
      0x0A => Opcode::MovCx,
      0x0B => Opcode::MovDx,
      0x0C => Opcode::MovSp,
      0x10 => Opcode::Ste,
      0x11 => Opcode::Cle,
      0x12 => Opcode::Stg,
      0x13 => Opcode::Clg,
      0x14 => Opcode::Sth,
      0x15 => Opcode::Clh,
      0x16 => Opcode::Stl,
      0x17 => Opcode::Cll,
      0x1A => Opcode::Push,
      0x1B => Opcode::Pop,
      0x20 => Opcode::Add,
      0x21 => Opcode::Sub,
      0x22 => Opcode::Mul,
      0x23 => Opcode::Div,
      0x30 => Opcode::Prn,
      0x31 => Opcode::Jmp,
      0x32 => Opcode::Jz,
      0x33 => Opcode::Jnz,
      _ => return Err(byte),
    };
    Ok(opcode)
  }
}

/// A decoded instruction. `a2` is reserved for a two-immediate form no
/// current opcode uses and is always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct Instruction {
  pub opcode: Opcode,
  pub a1: u16,
  pub a2: u16,
}

impl Instruction {
  /// Operand-less instruction.
  pub const fn op(opcode: Opcode) -> Self {
    Instruction { opcode, a1: 0, a2: 0 }
  }

  /// Instruction carrying a single immediate.
  pub const fn imm(opcode: Opcode, a1: u16) -> Self {
    Instruction { opcode, a1, a2: 0 }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
  #[error("unknown opcode {byte:#04x} at offset {at}")]
  UnknownOpcode { at: usize, byte: u8 },
  #[error("truncated instruction at offset {at}")]
  Truncated { at: usize },
}

/// Serializes a program to its byte image: one opcode byte per instruction
/// followed by its little-endian immediates.
pub fn encode_program(program: &[Instruction]) -> Vec<u8> {
  let mut image = Vec::new();
  for instr in program {
    image.push(instr.opcode as u8);
    let width = instr.opcode.width();
    if width >= 3 {
      image.extend_from_slice(&instr.a1.to_le_bytes());
    }
    if width == 5 {
      image.extend_from_slice(&instr.a2.to_le_bytes());
    }
  }
  image
}

/// Inverse of [`encode_program`]: consumes the whole buffer.
pub fn decode_program(image: &[u8]) -> Result<Vec<Instruction>, DecodeError> {
  let mut program = Vec::new();
  let mut at = 0usize;
  while at < image.len() {
    let opcode = Opcode::try_from(image[at]).map_err(|byte| DecodeError::UnknownOpcode { at, byte })?;
    let width = opcode.width() as usize;
    if at + width > image.len() {
      return Err(DecodeError::Truncated { at });
    }
    let mut instr = Instruction::op(opcode);
    if width >= 3 {
      instr.a1 = u16::from_le_bytes([image[at + 1], image[at + 2]]);
    }
    if width == 5 {
      instr.a2 = u16::from_le_bytes([image[at + 3], image[at + 4]]);
    }
    program.push(instr);
    at += width;
  }
  Ok(program)
}
