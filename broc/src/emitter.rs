use log::info;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

use brovm::isa::Instruction;
use brovm::program::ProgramImage;

#[derive(Debug, Error)]
pub enum EmitError {
  #[error("Failed to open output file: {path}: {source}")]
  Create { path: String, source: std::io::Error },
  #[error("Failed to write output file: {0}")]
  Write(#[from] std::io::Error),
}

/// Writes the compiled program to `path`. A `.rs` output gets the source
/// artifact declaring the instruction list; anything else gets the binary
/// program image the `brovm` binary loads directly.
pub fn write_to_file<P: AsRef<Path>>(path: P, program: &[Instruction]) -> Result<(), EmitError> {
  let path = path.as_ref();
  let mut file = std::fs::File::create(path).map_err(|source| EmitError::Create {
    path: path.display().to_string(),
    source,
  })?;

  if path.extension().and_then(|ext| ext.to_str()) == Some("rs") {
    write_source(&mut file, program)?;
  } else {
    ProgramImage::new(program.to_vec()).write_to(&mut file)?;
  }

  info!("Wrote program to {}", path.display());
  Ok(())
}

/// Serializes the instruction list as a Rust source file. Opcode identity
/// and the single immediate survive verbatim; arity-0 opcodes omit the
/// immediate.
pub fn write_source(out: &mut dyn Write, program: &[Instruction]) -> std::io::Result<()> {
  writeln!(out, "// Generated by broc. Do not edit.")?;
  writeln!(out, "use brovm::isa::{{Instruction, Opcode}};")?;
  writeln!(out)?;
  writeln!(out, "pub static PROGRAM: &[Instruction] = &[")?;
  for instr in program {
    if instr.opcode.arity() == 0 {
      writeln!(out, "  Instruction::op(Opcode::{:?}),", instr.opcode)?;
    } else {
      writeln!(out, "  Instruction::imm(Opcode::{:?}, {}),", instr.opcode, instr.a1)?;
    }
  }
  writeln!(out, "];")?;
  Ok(())
}
