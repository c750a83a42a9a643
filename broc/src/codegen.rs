use log::debug;
use std::collections::HashMap;

use brovm::isa::{Instruction, Opcode};

use crate::ast::{BinOp, Expr, Program, Stmt};

/// Lowers a parsed program to a flat bytecode sequence.
///
/// Expressions evaluate in implicit-accumulator style: every expression
/// leaves its value in AX, with intermediates saved on the stack.
/// Variables live in the VM register file; the first assignment to a name
/// allocates the next register index. The sequence always ends in a single
/// HLT, and jump placeholders are back-patched once all positions are
/// known.
pub struct Codegen {
  instructions: Vec<Instruction>,
  /// Variable name -> register index (1..). Only 0..=3 exist at runtime;
  /// a fourth variable compiles but faults when pushed.
  symbol_table: HashMap<String, u16>,
  /// Label id -> instruction index.
  label_targets: HashMap<usize, usize>,
  /// (instruction index, label id) pairs awaiting back-patch.
  label_placeholders: Vec<(usize, usize)>,
  next_register: u16,
  label_counter: usize,
}

impl Codegen {
  fn new() -> Self {
    Codegen {
      instructions: Vec::new(),
      symbol_table: HashMap::new(),
      label_targets: HashMap::new(),
      label_placeholders: Vec::new(),
      next_register: 1,
      label_counter: 0,
    }
  }

  /// Entry point: compiles the whole program. State lives only for this
  /// one call, so repeated invocations are independent and deterministic.
  pub fn generate(program: &Program) -> Vec<Instruction> {
    let mut generator = Codegen::new();
    for stmt in &program.statements {
      generator.gen_statement(stmt);
    }
    generator.emit(Instruction::op(Opcode::Hlt));
    generator.patch_jumps();
    generator.instructions
  }

  fn emit(&mut self, instr: Instruction) {
    debug!("emit {:>4}: {} {}", self.instructions.len(), instr.opcode, instr.a1);
    self.instructions.push(instr);
  }

  fn new_label(&mut self) -> usize {
    let id = self.label_counter;
    self.label_counter += 1;
    id
  }

  /// Marks the current end of the instruction list as the label target.
  fn mark_label(&mut self, label: usize) {
    self.label_targets.insert(label, self.instructions.len());
  }

  fn emit_jump_placeholder(&mut self, opcode: Opcode, label: usize) {
    self.label_placeholders.push((self.instructions.len(), label));
    self.emit(Instruction::imm(opcode, 0));
  }

  /// Resolves placeholders. Label targets are recorded as instruction
  /// indices while the list is still growing; the VM treats jump operands
  /// as absolute byte offsets, so the indices are converted through the
  /// cumulative width of everything before them.
  fn patch_jumps(&mut self) {
    let mut offsets = Vec::with_capacity(self.instructions.len());
    let mut position = 0usize;
    for instr in &self.instructions {
      offsets.push(position);
      position += instr.opcode.width() as usize;
    }

    for &(index, label) in &self.label_placeholders {
      match self.label_targets.get(&label) {
        Some(&target) => self.instructions[index].a1 = offsets[target] as u16,
        None => eprintln!("Error: Unknown label ID {label}"),
      }
    }
  }

  fn gen_statement(&mut self, stmt: &Stmt) {
    match stmt {
      Stmt::Let { name, value } => {
        self.gen_expression(value);

        let reg = match self.symbol_table.get(name) {
          Some(&reg) => reg,
          None => {
            let reg = self.next_register;
            self.next_register += 1;
            self.symbol_table.insert(name.clone(), reg);
            reg
          }
        };

        self.emit(Instruction::imm(Opcode::Push, 0)); // Push value in AX
        self.emit(Instruction::imm(Opcode::Pop, reg)); // Store in variable register
      }

      Stmt::Print(expr) => {
        self.gen_expression(expr);
        self.emit(Instruction::op(Opcode::Prn));
      }

      Stmt::If { condition, then_branch, else_branch } => {
        self.gen_expression(condition);
        self.normalize_condition();

        let else_label = self.new_label();
        let end_label = self.new_label();

        // AX == 0 means the condition was zero.
        self.emit_jump_placeholder(Opcode::Jz, else_label);

        for stmt in then_branch {
          self.gen_statement(stmt);
        }
        self.emit_jump_placeholder(Opcode::Jmp, end_label);

        self.mark_label(else_label);
        for stmt in else_branch {
          self.gen_statement(stmt);
        }

        self.mark_label(end_label);
      }

      Stmt::While { condition, body } => {
        let cond_label = self.new_label();
        let end_label = self.new_label();

        self.mark_label(cond_label);
        self.gen_expression(condition);
        self.normalize_condition();

        self.emit_jump_placeholder(Opcode::Jz, end_label);
        for stmt in body {
          self.gen_statement(stmt);
        }
        self.emit_jump_placeholder(Opcode::Jmp, cond_label);
        self.mark_label(end_label);
      }
    }
  }

  /// The fixed prelude between a condition expression and its JZ: saves AX
  /// to BX through the stack, clears AX, subtracts, and pulses the Equal
  /// flag. Net effect is AX <- -AX with Equal left clear. The bytecode
  /// dialect is defined by this exact sequence, so it is emitted verbatim.
  fn normalize_condition(&mut self) {
    self.emit(Instruction::imm(Opcode::Push, 0));
    self.emit(Instruction::imm(Opcode::Pop, 1));
    self.emit(Instruction::imm(Opcode::Mov, 0));
    self.emit(Instruction::op(Opcode::Sub));
    self.emit(Instruction::op(Opcode::Ste));
    self.emit(Instruction::op(Opcode::Cle));
  }

  fn gen_expression(&mut self, expr: &Expr) {
    match expr {
      Expr::Number(value) => {
        self.emit(Instruction::imm(Opcode::Mov, *value as u16));
      }

      Expr::Variable(name) => match self.symbol_table.get(name) {
        Some(&reg) => {
          // No register-to-register move exists, so round-trip the value
          // through the stack into AX.
          self.emit(Instruction::imm(Opcode::Push, reg));
          self.emit(Instruction::imm(Opcode::Pop, 0));
        }
        None => {
          eprintln!("Unknown variable: {name}");
          self.emit(Instruction::imm(Opcode::Mov, 0));
        }
      },

      Expr::Binary { op, left, right } => {
        self.gen_expression(left);
        self.emit(Instruction::imm(Opcode::Push, 0));
        self.gen_expression(right);
        self.emit(Instruction::imm(Opcode::Push, 0));
        self.emit(Instruction::imm(Opcode::Pop, 1)); // Right operand -> BX
        self.emit(Instruction::imm(Opcode::Pop, 0)); // Left operand  -> AX

        match op {
          BinOp::Add => self.emit(Instruction::op(Opcode::Add)),
          BinOp::Sub => self.emit(Instruction::op(Opcode::Sub)),
          BinOp::Mul => self.emit(Instruction::op(Opcode::Mul)),
          BinOp::Div => self.emit(Instruction::op(Opcode::Div)),
          // Comparisons leave AX = L - R and set a flag; they do not
          // produce a boolean. Conditions therefore branch on the
          // numeric difference.
          BinOp::Equal => {
            self.emit(Instruction::op(Opcode::Sub));
            self.emit(Instruction::op(Opcode::Ste));
          }
          BinOp::Greater => {
            self.emit(Instruction::op(Opcode::Sub));
            self.emit(Instruction::op(Opcode::Stg));
          }
          BinOp::Less => {
            self.emit(Instruction::op(Opcode::Sub));
            self.emit(Instruction::op(Opcode::Stl));
          }
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::lexer::Lexer;
  use crate::parser::Parser;
  use brovm::isa::{Instruction as I, encode_program};
  use brovm::vm::{StepOutcome, Vm, VmError};

  fn compile(source: &str) -> Vec<Instruction> {
    let program = Parser::new(Lexer::tokenize(source)).parse_program();
    Codegen::generate(&program)
  }

  /// Runs compiled bytecode to completion and returns the captured output.
  fn run(source: &str) -> (Result<(), VmError>, String) {
    let mut vm = Vm::with_output(Vec::new());
    vm.load_program(&compile(source)).unwrap();
    let result = vm.execute();
    let output = String::from_utf8(vm.into_output()).unwrap();
    (result, output)
  }

  fn output_lines(output: &str) -> Vec<&str> {
    output.lines().filter(|line| line.starts_with("Output: ")).collect()
  }

  #[test]
  fn generate_ends_with_exactly_one_hlt() {
    for source in ["", "printbro(1);", "whilebro (n) { printbro(n); }"] {
      let bytecode = compile(source);
      let hlts = bytecode.iter().filter(|i| i.opcode == Opcode::Hlt).count();
      assert_eq!(hlts, 1, "source {source:?}");
      assert_eq!(bytecode.last().unwrap().opcode, Opcode::Hlt);
    }
  }

  #[test]
  fn generate_is_deterministic() {
    let source = "letbro a = 1; whilebro (a < 3) { printbro(a); letbro a = a + 1; }";
    assert_eq!(compile(source), compile(source));
  }

  #[test]
  fn number_lowers_to_mov() {
    let bytecode = compile("printbro(7);");
    assert_eq!(
      bytecode,
      vec![
        I::imm(Opcode::Mov, 7),
        I::op(Opcode::Prn),
        I::op(Opcode::Hlt),
      ]
    );
  }

  #[test]
  fn let_allocates_registers_in_declaration_order() {
    let bytecode = compile("letbro a = 1; letbro b = 2;");
    assert_eq!(
      bytecode,
      vec![
        I::imm(Opcode::Mov, 1),
        I::imm(Opcode::Push, 0),
        I::imm(Opcode::Pop, 1),
        I::imm(Opcode::Mov, 2),
        I::imm(Opcode::Push, 0),
        I::imm(Opcode::Pop, 2),
        I::op(Opcode::Hlt),
      ]
    );
  }

  #[test]
  fn reassignment_reuses_the_register_index() {
    let bytecode = compile("letbro n = 3; letbro n = n + 1;");
    let pops: Vec<u16> = bytecode
      .iter()
      .filter(|i| i.opcode == Opcode::Pop)
      .map(|i| i.a1)
      .collect();
    // Store, variable read, operand pops, store again: the name keeps
    // register 1 throughout.
    assert_eq!(pops, vec![1, 0, 1, 0, 1]);
  }

  #[test]
  fn unknown_variable_reads_as_zero() {
    let bytecode = compile("printbro(ghost);");
    assert_eq!(bytecode[0], I::imm(Opcode::Mov, 0));
  }

  #[test]
  fn binary_operands_travel_through_the_stack() {
    let bytecode = compile("printbro(3 - 4);");
    assert_eq!(
      bytecode,
      vec![
        I::imm(Opcode::Mov, 3),
        I::imm(Opcode::Push, 0),
        I::imm(Opcode::Mov, 4),
        I::imm(Opcode::Push, 0),
        I::imm(Opcode::Pop, 1),
        I::imm(Opcode::Pop, 0),
        I::op(Opcode::Sub),
        I::op(Opcode::Prn),
        I::op(Opcode::Hlt),
      ]
    );
  }

  #[test]
  fn comparisons_subtract_and_set_their_flag() {
    for (source, flag) in [
      ("letbro x = a == b;", Opcode::Ste),
      ("letbro x = a > b;", Opcode::Stg),
      ("letbro x = a < b;", Opcode::Stl),
    ] {
      let bytecode = compile(source);
      let sub_at = bytecode.iter().position(|i| i.opcode == Opcode::Sub).unwrap();
      assert_eq!(bytecode[sub_at + 1].opcode, flag, "source {source:?}");
    }
  }

  #[test]
  fn if_lowers_with_normalize_prelude_and_patched_jumps() {
    let bytecode =
      compile("letbro a = 5; ifbro (a == 5) { printbro(1); } elsebro { printbro(2); }");

    let expected = vec![
      I::imm(Opcode::Mov, 5),   //  0: a = 5
      I::imm(Opcode::Push, 0),  //  1
      I::imm(Opcode::Pop, 1),   //  2
      I::imm(Opcode::Push, 1),  //  3: read a
      I::imm(Opcode::Pop, 0),   //  4
      I::imm(Opcode::Push, 0),  //  5
      I::imm(Opcode::Mov, 5),   //  6
      I::imm(Opcode::Push, 0),  //  7
      I::imm(Opcode::Pop, 1),   //  8
      I::imm(Opcode::Pop, 0),   //  9
      I::op(Opcode::Sub),       // 10: a == 5 as difference
      I::op(Opcode::Ste),       // 11
      I::imm(Opcode::Push, 0),  // 12: normalize-condition prelude
      I::imm(Opcode::Pop, 1),   // 13
      I::imm(Opcode::Mov, 0),   // 14
      I::op(Opcode::Sub),       // 15
      I::op(Opcode::Ste),       // 16
      I::op(Opcode::Cle),       // 17
      I::imm(Opcode::Jz, 54),   // 18: to the else block (byte offset)
      I::imm(Opcode::Mov, 1),   // 19: then
      I::op(Opcode::Prn),       // 20
      I::imm(Opcode::Jmp, 58),  // 21: over the else block
      I::imm(Opcode::Mov, 2),   // 22: else
      I::op(Opcode::Prn),       // 23
      I::op(Opcode::Hlt),       // 24
    ];
    assert_eq!(bytecode, expected);
  }

  #[test]
  fn while_jumps_back_to_the_condition() {
    let bytecode = compile("letbro n = 3; whilebro (n) { printbro(n); letbro n = n + 1; }");

    // The condition starts at instruction 3 = byte offset 9; the loop end
    // is the trailing HLT at byte offset 68.
    let jz = bytecode.iter().find(|i| i.opcode == Opcode::Jz).unwrap();
    assert_eq!(jz.a1, 68);
    let jmp = bytecode.iter().find(|i| i.opcode == Opcode::Jmp).unwrap();
    assert_eq!(jmp.a1, 9);
    assert_eq!(encode_program(&bytecode).len(), 69);
  }

  #[test]
  fn jump_operands_land_on_instruction_starts() {
    let source = "letbro a = 1; \
                  ifbro (a < 2) { letbro a = a + 1; } elsebro { printbro(a); } \
                  whilebro (a) { letbro a = a - 1; }";
    let bytecode = compile(source);

    let mut starts = Vec::new();
    let mut position = 0u16;
    for instr in &bytecode {
      starts.push(position);
      position += instr.opcode.width();
    }

    for instr in &bytecode {
      if matches!(instr.opcode, Opcode::Jmp | Opcode::Jz | Opcode::Jnz) {
        assert!(
          starts.contains(&instr.a1),
          "jump target {} is not an instruction start",
          instr.a1
        );
      }
    }
  }

  #[test]
  fn constant_print_runs_end_to_end() {
    let (result, output) = run("printbro(42);");
    result.unwrap();

    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines[0], "Starting VM Execution...");
    assert_eq!(lines[1], "Output: 42");
    assert_eq!(lines[2], "HUMAN OUTPUT: 42");
    assert!(output.trim_end().ends_with("Program Halted."));
  }

  #[test]
  fn arithmetic_respects_precedence() {
    let (result, output) = run("letbro a = 3; letbro b = 4; printbro(a + b * 2);");
    result.unwrap();
    assert_eq!(output_lines(&output), vec!["Output: 11"]);
  }

  #[test]
  fn equality_in_conditions_branches_on_the_difference() {
    // `a == 5` lowers to a subtraction, so a true comparison leaves AX = 0
    // and JZ falls into the else block.
    let (result, output) =
      run("letbro a = 5; ifbro (a == 5) { printbro(1); } elsebro { printbro(2); }");
    result.unwrap();
    assert_eq!(output_lines(&output), vec!["Output: 2"]);
  }

  #[test]
  fn unequal_condition_takes_the_then_branch() {
    let (result, output) =
      run("letbro a = 4; ifbro (a == 5) { printbro(1); } elsebro { printbro(2); }");
    result.unwrap();
    assert_eq!(output_lines(&output), vec!["Output: 1"]);
  }

  #[test]
  fn while_loop_enters_and_never_terminates() {
    let source = "letbro n = 3; whilebro (n) { printbro(n); letbro n = n + 1; }";
    let mut vm = Vm::with_output(Vec::new());
    vm.load_program(&compile(source)).unwrap();

    // The nonzero condition negates to a nonzero AX, so JZ never fires.
    // Bound the run instead of waiting for a HLT that cannot come.
    for _ in 0..10_000 {
      assert_eq!(vm.step().unwrap(), StepOutcome::Continue);
    }

    let output = String::from_utf8(vm.into_output()).unwrap();
    let lines = output_lines(&output);
    assert!(lines.len() > 1, "loop body should run repeatedly");
    assert_eq!(lines[0], "Output: 3");
    assert_eq!(lines[1], "Output: 4");
  }

  #[test]
  fn division_by_zero_surfaces_as_a_fatal_error() {
    let (result, _) = run("letbro a = 10; letbro b = 0; printbro(a / b);");
    assert!(matches!(result, Err(VmError::DivisionByZero)));
  }

  #[test]
  fn fourth_variable_faults_at_runtime() {
    // Registers 1..=3 back the first three variables; the fourth gets
    // index 4, which PUSH/POP reject.
    let source = "letbro a = 1; letbro b = 2; letbro c = 3; letbro d = 4; printbro(d);";
    let (result, _) = run(source);
    assert!(matches!(result, Err(VmError::InvalidPopRegister(4))));
  }
}
