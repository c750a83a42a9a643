use clap::Parser as ClapParser;
use log::info;

use crate::codegen::Codegen;
use crate::lexer::Lexer;
use crate::parser::Parser;

mod ast;
mod codegen;
mod emitter;
mod lexer;
mod parser;
mod token;

#[derive(ClapParser)]
#[command(name = "broc", about = "BroLang compiler", disable_help_flag = true)]
struct Cli {
  /// Input source file
  input: String,

  /// Output artifact path
  #[arg(short)]
  output: String,
}

fn show_usage() {
  println!("Usage:");
  println!("  broc input.bro -o prog.brox");
  println!("  broc input.bro -o prog.rs");
}

fn main() {
  // The accepted shape is exactly `broc <input> -o <output>`; anything
  // else gets the usage banner and a failure status.
  let cli = match Cli::try_parse() {
    Ok(cli) => cli,
    Err(_) => {
      show_usage();
      std::process::exit(1);
    }
  };
  env_logger::init();

  if let Err(e) = run(&cli) {
    eprintln!("Compiler error: {e}");
    std::process::exit(1);
  }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
  let source = std::fs::read_to_string(&cli.input)
    .map_err(|_| format!("Failed to open input file: {}", cli.input))?;

  let tokens = Lexer::tokenize(&source);
  info!("Lexed {} tokens from {}", tokens.len(), cli.input);

  let program = Parser::new(tokens).parse_program();
  info!("Parsed {} top-level statements", program.statements.len());

  let bytecode = Codegen::generate(&program);
  info!("Generated {} instructions", bytecode.len());

  emitter::write_to_file(&cli.output, &bytecode)?;
  info!("Compilation complete: {} -> {}", cli.input, cli.output);
  Ok(())
}
