use clap::Parser as ClapParser;
use log::info;

use brovm::program::ProgramImage;
use brovm::vm::Vm;

#[derive(ClapParser)]
#[command(author, version, about = "BroLang virtual machine", long_about = None)]
struct Cli {
  /// Increase verbosity (-v, -vv, -vvv)
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,

  /// Compiled program image to execute
  program: String,
}

fn main() {
  let cli = Cli::parse();

  // Set up logging level
  let log_level = match cli.verbose {
    0 => "info",
    1 => "debug",
    _ => "trace",
  };
  unsafe {
    std::env::set_var("RUST_LOG", log_level);
  }
  env_logger::init();

  let image = match ProgramImage::read_from_path(&cli.program) {
    Ok(image) => image,
    Err(e) => {
      eprintln!("VM Error: {e}");
      std::process::exit(1);
    }
  };
  info!("Loaded {} ({} instructions)", cli.program, image.program.len());

  let mut vm = Vm::new();
  if let Err(e) = vm.load_program(&image.program) {
    eprintln!("VM Error: {e}");
    std::process::exit(1);
  }
  if let Err(e) = vm.execute() {
    eprintln!("VM Error: {e}");
    std::process::exit(1);
  }
}
