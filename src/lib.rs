pub mod adapters;
pub mod core;
pub mod runtime;

use clap::Parser;

pub fn run() {
    env_logger::init();
    let cli = runtime::cli::Cli::parse();
    if let Err(e) = runtime::cli::run(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
