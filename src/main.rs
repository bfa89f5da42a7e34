use clap::Parser;
use pinelab::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
