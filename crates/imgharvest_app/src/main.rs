mod cli;
mod run;
mod settings;

use std::process::ExitCode;

use clap::Parser;
use engine_logging::{engine_error, LogDestination};

use crate::cli::Args;
use crate::run::Outcome;

fn main() -> ExitCode {
    let args = Args::parse();

    let destination = match &args.log_file {
        Some(path) => LogDestination::Both(path.clone()),
        None => LogDestination::Terminal,
    };
    engine_logging::initialize(destination, args.log_level);

    let base = match &args.settings {
        Some(path) => settings::load_options(path),
        None => Default::default(),
    };
    let request = args.request(base);
    if let (true, Some(path)) = (args.save_settings, &args.settings) {
        settings::save_options(path, &request.options);
    }

    match run::execute(args.engine_config(), request) {
        Ok(Outcome::Completed) => ExitCode::SUCCESS,
        Ok(Outcome::Incomplete) => ExitCode::from(1),
        Err(err) => {
            engine_error!("{:#}", err);
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}
