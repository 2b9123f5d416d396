#![allow(clippy::too_many_arguments)]

mod cli;

use std::process::ExitCode;

use clap::Parser;

use paintfe_tiles::logger;

fn main() -> ExitCode {
    let args = cli::CliArgs::parse();

    // Installed before the settings are read so their warnings are kept.
    let early = if args.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    logger::init(args.log.as_deref(), early);

    let config = match cli::load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            // The session logger echoes errors to stderr itself.
            match logger::log_path() {
                Some(_) => log::error!("{}", e),
                None => eprintln!("error: {}", e),
            }
            return ExitCode::FAILURE;
        }
    };

    // Level was validated by load_config.
    logger::set_level(config.level_filter().unwrap_or(log::LevelFilter::Info));

    if config.worker_threads > 0
        && let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .build_global()
    {
        log::warn!("could not size the rayon pool: {}", e);
    }
    log::info!("config: {:?}", config);

    cli::run(args, config)
}
