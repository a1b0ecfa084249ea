//! pforge: entrypoint
//! - logging from PF_LOG_* env, overridable by flags
//! - run the subcommand and map its outcome to an exit code

use clap::Parser;
use pforge::cli::{self, Args, EXIT_ERROR};
use pforge::logging::{init_logging, LoggingConfig};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log = LoggingConfig::from_env()
        .with_overrides(args.log_level.as_deref(), args.log_format.as_deref());
    if let Err(e) = init_logging(log) {
        eprintln!("pforge: {e:#}");
        std::process::exit(EXIT_ERROR);
    }

    let code = match cli::run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("pforge: {e:#}");
            EXIT_ERROR
        }
    };
    std::process::exit(code);
}
