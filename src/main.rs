mod cli;
mod engine;
mod error;
mod metrics;
mod model;
mod storage;
mod text_summary;

use clap::Parser;

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();
    let is_silent = args.silent;
    init_logging(args.verbose);

    if let Err(e) = cli::run(args).await {
        if is_silent {
            println!("{}", e);
        } else {
            eprintln!("Error: {e:#}");
        }
        std::process::exit(error::exit_code(&e));
    }
}
