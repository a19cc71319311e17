use clap::Parser;
use warden::cli::{self, WardenOpts};

#[tokio::main]
async fn main() {
    let options = WardenOpts::parse();
    warden::init_logger(cli::log_level_from_verbosity_flag_count(options.verbose));

    if let Err(err) = warden::run(options).await {
        log::error!("{err:?}");
        std::process::exit(1);
    }
}
