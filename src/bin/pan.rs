//! pan - upload to and download from the drive with parallel chunks.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use env_logger::Env;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    if let Err(e) = pan_transfer::cli::run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
