use std::env;
use std::path::Path;
use std::process;
use tracing::error;

mod config;
mod run;

#[tokio::main]
async fn main() {
    // Install global log collector.
    tracing_subscriber::fmt::init();

    let config_path =
        env::var("OBSRUN_CONFIG").expect("env variable OBSRUN_CONFIG should be set");

    let config = config::RunConfig::load(Path::new(&config_path)).unwrap_or_else(|err| {
        error!("{:?}", err);
        process::exit(1);
    });

    run::App { config }.start().await.unwrap_or_else(|err| {
        error!("{:?}", err);
        process::exit(1);
    });
}
