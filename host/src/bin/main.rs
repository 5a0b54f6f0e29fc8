use std::path::PathBuf;

use clap::Parser;
use dotenv::dotenv;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::FmtSubscriber;

use reyestr_host::server::serve;
use reyestr_host::{Cli, HostState};

#[tokio::main]
async fn main() {
    dotenv().ok();
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let mut opts = Cli::parse();
    if let Err(error) = opts.merge_from_file() {
        eprintln!("{error}");
        return error.exit_code();
    }

    let _guard = subscribe_log(&opts.log_path, &opts.log_level, opts.max_log);
    info!("Starting dispatch server on {}", opts.address);

    let state = match HostState::init(opts).await {
        Ok(state) => state,
        Err(error) => {
            error!("Startup failed: {error}");
            return error.exit_code();
        }
    };

    match serve(state).await {
        Ok(()) => {
            info!("Clean shutdown");
            0
        }
        Err(error) => {
            error!("Server error: {error}");
            1
        }
    }
}

fn subscribe_log(
    log_path: &Option<PathBuf>,
    log_level: &String,
    max_log: usize,
) -> Option<WorkerGuard> {
    let subscriber_builder = FmtSubscriber::builder()
        .with_env_filter(log_level)
        .with_test_writer();
    match log_path {
        Some(log_path) => {
            let file_appender = Builder::new()
                .rotation(Rotation::DAILY)
                .filename_prefix("reyestr.log")
                .max_log_files(max_log)
                .build(log_path)
                .expect("initializing rolling file appender failed");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let subscriber = subscriber_builder.json().with_writer(non_blocking).finish();
            tracing::subscriber::set_global_default(subscriber).unwrap();
            Some(guard)
        }
        None => {
            let subscriber = subscriber_builder.finish();
            tracing::subscriber::set_global_default(subscriber).unwrap();
            None
        }
    }
}
