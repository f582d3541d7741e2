mod api;
mod cli;
mod config;
mod model;
mod orchestrator;
mod text_summary;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;

/// Route logs to a file while the dashboard owns the terminal, stderr otherwise.
fn init_logging(to_file: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if to_file {
        let file = config::log_file_path().and_then(|path| {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir).ok()?;
            }
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
        match file {
            Some(f) => {
                builder.target(env_logger::Target::Pipe(Box::new(f)));
            }
            // Nowhere safe to write; keep the terminal clean.
            None => {
                builder.filter_level(log::LevelFilter::Off);
            }
        }
    }
    builder.init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = cli::Cli::parse();
    let is_tui = args.is_tui();
    init_logging(is_tui);

    match cli::run(args).await {
        Ok(()) => {
            // Explicitly exit with code 0 on success so no stray task keeps the runtime alive.
            if !is_tui {
                std::process::exit(0);
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}
