use anyhow::{Context, Result};
use std::env;
use std::path::Path;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use msgcursor::config::{Config, LoggingConfig};
use msgcursor::constants::LOG_FILE_NAME;
use msgcursor::replay::{self, Scenario};

fn setup_logging(logging: &LoggingConfig) {
    use std::fs::OpenOptions;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter.as_str()));

    // Try to create a log file in the config directory
    let log_file = logging
        .to_file
        .then(Config::config_dir)
        .and_then(|dir| dir.ok())
        .and_then(|dir| std::fs::create_dir_all(&dir).ok().map(|_| dir))
        .map(|dir| dir.join(LOG_FILE_NAME))
        .and_then(|path| {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)
                .ok()
        });

    if let Some(file) = log_file {
        // Log to file
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false),
            )
            .init();
    } else {
        // Fallback to stderr if file logging is off or fails
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_usage() {
    eprintln!(
        r#"msgcursor - Message window navigation replay

Usage: msgcursor <command>

Commands:
    replay <file>   Run a navigation scenario and print its trace
    init            Write the default configuration file
    help            Show this help message

Configuration file: ~/.config/msgcursor/config.toml
"#
    );
}

async fn run_replay(path: &Path) -> Result<()> {
    let config = Config::load()?;
    setup_logging(&config.logging);

    let scenario = Scenario::load(path)?;
    tracing::info!(
        "Replaying {} ({} messages, {} steps)",
        path.display(),
        scenario.messages.len(),
        scenario.steps.len()
    );

    for line in replay::run(&scenario, &config).await? {
        println!("{}", line);
    }
    Ok(())
}

fn run_init() -> Result<()> {
    let path = Config::config_path()?;
    if path.exists() {
        println!("Configuration already exists at {}", path.display());
        return Ok(());
    }
    Config::default().save()?;
    println!("Configuration saved to {}", path.display());
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("help") | Some("--help") | Some("-h") | None => {
            print_usage();
            Ok(())
        }
        Some("replay") => {
            let path = args
                .get(2)
                .context("Missing scenario file. Usage: msgcursor replay <file>")?;
            run_replay(Path::new(path)).await
        }
        Some("init") => run_init(),
        Some(cmd) => {
            eprintln!("Unknown command: {}", cmd);
            print_usage();
            std::process::exit(1);
        }
    }
}
