//! Stacks Service - retrieval and ingestion daemon
//!
//! Usage:
//!   stacks-service <COMMAND> [OPTIONS]
//!
//! Commands:
//!   serve              Initialize the service and run until interrupted
//!   migrate-indexes    Ensure store tables and indexes exist with the
//!                      configured vector dimension, then exit
//!
//! Options:
//!   --config <PATH>    Path to configuration file (default: config.toml)
//!
//! Exit codes:
//!   0  ok
//!   1  configuration error
//!   2  store unreachable
//!   3  index or dimension mismatch

use std::path::PathBuf;
use the_stacks::config::StacksConfig;
use the_stacks::error::ErrorKind;
use the_stacks::store::{DocumentStore, SqliteDocumentStore};
use the_stacks::StacksService;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_OK: i32 = 0;
const EXIT_CONFIG: i32 = 1;
const EXIT_STORE_UNREACHABLE: i32 = 2;
const EXIT_INDEX_MISMATCH: i32 = 3;

#[derive(Debug)]
enum Command {
    Serve,
    MigrateIndexes,
}

#[derive(Debug)]
struct CliArgs {
    command: Command,
    config_path: PathBuf,
}

fn print_help() {
    println!("stacks-service - retrieval and ingestion daemon");
    println!();
    println!("Usage: stacks-service <serve|migrate-indexes> [--config <PATH>]");
}

fn parse_args() -> Result<CliArgs, String> {
    let mut command = None;
    let mut config_path = PathBuf::from("config.toml");
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "serve" => command = Some(Command::Serve),
            "migrate-indexes" => command = Some(Command::MigrateIndexes),
            "--config" => {
                config_path = args
                    .next()
                    .map(PathBuf::from)
                    .ok_or_else(|| "--config requires a path".to_string())?;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(EXIT_OK);
            }
            other => return Err(format!("Unknown argument: {}", other)),
        }
    }

    let command = command.ok_or_else(|| "missing command".to_string())?;
    Ok(CliArgs {
        command,
        config_path,
    })
}

fn load_config(path: &PathBuf) -> Result<StacksConfig, String> {
    let config = StacksConfig::from_file(path).map_err(|e| e.to_string())?;
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// Map a startup error onto the documented exit codes.
fn exit_code_for(error: &the_stacks::CoreError) -> i32 {
    match error.kind() {
        ErrorKind::DimensionMismatch => EXIT_INDEX_MISMATCH,
        ErrorKind::BadInput => EXIT_CONFIG,
        _ => EXIT_STORE_UNREACHABLE,
    }
}

async fn run_migrate(config: StacksConfig) -> i32 {
    let store =
        match SqliteDocumentStore::connect(&config.store, config.search.lexical.clone()).await {
            Ok(store) => store,
            Err(e) => {
                error!("Cannot reach store: {}", e);
                return EXIT_STORE_UNREACHABLE;
            }
        };

    match store.initialize().await {
        Ok(()) => {
            info!(
                dimension = config.store.vector_dimension,
                "Indexes are in place"
            );
            EXIT_OK
        }
        Err(e) => {
            error!("Index migration failed: {}", e);
            exit_code_for(&e)
        }
    }
}

async fn run_serve(config: StacksConfig) -> i32 {
    let service = match StacksService::new(config).await {
        Ok(service) => service,
        Err(e) => {
            error!("Service initialization failed: {}", e);
            return exit_code_for(&e);
        }
    };

    info!(
        dimension = service.embedding_dimension(),
        "Service ready; press ctrl-c to stop"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return EXIT_STORE_UNREACHABLE;
    }

    info!("Shutting down");
    EXIT_OK
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}", message);
            print_help();
            std::process::exit(EXIT_CONFIG);
        }
    };

    let config = match load_config(&args.config_path) {
        Ok(config) => config,
        Err(message) => {
            eprintln!(
                "Invalid configuration {}: {}",
                args.config_path.display(),
                message
            );
            std::process::exit(EXIT_CONFIG);
        }
    };

    let code = match args.command {
        Command::Serve => run_serve(config).await,
        Command::MigrateIndexes => run_migrate(config).await,
    };

    std::process::exit(code);
}
