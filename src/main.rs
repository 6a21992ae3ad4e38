//! Nanostore migration CLI
//!
//! Thin shell over the store's migration API. Exit codes: 0 success,
//! 1 validation error, 2 execution error, 3 partial failure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nanostore::config::StoreConfig;
use nanostore::migrate::{FieldScope, Transformer};
use nanostore::store::Store;
use nanostore::types::Value;
use nanostore::Error;

const EXIT_VALIDATION: u8 = 1;
const EXIT_EXECUTION: u8 = 2;
const EXIT_PARTIAL: u8 = 3;

#[derive(Parser)]
#[command(name = "nanostore", version, about = "Nanostore maintenance tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store migrations: field evolution and consistency checks
    Migrate(MigrateArgs),
}

#[derive(Args)]
struct MigrateArgs {
    /// Path to the store file
    #[arg(long, global = true, default_value = "nanostore.json")]
    store: PathBuf,

    /// Optional configuration file (defaults to NANOSTORE_CONFIG or
    /// nanostore.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Report what would change without writing
    #[arg(short = 'n', long, global = true)]
    dry_run: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    operation: MigrateOp,
}

#[derive(Args, Debug, Clone, Copy)]
struct ScopeFlags {
    /// Only touch the configured dimension key
    #[arg(long, conflicts_with_all = ["data_only", "both"])]
    dimension_only: bool,

    /// Only touch the `_data.`-prefixed key
    #[arg(long, conflicts_with = "both")]
    data_only: bool,

    /// Touch both namespaces (default)
    #[arg(long)]
    both: bool,
}

impl From<ScopeFlags> for FieldScope {
    fn from(flags: ScopeFlags) -> Self {
        if flags.dimension_only {
            FieldScope::DimensionOnly
        } else if flags.data_only {
            FieldScope::DataOnly
        } else {
            FieldScope::Both
        }
    }
}

#[derive(Subcommand)]
enum MigrateOp {
    /// Move values from one field name to another
    RenameField {
        old: String,
        new: String,
        #[command(flatten)]
        scope: ScopeFlags,
    },
    /// Delete a field from every document
    RemoveField {
        name: String,
        #[command(flatten)]
        scope: ScopeFlags,
    },
    /// Set a default on every document missing the field
    AddField {
        name: String,
        /// Value to set (JSON accepted, bare text otherwise)
        #[arg(long)]
        default: String,
        /// Add under the `_data.` namespace
        #[arg(long)]
        data_field: bool,
    },
    /// Apply a named transformer to a field
    TransformField {
        name: String,
        /// One of: lowercase, uppercase, trim
        #[arg(long)]
        transformer: String,
        #[command(flatten)]
        scope: ScopeFlags,
    },
    /// Check configuration, references, and body files
    Validate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let Command::Migrate(args) = cli.command;

    init_tracing(args.verbose);

    match run(&args) {
        Ok(code) => code,
        Err(e) => report(e),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "nanostore=debug" } else { "nanostore=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(args: &MigrateArgs) -> anyhow::Result<StoreConfig> {
    match &args.config {
        Some(path) => StoreConfig::load_from(path),
        None => StoreConfig::load(),
    }
}

fn run(args: &MigrateArgs) -> nanostore::Result<ExitCode> {
    let config = load_config(args).map_err(|e| Error::InvalidConfig(format!("{e:#}")))?;
    let store = Store::open(&args.store, &config)?;

    let outcome = match &args.operation {
        MigrateOp::RenameField { old, new, scope } => {
            store.migrate_rename_field(old, new, (*scope).into(), args.dry_run)?
        }
        MigrateOp::RemoveField { name, scope } => {
            store.migrate_remove_field(name, (*scope).into(), args.dry_run)?
        }
        MigrateOp::AddField {
            name,
            default,
            data_field,
        } => {
            let value = parse_default(default);
            store.migrate_add_field(name, value, *data_field, args.dry_run)?
        }
        MigrateOp::TransformField {
            name,
            transformer,
            scope,
        } => {
            let transformer: Transformer = transformer.parse()?;
            store.migrate_transform_field(name, transformer, (*scope).into(), args.dry_run)?
        }
        MigrateOp::Validate => {
            let report = store.migrate_validate()?;
            println!(
                "checked {} document(s), {} issue(s)",
                report.documents,
                report.issues.len()
            );
            for issue in &report.issues {
                match issue.uuid {
                    Some(uuid) => println!("  {uuid}: {}", issue.message),
                    None => println!("  store: {}", issue.message),
                }
            }
            return Ok(if report.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_VALIDATION)
            });
        }
    };

    let action = if args.dry_run { "would modify" } else { "modified" };
    println!(
        "{} {} of {} processed document(s)",
        action,
        outcome.modified.len(),
        outcome.processed
    );
    Ok(ExitCode::SUCCESS)
}

/// CLI default values arrive as text; accept JSON literals so
/// numbers, booleans, and nulls round-trip, falling back to a plain
/// string.
fn parse_default(raw: &str) -> Value {
    serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn report(error: Error) -> ExitCode {
    match &error {
        Error::PartialFailure {
            processed,
            modified,
            errors,
        } => {
            eprintln!(
                "partial failure: {} of {} processed document(s) modified",
                modified.len(),
                processed
            );
            for (uuid, message) in errors {
                eprintln!("  {uuid}: {message}");
            }
            ExitCode::from(EXIT_PARTIAL)
        }
        Error::InvalidConfig(_) | Error::InvalidValue(_) | Error::Parse(_) => {
            eprintln!("error: {error}");
            ExitCode::from(EXIT_VALIDATION)
        }
        _ => {
            eprintln!("error: {error}");
            ExitCode::from(EXIT_EXECUTION)
        }
    }
}
