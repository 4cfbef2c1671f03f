//! # classforge command-line interface
//!
//! Runs one mapping-driven refactoring against one Python file.
//!
//! ## Usage
//!
//! ```bash
//! # Split a class according to a JSON mapping
//! classforge split-class models.py --mapping split.json
//!
//! # Show the result without touching the file
//! classforge merge-classes models.py --mapping merge.toml --preview
//!
//! # Explode a module into a package, machine-readable report
//! classforge split-file shapes.py --mapping layout.json --json
//!
//! # Inspect declared members before writing a mapping
//! classforge members models.py
//!
//! # Manual recovery
//! classforge backups models.py
//! classforge restore models.py
//! ```
//!
//! Exit codes: `0` success, `1` the operation (or restore) failed, `2` usage,
//! settings or mapping file errors.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing::info;

use classforge::backup::{BackupManager, BackupRecord};
use classforge::mapping::load_mapping;
use classforge::{
    Config, ExtractSuperclass, MemberSet, MergeClasses, OperationResult, Pipeline, Refactoring,
    SourceFile, SplitClass, SplitFile,
};

/// Command-line arguments for classforge
#[derive(Parser)]
#[command(name = "classforge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file
    ///
    /// If not specified, classforge searches for `.classforge.toml` in the current
    /// directory and its parents.
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Skip the external formatter
    #[arg(long, global = true)]
    no_format: bool,

    /// Skip the advisory import check after committing
    #[arg(long, global = true)]
    no_import_check: bool,

    /// Backup directory name, created next to the target file
    #[arg(long, global = true)]
    backup_dir: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Debug-level logging (overridden by `RUST_LOG`)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit log lines as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Move members of one class into composed destination classes
    SplitClass(OperationArgs),

    /// Lift shared members of sibling classes into a new base class
    ExtractSuperclass(OperationArgs),

    /// Fold several classes into one
    MergeClasses(OperationArgs),

    /// Explode a module into a package
    SplitFile(OperationArgs),

    /// Print the declared properties and methods of every class
    Members {
        /// Python source file
        file: PathBuf,
    },

    /// List the backups of a file, newest first
    Backups {
        /// Python source file
        file: PathBuf,
    },

    /// Copy a backup back over a file
    Restore {
        /// Python source file
        file: PathBuf,

        /// Backup to restore; the newest one when omitted
        #[arg(long)]
        backup: Option<PathBuf>,
    },
}

#[derive(Args)]
struct OperationArgs {
    /// Python source file to refactor
    file: PathBuf,

    /// Mapping file (`.json` or `.toml`)
    #[arg(short, long)]
    mapping: PathBuf,

    /// Run on a scratch copy and print the result instead of writing
    #[arg(short = 'n', long)]
    preview: bool,
}

fn init_tracing(verbose: bool, json: bool) {
    use tracing_subscriber::EnvFilter;

    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => Config::load_from_current_dir(),
    };
    config.merge_with_args(
        cli.no_format.then_some(false),
        cli.no_import_check.then_some(false),
        cli.backup_dir.clone(),
    );
    Ok(config)
}

fn print_result(result: &OperationResult, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(result).context("Failed to serialize result")?
        );
        return Ok(());
    }
    if let Some(preview) = &result.preview {
        print!("{}", preview);
    }
    if result.success {
        println!("{}", result.message);
    } else {
        eprintln!("{}", result.message);
    }
    if let Some(details) = &result.details {
        for path in &details.files_written {
            println!("  wrote {}", path.display());
        }
        if let Some(backup) = &details.backup {
            println!("  backup {}", backup.display());
        }
        for warning in &details.warnings {
            eprintln!("  warning: {}", warning);
        }
    }
    Ok(())
}

fn run_operation<R>(op: &R, args: &OperationArgs, config: &Config, json: bool) -> Result<ExitCode>
where
    R: Refactoring,
    R::Mapping: DeserializeOwned,
{
    let mapping: R::Mapping = load_mapping(&args.mapping)?;
    let pipeline = Pipeline::new(config);
    let result = if args.preview {
        pipeline.preview(op, &args.file, &mapping)
    } else {
        pipeline.execute(op, &args.file, &mapping)
    };
    info!("{}: {}", R::NAME, result.message);
    print_result(&result, json)?;
    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn show_members(file: &Path, json: bool) -> Result<ExitCode> {
    let source = SourceFile::load(file)?;
    let members: BTreeMap<&str, MemberSet> = source
        .class_names()
        .into_iter()
        .filter_map(|name| source.class(name).map(|class| (name, MemberSet::of(class))))
        .collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&members)?);
        return Ok(ExitCode::SUCCESS);
    }
    for (name, set) in &members {
        println!("{}", name);
        let props: Vec<&str> = set.properties.iter().map(String::as_str).collect();
        let methods: Vec<&str> = set.methods.iter().map(String::as_str).collect();
        println!("  properties: {}", props.join(", "));
        println!("  methods:    {}", methods.join(", "));
    }
    Ok(ExitCode::SUCCESS)
}

fn list_backups(file: &Path, config: &Config, json: bool) -> Result<ExitCode> {
    let manager = BackupManager::new(config.engine.backup_dir.clone());
    let backups = manager.list_backups(file);
    if json {
        println!("{}", serde_json::to_string_pretty(&backups)?);
    } else if backups.is_empty() {
        println!("no backups of {}", file.display());
    } else {
        for record in &backups {
            println!("{}", record.backup.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn restore(file: &Path, backup: Option<&Path>, config: &Config) -> Result<ExitCode> {
    let manager = BackupManager::new(config.engine.backup_dir.clone());
    let record = match backup {
        Some(backup) => BackupRecord {
            original: file.to_path_buf(),
            backup: backup.to_path_buf(),
        },
        None => match manager.list_backups(file).into_iter().next() {
            Some(record) => record,
            None => bail!("no backups of {}", file.display()),
        },
    };
    if manager.restore(&record)? {
        println!("restored {} from {}", file.display(), record.backup.display());
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("backup {} does not exist", record.backup.display());
        Ok(ExitCode::from(1))
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let config = load_config(cli)?;
    match &cli.command {
        Command::SplitClass(args) => run_operation(&SplitClass, args, &config, cli.json),
        Command::ExtractSuperclass(args) => {
            run_operation(&ExtractSuperclass, args, &config, cli.json)
        }
        Command::MergeClasses(args) => run_operation(&MergeClasses, args, &config, cli.json),
        Command::SplitFile(args) => run_operation(&SplitFile, args, &config, cli.json),
        Command::Members { file } => show_members(file, cli.json),
        Command::Backups { file } => list_backups(file, &config, cli.json),
        Command::Restore { file, backup } => match restore(file, backup.as_deref(), &config) {
            Ok(code) => Ok(code),
            Err(error) => {
                eprintln!("Error: {:#}", error);
                Ok(ExitCode::from(1))
            }
        },
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);
    match run(&cli) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("Error: {:#}", error);
            ExitCode::from(2)
        }
    }
}
