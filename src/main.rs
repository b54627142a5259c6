// ABOUTME: CLI entry point for tabular-etl
// ABOUTME: Parses commands and routes to appropriate handlers

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tabular_etl::commands::{
    self, copy::CopyArgs, copy_field::CopyFieldArgs, count::CountArgs, dedupe::DedupeArgs, diff::DiffArgs,
    fingerprint::FingerprintOutcome, load::LoadArgs, stats::StatsArgs, stats::StatsInput, JobArgs,
};
use tabular_etl::aggregate::CountOrder;
use tabular_etl::config::{load_config, EtlConfig};
use tabular_etl::transfer::{ClearOutcome, ClearPolicy};

#[derive(Parser)]
#[command(name = "tabular-etl")]
#[command(about = "Batched bulk transfer, reconciliation and column statistics for tabular data", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Increase output (-v per-batch lines, -vv per-record lines)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Suppress progress bars and summaries
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct DbArgs {
    /// SQLite database file
    #[arg(long)]
    db: PathBuf,
    /// Read and convert everything but write nothing
    #[arg(long)]
    dry_run: bool,
    /// Skip confirmation prompts
    #[arg(short = 'y', long)]
    yes: bool,
    /// Records per batch (overrides the configuration)
    #[arg(long)]
    batch_len: Option<usize>,
}

#[derive(Args, Clone, Default)]
struct WriteArgs {
    /// Delete existing rows of the destination first (asks unless --yes)
    #[arg(long)]
    clear: bool,
    /// Abort on the first record that fails to convert
    #[arg(long)]
    strict: bool,
}

impl WriteArgs {
    fn policy(&self) -> ClearPolicy {
        if self.clear {
            ClearPolicy::ClearConfirm
        } else {
            ClearPolicy::Keep
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Load a CSV file, or a directory of CSV files, into a table
    LoadCsv {
        #[command(flatten)]
        db: DbArgs,
        /// Destination table (fuzzy)
        table: String,
        /// CSV file or directory
        path: PathBuf,
        #[command(flatten)]
        write: WriteArgs,
        /// Create the table from the CSV header if it does not exist
        #[arg(long)]
        create: bool,
        /// Field delimiter; sniffed when omitted
        #[arg(long)]
        delimiter: Option<char>,
        /// Descend into subdirectories
        #[arg(long)]
        recursive: bool,
        /// Filename suffix to load from a directory
        #[arg(long)]
        extension: Option<String>,
    },
    /// Load a JSON array of records into a table
    LoadJson {
        #[command(flatten)]
        db: DbArgs,
        table: String,
        path: PathBuf,
        #[command(flatten)]
        write: WriteArgs,
    },
    /// Copy every record of one table into another
    Copy {
        #[command(flatten)]
        db: DbArgs,
        source: String,
        destination: String,
        #[command(flatten)]
        write: WriteArgs,
        /// Replace destination rows sharing a key instead of appending
        #[arg(long)]
        replace: bool,
        /// Ignore any previous checkpoint and start a fresh run
        #[arg(long)]
        no_resume: bool,
    },
    /// Fill a field of one table from a field of another
    CopyField {
        #[command(flatten)]
        db: DbArgs,
        /// Source as table.field
        source: String,
        /// Destination as table.field
        destination: String,
        /// Source field holding the matching key
        #[arg(long)]
        source_key: Option<String>,
        /// Destination field holding the matching key
        #[arg(long)]
        dest_key: Option<String>,
        /// Replace values that are already set
        #[arg(long)]
        overwrite: bool,
        /// Copy null and blank values too
        #[arg(long)]
        keep_nulls: bool,
        #[arg(long)]
        strict: bool,
    },
    /// Compare the records of two tables
    Diff {
        #[command(flatten)]
        db: DbArgs,
        source: String,
        destination: String,
        /// Field matching rows instead of the key
        #[arg(long)]
        key_field: Option<String>,
        /// Fields to compare (comma-separated)
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
        /// Fields to skip (comma-separated)
        #[arg(long, value_delimiter = ',')]
        ignore: Vec<String>,
        /// Skip foreign-key fields
        #[arg(long)]
        ignore_related: bool,
        /// Stop comparing a record at its first differing field
        #[arg(long)]
        short_circuit: bool,
        /// Compare a random sample of this many records (0 compares all)
        #[arg(long)]
        limit: Option<usize>,
        /// Seed for a reproducible sample
        #[arg(long)]
        seed: Option<u64>,
        /// Write the full report to this JSON file
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// Covariance and correlation of numeric columns
    Stats {
        /// Table to read (requires --db)
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        table: Option<String>,
        /// Delimited text file to read
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        db: Option<PathBuf>,
        /// Columns to include (comma-separated)
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
        /// Choose columns interactively
        #[arg(long)]
        select: bool,
        /// Delta degrees of freedom
        #[arg(long, default_value_t = 0)]
        ddof: usize,
        #[arg(long)]
        delimiter: Option<char>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Count rows per distinct value, or per date, of a field
    Count {
        #[command(flatten)]
        db: DbArgs,
        table: String,
        field: String,
        /// Group by the date part of the field
        #[arg(long)]
        by_date: bool,
        /// Only count rows matching FIELD=VALUE (repeat for more values of one field)
        #[arg(long = "where", value_name = "FIELD=VALUE")]
        filters: Vec<String>,
        /// Group order: desc, asc or value
        #[arg(long, default_value = "desc")]
        order: String,
        /// Show at most this many groups
        #[arg(long)]
        limit: Option<usize>,
        /// Print the groups as JSON
        #[arg(long)]
        json: bool,
    },
    /// Number rows that share the same values of the given fields
    Dedupe {
        #[command(flatten)]
        db: DbArgs,
        table: String,
        /// Fields that together identify one row (comma-separated)
        #[arg(long, value_delimiter = ',', required = true)]
        unique: Vec<String>,
        /// Field ordering rows within a group, oldest first
        #[arg(long)]
        date_field: Option<String>,
        #[arg(long, default_value = "seq")]
        seq_field: String,
        #[arg(long, default_value = "seq_max")]
        seq_max_field: String,
        /// Renumber rows already marked by an earlier run
        #[arg(long)]
        recompute: bool,
        #[arg(long)]
        strict: bool,
    },
    /// Fingerprint a table, or compare its contents with another
    Fingerprint {
        #[command(flatten)]
        db: DbArgs,
        table: String,
        /// Table to compare against
        other: Option<String>,
        /// Fields to leave out of the fingerprint (comma-separated)
        #[arg(long, value_delimiter = ',')]
        ignore: Vec<String>,
    },
    /// Export a table to JSON files, one per batch
    ExportJson {
        #[command(flatten)]
        db: DbArgs,
        table: String,
        /// Output directory
        dir: PathBuf,
    },
    /// Delete every row of a table
    Clear {
        #[command(flatten)]
        db: DbArgs,
        table: String,
    },
}

fn job(db: &DbArgs, verbosity: u8) -> JobArgs {
    JobArgs {
        db: db.db.clone(),
        dry_run: db.dry_run,
        assume_yes: db.yes,
        verbosity,
        batch_len: db.batch_len,
    }
}

fn split_field(arg: &str) -> anyhow::Result<(&str, &str)> {
    arg.split_once('.')
        .ok_or_else(|| anyhow::anyhow!("Expected table.field, got '{}'", arg))
}

fn delimiter_byte(delimiter: Option<char>) -> anyhow::Result<Option<u8>> {
    delimiter
        .map(|c| u8::try_from(c).map_err(|_| anyhow::anyhow!("Delimiter '{}' must be a single byte", c)))
        .transpose()
}

fn count_order(order: &str) -> anyhow::Result<CountOrder> {
    match order {
        "desc" => Ok(CountOrder::Descending),
        "asc" => Ok(CountOrder::Ascending),
        "value" => Ok(CountOrder::ByValue),
        other => anyhow::bail!("Unknown order '{}': expected desc, asc or value", other),
    }
}

/// Split repeated FIELD=VALUE filters; they must all name the same field
fn count_filter(filters: &[String]) -> anyhow::Result<(Option<String>, Vec<String>)> {
    let mut field: Option<String> = None;
    let mut values = Vec::new();
    for filter in filters {
        let (name, value) = filter
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Expected FIELD=VALUE, got '{}'", filter))?;
        match &field {
            Some(existing) if existing != name => {
                anyhow::bail!("Filters name both '{}' and '{}'; only one field is supported", existing, name)
            }
            _ => field = Some(name.to_string()),
        }
        values.push(value.to_string());
    }
    Ok((field, values))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Default to INFO, or DEBUG with -vv, unless RUST_LOG says otherwise
    let default_level = if cli.verbose >= 2 { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => EtlConfig::default(),
    };
    let verbosity = if cli.quiet { 0 } else { cli.verbose + 1 };

    match cli.command {
        Commands::LoadCsv {
            db,
            table,
            path,
            write,
            create,
            delimiter,
            recursive,
            extension,
        } => {
            let args = LoadArgs {
                clear: write.policy(),
                strict: write.strict,
                create,
                delimiter: delimiter_byte(delimiter)?,
                recursive,
                extension,
            };
            commands::load_csv(&job(&db, verbosity), &table, &path, &args, &config)?;
            Ok(())
        }
        Commands::LoadJson {
            db,
            table,
            path,
            write,
        } => {
            let args = LoadArgs {
                clear: write.policy(),
                strict: write.strict,
                ..LoadArgs::default()
            };
            commands::load_json(&job(&db, verbosity), &table, &path, &args, &config)?;
            Ok(())
        }
        Commands::Copy {
            db,
            source,
            destination,
            write,
            replace,
            no_resume,
        } => {
            let args = CopyArgs {
                clear: write.policy(),
                replace,
                strict: write.strict,
                no_resume,
            };
            commands::copy(&job(&db, verbosity), &source, &destination, &args, &config)?;
            Ok(())
        }
        Commands::CopyField {
            db,
            source,
            destination,
            source_key,
            dest_key,
            overwrite,
            keep_nulls,
            strict,
        } => {
            let (src_table, src_field) = split_field(&source)?;
            let (dest_table, dest_field) = split_field(&destination)?;
            let args = CopyFieldArgs {
                source_key,
                dest_key,
                overwrite,
                keep_nulls,
                strict,
            };
            commands::copy_field(
                &job(&db, verbosity),
                src_table,
                src_field,
                dest_table,
                dest_field,
                &args,
                &config,
            )?;
            Ok(())
        }
        Commands::Diff {
            db,
            source,
            destination,
            key_field,
            fields,
            ignore,
            ignore_related,
            short_circuit,
            limit,
            seed,
            json,
        } => {
            let args = DiffArgs {
                key_field,
                fields,
                ignore,
                ignore_related,
                short_circuit,
                limit,
                seed,
                json,
            };
            let report = commands::diff(&job(&db, verbosity), &source, &destination, &args, &config)?;
            if !report.is_clean() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Stats {
            table,
            file,
            db,
            columns,
            select,
            ddof,
            delimiter,
            json,
        } => {
            let input = match (table, file) {
                (Some(table), _) => StatsInput::Table(table),
                (None, Some(file)) => StatsInput::File(file),
                (None, None) => anyhow::bail!("Either --table or --file is required"),
            };
            if matches!(input, StatsInput::Table(_)) && db.is_none() {
                anyhow::bail!("--db is required with --table");
            }
            let job = JobArgs {
                db: db.unwrap_or_default(),
                verbosity,
                ..JobArgs::default()
            };
            let args = StatsArgs {
                columns,
                select,
                ddof,
                delimiter,
            };
            let report = commands::stats(&job, &input, &args, &config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Covariance (ddof={}):", ddof);
                print!("{}", commands::stats::format_matrix(&report.names, &report.cov));
                println!();
                println!("Pearson correlation:");
                print!("{}", commands::stats::format_matrix(&report.names, &report.pierson));
            }
            Ok(())
        }
        Commands::Count {
            db,
            table,
            field,
            by_date,
            filters,
            order,
            limit,
            json,
        } => {
            let (filter_field, filter_values) = count_filter(&filters)?;
            let args = CountArgs {
                by_date,
                filter_field,
                filter_values,
                order: count_order(&order)?,
                limit,
            };
            let groups = commands::count(&job(&db, verbosity), &table, &field, &args, &config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&groups)?);
            } else {
                for group in groups {
                    println!("{}\t{}", group.value, group.count);
                }
            }
            Ok(())
        }
        Commands::Dedupe {
            db,
            table,
            unique,
            date_field,
            seq_field,
            seq_max_field,
            recompute,
            strict,
        } => {
            let args = DedupeArgs {
                unique,
                date_field,
                seq_field,
                seq_max_field,
                recompute,
                strict,
            };
            commands::dedupe(&job(&db, verbosity), &table, &args, &config)?;
            Ok(())
        }
        Commands::Fingerprint { db, table, other, ignore } => {
            let outcome = commands::fingerprint(&job(&db, verbosity), &table, other.as_deref(), &ignore, &config)?;
            if let FingerprintOutcome::Listed(fingerprints) = outcome {
                for (key, fp) in fingerprints {
                    println!("{}\t{}", key, fp);
                }
            }
            Ok(())
        }
        Commands::ExportJson { db, table, dir } => {
            for path in commands::export_json(&job(&db, verbosity), &table, &dir, &config)? {
                println!("{}", path.display());
            }
            Ok(())
        }
        Commands::Clear { db, table } => {
            match commands::clear(&job(&db, verbosity), &table, &config)? {
                ClearOutcome::Declined => tracing::warn!("⚠ Nothing deleted"),
                outcome => tracing::debug!("Clear finished: {:?}", outcome),
            }
            Ok(())
        }
    }
}
