//! MoodSnap CLI - Command-line interface for the MoodSnap analytics pipeline
//!
//! Commands:
//! - process: Run the pipeline over a store file and emit ProcessedData
//! - summary: Print occurrence counts, hashtags and life events
//! - validate: Check a store file for duplicate ids and invalid levels
//! - doctor: Diagnose configuration and store health
//! - defaults: Print the default analytics configuration

use clap::{Parser, Subcommand, ValueEnum};
use log::debug;
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use moodsnap_core::config::AnalyticsConfig;
use moodsnap_core::health::{fetch_or_empty, InMemoryHealthProvider};
use moodsnap_core::persistence::{JsonFileStore, Persistence, StoreRecord, STORE_VERSION};
use moodsnap_core::pipeline::process_record;
use moodsnap_core::sequencer::day_range;
use moodsnap_core::types::{ButterflyEntry, ProcessedData};
use moodsnap_core::{AnalyticsError, MOODSNAP_VERSION};

/// MoodSnap - mood snapshot analytics
#[derive(Parser)]
#[command(name = "moodsnap")]
#[command(version = MOODSNAP_VERSION)]
#[command(
    about = "Derive mood history and butterfly statistics from a MoodSnap store",
    long_about = None
)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline over a store file and emit ProcessedData
    Process {
        /// Store file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Output format
        #[arg(long, default_value = "json")]
        output_format: OutputFormat,

        #[command(flatten)]
        config: ConfigArgs,

        /// Health samples JSON array to correlate with
        #[arg(long)]
        health: Option<PathBuf>,

        /// Write the processed data back into the store file
        #[arg(long)]
        write_back: bool,
    },

    /// Print occurrence counts, hashtags and life events
    Summary {
        /// Store file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        config: ConfigArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a store file for duplicate ids and invalid levels
    Validate {
        /// Store file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and store health
    Doctor {
        /// Check a configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Check a store file
        #[arg(long)]
        store: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default analytics configuration
    Defaults,
}

#[derive(clap::Args)]
struct ConfigArgs {
    /// Analytics configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Window for hashtag, activity, symptom and social butterflies
    #[arg(long)]
    short_window: Option<usize>,

    /// Window for life event butterflies
    #[arg(long)]
    long_window: Option<usize>,

    /// Trailing window for sliding averages and volatility
    #[arg(long)]
    sliding_window: Option<usize>,

    /// Offset from UTC in minutes used for calendar days
    #[arg(long, allow_hyphen_values = true)]
    utc_offset_minutes: Option<i32>,
}

impl ConfigArgs {
    fn resolve(&self) -> Result<AnalyticsConfig, MoodSnapCliError> {
        let mut config = match &self.config {
            Some(path) => AnalyticsConfig::from_path(path)?,
            None => AnalyticsConfig::default(),
        };
        if let Some(window) = self.short_window {
            config.short_window = window;
        }
        if let Some(window) = self.long_window {
            config.long_window = window;
        }
        if let Some(window) = self.sliding_window {
            config.sliding_average_window = window;
        }
        if let Some(offset) = self.utc_offset_minutes {
            config.utc_offset_minutes = offset;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let error = CliError::from(e);
            eprintln!(
                "{}",
                serde_json::to_string(&error).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), MoodSnapCliError> {
    match cli.command {
        Commands::Process {
            input,
            output,
            output_format,
            config,
            health,
            write_back,
        } => cmd_process(&input, &output, output_format, &config, health.as_deref(), write_back),

        Commands::Summary { input, config, json } => cmd_summary(&input, &config, json),

        Commands::Validate { input, json } => cmd_validate(&input, json),

        Commands::Doctor {
            config,
            store,
            json,
        } => cmd_doctor(config.as_deref(), store.as_deref(), json),

        Commands::Defaults => {
            println!("{}", AnalyticsConfig::default().to_json()?);
            Ok(())
        }
    }
}

fn read_input(input: &Path) -> Result<String, MoodSnapCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn cmd_process(
    input: &Path,
    output: &Path,
    output_format: OutputFormat,
    config_args: &ConfigArgs,
    health: Option<&Path>,
    write_back: bool,
) -> Result<(), MoodSnapCliError> {
    let config = config_args.resolve()?;
    let mut record = StoreRecord::from_json(&read_input(input)?)?;

    if let Some(health_path) = health {
        let provider = InMemoryHealthProvider::from_json(&fs::read_to_string(health_path)?)?;
        record.health_snapshots = match day_range(&record.mood_snapshots, config.offset()) {
            Some((first, last)) => fetch_or_empty(&provider, first..=last),
            None => Vec::new(),
        };
        debug!("loaded {} daily health records", record.health_snapshots.len());
    }

    let processed = process_record(&record, &config)?;
    debug!("processed {} days", processed.dates.len());

    let output_data = format_output(&processed, &output_format)?;
    if output.to_string_lossy() == "-" {
        println!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    if write_back {
        if input.to_string_lossy() == "-" {
            return Err(MoodSnapCliError::WriteBackStdin);
        }
        record.processed_data = processed;
        JsonFileStore::new(input).save(&record)?;
    }

    Ok(())
}

fn cmd_summary(input: &Path, config_args: &ConfigArgs, json: bool) -> Result<(), MoodSnapCliError> {
    let config = config_args.resolve()?;
    let record = StoreRecord::from_json(&read_input(input)?)?;
    let processed = process_record(&record, &config)?;
    let report = SummaryReport::new(&record, &processed, config.min_occurrences);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("MoodSnap Summary");
    println!("================");
    println!("Snapshots:        {}", report.snapshots);
    println!("Days:             {}", report.days);
    match (&report.first_day, &report.last_day) {
        (Some(first), Some(last)) => println!("Range:            {} .. {}", first, last),
        _ => println!("Range:            (empty)"),
    }
    println!("Hashtags:         {}", report.counts.hashtags);
    println!("Activities:       {}", report.counts.activities);
    println!("Symptoms:         {}", report.counts.symptoms);
    println!("Social:           {}", report.counts.social);
    println!("Events:           {}", report.counts.events);
    println!("Menstrual cycles: {}", report.counts.menstrual_cycles);

    if !report.hashtags.is_empty() {
        println!("\nHashtags: {}", report.hashtags.join(" "));
    }
    if !report.events.is_empty() {
        println!("\nLife events:");
        for event in &report.events {
            println!("  - {} ({})", event.label, event.timestamp);
        }
    }
    if !report.insufficient.is_empty() {
        println!("\nInsufficient data (fewer than {} occurrences):", config.min_occurrences);
        for label in &report.insufficient {
            println!("  - {}", label);
        }
    }

    Ok(())
}

fn cmd_validate(input: &Path, json: bool) -> Result<(), MoodSnapCliError> {
    // Parse without migrating so version problems are reported, not raised
    let record: StoreRecord = serde_json::from_str(&read_input(input)?)?;

    let mut issues = Vec::new();
    if record.version > STORE_VERSION {
        issues.push(ValidationIssue {
            snapshot_id: None,
            error: format!("store version {} is newer than {}", record.version, STORE_VERSION),
        });
    }

    let mut seen = BTreeSet::new();
    for snapshot in &record.mood_snapshots {
        if !seen.insert(snapshot.id) {
            issues.push(ValidationIssue {
                snapshot_id: Some(snapshot.id.to_string()),
                error: AnalyticsError::DuplicateSnapshot(snapshot.id).to_string(),
            });
        }
        if let Err(e) = snapshot.validate() {
            issues.push(ValidationIssue {
                snapshot_id: Some(snapshot.id.to_string()),
                error: e.to_string(),
            });
        }
    }

    let report = ValidationReport {
        version: record.version,
        total_snapshots: record.mood_snapshots.len(),
        health_records: record.health_snapshots.len(),
        issues,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Store version:  {}", report.version);
        println!("Snapshots:      {}", report.total_snapshots);
        println!("Health records: {}", report.health_records);
        println!("Issues:         {}", report.issues.len());

        if !report.issues.is_empty() {
            println!("\nIssues:");
            for issue in &report.issues {
                println!(
                    "  - {}: {}",
                    issue.snapshot_id.as_deref().unwrap_or("store"),
                    issue.error
                );
            }
        }
    }

    if report.issues.is_empty() {
        Ok(())
    } else {
        Err(MoodSnapCliError::ValidationFailed(report.issues.len()))
    }
}

fn cmd_doctor(
    config: Option<&Path>,
    store: Option<&Path>,
    json: bool,
) -> Result<(), MoodSnapCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("moodsnap-core {} (store version {})", MOODSNAP_VERSION, STORE_VERSION),
    });

    if let Some(config_path) = config {
        checks.push(match AnalyticsConfig::from_path(config_path) {
            Ok(config) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Config valid (short {}, long {}, sliding {} days)",
                    config.short_window, config.long_window, config.sliding_average_window
                ),
            },
            Err(e) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: format!("Invalid config: {}", e),
            },
        });
    }

    if let Some(store_path) = store {
        let check = if !store_path.exists() {
            DoctorCheck {
                name: "store".to_string(),
                status: CheckStatus::Warning,
                message: "Store file does not exist; a fresh store would be created".to_string(),
            }
        } else {
            match JsonFileStore::new(store_path).load() {
                Ok(Some(record)) => DoctorCheck {
                    name: "store".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "Store readable ({} snapshots, {} health records)",
                        record.mood_snapshots.len(),
                        record.health_snapshots.len()
                    ),
                },
                Ok(None) => DoctorCheck {
                    name: "store".to_string(),
                    status: CheckStatus::Warning,
                    message: "Store file is missing".to_string(),
                },
                Err(e) => DoctorCheck {
                    name: "store".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot load store: {}", e),
                },
            }
        };
        checks.push(check);
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass --input <file>)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (--input - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        version: MOODSNAP_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("MoodSnap Doctor Report");
        println!("======================");
        println!("Version: {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(MoodSnapCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn format_output(
    processed: &ProcessedData,
    format: &OutputFormat,
) -> Result<String, MoodSnapCliError> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string(processed)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(processed)?),
    }
}

// Error types

#[derive(Debug)]
enum MoodSnapCliError {
    Io(io::Error),
    Analytics(AnalyticsError),
    Json(serde_json::Error),
    ValidationFailed(usize),
    DoctorFailed,
    WriteBackStdin,
}

impl From<io::Error> for MoodSnapCliError {
    fn from(e: io::Error) -> Self {
        MoodSnapCliError::Io(e)
    }
}

impl From<AnalyticsError> for MoodSnapCliError {
    fn from(e: AnalyticsError) -> Self {
        MoodSnapCliError::Analytics(e)
    }
}

impl From<serde_json::Error> for MoodSnapCliError {
    fn from(e: serde_json::Error) -> Self {
        MoodSnapCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<MoodSnapCliError> for CliError {
    fn from(e: MoodSnapCliError) -> Self {
        match e {
            MoodSnapCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            MoodSnapCliError::Analytics(AnalyticsError::InvalidConfig(msg)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'moodsnap defaults' for a valid configuration".to_string()),
            },
            MoodSnapCliError::Analytics(e @ AnalyticsError::UnsupportedVersion { .. }) => CliError {
                code: "VERSION_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Upgrade moodsnap to read this store".to_string()),
            },
            MoodSnapCliError::Analytics(e) => CliError {
                code: "ANALYTICS_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'moodsnap validate' for details".to_string()),
            },
            MoodSnapCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            MoodSnapCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} validation issues found", count),
                hint: Some("Fix the listed snapshots and retry".to_string()),
            },
            MoodSnapCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            MoodSnapCliError::WriteBackStdin => CliError {
                code: "WRITE_BACK_STDIN".to_string(),
                message: "Cannot write back to stdin".to_string(),
                hint: Some("Pass the store file with --input".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct SummaryReport {
    snapshots: usize,
    days: usize,
    first_day: Option<String>,
    last_day: Option<String>,
    counts: moodsnap_core::types::OccurrenceCounts,
    hashtags: Vec<String>,
    events: Vec<moodsnap_core::types::EventMarker>,
    /// Labels of butterfly entries below the occurrence threshold
    insufficient: Vec<String>,
}

impl SummaryReport {
    fn new(record: &StoreRecord, processed: &ProcessedData, min_occurrences: usize) -> Self {
        let insufficient = [
            &processed.hashtag_butterfly,
            &processed.activity_butterfly,
            &processed.symptom_butterfly,
            &processed.social_butterfly,
            &processed.event_butterfly,
        ]
        .into_iter()
        .flat_map(|entries: &Vec<ButterflyEntry>| entries.iter())
        .filter(|entry| !entry.is_sufficient(min_occurrences))
        .map(|entry| entry.label.clone())
        .collect();

        Self {
            snapshots: record.mood_snapshots.len(),
            days: processed.dates.len(),
            first_day: processed.dates.first().map(|d| d.to_string()),
            last_day: processed.dates.last().map(|d| d.to_string()),
            counts: processed.counts,
            hashtags: processed.hashtag_list.clone(),
            events: processed.events_list.clone(),
            insufficient,
        }
    }
}

#[derive(serde::Serialize)]
struct ValidationReport {
    version: u32,
    total_snapshots: usize,
    health_records: usize,
    issues: Vec<ValidationIssue>,
}

#[derive(serde::Serialize)]
struct ValidationIssue {
    snapshot_id: Option<String>,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
