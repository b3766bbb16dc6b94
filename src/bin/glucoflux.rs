//! Glucoflux CLI - Command-line interface for Glucose Flux
//!
//! Commands:
//! - analyze: Detect, match and quantify post-meal spikes
//! - groups: Per-group statistics for the groups in the meal log
//! - compare: Compare two groups by description, metrics and shape profiles
//! - similar: Spikes shaped like a chosen spike
//! - validate: Check reading records and the meal log
//! - config: Print or check analysis thresholds

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use glucose_flux::report::{
    encode_report, encode_to_json, render_comparison, render_group_stats,
    render_profile_comparison, render_similar, render_summary,
};
use glucose_flux::normalizer::ProfileComparison;
use glucose_flux::schema::{MealLog, ReadingRecord, ReadingsAdapter};
use glucose_flux::types::{AnalysisReport, GlRange, Group, GroupComparison};
use glucose_flux::{AnalysisConfig, AnalysisError, SpikeAnalyzer, FLUX_VERSION, PRODUCER_NAME};

/// Glucoflux - Post-meal glucose spike analysis
#[derive(Parser)]
#[command(name = "glucoflux")]
#[command(version = FLUX_VERSION)]
#[command(about = "Analyze post-meal glucose spikes from CGM readings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect, match and quantify post-meal spikes
    Analyze {
        #[command(flatten)]
        input: InputArgs,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
    },

    /// Statistics for every group in the meal log
    Groups {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        gl: GlArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compare two groups of the meal log
    Compare {
        #[command(flatten)]
        input: InputArgs,

        /// Description of the reference group
        #[arg(long)]
        before: String,

        /// Description of the group compared against the reference
        #[arg(long)]
        after: String,

        #[command(flatten)]
        gl: GlArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List spikes shaped like the spike at a profile index
    Similar {
        #[command(flatten)]
        input: InputArgs,

        /// Profile index, in chronological order of matched spikes
        #[arg(long)]
        index: usize,

        /// Minimum similarity score (0..1)
        #[arg(long, default_value = "0.9")]
        threshold: f64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate reading records and an optional meal log
    Validate {
        /// Readings file path (use - for stdin)
        #[arg(short, long)]
        readings: PathBuf,

        /// Readings format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Meal log file path
        #[arg(short, long)]
        meal_log: Option<PathBuf>,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default thresholds, or check a configuration file
    Config {
        /// Configuration file to check
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Readings file path (use - for stdin)
    #[arg(short, long)]
    readings: PathBuf,

    /// Readings format
    #[arg(long, default_value = "ndjson")]
    input_format: InputFormat,

    /// Meal log file path
    #[arg(short, long)]
    meal_log: PathBuf,

    /// Analysis configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct GlArgs {
    /// Only count matches with at least this glycemic load
    #[arg(long)]
    gl_min: Option<f64>,

    /// Only count matches with at most this glycemic load
    #[arg(long)]
    gl_max: Option<f64>,
}

impl GlArgs {
    fn range(&self) -> Result<Option<GlRange>, GlucoCliError> {
        if self.gl_min.is_none() && self.gl_max.is_none() {
            return Ok(None);
        }
        let range = GlRange::new(self.gl_min.unwrap_or(0.0), self.gl_max.unwrap_or(f64::MAX))?;
        Ok(Some(range))
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one reading per line)
    Ndjson,
    /// JSON array of readings
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Plain-text summary
    Text,
    /// Pretty-printed JSON report
    Json,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), GlucoCliError> {
    match cli.command {
        Commands::Analyze {
            input,
            format,
            output,
        } => cmd_analyze(&input, format, &output),
        Commands::Groups { input, gl, json } => cmd_groups(&input, &gl, json),
        Commands::Compare {
            input,
            before,
            after,
            gl,
            json,
        } => cmd_compare(&input, &before, &after, &gl, json),
        Commands::Similar {
            input,
            index,
            threshold,
            json,
        } => cmd_similar(&input, index, threshold, json),
        Commands::Validate {
            readings,
            input_format,
            meal_log,
            json,
        } => cmd_validate(&readings, input_format, meal_log.as_deref(), json),
        Commands::Config { file } => cmd_config(file.as_deref()),
    }
}

/// Everything loaded for one analysis run
struct Session {
    analyzer: SpikeAnalyzer,
    log: MealLog,
    report: AnalysisReport,
}

impl Session {
    fn load(input: &InputArgs) -> Result<Self, GlucoCliError> {
        let config = match &input.config {
            Some(path) => AnalysisConfig::from_json(&read_input(path)?)?,
            None => AnalysisConfig::default(),
        };
        let analyzer = SpikeAnalyzer::with_config(config)?;

        let records = parse_records(&read_input(&input.readings)?, input.input_format)?;
        if records.is_empty() {
            return Err(GlucoCliError::NoReadings);
        }
        let readings = ReadingsAdapter::to_readings(&records)?;

        let log = MealLog::from_json(&read_input(&input.meal_log)?)?;
        log.validate()?;

        let report = analyzer.analyze(&log.to_input(readings))?;
        Ok(Self {
            analyzer,
            log,
            report,
        })
    }

    fn groups(&self) -> Vec<Group> {
        self.log.groups()
    }
}

fn read_input(path: &Path) -> Result<String, GlucoCliError> {
    if path.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            return Err(GlucoCliError::InteractiveStdin);
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn parse_records(data: &str, format: InputFormat) -> Result<Vec<ReadingRecord>, GlucoCliError> {
    let records = match format {
        InputFormat::Ndjson => ReadingsAdapter::parse_ndjson(data)?,
        InputFormat::Json => ReadingsAdapter::parse_array(data)?,
    };
    Ok(records)
}

fn write_output(path: &Path, content: &str) -> Result<(), GlucoCliError> {
    if path.to_string_lossy() == "-" {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle.write_all(content.as_bytes())?;
        if !content.ends_with('\n') {
            writeln!(handle)?;
        }
    } else {
        fs::write(path, content)?;
    }
    Ok(())
}

fn cmd_analyze(input: &InputArgs, format: OutputFormat, output: &Path) -> Result<(), GlucoCliError> {
    let session = Session::load(input)?;
    let content = match format {
        OutputFormat::Text => render_summary(&session.report),
        OutputFormat::Json => encode_report(&session.report, session.analyzer.config())?,
    };
    write_output(output, &content)
}

fn cmd_groups(input: &InputArgs, gl: &GlArgs, json: bool) -> Result<(), GlucoCliError> {
    let session = Session::load(input)?;
    let gl_range = gl.range()?;

    let stats: Vec<_> = session
        .groups()
        .iter()
        .map(|group| session.analyzer.group_stats(&session.report, group, gl_range))
        .collect();

    if json {
        println!("{}", encode_to_json(&stats)?);
    } else if stats.is_empty() {
        println!("No groups defined in the meal log");
    } else {
        for group_stats in &stats {
            println!("{}", render_group_stats(group_stats));
        }
    }
    Ok(())
}

fn cmd_compare(
    input: &InputArgs,
    before: &str,
    after: &str,
    gl: &GlArgs,
    json: bool,
) -> Result<(), GlucoCliError> {
    let session = Session::load(input)?;
    let groups = session.groups();
    let metrics = session.analyzer.compare_groups(
        &session.report,
        &groups,
        before,
        after,
        gl.range()?,
    )?;
    let profiles = session
        .analyzer
        .compare_profiles(&session.report, &groups, before, after)?;

    if json {
        let result = CompareReport {
            metrics: &metrics,
            profiles: &profiles,
        };
        println!("{}", encode_to_json(&result)?);
    } else {
        print!("{}", render_comparison(&metrics));
        println!();
        print!("{}", render_profile_comparison(&profiles));
    }
    Ok(())
}

fn cmd_similar(
    input: &InputArgs,
    index: usize,
    threshold: f64,
    json: bool,
) -> Result<(), GlucoCliError> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(GlucoCliError::Analysis(AnalysisError::ConfigError(format!(
            "similarity threshold {threshold} outside [0, 1]"
        ))));
    }

    let session = Session::load(input)?;
    let similar = session
        .analyzer
        .find_similar(&session.report, index, threshold)?;
    let target = &session.report.profiles[index];

    if json {
        let result = SimilarReport {
            target: target.spike_start_time.to_string(),
            threshold,
            similar: similar
                .iter()
                .map(|(profile, score)| SimilarEntry {
                    spike_start_time: profile.spike_start_time.to_string(),
                    meal_timestamp: profile.meal_timestamp.to_string(),
                    glycemic_load: profile.glycemic_load,
                    score: *score,
                })
                .collect(),
        };
        println!("{}", encode_to_json(&result)?);
    } else {
        print!("{}", render_similar(target, &similar));
    }
    Ok(())
}

fn cmd_validate(
    readings: &Path,
    input_format: InputFormat,
    meal_log: Option<&Path>,
    json: bool,
) -> Result<(), GlucoCliError> {
    let records = parse_records(&read_input(readings)?, input_format)?;
    let failures = ReadingsAdapter::validate_records(&records);

    let mut errors: Vec<ValidationErrorDetail> = failures
        .iter()
        .map(|f| ValidationErrorDetail {
            index: Some(f.index),
            timestamp: Some(f.timestamp.to_string()),
            error: f.error.to_string(),
        })
        .collect();

    // Ordering only makes sense once every record is individually valid
    if failures.is_empty() {
        if let Err(e) = ReadingsAdapter::to_readings(&records) {
            errors.push(ValidationErrorDetail {
                index: None,
                timestamp: None,
                error: e.to_string(),
            });
        }
    }

    let meal_log_status = match meal_log {
        Some(path) => {
            let checked = MealLog::from_json(&read_input(path)?).and_then(|log| log.validate());
            Some(match checked {
                Ok(()) => "ok".to_string(),
                Err(e) => e.to_string(),
            })
        }
        None => None,
    };
    let meal_log_failed = meal_log_status.as_deref().is_some_and(|s| s != "ok");

    let report = ValidationReport {
        producer: format!("{} {}", PRODUCER_NAME, FLUX_VERSION),
        total_records: records.len(),
        valid_records: records.len() - failures.len(),
        invalid_records: failures.len(),
        errors,
        meal_log: meal_log_status,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total records:   {}", report.total_records);
        println!("Valid records:   {}", report.valid_records);
        println!("Invalid records: {}", report.invalid_records);
        if let Some(status) = &report.meal_log {
            println!("Meal log:        {}", status);
        }

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                match (err.index, &err.timestamp) {
                    (Some(index), Some(ts)) => {
                        println!("  - Record {} at {}: {}", index, ts, err.error)
                    }
                    _ => println!("  - {}", err.error),
                }
            }
        }
    }

    let failed = report.errors.len() + usize::from(meal_log_failed);
    if failed > 0 {
        Err(GlucoCliError::ValidationFailed(failed))
    } else {
        Ok(())
    }
}

fn cmd_config(file: Option<&Path>) -> Result<(), GlucoCliError> {
    let config = match file {
        Some(path) => AnalysisConfig::from_json(&read_input(path)?)?,
        None => AnalysisConfig::default(),
    };
    println!("{}", config.to_json()?);
    Ok(())
}

// Error types

#[derive(Debug)]
enum GlucoCliError {
    Io(io::Error),
    Analysis(AnalysisError),
    Json(serde_json::Error),
    NoReadings,
    InteractiveStdin,
    ValidationFailed(usize),
}

impl From<io::Error> for GlucoCliError {
    fn from(e: io::Error) -> Self {
        GlucoCliError::Io(e)
    }
}

impl From<AnalysisError> for GlucoCliError {
    fn from(e: AnalysisError) -> Self {
        GlucoCliError::Analysis(e)
    }
}

impl From<serde_json::Error> for GlucoCliError {
    fn from(e: serde_json::Error) -> Self {
        GlucoCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn new(code: &str, message: String, hint: &str) -> Self {
        Self {
            code: code.to_string(),
            message,
            hint: Some(hint.to_string()),
        }
    }
}

impl From<GlucoCliError> for CliError {
    fn from(e: GlucoCliError) -> Self {
        match e {
            GlucoCliError::Io(e) => {
                CliError::new("IO_ERROR", e.to_string(), "Check file paths and permissions")
            }
            GlucoCliError::Analysis(e) => analysis_error(e),
            GlucoCliError::Json(e) => CliError::new("JSON_ERROR", e.to_string(), "Check JSON syntax"),
            GlucoCliError::NoReadings => CliError::new(
                "NO_READINGS",
                "No readings found in input".to_string(),
                "Ensure the readings file is not empty",
            ),
            GlucoCliError::InteractiveStdin => CliError::new(
                "INTERACTIVE_STDIN",
                "Refusing to read input from a terminal".to_string(),
                "Pipe the file in or pass a path instead of -",
            ),
            GlucoCliError::ValidationFailed(count) => CliError::new(
                "VALIDATION_FAILED",
                format!("{} problems found", count),
                "Fix validation errors and retry",
            ),
        }
    }
}

fn analysis_error(e: AnalysisError) -> CliError {
    let (code, hint) = match &e {
        AnalysisError::ConfigError(_) => ("CONFIG_ERROR", "Run 'glucoflux config' to see valid thresholds"),
        AnalysisError::DataOrderingError { .. } => (
            "DATA_ORDERING_ERROR",
            "Run 'glucoflux validate' to locate the duplicate reading",
        ),
        AnalysisError::DataError(_) => ("DATA_ERROR", "Check that the readings cover the spike"),
        AnalysisError::ParseError(_) | AnalysisError::DateParseError(_) => (
            "PARSE_ERROR",
            "Timestamps use YYYY-MM-DD:HH:MM in the meal log and ISO or LibreView format in readings",
        ),
        AnalysisError::JsonError(_) => ("JSON_ERROR", "Check JSON syntax"),
        AnalysisError::UnknownGroup(_) => ("UNKNOWN_GROUP", "Run 'glucoflux groups' to list group descriptions"),
    };
    CliError::new(code, e.to_string(), hint)
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    producer: String,
    total_records: usize,
    valid_records: usize,
    invalid_records: usize,
    errors: Vec<ValidationErrorDetail>,
    meal_log: Option<String>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: Option<usize>,
    timestamp: Option<String>,
    error: String,
}

#[derive(serde::Serialize)]
struct CompareReport<'a> {
    metrics: &'a GroupComparison,
    profiles: &'a ProfileComparison,
}

#[derive(serde::Serialize)]
struct SimilarReport {
    target: String,
    threshold: f64,
    similar: Vec<SimilarEntry>,
}

#[derive(serde::Serialize)]
struct SimilarEntry {
    spike_start_time: String,
    meal_timestamp: String,
    glycemic_load: f64,
    score: f64,
}
