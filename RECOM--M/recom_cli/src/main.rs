use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Result};
use chrono::{Datelike, Local, Utc};
use clap::{error::ErrorKind, Parser};
use recom_ml::{
    PipelineConfig, PipelineError, PipelineReport, RecomTelemetry, Stage, TrainingPipeline,
};
use serde_json::json;
use shared_logging::LogLevel;
use uuid::Uuid;

const USAGE: &str = "Expected arguments: <review-path> <model-path>";

#[derive(Parser, Debug)]
#[command(
    name = "recomengine-ml",
    version,
    about = "Produces a model that recommends products to users from their reviews"
)]
struct Cli {
    /// File or directory of `userId,productId,score,timestamp` lines.
    review_path: PathBuf,
    /// Directory the trained model is written to (replaced if present).
    model_path: PathBuf,
    /// TOML file overriding split, ALS, cold-start and evaluation settings.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Seed for both the random split and the factor initialization.
    #[arg(long)]
    seed: Option<u64>,
    /// Minimum level written to the job log.
    #[arg(long, default_value = "error")]
    log_level: LogLevel,
    /// Directory receiving dated JSON-lines job logs.
    #[arg(long)]
    log_dir: Option<PathBuf>,
    /// Writes the full run report as JSON to this path.
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => return usage_or_exit(&err),
    };
    match run(&cli) {
        Ok(report) => {
            println!("{}", report.summary());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("recomengine-ml: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Wrong positional count prints the usage line and exits cleanly; help,
/// version and malformed option values keep clap's own behaviour.
fn usage_or_exit(err: &clap::Error) -> ExitCode {
    match err.kind() {
        ErrorKind::MissingRequiredArgument | ErrorKind::UnknownArgument => {
            println!("{USAGE}");
            ExitCode::SUCCESS
        }
        _ => err.exit(),
    }
}

fn run(cli: &Cli) -> Result<PipelineReport> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path).map_err(|source| PipelineError {
            stage: Stage::Config,
            source,
        })?,
        None => PipelineConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config = config.with_seed(seed);
    }

    let job_id = format!("job-{}", Uuid::new_v4());
    let mut builder = RecomTelemetry::builder("recomengine-ml").min_level(cli.log_level);
    if let Some(dir) = &cli.log_dir {
        builder = builder.log_path(compute_log_path(dir)?);
    }
    let telemetry = builder.build().context("opening job log")?;

    let _ = telemetry.log(
        LogLevel::Info,
        "recom_job_started",
        json!({
            "job_id": job_id,
            "review_path": cli.review_path,
            "model_path": cli.model_path,
            "config": cli.config,
            "submitted_at": Utc::now(),
        }),
    );

    let pipeline = TrainingPipeline::new(config).with_telemetry(telemetry.clone());
    match pipeline.run(&cli.review_path, &cli.model_path) {
        Ok(report) => {
            let _ = telemetry.log(
                LogLevel::Info,
                "recom_job_completed",
                json!({ "job_id": job_id, "model_id": report.model_id, "metric": report.evaluation }),
            );
            if let Some(path) = &cli.report {
                write_report(path, &report)?;
            }
            Ok(report)
        }
        Err(err) => {
            let _ = telemetry.log(
                LogLevel::Error,
                "recom_job_failed",
                json!({ "job_id": job_id, "stage": err.stage, "error": err.to_string() }),
            );
            Err(err.into())
        }
    }
}

fn compute_log_path(base: &Path) -> Result<PathBuf> {
    let now = Local::now();
    let dir = base
        .join(format!("{:04}", now.year()))
        .join(format!("{:02}", now.month()))
        .join(format!("{:02}", now.day()));
    fs::create_dir_all(&dir).with_context(|| format!("creating log dir {}", dir.display()))?;
    Ok(dir.join(format!(
        "recom-{}.log.jsonl",
        Utc::now().format("%Y%m%d-%H%M%S")
    )))
}

fn write_report(path: &Path, report: &PipelineReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string_pretty(report)?;
    fs::write(path, body).with_context(|| format!("writing report {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fixture() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../ml/dataset/reviews.csv")
    }

    #[test]
    fn parses_two_positionals_and_options() {
        let cli = Cli::try_parse_from([
            "recomengine-ml",
            "reviews",
            "model",
            "--seed",
            "3",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.review_path, PathBuf::from("reviews"));
        assert_eq!(cli.model_path, PathBuf::from("model"));
        assert_eq!(cli.seed, Some(3));
        assert_eq!(cli.log_level, LogLevel::Debug);
    }

    #[test]
    fn wrong_positional_count_is_a_usage_error() {
        for args in [
            vec!["recomengine-ml"],
            vec!["recomengine-ml", "reviews"],
            vec!["recomengine-ml", "a", "b", "c"],
        ] {
            let err = Cli::try_parse_from(args).unwrap_err();
            assert!(matches!(
                err.kind(),
                ErrorKind::MissingRequiredArgument | ErrorKind::UnknownArgument
            ));
        }
    }

    #[test]
    fn run_writes_model_log_and_report() {
        let dir = tempdir().unwrap();
        let cli = Cli {
            review_path: fixture(),
            model_path: dir.path().join("model"),
            config: None,
            seed: Some(8),
            log_level: LogLevel::Info,
            log_dir: Some(dir.path().join("logs")),
            report: Some(dir.path().join("report.json")),
        };
        let report = run(&cli).unwrap();
        assert!(report.summary().starts_with("Root mean square error = "));
        assert!(dir.path().join("model/metadata.json").exists());
        let saved: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("report.json")).unwrap())
                .unwrap();
        assert_eq!(saved["input_records"], json!(594));
    }

    #[test]
    fn run_failure_names_stage() {
        let dir = tempdir().unwrap();
        let cli = Cli {
            review_path: dir.path().join("missing"),
            model_path: dir.path().join("model"),
            config: None,
            seed: Some(1),
            log_level: LogLevel::Error,
            log_dir: None,
            report: None,
        };
        let err = run(&cli).unwrap_err();
        assert!(format!("{err:#}").contains("parse stage failed"));
    }

    #[test]
    fn unreadable_config_names_stage() {
        let dir = tempdir().unwrap();
        let config = dir.path().join("job.toml");
        fs::write(&config, "[als]\nrank = \"ten\"\n").unwrap();
        let cli = Cli {
            review_path: fixture(),
            model_path: dir.path().join("model"),
            config: Some(config),
            seed: None,
            log_level: LogLevel::Error,
            log_dir: None,
            report: None,
        };
        let err = run(&cli).unwrap_err();
        assert!(format!("{err:#}").contains("config stage failed"));
        assert!(!dir.path().join("model").exists());
    }
}
