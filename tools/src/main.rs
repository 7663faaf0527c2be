//! claim-runner: headless claim pipeline runner.
//!
//! Usage:
//!   claim-runner --db claims.db --claim claim.json [--claim other.json]
//!   claim-runner --db claims.db --data-dir ./config --ipc-mode
//!   claim-runner --db claims.db --summary
//!
//! A claim file is the claim metadata plus `image_paths`, resolved
//! relative to the claim file.

use anyhow::{Context, Result};
use claimprint_core::{
    cancel::CancelToken,
    config::PipelineConfig,
    fingerprint::ClaimMetadata,
    orchestrator::{ClaimOrchestrator, ClaimSubmission},
    store::ClaimStore,
};
use std::env;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(serde::Deserialize)]
struct ClaimFile {
    #[serde(flatten)]
    metadata: ClaimMetadata,
    #[serde(default)]
    image_paths: Vec<String>,
}

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Submit {
        claim: ClaimFile,
        #[serde(default)]
        base_dir: Option<String>,
    },
    Summary,
    Quit,
}

#[derive(serde::Serialize)]
struct Summary {
    model_version: String,
    fingerprints: u64,
    fingerprints_current_model: u64,
    analyses: u64,
    risk_levels: Vec<claimprint_core::store::RiskLevelCount>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let summary = args.iter().any(|a| a == "--summary");
    let deadline_ms = parse_arg(&args, "--deadline-ms", 0u64);
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str())
        .unwrap_or("claims.db");
    let data_dir = args
        .windows(2)
        .find(|w| w[0] == "--data-dir")
        .map(|w| w[1].as_str());
    let claim_files: Vec<&str> = args
        .windows(2)
        .filter(|w| w[0] == "--claim")
        .map(|w| w[1].as_str())
        .collect();

    let config = match data_dir {
        Some(dir) => PipelineConfig::load(dir)?,
        None => PipelineConfig::default(),
    };

    let store = ClaimStore::open(db)?;
    store.migrate()?;
    let orchestrator = ClaimOrchestrator::build(store, config)?;

    if !ipc_mode {
        println!("claim-runner");
        println!("  db:        {db}");
        println!("  model:     {}", orchestrator.model_version());
        println!("  claims:    {}", claim_files.len());
        println!();
    }

    if ipc_mode {
        run_ipc_loop(&orchestrator, deadline_ms)?;
        return Ok(());
    }

    let mut failed = 0usize;
    for path in &claim_files {
        log::debug!("submitting {path}");
        let claim = load_claim_file(path)?;
        let base = Path::new(path).parent().map(Path::to_path_buf).unwrap_or_default();
        let submission = to_submission(claim, &base)?;
        match orchestrator.process(&submission, &cancel_token(deadline_ms)) {
            Ok(outcome) => println!("{}", serde_json::to_string_pretty(&outcome.report)?),
            Err(failure) => {
                failed += 1;
                eprintln!("{path}: {failure}");
            }
        }
    }

    if summary || claim_files.is_empty() {
        print_summary(&orchestrator)?;
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} claims failed", claim_files.len());
    }
    Ok(())
}

fn run_ipc_loop(orchestrator: &ClaimOrchestrator<ClaimStore>, deadline_ms: u64) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                let err_json = serde_json::json!({ "error": e.to_string() });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };

        match cmd {
            IpcCommand::Quit => break,
            IpcCommand::Summary => {
                writeln!(stdout, "{}", serde_json::to_string(&build_summary(orchestrator)?)?)?;
            }
            IpcCommand::Submit { claim, base_dir } => {
                let base = base_dir.map(PathBuf::from).unwrap_or_default();
                let reply = match to_submission(claim, &base) {
                    Ok(submission) => {
                        match orchestrator.process(&submission, &cancel_token(deadline_ms)) {
                            Ok(outcome) => serde_json::json!({
                                "report": outcome.report,
                                "replayed": outcome.replayed,
                            }),
                            Err(failure) => serde_json::json!({
                                "error": failure.error.to_string(),
                                "stage": failure.stage,
                            }),
                        }
                    }
                    Err(e) => serde_json::json!({ "error": format!("{e:#}") }),
                };
                writeln!(stdout, "{reply}")?;
            }
        }
        stdout.flush()?;
    }
    Ok(())
}

fn load_claim_file(path: &str) -> Result<ClaimFile> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Cannot read {path}"))?;
    serde_json::from_str(&content).with_context(|| format!("Cannot parse claim file {path}"))
}

fn to_submission(claim: ClaimFile, base: &Path) -> Result<ClaimSubmission> {
    let mut images = Vec::with_capacity(claim.image_paths.len());
    for p in &claim.image_paths {
        let full = base.join(p);
        let bytes = std::fs::read(&full)
            .with_context(|| format!("Cannot read image {}", full.display()))?;
        images.push(bytes);
    }
    Ok(ClaimSubmission {
        metadata: claim.metadata,
        images,
    })
}

fn cancel_token(deadline_ms: u64) -> CancelToken {
    if deadline_ms == 0 {
        CancelToken::new()
    } else {
        CancelToken::with_deadline(Duration::from_millis(deadline_ms))
    }
}

fn build_summary(orchestrator: &ClaimOrchestrator<ClaimStore>) -> Result<Summary> {
    let store = orchestrator.repository();
    let model_version = orchestrator.model_version().to_string();
    Ok(Summary {
        fingerprints: store.fingerprint_count()?,
        fingerprints_current_model: store.fingerprint_count_for_version(&model_version)?,
        analyses: store.analysis_count()?,
        risk_levels: store.risk_level_counts()?,
        model_version,
    })
}

fn print_summary(orchestrator: &ClaimOrchestrator<ClaimStore>) -> Result<()> {
    let s = build_summary(orchestrator)?;
    println!("=== CORPUS SUMMARY ===");
    println!("  model:          {}", s.model_version);
    println!("  fingerprints:   {}", s.fingerprints);
    println!("  on this model:  {}", s.fingerprints_current_model);
    println!("  analyses:       {}", s.analyses);
    for c in &s.risk_levels {
        println!("  {:<14}  {}", format!("{}:", c.risk_level), c.count);
    }
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
