use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use pronunciation_scorer::{
    load_waveform, AcousticModelConfig, PronunciationScorer, RatingFeatures, RatingPrediction,
    RuntimeKind, ScoreSheet, ScorerConfig,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RuntimeChoice {
    Candle,
    Onnx,
}

impl RuntimeChoice {
    fn runtime_kind(self) -> RuntimeKind {
        match self {
            Self::Candle => RuntimeKind::Candle,
            Self::Onnx => RuntimeKind::Onnx,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "score_report")]
#[command(about = "Score learner recordings against reference recordings")]
struct Args {
    /// Scorer configuration JSON; flags below override its model paths.
    #[arg(long, env = "PRONUNCIATION_SCORER_CONFIG")]
    config: Option<PathBuf>,
    /// Directory holding model.safetensors (or model.onnx), config.json and vocab.json.
    #[arg(long, env = "PRONUNCIATION_MODEL_DIR")]
    model_dir: Option<PathBuf>,
    /// Character CTC model directory used for WER in `--full` mode.
    #[arg(long, env = "PRONUNCIATION_TRANSCRIBER_DIR")]
    transcriber_dir: Option<PathBuf>,
    #[arg(long, env = "PRONUNCIATION_PREDICTOR_MODEL")]
    predictor_model: Option<PathBuf>,
    #[arg(long, env = "PRONUNCIATION_PREDICTOR_SCALER")]
    predictor_scaler: Option<PathBuf>,
    #[arg(long, env = "PRONUNCIATION_DEVICE")]
    device: Option<String>,
    #[arg(long, env = "PRONUNCIATION_RUNTIME", value_enum)]
    runtime: Option<RuntimeChoice>,
    #[arg(long, requires = "test", conflicts_with = "batch")]
    reference: Option<PathBuf>,
    #[arg(long, requires = "reference")]
    test: Option<PathBuf>,
    /// Ground-truth sentence for WER instead of transcribing the reference.
    #[arg(long)]
    reference_text: Option<String>,
    /// JSON array of `{"id", "reference", "test", "reference_text"}` pairs.
    #[arg(long)]
    batch: Option<PathBuf>,
    /// Compute every metric instead of only the rating.
    #[arg(long, default_value_t = false)]
    full: bool,
    /// Write the report here instead of stdout.
    #[arg(long, env = "PRONUNCIATION_REPORT_OUT")]
    out: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
struct PairCase {
    #[serde(default)]
    id: Option<String>,
    reference: PathBuf,
    test: PathBuf,
    #[serde(default)]
    reference_text: Option<String>,
}

#[derive(Debug, Serialize)]
struct PairResult {
    id: String,
    reference: String,
    test: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    rating: Option<RatingPrediction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metrics: Option<ScoreSheet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct Meta {
    generated_at: String,
    device: String,
    full: bool,
    wer_available: bool,
    pair_count: usize,
}

#[derive(Debug, Serialize)]
struct Report {
    schema_version: u32,
    meta: Meta,
    results: Vec<PairResult>,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args = Args::parse();
    let cases = load_cases(&args)?;
    let config = build_config(&args)?;
    let scorer = PronunciationScorer::new(config).map_err(|e| e.to_string())?;

    let progress = if cases.len() > 1 {
        let bar = ProgressBar::new(cases.len() as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
        );
        bar
    } else {
        ProgressBar::hidden()
    };

    let mut results = Vec::with_capacity(cases.len());
    for (index, case) in cases.iter().enumerate() {
        let id = case.id.clone().unwrap_or_else(|| format!("pair-{index}"));
        progress.set_message(id.clone());
        let reference_text = case
            .reference_text
            .as_deref()
            .or(args.reference_text.as_deref());
        let outcome = score_case(&scorer, case, args.full, reference_text);
        if let Err(err) = &outcome {
            tracing::warn!(%id, error = %err, "pair failed");
        }
        let (rating, metrics, error) = match outcome {
            Ok((rating, metrics)) => (rating, metrics, None),
            Err(err) => (None, None, Some(err)),
        };
        results.push(PairResult {
            id,
            reference: case.reference.display().to_string(),
            test: case.test.display().to_string(),
            rating,
            metrics,
            error,
        });
        progress.inc(1);
    }
    progress.finish_with_message("scoring complete");

    let failures = results.iter().filter(|r| r.error.is_some()).count();
    let report = Report {
        schema_version: 1,
        meta: Meta {
            generated_at: Utc::now().to_rfc3339(),
            device: scorer.capabilities().device.clone(),
            full: args.full,
            wer_available: scorer.capabilities().wer,
            pair_count: results.len(),
        },
        results,
    };
    write_report(args.out.as_deref(), &report)?;

    if failures > 0 {
        return Err(format!("{failures} of {} pair(s) failed", report.results.len()));
    }
    Ok(())
}

fn score_case(
    scorer: &PronunciationScorer,
    case: &PairCase,
    full: bool,
    reference_text: Option<&str>,
) -> Result<(Option<RatingPrediction>, Option<ScoreSheet>), String> {
    let reference = load_waveform(&case.reference).map_err(|e| e.to_string())?;
    let test = load_waveform(&case.test).map_err(|e| e.to_string())?;
    if !full {
        let rating = scorer.rate(&reference, &test).map_err(|e| e.to_string())?;
        return Ok((Some(rating), None));
    }
    let sheet = scorer
        .score_all_waveforms(&reference, &test, reference_text)
        .map_err(|e| e.to_string())?;
    // A sheet missing a rating feature still reports its metrics.
    let rating = match RatingFeatures::from_sheet(&sheet) {
        Ok(features) => Some(scorer.predict_rating(&features).map_err(|e| e.to_string())?),
        Err(err) => {
            tracing::warn!(error = %err, "rating skipped");
            None
        }
    };
    Ok((rating, Some(sheet)))
}

fn load_cases(args: &Args) -> Result<Vec<PairCase>, String> {
    if let Some(batch) = &args.batch {
        let data = fs::read_to_string(batch)
            .map_err(|err| format!("Failed to read batch file '{}': {err}", batch.display()))?;
        let cases: Vec<PairCase> = serde_json::from_str(&data)
            .map_err(|err| format!("Failed to parse batch file '{}': {err}", batch.display()))?;
        if cases.is_empty() {
            return Err(format!("Batch file '{}' has no pairs.", batch.display()));
        }
        return Ok(cases);
    }
    match (&args.reference, &args.test) {
        (Some(reference), Some(test)) => Ok(vec![PairCase {
            id: None,
            reference: reference.clone(),
            test: test.clone(),
            reference_text: None,
        }]),
        _ => Err("Provide --reference and --test, or --batch.".to_string()),
    }
}

fn build_config(args: &Args) -> Result<ScorerConfig, String> {
    let mut config = match &args.config {
        Some(path) => ScorerConfig::from_json_file(path).map_err(|e| e.to_string())?,
        None => ScorerConfig::default(),
    };
    let runtime = args
        .runtime
        .map(RuntimeChoice::runtime_kind)
        .unwrap_or(config.acoustic.runtime);
    if let Some(dir) = &args.model_dir {
        let device = config.acoustic.device.clone();
        config.acoustic = AcousticModelConfig {
            device,
            ..AcousticModelConfig::from_model_dir(dir, runtime)
        };
    }
    config.acoustic.runtime = runtime;
    if let Some(dir) = &args.transcriber_dir {
        config.transcriber = Some(AcousticModelConfig::from_model_dir(dir, runtime));
    }
    if let Some(device) = &args.device {
        config.acoustic.device = device.clone();
        if let Some(transcriber) = config.transcriber.as_mut() {
            transcriber.device = device.clone();
        }
    }
    if let Some(path) = &args.predictor_model {
        config.predictor.model_path = path.to_string_lossy().into_owned();
    }
    if let Some(path) = &args.predictor_scaler {
        config.predictor.scaler_path = path.to_string_lossy().into_owned();
    }
    if config.acoustic.model_path.is_empty() {
        return Err("No acoustic model: pass --model-dir or --config.".to_string());
    }
    if config.predictor.model_path.is_empty() || config.predictor.scaler_path.is_empty() {
        return Err(
            "No rating model: pass --predictor-model and --predictor-scaler or --config."
                .to_string(),
        );
    }
    Ok(config)
}

fn write_report(out: Option<&Path>, report: &Report) -> Result<(), String> {
    let Some(path) = out else {
        let json = serde_json::to_string_pretty(report)
            .map_err(|err| format!("Failed to serialize report JSON: {err}"))?;
        println!("{json}");
        return Ok(());
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            format!(
                "Failed to create report output directory '{}': {err}",
                parent.display()
            )
        })?;
    }
    let mut file = File::create(path)
        .map_err(|err| format!("Failed to create report file '{}': {err}", path.display()))?;
    serde_json::to_writer_pretty(&mut file, report).map_err(|err| {
        format!(
            "Failed to serialize report JSON '{}': {err}",
            path.display()
        )
    })?;
    file.write_all(b"\n")
        .map_err(|err| format!("Failed to finalize report file '{}': {err}", path.display()))?;
    println!("{}", path.display());
    Ok(())
}
