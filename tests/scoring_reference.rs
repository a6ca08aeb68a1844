use std::env;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use libtest_mimic::{Arguments, Failed, Trial};
use pronunciation_scorer::{
    load_waveform, AcousticModelConfig, Metric, PredictorConfig, PronunciationScorer,
    RatingModelKind, RuntimeKind, ScorerConfig,
};
use serde::Deserialize;

const SUITE_NAME: &str = "scoring_reference";
const MODEL_DIR_ENV: &str = "PRONUNCIATION_IT_MODEL_DIR";
const MIN_SELF_SCORE: f64 = 4.5;
const MIN_SAME_SENTENCE_PER: f64 = 0.6;

/// One row of `pairs.json`; paths are relative to the model directory.
#[derive(Debug, Clone, Deserialize)]
struct ReferencePair {
    id: String,
    reference: String,
    test: String,
    #[serde(default)]
    same_sentence: bool,
}

fn main() {
    let mut args = Arguments::from_args();
    // Acoustic inference is heavy; one thread keeps memory predictable in CI.
    if args.test_threads.is_none() {
        args.test_threads = Some(1);
    }

    let Some(model_dir) = env::var_os(MODEL_DIR_ENV).map(PathBuf::from) else {
        let tests = ["self_score", "same_sentence_per", "full_sheet_bounded"]
            .into_iter()
            .map(|name| {
                Trial::test(format!("{SUITE_NAME}::{name}"), || Ok(())).with_ignored_flag(true)
            })
            .collect();
        libtest_mimic::run(&args, tests).exit();
    };

    let pairs = match load_pairs(&model_dir.join("pairs.json")) {
        Ok(pairs) if !pairs.is_empty() => pairs,
        Ok(_) => {
            run_setup_failure(&args, "pairs.json lists no recordings".to_string());
            return;
        }
        Err(err) => {
            run_setup_failure(&args, err);
            return;
        }
    };

    let mut tests = Vec::with_capacity(pairs.len() * 3);
    for pair in pairs {
        let dir = model_dir.clone();
        let self_pair = pair.clone();
        tests.push(Trial::test(
            format!("{SUITE_NAME}::self_score::{}", pair.id),
            move || run_self_score(&dir, &self_pair).map_err(Failed::from),
        ));

        let dir = model_dir.clone();
        let per_pair = pair.clone();
        tests.push(
            Trial::test(
                format!("{SUITE_NAME}::same_sentence_per::{}", pair.id),
                move || run_same_sentence_per(&dir, &per_pair).map_err(Failed::from),
            )
            .with_ignored_flag(!pair.same_sentence),
        );

        let dir = model_dir.clone();
        tests.push(Trial::test(
            format!("{SUITE_NAME}::full_sheet_bounded::{}", pair.id),
            move || run_full_sheet(&dir, &pair).map_err(Failed::from),
        ));
    }

    libtest_mimic::run(&args, tests).exit();
}

fn run_setup_failure(args: &Arguments, message: String) {
    let test = Trial::test(format!("{SUITE_NAME}::setup"), move || {
        Err(Failed::from(message))
    });
    libtest_mimic::run(args, vec![test]).exit();
}

fn run_self_score(model_dir: &Path, pair: &ReferencePair) -> Result<(), String> {
    let scorer = scorer(model_dir)?;
    let path = model_dir.join(&pair.reference);
    let score = scorer
        .score(&path, &path)
        .map_err(|err| format!("{}: score() failed: {err}", pair.id))?;
    if score < MIN_SELF_SCORE {
        return Err(format!(
            "{}: self score {score:.3} below {MIN_SELF_SCORE}",
            pair.id
        ));
    }
    Ok(())
}

fn run_same_sentence_per(model_dir: &Path, pair: &ReferencePair) -> Result<(), String> {
    let scorer = scorer(model_dir)?;
    let reference = load(model_dir, &pair.reference)?;
    let test = load(model_dir, &pair.test)?;
    let features = scorer
        .rating_features(&reference, &test)
        .map_err(|err| format!("{}: feature extraction failed: {err}", pair.id))?;
    if features.per <= MIN_SAME_SENTENCE_PER {
        return Err(format!(
            "{}: PER similarity {:.3} not above {MIN_SAME_SENTENCE_PER} for the same sentence",
            pair.id, features.per
        ));
    }
    Ok(())
}

fn run_full_sheet(model_dir: &Path, pair: &ReferencePair) -> Result<(), String> {
    let scorer = scorer(model_dir)?;
    let reference = load(model_dir, &pair.reference)?;
    let test = load(model_dir, &pair.test)?;
    let sheet = scorer
        .score_all_waveforms(&reference, &test, None)
        .map_err(|err| format!("{}: score_all failed: {err}", pair.id))?;
    for (metric, value) in sheet.iter() {
        let ok = if metric.higher_is_better() {
            (0.0..=1.0).contains(&value)
        } else {
            value >= 0.0
        };
        if !ok {
            return Err(format!("{}: {metric} = {value} out of range", pair.id));
        }
    }
    for metric in [Metric::Per, Metric::Ppg, Metric::Energy] {
        if !sheet.contains(metric) {
            return Err(format!("{}: {metric} missing from sheet", pair.id));
        }
    }
    Ok(())
}

fn load(model_dir: &Path, relative: &str) -> Result<pronunciation_scorer::Waveform, String> {
    let path = model_dir.join(relative);
    load_waveform(&path).map_err(|err| format!("Failed to load '{}': {err}", path.display()))
}

fn scorer(model_dir: &Path) -> Result<&'static PronunciationScorer, String> {
    static SCORER: OnceLock<Result<PronunciationScorer, String>> = OnceLock::new();
    SCORER
        .get_or_init(|| build_scorer(model_dir))
        .as_ref()
        .map_err(|err| err.clone())
}

fn build_scorer(model_dir: &Path) -> Result<PronunciationScorer, String> {
    let acoustic_dir = model_dir.join("acoustic");
    for file in ["model.safetensors", "config.json", "vocab.json"] {
        require_path_exists(
            &acoustic_dir.join(file),
            "Missing acoustic model file. Point PRONUNCIATION_IT_MODEL_DIR at a prepared model directory.",
        )?;
    }
    let predictor_dir = model_dir.join("predictor");
    let config = ScorerConfig {
        acoustic: AcousticModelConfig {
            device: env::var("PRONUNCIATION_IT_DEVICE").unwrap_or_else(|_| "cpu".to_string()),
            ..AcousticModelConfig::from_model_dir(&acoustic_dir, RuntimeKind::Candle)
        },
        predictor: PredictorConfig {
            model_path: predictor_dir
                .join("model.safetensors")
                .to_string_lossy()
                .into_owned(),
            scaler_path: predictor_dir.join("scaler.json").to_string_lossy().into_owned(),
            kind: RatingModelKind::default(),
        },
        ..ScorerConfig::default()
    };
    PronunciationScorer::new(config).map_err(|err| {
        format!(
            "Failed to build PronunciationScorer with model dir '{}': {err}",
            model_dir.display()
        )
    })
}

fn load_pairs(path: &Path) -> Result<Vec<ReferencePair>, String> {
    require_path_exists(
        path,
        "Missing pairs.json fixture listing reference/test recordings.",
    )?;
    let file = File::open(path)
        .map_err(|err| format!("Failed to open fixture '{}': {err}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|err| format!("Failed to parse fixture '{}': {err}", path.display()))
}

fn require_path_exists(path: &Path, hint: &str) -> Result<(), String> {
    if path.exists() {
        Ok(())
    } else {
        Err(format!("{} ({})", hint, path.display()))
    }
}
