//! Blood pressure reader CLI
//!
//! Reads a photo of a blood pressure monitor display and prints the
//! systolic, diastolic and pulse values, optionally with a normal/abnormal
//! verdict from a threshold formula.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

use bp_reader::analysis::{self, Assessment};
use bp_reader::{image_source, log, paths};
use bp_reader::{recognize_reading, ReaderConfig, RecognizedReading, TesseractRecognizer};

/// Extract a blood pressure reading from a photo of a monitor display
#[derive(Parser, Debug)]
#[command(name = "bp-reader", version)]
struct Args {
    /// Photo of the monitor display
    #[arg(required_unless_present = "init_config")]
    image: Option<PathBuf>,

    /// Config file (defaults to config.json next to the executable)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Formula over x (diastolic) and y (systolic), e.g. "x + 40"
    #[arg(short, long)]
    formula: Option<String>,

    /// Largest accepted difference between the formula and the systolic value
    #[arg(short, long)]
    threshold: Option<f64>,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,

    /// Write a config file with default values and exit
    #[arg(long)]
    init_config: bool,
}

#[derive(Serialize)]
struct Output<'a> {
    #[serde(flatten)]
    result: &'a RecognizedReading,
    #[serde(skip_serializing_if = "Option::is_none")]
    assessment: Option<&'a Assessment>,
}

fn main() -> Result<()> {
    // Set up panic hook to log panics
    std::panic::set_hook(Box::new(|panic_info| {
        let msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        let location = if let Some(loc) = panic_info.location() {
            format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column())
        } else {
            String::new()
        };
        log(&format!("[PANIC]{} {}", location, msg));
    }));

    let args = Args::parse();

    // Ensure output directories exist
    paths::ensure_directories()?;

    let config_path = args.config.clone().unwrap_or_else(paths::get_config_path);
    if args.init_config {
        ReaderConfig::save_default(&config_path)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        println!("Wrote default config to {}", config_path.display());
        return Ok(());
    }

    let config = ReaderConfig::load(&config_path);
    let Some(image_path) = args.image.as_deref() else {
        anyhow::bail!("No image given");
    };

    let image = image_source::load_image(image_path, &config)?;

    let mut recognizer = TesseractRecognizer::new(&config);
    recognizer.initialize()?;
    let result = recognize_reading(&mut recognizer, &image, &config);
    recognizer.terminate();
    let result = result?;

    let formula = args.formula.or(config.threshold_rule.formula.clone());
    let threshold = args.threshold.or(config.threshold_rule.threshold);
    let assessment = if formula.is_some() || threshold.is_some() {
        Some(analysis::evaluate(&result.reading, formula.as_deref(), threshold)?)
    } else {
        None
    };

    if args.json {
        let output = Output {
            result: &result,
            assessment: assessment.as_ref(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_result(&result, assessment.as_ref());
    }

    Ok(())
}

fn print_result(result: &RecognizedReading, assessment: Option<&Assessment>) {
    let reading = &result.reading;
    println!("Systolic:  {} mmHg", reading.systolic);
    println!("Diastolic: {} mmHg", reading.diastolic);
    match reading.pulse {
        Some(pulse) => println!("Pulse:     {} /min", pulse),
        None => println!("Pulse:     -"),
    }
    println!("Strategy:  {} (score {})", result.strategy, result.score);
    println!("Text:      {:?}", result.raw_text);

    if let Some(assessment) = assessment {
        println!(
            "Verdict:   {} ({} = {:.1}, difference {:.1}, threshold {})",
            if assessment.is_normal { "normal" } else { "abnormal" },
            assessment.formula,
            assessment.value,
            assessment.difference,
            assessment.threshold
        );
    }
}
