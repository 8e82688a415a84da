//! Runs the strategy catalog against one source image.
//!
//! Baselines always run and the best score wins. Fallbacks run only when no
//! baseline produced a reading and stop at the first one. When everything has
//! failed, texts from a handful of strategies are pooled and parsed once more.

use serde::Serialize;

use super::engine::Recognizer;
use super::extract::{parse_reading, BloodPressureReading, ParseMode};
use super::preprocess::PixelBuffer;
use super::score::score_candidate;
use super::strategy::{fallback_strategies, salvage_strategies, strategies_in, Phase, StrategyDescriptor};
use crate::config::ReaderConfig;
use crate::error::{ReadingError, Result};
use crate::log;

/// Strategy id reported for readings parsed from pooled texts.
pub const SALVAGE_STRATEGY: &str = "combined";

/// Final output of a recognition run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognizedReading {
    pub reading: BloodPressureReading,
    /// Recognized text the reading was parsed from
    pub raw_text: String,
    pub score: i32,
    pub strategy: String,
}

/// Extracts a blood pressure reading from `image`.
///
/// Per-strategy failures are logged and skipped. `RecognizerUnavailable`
/// aborts the run; `Unrecognizable` means every strategy failed.
pub fn recognize_reading<R: Recognizer + ?Sized>(
    recognizer: &mut R,
    image: &PixelBuffer,
    config: &ReaderConfig,
) -> Result<RecognizedReading> {
    if !recognizer.is_ready() {
        return Err(ReadingError::RecognizerUnavailable(
            "recognizer has not been initialized".into(),
        ));
    }
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(ReadingError::InvalidInput(format!(
            "image has no pixels ({}x{})",
            width, height
        )));
    }

    log(&format!("Recognizing {}x{} image", width, height));

    let mut best: Option<RecognizedReading> = None;
    for strategy in strategies_in(Phase::Baseline) {
        let Some(candidate) = attempt(recognizer, image, strategy, config, ParseMode::Required)?
        else {
            continue;
        };
        if best.as_ref().is_none_or(|b| candidate.score > b.score) {
            best = Some(candidate);
        }
    }
    if let Some(best) = best {
        log(&format!(
            "Best baseline: {} with score {}",
            best.strategy, best.score
        ));
        return Ok(best);
    }

    log("No baseline produced a reading, trying fallbacks");
    for strategy in fallback_strategies() {
        if let Some(candidate) =
            attempt(recognizer, image, strategy, config, ParseMode::Speculative)?
        {
            log(&format!(
                "Fallback {} succeeded with score {}",
                candidate.strategy, candidate.score
            ));
            return Ok(candidate);
        }
    }

    log("All strategies failed, parsing combined texts");
    if let Some(candidate) = salvage(recognizer, image, config)? {
        return Ok(candidate);
    }

    log("Could not recognize a reading");
    Err(ReadingError::Unrecognizable)
}

/// Runs one strategy, turning non-fatal failures into `None`.
fn attempt<R: Recognizer + ?Sized>(
    recognizer: &mut R,
    image: &PixelBuffer,
    strategy: &StrategyDescriptor,
    config: &ReaderConfig,
    mode: ParseMode,
) -> Result<Option<RecognizedReading>> {
    log(&format!("Strategy {}: running", strategy.id));

    let outcome = recognize_text(recognizer, image, strategy, config).and_then(|text| {
        let reading = parse_reading(&text, mode)?;
        Ok(reading.map(|reading| RecognizedReading {
            score: score_candidate(Some(&reading), &text),
            reading,
            raw_text: text,
            strategy: strategy.id.to_string(),
        }))
    });

    match outcome {
        Ok(Some(candidate)) => {
            log(&format!(
                "Strategy {}: {}/{} pulse {:?}, score {}",
                strategy.id,
                candidate.reading.systolic,
                candidate.reading.diastolic,
                candidate.reading.pulse,
                candidate.score
            ));
            Ok(Some(candidate))
        }
        Ok(None) => {
            log(&format!("Strategy {}: no reading", strategy.id));
            Ok(None)
        }
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            log(&format!("Strategy {} failed: {}", strategy.id, e));
            Ok(None)
        }
    }
}

/// Transforms the source image and runs the recognizer on the result.
fn recognize_text<R: Recognizer + ?Sized>(
    recognizer: &mut R,
    image: &PixelBuffer,
    strategy: &StrategyDescriptor,
    config: &ReaderConfig,
) -> Result<String> {
    let prepared = strategy.preprocessing.apply(image, &config.upscale);
    let result = recognizer.recognize(
        &prepared,
        &strategy.recognition_hints(config),
        strategy.timeout(config),
    )?;
    log(&format!(
        "Strategy {}: recognized {:?} (confidence {:.1})",
        strategy.id, result.text, result.confidence
    ));
    Ok(result.text)
}

/// Pools the non-empty texts of the salvage strategies and parses them together.
fn salvage<R: Recognizer + ?Sized>(
    recognizer: &mut R,
    image: &PixelBuffer,
    config: &ReaderConfig,
) -> Result<Option<RecognizedReading>> {
    let mut texts = Vec::new();
    for strategy in salvage_strategies() {
        match recognize_text(recognizer, image, strategy, config) {
            Ok(text) if !text.trim().is_empty() => texts.push(text),
            Ok(_) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => log(&format!("Strategy {} failed: {}", strategy.id, e)),
        }
    }
    if texts.is_empty() {
        return Ok(None);
    }

    let combined = texts.join(" ");
    log(&format!("Combined text: {:?}", combined));

    Ok(
        parse_reading(&combined, ParseMode::Speculative)?.map(|reading| RecognizedReading {
            score: score_candidate(Some(&reading), &combined),
            reading,
            raw_text: combined,
            strategy: SALVAGE_STRATEGY.to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::engine::{RecognitionHints, RecognitionResult};
    use crate::ocr::preprocess::UpscaleTargets;
    use crate::ocr::strategy::CATALOG;
    use image::Rgba;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Replays canned responses in order, then reports empty text.
    struct ScriptedRecognizer {
        ready: bool,
        responses: VecDeque<Result<String>>,
        calls: Vec<(RecognitionHints, Duration)>,
    }

    impl ScriptedRecognizer {
        fn new(responses: Vec<Result<String>>) -> Self {
            Self {
                ready: true,
                responses: responses.into(),
                calls: Vec::new(),
            }
        }

        fn texts(texts: &[&str]) -> Self {
            Self::new(texts.iter().map(|t| Ok(t.to_string())).collect())
        }
    }

    impl Recognizer for ScriptedRecognizer {
        fn is_ready(&self) -> bool {
            self.ready
        }

        fn recognize(
            &mut self,
            _image: &PixelBuffer,
            hints: &RecognitionHints,
            timeout: Duration,
        ) -> Result<RecognitionResult> {
            self.calls.push((hints.clone(), timeout));
            let text = self
                .responses
                .pop_front()
                .unwrap_or(Err(ReadingError::EmptyText))?;
            Ok(RecognitionResult {
                text,
                confidence: 80.0,
            })
        }
    }

    fn config() -> ReaderConfig {
        ReaderConfig {
            upscale: UpscaleTargets {
                standard: 0,
                contrast: 0,
                minimal: 0,
            },
            ..Default::default()
        }
    }

    fn image() -> PixelBuffer {
        PixelBuffer::from_fn(10, 8, |x, y| {
            if (3..7).contains(&x) && (2..6).contains(&y) {
                Rgba([230, 230, 230, 255])
            } else {
                Rgba([30, 30, 30, 255])
            }
        })
    }

    fn failures(count: usize) -> Vec<Result<String>> {
        (0..count).map(|_| Err(ReadingError::EmptyText)).collect()
    }

    #[test]
    fn test_baseline_success_skips_fallbacks() {
        let mut recognizer = ScriptedRecognizer::texts(&["SYS 138/75 mmHg", "garbage", "garbage"]);
        let result = recognize_reading(&mut recognizer, &image(), &config()).unwrap();

        assert_eq!(recognizer.calls.len(), 3);
        assert_eq!(result.reading.systolic, 138);
        assert_eq!(result.reading.diastolic, 75);
        assert_eq!(result.score, 135);
        assert_eq!(result.strategy, "aggressive");
        assert_eq!(result.raw_text, "SYS 138/75 mmHg");
    }

    #[test]
    fn test_highest_baseline_score_wins() {
        let mut recognizer =
            ScriptedRecognizer::texts(&["120 80", "SYS:138 DIA:75 PULSE:68", "130/85"]);
        let result = recognize_reading(&mut recognizer, &image(), &config()).unwrap();

        assert_eq!(recognizer.calls.len(), 3);
        assert_eq!(result.strategy, "standard");
        assert_eq!(result.reading.pulse, Some(68));
    }

    #[test]
    fn test_equal_score_keeps_earlier_baseline() {
        let mut recognizer = ScriptedRecognizer::texts(&["120/80", "130/85", "nothing"]);
        let result = recognize_reading(&mut recognizer, &image(), &config()).unwrap();

        assert_eq!(result.strategy, "aggressive");
        assert_eq!(result.reading.systolic, 120);
    }

    #[test]
    fn test_fallbacks_stop_at_first_reading() {
        let mut responses = failures(3);
        responses.push(Ok("no digits".to_string()));
        responses.push(Ok("118/76".to_string()));
        let mut recognizer = ScriptedRecognizer::new(responses);

        let result = recognize_reading(&mut recognizer, &image(), &config()).unwrap();
        assert_eq!(recognizer.calls.len(), 5);
        assert_eq!(result.strategy, "grayscale");
        assert_eq!(result.reading.systolic, 118);
    }

    #[test]
    fn test_sweep_uses_its_own_timeout() {
        let sweep_index = CATALOG
            .iter()
            .position(|s| s.id == "grayscale-psm-11")
            .unwrap();
        let mut responses = failures(sweep_index);
        responses.push(Ok("SYS 141 DIA 92".to_string()));
        let mut recognizer = ScriptedRecognizer::new(responses);

        let config = config();
        let result = recognize_reading(&mut recognizer, &image(), &config).unwrap();
        assert_eq!(result.strategy, "grayscale-psm-11");

        let (hints, timeout) = recognizer.calls.last().unwrap();
        assert_eq!(hints.segmentation_mode.unwrap().psm(), 11);
        assert_eq!(*timeout, config.sweep_timeout());
        assert_eq!(recognizer.calls[0].1, config.recognition_timeout());
    }

    #[test]
    fn test_combined_text_salvage() {
        let mut responses = failures(CATALOG.len());
        responses.push(Ok("SYS 138".to_string()));
        responses.push(Err(ReadingError::Timeout {
            operation: "recognition",
            after: Duration::from_secs(90),
        }));
        responses.push(Ok("DIA 75".to_string()));
        let mut recognizer = ScriptedRecognizer::new(responses);

        let result = recognize_reading(&mut recognizer, &image(), &config()).unwrap();
        assert_eq!(recognizer.calls.len(), CATALOG.len() + 6);
        assert_eq!(result.strategy, SALVAGE_STRATEGY);
        assert_eq!(result.raw_text, "SYS 138 DIA 75");
        assert_eq!(result.reading.systolic, 138);
        assert_eq!(result.reading.diastolic, 75);
    }

    #[test]
    fn test_exhaustion_is_unrecognizable() {
        let mut recognizer = ScriptedRecognizer::new(Vec::new());
        let err = recognize_reading(&mut recognizer, &image(), &config()).unwrap_err();

        assert!(matches!(err, ReadingError::Unrecognizable));
        assert_eq!(recognizer.calls.len(), CATALOG.len() + 6);
    }

    #[test]
    fn test_unavailable_recognizer_aborts_run() {
        let mut recognizer = ScriptedRecognizer::new(vec![Err(
            ReadingError::RecognizerUnavailable("terminated".into()),
        )]);
        let err = recognize_reading(&mut recognizer, &image(), &config()).unwrap_err();

        assert!(matches!(err, ReadingError::RecognizerUnavailable(_)));
        assert_eq!(recognizer.calls.len(), 1);
    }

    #[test]
    fn test_not_ready_recognizer_is_never_called() {
        let mut recognizer = ScriptedRecognizer::texts(&["120/80"]);
        recognizer.ready = false;
        let err = recognize_reading(&mut recognizer, &image(), &config()).unwrap_err();

        assert!(matches!(err, ReadingError::RecognizerUnavailable(_)));
        assert!(recognizer.calls.is_empty());
    }

    #[test]
    fn test_empty_image_is_invalid_input() {
        let mut recognizer = ScriptedRecognizer::texts(&["120/80"]);
        let err = recognize_reading(&mut recognizer, &PixelBuffer::new(0, 0), &config())
            .unwrap_err();
        assert!(matches!(err, ReadingError::InvalidInput(_)));
    }
}
