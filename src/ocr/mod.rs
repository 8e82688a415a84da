pub mod engine;
pub mod extract;
pub mod orchestrator;
pub mod preprocess;
pub mod score;
pub mod setup;
pub mod strategy;

pub use engine::{
    EngineMode, RecognitionHints, RecognitionResult, Recognizer, SegmentationMode,
    TesseractRecognizer,
};
pub use extract::{
    extract_pulse, is_valid_blood_pressure, parse_reading, BloodPressureReading, ParseMode,
};
pub use orchestrator::{recognize_reading, RecognizedReading};
pub use preprocess::{PixelBuffer, UpscaleTargets};
pub use score::score_candidate;
pub use setup::{ensure_tesseract, TesseractPaths};
pub use strategy::{StrategyDescriptor, CATALOG};
