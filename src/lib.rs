//! Blood pressure reader
//!
//! Extracts systolic, diastolic and pulse values from a photo of a digital
//! blood pressure monitor. The photo goes through a fixed catalog of
//! preprocessing strategies, each result is run through tesseract, and the
//! recognized text is parsed and scored to pick a reading.

pub mod analysis;
pub mod config;
pub mod error;
pub mod image_source;
pub mod ocr;
pub mod paths;

pub use config::ReaderConfig;
pub use error::{ReadingError, Result};
pub use ocr::{recognize_reading, BloodPressureReading, RecognizedReading, TesseractRecognizer};

use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;

/// Logs a message to stderr and, once the logs directory exists, to the log
/// file, with a timestamp.
pub fn log(msg: &str) {
    let timestamp = Local::now().format("%H:%M:%S%.3f");
    let line = format!("[{}] {}\n", timestamp, msg);
    eprint!("{}", line);

    let logs_dir = paths::get_logs_dir();
    if !logs_dir.is_dir() {
        return;
    }
    if let Ok(mut file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(logs_dir.join("bp_reader.log"))
    {
        let _ = file.write_all(line.as_bytes());
    }
}
