use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

use super::preprocess::PixelBuffer;
use super::setup::{ensure_tesseract, TesseractPaths};
use crate::config::ReaderConfig;
use crate::error::{ReadingError, Result};

/// How often a running tesseract process is polled for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Tesseract page segmentation modes used by the strategy catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentationMode {
    /// Single uniform block of text (psm 6)
    SingleBlock,
    /// Single text line (psm 7)
    SingleLine,
    /// Single word (psm 8)
    SingleWord,
    /// Sparse text, no particular order (psm 11)
    SparseText,
    /// Sparse text with orientation detection (psm 12)
    SparseTextOsd,
}

impl SegmentationMode {
    pub fn psm(self) -> u8 {
        match self {
            SegmentationMode::SingleBlock => 6,
            SegmentationMode::SingleLine => 7,
            SegmentationMode::SingleWord => 8,
            SegmentationMode::SparseText => 11,
            SegmentationMode::SparseTextOsd => 12,
        }
    }
}

/// Tesseract OCR engine modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    Legacy,
    LstmOnly,
    LegacyAndLstm,
    Default,
}

impl EngineMode {
    pub fn oem(self) -> u8 {
        match self {
            EngineMode::Legacy => 0,
            EngineMode::LstmOnly => 1,
            EngineMode::LegacyAndLstm => 2,
            EngineMode::Default => 3,
        }
    }
}

/// Optional parameters passed to the recognizer alongside the image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecognitionHints {
    pub character_whitelist: Option<String>,
    pub segmentation_mode: Option<SegmentationMode>,
    pub engine_mode: Option<EngineMode>,
}

impl RecognitionHints {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.character_whitelist.is_none()
            && self.segmentation_mode.is_none()
            && self.engine_mode.is_none()
    }

    /// Hint sets to try in order when the engine rejects the previous one:
    /// the full set, the whitelist alone, then no hints at all.
    pub fn degradation_chain(&self) -> Vec<RecognitionHints> {
        let mut chain = vec![self.clone()];
        if let Some(whitelist) = &self.character_whitelist {
            let whitelist_only = RecognitionHints {
                character_whitelist: Some(whitelist.clone()),
                ..Default::default()
            };
            if whitelist_only != *self {
                chain.push(whitelist_only);
            }
        }
        if !self.is_empty() {
            chain.push(RecognitionHints::none());
        }
        chain
    }
}

/// Text returned by the recognizer with its mean confidence (0 to 100).
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub text: String,
    pub confidence: f32,
}

/// External text recognition capability.
///
/// Implementations are used serially; `&mut self` keeps a single instance
/// from being invoked concurrently with itself.
pub trait Recognizer {
    /// False before startup has completed or after termination.
    fn is_ready(&self) -> bool;

    /// Recognizes text in `image`, giving up after `timeout`.
    ///
    /// Must return `RecognizerUnavailable` when called while not ready.
    fn recognize(
        &mut self,
        image: &PixelBuffer,
        hints: &RecognitionHints,
        timeout: Duration,
    ) -> Result<RecognitionResult>;
}

/// Represents a line of OCR text
#[derive(Debug, Clone)]
pub struct OcrLine {
    pub text: String,
    pub words: Vec<OcrWord>,
}

/// Represents a single word from OCR with confidence score
#[derive(Debug, Clone)]
pub struct OcrWord {
    pub text: String,
    pub confidence: f32,
}

/// Recognizer backed by the tesseract command line tool.
pub struct TesseractRecognizer {
    config: ReaderConfig,
    paths: Option<TesseractPaths>,
}

impl TesseractRecognizer {
    /// Creates a recognizer that is not ready until `initialize()` succeeds.
    pub fn new(config: &ReaderConfig) -> Self {
        Self {
            config: config.clone(),
            paths: None,
        }
    }

    /// Locates tesseract and its language data, downloading the data if
    /// allowed. Bounded by the configured startup timeout.
    pub fn initialize(&mut self) -> Result<()> {
        self.paths = None;

        let timeout = self.config.startup_timeout();
        let config = self.config.clone();
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let _ = sender.send(ensure_tesseract(&config));
        });

        match receiver.recv_timeout(timeout) {
            Ok(Ok(paths)) => {
                crate::log(&format!(
                    "Tesseract ready: {} (tessdata {})",
                    paths.executable.display(),
                    paths.tessdata.display()
                ));
                self.paths = Some(paths);
                Ok(())
            }
            Ok(Err(e)) => Err(ReadingError::RecognizerUnavailable(format!(
                "tesseract initialization failed: {:#}",
                e
            ))),
            Err(_) => Err(ReadingError::Timeout {
                operation: "recognizer startup",
                after: timeout,
            }),
        }
    }

    /// Returns the recognizer to the not-ready state.
    pub fn terminate(&mut self) {
        if self.paths.take().is_some() {
            crate::log("Tesseract recognizer terminated");
        }
    }

    fn recognize_once(
        &self,
        paths: &TesseractPaths,
        image: &PixelBuffer,
        hints: &RecognitionHints,
        timeout: Duration,
    ) -> Result<RecognitionResult> {
        // Save image to temporary file
        let temp_input = NamedTempFile::with_suffix(".png")?;
        image.save(temp_input.path())?;

        // Tesseract appends .tsv to the output base
        let temp_output = NamedTempFile::new()?;
        let output_base = temp_output.path().to_string_lossy().to_string();

        let mut command = Command::new(&paths.executable);
        command
            .arg(temp_input.path())
            .arg(&output_base)
            .arg("--tessdata-dir")
            .arg(&paths.tessdata)
            .arg("-l")
            .arg(&self.config.language);
        if let Some(mode) = hints.segmentation_mode {
            command.arg("--psm").arg(mode.psm().to_string());
        }
        if let Some(mode) = hints.engine_mode {
            command.arg("--oem").arg(mode.oem().to_string());
        }
        if let Some(whitelist) = &hints.character_whitelist {
            command
                .arg("-c")
                .arg(format!("tessedit_char_whitelist={}", whitelist));
        }
        command
            .arg("tsv")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let child = command.spawn()?;
        let (success, stderr) = wait_with_timeout(child, timeout)?;
        let tsv_path = format!("{}.tsv", output_base);
        if !success {
            let _ = std::fs::remove_file(&tsv_path);
            return Err(ReadingError::Recognition(format!(
                "tesseract failed: {}",
                stderr.trim()
            )));
        }

        let tsv_content = std::fs::read_to_string(&tsv_path).map_err(|e| {
            ReadingError::Recognition(format!("failed to read tesseract output: {}", e))
        })?;
        let _ = std::fs::remove_file(&tsv_path);

        let lines = parse_tsv_output(&tsv_content);
        let result = lines_to_result(&lines);
        if result.text.trim().is_empty() {
            return Err(ReadingError::EmptyText);
        }
        Ok(result)
    }
}

impl Recognizer for TesseractRecognizer {
    fn is_ready(&self) -> bool {
        self.paths.is_some()
    }

    fn recognize(
        &mut self,
        image: &PixelBuffer,
        hints: &RecognitionHints,
        timeout: Duration,
    ) -> Result<RecognitionResult> {
        let paths = self.paths.as_ref().ok_or_else(|| {
            ReadingError::RecognizerUnavailable("call initialize() before recognizing".into())
        })?;

        let chain = hints.degradation_chain();
        let mut last_error = ReadingError::EmptyText;
        for (attempt, attempt_hints) in chain.iter().enumerate() {
            if attempt > 0 {
                crate::log(&format!(
                    "Retrying recognition with narrower hints: {:?}",
                    attempt_hints
                ));
            }
            match self.recognize_once(paths, image, attempt_hints, timeout) {
                Ok(result) => return Ok(result),
                // Only argument rejections are worth retrying with fewer hints
                Err(ReadingError::Recognition(message)) => {
                    crate::log(&format!("Tesseract rejected hints: {}", message));
                    last_error = ReadingError::Recognition(message);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error)
    }
}

/// Waits for `child` to exit, killing it once `timeout` has elapsed.
/// Returns whether it exited successfully and what it wrote to stderr.
///
/// Stderr is drained on a separate thread so a chatty process cannot fill
/// the pipe and block before exiting.
fn wait_with_timeout(mut child: Child, timeout: Duration) -> Result<(bool, String)> {
    let stderr_reader = child.stderr.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    });

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            let stderr = stderr_reader
                .and_then(|reader| reader.join().ok())
                .unwrap_or_default();
            return Ok((status.success(), stderr));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ReadingError::Timeout {
                operation: "recognition",
                after: timeout,
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Joins OCR lines into one text block with the mean word confidence.
fn lines_to_result(lines: &[OcrLine]) -> RecognitionResult {
    let text = lines
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let (sum, count) = lines
        .iter()
        .flat_map(|l| l.words.iter())
        .fold((0.0f32, 0usize), |(sum, count), w| (sum + w.confidence, count + 1));
    let confidence = if count > 0 { sum / count as f32 } else { 0.0 };

    RecognitionResult { text, confidence }
}

/// Parses Tesseract TSV output into structured OcrLine data
fn parse_tsv_output(tsv: &str) -> Vec<OcrLine> {
    let mut lines: Vec<OcrLine> = Vec::new();
    let mut current_key: Option<(i32, i32, i32)> = None;
    let mut current_words: Vec<OcrWord> = Vec::new();

    let mut flush = |words: &mut Vec<OcrWord>| {
        if words.is_empty() {
            return;
        }
        let text = words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        lines.push(OcrLine {
            text,
            words: std::mem::take(words),
        });
    };

    for line in tsv.lines().skip(1) {
        // Skip header
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        // TSV fields: level, page_num, block_num, par_num, line_num, word_num,
        //             left, top, width, height, conf, text
        let level: i32 = fields[0].parse().unwrap_or(-1);
        let block_num: i32 = fields[2].parse().unwrap_or(-1);
        let par_num: i32 = fields[3].parse().unwrap_or(-1);
        let line_num: i32 = fields[4].parse().unwrap_or(-1);
        let conf: f32 = fields[10].trim().parse().unwrap_or(-1.0);
        let text = fields[11].trim();

        // Level 5 = word
        if level != 5 || text.is_empty() {
            continue;
        }

        let key = (block_num, par_num, line_num);
        if current_key.is_some_and(|k| k != key) {
            flush(&mut current_words);
        }
        current_key = Some(key);

        if conf >= 0.0 {
            current_words.push(OcrWord {
                text: text.to_string(),
                confidence: conf,
            });
        }
    }

    // Don't forget the last line
    flush(&mut current_words);

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn word(block: i32, line: i32, conf: &str, text: &str) -> String {
        format!("5\t1\t{}\t1\t{}\t1\t0\t0\t10\t10\t{}\t{}", block, line, conf, text)
    }

    #[test]
    fn test_parse_tsv_groups_lines() {
        let tsv = [
            HEADER.to_string(),
            "1\t1\t0\t0\t0\t0\t0\t0\t100\t100\t-1\t".to_string(),
            word(1, 1, "90", "SYS"),
            word(1, 1, "80", "138"),
            word(1, 2, "70", "DIA"),
            word(1, 2, "60", "75"),
            word(2, 2, "50", "PULSE"),
        ]
        .join("\n");

        let lines = parse_tsv_output(&tsv);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].text, "SYS 138");
        assert_eq!(lines[0].words.len(), 2);
        assert_eq!(lines[0].words[1].confidence, 80.0);
        assert_eq!(lines[1].text, "DIA 75");
        // Same line number in a different block is a new line
        assert_eq!(lines[2].text, "PULSE");
    }

    #[test]
    fn test_parse_tsv_skips_negative_confidence_and_blank_words() {
        let tsv = [
            HEADER.to_string(),
            word(1, 1, "-1", "noise"),
            word(1, 1, "91.5", "120"),
            word(1, 1, "88", "  "),
            "garbage line".to_string(),
        ]
        .join("\n");

        let lines = parse_tsv_output(&tsv);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "120");
        assert_eq!(lines[0].words.len(), 1);
    }

    #[test]
    fn test_lines_to_result_mean_confidence() {
        let tsv = [
            HEADER.to_string(),
            word(1, 1, "90", "138/75"),
            word(1, 2, "60", "68"),
            word(1, 2, "30", "mmHg"),
        ]
        .join("\n");

        let result = lines_to_result(&parse_tsv_output(&tsv));
        assert_eq!(result.text, "138/75\n68 mmHg");
        assert!((result.confidence - 60.0).abs() < 0.001);

        let empty = lines_to_result(&[]);
        assert_eq!(empty.text, "");
        assert_eq!(empty.confidence, 0.0);
    }

    #[test]
    fn test_degradation_chain_full_hints() {
        let hints = RecognitionHints {
            character_whitelist: Some("0123456789".into()),
            segmentation_mode: Some(SegmentationMode::SingleBlock),
            engine_mode: Some(EngineMode::LstmOnly),
        };
        let chain = hints.degradation_chain();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0], hints);
        assert_eq!(chain[1].character_whitelist.as_deref(), Some("0123456789"));
        assert!(chain[1].segmentation_mode.is_none());
        assert!(chain[2].is_empty());
    }

    #[test]
    fn test_degradation_chain_short_forms() {
        let whitelist_only = RecognitionHints {
            character_whitelist: Some("0123456789".into()),
            ..Default::default()
        };
        assert_eq!(whitelist_only.degradation_chain().len(), 2);

        let psm_only = RecognitionHints {
            segmentation_mode: Some(SegmentationMode::SingleWord),
            ..Default::default()
        };
        assert_eq!(psm_only.degradation_chain().len(), 2);

        assert_eq!(RecognitionHints::none().degradation_chain().len(), 1);
    }

    #[test]
    fn test_mode_codes() {
        assert_eq!(SegmentationMode::SingleBlock.psm(), 6);
        assert_eq!(SegmentationMode::SparseTextOsd.psm(), 12);
        assert_eq!(EngineMode::LstmOnly.oem(), 1);
    }

    #[test]
    fn test_uninitialized_recognizer_is_not_ready() {
        let mut recognizer = TesseractRecognizer::new(&ReaderConfig::default());
        assert!(!recognizer.is_ready());

        let image = PixelBuffer::new(4, 4);
        let err = recognizer
            .recognize(&image, &RecognitionHints::none(), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ReadingError::RecognizerUnavailable(_)));

        recognizer.terminate();
        assert!(!recognizer.is_ready());
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_with_timeout_kills_slow_process() {
        let child = Command::new("sleep")
            .arg("5")
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let started = Instant::now();
        let err = wait_with_timeout(child, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, ReadingError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_with_timeout_reports_exit_status() {
        let child = Command::new("sh")
            .arg("-c")
            .arg("echo bad psm >&2; exit 1")
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let (success, stderr) = wait_with_timeout(child, Duration::from_secs(5)).unwrap();
        assert!(!success);
        assert_eq!(stderr.trim(), "bad psm");
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_with_timeout_drains_large_stderr() {
        let child = Command::new("sh")
            .arg("-c")
            .arg("head -c 200000 /dev/zero | tr '\\0' w >&2; exit 0")
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let (success, stderr) = wait_with_timeout(child, Duration::from_secs(10)).unwrap();
        assert!(success);
        assert_eq!(stderr.len(), 200_000);
    }

    /// A recognizer whose executable is a shell script that logs each
    /// invocation's arguments to `calls.log` and then runs `body`.
    #[cfg(unix)]
    fn scripted_recognizer(dir: &std::path::Path, body: &str) -> TesseractRecognizer {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("tesseract");
        let log = dir.join("calls.log");
        let content = format!("#!/bin/sh\necho \"$*\" >> \"{}\"\n{}\n", log.display(), body);
        std::fs::write(&script, content).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut recognizer = TesseractRecognizer::new(&ReaderConfig::default());
        recognizer.paths = Some(TesseractPaths {
            executable: script,
            tessdata: dir.to_path_buf(),
        });
        recognizer
    }

    #[cfg(unix)]
    fn logged_calls(dir: &std::path::Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[cfg(unix)]
    const REJECT_MODES: &str = r#"for arg in "$@"; do
  case "$arg" in --psm|--oem) echo "unsupported $arg" >&2; exit 1;; esac
done
printf 'header\n5\t1\t1\t1\t1\t1\t0\t0\t10\t10\t90\t138/75\n' > "$2.tsv""#;

    #[cfg(unix)]
    fn full_hints() -> RecognitionHints {
        RecognitionHints {
            character_whitelist: Some("0123456789/".into()),
            segmentation_mode: Some(SegmentationMode::SingleBlock),
            engine_mode: Some(EngineMode::LstmOnly),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_recognize_retries_with_whitelist_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut recognizer = scripted_recognizer(dir.path(), REJECT_MODES);
        assert!(recognizer.is_ready());

        let result = recognizer
            .recognize(&PixelBuffer::new(4, 4), &full_hints(), Duration::from_secs(10))
            .unwrap();
        assert_eq!(result.text, "138/75");
        assert_eq!(result.confidence, 90.0);

        let calls = logged_calls(dir.path());
        assert_eq!(calls.len(), 2);
        assert!(calls[0].contains("--psm 6"));
        assert!(calls[0].contains("--oem 1"));
        assert!(!calls[1].contains("--psm"));
        assert!(!calls[1].contains("--oem"));
        assert!(calls[1].contains("tessedit_char_whitelist=0123456789/"));
    }

    #[cfg(unix)]
    #[test]
    fn test_recognize_returns_last_error_when_chain_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let mut recognizer = scripted_recognizer(dir.path(), "echo broken >&2; exit 1");

        let err = recognizer
            .recognize(&PixelBuffer::new(4, 4), &full_hints(), Duration::from_secs(10))
            .unwrap_err();
        match err {
            ReadingError::Recognition(message) => assert!(message.contains("broken")),
            other => panic!("expected a recognition error, got {:?}", other),
        }
        // Full hints, whitelist only, no hints
        assert_eq!(logged_calls(dir.path()).len(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn test_recognize_does_not_retry_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut recognizer = scripted_recognizer(dir.path(), "sleep 5");

        let started = Instant::now();
        let err = recognizer
            .recognize(&PixelBuffer::new(4, 4), &full_hints(), Duration::from_millis(300))
            .unwrap_err();
        assert!(matches!(err, ReadingError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(logged_calls(dir.path()).len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_recognize_blank_output_is_empty_text() {
        let dir = tempfile::tempdir().unwrap();
        let mut recognizer =
            scripted_recognizer(dir.path(), r#"printf 'header\n' > "$2.tsv""#);

        let err = recognizer
            .recognize(&PixelBuffer::new(4, 4), &full_hints(), Duration::from_secs(10))
            .unwrap_err();
        assert!(matches!(err, ReadingError::EmptyText));
        assert_eq!(logged_calls(dir.path()).len(), 1);
    }
}
