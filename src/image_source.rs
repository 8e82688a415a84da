//! Loading and validating the source photo.

use std::fs;
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::config::ReaderConfig;
use crate::error::{ReadingError, Result};
use crate::ocr::PixelBuffer;

/// Reads `path` and decodes it into an RGBA buffer.
///
/// Missing, empty, oversized and non-image files are `InvalidInput`, as is a
/// decode that fails or runs past the configured decode timeout.
pub fn load_image(path: &Path, config: &ReaderConfig) -> Result<PixelBuffer> {
    let metadata = fs::metadata(path).map_err(|e| {
        ReadingError::InvalidInput(format!("cannot read {}: {}", path.display(), e))
    })?;
    if !metadata.is_file() {
        return Err(ReadingError::InvalidInput(format!(
            "{} is not a file",
            path.display()
        )));
    }
    check_size(metadata.len(), config.max_file_bytes)?;

    let bytes = fs::read(path)?;
    crate::log(&format!(
        "Loaded {} ({} bytes)",
        path.display(),
        bytes.len()
    ));
    decode_image(bytes, config)
}

/// Decodes in-memory image data with the same checks as `load_image`.
pub fn decode_image(bytes: Vec<u8>, config: &ReaderConfig) -> Result<PixelBuffer> {
    check_size(bytes.len() as u64, config.max_file_bytes)?;

    let format = image::guess_format(&bytes)
        .map_err(|_| ReadingError::InvalidInput("file is not a recognized image format".into()))?;

    let timeout = config.decode_timeout();
    let image = decode_with_timeout(bytes, format, timeout)?;
    if image.width() == 0 || image.height() == 0 {
        return Err(ReadingError::InvalidInput("image has no pixels".into()));
    }

    crate::log(&format!(
        "Decoded {:?} image: {}x{}",
        format,
        image.width(),
        image.height()
    ));
    Ok(image)
}

fn check_size(len: u64, max: u64) -> Result<()> {
    if len == 0 {
        return Err(ReadingError::InvalidInput("file is empty".into()));
    }
    if len > max {
        return Err(ReadingError::InvalidInput(format!(
            "file is {} bytes, limit is {}",
            len, max
        )));
    }
    Ok(())
}

/// Decodes on a worker thread. A decode that outlives `timeout` is abandoned.
fn decode_with_timeout(
    bytes: Vec<u8>,
    format: image::ImageFormat,
    timeout: Duration,
) -> Result<PixelBuffer> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let decoded = image::load_from_memory_with_format(&bytes, format).map(|img| img.to_rgba8());
        let _ = sender.send(decoded);
    });

    match receiver.recv_timeout(timeout) {
        Ok(Ok(image)) => Ok(image),
        Ok(Err(e)) => Err(ReadingError::InvalidInput(format!("cannot decode image: {}", e))),
        Err(_) => Err(ReadingError::InvalidInput(format!(
            "image decode timed out after {}s",
            timeout.as_secs()
        ))),
    }
}
