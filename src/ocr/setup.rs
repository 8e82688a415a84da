use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::ReaderConfig;
use crate::log;
use crate::paths::{get_bundled_tesseract_dir, get_user_tesseract_dir};

const TESSDATA_REPO: &str = "https://github.com/tesseract-ocr/tessdata/raw/main";

/// Download timeout for language data.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[cfg(windows)]
const EXECUTABLE_NAME: &str = "tesseract.exe";
#[cfg(not(windows))]
const EXECUTABLE_NAME: &str = "tesseract";

const COMMON_EXECUTABLE_PATHS: &[&str] = &[
    r"C:\Program Files\Tesseract-OCR\tesseract.exe",
    r"C:\Program Files (x86)\Tesseract-OCR\tesseract.exe",
    "/usr/bin/tesseract",
    "/usr/local/bin/tesseract",
    "/opt/homebrew/bin/tesseract",
];

const SYSTEM_TESSDATA_PATHS: &[&str] = &[
    r"C:\Program Files\Tesseract-OCR\tessdata",
    r"C:\Program Files (x86)\Tesseract-OCR\tessdata",
    "/usr/share/tesseract-ocr/5/tessdata",
    "/usr/share/tesseract-ocr/4.00/tessdata",
    "/usr/share/tessdata",
    "/usr/local/share/tessdata",
    "/opt/homebrew/share/tessdata",
];

#[derive(Debug, Clone)]
pub struct TesseractPaths {
    pub executable: PathBuf,
    pub tessdata: PathBuf,
}

/// Locates tesseract and its language data. Downloads the language data
/// into the per-user directory if it is missing and downloads are enabled.
pub fn ensure_tesseract(config: &ReaderConfig) -> Result<TesseractPaths> {
    let executable = find_tesseract_executable(config)?;
    log(&format!("Tesseract executable: {}", executable.display()));

    let tessdata = match find_tessdata_dir(config) {
        Ok(dir) => dir,
        Err(e) if config.download_language_data && config.tessdata_dir.is_none() => {
            log(&format!("{}. Downloading language data...", e));
            let target = get_user_tesseract_dir().join("tessdata");
            download_tessdata(&target, &config.language)?;
            target
        }
        Err(e) => return Err(e),
    };

    Ok(TesseractPaths {
        executable,
        tessdata,
    })
}

/// Returns true if `dir` holds trained data for `language`.
fn has_language(dir: &Path, language: &str) -> bool {
    dir.join(format!("{}.traineddata", language)).is_file()
}

/// Finds the Tesseract executable: config override, bundled dir, PATH, then
/// common install locations.
pub fn find_tesseract_executable(config: &ReaderConfig) -> Result<PathBuf> {
    if let Some(path) = &config.tesseract_executable {
        if path.is_file() {
            return Ok(path.clone());
        }
        return Err(anyhow!(
            "Configured tesseract executable not found: {}",
            path.display()
        ));
    }

    let bundled = get_bundled_tesseract_dir().join(EXECUTABLE_NAME);
    if bundled.is_file() {
        return Ok(bundled);
    }

    // Check PATH
    if let Ok(output) = std::process::Command::new("tesseract")
        .arg("--version")
        .output()
    {
        if output.status.success() {
            return Ok(PathBuf::from("tesseract"));
        }
    }

    COMMON_EXECUTABLE_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
        .ok_or_else(|| {
            anyhow!(
                "Tesseract not found. Install Tesseract-OCR, add it to PATH, or copy it to {}",
                get_bundled_tesseract_dir().display()
            )
        })
}

/// Finds a tessdata directory containing the configured language.
pub fn find_tessdata_dir(config: &ReaderConfig) -> Result<PathBuf> {
    let language = &config.language;

    if let Some(dir) = &config.tessdata_dir {
        if has_language(dir, language) {
            return Ok(dir.clone());
        }
        return Err(anyhow!(
            "Configured tessdata directory {} has no {}.traineddata",
            dir.display(),
            language
        ));
    }

    let mut candidates = vec![
        get_bundled_tesseract_dir().join("tessdata"),
        get_user_tesseract_dir().join("tessdata"),
    ];

    // Check TESSDATA_PREFIX environment variable
    if let Ok(prefix) = std::env::var("TESSDATA_PREFIX") {
        let prefix = PathBuf::from(prefix);
        candidates.push(prefix.join("tessdata"));
        candidates.push(prefix);
    }

    candidates.extend(SYSTEM_TESSDATA_PATHS.iter().map(PathBuf::from));

    candidates
        .into_iter()
        .find(|dir| has_language(dir, language))
        .ok_or_else(|| anyhow!("No tessdata directory with {}.traineddata found", language))
}

/// Downloads `<language>.traineddata` into `tessdata_dir`.
fn download_tessdata(tessdata_dir: &Path, language: &str) -> Result<()> {
    fs::create_dir_all(tessdata_dir)
        .with_context(|| format!("Failed to create {}", tessdata_dir.display()))?;

    let url = format!("{}/{}.traineddata", TESSDATA_REPO, language);
    let path = tessdata_dir.join(format!("{}.traineddata", language));

    log(&format!("Downloading {}...", url));

    let client = reqwest::blocking::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()?;

    let response = client
        .get(&url)
        .header("User-Agent", "bp-reader")
        .send()?;

    if !response.status().is_success() {
        return Err(anyhow!(
            "Failed to download {}.traineddata: HTTP {}",
            language,
            response.status()
        ));
    }

    let bytes = response.bytes()?;

    // Write to a sibling file first so a partial download is never picked up
    let partial = path.with_extension("traineddata.part");
    let mut file = fs::File::create(&partial)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&partial, &path)?;

    log(&format!(
        "Downloaded {}.traineddata ({} bytes)",
        language,
        bytes.len()
    ));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_has_language() {
        let dir = tempdir().unwrap();
        assert!(!has_language(dir.path(), "eng"));

        fs::write(dir.path().join("eng.traineddata"), b"data").unwrap();
        assert!(has_language(dir.path(), "eng"));
        assert!(!has_language(dir.path(), "jpn"));
    }

    #[test]
    fn test_configured_tessdata_dir() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("eng.traineddata"), b"data").unwrap();

        let config = ReaderConfig {
            tessdata_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        assert_eq!(find_tessdata_dir(&config).unwrap(), dir.path());
    }

    #[test]
    fn test_configured_tessdata_dir_without_language_fails() {
        let dir = tempdir().unwrap();
        let config = ReaderConfig {
            tessdata_dir: Some(dir.path().to_path_buf()),
            language: "xyz".to_string(),
            ..Default::default()
        };
        let err = find_tessdata_dir(&config).unwrap_err();
        assert!(err.to_string().contains("xyz.traineddata"));
    }

    #[test]
    fn test_configured_executable() {
        let dir = tempdir().unwrap();
        let exe = dir.path().join("tesseract-custom");
        fs::write(&exe, b"").unwrap();

        let config = ReaderConfig {
            tesseract_executable: Some(exe.clone()),
            ..Default::default()
        };
        assert_eq!(find_tesseract_executable(&config).unwrap(), exe);

        let missing = ReaderConfig {
            tesseract_executable: Some(dir.path().join("nope")),
            ..Default::default()
        };
        assert!(find_tesseract_executable(&missing).is_err());
    }

    #[test]
    fn test_configured_dirs_skip_download() {
        let exe_dir = tempdir().unwrap();
        let exe = exe_dir.path().join("tesseract-custom");
        fs::write(&exe, b"").unwrap();
        let empty_tessdata = tempdir().unwrap();

        // An explicit tessdata dir is never replaced by a download
        let config = ReaderConfig {
            tesseract_executable: Some(exe),
            tessdata_dir: Some(empty_tessdata.path().to_path_buf()),
            download_language_data: true,
            ..Default::default()
        };
        assert!(ensure_tesseract(&config).is_err());
    }
}
