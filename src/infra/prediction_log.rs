// ============================================================
// Layer 6 - Prediction Log (request cache)
// ============================================================
// Durable, append-only record of every served prediction.
//
// File: <cache_dir>/predicted_cache.csv
//
//   Image_name, Image_path, Predicted_name, Predicted_alias, Probs, Best_prob, Predicted_id, Predicted_class
//   tabby.jpg,captured,catdog,Production,"[0.912, 0.088]",0.912,0,cat
//
// The file is opened on the first served prediction, and the
// header goes in only when that file is new or empty. A session
// whose requests were all rejected leaves no cache file behind.
// Appends from concurrent requests are serialised by a mutex
// around the file handle, so rows never interleave.
//
// Optionally every served image is also copied into a capture
// directory; Image_path then names that directory. A copy is
// kept only when its row was written, so the capture directory
// and the CSV describe the same requests.

use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;

use crate::domain::error::{Error, Result};
use crate::domain::prediction::PredictionRecord;

pub const CACHE_FILE: &str = "predicted_cache.csv";

const HEADER: &str =
    "Image_name, Image_path, Predicted_name, Predicted_alias, Probs, Best_prob, Predicted_id, Predicted_class";

pub struct PredictionLog {
    csv_path:    PathBuf,
    capture_dir: Option<PathBuf>,
    /// None until the first row is written
    file:        Mutex<Option<File>>,
}

impl PredictionLog {
    /// Prepare the cache in `cache_dir`. The CSV itself is created
    /// by the first [`record`](Self::record).
    pub fn open(cache_dir: impl AsRef<Path>, capture_dir: Option<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.as_ref();
        fs::create_dir_all(cache_dir).map_err(|e| Error::storage(cache_dir.display(), e))?;
        if let Some(dir) = &capture_dir {
            fs::create_dir_all(dir).map_err(|e| Error::storage(dir.display(), e))?;
        }

        Ok(Self { csv_path: cache_dir.join(CACHE_FILE), capture_dir, file: Mutex::new(None) })
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    /// Log one served prediction: capture the image (when enabled),
    /// then append the row. If the row cannot be written the copy
    /// is removed again. Storage failures are surfaced, never
    /// swallowed.
    pub fn record(&self, record: &PredictionRecord, image: &[u8]) -> Result<()> {
        let stored = self.capture(&record.image_name, image)?;
        if let Err(e) = self.append(record) {
            if let Some(path) = stored {
                if let Err(cleanup) = fs::remove_file(&path) {
                    tracing::warn!("Could not remove '{}': {}", path.display(), cleanup);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    fn append(&self, record: &PredictionRecord) -> Result<()> {
        let image_path = self
            .capture_dir
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_default();
        let row = format!(
            "{},{},{},{},\"{}\",{},{},{}",
            csv_field(&record.image_name),
            csv_field(&image_path),
            csv_field(&record.model.name),
            csv_field(&record.model.alias),
            format_probs(&record.probs),
            record.best_prob,
            record.predicted_id,
            csv_field(&record.predicted_class),
        );

        let mut guard = self.file.lock();
        let file = match guard.take() {
            Some(file) => file,
            None => self.create()?,
        };
        let file = guard.insert(file);
        writeln!(file, "{row}")
            .and_then(|_| file.flush())
            .map_err(|e| Error::storage(self.csv_path.display(), e))
    }

    fn create(&self) -> Result<File> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.csv_path)
            .map_err(|e| Error::storage(self.csv_path.display(), e))?;
        let empty = file
            .metadata()
            .map_err(|e| Error::storage(self.csv_path.display(), e))?
            .len()
            == 0;
        if empty {
            writeln!(file, "{HEADER}").map_err(|e| Error::storage(self.csv_path.display(), e))?;
            tracing::debug!("Created prediction cache '{}'", self.csv_path.display());
        }
        Ok(file)
    }

    /// Store a copy of a submitted image. Returns the stored path,
    /// or None when capture is disabled.
    fn capture(&self, image_name: &str, bytes: &[u8]) -> Result<Option<PathBuf>> {
        let Some(dir) = &self.capture_dir else {
            return Ok(None);
        };
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f");
        let path = dir.join(format!("{stamp}_{}", sanitize_file_name(image_name)));
        fs::write(&path, bytes).map_err(|e| Error::storage(path.display(), e))?;
        tracing::debug!("Captured request image to '{}'", path.display());
        Ok(Some(path))
    }
}

/// `[0.912, 0.088]`
fn format_probs(probs: &[f32]) -> String {
    let parts: Vec<String> = probs.iter().map(|p| p.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

/// Quote a field when it would break the row.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Keep only the final path component and replace anything that
/// is not a plain file-name character.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() { "image".to_string() } else { cleaned.to_string() }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::prediction::ModelIdentity;
    use chrono::Utc;
    use std::sync::Arc;

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("catdog-{tag}-{}", rand::random::<u64>()))
    }

    fn record(name: &str) -> PredictionRecord {
        PredictionRecord {
            image_name:      name.into(),
            probs:           vec![0.25, 0.75],
            best_prob:       0.75,
            predicted_id:    1,
            predicted_class: "dog".into(),
            model:           ModelIdentity::new("catdog", "Production"),
            timestamp:       Utc::now(),
        }
    }

    #[test]
    fn header_written_once_and_rows_appended() {
        let dir = temp_dir("cache");
        let log = PredictionLog::open(&dir, None).unwrap();
        log.record(&record("a.jpg"), b"a").unwrap();
        drop(log);

        let log = PredictionLog::open(&dir, None).unwrap();
        log.record(&record("b.jpg"), b"b").unwrap();

        let text = fs::read_to_string(log.csv_path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[1], "a.jpg,,catdog,Production,\"[0.25, 0.75]\",0.75,1,dog");
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn no_file_until_a_row_is_written() {
        let dir = temp_dir("cache-lazy");
        let log = PredictionLog::open(&dir, None).unwrap();
        assert!(dir.is_dir());
        assert!(!log.csv_path().exists());
        drop(log);

        // an empty file left by something else still gets a header
        fs::write(dir.join(CACHE_FILE), "").unwrap();
        let log = PredictionLog::open(&dir, None).unwrap();
        log.record(&record("c.jpg"), b"c").unwrap();
        let text = fs::read_to_string(log.csv_path()).unwrap();
        assert_eq!(text.lines().next(), Some(HEADER));
        assert_eq!(text.lines().count(), 2);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn capture_is_rolled_back_when_the_row_fails() {
        let dir = temp_dir("cache-rollback");
        let captured = dir.join("captured");
        let log = PredictionLog::open(dir.join("cache"), Some(captured.clone())).unwrap();
        // a directory where the CSV should be makes every append fail
        fs::create_dir_all(log.csv_path()).unwrap();

        let err = log.record(&record("d.jpg"), b"d").unwrap_err();
        assert!(matches!(err, Error::StorageFailure(_)), "{err}");
        assert_eq!(fs::read_dir(&captured).unwrap().count(), 0);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn concurrent_appends_do_not_interleave() {
        let dir = temp_dir("cache-mt");
        let log = Arc::new(PredictionLog::open(&dir, None).unwrap());
        std::thread::scope(|s| {
            for t in 0..4 {
                let log = Arc::clone(&log);
                s.spawn(move || {
                    for i in 0..25 {
                        log.record(&record(&format!("t{t}-{i}.png")), b"x").unwrap();
                    }
                });
            }
        });

        let text = fs::read_to_string(log.csv_path()).unwrap();
        let rows: Vec<&str> = text.lines().skip(1).collect();
        assert_eq!(rows.len(), 100);
        assert!(rows.iter().all(|r| r.ends_with(",0.75,1,dog")));
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn capture_stores_sanitized_copy() {
        let dir = temp_dir("capture");
        let log = PredictionLog::open(dir.join("cache"), Some(dir.join("captured"))).unwrap();
        let stored = log.capture("../../etc/my cat.jpg", b"bytes").unwrap().unwrap();

        assert!(stored.starts_with(dir.join("captured")));
        assert!(stored.file_name().unwrap().to_str().unwrap().ends_with("_my_cat.jpg"));
        assert_eq!(fs::read(&stored).unwrap(), b"bytes");
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn fields_with_commas_are_quoted() {
        assert_eq!(csv_field("plain.jpg"), "plain.jpg");
        assert_eq!(csv_field("a,b.jpg"), "\"a,b.jpg\"");
        assert_eq!(sanitize_file_name("..."), "image");
    }
}
