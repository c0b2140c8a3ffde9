//! Durable file storage for uploads and materialized results.
//!
//! Layout under the storage root:
//! - `raw/{sanitized filename}` - uploaded bytes, keyed by original filename
//! - `processed/{document id}.json` - materialized inference results

use std::io;
use std::path::{Path, PathBuf};

/// Sanitize a filename for safe storage on disk.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = sanitized.trim().trim_matches('_');

    // Cap length without splitting a multi-byte character.
    let mut end = trimmed.len().min(100);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    let capped = &trimmed[..end];
    if capped.is_empty() {
        "document".to_string()
    } else {
        capped.to_string()
    }
}

/// Lowercased extension of a filename, if any.
pub fn file_extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

/// File storage rooted at a configurable directory.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Open storage, creating the `raw/` and `processed/` areas if needed.
    pub fn new(root: &Path) -> io::Result<Self> {
        let storage = Self {
            root: root.to_path_buf(),
        };
        std::fs::create_dir_all(storage.raw_dir())?;
        std::fs::create_dir_all(storage.processed_dir())?;
        Ok(storage)
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("raw")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.root.join("processed")
    }

    /// Path of an uploaded file, keyed by its (sanitized) filename.
    pub fn raw_path(&self, filename: &str) -> PathBuf {
        self.raw_dir().join(sanitize_filename(filename))
    }

    /// Path of a materialized result, keyed by document id.
    pub fn result_path(&self, document_id: i64) -> PathBuf {
        self.processed_dir().join(format!("{document_id}.json"))
    }

    /// Persist uploaded bytes; returns the stored path.
    pub fn save_upload(&self, filename: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = self.raw_path(filename);
        std::fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Materialize an inference result as JSON text; returns the stored path.
    pub fn write_result(&self, document_id: i64, payload: &str) -> io::Result<PathBuf> {
        let path = self.result_path(document_id);
        std::fs::write(&path, payload)?;
        Ok(path)
    }

    /// Remove everything stored for a document.
    ///
    /// Errors propagate so a delete that could not remove the raw file is
    /// surfaced to the caller instead of silently orphaning it. A file that
    /// is already gone is not an error.
    pub fn remove_document_files(&self, filename: &str, document_id: i64) -> io::Result<()> {
        for path in [self.raw_path(filename), self.result_path(document_id)] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sanitize_strips_path_separators() {
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename(""), "document");
    }

    #[test]
    fn long_names_truncate_on_char_boundaries() {
        // 34 three-byte characters is 102 bytes; the cap lands mid-character
        // and must back up to the previous boundary.
        let name = "\u{65e5}".repeat(34);
        let sanitized = sanitize_filename(&name);
        assert_eq!(sanitized, "\u{65e5}".repeat(33));
        assert!(sanitized.len() <= 100);

        // ASCII cuts at exactly the cap.
        assert_eq!(sanitize_filename(&"a".repeat(150)).len(), 100);
    }

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(file_extension("Scan.PDF"), Some("pdf".to_string()));
        assert_eq!(file_extension("photo.jpeg"), Some("jpeg".to_string()));
        assert_eq!(file_extension("noext"), None);
    }

    #[test]
    fn save_and_remove_round_trip() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        let path = storage.save_upload("page.pdf", b"pdf bytes").unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"pdf bytes");

        let result = storage.write_result(7, "{\"ok\":true}").unwrap();
        assert!(result.exists());

        storage.remove_document_files("page.pdf", 7).unwrap();
        assert!(!path.exists());
        assert!(!result.exists());

        // Removing again is a no-op, not an error.
        storage.remove_document_files("page.pdf", 7).unwrap();
    }
}
