//! Lookup input loaders.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::info;

use crate::error::{RemediationError, RemediationResult};

/// Source of `(id, fragment)` pairs.
pub trait Loader: Send + Sync {
    /// Produce every entry.
    fn load(&self) -> RemediationResult<Vec<(String, String)>>;
}

/// Line-oriented file loader.
///
/// Skips the first `skip` lines, then keeps every line that matches
/// `pattern` in full, taking capture group 1 as the id and group 2 as the fragment.
#[derive(Debug, Clone)]
pub struct FileLoader {
    path: PathBuf,
    pattern: Regex,
    skip: usize,
}

impl FileLoader {
    /// Create a loader, compiling `pattern`.
    pub fn new(path: impl AsRef<Path>, pattern: &str, skip: usize) -> RemediationResult<Self> {
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            pattern: Regex::new(&format!("^(?:{pattern})$"))?,
            skip,
        })
    }

    fn io_error(&self, source: std::io::Error) -> RemediationError {
        RemediationError::LookupLoad {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl Loader for FileLoader {
    fn load(&self) -> RemediationResult<Vec<(String, String)>> {
        info!(
            path = %self.path.display(),
            pattern = %self.pattern,
            skip = self.skip,
            "loading lookup input"
        );

        let file = File::open(&self.path).map_err(|e| self.io_error(e))?;
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines().skip(self.skip) {
            let line = line.map_err(|e| self.io_error(e))?;
            let Some(captures) = self.pattern.captures(&line) else {
                continue;
            };
            if let (Some(id), Some(fragment)) = (captures.get(1), captures.get(2)) {
                entries.push((id.as_str().to_owned(), fragment.as_str().to_owned()));
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::lookup::LookupTable;

    const DEFAULT_PATTERN: &str = r"^\d+ : (\d+) .*:(\d+)$";

    fn write_input(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        for line in lines {
            writeln!(file, "{line}").expect("write line");
        }
        file
    }

    #[test]
    fn test_should_load_matching_lines_after_skip() {
        let file = write_input(&[
            "OBJECT_ID : NSS",
            "---------",
            "1 : 400171120 urn-3:HUL.DRS.OBJECT:12887296",
            "2 : 400171121 urn-3:HUL.DRS.OBJECT:12887297",
            "garbage line",
        ]);
        let loader = FileLoader::new(file.path(), DEFAULT_PATTERN, 2).expect("loader");
        let entries = loader.load().expect("load");
        assert_eq!(
            entries,
            vec![
                ("400171120".to_owned(), "12887296".to_owned()),
                ("400171121".to_owned(), "12887297".to_owned()),
            ]
        );

        let table = LookupTable::load(&loader).expect("table");
        assert_eq!(table.get("400171121"), Some("12887297"));
    }

    #[test]
    fn test_should_skip_header_lines_even_if_they_match() {
        let file = write_input(&["1 : 5 x:6", "2 : 7 x:8"]);
        let loader = FileLoader::new(file.path(), DEFAULT_PATTERN, 1).expect("loader");
        assert_eq!(
            loader.load().expect("load"),
            vec![("7".to_owned(), "8".to_owned())]
        );
    }

    #[test]
    fn test_should_require_full_line_match() {
        let file = write_input(&["5:6 trailing"]);
        let loader = FileLoader::new(file.path(), r"(\d+):(\d+)", 0).expect("loader");
        assert!(loader.load().expect("load").is_empty());
    }

    #[test]
    fn test_should_fail_on_missing_file() {
        let loader = FileLoader::new("/nonexistent/dump.txt", DEFAULT_PATTERN, 0).expect("loader");
        assert!(matches!(
            loader.load(),
            Err(RemediationError::LookupLoad { .. })
        ));
    }

    #[test]
    fn test_should_reject_invalid_pattern() {
        assert!(matches!(
            FileLoader::new("dump.txt", "(", 0),
            Err(RemediationError::LookupPattern(_))
        ));
    }
}
