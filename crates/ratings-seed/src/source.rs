use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use encoding_rs::WINDOWS_1252;
use ratings_core::trim_line_terminator;

/// One non-empty line of a source file, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    pub number: usize,
    pub text: String,
}

/// Reads a MovieLens source file line by line, skipping blank lines.
///
/// Lines that are not valid UTF-8 are decoded as Windows-1252, which covers the
/// Latin-1 titles shipped in `u.item`.
pub struct SourceLines {
    path: PathBuf,
    reader: BufReader<File>,
    number: usize,
}

impl SourceLines {
    /// # Errors
    /// Returns an error when the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open source file {}", path.display()))?;
        Ok(Self { path: path.to_path_buf(), reader: BufReader::new(file), number: 0 })
    }
}

impl Iterator for SourceLines {
    type Item = Result<SourceLine>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut buf = Vec::new();
            match self.reader.read_until(b'\n', &mut buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(err) => {
                    return Some(Err(err).with_context(|| {
                        format!("failed to read {}:{}", self.path.display(), self.number + 1)
                    }));
                }
            }
            self.number += 1;

            let text = decode_line(buf);
            let text = trim_line_terminator(&text);
            if text.is_empty() {
                continue;
            }
            return Some(Ok(SourceLine { number: self.number, text: text.to_string() }));
        }
    }
}

fn decode_line(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => WINDOWS_1252.decode_without_bom_handling(err.as_bytes()).0.into_owned(),
    }
}
