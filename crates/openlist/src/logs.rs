use std::path::Path;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogTail {
    pub path: String,
    pub lines: Vec<String>,
}

/// Last `count` lines of the log. A missing file reads as empty.
pub fn tail(path: &Path, count: usize) -> std::io::Result<LogTail> {
    let contents = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(error) => return Err(error),
    };
    let text = String::from_utf8_lossy(&contents);
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(count);

    Ok(LogTail {
        path: path.display().to_string(),
        lines: all[start..].iter().map(ToString::to_string).collect(),
    })
}

/// Truncate the log in place so an open writer keeps appending to it.
pub fn clear(path: &Path) -> std::io::Result<()> {
    match std::fs::OpenOptions::new().write(true).truncate(true).open(path) {
        Ok(_) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error),
    }
}
