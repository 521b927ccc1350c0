//! Reading back the tail of the service log file.

use std::collections::VecDeque;
use std::path::Path;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::Result;

/// Lines returned when the caller gives no limit.
pub const DEFAULT_LIMIT: usize = 200;

/// Most lines a single request may ask for.
pub const MAX_LIMIT: usize = 1000;

/// Clamp a requested line count to `[1, MAX_LIMIT]`.
pub fn clamp_limit(requested: Option<i64>) -> usize {
    match requested {
        None => DEFAULT_LIMIT,
        Some(n) => n.clamp(1, MAX_LIMIT as i64) as usize,
    }
}

/// Return the last `limit` lines of `path`, oldest first.
///
/// A missing file yields no lines.
pub async fn tail(path: &Path, limit: usize) -> Result<Vec<String>> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut lines = BufReader::new(file).lines();
    let mut window = VecDeque::with_capacity(limit.min(MAX_LIMIT));
    while let Some(line) = lines.next_line().await? {
        if window.len() == limit {
            window.pop_front();
        }
        window.push_back(line);
    }

    Ok(window.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_clamped() {
        assert_eq!(clamp_limit(None), 200);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(-5)), 1);
        assert_eq!(clamp_limit(Some(50)), 50);
        assert_eq!(clamp_limit(Some(5_000)), 1000);
    }

    #[tokio::test]
    async fn returns_last_lines_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.log");
        let body: String = (1..=10).map(|i| format!("line {i}\n")).collect();
        std::fs::write(&path, body).unwrap();

        assert_eq!(tail(&path, 3).await.unwrap(), vec!["line 8", "line 9", "line 10"]);
        assert_eq!(tail(&path, 100).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(tail(&dir.path().join("nope.log"), 10).await.unwrap().is_empty());
    }
}
