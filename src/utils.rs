use anyhow::{Context, Result};
use range_parser::parse;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Read the final `limit` lines of a file.
///
/// Returns the lines plus a flag that is true iff the file held more lines
/// than were returned.
pub fn tail_lines(path: &Path, limit: usize) -> io::Result<(Vec<String>, bool)> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut total = 0usize;
    let mut window: VecDeque<String> = VecDeque::new();
    for line in reader.lines() {
        let line = line?;
        total += 1;
        if limit == 0 {
            continue;
        }
        if window.len() == limit {
            window.pop_front();
        }
        window.push_back(line);
    }

    let truncated = total > window.len();
    Ok((window.into(), truncated))
}

/// Parse task IDs from string input, supporting ranges like `"1-3"` and
/// comma-separated lists like `"1,2,5"`.
pub fn parse_task_ids(raw: &str) -> Result<Vec<i64>> {
    let mut ids: Vec<i64> =
        parse::<i64>(raw.trim()).context(format!("Invalid ID or range: {}", raw))?;

    ids.sort_unstable();
    ids.dedup();

    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with_lines(count: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for n in 0..count {
            writeln!(file, "line {n}").unwrap();
        }
        file
    }

    #[test]
    fn test_tail_shorter_than_limit() {
        let file = file_with_lines(3);
        let (lines, truncated) = tail_lines(file.path(), 100).unwrap();
        assert_eq!(lines, vec!["line 0", "line 1", "line 2"]);
        assert!(!truncated);
    }

    #[test]
    fn test_tail_longer_than_limit() {
        let file = file_with_lines(10);
        let (lines, truncated) = tail_lines(file.path(), 3).unwrap();
        assert_eq!(lines, vec!["line 7", "line 8", "line 9"]);
        assert!(truncated);
    }

    #[test]
    fn test_tail_zero_limit() {
        let file = file_with_lines(2);
        let (lines, truncated) = tail_lines(file.path(), 0).unwrap();
        assert!(lines.is_empty());
        assert!(truncated);
    }

    #[test]
    fn test_tail_missing_file() {
        assert!(tail_lines(Path::new("/nonexistent/tmux.log"), 10).is_err());
    }

    #[test]
    fn test_parse_task_ids() {
        assert_eq!(parse_task_ids("1").unwrap(), vec![1]);
        assert_eq!(parse_task_ids("1,2,3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_task_ids("1-3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_task_ids("3,1-2,3").unwrap(), vec![1, 2, 3]);
        assert!(parse_task_ids("one").is_err());
    }
}
