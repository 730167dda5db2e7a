//! Dedup-by-scan and append for channel files.
//!
//! A channel's own content is the dedup record: before an item is appended,
//! the file is scanned from the start for the item's marker line. Channels
//! are expected to stay small (consumers drain them), so a linear scan per
//! check is acceptable.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Which item field identifies an item for dedup.
///
/// The choice is fixed per deployment. Switching it after items have been
/// delivered re-delivers every item still present in the feed once, because
/// none of the old lines contain the new marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerStrategy {
    /// `link: <url>` (RSS link text, Atom link href)
    #[default]
    Link,
    /// `title: <text>`
    Title,
}

impl MarkerStrategy {
    /// Element name whose flattened line serves as the marker.
    pub fn field(self) -> &'static str {
        match self {
            Self::Link => "link",
            Self::Title => "title",
        }
    }
}

/// Returns true if any line of `sink` contains `marker` as a substring.
///
/// Scans from the start regardless of the current position. Invalid UTF-8 in
/// the sink is replaced rather than treated as an error.
pub fn already_delivered<S: Read + Seek>(sink: &mut S, marker: &str) -> io::Result<bool> {
    sink.seek(SeekFrom::Start(0))?;
    let mut reader = BufReader::new(sink);
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(false);
        }
        if String::from_utf8_lossy(&line).contains(marker) {
            return Ok(true);
        }
    }
}

/// Appends `lines` (newline-terminated) to the end of `sink` and flushes.
///
/// The block is written with a single `write_all` so a reader tailing the
/// channel never sees half of it interleaved with another write.
pub fn deliver<S: Write + Seek>(sink: &mut S, lines: &[String]) -> io::Result<()> {
    let mut block = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        block.push_str(line);
        block.push('\n');
    }
    sink.seek(SeekFrom::End(0))?;
    sink.write_all(block.as_bytes())?;
    sink.flush()
}

/// An open channel file: readable for dedup scans, append-only for writes.
///
/// Never truncated; prior content must stay readable for [`already_delivered`].
#[derive(Debug)]
pub struct Channel {
    path: PathBuf,
    file: File,
}

impl Channel {
    /// Opens an existing channel in read + append mode.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A second handle on the same open file, for use on another thread.
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            path: self.path.clone(),
            file: self.file.try_clone()?,
        })
    }

    pub fn already_delivered(&mut self, marker: &str) -> io::Result<bool> {
        already_delivered(&mut self.file, marker)
    }

    pub fn deliver(&mut self, lines: &[String]) -> io::Result<()> {
        deliver(&mut self.file, lines)
    }

    /// Appends `line` unless some existing line already contains it.
    ///
    /// Returns whether the line was written.
    pub fn deliver_once(&mut self, line: &str) -> io::Result<bool> {
        if self.already_delivered(line)? {
            return Ok(false);
        }
        self.deliver(&[line.to_string()])?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_sink_has_nothing_delivered() {
        let mut sink = Cursor::new(Vec::new());
        assert!(!already_delivered(&mut sink, "link: http://e/1").unwrap());
    }

    #[test]
    fn test_deliver_then_detect() {
        let mut sink = Cursor::new(Vec::new());
        deliver(&mut sink, &lines(&["title: A", "link: http://e/1", "ITEMS"])).unwrap();

        assert!(already_delivered(&mut sink, "link: http://e/1").unwrap());
        assert!(!already_delivered(&mut sink, "link: http://e/2").unwrap());
        assert_eq!(
            String::from_utf8(sink.into_inner()).unwrap(),
            "title: A\nlink: http://e/1\nITEMS\n"
        );
    }

    #[test]
    fn test_deliver_appends_after_partial_scan() {
        let mut sink = Cursor::new(b"first\nsecond\nthird\n".to_vec());
        // Marker found on the first line leaves the cursor mid-stream.
        assert!(already_delivered(&mut sink, "first").unwrap());
        deliver(&mut sink, &lines(&["fourth"])).unwrap();
        assert_eq!(sink.into_inner(), b"first\nsecond\nthird\nfourth\n");
    }

    #[test]
    fn test_substring_match_semantics() {
        let mut sink = Cursor::new(b"prefix link: http://e/1 suffix\n".to_vec());
        assert!(already_delivered(&mut sink, "link: http://e/1").unwrap());
    }

    #[test]
    fn test_invalid_utf8_lines_are_scanned() {
        let mut sink = Cursor::new(b"\xff\xfe garbage\nlink: http://e/1\n".to_vec());
        assert!(already_delivered(&mut sink, "link: http://e/1").unwrap());
    }

    #[test]
    fn test_last_line_without_newline_is_scanned() {
        let mut sink = Cursor::new(b"a\nlink: x".to_vec());
        assert!(already_delivered(&mut sink, "link: x").unwrap());
    }

    #[test]
    fn test_marker_strategy_fields() {
        assert_eq!(MarkerStrategy::default(), MarkerStrategy::Link);
        assert_eq!(MarkerStrategy::Link.field(), "link");
        assert_eq!(MarkerStrategy::Title.field(), "title");
    }

    #[test]
    fn test_channel_file_append_and_deliver_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tech desc");
        std::fs::write(&path, "title: Old\n").unwrap();

        let mut channel = Channel::open(&path).unwrap();
        assert!(!channel.deliver_once("title: Old").unwrap());
        assert!(channel.deliver_once("description: New").unwrap());
        assert!(!channel.deliver_once("description: New").unwrap());

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "title: Old\ndescription: New\n"
        );
        assert_eq!(channel.path(), path.as_path());
    }

    #[test]
    fn test_cloned_channel_sees_and_extends_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tech");
        std::fs::write(&path, "").unwrap();

        let mut channel = Channel::open(&path).unwrap();
        let mut clone = channel.try_clone().unwrap();
        clone.deliver(&lines(&["link: http://e/1", "ITEMS"])).unwrap();

        assert!(channel.already_delivered("link: http://e/1").unwrap());
        channel.deliver(&lines(&["link: http://e/2", "ITEMS"])).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "link: http://e/1\nITEMS\nlink: http://e/2\nITEMS\n"
        );
        assert_eq!(clone.path(), path.as_path());
    }
}
