use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Nzb {
    pub meta: NzbMeta,
    pub files: Vec<NzbFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NzbMeta {
    pub title: Option<String>,
    pub category: Option<String>,
    pub poster: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NzbFile {
    pub subject: String,
    pub poster: String,
    pub date: DateTime<Utc>,
    pub groups: Vec<String>,
    pub segments: Vec<NzbSegment>,
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NzbSegment {
    pub message_id: String,
    pub number: u32,
    pub bytes: u64,
}

impl Nzb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn find_file(&self, path: &str) -> Option<&NzbFile> {
        let normalized = normalize_path(path);
        self.files.iter().find(|f| f.path == normalized)
    }

    pub fn find_video_files(&self) -> Vec<&NzbFile> {
        self.files.iter().filter(|f| is_video_file(&f.path)).collect()
    }

    /// Release-wide archive classification per the blueprint builder's
    /// filename heuristics: any `.7z`/`.7z.NNN` member makes it a 7z set,
    /// any `.rar`/`.rNN` member makes it a RAR set, otherwise direct media.
    pub fn archive_kind(&self) -> ReleaseKind {
        let has_7z = self.files.iter().any(|f| is_sevenzip_file(&f.path));
        let has_rar = self.files.iter().any(|f| is_rar_file(&f.path));
        if has_7z {
            ReleaseKind::SevenZip
        } else if has_rar {
            ReleaseKind::Rar
        } else {
            ReleaseKind::Direct
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseKind {
    Direct,
    Rar,
    SevenZip,
}

impl NzbFile {
    pub fn new(subject: String, poster: String, date: DateTime<Utc>) -> Self {
        Self {
            subject,
            poster,
            date,
            groups: Vec::new(),
            segments: Vec::new(),
            path: String::new(),
            size: 0,
        }
    }

    pub fn add_segment(&mut self, segment: NzbSegment) {
        self.size += segment.bytes;
        self.segments.push(segment);
    }

    pub fn sort_segments(&mut self) {
        self.segments.sort_by(|a, b| a.number.cmp(&b.number));
    }

    pub fn is_complete(&self) -> bool {
        if self.segments.is_empty() {
            return false;
        }
        self.segments
            .iter()
            .enumerate()
            .all(|(i, segment)| segment.number == (i + 1) as u32)
    }

    pub fn extension(&self) -> Option<&str> {
        self.path.rsplit('.').next()
    }
}

impl NzbSegment {
    pub fn new(message_id: String, number: u32, bytes: u64) -> Self {
        Self { message_id, number, bytes }
    }
}

pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_string()
}

pub fn is_video_file(path: &str) -> bool {
    path.rsplit('.').next().is_some_and(|ext| {
        matches!(
            ext.to_lowercase().as_str(),
            "mp4" | "mkv" | "avi" | "mov" | "wmv" | "flv" | "webm" | "m4v" | "mpg" | "mpeg"
        )
    })
}

/// Matches `.rar`, or a continuation extension `.r00`..`.r999`.
pub fn is_rar_file(path: &str) -> bool {
    path.rsplit('.').next().is_some_and(|ext| {
        let ext = ext.to_lowercase();
        ext == "rar" || (ext.len() >= 3 && ext.starts_with('r') && ext[1..].parse::<u32>().is_ok())
    })
}

/// Matches `.7z` or the first-volume marker `.7z.001` anywhere in the name.
pub fn is_sevenzip_file(path: &str) -> bool {
    let lower = path.to_lowercase();
    lower.ends_with(".7z") || lower.contains(".7z.")
}

/// Bare numeric continuation extension `.001`..`.999` used by both RAR
/// (`movie.001` style sets) and 7z volumes.
pub fn is_numeric_continuation(path: &str) -> bool {
    path.rsplit('.')
        .next()
        .is_some_and(|ext| ext.len() == 3 && ext.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_backslashes_and_leading_slash() {
        assert_eq!(normalize_path("folder\\file.txt"), "folder/file.txt");
        assert_eq!(normalize_path("/folder/file.txt"), "folder/file.txt");
        assert_eq!(normalize_path("folder/file.txt"), "folder/file.txt");
    }

    #[test]
    fn classifies_video_files() {
        assert!(is_video_file("movie.mp4"));
        assert!(is_video_file("MOVIE.MP4"));
        assert!(is_video_file("video.mkv"));
        assert!(!is_video_file("archive.rar"));
        assert!(!is_video_file("document.txt"));
    }

    #[test]
    fn classifies_rar_volumes() {
        assert!(is_rar_file("archive.rar"));
        assert!(is_rar_file("archive.r00"));
        assert!(is_rar_file("archive.r01"));
        assert!(!is_rar_file("video.mp4"));
        assert!(!is_rar_file("archive.zip"));
    }

    #[test]
    fn classifies_sevenzip_volumes() {
        assert!(is_sevenzip_file("movie.7z"));
        assert!(is_sevenzip_file("movie.7z.001"));
        assert!(!is_sevenzip_file("movie.rar"));
    }

    #[test]
    fn release_kind_prefers_7z_then_rar_then_direct() {
        let mut nzb = Nzb::new();
        nzb.files.push(NzbFile::new("s".into(), "p".into(), Utc::now()));
        nzb.files[0].path = "movie.mp4".into();
        assert_eq!(nzb.archive_kind(), ReleaseKind::Direct);

        nzb.files.push(NzbFile::new("s".into(), "p".into(), Utc::now()));
        nzb.files[1].path = "movie.part01.rar".into();
        assert_eq!(nzb.archive_kind(), ReleaseKind::Rar);

        nzb.files.push(NzbFile::new("s".into(), "p".into(), Utc::now()));
        nzb.files[2].path = "movie.7z.001".into();
        assert_eq!(nzb.archive_kind(), ReleaseKind::SevenZip);
    }

    #[test]
    fn file_tracks_size_and_ordering() {
        let mut file = NzbFile::new("Test File".to_string(), "poster@example.com".to_string(), Utc::now());
        file.add_segment(NzbSegment::new("msg2".to_string(), 2, 1000));
        file.add_segment(NzbSegment::new("msg1".to_string(), 1, 1000));
        assert_eq!(file.size, 2000);
        assert!(!file.is_complete());
        file.sort_segments();
        assert!(file.is_complete());
        assert_eq!(file.segments[0].number, 1);
        assert_eq!(file.segments[1].number, 2);
    }
}
