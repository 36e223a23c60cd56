//! Streaming NZB/XML parser (spec §4.1). Grounded on the teacher's
//! `nzb/parser.rs` tag dispatch over `quick_xml::Reader`, rebuilt around a
//! `FileBuilder` that owns in-progress file/segment state instead of a flat
//! bag of `Option`/`bool` locals threaded through one big match.

use crate::nzb::error::NzbError;
use crate::nzb::types::*;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::Reader;
use std::io::BufRead;
use std::str;
use tracing::{debug, warn};

type Result<T> = std::result::Result<T, NzbError>;

/// Accumulates one `<file>` element's children until its closing tag, then
/// hands back a finished `NzbFile`.
#[derive(Default)]
struct FileBuilder {
    file: Option<NzbFile>,
    groups: Vec<String>,
    segment: Option<NzbSegment>,
    awaiting_group_text: bool,
}

impl FileBuilder {
    fn open(&mut self, attrs: &BytesStart) -> Result<()> {
        self.file = Some(parse_file_attrs(attrs)?);
        self.groups.clear();
        Ok(())
    }

    fn open_group(&mut self) {
        self.awaiting_group_text = true;
    }

    fn open_segment(&mut self, attrs: &BytesStart) -> Result<()> {
        self.segment = Some(parse_segment_attrs(attrs)?);
        Ok(())
    }

    fn text(&mut self, text: &str) {
        if let Some(segment) = self.segment.as_mut() {
            segment.message_id = normalize_message_id(text);
        } else if self.awaiting_group_text && !text.is_empty() {
            self.groups.push(text.to_string());
            self.awaiting_group_text = false;
        }
    }

    fn close_segment(&mut self) {
        if let (Some(segment), Some(file)) = (self.segment.take(), self.file.as_mut()) {
            file.add_segment(segment);
        }
    }

    /// Finalizes the in-progress file (groups attached, segments ordered,
    /// filename recovered from the subject line if the element didn't carry
    /// its own path), handing ownership back and resetting for the next one.
    fn close(&mut self) -> Option<NzbFile> {
        let mut file = self.file.take()?;
        file.groups = std::mem::take(&mut self.groups);
        file.sort_segments();
        if file.path.is_empty() {
            file.path = filename_from_subject(&file.subject);
        }
        Some(file)
    }
}

pub struct NzbParser;

impl NzbParser {
    pub fn parse<R: BufRead>(reader: R) -> Result<Nzb> {
        let mut xml_reader = Reader::from_reader(reader);
        xml_reader.config_mut().trim_text(true);

        let mut nzb = Nzb::new();
        let mut builder = FileBuilder::default();
        let mut in_head = false;
        let mut buf = Vec::new();

        loop {
            let event = xml_reader.read_event_into(&mut buf).map_err(|e| NzbError::Parsing(e.to_string()))?;
            match event {
                Event::Eof => break,
                Event::Start(tag) => Self::on_start(&tag, &mut nzb, &mut builder, &mut in_head)?,
                Event::End(tag) => Self::on_end(&tag, &mut nzb, &mut builder, &mut in_head),
                Event::Text(text) => {
                    let decoded = text.unescape().map_err(|e| NzbError::Parsing(e.to_string()))?;
                    builder.text(decoded.trim());
                }
                _ => {}
            }
            buf.clear();
        }

        debug!(files = nzb.files.len(), "parsed NZB");
        check_complete(&nzb)?;
        Ok(nzb)
    }

    fn on_start(tag: &BytesStart, nzb: &mut Nzb, builder: &mut FileBuilder, in_head: &mut bool) -> Result<()> {
        match tag.name() {
            QName(b"nzb") => attach_attrs(tag, &mut nzb.meta.attributes),
            QName(b"head") => *in_head = true,
            QName(b"meta") if *in_head => {
                if let Some(kind) = attr_value(tag, b"type")? {
                    nzb.meta.attributes.insert(kind, String::new());
                }
            }
            QName(b"file") => builder.open(tag)?,
            QName(b"group") => builder.open_group(),
            QName(b"segment") => builder.open_segment(tag)?,
            _ => {}
        }
        Ok(())
    }

    fn on_end(tag: &BytesEnd, nzb: &mut Nzb, builder: &mut FileBuilder, in_head: &mut bool) {
        match tag.name() {
            QName(b"head") => *in_head = false,
            QName(b"file") => {
                if let Some(file) = builder.close() {
                    nzb.files.push(file);
                }
            }
            QName(b"segment") => builder.close_segment(),
            _ => {}
        }
    }
}

fn attach_attrs(element: &BytesStart, into: &mut std::collections::HashMap<String, String>) {
    for attr in element.attributes().flatten() {
        let (Ok(key), Ok(value)) = (str::from_utf8(attr.key.as_ref()), attr.unescape_value()) else {
            continue;
        };
        into.insert(key.to_string(), value.to_string());
    }
}

fn attr_value(element: &BytesStart, name: &[u8]) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| NzbError::Parsing(e.to_string()))?;
        if attr.key == QName(name) {
            let value = attr.unescape_value().map_err(|e| NzbError::Parsing(e.to_string()))?;
            return Ok(Some(value.to_string()));
        }
    }
    Ok(None)
}

fn parse_file_attrs(element: &BytesStart) -> Result<NzbFile> {
    let mut poster = String::new();
    let mut date = Utc::now();
    let mut subject = String::new();

    for attr in element.attributes() {
        let attr = attr.map_err(|e| NzbError::Parsing(e.to_string()))?;
        let key = str::from_utf8(attr.key.as_ref())?;
        let value = attr.unescape_value().map_err(|e| NzbError::Parsing(e.to_string()))?;
        match key {
            "poster" => poster = value.to_string(),
            "date" => date = parse_date(&value)?,
            "subject" => subject = value.to_string(),
            _ => {}
        }
    }

    Ok(NzbFile::new(subject, poster, date))
}

fn parse_segment_attrs(element: &BytesStart) -> Result<NzbSegment> {
    let mut bytes = 0u64;
    let mut number = 0u32;

    for attr in element.attributes() {
        let attr = attr.map_err(|e| NzbError::Parsing(e.to_string()))?;
        let key = str::from_utf8(attr.key.as_ref())?;
        let value = attr.unescape_value().map_err(|e| NzbError::Parsing(e.to_string()))?;
        match key {
            "bytes" => bytes = value.parse().map_err(|_| NzbError::Parsing(format!("invalid bytes value: {value}")))?,
            "number" => {
                number = value.parse().map_err(|_| NzbError::Parsing(format!("invalid number value: {value}")))?
            }
            _ => {}
        }
    }

    Ok(NzbSegment::new(String::new(), number, bytes))
}

fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    if let Ok(timestamp) = date_str.parse::<i64>() {
        return DateTime::from_timestamp(timestamp, 0)
            .ok_or_else(|| NzbError::Parsing(format!("invalid timestamp: {timestamp}")));
    }
    DateTime::parse_from_rfc3339(date_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| NzbError::Parsing(format!("invalid date format: {date_str}")))
}

/// Usenet subjects commonly wrap the real filename in quotes
/// (`"Movie.mkv" yEnc (1/50)`); fall back to the first whitespace-delimited
/// token that looks like a filename, then to the whole subject.
fn filename_from_subject(subject: &str) -> String {
    if let Some(start) = subject.find('"') {
        if let Some(end) = subject[start + 1..].find('"') {
            return normalize_path(&subject[start + 1..start + 1 + end]);
        }
    }
    subject
        .split_whitespace()
        .find(|part| part.contains('.') && !part.contains('/') && !part.contains('('))
        .map(normalize_path)
        .unwrap_or_else(|| normalize_path(subject))
}

fn check_complete(nzb: &Nzb) -> Result<()> {
    if nzb.files.is_empty() {
        return Err(NzbError::Parsing("NZB contains no files".to_string()));
    }

    for (i, file) in nzb.files.iter().enumerate() {
        if file.segments.is_empty() {
            warn!(index = i, path = %file.path, "file has no segments");
            continue;
        }
        for segment in &file.segments {
            if segment.message_id.is_empty() {
                return Err(NzbError::Parsing(format!("empty message id in file: {}", file.path)));
            }
            if segment.bytes == 0 {
                warn!(path = %file.path, "zero-byte segment");
            }
        }
    }

    Ok(())
}

/// Message-ids in NZB XML may be bare or already angle-bracketed.
pub fn normalize_message_id(id: &str) -> String {
    let trimmed = id.trim();
    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        trimmed.to_string()
    } else {
        format!("<{trimmed}>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<nzb xmlns="http://www.newzbin.com/DTD/2003/nzb">
<head>
  <meta type="title">Test Movie</meta>
</head>
<file poster="poster@example.com" date="1700000000" subject="&quot;Test Movie.mp4&quot; yEnc (1/2)">
  <groups><group>alt.binaries.test</group></groups>
  <segments>
    <segment bytes="100000" number="1">msg1@server.com</segment>
    <segment bytes="50000" number="2">&lt;msg2@server.com&gt;</segment>
  </segments>
</file>
<file poster="poster@example.com" date="1700000000" subject="&quot;Test Movie.r00&quot; yEnc (1/1)">
  <groups><group>alt.binaries.test</group></groups>
  <segments>
    <segment bytes="200000" number="1">msg3@server.com</segment>
  </segments>
</file>
</nzb>"#;

    #[test]
    fn parses_files_segments_and_normalizes_message_ids() {
        let nzb = NzbParser::parse(Cursor::new(SAMPLE)).unwrap();
        assert_eq!(nzb.files.len(), 2);
        assert_eq!(nzb.total_size(), 350_000);

        let first = &nzb.files[0];
        assert_eq!(first.segments.len(), 2);
        assert_eq!(first.segments[0].message_id, "<msg1@server.com>");
        assert_eq!(first.segments[1].message_id, "<msg2@server.com>");
        assert!(first.is_complete());
        assert_eq!(first.path, "Test Movie.mp4");

        assert!(!nzb.find_video_files().is_empty());
    }

    #[test]
    fn falls_back_to_bare_filename_token_when_subject_has_no_quotes() {
        assert_eq!(filename_from_subject("movie.mkv (1/30) yEnc"), "movie.mkv");
    }

    #[test]
    fn rejects_nzb_with_no_files() {
        let empty = r#"<?xml version="1.0" encoding="utf-8" ?>
<nzb xmlns="http://www.newzbin.com/DTD/2003/nzb"></nzb>"#;
        assert!(NzbParser::parse(Cursor::new(empty)).is_err());
    }

    #[test]
    fn rejects_invalid_xml() {
        assert!(NzbParser::parse(Cursor::new("not xml at all")).is_err());
    }

    #[test]
    fn rejects_segment_with_missing_message_id() {
        let xml = r#"<?xml version="1.0" encoding="utf-8" ?>
<nzb xmlns="http://www.newzbin.com/DTD/2003/nzb">
<file poster="p" date="1700000000" subject="&quot;x.mkv&quot; yEnc (1/1)">
  <segments><segment bytes="10" number="1"></segment></segments>
</file>
</nzb>"#;
        assert!(NzbParser::parse(Cursor::new(xml)).is_err());
    }
}
