//! Single seekable byte interface over an [`ArchiveBlueprint`] (spec §4.5).
//! Binary-searches parts, seeks in place within a part when possible, and
//! force-advances past a part boundary if its volume runs short. All reads
//! and seeks are serialized by the stream's own lock, matching the pool/
//! loader's "caller holds ownership through an explicit guard" idiom used
//! throughout the rest of this crate.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::archive::error::ArchiveError;
use crate::archive::types::ArchiveBlueprint;
use crate::segment::loader::SegmentLoader;
use crate::segment::reader::SequentialReader;

struct Inner {
    part_idx: Option<usize>,
    reader: Option<SequentialReader>,
    offset: u64,
}

pub struct VirtualStream {
    blueprint: ArchiveBlueprint,
    loaders: Vec<Arc<SegmentLoader>>,
    connections_per_loader: usize,
    inner: Mutex<Inner>,
}

impl VirtualStream {
    pub fn new(blueprint: ArchiveBlueprint, loaders: Vec<Arc<SegmentLoader>>, connections_per_loader: usize) -> Self {
        Self {
            blueprint,
            loaders,
            connections_per_loader,
            inner: Mutex::new(Inner { part_idx: None, reader: None, offset: 0 }),
        }
    }

    pub fn total_size(&self) -> u64 {
        self.blueprint.total_size
    }

    pub async fn seek(&self, offset: u64) -> Result<(), ArchiveError> {
        let mut inner = self.inner.lock().await;
        let Some(part) = self.blueprint.part_for_offset(offset.min(self.blueprint.total_size.saturating_sub(1))) else {
            inner.part_idx = None;
            inner.reader = None;
            inner.offset = offset;
            return Ok(());
        };
        let part_idx = self.blueprint.parts.iter().position(|p| std::ptr::eq(p, part)).unwrap();
        let local_offset = part.volume_offset + (offset - part.virtual_start);

        if inner.part_idx == Some(part_idx) {
            if let Some(reader) = inner.reader.as_mut() {
                reader.seek(local_offset).await.map_err(ArchiveError::from)?;
                inner.offset = offset;
                let loader = &self.loaders[part.volume_index];
                if let Some(ordinal) = loader.find_segment_index(local_offset).await {
                    loader.prewarm_segment(ordinal as u32);
                }
                return Ok(());
            }
        }

        let mut reader = SequentialReader::new(self.loaders[part.volume_index].clone(), self.connections_per_loader);
        reader.seek(local_offset).await.map_err(ArchiveError::from)?;
        inner.part_idx = Some(part_idx);
        inner.reader = Some(reader);
        inner.offset = offset;
        Ok(())
    }

    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, ArchiveError> {
        let mut inner = self.inner.lock().await;

        // A volume running short just moves `offset` to the next part
        // boundary; loop here so a short volume never surfaces as a
        // premature end-of-stream to the caller.
        loop {
            if inner.offset >= self.blueprint.total_size {
                return Ok(0);
            }

            let Some(part) = self.blueprint.part_for_offset(inner.offset) else {
                return Ok(0);
            };
            let part_idx = self.blueprint.parts.iter().position(|p| std::ptr::eq(p, part)).unwrap();
            let part_end = part.virtual_end;
            let volume_index = part.volume_index;
            let local_offset = part.volume_offset + (inner.offset - part.virtual_start);

            if inner.part_idx != Some(part_idx) {
                let mut reader = SequentialReader::new(self.loaders[volume_index].clone(), self.connections_per_loader);
                reader.seek(local_offset).await.map_err(ArchiveError::from)?;
                inner.part_idx = Some(part_idx);
                inner.reader = Some(reader);
            }

            let max_from_part = (part_end - inner.offset) as usize;
            let want = buf.len().min(max_from_part);
            let reader = inner.reader.as_mut().expect("populated above");
            let n = reader.read(&mut buf[..want]).await.map_err(ArchiveError::from)?;

            if n == 0 {
                // Volume ran short of the blueprint's expectation; tolerate it
                // by force-advancing to the part boundary and continuing into
                // the next part instead of ending the stream here.
                inner.offset = part_end;
                inner.part_idx = None;
                inner.reader = None;
                continue;
            }

            inner.offset += n as u64;
            return Ok(n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::types::ArchiveKind;
    use crate::nzb::NzbFile;
    use chrono::Utc;

    fn empty_stream() -> VirtualStream {
        let blueprint = ArchiveBlueprint { kind: ArchiveKind::Direct, name: "x".into(), total_size: 0, parts: vec![] };
        VirtualStream::new(blueprint, vec![], 4)
    }

    #[tokio::test]
    async fn read_on_empty_blueprint_returns_zero() {
        let stream = empty_stream();
        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn seek_clamps_to_total_size() {
        let file = NzbFile::new("s".into(), "p".into(), Utc::now());
        let loader = SegmentLoader::new(&file, vec![]);
        let blueprint = ArchiveBlueprint::direct("movie.mp4".into(), 0, 0);
        let stream = VirtualStream::new(blueprint, vec![loader], 4);
        stream.seek(0).await.unwrap();
    }
}
