//! Orchestrates classification + RAR/7z scanning into one `ArchiveBlueprint`
//! (spec §4.5). Grounded on the teacher's `archive/mod.rs` top-level
//! `parse_file`/`parse_buffer` dispatch shape, re-targeted from PAR2 packet
//! scanning to RAR/7z volume scanning.

use std::sync::Arc;

use crate::archive::error::ArchiveError;
use crate::archive::rar::{self, RarExt};
use crate::archive::sevenzip;
use crate::archive::types::{ArchiveBlueprint, ArchiveKind, VirtualPart};
use crate::nzb::types::is_video_file;
use crate::nzb::NzbFile;
use crate::segment::loader::SegmentLoader;

/// A release's content files together with the loaders built for them, in
/// the same order. `files[i]` and `loaders[i]` describe the same volume.
#[derive(Clone, Copy)]
pub struct ReleaseVolumes<'a> {
    pub files: &'a [NzbFile],
    pub loaders: &'a [Arc<SegmentLoader>],
}

pub async fn build_blueprint(release: ReleaseVolumes<'_>) -> Result<ArchiveBlueprint, ArchiveError> {
    if release.files.is_empty() {
        return Err(ArchiveError::NoContentFiles);
    }

    let has_7z = release.files.iter().any(|f| crate::nzb::types::is_sevenzip_file(&f.path));
    let has_rar = release.files.iter().any(|f| crate::nzb::types::is_rar_file(&f.path));

    let blueprint = if has_7z {
        build_sevenzip_blueprint(release).await?
    } else if has_rar {
        build_rar_blueprint(release).await?
    } else {
        build_direct_blueprint(release)?
    };

    // A player opening a new file typically seeks straight to the tail to
    // read MKV cues / the MP4 moov atom before it ever plays sequentially;
    // warm that segment now instead of making the first seek pay for it.
    prewarm_tail_segment(&release, &blueprint).await;

    Ok(blueprint)
}

async fn prewarm_tail_segment(release: &ReleaseVolumes<'_>, blueprint: &ArchiveBlueprint) {
    let Some(last_part) = blueprint.parts.last() else { return };
    let Some(loader) = release.loaders.get(last_part.volume_index) else { return };
    let count = loader.segment_count().await;
    if count > 0 {
        loader.prewarm_segment((count - 1) as u32);
    }
}

fn build_direct_blueprint(release: ReleaseVolumes<'_>) -> Result<ArchiveBlueprint, ArchiveError> {
    let (idx, file) = release
        .files
        .iter()
        .enumerate()
        .find(|(_, f)| is_video_file(&f.path))
        .or_else(|| release.files.iter().enumerate().next())
        .ok_or(ArchiveError::NoContentFiles)?;

    Ok(ArchiveBlueprint::direct(file.path.clone(), idx, file.size))
}

async fn build_rar_blueprint(release: ReleaseVolumes<'_>) -> Result<ArchiveBlueprint, ArchiveError> {
    let mut order: Vec<usize> = (0..release.files.len()).collect();
    order.sort_by_key(|&i| RarExt::from_filename(&release.files[i].path).unwrap_or(RarExt::Part(u32::MAX)));

    let first_idx = order[0];
    let first_buf = release.loaders[first_idx].download_segment(0).await?;
    let headers = rar::scan_headers(&first_buf)?;

    let main = headers
        .iter()
        .filter(|h| is_video_file(&h.name))
        .max_by_key(|h| h.unpacked_size)
        .or_else(|| headers.iter().max_by_key(|h| h.unpacked_size))
        .ok_or(ArchiveError::NoContentFiles)?;

    if !main.is_stored() {
        return Err(ArchiveError::CompressedArchive);
    }

    let total_size = main.unpacked_size;
    let first_packed_size = main.packed_size;

    if order.len() == 1 {
        return Ok(ArchiveBlueprint {
            kind: ArchiveKind::Rar,
            name: main.name.clone(),
            total_size,
            parts: vec![VirtualPart {
                virtual_start: 0,
                virtual_end: total_size,
                volume_index: first_idx,
                volume_offset: main.data_offset,
            }],
        });
    }

    let second_idx = order[1];
    let second_buf = release.loaders[second_idx].download_segment(0).await?;
    let probe = rar::scan_headers(&second_buf)?
        .into_iter()
        .next()
        .ok_or(ArchiveError::MalformedRar)?;
    if !probe.is_stored() {
        return Err(ArchiveError::CompressedArchive);
    }

    // Probe a third continuation volume too when there are enough middle
    // volumes for a single probe to be a coincidence, requiring agreement
    // before trusting "every middle volume has this header layout." On
    // disagreement, fall back to probing every middle volume individually
    // instead of failing outright.
    let mut uniform_middle = true;
    if order.len() >= 4 {
        let third_idx = order[2];
        let third_buf = release.loaders[third_idx].download_segment(0).await?;
        let probe2 = rar::scan_headers(&third_buf)?.into_iter().next().ok_or(ArchiveError::MalformedRar)?;
        if probe2.data_offset != probe.data_offset || probe2.packed_size != probe.packed_size {
            uniform_middle = false;
        }
    }

    let mut parts = Vec::with_capacity(order.len());
    let mut cursor = 0u64;

    parts.push(VirtualPart {
        virtual_start: cursor,
        virtual_end: cursor + first_packed_size,
        volume_index: first_idx,
        volume_offset: main.data_offset,
    });
    cursor += first_packed_size;

    let last_idx = *order.last().unwrap();
    let middle = &order[1..order.len() - 1];

    if uniform_middle {
        for &idx in middle {
            parts.push(VirtualPart {
                virtual_start: cursor,
                virtual_end: cursor + probe.packed_size,
                volume_index: idx,
                volume_offset: probe.data_offset,
            });
            cursor += probe.packed_size;
        }
        let middle_total = probe.packed_size * middle.len() as u64;
        let last_packed_size = total_size.saturating_sub(first_packed_size).saturating_sub(middle_total);
        parts.push(VirtualPart {
            virtual_start: cursor,
            virtual_end: cursor + last_packed_size,
            volume_index: last_idx,
            volume_offset: probe.data_offset,
        });
    } else {
        // Non-uniform set: probe each middle volume's own header instead of
        // trusting volume 2's layout for the rest.
        for &idx in middle {
            let buf = release.loaders[idx].download_segment(0).await?;
            let header = rar::scan_headers(&buf)?.into_iter().next().ok_or(ArchiveError::MalformedRar)?;
            if !header.is_stored() {
                return Err(ArchiveError::CompressedArchive);
            }
            parts.push(VirtualPart {
                virtual_start: cursor,
                virtual_end: cursor + header.packed_size,
                volume_index: idx,
                volume_offset: header.data_offset,
            });
            cursor += header.packed_size;
        }
        let last_packed_size = total_size.saturating_sub(cursor);
        parts.push(VirtualPart {
            virtual_start: cursor,
            virtual_end: cursor + last_packed_size,
            volume_index: last_idx,
            volume_offset: probe.data_offset,
        });
    }

    Ok(ArchiveBlueprint { kind: ArchiveKind::Rar, name: main.name.clone(), total_size, parts })
}

async fn build_sevenzip_blueprint(release: ReleaseVolumes<'_>) -> Result<ArchiveBlueprint, ArchiveError> {
    let mut order: Vec<usize> = (0..release.files.len()).collect();
    order.sort_by_key(|&i| release.files[i].path.clone());

    // Header discovery needs random access across the whole volume set
    // (7z headers are commonly at the tail); materialize each volume fully
    // once here. Playback itself never goes through this path — it reads
    // through the lazy `SequentialReader`/`VirtualStream` built from the
    // resulting blueprint.
    let mut volumes = Vec::with_capacity(order.len());
    for &idx in &order {
        volumes.push(download_full_volume(&release.loaders[idx]).await?);
    }
    let volume_lens: Vec<u64> = volumes.iter().map(|v| v.len() as u64).collect();

    let entries = sevenzip::scan_entries(volumes)?;
    let main = entries
        .iter()
        .filter(|e| is_video_file(&e.name))
        .max_by_key(|e| e.size)
        .or_else(|| entries.iter().max_by_key(|e| e.size))
        .ok_or(ArchiveError::NoContentFiles)?;

    if !main.stored {
        return Err(ArchiveError::CompressedArchive);
    }

    let parts = map_archive_range_to_volumes(main.archive_offset, main.size, &order, &volume_lens);

    Ok(ArchiveBlueprint { kind: ArchiveKind::SevenZip, name: main.name.clone(), total_size: main.size, parts })
}

/// Linear scan consuming `remaining = size` across volumes starting at
/// `archive_offset`, splitting into one `VirtualPart` per volume crossed.
fn map_archive_range_to_volumes(
    archive_offset: u64,
    size: u64,
    order: &[usize],
    volume_lens: &[u64],
) -> Vec<VirtualPart> {
    let mut parts = Vec::new();
    let mut consumed_before_start = 0u64;
    let mut remaining = size;
    let mut virtual_cursor = 0u64;

    for (pos, &volume_index) in order.iter().enumerate() {
        let volume_len = volume_lens[pos];
        let volume_start = consumed_before_start;
        let volume_end = volume_start + volume_len;
        consumed_before_start = volume_end;

        if archive_offset >= volume_end {
            continue;
        }
        let local_start = archive_offset.max(volume_start) - volume_start;
        let available = volume_len - local_start;
        let take = available.min(remaining);
        if take == 0 {
            continue;
        }

        parts.push(VirtualPart {
            virtual_start: virtual_cursor,
            virtual_end: virtual_cursor + take,
            volume_index,
            volume_offset: local_start,
        });
        virtual_cursor += take;
        remaining -= take;

        if remaining == 0 {
            break;
        }
    }

    parts
}

async fn download_full_volume(loader: &Arc<SegmentLoader>) -> Result<Vec<u8>, ArchiveError> {
    let count = loader.segment_count().await;
    let mut out = Vec::new();
    for ordinal in 0..count {
        let bytes = loader.download_segment(ordinal as u32).await?;
        out.extend_from_slice(&bytes);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_range_spanning_two_volumes() {
        let order = vec![0, 1];
        let lens = vec![100u64, 100u64];
        let parts = map_archive_range_to_volumes(50, 100, &order, &lens);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].volume_index, 0);
        assert_eq!(parts[0].volume_offset, 50);
        assert_eq!(parts[0].len(), 50);
        assert_eq!(parts[1].volume_index, 1);
        assert_eq!(parts[1].volume_offset, 0);
        assert_eq!(parts[1].len(), 50);
    }

    #[test]
    fn maps_range_within_single_volume() {
        let order = vec![0, 1];
        let lens = vec![100u64, 100u64];
        let parts = map_archive_range_to_volumes(10, 30, &order, &lens);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].volume_offset, 10);
        assert_eq!(parts[0].len(), 30);
    }
}
