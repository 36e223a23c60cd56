//! Blueprint types shared by the RAR/7z scanners and the virtual stream.
//! `ArchiveKind` recasts the distilled spec's `Blueprint interface{}` as a
//! sealed sum (spec §9 "cyclic typed holes" redesign).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Rar,
    SevenZip,
    Direct,
}

/// One contiguous slice of the blueprint's logical range backed by a single
/// underlying volume file.
#[derive(Debug, Clone)]
pub struct VirtualPart {
    pub virtual_start: u64,
    pub virtual_end: u64,
    pub volume_index: usize,
    pub volume_offset: u64,
}

impl VirtualPart {
    pub fn len(&self) -> u64 {
        self.virtual_end - self.virtual_start
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.virtual_start && offset < self.virtual_end
    }
}

/// Result of scanning a release: a name, a total logical size, and an
/// ordered, gap-free list of parts. Immutable once built.
#[derive(Debug, Clone)]
pub struct ArchiveBlueprint {
    pub kind: ArchiveKind,
    pub name: String,
    pub total_size: u64,
    pub parts: Vec<VirtualPart>,
}

impl ArchiveBlueprint {
    pub fn direct(name: String, volume_index: usize, total_size: u64) -> Self {
        Self {
            kind: ArchiveKind::Direct,
            name,
            total_size,
            parts: vec![VirtualPart { virtual_start: 0, virtual_end: total_size, volume_index, volume_offset: 0 }],
        }
    }

    /// Binary search for the part owning `offset`; `None` past EOF.
    pub fn part_for_offset(&self, offset: u64) -> Option<&VirtualPart> {
        let mut lo = 0usize;
        let mut hi = self.parts.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.parts[mid].virtual_start <= offset {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo == 0 {
            return None;
        }
        self.parts.get(lo - 1).filter(|p| p.contains(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blueprint() -> ArchiveBlueprint {
        ArchiveBlueprint {
            kind: ArchiveKind::Rar,
            name: "movie.mkv".into(),
            total_size: 300,
            parts: vec![
                VirtualPart { virtual_start: 0, virtual_end: 100, volume_index: 0, volume_offset: 50 },
                VirtualPart { virtual_start: 100, virtual_end: 200, volume_index: 1, volume_offset: 0 },
                VirtualPart { virtual_start: 200, virtual_end: 300, volume_index: 2, volume_offset: 0 },
            ],
        }
    }

    #[test]
    fn finds_owning_part_at_boundaries() {
        let bp = blueprint();
        assert_eq!(bp.part_for_offset(0).unwrap().volume_index, 0);
        assert_eq!(bp.part_for_offset(99).unwrap().volume_index, 0);
        assert_eq!(bp.part_for_offset(100).unwrap().volume_index, 1);
        assert_eq!(bp.part_for_offset(299).unwrap().volume_index, 2);
        assert!(bp.part_for_offset(300).is_none());
    }
}
