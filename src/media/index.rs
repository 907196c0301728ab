use crate::foundation::core::Rational;

/// One packet as reported by the demuxer, in decode order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PacketInfo {
    pub(crate) pts: Option<i64>,
    pub(crate) dts: Option<i64>,
    pub(crate) keyframe: bool,
    pub(crate) corrupt: bool,
}

/// Presentation-order entry of the seek table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameEntry {
    /// Presentation timestamp in stream time base.
    pub pts: i64,
    /// Decode timestamp, when known.
    pub dts: Option<i64>,
    /// Sync point: decoding can start here.
    pub keyframe: bool,
}

/// Per-frame timestamps and sync points of a video stream, in presentation order.
///
/// This is the reader's seek table; VFR sources get their true pts from here instead of a
/// synthesized constant-rate index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameTable {
    entries: Vec<FrameEntry>,
    time_base: Rational,
}

impl FrameTable {
    /// Build a table from demuxed packets.
    ///
    /// Corrupt packets and packets without any timestamp are skipped; each skip produces one
    /// warning string.
    pub(crate) fn from_packets(
        packets: &[PacketInfo],
        time_base: Rational,
    ) -> (Self, Vec<String>) {
        let mut warnings = Vec::new();
        let mut entries = Vec::with_capacity(packets.len());
        for (n, p) in packets.iter().enumerate() {
            if p.corrupt {
                warnings.push(format!("skipped corrupt packet #{n} (pts {:?})", p.pts));
                continue;
            }
            let Some(pts) = p.pts.or(p.dts) else {
                warnings.push(format!("skipped packet #{n} without timestamps"));
                continue;
            };
            entries.push(FrameEntry {
                pts,
                dts: p.dts,
                keyframe: p.keyframe,
            });
        }
        entries.sort_by_key(|e| e.pts);

        let before = entries.len();
        entries.dedup_by_key(|e| e.pts);
        if entries.len() != before {
            warnings.push(format!(
                "dropped {} packets with duplicate pts",
                before - entries.len()
            ));
        }

        // Leading non-sync frames can never be decoded.
        if let Some(first_key) = entries.iter().position(|e| e.keyframe)
            && first_key > 0
        {
            warnings.push(format!(
                "skipped {first_key} leading frames before the first keyframe"
            ));
            entries.drain(..first_key);
        }
        if !entries.iter().any(|e| e.keyframe) {
            entries.clear();
        }

        (Self { entries, time_base }, warnings)
    }

    /// Constant-rate table where every frame is a sync point and `pts == index`.
    pub fn constant_rate(frame_count: u64, rate: Rational) -> Self {
        let entries = (0..frame_count as i64)
            .map(|i| FrameEntry {
                pts: i,
                dts: Some(i),
                keyframe: true,
            })
            .collect();
        Self {
            entries,
            time_base: rate.recip(),
        }
    }

    /// Number of frames.
    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Return `true` when no decodable frame exists.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Time base of the stored timestamps.
    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// Entry for frame `index`.
    pub fn entry(&self, index: u64) -> Option<&FrameEntry> {
        self.entries.get(usize::try_from(index).ok()?)
    }

    /// All entries in presentation order.
    pub fn entries(&self) -> &[FrameEntry] {
        &self.entries
    }

    /// Presentation time of frame `index` in microseconds.
    pub fn pts_micros(&self, index: u64) -> Option<i64> {
        self.entry(index).map(|e| self.time_base.to_micros(e.pts))
    }

    /// Index of the nearest sync point at or before `index`.
    pub fn keyframe_at_or_before(&self, index: u64) -> Option<u64> {
        let end = usize::try_from(index).ok()?.min(self.entries.len().checked_sub(1)?);
        self.entries[..=end]
            .iter()
            .rposition(|e| e.keyframe)
            .map(|i| i as u64)
    }

    /// Index of the first sync point strictly after `index`.
    pub fn next_keyframe_after(&self, index: u64) -> Option<u64> {
        let start = usize::try_from(index).ok()?.checked_add(1)?;
        self.entries
            .get(start..)?
            .iter()
            .position(|e| e.keyframe)
            .map(|i| (start + i) as u64)
    }

    /// Index of the first frame whose pts is at or after `micros`.
    pub fn index_at_or_after_micros(&self, micros: i64) -> Option<u64> {
        let idx = self
            .entries
            .partition_point(|e| self.time_base.to_micros(e.pts) < micros);
        (idx < self.entries.len()).then_some(idx as u64)
    }

    /// Return `true` when frame durations vary by more than one tick.
    pub fn is_vfr(&self) -> bool {
        let mut deltas = self.entries.windows(2).map(|w| w[1].pts - w[0].pts);
        let Some(first) = deltas.next() else {
            return false;
        };
        deltas.any(|d| (d - first).abs() > 1)
    }

    /// Span from the first pts to the end of the last frame, in microseconds.
    pub fn duration_micros(&self) -> Option<i64> {
        let first = self.entries.first()?;
        let last = self.entries.last()?;
        let last_dur = match self.entries.len() {
            0 | 1 => 0,
            n => self.entries[n - 1].pts - self.entries[n - 2].pts,
        };
        Some(
            self.time_base
                .to_micros(last.pts + last_dur - first.pts),
        )
    }
}

#[cfg(test)]
#[path = "../../tests/unit/media/index.rs"]
mod tests;
