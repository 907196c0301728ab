use crate::foundation::error::{MaskfxError, MaskfxResult};

/// Absolute 0-based frame index in source presentation order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u64);

/// Half-open frame range `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct FrameRange {
    /// Inclusive range start.
    pub start: FrameIndex,
    /// Exclusive range end.
    pub end: FrameIndex, // exclusive
}

impl FrameRange {
    /// Create a validated range with `start <= end`.
    pub fn new(start: FrameIndex, end: FrameIndex) -> MaskfxResult<Self> {
        if start.0 > end.0 {
            return Err(MaskfxError::validation("FrameRange start must be <= end"));
        }
        Ok(Self { start, end })
    }

    /// Shorthand for `FrameRange::new(FrameIndex(start), FrameIndex(end))`.
    pub fn from_bounds(start: u64, end: u64) -> MaskfxResult<Self> {
        Self::new(FrameIndex(start), FrameIndex(end))
    }

    /// Number of frames contained in the range.
    pub fn len_frames(self) -> u64 {
        self.end.0.saturating_sub(self.start.0)
    }

    /// Return `true` when the range has no frames.
    pub fn is_empty(self) -> bool {
        self.start.0 == self.end.0
    }

    /// Return `true` when `f` is inside `[start, end)`.
    pub fn contains(self, f: FrameIndex) -> bool {
        self.start.0 <= f.0 && f.0 < self.end.0
    }

    /// Return `true` when both ranges share at least one frame.
    pub fn overlaps(self, other: FrameRange) -> bool {
        self.start.0 < other.end.0 && other.start.0 < self.end.0
    }

    /// Intersect with `other`, returning `None` when they do not overlap.
    pub fn intersect(self, other: FrameRange) -> Option<FrameRange> {
        let start = self.start.0.max(other.start.0);
        let end = self.end.0.min(other.end.0);
        (start < end).then_some(FrameRange {
            start: FrameIndex(start),
            end: FrameIndex(end),
        })
    }

    /// Iterate the frame indices of this range.
    pub fn iter(self) -> impl Iterator<Item = FrameIndex> {
        (self.start.0..self.end.0).map(FrameIndex)
    }
}

/// Sorted, non-overlapping, non-adjacent set of frame ranges.
///
/// Used for touched ranges: every frame at least one effect was applied to.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RangeSet {
    ranges: Vec<FrameRange>,
}

impl RangeSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from arbitrary (possibly overlapping) ranges.
    pub fn from_ranges(ranges: impl IntoIterator<Item = FrameRange>) -> Self {
        let mut out = Self::new();
        for r in ranges {
            out.insert(r);
        }
        out
    }

    /// Build a set from individual frame indices.
    pub fn from_frames(frames: impl IntoIterator<Item = FrameIndex>) -> Self {
        let mut sorted: Vec<u64> = frames.into_iter().map(|f| f.0).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut ranges = Vec::new();
        let mut iter = sorted.into_iter();
        if let Some(first) = iter.next() {
            let (mut start, mut end) = (first, first + 1);
            for f in iter {
                if f == end {
                    end += 1;
                } else {
                    ranges.push(FrameRange {
                        start: FrameIndex(start),
                        end: FrameIndex(end),
                    });
                    start = f;
                    end = f + 1;
                }
            }
            ranges.push(FrameRange {
                start: FrameIndex(start),
                end: FrameIndex(end),
            });
        }
        Self { ranges }
    }

    /// Insert a range, merging with overlapping or adjacent neighbours.
    pub fn insert(&mut self, range: FrameRange) {
        if range.is_empty() {
            return;
        }
        let mut start = range.start.0;
        let mut end = range.end.0;
        let mut kept = Vec::with_capacity(self.ranges.len() + 1);
        for r in self.ranges.drain(..) {
            if r.end.0 < start || r.start.0 > end {
                kept.push(r);
            } else {
                start = start.min(r.start.0);
                end = end.max(r.end.0);
            }
        }
        kept.push(FrameRange {
            start: FrameIndex(start),
            end: FrameIndex(end),
        });
        kept.sort_by_key(|r| r.start.0);
        self.ranges = kept;
    }

    /// Return `true` when `f` lies in any range.
    pub fn contains(&self, f: FrameIndex) -> bool {
        let idx = self.ranges.partition_point(|r| r.end.0 <= f.0);
        self.ranges.get(idx).is_some_and(|r| r.contains(f))
    }

    /// Return `true` when any frame of `range` lies in the set.
    pub fn intersects(&self, range: FrameRange) -> bool {
        self.ranges.iter().any(|r| r.overlaps(range))
    }

    /// Borrow the normalized ranges.
    pub fn ranges(&self) -> &[FrameRange] {
        &self.ranges
    }

    /// Total number of frames covered.
    pub fn len_frames(&self) -> u64 {
        self.ranges.iter().map(|r| r.len_frames()).sum()
    }

    /// Return `true` when the set covers no frames.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Positive rational number, used for frame rates and stream time bases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Rational {
    /// Numerator.
    pub num: u32,
    /// Denominator, must be non-zero.
    pub den: u32, // must be > 0
}

impl Rational {
    /// One microsecond, the unit timestamps are compared in.
    pub const MICROS: Rational = Rational {
        num: 1,
        den: 1_000_000,
    };

    /// Create a validated, reduced rational with non-zero numerator and denominator.
    pub fn new(num: u32, den: u32) -> MaskfxResult<Self> {
        if den == 0 {
            return Err(MaskfxError::validation("rational den must be > 0"));
        }
        if num == 0 {
            return Err(MaskfxError::validation("rational num must be > 0"));
        }
        let g = gcd(u64::from(num), u64::from(den)) as u32;
        Ok(Self {
            num: num / g,
            den: den / g,
        })
    }

    /// Parse an ffmpeg-style ratio (`"30000/1001"`, `"25"`, `"25:1"`).
    ///
    /// Returns `None` for zero or malformed values (ffprobe reports unknown rates as `0/0`).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (a, b) = match s.split_once(['/', ':']) {
            Some((a, b)) => (a.trim().parse::<u32>().ok()?, b.trim().parse::<u32>().ok()?),
            None => (s.parse::<u32>().ok()?, 1),
        };
        Self::new(a, b).ok()
    }

    /// Convert to floating point.
    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// Inverse (`den/num`), e.g. the time base of a frame rate.
    pub fn recip(self) -> Self {
        Self {
            num: self.den,
            den: self.num,
        }
    }

    /// Rescale `value` expressed in units of `self` into units of `target`, rounding to nearest.
    pub fn rescale(self, value: i64, target: Rational) -> i64 {
        let numer = i128::from(value) * i128::from(self.num) * i128::from(target.den);
        let denom = i128::from(self.den) * i128::from(target.num);
        div_round(numer, denom) as i64
    }

    /// Convert a timestamp in this time base to microseconds.
    pub fn to_micros(self, value: i64) -> i64 {
        self.rescale(value, Self::MICROS)
    }

    /// Presentation time in microseconds of frame `index` at this frame rate.
    pub fn frame_time_micros(self, index: u64) -> i64 {
        let numer = i128::from(index) * 1_000_000 * i128::from(self.den);
        div_round(numer, i128::from(self.num)) as i64
    }

    /// Duration of one frame in seconds, treating `self` as a frame rate.
    pub fn frame_duration_secs(self) -> f64 {
        f64::from(self.den) / f64::from(self.num)
    }
}

impl std::fmt::Display for Rational {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}

fn div_round(numer: i128, denom: i128) -> i128 {
    if denom == 0 {
        return 0;
    }
    let (n, d) = if denom < 0 {
        (-numer, -denom)
    } else {
        (numer, denom)
    };
    if n >= 0 {
        (n + d / 2) / d
    } else {
        -((-n + d / 2) / d)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
