use crate::foundation::core::{FrameIndex, Rational};
use crate::foundation::error::{MaskfxError, MaskfxResult};

/// How variable-rate sources are brought onto a constant frame grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CfrPolicy {
    /// No conversion; output timestamps follow the source.
    #[default]
    KeepVfr,
    /// Sample-and-hold onto the grid; never drops a source frame.
    Duplicate,
    /// Nearest-frame decimation onto the grid; never repeats a source frame.
    Drop,
    /// Keep every source frame and rewrite its timestamp to `index / fps`.
    Remap,
}

impl CfrPolicy {
    /// Return `true` when the policy changes timestamps.
    pub fn converts(self) -> bool {
        !matches!(self, Self::KeepVfr)
    }
}

/// One output frame: which source frame it shows and when.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MappedFrame {
    /// Source frame shown.
    pub source: FrameIndex,
    /// Output presentation time relative to the first output frame.
    pub pts_us: i64,
}

/// Output frame sequence produced by a [`CfrPolicy`].
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FrameMapping {
    /// Policy that produced the mapping.
    pub policy: CfrPolicy,
    /// Output grid rate; `None` for [`CfrPolicy::KeepVfr`].
    pub rate: Option<Rational>,
    frames: Vec<MappedFrame>,
}

impl FrameMapping {
    /// Map source frames `first..first + pts_us.len()` onto the output.
    ///
    /// `pts_us` are the source presentation times and `end_us` is the end of the last frame, both
    /// on the same clock. Output times are relative to the first source frame.
    pub fn build(
        policy: CfrPolicy,
        first: FrameIndex,
        pts_us: &[i64],
        end_us: i64,
        rate: Option<Rational>,
    ) -> MaskfxResult<Self> {
        let Some(&origin) = pts_us.first() else {
            return Ok(Self {
                policy,
                rate,
                frames: Vec::new(),
            });
        };
        let rel: Vec<i64> = pts_us.iter().map(|p| p - origin).collect();
        let src = |i: usize| FrameIndex(first.0 + i as u64);

        let rate = match (policy, rate) {
            (CfrPolicy::KeepVfr, _) => {
                return Ok(Self {
                    policy,
                    rate: None,
                    frames: rel
                        .iter()
                        .enumerate()
                        .map(|(i, p)| MappedFrame {
                            source: src(i),
                            pts_us: *p,
                        })
                        .collect(),
                });
            }
            (_, Some(r)) => r,
            (_, None) => {
                return Err(MaskfxError::validation(
                    "constant frame rate conversion needs a target frame rate",
                ));
            }
        };

        let frames = match policy {
            CfrPolicy::KeepVfr => Vec::new(),
            CfrPolicy::Remap => (0..rel.len())
                .map(|i| MappedFrame {
                    source: src(i),
                    pts_us: rate.frame_time_micros(i as u64),
                })
                .collect(),
            CfrPolicy::Duplicate => {
                let slots: Vec<u64> = rel.iter().map(|p| grid_slot(*p, rate)).collect();
                if let Some(w) = slots.windows(2).position(|w| w[0] == w[1]) {
                    return Err(MaskfxError::encode(format!(
                        "cfr policy 'duplicate' would drop source frame {} at {} fps",
                        src(w).0,
                        rate
                    )));
                }
                let total = grid_slot(end_us - origin, rate).max(slots[slots.len() - 1] + 1);
                let mut out = Vec::with_capacity(total as usize);
                let mut cur = 0usize;
                for k in 0..total {
                    while cur + 1 < slots.len() && slots[cur + 1] <= k {
                        cur += 1;
                    }
                    out.push(MappedFrame {
                        source: src(cur),
                        pts_us: rate.frame_time_micros(k),
                    });
                }
                out
            }
            CfrPolicy::Drop => {
                let total = grid_slot(end_us - origin, rate).max(1);
                let mut out = Vec::with_capacity(total as usize);
                let mut cur = 0usize;
                let mut last_used: Option<usize> = None;
                for k in 0..total {
                    let t = rate.frame_time_micros(k);
                    while cur + 1 < rel.len() && (rel[cur + 1] - t).abs() <= (rel[cur] - t).abs() {
                        cur += 1;
                    }
                    if last_used == Some(cur) {
                        return Err(MaskfxError::encode(format!(
                            "cfr policy 'drop' would duplicate source frame {} at {} fps",
                            src(cur).0,
                            rate
                        )));
                    }
                    last_used = Some(cur);
                    out.push(MappedFrame {
                        source: src(cur),
                        pts_us: t,
                    });
                }
                out
            }
        };
        Ok(Self {
            policy,
            rate: Some(rate),
            frames,
        })
    }

    /// Output frames in order.
    pub fn frames(&self) -> &[MappedFrame] {
        &self.frames
    }

    /// Number of output frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Return `true` when there are no output frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Source frame of output frame `out`.
    pub fn source_of(&self, out: u64) -> Option<FrameIndex> {
        self.frames.get(usize::try_from(out).ok()?).map(|m| m.source)
    }

    /// Return `true` when every source frame maps to exactly one output frame in order.
    pub fn is_one_to_one(&self) -> bool {
        self.frames.windows(2).all(|w| w[1].source.0 == w[0].source.0 + 1)
    }
}

/// Nearest grid slot of a relative time.
fn grid_slot(rel_us: i64, rate: Rational) -> u64 {
    let numer = i128::from(rel_us.max(0)) * i128::from(rate.num);
    let denom = 1_000_000i128 * i128::from(rate.den);
    ((numer + denom / 2) / denom) as u64
}

#[cfg(test)]
#[path = "../../tests/unit/encode/cfr.rs"]
mod tests;
