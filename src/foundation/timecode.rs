use crate::foundation::core::Rational;
use crate::foundation::error::{MaskfxError, MaskfxResult};

/// SMPTE timecode `HH:MM:SS:FF`, with `;` before the frame field marking drop-frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Timecode {
    /// Hours, 0..24.
    pub hours: u8,
    /// Minutes, 0..60.
    pub minutes: u8,
    /// Seconds, 0..60.
    pub seconds: u8,
    /// Frames within the second.
    pub frames: u8,
    /// Drop-frame counting (29.97 / 59.94 only).
    pub drop_frame: bool,
}

impl Timecode {
    /// Parse `HH:MM:SS:FF` or `HH:MM:SS;FF` (also accepts `.` as the drop-frame separator).
    pub fn parse(s: &str) -> MaskfxResult<Self> {
        let s = s.trim();
        let bad = || MaskfxError::validation(format!("invalid timecode '{s}'"));
        if s.len() != 11 {
            return Err(bad());
        }
        let bytes = s.as_bytes();
        if bytes[2] != b':' || bytes[5] != b':' {
            return Err(bad());
        }
        let drop_frame = match bytes[8] {
            b':' => false,
            b';' | b'.' => true,
            _ => return Err(bad()),
        };
        let field = |a: usize| s[a..a + 2].parse::<u8>().map_err(|_| bad());
        let tc = Self {
            hours: field(0)?,
            minutes: field(3)?,
            seconds: field(6)?,
            frames: field(9)?,
            drop_frame,
        };
        if tc.hours >= 24 || tc.minutes >= 60 || tc.seconds >= 60 {
            return Err(bad());
        }
        Ok(tc)
    }

    /// Convert to an absolute frame number at `rate`.
    pub fn to_frame_number(self, rate: Rational) -> MaskfxResult<u64> {
        let nominal = nominal_fps(rate)?;
        if u64::from(self.frames) >= nominal {
            return Err(MaskfxError::validation(format!(
                "timecode {self} has frame field >= {nominal}"
            )));
        }
        let total_minutes = 60 * u64::from(self.hours) + u64::from(self.minutes);
        let mut n = (3600 * u64::from(self.hours) + 60 * u64::from(self.minutes)
            + u64::from(self.seconds))
            * nominal
            + u64::from(self.frames);
        if self.drop_frame {
            let drop = drop_count(rate, nominal)?;
            if self.seconds == 0 && self.minutes % 10 != 0 && u64::from(self.frames) < drop {
                return Err(MaskfxError::validation(format!(
                    "timecode {self} names a dropped frame number"
                )));
            }
            n -= drop * (total_minutes - total_minutes / 10);
        }
        Ok(n)
    }

    /// Build the timecode of absolute frame number `n` at `rate`.
    pub fn from_frame_number(n: u64, rate: Rational, drop_frame: bool) -> MaskfxResult<Self> {
        let nominal = nominal_fps(rate)?;
        let mut n = n;
        if drop_frame {
            let drop = drop_count(rate, nominal)?;
            let per_10min = nominal * 600 - drop * 9;
            let per_min = nominal * 60 - drop;
            let d = n / per_10min;
            let m = n % per_10min;
            n += drop * 9 * d;
            if m > drop {
                n += drop * ((m - drop) / per_min);
            }
        }
        let secs_total = n / nominal;
        Ok(Self {
            hours: ((secs_total / 3600) % 24) as u8,
            minutes: ((secs_total / 60) % 60) as u8,
            seconds: (secs_total % 60) as u8,
            frames: (n % nominal) as u8,
            drop_frame,
        })
    }

    /// Timecode `frames` frames after this one.
    pub fn offset(self, frames: u64, rate: Rational) -> MaskfxResult<Self> {
        let start = self.to_frame_number(rate)?;
        Self::from_frame_number(start + frames, rate, self.drop_frame)
    }
}

impl std::fmt::Display for Timecode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sep = if self.drop_frame { ';' } else { ':' };
        write!(
            f,
            "{:02}:{:02}:{:02}{sep}{:02}",
            self.hours, self.minutes, self.seconds, self.frames
        )
    }
}

fn nominal_fps(rate: Rational) -> MaskfxResult<u64> {
    let nominal = rate.as_f64().round() as u64;
    if nominal == 0 {
        return Err(MaskfxError::validation(format!(
            "frame rate {rate} is too low for timecode"
        )));
    }
    Ok(nominal)
}

fn drop_count(rate: Rational, nominal: u64) -> MaskfxResult<u64> {
    match nominal {
        30 | 60 if rate.den != 1 => Ok(nominal / 15),
        _ => Err(MaskfxError::validation(format!(
            "drop-frame timecode requires 29.97 or 59.94 fps, got {rate}"
        ))),
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/timecode.rs"]
mod tests;
