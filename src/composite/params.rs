use crate::composite::mask::Mask;
use crate::foundation::core::{FrameIndex, FrameRange};
use crate::foundation::error::{MaskfxError, MaskfxResult};
use std::collections::BTreeMap;

/// One effect parameter value.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// Free text.
    Text(String),
}

impl ParamValue {
    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
        }
    }

    /// Interpolate toward `b`; numeric pairs blend, everything else holds `a`.
    fn lerp(a: &Self, b: &Self, t: f64) -> Self {
        match (a, b) {
            (Self::Int(x), Self::Int(y)) => {
                Self::Int((*x as f64 + (*y - *x) as f64 * t).round() as i64)
            }
            _ => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => Self::Float(x + (y - x) * t),
                _ => a.clone(),
            },
        }
    }
}

/// Parameter name to value.
pub type ParamSnapshot = BTreeMap<String, ParamValue>;

/// Interpolation between keyframes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    /// Numeric fields blend linearly; others hold the earlier keyframe.
    #[default]
    Linear,
    /// Every field holds the earlier keyframe.
    Hold,
}

/// Parameter values pinned at one frame.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ParamKeyframe {
    /// Frame index of the keyframe.
    pub frame: u64,
    /// Values at `frame`; fields missing here fall back to the static values.
    pub values: ParamSnapshot,
}

/// Effect kind with static and optionally keyframed parameters.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EffectParams {
    /// Registered effect name (`mosaic`, `blur`, `pixelate`, or a plugin).
    pub kind: String,
    /// Static values.
    #[serde(default)]
    pub values: ParamSnapshot,
    /// Keyframes sorted by frame, strictly increasing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keyframes: Vec<ParamKeyframe>,
    /// Interpolation between keyframes.
    #[serde(default)]
    pub interpolation: Interpolation,
}

impl EffectParams {
    /// Parameters for `kind` with no values set.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            values: ParamSnapshot::new(),
            keyframes: Vec::new(),
            interpolation: Interpolation::Linear,
        }
    }

    /// Builder: set a static value.
    pub fn with(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Builder: append a keyframe.
    pub fn keyframe(mut self, frame: u64, values: ParamSnapshot) -> Self {
        self.keyframes.push(ParamKeyframe { frame, values });
        self
    }

    /// Check keyframe ordering.
    pub fn validate(&self) -> MaskfxResult<()> {
        if self.kind.trim().is_empty() {
            return Err(MaskfxError::validation("effect kind must be non-empty"));
        }
        if !self.keyframes.windows(2).all(|w| w[0].frame < w[1].frame) {
            return Err(MaskfxError::validation(format!(
                "keyframes of effect '{}' must be strictly increasing by frame",
                self.kind
            )));
        }
        Ok(())
    }

    /// Resolve the parameter snapshot at `frame`.
    pub fn resolve(&self, frame: FrameIndex) -> ResolvedParams {
        let mut values = self.values.clone();
        if !self.keyframes.is_empty() {
            values.extend(self.sample_keyframes(frame.0));
        }
        ResolvedParams {
            kind: self.kind.clone(),
            frame,
            values,
        }
    }

    fn sample_keyframes(&self, f: u64) -> ParamSnapshot {
        let keys = &self.keyframes;
        let idx = keys.partition_point(|k| k.frame <= f);
        if idx == 0 {
            return keys[0].values.clone();
        }
        if idx >= keys.len() {
            return keys[keys.len() - 1].values.clone();
        }
        let a = &keys[idx - 1];
        let b = &keys[idx];
        if a.frame == f || self.interpolation == Interpolation::Hold {
            return a.values.clone();
        }
        let t = (f - a.frame) as f64 / (b.frame - a.frame) as f64;
        a.values
            .iter()
            .map(|(name, va)| {
                let v = match b.values.get(name) {
                    Some(vb) => ParamValue::lerp(va, vb, t),
                    None => va.clone(),
                };
                (name.clone(), v)
            })
            .collect()
    }
}

/// Parameters of one effect resolved for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedParams {
    /// Effect kind.
    pub kind: String,
    /// Frame the values were resolved for.
    pub frame: FrameIndex,
    /// Values.
    pub values: ParamSnapshot,
}

impl ResolvedParams {
    fn err(&self, msg: String) -> MaskfxError {
        MaskfxError::compositing(self.frame.0, msg)
    }

    fn wrong_type(&self, name: &str, want: &str, got: &ParamValue) -> MaskfxError {
        self.err(format!(
            "parameter '{name}' of effect '{}' must be {want}, got {}",
            self.kind,
            got.type_name()
        ))
    }

    /// Integer parameter, `None` when absent.
    pub fn int(&self, name: &str) -> MaskfxResult<Option<i64>> {
        match self.values.get(name) {
            None => Ok(None),
            Some(ParamValue::Int(v)) => Ok(Some(*v)),
            Some(ParamValue::Float(v)) if v.fract() == 0.0 => Ok(Some(*v as i64)),
            Some(other) => Err(self.wrong_type(name, "an integer", other)),
        }
    }

    /// Required non-negative integer parameter, checked under each alias in order.
    pub fn size(&self, names: &[&str]) -> MaskfxResult<u32> {
        for name in names {
            if let Some(v) = self.int(name)? {
                if v < 0 {
                    return Err(self.err(format!(
                        "parameter '{name}' of effect '{}' must be non-negative, got {v}",
                        self.kind
                    )));
                }
                return Ok(v.min(i64::from(u32::MAX)) as u32);
            }
        }
        Err(self.err(format!(
            "effect '{}' requires parameter '{}'",
            self.kind,
            names.first().copied().unwrap_or("")
        )))
    }

    /// Float parameter (integers accepted), `None` when absent.
    pub fn float(&self, name: &str) -> MaskfxResult<Option<f64>> {
        match self.values.get(name) {
            None => Ok(None),
            Some(v) => match v.as_number() {
                Some(n) if n.is_finite() => Ok(Some(n)),
                _ => Err(self.wrong_type(name, "a finite number", v)),
            },
        }
    }

    /// Boolean parameter, `None` when absent.
    pub fn bool(&self, name: &str) -> MaskfxResult<Option<bool>> {
        match self.values.get(name) {
            None => Ok(None),
            Some(ParamValue::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(self.wrong_type(name, "a bool", other)),
        }
    }

    /// Text parameter, `None` when absent.
    pub fn text(&self, name: &str) -> MaskfxResult<Option<&str>> {
        match self.values.get(name) {
            None => Ok(None),
            Some(ParamValue::Text(s)) => Ok(Some(s)),
            Some(other) => Err(self.wrong_type(name, "text", other)),
        }
    }

    /// Text parameter that must be one of `allowed`; `default` when absent.
    pub fn choice(
        &self,
        name: &str,
        allowed: &[&'static str],
        default: &'static str,
    ) -> MaskfxResult<&'static str> {
        let Some(v) = self.text(name)? else {
            return Ok(default);
        };
        allowed.iter().copied().find(|a| *a == v).ok_or_else(|| {
            self.err(format!(
                "parameter '{name}' of effect '{}' must be one of {}, got '{v}'",
                self.kind,
                allowed.join(", ")
            ))
        })
    }

    /// Blend strength in `[0, 1]`, default 1.
    pub fn intensity(&self) -> MaskfxResult<f64> {
        let v = self.float("intensity")?.unwrap_or(1.0);
        if !(0.0..=1.0).contains(&v) {
            return Err(self.err(format!(
                "parameter 'intensity' of effect '{}' must be within [0,1], got {v}",
                self.kind
            )));
        }
        Ok(v)
    }
}

/// Which masks an assignment applies to.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentTarget {
    /// One tracked object.
    Object(u32),
    /// Every object of a detector class.
    Class(String),
    /// Every object.
    All,
}

impl AssignmentTarget {
    fn specificity(&self) -> u8 {
        match self {
            Self::Object(_) => 2,
            Self::Class(_) => 1,
            Self::All => 0,
        }
    }

    fn matches(&self, object_id: u32, class_label: &str) -> bool {
        match self {
            Self::Object(id) => *id == object_id,
            Self::Class(c) => c == class_label,
            Self::All => true,
        }
    }
}

/// Effect applied to a target, optionally only within a frame range.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EffectAssignment {
    /// Masks this applies to.
    pub target: AssignmentTarget,
    /// Frames this applies to; `None` means every frame.
    #[serde(default)]
    pub range: Option<FrameRange>,
    /// Effect and parameters.
    pub effect: EffectParams,
}

/// Maps a mask at a frame to the effect it receives.
pub trait AssignmentLookup: Sync {
    /// Effect for the object, `None` when it is left untouched.
    fn effect_for(&self, object_id: u32, class_label: &str, frame: FrameIndex)
    -> Option<&EffectParams>;

    /// Effect for `mask` at its own frame.
    fn effect_for_mask(&self, mask: &Mask) -> Option<&EffectParams> {
        self.effect_for(mask.object_id, &mask.class_label, mask.frame)
    }
}

/// Assignments are matched most specific first (object, class, all); among equally specific
/// matches the last listed wins.
impl AssignmentLookup for [EffectAssignment] {
    fn effect_for(
        &self,
        object_id: u32,
        class_label: &str,
        frame: FrameIndex,
    ) -> Option<&EffectParams> {
        let mut best: Option<&EffectAssignment> = None;
        for a in self {
            if !a.target.matches(object_id, class_label)
                || a.range.is_some_and(|r| !r.contains(frame))
            {
                continue;
            }
            if best.is_none_or(|b| a.target.specificity() >= b.target.specificity()) {
                best = Some(a);
            }
        }
        best.map(|a| &a.effect)
    }
}

impl AssignmentLookup for Vec<EffectAssignment> {
    fn effect_for(
        &self,
        object_id: u32,
        class_label: &str,
        frame: FrameIndex,
    ) -> Option<&EffectParams> {
        self.as_slice().effect_for(object_id, class_label, frame)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/composite/params.rs"]
mod tests;
