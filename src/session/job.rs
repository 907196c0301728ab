use crate::composite::compositor::{OverlapRule, is_touched};
use crate::composite::effects::EffectRegistry;
use crate::composite::params::EffectAssignment;
use crate::encode::cfr::CfrPolicy;
use crate::encode::plan::{ColorTransform, DeinterlacePolicy, EncodeRequest, OutputSpec};
use crate::foundation::core::{FrameIndex, FrameRange, RangeSet, Rational};
use crate::foundation::error::{MaskfxError, MaskfxResult};
use crate::masks::detections::Detections;
use crate::masks::merge::IdMergeTable;
use crate::masks::source::{BoxMaskSource, InMemoryMaskSource, MaskSource, PngMaskSource};
use crate::session::config::PipelineConfig;
use rayon::prelude::*;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Where a job's masks come from.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MaskSourceSpec {
    /// No masks: the job only remuxes or transcodes.
    #[default]
    None,
    /// Per-frame id images, optionally described by a detections document.
    Png {
        /// Directory holding the images.
        dir: PathBuf,
        /// File name pattern with a `{:0N}` frame placeholder.
        #[serde(default)]
        pattern: Option<String>,
        /// Detections document for class labels and confidences.
        #[serde(default)]
        detections: Option<PathBuf>,
        /// Id merge table.
        #[serde(default)]
        merge: Option<PathBuf>,
    },
    /// Rectangles from detection boxes.
    Boxes {
        /// Detections document.
        detections: PathBuf,
        /// Id merge table.
        #[serde(default)]
        merge: Option<PathBuf>,
    },
}

fn new_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One render: source, masks, effects, and how the output is written.
///
/// Policies left unset take the [`PipelineConfig`] value (see [`RenderJob::apply_defaults`]).
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RenderJob {
    /// Job identifier; generated when absent.
    #[serde(default = "new_job_id")]
    pub id: String,
    /// Source video.
    pub input: PathBuf,
    /// Output video.
    pub output: PathBuf,
    /// Source frames to render; `None` renders the whole source.
    #[serde(default)]
    pub range: Option<FrameRange>,
    /// Mask source.
    #[serde(default)]
    pub masks: MaskSourceSpec,
    /// Effect assignments.
    #[serde(default)]
    pub assignments: Vec<EffectAssignment>,
    /// How overlapping masks combine.
    #[serde(default)]
    pub overlap: OverlapRule,
    /// Output container/codec choices.
    #[serde(default)]
    pub format: OutputSpec,
    /// Copy source audio bit-exactly.
    #[serde(default)]
    pub audio_passthrough: Option<bool>,
    /// Constant frame rate handling.
    #[serde(default)]
    pub cfr_policy: Option<CfrPolicy>,
    /// Target rate for CFR conversion.
    #[serde(default)]
    pub cfr_rate: Option<Rational>,
    /// Field handling.
    #[serde(default)]
    pub deinterlace: Option<DeinterlacePolicy>,
    /// Color transform.
    #[serde(default)]
    pub color_transform: ColorTransform,
}

impl RenderJob {
    /// Job writing `input` to `output` unchanged, with every policy unset.
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            id: new_job_id(),
            input: input.into(),
            output: output.into(),
            range: None,
            masks: MaskSourceSpec::None,
            assignments: Vec::new(),
            overlap: OverlapRule::default(),
            format: OutputSpec::default(),
            audio_passthrough: None,
            cfr_policy: None,
            cfr_rate: None,
            deinterlace: None,
            color_transform: ColorTransform::None,
        }
    }

    /// Parse a job from a JSON reader.
    pub fn from_reader<R: std::io::Read>(r: R) -> MaskfxResult<Self> {
        serde_json::from_reader(r)
            .map_err(|e| MaskfxError::validation(format!("parse render job JSON: {e}")))
    }

    /// Parse a job from a JSON file; relative paths resolve against the file's directory.
    pub fn from_path(path: impl AsRef<Path>) -> MaskfxResult<Self> {
        let path = path.as_ref();
        let f = File::open(path).map_err(|e| {
            MaskfxError::validation(format!("open render job '{}': {e}", path.display()))
        })?;
        let mut job = Self::from_reader(BufReader::new(f))?;
        if let Some(base) = path.parent() {
            job.resolve_paths(base);
        }
        Ok(job)
    }

    /// Make every relative path absolute against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let fix = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        fix(&mut self.input);
        fix(&mut self.output);
        match &mut self.masks {
            MaskSourceSpec::None => {}
            MaskSourceSpec::Png {
                dir,
                detections,
                merge,
                ..
            } => {
                fix(dir);
                detections.iter_mut().for_each(fix);
                merge.iter_mut().for_each(fix);
            }
            MaskSourceSpec::Boxes { detections, merge } => {
                fix(detections);
                merge.iter_mut().for_each(fix);
            }
        }
        if let ColorTransform::Lut3d { path } = &mut self.color_transform {
            fix(path);
        }
    }

    /// Fill unset policies from `cfg`.
    pub fn apply_defaults(&mut self, cfg: &PipelineConfig) {
        self.audio_passthrough.get_or_insert(cfg.audio_passthrough);
        self.cfr_policy.get_or_insert(cfg.cfr_policy);
        self.deinterlace.get_or_insert(cfg.deinterlace);
    }

    /// Check the job against the effects available to it.
    pub fn validate(&self, registry: &EffectRegistry) -> MaskfxResult<()> {
        if self.id.trim().is_empty() {
            return Err(MaskfxError::validation("job id must be non-empty"));
        }
        if self.input == self.output {
            return Err(MaskfxError::validation(format!(
                "job {} writes over its own input '{}'",
                self.id,
                self.input.display()
            )));
        }
        if let Some(r) = self.range
            && r.is_empty()
        {
            return Err(MaskfxError::validation(format!(
                "job {} has an empty frame range",
                self.id
            )));
        }
        for a in &self.assignments {
            a.effect.validate()?;
            if registry.get(&a.effect.kind).is_none() {
                return Err(MaskfxError::validation(format!(
                    "unknown effect kind '{}' (available: {})",
                    a.effect.kind,
                    registry.names().join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Frames to render out of a source of `frame_count` frames.
    pub fn resolve_range(&self, frame_count: u64) -> MaskfxResult<FrameRange> {
        let range = match self.range {
            Some(r) => r,
            None => FrameRange::from_bounds(0, frame_count)?,
        };
        if range.is_empty() {
            return Err(MaskfxError::validation(format!(
                "job {} renders no frames",
                self.id
            )));
        }
        Ok(range)
    }

    /// Build the mask source the job names.
    pub fn mask_source(&self) -> MaskfxResult<Box<dyn MaskSource>> {
        let merge_table = |p: &Option<PathBuf>| match p {
            Some(p) => IdMergeTable::from_path(p),
            None => Ok(IdMergeTable::identity()),
        };
        Ok(match &self.masks {
            MaskSourceSpec::None => Box::new(InMemoryMaskSource::new()),
            MaskSourceSpec::Png {
                dir,
                pattern,
                detections,
                merge,
            } => {
                let mut src = PngMaskSource::new(dir)?;
                if let Some(p) = pattern {
                    src = src.with_pattern(p.clone())?;
                }
                if let Some(d) = detections {
                    src = src.with_detections(Detections::from_path(d)?)?;
                }
                Box::new(src.with_merge(&merge_table(merge)?)?)
            }
            MaskSourceSpec::Boxes { detections, merge } => Box::new(
                BoxMaskSource::new(Detections::from_path(detections)?)?
                    .with_merge(&merge_table(merge)?)?,
            ),
        })
    }

    /// Frames of `range` that compositing changes.
    pub fn touched_frames(
        &self,
        masks: &dyn MaskSource,
        range: FrameRange,
    ) -> MaskfxResult<RangeSet> {
        if self.assignments.is_empty() {
            return Ok(RangeSet::new());
        }
        let touched = (range.start.0..range.end.0)
            .into_par_iter()
            .map(|i| {
                let f = FrameIndex(i);
                let set = masks.masks_for(f)?;
                Ok(is_touched(&set, self.assignments.as_slice()).then_some(f))
            })
            .collect::<MaskfxResult<Vec<_>>>()?;
        Ok(RangeSet::from_frames(touched.into_iter().flatten()))
    }

    /// Encoder request; unset policies take their built-in defaults.
    pub fn encode_request(&self) -> EncodeRequest {
        EncodeRequest {
            output: self.format.clone(),
            audio_passthrough: self.audio_passthrough.unwrap_or(true),
            cfr_policy: self.cfr_policy.unwrap_or_default(),
            cfr_rate: self.cfr_rate,
            deinterlace: self.deinterlace.unwrap_or_default(),
            color_transform: self.color_transform.clone(),
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/session/job.rs"]
mod tests;
