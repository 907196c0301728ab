/// Convenience result type used across maskfx.
pub type MaskfxResult<T> = Result<T, MaskfxError>;

/// Pipeline stage a job-level error was raised from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Opening and probing the source.
    Open,
    /// Loading masks and planning the output route.
    Plan,
    /// Decoding source frames.
    Decode,
    /// Applying effects to frames.
    Composite,
    /// Encoding and muxing the output.
    Encode,
    /// Validating output against the source.
    Validate,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Plan => "plan",
            Self::Decode => "decode",
            Self::Composite => "composite",
            Self::Encode => "encode",
            Self::Validate => "validate",
        };
        f.write_str(s)
    }
}

/// Coarse error class, used by callers deciding how to report a failed job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Unusable input: container, codec, corrupt stream, missing audio.
    Input,
    /// Decode failure that could not be recovered by skipping packets.
    Decode,
    /// Malformed masks, unknown effects, bad parameters.
    Compositing,
    /// Output codec/container or write failures.
    Encode,
    /// Invalid configuration or job data.
    Validation,
    /// The job was cancelled by the caller.
    Cancelled,
    /// Anything else (IO, dependencies).
    Other,
}

/// Top-level error taxonomy used by pipeline APIs.
#[derive(thiserror::Error, Debug)]
pub enum MaskfxError {
    /// The source container could not be demuxed.
    #[error("unsupported container: {0}")]
    UnsupportedContainer(String),

    /// The source codec cannot be decoded.
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// The source contains no decodable frame.
    #[error("corrupt file: {0}")]
    CorruptFile(String),

    /// Other input problems (missing streams, unreadable files).
    #[error("input error: {0}")]
    Input(String),

    /// Decode failure after packet-level recovery was exhausted.
    #[error("decode error: {0}")]
    Decode(String),

    /// Compositing failure, with the offending frame index when known.
    #[error("compositing error{}: {msg}", frame_suffix(.frame))]
    Compositing {
        /// Frame index being composited.
        frame: Option<u64>,
        /// Description of the failure.
        msg: String,
    },

    /// Encoder or muxer failure.
    #[error("encode error: {0}")]
    Encode(String),

    /// Invalid user-provided data or configuration.
    #[error("validation error: {0}")]
    Validation(String),

    /// Errors when serializing or deserializing data structures.
    #[error("serialization error: {0}")]
    Serde(String),

    /// The job was cancelled before completion.
    #[error("job cancelled")]
    Cancelled,

    /// A fatal error annotated with the job and stage it aborted.
    #[error("job {job_id} failed during {stage}: {source}")]
    Job {
        /// Job identifier.
        job_id: String,
        /// Stage that failed.
        stage: Stage,
        /// Underlying error.
        #[source]
        source: Box<MaskfxError>,
    },

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn frame_suffix(frame: &Option<u64>) -> String {
    match frame {
        Some(f) => format!(" at frame {f}"),
        None => String::new(),
    }
}

impl MaskfxError {
    /// Build a [`MaskfxError::UnsupportedContainer`] value.
    pub fn unsupported_container(msg: impl Into<String>) -> Self {
        Self::UnsupportedContainer(msg.into())
    }

    /// Build a [`MaskfxError::UnsupportedCodec`] value.
    pub fn unsupported_codec(msg: impl Into<String>) -> Self {
        Self::UnsupportedCodec(msg.into())
    }

    /// Build a [`MaskfxError::CorruptFile`] value.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptFile(msg.into())
    }

    /// Build a [`MaskfxError::Input`] value.
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    /// Build a [`MaskfxError::Decode`] value.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Build a [`MaskfxError::Compositing`] value bound to a frame index.
    pub fn compositing(frame: impl Into<Option<u64>>, msg: impl Into<String>) -> Self {
        Self::Compositing {
            frame: frame.into(),
            msg: msg.into(),
        }
    }

    /// Build a [`MaskfxError::Encode`] value.
    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    /// Build a [`MaskfxError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`MaskfxError::Serde`] value.
    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }

    /// Attach job id and stage. Errors that already carry job context are returned unchanged.
    pub fn in_job(self, job_id: &str, stage: Stage) -> Self {
        match self {
            Self::Job { .. } => self,
            other => Self::Job {
                job_id: job_id.to_string(),
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Fill in the frame index of a compositing error raised without one.
    pub fn at_frame(self, index: u64) -> Self {
        match self {
            Self::Compositing { frame: None, msg } => Self::Compositing {
                frame: Some(index),
                msg,
            },
            other => other,
        }
    }

    /// Classify this error, looking through job context.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::UnsupportedContainer(_)
            | Self::UnsupportedCodec(_)
            | Self::CorruptFile(_)
            | Self::Input(_) => ErrorClass::Input,
            Self::Decode(_) => ErrorClass::Decode,
            Self::Compositing { .. } => ErrorClass::Compositing,
            Self::Encode(_) => ErrorClass::Encode,
            Self::Validation(_) | Self::Serde(_) => ErrorClass::Validation,
            Self::Cancelled => ErrorClass::Cancelled,
            Self::Job { source, .. } => source.class(),
            Self::Other(_) => ErrorClass::Other,
        }
    }

    /// Stage recorded on a job-level error.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Job { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
