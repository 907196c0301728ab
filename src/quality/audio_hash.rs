use crate::foundation::error::{MaskfxError, MaskfxResult};
use crate::media::ffmpeg;
use crate::media::metadata::AudioInfo;
use sha2::{Digest, Sha256};
use std::path::Path;

/// SHA-256 of a decoded audio stream.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AudioDigest {
    /// Lowercase hex digest.
    pub sha256: String,
    /// Decoded PCM byte count.
    pub bytes: u64,
}

/// Lowercase hex encoding of a digest.
pub fn hex_digest(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Hash the first audio stream of `path` in its native sample format.
///
/// Sample values are hashed exactly as decoded, so two streams match only when every sample is
/// identical. A source without audio is an input error.
#[tracing::instrument(skip(audio), fields(path = %path.display()))]
pub fn hash_audio(path: &Path, audio: Option<&AudioInfo>) -> MaskfxResult<AudioDigest> {
    let audio = audio.ok_or_else(|| {
        MaskfxError::input(format!("'{}' has no audio stream", path.display()))
    })?;
    let mut hasher = Sha256::new();
    let bytes = ffmpeg::stream_audio_pcm(path, audio, |buf| hasher.update(buf))?;
    let digest = AudioDigest {
        sha256: hex_digest(&hasher.finalize()),
        bytes,
    };
    tracing::debug!(sha256 = %digest.sha256, bytes, "audio hashed");
    Ok(digest)
}

#[cfg(test)]
#[path = "../../tests/unit/quality/audio_hash.rs"]
mod tests;
