//! Source ingest: probing, indexing and decoding video frames.

/// System ffprobe/ffmpeg process plumbing.
pub mod ffmpeg;
/// Decoded frames and native planes.
pub mod frame;
/// Frame table built from packet timing.
pub mod index;
/// Stream, color and field metadata.
pub mod metadata;
pub(crate) mod probe;
/// Random-access source reader.
pub mod reader;
pub(crate) mod y4m;

pub use ffmpeg::ffmpeg_tools_available;
pub use frame::{Frame, NativeLayout, NativePayload, PixelData};
pub use index::{FrameEntry, FrameTable};
pub use metadata::{
    AudioInfo, ChromaSubsampling, ColorInfo, ColorRange, FieldOrder, HdrStaticMetadata, Metadata,
};
pub use reader::{BackendChoice, ReaderOptions, SourceReader};
