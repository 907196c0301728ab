//! Parsing of `ffprobe -print_format json` output.
//!
//! These functions are pure so the mapping from ffprobe's JSON shape onto [`Metadata`] can be
//! tested without ffprobe installed. ffprobe's own types never leave this module.

use crate::foundation::core::Rational;
use crate::foundation::error::{MaskfxError, MaskfxResult};
use crate::media::index::PacketInfo;
use crate::media::metadata::{
    AudioInfo, ColorInfo, ColorRange, ContentLight, FieldOrder, HdrStaticMetadata,
    MasteringDisplay, Metadata, bit_depth_from_pix_fmt, subsampling_from_pix_fmt,
};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(serde::Deserialize)]
struct ProbeOut {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(serde::Deserialize, Default)]
struct ProbeStream {
    codec_name: Option<String>,
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    field_order: Option<String>,
    color_range: Option<String>,
    color_space: Option<String>,
    color_transfer: Option<String>,
    color_primaries: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    time_base: Option<String>,
    nb_frames: Option<String>,
    bits_per_raw_sample: Option<String>,
    duration: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u16>,
    channel_layout: Option<String>,
    sample_fmt: Option<String>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    side_data_list: Vec<serde_json::Value>,
    #[serde(default)]
    disposition: BTreeMap<String, i64>,
}

#[derive(serde::Deserialize, Default)]
struct ProbeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

#[derive(serde::Deserialize)]
struct PacketsOut {
    #[serde(default)]
    packets: Vec<ProbePacket>,
}

#[derive(serde::Deserialize)]
struct ProbePacket {
    pts: Option<i64>,
    dts: Option<i64>,
    flags: Option<String>,
}

/// Map ffprobe `-show_streams -show_format` JSON onto [`Metadata`].
///
/// Frame count and VFR are provisional here; the reader refines them from the packet table.
pub(crate) fn parse_probe_json(path: &Path, json: &[u8]) -> MaskfxResult<Metadata> {
    let parsed: ProbeOut = serde_json::from_slice(json)
        .map_err(|e| {
            MaskfxError::unsupported_container(format!("ffprobe json parse failed: {e}"))
        })?;
    let format = parsed.format.unwrap_or_default();
    let container = format
        .format_name
        .clone()
        .ok_or_else(|| MaskfxError::unsupported_container("ffprobe reported no container format"))?;

    let video = parsed
        .streams
        .iter()
        .find(|s| {
            s.codec_type.as_deref() == Some("video")
                && s.disposition.get("attached_pic").copied().unwrap_or(0) == 0
        })
        .ok_or_else(|| {
            MaskfxError::unsupported_codec(format!(
                "no video stream found in '{}'",
                path.display()
            ))
        })?;
    let codec = match video.codec_name.as_deref() {
        Some(c) if !c.is_empty() && c != "none" && c != "unknown" => c.to_string(),
        _ => {
            return Err(MaskfxError::unsupported_codec(format!(
                "video codec of '{}' is not recognised",
                path.display()
            )));
        }
    };
    let width = video
        .width
        .filter(|w| *w > 0)
        .ok_or_else(|| MaskfxError::unsupported_codec("missing video width from ffprobe"))?;
    let height = video
        .height
        .filter(|h| *h > 0)
        .ok_or_else(|| MaskfxError::unsupported_codec("missing video height from ffprobe"))?;

    let time_base = video
        .time_base
        .as_deref()
        .and_then(Rational::parse)
        .ok_or_else(|| MaskfxError::corrupt("video stream has no valid time base"))?;
    let avg_frame_rate = video.avg_frame_rate.as_deref().and_then(Rational::parse);
    let declared_frame_rate = video.r_frame_rate.as_deref().and_then(Rational::parse);

    let pix_fmt = video.pix_fmt.clone().filter(|p| !p.is_empty());
    let bit_depth = video
        .bits_per_raw_sample
        .as_deref()
        .and_then(|b| b.parse::<u8>().ok())
        .filter(|b| *b > 0)
        .or_else(|| pix_fmt.as_deref().and_then(bit_depth_from_pix_fmt));
    let subsampling = pix_fmt.as_deref().and_then(subsampling_from_pix_fmt);

    let color = ColorInfo {
        primaries: ColorInfo::tag(video.color_primaries.as_deref()),
        matrix: ColorInfo::tag(video.color_space.as_deref()),
        transfer: ColorInfo::tag(video.color_transfer.as_deref()),
        range: video.color_range.as_deref().and_then(ColorRange::from_ffprobe),
    };

    let duration_us = video
        .duration
        .as_deref()
        .or(format.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .map(|secs| (secs * 1_000_000.0).round() as i64);

    let start_timecode = video
        .tags
        .get("timecode")
        .or_else(|| {
            parsed
                .streams
                .iter()
                .find_map(|s| s.tags.get("timecode"))
        })
        .or_else(|| format.tags.get("timecode"))
        .cloned();
    let reel_name = video
        .tags
        .get("reel_name")
        .or_else(|| parsed.streams.iter().find_map(|s| s.tags.get("reel_name")))
        .or_else(|| format.tags.get("reel_name"))
        .cloned();

    let audio = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
        .map(|a| AudioInfo {
            codec: a.codec_name.clone().unwrap_or_default(),
            sample_rate: a
                .sample_rate
                .as_deref()
                .and_then(|r| r.parse().ok())
                .unwrap_or(0),
            channels: a.channels.unwrap_or(0),
            channel_layout: a.channel_layout.clone(),
            sample_fmt: a.sample_fmt.clone(),
        });

    let hdr = parse_hdr_side_data(&video.side_data_list);
    let vfr = match (avg_frame_rate, declared_frame_rate) {
        (Some(a), Some(r)) => a != r,
        _ => false,
    };

    Ok(Metadata {
        path: path.to_path_buf(),
        container,
        codec,
        width,
        height,
        avg_frame_rate,
        declared_frame_rate,
        time_base,
        frame_count: video.nb_frames.as_deref().and_then(|n| n.parse().ok()),
        vfr,
        duration_us,
        pix_fmt,
        bit_depth,
        subsampling,
        field_order: video.field_order.as_deref().and_then(FieldOrder::from_ffprobe),
        color,
        hdr,
        start_timecode,
        reel_name,
        audio,
    })
}

/// Parse `-show_entries packet=pts,dts,flags` JSON for one stream.
pub(crate) fn parse_packets_json(json: &[u8]) -> MaskfxResult<Vec<PacketInfo>> {
    let parsed: PacketsOut = serde_json::from_slice(json)
        .map_err(|e| MaskfxError::corrupt(format!("ffprobe packet json parse failed: {e}")))?;
    Ok(parsed
        .packets
        .into_iter()
        .map(|p| {
            let flags = p.flags.unwrap_or_default();
            PacketInfo {
                pts: p.pts,
                dts: p.dts,
                keyframe: flags.contains('K'),
                corrupt: flags.contains('C') || flags.contains('D'),
            }
        })
        .collect())
}

fn parse_hdr_side_data(side_data: &[serde_json::Value]) -> Option<HdrStaticMetadata> {
    let mut out = HdrStaticMetadata::default();
    for sd in side_data {
        match sd.get("side_data_type").and_then(|t| t.as_str()) {
            Some("Mastering display metadata") => {
                let xy = |x: &str, y: &str| -> Option<[f64; 2]> {
                    Some([ratio_field(sd, x)?, ratio_field(sd, y)?])
                };
                out.mastering = (|| {
                    Some(MasteringDisplay {
                        red: xy("red_x", "red_y")?,
                        green: xy("green_x", "green_y")?,
                        blue: xy("blue_x", "blue_y")?,
                        white_point: xy("white_point_x", "white_point_y")?,
                        max_luminance: ratio_field(sd, "max_luminance")?,
                        min_luminance: ratio_field(sd, "min_luminance")?,
                    })
                })();
            }
            Some("Content light level metadata") => {
                let field = |k: &str| sd.get(k).and_then(|v| v.as_u64()).map(|v| v as u32);
                let (cll, fall) = (field("max_content"), field("max_average"));
                if let (Some(max_cll), Some(max_fall)) = (cll, fall) {
                    out.content_light = Some(ContentLight { max_cll, max_fall });
                }
            }
            _ => {}
        }
    }
    (!out.is_empty()).then_some(out)
}

fn ratio_field(v: &serde_json::Value, key: &str) -> Option<f64> {
    let raw = v.get(key)?;
    if let Some(n) = raw.as_f64() {
        return Some(n);
    }
    let s = raw.as_str()?;
    match s.split_once('/') {
        Some((a, b)) => {
            let a = a.trim().parse::<f64>().ok()?;
            let b = b.trim().parse::<f64>().ok()?;
            (b != 0.0).then_some(a / b)
        }
        None => s.trim().parse().ok(),
    }
}

#[cfg(test)]
#[path = "../../tests/unit/media/probe.rs"]
mod tests;
