use super::*;
use crate::media::metadata::ChromaSubsampling;

const HDR_MOV: &str = r#"{
  "streams": [
    {
      "index": 0,
      "codec_name": "hevc",
      "codec_type": "video",
      "width": 3840,
      "height": 2160,
      "pix_fmt": "yuv420p10le",
      "field_order": "progressive",
      "color_range": "tv",
      "color_space": "bt2020nc",
      "color_transfer": "smpte2084",
      "color_primaries": "bt2020",
      "r_frame_rate": "24000/1001",
      "avg_frame_rate": "24000/1001",
      "time_base": "1/24000",
      "nb_frames": "240",
      "duration": "10.010000",
      "tags": { "timecode": "01:00:00:00", "reel_name": "A001" },
      "side_data_list": [
        {
          "side_data_type": "Mastering display metadata",
          "red_x": "35400/50000", "red_y": "14600/50000",
          "green_x": "8500/50000", "green_y": "39850/50000",
          "blue_x": "6550/50000", "blue_y": "2300/50000",
          "white_point_x": "15635/50000", "white_point_y": "16450/50000",
          "min_luminance": "50/10000", "max_luminance": "10000000/10000"
        },
        { "side_data_type": "Content light level metadata",
          "max_content": 1000, "max_average": 400 }
      ]
    },
    {
      "index": 1,
      "codec_name": "pcm_s24le",
      "codec_type": "audio",
      "sample_rate": "48000",
      "channels": 2,
      "channel_layout": "stereo",
      "sample_fmt": "s32"
    }
  ],
  "format": { "format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "10.010000" }
}"#;

#[test]
fn maps_video_audio_color_and_hdr() {
    let md = parse_probe_json(Path::new("a.mov"), HDR_MOV.as_bytes()).unwrap();
    assert_eq!(md.codec, "hevc");
    assert_eq!((md.width, md.height), (3840, 2160));
    assert_eq!(md.bit_depth, Some(10));
    assert_eq!(md.subsampling, Some(ChromaSubsampling::Cs420));
    assert_eq!(md.field_order, Some(FieldOrder::Progressive));
    assert_eq!(md.color.transfer.as_deref(), Some("smpte2084"));
    assert_eq!(md.color.matrix.as_deref(), Some("bt2020nc"));
    assert_eq!(md.color.range, Some(ColorRange::Limited));
    assert_eq!(md.time_base, Rational::new(1, 24000).unwrap());
    assert_eq!(md.frame_count, Some(240));
    assert!(!md.vfr);
    assert_eq!(md.duration_us, Some(10_010_000));
    assert_eq!(md.start_timecode.as_deref(), Some("01:00:00:00"));
    assert_eq!(md.reel_name.as_deref(), Some("A001"));

    let audio = md.audio.as_ref().unwrap();
    assert_eq!(audio.sample_rate, 48000);
    assert_eq!(audio.channels, 2);
    assert_eq!(audio.sample_fmt.as_deref(), Some("s32"));

    let hdr = md.hdr.unwrap();
    let mastering = hdr.mastering.unwrap();
    assert!((mastering.red[0] - 0.708).abs() < 1e-9);
    assert!((mastering.max_luminance - 1000.0).abs() < 1e-9);
    assert_eq!(
        hdr.content_light,
        Some(ContentLight {
            max_cll: 1000,
            max_fall: 400
        })
    );
}

#[test]
fn unknown_fields_stay_unknown() {
    let json = r#"{
      "streams": [{
        "codec_name": "mpeg2video", "codec_type": "video", "width": 720, "height": 576,
        "field_order": "unknown", "color_space": "unknown", "r_frame_rate": "25/1",
        "avg_frame_rate": "0/0", "time_base": "1/25"
      }],
      "format": { "format_name": "mpeg" }
    }"#;
    let md = parse_probe_json(Path::new("x.mpg"), json.as_bytes()).unwrap();
    assert_eq!(md.field_order, None);
    assert_eq!(md.color, ColorInfo::default());
    assert_eq!(md.bit_depth, None);
    assert_eq!(md.avg_frame_rate, None);
    assert_eq!(md.frame_count, None);
    assert_eq!(md.start_timecode, None);
    assert!(md.audio.is_none());
    assert!(md.hdr.is_none());
}

#[test]
fn vfr_flag_when_rates_disagree() {
    let json = r#"{
      "streams": [{
        "codec_name": "h264", "codec_type": "video", "width": 64, "height": 64,
        "r_frame_rate": "30/1", "avg_frame_rate": "2997/100", "time_base": "1/90000",
        "tags": { "timecode": "00:59:59;28" }
      }],
      "format": { "format_name": "mov,mp4,m4a,3gp,3g2,mj2", "tags": { "timecode": "10:00:00:00" } }
    }"#;
    let md = parse_probe_json(Path::new("v.mp4"), json.as_bytes()).unwrap();
    assert!(md.vfr);
    assert_eq!(md.start_timecode.as_deref(), Some("00:59:59;28"));
}

#[test]
fn missing_video_is_unsupported_codec() {
    let json = r#"{
      "streams": [{ "codec_name": "mp3", "codec_type": "audio" }],
      "format": { "format_name": "mp3" }
    }"#;
    let err = parse_probe_json(Path::new("a.mp3"), json.as_bytes()).unwrap_err();
    assert!(matches!(err, MaskfxError::UnsupportedCodec(_)));
}

#[test]
fn cover_art_is_not_the_video_stream() {
    let json = r#"{
      "streams": [{
        "codec_name": "mjpeg", "codec_type": "video", "width": 300, "height": 300,
        "time_base": "1/90000", "disposition": { "attached_pic": 1 }
      }],
      "format": { "format_name": "mp3" }
    }"#;
    assert!(parse_probe_json(Path::new("a.mp3"), json.as_bytes()).is_err());
}

#[test]
fn garbage_is_unsupported_container() {
    let err = parse_probe_json(Path::new("x"), b"not json").unwrap_err();
    assert!(matches!(err, MaskfxError::UnsupportedContainer(_)));
}

#[test]
fn packet_flags() {
    let json = r#"{ "packets": [
        { "pts": 0, "dts": -1001, "flags": "K__" },
        { "pts": 3003, "dts": 0, "flags": "___" },
        { "pts": 6006, "dts": 1001, "flags": "_C_" },
        { "dts": 2002, "flags": "___" }
    ] }"#;
    let packets = parse_packets_json(json.as_bytes()).unwrap();
    assert_eq!(packets.len(), 4);
    assert!(packets[0].keyframe);
    assert!(!packets[1].keyframe);
    assert!(packets[2].corrupt);
    assert_eq!(packets[3].pts, None);
}
