use super::*;
use crate::encode::plan::ToneMapCurve;
use crate::foundation::core::Rational;
use crate::media::metadata::{
    ColorInfo, ContentLight, FieldOrder, HdrStaticMetadata, MasteringDisplay,
};

fn opts(codec: VideoCodec, container: Container) -> FfmpegSinkOpts {
    FfmpegSinkOpts {
        out_path: PathBuf::from("/tmp/out.mkv"),
        container,
        codec,
        quality: None,
        deinterlace: DeinterlacePolicy::Keep,
        color_transform: ColorTransform::None,
        audio: None,
    }
}

fn cfg() -> SinkConfig {
    SinkConfig {
        width: 64,
        height: 48,
        rate: Rational::new(30000, 1001).unwrap(),
        color: ColorInfo {
            primaries: Some("bt709".to_string()),
            matrix: Some("bt709".to_string()),
            transfer: Some("bt709".to_string()),
            range: Some(ColorRange::Limited),
        },
        field_order: Some(FieldOrder::TopFieldFirst),
        subsampling: ChromaSubsampling::Cs420,
        bit_depth: 8,
        hdr: None,
        start_timecode: Some("01:00:00:00".to_string()),
        reel_name: Some("A001".to_string()),
    }
}

fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

#[test]
fn pix_fmt_follows_codec_limits() {
    assert_eq!(
        output_pix_fmt(VideoCodec::H264, ChromaSubsampling::Cs420, 8),
        "yuv420p"
    );
    assert_eq!(
        output_pix_fmt(VideoCodec::H264, ChromaSubsampling::Cs422, 12),
        "yuv422p10le"
    );
    assert_eq!(
        output_pix_fmt(VideoCodec::ProRes, ChromaSubsampling::Cs420, 8),
        "yuv422p10le"
    );
    assert_eq!(
        output_pix_fmt(VideoCodec::ProRes, ChromaSubsampling::Cs444, 12),
        "yuv444p10le"
    );
    assert_eq!(
        output_pix_fmt(VideoCodec::Ffv1, ChromaSubsampling::Mono, 16),
        "gray16le"
    );
    assert_eq!(
        output_pix_fmt(VideoCodec::Vp9, ChromaSubsampling::Mono, 8),
        "yuv420p"
    );
}

#[test]
fn args_carry_rate_and_metadata_tags() {
    let args = encoder_args(&opts(VideoCodec::H264, Container::Mkv), &cfg());
    assert_eq!(value_after(&args, "-r"), Some("30000/1001"));
    assert_eq!(value_after(&args, "-s"), Some("64x48"));
    assert_eq!(value_after(&args, "-c:v"), Some("libx264"));
    assert_eq!(value_after(&args, "-pix_fmt"), Some("rgb24"));
    assert_eq!(value_after(&args, "-color_primaries"), Some("bt709"));
    assert_eq!(value_after(&args, "-color_trc"), Some("bt709"));
    assert_eq!(value_after(&args, "-colorspace"), Some("bt709"));
    assert_eq!(value_after(&args, "-color_range"), Some("tv"));
    assert_eq!(value_after(&args, "-field_order"), Some("tt"));
    assert_eq!(value_after(&args, "-timecode"), Some("01:00:00:00"));
    assert_eq!(value_after(&args, "-metadata:s:v:0"), Some("reel_name=A001"));
    assert_eq!(value_after(&args, "-f").map(|_| ()), Some(()));
    assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mkv"));
    assert!(args.iter().any(|a| a == "-an"));
    let vf = value_after(&args, "-vf").unwrap();
    assert!(vf.contains("scale=out_color_matrix=bt709:out_range=tv"), "{vf}");
    assert!(vf.ends_with("format=yuv420p"), "{vf}");
}

#[test]
fn wide_input_uses_rgb48() {
    let mut c = cfg();
    c.bit_depth = 10;
    let args = encoder_args(&opts(VideoCodec::Hevc, Container::Mkv), &c);
    assert_eq!(value_after(&args, "-pix_fmt"), Some("rgb48le"));
    assert!(args.iter().any(|a| a == "yuv420p10le"));
}

#[test]
fn hevc_carries_hdr_static_metadata() {
    let mut c = cfg();
    c.field_order = Some(FieldOrder::Progressive);
    c.color.transfer = Some("smpte2084".to_string());
    c.hdr = Some(HdrStaticMetadata {
        mastering: Some(MasteringDisplay {
            red: [0.68, 0.32],
            green: [0.265, 0.69],
            blue: [0.15, 0.06],
            white_point: [0.3127, 0.329],
            max_luminance: 1000.0,
            min_luminance: 0.005,
        }),
        content_light: Some(ContentLight {
            max_cll: 1000,
            max_fall: 400,
        }),
    });
    let args = encoder_args(&opts(VideoCodec::Hevc, Container::Mkv), &c);
    let params = value_after(&args, "-x265-params").unwrap();
    assert!(params.contains("master-display=G(13250,34500)"), "{params}");
    assert!(params.contains("max-cll=1000,400"), "{params}");

    // Tone mapping drops HDR metadata and retags as BT.709.
    let mut o = opts(VideoCodec::Hevc, Container::Mkv);
    o.color_transform = ColorTransform::ToneMapHdrToSdr {
        curve: ToneMapCurve::Mobius,
    };
    let args = encoder_args(&o, &c);
    assert!(value_after(&args, "-x265-params").is_none());
    assert_eq!(value_after(&args, "-color_trc"), Some("bt709"));
    let vf = value_after(&args, "-vf").unwrap();
    assert!(vf.contains("tonemap=tonemap=mobius"), "{vf}");
    assert!(vf.contains("tin=smpte2084"), "{vf}");
}

#[test]
fn field_filters_and_required_filter_names() {
    let mut o = opts(VideoCodec::H264, Container::Mp4);
    o.deinterlace = DeinterlacePolicy::Deinterlace;
    let args = encoder_args(&o, &cfg());
    assert!(value_after(&args, "-vf").unwrap().starts_with("yadif"));
    assert_eq!(required_filters(&o), vec!["scale", "yadif"]);
    assert_eq!(value_after(&args, "-movflags"), Some("+faststart"));
    assert!(value_after(&args, "-flags").is_none());

    // Kept interlacing is still field-coded and tagged.
    o.deinterlace = DeinterlacePolicy::Keep;
    let args = encoder_args(&o, &cfg());
    assert_eq!(value_after(&args, "-flags"), Some("+ildct+ilme"));
    assert_eq!(value_after(&args, "-field_order"), Some("tt"));
    let mut progressive = cfg();
    progressive.field_order = Some(FieldOrder::Progressive);
    assert!(value_after(&encoder_args(&o, &progressive), "-flags").is_none());

    let mut hevc = opts(VideoCodec::Hevc, Container::Mkv);
    hevc.deinterlace = DeinterlacePolicy::Keep;
    let mut bff = cfg();
    bff.field_order = Some(FieldOrder::BottomFieldFirst);
    let args = encoder_args(&hevc, &bff);
    assert_eq!(value_after(&args, "-x265-params"), Some("interlace=bff"));
    assert!(value_after(&args, "-flags").is_none());

    o.deinterlace = DeinterlacePolicy::ReinterlaceBff;
    let args = encoder_args(&o, &cfg());
    assert!(value_after(&args, "-vf").unwrap().starts_with("setfield=bff"));
    assert_eq!(value_after(&args, "-flags"), Some("+ildct+ilme"));

    o.deinterlace = DeinterlacePolicy::Keep;
    o.color_transform = ColorTransform::Lut3d {
        path: PathBuf::from("/luts/film.cube"),
    };
    assert_eq!(required_filters(&o), vec!["scale", "lut3d"]);
    let args = encoder_args(&o, &cfg());
    assert!(value_after(&args, "-vf").unwrap().contains("lut3d=file='/luts/film.cube'"));
}

#[test]
fn audio_input_is_mapped_and_routed() {
    let mut o = opts(VideoCodec::ProRes, Container::Mov);
    o.audio = Some(AudioInput {
        source: PathBuf::from("/media/in.mov"),
        start_secs: 1.5,
        duration_secs: Some(2.0),
        route: AudioRoute::Copy,
    });
    let args = encoder_args(&o, &cfg());
    assert_eq!(value_after(&args, "-ss"), Some("1.500000"));
    assert_eq!(value_after(&args, "-t"), Some("2.000000"));
    assert_eq!(value_after(&args, "-c:a"), Some("copy"));
    let maps: Vec<&str> = args
        .iter()
        .enumerate()
        .filter(|(_, a)| *a == "-map")
        .map(|(i, _)| args[i + 1].as_str())
        .collect();
    assert_eq!(maps, vec!["0:v:0", "1:a:0"]);
    assert_eq!(value_after(&args, "-profile:v"), Some("3"));
}

#[test]
fn segment_paths_are_hidden_siblings() {
    let segs = [
        Segment::Copy(FrameRange::from_bounds(0, 10).unwrap()),
        Segment::Reencode(FrameRange::from_bounds(10, 20).unwrap()),
    ];
    let paths = segment_paths(Path::new("/out/clip.mp4"), &segs);
    assert_eq!(paths[0], PathBuf::from("/out/.clip.seg000.mp4"));
    assert_eq!(paths[1], PathBuf::from("/out/.clip.seg001.mp4"));
}
