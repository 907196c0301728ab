use super::*;

#[test]
fn display_prefixes_are_stable() {
    assert!(MaskfxError::input("x").to_string().contains("input error:"));
    assert!(MaskfxError::encode("x").to_string().contains("encode error:"));
    assert!(
        MaskfxError::validation("x")
            .to_string()
            .contains("validation error:")
    );
    assert!(
        MaskfxError::serde("x")
            .to_string()
            .contains("serialization error:")
    );
    assert!(
        MaskfxError::unsupported_codec("vp7")
            .to_string()
            .contains("unsupported codec: vp7")
    );
}

#[test]
fn compositing_error_names_frame() {
    let err = MaskfxError::compositing(12, "unknown effect 'swirl'");
    assert_eq!(
        err.to_string(),
        "compositing error at frame 12: unknown effect 'swirl'"
    );

    let bare = MaskfxError::compositing(None, "bad mask");
    assert_eq!(bare.to_string(), "compositing error: bad mask");
    assert_eq!(
        bare.at_frame(3).to_string(),
        "compositing error at frame 3: bad mask"
    );
}

#[test]
fn job_context_wraps_once_and_keeps_class() {
    let err = MaskfxError::encode("disk full")
        .in_job("job-1", Stage::Encode)
        .in_job("job-2", Stage::Validate);
    let msg = err.to_string();
    assert!(msg.contains("job-1"));
    assert!(msg.contains("during encode"));
    assert!(!msg.contains("job-2"));
    assert_eq!(err.class(), ErrorClass::Encode);
    assert_eq!(err.stage(), Some(Stage::Encode));
}

#[test]
fn input_variants_share_class() {
    for err in [
        MaskfxError::unsupported_container("x"),
        MaskfxError::unsupported_codec("x"),
        MaskfxError::corrupt("x"),
        MaskfxError::input("x"),
    ] {
        assert_eq!(err.class(), ErrorClass::Input);
    }
    assert_eq!(MaskfxError::Cancelled.class(), ErrorClass::Cancelled);
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("boom");
    let err = MaskfxError::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("boom"));
}
