use common::Buffer2;

use super::*;

fn square_mask(size: usize, lo: usize, hi: usize) -> Mask {
    Buffer2::from_fn(size, size, |x, y| (lo..hi).contains(&x) && (lo..hi).contains(&y))
}

fn plane(size: usize, value: f32) -> Plane {
    Buffer2::new_filled(size, size, value)
}

fn builder() -> SampleBuilder {
    SampleBuilder::new("f0_1", "plate1")
        .pixels(vec![plane(8, 1.0), plane(8, 2.0)])
        .mask(vec![square_mask(8, 2, 6), Buffer2::new_filled(8, 8, false)])
        .combined_mask(square_mask(8, 2, 6))
        .bbox(BBox::new(10, 10, 18, 18), 64, 64)
}

#[test]
fn test_build_valid_sample() {
    let sample = builder().id(1).build().unwrap();
    assert_eq!(sample.idx(), "f0_1");
    assert_eq!(sample.group(), "plate1");
    assert_eq!(sample.id(), Some(1));
    assert_eq!(sample.num_channels(), 2);
    assert_eq!(sample.regions(), &[1, 0]);
    assert_eq!(sample.background(), &[0.0, 0.0]);
    assert_eq!(sample.combined_background(), &[0.0, 0.0]);
    sample.validate().unwrap();
}

#[test]
fn test_missing_mask_is_rejected() {
    let err = SampleBuilder::new("x", "g")
        .pixels(vec![plane(4, 0.0)])
        .combined_mask(square_mask(4, 0, 2))
        .bbox(BBox::full(4, 4), 4, 4)
        .build()
        .unwrap_err();
    assert!(matches!(err, SampleError::MissingField { field: "mask", .. }));
}

#[test]
fn test_empty_combined_mask_is_rejected() {
    let err = builder()
        .combined_mask(Buffer2::new_filled(8, 8, false))
        .build()
        .unwrap_err();
    assert!(matches!(err, SampleError::EmptyCombinedMask { .. }));
}

#[test]
fn test_background_length_must_match_channels() {
    let err = builder().background(vec![1.0]).build().unwrap_err();
    assert!(matches!(
        err,
        SampleError::ChannelCountMismatch {
            field: "background",
            expected: 2,
            actual: 1,
            ..
        }
    ));
}

#[test]
fn test_mask_dimensions_must_match_pixels() {
    let err = builder()
        .mask(vec![square_mask(8, 2, 6), square_mask(6, 1, 3)])
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        SampleError::DimensionMismatch {
            field: "mask",
            channel: 1,
            ..
        }
    ));
}

#[test]
fn test_bbox_outside_frame_is_rejected() {
    let err = builder()
        .bbox(BBox::new(60, 60, 68, 68), 64, 64)
        .build()
        .unwrap_err();
    assert!(matches!(err, SampleError::InvalidBBox { .. }));
}

#[test]
fn test_bbox_must_match_crop_size() {
    let err = builder()
        .bbox(BBox::new(0, 0, 7, 8), 64, 64)
        .build()
        .unwrap_err();
    assert!(matches!(err, SampleError::InvalidBBox { .. }));
}

#[test]
fn test_frame_rejects_mismatched_channels() {
    let err = Frame::new("f", "g", vec![plane(4, 0.0), plane(5, 0.0)]).unwrap_err();
    assert!(matches!(err, SampleError::DimensionMismatch { channel: 1, .. }));
    assert!(matches!(
        Frame::new("f", "g", vec![]).unwrap_err(),
        SampleError::NoChannels { .. }
    ));
}

#[test]
fn test_frame_clip() {
    let mut frame = Frame::new("f", "g", vec![Buffer2::new(3, 1, vec![-5.0, 10.0, 5000.0])]).unwrap();
    frame.clip(4095.0);
    assert_eq!(frame.pixels[0].pixels(), &[0.0, 10.0, 4095.0]);
}

#[test]
fn test_group_for_joins_meta_values() {
    let frame = Frame::new("f", "file_a", vec![plane(2, 0.0)])
        .unwrap()
        .with_meta("plate", "p1")
        .with_meta("well", 7i64);
    assert_eq!(frame.group_for(&[]).unwrap(), "file_a");
    let keys = vec!["plate".to_string(), "well".to_string()];
    assert_eq!(frame.group_for(&keys).unwrap(), "p1_7");
    let err = frame.group_for(&["row".to_string()]).unwrap_err();
    assert!(matches!(err, SampleError::MissingMeta { .. }));
}
