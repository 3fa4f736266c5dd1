use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::Buffer2;

use super::*;
use crate::engine::Device;
use crate::sample::Plane;

fn frame(idx: &str, pixels: Vec<Plane>) -> Frame {
    Frame::new(idx, "group_a", pixels).unwrap()
}

/// Parent label 1 covers a 10x10 block; child 7 covers 30 of its pixels and
/// child 9 only 5.
fn parent_and_child() -> (Buffer2<u32>, Buffer2<u32>) {
    let parent = Buffer2::from_fn(20, 20, |x, y| u32::from(x < 10 && y < 10));
    let child = Buffer2::from_fn(20, 20, |x, y| {
        if y < 3 && x < 10 {
            7
        } else if y == 5 && x < 5 {
            9
        } else if x >= 15 && y >= 15 {
            4
        } else {
            0
        }
    });
    (parent, child)
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[test]
fn test_reconcile_keeps_large_overlap_only() {
    let (parent, child) = parent_and_child();
    let reconciled = reconcile_children(&parent, &child);
    assert_eq!(reconciled.iter().filter(|&&l| l == 1).count(), 30);
    assert!(reconciled.iter().all(|&l| l == 0 || l == 1));
    // the 5-pixel child is below the overlap threshold
    assert_eq!(reconciled[(2, 5)], 0);
    // the child outside any parent never survives
    assert_eq!(reconciled[(16, 16)], 0);
}

#[test]
fn test_reconcile_ignores_exact_threshold() {
    // exactly 10% overlap is not enough
    let parent = Buffer2::from_fn(10, 10, |_, _| 3u32);
    let child = Buffer2::from_fn(10, 10, |_, y| if y == 0 { 5u32 } else { 0 });
    let reconciled = reconcile_children(&parent, &child);
    assert!(reconciled.iter().all(|&l| l == 0));
}

// ---------------------------------------------------------------------------
// Model-based segmentation
// ---------------------------------------------------------------------------

struct FixedModel {
    parent: Buffer2<u32>,
    child: Buffer2<u32>,
    truncate: bool,
    evals: Arc<AtomicUsize>,
}

impl CellDetectionModel for FixedModel {
    fn eval(
        &self,
        inputs: &[ModelInput<'_>],
        _diameter: Option<f32>,
    ) -> std::result::Result<Vec<Buffer2<u32>>, ModelError> {
        self.evals.fetch_add(1, Ordering::Relaxed);
        let mut out: Vec<Buffer2<u32>> = inputs
            .iter()
            .map(|input| {
                if input.channel_index == 0 {
                    self.parent.clone()
                } else {
                    self.child.clone()
                }
            })
            .collect();
        if self.truncate {
            out.pop();
        }
        Ok(out)
    }
}

struct CountingFactory {
    builds: Arc<AtomicUsize>,
    evals: Arc<AtomicUsize>,
    truncate: bool,
    fail: bool,
}

impl ModelFactory for CountingFactory {
    type Model = FixedModel;

    fn build(&self, device: Device) -> std::result::Result<FixedModel, ModelError> {
        self.builds.fetch_add(1, Ordering::Relaxed);
        if self.fail {
            return Err(ModelError::Load {
                device,
                message: "weights missing".to_string(),
            });
        }
        let (parent, child) = parent_and_child();
        Ok(FixedModel {
            parent,
            child,
            truncate: self.truncate,
            evals: self.evals.clone(),
        })
    }
}

struct Counters {
    builds: Arc<AtomicUsize>,
    evals: Arc<AtomicUsize>,
}

fn counting_segmenter(truncate: bool, fail: bool) -> (ModelSegmenter<CountingFactory>, Counters) {
    let counters = Counters {
        builds: Arc::new(AtomicUsize::new(0)),
        evals: Arc::new(AtomicUsize::new(0)),
    };
    let factory = CountingFactory {
        builds: counters.builds.clone(),
        evals: counters.evals.clone(),
        truncate,
        fail,
    };
    (ModelSegmenter::new(factory, 0, 1, Some(30.0), false), counters)
}

fn three_channel_frame(idx: &str) -> Frame {
    let plane = Buffer2::from_fn(20, 20, |x, y| (x + y) as f32);
    frame(idx, vec![plane.clone(), plane.clone(), plane])
}

#[test]
fn test_model_segmentation_reconciles_children() {
    let (segmenter, _) = counting_segmenter(false, false);
    let ctx = WorkerContext::new(0, 1);
    let samples = segmenter.segment(&three_channel_frame("f0"), &ctx).unwrap();

    assert_eq!(samples.len(), 1);
    let sample = &samples[0];
    assert_eq!(sample.idx(), "f0_1");
    assert_eq!(sample.id(), Some(1));
    assert_eq!(sample.group(), "group_a");
    assert_eq!(sample.bbox(), crate::sample::BBox::new(0, 0, 10, 10));
    assert_eq!(sample.mask()[0].count_set(), 100);
    assert_eq!(sample.mask()[1].count_set(), 30);
    assert_eq!(sample.mask()[2].count_set(), 30);
    assert_eq!(sample.combined_mask().count_set(), 100);
    assert_eq!(sample.regions(), &[1, 1, 1]);
}

#[test]
fn test_model_built_once_per_worker() {
    let (segmenter, counters) = counting_segmenter(false, false);
    let w0 = WorkerContext::new(0, 2);
    let w1 = WorkerContext::new(1, 2);
    for (i, ctx) in [&w0, &w0, &w1, &w0, &w1].into_iter().enumerate() {
        segmenter
            .segment(&three_channel_frame(&format!("f{i}")), ctx)
            .unwrap();
    }
    assert_eq!(counters.builds.load(Ordering::Relaxed), 2);
    assert_eq!(segmenter.models_built(), 2);
}

#[test]
fn test_model_batches_partition_per_channel() {
    let (segmenter, counters) = counting_segmenter(false, false);
    let frames: Vec<Frame> = (0..4).map(|i| three_channel_frame(&format!("f{i}"))).collect();
    let samples = segmenter
        .segment_partition(frames, &WorkerContext::new(0, 1))
        .unwrap();

    // one parent call plus one per other channel, whatever the frame count
    assert_eq!(counters.evals.load(Ordering::Relaxed), 3);
    assert_eq!(counters.builds.load(Ordering::Relaxed), 1);
    let idx: Vec<&str> = samples.iter().map(|s| s.idx()).collect();
    assert_eq!(idx, vec!["f0_1", "f1_1", "f2_1", "f3_1"]);
    assert!(samples.iter().all(|s| s.mask()[1].count_set() == 30));
}

#[test]
fn test_model_empty_partition_skips_model() {
    let (segmenter, counters) = counting_segmenter(false, false);
    let samples = segmenter
        .segment_partition(Vec::new(), &WorkerContext::new(0, 1))
        .unwrap();
    assert!(samples.is_empty());
    assert_eq!(counters.builds.load(Ordering::Relaxed), 0);
}

#[test]
fn test_model_batch_rejects_mixed_channel_counts() {
    let (segmenter, _) = counting_segmenter(false, false);
    let plane = Buffer2::new_filled(20, 20, 1.0f32);
    let frames = vec![
        three_channel_frame("f0"),
        frame("f1", vec![plane.clone(), plane]),
    ];
    let err = segmenter
        .segment_partition(frames, &WorkerContext::new(0, 1))
        .unwrap_err();
    assert!(matches!(
        err,
        SegmentationError::Sample(SampleError::ChannelCountMismatch {
            expected: 3,
            actual: 2,
            ..
        })
    ));
}

#[test]
fn test_model_load_failure_is_reported() {
    let (segmenter, _) = counting_segmenter(false, true);
    let err = segmenter
        .segment(&three_channel_frame("f0"), &WorkerContext::new(0, 1))
        .unwrap_err();
    assert!(matches!(
        err,
        SegmentationError::Model {
            source: ModelError::Load { .. },
            ..
        }
    ));
}

#[test]
fn test_model_output_count_checked() {
    let (segmenter, _) = counting_segmenter(true, false);
    let err = segmenter
        .segment(&three_channel_frame("f0"), &WorkerContext::new(0, 1))
        .unwrap_err();
    assert!(matches!(
        err,
        SegmentationError::ModelOutputCount {
            expected: 1,
            actual: 0,
            ..
        }
    ));
}

#[test]
fn test_model_channel_out_of_range() {
    let segmenter = ModelSegmenter::new(ThresholdModelFactory::default(), 0, 5, None, false);
    let err = segmenter
        .segment(&three_channel_frame("f0"), &WorkerContext::new(0, 1))
        .unwrap_err();
    assert!(matches!(err, SegmentationError::ChannelOutOfRange { channel: 5, .. }));
}

// ---------------------------------------------------------------------------
// Nuclear segmentation
// ---------------------------------------------------------------------------

fn two_nuclei() -> Plane {
    Buffer2::from_fn(40, 20, |x, y| {
        let (x, y) = (x as i32, y as i32);
        let inside = |cx: i32, cy: i32| (x - cx).pow(2) + (y - cy).pow(2) <= 25;
        if inside(10, 10) || inside(30, 10) { 100.0 } else { 0.0 }
    })
}

#[test]
fn test_nuclear_labels_split_two_nuclei() {
    let labels = nuclear_labels(&two_nuclei(), 8);
    assert_ne!(labels[(10, 10)], 0);
    assert_ne!(labels[(30, 10)], 0);
    assert_ne!(labels[(10, 10)], labels[(30, 10)]);
    assert_eq!(labels[(20, 10)], 0);
}

#[test]
fn test_nuclear_segmenter_shares_mask_across_channels() {
    let other = Buffer2::new_filled(40, 20, 7.0f32);
    let f = frame("img", vec![other, two_nuclei()]);
    let samples = NuclearSegmenter::new(1, 8)
        .segment(&f, &WorkerContext::new(0, 1))
        .unwrap();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].idx(), "img_1");
    assert_eq!(samples[1].idx(), "img_2");
    for sample in &samples {
        assert_eq!(sample.mask()[0], sample.mask()[1]);
        assert_eq!(&sample.mask()[1], sample.combined_mask());
        assert_eq!(sample.regions(), &[1, 1]);
    }
}

#[test]
fn test_nuclear_empty_frame_yields_no_samples() {
    let f = frame("blank", vec![Buffer2::new_filled(16, 16, 3.0f32)]);
    let samples = NuclearSegmenter::new(0, 5)
        .segment(&f, &WorkerContext::new(0, 1))
        .unwrap();
    assert!(samples.is_empty());
}

// ---------------------------------------------------------------------------
// Watershed segmentation
// ---------------------------------------------------------------------------

fn textured_square() -> Plane {
    Buffer2::from_fn(40, 40, |x, y| {
        let texture = ((x * 7 + y * 13) % 5) as f32;
        if (10..30).contains(&x) && (10..30).contains(&y) {
            200.0 + texture
        } else {
            10.0 + texture
        }
    })
}

#[test]
fn test_constant_channel_has_empty_mask() {
    let plane = Buffer2::new_filled(12, 12, 42.0f32);
    assert!(!channel_mask(&plane, false, 0).any());
}

#[test]
fn test_background_seeds_alone_flood_the_plane() {
    let plane = Buffer2::from_fn(6, 6, |x, _| x as f32);
    let mut markers = Buffer2::new_default(6, 6);
    markers[(0, 0)] = 1;
    markers[(5, 5)] = 1;
    let basin = super::watershed::top_basin(&plane, &markers);
    assert_eq!(basin.count_set(), 36);
}

#[test]
fn test_top_basin_takes_highest_label() {
    let plane = Buffer2::from_fn(7, 3, |x, _| if x == 3 { 10.0f32 } else { 0.0 });
    let mut markers = Buffer2::new_default(7, 3);
    markers[(0, 1)] = 1;
    markers[(6, 1)] = 2;
    let basin = super::watershed::top_basin(&plane, &markers);
    assert!(basin[(6, 0)] && basin[(4, 2)]);
    assert!(!basin[(0, 0)] && !basin[(2, 2)]);

    let empty = super::watershed::top_basin(&plane, &Buffer2::new_default(7, 3));
    assert!(!empty.any());
}

#[test]
fn test_watershed_zero_detections() {
    let f = frame("blank", vec![Buffer2::new_filled(12, 12, 1.0f32); 2]);
    let samples = WatershedSegmenter::new(vec![], 20)
        .segment(&f, &WorkerContext::new(0, 1))
        .unwrap();
    assert!(samples.is_empty());
}

#[test]
fn test_watershed_sample_uses_union_of_channels() {
    let f = frame(
        "w0",
        vec![textured_square(), Buffer2::new_filled(40, 40, 5.0f32)],
    );
    let samples = WatershedSegmenter::new(vec![], 0)
        .segment(&f, &WorkerContext::new(0, 1))
        .unwrap();
    assert_eq!(samples.len(), 1);
    let sample = &samples[0];
    assert_eq!(sample.idx(), "w0");
    assert_eq!(sample.id(), None);
    assert_eq!(sample.regions(), &[1, 0]);
    assert_eq!(sample.mask()[0], *sample.combined_mask());
}

// ---------------------------------------------------------------------------
// Mask application
// ---------------------------------------------------------------------------

#[test]
fn test_masked_views() {
    let f = frame("m", vec![Buffer2::from_fn(4, 4, |x, y| (y * 4 + x) as f32)]);
    let mut labels = Buffer2::new_default(4, 4);
    labels[(1, 1)] = 1;
    labels[(2, 1)] = 1;
    let samples = samples_from_labels(&f, &[labels], 0).unwrap();
    assert_eq!(samples.len(), 1);
    let sample = &samples[0];
    assert_eq!(masked_intensities(sample), vec![vec![5.0, 6.0]]);
    assert_eq!(masked_pixels(sample)[0].pixels(), &[5.0, 6.0]);
    assert_eq!(masked_combined_pixels(sample)[0].pixels(), &[5.0, 6.0]);
}
