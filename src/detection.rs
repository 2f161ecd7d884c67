use burn::{prelude::Backend, tensor::Tensor};

use crate::{config::DetectConfig, priors::VARIANCES};

/// One detected object: class label, confidence, and the decoded box in
/// x1y1x2y2 form as fractions of the input image.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: usize,
    pub score: f32,
    pub bbox: [f32; 4],
}

/// Applies predicted regression offsets to a prior box.
///
/// This is the inverse of the training-time encoding: the center offsets
/// are scaled by the center variances and the prior size, the size offsets
/// are exponentiated from log space after scaling by the size variances.
///
/// - cx = p_cx + l0 * v0 * p_w
/// - cy = p_cy + l1 * v1 * p_h
/// - w  = p_w * exp(l2 * v2)
/// - h  = p_h * exp(l3 * v3)
///
/// The prior is cxcywh; the result is converted to x1y1x2y2.
pub fn decode(loc: &[f32; 4], prior: &[f32; 4], variances: &[f32; 4]) -> [f32; 4] {
    let [pcx, pcy, pw, ph] = *prior;

    let cx = pcx + loc[0] * variances[0] * pw;
    let cy = pcy + loc[1] * variances[1] * ph;
    let w = pw * (loc[2] * variances[2]).exp();
    let h = ph * (loc[3] * variances[3]).exp();

    [cx - w * 0.5, cy - h * 0.5, cx + w * 0.5, cy + h * 0.5]
}

/// Intersection over union of two x1y1x2y2 boxes.
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - intersection;

    if union <= 0.0 { 0.0 } else { intersection / union }
}

/// Greedy non-maximum suppression over score-sorted candidates.
///
/// Keeps the highest-scoring box, drops every candidate overlapping it by
/// more than `thresh`, and repeats on the survivors.
fn nms(mut candidates: Vec<Detection>, thresh: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(&k.bbox, &candidate.bbox) <= thresh) {
            kept.push(candidate);
        }
    }
    kept
}

/// Packs raw network outputs into per-image detections.
///
/// `loc` is `[batch, priors, 4]`, `conf` is `[batch, priors, classes]`
/// with already-normalized per-row probabilities, `priors` is
/// `[priors, 4]` in cxcywh form. Class 0 is background and never reported.
///
/// Per image and per non-background class: drop candidates below the
/// confidence floor, keep the `top_k` best, suppress overlaps, then cap
/// the union of all classes at `max_detections` by score.
pub fn detect<B: Backend>(
    loc: Tensor<B, 3>,
    conf: Tensor<B, 3>,
    priors: Tensor<B, 2>,
    config: &DetectConfig,
) -> Vec<Vec<Detection>> {
    let [batch, num_priors, _] = loc.shape().dims();
    let [_, _, num_classes] = conf.shape().dims();

    let loc = loc.into_data().to_vec::<f32>().unwrap();
    let conf = conf.into_data().to_vec::<f32>().unwrap();
    let priors = priors.into_data().to_vec::<f32>().unwrap();

    let mut output = Vec::with_capacity(batch);

    for b in 0..batch {
        let loc = &loc[b * num_priors * 4..(b + 1) * num_priors * 4];
        let conf = &conf[b * num_priors * num_classes..(b + 1) * num_priors * num_classes];

        let mut image: Vec<Detection> = Vec::new();

        for class in 1..num_classes {
            let mut candidates: Vec<Detection> = Vec::new();

            for p in 0..num_priors {
                let score = conf[p * num_classes + class];
                if score <= config.conf_thresh {
                    continue;
                }

                let offsets: [f32; 4] = loc[p * 4..p * 4 + 4].try_into().unwrap();
                let prior: [f32; 4] = priors[p * 4..p * 4 + 4].try_into().unwrap();

                candidates.push(Detection {
                    label: class,
                    score,
                    bbox: decode(&offsets, &prior, &VARIANCES),
                });
            }

            candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
            candidates.truncate(config.top_k);

            image.extend(nms(candidates, config.nms_thresh));
        }

        image.sort_by(|a, b| b.score.total_cmp(&a.score));
        image.truncate(config.max_detections);

        output.push(image);
    }

    output
}
