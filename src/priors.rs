use burn::{prelude::Backend, tensor::Tensor};

use crate::{config::INPUT_SIZE, layers::FeatureScale};

/// Encoding variances for the box regression targets.
///
/// Offsets are divided by these during encoding and multiplied back during
/// decoding; (0.1, 0.1) applies to the center coordinates, (0.2, 0.2) to
/// the log-space width and height.
pub const VARIANCES: [f32; 4] = [0.1, 0.1, 0.2, 0.2];

/// Total number of prior boxes over all six scales for a 300x300 input.
pub const TOTAL_PRIORS: usize = 8732;

/// Generates the default boxes for a single feature map scale.
///
/// “SSD: Single Shot MultiBox Detector”
/// Authors: Wei Liu, Dragomir Anguelov, Dumitru Erhan, Christian Szegedy,
///          Scott Reed, Cheng-Yang Fu, Alexander C. Berg
/// Link (official): https://arxiv.org/abs/1512.02325
///
/// Default boxes and aspect ratios - Pg. 4 Liu et al.
///
/// We associate a set of default bounding boxes with each feature map cell,
/// for multiple feature maps at the top of the network. The default boxes
/// tile the feature map in a convolutional manner, so that the position of
/// each box relative to its corresponding cell is fixed.
///
/// Cells are walked row-major and the priors of one cell are emitted
/// consecutively: the small square (side `min_size`), the large square
/// (side `sqrt(min_size * max_size)`), then a stretched/flipped pair per
/// extra aspect ratio. The prediction heads flatten their output in the
/// same (row, column, anchor) order, so position `k` of the concatenated
/// prior tensor lines up with row `k` of the concatenated predictions.
///
/// Boxes are returned in cxcywh form as fractions of the input image,
/// clamped to [0, 1].
pub fn priors_for_scale(scale: &FeatureScale) -> Vec<[f32; 4]> {
    let cells = scale.map_size();
    let image = INPUT_SIZE as f32;
    let step = scale.step();

    // s_k and the aspect-ratio-1 extra scale s'_k = sqrt(s_k * s_{k+1})
    let small = scale.min_size() / image;
    let large = (scale.min_size() * scale.max_size()).sqrt() / image;

    let mut boxes = Vec::with_capacity(scale.prior_count());

    for i in 0..cells {
        for j in 0..cells {
            // Box centers sit on the cell centers of the step grid, not of
            // the feature map itself; for Conv4_3 the 38 steps of 8px only
            // cover 304px, which the clamp below absorbs.
            let cy = (i as f32 + 0.5) * step / image;
            let cx = (j as f32 + 0.5) * step / image;

            boxes.push(clamp_unit([cx, cy, small, small]));
            boxes.push(clamp_unit([cx, cy, large, large]));

            for ar in scale.aspect_ratios() {
                let root = ar.sqrt();
                boxes.push(clamp_unit([cx, cy, small * root, small / root]));
                boxes.push(clamp_unit([cx, cy, small / root, small * root]));
            }
        }
    }

    boxes
}

fn clamp_unit(b: [f32; 4]) -> [f32; 4] {
    b.map(|v| v.clamp(0.0, 1.0))
}

/// Concatenates the priors of all six scales into one `[8732, 4]` tensor
/// in cxcywh form, in prediction order.
pub fn generate_all_priors<B: Backend>(device: &B::Device) -> Tensor<B, 2> {
    let mut flat: Vec<f32> = Vec::with_capacity(TOTAL_PRIORS * 4);

    for scale in FeatureScale::all().iter() {
        for prior in priors_for_scale(scale) {
            flat.extend(prior);
        }
    }

    let count = flat.len() / 4;
    Tensor::<B, 1>::from_floats(flat.as_slice(), device).reshape([count, 4])
}
