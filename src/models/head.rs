use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::{
    module::Module,
    tensor::{Tensor, backend::Backend},
};

use crate::layers::FeatureScale;

/// Per-scale detection head: one convolution predicting box offsets and
/// one predicting class confidences.
///
/// For `k` priors per location and `c` classes, the offset convolution has
/// `4k` output channels and the confidence convolution `ck`; both are 3x3
/// with padding 1, so the head preserves the feature map size and emits
/// one prediction group per cell.
#[derive(Module, Debug)]
pub struct PredictionHead<B: Backend> {
    pub loc: Conv2d<B>,
    pub conf: Conv2d<B>,
    priors_per_location: usize,
}

impl<B: Backend> PredictionHead<B> {
    pub fn new(device: &B::Device, scale: &FeatureScale, num_classes: usize) -> Self {
        let channels = scale.channels();
        let priors = scale.priors_per_location();

        let loc = Conv2dConfig::new([channels, priors * 4], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let conf = Conv2dConfig::new([channels, priors * num_classes], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);

        PredictionHead {
            loc,
            conf,
            priors_per_location: priors,
        }
    }

    pub fn priors_per_location(&self) -> usize {
        self.priors_per_location
    }

    /// Raw `(offsets, confidences)` maps, still in NCHW layout.
    pub fn forward(&self, features: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        (
            self.loc.forward(features.clone()),
            self.conf.forward(features),
        )
    }
}
