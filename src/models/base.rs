use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig};
use burn::{
    module::Module,
    tensor::{Tensor, backend::Backend},
};

/// VGG-16 configuration D feature extractor through conv4_3, with batch
/// normalization after every convolution.
///
/// “Very Deep Convolutional Networks for Large-Scale Image Recognition”
/// Authors: Karen Simonyan, Andrew Zisserman
/// Link (official): https://arxiv.org/abs/1409.1556
///
/// Channel plan for the 300 input: [64, 64, M, 128, 128, M, 256, 256, 256,
/// C, 512, 512, 512] where `M` is a 2x2 stride-2 max pool and `C` is the
/// ceil-mode variant. The classifier stages of VGG (fc6 and onward) are not
/// part of this block; the detector continues from conv4_3 with its own
/// downsampling groups.
///
/// A 300x300 input leaves this block as a 512-channel 38x38 map:
/// 300 -> 150 -> 75 -> 38 (ceil) with the conv4 stage at 38.
#[derive(Module, Debug)]
pub struct VggBase<B: Backend> {
    pub conv1_1: Conv2d<B>,
    pub bn1_1: BatchNorm<B, 2>,
    pub conv1_2: Conv2d<B>,
    pub bn1_2: BatchNorm<B, 2>,
    pub pool1: MaxPool2d,

    pub conv2_1: Conv2d<B>,
    pub bn2_1: BatchNorm<B, 2>,
    pub conv2_2: Conv2d<B>,
    pub bn2_2: BatchNorm<B, 2>,
    pub pool2: MaxPool2d,

    pub conv3_1: Conv2d<B>,
    pub bn3_1: BatchNorm<B, 2>,
    pub conv3_2: Conv2d<B>,
    pub bn3_2: BatchNorm<B, 2>,
    pub conv3_3: Conv2d<B>,
    pub bn3_3: BatchNorm<B, 2>,
    pub pool3: MaxPool2d,

    pub conv4_1: Conv2d<B>,
    pub bn4_1: BatchNorm<B, 2>,
    pub conv4_2: Conv2d<B>,
    pub bn4_2: BatchNorm<B, 2>,
    pub conv4_3: Conv2d<B>,
    pub bn4_3: BatchNorm<B, 2>,
}

fn conv3x3<B: Backend>(channels: [usize; 2], device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new(channels, [3, 3])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .init(device)
}

impl<B: Backend> VggBase<B> {
    pub fn new(device: &B::Device) -> Self {
        let pool = || MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        // burn pools have no ceil mode; padding by one on each side turns
        // the 75 -> 37 floor division into the 75 -> 38 the geometry table
        // expects. The pad rows only ever see non-negative post-relu values.
        let pool_ceil = MaxPool2dConfig::new([2, 2])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        VggBase {
            conv1_1: conv3x3([3, 64], device),
            bn1_1: BatchNormConfig::new(64).init(device),
            conv1_2: conv3x3([64, 64], device),
            bn1_2: BatchNormConfig::new(64).init(device),
            pool1: pool(),

            conv2_1: conv3x3([64, 128], device),
            bn2_1: BatchNormConfig::new(128).init(device),
            conv2_2: conv3x3([128, 128], device),
            bn2_2: BatchNormConfig::new(128).init(device),
            pool2: pool(),

            conv3_1: conv3x3([128, 256], device),
            bn3_1: BatchNormConfig::new(256).init(device),
            conv3_2: conv3x3([256, 256], device),
            bn3_2: BatchNormConfig::new(256).init(device),
            conv3_3: conv3x3([256, 256], device),
            bn3_3: BatchNormConfig::new(256).init(device),
            pool3: pool_ceil,

            conv4_1: conv3x3([256, 512], device),
            bn4_1: BatchNormConfig::new(512).init(device),
            conv4_2: conv3x3([512, 512], device),
            bn4_2: BatchNormConfig::new(512).init(device),
            conv4_3: conv3x3([512, 512], device),
            bn4_3: BatchNormConfig::new(512).init(device),
        }
    }

    /// Runs the block up to the relu after conv4_3.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv1_1.forward(input);
        let x = burn::tensor::activation::relu(self.bn1_1.forward(x));
        let x = self.conv1_2.forward(x);
        let x = burn::tensor::activation::relu(self.bn1_2.forward(x));
        let x = self.pool1.forward(x); // 150x150

        let x = self.conv2_1.forward(x);
        let x = burn::tensor::activation::relu(self.bn2_1.forward(x));
        let x = self.conv2_2.forward(x);
        let x = burn::tensor::activation::relu(self.bn2_2.forward(x));
        let x = self.pool2.forward(x); // 75x75

        let x = self.conv3_1.forward(x);
        let x = burn::tensor::activation::relu(self.bn3_1.forward(x));
        let x = self.conv3_2.forward(x);
        let x = burn::tensor::activation::relu(self.bn3_2.forward(x));
        let x = self.conv3_3.forward(x);
        let x = burn::tensor::activation::relu(self.bn3_3.forward(x));
        let x = self.pool3.forward(x); // 38x38

        let x = self.conv4_1.forward(x);
        let x = burn::tensor::activation::relu(self.bn4_1.forward(x));
        let x = self.conv4_2.forward(x);
        let x = burn::tensor::activation::relu(self.bn4_2.forward(x));
        let x = self.conv4_3.forward(x);
        burn::tensor::activation::relu(self.bn4_3.forward(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{NdArray, ndarray::NdArrayDevice};

    type B = NdArray<f32>;

    #[test]
    fn ceil_pool_keeps_the_38_map() {
        let device = &NdArrayDevice::default();
        let base: VggBase<B> = VggBase::new(device);

        // the pool after the conv3 stage turns 75 into 38, not 37
        let x = Tensor::<B, 4>::ones([1, 256, 75, 75], device);
        let pooled = base.pool3.forward(x);
        assert_eq!(pooled.shape().dims, [1, 256, 38, 38]);
    }

    #[test]
    fn conv4_3_output_shape() {
        let device = &NdArrayDevice::default();
        let base: VggBase<B> = VggBase::new(device);

        let x = Tensor::<B, 4>::ones([1, 3, 300, 300], device);
        let out = base.forward(x);
        assert_eq!(out.shape().dims, [1, 512, 38, 38]);
    }
}
