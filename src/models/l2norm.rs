use burn::config::Config;
use burn::module::{Module, Param};
use burn::nn::Initializer;
use burn::tensor::{Tensor, backend::Backend};

/// Channelwise L2 normalization with a learned per-channel scale.
///
/// “ParseNet: Looking Wider to See Better”
/// Authors: Wei Liu, Andrew Rabinovich, Alexander C. Berg
/// Link (official): https://arxiv.org/abs/1506.04579
///
/// The conv4_3 feature map has a different feature scale compared to the
/// deeper layers, so SSD normalizes each spatial location to unit L2 norm
/// across channels and rescales with a learned per-channel weight,
/// initialized to 20.
///
/// This is the one module in the network with a 1-D weight and no bias,
/// which the legacy weight importer leans on to tell it apart from the
/// convolutions.
#[derive(Config, Debug)]
pub struct L2NormConfig {
    /// Channels of the normalized feature map.
    pub channels: usize,
    /// Initial value of every channel scale.
    #[config(default = 20.0)]
    pub scale: f64,
    /// Stabilizer added to the norm before dividing.
    #[config(default = 1e-10)]
    pub eps: f64,
}

impl L2NormConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> L2Norm<B> {
        L2Norm {
            weight: Initializer::Constant { value: self.scale }.init([self.channels], device),
            eps: self.eps,
        }
    }
}

#[derive(Module, Debug)]
pub struct L2Norm<B: Backend> {
    pub weight: Param<Tensor<B, 1>>,
    eps: f64,
}

impl<B: Backend> L2Norm<B> {
    /// Normalizes `[batch, channels, height, width]` input so every spatial
    /// location has L2 norm equal to its channel's learned scale.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let norm = input
            .clone()
            .powf_scalar(2.0)
            .sum_dim(1)
            .sqrt()
            .add_scalar(self.eps);

        let scale = self.weight.val().reshape([1, -1, 1, 1]);

        input / norm * scale
    }
}
