use burn::module::{Ignored, Module};
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig};
use burn::tensor::activation::{relu, softmax};
use burn::tensor::{Tensor, backend::Backend};

use crate::config::{DetectConfig, INPUT_SIZE, Phase, SizeValidation};
use crate::detection::{self, Detection};
use crate::error::BuildError;
use crate::import::{ParamSlot, SlotReader, bn_slot, conv_slot, load_bn, load_conv};
use crate::layers::FeatureScale;
use crate::models::base::VggBase;
use crate::models::head::PredictionHead;
use crate::models::l2norm::{L2Norm, L2NormConfig};
use crate::priors::generate_all_priors;

/// Single Shot Multibox detector for 300x300 inputs.
///
/// “SSD: Single Shot MultiBox Detector”
/// Authors: Wei Liu, Dragomir Anguelov, Dumitru Erhan, Christian Szegedy,
///          Scott Reed, Cheng-Yang Fu, Alexander C. Berg
/// Link (official): https://arxiv.org/abs/1512.02325
///
/// The network is the VGG base followed by five downsampling groups, with
/// a prediction head attached to six feature maps along the way. The
/// conv4_3 map is read through [`L2Norm`]; every later group reads the
/// unnormalized stream.
///
/// Group boundaries and shapes (channels @ map size):
///
///   base      512 @ 38   (heads read this via L2Norm)
///   conv5-7  1024 @ 19
///   conv8     512 @ 10
///   conv9     256 @  5   (ends on batch norm, no relu)
///   conv10    256 @  3
///   conv11    256 @  1   (no relus at all)
#[derive(Module, Debug)]
pub struct Ssd<B: Backend> {
    pub base: VggBase<B>,
    pub l2norm: L2Norm<B>,

    // conv5 stage plus the dilated fc6/fc7 replacements
    pool4: MaxPool2d,
    conv5_1: Conv2d<B>,
    bn5_1: BatchNorm<B, 2>,
    conv5_2: Conv2d<B>,
    bn5_2: BatchNorm<B, 2>,
    conv5_3: Conv2d<B>,
    bn5_3: BatchNorm<B, 2>,
    pool5: MaxPool2d,
    conv6: Conv2d<B>,
    bn6: BatchNorm<B, 2>,
    conv7: Conv2d<B>,
    bn7: BatchNorm<B, 2>,

    conv8_1: Conv2d<B>,
    bn8_1: BatchNorm<B, 2>,
    conv8_2: Conv2d<B>,
    bn8_2: BatchNorm<B, 2>,

    conv9_1: Conv2d<B>,
    bn9_1: BatchNorm<B, 2>,
    conv9_2: Conv2d<B>,
    bn9_2: BatchNorm<B, 2>,

    conv10_1: Conv2d<B>,
    bn10_1: BatchNorm<B, 2>,
    conv10_2: Conv2d<B>,
    bn10_2: BatchNorm<B, 2>,

    conv11_1: Conv2d<B>,
    bn11_1: BatchNorm<B, 2>,
    conv11_2: Conv2d<B>,
    bn11_2: BatchNorm<B, 2>,

    pub heads: Vec<PredictionHead<B>>,

    num_classes: usize,
    phase: Ignored<Phase>,
}

/// Phase-dependent forward result.
pub enum SsdOutput<B: Backend> {
    /// Raw tensors for an external loss: `[batch, 8732, 4]` offsets,
    /// `[batch, 8732, classes]` unnormalized logits, `[8732, 4]` priors.
    Train {
        loc: Tensor<B, 3>,
        conf: Tensor<B, 3>,
        priors: Tensor<B, 2>,
    },
    /// Post-processed detections, one list per image.
    Detections(Vec<Vec<Detection>>),
}

impl<B: Backend> Ssd<B> {
    pub fn new(phase: Phase, num_classes: usize, device: &B::Device) -> Self {
        let conv1x1 = |channels: [usize; 2]| Conv2dConfig::new(channels, [1, 1]).init(device);
        let conv3x3 = |channels: [usize; 2]| {
            Conv2dConfig::new(channels, [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device)
        };

        let heads = FeatureScale::all()
            .iter()
            .map(|scale| PredictionHead::new(device, scale, num_classes))
            .collect();

        Ssd {
            base: VggBase::new(device),
            l2norm: L2NormConfig::new(512).init(device),

            pool4: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            conv5_1: conv3x3([512, 512]),
            bn5_1: BatchNormConfig::new(512).init(device),
            conv5_2: conv3x3([512, 512]),
            bn5_2: BatchNormConfig::new(512).init(device),
            conv5_3: conv3x3([512, 512]),
            bn5_3: BatchNormConfig::new(512).init(device),
            pool5: MaxPool2dConfig::new([3, 3])
                .with_strides([1, 1])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            // atrous fc6 replacement: effective receptive field 13x13
            conv6: Conv2dConfig::new([512, 1024], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(6, 6))
                .with_dilation([6, 6])
                .init(device),
            bn6: BatchNormConfig::new(1024).init(device),
            conv7: conv1x1([1024, 1024]),
            bn7: BatchNormConfig::new(1024).init(device),

            conv8_1: conv1x1([1024, 256]),
            bn8_1: BatchNormConfig::new(256).init(device),
            conv8_2: Conv2dConfig::new([256, 512], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_stride([2, 2])
                .init(device),
            bn8_2: BatchNormConfig::new(512).init(device),

            conv9_1: conv1x1([512, 128]),
            bn9_1: BatchNormConfig::new(128).init(device),
            conv9_2: Conv2dConfig::new([128, 256], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_stride([2, 2])
                .init(device),
            bn9_2: BatchNormConfig::new(256).init(device),

            conv10_1: conv1x1([256, 128]),
            bn10_1: BatchNormConfig::new(128).init(device),
            conv10_2: Conv2dConfig::new([128, 256], [3, 3]).init(device),
            bn10_2: BatchNormConfig::new(256).init(device),

            conv11_1: conv1x1([256, 128]),
            bn11_1: BatchNormConfig::new(128).init(device),
            conv11_2: Conv2dConfig::new([128, 256], [3, 3]).init(device),
            bn11_2: BatchNormConfig::new(256).init(device),

            heads,
            num_classes,
            phase: Ignored(phase),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase.0
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Forward pass with the default detection constants.
    pub fn forward(&self, input: Tensor<B, 4>) -> SsdOutput<B> {
        self.forward_with(input, &DetectConfig::new())
    }

    /// Forward pass. In train phase the three raw tensors come back for an
    /// external loss; in test phase confidences are softmax-normalized and
    /// handed to the detection post-processor with `detect_config`.
    pub fn forward_with(&self, input: Tensor<B, 4>, detect_config: &DetectConfig) -> SsdOutput<B> {
        let device = input.device();

        let conv4_3 = self.base.forward(input);
        let normalized = self.l2norm.forward(conv4_3.clone());

        // conv5 stage and the dilated fc6/fc7 replacements, 1024 @ 19
        let x = self.pool4.forward(conv4_3);
        let x = relu(self.bn5_1.forward(self.conv5_1.forward(x)));
        let x = relu(self.bn5_2.forward(self.conv5_2.forward(x)));
        let x = relu(self.bn5_3.forward(self.conv5_3.forward(x)));
        let x = self.pool5.forward(x);
        let x = relu(self.bn6.forward(self.conv6.forward(x)));
        let conv7 = relu(self.bn7.forward(self.conv7.forward(x)));

        // 512 @ 10
        let x = relu(self.bn8_1.forward(self.conv8_1.forward(conv7.clone())));
        let conv8_2 = relu(self.bn8_2.forward(self.conv8_2.forward(x)));

        // 256 @ 5; the group ends on its batch norm
        let x = relu(self.bn9_1.forward(self.conv9_1.forward(conv8_2.clone())));
        let conv9_2 = self.bn9_2.forward(self.conv9_2.forward(x));

        // 256 @ 3
        let x = relu(self.bn10_1.forward(self.conv10_1.forward(conv9_2.clone())));
        let conv10_2 = self.bn10_2.forward(self.conv10_2.forward(x));

        // 256 @ 1
        let x = self.bn11_1.forward(self.conv11_1.forward(conv10_2.clone()));
        let conv11_2 = self.bn11_2.forward(self.conv11_2.forward(x));

        let maps = [normalized, conv7, conv8_2, conv9_2, conv10_2, conv11_2];

        let mut locs = Vec::with_capacity(maps.len());
        let mut confs = Vec::with_capacity(maps.len());

        for (head, map) in self.heads.iter().zip(maps) {
            let (loc, conf) = head.forward(map);
            let [batch, _, _, _] = loc.shape().dims();

            // NCHW -> NHWC, then one prediction row per prior, so the
            // concatenation lines up with the prior generator's
            // (row, column, anchor) order.
            locs.push(loc.permute([0, 2, 3, 1]).reshape([batch as i32, -1, 4]));
            confs.push(
                conf.permute([0, 2, 3, 1])
                    .reshape([batch as i32, -1, self.num_classes as i32]),
            );
        }

        let loc = Tensor::cat(locs, 1);
        let conf = Tensor::cat(confs, 1);
        let priors = generate_all_priors::<B>(&device);

        match self.phase.0 {
            Phase::Train => SsdOutput::Train { loc, conf, priors },
            Phase::Test => {
                let probabilities = softmax(conf, 2);
                SsdOutput::Detections(detection::detect(loc, probabilities, priors, detect_config))
            }
        }
    }
}

/// Builds the detector, failing closed on any unsupported size.
pub fn build_ssd<B: Backend>(
    phase: &str,
    size: usize,
    num_classes: usize,
    device: &B::Device,
) -> Result<Ssd<B>, BuildError> {
    build_ssd_with(phase, size, num_classes, SizeValidation::Strict, device)
}

/// Builds the detector with an explicit size-validation policy.
///
/// `SizeValidation::LegacyWarn` reproduces the historical behavior: a
/// warning for any size other than 300, after which the 300 geometry is
/// built regardless.
pub fn build_ssd_with<B: Backend>(
    phase: &str,
    size: usize,
    num_classes: usize,
    validation: SizeValidation,
    device: &B::Device,
) -> Result<Ssd<B>, BuildError> {
    let phase: Phase = match phase.parse() {
        Ok(phase) => phase,
        Err(err) => {
            tracing::error!(%err, "refusing to build network");
            return Err(err);
        }
    };

    if size != INPUT_SIZE {
        match validation {
            SizeValidation::Strict => {
                let err = BuildError::UnsupportedSize(size);
                tracing::error!(%err, "refusing to build network");
                return Err(err);
            }
            SizeValidation::LegacyWarn => {
                tracing::warn!(size, "only SSD300 is supported; building the 300 geometry");
            }
        }
    }

    Ok(Ssd::new(phase, num_classes, device))
}

impl<B: Backend> Ssd<B> {
    /// Flat inventory of the network's primitive operations, in module
    /// registration order (which is not forward order: the norm layer was
    /// registered after the feature groups, so it sits fourteen slots from
    /// the end, just ahead of the interleaved head convolutions and the
    /// softmax).
    ///
    /// Every slot carries a stable name plus copies of its weight/bias
    /// tensors; pools, relus and the softmax are weightless entries, so the
    /// importer's cursor walk sees the same skip structure a legacy
    /// serialized module list has.
    pub fn param_slots(&self) -> Vec<ParamSlot> {
        let mut slots = Vec::with_capacity(84);

        let b = &self.base;
        slots.push(conv_slot("conv1_1", &b.conv1_1));
        slots.push(bn_slot("bn1_1", &b.bn1_1));
        slots.push(ParamSlot::op("relu1_1"));
        slots.push(conv_slot("conv1_2", &b.conv1_2));
        slots.push(bn_slot("bn1_2", &b.bn1_2));
        slots.push(ParamSlot::op("relu1_2"));
        slots.push(ParamSlot::op("pool1"));

        slots.push(conv_slot("conv2_1", &b.conv2_1));
        slots.push(bn_slot("bn2_1", &b.bn2_1));
        slots.push(ParamSlot::op("relu2_1"));
        slots.push(conv_slot("conv2_2", &b.conv2_2));
        slots.push(bn_slot("bn2_2", &b.bn2_2));
        slots.push(ParamSlot::op("relu2_2"));
        slots.push(ParamSlot::op("pool2"));

        slots.push(conv_slot("conv3_1", &b.conv3_1));
        slots.push(bn_slot("bn3_1", &b.bn3_1));
        slots.push(ParamSlot::op("relu3_1"));
        slots.push(conv_slot("conv3_2", &b.conv3_2));
        slots.push(bn_slot("bn3_2", &b.bn3_2));
        slots.push(ParamSlot::op("relu3_2"));
        slots.push(conv_slot("conv3_3", &b.conv3_3));
        slots.push(bn_slot("bn3_3", &b.bn3_3));
        slots.push(ParamSlot::op("relu3_3"));
        slots.push(ParamSlot::op("pool3"));

        slots.push(conv_slot("conv4_1", &b.conv4_1));
        slots.push(bn_slot("bn4_1", &b.bn4_1));
        slots.push(ParamSlot::op("relu4_1"));
        slots.push(conv_slot("conv4_2", &b.conv4_2));
        slots.push(bn_slot("bn4_2", &b.bn4_2));
        slots.push(ParamSlot::op("relu4_2"));
        slots.push(conv_slot("conv4_3", &b.conv4_3));
        slots.push(bn_slot("bn4_3", &b.bn4_3));
        slots.push(ParamSlot::op("relu4_3"));

        slots.push(ParamSlot::op("pool4"));
        slots.push(conv_slot("conv5_1", &self.conv5_1));
        slots.push(bn_slot("bn5_1", &self.bn5_1));
        slots.push(ParamSlot::op("relu5_1"));
        slots.push(conv_slot("conv5_2", &self.conv5_2));
        slots.push(bn_slot("bn5_2", &self.bn5_2));
        slots.push(ParamSlot::op("relu5_2"));
        slots.push(conv_slot("conv5_3", &self.conv5_3));
        slots.push(bn_slot("bn5_3", &self.bn5_3));
        slots.push(ParamSlot::op("relu5_3"));
        slots.push(ParamSlot::op("pool5"));
        slots.push(conv_slot("conv6", &self.conv6));
        slots.push(bn_slot("bn6", &self.bn6));
        slots.push(ParamSlot::op("relu6"));
        slots.push(conv_slot("conv7", &self.conv7));
        slots.push(bn_slot("bn7", &self.bn7));
        slots.push(ParamSlot::op("relu7"));

        slots.push(conv_slot("conv8_1", &self.conv8_1));
        slots.push(bn_slot("bn8_1", &self.bn8_1));
        slots.push(ParamSlot::op("relu8_1"));
        slots.push(conv_slot("conv8_2", &self.conv8_2));
        slots.push(bn_slot("bn8_2", &self.bn8_2));
        slots.push(ParamSlot::op("relu8_2"));

        slots.push(conv_slot("conv9_1", &self.conv9_1));
        slots.push(bn_slot("bn9_1", &self.bn9_1));
        slots.push(ParamSlot::op("relu9_1"));
        slots.push(conv_slot("conv9_2", &self.conv9_2));
        slots.push(bn_slot("bn9_2", &self.bn9_2));

        slots.push(conv_slot("conv10_1", &self.conv10_1));
        slots.push(bn_slot("bn10_1", &self.bn10_1));
        slots.push(ParamSlot::op("relu10_1"));
        slots.push(conv_slot("conv10_2", &self.conv10_2));
        slots.push(bn_slot("bn10_2", &self.bn10_2));

        slots.push(conv_slot("conv11_1", &self.conv11_1));
        slots.push(bn_slot("bn11_1", &self.bn11_1));
        slots.push(conv_slot("conv11_2", &self.conv11_2));
        slots.push(bn_slot("bn11_2", &self.bn11_2));

        slots.push(ParamSlot::weight_only(
            "l2norm",
            self.l2norm.weight.val().into_data(),
        ));

        let scale_names = ["4_3", "7", "8_2", "9_2", "10_2", "11_2"];
        for (head, name) in self.heads.iter().zip(scale_names) {
            slots.push(conv_slot(&format!("loc{name}"), &head.loc));
            slots.push(conv_slot(&format!("conf{name}"), &head.conf));
        }

        slots.push(ParamSlot::op("softmax"));

        slots
    }

    /// Writes a (possibly importer-mutated) inventory back into the typed
    /// modules. The list must have the exact shape and order
    /// [`Ssd::param_slots`] produces.
    pub fn load_param_slots(
        mut self,
        slots: Vec<ParamSlot>,
    ) -> Result<Self, crate::error::ImportError> {
        let mut reader = SlotReader::new(slots);

        let mut b = self.base;
        b.conv1_1 = load_conv(b.conv1_1, reader.take("conv1_1")?);
        b.bn1_1 = load_bn(b.bn1_1, reader.take("bn1_1")?);
        reader.skip_op("relu1_1")?;
        b.conv1_2 = load_conv(b.conv1_2, reader.take("conv1_2")?);
        b.bn1_2 = load_bn(b.bn1_2, reader.take("bn1_2")?);
        reader.skip_op("relu1_2")?;
        reader.skip_op("pool1")?;

        b.conv2_1 = load_conv(b.conv2_1, reader.take("conv2_1")?);
        b.bn2_1 = load_bn(b.bn2_1, reader.take("bn2_1")?);
        reader.skip_op("relu2_1")?;
        b.conv2_2 = load_conv(b.conv2_2, reader.take("conv2_2")?);
        b.bn2_2 = load_bn(b.bn2_2, reader.take("bn2_2")?);
        reader.skip_op("relu2_2")?;
        reader.skip_op("pool2")?;

        b.conv3_1 = load_conv(b.conv3_1, reader.take("conv3_1")?);
        b.bn3_1 = load_bn(b.bn3_1, reader.take("bn3_1")?);
        reader.skip_op("relu3_1")?;
        b.conv3_2 = load_conv(b.conv3_2, reader.take("conv3_2")?);
        b.bn3_2 = load_bn(b.bn3_2, reader.take("bn3_2")?);
        reader.skip_op("relu3_2")?;
        b.conv3_3 = load_conv(b.conv3_3, reader.take("conv3_3")?);
        b.bn3_3 = load_bn(b.bn3_3, reader.take("bn3_3")?);
        reader.skip_op("relu3_3")?;
        reader.skip_op("pool3")?;

        b.conv4_1 = load_conv(b.conv4_1, reader.take("conv4_1")?);
        b.bn4_1 = load_bn(b.bn4_1, reader.take("bn4_1")?);
        reader.skip_op("relu4_1")?;
        b.conv4_2 = load_conv(b.conv4_2, reader.take("conv4_2")?);
        b.bn4_2 = load_bn(b.bn4_2, reader.take("bn4_2")?);
        reader.skip_op("relu4_2")?;
        b.conv4_3 = load_conv(b.conv4_3, reader.take("conv4_3")?);
        b.bn4_3 = load_bn(b.bn4_3, reader.take("bn4_3")?);
        reader.skip_op("relu4_3")?;
        self.base = b;

        reader.skip_op("pool4")?;
        self.conv5_1 = load_conv(self.conv5_1, reader.take("conv5_1")?);
        self.bn5_1 = load_bn(self.bn5_1, reader.take("bn5_1")?);
        reader.skip_op("relu5_1")?;
        self.conv5_2 = load_conv(self.conv5_2, reader.take("conv5_2")?);
        self.bn5_2 = load_bn(self.bn5_2, reader.take("bn5_2")?);
        reader.skip_op("relu5_2")?;
        self.conv5_3 = load_conv(self.conv5_3, reader.take("conv5_3")?);
        self.bn5_3 = load_bn(self.bn5_3, reader.take("bn5_3")?);
        reader.skip_op("relu5_3")?;
        reader.skip_op("pool5")?;
        self.conv6 = load_conv(self.conv6, reader.take("conv6")?);
        self.bn6 = load_bn(self.bn6, reader.take("bn6")?);
        reader.skip_op("relu6")?;
        self.conv7 = load_conv(self.conv7, reader.take("conv7")?);
        self.bn7 = load_bn(self.bn7, reader.take("bn7")?);
        reader.skip_op("relu7")?;

        self.conv8_1 = load_conv(self.conv8_1, reader.take("conv8_1")?);
        self.bn8_1 = load_bn(self.bn8_1, reader.take("bn8_1")?);
        reader.skip_op("relu8_1")?;
        self.conv8_2 = load_conv(self.conv8_2, reader.take("conv8_2")?);
        self.bn8_2 = load_bn(self.bn8_2, reader.take("bn8_2")?);
        reader.skip_op("relu8_2")?;

        self.conv9_1 = load_conv(self.conv9_1, reader.take("conv9_1")?);
        self.bn9_1 = load_bn(self.bn9_1, reader.take("bn9_1")?);
        reader.skip_op("relu9_1")?;
        self.conv9_2 = load_conv(self.conv9_2, reader.take("conv9_2")?);
        self.bn9_2 = load_bn(self.bn9_2, reader.take("bn9_2")?);

        self.conv10_1 = load_conv(self.conv10_1, reader.take("conv10_1")?);
        self.bn10_1 = load_bn(self.bn10_1, reader.take("bn10_1")?);
        reader.skip_op("relu10_1")?;
        self.conv10_2 = load_conv(self.conv10_2, reader.take("conv10_2")?);
        self.bn10_2 = load_bn(self.bn10_2, reader.take("bn10_2")?);

        self.conv11_1 = load_conv(self.conv11_1, reader.take("conv11_1")?);
        self.bn11_1 = load_bn(self.bn11_1, reader.take("bn11_1")?);
        self.conv11_2 = load_conv(self.conv11_2, reader.take("conv11_2")?);
        self.bn11_2 = load_bn(self.bn11_2, reader.take("bn11_2")?);

        let norm = reader.take("l2norm")?;
        if let Some(data) = norm.weight {
            self.l2norm.weight = self
                .l2norm
                .weight
                .map(|t| Tensor::from_data(data.clone(), &t.device()));
        }

        let scale_names = ["4_3", "7", "8_2", "9_2", "10_2", "11_2"];
        let mut heads = Vec::with_capacity(self.heads.len());
        for (mut head, name) in self.heads.into_iter().zip(scale_names) {
            head.loc = load_conv(head.loc, reader.take(&format!("loc{name}"))?);
            head.conf = load_conv(head.conf, reader.take(&format!("conf{name}"))?);
            heads.push(head);
        }
        self.heads = heads;

        reader.skip_op("softmax")?;
        reader.finish()?;

        Ok(self)
    }
}
