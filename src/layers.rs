/// Convolutional feature map scales the detector predicts from.
///
/// Each variant is one of the six feature maps the SSD300 architecture
/// attaches a prediction head to, ordered from the early high-resolution
/// map to the final 1x1 map. The layers decrease in size progressively and
/// allow predictions of detections at multiple scales; each carries its own
/// slice of the fixed prior geometry table.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureScale {
    /// `Conv4_3`: last block of the VGG base, read through L2Norm.
    Conv4_3,
    /// `Conv7`: the dilated replacement for VGG's FC7.
    Conv7,
    /// `Conv8_2`: first extra downsampling block.
    Conv8_2,
    /// `Conv9_2`: second extra downsampling block.
    Conv9_2,
    /// `Conv10_2`: third extra block (no padding, 5x5 -> 3x3).
    Conv10_2,
    /// `Conv11_2`: final extra block, 1x1 map.
    Conv11_2,
}

impl FeatureScale {
    /// All scales, in prediction order. Priors and head outputs are
    /// concatenated in exactly this order.
    pub fn all() -> [FeatureScale; 6] {
        [
            FeatureScale::Conv4_3,
            FeatureScale::Conv7,
            FeatureScale::Conv8_2,
            FeatureScale::Conv9_2,
            FeatureScale::Conv10_2,
            FeatureScale::Conv11_2,
        ]
    }

    pub fn count() -> usize {
        Self::all().len()
    }

    /// Channels of the feature map this scale's heads read.
    pub fn channels(&self) -> usize {
        match self {
            FeatureScale::Conv4_3 => 512,
            FeatureScale::Conv7 => 1024,
            FeatureScale::Conv8_2 => 512,
            FeatureScale::Conv9_2 => 256,
            FeatureScale::Conv10_2 => 256,
            FeatureScale::Conv11_2 => 256,
        }
    }

    /// Spatial size of the (square) feature map for a 300x300 input.
    pub fn map_size(&self) -> usize {
        match self {
            FeatureScale::Conv4_3 => 38,
            FeatureScale::Conv7 => 19,
            FeatureScale::Conv8_2 => 10,
            FeatureScale::Conv9_2 => 5,
            FeatureScale::Conv10_2 => 3,
            FeatureScale::Conv11_2 => 1,
        }
    }

    /// Input-image pixels between two neighbouring cell centers.
    pub fn step(&self) -> f32 {
        match self {
            FeatureScale::Conv4_3 => 8.0,
            FeatureScale::Conv7 => 16.0,
            FeatureScale::Conv8_2 => 32.0,
            FeatureScale::Conv9_2 => 64.0,
            FeatureScale::Conv10_2 => 100.0,
            FeatureScale::Conv11_2 => 300.0,
        }
    }

    /// Side of the small square prior, in input pixels.
    pub fn min_size(&self) -> f32 {
        match self {
            FeatureScale::Conv4_3 => 30.0,
            FeatureScale::Conv7 => 60.0,
            FeatureScale::Conv8_2 => 111.0,
            FeatureScale::Conv9_2 => 162.0,
            FeatureScale::Conv10_2 => 213.0,
            FeatureScale::Conv11_2 => 264.0,
        }
    }

    /// Side used for the extra aspect-ratio-1 prior: the geometric mean of
    /// `min_size` and the next scale's `min_size`.
    pub fn max_size(&self) -> f32 {
        match self {
            FeatureScale::Conv4_3 => 60.0,
            FeatureScale::Conv7 => 111.0,
            FeatureScale::Conv8_2 => 162.0,
            FeatureScale::Conv9_2 => 213.0,
            FeatureScale::Conv10_2 => 264.0,
            FeatureScale::Conv11_2 => 315.0,
        }
    }

    /// Extra aspect ratios beyond 1; each is also used inverted.
    pub fn aspect_ratios(&self) -> &'static [f32] {
        match self {
            FeatureScale::Conv4_3 => &[2.0],
            FeatureScale::Conv7 => &[2.0, 3.0],
            FeatureScale::Conv8_2 => &[2.0, 3.0],
            FeatureScale::Conv9_2 => &[2.0, 3.0],
            FeatureScale::Conv10_2 => &[2.0],
            FeatureScale::Conv11_2 => &[2.0],
        }
    }

    /// Priors per feature map location: the two square boxes plus one pair
    /// per extra aspect ratio. Fixed per head; determines the head's output
    /// channel multiplier.
    pub fn priors_per_location(&self) -> usize {
        2 + 2 * self.aspect_ratios().len()
    }

    /// Priors this scale contributes in total.
    pub fn prior_count(&self) -> usize {
        self.map_size() * self.map_size() * self.priors_per_location()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_are_in_prediction_order() {
        let scales = FeatureScale::all();
        assert_eq!(scales.len(), 6);
        assert!(matches!(scales[0], FeatureScale::Conv4_3));
        assert!(matches!(scales[1], FeatureScale::Conv7));
        assert!(matches!(scales[2], FeatureScale::Conv8_2));
        assert!(matches!(scales[3], FeatureScale::Conv9_2));
        assert!(matches!(scales[4], FeatureScale::Conv10_2));
        assert!(matches!(scales[5], FeatureScale::Conv11_2));
    }

    #[test]
    fn channel_table() {
        assert_eq!(FeatureScale::Conv4_3.channels(), 512);
        assert_eq!(FeatureScale::Conv7.channels(), 1024);
        assert_eq!(FeatureScale::Conv8_2.channels(), 512);
        assert_eq!(FeatureScale::Conv9_2.channels(), 256);
        assert_eq!(FeatureScale::Conv10_2.channels(), 256);
        assert_eq!(FeatureScale::Conv11_2.channels(), 256);
    }

    #[test]
    fn priors_per_location_is_four_or_six() {
        let expected = [4, 6, 6, 6, 4, 4];
        for (scale, expected) in FeatureScale::all().iter().zip(expected) {
            assert_eq!(scale.priors_per_location(), expected);
        }
    }

    #[test]
    fn per_scale_prior_counts() {
        let expected = [5776, 2166, 600, 150, 36, 4];
        for (scale, expected) in FeatureScale::all().iter().zip(expected) {
            assert_eq!(scale.prior_count(), expected);
        }
    }
}
