use thiserror::Error;

/// Errors raised while assembling the network.
///
/// Both variants are configuration errors: the caller asked for a network
/// this crate cannot build. No partially constructed network is ever
/// returned alongside one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// The phase string was neither `"train"` nor `"test"`.
    #[error("phase not recognized: `{0}` (expected \"train\" or \"test\")")]
    UnknownPhase(String),

    /// Only the 300x300 variant has a geometry table.
    #[error("unsupported input size {0}: only SSD300 is supported")]
    UnsupportedSize(usize),
}

/// Errors raised by the legacy weight importer.
///
/// Every variant is fatal to the whole import. The legacy cursor path
/// copies in place, so slots processed before the failure keep their new
/// values; the plan-based path validates before writing anything.
#[derive(Error, Debug)]
pub enum ImportError {
    /// The weights file does not carry the one accepted extension.
    #[error("unsupported weight file `{path}`: only .t7 is supported")]
    UnsupportedExtension { path: String },

    /// A foreign layer exposed a weight but no bias.
    #[error("foreign layer {index} ({type_name}) has a weight but no bias")]
    MissingBias { index: usize, type_name: String },

    /// Foreign and target weight shapes differ.
    #[error(
        "weight shape mismatch: foreign layer {foreign_index} is {foreign_shape:?}, \
         target `{slot}` is {target_shape:?}"
    )]
    WeightShape {
        foreign_index: usize,
        foreign_shape: Vec<usize>,
        slot: String,
        target_shape: Vec<usize>,
    },

    /// Foreign and target bias shapes differ.
    #[error(
        "bias shape mismatch: foreign layer {foreign_index} is {foreign_shape:?}, \
         target `{slot}` is {target_shape:?}"
    )]
    BiasShape {
        foreign_index: usize,
        foreign_shape: Vec<usize>,
        slot: String,
        target_shape: Vec<usize>,
    },

    /// More weighted foreign layers than weighted target slots.
    #[error("foreign layer {foreign_index} has no remaining target module")]
    TargetsExhausted { foreign_index: usize },

    /// The module list is too short to hold the normalization weight at its
    /// fixed offset from the end.
    #[error("module list of {len} slots has no normalization position")]
    NoNormSlot { len: usize },

    /// A named slot lookup failed.
    #[error("no slot named `{0}`")]
    UnknownSlot(String),

    /// A slot list was written back in a different shape or order than the
    /// network's inventory produces.
    #[error("module inventory mismatch: expected `{expected}`, found `{found}`")]
    InventoryMismatch { expected: String, found: String },

    /// The named norm target is not a 1-D weight of the expected length.
    #[error("norm weight {weight_shape:?} does not fit slot `{slot}` {target_shape:?}")]
    NormShape {
        slot: String,
        weight_shape: Vec<usize>,
        target_shape: Vec<usize>,
    },

    #[error("failed to read weight file")]
    Io(#[from] std::io::Error),

    #[error("failed to decode legacy serialized file")]
    Decode(#[from] crate::t7::T7Error),

    /// The decoded root object does not look like a serialized module list.
    #[error("legacy file does not contain a module list: {0}")]
    NotAModuleList(String),
}
