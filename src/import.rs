use std::path::Path;

use burn::nn::BatchNorm;
use burn::nn::conv::Conv2d;
use burn::prelude::Backend;
use burn::tensor::{Tensor, TensorData};
use tracing::{debug, info};

use crate::config::ImportConfig;
use crate::error::ImportError;
use crate::foreign::{ForeignLayer, ForeignModel};
use crate::models::ssd::Ssd;
use crate::t7;

/// One entry of the network's flat operation inventory.
///
/// Weighted slots carry copies of their parameter tensors (for batch norm,
/// gamma and beta stand in for weight and bias); weightless operations
/// (pools, relus, the softmax) are present so positional walks see the
/// same structure a legacy serialized module list has.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSlot {
    pub name: String,
    pub weight: Option<TensorData>,
    pub bias: Option<TensorData>,
}

impl ParamSlot {
    /// A weightless operation.
    pub fn op(name: &str) -> Self {
        ParamSlot {
            name: name.to_string(),
            weight: None,
            bias: None,
        }
    }

    /// A layer with weight and bias.
    pub fn weighted(name: &str, weight: TensorData, bias: TensorData) -> Self {
        ParamSlot {
            name: name.to_string(),
            weight: Some(weight),
            bias: Some(bias),
        }
    }

    /// A layer with a weight but no bias (the norm layer).
    pub fn weight_only(name: &str, weight: TensorData) -> Self {
        ParamSlot {
            name: name.to_string(),
            weight: Some(weight),
            bias: None,
        }
    }

    pub fn has_weight(&self) -> bool {
        self.weight.is_some()
    }

    fn weight_rank(&self) -> Option<usize> {
        self.weight.as_ref().map(|w| w.shape.len())
    }
}

pub(crate) fn conv_slot<B: Backend>(name: &str, conv: &Conv2d<B>) -> ParamSlot {
    ParamSlot {
        name: name.to_string(),
        weight: Some(conv.weight.val().into_data()),
        bias: conv.bias.as_ref().map(|b| b.val().into_data()),
    }
}

pub(crate) fn bn_slot<B: Backend>(name: &str, bn: &BatchNorm<B, 2>) -> ParamSlot {
    ParamSlot {
        name: name.to_string(),
        weight: Some(bn.gamma.val().into_data()),
        bias: Some(bn.beta.val().into_data()),
    }
}

pub(crate) fn load_conv<B: Backend>(mut conv: Conv2d<B>, slot: ParamSlot) -> Conv2d<B> {
    if let Some(data) = slot.weight {
        conv.weight = conv
            .weight
            .map(|t| Tensor::from_data(data.clone(), &t.device()));
    }
    if let Some(data) = slot.bias {
        conv.bias = conv
            .bias
            .map(|p| p.map(|t| Tensor::from_data(data.clone(), &t.device())));
    }
    conv
}

pub(crate) fn load_bn<B: Backend>(mut bn: BatchNorm<B, 2>, slot: ParamSlot) -> BatchNorm<B, 2> {
    if let Some(data) = slot.weight {
        bn.gamma = bn
            .gamma
            .map(|t| Tensor::from_data(data.clone(), &t.device()));
    }
    if let Some(data) = slot.bias {
        bn.beta = bn
            .beta
            .map(|t| Tensor::from_data(data.clone(), &t.device()));
    }
    bn
}

/// Consumes a slot list in inventory order, verifying names as it goes.
pub(crate) struct SlotReader {
    slots: std::vec::IntoIter<ParamSlot>,
}

impl SlotReader {
    pub fn new(slots: Vec<ParamSlot>) -> Self {
        SlotReader {
            slots: slots.into_iter(),
        }
    }

    pub fn take(&mut self, name: &str) -> Result<ParamSlot, ImportError> {
        let slot = self
            .slots
            .next()
            .ok_or_else(|| ImportError::InventoryMismatch {
                expected: name.to_string(),
                found: "end of inventory".to_string(),
            })?;
        if slot.name != name {
            return Err(ImportError::InventoryMismatch {
                expected: name.to_string(),
                found: slot.name,
            });
        }
        Ok(slot)
    }

    pub fn skip_op(&mut self, name: &str) -> Result<(), ImportError> {
        self.take(name).map(|_| ())
    }

    pub fn finish(mut self) -> Result<(), ImportError> {
        match self.slots.next() {
            None => Ok(()),
            Some(slot) => Err(ImportError::InventoryMismatch {
                expected: "end of inventory".to_string(),
                found: slot.name,
            }),
        }
    }
}

/// Offset from the end of the inventory where the legacy loader hardcoded
/// the normalization layer: past the softmax and the six interleaved pairs
/// of head convolutions.
const NORM_OFFSET_FROM_END: usize = 14;

/// Copies a foreign module list into the slot inventory by positional
/// alignment, then drops the normalization weight at the fixed offset.
///
/// The walk keeps a cursor into `slots`. For each foreign layer exposing a
/// weight: a missing bias is a fatal format mismatch; the cursor advances
/// past weightless slots; a matched slot with a 1-D weight is assumed to
/// be a normalization layer with no counterpart in the foreign list and is
/// skipped in favor of the next weighted slot; then weight and bias must
/// match shapes exactly and are copied.
///
/// Copies happen in place as the walk proceeds, so a failure at foreign
/// position k leaves every earlier match already written. Callers wanting
/// all-or-nothing semantics should [`align`] first and [`apply`] the plan.
///
/// The final norm-weight copy goes to `slots[len - 14]` with no shape
/// check, reproducing the legacy loader's hardcoded offset: if the
/// inventory's tail structure ever changes, this writes the wrong slot
/// without complaint. [`apply_norm`] is the checked alternative.
pub fn import_weights<L: ForeignLayer>(
    slots: &mut [ParamSlot],
    foreign: &[L],
    norm_weight: &TensorData,
) -> Result<(), ImportError> {
    let mut cursor = 0usize;

    for (index, layer) in foreign.iter().enumerate() {
        let Some(weight) = layer.weight() else {
            continue;
        };
        let bias = layer.bias().ok_or_else(|| ImportError::MissingBias {
            index,
            type_name: layer.type_name().to_string(),
        })?;

        let target = next_weighted_target(slots, &mut cursor, index)?;
        let slot = &mut slots[target];

        let target_shape = &slot.weight.as_ref().unwrap().shape;
        if &weight.shape != target_shape {
            return Err(ImportError::WeightShape {
                foreign_index: index,
                foreign_shape: weight.shape.clone(),
                slot: slot.name.clone(),
                target_shape: target_shape.clone(),
            });
        }

        let bias_shape = slot.bias.as_ref().map(|b| b.shape.clone()).unwrap_or_default();
        if bias.shape != bias_shape {
            return Err(ImportError::BiasShape {
                foreign_index: index,
                foreign_shape: bias.shape.clone(),
                slot: slot.name.clone(),
                target_shape: bias_shape,
            });
        }

        debug!(foreign_index = index, slot = %slot.name, "copying layer parameters");
        slot.weight = Some(weight.clone());
        slot.bias = Some(bias.clone());
    }

    let norm_index = slots
        .len()
        .checked_sub(NORM_OFFSET_FROM_END)
        .ok_or(ImportError::NoNormSlot { len: slots.len() })?;
    debug!(slot = %slots[norm_index].name, "copying normalization weight");
    slots[norm_index].weight = Some(norm_weight.clone());

    Ok(())
}

/// Advances the cursor to the next weighted, non-1-D slot and claims it.
fn next_weighted_target(
    slots: &[ParamSlot],
    cursor: &mut usize,
    foreign_index: usize,
) -> Result<usize, ImportError> {
    loop {
        while *cursor < slots.len() && !slots[*cursor].has_weight() {
            *cursor += 1;
        }
        if *cursor >= slots.len() {
            return Err(ImportError::TargetsExhausted { foreign_index });
        }

        let target = *cursor;
        *cursor += 1;

        // The norm layer is the only module meant to have a 1-D weight;
        // the foreign list is assumed to carry no entry for it, so
        // re-match against the next weighted slot. Nothing verifies that
        // assumption here: a foreign 1-D entry shifts the alignment and
        // dies on the following shape check.
        if slots[target].weight_rank() != Some(1) {
            return Ok(target);
        }
    }
}

/// One validated pairing of a foreign layer with a target slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub foreign_index: usize,
    pub slot_index: usize,
    pub slot: String,
}

/// An explicit foreign-to-target mapping, produced by [`align`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportPlan {
    pub assignments: Vec<Assignment>,
}

/// Runs the alignment walk without copying anything, returning the
/// explicit layer-to-layer mapping it found.
///
/// Every shape rule of [`import_weights`] is enforced here, so a plan that
/// comes back `Ok` applies cleanly; nothing is written when alignment
/// fails. Together with [`apply`] this is the all-or-nothing path.
pub fn align<L: ForeignLayer>(
    slots: &[ParamSlot],
    foreign: &[L],
) -> Result<ImportPlan, ImportError> {
    let mut cursor = 0usize;
    let mut assignments = Vec::new();

    for (index, layer) in foreign.iter().enumerate() {
        let Some(weight) = layer.weight() else {
            continue;
        };
        let bias = layer.bias().ok_or_else(|| ImportError::MissingBias {
            index,
            type_name: layer.type_name().to_string(),
        })?;

        let target = next_weighted_target(slots, &mut cursor, index)?;
        let slot = &slots[target];

        let target_shape = &slot.weight.as_ref().unwrap().shape;
        if &weight.shape != target_shape {
            return Err(ImportError::WeightShape {
                foreign_index: index,
                foreign_shape: weight.shape.clone(),
                slot: slot.name.clone(),
                target_shape: target_shape.clone(),
            });
        }

        let bias_shape = slot.bias.as_ref().map(|b| b.shape.clone()).unwrap_or_default();
        if bias.shape != bias_shape {
            return Err(ImportError::BiasShape {
                foreign_index: index,
                foreign_shape: bias.shape.clone(),
                slot: slot.name.clone(),
                target_shape: bias_shape,
            });
        }

        assignments.push(Assignment {
            foreign_index: index,
            slot_index: target,
            slot: slot.name.clone(),
        });
    }

    Ok(ImportPlan { assignments })
}

/// Copies foreign parameters per an [`align`]ed plan.
pub fn apply<L: ForeignLayer>(
    slots: &mut [ParamSlot],
    foreign: &[L],
    plan: &ImportPlan,
) -> Result<(), ImportError> {
    for assignment in &plan.assignments {
        let slot = slots
            .get_mut(assignment.slot_index)
            .ok_or_else(|| ImportError::UnknownSlot(assignment.slot.clone()))?;
        if slot.name != assignment.slot {
            return Err(ImportError::InventoryMismatch {
                expected: assignment.slot.clone(),
                found: slot.name.clone(),
            });
        }
        let layer = &foreign[assignment.foreign_index];

        slot.weight = layer.weight().cloned();
        slot.bias = layer.bias().cloned();
    }
    Ok(())
}

/// Writes the normalization weight into a slot addressed by name, with the
/// shape check the fixed-offset copy never had.
pub fn apply_norm(
    slots: &mut [ParamSlot],
    slot_name: &str,
    norm_weight: &TensorData,
) -> Result<(), ImportError> {
    let slot = slots
        .iter_mut()
        .find(|s| s.name == slot_name)
        .ok_or_else(|| ImportError::UnknownSlot(slot_name.to_string()))?;

    match &slot.weight {
        Some(weight) if weight.shape == norm_weight.shape && weight.shape.len() == 1 => {
            slot.weight = Some(norm_weight.clone());
            Ok(())
        }
        Some(weight) => Err(ImportError::NormShape {
            slot: slot.name.clone(),
            weight_shape: norm_weight.shape.clone(),
            target_shape: weight.shape.clone(),
        }),
        None => Err(ImportError::NormShape {
            slot: slot.name.clone(),
            weight_shape: norm_weight.shape.clone(),
            target_shape: Vec::new(),
        }),
    }
}

/// Initializes a freshly built network from a legacy serialized model.
///
/// Only the `.t7` container is accepted; any other extension is rejected
/// before either file is touched. The norm weights file must hold a single
/// 1-D tensor. On success the network comes back with every matched layer
/// overwritten; on failure the untouched network is dropped with the error
/// (import is a startup, run-once operation).
pub fn load_legacy_weights<B: Backend>(
    model: Ssd<B>,
    config: &ImportConfig,
) -> Result<Ssd<B>, ImportError> {
    let extension = Path::new(&config.weights_file)
        .extension()
        .and_then(|e| e.to_str());
    if extension != Some("t7") {
        return Err(ImportError::UnsupportedExtension {
            path: config.weights_file.clone(),
        });
    }

    info!(file = %config.weights_file, "loading legacy serialized weights");
    let norm_weight = t7::read_tensor_file(&config.norm_weights_file)?;
    let root = t7::read_value_file(&config.weights_file)?;
    let foreign = ForeignModel::from_value(&root)?;
    info!(layers = foreign.len(), "aligning foreign module list");

    let mut slots = model.param_slots();
    import_weights(&mut slots, foreign.layers(), &norm_weight)?;
    model.load_param_slots(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foreign::ForeignModule;
    use crate::models::ssd::build_ssd;
    use burn::backend::{NdArray, ndarray::NdArrayDevice};
    use rand::{Rng, SeedableRng, rngs::StdRng};

    type B = NdArray<f32>;

    fn filled(shape: &[usize], value: f32) -> TensorData {
        TensorData::new(vec![value; shape.iter().product()], shape.to_vec())
    }

    fn conv_slot_like(name: &str, out_c: usize, in_c: usize) -> ParamSlot {
        ParamSlot::weighted(
            name,
            filled(&[out_c, in_c, 3, 3], 0.0),
            filled(&[out_c], 0.0),
        )
    }

    fn bn_slot_like(name: &str, channels: usize) -> ParamSlot {
        ParamSlot::weighted(name, filled(&[channels], 1.0), filled(&[channels], 0.0))
    }

    /// A miniature inventory with the real tail structure: the norm slot,
    /// twelve head convolutions, then the softmax, so the norm lands
    /// fourteen slots from the end.
    fn mini_inventory() -> Vec<ParamSlot> {
        let mut slots = vec![
            conv_slot_like("convA", 4, 3),
            bn_slot_like("bnA", 4),
            ParamSlot::op("reluA"),
            conv_slot_like("convB", 8, 4),
            bn_slot_like("bnB", 8),
            ParamSlot::op("poolA"),
            ParamSlot::weight_only("l2norm", filled(&[8], 20.0)),
        ];
        for i in 0..6 {
            slots.push(conv_slot_like(&format!("loc{i}"), 4 * (i + 1), 8));
            slots.push(conv_slot_like(&format!("conf{i}"), 2 * (i + 1), 8));
        }
        slots.push(ParamSlot::op("softmax"));
        slots
    }

    fn foreign_conv(out_c: usize, in_c: usize, value: f32) -> ForeignModule {
        ForeignModule::new(
            "nn.SpatialConvolution",
            Some(filled(&[out_c, in_c, 3, 3], value)),
            Some(filled(&[out_c], value + 0.5)),
        )
    }

    fn foreign_relu() -> ForeignModule {
        ForeignModule::new("nn.ReLU", None, None)
    }

    /// A foreign list matching every convolution of [`mini_inventory`],
    /// with no entries for the batch norms or the norm layer.
    fn matching_foreign() -> Vec<ForeignModule> {
        let mut layers = vec![
            foreign_conv(4, 3, 1.0),
            foreign_relu(),
            foreign_conv(8, 4, 2.0),
            foreign_relu(),
        ];
        for i in 0..6 {
            layers.push(foreign_conv(4 * (i + 1), 8, 10.0 + i as f32));
            layers.push(foreign_conv(2 * (i + 1), 8, 20.0 + i as f32));
        }
        layers
    }

    #[test]
    fn end_to_end_synthetic_import() {
        let mut slots = mini_inventory();
        let foreign = matching_foreign();
        let norm = filled(&[8], 3.25);

        import_weights(&mut slots, &foreign, &norm).unwrap();

        assert_eq!(slots[0].weight, Some(filled(&[4, 3, 3, 3], 1.0)));
        assert_eq!(slots[0].bias, Some(filled(&[4], 1.5)));
        assert_eq!(slots[3].weight, Some(filled(&[8, 4, 3, 3], 2.0)));
        assert_eq!(slots[7].weight, Some(filled(&[4, 8, 3, 3], 10.0)));
        assert_eq!(slots[8].weight, Some(filled(&[2, 8, 3, 3], 20.0)));

        // batch norms were skipped by the 1-D rule, not overwritten
        assert_eq!(slots[1].weight, Some(filled(&[4], 1.0)));
        assert_eq!(slots[4].weight, Some(filled(&[8], 1.0)));

        // the norm weight landed fourteen slots from the end
        let norm_index = slots.len() - 14;
        assert_eq!(slots[norm_index].name, "l2norm");
        assert_eq!(slots[norm_index].weight, Some(filled(&[8], 3.25)));
    }

    #[test]
    fn import_is_idempotent() {
        let foreign = matching_foreign();
        let norm = filled(&[8], 3.25);

        let mut once = mini_inventory();
        import_weights(&mut once, &foreign, &norm).unwrap();

        let mut twice = once.clone();
        import_weights(&mut twice, &foreign, &norm).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn missing_bias_is_fatal_after_partial_copies() {
        let mut slots = mini_inventory();
        let mut foreign = matching_foreign();
        foreign[2] = ForeignModule::new(
            "nn.SpatialConvolution",
            Some(filled(&[8, 4, 3, 3], 2.0)),
            None,
        );

        let err = import_weights(&mut slots, &foreign, &filled(&[8], 3.25)).unwrap_err();
        assert!(matches!(err, ImportError::MissingBias { index: 2, .. }));

        // the non-transactional walk already copied the first match
        assert_eq!(slots[0].weight, Some(filled(&[4, 3, 3, 3], 1.0)));
        // and never touched the one that failed
        assert_eq!(slots[3].weight, Some(filled(&[8, 4, 3, 3], 0.0)));
    }

    #[test]
    fn weight_shape_mismatch_is_fatal_after_partial_copies() {
        let mut slots = mini_inventory();
        let mut foreign = matching_foreign();
        foreign[2] = foreign_conv(16, 4, 2.0);

        let err = import_weights(&mut slots, &foreign, &filled(&[8], 3.25)).unwrap_err();
        match err {
            ImportError::WeightShape {
                foreign_index,
                foreign_shape,
                slot,
                target_shape,
            } => {
                assert_eq!(foreign_index, 2);
                assert_eq!(foreign_shape, vec![16, 4, 3, 3]);
                assert_eq!(slot, "convB");
                assert_eq!(target_shape, vec![8, 4, 3, 3]);
            }
            other => panic!("unexpected error {other:?}"),
        }

        assert_eq!(slots[0].weight, Some(filled(&[4, 3, 3, 3], 1.0)));
        assert_eq!(slots[3].weight, Some(filled(&[8, 4, 3, 3], 0.0)));
    }

    #[test]
    fn foreign_one_dimensional_entry_breaks_the_alignment_assumption() {
        let mut slots = mini_inventory();
        let mut foreign = matching_foreign();
        // a gamma/beta pair the alignment assumes never exists: it gets
        // matched against the next convolution and dies on shape
        foreign.insert(
            1,
            ForeignModule::new(
                "nn.SpatialBatchNormalization",
                Some(filled(&[4], 1.0)),
                Some(filled(&[4], 0.0)),
            ),
        );

        let err = import_weights(&mut slots, &foreign, &filled(&[8], 3.25)).unwrap_err();
        assert!(matches!(
            err,
            ImportError::WeightShape {
                foreign_index: 1,
                ..
            }
        ));
    }

    #[test]
    fn more_foreign_layers_than_targets() {
        let mut slots = mini_inventory();
        let mut foreign = matching_foreign();
        foreign.push(foreign_conv(2, 8, 99.0));

        let err = import_weights(&mut slots, &foreign, &filled(&[8], 3.25)).unwrap_err();
        assert!(matches!(
            err,
            ImportError::TargetsExhausted { foreign_index: 16 }
        ));
    }

    #[test]
    fn short_inventory_has_no_norm_position() {
        let mut slots = vec![conv_slot_like("convA", 4, 3)];
        let foreign = vec![foreign_conv(4, 3, 1.0)];

        let err = import_weights(&mut slots, &foreign, &filled(&[8], 3.25)).unwrap_err();
        assert!(matches!(err, ImportError::NoNormSlot { len: 1 }));
    }

    #[test]
    fn align_names_every_assignment() {
        let slots = mini_inventory();
        let foreign = matching_foreign();

        let plan = align(&slots, &foreign).unwrap();

        assert_eq!(plan.assignments.len(), 14);
        assert_eq!(plan.assignments[0].foreign_index, 0);
        assert_eq!(plan.assignments[0].slot, "convA");
        assert_eq!(plan.assignments[1].foreign_index, 2);
        assert_eq!(plan.assignments[1].slot, "convB");
        assert_eq!(plan.assignments[2].slot, "loc0");
        assert_eq!(plan.assignments.last().unwrap().slot, "conf5");
    }

    #[test]
    fn failed_alignment_writes_nothing() {
        let slots = mini_inventory();
        let snapshot = slots.clone();
        let mut foreign = matching_foreign();
        foreign[2] = foreign_conv(16, 4, 2.0);

        assert!(align(&slots, &foreign).is_err());
        assert_eq!(slots, snapshot);
    }

    #[test]
    fn aligned_plan_applies_cleanly() {
        let mut slots = mini_inventory();
        let foreign = matching_foreign();

        let plan = align(&slots, &foreign).unwrap();
        apply(&mut slots, &foreign, &plan).unwrap();
        apply_norm(&mut slots, "l2norm", &filled(&[8], 3.25)).unwrap();

        let mut legacy = mini_inventory();
        import_weights(&mut legacy, &foreign, &filled(&[8], 3.25)).unwrap();

        assert_eq!(slots, legacy);
    }

    #[test]
    fn apply_norm_checks_the_shape_the_offset_copy_never_did() {
        let mut slots = mini_inventory();

        let err = apply_norm(&mut slots, "l2norm", &filled(&[16], 1.0)).unwrap_err();
        assert!(matches!(err, ImportError::NormShape { .. }));

        let err = apply_norm(&mut slots, "l5norm", &filled(&[8], 1.0)).unwrap_err();
        assert!(matches!(err, ImportError::UnknownSlot(_)));

        apply_norm(&mut slots, "l2norm", &filled(&[8], 5.0)).unwrap();
        assert_eq!(slots[6].weight, Some(filled(&[8], 5.0)));
    }

    #[test]
    fn rejects_any_extension_but_t7() {
        let device = &NdArrayDevice::default();
        let model = build_ssd::<B>("train", 300, 2, device).unwrap();

        let config = ImportConfig::new(
            "weights/legacy.bin".to_string(),
            "weights/norm.t7".to_string(),
        );
        let err = load_legacy_weights(model, &config).unwrap_err();
        assert!(matches!(err, ImportError::UnsupportedExtension { path } if path.ends_with(".bin")));
    }

    #[test]
    fn full_network_import_round_trip() {
        let device = &NdArrayDevice::default();
        let model = build_ssd::<B>("train", 300, 2, device).unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let slots = model.param_slots();

        // synthesize a conv-only foreign list shaped exactly like the
        // network's convolutions, with relus sprinkled in between
        let mut foreign = Vec::new();
        let mut expected = Vec::new();
        for slot in &slots {
            let Some(weight) = &slot.weight else { continue };
            if weight.shape.len() != 4 {
                continue;
            }
            let bias_len = weight.shape[0];
            let weight_values: Vec<f32> = (0..weight.shape.iter().product::<usize>())
                .map(|_| rng.gen_range(-1.0..1.0))
                .collect();
            let bias_values: Vec<f32> = (0..bias_len).map(|_| rng.gen_range(-1.0..1.0)).collect();

            let weight_data = TensorData::new(weight_values, weight.shape.clone());
            let bias_data = TensorData::new(bias_values, vec![bias_len]);
            expected.push((slot.name.clone(), weight_data.clone(), bias_data.clone()));

            foreign.push(foreign_relu());
            foreign.push(ForeignModule::new(
                "nn.SpatialConvolution",
                Some(weight_data),
                Some(bias_data),
            ));
        }

        let norm = filled(&[512], 17.5);

        let mut slots = slots;
        import_weights(&mut slots, &foreign, &norm).unwrap();
        let model = model.load_param_slots(slots).unwrap();

        // re-extract and verify every convolution took the foreign values
        let reloaded = model.param_slots();
        let mut expected = expected.into_iter();
        for slot in &reloaded {
            let Some(weight) = &slot.weight else { continue };
            if weight.shape.len() != 4 {
                continue;
            }
            let (name, expected_weight, expected_bias) = expected.next().unwrap();
            assert_eq!(slot.name, name);
            assert_eq!(slot.weight, Some(expected_weight));
            assert_eq!(slot.bias, Some(expected_bias));
        }
        assert!(expected.next().is_none());

        // the norm module took the supplied weight, batch norms kept their
        // initialization
        let norm_slot = reloaded.iter().find(|s| s.name == "l2norm").unwrap();
        assert_eq!(norm_slot.weight, Some(filled(&[512], 17.5)));
        let bn = reloaded.iter().find(|s| s.name == "bn1_1").unwrap();
        assert_eq!(bn.weight, Some(filled(&[64], 1.0)));
    }
}
