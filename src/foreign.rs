use burn::tensor::TensorData;

use crate::error::ImportError;
use crate::t7::{T7Object, T7Value};

/// Capability view of one layer of a foreign serialized model.
///
/// The alignment algorithm only ever asks three questions of a foreign
/// layer: what is it called, does it have a weight, does it have a bias.
/// Keeping that behind a trait means any concrete legacy-format reader can
/// feed the importer without touching the algorithm.
pub trait ForeignLayer {
    fn type_name(&self) -> &str;
    fn weight(&self) -> Option<&TensorData>;
    fn bias(&self) -> Option<&TensorData>;

    fn has_weight(&self) -> bool {
        self.weight().is_some()
    }
}

/// One decoded foreign layer with its parameters pulled out eagerly.
#[derive(Debug, Clone)]
pub struct ForeignModule {
    type_name: String,
    weight: Option<TensorData>,
    bias: Option<TensorData>,
}

impl ForeignModule {
    pub fn new(
        type_name: impl Into<String>,
        weight: Option<TensorData>,
        bias: Option<TensorData>,
    ) -> Self {
        ForeignModule {
            type_name: type_name.into(),
            weight,
            bias,
        }
    }
}

impl ForeignLayer for ForeignModule {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn weight(&self) -> Option<&TensorData> {
        self.weight.as_ref()
    }

    fn bias(&self) -> Option<&TensorData> {
        self.bias.as_ref()
    }
}

/// The ordered layer list of a foreign serialized model.
#[derive(Debug, Default)]
pub struct ForeignModel {
    layers: Vec<ForeignModule>,
}

impl ForeignModel {
    /// Adapts a decoded legacy root object.
    ///
    /// The root must be a container carrying a `modules` list. Nested
    /// containers are flattened depth-first, so a flat container walks
    /// exactly like a flat legacy module list.
    pub fn from_value(root: &T7Value) -> Result<Self, ImportError> {
        let T7Value::Object(object) = root else {
            return Err(ImportError::NotAModuleList(format!(
                "root is {}",
                root.kind_name()
            )));
        };

        if object.get("modules").is_none() {
            return Err(ImportError::NotAModuleList(format!(
                "`{}` has no modules list",
                object.class
            )));
        }

        let mut layers = Vec::new();
        collect_layers(object, &mut layers)?;
        Ok(ForeignModel { layers })
    }

    pub fn layers(&self) -> &[ForeignModule] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

fn collect_layers(object: &T7Object, out: &mut Vec<ForeignModule>) -> Result<(), ImportError> {
    let Some(T7Value::Table(modules)) = object.get("modules") else {
        out.push(ForeignModule {
            type_name: object.class.clone(),
            weight: tensor_field(object, "weight")?,
            bias: tensor_field(object, "bias")?,
        });
        return Ok(());
    };

    for entry in modules.array() {
        if let T7Value::Object(child) = entry {
            collect_layers(child, out)?;
        }
    }
    Ok(())
}

fn tensor_field(object: &T7Object, name: &str) -> Result<Option<TensorData>, ImportError> {
    match object.get(name) {
        Some(T7Value::Tensor(tensor)) => Ok(Some(tensor.to_data()?)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::t7::{T7Reader, wire::Encoder};
    use std::io::Cursor;

    fn sequential(e: &mut Encoder, children: impl FnOnce(&mut Encoder)) {
        e.torch("nn.Sequential");
        e.table(1);
        e.string("modules");
        children(e);
    }

    fn conv(e: &mut Encoder, out_channels: usize) {
        e.torch("nn.SpatialConvolution");
        e.table(2);
        e.string("weight");
        let weight: Vec<f32> = (0..out_channels * 2).map(|v| v as f32).collect();
        e.float_tensor(&[out_channels, 2], &weight);
        e.string("bias");
        let bias: Vec<f32> = vec![0.5; out_channels];
        e.float_tensor(&[out_channels], &bias);
    }

    fn relu(e: &mut Encoder) {
        e.torch("nn.ReLU");
        e.table(0);
    }

    fn decode_model(buf: Vec<u8>) -> ForeignModel {
        let root = T7Reader::new(Cursor::new(buf)).read_value().unwrap();
        ForeignModel::from_value(&root).unwrap()
    }

    #[test]
    fn flat_container_keeps_stream_order() {
        let mut e = Encoder::new();
        sequential(&mut e, |e| {
            e.table(3);
            e.number(1.0);
            conv(e, 4);
            e.number(2.0);
            relu(e);
            e.number(3.0);
            conv(e, 8);
        });

        let model = decode_model(e.buf);
        assert_eq!(model.len(), 3);

        let layers = model.layers();
        assert_eq!(layers[0].type_name(), "nn.SpatialConvolution");
        assert!(layers[0].has_weight());
        assert_eq!(layers[0].weight().unwrap().shape, vec![4, 2]);
        assert_eq!(layers[0].bias().unwrap().shape, vec![4]);

        assert_eq!(layers[1].type_name(), "nn.ReLU");
        assert!(!layers[1].has_weight());
        assert!(layers[1].bias().is_none());

        assert_eq!(layers[2].weight().unwrap().shape, vec![8, 2]);
    }

    #[test]
    fn nested_containers_flatten_depth_first() {
        let mut e = Encoder::new();
        sequential(&mut e, |e| {
            e.table(2);
            e.number(1.0);
            conv(e, 4);
            e.number(2.0);
            sequential(e, |e| {
                e.table(2);
                e.number(1.0);
                relu(e);
                e.number(2.0);
                conv(e, 8);
            });
        });

        let model = decode_model(e.buf);
        let names: Vec<_> = model.layers().iter().map(|l| l.type_name()).collect();
        assert_eq!(
            names,
            ["nn.SpatialConvolution", "nn.ReLU", "nn.SpatialConvolution"]
        );
        assert_eq!(model.layers()[2].weight().unwrap().shape, vec![8, 2]);
    }

    #[test]
    fn a_bare_layer_is_not_a_module_list() {
        let mut e = Encoder::new();
        conv(&mut e, 4);
        let root = T7Reader::new(Cursor::new(e.buf)).read_value().unwrap();
        let err = ForeignModel::from_value(&root).unwrap_err();
        assert!(matches!(err, ImportError::NotAModuleList(_)));
    }

    #[test]
    fn a_tensor_root_is_not_a_module_list() {
        let mut e = Encoder::new();
        e.float_tensor(&[2], &[1.0, 2.0]);
        let root = T7Reader::new(Cursor::new(e.buf)).read_value().unwrap();
        let err = ForeignModel::from_value(&root).unwrap_err();
        assert!(matches!(err, ImportError::NotAModuleList(_)));
    }
}
