//! Named access to the classifier's tensors
//!
//! Walks the classifier layer by layer and names every tensor with a dotted
//! path (`backbone.blocks.3.depthwise.bn.running_var`, `head.weight`). The
//! same walk is used to write tensors back into a freshly built model.

use std::collections::HashMap;

use burn::{
    module::{Param, RunningState},
    nn::{conv::Conv2d, BatchNorm, Linear},
    tensor::{backend::Backend, Tensor, TensorData},
};

use crate::model::efficientnet::{ConvBn, MbConvBlock};
use crate::model::ImageClassifier;
use crate::utils::error::{ClassifierError, Result};

/// A float tensor with its dotted name
#[derive(Debug, Clone, PartialEq)]
pub struct NamedTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

fn read<B: Backend, const D: usize>(name: String, tensor: Tensor<B, D>) -> Result<NamedTensor> {
    let shape = tensor.dims().to_vec();
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| ClassifierError::Export(format!("cannot read '{}': {:?}", name, e)))?;
    Ok(NamedTensor {
        name,
        shape,
        values,
    })
}

/// Collects tensors in a fixed order
struct Collector {
    tensors: Vec<NamedTensor>,
}

impl Collector {
    fn conv<B: Backend>(&mut self, prefix: &str, conv: &Conv2d<B>) -> Result<()> {
        self.tensors
            .push(read(format!("{}.weight", prefix), conv.weight.val())?);
        if let Some(bias) = &conv.bias {
            self.tensors.push(read(format!("{}.bias", prefix), bias.val())?);
        }
        Ok(())
    }

    fn batch_norm<B: Backend>(&mut self, prefix: &str, bn: &BatchNorm<B>) -> Result<()> {
        self.tensors.push(read(format!("{}.gamma", prefix), bn.gamma.val())?);
        self.tensors.push(read(format!("{}.beta", prefix), bn.beta.val())?);
        self.tensors.push(read(
            format!("{}.running_mean", prefix),
            bn.running_mean.value(),
        )?);
        self.tensors.push(read(
            format!("{}.running_var", prefix),
            bn.running_var.value(),
        )?);
        Ok(())
    }

    fn conv_bn<B: Backend>(&mut self, prefix: &str, layer: &ConvBn<B>) -> Result<()> {
        self.conv(&format!("{}.conv", prefix), &layer.conv)?;
        self.batch_norm(&format!("{}.bn", prefix), &layer.bn)
    }

    fn linear<B: Backend>(&mut self, prefix: &str, linear: &Linear<B>) -> Result<()> {
        self.tensors
            .push(read(format!("{}.weight", prefix), linear.weight.val())?);
        if let Some(bias) = &linear.bias {
            self.tensors
                .push(read(format!("{}.bias", prefix), bias.val())?);
        }
        Ok(())
    }
}

/// Every tensor of `model`, in a stable order
pub fn collect_tensors<B: Backend>(model: &ImageClassifier<B>) -> Result<Vec<NamedTensor>> {
    let mut collector = Collector {
        tensors: Vec::new(),
    };

    collector.conv_bn("backbone.stem", &model.backbone.stem)?;
    for (i, block) in model.backbone.blocks.iter().enumerate() {
        let prefix = format!("backbone.blocks.{}", i);
        if let Some(expand) = &block.expand {
            collector.conv_bn(&format!("{}.expand", prefix), expand)?;
        }
        collector.conv_bn(&format!("{}.depthwise", prefix), &block.depthwise)?;
        collector.conv_bn(&format!("{}.project", prefix), &block.project)?;
    }
    collector.conv_bn("backbone.head", &model.backbone.head)?;
    collector.linear("head", &model.head)?;

    Ok(collector.tensors)
}

/// Supplies tensors by name, checking each against the layer it replaces
struct Source<'a, B: Backend> {
    tensors: HashMap<&'a str, &'a NamedTensor>,
    device: &'a B::Device,
}

impl<'a, B: Backend> Source<'a, B> {
    fn tensor<const D: usize>(&self, name: &str, expected: [usize; D]) -> Result<Tensor<B, D>> {
        let named = self
            .tensors
            .get(name)
            .ok_or_else(|| ClassifierError::InvalidArtifact(format!("missing tensor '{}'", name)))?;

        if named.shape.as_slice() != expected.as_slice() {
            return Err(ClassifierError::InvalidArtifact(format!(
                "tensor '{}' has shape {:?}, model expects {:?}",
                name, named.shape, expected
            )));
        }

        Ok(Tensor::from_data(
            TensorData::new(named.values.clone(), expected),
            self.device,
        ))
    }

    fn param<const D: usize>(
        &self,
        name: &str,
        current: &Param<Tensor<B, D>>,
    ) -> Result<Param<Tensor<B, D>>> {
        Ok(Param::from_tensor(self.tensor(name, current.val().dims())?))
    }

    fn conv(&self, prefix: &str, mut conv: Conv2d<B>) -> Result<Conv2d<B>> {
        conv.weight = self.param(&format!("{}.weight", prefix), &conv.weight)?;
        conv.bias = match conv.bias.take() {
            Some(bias) => Some(self.param(&format!("{}.bias", prefix), &bias)?),
            None => None,
        };
        Ok(conv)
    }

    fn batch_norm(&self, prefix: &str, mut bn: BatchNorm<B>) -> Result<BatchNorm<B>> {
        let dims = bn.gamma.val().dims();
        bn.gamma = self.param(&format!("{}.gamma", prefix), &bn.gamma)?;
        bn.beta = self.param(&format!("{}.beta", prefix), &bn.beta)?;
        let mean = self.tensor(&format!("{}.running_mean", prefix), dims)?;
        let var = self.tensor(&format!("{}.running_var", prefix), dims)?;
        bn.running_mean = RunningState::new(mean);
        bn.running_var = RunningState::new(var);
        Ok(bn)
    }

    fn conv_bn(&self, prefix: &str, layer: ConvBn<B>) -> Result<ConvBn<B>> {
        Ok(ConvBn {
            conv: self.conv(&format!("{}.conv", prefix), layer.conv)?,
            bn: self.batch_norm(&format!("{}.bn", prefix), layer.bn)?,
        })
    }

    fn linear(&self, prefix: &str, mut linear: Linear<B>) -> Result<Linear<B>> {
        linear.weight = self.param(&format!("{}.weight", prefix), &linear.weight)?;
        linear.bias = match linear.bias.take() {
            Some(bias) => Some(self.param(&format!("{}.bias", prefix), &bias)?),
            None => None,
        };
        Ok(linear)
    }
}

/// Write `tensors` into `model`, which must have the matching architecture
///
/// Every tensor the model needs must be present with the exact shape.
pub fn apply_tensors<B: Backend>(
    mut model: ImageClassifier<B>,
    tensors: &[NamedTensor],
    device: &B::Device,
) -> Result<ImageClassifier<B>> {
    let source = Source::<B> {
        tensors: tensors.iter().map(|t| (t.name.as_str(), t)).collect(),
        device,
    };

    model.backbone.stem = source.conv_bn("backbone.stem", model.backbone.stem)?;

    let blocks = std::mem::take(&mut model.backbone.blocks);
    let mut rebuilt = Vec::with_capacity(blocks.len());
    for (i, block) in blocks.into_iter().enumerate() {
        let prefix = format!("backbone.blocks.{}", i);
        let expand = match block.expand {
            Some(expand) => Some(source.conv_bn(&format!("{}.expand", prefix), expand)?),
            None => None,
        };
        rebuilt.push(MbConvBlock {
            expand,
            depthwise: source.conv_bn(&format!("{}.depthwise", prefix), block.depthwise)?,
            project: source.conv_bn(&format!("{}.project", prefix), block.project)?,
        });
    }
    model.backbone.blocks = rebuilt;

    model.backbone.head = source.conv_bn("backbone.head", model.backbone.head)?;
    model.head = source.linear("head", model.head)?;

    Ok(model)
}
