//! Ordered pipelines of affine layers, each optionally followed by an activation.
use log::trace;
use ndarray::*;
use rand::Rng;

use crate::{
    activation_functions::Activation,
    errors::{ModelError, ModelResult},
    fully_connected::FeedforwardLayer,
    models::Parameterized,
    weight_loader::WeightLoader,
    ImagePrecision, WeightPrecision,
};

/// One step of a `Sequential`: an affine map and the activation applied to its output.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub layer: FeedforwardLayer,
    pub activation: Option<Activation>,
}

/// Stages are applied in order. Parameter names follow the indices a pytorch
/// `nn.Sequential` would assign, where every activation occupies its own slot
/// (so Linear, ReLU, Linear, ReLU yields `0.weight`, `0.bias`, `2.weight`, `2.bias`).
#[derive(Debug, Clone, PartialEq)]
pub struct Sequential {
    stages: Vec<Stage>,
}

impl Sequential {
    /// Checks that neighbouring stages fit together.
    pub fn new(stages: Vec<Stage>) -> ModelResult<Sequential> {
        for pair in stages.windows(2) {
            let (prev, next) = (&pair[0].layer, &pair[1].layer);
            if prev.output_dimension() != next.input_dimension() {
                return Err(ModelError::InputShape {
                    expected: next.input_dimension(),
                    found: prev.output_dimension(),
                });
            }
        }
        Ok(Sequential { stages })
    }

    /// Freshly initialized layers of the given widths, `dimensions[i] -> dimensions[i + 1]`,
    /// every one of them followed by `activation`.
    pub fn random<R: Rng + ?Sized>(
        dimensions: &[usize],
        activation: Activation,
        rng: &mut R,
    ) -> Sequential {
        let stages = dimensions
            .windows(2)
            .map(|w| Stage {
                layer: FeedforwardLayer::random(w[0], w[1], &mut *rng),
                activation: Some(activation),
            })
            .collect();
        Sequential { stages }
    }

    /// Same topology as `random`, but with the parameters taken from the loader.
    pub fn from_loader<L: WeightLoader>(
        loader: &mut L,
        prefix: &str,
        dimensions: &[usize],
        activation: Activation,
    ) -> ModelResult<Sequential> {
        let mut stages = Vec::with_capacity(dimensions.len().saturating_sub(1));
        for (i, w) in dimensions.windows(2).enumerate() {
            // every layer is followed by an activation, hence the stride of 2
            let name = format!("{}.{}", prefix, 2 * i);
            stages.push(Stage {
                layer: FeedforwardLayer::from_loader(loader, &name, w[0], w[1])?,
                activation: Some(activation),
            });
        }
        Sequential::new(stages)
    }

    pub fn forward_pass<'a, V>(&self, data: V) -> ModelResult<Array2<ImagePrecision>>
    where
        V: AsArray<'a, ImagePrecision, Ix2>,
    {
        let data_arr: ArrayView2<ImagePrecision> = data.into();
        let mut x = data_arr.to_owned();
        for (i, stage) in self.stages.iter().enumerate() {
            x = stage.layer.forward_pass(&x)?;
            if let Some(activation) = stage.activation {
                x = activation.activate(&x);
            }
            trace!("stage {} done, output shape {:?}", i, x.shape());
        }
        Ok(x)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn input_dimension(&self) -> Option<usize> {
        self.stages.first().map(|s| s.layer.input_dimension())
    }

    pub fn output_dimension(&self) -> Option<usize> {
        self.stages.last().map(|s| s.layer.output_dimension())
    }

    /// Index each stage's layer has in the equivalent pytorch container.
    fn slot_indices(&self) -> Vec<usize> {
        let mut next = 0;
        self.stages
            .iter()
            .map(|stage| {
                let slot = next;
                next += if stage.activation.is_some() { 2 } else { 1 };
                slot
            })
            .collect()
    }
}

impl Parameterized for Sequential {
    fn parameters(&self) -> Vec<(String, ArrayViewD<'_, WeightPrecision>)> {
        self.slot_indices()
            .into_iter()
            .zip(self.stages.iter())
            .flat_map(|(slot, stage)| {
                stage
                    .layer
                    .parameters()
                    .into_iter()
                    .map(move |(name, p)| (format!("{}.{}", slot, name), p))
            })
            .collect()
    }

    fn parameters_mut(&mut self) -> Vec<(String, ArrayViewMutD<'_, WeightPrecision>)> {
        let slots = self.slot_indices();
        slots
            .into_iter()
            .zip(self.stages.iter_mut())
            .flat_map(|(slot, stage)| {
                stage
                    .layer
                    .parameters_mut()
                    .into_iter()
                    .map(move |(name, p)| (format!("{}.{}", slot, name), p))
            })
            .collect()
    }
}
