use crate::{
    errors::{ModelError, ModelResult},
    models::Parameterized,
    weight_loader::WeightLoader,
    ImagePrecision, WeightPrecision,
};
use log::trace;
use ndarray::*;
use rand::{distributions::Distribution, distributions::Uniform, Rng};

/// Rust implementation of a feed forward (affine) layer, computing `x W^T + b`
/// for every row `x` of the input batch.
/// The weight matrix shall have dimension (in that order)
/// output units x input units (to comply with the order in which pytorch weights are saved).
#[derive(Debug, Clone, PartialEq)]
pub struct FeedforwardLayer {
    weights: Array2<WeightPrecision>,
    bias: Array1<WeightPrecision>,
    input_dimension: usize,
    output_dimension: usize,
}

impl FeedforwardLayer {
    pub fn new(
        weights: Array2<WeightPrecision>,
        bias: Array1<WeightPrecision>,
    ) -> ModelResult<FeedforwardLayer> {
        let output_dimension = weights.len_of(Axis(0));
        let input_dimension = weights.len_of(Axis(1));

        if bias.len() != output_dimension {
            return Err(ModelError::BiasShape {
                expected: output_dimension,
                found: bias.len(),
            });
        }

        Ok(FeedforwardLayer {
            weights,
            bias,
            input_dimension,
            output_dimension,
        })
    }

    /// Layer with freshly initialized parameters. Weights and bias are drawn
    /// from U(-1/sqrt(input_dimension), 1/sqrt(input_dimension)), which is what
    /// pytorch does for a fresh `nn.Linear`.
    pub fn random<R: Rng + ?Sized>(
        input_dimension: usize,
        output_dimension: usize,
        rng: &mut R,
    ) -> FeedforwardLayer {
        let bound = 1.0 / (input_dimension as WeightPrecision).sqrt();
        let distribution = Uniform::new(-bound, bound);

        let weights = Array2::from_shape_fn((output_dimension, input_dimension), |_| {
            distribution.sample(&mut *rng)
        });
        let bias = Array1::from_shape_fn(output_dimension, |_| distribution.sample(&mut *rng));

        FeedforwardLayer {
            weights,
            bias,
            input_dimension,
            output_dimension,
        }
    }

    /// Reads `<prefix>.weight` and `<prefix>.bias` from the loader.
    pub fn from_loader<L: WeightLoader>(
        loader: &mut L,
        prefix: &str,
        input_dimension: usize,
        output_dimension: usize,
    ) -> ModelResult<FeedforwardLayer> {
        let weights = loader.get_weight(
            &format!("{}.weight", prefix),
            (output_dimension, input_dimension),
        )?;
        let bias = loader.get_weight(&format!("{}.bias", prefix), output_dimension)?;
        FeedforwardLayer::new(weights, bias)
    }

    /// Applies the layer to a batch of shape (batch, input units).
    pub fn forward_pass<'a, V>(&self, data: V) -> ModelResult<Array2<ImagePrecision>>
    where
        V: AsArray<'a, ImagePrecision, Ix2>,
    {
        let data_arr: ArrayView2<ImagePrecision> = data.into();

        let found = data_arr.len_of(Axis(1));
        if found != self.input_dimension {
            return Err(ModelError::InputShape {
                expected: self.input_dimension,
                found,
            });
        }

        trace!(
            "affine map {} -> {} on batch of {}",
            self.input_dimension,
            self.output_dimension,
            data_arr.len_of(Axis(0))
        );
        Ok(data_arr.dot(&self.weights.t()) + &self.bias)
    }

    pub fn input_dimension(&self) -> usize {
        self.input_dimension
    }

    pub fn output_dimension(&self) -> usize {
        self.output_dimension
    }

    pub fn weights(&self) -> ArrayView2<'_, WeightPrecision> {
        self.weights.view()
    }

    pub fn bias(&self) -> ArrayView1<'_, WeightPrecision> {
        self.bias.view()
    }
}

impl Parameterized for FeedforwardLayer {
    fn parameters(&self) -> Vec<(String, ArrayViewD<'_, WeightPrecision>)> {
        vec![
            ("weight".to_string(), self.weights.view().into_dyn()),
            ("bias".to_string(), self.bias.view().into_dyn()),
        ]
    }

    fn parameters_mut(&mut self) -> Vec<(String, ArrayViewMutD<'_, WeightPrecision>)> {
        vec![
            ("weight".to_string(), self.weights.view_mut().into_dyn()),
            ("bias".to_string(), self.bias.view_mut().into_dyn()),
        ]
    }
}
