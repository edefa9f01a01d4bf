use std::{fmt, str::FromStr};

use log::debug;
use ndarray::*;
use rand::Rng;

use crate::{
    activation_functions::Activation,
    errors::{ModelError, ModelResult, UnknownModelKind},
    fully_connected::FeedforwardLayer,
    sequential::Sequential,
    weight_loader::WeightLoader,
    ImagePrecision, WeightPrecision, IMAGE_PIXELS, IMAGE_SIDE,
};

/// Width of the bottleneck of the `LinearAutoencoder`.
pub const LINEAR_LATENT_DIMENSION: usize = 20;
/// Layer widths of the `DeepVisAutoencoder` encoder, input first.
pub const VIS_ENCODER_DIMENSIONS: [usize; 4] = [IMAGE_PIXELS, 256, 128, 3];
/// Layer widths of the `DeepVisAutoencoder` decoder, latent first.
pub const VIS_DECODER_DIMENSIONS: [usize; 4] = [3, 128, 256, IMAGE_PIXELS];

/// Anything that owns trainable parameters. Parameters are enumerated explicitly,
/// in a fixed order, under the names pytorch would put into the state dict.
pub trait Parameterized {
    fn parameters(&self) -> Vec<(String, ArrayViewD<'_, WeightPrecision>)>;

    fn parameters_mut(&mut self) -> Vec<(String, ArrayViewMutD<'_, WeightPrecision>)>;

    /// Total number of scalar parameters.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|(_, p)| p.len()).sum()
    }
}

/// General model trait for en- and decoding of batches of 28x28 images.
///
/// Implementors only provide the computation on flattened data,
/// the conversion from and to image batches is shared.
pub trait AutoencoderModel: Parameterized + Send + Sync {
    /// Width of the latent representation.
    fn latent_dimension(&self) -> usize;

    /// Maps a (batch, 784) array to its (batch, latent) representation.
    fn encode_flat(&self, input: ArrayView2<ImagePrecision>)
        -> ModelResult<Array2<ImagePrecision>>;

    /// Maps a (batch, latent) array back to (batch, 784).
    fn decode_flat(&self, latent: ArrayView2<ImagePrecision>)
        -> ModelResult<Array2<ImagePrecision>>;

    /// Encodes a batch of images. All but the first axis are flattened.
    fn encode(&self, images: ArrayViewD<ImagePrecision>) -> ModelResult<Array2<ImagePrecision>> {
        let flat = flatten_batch(images)?;
        self.encode_flat(flat.view())
    }

    /// Decodes a batch of latent vectors into images of shape (batch, 1, 28, 28).
    fn decode(&self, latent: ArrayView2<ImagePrecision>) -> ModelResult<Array4<ImagePrecision>> {
        unflatten_batch(self.decode_flat(latent)?)
    }

    /// Full encode/decode pass, returning the latent representation alongside
    /// the reconstruction.
    fn reconstruct(
        &self,
        images: ArrayViewD<ImagePrecision>,
    ) -> ModelResult<(Array4<ImagePrecision>, Array2<ImagePrecision>)> {
        let latent = self.encode(images)?;
        let reconstruction = self.decode(latent.view())?;
        Ok((reconstruction, latent))
    }
}

/// Flattens everything but the batch axis. Fails if the batch is empty or the
/// remaining axes don't hold exactly one image.
pub fn flatten_batch(images: ArrayViewD<ImagePrecision>) -> ModelResult<Array2<ImagePrecision>> {
    let shape = images.shape();
    if shape.len() < 2 || shape[0] == 0 {
        return Err(ModelError::MissingBatch(shape.to_vec()));
    }
    let batch_size = shape[0];
    let features: usize = shape[1..].iter().product();
    if features != IMAGE_PIXELS {
        return Err(ModelError::InputShape {
            expected: IMAGE_PIXELS,
            found: features,
        });
    }
    // iter() walks in logical order, so this also works for non-contiguous views
    let flat = Array::from_shape_vec((batch_size, features), images.iter().copied().collect())?;
    Ok(flat)
}

/// Inverse of `flatten_batch`, restores the (batch, 1, 28, 28) layout.
pub fn unflatten_batch(flat: Array2<ImagePrecision>) -> ModelResult<Array4<ImagePrecision>> {
    let batch_size = flat.len_of(Axis(0));
    let images = flat
        .as_standard_layout()
        .into_owned()
        .into_shape((batch_size, 1, IMAGE_SIDE, IMAGE_SIDE))?;
    Ok(images)
}

/// Autoencoder with a single linear bottleneck of width 20.
///
/// There is only one hidden layer, so no activation is applied between encoder
/// and decoder. The decoder output goes through tanh, so every reconstructed
/// value lies in (-1, 1).
#[derive(Debug, Clone, PartialEq)]
pub struct LinearAutoencoder {
    /// 784 -> 20
    encoder: FeedforwardLayer,
    /// 20 -> 784
    decoder: FeedforwardLayer,
}

impl LinearAutoencoder {
    /// Freshly initialized model, seeded from the thread rng.
    pub fn new() -> LinearAutoencoder {
        LinearAutoencoder::from_rng(&mut rand::thread_rng())
    }

    pub fn from_rng<R: Rng + ?Sized>(rng: &mut R) -> LinearAutoencoder {
        LinearAutoencoder {
            encoder: FeedforwardLayer::random(IMAGE_PIXELS, LINEAR_LATENT_DIMENSION, rng),
            decoder: FeedforwardLayer::random(LINEAR_LATENT_DIMENSION, IMAGE_PIXELS, rng),
        }
    }

    /// Loads `encoder.weight`, `encoder.bias`, `decoder.weight` and `decoder.bias`.
    pub fn from_weights<L: WeightLoader>(loader: &mut L) -> ModelResult<LinearAutoencoder> {
        debug!("loading linear autoencoder weights");
        Ok(LinearAutoencoder {
            encoder: FeedforwardLayer::from_loader(
                loader,
                "encoder",
                IMAGE_PIXELS,
                LINEAR_LATENT_DIMENSION,
            )?,
            decoder: FeedforwardLayer::from_loader(
                loader,
                "decoder",
                LINEAR_LATENT_DIMENSION,
                IMAGE_PIXELS,
            )?,
        })
    }

    /// Reconstructs a batch of shape (batch, 1, 28, 28).
    pub fn forward<S, D>(&self, input: &ArrayBase<S, D>) -> ModelResult<Array4<ImagePrecision>>
    where
        S: Data<Elem = ImagePrecision>,
        D: Dimension,
    {
        let (reconstruction, _) = self.reconstruct(input.view().into_dyn())?;
        Ok(reconstruction)
    }

    pub fn encoder(&self) -> &FeedforwardLayer {
        &self.encoder
    }

    pub fn decoder(&self) -> &FeedforwardLayer {
        &self.decoder
    }
}

impl Default for LinearAutoencoder {
    fn default() -> Self {
        LinearAutoencoder::new()
    }
}

impl Parameterized for LinearAutoencoder {
    fn parameters(&self) -> Vec<(String, ArrayViewD<'_, WeightPrecision>)> {
        prefixed("encoder", self.encoder.parameters())
            .chain(prefixed("decoder", self.decoder.parameters()))
            .collect()
    }

    fn parameters_mut(&mut self) -> Vec<(String, ArrayViewMutD<'_, WeightPrecision>)> {
        prefixed("encoder", self.encoder.parameters_mut())
            .chain(prefixed("decoder", self.decoder.parameters_mut()))
            .collect()
    }
}

impl AutoencoderModel for LinearAutoencoder {
    fn latent_dimension(&self) -> usize {
        LINEAR_LATENT_DIMENSION
    }

    fn encode_flat(
        &self,
        input: ArrayView2<ImagePrecision>,
    ) -> ModelResult<Array2<ImagePrecision>> {
        self.encoder.forward_pass(input)
    }

    fn decode_flat(
        &self,
        latent: ArrayView2<ImagePrecision>,
    ) -> ModelResult<Array2<ImagePrecision>> {
        let decoded = self.decoder.forward_pass(latent)?;
        Ok(Activation::Tanh.activate(&decoded))
    }
}

/// Deeper autoencoder with a 3 dimensional bottleneck, so the latent
/// representation can be plotted directly.
///
/// Encoder: 784 -> 256 -> 128 -> 3, decoder: 3 -> 128 -> 256 -> 784,
/// every layer followed by a relu. This includes the last decoder layer, so
/// reconstructions and latent coordinates are never negative.
#[derive(Debug, Clone, PartialEq)]
pub struct DeepVisAutoencoder {
    encoder: Sequential,
    decoder: Sequential,
}

impl DeepVisAutoencoder {
    /// Freshly initialized model, seeded from the thread rng.
    pub fn new() -> DeepVisAutoencoder {
        DeepVisAutoencoder::from_rng(&mut rand::thread_rng())
    }

    pub fn from_rng<R: Rng + ?Sized>(rng: &mut R) -> DeepVisAutoencoder {
        DeepVisAutoencoder {
            encoder: Sequential::random(&VIS_ENCODER_DIMENSIONS, Activation::Relu, rng),
            decoder: Sequential::random(&VIS_DECODER_DIMENSIONS, Activation::Relu, rng),
        }
    }

    /// Loads `encoder.{0,2,4}.{weight,bias}` and `decoder.{0,2,4}.{weight,bias}`.
    pub fn from_weights<L: WeightLoader>(loader: &mut L) -> ModelResult<DeepVisAutoencoder> {
        debug!("loading deep vis autoencoder weights");
        Ok(DeepVisAutoencoder {
            encoder: Sequential::from_loader(
                loader,
                "encoder",
                &VIS_ENCODER_DIMENSIONS,
                Activation::Relu,
            )?,
            decoder: Sequential::from_loader(
                loader,
                "decoder",
                &VIS_DECODER_DIMENSIONS,
                Activation::Relu,
            )?,
        })
    }

    /// Returns the reconstruction of shape (batch, 1, 28, 28) and the latent
    /// coordinates of shape (batch, 3).
    pub fn forward<S, D>(
        &self,
        input: &ArrayBase<S, D>,
    ) -> ModelResult<(Array4<ImagePrecision>, Array2<ImagePrecision>)>
    where
        S: Data<Elem = ImagePrecision>,
        D: Dimension,
    {
        self.reconstruct(input.view().into_dyn())
    }

    pub fn encoder(&self) -> &Sequential {
        &self.encoder
    }

    pub fn decoder(&self) -> &Sequential {
        &self.decoder
    }
}

impl Default for DeepVisAutoencoder {
    fn default() -> Self {
        DeepVisAutoencoder::new()
    }
}

impl Parameterized for DeepVisAutoencoder {
    fn parameters(&self) -> Vec<(String, ArrayViewD<'_, WeightPrecision>)> {
        prefixed("encoder", self.encoder.parameters())
            .chain(prefixed("decoder", self.decoder.parameters()))
            .collect()
    }

    fn parameters_mut(&mut self) -> Vec<(String, ArrayViewMutD<'_, WeightPrecision>)> {
        prefixed("encoder", self.encoder.parameters_mut())
            .chain(prefixed("decoder", self.decoder.parameters_mut()))
            .collect()
    }
}

impl AutoencoderModel for DeepVisAutoencoder {
    fn latent_dimension(&self) -> usize {
        VIS_ENCODER_DIMENSIONS[VIS_ENCODER_DIMENSIONS.len() - 1]
    }

    fn encode_flat(
        &self,
        input: ArrayView2<ImagePrecision>,
    ) -> ModelResult<Array2<ImagePrecision>> {
        self.encoder.forward_pass(input)
    }

    fn decode_flat(
        &self,
        latent: ArrayView2<ImagePrecision>,
    ) -> ModelResult<Array2<ImagePrecision>> {
        self.decoder.forward_pass(latent)
    }
}

/// Puts `<prefix>.` in front of every parameter name.
fn prefixed<T>(
    prefix: &'static str,
    params: Vec<(String, T)>,
) -> impl Iterator<Item = (String, T)> {
    params
        .into_iter()
        .map(move |(name, p)| (format!("{}.{}", prefix, name), p))
}

/// The available model topologies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Linear,
    DeepVis,
}

impl ModelKind {
    /// Freshly initialized model of this kind.
    pub fn random<R: Rng + ?Sized>(&self, rng: &mut R) -> Box<dyn AutoencoderModel> {
        match self {
            ModelKind::Linear => Box::new(LinearAutoencoder::from_rng(rng)),
            ModelKind::DeepVis => Box::new(DeepVisAutoencoder::from_rng(rng)),
        }
    }

    /// Model of this kind with the parameters taken from the loader.
    pub fn load<L: WeightLoader>(&self, loader: &mut L) -> ModelResult<Box<dyn AutoencoderModel>> {
        let model: Box<dyn AutoencoderModel> = match self {
            ModelKind::Linear => Box::new(LinearAutoencoder::from_weights(loader)?),
            ModelKind::DeepVis => Box::new(DeepVisAutoencoder::from_weights(loader)?),
        };
        Ok(model)
    }
}

impl FromStr for ModelKind {
    type Err = UnknownModelKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(ModelKind::Linear),
            "vis" | "deep" | "deepvis" => Ok(ModelKind::DeepVis),
            _ => Err(UnknownModelKind(s.to_string())),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Linear => write!(f, "linear"),
            ModelKind::DeepVis => write!(f, "vis"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::assert_close;
    use rand::{rngs::StdRng, SeedableRng};

    fn images(batch_size: usize, seed: u64) -> Array4<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array4::from_shape_fn((batch_size, 1, IMAGE_SIDE, IMAGE_SIDE), |_| {
            rng.gen_range(0.0..1.0)
        })
    }

    /// Batch where every element is a copy of the same image.
    fn repeated(batch_size: usize) -> Array4<f32> {
        let single = images(1, 11);
        let views = vec![single.view(); batch_size];
        concatenate(Axis(0), &views).unwrap()
    }

    #[test]
    fn test_linear_zero_input() {
        let model = LinearAutoencoder::new();
        let input = Array4::<f32>::zeros((1, 1, 28, 28));
        let out = model.forward(&input).unwrap();

        assert_eq!(out.dim(), (1, 1, 28, 28));
        assert!(out.iter().all(|x| *x > -1.0 && *x < 1.0));
    }

    #[test]
    fn test_linear_output_range() {
        let model = LinearAutoencoder::from_rng(&mut StdRng::seed_from_u64(0));
        for batch_size in &[1, 3, 8] {
            let out = model.forward(&images(*batch_size, 1)).unwrap();
            assert_eq!(out.dim(), (*batch_size, 1, 28, 28));
            assert!(out.iter().all(|x| *x > -1.0 && *x < 1.0));
        }
    }

    #[test]
    fn test_linear_has_no_hidden_activation() {
        // negative latents survive, tanh is only applied after the decoder
        let mut model = LinearAutoencoder::from_rng(&mut StdRng::seed_from_u64(0));
        for (_, mut p) in model.parameters_mut() {
            p.fill(0.0);
        }
        for (name, mut p) in model.parameters_mut() {
            if name == "encoder.bias" {
                p.fill(-2.0);
            }
        }
        let input = Array4::<f32>::zeros((2, 1, 28, 28));
        let latent = model.encode(input.view().into_dyn()).unwrap();
        assert_eq!(latent.dim(), (2, LINEAR_LATENT_DIMENSION));
        assert!(latent.iter().all(|x| *x == -2.0));
    }

    #[test]
    fn test_vis_zero_input() {
        let model = DeepVisAutoencoder::new();
        let input = Array4::<f32>::zeros((2, 1, 28, 28));
        let (reconstruction, latent) = model.forward(&input).unwrap();

        assert_eq!(latent.dim(), (2, 3));
        assert!(latent.iter().all(|x| *x >= 0.0));
        assert_eq!(reconstruction.dim(), (2, 1, 28, 28));
        assert!(reconstruction.iter().all(|x| *x >= 0.0));
    }

    #[test]
    fn test_vis_outputs_never_negative() {
        // The last decoder layer ends in a relu as well, so even an input that
        // is negative everywhere can only be reconstructed as zeros or above.
        let model = DeepVisAutoencoder::from_rng(&mut StdRng::seed_from_u64(5));
        let input = images(4, 2).mapv(|x| -x);
        let (reconstruction, latent) = model.forward(&input).unwrap();

        assert_eq!(latent.dim(), (4, 3));
        assert!(latent.iter().all(|x| *x >= 0.0));
        assert!(reconstruction.iter().all(|x| *x >= 0.0));
    }

    #[test]
    fn test_batch_invariance() {
        let linear = LinearAutoencoder::from_rng(&mut StdRng::seed_from_u64(1));
        let vis = DeepVisAutoencoder::from_rng(&mut StdRng::seed_from_u64(2));

        let input = repeated(5);
        let out = linear.forward(&input).unwrap();
        let (rec, latent) = vis.forward(&input).unwrap();

        let first = out.index_axis(Axis(0), 0).to_owned();
        let first_rec = rec.index_axis(Axis(0), 0).to_owned();
        let first_latent = latent.index_axis(Axis(0), 0).to_owned();
        for i in 1..5 {
            assert_close(&out.index_axis(Axis(0), i).to_owned(), &first, 1e-5);
            assert_close(&rec.index_axis(Axis(0), i).to_owned(), &first_rec, 1e-5);
            assert_close(&latent.index_axis(Axis(0), i).to_owned(), &first_latent, 1e-5);
        }

        // a single image gives the same result as within the batch
        let single = linear.forward(&images(1, 11)).unwrap();
        assert_close(&single.index_axis(Axis(0), 0).to_owned(), &first, 1e-5);
    }

    #[test]
    fn test_deterministic() {
        let linear = LinearAutoencoder::from_rng(&mut StdRng::seed_from_u64(3));
        let vis = DeepVisAutoencoder::from_rng(&mut StdRng::seed_from_u64(4));
        let input = images(3, 9);

        assert_eq!(linear.forward(&input).unwrap(), linear.forward(&input).unwrap());
        assert_eq!(vis.forward(&input).unwrap(), vis.forward(&input).unwrap());
    }

    #[test]
    fn test_seeded_construction_reproducible() {
        let a = DeepVisAutoencoder::from_rng(&mut StdRng::seed_from_u64(8));
        let b = DeepVisAutoencoder::from_rng(&mut StdRng::seed_from_u64(8));
        let c = DeepVisAutoencoder::from_rng(&mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let linear = LinearAutoencoder::new();
        let vis = DeepVisAutoencoder::new();

        let wrong = Array4::<f32>::zeros((2, 1, 28, 27));
        assert!(matches!(
            linear.forward(&wrong),
            Err(ModelError::InputShape {
                expected: 784,
                found: 756
            })
        ));
        assert!(matches!(
            vis.forward(&wrong),
            Err(ModelError::InputShape { .. })
        ));

        let empty = Array4::<f32>::zeros((0, 1, 28, 28));
        assert!(matches!(
            linear.forward(&empty),
            Err(ModelError::MissingBatch(_))
        ));

        let no_batch = Array1::<f32>::zeros(784);
        assert!(matches!(
            vis.forward(&no_batch),
            Err(ModelError::MissingBatch(_))
        ));
    }

    #[test]
    fn test_other_layouts_flatten_to_image() {
        // trailing axes only need to hold 784 values, like a pytorch view(batch, -1)
        let model = LinearAutoencoder::from_rng(&mut StdRng::seed_from_u64(6));
        let input = images(2, 4);
        let flat = input.clone().into_shape((2, 784)).unwrap();

        assert_eq!(model.forward(&flat).unwrap(), model.forward(&input).unwrap());
    }

    #[test]
    fn test_non_contiguous_input() {
        let model = LinearAutoencoder::from_rng(&mut StdRng::seed_from_u64(6));
        let input = images(4, 4);
        let every_other = input.slice(s![..;2, .., .., ..]);
        let expected = concatenate(
            Axis(0),
            &[input.slice(s![0..1, .., .., ..]), input.slice(s![2..3, .., .., ..])],
        )
        .unwrap();

        assert_eq!(
            model.forward(&every_other).unwrap(),
            model.forward(&expected).unwrap()
        );
    }

    #[test]
    fn test_decode_latent() {
        let model = DeepVisAutoencoder::from_rng(&mut StdRng::seed_from_u64(1));
        let latent: Array2<f32> = array![[0.0, 0.5, 1.0], [2.0, 0.0, 0.0]];
        let decoded = model.decode(latent.view()).unwrap();
        assert_eq!(decoded.dim(), (2, 1, 28, 28));

        let wrong: Array2<f32> = Array2::zeros((2, 20));
        assert!(model.decode(wrong.view()).is_err());
    }

    #[test]
    fn test_linear_parameters() {
        let model = LinearAutoencoder::new();
        let params = model.parameters();
        let described: Vec<_> = params
            .iter()
            .map(|(n, p)| (n.as_str(), p.shape().to_vec()))
            .collect();
        assert_eq!(
            described,
            vec![
                ("encoder.weight", vec![20, 784]),
                ("encoder.bias", vec![20]),
                ("decoder.weight", vec![784, 20]),
                ("decoder.bias", vec![784]),
            ]
        );
        assert_eq!(model.num_parameters(), 784 * 20 + 20 + 20 * 784 + 784);
    }

    #[test]
    fn test_vis_parameters() {
        let model = DeepVisAutoencoder::new();
        let names: Vec<_> = model.parameters().into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec![
                "encoder.0.weight",
                "encoder.0.bias",
                "encoder.2.weight",
                "encoder.2.bias",
                "encoder.4.weight",
                "encoder.4.bias",
                "decoder.0.weight",
                "decoder.0.bias",
                "decoder.2.weight",
                "decoder.2.bias",
                "decoder.4.weight",
                "decoder.4.bias",
            ]
        );
        let expected = 2 * (784 * 256 + 256 * 128 + 128 * 3) + (256 + 128 + 3) + (128 + 256 + 784);
        assert_eq!(model.num_parameters(), expected);
    }

    #[test]
    fn test_model_kind() {
        assert_eq!("linear".parse::<ModelKind>().unwrap(), ModelKind::Linear);
        assert_eq!("VIS".parse::<ModelKind>().unwrap(), ModelKind::DeepVis);
        assert_eq!(
            "conv".parse::<ModelKind>(),
            Err(UnknownModelKind("conv".to_string()))
        );
        assert_eq!(
            UnknownModelKind("conv".to_string()).to_string(),
            "Unknown model 'conv', choose one of 'linear' or 'vis'."
        );
        assert_eq!(ModelKind::DeepVis.to_string(), "vis");

        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(ModelKind::Linear.random(&mut rng).latent_dimension(), 20);
        assert_eq!(ModelKind::DeepVis.random(&mut rng).latent_dimension(), 3);
    }

    #[test]
    fn test_models_are_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LinearAutoencoder>();
        assert_send_sync::<DeepVisAutoencoder>();
    }
}
