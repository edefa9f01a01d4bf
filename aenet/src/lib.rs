//! Glue between files on disk and the models of the `ml` crate:
//! reading images and arrays, turning model output back into images and
//! picking the right weight loader.

use image::{imageops::FilterType, DynamicImage, GenericImageView, GrayImage};
use log::{debug, info, warn};
use ml::{
    errors::ModelError,
    models::{AutoencoderModel, ModelKind},
    weight_loader::{JsonWeightLoader, NpzWeightLoader, WeightError},
    ImagePrecision, IMAGE_SIDE,
};
use ndarray::{Array, Array2, Array4, ArrayD, Axis, IxDyn};
use ndarray_npy::{read_npy, write_npy, ReadNpyError, WriteNpyError};
use nshare::ToNdarray2;
use rand::Rng;
use std::{ffi::OsStr, path::Path, path::PathBuf};
use thiserror::Error;

pub type InputResult<T> = Result<T, InputError>;

#[derive(Error, Debug)]
pub enum InputError {
    #[error("File {0} has unrecognized type. Only .jpg, .png and .npy are supported.")]
    UnsupportedImage(PathBuf),
    #[error("Weight file {0} has unrecognized type. Only .npz and .json are supported.")]
    UnsupportedWeights(PathBuf),
    #[error("Batch of {0} images can't be written to a single image, use an .npy output instead.")]
    AmbiguousOutput(usize),
    #[error("Image could not be read or written:\n {0}.")]
    Image(#[from] image::ImageError),
    #[error("Array could not be read:\n {0}.")]
    Npy(#[from] ReadNpyError),
    #[error("Array could not be written:\n {0}.")]
    NpyWrite(#[from] WriteNpyError),
    #[error(transparent)]
    Weight(#[from] WeightError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Returns the image as grayscale array of shape (28, 28) with values in [0, 1].
/// Images of other sizes are resized first.
pub fn image_to_ndarray(img: &DynamicImage) -> Array2<ImagePrecision> {
    let side = IMAGE_SIDE as u32;
    let gray = if img.width() != side || img.height() != side {
        debug!(
            "resizing image from {}x{} to {}x{}",
            img.width(),
            img.height(),
            side,
            side
        );
        img.resize_exact(side, side, FilterType::Triangle).to_luma8()
    } else {
        img.to_luma8()
    };
    gray.into_ndarray2().mapv(|x| x as ImagePrecision / 255.0)
}

/// Turns output from neural net into a pixel value, performs postprocessing
pub fn to_pixel(x: &ImagePrecision) -> u8 {
    (x.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Turns a (height, width) array into a grayscale image.
pub fn array_to_image(arr: Array2<u8>) -> GrayImage {
    let (height, width) = arr.dim();
    // from_raw needs row major memory
    let raw = arr.as_standard_layout().iter().copied().collect();

    GrayImage::from_raw(width as u32, height as u32, raw)
        .expect("container should have the right size for the image dimensions")
}

/// Brings a single image of shape (28, 28) or (1, 28, 28) into batch layout.
/// Everything else is passed on untouched, the model checks the shape.
pub fn as_batch(arr: ArrayD<ImagePrecision>) -> ArrayD<ImagePrecision> {
    let shape = arr.shape().to_vec();
    match shape.as_slice() {
        [h, w] if *h == IMAGE_SIDE && *w == IMAGE_SIDE => {
            arr.insert_axis(Axis(0)).insert_axis(Axis(0))
        }
        [1, h, w] if *h == IMAGE_SIDE && *w == IMAGE_SIDE => arr.insert_axis(Axis(0)),
        _ => arr,
    }
}

/// Returns a preprocessed batch from the path, either an image (batch of one)
/// or an .npy array.
pub fn load_images<P: AsRef<Path>>(path: P) -> InputResult<ArrayD<ImagePrecision>> {
    let path = path.as_ref();
    match path.extension().and_then(OsStr::to_str) {
        Some("npy") => {
            let arr: ArrayD<ImagePrecision> = read_npy(path)?;
            Ok(as_batch(arr))
        }
        Some("png") | Some("jpg") | Some("jpeg") => {
            let img = image::open(path)?;
            Ok(as_batch(image_to_ndarray(&img).into_dyn()))
        }
        _ => Err(InputError::UnsupportedImage(path.to_path_buf())),
    }
}

/// Builds a model of the given kind. Parameters come from the weight file if one is
/// given (.npz or .json), else they are freshly initialized from `rng`.
pub fn load_model<R: Rng + ?Sized>(
    kind: ModelKind,
    weights: Option<&Path>,
    rng: &mut R,
) -> InputResult<Box<dyn AutoencoderModel>> {
    let path = match weights {
        Some(p) => p,
        None => {
            warn!(
                "No weights given, the {} model is randomly initialized.",
                kind
            );
            return Ok(kind.random(rng));
        }
    };

    info!("Loading {} model from {}", kind, path.display());
    let model = match path.extension().and_then(OsStr::to_str) {
        Some("npz") => kind.load(&mut NpzWeightLoader::from_path(path)?)?,
        Some("json") => kind.load(&mut JsonWeightLoader::new(path)?)?,
        _ => return Err(InputError::UnsupportedWeights(path.to_path_buf())),
    };
    Ok(model)
}

/// Converts every element of a (batch, 1, 28, 28) reconstruction into an image.
pub fn batch_to_images(batch: &Array4<ImagePrecision>) -> Vec<GrayImage> {
    batch
        .outer_iter()
        .map(|img| {
            let pixels: Array2<u8> = img.index_axis(Axis(0), 0).map(to_pixel);
            array_to_image(pixels)
        })
        .collect()
}

/// Output paths `<stem>-reconstructed.png` next to the input, with the batch index
/// appended when there is more than one image.
pub fn reconstruction_paths(input: &Path, count: usize) -> Vec<PathBuf> {
    let stem = input
        .file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or("image");
    let parent = input.parent().unwrap_or_else(|| Path::new(""));
    (0..count)
        .map(|i| {
            let name = if count == 1 {
                format!("{}-reconstructed.png", stem)
            } else {
                format!("{}-reconstructed-{}.png", stem, i)
            };
            parent.join(name)
        })
        .collect()
}

/// Where a reconstruction goes: a single .npy array or one image per batch element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Npy(PathBuf),
    Images(Vec<PathBuf>),
}

/// Picks the output for a reconstruction of `count` images of `input`.
/// An explicit .npy path takes the whole batch, any other explicit path only a single image.
/// Without an explicit path the images are written next to the input.
pub fn output_target(
    input: &Path,
    output: Option<&Path>,
    count: usize,
) -> InputResult<OutputTarget> {
    match output {
        Some(p) if p.extension().and_then(OsStr::to_str) == Some("npy") => {
            Ok(OutputTarget::Npy(p.to_path_buf()))
        }
        Some(_) if count > 1 => Err(InputError::AmbiguousOutput(count)),
        Some(p) => Ok(OutputTarget::Images(vec![p.to_path_buf()])),
        None => Ok(OutputTarget::Images(reconstruction_paths(input, count))),
    }
}

/// Writes a (batch, 1, 28, 28) reconstruction to the chosen target.
pub fn write_reconstruction(
    reconstruction: &Array4<ImagePrecision>,
    target: &OutputTarget,
) -> InputResult<()> {
    match target {
        OutputTarget::Npy(path) => {
            info!("Writing {}", path.display());
            write_npy(path, reconstruction)?;
        }
        OutputTarget::Images(paths) => {
            for (image, path) in batch_to_images(reconstruction).iter().zip(paths.iter()) {
                info!("Writing {}", path.display());
                image.save(path)?;
            }
        }
    }
    Ok(())
}

/// One CSV line per latent vector, prefixed with the source and the batch index.
pub fn latent_rows(source: &str, latent: &Array2<ImagePrecision>) -> Vec<String> {
    latent
        .outer_iter()
        .enumerate()
        .map(|(i, row)| {
            let coords: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            format!("{},{},{}", source, i, coords.join(","))
        })
        .collect()
}

/// Header matching `latent_rows` for a latent space of the given width.
pub fn latent_header(dimension: usize) -> String {
    let coords: Vec<String> = (0..dimension).map(|i| format!("z{}", i)).collect();
    format!("input,index,{}", coords.join(","))
}

/// Shape of an array as it is printed in summaries, e.g. `(784, 20)`.
pub fn format_shape(shape: &[usize]) -> String {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    format!("({})", dims.join(", "))
}

/// Zero batch of the given size, handy for smoke runs.
pub fn blank_batch(batch_size: usize) -> ArrayD<ImagePrecision> {
    Array::zeros(IxDyn(&[batch_size, 1, IMAGE_SIDE, IMAGE_SIDE]))
}
