//! Dense autoencoders for 28x28 grayscale images.
//!
//! The building blocks (affine layers and elementwise activations) live in
//! `fully_connected` and `activation_functions`, the two model topologies in `models`.
//! Parameters can be read from and written to disk through `weight_loader`.
pub mod activation_functions;
pub mod errors;
pub mod fully_connected;
pub mod models;
pub mod sequential;
pub mod weight_loader;

pub type WeightPrecision = f32;
pub type ImagePrecision = f32;

/// Side length of the square input images.
pub const IMAGE_SIDE: usize = 28;
/// Number of pixels of one flattened input image.
pub const IMAGE_PIXELS: usize = IMAGE_SIDE * IMAGE_SIDE;

#[cfg(test)]
pub(crate) mod test_utils {
    use crate::ImagePrecision;
    use ndarray::{Array, Dimension};

    /// Asserts that both arrays have the same shape and agree elementwise up to `tol`.
    pub fn assert_close<D: Dimension>(
        a: &Array<ImagePrecision, D>,
        b: &Array<ImagePrecision, D>,
        tol: ImagePrecision,
    ) {
        assert_eq!(a.shape(), b.shape());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() <= tol, "{} and {} differ by more than {}", x, y, tol);
        }
    }
}
