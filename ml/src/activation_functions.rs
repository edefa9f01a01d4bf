//! This module provides the elementwise activation functions for our autoencoders,
//! namely Relu and Tanh.
//!
//! All activation functions are exposed as a value of the `Activation` enum as well as a free function
use ndarray::*;

use crate::ImagePrecision;

/// Relu implementation, clamps negative values to zero.
pub fn relu<D: Dimension>(data: &Array<ImagePrecision, D>) -> Array<ImagePrecision, D> {
    data.mapv(|x| if x > 0. { x } else { 0. })
}

/// Hyperbolic tangent, maps every element into (-1, 1).
///
/// In single precision, inputs with an absolute value above roughly 9 round to exactly +-1.
pub fn tanh<D: Dimension>(data: &Array<ImagePrecision, D>) -> Array<ImagePrecision, D> {
    data.mapv(|x| x.tanh())
}

/// An elementwise activation that can be placed after a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Tanh,
}

impl Activation {
    /// Applies the activation elementwise. Refer to the free functions for more info.
    pub fn activate<D: Dimension>(
        &self,
        data: &Array<ImagePrecision, D>,
    ) -> Array<ImagePrecision, D> {
        match self {
            Activation::Relu => relu(data),
            Activation::Tanh => tanh(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relu() {
        let x = Array::from_shape_vec((1, 2, 2), vec![1., -2., 3., -4.]).unwrap();
        let out = Array::from_shape_vec((1, 2, 2), vec![1., 0., 3., 0.]).unwrap();
        assert_eq!(relu(&x), out);
        assert_eq!(Activation::Relu.activate(&x), out);
    }

    #[test]
    fn test_tanh() {
        let x: Array1<f32> = array![0., 1., -1., 100., -100.];
        let out = tanh(&x);

        assert_eq!(out[0], 0.);
        assert!((out[1] - 0.7615942).abs() < 1e-6);
        assert!((out[2] + 0.7615942).abs() < 1e-6);
        assert!(out.iter().all(|v| (-1.0..=1.0).contains(v)));
        assert_eq!(Activation::Tanh.activate(&x), out);
    }

    #[test]
    fn test_activation_keeps_shape() {
        let x: Array2<f32> = array![[-0.5, 0.0], [0.5, 2.0]];
        let relu_out = Activation::Relu.activate(&x);
        assert_eq!(relu_out, array![[0.0, 0.0], [0.5, 2.0]]);

        let tanh_out = Activation::Tanh.activate(&x);
        assert_eq!(tanh_out.dim(), (2, 2));
        assert!(tanh_out[[0, 0]] < 0.0);
        assert_eq!(tanh_out[[0, 1]], 0.0);
        assert!(tanh_out[[1, 1]] > tanh_out[[1, 0]]);
    }

    #[test]
    fn test_tanh_odd() {
        let x: Array1<f32> = Array::linspace(-3., 3., 13);
        let pos = tanh(&x);
        let neg = tanh(&x.mapv(|v| -v));
        assert_eq!(pos, neg.mapv(|v| -v));
        assert!(pos.iter().all(|v| v.abs() < 1.0));
    }
}
