use ndarray::ShapeError;
use thiserror::Error;

use crate::weight_loader::WeightError;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Input has wrong shape: expected {expected} features per batch element, found {found}.")]
    InputShape { expected: usize, found: usize },
    #[error("Input needs a batch dimension with at least one element, got shape {0:?}.")]
    MissingBatch(Vec<usize>),
    #[error("Bias of length {found} does not match layer output dimension {expected}.")]
    BiasShape { expected: usize, found: usize },
    #[error("Could not load model parameters:\n {0}")]
    Weight(#[from] WeightError),
    #[error("Could not reshape data:\n {0}.")]
    Reshape(#[from] ShapeError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown model '{0}', choose one of 'linear' or 'vis'.")]
pub struct UnknownModelKind(pub String);
