mod error;
mod layer;

pub(crate) use layer::AuthLayer;
