//! Cross-model transformation.
//!
//! - [`wmatrix`]: trained transformation artifacts (linear map, MLP head)
//! - [`projector`]: applying a transformation to a compressed cache

pub mod projector;
pub mod wmatrix;
