//! Direct link entities.

pub mod model;

pub use model::DirectLink;
