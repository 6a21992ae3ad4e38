//! SimpleID engine
//!
//! Transforms partitions to and from compact short-form IDs and
//! assigns short forms across a live document set.

pub mod generator;
pub mod transformer;

pub use generator::{IdGenerator, IdMap};
pub use transformer::IdTransformer;
