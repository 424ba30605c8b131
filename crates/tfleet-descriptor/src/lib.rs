pub mod classify;
pub mod raw;

pub use classify::{classify, ClassificationError};
pub use raw::{parse, RawDescriptor, RawValue};
