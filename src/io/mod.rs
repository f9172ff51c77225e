// Purpose - external inputs: unit discovery, sample data, byte conversion

pub mod converter;
pub mod registry;
pub mod samples;

pub use registry::{UnitDescriptor, UnitRegistry};
pub use samples::{SampleId, SampleStore};
