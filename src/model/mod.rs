//! Model module - load/run contract, device policy, and the shared resource

pub mod device;
pub mod hub;
pub mod remote;
pub mod resource;
pub mod traits;

pub use device::{AcceleratorProbe, Device, Precision, StaticProbe, SystemProbe};
pub use resource::{InferenceResource, LoadState, ModelStatus};
pub use traits::{LoadError, LoadErrorKind, LoadSpec, ModelLoader, TryOnInput, TryOnPipeline};
