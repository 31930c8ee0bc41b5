mod backend;
mod backends;
mod classifier;
mod result;

pub use backend::DetectorBackend;
pub use backends::{ScriptedBackend, StubBackend};
pub use classifier::{ClassifierStats, DetectionClassifier};
pub use result::{BoundingBox, ClassifiedDetection, Detection};
