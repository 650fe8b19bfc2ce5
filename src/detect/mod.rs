mod backend;
pub mod backends;
mod labels;
mod result;
pub mod yolo;

pub use backend::DetectorBackend;
pub use backends::{open_backend, ReplayBackend};
pub use labels::LabelMap;
pub use result::{BoundingBox, Detection};
