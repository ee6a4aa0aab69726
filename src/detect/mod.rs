mod backend;
mod backends;
mod labels;
mod nms;
mod result;

pub use backend::DetectorBackend;
pub use backends::{open_backend, StubBackend, StubObject};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use labels::{Labels, COCO_LABELS};
pub use nms::non_max_suppression;
pub use result::{BoundingBox, Detection};
