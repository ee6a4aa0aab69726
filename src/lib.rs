//! Hazard Relay
//!
//! Streams browser-captured camera frames through a pretrained object
//! detector and relays bounding boxes plus hazard alerts back over the same
//! WebSocket connection.
//!
//! # Flow
//!
//! ```text
//! api (connection) -> frame (decode) -> detect (backend)
//!     -> pipeline (threshold) -> mapper + hazard -> response -> api (send)
//! ```
//!
//! # Module Structure
//!
//! - `api`: WebSocket listener and per-connection loops
//! - `config`: layered file/env configuration
//! - `frame`: data-URL and image decoding into transient RGB frames
//! - `detect`: detector backend trait, tract YOLO backend, stub backend
//! - `mapper`: source-frame to display-space box mapping
//! - `hazard`: per-connection hazard transition tracking
//! - `response`: outbound JSON message
//! - `pipeline`: one-frame glue plus per-connection context

pub mod api;
pub mod config;
pub mod detect;
pub mod frame;
pub mod hazard;
pub mod mapper;
pub mod pipeline;
pub mod response;

pub use api::{ApiConfig, StreamHandle, StreamServer};
pub use config::{BackendKind, DetectorSettings, PipelineSettings, RelayConfig};
pub use detect::{open_backend, BoundingBox, Detection, DetectorBackend, Labels, StubBackend};
pub use frame::{decode_data_url, decode_image_bytes, Frame, MAX_IMAGE_BYTES};
pub use hazard::HazardTracker;
pub use mapper::{DisplayRect, DisplaySpace};
pub use pipeline::{ConnectionContext, FramePipeline};
pub use response::{DisplayBox, FrameResponse};
