pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

use std::sync::Arc;

use anyhow::Result;

use crate::config::{BackendKind, DetectorSettings};
use crate::detect::backend::DetectorBackend;
use crate::detect::labels::Labels;

pub use stub::{StubBackend, StubObject};

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

/// Build the shared detector described by the configuration.
pub fn open_backend(settings: &DetectorSettings) -> Result<Arc<dyn DetectorBackend>> {
    let labels = match &settings.labels_path {
        Some(path) => Labels::from_file(path)?,
        None => Labels::coco(),
    };
    let backend: Arc<dyn DetectorBackend> = match settings.backend {
        BackendKind::Stub => Arc::new(StubBackend::new().with_labels(labels)),
        #[cfg(feature = "backend-tract")]
        BackendKind::Tract => Arc::new(TractBackend::new(settings, labels)?),
        #[cfg(not(feature = "backend-tract"))]
        BackendKind::Tract => {
            return Err(anyhow::anyhow!(
                "backend 'tract' requested but the backend-tract feature is not enabled"
            ))
        }
    };
    backend.warm_up()?;
    log::info!("detector backend '{}' ready", backend.name());
    Ok(backend)
}
