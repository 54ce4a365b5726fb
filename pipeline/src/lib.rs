//! Per-request export pipeline.
//!
//! Order within one job: classify, set content, inject resources, measure,
//! rasterize, clean up. The cleanup leg runs even on error, so a returned
//! worker is always pristine (or retired).

mod exporter;
mod resources;

pub use exporter::Exporter;
pub use resources::InjectedResources;
