//! The pool's view of resource lifecycle.

use async_trait::async_trait;

use crate::error::Result;
use crate::resource::PoolResource;

/// Creates, validates, and destroys pooled resources.
///
/// The pool never touches the payload itself; everything page-specific
/// happens behind this trait, which keeps the pool testable without a
/// browser.
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    type Payload: Send + Sync + 'static;

    /// Produce a ready-to-render resource, initial work count included.
    async fn create(&self) -> Result<PoolResource<Self::Payload>>;

    /// Health-check a resource on acquire. Must increment the work counter;
    /// returns false when the resource is past its work limit or its page
    /// is gone, in which case the pool destroys it.
    async fn validate(&self, resource: &mut PoolResource<Self::Payload>) -> bool;

    /// Tear the resource down. Failures are logged by implementations,
    /// never surfaced.
    async fn destroy(&self, resource: PoolResource<Self::Payload>);
}
