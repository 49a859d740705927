//! Hypervisor management boundary.
//!
//! The collector only talks to hosts through these traits: one connector that
//! opens sessions, and per-host sessions exposing the host summary and a paged
//! property query over a container view. `vsphere` is the production
//! implementation; tests plug in in-memory fakes.

pub mod vsphere;

use crate::error::HypervisorResult;
use crate::models::HostSummary;
use async_trait::async_trait;
use std::collections::HashMap;

/// Property path -> value for one managed object. Vendor boxing is already removed.
pub type PropertyBag = HashMap<String, serde_json::Value>;

/// One managed object returned by a property query.
#[derive(Debug, Clone, Default)]
pub struct ObjectContent {
    /// Managed object id, unique within the host.
    pub obj: String,
    pub props: PropertyBag,
}

/// One page of a property query. `token` is set while more pages remain.
#[derive(Debug, Clone, Default)]
pub struct PropertyPage {
    pub objects: Vec<ObjectContent>,
    pub token: Option<String>,
}

#[async_trait]
pub trait HypervisorConnector: Send + Sync {
    /// Open an authenticated session. Failures are reported, never panicked.
    async fn connect(
        &self,
        address: &str,
        username: &str,
        password: &str,
    ) -> HypervisorResult<Box<dyn HypervisorSession>>;
}

#[async_trait]
pub trait HypervisorSession: Send {
    /// CPU, memory and attached storage of the host behind this session.
    async fn host_summary(&mut self) -> HypervisorResult<HostSummary>;

    /// First page of a property query over every object of `object_type`.
    async fn retrieve_properties(
        &mut self,
        object_type: &str,
        paths: &[&str],
    ) -> HypervisorResult<PropertyPage>;

    /// Next page for a token returned by a previous page.
    async fn continue_retrieve(&mut self, token: &str) -> HypervisorResult<PropertyPage>;

    /// Release server-side handles and log out. Safe to call more than once.
    async fn disconnect(&mut self);
}
