//! VxSDS-backed block storage as seen through Cinder
//!
//! Volumes are provisioned through Cinder with a VxSDS volume type, so Nova
//! can boot from them and images can be written onto them. Mapping a volume
//! to an SDC, capacity and system information go to the VxSDS gateway.

use super::{ComputeClient, OpenStackClient, ResourceType, StorageClient, VxSdsClient};
use super::vxsds::backend_volume_name;
use async_trait::async_trait;
use cee_common::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub struct BlockStorageClient {
    openstack: Arc<OpenStackClient>,
    vxsds: Arc<VxSdsClient>,
}

impl BlockStorageClient {
    pub fn new(openstack: Arc<OpenStackClient>, vxsds: Arc<VxSdsClient>) -> Self {
        Self { openstack, vxsds }
    }
}

#[async_trait]
impl StorageClient for BlockStorageClient {
    async fn create_volume(
        &self,
        name: &str,
        size_gb: u64,
        volume_type: &str,
        image: Option<&str>,
    ) -> Result<String> {
        self.openstack
            .create_volume(name, size_gb, volume_type, image)
            .await
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        self.openstack.delete_volume(volume_id).await
    }

    async fn attach_volume(&self, volume_id: &str, node_id: &str) -> Result<()> {
        let backend_name = backend_volume_name(volume_id);
        let backend_id = self.vxsds.volume_id_by_name(&backend_name).await?;
        debug!(volume = %volume_id, backend = %backend_id, "Resolved VxSDS volume");
        self.vxsds.map_to_node(&backend_id, node_id).await
    }

    /// Cinder status, e.g. `creating`, `downloading`, `available`
    async fn get_volume_status(&self, volume_id: &str) -> Result<String> {
        self.openstack
            .get_resource_status(ResourceType::Volume, volume_id)
            .await
    }

    async fn get_storage_summary(&self) -> Result<Value> {
        self.vxsds.storage_summary().await
    }

    async fn get_system_info(&self) -> Result<Value> {
        self.vxsds.system_info().await
    }
}
