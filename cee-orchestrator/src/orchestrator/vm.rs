//! VM-with-storage workflow

use super::workflow::{StepSpec, WorkflowRun};
use super::{CancelToken, Orchestrator};
use crate::clients::ResourceType;
use crate::validation::validate_vm_request;
use cee_common::{Plane, ProvisioningResult, Result, VmWithStorageRequest};
use tracing::{info, warn};

pub mod steps {
    pub const WORKFLOW: &str = "vm_with_storage";
    pub const CREATE_VOLUME: &str = "create-volume";
    pub const WAIT_VOLUME_AVAILABLE: &str = "wait-volume-available";
    pub const ATTACH_VOLUME: &str = "attach-volume";
    pub const CREATE_VM: &str = "create-vm";
    pub const WAIT_VM_ACTIVE: &str = "wait-vm-active";
    pub const CONFIGURE_QOS: &str = "configure-qos";
    pub const CLEANUP_VOLUME: &str = "cleanup-volume";
}

use steps::*;

const VOLUME_AVAILABLE: &str = "available";
const VOLUME_FAILURE_STATES: &[&str] = &["error", "error_deleting", "error_restoring"];
const SERVER_ACTIVE: &str = "active";
const SERVER_FAILURE_STATES: &[&str] = &["error"];

impl Orchestrator {
    /// volume → available → (attach) → VM → active → (QoS), cleaning up an
    /// orphaned volume when no VM came of it
    pub async fn create_vm_with_storage(
        &self,
        request: &VmWithStorageRequest,
    ) -> Result<ProvisioningResult> {
        self.create_vm_with_storage_with_cancel(request, &CancelToken::new())
            .await
    }

    pub async fn create_vm_with_storage_with_cancel(
        &self,
        request: &VmWithStorageRequest,
        cancel: &CancelToken,
    ) -> Result<ProvisioningResult> {
        validate_vm_request(request)?;

        info!(
            vm = %request.name,
            size_gb = request.volume_size_gb,
            volume_type = %request.volume_type,
            "Creating VM with storage"
        );

        let mut run = WorkflowRun::start(WORKFLOW, &self.settings, cancel);
        let control = self.settings.control_call_timeout;
        let storage_timeout = self.settings.storage_call_timeout;
        let (compute, storage, network) = (&self.compute, &self.storage, &self.network);

        // Boot volume, written from the image
        let volume_name = format!("{}-root-vol", request.name);
        let volume_id = run
            .execute(StepSpec::required(CREATE_VOLUME, Plane::Storage), storage_timeout, || {
                storage.create_volume(
                    &volume_name,
                    request.volume_size_gb,
                    &request.volume_type,
                    Some(&request.image),
                )
            })
            .await;
        let volume = volume_id.as_deref();

        let available = run
            .poll(
                StepSpec::required(WAIT_VOLUME_AVAILABLE, Plane::Storage).after(&[CREATE_VOLUME]),
                volume,
                VOLUME_AVAILABLE,
                VOLUME_FAILURE_STATES,
                storage_timeout,
                |id| storage.get_volume_status(id),
            )
            .await;

        if let Some(node) = request.attach_node.as_deref() {
            run.execute_with(
                StepSpec::optional(ATTACH_VOLUME, Plane::Storage).after(&[WAIT_VOLUME_AVAILABLE]),
                available.as_deref(),
                storage_timeout,
                |id| storage.attach_volume(id, node),
            )
            .await;
        }

        let vm_id = run
            .execute_with(
                StepSpec::required(CREATE_VM, Plane::Compute).after(&[WAIT_VOLUME_AVAILABLE]),
                available.as_deref(),
                control,
                |id| compute.create_vm(&request.name, &request.image, &request.flavor, Some(id)),
            )
            .await;

        run.poll(
            StepSpec::required(WAIT_VM_ACTIVE, Plane::Compute).after(&[CREATE_VM]),
            vm_id.as_deref(),
            SERVER_ACTIVE,
            SERVER_FAILURE_STATES,
            control,
            |id| compute.get_resource_status(ResourceType::Server, id),
        )
        .await;

        if let Some(qos) = request.qos.as_ref() {
            run.execute(
                StepSpec::optional(CONFIGURE_QOS, Plane::Network).after(&[WAIT_VM_ACTIVE]),
                control,
                || network.set_qos(&qos.port, &qos.limits),
            )
            .await;
        }

        // A volume without a VM is an orphan
        if volume_id.is_some() && vm_id.is_none() {
            warn!(vm = %request.name, volume = ?volume_id, "No VM was created, removing its volume");
            run.execute_with(
                StepSpec::optional(CLEANUP_VOLUME, Plane::Storage),
                volume,
                storage_timeout,
                |id| storage.delete_volume(id),
            )
            .await;
        }

        Ok(run.finish())
    }
}
