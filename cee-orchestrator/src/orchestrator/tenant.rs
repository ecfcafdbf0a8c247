//! Tenant environment workflow

use super::workflow::{StepSpec, WorkflowRun};
use super::{CancelToken, Orchestrator};
use crate::clients::SecurityGroupSpec;
use crate::validation::validate_tenant_request;
use cee_common::{Plane, ProvisioningResult, Result, TenantEnvironmentRequest};
use std::collections::HashMap;
use tracing::info;

pub mod steps {
    pub const WORKFLOW: &str = "tenant_environment";
    pub const CREATE_PROJECT: &str = "create-project";
    pub const CREATE_USER: &str = "create-user";
    pub const ASSIGN_ROLE: &str = "assign-role";
    pub const SET_QUOTA: &str = "set-quota";
    pub const CREATE_NETWORK: &str = "create-network";
    pub const CREATE_SUBNET: &str = "create-subnet";
    pub const CREATE_ROUTER: &str = "create-router";
    pub const ADD_ROUTER_INTERFACE: &str = "add-router-interface";

    pub fn create_security_group(name: &str) -> String {
        format!("create-security-group:{}", name)
    }
}

use steps::*;

/// Block-storage quota key
const STORAGE_QUOTA_KEY: &str = "gigabytes";

impl Orchestrator {
    /// project → user → role → quota (optional) → network → subnet, then
    /// the optional router with its subnet interface and the baseline
    /// security groups
    pub async fn create_tenant_environment(
        &self,
        request: &TenantEnvironmentRequest,
    ) -> Result<ProvisioningResult> {
        self.create_tenant_environment_with_cancel(request, &CancelToken::new())
            .await
    }

    pub async fn create_tenant_environment_with_cancel(
        &self,
        request: &TenantEnvironmentRequest,
        cancel: &CancelToken,
    ) -> Result<ProvisioningResult> {
        validate_tenant_request(request)?;

        info!(tenant = %request.tenant_name, cidr = %request.network_cidr, "Creating tenant environment");

        let mut run = WorkflowRun::start(WORKFLOW, &self.settings, cancel);
        let timeout = self.settings.control_call_timeout;
        let compute = &self.compute;

        let project_id = run
            .execute(StepSpec::required(CREATE_PROJECT, Plane::Compute), timeout, || {
                compute.create_project(&request.tenant_name, &request.description)
            })
            .await;
        let project = project_id.as_deref();

        let user_id = run
            .execute_with(
                StepSpec::required(CREATE_USER, Plane::Compute).after(&[CREATE_PROJECT]),
                project,
                timeout,
                |project_id| {
                    compute.create_user(&request.admin_user, &request.admin_password, project_id)
                },
            )
            .await;

        let role = self.settings.member_role.as_str();
        run.execute_with(
            StepSpec::required(ASSIGN_ROLE, Plane::Compute).after(&[CREATE_PROJECT, CREATE_USER]),
            project.zip(user_id.as_deref()),
            timeout,
            |(project_id, user_id)| compute.assign_role(user_id, project_id, role),
        )
        .await;

        // Without it the tenant still works on default quotas
        let quotas = HashMap::from([(STORAGE_QUOTA_KEY.to_string(), request.storage_quota_gb)]);
        run.execute_with(
            StepSpec::optional(SET_QUOTA, Plane::Compute).after(&[CREATE_PROJECT]),
            project,
            timeout,
            |project_id| compute.set_quota(project_id, &quotas),
        )
        .await;

        let network_name = format!("{}-network", request.tenant_name);
        let network_id = run
            .execute_with(
                StepSpec::required(CREATE_NETWORK, Plane::Compute).after(&[CREATE_PROJECT]),
                project,
                timeout,
                |project_id| compute.create_network(project_id, &network_name, &request.network_cidr),
            )
            .await;

        let subnet_id = run
            .execute_with(
                StepSpec::required(CREATE_SUBNET, Plane::Compute)
                    .after(&[CREATE_PROJECT, CREATE_NETWORK]),
                project.zip(network_id.as_deref()),
                timeout,
                |(project_id, network_id)| {
                    compute.create_subnet(project_id, network_id, &request.network_cidr)
                },
            )
            .await;

        if request.create_router {
            let router_name = format!("{}-router", request.tenant_name);
            let router_id = run
                .execute_with(
                    StepSpec::optional(CREATE_ROUTER, Plane::Compute).after(&[CREATE_PROJECT]),
                    project,
                    timeout,
                    |project_id| compute.create_router(project_id, &router_name),
                )
                .await;

            run.execute_with(
                StepSpec::optional(ADD_ROUTER_INTERFACE, Plane::Compute)
                    .after(&[CREATE_ROUTER, CREATE_SUBNET]),
                router_id.as_deref().zip(subnet_id.as_deref()),
                timeout,
                |(router_id, subnet_id)| compute.add_router_interface(router_id, subnet_id),
            )
            .await;
        }

        if request.security_groups {
            for group in [SecurityGroupSpec::web(), SecurityGroupSpec::ssh()] {
                run.execute_with(
                    StepSpec::optional(create_security_group(&group.name), Plane::Compute)
                        .after(&[CREATE_PROJECT]),
                    project,
                    timeout,
                    |project_id| compute.create_security_group(project_id, &group),
                )
                .await;
            }
        }

        Ok(run.finish())
    }
}
