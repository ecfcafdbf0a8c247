///! Input validation for provisioning requests
///! Every request is checked here before any remote call is made

use cee_common::{
    DatapathType, Error, NetworkSetupRequest, PortQos, TenantEnvironmentRequest,
    VmWithStorageRequest,
};
use regex::Regex;
use std::net::Ipv4Addr;
use std::sync::LazyLock;

/// Maximum allowed lengths for various fields
pub const MAX_NAME_LENGTH: usize = 64;
pub const MAX_DESCRIPTION_LENGTH: usize = 255;
pub const MAX_USERNAME_LENGTH: usize = 64;
pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 128;
/// Linux interface names, which OVS bridges and ports are
pub const MAX_IFACE_NAME_LENGTH: usize = 15;
pub const MAX_VOLUME_SIZE_GB: u64 = 65536;
pub const MAX_QUOTA_GB: u64 = 1_048_576;

static RESOURCE_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").unwrap()
});

static USERNAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap()
});

static IFACE_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").unwrap()
});

/// Validation result type
pub type ValidationResult<T> = Result<T, Error>;

/// Tenant, VM and volume names
pub fn validate_resource_name(kind: &str, name: &str) -> ValidationResult<()> {
    if name.is_empty() {
        return Err(Error::Validation(format!("{} name cannot be empty", kind)));
    }

    if name.len() > MAX_NAME_LENGTH {
        return Err(Error::Validation(format!(
            "{} name too long (max {} characters)",
            kind, MAX_NAME_LENGTH
        )));
    }

    if !RESOURCE_NAME_REGEX.is_match(name) || name.contains("..") {
        return Err(Error::Validation(format!(
            "{} name can only contain alphanumeric characters, '.', '-' and '_'",
            kind
        )));
    }

    Ok(())
}

/// Username validation
pub fn validate_username(username: &str) -> ValidationResult<()> {
    if username.len() < MIN_USERNAME_LENGTH {
        return Err(Error::Validation(
            format!("Username too short (minimum {} characters)", MIN_USERNAME_LENGTH)
        ));
    }

    if username.len() > MAX_USERNAME_LENGTH {
        return Err(Error::Validation(
            format!("Username too long (maximum {} characters)", MAX_USERNAME_LENGTH)
        ));
    }

    if !USERNAME_REGEX.is_match(username) {
        return Err(Error::Validation(
            "Username can only contain alphanumeric characters, hyphens, and underscores".to_string()
        ));
    }

    // Cloud-wide service accounts
    const RESERVED_USERNAMES: &[&str] = &[
        "root", "admin", "administrator", "nova", "neutron", "cinder", "glance", "keystone",
    ];

    if RESERVED_USERNAMES.contains(&username.to_lowercase().as_str()) {
        return Err(Error::Validation("This username is reserved".to_string()));
    }

    Ok(())
}

/// Password validation
pub fn validate_password(password: &str) -> ValidationResult<()> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(Error::Validation(
            format!("Password too short (minimum {} characters)", MIN_PASSWORD_LENGTH)
        ));
    }

    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(Error::Validation(
            format!("Password too long (maximum {} characters)", MAX_PASSWORD_LENGTH)
        ));
    }

    let has_uppercase = password.chars().any(|c| c.is_uppercase());
    let has_lowercase = password.chars().any(|c| c.is_lowercase());
    let has_digit = password.chars().any(|c| c.is_numeric());

    if !has_uppercase || !has_lowercase || !has_digit {
        return Err(Error::Validation(
            "Password must contain at least one uppercase letter, one lowercase letter, and one digit".to_string()
        ));
    }

    Ok(())
}

pub fn validate_description(description: &str) -> ValidationResult<()> {
    if description.len() > MAX_DESCRIPTION_LENGTH {
        return Err(Error::Validation(
            format!("Description too long (max {} characters)", MAX_DESCRIPTION_LENGTH)
        ));
    }

    if description.contains("<script") || description.contains("javascript:") {
        return Err(Error::Validation(
            "Description contains potentially malicious content".to_string()
        ));
    }

    Ok(())
}

/// IPv4 address validation
pub fn validate_ip_address(ip: &str) -> ValidationResult<Ipv4Addr> {
    ip.parse::<Ipv4Addr>()
        .map_err(|_| Error::Validation(format!("Invalid IPv4 address: '{}'", ip)))
}

/// IPv4 CIDR validation; the address must be the network address
pub fn validate_cidr(cidr: &str) -> ValidationResult<()> {
    let (addr, prefix) = cidr.split_once('/').ok_or_else(|| {
        Error::Validation("Invalid CIDR notation (expected: IP/PREFIX)".to_string())
    })?;

    let addr = validate_ip_address(addr)?;

    let prefix: u32 = prefix.parse().map_err(|_| {
        Error::Validation("Invalid CIDR prefix".to_string())
    })?;

    if prefix > 32 {
        return Err(Error::Validation(
            "CIDR prefix must be between 0 and 32".to_string()
        ));
    }

    let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
    if u32::from(addr) & !mask != 0 {
        return Err(Error::Validation(format!(
            "CIDR '{}' has host bits set",
            cidr
        )));
    }

    Ok(())
}

/// OVS bridge and port names
pub fn validate_iface_name(name: &str) -> ValidationResult<()> {
    if name.is_empty() || name.len() > MAX_IFACE_NAME_LENGTH {
        return Err(Error::Validation(format!(
            "Interface name '{}' must be 1-{} characters",
            name, MAX_IFACE_NAME_LENGTH
        )));
    }

    if !IFACE_NAME_REGEX.is_match(name) {
        return Err(Error::Validation(format!(
            "Interface name '{}' contains invalid characters",
            name
        )));
    }

    Ok(())
}

pub fn validate_volume_size(size_gb: u64) -> ValidationResult<()> {
    if size_gb == 0 || size_gb > MAX_VOLUME_SIZE_GB {
        return Err(Error::Validation(format!(
            "Volume size must be between 1 and {} GB",
            MAX_VOLUME_SIZE_GB
        )));
    }

    Ok(())
}

pub fn validate_storage_quota(quota_gb: u64) -> ValidationResult<()> {
    if quota_gb == 0 || quota_gb > MAX_QUOTA_GB {
        return Err(Error::Validation(format!(
            "storage_quota_gb must be between 1 and {}",
            MAX_QUOTA_GB
        )));
    }

    Ok(())
}

fn validate_port_qos(qos: &PortQos) -> ValidationResult<()> {
    validate_iface_name(&qos.port)?;

    if qos.limits.max_kbps == 0 {
        return Err(Error::Validation(format!(
            "QoS rate for port '{}' must be positive",
            qos.port
        )));
    }

    Ok(())
}

pub fn validate_tenant_request(request: &TenantEnvironmentRequest) -> ValidationResult<()> {
    validate_resource_name("Tenant", &request.tenant_name)?;
    validate_description(&request.description)?;
    validate_username(&request.admin_user)?;
    validate_password(&request.admin_password)?;
    validate_cidr(&request.network_cidr)?;
    validate_storage_quota(request.storage_quota_gb)
}

pub fn validate_vm_request(request: &VmWithStorageRequest) -> ValidationResult<()> {
    validate_resource_name("VM", &request.name)?;

    if request.image.trim().is_empty() || request.flavor.trim().is_empty() {
        return Err(Error::Validation("Image and flavor are required".to_string()));
    }
    if request.volume_type.trim().is_empty() {
        return Err(Error::Validation("Volume type cannot be empty".to_string()));
    }

    validate_volume_size(request.volume_size_gb)?;

    if let Some(node) = &request.attach_node {
        if node.trim().is_empty() {
            return Err(Error::Validation("Attach node cannot be empty".to_string()));
        }
    }

    if let Some(qos) = &request.qos {
        validate_port_qos(qos)?;
    }

    Ok(())
}

pub fn validate_network_request(request: &NetworkSetupRequest) -> ValidationResult<()> {
    validate_iface_name(&request.bridge_name)?;

    if let Some(iface) = &request.physical_iface {
        validate_iface_name(iface)?;
    }

    // CEE runs OVS on the kernel datapath only
    if request.datapath_type != DatapathType::System {
        return Err(Error::Validation(
            "Only the 'system' datapath is supported (no DPDK acceleration)".to_string()
        ));
    }

    let local = validate_ip_address(&request.local_ip)?;

    let mut seen = std::collections::HashSet::new();
    for remote in &request.remote_ips {
        let remote_addr = validate_ip_address(remote)?;
        if remote_addr == local {
            return Err(Error::Validation(format!(
                "Tunnel remote {} is the local endpoint",
                remote
            )));
        }
        if !seen.insert(remote_addr) {
            return Err(Error::Validation(format!("Duplicate tunnel remote {}", remote)));
        }
    }

    let mut ports = std::collections::HashSet::new();
    for qos in &request.qos {
        validate_port_qos(qos)?;
        if !ports.insert(qos.port.as_str()) {
            return Err(Error::Validation(format!("Duplicate QoS port {}", qos.port)));
        }
    }

    Ok(())
}
