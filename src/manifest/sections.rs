// src/manifest/sections.rs

//! Handlers for the non-content manifest sections
//!
//! Each handler receives its section (or an empty mapping when the manifest
//! leaves it out) and writes build variables. Apart from `image`, which
//! checks partition sizes, they are plain key translations.

use serde_json::{Map, Value};

use super::ManifestError;
use super::contents::ContentCompiler;
use super::extra_include::ExtraIncludeGenerator;
use super::variables::BuildVariables;
use crate::size::ByteSize;

/// `qm`: enables the QM partition and compiles its content
pub fn handle_qm(
    qm: &Map<String, Value>,
    compiler: &ContentCompiler<'_>,
    extra_include: &mut ExtraIncludeGenerator,
    defines: &mut BuildVariables,
) -> Result<(), ManifestError> {
    defines.set("use_qm", true);

    if let Some(content) = qm.get("content").and_then(Value::as_object) {
        compiler.compile(content, extra_include, defines)?;
    }

    let memory_limit = section(qm, "memory_limit");
    defines.set_from("qm_memory_max", &memory_limit, "max", None);
    defines.set_from("qm_memory_high", &memory_limit, "high", None);
    defines.set_from("qm_cpu_weight", qm, "cpu_weight", None);
    defines.set_from("boot_check_qm_digest", qm, "container_checksum", None);
    Ok(())
}

/// `network`: static IP configuration
pub fn handle_network(network: &Map<String, Value>, defines: &mut BuildVariables) {
    let static_ip = section(network, "static");
    if static_ip.is_empty() {
        return;
    }

    defines.set("use_static_ip", true);
    defines.set_from("static_ip", &static_ip, "ip", None);
    if let Some(prefixlen) = static_ip.get("ip_prefixlen").filter(|v| !v.is_null()) {
        let prefixlen = match prefixlen {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        defines.set("static_ip_prefixlen", prefixlen);
    }
    defines.set_from("static_gw", &static_ip, "gateway", None);
    defines.set_from("static_dns", &static_ip, "dns", None);
    defines.set_from("static_ip_iface", &static_ip, "iface", None);
    if let Some(module) = static_ip.get("load_module") {
        defines.set("static_ip_modules", Value::Array(vec![module.clone()]));
    }
}

/// `auth`: passwords, keys, sshd settings, users and groups
pub fn handle_auth(auth: &Map<String, Value>, defines: &mut BuildVariables) {
    // An unset root password disables the account
    defines.set_from("root_password", auth, "root_password", Some(Value::from("")));
    defines.set_from("root_ssh_keys", auth, "root_ssh_keys", None);
    defines.set_from("simple_sshd_config", auth, "sshd_config", None);
    defines.set_from("simple_groups", auth, "groups", None);
    defines.set_from("simple_users", auth, "users", None);
}

pub fn handle_kernel(kernel: &Map<String, Value>, defines: &mut BuildVariables) {
    defines.set_from("kernel_package", kernel, "kernel_package", None);
    defines.set_from("kernel_version", kernel, "kernel_version", None);
    defines.set_from("kernel_loglevel", kernel, "loglevel", None);
    defines.set_from("use_debug", kernel, "debug_logging", None);
    defines.set_from("simple_kernel_opts", kernel, "cmdline", None);
    defines.set_from("denylist_modules", kernel, "remove_modules", None);
}

/// `image`: image size, partition table, hostname and SELinux settings
pub fn handle_image(image: &Map<String, Value>, defines: &mut BuildVariables) -> Result<(), ManifestError> {
    // A zero image size means "unset": no define and no partition bound
    let image_size = match image.get("image_size") {
        Some(value) => {
            let size = ByteSize::from_value(value)?;
            (size.bytes() > 0).then_some(size)
        }
        None => None,
    };
    if let Some(size) = image_size {
        defines.set("image_size", size.bytes().to_string());
    }

    for (name, part) in &section(image, "partitions") {
        let Some(part) = part.as_object() else {
            continue;
        };

        match name.as_str() {
            "var" | "var_qm" => handle_var_partition(name, part, image_size, defines)?,
            "root" => defines.set_from("rootpart_grow", part, "grow", None),
            _ => {
                if let Some(size) = part.get("size") {
                    let size = ByteSize::from_value(size)?;
                    defines.set(format!("{}part_size", name), size.sectors());
                }
            }
        }
    }

    defines.set_from("hostname", image, "hostname", None);
    defines.set_from("ostree_ref", image, "ostree_ref", None);
    defines.set_from("sealed", image, "sealed", None);
    defines.set_from("selinux_mode", image, "selinux_mode", None);
    defines.set_from("selinux_policy", image, "selinux_policy", None);

    let booleans: Vec<Value> = section(image, "selinux_booleans")
        .iter()
        .map(|(name, value)| {
            let state = if value.as_bool().unwrap_or(false) { "true" } else { "false" };
            Value::String(format!("{}={}", name, state))
        })
        .collect();
    defines.set("selinux_booleans", Value::Array(booleans));
    Ok(())
}

fn handle_var_partition(
    name: &str,
    part: &Map<String, Value>,
    image_size: Option<ByteSize>,
    defines: &mut BuildVariables,
) -> Result<(), ManifestError> {
    let (prefix, mountpoint) = if name == "var" {
        ("", "/var")
    } else {
        ("qm_", "/var/qm")
    };

    if let Some(size) = part.get("size") {
        let size = ByteSize::from_value(size)?;
        if image_size.is_some_and(|image| size >= image) {
            return Err(ManifestError::InvalidMountSize { mountpoint });
        }
        defines.set(format!("{}varpart_size", prefix), size.sectors());
    } else if let Some(relative) = part.get("relative_size") {
        // Negative fractions are passed through unchanged
        if relative.as_f64().is_some_and(|fraction| fraction >= 1.0) {
            return Err(ManifestError::InvalidMountRelSize { mountpoint });
        }
        defines.set(format!("{}varpart_relative_size", prefix), relative.clone());
    } else if part.get("external").and_then(Value::as_bool).unwrap_or(false) {
        defines.set(format!("{}varpart_size", prefix), -1);
    }

    defines.set_from(format!("{}varpart_uuid", prefix), part, "uuid", None);
    Ok(())
}

/// `experimental.internal_defines`: copied verbatim, no checks
pub fn handle_experimental(experimental: &Map<String, Value>, defines: &mut BuildVariables) {
    for (key, value) in section(experimental, "internal_defines") {
        defines.set(key, value);
    }
}

/// Sub-mapping `key` of `parent`, or an empty mapping
pub fn section(parent: &Map<String, Value>, key: &str) -> Map<String, Value> {
    parent
        .get(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}
