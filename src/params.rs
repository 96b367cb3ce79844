//! Typed parameter registries for the cluster subsystems.
//!
//! Each subsystem (hypervisor, backend, NIC) declares a closed set of
//! parameter names with a value kind. [`validate`] checks a submitted
//! mapping against the declared schema and coerces every value to its
//! canonical JSON form (sizes normalized to whole MiB). Defaults are kept
//! separate: the registry never injects them, callers merge
//! [`defaults`]/[`hypervisor_defaults`] themselves.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subsystem {
    Hypervisor,
    Backend,
    Nic,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subsystem::Hypervisor => write!(f, "hypervisor"),
            Subsystem::Backend => write!(f, "backend"),
            Subsystem::Nic => write!(f, "nic"),
        }
    }
}

/// Value kinds a parameter may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Bool,
    /// A size in MiB; string inputs may carry a unit suffix.
    Size,
    Int,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::String => write!(f, "string"),
            ValueKind::Bool => write!(f, "bool"),
            ValueKind::Size => write!(f, "size"),
            ValueKind::Int => write!(f, "int"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParamError {
    #[error("unknown {subsystem} parameter \"{name}\"")]
    UnknownParameter { subsystem: Subsystem, name: String },
    #[error("invalid value {value} for {kind} parameter \"{name}\"")]
    InvalidValue {
        name: String,
        kind: ValueKind,
        value: Value,
    },
}

/// Supported hypervisors. The parameter namespace is shared; defaults differ
/// per hypervisor kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HypervisorKind {
    #[serde(rename = "xen-pvm")]
    XenPvm,
    #[serde(rename = "xen-hvm")]
    XenHvm,
    #[serde(rename = "kvm")]
    Kvm,
    #[serde(rename = "fake")]
    Fake,
}

impl HypervisorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HypervisorKind::XenPvm => "xen-pvm",
            HypervisorKind::XenHvm => "xen-hvm",
            HypervisorKind::Kvm => "kvm",
            HypervisorKind::Fake => "fake",
        }
    }
}

static HYPERVISOR_SCHEMA: Lazy<BTreeMap<&'static str, ValueKind>> = Lazy::new(|| {
    [
        ("boot_order", ValueKind::String),
        ("cdrom_image_path", ValueKind::String),
        ("nic_type", ValueKind::String),
        ("disk_type", ValueKind::String),
        ("vnc_bind_address", ValueKind::String),
        ("vnc_tls", ValueKind::Bool),
        ("vnc_x509_path", ValueKind::String),
        ("vnc_x509_verify", ValueKind::Bool),
        ("acpi", ValueKind::Bool),
        ("pae", ValueKind::Bool),
        ("kernel_path", ValueKind::String),
        ("kernel_args", ValueKind::String),
        ("initrd_path", ValueKind::String),
        ("root_path", ValueKind::String),
        ("serial_console", ValueKind::Bool),
        ("usb_mouse", ValueKind::String),
        ("device_model", ValueKind::String),
    ]
    .into_iter()
    .collect()
});

static BACKEND_SCHEMA: Lazy<BTreeMap<&'static str, ValueKind>> = Lazy::new(|| {
    [
        ("memory", ValueKind::Size),
        ("vcpus", ValueKind::Int),
        ("auto_balance", ValueKind::Bool),
    ]
    .into_iter()
    .collect()
});

static NIC_SCHEMA: Lazy<BTreeMap<&'static str, ValueKind>> = Lazy::new(|| {
    [("mode", ValueKind::String), ("link", ValueKind::String)]
        .into_iter()
        .collect()
});

/// The declared name → kind schema for a subsystem.
pub fn schema(subsystem: Subsystem) -> &'static BTreeMap<&'static str, ValueKind> {
    match subsystem {
        Subsystem::Hypervisor => &HYPERVISOR_SCHEMA,
        Subsystem::Backend => &BACKEND_SCHEMA,
        Subsystem::Nic => &NIC_SCHEMA,
    }
}

/// Validate a parameter mapping against a subsystem's schema, coercing each
/// value to its canonical JSON form. Pure: unknown keys and uncoercible
/// values fail, nothing is defaulted or mutated.
pub fn validate(
    subsystem: Subsystem,
    params: &BTreeMap<String, Value>,
) -> Result<BTreeMap<String, Value>, ParamError> {
    let declared = schema(subsystem);
    let mut out = BTreeMap::new();
    for (name, value) in params {
        let kind = declared
            .get(name.as_str())
            .copied()
            .ok_or_else(|| ParamError::UnknownParameter {
                subsystem,
                name: name.clone(),
            })?;
        let coerced = coerce(kind, value).ok_or_else(|| ParamError::InvalidValue {
            name: name.clone(),
            kind,
            value: value.clone(),
        })?;
        out.insert(name.clone(), coerced);
    }
    Ok(out)
}

/// Default values for the backend and NIC subsystems. Hypervisor defaults
/// depend on the hypervisor kind, see [`hypervisor_defaults`].
pub fn defaults(subsystem: Subsystem) -> BTreeMap<String, Value> {
    let entries: Vec<(&str, Value)> = match subsystem {
        Subsystem::Hypervisor => vec![],
        Subsystem::Backend => vec![
            ("memory", json!(128)),
            ("vcpus", json!(1)),
            ("auto_balance", json!(true)),
        ],
        Subsystem::Nic => vec![("mode", json!("bridged")), ("link", json!("xen-br0"))],
    };
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Per-hypervisor default parameter values, a strict subset of the
/// hypervisor schema.
pub fn hypervisor_defaults(kind: HypervisorKind) -> BTreeMap<String, Value> {
    let entries: Vec<(&str, Value)> = match kind {
        HypervisorKind::XenPvm => vec![
            ("kernel_path", json!("/boot/vmlinuz-2.6-xenU")),
            ("initrd_path", json!("")),
            ("root_path", json!("/dev/sda1")),
            ("kernel_args", json!("ro")),
        ],
        HypervisorKind::XenHvm => vec![
            ("boot_order", json!("cd")),
            ("cdrom_image_path", json!("")),
            ("nic_type", json!("rtl8139")),
            ("disk_type", json!("paravirtual")),
            ("vnc_bind_address", json!("0.0.0.0")),
            ("acpi", json!(true)),
            ("pae", json!(true)),
            ("kernel_path", json!("/usr/lib/xen/boot/hvmloader")),
            ("device_model", json!("/usr/lib/xen/bin/qemu-dm")),
        ],
        HypervisorKind::Kvm => vec![
            ("kernel_path", json!("/boot/vmlinuz-2.6-kvmU")),
            ("initrd_path", json!("")),
            ("kernel_args", json!("ro")),
            ("root_path", json!("/dev/vda1")),
            ("acpi", json!(true)),
            ("serial_console", json!(true)),
            ("vnc_bind_address", json!("")),
            ("vnc_tls", json!(false)),
            ("vnc_x509_path", json!("")),
            ("vnc_x509_verify", json!(false)),
            ("cdrom_image_path", json!("")),
            ("boot_order", json!("disk")),
            ("nic_type", json!("paravirtual")),
            ("disk_type", json!("paravirtual")),
            ("usb_mouse", json!("")),
        ],
        HypervisorKind::Fake => vec![],
    };
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn coerce(kind: ValueKind, value: &Value) -> Option<Value> {
    match kind {
        ValueKind::String => value.as_str().map(|s| json!(s)),
        ValueKind::Bool => match value {
            Value::Bool(b) => Some(json!(b)),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" => Some(json!(true)),
                "false" => Some(json!(false)),
                _ => None,
            },
            _ => None,
        },
        ValueKind::Int => match value {
            Value::Number(n) => n.as_i64().map(|i| json!(i)),
            Value::String(s) => s.trim().parse::<i64>().ok().map(|i| json!(i)),
            _ => None,
        },
        ValueKind::Size => match value {
            Value::Number(n) => n.as_u64().map(|mib| json!(mib)),
            Value::String(s) => parse_size_mib(s).map(|mib| json!(mib)),
            _ => None,
        },
    }
}

/// Parse a size string into whole MiB. A bare number is already MiB;
/// `m`/`mb`, `g`/`gb` and `t`/`tb` suffixes (any case) scale accordingly.
fn parse_size_mib(input: &str) -> Option<u64> {
    let trimmed = input.trim();
    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(digits_end);
    let value: f64 = number.parse().ok()?;
    let multiplier = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "m" | "mb" => 1.0,
        "g" | "gb" => 1024.0,
        "t" | "tb" => 1024.0 * 1024.0,
        _ => return None,
    };
    let mib = value * multiplier;
    if !mib.is_finite() || mib < 0.0 {
        return None;
    }
    Some(mib.round() as u64)
}
