use test_case::test_case;

use crate::{DeviceKind, DeviceInfo, DeviceSpec};

#[test_case("host", DeviceSpec::Host)]
#[test_case("CPU", DeviceSpec::Host)]
#[test_case("opencl", DeviceSpec::OpenCl { platform: 0, device: 0 })]
#[test_case("OpenCL:1", DeviceSpec::OpenCl { platform: 1, device: 0 })]
#[test_case("cl:2:3", DeviceSpec::OpenCl { platform: 2, device: 3 })]
fn test_parse_device_spec(input: &str, expected: DeviceSpec) {
    assert_eq!(DeviceSpec::parse(input).unwrap(), expected);
}

#[test_case("cuda")]
#[test_case("host:1")]
#[test_case("opencl:x")]
#[test_case("opencl:0:0:0")]
fn test_parse_invalid_device_spec(input: &str) {
    assert!(DeviceSpec::parse(input).is_err());
}

#[test]
fn test_spec_display_round_trip() {
    let spec = DeviceSpec::OpenCl { platform: 1, device: 2 };
    assert_eq!(spec.to_string().parse::<DeviceSpec>().unwrap(), spec);
    assert_eq!(DeviceSpec::Host.base_type(), "HOST");
}

#[test]
fn test_identity_includes_platform_and_driver() {
    let info = DeviceInfo {
        name: "gfx1100".into(),
        vendor: "AMD".into(),
        platform: "rocm".into(),
        driver_version: "3581.0".into(),
        kind: DeviceKind::Gpu,
        max_work_group_size: 1024,
        compute_units: 48,
        local_mem_size: 65536,
        subgroup_size: Some(32),
        subgroup_shuffle: true,
        supports_fp64: true,
    };
    assert_eq!(info.identity(), "rocm/gfx1100/3581.0");
    assert!(!info.is_cpu());
}
