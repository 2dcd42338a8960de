use kiln_device::DeviceSpec;

use crate::RuntimeConfig;

#[test]
fn test_defaults() {
    let config = RuntimeConfig::default();
    assert_eq!(config.device, DeviceSpec::Host);
    assert!(config.disk_cache);
    assert!(config.cache_dir.ends_with("kiln"));
    assert_eq!(config.host_max_work_group, 256);
    assert_eq!(config.host_local_mem, 65536);
    assert!(config.cc.is_none());
    assert!(config.subgroup_size.is_none());
}

#[test]
fn test_builder_overrides() {
    let config = RuntimeConfig::builder()
        .device(DeviceSpec::OpenCl { platform: 1, device: 0 })
        .disk_cache(false)
        .cache_dir("/tmp/kiln-test")
        .cc("gcc")
        .cflags(vec!["-march=native".into()])
        .host_max_work_group(64)
        .subgroup_size(32)
        .build();

    assert_eq!(config.device.to_string(), "opencl:1:0");
    assert!(!config.disk_cache);
    assert_eq!(config.cache_dir, std::path::PathBuf::from("/tmp/kiln-test"));
    assert_eq!(config.cc.as_deref(), Some("gcc"));
    assert_eq!(config.host_max_work_group, 64);
    assert_eq!(config.subgroup_size, Some(32));
}

#[test]
fn test_host_device_follows_config() {
    let config = RuntimeConfig::builder().disk_cache(false).host_max_work_group(32).host_local_mem(1024).build();
    let info = crate::devices::host_info(&config);
    assert_eq!(info.max_work_group_size, 32);
    assert_eq!(info.local_mem_size, 1024);
    assert!(info.compute_units >= 1);
}
