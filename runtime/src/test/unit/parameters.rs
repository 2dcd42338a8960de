use std::time::Duration;

use crate::test::RUNTIME;
use crate::{TuneConfig, tree_fits_local_memory, tune_parameter};

#[test]
fn test_get_returns_default_until_set() {
    let info = RUNTIME.device().unwrap().info.clone();
    let params = RUNTIME.parameters();
    assert_eq!(params.get(&info, "test_params", "tpb", 128), 128);

    let previous = params.set(&info, "test_params", "tpb", 64);
    assert_eq!(previous, None);
    assert_eq!(RUNTIME.parameter(&info, "test_params", "tpb", 128), 64);
    assert_eq!(params.get(&info, "test_params", "vpt", 8), 8);

    params.restore(&info, "test_params", "tpb", previous);
    assert_eq!(params.get(&info, "test_params", "tpb", 128), 128);
}

#[test]
fn test_parameters_are_scoped_per_device() {
    let info = RUNTIME.device().unwrap().info.clone();
    let mut other = info.clone();
    other.name = "another device".into();

    RUNTIME.parameters().set(&info, "test_scoped", "wgsize", 32);
    assert_eq!(RUNTIME.parameters().get(&other, "test_scoped", "wgsize", 256), 256);
    RUNTIME.parameters().reset(&info, "test_scoped", "wgsize");
}

#[test]
fn test_tree_fits_local_memory() {
    let mut info = RUNTIME.device().unwrap().info.clone();
    info.local_mem_size = 4096;
    assert!(tree_fits_local_memory(&info, 128, 8));
    assert!(!tree_fits_local_memory(&info, 256, 8));
}

#[test]
fn test_tune_keeps_fastest_candidate() {
    let info = RUNTIME.device().unwrap().info.clone();
    let config = TuneConfig { warmup_runs: 0, timing_runs: 2 };

    let result = tune_parameter(&RUNTIME, &info, "test_tune", "vpt", &[1, 4, 16], &config, || {
        let vpt = RUNTIME.parameter(&info, "test_tune", "vpt", 0);
        // Smaller values are slower.
        std::thread::sleep(Duration::from_millis(40 / vpt as u64));
        Ok(())
    })
    .unwrap()
    .unwrap();

    assert_eq!(result.best, 16);
    assert_eq!(result.timings.len(), 3);
    assert_eq!(RUNTIME.parameter(&info, "test_tune", "vpt", 0), 16);
}

#[test]
fn test_tune_without_candidates() {
    let info = RUNTIME.device().unwrap().info.clone();
    let result = tune_parameter(&RUNTIME, &info, "test_tune_empty", "vpt", &[], &TuneConfig::default(), || Ok(()));
    assert!(result.unwrap().is_none());
}
