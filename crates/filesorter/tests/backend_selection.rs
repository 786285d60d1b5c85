//! Backend-selection scenarios driven by environment variables and
//! injected device probes.

#![cfg(not(target_os = "macos"))]

mod common;

use common::{env_lock, write_fake_model, EnvVarGuard};
use filesorter::llm::backend::{select_gpu_layers, BackendMemoryInfo, BackendProbes, GpuLayers};
use filesorter::llm::MemoryInfo;

const GIB: u64 = 1024 * 1024 * 1024;

fn clean_env() -> Vec<EnvVarGuard> {
    vec![
        EnvVarGuard::unset("AI_FILE_SORTER_GPU_BACKEND"),
        EnvVarGuard::unset("LLAMA_ARG_DEVICE"),
        EnvVarGuard::unset("GGML_DISABLE_CUDA"),
        EnvVarGuard::unset("AI_FILE_SORTER_N_GPU_LAYERS"),
        EnvVarGuard::unset("LLAMA_CPP_N_GPU_LAYERS"),
    ]
}

#[test]
fn test_cpu_backend_is_honored_when_forced() {
    let _env = env_lock();
    let _clean = clean_env();
    let _backend = EnvVarGuard::set("AI_FILE_SORTER_GPU_BACKEND", "cpu");

    let model = write_fake_model(32, 4096);
    let layers = select_gpu_layers(model.path(), &BackendProbes::default());
    assert_eq!(layers, GpuLayers::Count(0));
}

#[test]
fn test_llama_arg_device_cpu_forces_cpu() {
    let _env = env_lock();
    let _clean = clean_env();
    let _device = EnvVarGuard::set("LLAMA_ARG_DEVICE", "cpu");

    let model = write_fake_model(32, 4096);
    let layers = select_gpu_layers(model.path(), &BackendProbes::default());
    assert_eq!(layers, GpuLayers::Count(0));
}

#[test]
fn test_non_positive_layer_override_forces_cpu() {
    let _env = env_lock();
    let _clean = clean_env();
    let _backend = EnvVarGuard::set("AI_FILE_SORTER_GPU_BACKEND", "vulkan");
    let _override = EnvVarGuard::set("AI_FILE_SORTER_N_GPU_LAYERS", "0");

    let model = write_fake_model(32, 4096);
    let probes = BackendProbes::default().with_availability(|_| true);
    assert_eq!(select_gpu_layers(model.path(), &probes), GpuLayers::Count(0));
}

#[test]
fn test_cuda_disabled_via_ggml_flag() {
    let _env = env_lock();
    let _clean = clean_env();
    let _backend = EnvVarGuard::set("AI_FILE_SORTER_GPU_BACKEND", "cuda");
    let _disable = EnvVarGuard::set("GGML_DISABLE_CUDA", "1");

    let model = write_fake_model(32, 4096);
    let probes = BackendProbes::default().with_cuda_availability(|| true);
    assert_eq!(select_gpu_layers(model.path(), &probes), GpuLayers::Count(0));
}

#[test]
fn test_auto_preference_with_cuda_disabled_forces_cpu() {
    let _env = env_lock();
    let _clean = clean_env();
    // Backend preference left unset (auto); the disable flag must win even
    // when a Vulkan device would be available.
    let _disable = EnvVarGuard::set("GGML_DISABLE_CUDA", "1");

    let model = write_fake_model(48, 8 * 1024 * 1024);
    let probes = BackendProbes::default()
        .with_availability(|_| true)
        .with_memory(|_| {
            Some(BackendMemoryInfo {
                memory: MemoryInfo {
                    total_bytes: 8 * GIB,
                    free_bytes: 8 * GIB,
                },
                is_integrated: false,
                name: "Vulkan Test GPU".to_string(),
            })
        });
    assert_eq!(select_gpu_layers(model.path(), &probes), GpuLayers::Count(0));
}

#[test]
fn test_explicit_vulkan_bypasses_cuda_disable_flag() {
    let _env = env_lock();
    let _clean = clean_env();
    let _backend = EnvVarGuard::set("AI_FILE_SORTER_GPU_BACKEND", "vulkan");
    let _disable = EnvVarGuard::set("GGML_DISABLE_CUDA", "1");

    let model = write_fake_model(48, 8 * 1024 * 1024);
    let probes = BackendProbes::default()
        .with_availability(|_| true)
        .with_memory(|_| {
            Some(BackendMemoryInfo {
                memory: MemoryInfo {
                    total_bytes: 8 * GIB,
                    free_bytes: 8 * GIB,
                },
                is_integrated: false,
                name: "Vulkan Test GPU".to_string(),
            })
        });

    match select_gpu_layers(model.path(), &probes) {
        GpuLayers::Count(layers) => {
            assert!(layers > 0);
            assert!(layers <= 48);
        }
        GpuLayers::Auto => panic!("expected a concrete layer count"),
    }
}

#[test]
fn test_vulkan_honors_explicit_override() {
    let _env = env_lock();
    let _clean = clean_env();
    let _backend = EnvVarGuard::set("AI_FILE_SORTER_GPU_BACKEND", "vulkan");
    let _override = EnvVarGuard::set("AI_FILE_SORTER_N_GPU_LAYERS", "12");

    let model = write_fake_model(48, 8 * 1024 * 1024);
    // The override wins even when memory metrics are unavailable.
    let probes = BackendProbes::default()
        .with_availability(|_| true)
        .with_memory(|_| None);
    assert_eq!(select_gpu_layers(model.path(), &probes), GpuLayers::Count(12));
}

#[test]
fn test_vulkan_derives_layers_from_memory_probe() {
    let _env = env_lock();
    let _clean = clean_env();
    let _backend = EnvVarGuard::set("AI_FILE_SORTER_GPU_BACKEND", "vulkan");

    let model = write_fake_model(48, 8 * 1024 * 1024);
    let probes = BackendProbes::default()
        .with_availability(|_| true)
        .with_memory(|_| {
            Some(BackendMemoryInfo {
                memory: MemoryInfo {
                    total_bytes: 3 * GIB,
                    free_bytes: 3 * GIB,
                },
                is_integrated: false,
                name: "Vulkan Test GPU".to_string(),
            })
        });

    match select_gpu_layers(model.path(), &probes) {
        GpuLayers::Count(layers) => {
            assert!(layers > 0);
            assert!(layers <= 48);
        }
        GpuLayers::Auto => panic!("expected a concrete layer count"),
    }
}

#[test]
fn test_vulkan_falls_back_to_cpu_without_memory_metrics() {
    let _env = env_lock();
    let _clean = clean_env();
    let _backend = EnvVarGuard::set("AI_FILE_SORTER_GPU_BACKEND", "vulkan");

    let model = write_fake_model(48, 8 * 1024 * 1024);
    let probes = BackendProbes::default()
        .with_availability(|_| true)
        .with_memory(|_| None);
    assert_eq!(select_gpu_layers(model.path(), &probes), GpuLayers::Count(0));
}

#[test]
fn test_vulkan_falls_back_to_cpu_when_unavailable() {
    let _env = env_lock();
    let _clean = clean_env();
    let _backend = EnvVarGuard::set("AI_FILE_SORTER_GPU_BACKEND", "vulkan");

    let model = write_fake_model(48, 8 * 1024 * 1024);
    let probes = BackendProbes::default().with_availability(|_| false);
    assert_eq!(select_gpu_layers(model.path(), &probes), GpuLayers::Count(0));
}

#[test]
fn test_integrated_gpu_memory_is_capped() {
    let _env = env_lock();
    let _clean = clean_env();
    let _backend = EnvVarGuard::set("AI_FILE_SORTER_GPU_BACKEND", "vulkan");

    // The integrated-device path caps usable memory at 4 GiB before
    // estimating; with a tiny model both variants saturate at the block
    // count, which proves the capped branch estimates instead of bailing.
    let model = write_fake_model(64, 1024);
    let probes = BackendProbes::default()
        .with_availability(|_| true)
        .with_memory(|_| {
            Some(BackendMemoryInfo {
                memory: MemoryInfo {
                    total_bytes: 64 * GIB,
                    free_bytes: 64 * GIB,
                },
                is_integrated: true,
                name: "iGPU".to_string(),
            })
        });

    let capped = select_gpu_layers(model.path(), &probes);
    let uncapped_probes = BackendProbes::default()
        .with_availability(|_| true)
        .with_memory(|_| {
            Some(BackendMemoryInfo {
                memory: MemoryInfo {
                    total_bytes: 64 * GIB,
                    free_bytes: 64 * GIB,
                },
                is_integrated: false,
                name: "dGPU".to_string(),
            })
        });
    let uncapped = select_gpu_layers(model.path(), &uncapped_probes);

    // Tiny model: both saturate at the block count, but neither errors.
    assert_eq!(capped, GpuLayers::Count(64));
    assert_eq!(uncapped, GpuLayers::Count(64));
}

#[test]
fn test_cuda_explicit_override_applied() {
    let _env = env_lock();
    let _clean = clean_env();
    let _backend = EnvVarGuard::set("AI_FILE_SORTER_GPU_BACKEND", "cuda");
    let _override = EnvVarGuard::set("AI_FILE_SORTER_N_GPU_LAYERS", "7");

    let model = write_fake_model(32, 4096);
    let probes = BackendProbes::default().with_cuda_availability(|| true);
    assert_eq!(select_gpu_layers(model.path(), &probes), GpuLayers::Count(7));
}

#[test]
fn test_cuda_unavailable_falls_back_to_vulkan_then_cpu() {
    let _env = env_lock();
    let _clean = clean_env();
    let _backend = EnvVarGuard::set("AI_FILE_SORTER_GPU_BACKEND", "cuda");

    let model = write_fake_model(32, 4096);
    let probes = BackendProbes::default()
        .with_cuda_availability(|| false)
        .with_availability(|_| false);
    assert_eq!(select_gpu_layers(model.path(), &probes), GpuLayers::Count(0));
}

#[test]
fn test_cuda_estimates_from_memory_probe() {
    let _env = env_lock();
    let _clean = clean_env();
    let _backend = EnvVarGuard::set("AI_FILE_SORTER_GPU_BACKEND", "cuda");

    let model = write_fake_model(48, 8 * 1024 * 1024);
    let probes = BackendProbes::default()
        .with_cuda_availability(|| true)
        .with_cuda_memory(|| {
            Some(MemoryInfo {
                total_bytes: 8 * GIB,
                free_bytes: 6 * GIB,
            })
        });

    match select_gpu_layers(model.path(), &probes) {
        GpuLayers::Count(layers) => {
            assert!(layers > 0);
            assert!(layers <= 48);
        }
        GpuLayers::Auto => panic!("expected a concrete layer count"),
    }
}
