//! Compute-backend selection for the local runtime.
//!
//! Decides which ggml backend the model should load on (CPU, CUDA, Vulkan,
//! or Metal on macOS) and how many transformer layers to offload to the
//! GPU. Device availability and memory metrics come from [`BackendProbes`],
//! injectable so tests can exercise every branch without real hardware.

use std::path::Path;
use std::sync::Arc;

use super::gguf;

const GPU_BACKEND_ENV: &str = "AI_FILE_SORTER_GPU_BACKEND";
const LLAMA_DEVICE_ENV: &str = "LLAMA_ARG_DEVICE";
const DISABLE_CUDA_ENV: &str = "GGML_DISABLE_CUDA";
const GPU_LAYERS_ENV: &str = "AI_FILE_SORTER_N_GPU_LAYERS";
const GPU_LAYERS_ENV_ALT: &str = "LLAMA_CPP_N_GPU_LAYERS";
const CTX_TOKENS_ENV: &str = "AI_FILE_SORTER_CTX_TOKENS";
const CTX_TOKENS_ENV_ALT: &str = "LLAMA_CPP_MAX_CONTEXT";
const LLAMA_LOGS_ENV: &str = "AI_FILE_SORTER_LLAMA_LOGS";
const LLAMA_LOGS_ENV_ALT: &str = "LLAMA_CPP_DEBUG_LOGS";

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Integrated GPUs share system RAM; cap what the estimator may plan with.
const INTEGRATED_GPU_MEMORY_CAP: u64 = 4 * GIB;

/// Requested compute backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuBackend {
    Auto,
    Cpu,
    Cuda,
    Vulkan,
}

/// How many layers to offload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuLayers {
    /// Leave the decision to llama.cpp.
    Auto,
    /// Offload exactly this many layers; `0` keeps the model on the CPU.
    Count(u32),
}

impl GpuLayers {
    pub fn count(self) -> Option<u32> {
        match self {
            GpuLayers::Auto => None,
            GpuLayers::Count(n) => Some(n),
        }
    }
}

/// Free/total device memory in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryInfo {
    pub total_bytes: u64,
    pub free_bytes: u64,
}

impl MemoryInfo {
    pub fn valid(&self) -> bool {
        self.total_bytes > 0 || self.free_bytes > 0
    }
}

/// Memory metrics for a named backend device.
#[derive(Debug, Clone, Default)]
pub struct BackendMemoryInfo {
    pub memory: MemoryInfo,
    pub is_integrated: bool,
    pub name: String,
}

type AvailabilityProbe = Arc<dyn Fn(&str) -> bool + Send + Sync>;
type MemoryProbe = Arc<dyn Fn(&str) -> Option<BackendMemoryInfo> + Send + Sync>;
type CudaAvailabilityProbe = Arc<dyn Fn() -> bool + Send + Sync>;
type CudaMemoryProbe = Arc<dyn Fn() -> Option<MemoryInfo> + Send + Sync>;

/// Injectable device probes.
///
/// Unset probes defer to the built-in detection, which reports a backend as
/// available only when the crate was compiled with the matching feature and
/// never fabricates memory metrics. Construction replaces the set/reset
/// dance of global hooks: pass a fresh `BackendProbes::default()` to go
/// back to real behavior.
#[derive(Clone, Default)]
pub struct BackendProbes {
    availability: Option<AvailabilityProbe>,
    memory: Option<MemoryProbe>,
    cuda_availability: Option<CudaAvailabilityProbe>,
    cuda_memory: Option<CudaMemoryProbe>,
}

impl BackendProbes {
    pub fn with_availability(
        mut self,
        probe: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.availability = Some(Arc::new(probe));
        self
    }

    pub fn with_memory(
        mut self,
        probe: impl Fn(&str) -> Option<BackendMemoryInfo> + Send + Sync + 'static,
    ) -> Self {
        self.memory = Some(Arc::new(probe));
        self
    }

    pub fn with_cuda_availability(
        mut self,
        probe: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        self.cuda_availability = Some(Arc::new(probe));
        self
    }

    pub fn with_cuda_memory(
        mut self,
        probe: impl Fn() -> Option<MemoryInfo> + Send + Sync + 'static,
    ) -> Self {
        self.cuda_memory = Some(Arc::new(probe));
        self
    }

    fn backend_available(&self, backend_name: &str) -> bool {
        if let Some(probe) = &self.availability {
            return probe(backend_name);
        }
        match backend_name {
            "Vulkan" => cfg!(feature = "vulkan"),
            "Metal" => cfg!(feature = "metal"),
            "CUDA" => cfg!(feature = "cuda"),
            _ => false,
        }
    }

    fn backend_memory(&self, backend_name: &str) -> Option<BackendMemoryInfo> {
        self.memory.as_ref().and_then(|probe| probe(backend_name))
    }

    fn cuda_available(&self) -> bool {
        if let Some(probe) = &self.cuda_availability {
            return probe();
        }
        cfg!(feature = "cuda")
    }

    fn cuda_memory(&self) -> Option<MemoryInfo> {
        self.cuda_memory.as_ref().and_then(|probe| probe())
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn parse_env_int(key: &str) -> Option<i64> {
    env_nonempty(key)?.trim().parse().ok()
}

/// Explicit GPU layer override, when set.
pub fn gpu_layer_override() -> Option<i64> {
    parse_env_int(GPU_LAYERS_ENV).or_else(|| parse_env_int(GPU_LAYERS_ENV_ALT))
}

/// Context size from the environment, defaulting to 2048 tokens. The
/// default accommodates whitelist and hint blocks in the prompt.
pub fn resolve_context_length() -> u32 {
    for key in [CTX_TOKENS_ENV, CTX_TOKENS_ENV_ALT] {
        if let Some(parsed) = parse_env_int(key) {
            if parsed > 0 {
                return parsed.min(i64::from(u32::MAX)) as u32;
            }
        }
    }
    2048
}

/// Whether verbose llama.cpp logging was requested.
pub fn llama_logs_enabled() -> bool {
    let value = env_nonempty(LLAMA_LOGS_ENV).or_else(|| env_nonempty(LLAMA_LOGS_ENV_ALT));
    match value {
        Some(value) => {
            let lowered = value.to_lowercase();
            !matches!(lowered.as_str(), "0" | "false" | "off" | "no")
        }
        None => false,
    }
}

/// Backend requested through `AI_FILE_SORTER_GPU_BACKEND`.
pub fn preferred_backend() -> GpuBackend {
    match env_nonempty(GPU_BACKEND_ENV).map(|v| v.to_lowercase()).as_deref() {
        Some("cpu") => GpuBackend::Cpu,
        Some("cuda") => GpuBackend::Cuda,
        Some("vulkan") => GpuBackend::Vulkan,
        _ => GpuBackend::Auto,
    }
}

#[cfg(not(target_os = "macos"))]
fn cuda_forced_off() -> bool {
    env_nonempty(DISABLE_CUDA_ENV)
        .map(|value| value != "0")
        .unwrap_or(false)
}

/// CPU is forced when either backend variable says `cpu` or the explicit
/// layer override is non-positive.
pub fn cpu_backend_requested() -> bool {
    let says_cpu = |key: &str| {
        env_nonempty(key)
            .map(|value| value.to_lowercase() == "cpu")
            .unwrap_or(false)
    };
    if says_cpu(GPU_BACKEND_ENV) || says_cpu(LLAMA_DEVICE_ENV) {
        return true;
    }
    matches!(gpu_layer_override(), Some(layers) if layers <= 0)
}

/// Layer estimate for unified-memory (Metal) devices.
///
/// Budget: reported free memory (or 60% of total when unknown) minus a
/// safety reserve of max(10% of total, 512 MiB), clamped into
/// [35%, 80%] of total; each layer costs `model_size / block_count`
/// inflated by 20% for scratch buffers.
pub fn estimate_layers_unified(
    memory: MemoryInfo,
    model_file_size: u64,
    block_count: u32,
) -> Option<u32> {
    if !memory.valid() || model_file_size == 0 || block_count == 0 {
        return None;
    }
    let total = memory.total_bytes as f64;
    if total <= 0.0 {
        return None;
    }
    let bytes_per_layer = model_file_size as f64 / f64::from(block_count);

    let mut approx_free = memory.free_bytes as f64;
    if approx_free <= 0.0 {
        approx_free = total * 0.6;
    }
    let safety_reserve = (total * 0.10).max(512.0 * MIB as f64);
    let budget = (approx_free - safety_reserve).clamp(total * 0.35, total * 0.80);
    if budget <= 0.0 || bytes_per_layer <= 0.0 {
        return None;
    }

    let estimated = (budget / (bytes_per_layer * 1.20)).floor();
    Some(estimated.clamp(1.0, f64::from(block_count)) as u32)
}

/// Layer estimate for discrete-memory (CUDA/Vulkan) devices.
///
/// Budget: free memory minus a safety reserve of max(5% of usable,
/// 192 MiB), clamped into [45% of usable, min(98% of free, 90% of usable)];
/// each layer costs `model_size / block_count` inflated by 8%.
pub fn estimate_layers_discrete(
    memory: MemoryInfo,
    model_file_size: u64,
    block_count: u32,
) -> Option<u32> {
    if !memory.valid() || model_file_size == 0 || block_count == 0 {
        return None;
    }
    let bytes_per_layer = model_file_size as f64 / f64::from(block_count);

    let mut free = memory.free_bytes as f64;
    let mut total = memory.total_bytes as f64;
    if total <= 0.0 {
        total = free;
    }
    let usable = total.max(free);
    if usable <= 0.0 {
        return None;
    }
    if free <= 0.0 {
        free = usable * 0.80;
    } else if free > usable {
        free = usable;
    }

    let safety_reserve = (usable * 0.05).max(192.0 * MIB as f64);
    let max_budget = (free * 0.98).min(usable * 0.90);
    let min_budget = usable * 0.45;
    let budget = (free - safety_reserve).clamp(min_budget, max_budget);

    let estimated = (budget / (bytes_per_layer * 1.08)).floor();
    if estimated <= 0.0 {
        return None;
    }
    Some(estimated.clamp(1.0, f64::from(block_count)) as u32)
}

fn layer_inputs(model_path: &Path) -> Option<(u64, u32)> {
    let file_size = std::fs::metadata(model_path).ok()?.len();
    let block_count = gguf::extract_block_count(model_path)?;
    if block_count == 0 {
        return None;
    }
    Some((file_size, block_count))
}

#[cfg(not(target_os = "macos"))]
fn vulkan_layers(model_path: &Path, probes: &BackendProbes) -> GpuLayers {
    if !probes.backend_available("Vulkan") {
        log::warn!("Vulkan backend unavailable; using CPU backend.");
        return GpuLayers::Count(0);
    }

    if let Some(layers) = gpu_layer_override() {
        if layers <= 0 {
            log::info!("Vulkan backend requested but layer override <= 0; using CPU instead.");
            return GpuLayers::Count(0);
        }
        log::info!("Using Vulkan backend with explicit n_gpu_layers override={}", layers);
        return GpuLayers::Count(layers as u32);
    }

    let Some(device) = probes.backend_memory("vulkan") else {
        log::warn!("Vulkan backend memory metrics unavailable; using CPU backend.");
        return GpuLayers::Count(0);
    };

    let mut memory = device.memory;
    if device.is_integrated {
        memory.free_bytes = memory.free_bytes.min(INTEGRATED_GPU_MEMORY_CAP);
        memory.total_bytes = memory.total_bytes.min(INTEGRATED_GPU_MEMORY_CAP);
        log::info!(
            "Vulkan device reported as integrated GPU; capping usable memory to {} MiB",
            INTEGRATED_GPU_MEMORY_CAP / MIB
        );
    }

    let Some((file_size, block_count)) = layer_inputs(model_path) else {
        log::warn!("Vulkan estimator could not read model metrics; leaving layer count auto.");
        return GpuLayers::Auto;
    };

    match estimate_layers_discrete(memory, file_size, block_count) {
        Some(layers) => {
            log::info!(
                "{} total {} MiB, free {} MiB -> n_gpu_layers={}",
                if device.name.is_empty() {
                    "Vulkan device"
                } else {
                    device.name.as_str()
                },
                device.memory.total_bytes / MIB,
                device.memory.free_bytes / MIB,
                layers
            );
            GpuLayers::Count(layers)
        }
        None => {
            log::warn!("Vulkan estimator could not determine n_gpu_layers; leaving auto.");
            GpuLayers::Auto
        }
    }
}

#[cfg(not(target_os = "macos"))]
fn cuda_layers(model_path: &Path, probes: &BackendProbes) -> Option<GpuLayers> {
    if !probes.cuda_available() {
        log::info!("CUDA backend unavailable; using CPU backend");
        return None;
    }

    if let Some(layers) = gpu_layer_override() {
        if layers <= 0 {
            log::info!("CUDA layer override {} forcing CPU fallback", layers);
            return Some(GpuLayers::Count(0));
        }
        log::info!("Using explicit CUDA n_gpu_layers override {}", layers);
        return Some(GpuLayers::Count(layers as u32));
    }

    let Some(memory) = probes.cuda_memory() else {
        log::warn!("Unable to query CUDA memory information; using CPU backend");
        return Some(GpuLayers::Count(0));
    };
    let Some((file_size, block_count)) = layer_inputs(model_path) else {
        log::warn!("CUDA estimator could not read model metrics; using CPU backend");
        return Some(GpuLayers::Count(0));
    };

    match estimate_layers_discrete(memory, file_size, block_count) {
        Some(layers) => {
            log::info!(
                "CUDA device total {} MiB, free {} MiB -> n_gpu_layers={}",
                memory.total_bytes / MIB,
                memory.free_bytes / MIB,
                layers
            );
            Some(GpuLayers::Count(layers))
        }
        None => {
            log::info!("CUDA not usable after estimation; falling back to CPU.");
            Some(GpuLayers::Count(0))
        }
    }
}

#[cfg(target_os = "macos")]
fn metal_layers(model_path: &Path, probes: &BackendProbes) -> GpuLayers {
    if !probes.backend_available("Metal") {
        log::warn!("Metal backend not registered; falling back to CPU");
        return GpuLayers::Count(0);
    }

    if let Some(layers) = gpu_layer_override() {
        if layers <= 0 {
            return GpuLayers::Count(0);
        }
        log::info!("Using Metal backend with explicit n_gpu_layers override={}", layers);
        return GpuLayers::Count(layers as u32);
    }

    let Some(device) = probes.backend_memory("Metal") else {
        log::warn!("Metal memory metrics unavailable; leaving layer count auto.");
        return GpuLayers::Auto;
    };
    let Some((file_size, block_count)) = layer_inputs(model_path) else {
        return GpuLayers::Auto;
    };

    match estimate_layers_unified(device.memory, file_size, block_count) {
        Some(layers) => GpuLayers::Count(layers),
        None => GpuLayers::Auto,
    }
}

/// Resolves the GPU layer count for a model according to the environment
/// and the injected probes.
///
/// Selection order: explicit CPU request wins; on macOS the Metal path is
/// used; otherwise an explicit `vulkan` preference goes straight to Vulkan,
/// `GGML_DISABLE_CUDA` forces CPU for the remaining preferences, `auto`
/// tries Vulkan, and an explicit `cuda` preference tries CUDA with a
/// Vulkan-then-CPU fallback.
pub fn select_gpu_layers(model_path: &Path, probes: &BackendProbes) -> GpuLayers {
    if cpu_backend_requested() {
        log::info!("GPU backend disabled; running on CPU");
        return GpuLayers::Count(0);
    }

    #[cfg(target_os = "macos")]
    {
        return metal_layers(model_path, probes);
    }

    #[cfg(not(target_os = "macos"))]
    {
        let preference = preferred_backend();

        // An explicit Vulkan request ignores the CUDA disable flag.
        if preference == GpuBackend::Vulkan {
            return vulkan_layers(model_path, probes);
        }

        if cuda_forced_off() {
            log::info!("CUDA disabled via GGML_DISABLE_CUDA environment override.");
            return GpuLayers::Count(0);
        }

        if preference == GpuBackend::Auto {
            return vulkan_layers(model_path, probes);
        }

        // CUDA requested explicitly.
        match cuda_layers(model_path, probes) {
            Some(layers) => layers,
            None => {
                log::warn!("CUDA backend requested but unavailable; attempting Vulkan fallback.");
                vulkan_layers(model_path, probes)
            }
        }
    }
}
