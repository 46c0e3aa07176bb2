// src/engine/memory.rs
//
// Memory backpressure for concurrent transforms.
//
// Every NativeCodec transform acquires a permit from a global weighted semaphore
// sized from the container (cgroup v1/v2) or host memory limit. The permit weight
// is a deterministic estimate of the transform's peak memory, derived from the
// header dimensions and the transform spec, so a few huge images cannot run
// alongside each other and push the process into an OOM kill.

use crate::engine::pipeline::{calc_cover_resize_dimensions, output_dimensions};
use crate::ops::{OutputFormat, ResizeFit, TransformSpec};
use image::ImageFormat;
use parking_lot::{Condvar, Mutex};
use std::fs;
use std::io::Cursor;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Conservative per-transform estimate used to size the fallback capacity.
pub const ESTIMATED_MEMORY_PER_OPERATION: u64 = 100 * 1024 * 1024;

/// Memory kept back for the OS and the rest of the process
const MIN_RESERVED_MEMORY: u64 = 64 * 1024 * 1024;
const MAX_RESERVED_MEMORY: u64 = 512 * 1024 * 1024;

/// Lower bound for any estimate to avoid zero-ish weights
const MIN_ESTIMATE_BYTES: u64 = 24 * 1024 * 1024;

/// Overhead for decode/temporary buffers (heuristic)
const DECODE_OVERHEAD_BYTES: u64 = 8 * 1024 * 1024;
const FILTER_OVERHEAD_BYTES: u64 = 4 * 1024 * 1024;

/// Decoded bytes-per-pixel assumptions per input format
const BPP_JPEG: u64 = 3;
const BPP_DEFAULT: u64 = 4;

const MAX_MEMORY_BASED_CONCURRENCY: u64 = 16;

/// Capacity when no limit can be detected
const FALLBACK_SEMAPHORE_CAPACITY: u64 =
    ESTIMATED_MEMORY_PER_OPERATION * MAX_MEMORY_BASED_CONCURRENCY;

/// In-memory weighted semaphore for byte-based backpressure
#[derive(Debug)]
pub struct WeightedSemaphore {
    capacity: u64,
    state: Mutex<u64>, // available bytes
    cvar: Condvar,
}

#[derive(Debug)]
pub struct MemoryPermit {
    sem: Arc<WeightedSemaphore>,
    weight: u64,
}

impl MemoryPermit {
    pub fn weight(&self) -> u64 {
        self.weight
    }
}

impl WeightedSemaphore {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            state: Mutex::new(capacity),
            cvar: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn available(&self) -> u64 {
        *self.state.lock()
    }

    pub fn acquire(self: &Arc<Self>, weight: u64) -> MemoryPermit {
        let mut available = self.state.lock();
        // a weight above capacity would never be satisfied
        let need = weight.min(self.capacity);
        while *available < need {
            self.cvar.wait(&mut available);
        }
        *available -= need;
        MemoryPermit {
            sem: Arc::clone(self),
            weight: need,
        }
    }

    fn release(&self, weight: u64) {
        let mut available = self.state.lock();
        *available = (*available).saturating_add(weight).min(self.capacity);
        // waiters have heterogeneous weights; notify_one could wake one that still cannot fit
        self.cvar.notify_all();
    }
}

impl Drop for MemoryPermit {
    fn drop(&mut self) {
        self.sem.release(self.weight);
    }
}

fn compute_semaphore_capacity() -> u64 {
    match detect_available_memory() {
        Some(mem) => {
            let usable = mem.saturating_sub(compute_reserved_memory(mem));
            usable.max(MIN_ESTIMATE_BYTES)
        }
        None => FALLBACK_SEMAPHORE_CAPACITY,
    }
}

static GLOBAL_MEMORY_SEMAPHORE: OnceLock<Arc<WeightedSemaphore>> = OnceLock::new();

/// Get global weighted semaphore for memory backpressure
pub fn memory_semaphore() -> Arc<WeightedSemaphore> {
    GLOBAL_MEMORY_SEMAPHORE
        .get_or_init(|| {
            let capacity = compute_semaphore_capacity();
            debug!(capacity_bytes = capacity, "memory semaphore initialized");
            Arc::new(WeightedSemaphore::new(capacity))
        })
        .clone()
}

/// Reserve 5% of total memory, clamped to [64MB, 512MB]
fn compute_reserved_memory(total_bytes: u64) -> u64 {
    (total_bytes / 20).clamp(MIN_RESERVED_MEMORY, MAX_RESERVED_MEMORY)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderEstimate {
    pub width: u32,
    pub height: u32,
    pub format: Option<ImageFormat>,
}

/// Parse width/height/format from input bytes without full decode.
pub fn parse_header(bytes: &[u8]) -> Option<HeaderEstimate> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?;
    let format = reader.format();
    let (width, height) = reader.into_dimensions().ok()?;
    Some(HeaderEstimate {
        width,
        height,
        format,
    })
}

fn bytes_for_image(width: u32, height: u32, bytes_per_pixel: u64) -> u64 {
    (width as u64 * height as u64).saturating_mul(bytes_per_pixel)
}

fn decoded_bpp(format: Option<ImageFormat>) -> u64 {
    match format {
        Some(ImageFormat::Jpeg) => BPP_JPEG,
        _ => BPP_DEFAULT,
    }
}

/// Deterministic peak-memory model: decoded source, the resize intermediate
/// (cover resizes before cropping), the final buffer and a slice for the encoder.
pub fn estimate_memory(header: &HeaderEstimate, spec: &TransformSpec) -> u64 {
    let source_bytes = bytes_for_image(header.width, header.height, decoded_bpp(header.format));
    let mut peak = source_bytes.saturating_add(DECODE_OVERHEAD_BYTES);
    let mut current_bytes = source_bytes;
    let mut dims = (header.width, header.height);

    if let Some(resize) = &spec.resize {
        let target = output_dimensions(header.width, header.height, resize);
        let intermediate = match (resize.fit, resize.width, resize.height) {
            (ResizeFit::Cover, Some(w), Some(h)) => {
                calc_cover_resize_dimensions(header.width, header.height, w, h)
            }
            _ => target,
        };
        let intermediate_bytes = bytes_for_image(intermediate.0, intermediate.1, 4);
        peak = peak.max(
            current_bytes
                .saturating_add(intermediate_bytes)
                .saturating_add(FILTER_OVERHEAD_BYTES),
        );
        dims = target;
        current_bytes = bytes_for_image(dims.0, dims.1, 4);
    }

    let output_bpp = match spec.resolve_format(header.format) {
        OutputFormat::Jpeg => BPP_JPEG,
        OutputFormat::Png | OutputFormat::WebP | OutputFormat::Gif => 4,
    };
    let output_bytes = bytes_for_image(dims.0, dims.1, output_bpp);
    peak = peak.max(current_bytes.saturating_add(output_bytes / 4));

    peak.max(MIN_ESTIMATE_BYTES)
}

/// Detects available memory from container limits or system memory
///
/// Returns available memory in bytes, or None if detection fails.
fn detect_available_memory() -> Option<u64> {
    detect_cgroup_v2_memory()
        .or_else(detect_cgroup_v1_memory)
        .or_else(detect_system_memory)
}

fn detect_cgroup_v2_memory() -> Option<u64> {
    let mount = fs::read_to_string("/proc/self/mountinfo")
        .ok()
        .as_deref()
        .and_then(parse_cgroup2_mount_point)
        .unwrap_or_else(|| CgroupMount {
            mount_point: "/sys/fs/cgroup".to_string(),
            root: "/".to_string(),
        });

    let rel_path = fs::read_to_string("/proc/self/cgroup")
        .ok()
        .as_deref()
        .and_then(parse_cgroup2_relative_path)
        .unwrap_or_default();

    let rel = strip_mount_root(&mount.root, &rel_path);
    let path = join_mount_rel_file(&mount.mount_point, &rel, "memory.max");
    parse_cgroup2_limit(&fs::read_to_string(path).ok()?)
}

fn detect_cgroup_v1_memory() -> Option<u64> {
    let mount = fs::read_to_string("/proc/self/mountinfo")
        .ok()
        .as_deref()
        .and_then(|m| parse_cgroup1_mount_point(m, "memory"))
        .unwrap_or_else(|| CgroupMount {
            mount_point: "/sys/fs/cgroup/memory".to_string(),
            root: "/".to_string(),
        });

    let rel_path = fs::read_to_string("/proc/self/cgroup")
        .ok()
        .as_deref()
        .and_then(parse_cgroup1_memory_relative_path)
        .unwrap_or_default();

    let rel = strip_mount_root(&mount.root, &rel_path);
    let path = join_mount_rel_file(&mount.mount_point, &rel, "memory.limit_in_bytes");
    parse_cgroup1_limit(&fs::read_to_string(path).ok()?)
}

fn detect_system_memory() -> Option<u64> {
    let content = fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo_total(&content)
}

fn parse_cgroup2_limit(content: &str) -> Option<u64> {
    let trimmed = content.trim();
    if trimmed == "max" {
        return None;
    }
    trimmed.parse::<u64>().ok()
}

fn parse_cgroup1_limit(content: &str) -> Option<u64> {
    let memory = content.trim().parse::<u64>().ok()?;
    // values near 2^63 mean "no limit"
    if memory > 1_000_000_000_000_000 {
        return None;
    }
    Some(memory)
}

fn parse_meminfo_total(content: &str) -> Option<u64> {
    let line = content.lines().find(|line| line.starts_with("MemTotal:"))?;
    let kb = line.split_whitespace().nth(1)?.parse::<u64>().ok()?;
    Some(kb * 1024)
}

struct CgroupMount {
    mount_point: String,
    root: String,
}

fn parse_cgroup2_mount_point(mountinfo: &str) -> Option<CgroupMount> {
    // id parent major:minor root mountpoint opts ... - fstype ...
    // 36 27 0:31 / /sys/fs/cgroup rw,relatime - cgroup2 cgroup2 rw
    mountinfo.lines().find_map(|line| {
        let (pre, post) = line.split_once(" - ")?;
        if !post.starts_with("cgroup2") {
            return None;
        }
        mount_from_fields(pre)
    })
}

fn parse_cgroup1_mount_point(mountinfo: &str, controller: &str) -> Option<CgroupMount> {
    mountinfo.lines().find_map(|line| {
        let (pre, post) = line.split_once(" - ")?;
        if !(post.starts_with("cgroup ") && post.contains(controller)) {
            return None;
        }
        mount_from_fields(pre)
    })
}

fn mount_from_fields(pre: &str) -> Option<CgroupMount> {
    let fields: Vec<&str> = pre.split_whitespace().collect();
    if fields.len() < 5 {
        return None;
    }
    Some(CgroupMount {
        root: fields[3].to_string(),
        mount_point: fields[4].to_string(),
    })
}

fn parse_cgroup2_relative_path(content: &str) -> Option<String> {
    // 0::/docker/abcd...
    content
        .lines()
        .find_map(|line| line.strip_prefix("0::").map(str::to_string))
}

fn parse_cgroup1_memory_relative_path(content: &str) -> Option<String> {
    // 5:memory:/kubepods.slice/...
    content.lines().find_map(|line| {
        let mut parts = line.splitn(3, ':');
        let _id = parts.next()?;
        let controllers = parts.next()?;
        if controllers.split(',').any(|c| c == "memory") {
            Some(parts.next().unwrap_or("").to_string())
        } else {
            None
        }
    })
}

fn strip_mount_root(root: &str, rel: &str) -> String {
    if root == "/" {
        return rel.to_string();
    }
    let prefix = root.trim_end_matches('/').trim_start_matches('/');
    let rel_no_leading = rel.trim_start_matches('/');
    match rel_no_leading.strip_prefix(prefix) {
        Some(stripped) => stripped.trim_start_matches('/').to_string(),
        None => rel.to_string(),
    }
}

fn join_mount_rel_file(mount_point: &str, rel: &str, file: &str) -> String {
    let base = mount_point.trim_end_matches('/');
    let rel = rel.trim_matches('/');
    if rel.is_empty() {
        format!("{base}/{file}")
    } else {
        format!("{base}/{rel}/{file}")
    }
}
