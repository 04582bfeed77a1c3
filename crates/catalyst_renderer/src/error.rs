use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),
    #[error("Vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),
    #[error("GPU allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),
    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),
    #[error("no suitable GPU: {0}")]
    NoSuitableDevice(String),
    #[error("failed to read shader {path}: {source}")]
    Shader {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("buffer {0} is not host visible")]
    NotMapped(&'static str),
    #[error("write ends at byte {end}, but the buffer holds {capacity}")]
    BufferOverflow { end: usize, capacity: usize },
    #[error("image {name} is {width}x{height}, which needs {expected} bytes of RGBA8 but has {actual}")]
    ImageData {
        name: String,
        width: u32,
        height: u32,
        expected: u64,
        actual: usize,
    },
    #[error("swapchain image {index} out of range, the swapchain has {count}")]
    ImageIndex { index: u32, count: usize },
    #[error("expected {expected} resources, built {built}")]
    Incomplete { expected: usize, built: usize },
    #[error("frame slot {slot} recorded without waiting on its fence")]
    FrameDiscipline { slot: usize },
}

pub type RenderResult<T> = Result<T, RenderError>;
