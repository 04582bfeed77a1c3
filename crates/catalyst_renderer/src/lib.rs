//! Vulkan renderer: explicit frames in flight, one-shot scene upload,
//! and two interchangeable draw paths (CPU culling with push constants,
//! GPU culling with a single indirect draw).

pub mod allocator;
pub mod commands;
pub mod context;
pub mod culling;
pub mod descriptors;
pub mod error;
pub mod frame;
pub mod materials;
pub mod pipelines;
pub mod renderer;
pub mod shader_data;
pub mod strategy;
pub mod swapchain;
pub mod upload;

pub use error::{RenderError, RenderResult};
pub use renderer::{FrameOutcome, Renderer};
pub use strategy::StrategyKind;
