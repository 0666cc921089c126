// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

/// Startup failures that callers may want to tell apart.
#[derive(Debug, Error)]
pub enum VkError {
    #[error("missing instance extensions: {0:?}")]
    MissingInstanceExtensions(Vec<String>),
    #[error("no physical device satisfies the renderer's requirements")]
    NoSuitableDevice,
    #[error("no depth format with optimal-tiling depth/stencil attachment support")]
    NoDepthFormat,
    #[error("no memory type matches filter {type_filter:#b} with {flags:?}")]
    NoMemoryType {
        type_filter: u32,
        flags: vk::MemoryPropertyFlags,
    },
    #[error("SPIR-V blob of {len} bytes is not a whole number of words")]
    InvalidSpirv { len: usize },
    #[error("shader {name}.{stage} not found in assets and not embedded")]
    MissingShader { name: String, stage: &'static str },
    #[error("unsupported layout transition {from:?} -> {to:?}")]
    UnsupportedTransition {
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    },
}

/// Per-frame failures. Only `DeviceLost` and `Other` are fatal to the frame loop.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("device lost")]
    DeviceLost,
    #[error("{op}: {result:?}")]
    Vk {
        op: &'static str,
        result: vk::Result,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FrameError {
    pub fn vk(op: &'static str, result: vk::Result) -> Self {
        if result == vk::Result::ERROR_DEVICE_LOST {
            FrameError::DeviceLost
        } else {
            FrameError::Vk { op, result }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_lost_is_singled_out() {
        assert!(matches!(
            FrameError::vk("queue_submit", vk::Result::ERROR_DEVICE_LOST),
            FrameError::DeviceLost
        ));
        assert!(matches!(
            FrameError::vk("queue_present", vk::Result::ERROR_SURFACE_LOST_KHR),
            FrameError::Vk { op: "queue_present", .. }
        ));
    }
}
