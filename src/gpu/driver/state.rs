use std::collections::HashMap;

use crate::gpu::error::{GpuError, Result};
use crate::gpu::resource::ResourceId;

use super::types::ImageUsage;

/// Access mode of an image on the explicit backend.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Layout {
    Undefined,
    General,
    ShaderReadOnly,
    ColorAttachment,
    DepthStencilAttachment,
    DepthStencilReadOnly,
    TransferSrc,
    TransferDst,
    Present,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LayoutTransition {
    pub image: ResourceId,
    pub old_layout: Layout,
    pub new_layout: Layout,
}

/// Layout an image should sit in for its most demanding declared use.
pub fn layout_for_usage(usage: ImageUsage) -> Layout {
    if usage.contains(ImageUsage::COLOR_ATTACHMENT) {
        return Layout::ColorAttachment;
    }
    if usage.contains(ImageUsage::DEPTH_STENCIL_ATTACHMENT) {
        return Layout::DepthStencilAttachment;
    }
    if usage.contains(ImageUsage::TRANSFER_DST) {
        return Layout::TransferDst;
    }
    if usage.contains(ImageUsage::TRANSFER_SRC) {
        return Layout::TransferSrc;
    }
    if usage.contains(ImageUsage::STORAGE) {
        return Layout::General;
    }
    if usage.contains(ImageUsage::SAMPLED) {
        return Layout::ShaderReadOnly;
    }
    Layout::General
}

/// Whether an image created with `usage` may ever enter `layout`.
pub fn usage_permits(usage: ImageUsage, layout: Layout) -> bool {
    match layout {
        Layout::Undefined | Layout::General | Layout::Present => true,
        Layout::ShaderReadOnly => usage.intersects(ImageUsage::SAMPLED | ImageUsage::STORAGE),
        Layout::ColorAttachment => usage.contains(ImageUsage::COLOR_ATTACHMENT),
        Layout::DepthStencilAttachment | Layout::DepthStencilReadOnly => {
            usage.contains(ImageUsage::DEPTH_STENCIL_ATTACHMENT)
        }
        Layout::TransferSrc => usage.contains(ImageUsage::TRANSFER_SRC),
        Layout::TransferDst => usage.contains(ImageUsage::TRANSFER_DST),
    }
}

/// Per-image layout state machine. Every layout change the explicit backend
/// performs goes through [`ImageLayoutTracker::request_layout`], which hands
/// back the barrier that has to be recorded.
#[derive(Default)]
pub struct ImageLayoutTracker {
    layouts: HashMap<ResourceId, Layout>,
}

impl ImageLayoutTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.layouts.clear();
    }

    /// Returns the transition needed to move `image` into `new_layout`, or
    /// `None` if it is already there. Nothing may transition back into
    /// `Undefined`.
    pub fn request_layout(
        &mut self,
        image: ResourceId,
        new_layout: Layout,
    ) -> Result<Option<LayoutTransition>> {
        if new_layout == Layout::Undefined {
            return Err(GpuError::InvalidArgument);
        }

        let old_layout = self.current_layout(image);
        if old_layout == new_layout {
            return Ok(None);
        }

        self.layouts.insert(image, new_layout);
        Ok(Some(LayoutTransition {
            image,
            old_layout,
            new_layout,
        }))
    }

    /// Tell the tracker the current layout, e.g. after a render pass moved
    /// the attachment implicitly.
    pub fn force_layout(&mut self, image: ResourceId, layout: Layout) {
        self.layouts.insert(image, layout);
    }

    /// Starts tracking `image` in `layout` unless it is tracked already.
    pub fn seed(&mut self, image: ResourceId, layout: Layout) {
        self.layouts.entry(image).or_insert(layout);
    }

    /// Last known layout (`Undefined` if the image was never transitioned).
    pub fn current_layout(&self, image: ResourceId) -> Layout {
        self.layouts.get(&image).copied().unwrap_or(Layout::Undefined)
    }

    pub fn forget(&mut self, image: ResourceId) {
        self.layouts.remove(&image);
    }
}

#[cfg(feature = "pipestate-vulkan")]
pub mod vulkan {
    use super::Layout;
    use ash::vk;

    pub fn image_layout(layout: Layout) -> vk::ImageLayout {
        match layout {
            Layout::Undefined => vk::ImageLayout::UNDEFINED,
            Layout::General => vk::ImageLayout::GENERAL,
            Layout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Layout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Layout::DepthStencilAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            Layout::DepthStencilReadOnly => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            Layout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            Layout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            Layout::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    pub fn access_mask(layout: Layout) -> vk::AccessFlags {
        match layout {
            Layout::Undefined | Layout::Present => vk::AccessFlags::empty(),
            Layout::General => vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            Layout::ShaderReadOnly => vk::AccessFlags::SHADER_READ,
            Layout::ColorAttachment => {
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            }
            Layout::DepthStencilAttachment => {
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
            }
            Layout::DepthStencilReadOnly => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
            Layout::TransferSrc => vk::AccessFlags::TRANSFER_READ,
            Layout::TransferDst => vk::AccessFlags::TRANSFER_WRITE,
        }
    }

    pub fn stage_mask(layout: Layout) -> vk::PipelineStageFlags {
        match layout {
            Layout::Undefined => vk::PipelineStageFlags::TOP_OF_PIPE,
            Layout::Present => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            Layout::General => vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER,
            Layout::ShaderReadOnly => vk::PipelineStageFlags::FRAGMENT_SHADER,
            Layout::ColorAttachment => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            Layout::DepthStencilAttachment | Layout::DepthStencilReadOnly => {
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
            }
            Layout::TransferSrc | Layout::TransferDst => vk::PipelineStageFlags::TRANSFER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::resource::{ContextShared, FenceDesc, NativeObject, Resource};
    use std::sync::Arc;

    fn some_id() -> ResourceId {
        let ctx = Arc::new(ContextShared::new("ids"));
        let r: Resource<FenceDesc> = Resource::new(&ctx, NativeObject::Null, FenceDesc);
        r.id()
    }

    #[test]
    fn image_layout_changes() {
        let mut tracker = ImageLayoutTracker::new();
        let img = some_id();

        let t = tracker
            .request_layout(img, Layout::TransferDst)
            .unwrap()
            .unwrap();
        assert_eq!(t.old_layout, Layout::Undefined);
        assert_eq!(t.new_layout, Layout::TransferDst);

        assert!(tracker
            .request_layout(img, Layout::TransferDst)
            .unwrap()
            .is_none());

        let t = tracker
            .request_layout(img, Layout::ShaderReadOnly)
            .unwrap()
            .unwrap();
        assert_eq!(t.old_layout, Layout::TransferDst);
        assert_eq!(tracker.current_layout(img), Layout::ShaderReadOnly);
    }

    #[test]
    fn undefined_is_never_a_target() {
        let mut tracker = ImageLayoutTracker::new();
        let img = some_id();
        assert_eq!(
            tracker.request_layout(img, Layout::Undefined),
            Err(GpuError::InvalidArgument)
        );
    }

    #[test]
    fn seeding_keeps_a_known_layout() {
        let mut tracker = ImageLayoutTracker::new();
        let img = some_id();
        tracker.seed(img, Layout::ShaderReadOnly);
        tracker.seed(img, Layout::TransferDst);
        assert_eq!(tracker.current_layout(img), Layout::ShaderReadOnly);

        tracker.forget(img);
        assert_eq!(tracker.current_layout(img), Layout::Undefined);
    }

    #[test]
    fn usage_picks_layout() {
        assert_eq!(
            layout_for_usage(ImageUsage::SAMPLED | ImageUsage::COLOR_ATTACHMENT),
            Layout::ColorAttachment
        );
        assert_eq!(layout_for_usage(ImageUsage::SAMPLED), Layout::ShaderReadOnly);
        assert!(!usage_permits(ImageUsage::SAMPLED, Layout::ColorAttachment));
        assert!(usage_permits(ImageUsage::TRANSFER_DST, Layout::TransferDst));
    }
}
