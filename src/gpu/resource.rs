//! Reference-counted GPU objects.
//!
//! Every resource is an `Arc` around its native handle plus a weak back
//! reference to the owning context. Dropping the last clone, or calling
//! [`Resource::destroy`], queues the native object on the context's release
//! queue; the context drains the queue at its next synchronization point. If
//! the context is already gone the release is skipped with a warning, since
//! the native object died together with it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use super::driver::types::*;
use super::error::{GpuError, Result};
use super::structs::{AttachmentInfo, DescriptorBindingInfo, DescriptorWrite, SamplerInfo};

/// The backend's literal handle for an object.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NativeObject {
    /// The object has no native counterpart on this backend.
    #[default]
    Null,
    /// Implicit backend: object name plus the target it binds to.
    Gl { name: u32, target: u32 },
    /// Explicit backend: object handle plus its device memory (0 if none).
    Vk { handle: u64, memory: u64 },
}

impl NativeObject {
    pub fn is_null(&self) -> bool {
        matches!(self, NativeObject::Null)
    }

    pub fn gl_name(&self) -> u32 {
        match self {
            NativeObject::Gl { name, .. } => *name,
            _ => 0,
        }
    }

    /// Bind target of an implicit-backend object, 0 for everything else.
    pub fn gl_target(&self) -> u32 {
        match self {
            NativeObject::Gl { target, .. } => *target,
            _ => 0,
        }
    }

    pub fn vk_handle(&self) -> u64 {
        match self {
            NativeObject::Vk { handle, .. } => *handle,
            _ => 0,
        }
    }
}

/// Process-unique identity of a resource. Never reused, so caches keyed by
/// it cannot alias a new object that recycled an old native name.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ResourceId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Image,
    Shader,
    Program,
    Sampler,
    RenderPass,
    Framebuffer,
    PipelineLayout,
    Pipeline,
    DescriptorSet,
    Fence,
    Semaphore,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Buffer => "Buffer",
            ResourceKind::Image => "Image",
            ResourceKind::Shader => "Shader",
            ResourceKind::Program => "Program",
            ResourceKind::Sampler => "Sampler",
            ResourceKind::RenderPass => "RenderPass",
            ResourceKind::Framebuffer => "Framebuffer",
            ResourceKind::PipelineLayout => "PipelineLayout",
            ResourceKind::Pipeline => "Pipeline",
            ResourceKind::DescriptorSet => "DescriptorSet",
            ResourceKind::Fence => "Fence",
            ResourceKind::Semaphore => "Semaphore",
        }
    }
}

/// A native object waiting for the context to delete it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PendingRelease {
    pub kind: ResourceKind,
    pub id: ResourceId,
    pub raw: NativeObject,
}

/// The part of a context that resources may reach from any thread.
#[derive(Debug, Default)]
pub struct ContextShared {
    name: String,
    releases: Mutex<Vec<PendingRelease>>,
}

impl ContextShared {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            releases: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn queue(&self, release: PendingRelease) {
        match self.releases.lock() {
            Ok(mut list) => list.push(release),
            Err(poisoned) => poisoned.into_inner().push(release),
        }
    }

    pub fn take_releases(&self) -> Vec<PendingRelease> {
        match self.releases.lock() {
            Ok(mut list) => std::mem::take(&mut *list),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

/// Per-kind description carried alongside the native handle.
pub trait ResourceDesc: Send + Sync + 'static {
    const KIND: ResourceKind;
}

struct Inner<D: ResourceDesc> {
    id: ResourceId,
    raw: NativeObject,
    valid: AtomicBool,
    owner: Weak<ContextShared>,
    desc: D,
}

impl<D: ResourceDesc> Inner<D> {
    fn release(&self) -> bool {
        if !self.valid.swap(false, Ordering::AcqRel) {
            return false;
        }

        match self.owner.upgrade() {
            Some(ctx) => {
                ctx.queue(PendingRelease {
                    kind: D::KIND,
                    id: self.id,
                    raw: self.raw,
                });
                true
            }
            None => {
                log::warn!(
                    "Attempted to destroy object of type [{}] after its corresponding context",
                    D::KIND.as_str()
                );
                false
            }
        }
    }
}

impl<D: ResourceDesc> Drop for Inner<D> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Shared handle to a native GPU object.
pub struct Resource<D: ResourceDesc> {
    inner: Arc<Inner<D>>,
}

impl<D: ResourceDesc> Clone for Resource<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: ResourceDesc> PartialEq for Resource<D> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<D: ResourceDesc> Eq for Resource<D> {}

impl<D: ResourceDesc> fmt::Debug for Resource<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(D::KIND.as_str())
            .field("id", &self.inner.id.0)
            .field("raw", &self.inner.raw)
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl<D: ResourceDesc> Resource<D> {
    pub(crate) fn new(owner: &Arc<ContextShared>, raw: NativeObject, desc: D) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: ResourceId::next(),
                raw,
                valid: AtomicBool::new(true),
                owner: Arc::downgrade(owner),
                desc,
            }),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.inner.id
    }

    pub fn kind(&self) -> ResourceKind {
        D::KIND
    }

    pub fn desc(&self) -> &D {
        &self.inner.desc
    }

    /// False once the object was destroyed or its context torn down.
    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::Acquire) && self.inner.owner.strong_count() > 0
    }

    /// True for objects with no native counterpart on their backend, such as
    /// pipeline layouts on the implicit backend.
    pub fn is_null(&self) -> bool {
        self.inner.raw.is_null()
    }

    /// The backend's literal handle, valid only while the resource is.
    pub fn native(&self) -> Result<NativeObject> {
        if self.is_valid() {
            Ok(self.inner.raw)
        } else {
            Err(GpuError::InvalidArgument)
        }
    }

    /// Raw handle without the validity check, for backends that already
    /// validated the resource.
    pub(crate) fn raw(&self) -> NativeObject {
        self.inner.raw
    }

    /// Invalidates the resource regardless of outstanding clones. Every clone
    /// observes `is_valid() == false` afterwards.
    ///
    /// The native object is queued on its owning context and handed back to
    /// the backend at that context's next synchronization point: a submit,
    /// a fence or idle wait, a pipeline destroy, [`Context::collect_garbage`]
    /// or the context's drop. Use [`Context::destroy_resource`] to release
    /// it on the spot.
    ///
    /// [`Context::collect_garbage`]: crate::Context::collect_garbage
    /// [`Context::destroy_resource`]: crate::Context::destroy_resource
    pub fn destroy(&self) {
        if self.inner.release() {
            log::debug!("released {} #{}", D::KIND.as_str(), self.inner.id.0);
        }
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub(crate) fn ensure_valid(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            log::warn!(
                "{} #{} used after it was released",
                D::KIND.as_str(),
                self.inner.id.0
            );
            Err(GpuError::InvalidArgument)
        }
    }
}

#[derive(Debug)]
pub struct BufferDesc {
    pub debug_name: String,
    pub byte_size: u64,
    pub usage: BufferUsage,
    pub visibility: MemoryVisibility,
    pub(crate) mapped: AtomicBool,
}

impl BufferDesc {
    pub fn is_mapped(&self) -> bool {
        self.mapped.load(Ordering::Acquire)
    }

    pub fn is_host_visible(&self) -> bool {
        self.visibility == MemoryVisibility::CpuAndGpu
    }
}

#[derive(Debug, Clone)]
pub struct ImageDesc {
    pub debug_name: String,
    pub dim: [u32; 3],
    pub format: Format,
    pub mip_levels: u32,
    pub usage: ImageUsage,
}

#[derive(Debug, Clone)]
pub struct ShaderDesc {
    pub debug_name: String,
    pub stage: ShaderStage,
}

/// A linked program on the implicit backend, or the set of stage modules a
/// monolithic pipeline is built from on the explicit one.
#[derive(Debug, Clone)]
pub struct ProgramDesc {
    pub stages: Vec<Shader>,
}

#[derive(Debug, Clone)]
pub struct SamplerDesc {
    pub info: SamplerInfo,
}

#[derive(Debug, Clone)]
pub struct RenderPassDesc {
    pub debug_name: String,
    pub color_attachments: Vec<AttachmentInfo>,
    pub depth_stencil_attachment: Option<AttachmentInfo>,
}

#[derive(Debug, Clone)]
pub struct FramebufferDesc {
    pub debug_name: String,
    pub render_pass: RenderPass,
    pub color_attachments: Vec<Image>,
    pub depth_stencil_attachment: Option<Image>,
    pub extent: [u32; 2],
}

#[derive(Debug, Clone)]
pub struct PipelineLayoutDesc {
    pub debug_name: String,
    pub sets: Vec<Vec<DescriptorBindingInfo>>,
    pub push_constant_bytes: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PipelineBindPoint {
    Graphics,
    Compute,
}

#[derive(Debug, Clone)]
pub struct PipelineObjectDesc {
    pub bind_point: PipelineBindPoint,
}

#[derive(Debug, Clone)]
pub struct DescriptorSetDesc {
    pub debug_name: String,
    pub layout: PipelineLayout,
    pub set: u32,
    pub writes: Vec<DescriptorWrite>,
}

#[derive(Debug, Clone, Default)]
pub struct FenceDesc;

#[derive(Debug, Clone, Default)]
pub struct SemaphoreDesc;

macro_rules! resource_kind {
    ($($desc:ty => $kind:ident, $alias:ident;)*) => {
        $(
            impl ResourceDesc for $desc {
                const KIND: ResourceKind = ResourceKind::$kind;
            }
            pub type $alias = Resource<$desc>;
        )*
    };
}

resource_kind! {
    BufferDesc => Buffer, Buffer;
    ImageDesc => Image, Image;
    ShaderDesc => Shader, Shader;
    ProgramDesc => Program, Program;
    SamplerDesc => Sampler, Sampler;
    RenderPassDesc => RenderPass, RenderPass;
    FramebufferDesc => Framebuffer, Framebuffer;
    PipelineLayoutDesc => PipelineLayout, PipelineLayout;
    PipelineObjectDesc => Pipeline, PipelineObject;
    DescriptorSetDesc => DescriptorSet, DescriptorSet;
    FenceDesc => Fence, Fence;
    SemaphoreDesc => Semaphore, Semaphore;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fence(ctx: &Arc<ContextShared>, name: u32) -> Fence {
        Resource::new(
            ctx,
            NativeObject::Gl {
                name,
                target: 0,
            },
            FenceDesc,
        )
    }

    #[test]
    fn last_drop_queues_release() {
        let ctx = Arc::new(ContextShared::new("test"));
        let a = fence(&ctx, 3);
        let b = a.clone();
        assert_eq!(a.ref_count(), 2);

        drop(a);
        assert!(ctx.take_releases().is_empty());
        drop(b);

        let released = ctx.take_releases();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].kind, ResourceKind::Fence);
        assert_eq!(released[0].raw.gl_name(), 3);
    }

    #[test]
    fn destroy_invalidates_every_clone_once() {
        let ctx = Arc::new(ContextShared::new("test"));
        let a = fence(&ctx, 4);
        let b = a.clone();

        a.destroy();
        assert!(!a.is_valid());
        assert!(!b.is_valid());
        assert_eq!(b.native(), Err(GpuError::InvalidArgument));

        b.destroy();
        drop(a);
        drop(b);
        assert_eq!(ctx.take_releases().len(), 1);
    }

    #[test]
    fn release_after_context_is_skipped() {
        let ctx = Arc::new(ContextShared::new("test"));
        let a = fence(&ctx, 5);
        drop(ctx);

        assert!(!a.is_valid());
        a.destroy();
    }

    #[test]
    fn ids_are_unique() {
        let ctx = Arc::new(ContextShared::new("test"));
        let a = fence(&ctx, 1);
        let b = fence(&ctx, 1);
        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }
}
