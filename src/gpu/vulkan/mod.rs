//! Explicit backend over Vulkan.
//!
//! Every graphics pipeline becomes one monolithic native pipeline built from
//! its resolved parameters. Commands are recorded into a fresh native command
//! buffer per submission and the render-state tracker is invalidated when
//! that buffer begins, since bound state does not carry over between command
//! buffers. Image layouts are driven through [`ImageLayoutTracker`], which
//! hands back the barriers to record.

pub mod command_pool;
pub mod conversions;
pub mod memory;

use std::collections::HashMap;
use std::ffi::{c_void, CStr, CString};
use std::mem::ManuallyDrop;
use std::os::raw::c_char;

use ash::extensions::ext::DebugUtils;
use vk_mem::Alloc as _;
use ash::vk::{self, Handle as _};
use ash::Entry;
use smallvec::SmallVec;

use super::cmd::{BarrierInfo, Command, RenderPassBegin};
use super::driver::state::vulkan::{access_mask, image_layout, stage_mask};
use super::driver::state::{layout_for_usage, usage_permits, ImageLayoutTracker, Layout};
use super::driver::types::*;
use super::error::{GpuError, Result};
use super::pipeline::fragment::{DepthBias, StencilFunc};
use super::pipeline::{ComputePipelineInfo, FragmentKind, FragmentValue, GraphicsPipeline};
use super::resource::*;
use super::structs::*;
use super::tracker::RenderStateTracker as Tracker;
use super::tracker::{BufferBinding, IndexBinding};
use super::{Backend, BackendKind};

use command_pool::CommandPool;
use conversions::*;
use memory::{BufferAllocation, ImageAllocation, MemoryLocation};

/// Layer enabled when validation is requested and the loader has it.
const VALIDATION_LAYER: &[u8] = b"VK_LAYER_KHRONOS_validation\0";

/// Descriptor sets the backend's pool can hold at once.
const DESCRIPTOR_POOL_SETS: u32 = 1024;

/// State every monolithic pipeline takes from the command buffer instead of
/// baking it.
const DYNAMIC_STATES: [vk::DynamicState; 8] = [
    vk::DynamicState::VIEWPORT,
    vk::DynamicState::SCISSOR,
    vk::DynamicState::LINE_WIDTH,
    vk::DynamicState::DEPTH_BIAS,
    vk::DynamicState::BLEND_CONSTANTS,
    vk::DynamicState::STENCIL_COMPARE_MASK,
    vk::DynamicState::STENCIL_WRITE_MASK,
    vk::DynamicState::STENCIL_REFERENCE,
];

fn entry_point() -> &'static CStr {
    // SAFETY: the literal is NUL terminated and has no interior NUL.
    unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") }
}

unsafe extern "system" fn validation_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let message = unsafe { CStr::from_ptr((*p_callback_data).p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[{:?}] {}", message_type, message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[{:?}] {}", message_type, message);
    } else {
        log::debug!("[{:?}] {}", message_type, message);
    }
    vk::FALSE
}

#[derive(Debug, Default, Copy, Clone)]
struct Queue {
    family: u32,
    raw: vk::Queue,
}

/// A submitted command buffer and the fence that tells when it is done.
#[derive(Debug, Copy, Clone)]
struct InFlight {
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
    /// Created for this submission only.
    owned: bool,
}

/// The native command buffer of the submission being executed.
#[derive(Debug, Copy, Clone)]
struct Recording {
    cmd: vk::CommandBuffer,
    /// Set between begin and end of a render pass.
    render_area: Option<vk::Rect2D>,
    /// Layout of the last pipeline bound at each bind point.
    layouts: [vk::PipelineLayout; 2],
}

#[derive(Debug)]
struct LayoutRecord {
    layout: vk::PipelineLayout,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    push_constant_bytes: u32,
}

/// Values a graphics pipeline re-establishes for its dynamic state when it
/// is bound.
#[derive(Debug, Copy, Clone)]
struct DynamicDefaults {
    depth_bias: DepthBias,
    stencil_func: [StencilFunc; 2],
    stencil_write_mask: [u32; 2],
}

#[derive(Debug, Copy, Clone)]
struct PipelineRecord {
    layout: vk::PipelineLayout,
    dynamic: Option<DynamicDefaults>,
}

fn bind_point_index(point: PipelineBindPoint) -> usize {
    match point {
        PipelineBindPoint::Graphics => 0,
        PipelineBindPoint::Compute => 1,
    }
}

fn record_image_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old_layout: Layout,
    new_layout: Layout,
) {
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(image_layout(old_layout))
        .new_layout(image_layout(new_layout))
        .src_access_mask(access_mask(old_layout))
        .dst_access_mask(access_mask(new_layout))
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
        .build();

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            stage_mask(old_layout),
            stage_mask(new_layout),
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        )
    };
}

fn write_host(
    allocator: &vk_mem::Allocator,
    allocation: &mut vk_mem::Allocation,
    data: &[u8],
) -> Result<()> {
    unsafe {
        let ptr = allocator.map_memory(allocation)?;
        std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
        let flushed = allocator.flush_allocation(allocation, 0, data.len());
        allocator.unmap_memory(allocation);
        flushed?;
    }
    Ok(())
}

fn set_viewport(device: &ash::Device, cmd: vk::CommandBuffer, t: &mut Tracker, v: Viewport) {
    t.viewport.update(v, |v| unsafe {
        device.cmd_set_viewport(cmd, 0, &[viewport(v)])
    });
}

fn set_scissor(device: &ash::Device, cmd: vk::CommandBuffer, t: &mut Tracker, r: Rect2D) {
    t.scissor
        .update(r, |r| unsafe { device.cmd_set_scissor(cmd, 0, &[rect(r)]) });
}

/// Sets reference and compare mask of one face, issuing only the halves
/// that changed.
fn set_stencil_func(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    t: &mut Tracker,
    face: usize,
    func: StencilFunc,
) {
    let previous = t.stencil_func[face].get().copied();
    let flags = stencil_face(face);
    t.stencil_func[face].update(func, |f| unsafe {
        if previous.map(|p| p.reference) != Some(f.reference) {
            device.cmd_set_stencil_reference(cmd, flags, f.reference);
        }
        if previous.map(|p| p.read_mask) != Some(f.read_mask) {
            device.cmd_set_stencil_compare_mask(cmd, flags, f.read_mask);
        }
    });
}

fn set_depth_bias(device: &ash::Device, cmd: vk::CommandBuffer, t: &mut Tracker, bias: DepthBias) {
    t.depth_bias.update(bias, |b| unsafe {
        device.cmd_set_depth_bias(cmd, b.constant_factor, b.clamp, b.slope_factor)
    });
}

fn apply_dynamic_defaults(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    t: &mut Tracker,
    defaults: &DynamicDefaults,
) {
    set_depth_bias(device, cmd, t, defaults.depth_bias);
    for face in 0..2 {
        set_stencil_func(device, cmd, t, face, defaults.stencil_func[face]);
        let flags = stencil_face(face);
        t.stencil_write_mask[face].update(defaults.stencil_write_mask[face], |m| unsafe {
            device.cmd_set_stencil_write_mask(cmd, flags, *m)
        });
    }
    // Not pipeline state, but dynamic all the same; only seeded when the
    // command buffer has not set them yet.
    if t.line_width.get().is_none() {
        t.line_width
            .update(1.0, |w| unsafe { device.cmd_set_line_width(cmd, *w) });
    }
    if t.blend_constants.get().is_none() {
        t.blend_constants.update([0.0; 4], |c| unsafe {
            device.cmd_set_blend_constants(cmd, c)
        });
    }
}

pub struct VulkanBackend {
    _entry: Entry,
    instance: ash::Instance,
    device: ash::Device,
    properties: vk::PhysicalDeviceProperties,
    features: vk::PhysicalDeviceFeatures,
    allocator: ManuallyDrop<vk_mem::Allocator>,
    queue: Queue,
    pool: CommandPool,
    descriptor_pool: vk::DescriptorPool,
    caps: Capabilities,
    debug_utils: Option<DebugUtils>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,

    buffers: HashMap<u64, BufferAllocation>,
    images: HashMap<u64, ImageAllocation>,
    layouts: HashMap<u64, LayoutRecord>,
    pipelines: HashMap<u64, PipelineRecord>,
    image_layouts: ImageLayoutTracker,
    recording: Option<Recording>,
    in_flight: Vec<InFlight>,
    /// Releases held back until no submission is in flight.
    deferred: Vec<PendingRelease>,
}

// SAFETY: every native handle is owned by this value and only touched
// through `&mut self`; the allocator is internally synchronized.
unsafe impl Send for VulkanBackend {}

impl VulkanBackend {
    /// Picks the device with the most capable queue family, preferring
    /// discrete GPUs. Returns the device and the family index.
    fn pick_device(instance: &ash::Instance) -> Result<Option<(vk::PhysicalDevice, u32)>> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;
        let mut best: Option<(u32, vk::PhysicalDevice, u32)> = None;

        for pdevice in devices {
            let props = unsafe { instance.get_physical_device_properties(pdevice) };
            let families =
                unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
            let family = families
                .iter()
                .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                .or_else(|| {
                    families
                        .iter()
                        .position(|f| f.queue_flags.contains(vk::QueueFlags::COMPUTE))
                });
            let Some(family) = family else {
                continue;
            };

            let score = match props.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 3,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
                vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
                _ => 0,
            };
            if best.map_or(true, |(s, _, _)| score > s) {
                best = Some((score, pdevice, family as u32));
            }
        }

        Ok(best.map(|(_, pdevice, family)| (pdevice, family)))
    }

    /// Opens the best available device without any presentation support.
    /// Validation is enabled by [`ContextInfo::validation_requested`].
    pub fn headless(info: &ContextInfo) -> Result<Self> {
        let validation = info.validation_requested();
        let entry = unsafe { Entry::load() }?;

        let app_name = CString::new(info.debug_name.as_str()).unwrap_or_default();
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .api_version(vk::make_api_version(0, 1, 1, 0))
            .build();

        let mut extensions: Vec<*const c_char> = Vec::new();
        let mut layers: Vec<*const c_char> = Vec::new();
        if validation {
            extensions.push(DebugUtils::name().as_ptr());
            let wanted = unsafe { CStr::from_bytes_with_nul_unchecked(VALIDATION_LAYER) };
            let available = entry.enumerate_instance_layer_properties()?;
            if available
                .iter()
                .any(|prop| unsafe { CStr::from_ptr(prop.layer_name.as_ptr()) } == wanted)
            {
                layers.push(wanted.as_ptr());
            } else {
                log::warn!("validation requested but {:?} is not installed", wanted);
            }
        }

        let instance = unsafe {
            entry.create_instance(
                &vk::InstanceCreateInfo::builder()
                    .application_info(&app_info)
                    .enabled_extension_names(&extensions)
                    .enabled_layer_names(&layers)
                    .build(),
                None,
            )
        }?;

        let (pdevice, family) = match Self::pick_device(&instance) {
            Ok(Some(found)) => found,
            Ok(None) => {
                log::error!("no Vulkan device with a graphics or compute queue");
                unsafe { instance.destroy_instance(None) };
                return Err(GpuError::UnsupportedRequest);
            }
            Err(err) => {
                unsafe { instance.destroy_instance(None) };
                return Err(err);
            }
        };

        let properties = unsafe { instance.get_physical_device_properties(pdevice) };
        let families = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
        let queue_flags = families[family as usize].queue_flags;
        let supported = unsafe { instance.get_physical_device_features(pdevice) };
        let features = vk::PhysicalDeviceFeatures {
            geometry_shader: supported.geometry_shader,
            tessellation_shader: supported.tessellation_shader,
            wide_lines: supported.wide_lines,
            depth_bias_clamp: supported.depth_bias_clamp,
            independent_blend: supported.independent_blend,
            ..Default::default()
        };

        let priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(family)
            .queue_priorities(&priorities)
            .build()];
        let device = unsafe {
            instance.create_device(
                pdevice,
                &vk::DeviceCreateInfo::builder()
                    .queue_create_infos(&queue_infos)
                    .enabled_features(&features)
                    .build(),
                None,
            )
        }?;

        let queue = Queue {
            family,
            raw: unsafe { device.get_device_queue(family, 0) },
        };

        let allocator = vk_mem::Allocator::new(vk_mem::AllocatorCreateInfo::new(
            &instance, &device, pdevice,
        ))?;

        let pool = CommandPool::new(&device, queue.family)?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: DESCRIPTOR_POOL_SETS,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: DESCRIPTOR_POOL_SETS,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: DESCRIPTOR_POOL_SETS,
            },
        ];
        let descriptor_pool = unsafe {
            device.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::builder()
                    .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
                    .max_sets(DESCRIPTOR_POOL_SETS)
                    .pool_sizes(&pool_sizes)
                    .build(),
                None,
            )
        }?;

        let (debug_utils, debug_messenger) = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let messenger_ci = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(validation_callback));
            let messenger =
                unsafe { debug_utils.create_debug_utils_messenger(&messenger_ci, None) }?;
            (Some(debug_utils), Some(messenger))
        } else {
            (None, None)
        };

        let limits = &properties.limits;
        let caps = Capabilities {
            graphics: queue_flags.contains(vk::QueueFlags::GRAPHICS),
            compute: queue_flags.contains(vk::QueueFlags::COMPUTE),
            geometry_shaders: features.geometry_shader == vk::TRUE,
            tessellation: features.tessellation_shader == vk::TRUE,
            memory_barriers: true,
            max_vertex_attributes: limits.max_vertex_input_attributes.min(32),
            max_texture_units: limits.max_per_stage_descriptor_samplers,
            max_buffer_bindings: limits.max_per_stage_descriptor_uniform_buffers,
        };

        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        log::debug!(
            "opened Vulkan device {:?} (queue family {}, validation {})",
            name,
            family,
            debug_utils.is_some()
        );

        Ok(Self {
            _entry: entry,
            instance,
            device,
            properties,
            features,
            allocator: ManuallyDrop::new(allocator),
            queue,
            pool,
            descriptor_pool,
            caps,
            debug_utils,
            debug_messenger,
            buffers: HashMap::new(),
            images: HashMap::new(),
            layouts: HashMap::new(),
            pipelines: HashMap::new(),
            image_layouts: ImageLayoutTracker::new(),
            recording: None,
            in_flight: Vec::new(),
            deferred: Vec::new(),
        })
    }

    fn set_name<T>(&self, obj: T, name: &str, t: vk::ObjectType)
    where
        T: vk::Handle,
    {
        let Some(utils) = &self.debug_utils else {
            return;
        };
        if name.is_empty() {
            return;
        }
        let Ok(name) = CString::new(name) else {
            return;
        };
        let named = unsafe {
            utils.set_debug_utils_object_name(
                self.device.handle(),
                &vk::DebugUtilsObjectNameInfoEXT::builder()
                    .object_name(&name)
                    .object_type(t)
                    .object_handle(obj.as_raw())
                    .build(),
            )
        };
        if let Err(err) = named {
            log::warn!("unable to name {:?}: {}", t, err);
        }
    }

    fn recording(&self) -> Result<Recording> {
        self.recording.ok_or_else(|| {
            log::error!("no submission is being recorded");
            GpuError::NotInitialised
        })
    }

    /// Records, submits and waits for a command buffer outside of any user
    /// submission. Used for creation-time uploads.
    fn one_shot(&mut self, record: impl FnOnce(&ash::Device, vk::CommandBuffer)) -> Result<()> {
        let cmd = self.pool.begin()?;
        record(&self.device, cmd);

        let result = unsafe {
            self.device.end_command_buffer(cmd).and_then(|_| {
                let fence = self
                    .device
                    .create_fence(&vk::FenceCreateInfo::builder().build(), None)?;
                let done = self
                    .device
                    .queue_submit(
                        self.queue.raw,
                        &[vk::SubmitInfo::builder().command_buffers(&[cmd]).build()],
                        fence,
                    )
                    .and_then(|_| self.device.wait_for_fences(&[fence], true, u64::MAX));
                self.device.destroy_fence(fence, None);
                done
            })
        };
        self.pool.recycle(cmd);
        result.map_err(GpuError::from)
    }

    fn staging_buffer(&mut self, data: &[u8]) -> Result<(vk::Buffer, vk_mem::Allocation)> {
        let (buffer, mut allocation) = unsafe {
            self.allocator.create_buffer(
                &vk::BufferCreateInfo::builder()
                    .size(data.len() as u64)
                    .usage(vk::BufferUsageFlags::TRANSFER_SRC)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .build(),
                &MemoryLocation::HostVisible.allocation_info(),
            )
        }?;
        if let Err(err) = write_host(&self.allocator, &mut allocation, data) {
            unsafe { self.allocator.destroy_buffer(buffer, &mut allocation) };
            return Err(err);
        }
        Ok((buffer, allocation))
    }

    fn upload_buffer(&mut self, handle: u64, data: &[u8]) -> Result<()> {
        let Some(record) = self.buffers.get_mut(&handle) else {
            return Err(GpuError::InvalidArgument);
        };
        if record.location.is_host_visible() {
            return write_host(&self.allocator, &mut record.allocation, data);
        }

        let dst = record.buffer;
        let (staging, mut staging_alloc) = self.staging_buffer(data)?;
        let size = data.len() as u64;
        let copied = self.one_shot(|device, cmd| unsafe {
            device.cmd_copy_buffer(
                cmd,
                staging,
                dst,
                &[vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size,
                }],
            )
        });
        unsafe { self.allocator.destroy_buffer(staging, &mut staging_alloc) };
        copied
    }

    /// Copies `data` into mip 0 and leaves the image in `final_layout`.
    fn upload_image(
        &mut self,
        handle: u64,
        extent: [u32; 3],
        data: &[u8],
        final_layout: Layout,
    ) -> Result<()> {
        let (staging, mut staging_alloc) = self.staging_buffer(data)?;
        let Some(image) = self.images.get(&handle) else {
            unsafe { self.allocator.destroy_buffer(staging, &mut staging_alloc) };
            return Err(GpuError::InvalidArgument);
        };
        let target = image.image;
        let range = image.full_range();

        let copied = self.one_shot(|device, cmd| {
            record_image_barrier(
                device,
                cmd,
                target,
                range,
                Layout::Undefined,
                Layout::TransferDst,
            );
            unsafe {
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging,
                    target,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[vk::BufferImageCopy {
                        buffer_offset: 0,
                        buffer_row_length: 0,
                        buffer_image_height: 0,
                        image_subresource: vk::ImageSubresourceLayers {
                            aspect_mask: range.aspect_mask,
                            mip_level: 0,
                            base_array_layer: 0,
                            layer_count: 1,
                        },
                        image_offset: vk::Offset3D::default(),
                        image_extent: vk::Extent3D {
                            width: extent[0],
                            height: extent[1],
                            depth: extent[2],
                        },
                    }],
                )
            };
            record_image_barrier(device, cmd, target, range, Layout::TransferDst, final_layout);
        });
        unsafe { self.allocator.destroy_buffer(staging, &mut staging_alloc) };
        copied
    }

    /// Moves `image` into `layout`, recording the barrier if it is not there
    /// yet.
    fn transition(&mut self, cmd: vk::CommandBuffer, image: &Image, layout: Layout) -> Result<()> {
        image.ensure_valid()?;
        if !usage_permits(image.desc().usage, layout) {
            log::error!(
                "image '{}' was not created for {:?}",
                image.desc().debug_name,
                layout
            );
            return Err(GpuError::InvalidArgument);
        }
        let record = self
            .images
            .get(&image.raw().vk_handle())
            .ok_or(GpuError::InvalidArgument)?;

        self.image_layouts.seed(image.id(), record.initial_layout);
        if let Some(transition) = self.image_layouts.request_layout(image.id(), layout)? {
            record_image_barrier(
                &self.device,
                cmd,
                record.image,
                record.full_range(),
                transition.old_layout,
                transition.new_layout,
            );
        }
        Ok(())
    }

    fn pipeline_barrier(&mut self, rec: Recording, barrier: &BarrierInfo) -> Result<()> {
        if rec.render_area.is_some() {
            log::error!("pipeline barrier inside a render pass");
            return Err(GpuError::InvalidArgument);
        }
        for image in &barrier.images {
            self.transition(rec.cmd, &image.image, image.new_layout)?;
        }
        if barrier.memory {
            let memory = vk::MemoryBarrier::builder()
                .src_access_mask(
                    vk::AccessFlags::SHADER_WRITE
                        | vk::AccessFlags::TRANSFER_WRITE
                        | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                )
                .dst_access_mask(
                    vk::AccessFlags::SHADER_READ
                        | vk::AccessFlags::UNIFORM_READ
                        | vk::AccessFlags::INDEX_READ
                        | vk::AccessFlags::VERTEX_ATTRIBUTE_READ
                        | vk::AccessFlags::INDIRECT_COMMAND_READ
                        | vk::AccessFlags::TRANSFER_READ,
                )
                .build();
            unsafe {
                self.device.cmd_pipeline_barrier(
                    rec.cmd,
                    vk::PipelineStageFlags::ALL_COMMANDS,
                    vk::PipelineStageFlags::ALL_COMMANDS,
                    vk::DependencyFlags::empty(),
                    &[memory],
                    &[],
                    &[],
                )
            };
        }
        Ok(())
    }

    fn begin_render_pass(
        &mut self,
        t: &mut Tracker,
        mut rec: Recording,
        begin: &RenderPassBegin,
    ) -> Result<()> {
        if rec.render_area.is_some() {
            log::error!("render pass begun inside another one");
            return Err(GpuError::AlreadyInitialised);
        }
        let framebuffer = &begin.framebuffer;
        framebuffer.ensure_valid()?;
        let desc = framebuffer.desc();
        desc.render_pass.ensure_valid()?;

        // Render passes neither expect nor leave any other layout.
        for image in &desc.color_attachments {
            self.transition(rec.cmd, image, Layout::ColorAttachment)?;
        }
        if let Some(image) = &desc.depth_stencil_attachment {
            self.transition(rec.cmd, image, Layout::DepthStencilAttachment)?;
        }

        let colors = desc.color_attachments.len();
        let mut clears: SmallVec<[vk::ClearValue; 5]> = (0..colors)
            .map(|i| match begin.clear_values.get(i) {
                Some(value @ ClearValue::Color(_)) => clear_value(value),
                _ => clear_value(&ClearValue::default()),
            })
            .collect();
        if desc.depth_stencil_attachment.is_some() {
            let value = match begin.clear_values.get(colors) {
                Some(value @ ClearValue::DepthStencil { .. }) => *value,
                _ => ClearValue::DepthStencil {
                    depth: 1.0,
                    stencil: 0,
                },
            };
            clears.push(clear_value(&value));
        }

        let area = if begin.area.w == 0 || begin.area.h == 0 {
            Rect2D {
                x: 0,
                y: 0,
                w: desc.extent[0],
                h: desc.extent[1],
            }
        } else {
            begin.area
        };

        unsafe {
            self.device.cmd_begin_render_pass(
                rec.cmd,
                &vk::RenderPassBeginInfo::builder()
                    .render_pass(vk::RenderPass::from_raw(desc.render_pass.raw().vk_handle()))
                    .framebuffer(vk::Framebuffer::from_raw(framebuffer.raw().vk_handle()))
                    .render_area(rect(&area))
                    .clear_values(&clears)
                    .build(),
                vk::SubpassContents::INLINE,
            )
        };

        if t.viewport.get().is_none() {
            set_viewport(
                &self.device,
                rec.cmd,
                t,
                Viewport::from_extent(desc.extent[0], desc.extent[1]),
            );
        }
        if t.scissor.get().is_none() {
            set_scissor(&self.device, rec.cmd, t, area);
        }

        rec.render_area = Some(rect(&area));
        self.recording = Some(rec);
        Ok(())
    }

    fn push_constants(
        &self,
        rec: Recording,
        offset: u32,
        stages: ShaderStageFlags,
        value: &UniformValue,
    ) -> Result<()> {
        let point = if stages.contains(ShaderStageFlags::COMPUTE) {
            PipelineBindPoint::Compute
        } else {
            PipelineBindPoint::Graphics
        };
        let layout = rec.layouts[bind_point_index(point)];
        let Some(record) = self.layouts.get(&layout.as_raw()) else {
            log::error!("push constants without a bound {:?} pipeline", point);
            return Err(GpuError::NotInitialised);
        };

        let bytes = value.bytes();
        if offset as usize + bytes.len() > record.push_constant_bytes as usize {
            log::error!(
                "push constant write at {}..{} exceeds the {} bytes of the layout",
                offset,
                offset as usize + bytes.len(),
                record.push_constant_bytes
            );
            return Err(GpuError::InvalidArgument);
        }

        unsafe {
            self.device.cmd_push_constants(
                rec.cmd,
                record.layout,
                vk::ShaderStageFlags::ALL,
                offset,
                bytes,
            )
        };
        Ok(())
    }

    fn write_descriptors(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) -> Result<()> {
        for write in writes {
            let base = vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(write.binding)
                .dst_array_element(0)
                .descriptor_type(descriptor_type(write.ty));

            match &write.resource {
                DescriptorResource::Buffer {
                    buffer,
                    offset,
                    range,
                } => {
                    let infos = [vk::DescriptorBufferInfo {
                        buffer: vk::Buffer::from_raw(buffer.raw().vk_handle()),
                        offset: *offset,
                        range: if *range == 0 { vk::WHOLE_SIZE } else { *range },
                    }];
                    unsafe {
                        self.device
                            .update_descriptor_sets(&[base.buffer_info(&infos).build()], &[])
                    };
                }
                DescriptorResource::ImageSampler { image, sampler } => {
                    let view = self
                        .images
                        .get(&image.raw().vk_handle())
                        .map(|i| i.view)
                        .ok_or(GpuError::InvalidArgument)?;
                    let layout = if image.desc().format.is_depth() {
                        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
                    } else {
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                    };
                    let infos = [vk::DescriptorImageInfo {
                        sampler: vk::Sampler::from_raw(sampler.raw().vk_handle()),
                        image_view: view,
                        image_layout: layout,
                    }];
                    unsafe {
                        self.device
                            .update_descriptor_sets(&[base.image_info(&infos).build()], &[])
                    };
                }
            }
        }
        Ok(())
    }

    fn retire(&mut self, done: InFlight) {
        self.pool.recycle(done.cmd);
        if done.owned {
            unsafe { self.device.destroy_fence(done.fence, None) };
        }
    }

    /// Recycles every submission whose fence has signaled, then runs the
    /// releases that were waiting for the queue to drain.
    fn retire_completed(&mut self) -> Result<()> {
        let mut i = 0;
        while i < self.in_flight.len() {
            let done = unsafe { self.device.get_fence_status(self.in_flight[i].fence) }?;
            if done {
                let done = self.in_flight.swap_remove(i);
                self.retire(done);
            } else {
                i += 1;
            }
        }

        if self.in_flight.is_empty() {
            for release in std::mem::take(&mut self.deferred) {
                self.destroy_now(&release);
            }
        }
        Ok(())
    }

    fn destroy_now(&mut self, release: &PendingRelease) {
        let raw = release.raw.vk_handle();
        if raw == 0 {
            return;
        }

        unsafe {
            match release.kind {
                ResourceKind::Buffer => {
                    if let Some(mut buffer) = self.buffers.remove(&raw) {
                        self.allocator
                            .destroy_buffer(buffer.buffer, &mut buffer.allocation);
                    }
                }
                ResourceKind::Image => {
                    if let Some(mut image) = self.images.remove(&raw) {
                        self.device.destroy_image_view(image.view, None);
                        self.allocator.destroy_image(image.image, &mut image.allocation);
                    }
                    self.image_layouts.forget(release.id);
                }
                ResourceKind::Shader => self
                    .device
                    .destroy_shader_module(vk::ShaderModule::from_raw(raw), None),
                ResourceKind::Program => {}
                ResourceKind::Sampler => {
                    self.device.destroy_sampler(vk::Sampler::from_raw(raw), None)
                }
                ResourceKind::RenderPass => self
                    .device
                    .destroy_render_pass(vk::RenderPass::from_raw(raw), None),
                ResourceKind::Framebuffer => self
                    .device
                    .destroy_framebuffer(vk::Framebuffer::from_raw(raw), None),
                ResourceKind::PipelineLayout => {
                    if let Some(record) = self.layouts.remove(&raw) {
                        for set_layout in record.set_layouts {
                            self.device.destroy_descriptor_set_layout(set_layout, None);
                        }
                        self.device.destroy_pipeline_layout(record.layout, None);
                    }
                }
                ResourceKind::Pipeline => {
                    self.pipelines.remove(&raw);
                    self.device
                        .destroy_pipeline(vk::Pipeline::from_raw(raw), None);
                }
                ResourceKind::DescriptorSet => {
                    let freed = self.device.free_descriptor_sets(
                        self.descriptor_pool,
                        &[vk::DescriptorSet::from_raw(raw)],
                    );
                    if let Err(err) = freed {
                        log::warn!("unable to free descriptor set: {}", err);
                    }
                }
                ResourceKind::Fence => self.device.destroy_fence(vk::Fence::from_raw(raw), None),
                ResourceKind::Semaphore => self
                    .device
                    .destroy_semaphore(vk::Semaphore::from_raw(raw), None),
            }
        }
    }

    /// Limits of the opened device.
    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.properties.limits
    }

    /// Submissions the GPU may still be working on.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

impl Backend for VulkanBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Explicit
    }

    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn create_buffer(&mut self, info: &BufferInfo) -> Result<NativeObject> {
        let location = MemoryLocation::choose(info.usage, info.visibility);
        let (buffer, allocation) = unsafe {
            self.allocator.create_buffer(
                &vk::BufferCreateInfo::builder()
                    .size(info.byte_size)
                    .usage(buffer_usage(info.usage))
                    .sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .build(),
                &location.allocation_info(),
            )
        }?;
        self.set_name(buffer, info.debug_name, vk::ObjectType::BUFFER);

        let memory = self.allocator.get_allocation_info(&allocation).device_memory;
        let handle = buffer.as_raw();
        self.buffers.insert(
            handle,
            BufferAllocation {
                buffer,
                allocation,
                location,
                size: info.byte_size,
            },
        );

        if let Some(data) = info.initial_data {
            if let Err(err) = self.upload_buffer(handle, data) {
                if let Some(mut record) = self.buffers.remove(&handle) {
                    unsafe {
                        self.allocator
                            .destroy_buffer(record.buffer, &mut record.allocation)
                    };
                }
                return Err(err);
            }
        }

        Ok(NativeObject::Vk {
            handle,
            memory: memory.as_raw(),
        })
    }

    fn create_image(&mut self, _t: &mut Tracker, info: &ImageInfo) -> Result<NativeObject> {
        let vk_format = format(info.format);
        if vk_format == vk::Format::UNDEFINED {
            return Err(GpuError::InvalidData);
        }
        if info.initial_data.is_some() && info.format.is_depth() {
            log::error!(
                "image '{}': initial data for depth formats is not supported",
                info.debug_name
            );
            return Err(GpuError::UnsupportedRequest);
        }

        let three_d = info.dim[2] > 1;
        let mut usage = image_usage(info.usage);
        if info.initial_data.is_some() {
            usage |= vk::ImageUsageFlags::TRANSFER_DST;
        }

        let (image, mut allocation) = unsafe {
            self.allocator.create_image(
                &vk::ImageCreateInfo::builder()
                    .image_type(if three_d {
                        vk::ImageType::TYPE_3D
                    } else {
                        vk::ImageType::TYPE_2D
                    })
                    .extent(vk::Extent3D {
                        width: info.dim[0],
                        height: info.dim[1],
                        depth: info.dim[2],
                    })
                    .array_layers(1)
                    .format(vk_format)
                    .mip_levels(info.mip_levels)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .usage(usage)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .tiling(vk::ImageTiling::OPTIMAL)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .build(),
                &vk_mem::AllocationCreateInfo {
                    usage: vk_mem::MemoryUsage::Auto,
                    ..Default::default()
                },
            )
        }?;
        self.set_name(image, info.debug_name, vk::ObjectType::IMAGE);

        let aspect = aspect_mask(info.format);
        let view = unsafe {
            self.device.create_image_view(
                &vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(if three_d {
                        vk::ImageViewType::TYPE_3D
                    } else {
                        vk::ImageViewType::TYPE_2D
                    })
                    .format(vk_format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: aspect,
                        base_mip_level: 0,
                        level_count: info.mip_levels,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .build(),
                None,
            )
        };
        let view = match view {
            Ok(view) => view,
            Err(err) => {
                unsafe { self.allocator.destroy_image(image, &mut allocation) };
                return Err(err.into());
            }
        };

        let uploaded_layout = if info.usage.contains(ImageUsage::SAMPLED) {
            Layout::ShaderReadOnly
        } else {
            layout_for_usage(info.usage)
        };
        let handle = image.as_raw();
        let memory = self.allocator.get_allocation_info(&allocation).device_memory;
        self.images.insert(
            handle,
            ImageAllocation {
                image,
                allocation,
                view,
                aspect,
                mip_levels: info.mip_levels,
                initial_layout: if info.initial_data.is_some() {
                    uploaded_layout
                } else {
                    Layout::Undefined
                },
            },
        );

        if let Some(data) = info.initial_data {
            if let Err(err) = self.upload_image(handle, info.dim, data, uploaded_layout) {
                if let Some(mut record) = self.images.remove(&handle) {
                    unsafe {
                        self.device.destroy_image_view(record.view, None);
                        self.allocator
                            .destroy_image(record.image, &mut record.allocation);
                    }
                }
                return Err(err);
            }
        }

        Ok(NativeObject::Vk {
            handle,
            memory: memory.as_raw(),
        })
    }

    fn create_shader(&mut self, info: &ShaderInfo) -> Result<NativeObject> {
        let words = match info.code {
            ShaderCode::Spirv(words) => words,
            ShaderCode::Glsl(_) => {
                log::error!(
                    "shader '{}': the explicit backend only consumes SPIR-V",
                    info.debug_name
                );
                return Err(GpuError::UnsupportedRequest);
            }
        };
        if words.is_empty() {
            log::error!("shader '{}' has no code", info.debug_name);
            return Err(GpuError::InvalidData);
        }

        let module = unsafe {
            self.device.create_shader_module(
                &vk::ShaderModuleCreateInfo::builder().code(words).build(),
                None,
            )
        }
        .map_err(|err| {
            log::error!("shader '{}' was rejected: {}", info.debug_name, err);
            GpuError::InvalidData
        })?;
        self.set_name(module, info.debug_name, vk::ObjectType::SHADER_MODULE);

        Ok(NativeObject::Vk {
            handle: module.as_raw(),
            memory: 0,
        })
    }

    fn create_sampler(&mut self, info: &SamplerInfo) -> Result<NativeObject> {
        let wrap = address_mode(info.address_mode);
        let sampler = unsafe {
            self.device.create_sampler(
                &vk::SamplerCreateInfo::builder()
                    .min_filter(filter(info.min_filter))
                    .mag_filter(filter(info.mag_filter))
                    .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
                    .address_mode_u(wrap)
                    .address_mode_v(wrap)
                    .address_mode_w(wrap)
                    .max_lod(vk::LOD_CLAMP_NONE)
                    .build(),
                None,
            )
        }?;
        Ok(NativeObject::Vk {
            handle: sampler.as_raw(),
            memory: 0,
        })
    }

    fn create_render_pass(&mut self, info: &RenderPassInfo) -> Result<NativeObject> {
        let mut attachments: SmallVec<[vk::AttachmentDescription; 5]> = SmallVec::new();
        let mut color_refs: SmallVec<[vk::AttachmentReference; 4]> = SmallVec::new();

        for attachment in info.color_attachments {
            color_refs.push(vk::AttachmentReference {
                attachment: attachments.len() as u32,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            });
            attachments.push(vk::AttachmentDescription {
                format: format(attachment.format),
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: load_op(attachment.load_op),
                store_op: store_op(attachment.store_op),
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                ..Default::default()
            });
        }

        let depth_ref = info.depth_stencil_attachment.map(|attachment| {
            let reference = vk::AttachmentReference {
                attachment: attachments.len() as u32,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            };
            let (stencil_load, stencil_store) = if attachment.format.has_stencil() {
                (load_op(attachment.load_op), store_op(attachment.store_op))
            } else {
                (
                    vk::AttachmentLoadOp::DONT_CARE,
                    vk::AttachmentStoreOp::DONT_CARE,
                )
            };
            attachments.push(vk::AttachmentDescription {
                format: format(attachment.format),
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: load_op(attachment.load_op),
                store_op: store_op(attachment.store_op),
                stencil_load_op: stencil_load,
                stencil_store_op: stencil_store,
                initial_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                ..Default::default()
            });
            reference
        });

        let subpass = match depth_ref.as_ref() {
            Some(depth) => vk::SubpassDescription::builder()
                .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                .color_attachments(&color_refs)
                .depth_stencil_attachment(depth)
                .build(),
            None => vk::SubpassDescription::builder()
                .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                .color_attachments(&color_refs)
                .build(),
        };

        let render_pass = unsafe {
            self.device.create_render_pass(
                &vk::RenderPassCreateInfo::builder()
                    .attachments(&attachments)
                    .subpasses(&[subpass])
                    .build(),
                None,
            )
        }?;
        self.set_name(render_pass, info.debug_name, vk::ObjectType::RENDER_PASS);

        Ok(NativeObject::Vk {
            handle: render_pass.as_raw(),
            memory: 0,
        })
    }

    fn create_framebuffer(
        &mut self,
        _t: &mut Tracker,
        info: &FramebufferInfo,
    ) -> Result<NativeObject> {
        let mut views: SmallVec<[vk::ImageView; 5]> = SmallVec::new();
        for image in info
            .color_attachments
            .iter()
            .chain(info.depth_stencil_attachment)
        {
            if image.desc().dim[2] > 1 {
                log::error!(
                    "framebuffer '{}': 3D image '{}' cannot be an attachment",
                    info.debug_name,
                    image.desc().debug_name
                );
                return Err(GpuError::UnsupportedRequest);
            }
            let view = self
                .images
                .get(&image.raw().vk_handle())
                .map(|i| i.view)
                .ok_or(GpuError::InvalidArgument)?;
            views.push(view);
        }

        let framebuffer = unsafe {
            self.device.create_framebuffer(
                &vk::FramebufferCreateInfo::builder()
                    .render_pass(vk::RenderPass::from_raw(info.render_pass.raw().vk_handle()))
                    .attachments(&views)
                    .width(info.extent[0])
                    .height(info.extent[1])
                    .layers(1)
                    .build(),
                None,
            )
        }?;
        self.set_name(framebuffer, info.debug_name, vk::ObjectType::FRAMEBUFFER);

        Ok(NativeObject::Vk {
            handle: framebuffer.as_raw(),
            memory: 0,
        })
    }

    fn create_pipeline_layout(&mut self, info: &PipelineLayoutInfo) -> Result<NativeObject> {
        if info.push_constant_bytes > self.properties.limits.max_push_constants_size {
            log::error!(
                "layout '{}' wants {} push constant bytes, the device allows {}",
                info.debug_name,
                info.push_constant_bytes,
                self.properties.limits.max_push_constants_size
            );
            return Err(GpuError::UnsupportedRequest);
        }

        let mut set_layouts = Vec::with_capacity(info.sets.len());
        for set in info.sets {
            let bindings: SmallVec<[vk::DescriptorSetLayoutBinding; 8]> = set
                .iter()
                .map(|b| {
                    vk::DescriptorSetLayoutBinding::builder()
                        .binding(b.binding)
                        .descriptor_type(descriptor_type(b.ty))
                        .descriptor_count(b.count.max(1))
                        .stage_flags(shader_stage_flags(b.stages))
                        .build()
                })
                .collect();
            let created = unsafe {
                self.device.create_descriptor_set_layout(
                    &vk::DescriptorSetLayoutCreateInfo::builder()
                        .bindings(&bindings)
                        .build(),
                    None,
                )
            };
            match created {
                Ok(layout) => set_layouts.push(layout),
                Err(err) => {
                    for layout in set_layouts {
                        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
                    }
                    return Err(err.into());
                }
            }
        }

        let ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::ALL,
            offset: 0,
            size: info.push_constant_bytes,
        }];
        let ranges: &[vk::PushConstantRange] = if info.push_constant_bytes > 0 {
            &ranges
        } else {
            &[]
        };

        let created = unsafe {
            self.device.create_pipeline_layout(
                &vk::PipelineLayoutCreateInfo::builder()
                    .set_layouts(&set_layouts)
                    .push_constant_ranges(ranges)
                    .build(),
                None,
            )
        };
        let layout = match created {
            Ok(layout) => layout,
            Err(err) => {
                for layout in set_layouts {
                    unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
                }
                return Err(err.into());
            }
        };
        self.set_name(layout, info.debug_name, vk::ObjectType::PIPELINE_LAYOUT);

        self.layouts.insert(
            layout.as_raw(),
            LayoutRecord {
                layout,
                set_layouts,
                push_constant_bytes: info.push_constant_bytes,
            },
        );
        Ok(NativeObject::Vk {
            handle: layout.as_raw(),
            memory: 0,
        })
    }

    fn create_descriptor_set(&mut self, info: &DescriptorSetInfo) -> Result<NativeObject> {
        let set_layout = self
            .layouts
            .get(&info.layout.raw().vk_handle())
            .and_then(|record| record.set_layouts.get(info.set as usize))
            .copied()
            .ok_or(GpuError::InvalidArgument)?;

        let sets = unsafe {
            self.device.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::builder()
                    .descriptor_pool(self.descriptor_pool)
                    .set_layouts(&[set_layout])
                    .build(),
            )
        }
        .map_err(|err| {
            log::error!("descriptor set '{}' could not be allocated", info.debug_name);
            GpuError::from(err)
        })?;
        let set = sets[0];

        if let Err(err) = self.write_descriptors(set, info.writes) {
            unsafe {
                let _ = self
                    .device
                    .free_descriptor_sets(self.descriptor_pool, &[set]);
            }
            return Err(err);
        }
        self.set_name(set, info.debug_name, vk::ObjectType::DESCRIPTOR_SET);

        Ok(NativeObject::Vk {
            handle: set.as_raw(),
            memory: 0,
        })
    }

    fn create_fence(&mut self, signaled: bool) -> Result<NativeObject> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence = unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::builder().flags(flags).build(), None)
        }?;
        Ok(NativeObject::Vk {
            handle: fence.as_raw(),
            memory: 0,
        })
    }

    fn create_semaphore(&mut self) -> Result<NativeObject> {
        let semaphore = unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::builder().build(), None)
        }?;
        Ok(NativeObject::Vk {
            handle: semaphore.as_raw(),
            memory: 0,
        })
    }

    fn link_program(&mut self, _stages: &[Shader]) -> Result<NativeObject> {
        Ok(NativeObject::Null)
    }

    fn create_graphics_pipeline(&mut self, pipeline: &GraphicsPipeline) -> Result<NativeObject> {
        let info = pipeline.info();
        let Some(layout) = info.layout.as_ref() else {
            log::error!("pipeline '{}' has no layout", info.debug_name);
            return Err(GpuError::NotInitialised);
        };
        let Some(render_pass) = info.render_pass.as_ref() else {
            log::error!("pipeline '{}' has no render pass", info.debug_name);
            return Err(GpuError::NotInitialised);
        };
        layout.ensure_valid()?;
        render_pass.ensure_valid()?;

        let mut stages: SmallVec<[vk::PipelineShaderStageCreateInfo; 5]> = SmallVec::new();
        for shader in info.shader_stages.iter() {
            shader.ensure_valid()?;
            stages.push(
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(shader_stage(shader.desc().stage))
                    .module(vk::ShaderModule::from_raw(shader.raw().vk_handle()))
                    .name(entry_point())
                    .build(),
            );
        }

        let bindings: SmallVec<[vk::VertexInputBindingDescription; 4]> = info
            .vertex_input
            .bindings
            .iter()
            .map(|b| vk::VertexInputBindingDescription {
                binding: b.binding,
                stride: b.stride,
                input_rate: vertex_rate(b.rate),
            })
            .collect();
        let attributes: SmallVec<[vk::VertexInputAttributeDescription; 8]> = info
            .vertex_input
            .attributes
            .iter()
            .map(|a| vk::VertexInputAttributeDescription {
                location: a.location,
                binding: a.binding,
                format: vertex_format(a.format),
                offset: a.offset,
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes)
            .build();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(topology(info.input_assembly.topology))
            .primitive_restart_enable(false)
            .build();

        let tessellation = info.tessellation.map(|t| {
            vk::PipelineTessellationStateCreateInfo::builder()
                .patch_control_points(t.patch_control_points)
                .build()
        });

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1)
            .build();

        let ds = &info.depth_stencil;
        let mut depth_bias = ds.depth_bias;
        if depth_bias.clamp != 0.0 && self.features.depth_bias_clamp != vk::TRUE {
            log::warn!(
                "pipeline '{}': depth bias clamp is not supported and ignored",
                info.debug_name
            );
            depth_bias.clamp = 0.0;
        }
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(cull_mode(info.rasterizer.cull_mode))
            .front_face(front_face(info.rasterizer.front_face))
            .depth_bias_enable(depth_bias.enable)
            .depth_bias_constant_factor(depth_bias.constant_factor)
            .depth_bias_slope_factor(depth_bias.slope_factor)
            .depth_bias_clamp(depth_bias.clamp)
            .line_width(1.0)
            .build();

        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .build();

        let stencil_face_state = |face: &super::pipeline::StencilFaceState| vk::StencilOpState {
            fail_op: stencil_op(face.fail_op),
            pass_op: stencil_op(face.pass_op),
            depth_fail_op: stencil_op(face.depth_fail_op),
            compare_op: compare_op(face.compare_op),
            compare_mask: face.compare_mask,
            write_mask: face.write_mask,
            reference: face.reference,
        };
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(ds.depth_test)
            .depth_write_enable(ds.depth_write)
            .depth_compare_op(compare_op(ds.depth_compare))
            .stencil_test_enable(ds.stencil_test)
            .front(stencil_face_state(&ds.front))
            .back(stencil_face_state(&ds.back))
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0)
            .build();

        // One blend state per color attachment of the render pass; missing
        // ones repeat the last given state.
        let color_count = render_pass.desc().color_attachments.len();
        let given = &info.color_blend.attachments;
        let blend_attachments: SmallVec<[vk::PipelineColorBlendAttachmentState; 4]> = (0
            ..color_count)
            .map(|i| {
                let a = given.get(i).or(given.last()).copied().unwrap_or_default();
                vk::PipelineColorBlendAttachmentState {
                    blend_enable: a.blend_enable.into(),
                    src_color_blend_factor: blend_factor(a.src_color_factor),
                    dst_color_blend_factor: blend_factor(a.dst_color_factor),
                    color_blend_op: blend_op(a.color_op),
                    src_alpha_blend_factor: blend_factor(a.src_alpha_factor),
                    dst_alpha_blend_factor: blend_factor(a.dst_alpha_factor),
                    alpha_blend_op: blend_op(a.alpha_op),
                    color_write_mask: color_write_mask(a.write_mask),
                }
            })
            .collect();
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .attachments(&blend_attachments)
            .build();

        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder()
            .dynamic_states(&DYNAMIC_STATES)
            .build();

        let mut builder = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(vk::PipelineLayout::from_raw(layout.raw().vk_handle()))
            .render_pass(vk::RenderPass::from_raw(render_pass.raw().vk_handle()))
            .subpass(info.subpass);
        if let Some(tessellation) = tessellation.as_ref() {
            builder = builder.tessellation_state(tessellation);
        }

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[builder.build()], None)
        }
        .map_err(|(_, err)| {
            log::error!("pipeline '{}' could not be built: {}", info.debug_name, err);
            GpuError::from(err)
        })?;
        let raw = pipelines[0];
        self.set_name(raw, &info.debug_name, vk::ObjectType::PIPELINE);

        self.pipelines.insert(
            raw.as_raw(),
            PipelineRecord {
                layout: vk::PipelineLayout::from_raw(layout.raw().vk_handle()),
                dynamic: Some(DynamicDefaults {
                    depth_bias,
                    stencil_func: [ds.front, ds.back].map(|face| StencilFunc {
                        compare: face.compare_op,
                        reference: face.reference,
                        read_mask: face.compare_mask,
                    }),
                    stencil_write_mask: [ds.front.write_mask, ds.back.write_mask],
                }),
            },
        );
        log::debug!("built native pipeline for '{}'", info.debug_name);

        Ok(NativeObject::Vk {
            handle: raw.as_raw(),
            memory: 0,
        })
    }

    fn create_compute_pipeline(
        &mut self,
        info: &ComputePipelineInfo,
        program: &Program,
    ) -> Result<NativeObject> {
        let Some(shader) = info.shader.as_ref().or(program.desc().stages.first()) else {
            log::error!("compute pipeline '{}' has no shader", info.debug_name);
            return Err(GpuError::InvalidData);
        };
        let Some(layout) = info.layout.as_ref() else {
            log::error!("compute pipeline '{}' has no layout", info.debug_name);
            return Err(GpuError::NotInitialised);
        };
        shader.ensure_valid()?;
        layout.ensure_valid()?;

        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(vk::ShaderModule::from_raw(shader.raw().vk_handle()))
            .name(entry_point())
            .build();
        let layout = vk::PipelineLayout::from_raw(layout.raw().vk_handle());

        let pipelines = unsafe {
            self.device.create_compute_pipelines(
                vk::PipelineCache::null(),
                &[vk::ComputePipelineCreateInfo::builder()
                    .stage(stage)
                    .layout(layout)
                    .build()],
                None,
            )
        }
        .map_err(|(_, err)| {
            log::error!(
                "compute pipeline '{}' could not be built: {}",
                info.debug_name,
                err
            );
            GpuError::from(err)
        })?;
        let raw = pipelines[0];
        self.set_name(raw, &info.debug_name, vk::ObjectType::PIPELINE);

        self.pipelines.insert(
            raw.as_raw(),
            PipelineRecord {
                layout,
                dynamic: None,
            },
        );
        Ok(NativeObject::Vk {
            handle: raw.as_raw(),
            memory: 0,
        })
    }

    fn release(&mut self, t: &mut Tracker, release: &PendingRelease) {
        if release.kind == ResourceKind::Pipeline
            && t.pipeline_object.get() == Some(&Some(release.id))
        {
            t.pipeline_object.invalidate();
        }

        if let Err(err) = self.retire_completed() {
            log::warn!("unable to poll submissions: {}", err);
        }
        if self.in_flight.is_empty() {
            self.destroy_now(release);
        } else {
            self.deferred.push(*release);
        }
    }

    fn map_buffer(&mut self, buffer: &Buffer) -> Result<*mut u8> {
        let record = self
            .buffers
            .get_mut(&buffer.raw().vk_handle())
            .ok_or(GpuError::InvalidArgument)?;
        if !record.location.is_host_visible() {
            return Err(GpuError::UnsupportedRequest);
        }
        let ptr = unsafe { self.allocator.map_memory(&mut record.allocation) }?;
        Ok(ptr)
    }

    fn unmap_buffer(&mut self, buffer: &Buffer) -> Result<()> {
        let record = self
            .buffers
            .get_mut(&buffer.raw().vk_handle())
            .ok_or(GpuError::InvalidArgument)?;
        let flushed = self
            .allocator
            .flush_allocation(&record.allocation, 0, record.size as usize);
        unsafe { self.allocator.unmap_memory(&mut record.allocation) };
        flushed?;
        Ok(())
    }

    /// Only viewport and scissor are dynamic; everything else is baked into
    /// the pipeline object.
    fn apply_fragment(&mut self, t: &mut Tracker, value: &FragmentValue) {
        let Some(rec) = self.recording else {
            log::warn!("{:?} applied outside of a submission", value.kind());
            return;
        };
        match value {
            FragmentValue::Viewport(v) => set_viewport(&self.device, rec.cmd, t, *v),
            FragmentValue::Scissor(r) => set_scissor(&self.device, rec.cmd, t, *r),
            _ => {}
        }
    }

    fn bind_pipeline_object(
        &mut self,
        t: &mut Tracker,
        bind_point: PipelineBindPoint,
        pipeline: &PipelineObject,
    ) -> Result<()> {
        let mut rec = self.recording()?;
        pipeline.ensure_valid()?;
        let raw = pipeline.raw().vk_handle();
        let record = *self.pipelines.get(&raw).ok_or(GpuError::InvalidArgument)?;

        let device = &self.device;
        let point = conversions::bind_point(bind_point);
        t.pipeline_object.update(Some(pipeline.id()), |_| unsafe {
            device.cmd_bind_pipeline(rec.cmd, point, vk::Pipeline::from_raw(raw))
        });
        if let Some(defaults) = record.dynamic.as_ref() {
            apply_dynamic_defaults(device, rec.cmd, t, defaults);
        }

        rec.layouts[bind_point_index(bind_point)] = record.layout;
        self.recording = Some(rec);
        Ok(())
    }

    fn begin_submission(&mut self, t: &mut Tracker) -> Result<()> {
        if self.recording.is_some() {
            log::error!("a submission is already being recorded");
            return Err(GpuError::AlreadyInitialised);
        }
        self.retire_completed()?;

        let cmd = self.pool.begin()?;
        t.invalidate();
        self.recording = Some(Recording {
            cmd,
            render_area: None,
            layouts: [vk::PipelineLayout::null(); 2],
        });
        Ok(())
    }

    fn execute(&mut self, t: &mut Tracker, cmd: &Command) -> Result<()> {
        let rec = self.recording()?;
        let c = rec.cmd;

        match cmd {
            Command::BindVertexBuffers {
                first_binding,
                buffers,
            } => {
                let mut raw: SmallVec<[vk::Buffer; 4]> = SmallVec::new();
                let mut offsets: SmallVec<[u64; 4]> = SmallVec::new();
                for (i, (buffer, offset)) in buffers.iter().enumerate() {
                    t.set_vertex_buffer(
                        first_binding + i as u32,
                        BufferBinding {
                            id: buffer.id(),
                            raw: buffer.raw(),
                            offset: *offset,
                            range: buffer.desc().byte_size.saturating_sub(*offset),
                        },
                    );
                    raw.push(vk::Buffer::from_raw(buffer.raw().vk_handle()));
                    offsets.push(*offset);
                }
                unsafe {
                    self.device
                        .cmd_bind_vertex_buffers(c, *first_binding, &raw, &offsets)
                };
            }
            Command::BindIndexBuffer {
                buffer,
                offset,
                index_type: ty,
            } => {
                let device = &self.device;
                let raw = vk::Buffer::from_raw(buffer.raw().vk_handle());
                t.index_buffer.update(
                    Some(IndexBinding {
                        id: buffer.id(),
                        raw: buffer.raw(),
                        offset: *offset,
                        index_type: *ty,
                    }),
                    |_| unsafe { device.cmd_bind_index_buffer(c, raw, *offset, index_type(*ty)) },
                );
            }
            Command::BindDescriptorSets {
                bind_point: point,
                first_set,
                sets,
            } => {
                let Some(first) = sets.first() else {
                    return Ok(());
                };
                let layout = self
                    .layouts
                    .get(&first.desc().layout.raw().vk_handle())
                    .map(|record| record.layout)
                    .ok_or(GpuError::InvalidArgument)?;
                let raw: SmallVec<[vk::DescriptorSet; 4]> = sets
                    .iter()
                    .map(|s| vk::DescriptorSet::from_raw(s.raw().vk_handle()))
                    .collect();
                unsafe {
                    self.device.cmd_bind_descriptor_sets(
                        c,
                        conversions::bind_point(*point),
                        layout,
                        *first_set,
                        &raw,
                        &[],
                    )
                };
            }
            Command::Draw(args) => unsafe {
                self.device.cmd_draw(
                    c,
                    args.vertex_count,
                    args.instance_count,
                    args.first_vertex,
                    args.first_instance,
                )
            },
            Command::DrawIndexed(args) => {
                if t.index_buffer.get().copied().flatten().is_none() {
                    log::error!("indexed draw without an index buffer");
                    return Err(GpuError::NotInitialised);
                }
                unsafe {
                    self.device.cmd_draw_indexed(
                        c,
                        args.index_count,
                        args.instance_count,
                        args.first_index,
                        args.vertex_offset,
                        args.first_instance,
                    )
                };
            }
            Command::Dispatch(args) => unsafe {
                self.device.cmd_dispatch(c, args.x, args.y, args.z)
            },
            Command::BeginRenderPass(begin) => self.begin_render_pass(t, rec, begin)?,
            Command::EndRenderPass => {
                if rec.render_area.is_none() {
                    log::error!("end of a render pass that never began");
                    return Err(GpuError::NotInitialised);
                }
                unsafe { self.device.cmd_end_render_pass(c) };
                self.recording = Some(Recording {
                    render_area: None,
                    ..rec
                });
            }
            Command::ClearColorAttachment {
                attachment,
                color,
                area,
            } => {
                let Some(render_area) = rec.render_area else {
                    log::error!("attachment clear outside of a render pass");
                    return Err(GpuError::NotInitialised);
                };
                unsafe {
                    self.device.cmd_clear_attachments(
                        c,
                        &[vk::ClearAttachment {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            color_attachment: *attachment,
                            clear_value: clear_value(&ClearValue::Color(*color)),
                        }],
                        &[vk::ClearRect {
                            rect: area.as_ref().map(rect).unwrap_or(render_area),
                            base_array_layer: 0,
                            layer_count: 1,
                        }],
                    )
                };
            }
            Command::ClearDepthStencilAttachment {
                depth,
                stencil,
                area,
            } => {
                let Some(render_area) = rec.render_area else {
                    log::error!("attachment clear outside of a render pass");
                    return Err(GpuError::NotInitialised);
                };
                let mut aspect = vk::ImageAspectFlags::empty();
                if depth.is_some() {
                    aspect |= vk::ImageAspectFlags::DEPTH;
                }
                if stencil.is_some() {
                    aspect |= vk::ImageAspectFlags::STENCIL;
                }
                if aspect.is_empty() {
                    return Ok(());
                }
                let value = ClearValue::DepthStencil {
                    depth: depth.unwrap_or(1.0),
                    stencil: stencil.unwrap_or(0),
                };
                unsafe {
                    self.device.cmd_clear_attachments(
                        c,
                        &[vk::ClearAttachment {
                            aspect_mask: aspect,
                            color_attachment: 0,
                            clear_value: clear_value(&value),
                        }],
                        &[vk::ClearRect {
                            rect: area.as_ref().map(rect).unwrap_or(render_area),
                            base_array_layer: 0,
                            layer_count: 1,
                        }],
                    )
                };
            }
            Command::PipelineBarrier(barrier) => self.pipeline_barrier(rec, barrier)?,
            Command::PushUniform {
                location,
                stages,
                value,
            } => self.push_constants(rec, *location, *stages, value)?,
            Command::SetViewport(v) => {
                set_viewport(&self.device, c, t, *v);
                t.dirty.insert(FragmentKind::Viewport);
            }
            Command::SetScissor(r) => {
                set_scissor(&self.device, c, t, *r);
                t.dirty.insert(FragmentKind::Scissor);
            }
            Command::SetBlendConstants(color) => {
                let device = &self.device;
                t.blend_constants
                    .update(*color, |c2| unsafe { device.cmd_set_blend_constants(c, c2) });
            }
            Command::SetLineWidth(width) => {
                if *width != 1.0 && self.features.wide_lines != vk::TRUE {
                    log::warn!("line width {} needs wide line support; ignored", width);
                    return Ok(());
                }
                let device = &self.device;
                t.line_width
                    .update(*width, |w| unsafe { device.cmd_set_line_width(c, *w) });
            }
            Command::SetStencilReference { face, reference } => {
                for i in Tracker::stencil_faces(*face) {
                    let mut func = t.stencil_func[i].get().copied().unwrap_or_default();
                    func.reference = *reference;
                    set_stencil_func(&self.device, c, t, i, func);
                }
            }
            Command::SetStencilCompareMask { face, mask } => {
                for i in Tracker::stencil_faces(*face) {
                    let mut func = t.stencil_func[i].get().copied().unwrap_or_default();
                    func.read_mask = *mask;
                    set_stencil_func(&self.device, c, t, i, func);
                }
            }
            Command::SetStencilWriteMask { face, mask } => {
                let device = &self.device;
                for i in Tracker::stencil_faces(*face) {
                    let flags = stencil_face(i);
                    t.stencil_write_mask[i].update(*mask, |m| unsafe {
                        device.cmd_set_stencil_write_mask(c, flags, *m)
                    });
                }
            }
            Command::SetDepthBias {
                constant_factor,
                slope_factor,
                clamp,
            } => {
                let mut bias = t.depth_bias.get().copied().unwrap_or_default();
                bias.constant_factor = *constant_factor;
                bias.slope_factor = *slope_factor;
                bias.clamp = if self.features.depth_bias_clamp == vk::TRUE {
                    *clamp
                } else {
                    if *clamp != 0.0 {
                        log::warn!("depth bias clamp {} is not supported; ignored", clamp);
                    }
                    0.0
                };
                set_depth_bias(&self.device, c, t, bias);
                t.dirty.insert(FragmentKind::DepthBias);
            }
            Command::UpdateBuffer {
                buffer,
                offset,
                data,
            } => {
                if rec.render_area.is_some() {
                    log::error!("buffer update inside a render pass");
                    return Err(GpuError::InvalidArgument);
                }
                if offset % 4 != 0 || data.len() % 4 != 0 {
                    log::error!(
                        "buffer update of {} bytes at {} is not 4-byte aligned",
                        data.len(),
                        offset
                    );
                    return Err(GpuError::InvalidArgument);
                }
                unsafe {
                    self.device.cmd_update_buffer(
                        c,
                        vk::Buffer::from_raw(buffer.raw().vk_handle()),
                        *offset,
                        data,
                    )
                };
            }
            Command::BindPipeline(_)
            | Command::BindComputePipeline(_)
            | Command::PushPipeline
            | Command::PopPipeline
            | Command::ResetPipeline
            | Command::ExecuteSecondary(_) => {
                log::warn!("{} reached the backend; it is run by the context", cmd.name());
            }
        }
        Ok(())
    }

    fn end_submission(&mut self, _t: &mut Tracker, submit: &SubmitInfo) -> Result<()> {
        let Some(rec) = self.recording.take() else {
            return Err(GpuError::NotInitialised);
        };
        if rec.render_area.is_some() {
            log::warn!("submission ended inside a render pass; closing it");
            unsafe { self.device.cmd_end_render_pass(rec.cmd) };
        }
        if let Err(err) = unsafe { self.device.end_command_buffer(rec.cmd) } {
            self.pool.recycle(rec.cmd);
            return Err(err.into());
        }

        let waits: SmallVec<[vk::Semaphore; 4]> = submit
            .wait_semaphores
            .iter()
            .map(|s| vk::Semaphore::from_raw(s.raw().vk_handle()))
            .collect();
        let signals: SmallVec<[vk::Semaphore; 4]> = submit
            .signal_semaphores
            .iter()
            .map(|s| vk::Semaphore::from_raw(s.raw().vk_handle()))
            .collect();
        let stage_masks: SmallVec<[vk::PipelineStageFlags; 4]> =
            waits.iter().map(|_| vk::PipelineStageFlags::ALL_COMMANDS).collect();

        let (fence, owned) = match submit.fence {
            Some(fence) => {
                let raw = vk::Fence::from_raw(fence.raw().vk_handle());
                // Submitting needs an unsignaled fence; whatever it guarded
                // was retired when this submission began.
                if unsafe { self.device.get_fence_status(raw) }? {
                    unsafe { self.device.reset_fences(&[raw]) }?;
                }
                (raw, false)
            }
            None => {
                let raw = unsafe {
                    self.device
                        .create_fence(&vk::FenceCreateInfo::builder().build(), None)
                }?;
                (raw, true)
            }
        };

        let submitted = unsafe {
            self.device.queue_submit(
                self.queue.raw,
                &[vk::SubmitInfo::builder()
                    .command_buffers(&[rec.cmd])
                    .wait_semaphores(&waits)
                    .wait_dst_stage_mask(&stage_masks)
                    .signal_semaphores(&signals)
                    .build()],
                fence,
            )
        };
        if let Err(err) = submitted {
            self.retire(InFlight {
                cmd: rec.cmd,
                fence,
                owned,
            });
            return Err(err.into());
        }

        self.in_flight.push(InFlight {
            cmd: rec.cmd,
            fence,
            owned,
        });
        Ok(())
    }

    fn wait_fence(&mut self, fence: &Fence, timeout_ns: u64) -> Result<()> {
        let raw = vk::Fence::from_raw(fence.raw().vk_handle());
        unsafe { self.device.wait_for_fences(&[raw], true, timeout_ns) }.map_err(|err| {
            if err == vk::Result::TIMEOUT {
                log::error!("fence wait timed out after {} ns", timeout_ns);
                GpuError::UnknownError
            } else {
                GpuError::from(err)
            }
        })?;
        self.retire_completed()
    }

    fn fence_status(&mut self, fence: &Fence) -> Result<bool> {
        let raw = vk::Fence::from_raw(fence.raw().vk_handle());
        let signaled = unsafe { self.device.get_fence_status(raw) }?;
        if signaled {
            self.retire_completed()?;
        }
        Ok(signaled)
    }

    fn reset_fence(&mut self, fence: &Fence) -> Result<()> {
        // Retire first so the submissions it guarded are not lost track of.
        self.retire_completed()?;
        let raw = vk::Fence::from_raw(fence.raw().vk_handle());
        unsafe { self.device.reset_fences(&[raw]) }?;
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        self.retire_completed()
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                log::warn!("device lost while shutting down: {}", err);
            }
        }

        for done in std::mem::take(&mut self.in_flight) {
            self.retire(done);
        }
        for release in std::mem::take(&mut self.deferred) {
            self.destroy_now(&release);
        }

        unsafe {
            for (_, mut buffer) in self.buffers.drain() {
                self.allocator
                    .destroy_buffer(buffer.buffer, &mut buffer.allocation);
            }
            for (_, mut image) in self.images.drain() {
                self.device.destroy_image_view(image.view, None);
                self.allocator.destroy_image(image.image, &mut image.allocation);
            }
            for (raw, _) in self.pipelines.drain() {
                self.device
                    .destroy_pipeline(vk::Pipeline::from_raw(raw), None);
            }
            for (_, record) in self.layouts.drain() {
                for set_layout in record.set_layouts {
                    self.device.destroy_descriptor_set_layout(set_layout, None);
                }
                self.device.destroy_pipeline_layout(record.layout, None);
            }

            self.device
                .destroy_descriptor_pool(self.descriptor_pool, None);
            self.pool.destroy();

            if let (Some(utils), Some(messenger)) =
                (self.debug_utils.as_ref(), self.debug_messenger.take())
            {
                utils.destroy_debug_utils_messenger(messenger, None);
            }

            // The allocator has to go before the device it allocates from.
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::cmd::{CommandBuffer, CommandRecorder};
    use crate::gpu::context::Context;
    use serial_test::serial;

    fn context() -> Context {
        Context::headless(&ContextInfo {
            debug_name: "vulkan-tests".to_string(),
            ..Default::default()
        })
        .expect("a Vulkan device")
    }

    #[test]
    fn entry_point_is_main() {
        assert_eq!(entry_point().to_str(), Ok("main"));
    }

    #[test]
    fn every_pipeline_takes_viewport_and_scissor_dynamically() {
        assert!(DYNAMIC_STATES.contains(&vk::DynamicState::VIEWPORT));
        assert!(DYNAMIC_STATES.contains(&vk::DynamicState::SCISSOR));
        assert!(DYNAMIC_STATES.contains(&vk::DynamicState::STENCIL_REFERENCE));
    }

    #[test]
    #[ignore = "needs a Vulkan device"]
    #[serial]
    fn headless_reports_an_explicit_backend() {
        let ctx = context();
        assert_eq!(ctx.backend_kind(), BackendKind::Explicit);
        assert!(ctx.capabilities().max_vertex_attributes >= 16);
    }

    #[test]
    #[ignore = "needs a Vulkan device"]
    #[serial]
    fn host_visible_buffers_map_their_initial_data() {
        let mut ctx = context();
        let data: Vec<u8> = (0..64).collect();
        let buffer = ctx
            .create_buffer(&BufferInfo {
                debug_name: "mapped",
                byte_size: 64,
                visibility: MemoryVisibility::CpuAndGpu,
                usage: BufferUsage::UNIFORM,
                initial_data: Some(&data),
            })
            .unwrap();

        {
            let mapped: &mut [u8] = ctx.map_buffer(&buffer).unwrap();
            assert_eq!(mapped, &data[..]);
        }
        assert_eq!(
            ctx.map_buffer::<u8>(&buffer).err(),
            Some(GpuError::InvalidArgument)
        );
        ctx.unmap_buffer(&buffer).unwrap();
        assert_eq!(ctx.unmap_buffer(&buffer), Err(GpuError::InvalidArgument));
    }

    #[test]
    #[ignore = "needs a Vulkan device"]
    #[serial]
    fn device_local_buffers_refuse_mapping() {
        let mut ctx = context();
        let buffer = ctx
            .create_buffer(&BufferInfo {
                debug_name: "device-local",
                byte_size: 256,
                visibility: MemoryVisibility::Gpu,
                usage: BufferUsage::VERTEX,
                initial_data: Some(&[7u8; 256]),
            })
            .unwrap();
        assert_eq!(
            ctx.map_buffer::<u8>(&buffer).err(),
            Some(GpuError::UnsupportedRequest)
        );
    }

    #[test]
    #[ignore = "needs a Vulkan device"]
    #[serial]
    fn barriers_follow_the_layout_state_machine() {
        let mut ctx = context();
        let image = ctx
            .create_image(&ImageInfo {
                debug_name: "barriers",
                dim: [16, 16, 1],
                usage: ImageUsage::SAMPLED | ImageUsage::TRANSFER_SRC | ImageUsage::TRANSFER_DST,
                ..Default::default()
            })
            .unwrap();
        let fence = ctx.create_fence(false).unwrap();

        let mut cmd = CommandBuffer::primary("barriers");
        cmd.begin().unwrap();
        cmd.pipeline_barrier(&[(&image, Layout::TransferSrc)], false)
            .unwrap();
        cmd.pipeline_barrier(&[(&image, Layout::ShaderReadOnly)], true)
            .unwrap();
        cmd.end().unwrap();

        ctx.submit(
            &mut cmd,
            &SubmitInfo {
                fence: Some(&fence),
                ..Default::default()
            },
        )
        .unwrap();
        ctx.wait_fence(&fence, u64::MAX).unwrap();
        assert!(ctx.fence_status(&fence).unwrap());
    }

    #[test]
    #[ignore = "needs a Vulkan device"]
    #[serial]
    fn sampled_images_cannot_become_attachments() {
        let mut ctx = context();
        let image = ctx
            .create_image(&ImageInfo {
                debug_name: "sampled-only",
                dim: [8, 8, 1],
                usage: ImageUsage::SAMPLED,
                ..Default::default()
            })
            .unwrap();

        let mut cmd = CommandBuffer::primary("bad-barrier");
        cmd.begin().unwrap();
        cmd.pipeline_barrier(&[(&image, Layout::ColorAttachment)], false)
            .unwrap();
        cmd.end().unwrap();
        assert_eq!(
            ctx.submit(&mut cmd, &SubmitInfo::default()),
            Err(GpuError::InvalidArgument)
        );
        ctx.wait_idle().unwrap();
    }
}
