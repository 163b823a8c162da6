// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! In-memory backend.
//!
//! Implements every backing trait without a GPU. Each call is appended to a
//! shared call log and every live object holds a token counted per
//! [`ObjectKind`], so tests can assert both what reached the backend and
//! whether anything leaked. Asynchronous pipeline creation (render and
//! compute alike) is parked until
//! [`SoftwareBackend::flush_pending_pipelines`] runs, or dropped uncalled
//! when its device is destroyed.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{
    Backend, BindGroup, BindGroupLayout, Buffer, BufferDynamicOffset, Color, CommandBuffer,
    CommandEncoder, ComputePipeline, ComputePipelineCompletion, Device, Extent3d, GpuError,
    GpuResult, IndexFormat, IntegerCoordinate, ObjectKind, PipelineCompletion, PipelineLayout,
    QuerySet, QueryType, RenderPassEncoder, RenderPipeline, Sampler, ShaderModule,
    SignedOffset32, Size32, Size64, StencilValue, Texture, TextureFormat, TextureView,
    VideoFrame,
};
use crate::core::descriptors::{
    BindGroupLayoutDescriptor, BufferDescriptor, CommandBufferDescriptor,
    CommandEncoderDescriptor, DeviceDescriptor, QuerySetDescriptor, ResolvedBindGroupDescriptor,
    ResolvedComputePipelineDescriptor, ResolvedPipelineLayoutDescriptor,
    ResolvedRenderPassDescriptor, ResolvedRenderPipelineDescriptor, SamplerDescriptor,
    ShaderModuleDescriptor, TextureDescriptor, TextureViewDescriptor,
};
use crate::core::video_frame::{FrameSize, MediaTime, PixelBuffer, PixelFormat, VideoRotation};

/// Largest buffer the software device will allocate.
pub const MAX_BUFFER_SIZE: u64 = 1 << 30;

/// Most queries a single query set may hold.
pub const MAX_QUERY_COUNT: u32 = 4096;

#[derive(Default)]
struct SoftwareState {
    calls: Mutex<Vec<String>>,
    live: Mutex<HashMap<ObjectKind, usize>>,
    devices: Mutex<Vec<Weak<SoftwareDevice>>>,
}

impl SoftwareState {
    fn record(&self, call: String) {
        tracing::trace!("[SoftwareBackend] {}", call);
        self.calls.lock().push(call);
    }
}

/// Counts one live object of `kind` for as long as it exists.
struct LiveToken {
    state: Arc<SoftwareState>,
    kind: ObjectKind,
}

impl LiveToken {
    fn new(state: &Arc<SoftwareState>, kind: ObjectKind) -> Self {
        *state.live.lock().entry(kind).or_insert(0) += 1;
        Self {
            state: Arc::clone(state),
            kind,
        }
    }
}

impl Drop for LiveToken {
    fn drop(&mut self) {
        let mut live = self.state.live.lock();
        if let Some(count) = live.get_mut(&self.kind) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Fields every software object carries.
struct Common {
    token: LiveToken,
    label: Mutex<String>,
}

impl Common {
    fn new(state: &Arc<SoftwareState>, kind: ObjectKind, label: Option<&str>) -> Self {
        Self {
            token: LiveToken::new(state, kind),
            label: Mutex::new(label.unwrap_or_default().to_owned()),
        }
    }

    fn state(&self) -> &Arc<SoftwareState> {
        &self.token.state
    }

    fn record(&self, operation: String) {
        self.token
            .state
            .record(format!("{}.{}", self.token.kind, operation));
    }

    fn set_label(&self, label: &str) {
        *self.label.lock() = label.to_owned();
        self.record(format!("set_label({})", label));
    }
}

impl fmt::Debug for Common {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Common")
            .field("kind", &self.token.kind)
            .field("label", &*self.label.lock())
            .finish()
    }
}

// ============================================================================
// Backend
// ============================================================================

/// Handle to the shared software state. Clones observe the same call log.
#[derive(Clone, Default)]
pub struct SoftwareBackend {
    state: Arc<SoftwareState>,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call received so far, formatted as `Kind.operation(args)`.
    pub fn call_log(&self) -> Vec<String> {
        self.state.calls.lock().clone()
    }

    /// Number of logged calls containing `pattern`.
    pub fn count_calls(&self, pattern: &str) -> usize {
        self.state
            .calls
            .lock()
            .iter()
            .filter(|call| call.contains(pattern))
            .count()
    }

    pub fn clear_call_log(&self) {
        self.state.calls.lock().clear();
    }

    pub fn live_objects(&self, kind: ObjectKind) -> usize {
        self.state.live.lock().get(&kind).copied().unwrap_or(0)
    }

    pub fn total_live_objects(&self) -> usize {
        self.state.live.lock().values().sum()
    }

    fn live_devices(&self) -> Vec<Arc<SoftwareDevice>> {
        self.state
            .devices
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn pending_pipeline_count(&self) -> usize {
        self.live_devices()
            .iter()
            .map(|device| device.pending.lock().len())
            .sum()
    }

    /// Finish every parked asynchronous pipeline creation. Returns how many
    /// completions ran.
    pub fn flush_pending_pipelines(&self) -> usize {
        let mut completed = 0;
        for device in self.live_devices() {
            let pending: Vec<PendingPipeline> = device.pending.lock().drain(..).collect();
            for pipeline in pending {
                match pipeline {
                    PendingPipeline::Render {
                        descriptor,
                        completion,
                    } => completion(device.create_render_pipeline(&descriptor)),
                    PendingPipeline::Compute {
                        descriptor,
                        completion,
                    } => completion(device.create_compute_pipeline(&descriptor)),
                }
                completed += 1;
            }
        }
        completed
    }

    /// A frame whose pixels are all `fill`.
    pub fn create_video_frame(
        &self,
        size: FrameSize,
        pixel_format: PixelFormat,
        presentation_time: MediaTime,
        fill: u8,
    ) -> Arc<dyn VideoFrame> {
        self.state
            .record(format!("Backend.create_video_frame({}x{})", size.width, size.height));
        Arc::new(SoftwareVideoFrame {
            token: LiveToken::new(&self.state, ObjectKind::VideoFrame),
            presentation_time,
            is_mirrored: false,
            rotation: VideoRotation::None,
            size,
            pixel_format,
            pixels: Some(PixelBuffer::filled(size, pixel_format, fill)),
        })
    }

    /// A frame with no CPU-mappable payload.
    pub fn create_opaque_video_frame(
        &self,
        size: FrameSize,
        pixel_format: PixelFormat,
        presentation_time: MediaTime,
    ) -> Arc<dyn VideoFrame> {
        Arc::new(SoftwareVideoFrame {
            token: LiveToken::new(&self.state, ObjectKind::VideoFrame),
            presentation_time,
            is_mirrored: false,
            rotation: VideoRotation::None,
            size,
            pixel_format,
            pixels: None,
        })
    }
}

impl fmt::Debug for SoftwareBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareBackend")
            .field("calls", &self.state.calls.lock().len())
            .field("live_objects", &self.total_live_objects())
            .finish()
    }
}

impl Backend for SoftwareBackend {
    fn name(&self) -> &str {
        "software"
    }

    fn create_device(&self, descriptor: &DeviceDescriptor) -> GpuResult<Arc<dyn Device>> {
        self.state.record("Backend.create_device".to_owned());
        let device = Arc::new(SoftwareDevice {
            common: Common::new(&self.state, ObjectKind::Device, descriptor.label.as_deref()),
            destroyed: AtomicBool::new(false),
            pending: Mutex::new(Vec::new()),
        });
        let mut devices = self.state.devices.lock();
        devices.retain(|weak| weak.strong_count() > 0);
        devices.push(Arc::downgrade(&device));
        Ok(device)
    }
}

// ============================================================================
// Device
// ============================================================================

enum PendingPipeline {
    Render {
        descriptor: ResolvedRenderPipelineDescriptor,
        completion: PipelineCompletion,
    },
    Compute {
        descriptor: ResolvedComputePipelineDescriptor,
        completion: ComputePipelineCompletion,
    },
}

pub struct SoftwareDevice {
    common: Common,
    destroyed: AtomicBool,
    pending: Mutex<Vec<PendingPipeline>>,
}

impl SoftwareDevice {
    fn check_alive(&self) -> GpuResult<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(GpuError::validation("device is destroyed"));
        }
        Ok(())
    }

    fn state(&self) -> &Arc<SoftwareState> {
        self.common.state()
    }

    /// The layouts a pipeline exposes: its explicit layout's, or one derived
    /// empty layout.
    fn pipeline_layouts(
        &self,
        layout: Option<&Arc<dyn PipelineLayout>>,
    ) -> Vec<Arc<dyn BindGroupLayout>> {
        match layout {
            Some(layout) => layout.bind_group_layouts(),
            None => {
                let derived: Arc<dyn BindGroupLayout> = Arc::new(SoftwareBindGroupLayout {
                    common: Common::new(self.state(), ObjectKind::BindGroupLayout, None),
                });
                vec![derived]
            }
        }
    }

    fn park(&self, pipeline: PendingPipeline) {
        self.pending.lock().push(pipeline);
    }
}

impl fmt::Debug for SoftwareDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareDevice")
            .field("common", &self.common)
            .field("destroyed", &self.destroyed.load(Ordering::Relaxed))
            .field("pending_pipelines", &self.pending.lock().len())
            .finish()
    }
}

impl Device for SoftwareDevice {
    fn set_label(&self, label: &str) {
        self.common.set_label(label);
    }

    fn destroy(&self) {
        self.common.record("destroy".to_owned());
        self.destroyed.store(true, Ordering::Release);
        // Dropped outside the lock; dropping a completion may re-enter.
        let pending: Vec<PendingPipeline> = self.pending.lock().drain(..).collect();
        drop(pending);
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> GpuResult<Arc<dyn Buffer>> {
        self.common
            .record(format!("create_buffer(size={})", descriptor.size));
        self.check_alive()?;
        if descriptor.size > MAX_BUFFER_SIZE {
            return Err(GpuError::OutOfMemory);
        }
        if descriptor.mapped_at_creation && descriptor.size % 4 != 0 {
            return Err(GpuError::validation(
                "mapped_at_creation requires a size that is a multiple of 4",
            ));
        }
        Ok(Arc::new(SoftwareBuffer {
            common: Common::new(self.state(), ObjectKind::Buffer, descriptor.label.as_deref()),
            size: descriptor.size,
            destroyed: AtomicBool::new(false),
        }))
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> GpuResult<Arc<dyn Texture>> {
        self.common.record(format!(
            "create_texture({}x{}x{})",
            descriptor.size.width, descriptor.size.height, descriptor.size.depth_or_array_layers
        ));
        self.check_alive()?;
        if descriptor.size.is_empty() {
            return Err(GpuError::validation("texture size must be non-zero"));
        }
        if descriptor.mip_level_count == 0 {
            return Err(GpuError::validation("mip_level_count must be at least 1"));
        }
        if descriptor.usage.is_empty() {
            return Err(GpuError::validation("texture usage must not be empty"));
        }
        Ok(Arc::new(SoftwareTexture {
            common: Common::new(self.state(), ObjectKind::Texture, descriptor.label.as_deref()),
            descriptor: descriptor.clone(),
            destroyed: AtomicBool::new(false),
        }))
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> GpuResult<Arc<dyn Sampler>> {
        self.common.record("create_sampler".to_owned());
        self.check_alive()?;
        if descriptor.lod_min_clamp > descriptor.lod_max_clamp {
            return Err(GpuError::validation("lod_min_clamp exceeds lod_max_clamp"));
        }
        Ok(Arc::new(SoftwareSampler {
            common: Common::new(self.state(), ObjectKind::Sampler, descriptor.label.as_deref()),
        }))
    }

    fn create_bind_group_layout(
        &self,
        descriptor: &BindGroupLayoutDescriptor,
    ) -> GpuResult<Arc<dyn BindGroupLayout>> {
        self.common.record(format!(
            "create_bind_group_layout(entries={})",
            descriptor.entries.len()
        ));
        self.check_alive()?;
        let mut seen = HashSet::new();
        for entry in &descriptor.entries {
            if !seen.insert(entry.binding) {
                return Err(GpuError::validation(format!(
                    "binding {} appears twice",
                    entry.binding
                )));
            }
        }
        Ok(Arc::new(SoftwareBindGroupLayout {
            common: Common::new(
                self.state(),
                ObjectKind::BindGroupLayout,
                descriptor.label.as_deref(),
            ),
        }))
    }

    fn create_bind_group(
        &self,
        descriptor: &ResolvedBindGroupDescriptor,
    ) -> GpuResult<Arc<dyn BindGroup>> {
        self.common.record(format!(
            "create_bind_group(entries={})",
            descriptor.entries.len()
        ));
        self.check_alive()?;
        Ok(Arc::new(SoftwareBindGroup {
            common: Common::new(self.state(), ObjectKind::BindGroup, descriptor.label.as_deref()),
        }))
    }

    fn create_shader_module(
        &self,
        descriptor: &ShaderModuleDescriptor,
    ) -> GpuResult<Arc<dyn ShaderModule>> {
        self.common.record("create_shader_module".to_owned());
        self.check_alive()?;
        if descriptor.code.trim().is_empty() {
            return Err(GpuError::validation("shader source is empty"));
        }
        Ok(Arc::new(SoftwareShaderModule {
            common: Common::new(
                self.state(),
                ObjectKind::ShaderModule,
                descriptor.label.as_deref(),
            ),
        }))
    }

    fn create_pipeline_layout(
        &self,
        descriptor: &ResolvedPipelineLayoutDescriptor,
    ) -> GpuResult<Arc<dyn PipelineLayout>> {
        self.common.record(format!(
            "create_pipeline_layout(groups={})",
            descriptor.bind_group_layouts.len()
        ));
        self.check_alive()?;
        Ok(Arc::new(SoftwarePipelineLayout {
            common: Common::new(
                self.state(),
                ObjectKind::PipelineLayout,
                descriptor.label.as_deref(),
            ),
            bind_group_layouts: descriptor.bind_group_layouts.clone(),
        }))
    }

    fn create_render_pipeline(
        &self,
        descriptor: &ResolvedRenderPipelineDescriptor,
    ) -> GpuResult<Arc<dyn RenderPipeline>> {
        self.common.record(format!(
            "create_render_pipeline(vertex={})",
            descriptor.vertex.entry_point
        ));
        self.check_alive()?;
        if descriptor.vertex.entry_point.is_empty() {
            return Err(GpuError::validation("vertex entry point is empty"));
        }
        if let Some(fragment) = &descriptor.fragment {
            if fragment.stage.entry_point.is_empty() {
                return Err(GpuError::validation("fragment entry point is empty"));
            }
        }
        Ok(Arc::new(SoftwareRenderPipeline {
            common: Common::new(
                self.state(),
                ObjectKind::RenderPipeline,
                descriptor.label.as_deref(),
            ),
            layouts: self.pipeline_layouts(descriptor.layout.as_ref()),
        }))
    }

    fn create_render_pipeline_async(
        &self,
        descriptor: &ResolvedRenderPipelineDescriptor,
        completion: PipelineCompletion,
    ) {
        self.common.record(format!(
            "create_render_pipeline_async(vertex={})",
            descriptor.vertex.entry_point
        ));
        if let Err(error) = self.check_alive() {
            completion(Err(error));
            return;
        }
        self.park(PendingPipeline::Render {
            descriptor: descriptor.clone(),
            completion,
        });
    }

    fn create_compute_pipeline(
        &self,
        descriptor: &ResolvedComputePipelineDescriptor,
    ) -> GpuResult<Arc<dyn ComputePipeline>> {
        self.common.record(format!(
            "create_compute_pipeline(compute={})",
            descriptor.compute.entry_point
        ));
        self.check_alive()?;
        if descriptor.compute.entry_point.is_empty() {
            return Err(GpuError::validation("compute entry point is empty"));
        }
        Ok(Arc::new(SoftwareComputePipeline {
            common: Common::new(
                self.state(),
                ObjectKind::ComputePipeline,
                descriptor.label.as_deref(),
            ),
            layouts: self.pipeline_layouts(descriptor.layout.as_ref()),
        }))
    }

    fn create_compute_pipeline_async(
        &self,
        descriptor: &ResolvedComputePipelineDescriptor,
        completion: ComputePipelineCompletion,
    ) {
        self.common.record(format!(
            "create_compute_pipeline_async(compute={})",
            descriptor.compute.entry_point
        ));
        if let Err(error) = self.check_alive() {
            completion(Err(error));
            return;
        }
        self.park(PendingPipeline::Compute {
            descriptor: descriptor.clone(),
            completion,
        });
    }

    fn create_command_encoder(
        &self,
        descriptor: &CommandEncoderDescriptor,
    ) -> GpuResult<Arc<dyn CommandEncoder>> {
        self.common.record("create_command_encoder".to_owned());
        self.check_alive()?;
        Ok(Arc::new(SoftwareCommandEncoder {
            common: Common::new(
                self.state(),
                ObjectKind::CommandEncoder,
                descriptor.label.as_deref(),
            ),
            open_pass: Mutex::new(None),
            finished: AtomicBool::new(false),
        }))
    }

    fn create_query_set(&self, descriptor: &QuerySetDescriptor) -> GpuResult<Arc<dyn QuerySet>> {
        self.common.record(format!(
            "create_query_set({:?}, count={})",
            descriptor.ty, descriptor.count
        ));
        self.check_alive()?;
        if descriptor.count > MAX_QUERY_COUNT {
            return Err(GpuError::validation(format!(
                "query count {} exceeds {}",
                descriptor.count, MAX_QUERY_COUNT
            )));
        }
        Ok(Arc::new(SoftwareQuerySet {
            common: Common::new(self.state(), ObjectKind::QuerySet, descriptor.label.as_deref()),
            ty: descriptor.ty,
            count: descriptor.count,
            destroyed: AtomicBool::new(false),
        }))
    }

    fn submit(&self, command_buffers: &[Arc<dyn CommandBuffer>]) -> GpuResult<()> {
        self.common
            .record(format!("submit({})", command_buffers.len()));
        self.check_alive()
    }
}

// ============================================================================
// Resources
// ============================================================================

#[derive(Debug)]
pub struct SoftwareBuffer {
    common: Common,
    size: u64,
    destroyed: AtomicBool,
}

impl SoftwareBuffer {
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl Buffer for SoftwareBuffer {
    fn set_label(&self, label: &str) {
        self.common.set_label(label);
    }

    fn destroy(&self) {
        self.common.record("destroy".to_owned());
        self.destroyed.store(true, Ordering::Release);
    }

    fn size(&self) -> u64 {
        self.size
    }
}

#[derive(Debug)]
pub struct SoftwareTexture {
    common: Common,
    descriptor: TextureDescriptor,
    destroyed: AtomicBool,
}

impl Texture for SoftwareTexture {
    fn set_label(&self, label: &str) {
        self.common.set_label(label);
    }

    fn create_view(
        &self,
        descriptor: Option<&TextureViewDescriptor>,
    ) -> GpuResult<Arc<dyn TextureView>> {
        self.common.record(format!("create_view(default={})", descriptor.is_none()));
        if self.destroyed.load(Ordering::Acquire) {
            return Err(GpuError::validation("texture is destroyed"));
        }
        let default = TextureViewDescriptor::default();
        let descriptor = descriptor.unwrap_or(&default);
        let format = descriptor.format.unwrap_or(self.descriptor.format);
        if format != self.descriptor.format && !self.descriptor.view_formats.contains(&format) {
            return Err(GpuError::validation(format!(
                "view format {:?} is not compatible with texture format {:?}",
                format, self.descriptor.format
            )));
        }
        if descriptor.base_mip_level >= self.descriptor.mip_level_count {
            return Err(GpuError::validation("base_mip_level out of range"));
        }
        Ok(Arc::new(SoftwareTextureView {
            common: Common::new(
                self.common.state(),
                ObjectKind::TextureView,
                descriptor.label.as_deref(),
            ),
        }))
    }

    fn destroy(&self) {
        self.common.record("destroy".to_owned());
        self.destroyed.store(true, Ordering::Release);
    }

    fn format(&self) -> TextureFormat {
        self.descriptor.format
    }

    fn size(&self) -> Extent3d {
        self.descriptor.size
    }
}

macro_rules! label_only_object {
    ($($name:ident: $trait:ident),* $(,)?) => {
        $(
            #[derive(Debug)]
            pub struct $name {
                common: Common,
            }

            impl $trait for $name {
                fn set_label(&self, label: &str) {
                    self.common.set_label(label);
                }
            }
        )*
    };
}

label_only_object!(
    SoftwareTextureView: TextureView,
    SoftwareSampler: Sampler,
    SoftwareBindGroupLayout: BindGroupLayout,
    SoftwareBindGroup: BindGroup,
    SoftwareShaderModule: ShaderModule,
    SoftwareCommandBuffer: CommandBuffer,
);

#[derive(Debug)]
pub struct SoftwarePipelineLayout {
    common: Common,
    bind_group_layouts: Vec<Arc<dyn BindGroupLayout>>,
}

impl PipelineLayout for SoftwarePipelineLayout {
    fn set_label(&self, label: &str) {
        self.common.set_label(label);
    }

    fn bind_group_layouts(&self) -> Vec<Arc<dyn BindGroupLayout>> {
        self.bind_group_layouts.clone()
    }
}

macro_rules! pipeline_object {
    ($($name:ident: $trait:ident),* $(,)?) => {
        $(
            #[derive(Debug)]
            pub struct $name {
                common: Common,
                layouts: Vec<Arc<dyn BindGroupLayout>>,
            }

            impl $trait for $name {
                fn set_label(&self, label: &str) {
                    self.common.set_label(label);
                }

                fn get_bind_group_layout(&self, index: u32) -> GpuResult<Arc<dyn BindGroupLayout>> {
                    self.common
                        .record(format!("get_bind_group_layout({})", index));
                    self.layouts.get(index as usize).cloned().ok_or_else(|| {
                        GpuError::validation(format!(
                            "bind group layout index {} out of range ({} layouts)",
                            index,
                            self.layouts.len()
                        ))
                    })
                }
            }
        )*
    };
}

pipeline_object!(
    SoftwareRenderPipeline: RenderPipeline,
    SoftwareComputePipeline: ComputePipeline,
);

#[derive(Debug)]
pub struct SoftwareQuerySet {
    common: Common,
    ty: QueryType,
    count: Size32,
    destroyed: AtomicBool,
}

impl SoftwareQuerySet {
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl QuerySet for SoftwareQuerySet {
    fn set_label(&self, label: &str) {
        self.common.set_label(label);
    }

    fn destroy(&self) {
        self.common.record("destroy".to_owned());
        self.destroyed.store(true, Ordering::Release);
    }

    fn query_type(&self) -> QueryType {
        self.ty
    }

    fn count(&self) -> Size32 {
        self.count
    }
}

#[derive(Debug)]
pub struct SoftwareCommandEncoder {
    common: Common,
    open_pass: Mutex<Option<Arc<SoftwareRenderPassEncoder>>>,
    finished: AtomicBool,
}

impl CommandEncoder for SoftwareCommandEncoder {
    fn set_label(&self, label: &str) {
        self.common.set_label(label);
    }

    fn begin_render_pass(
        &self,
        descriptor: &ResolvedRenderPassDescriptor,
    ) -> GpuResult<Arc<dyn RenderPassEncoder>> {
        self.common.record(format!(
            "begin_render_pass(colors={})",
            descriptor.color_attachments.len()
        ));
        if self.finished.load(Ordering::Acquire) {
            return Err(GpuError::validation("command encoder is finished"));
        }
        if descriptor.color_attachments.is_empty() && descriptor.depth_stencil_attachment.is_none()
        {
            return Err(GpuError::validation("render pass has no attachments"));
        }
        let mut open_pass = self.open_pass.lock();
        if open_pass.as_ref().is_some_and(|pass| !pass.is_ended()) {
            return Err(GpuError::validation("a render pass is already open"));
        }
        let pass = Arc::new(SoftwareRenderPassEncoder {
            common: Common::new(
                self.common.state(),
                ObjectKind::RenderPassEncoder,
                descriptor.label.as_deref(),
            ),
            debug_depth: Mutex::new(0),
            statistics_query_open: AtomicBool::new(false),
            recording_error: Mutex::new(None),
            ended: AtomicBool::new(false),
        });
        *open_pass = Some(Arc::clone(&pass));
        Ok(pass)
    }

    fn finish(&self, descriptor: &CommandBufferDescriptor) -> GpuResult<Arc<dyn CommandBuffer>> {
        self.common.record("finish".to_owned());
        if self.finished.swap(true, Ordering::AcqRel) {
            return Err(GpuError::validation("command encoder is already finished"));
        }
        if let Some(pass) = self.open_pass.lock().take() {
            if !pass.is_ended() {
                return Err(GpuError::validation("render pass was not ended"));
            }
        }
        Ok(Arc::new(SoftwareCommandBuffer {
            common: Common::new(
                self.common.state(),
                ObjectKind::CommandBuffer,
                descriptor.label.as_deref(),
            ),
        }))
    }
}

#[derive(Debug)]
pub struct SoftwareRenderPassEncoder {
    common: Common,
    debug_depth: Mutex<u32>,
    statistics_query_open: AtomicBool,
    recording_error: Mutex<Option<String>>,
    ended: AtomicBool,
}

impl SoftwareRenderPassEncoder {
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    fn fail_recording(&self, message: &str) {
        let mut error = self.recording_error.lock();
        if error.is_none() {
            *error = Some(message.to_owned());
        }
    }
}

impl RenderPassEncoder for SoftwareRenderPassEncoder {
    fn set_label(&self, label: &str) {
        self.common.set_label(label);
    }

    fn set_pipeline(&self, _pipeline: &Arc<dyn RenderPipeline>) {
        self.common.record("set_pipeline".to_owned());
    }

    fn set_index_buffer(
        &self,
        buffer: &Arc<dyn Buffer>,
        format: IndexFormat,
        offset: Size64,
        size: Option<Size64>,
    ) {
        self.common.record(format!(
            "set_index_buffer({:?}, {}, {:?})",
            format, offset, size
        ));
        if offset > buffer.size() {
            self.fail_recording("index buffer offset exceeds buffer size");
        }
    }

    fn set_vertex_buffer(
        &self,
        slot: u32,
        buffer: Option<&Arc<dyn Buffer>>,
        offset: Size64,
        size: Option<Size64>,
    ) {
        self.common.record(format!(
            "set_vertex_buffer({}, {}, {}, {:?})",
            slot,
            buffer.is_some(),
            offset,
            size
        ));
    }

    fn draw(
        &self,
        vertex_count: Size32,
        instance_count: Size32,
        first_vertex: Size32,
        first_instance: Size32,
    ) {
        self.common.record(format!(
            "draw({}, {}, {}, {})",
            vertex_count, instance_count, first_vertex, first_instance
        ));
    }

    fn draw_indexed(
        &self,
        index_count: Size32,
        instance_count: Size32,
        first_index: Size32,
        base_vertex: SignedOffset32,
        first_instance: Size32,
    ) {
        self.common.record(format!(
            "draw_indexed({}, {}, {}, {}, {})",
            index_count, instance_count, first_index, base_vertex, first_instance
        ));
    }

    fn draw_indirect(&self, _indirect_buffer: &Arc<dyn Buffer>, indirect_offset: Size64) {
        self.common
            .record(format!("draw_indirect({})", indirect_offset));
    }

    fn draw_indexed_indirect(&self, _indirect_buffer: &Arc<dyn Buffer>, indirect_offset: Size64) {
        self.common
            .record(format!("draw_indexed_indirect({})", indirect_offset));
    }

    fn set_bind_group(
        &self,
        index: u32,
        bind_group: Option<&Arc<dyn BindGroup>>,
        dynamic_offsets: &[BufferDynamicOffset],
    ) {
        self.common.record(format!(
            "set_bind_group({}, {}, {:?})",
            index,
            bind_group.is_some(),
            dynamic_offsets
        ));
    }

    fn push_debug_group(&self, label: &str) {
        self.common.record(format!("push_debug_group({})", label));
        *self.debug_depth.lock() += 1;
    }

    fn pop_debug_group(&self) {
        self.common.record("pop_debug_group".to_owned());
        let mut depth = self.debug_depth.lock();
        if *depth == 0 {
            drop(depth);
            self.fail_recording("pop_debug_group without a matching push");
            return;
        }
        *depth -= 1;
    }

    fn insert_debug_marker(&self, label: &str) {
        self.common
            .record(format!("insert_debug_marker({})", label));
    }

    fn set_viewport(&self, x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32) {
        self.common.record(format!(
            "set_viewport({}, {}, {}, {}, {}, {})",
            x, y, width, height, min_depth, max_depth
        ));
        if !(0.0..=1.0).contains(&min_depth) || !(0.0..=1.0).contains(&max_depth) {
            self.fail_recording("viewport depth range must lie within [0, 1]");
        }
    }

    fn set_scissor_rect(
        &self,
        x: IntegerCoordinate,
        y: IntegerCoordinate,
        width: IntegerCoordinate,
        height: IntegerCoordinate,
    ) {
        self.common.record(format!(
            "set_scissor_rect({}, {}, {}, {})",
            x, y, width, height
        ));
    }

    fn set_blend_constant(&self, color: Color) {
        self.common.record(format!(
            "set_blend_constant({}, {}, {}, {})",
            color.r, color.g, color.b, color.a
        ));
    }

    fn set_stencil_reference(&self, reference: StencilValue) {
        self.common
            .record(format!("set_stencil_reference({})", reference));
    }

    fn begin_occlusion_query(&self, query_index: Size32) {
        self.common
            .record(format!("begin_occlusion_query({})", query_index));
    }

    fn end_occlusion_query(&self) {
        self.common.record("end_occlusion_query".to_owned());
    }

    fn begin_pipeline_statistics_query(&self, query_set: &Arc<dyn QuerySet>, query_index: Size32) {
        self.common
            .record(format!("begin_pipeline_statistics_query({})", query_index));
        if query_set.query_type() != QueryType::PipelineStatistics {
            self.fail_recording("query set does not hold pipeline statistics");
        } else if query_index >= query_set.count() {
            self.fail_recording("pipeline statistics query index out of range");
        }
        if self.statistics_query_open.swap(true, Ordering::AcqRel) {
            self.fail_recording("a pipeline statistics query is already active");
        }
    }

    fn end_pipeline_statistics_query(&self) {
        self.common
            .record("end_pipeline_statistics_query".to_owned());
        if !self.statistics_query_open.swap(false, Ordering::AcqRel) {
            self.fail_recording("no pipeline statistics query is active");
        }
    }

    fn end(&self) -> GpuResult<()> {
        self.common.record("end".to_owned());
        if self.ended.swap(true, Ordering::AcqRel) {
            return Err(GpuError::validation("render pass already ended"));
        }
        if let Some(message) = self.recording_error.lock().take() {
            return Err(GpuError::Validation(message));
        }
        if self.statistics_query_open.load(Ordering::Acquire) {
            return Err(GpuError::validation(
                "pipeline statistics query still active at end of pass",
            ));
        }
        let depth = *self.debug_depth.lock();
        if depth != 0 {
            return Err(GpuError::validation(format!(
                "{} debug group(s) still open at end of pass",
                depth
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Video frames
// ============================================================================

pub struct SoftwareVideoFrame {
    token: LiveToken,
    presentation_time: MediaTime,
    is_mirrored: bool,
    rotation: VideoRotation,
    size: FrameSize,
    pixel_format: PixelFormat,
    pixels: Option<PixelBuffer>,
}

impl fmt::Debug for SoftwareVideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareVideoFrame")
            .field("presentation_time", &self.presentation_time)
            .field("size", &self.size)
            .field("pixel_format", &self.pixel_format)
            .field("has_pixels", &self.pixels.is_some())
            .finish()
    }
}

impl VideoFrame for SoftwareVideoFrame {
    fn presentation_time(&self) -> MediaTime {
        self.presentation_time
    }

    fn is_mirrored(&self) -> bool {
        self.is_mirrored
    }

    fn rotation(&self) -> VideoRotation {
        self.rotation
    }

    fn size(&self) -> FrameSize {
        self.size
    }

    fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    fn pixel_buffer(&self) -> Option<PixelBuffer> {
        self.token.state.record("VideoFrame.pixel_buffer".to_owned());
        self.pixels.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backing::{TextureUsages, TextureDimension};
    use crate::core::descriptors::{ResolvedPipelineLayoutDescriptor, ResolvedProgrammableStage};

    fn device(backend: &SoftwareBackend) -> Arc<dyn Device> {
        backend
            .create_device(&DeviceDescriptor::default())
            .unwrap()
    }

    fn pipeline_descriptor(device: &Arc<dyn Device>) -> ResolvedRenderPipelineDescriptor {
        let module = device
            .create_shader_module(&ShaderModuleDescriptor {
                label: None,
                code: "fn vs_main() {}".to_owned(),
            })
            .unwrap();
        ResolvedRenderPipelineDescriptor {
            label: None,
            layout: None,
            vertex: ResolvedProgrammableStage {
                module,
                entry_point: "vs_main".to_owned(),
            },
            fragment: None,
            primitive: Default::default(),
        }
    }

    #[test]
    fn test_live_objects_track_drops() {
        let backend = SoftwareBackend::new();
        let device = device(&backend);
        let texture = device
            .create_texture(&TextureDescriptor::new_2d(
                4,
                4,
                TextureFormat::Rgba8Unorm,
                TextureUsages::TEXTURE_BINDING,
            ))
            .unwrap();
        assert_eq!(backend.live_objects(ObjectKind::Texture), 1);
        drop(texture);
        assert_eq!(backend.live_objects(ObjectKind::Texture), 0);
        assert_eq!(backend.live_objects(ObjectKind::Device), 1);
    }

    #[test]
    fn test_zero_sized_texture_is_rejected() {
        let backend = SoftwareBackend::new();
        let device = device(&backend);
        let mut descriptor =
            TextureDescriptor::new_2d(0, 4, TextureFormat::Rgba8Unorm, TextureUsages::COPY_DST);
        descriptor.dimension = TextureDimension::D2;
        let error = device.create_texture(&descriptor).unwrap_err();
        assert_eq!(error.filter(), crate::core::backing::ErrorFilter::Validation);
    }

    #[test]
    fn test_async_pipeline_completes_on_flush() {
        let backend = SoftwareBackend::new();
        let device = device(&backend);
        let descriptor = pipeline_descriptor(&device);

        let (tx, rx) = crossbeam_channel::bounded(1);
        device.create_render_pipeline_async(
            &descriptor,
            Box::new(move |result| {
                let _ = tx.send(result.is_ok());
            }),
        );
        assert_eq!(backend.pending_pipeline_count(), 1);
        assert!(rx.try_recv().is_err());

        assert_eq!(backend.flush_pending_pipelines(), 1);
        assert_eq!(rx.try_recv(), Ok(true));
        assert_eq!(backend.pending_pipeline_count(), 0);
    }

    #[test]
    fn test_destroy_drops_pending_pipelines_uncalled() {
        let backend = SoftwareBackend::new();
        let device = device(&backend);
        let descriptor = pipeline_descriptor(&device);

        let (tx, rx) = crossbeam_channel::bounded::<bool>(1);
        device.create_render_pipeline_async(
            &descriptor,
            Box::new(move |result| {
                let _ = tx.send(result.is_ok());
            }),
        );
        device.destroy();

        // The sender was dropped with the completion.
        assert!(matches!(
            rx.recv(),
            Err(crossbeam_channel::RecvError)
        ));
        assert_eq!(backend.flush_pending_pipelines(), 0);
    }

    #[test]
    fn test_compute_pipeline_exposes_explicit_layouts() {
        let backend = SoftwareBackend::new();
        let device = device(&backend);
        let group = device
            .create_bind_group_layout(&BindGroupLayoutDescriptor::default())
            .unwrap();
        let layout = device
            .create_pipeline_layout(&ResolvedPipelineLayoutDescriptor {
                label: None,
                bind_group_layouts: vec![Arc::clone(&group), Arc::clone(&group)],
            })
            .unwrap();
        let stage = pipeline_descriptor(&device).vertex;

        let (tx, rx) = crossbeam_channel::bounded(1);
        device.create_compute_pipeline_async(
            &ResolvedComputePipelineDescriptor {
                label: None,
                layout: Some(layout),
                compute: stage,
            },
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        assert_eq!(backend.flush_pending_pipelines(), 1);

        let pipeline = rx.try_recv().unwrap().unwrap();
        assert!(std::ptr::addr_eq(
            Arc::as_ptr(&pipeline.get_bind_group_layout(1).unwrap()),
            Arc::as_ptr(&group)
        ));
        assert!(pipeline.get_bind_group_layout(2).is_err());
    }

    fn render_pass(device: &Arc<dyn Device>) -> (Arc<dyn CommandEncoder>, Arc<dyn RenderPassEncoder>) {
        let texture = device
            .create_texture(&TextureDescriptor::new_2d(
                4,
                4,
                TextureFormat::Rgba8Unorm,
                TextureUsages::RENDER_ATTACHMENT,
            ))
            .unwrap();
        let view = texture.create_view(None).unwrap();
        let encoder = device
            .create_command_encoder(&CommandEncoderDescriptor::default())
            .unwrap();
        let pass = encoder
            .begin_render_pass(&ResolvedRenderPassDescriptor {
                label: None,
                color_attachments: vec![
                    crate::core::descriptors::ResolvedRenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        clear_value: Some(Color::BLACK),
                        load_op: crate::core::backing::LoadOp::Clear,
                        store_op: crate::core::backing::StoreOp::Store,
                    },
                ],
                depth_stencil_attachment: None,
                max_draw_count: None,
            })
            .unwrap();
        (encoder, pass)
    }

    #[test]
    fn test_statistics_query_requires_matching_query_set() {
        let backend = SoftwareBackend::new();
        let device = device(&backend);
        let occlusion = device
            .create_query_set(&QuerySetDescriptor {
                label: None,
                ty: QueryType::Occlusion,
                count: 4,
            })
            .unwrap();
        let statistics = device
            .create_query_set(&QuerySetDescriptor {
                label: None,
                ty: QueryType::PipelineStatistics,
                count: 4,
            })
            .unwrap();

        let (_encoder, pass) = render_pass(&device);
        pass.begin_pipeline_statistics_query(&statistics, 3);
        pass.end_pipeline_statistics_query();
        assert!(pass.end().is_ok());

        let (_encoder, pass) = render_pass(&device);
        pass.begin_pipeline_statistics_query(&occlusion, 0);
        pass.end_pipeline_statistics_query();
        assert!(pass.end().is_err());

        let (_encoder, pass) = render_pass(&device);
        pass.begin_pipeline_statistics_query(&statistics, 0);
        assert!(pass.end().is_err());
    }

    #[test]
    fn test_oversized_query_set_is_rejected() {
        let backend = SoftwareBackend::new();
        let device = device(&backend);
        let error = device
            .create_query_set(&QuerySetDescriptor {
                label: None,
                ty: QueryType::Occlusion,
                count: MAX_QUERY_COUNT + 1,
            })
            .unwrap_err();
        assert_eq!(error.filter(), crate::core::backing::ErrorFilter::Validation);
    }

    #[test]
    fn test_render_pass_reports_unbalanced_debug_groups() {
        let backend = SoftwareBackend::new();
        let device = device(&backend);
        let texture = device
            .create_texture(&TextureDescriptor::new_2d(
                4,
                4,
                TextureFormat::Rgba8Unorm,
                TextureUsages::RENDER_ATTACHMENT,
            ))
            .unwrap();
        let view = texture.create_view(None).unwrap();
        let encoder = device
            .create_command_encoder(&CommandEncoderDescriptor::default())
            .unwrap();
        let pass = encoder
            .begin_render_pass(&ResolvedRenderPassDescriptor {
                label: None,
                color_attachments: vec![
                    crate::core::descriptors::ResolvedRenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        clear_value: Some(Color::BLACK),
                        load_op: crate::core::backing::LoadOp::Clear,
                        store_op: crate::core::backing::StoreOp::Store,
                    },
                ],
                depth_stencil_attachment: None,
                max_draw_count: None,
            })
            .unwrap();
        pass.push_debug_group("outer");
        assert!(pass.end().is_err());
        assert!(encoder.finish(&CommandBufferDescriptor::default()).is_ok());
    }
}
