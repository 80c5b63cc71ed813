use std::collections::HashMap;
use std::sync::mpsc;

use pollster::block_on;
use tilebench_types::Constant;
use tracing::{debug, info, info_span};
use wgpu::util::{BufferInitDescriptor, DeviceExt};
use wgpu::{
    Backends, BindGroupDescriptor, BindGroupEntry, BindGroupLayoutDescriptor, BindGroupLayoutEntry,
    BindingType, BufferBindingType, BufferDescriptor, BufferUsages, CommandEncoderDescriptor,
    ComputePassDescriptor, ComputePipelineDescriptor, DeviceDescriptor, ErrorFilter,
    InstanceDescriptor, Maintain, PipelineCompilationOptions, PipelineLayoutDescriptor,
    PowerPreference, RequestAdapterOptions, ShaderModuleDescriptor, ShaderSource, ShaderStages,
};

use crate::backend::{pack_scalars, Access, Bindings, ComputeBackend, Geometry};
use crate::kernels::{self, KernelInfo};
use crate::Error;

pub struct GpuPipeline {
    info: KernelInfo,
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

/// wgpu device and queue. Constructed explicitly and passed to every
/// scenario; dropping it releases the device.
pub struct GpuBackend {
    adapter_name: String,
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl GpuBackend {
    pub fn new() -> Result<Self, Error> {
        Self::with_backends(Backends::PRIMARY)
    }

    pub fn with_backends(backends: Backends) -> Result<Self, Error> {
        let _span = info_span!("gpu_init", ?backends).entered();
        info!("initializing GPU backend");

        let instance = wgpu::Instance::new(InstanceDescriptor { backends, ..Default::default() });

        let adapter = block_on(instance.request_adapter(&RequestAdapterOptions {
            power_preference: PowerPreference::HighPerformance,
            ..Default::default()
        }))
        .ok_or_else(|| Error::GpuInit("no compatible adapter found".into()))?;
        let adapter_name = adapter.get_info().name;
        info!(adapter = %adapter_name, "GPU adapter acquired");

        // Full adapter limits: the default storage binding cap is smaller
        // than a 2^26-element reduction input.
        let (device, queue) = block_on(adapter.request_device(
            &DeviceDescriptor {
                label: Some("tilebench"),
                required_limits: adapter.limits(),
                ..Default::default()
            },
            None,
        ))
        .map_err(|e| Error::GpuInit(format!("device request failed: {}", e)))?;
        info!(
            max_buffer_size = device.limits().max_buffer_size,
            max_storage_binding = device.limits().max_storage_buffer_binding_size,
            "GPU device created"
        );

        Ok(Self { adapter_name, device, queue })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn submit_and_wait(&self, encoder: wgpu::CommandEncoder) {
        let index = self.queue.submit(Some(encoder.finish()));
        self.device.poll(Maintain::WaitForSubmissionIndex(index));
    }
}

fn constant_map(constants: &[Constant]) -> HashMap<String, f64> {
    constants.iter().map(|c| (c.name.clone(), c.value.as_f64())).collect()
}

fn storage_entry(binding: u32, access: Access) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Storage { read_only: access == Access::Read },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl ComputeBackend for GpuBackend {
    type Buffer = wgpu::Buffer;
    type Pipeline = GpuPipeline;
    type Completion = wgpu::SubmissionIndex;

    fn name(&self) -> String {
        format!("wgpu ({})", self.adapter_name)
    }

    fn max_buffer_bytes(&self) -> u64 {
        let limits = self.device.limits();
        limits.max_buffer_size.min(limits.max_storage_buffer_binding_size as u64)
    }

    fn max_workgroups_per_dimension(&self) -> u32 {
        self.device.limits().max_compute_workgroups_per_dimension
    }

    fn create_buffer(&self, label: &str, byte_len: u64) -> Result<wgpu::Buffer, Error> {
        self.device.push_error_scope(ErrorFilter::OutOfMemory);
        self.device.push_error_scope(ErrorFilter::Validation);
        let buffer = self.device.create_buffer(&BufferDescriptor {
            label: Some(label),
            size: byte_len,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let validation = block_on(self.device.pop_error_scope());
        let oom = block_on(self.device.pop_error_scope());
        if let Some(e) = validation.or(oom) {
            return Err(Error::Allocation(format!("{}: {}", label, e)));
        }
        Ok(buffer)
    }

    fn write_buffer(&self, buffer: &wgpu::Buffer, bytes: &[u8]) -> Result<(), Error> {
        if bytes.len() as u64 > buffer.size() {
            return Err(Error::DeviceExecution(format!(
                "write of {} bytes into {}",
                bytes.len(),
                buffer.size()
            )));
        }
        self.queue.write_buffer(buffer, 0, bytes);
        let index = self.queue.submit(std::iter::empty());
        self.device.poll(Maintain::WaitForSubmissionIndex(index));
        Ok(())
    }

    fn read_buffer(&self, buffer: &wgpu::Buffer) -> Result<Vec<u8>, Error> {
        let size = buffer.size();
        let staging = self.device.create_buffer(&BufferDescriptor {
            label: Some("Staging"),
            size,
            usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor { label: Some("Readback") });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.submit_and_wait(encoder);

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(Maintain::Wait);
        rx.recv()
            .map_err(|_| Error::DeviceExecution("readback callback dropped".into()))?
            .map_err(|e| Error::DeviceExecution(format!("readback map failed: {}", e)))?;

        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        debug!(size, "gpu_readback_complete");
        Ok(bytes)
    }

    fn clear_buffer(&self, buffer: &wgpu::Buffer) -> Result<(), Error> {
        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor { label: Some("Clear") });
        encoder.clear_buffer(buffer, 0, None);
        self.submit_and_wait(encoder);
        Ok(())
    }

    fn compile(&self, kernel: &str, constants: &[Constant]) -> Result<GpuPipeline, Error> {
        let info = kernels::lookup(kernel)
            .ok_or_else(|| Error::Compilation(format!("unknown kernel {}", kernel)))?;
        kernels::check_overrides(&info, constants)?;
        let source = info.wgsl();

        self.device.push_error_scope(ErrorFilter::Validation);
        let module = self.device.create_shader_module(ShaderModuleDescriptor {
            label: Some(kernel),
            source: ShaderSource::Wgsl(source.as_str().into()),
        });

        let mut entries: Vec<BindGroupLayoutEntry> = info
            .bindings
            .iter()
            .enumerate()
            .map(|(i, &access)| storage_entry(i as u32, access))
            .collect();
        entries.push(BindGroupLayoutEntry {
            binding: info.bindings.len() as u32,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
        let layout = self.device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some(kernel),
            entries: &entries,
        });
        let pipeline_layout = self.device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some(kernel),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let overrides = constant_map(constants);
        let pipeline = self.device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some(kernel),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: PipelineCompilationOptions {
                constants: &overrides,
                ..Default::default()
            },
            cache: None,
        });
        if let Some(e) = block_on(self.device.pop_error_scope()) {
            return Err(Error::Compilation(format!("{}: {}", kernel, e)));
        }

        info!(kernel, constants = constants.len(), shader_len = source.len(), "GPU pipeline created");
        Ok(GpuPipeline { info, layout, pipeline })
    }

    fn dispatch(
        &self,
        pipeline: &GpuPipeline,
        bindings: &Bindings<'_, wgpu::Buffer>,
        geometry: Geometry,
    ) -> Result<wgpu::SubmissionIndex, Error> {
        let info = &pipeline.info;
        if geometry.group != info.group {
            return Err(Error::InvalidConfig(format!(
                "{}: threadgroup {:?} does not match kernel {:?}",
                info.name, geometry.group, info.group
            )));
        }
        if bindings.buffers.len() != info.bindings.len() || bindings.scalars.len() != info.scalars
        {
            return Err(Error::InvalidConfig(format!(
                "{}: bound {} buffers and {} scalars, kernel takes {} and {}",
                info.name,
                bindings.buffers.len(),
                bindings.scalars.len(),
                info.bindings.len(),
                info.scalars
            )));
        }
        let [x, y, z] = geometry.dispatch_grid(
            self.device.limits().max_compute_workgroups_per_dimension,
            info.linear_groups,
        )?;

        let uniform = self.device.create_buffer_init(&BufferInitDescriptor {
            label: Some("Scalars"),
            contents: &pack_scalars(bindings.scalars),
            usage: BufferUsages::UNIFORM,
        });
        let mut entries: Vec<BindGroupEntry> = bindings
            .buffers
            .iter()
            .enumerate()
            .map(|(i, buf)| BindGroupEntry { binding: i as u32, resource: buf.as_entire_binding() })
            .collect();
        entries.push(BindGroupEntry {
            binding: bindings.buffers.len() as u32,
            resource: uniform.as_entire_binding(),
        });

        self.device.push_error_scope(ErrorFilter::Validation);
        let bind_group = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some(info.name.as_str()),
            layout: &pipeline.layout,
            entries: &entries,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor { label: Some(info.name.as_str()) });
        {
            let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
                label: Some(info.name.as_str()),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(x, y, z);
        }
        let index = self.queue.submit(Some(encoder.finish()));
        if let Some(e) = block_on(self.device.pop_error_scope()) {
            return Err(Error::DeviceExecution(format!("{}: {}", info.name, e)));
        }

        debug!(kernel = %info.name, x, y, z, "gpu_dispatch");
        Ok(index)
    }

    fn wait(&self, completion: wgpu::SubmissionIndex) -> Result<(), Error> {
        self.device.poll(Maintain::WaitForSubmissionIndex(completion));
        Ok(())
    }
}
