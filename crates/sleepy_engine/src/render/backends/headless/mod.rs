//! Headless simulated device
//!
//! A [`GpuBackend`] whose GPU is a worker thread. Submitted command lists,
//! fence signals and presents are queued to the worker and processed in FIFO
//! order, optionally with an artificial latency so CPU waits really block.
//! Every observable step is appended to a trace, and API usage rules are
//! checked the way a validation layer would: barrier `before` states, resets
//! of allocators still in use, presents of buffers not in the present state,
//! and resizes or releases while work is in flight.

mod trace;
mod worker;

pub use trace::{HeadlessProbe, TraceEvent};

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::render::backend::{
    BackendError, BackendResult, BufferDesc, CommandAllocatorId, CommandListId, DepthBufferDesc, DescriptorHeapDesc,
    DescriptorHeapId, FenceId, FenceValue, GpuBackend, GpuCommand, PipelineStateDesc, PipelineStateId, PixelFormat,
    QueueId, ResourceId, ResourceState, RootSignatureDesc, RootSignatureId, SwapChainDesc,
};
use crate::render::pipeline::CONSTANT_BUFFER_ALIGNMENT;

use worker::{GpuWork, Shared};

/// Behaviour of the simulated device
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    /// Name reported as the adapter
    pub adapter_name: String,
    /// Time the GPU spends on every work item
    pub latency: Duration,
    /// Sample counts reported as supported
    pub supported_sample_counts: Vec<u32>,
    /// Quality levels reported for supported sample counts
    pub quality_levels: u32,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            adapter_name: "Headless simulated GPU".to_string(),
            latency: Duration::ZERO,
            supported_sample_counts: vec![1, 2, 4, 8],
            quality_levels: 4,
        }
    }
}

#[derive(Debug)]
struct AllocatorRecord {
    /// Serial of the last submission containing a list from this allocator
    last_serial: u64,
}

#[derive(Debug)]
struct ListRecord {
    allocator: CommandAllocatorId,
    open: bool,
    commands: Vec<GpuCommand>,
}

#[derive(Debug)]
enum ResourceRecord {
    Texture,
    Buffer(Vec<u8>),
}

#[derive(Debug)]
struct SwapChainRecord {
    buffers: Vec<ResourceId>,
    current: u32,
    desc: SwapChainDesc,
}

/// Simulated device implementing [`GpuBackend`]
pub struct HeadlessBackend {
    config: HeadlessConfig,
    shared: Arc<Shared>,
    sender: Sender<GpuWork>,
    worker: Option<JoinHandle<()>>,
    queue_count: u32,
    signaled: Vec<FenceValue>,
    allocators: Vec<AllocatorRecord>,
    lists: Vec<ListRecord>,
    resources: HashMap<ResourceId, ResourceRecord>,
    next_resource: u32,
    heaps: Vec<u32>,
    root_signatures: u32,
    pipelines: u32,
    swap_chain: Option<SwapChainRecord>,
    submit_serial: u64,
}

impl HeadlessBackend {
    /// Start the simulated GPU thread
    pub fn new(config: HeadlessConfig) -> BackendResult<Self> {
        let shared = Arc::new(Shared::new());
        let (sender, receiver) = crossbeam_channel::unbounded();
        let worker = worker::spawn(Arc::clone(&shared), receiver, config.latency)
            .map_err(|e| BackendError::Initialization(format!("GPU worker thread: {}", e)))?;
        log::info!("Headless device started (latency {:?})", config.latency);
        Ok(Self {
            config,
            shared,
            sender,
            worker: Some(worker),
            queue_count: 0,
            signaled: Vec::new(),
            allocators: Vec::new(),
            lists: Vec::new(),
            resources: HashMap::new(),
            next_resource: 0,
            heaps: Vec::new(),
            root_signatures: 0,
            pipelines: 0,
            swap_chain: None,
            submit_serial: 0,
        })
    }

    /// Handle for reading the trace and injecting faults
    pub fn probe(&self) -> HeadlessProbe {
        HeadlessProbe {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Contents of a buffer as last written by the CPU
    pub fn buffer_contents(&self, buffer: ResourceId) -> Option<&[u8]> {
        match self.resources.get(&buffer) {
            Some(ResourceRecord::Buffer(data)) => Some(data),
            _ => None,
        }
    }

    fn ensure_alive(&self) -> BackendResult<()> {
        if self.shared.state.lock().removed.is_some() {
            Err(BackendError::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn invalid(&self, message: String) -> BackendError {
        self.shared.state.lock().violation(message.clone());
        BackendError::Validation(message)
    }

    fn send(&self, work: GpuWork) -> BackendResult<()> {
        self.shared.state.lock().queued += 1;
        self.sender.send(work).map_err(|_| BackendError::DeviceLost)
    }

    fn check_queue(&self, queue: QueueId) -> BackendResult<()> {
        if queue.0 < self.queue_count {
            Ok(())
        } else {
            Err(BackendError::UnknownHandle { kind: "queue", id: queue.0 })
        }
    }

    fn check_fence(&self, fence: FenceId) -> BackendResult<()> {
        if fence.index() < self.signaled.len() {
            Ok(())
        } else {
            Err(BackendError::UnknownHandle { kind: "fence", id: fence.0 })
        }
    }

    fn list(&mut self, list: CommandListId) -> BackendResult<&mut ListRecord> {
        self.lists
            .get_mut(list.index())
            .ok_or(BackendError::UnknownHandle { kind: "command list", id: list.0 })
    }

    fn allocate_resource(&mut self, record: ResourceRecord, initial: ResourceState) -> ResourceId {
        let id = ResourceId(self.next_resource);
        self.next_resource += 1;
        self.resources.insert(id, record);
        self.shared.state.lock().resource_states.insert(id, initial);
        id
    }

    fn remove_resource(&mut self, resource: ResourceId) {
        self.resources.remove(&resource);
        self.shared.state.lock().resource_states.remove(&resource);
    }

    fn gpu_idle(&self) -> bool {
        let state = self.shared.state.lock();
        state.queued == 0 && state.executed_serial == self.submit_serial
    }

    fn create_back_buffers(&mut self, count: u32) -> Vec<ResourceId> {
        (0..count)
            .map(|_| self.allocate_resource(ResourceRecord::Texture, ResourceState::Present))
            .collect()
    }
}

impl GpuBackend for HeadlessBackend {
    fn adapter_name(&self) -> String {
        self.config.adapter_name.clone()
    }

    fn device_removed_reason(&self) -> Option<String> {
        self.shared.state.lock().removed.clone()
    }

    fn create_command_queue(&mut self) -> BackendResult<QueueId> {
        self.ensure_alive()?;
        let id = QueueId(self.queue_count);
        self.queue_count += 1;
        Ok(id)
    }

    fn create_fence(&mut self, initial_value: FenceValue) -> BackendResult<FenceId> {
        self.ensure_alive()?;
        let id = FenceId(self.signaled.len() as u32);
        self.signaled.push(initial_value);
        self.shared.state.lock().fences.push(initial_value);
        Ok(id)
    }

    fn execute_command_lists(&mut self, queue: QueueId, lists: &[CommandListId]) -> BackendResult<()> {
        self.ensure_alive()?;
        self.check_queue(queue)?;

        let mut batch = Vec::with_capacity(lists.len());
        for &id in lists {
            let record = self
                .lists
                .get(id.index())
                .ok_or(BackendError::UnknownHandle { kind: "command list", id: id.0 })?;
            if record.open {
                return Err(self.invalid(format!("{:?} executed while still open", id)));
            }
            batch.push((id, record.allocator, record.commands.clone()));
        }

        self.submit_serial += 1;
        let serial = self.submit_serial;
        for (_, allocator, _) in &batch {
            if let Some(record) = self.allocators.get_mut(allocator.index()) {
                record.last_serial = serial;
            }
        }
        self.shared.state.lock().trace.push(TraceEvent::Submit {
            serial,
            lists: lists.to_vec(),
        });
        self.send(GpuWork::Execute {
            serial,
            lists: batch.into_iter().map(|(id, _, commands)| (id, commands)).collect(),
        })
    }

    fn signal(&mut self, queue: QueueId, fence: FenceId, value: FenceValue) -> BackendResult<()> {
        self.ensure_alive()?;
        self.check_queue(queue)?;
        self.check_fence(fence)?;
        let signaled = &mut self.signaled[fence.index()];
        *signaled = (*signaled).max(value);
        self.send(GpuWork::Signal { fence, value })
    }

    fn fence_completed_value(&self, fence: FenceId) -> BackendResult<FenceValue> {
        self.check_fence(fence)?;
        let state = self.shared.state.lock();
        if state.removed.is_some() {
            return Err(BackendError::DeviceLost);
        }
        Ok(state.fences[fence.index()])
    }

    fn wait_for_fence(&self, fence: FenceId, value: FenceValue) -> BackendResult<()> {
        self.check_fence(fence)?;
        if value > self.signaled[fence.index()] {
            return Err(self.invalid(format!(
                "wait on {:?} for {} which was never signaled",
                fence, value
            )));
        }

        let mut state = self.shared.state.lock();
        loop {
            if state.removed.is_some() {
                return Err(BackendError::DeviceLost);
            }
            if state.fences[fence.index()] >= value {
                break;
            }
            self.shared.progress.wait(&mut state);
        }
        let observed = state.fences[fence.index()];
        state.trace.push(TraceEvent::Wait { fence, value, observed });
        Ok(())
    }

    fn create_command_allocator(&mut self) -> BackendResult<CommandAllocatorId> {
        self.ensure_alive()?;
        let id = CommandAllocatorId(self.allocators.len() as u32);
        self.allocators.push(AllocatorRecord { last_serial: 0 });
        Ok(id)
    }

    fn create_command_list(&mut self, allocator: CommandAllocatorId) -> BackendResult<CommandListId> {
        self.ensure_alive()?;
        if allocator.index() >= self.allocators.len() {
            return Err(BackendError::UnknownHandle {
                kind: "command allocator",
                id: allocator.0,
            });
        }
        let id = CommandListId(self.lists.len() as u32);
        self.lists.push(ListRecord {
            allocator,
            open: false,
            commands: Vec::new(),
        });
        Ok(id)
    }

    fn reset_command_allocator(&mut self, allocator: CommandAllocatorId) -> BackendResult<()> {
        self.ensure_alive()?;
        let last_serial = self
            .allocators
            .get(allocator.index())
            .ok_or(BackendError::UnknownHandle {
                kind: "command allocator",
                id: allocator.0,
            })?
            .last_serial;

        let mut state = self.shared.state.lock();
        if last_serial > state.executed_serial {
            let executed = state.executed_serial;
            drop(state);
            return Err(self.invalid(format!(
                "{:?} reset while submission {} is still executing (GPU at {})",
                allocator, last_serial, executed
            )));
        }
        let completed_fence = state.highest_completed();
        state.trace.push(TraceEvent::AllocatorReset {
            allocator,
            completed_fence,
        });
        Ok(())
    }

    fn reset_command_list(
        &mut self,
        list: CommandListId,
        allocator: CommandAllocatorId,
        _initial_pipeline: Option<PipelineStateId>,
    ) -> BackendResult<()> {
        self.ensure_alive()?;
        if allocator.index() >= self.allocators.len() {
            return Err(BackendError::UnknownHandle {
                kind: "command allocator",
                id: allocator.0,
            });
        }
        let record = self.list(list)?;
        if record.open {
            return Err(self.invalid(format!("{:?} reset while open", list)));
        }
        let record = self.list(list)?;
        record.open = true;
        record.allocator = allocator;
        record.commands.clear();
        Ok(())
    }

    fn record(&mut self, list: CommandListId, command: &GpuCommand) -> BackendResult<()> {
        let record = self.list(list)?;
        if !record.open {
            return Err(self.invalid(format!("{:?} recorded into while closed", list)));
        }
        let record = self.list(list)?;
        record.commands.push(command.clone());
        Ok(())
    }

    fn close_command_list(&mut self, list: CommandListId) -> BackendResult<()> {
        let record = self.list(list)?;
        if !record.open {
            return Err(self.invalid(format!("{:?} closed twice", list)));
        }
        let record = self.list(list)?;
        record.open = false;
        Ok(())
    }

    fn multisample_quality_levels(&self, _format: PixelFormat, sample_count: u32) -> BackendResult<u32> {
        if self.config.supported_sample_counts.contains(&sample_count) {
            Ok(self.config.quality_levels)
        } else {
            Ok(0)
        }
    }

    fn create_swap_chain(&mut self, queue: QueueId, desc: &SwapChainDesc) -> BackendResult<Vec<ResourceId>> {
        self.ensure_alive()?;
        self.check_queue(queue)?;
        if self.swap_chain.is_some() {
            return Err(self.invalid("swap chain created twice".to_string()));
        }
        let buffers = self.create_back_buffers(desc.buffer_count);
        self.swap_chain = Some(SwapChainRecord {
            buffers: buffers.clone(),
            current: 0,
            desc: *desc,
        });
        Ok(buffers)
    }

    fn resize_swap_chain(&mut self, width: u32, height: u32) -> BackendResult<Vec<ResourceId>> {
        self.ensure_alive()?;
        if !self.gpu_idle() {
            return Err(self.invalid("swap chain resized while GPU work is in flight".to_string()));
        }
        let Some(old) = self.swap_chain.take() else {
            return Err(self.invalid("resize without a swap chain".to_string()));
        };
        for &buffer in &old.buffers {
            self.remove_resource(buffer);
        }
        let failure = self.shared.state.lock().resize_failure.take();
        if let Some(code) = failure {
            return Err(BackendError::Api {
                call: "ResizeBuffers",
                code,
            });
        }
        let count = old.desc.buffer_count;
        let buffers = self.create_back_buffers(count);
        self.swap_chain = Some(SwapChainRecord {
            buffers: buffers.clone(),
            current: 0,
            desc: SwapChainDesc {
                width,
                height,
                ..old.desc
            },
        });
        self.shared.state.lock().trace.push(TraceEvent::ResizeBuffers {
            width,
            height,
            buffer_count: count,
        });
        Ok(buffers)
    }

    fn current_back_buffer_index(&self) -> u32 {
        self.swap_chain.as_ref().map_or(0, |chain| chain.current)
    }

    fn present(&mut self, queue: QueueId) -> BackendResult<()> {
        self.ensure_alive()?;
        self.check_queue(queue)?;
        let Some(chain) = self.swap_chain.as_mut() else {
            return Err(self.invalid("present without a swap chain".to_string()));
        };
        let index = chain.current;
        let buffer = chain.buffers[index as usize];
        chain.current = (index + 1) % chain.desc.buffer_count;
        self.send(GpuWork::Present { index, buffer })
    }

    fn create_depth_buffer(&mut self, desc: &DepthBufferDesc) -> BackendResult<ResourceId> {
        self.ensure_alive()?;
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::Initialization("zero-sized depth buffer".to_string()));
        }
        Ok(self.allocate_resource(ResourceRecord::Texture, ResourceState::Common))
    }

    fn create_buffer(&mut self, desc: &BufferDesc, initial_data: &[u8]) -> BackendResult<ResourceId> {
        self.ensure_alive()?;
        if initial_data.len() as u64 > desc.size {
            return Err(self.invalid(format!(
                "{} bytes of initial data for a {} byte buffer",
                initial_data.len(),
                desc.size
            )));
        }
        let mut data = initial_data.to_vec();
        data.resize(desc.size as usize, 0);
        Ok(self.allocate_resource(ResourceRecord::Buffer(data), ResourceState::GenericRead))
    }

    fn write_buffer(&mut self, buffer: ResourceId, offset: u64, data: &[u8]) -> BackendResult<()> {
        self.ensure_alive()?;
        let end = offset + data.len() as u64;
        let message = match self.resources.get_mut(&buffer) {
            Some(ResourceRecord::Buffer(contents)) if end <= contents.len() as u64 => {
                contents[offset as usize..end as usize].copy_from_slice(data);
                return Ok(());
            }
            Some(ResourceRecord::Buffer(contents)) => {
                format!("write of {}..{} past the end of {:?} ({} bytes)", offset, end, buffer, contents.len())
            }
            Some(ResourceRecord::Texture) => format!("{:?} is not a buffer", buffer),
            None => return Err(BackendError::UnknownHandle { kind: "resource", id: buffer.0 }),
        };
        Err(self.invalid(message))
    }

    fn create_descriptor_heap(&mut self, desc: &DescriptorHeapDesc) -> BackendResult<DescriptorHeapId> {
        self.ensure_alive()?;
        let id = DescriptorHeapId(self.heaps.len() as u32);
        self.heaps.push(desc.count);
        Ok(id)
    }

    fn create_constant_buffer_view(
        &mut self,
        heap: DescriptorHeapId,
        index: u32,
        buffer: ResourceId,
        offset: u64,
        size: u64,
    ) -> BackendResult<()> {
        let count = *self
            .heaps
            .get(heap.index())
            .ok_or(BackendError::UnknownHandle { kind: "descriptor heap", id: heap.0 })?;
        if index >= count {
            return Err(self.invalid(format!("descriptor {} outside heap of {}", index, count)));
        }
        if offset % CONSTANT_BUFFER_ALIGNMENT != 0 || size % CONSTANT_BUFFER_ALIGNMENT != 0 {
            return Err(self.invalid(format!("unaligned constant buffer view at {} (+{})", offset, size)));
        }
        match self.resources.get(&buffer) {
            Some(ResourceRecord::Buffer(data)) if offset + size <= data.len() as u64 => Ok(()),
            Some(_) => Err(self.invalid(format!("constant buffer view outside {:?}", buffer))),
            None => Err(BackendError::UnknownHandle { kind: "resource", id: buffer.0 }),
        }
    }

    fn create_root_signature(&mut self, desc: &RootSignatureDesc) -> BackendResult<RootSignatureId> {
        self.ensure_alive()?;
        if desc.parameters.is_empty() {
            return Err(self.invalid("root signature without parameters".to_string()));
        }
        let id = RootSignatureId(self.root_signatures);
        self.root_signatures += 1;
        Ok(id)
    }

    fn create_pipeline_state(&mut self, desc: &PipelineStateDesc) -> BackendResult<PipelineStateId> {
        self.ensure_alive()?;
        if desc.root_signature.0 >= self.root_signatures {
            return Err(BackendError::UnknownHandle {
                kind: "root signature",
                id: desc.root_signature.0,
            });
        }
        let id = PipelineStateId(self.pipelines);
        self.pipelines += 1;
        Ok(id)
    }

    fn release_resource(&mut self, resource: ResourceId) {
        if !self.gpu_idle() {
            self.shared
                .state
                .lock()
                .violation(format!("{:?} released while GPU work is in flight", resource));
        }
        self.remove_resource(resource);
    }
}

impl Drop for HeadlessBackend {
    fn drop(&mut self) {
        if self.sender.send(GpuWork::Shutdown).is_err() {
            log::warn!("Simulated GPU already stopped");
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Simulated GPU thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn backend() -> HeadlessBackend {
        HeadlessBackend::new(HeadlessConfig::default()).unwrap()
    }

    #[test]
    fn test_fence_wait_blocks_until_signal() {
        let mut gpu = HeadlessBackend::new(HeadlessConfig {
            latency: Duration::from_millis(20),
            ..HeadlessConfig::default()
        })
        .unwrap();
        let queue = gpu.create_command_queue().unwrap();
        let fence = gpu.create_fence(0).unwrap();

        let start = Instant::now();
        gpu.signal(queue, fence, 1).unwrap();
        assert_eq!(gpu.fence_completed_value(fence).unwrap(), 0);
        gpu.wait_for_fence(fence, 1).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(gpu.fence_completed_value(fence).unwrap(), 1);
    }

    #[test]
    fn test_wait_for_unsignaled_value_is_rejected() {
        let mut gpu = backend();
        let fence = gpu.create_fence(0).unwrap();
        assert!(matches!(gpu.wait_for_fence(fence, 5), Err(BackendError::Validation(_))));
        assert_eq!(gpu.probe().violations().len(), 1);
    }

    #[test]
    fn test_record_into_closed_list_fails() {
        let mut gpu = backend();
        let allocator = gpu.create_command_allocator().unwrap();
        let list = gpu.create_command_list(allocator).unwrap();
        let result = gpu.record(list, &GpuCommand::SetDescriptorHeap(DescriptorHeapId(0)));
        assert!(matches!(result, Err(BackendError::Validation(_))));
    }

    #[test]
    fn test_allocator_reset_while_in_flight_is_a_violation() {
        let mut gpu = HeadlessBackend::new(HeadlessConfig {
            latency: Duration::from_millis(50),
            ..HeadlessConfig::default()
        })
        .unwrap();
        let queue = gpu.create_command_queue().unwrap();
        let allocator = gpu.create_command_allocator().unwrap();
        let list = gpu.create_command_list(allocator).unwrap();
        gpu.reset_command_list(list, allocator, None).unwrap();
        gpu.close_command_list(list).unwrap();
        gpu.execute_command_lists(queue, &[list]).unwrap();

        assert!(matches!(gpu.reset_command_allocator(allocator), Err(BackendError::Validation(_))));
        assert!(!gpu.probe().violations().is_empty());
    }

    #[test]
    fn test_bad_barrier_is_reported_by_the_gpu() {
        let mut gpu = backend();
        let queue = gpu.create_command_queue().unwrap();
        let fence = gpu.create_fence(0).unwrap();
        let depth = gpu
            .create_depth_buffer(&DepthBufferDesc {
                width: 4,
                height: 4,
                format: crate::render::backend::DepthFormat::D32Float,
                sample: Default::default(),
            })
            .unwrap();
        let allocator = gpu.create_command_allocator().unwrap();
        let list = gpu.create_command_list(allocator).unwrap();
        gpu.reset_command_list(list, allocator, None).unwrap();
        gpu.record(
            list,
            &GpuCommand::ResourceBarrier {
                resource: depth,
                before: ResourceState::RenderTarget,
                after: ResourceState::DepthWrite,
            },
        )
        .unwrap();
        gpu.close_command_list(list).unwrap();
        gpu.execute_command_lists(queue, &[list]).unwrap();
        gpu.signal(queue, fence, 1).unwrap();
        gpu.wait_for_fence(fence, 1).unwrap();

        let probe = gpu.probe();
        assert_eq!(probe.violations().len(), 1);
        assert_eq!(probe.resource_state(depth), Some(ResourceState::DepthWrite));
    }

    #[test]
    fn test_device_removal_wakes_waiters() {
        let mut gpu = HeadlessBackend::new(HeadlessConfig {
            latency: Duration::from_millis(200),
            ..HeadlessConfig::default()
        })
        .unwrap();
        let queue = gpu.create_command_queue().unwrap();
        let fence = gpu.create_fence(0).unwrap();
        gpu.signal(queue, fence, 1).unwrap();

        let probe = gpu.probe();
        let remover = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            probe.remove_device("simulated hang");
        });
        assert_eq!(gpu.wait_for_fence(fence, 1), Err(BackendError::DeviceLost));
        remover.join().unwrap();
        assert_eq!(gpu.device_removed_reason().as_deref(), Some("simulated hang"));
    }

    #[test]
    fn test_present_cycles_ring() {
        let mut gpu = backend();
        let queue = gpu.create_command_queue().unwrap();
        gpu.create_swap_chain(
            queue,
            &SwapChainDesc {
                width: 8,
                height: 8,
                buffer_count: 2,
                format: PixelFormat::R8G8B8A8Unorm,
                sample: Default::default(),
            },
        )
        .unwrap();
        assert_eq!(gpu.current_back_buffer_index(), 0);
        gpu.present(queue).unwrap();
        assert_eq!(gpu.current_back_buffer_index(), 1);
        gpu.present(queue).unwrap();
        assert_eq!(gpu.current_back_buffer_index(), 0);
    }
}
