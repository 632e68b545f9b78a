//! The simulated GPU: a worker thread draining the queue in FIFO order

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Receiver;
use parking_lot::{Condvar, Mutex};

use crate::render::backend::{CommandListId, FenceId, FenceValue, GpuCommand, ResourceId, ResourceState};

use super::trace::TraceEvent;

/// Work items in queue order
#[derive(Debug)]
pub(super) enum GpuWork {
    Execute {
        serial: u64,
        lists: Vec<(CommandListId, Vec<GpuCommand>)>,
    },
    Signal {
        fence: FenceId,
        value: FenceValue,
    },
    Present {
        index: u32,
        buffer: ResourceId,
    },
    Shutdown,
}

/// State visible to both the CPU side and the worker
#[derive(Debug, Default)]
pub(super) struct GpuState {
    pub fences: Vec<FenceValue>,
    pub executed_serial: u64,
    /// Work items sent and not yet processed
    pub queued: usize,
    pub resource_states: HashMap<ResourceId, ResourceState>,
    pub trace: Vec<TraceEvent>,
    pub violations: Vec<String>,
    pub removed: Option<String>,
    /// Error code the next swap chain resize fails with
    pub resize_failure: Option<String>,
}

impl GpuState {
    pub fn violation(&mut self, message: String) {
        log::error!("Validation: {}", message);
        self.violations.push(message);
    }

    pub fn highest_completed(&self) -> FenceValue {
        self.fences.iter().copied().max().unwrap_or(0)
    }
}

pub(super) struct Shared {
    pub state: Mutex<GpuState>,
    /// Notified whenever a work item finishes or the device is removed
    pub progress: Condvar,
}

impl Shared {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GpuState::default()),
            progress: Condvar::new(),
        }
    }
}

pub(super) fn spawn(
    shared: Arc<Shared>,
    receiver: Receiver<GpuWork>,
    latency: Duration,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("headless-gpu".to_string())
        .spawn(move || run(&shared, &receiver, latency))
}

fn run(shared: &Shared, receiver: &Receiver<GpuWork>, latency: Duration) {
    log::debug!("Simulated GPU started");
    for work in receiver.iter() {
        if matches!(work, GpuWork::Shutdown) {
            break;
        }
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        let mut state = shared.state.lock();
        if state.removed.is_none() {
            match work {
                GpuWork::Execute { serial, lists } => execute(&mut state, serial, &lists),
                GpuWork::Signal { fence, value } => {
                    if let Some(completed) = state.fences.get_mut(fence.index()) {
                        *completed = (*completed).max(value);
                    }
                    state.trace.push(TraceEvent::Signal { fence, value });
                }
                GpuWork::Present { index, buffer } => {
                    let current = state.resource_states.get(&buffer).copied();
                    if current != Some(ResourceState::Present) {
                        state.violation(format!(
                            "back buffer {:?} presented in state {:?}",
                            buffer, current
                        ));
                    }
                    state.trace.push(TraceEvent::Present { index, buffer });
                }
                GpuWork::Shutdown => {}
            }
        }
        state.queued = state.queued.saturating_sub(1);
        drop(state);
        shared.progress.notify_all();
    }
    log::debug!("Simulated GPU stopped");
}

fn execute(state: &mut GpuState, serial: u64, lists: &[(CommandListId, Vec<GpuCommand>)]) {
    let mut barriers = Vec::new();
    let mut draws = 0;

    for (list, commands) in lists {
        let mut targets: Option<(ResourceId, Option<ResourceId>)> = None;
        let mut pipeline_bound = false;
        let mut root_signature_bound = false;

        for command in commands {
            match command {
                GpuCommand::ResourceBarrier { resource, before, after } => {
                    let actual = state.resource_states.get(resource).copied();
                    if actual != Some(*before) {
                        state.violation(format!(
                            "{:?}: barrier on {:?} declares {:?} but the resource is {:?}",
                            list, resource, before, actual
                        ));
                    }
                    state.resource_states.insert(*resource, *after);
                    barriers.push((*resource, *before, *after));
                }
                GpuCommand::ClearRenderTarget { target, .. } => {
                    expect_state(state, *list, *target, ResourceState::RenderTarget, "clear");
                }
                GpuCommand::ClearDepthStencil { target, .. } => {
                    expect_state(state, *list, *target, ResourceState::DepthWrite, "depth clear");
                }
                GpuCommand::SetRenderTargets { color, depth } => {
                    expect_state(state, *list, *color, ResourceState::RenderTarget, "bind");
                    if let Some(depth) = depth {
                        expect_state(state, *list, *depth, ResourceState::DepthWrite, "bind");
                    }
                    targets = Some((*color, *depth));
                }
                GpuCommand::SetRootSignature(_) => root_signature_bound = true,
                GpuCommand::SetPipelineState(_) => pipeline_bound = true,
                GpuCommand::SetRootDescriptorTable { .. } if !root_signature_bound => {
                    state.violation(format!("{:?}: descriptor table set before a root signature", list));
                }
                GpuCommand::DrawIndexed { .. } => {
                    if !(targets.is_some() && pipeline_bound && root_signature_bound) {
                        state.violation(format!("{:?}: draw without targets, root signature and pipeline", list));
                    }
                    // Bound targets must not have been transitioned away since binding
                    if let Some((color, depth)) = targets {
                        expect_state(state, *list, color, ResourceState::RenderTarget, "draw into");
                        if let Some(depth) = depth {
                            expect_state(state, *list, depth, ResourceState::DepthWrite, "draw into");
                        }
                    }
                    draws += 1;
                }
                _ => {}
            }
        }
    }

    state.executed_serial = serial;
    state.trace.push(TraceEvent::Executed { serial, barriers, draws });
}

fn expect_state(state: &mut GpuState, list: CommandListId, resource: ResourceId, expected: ResourceState, what: &str) {
    let actual = state.resource_states.get(&resource).copied();
    if actual != Some(expected) {
        state.violation(format!(
            "{:?}: {} of {:?} in state {:?}, expected {:?}",
            list, what, resource, actual, expected
        ));
    }
}
