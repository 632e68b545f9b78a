//! Shared fixtures for the headless integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::Duration;

use sleepy_engine::config::{EngineConfig, RendererConfig};
use sleepy_engine::render::backends::{HeadlessBackend, HeadlessConfig, HeadlessProbe, TraceEvent};
use sleepy_engine::render::{FrameRenderer, ShaderBytecode};
use sleepy_engine::window::{WindowEvent, WindowHost};

pub const WIDTH: u32 = 320;
pub const HEIGHT: u32 = 240;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn headless(latency: Duration) -> (HeadlessBackend, HeadlessProbe) {
    let backend = HeadlessBackend::new(HeadlessConfig {
        latency,
        ..HeadlessConfig::default()
    })
    .expect("headless device");
    let probe = backend.probe();
    (backend, probe)
}

pub fn renderer_config(buffer_count: u32) -> RendererConfig {
    RendererConfig {
        buffer_count,
        max_objects: 16,
        ..RendererConfig::default()
    }
}

/// Renderer on a headless device whose GPU takes `latency` per work item
pub fn renderer(buffer_count: u32, latency: Duration) -> (FrameRenderer<HeadlessBackend>, HeadlessProbe) {
    init_logging();
    let (backend, probe) = headless(latency);
    let renderer = FrameRenderer::new(
        backend,
        &renderer_config(buffer_count),
        WIDTH,
        HEIGHT,
        &ShaderBytecode::default(),
    )
    .expect("renderer");
    (renderer, probe)
}

pub fn engine_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.window.width = WIDTH;
    config.window.height = HEIGHT;
    config.renderer = renderer_config(3);
    config
}

/// Window that replays one batch of events per poll
#[derive(Debug, Default)]
pub struct ScriptedWindow {
    pub size: (u32, u32),
    pub batches: VecDeque<Vec<WindowEvent>>,
    pub closed: bool,
    pub polls: usize,
}

impl ScriptedWindow {
    pub fn new(batches: Vec<Vec<WindowEvent>>) -> Self {
        Self {
            size: (WIDTH, HEIGHT),
            batches: batches.into(),
            closed: false,
            polls: 0,
        }
    }
}

impl WindowHost for ScriptedWindow {
    fn poll_events(&mut self) -> Vec<WindowEvent> {
        self.polls += 1;
        let events = self.batches.pop_front().unwrap_or_default();
        for event in &events {
            if let WindowEvent::Resized { width, height } = *event {
                self.size = (width, height);
            }
        }
        events
    }

    fn client_size(&self) -> (u32, u32) {
        self.size
    }

    fn should_close(&self) -> bool {
        self.closed
    }

    fn request_close(&mut self) {
        self.closed = true;
    }
}

pub fn presents(trace: &[TraceEvent]) -> Vec<u32> {
    trace
        .iter()
        .filter_map(|event| match event {
            TraceEvent::Present { index, .. } => Some(*index),
            _ => None,
        })
        .collect()
}

pub fn signals(trace: &[TraceEvent]) -> Vec<u64> {
    trace
        .iter()
        .filter_map(|event| match event {
            TraceEvent::Signal { value, .. } => Some(*value),
            _ => None,
        })
        .collect()
}
