//! Engine loop and ECS dispatch driven by a scripted window

mod common;

use std::time::Duration;

use common::{engine_config, headless, presents, ScriptedWindow};
use sleepy_engine::ecs::components::{MeshReference, Transform, Velocity};
use sleepy_engine::ecs::{ComponentMask, EcsError, Entity, EntityList, GameState, System, World};
use sleepy_engine::foundation::math::Vec3;
use sleepy_engine::render::backends::{HeadlessBackend, HeadlessProbe, TraceEvent};
use sleepy_engine::render::{GpuBackend, MeshId, RenderError, ShaderBytecode};
use sleepy_engine::window::{MouseButton, WindowEvent, WindowHost};
use sleepy_engine::{AppError, Application, Engine, EngineError};

/// Collects drawable entities the way a render pass would
#[derive(Default)]
struct DrawListSystem {
    entities: EntityList,
}

impl System for DrawListSystem {
    fn name(&self) -> &str {
        "draw-list"
    }

    fn required_components(&self) -> ComponentMask {
        ComponentMask::TRANSFORM | ComponentMask::MESH_REFERENCE
    }

    fn entities(&self) -> &[Entity] {
        self.entities.as_slice()
    }

    fn add_entity_unchecked(&mut self, entity: Entity) {
        self.entities.add(entity);
    }

    fn remove_entity_unchecked(&mut self, entity: Entity) -> bool {
        self.entities.remove(entity)
    }

    fn clear_entities(&mut self) {
        self.entities.clear();
    }

    fn update(&mut self, _world: &mut World, _delta_time: f32) {}
}

#[test]
fn test_entity_missing_components_is_rejected() {
    let mut world = World::new();
    let mut system = DrawListSystem::default();

    let entity = world.spawn();
    world.insert(entity, MeshReference::new(MeshId(0))).unwrap();

    let err = system.add_entity(&world, entity).unwrap_err();
    assert_eq!(
        err,
        EcsError::MissingComponents {
            entity,
            system: "draw-list".to_string(),
            required: ComponentMask::TRANSFORM | ComponentMask::MESH_REFERENCE,
            present: ComponentMask::MESH_REFERENCE,
        }
    );
    assert!(system.entities().is_empty());

    world.insert(entity, Transform::identity()).unwrap();
    system.add_entity(&world, entity).unwrap();
    assert_eq!(system.entities(), &[entity]);
}

/// Spawns a moving box and quits after a fixed number of updates
struct CountingApp {
    quit_after: usize,
    updates: usize,
    events: Vec<WindowEvent>,
    mover: Option<Entity>,
    cleaned_up: bool,
}

impl CountingApp {
    fn new(quit_after: usize) -> Self {
        Self {
            quit_after,
            updates: 0,
            events: Vec::new(),
            mover: None,
            cleaned_up: false,
        }
    }
}

impl Application for CountingApp {
    fn initialize<B: GpuBackend, W: WindowHost>(&mut self, engine: &mut Engine<B, W>) -> Result<(), AppError> {
        let mut state = GameState::new("test");
        state.add_system(Box::new(sleepy_engine::ecs::systems::MovementSystem::new()));
        let factory = sleepy_engine::ecs::EntityFactory::new(engine.renderer().box_mesh());
        let mover = factory.spawn_enemy(state.world_mut(), Vec3::zeros(), Vec3::x())?;
        assert_eq!(state.add_entity(mover)?, 1);
        self.mover = Some(mover);
        engine.states_mut().push(state);
        Ok(())
    }

    fn update<B: GpuBackend, W: WindowHost>(
        &mut self,
        engine: &mut Engine<B, W>,
        _delta_time: f32,
    ) -> Result<(), AppError> {
        self.updates += 1;
        if self.updates == self.quit_after {
            engine.quit();
        }
        Ok(())
    }

    fn handle_event<B: GpuBackend, W: WindowHost>(
        &mut self,
        _engine: &mut Engine<B, W>,
        event: &WindowEvent,
    ) -> Result<(), AppError> {
        self.events.push(*event);
        Ok(())
    }

    fn cleanup<B: GpuBackend, W: WindowHost>(&mut self, engine: &mut Engine<B, W>) {
        let state = engine.states().current().expect("state still stacked during cleanup");
        let velocity = self.mover.and_then(|mover| state.world().get::<Velocity>(mover));
        assert!(velocity.is_some());
        self.cleaned_up = true;
    }
}

fn engine(window: ScriptedWindow) -> (Engine<HeadlessBackend, ScriptedWindow>, HeadlessProbe) {
    common::init_logging();
    let (backend, probe) = headless(Duration::ZERO);
    let engine = Engine::new(window, backend, &engine_config(), &ShaderBytecode::default()).unwrap();
    (engine, probe)
}

#[test]
fn test_run_renders_until_the_application_quits() {
    let (mut engine, probe) = engine(ScriptedWindow::new(Vec::new()));
    let mut app = CountingApp::new(5);

    engine.run(&mut app).unwrap();

    assert_eq!(app.updates, 5);
    assert!(app.cleaned_up);
    assert_eq!(engine.renderer().frame_count(), 5);
    assert_eq!(presents(&probe.trace()), vec![0, 1, 2, 0, 1]);
    assert!(engine.states().is_empty());
    assert!(engine.window().closed);
    assert!(probe.violations().is_empty(), "{:?}", probe.violations());
}

#[test]
fn test_close_request_stops_before_rendering() {
    let window = ScriptedWindow::new(vec![Vec::new(), vec![WindowEvent::CloseRequested]]);
    let (mut engine, _probe) = engine(window);
    let mut app = CountingApp::new(100);

    engine.run(&mut app).unwrap();

    assert_eq!(app.updates, 1);
    assert_eq!(engine.renderer().frame_count(), 1);
    assert_eq!(app.events, vec![WindowEvent::CloseRequested]);
}

#[test]
fn test_resize_and_minimise_events() {
    let window = ScriptedWindow::new(vec![
        vec![WindowEvent::Resized { width: 640, height: 360 }],
        vec![WindowEvent::Resized { width: 0, height: 0 }],
        Vec::new(),
        vec![WindowEvent::Resized { width: 800, height: 600 }],
    ]);
    let (mut engine, probe) = engine(window);
    let mut app = CountingApp::new(5);

    engine.run(&mut app).unwrap();

    // Two ticks were minimised and skipped rendering
    assert_eq!(app.updates, 5);
    assert_eq!(engine.renderer().frame_count(), 3);
    let resizes: Vec<_> = probe
        .trace()
        .into_iter()
        .filter_map(|event| match event {
            TraceEvent::ResizeBuffers { width, height, .. } => Some((width, height)),
            _ => None,
        })
        .collect();
    assert_eq!(resizes, vec![(640, 360), (800, 600)]);
    assert_eq!(engine.renderer().swap_chain().width(), 800);
    assert!(probe.violations().is_empty(), "{:?}", probe.violations());
}

#[test]
fn test_mouse_drag_orbits_the_camera() {
    let window = ScriptedWindow::new(vec![vec![
        WindowEvent::CursorMoved { x: 10.0, y: 10.0 },
        WindowEvent::MouseButton {
            button: MouseButton::Left,
            pressed: true,
        },
        WindowEvent::CursorMoved { x: 60.0, y: 10.0 },
        WindowEvent::MouseButton {
            button: MouseButton::Left,
            pressed: false,
        },
    ]]);
    let (mut engine, _probe) = engine(window);
    let before = engine.renderer().camera().position();
    let mut app = CountingApp::new(1);

    engine.run(&mut app).unwrap();

    let after = engine.renderer().camera().position();
    assert!((after - before).norm() > 1e-3);
    assert_eq!(app.events.len(), 4);
}

#[test]
fn test_device_removal_ends_the_loop_with_a_fatal_error() {
    struct RemovingApp {
        probe: HeadlessProbe,
        updates: usize,
    }

    impl Application for RemovingApp {
        fn initialize<B: GpuBackend, W: WindowHost>(&mut self, _engine: &mut Engine<B, W>) -> Result<(), AppError> {
            Ok(())
        }

        fn update<B: GpuBackend, W: WindowHost>(
            &mut self,
            _engine: &mut Engine<B, W>,
            _delta_time: f32,
        ) -> Result<(), AppError> {
            self.updates += 1;
            if self.updates == 3 {
                self.probe.remove_device("driver reset");
            }
            Ok(())
        }

        fn cleanup<B: GpuBackend, W: WindowHost>(&mut self, _engine: &mut Engine<B, W>) {}
    }

    let (mut engine, probe) = engine(ScriptedWindow::new(Vec::new()));
    let mut app = RemovingApp { probe, updates: 0 };

    let err = engine.run(&mut app).unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        EngineError::Render(RenderError::DeviceRemoved { ref reason }) if reason == "driver reset"
    ));
    assert_eq!(engine.renderer().frame_count(), 2);
}

#[test]
fn test_failed_resize_ends_the_loop() {
    let window = ScriptedWindow::new(vec![
        Vec::new(),
        vec![WindowEvent::Resized { width: 640, height: 480 }],
    ]);
    let (mut engine, probe) = engine(window);
    probe.fail_next_resize("surface lost");
    let mut app = CountingApp::new(100);

    let err = engine.run(&mut app).unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, EngineError::Render(RenderError::Initialization(_))));
    assert_eq!(app.updates, 1);
    assert_eq!(engine.renderer().frame_count(), 1);
    assert!(app.cleaned_up);
}

#[test]
fn test_recoverable_application_errors_do_not_stop_the_loop() {
    struct FlakyApp {
        updates: usize,
    }

    impl Application for FlakyApp {
        fn initialize<B: GpuBackend, W: WindowHost>(&mut self, _engine: &mut Engine<B, W>) -> Result<(), AppError> {
            Ok(())
        }

        fn update<B: GpuBackend, W: WindowHost>(
            &mut self,
            engine: &mut Engine<B, W>,
            _delta_time: f32,
        ) -> Result<(), AppError> {
            self.updates += 1;
            if self.updates == 4 {
                engine.quit();
            }
            if self.updates == 2 {
                return Err(EcsError::NoSuchEntity(Entity::default()).into());
            }
            Ok(())
        }

        fn cleanup<B: GpuBackend, W: WindowHost>(&mut self, _engine: &mut Engine<B, W>) {}
    }

    let (mut engine, _probe) = engine(ScriptedWindow::new(Vec::new()));
    let mut app = FlakyApp { updates: 0 };
    engine.run(&mut app).unwrap();

    // The failing tick skipped its frame
    assert_eq!(app.updates, 4);
    assert_eq!(engine.renderer().frame_count(), 3);
}

#[test]
fn test_game_state_visits_systems_in_registration_order() {
    let mut state = GameState::new("order");
    state.add_system(Box::new(DrawListSystem::default()));
    state.add_system(Box::new(sleepy_engine::ecs::systems::MovementSystem::new()));

    let entity = state.world_mut().spawn();
    state.world_mut().insert(entity, MeshReference::new(MeshId(0))).unwrap();
    assert_eq!(state.add_entity(entity).unwrap(), 0);

    state.world_mut().insert(entity, Transform::identity()).unwrap();
    assert_eq!(state.add_entity(entity).unwrap(), 1);
    assert_eq!(state.systems()[0].entities(), &[entity]);
    assert!(state.systems()[1].entities().is_empty());

    state.update(0.016);
    assert_eq!(state.release(), 1);
    assert!(state.world().is_empty());
}
