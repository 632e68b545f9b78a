//! Sleepy engine demo
//!
//! Spawns a player, a ring of drifting enemies and a few static spheres, then
//! fires a bullet from the player once a second. Drag with the left mouse
//! button to orbit the camera, with the right one to zoom.
//!
//! Usage: `sleepy_app [config.toml|config.ron]`

use sleepy_engine::prelude::*;

/// Enemies leaving this radius re-enter on the opposite side
const ARENA_RADIUS: f32 = 15.0;
const ENEMY_COUNT: usize = 8;
const FIRE_INTERVAL: f32 = 1.0;
const BULLET_LIFETIME: f32 = 2.0;

#[derive(Default)]
struct DemoApp {
    factory: Option<EntityFactory>,
    player: Option<Entity>,
    enemies: Vec<Entity>,
    bullets: Vec<(Entity, f32)>,
    since_last_shot: f32,
    shots: usize,
}

impl DemoApp {
    fn spawn_scene(&mut self, state: &mut GameState, factory: EntityFactory) -> Result<(), AppError> {
        let player = factory.spawn_player(state.world_mut(), Vec3::zeros())?;
        state.add_entity(player)?;
        self.player = Some(player);

        for i in 0..ENEMY_COUNT {
            let angle = i as f32 / ENEMY_COUNT as f32 * std::f32::consts::TAU;
            let position = Vec3::new(angle.cos(), 0.0, angle.sin()) * 8.0;
            let velocity = Vec3::new(-angle.sin(), 0.0, angle.cos()) * 2.0;
            let enemy = factory.spawn_enemy(state.world_mut(), position, velocity)?;
            state.add_entity(enemy)?;
            self.enemies.push(enemy);
        }

        for position in [Vec3::new(4.0, 2.0, 0.0), Vec3::new(-4.0, -2.0, 0.0)] {
            let sphere = factory.spawn_sphere(state.world_mut(), position, 0.5)?;
            state.add_entity(sphere)?;
        }
        Ok(())
    }

    fn fire(&mut self, state: &mut GameState) -> Result<(), AppError> {
        let (Some(factory), Some(player)) = (self.factory, self.player) else {
            return Ok(());
        };
        let Some(&target) = self.enemies.get(self.shots % self.enemies.len().max(1)) else {
            return Ok(());
        };
        let world = state.world();
        let (Some(from), Some(to)) = (world.get::<Transform>(player), world.get::<Transform>(target)) else {
            return Ok(());
        };
        let (origin, direction) = (from.position, to.position - from.position);

        let bullet = factory.spawn_bullet(state.world_mut(), origin, direction)?;
        state.add_entity(bullet)?;
        self.bullets.push((bullet, 0.0));
        self.shots += 1;
        Ok(())
    }

    fn expire_bullets(&mut self, state: &mut GameState, delta_time: f32) -> Result<(), AppError> {
        for (_, age) in &mut self.bullets {
            *age += delta_time;
        }
        let (expired, alive): (Vec<_>, Vec<_>) =
            self.bullets.drain(..).partition(|&(_, age)| age >= BULLET_LIFETIME);
        self.bullets = alive;
        for (bullet, _) in expired {
            state.remove_entity(bullet)?;
            state.world_mut().despawn(bullet);
        }
        Ok(())
    }

    fn wrap_enemies(&self, state: &mut GameState) {
        for &enemy in &self.enemies {
            if let Some(transform) = state.world_mut().get_mut::<Transform>(enemy) {
                if transform.position.norm() > ARENA_RADIUS {
                    let wrapped = -transform.position * 0.95;
                    transform.set_position(wrapped.x, wrapped.y, wrapped.z);
                }
            }
        }
    }
}

impl Application for DemoApp {
    fn initialize<B: GpuBackend, W: WindowHost>(&mut self, engine: &mut Engine<B, W>) -> Result<(), AppError> {
        log::info!("Initializing demo scene...");
        let factory = EntityFactory::new(engine.renderer().box_mesh());
        self.factory = Some(factory);

        let mut state = GameState::new("arena");
        state.add_system(Box::new(MovementSystem::new()));
        state.add_system(Box::new(CollisionSystem::new()));
        self.spawn_scene(&mut state, factory)?;
        log::info!("Scene ready with {} entities", state.entities().len());

        engine.states_mut().push(state);
        Ok(())
    }

    fn update<B: GpuBackend, W: WindowHost>(
        &mut self,
        engine: &mut Engine<B, W>,
        delta_time: f32,
    ) -> Result<(), AppError> {
        let Some(state) = engine.states_mut().current_mut() else {
            return Ok(());
        };

        self.expire_bullets(state, delta_time)?;
        self.wrap_enemies(state);

        self.since_last_shot += delta_time;
        if self.since_last_shot >= FIRE_INTERVAL {
            self.since_last_shot = 0.0;
            self.fire(state)?;
        }
        Ok(())
    }

    fn cleanup<B: GpuBackend, W: WindowHost>(&mut self, engine: &mut Engine<B, W>) {
        log::info!(
            "Demo finished: {} shots fired over {} frames",
            self.shots,
            engine.renderer().frame_count()
        );
        self.enemies.clear();
        self.bullets.clear();
    }
}

fn load_config() -> Result<EngineConfig, EngineError> {
    match std::env::args().nth(1) {
        Some(path) => {
            log::info!("Loading configuration from {}", path);
            Ok(EngineConfig::load_from_file(&path)?)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn run() -> Result<(), EngineError> {
    let config = load_config()?;
    let mut engine = Engine::with_vulkan(&config)?;
    engine.run(&mut DemoApp::default())
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    log::info!("Starting sleepy engine demo");
    if let Err(e) = run() {
        log::error!("Demo failed: {}", e);
        std::process::exit(1);
    }
}
