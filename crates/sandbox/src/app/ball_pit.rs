use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rewind_engine::{Scene, SceneWorld, Transform, Vec2};

pub(crate) const GRAVITY_Y: f32 = -9.81;
pub(crate) const FLOOR_Y: f32 = 0.0;
pub(crate) const WALL_X: f32 = 8.0;
pub(crate) const RESTITUTION: f32 = 0.8;
pub(crate) const DEFAULT_POOL_CAPACITY: usize = 64;
const BALL_LABEL: &str = "ball";
const FIRST_BURST: u32 = 3;
const BURST_GROWTH: u32 = 2;
const MAX_BURST: u32 = 32;

/// Balls dropped into a walled pit; bounces lose energy on every contact.
pub(crate) struct BallPit {
    name: String,
    ball_count: u32,
    seed: u64,
}

impl BallPit {
    pub(crate) fn new(name: impl Into<String>, ball_count: u32, seed: u64) -> Self {
        Self {
            name: name.into(),
            ball_count,
            seed,
        }
    }
}

impl Scene for BallPit {
    fn load(&mut self, world: &mut SceneWorld) {
        let mut rng = StdRng::seed_from_u64(self.seed);
        scatter_balls(&mut rng, self.ball_count, world);
    }

    fn update(&mut self, fixed_dt_seconds: f32, world: &mut SceneWorld) {
        for entity in world.entities_mut() {
            let (position, velocity) = step_ball(
                entity.transform.position,
                entity.velocity,
                fixed_dt_seconds,
            );
            entity.transform.position = position;
            entity.velocity = velocity;
        }
    }

    fn debug_title(&self, world: &SceneWorld) -> Option<String> {
        Some(format!("{} ({} balls)", self.name, world.entity_count()))
    }
}

fn random_drop(rng: &mut StdRng) -> (Vec2, Vec2) {
    let position = Vec2 {
        x: rng.gen_range(-WALL_X + 0.5..WALL_X - 0.5),
        y: rng.gen_range(1.0..6.0),
    };
    let velocity = Vec2 {
        x: rng.gen_range(-2.0..2.0),
        y: 0.0,
    };
    (position, velocity)
}

fn scatter_balls(rng: &mut StdRng, count: u32, world: &mut SceneWorld) {
    for _ in 0..count {
        let (position, velocity) = random_drop(rng);
        world.spawn(
            Transform {
                position,
                rotation_radians: None,
            },
            velocity,
            BALL_LABEL,
        );
    }
}

pub(crate) fn step_ball(position: Vec2, velocity: Vec2, dt: f32) -> (Vec2, Vec2) {
    let mut velocity = Vec2 {
        x: velocity.x,
        y: velocity.y + GRAVITY_Y * dt,
    };
    let mut position = Vec2 {
        x: position.x + velocity.x * dt,
        y: position.y + velocity.y * dt,
    };

    if position.y < FLOOR_Y {
        position.y = FLOOR_Y + (FLOOR_Y - position.y) * RESTITUTION;
        velocity.y = -velocity.y * RESTITUTION;
    }
    if position.x.abs() > WALL_X {
        let wall = WALL_X.copysign(position.x);
        position.x = wall - (position.x - wall) * RESTITUTION;
        velocity.x = -velocity.x * RESTITUTION;
    }

    (position, velocity)
}

/// Pool-bounded spawner; every burst is larger than the last, up to a cap.
/// Once the pool is full, the oldest balls are dropped in again.
#[derive(Debug)]
pub(crate) struct BurstSpawner {
    rng: StdRng,
    next_amount: u32,
    pool_capacity: usize,
    recycle_cursor: usize,
}

impl BurstSpawner {
    pub(crate) fn new(seed: u64, pool_capacity: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            next_amount: FIRST_BURST,
            pool_capacity,
            recycle_cursor: 0,
        }
    }

    /// Returns how many balls were dropped in, fresh and recycled.
    pub(crate) fn spawn(&mut self, world: &mut SceneWorld, requested: Option<u32>) -> u32 {
        let capacity = u32::try_from(self.pool_capacity).unwrap_or(u32::MAX);
        let wanted = requested.unwrap_or(self.next_amount).min(capacity);
        let free = self.pool_capacity.saturating_sub(world.entity_count());
        let fresh = wanted.min(u32::try_from(free).unwrap_or(u32::MAX));
        scatter_balls(&mut self.rng, fresh, world);
        let recycled = self.recycle(world, wanted - fresh);
        self.next_amount = self.next_amount.saturating_add(BURST_GROWTH).min(MAX_BURST);
        fresh + recycled
    }

    fn recycle(&mut self, world: &mut SceneWorld, amount: u32) -> u32 {
        let live = world.entity_count();
        if live == 0 {
            return 0;
        }
        let amount = (amount as usize).min(live);
        for offset in 0..amount {
            let index = (self.recycle_cursor + offset) % live;
            let (position, velocity) = random_drop(&mut self.rng);
            let ball = &mut world.entities_mut()[index];
            ball.transform.position = position;
            ball.velocity = velocity;
        }
        self.recycle_cursor = (self.recycle_cursor + amount) % live;
        amount as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 1.0 / 60.0;

    fn loaded_pit(ball_count: u32, seed: u64) -> SceneWorld {
        let mut world = SceneWorld::default();
        BallPit::new("pit", ball_count, seed).load(&mut world);
        world.apply_pending();
        world
    }

    #[test]
    fn same_seed_scatters_identically() {
        let first = loaded_pit(8, 7);
        let second = loaded_pit(8, 7);
        let other = loaded_pit(8, 8);

        assert_eq!(first.entities(), second.entities());
        assert_ne!(first.entities(), other.entities());
    }

    #[test]
    fn balls_stay_inside_the_pit() {
        let mut world = loaded_pit(16, 3);
        let mut pit = BallPit::new("pit", 16, 3);
        for _ in 0..600 {
            pit.update(DT, &mut world);
        }

        for entity in world.entities() {
            let position = entity.transform.position;
            assert!(position.y >= FLOOR_Y, "{position:?} below floor");
            assert!(position.x.abs() <= WALL_X, "{position:?} outside walls");
        }
    }

    #[test]
    fn floor_bounce_reverses_and_damps_velocity() {
        let (position, velocity) =
            step_ball(Vec2 { x: 0.0, y: 0.01 }, Vec2 { x: 0.0, y: -6.0 }, DT);

        assert!(position.y >= FLOOR_Y);
        assert!(velocity.y > 0.0);
        assert!(velocity.y < 6.0);
    }

    #[test]
    fn bursts_grow_until_the_pool_is_full() {
        let mut world = SceneWorld::default();
        let mut spawner = BurstSpawner::new(1, 10);

        assert_eq!(spawner.spawn(&mut world, None), 3);
        world.apply_pending();
        assert_eq!(spawner.spawn(&mut world, None), 5);
        world.apply_pending();
        assert_eq!(world.entity_count(), 8);
        assert_eq!(spawner.spawn(&mut world, None), 7);
        world.apply_pending();
        assert_eq!(world.entity_count(), 10);
        assert_eq!(spawner.spawn(&mut world, Some(40)), 10);
        assert_eq!(world.entity_count(), 10);
    }

    #[test]
    fn full_pool_recycles_oldest_balls_first() {
        let mut world = SceneWorld::default();
        let mut spawner = BurstSpawner::new(5, 4);
        spawner.spawn(&mut world, Some(4));
        world.apply_pending();
        for entity in world.entities_mut() {
            entity.transform.position = Vec2 { x: 0.0, y: -100.0 };
        }

        assert_eq!(spawner.spawn(&mut world, Some(2)), 2);
        assert!(!world.has_pending());
        let heights: Vec<f32> = world
            .entities()
            .iter()
            .map(|entity| entity.transform.position.y)
            .collect();
        assert!(heights[0] >= 1.0 && heights[1] >= 1.0);
        assert_eq!(&heights[2..], &[-100.0, -100.0]);

        spawner.spawn(&mut world, Some(1));
        assert!(world.entities()[2].transform.position.y >= 1.0);
        assert_eq!(world.entities()[3].transform.position.y, -100.0);
    }

    #[test]
    fn debug_title_reports_ball_count() {
        let world = loaded_pit(5, 1);
        let pit = BallPit::new("north", 5, 1);
        assert_eq!(pit.debug_title(&world).as_deref(), Some("north (5 balls)"));
    }
}
