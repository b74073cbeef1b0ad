//! Phase 4 Executor, Sync, and Debugging
//! Combined to fit size constraints

// ============================================================================
// executor.rs
// ============================================================================

use crate::error::Result;
use crate::schedule::Schedule;
use crate::system::SystemId;
use crate::World;
use std::collections::HashMap;

/// System execution profiler
#[derive(Debug, Clone)]
pub struct SystemStats {
    pub min: std::time::Duration,
    pub max: std::time::Duration,
    pub avg: std::time::Duration,
    pub call_count: u64,
}

/// System profiler for collecting timing data
pub struct SystemProfiler {
    timings: HashMap<SystemId, Vec<std::time::Duration>>,
    call_counts: HashMap<SystemId, u64>,
}

impl SystemProfiler {
    pub fn new() -> Self {
        Self {
            timings: HashMap::new(),
            call_counts: HashMap::new(),
        }
    }

    pub fn record_execution(&mut self, id: SystemId, duration: std::time::Duration) {
        self.timings.entry(id).or_default().push(duration);
        self.call_counts
            .entry(id)
            .and_modify(|c| *c += 1)
            .or_insert(1);
    }

    pub fn get_stats(&self, id: SystemId) -> Option<SystemStats> {
        let timings = self.timings.get(&id)?;
        if timings.is_empty() {
            return None;
        }

        let min = *timings.iter().min().unwrap_or(&std::time::Duration::ZERO);
        let max = *timings.iter().max().unwrap_or(&std::time::Duration::ZERO);
        let avg = timings.iter().sum::<std::time::Duration>() / timings.len() as u32;

        Some(SystemStats {
            min,
            max,
            avg,
            call_count: *self.call_counts.get(&id).unwrap_or(&0),
        })
    }

    pub fn clear(&mut self) {
        self.timings.clear();
        self.call_counts.clear();
    }
}

impl Default for SystemProfiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame executor
pub struct Executor {
    pub schedule: Schedule,
    pub profiler: SystemProfiler,
}

impl Executor {
    /// Create new executor
    pub fn new(schedule: Schedule) -> Self {
        Self {
            schedule,
            profiler: SystemProfiler::new(),
        }
    }

    /// Execute one frame: every stage runs its systems in sequence, then a
    /// barrier separates it from the next stage. Systems within a stage
    /// never conflict (see `Stage::try_add`), so running them one after
    /// another here is equivalent to running them in parallel.
    pub fn execute_frame(&mut self, world: &mut World) -> Result<()> {
        self.schedule.ensure_built()?;
        let stages: Vec<Vec<SystemId>> =
            self.schedule.stage_plan().into_iter().map(|stage| stage.to_vec()).collect();

        for stage in &stages {
            for &system_id in stage {
                if let Some(system) = self.schedule.system_mut_by_id(system_id) {
                    let start = std::time::Instant::now();
                    system.run(world)?;
                    self.profiler.record_execution(system_id, start.elapsed());
                }
            }
            self.barrier(world)?;
        }

        Ok(())
    }

    /// Fan-out-wait counterpart to [`Executor::execute_frame`]: spawns one
    /// thread per system in a stage and joins at the stage's end, instead of
    /// running the stage's systems one after another on the calling thread.
    /// Valid only because `Stage::try_add` already proved no two systems in
    /// the same stage share a written component — this executor adds no
    /// conflict detection of its own, it just exploits the proof the
    /// sequential executor already relies on.
    ///
    /// Systems sharing a stage must confine structural mutation (spawn,
    /// despawn, add/remove component) to a [`crate::command::CommandBuffer`]
    /// flushed after the frame; calling a structural `World` method directly
    /// from two concurrently-running systems is a data race this executor
    /// does not guard against, per the storage core's single-writer model.
    #[cfg(feature = "parallel")]
    pub fn execute_frame_parallel(&mut self, world: &mut World) -> Result<()> {
        self.schedule.ensure_built()?;
        let stages: Vec<Vec<SystemId>> =
            self.schedule.stage_plan().into_iter().map(|stage| stage.to_vec()).collect();

        for stage in &stages {
            let world_ptr = WorldPtr(world as *mut World);
            let systems = &mut self.schedule.systems;

            let outcomes: Vec<(SystemId, Result<()>, std::time::Duration)> =
                crossbeam::scope(|scope| {
                    let handles: Vec<_> = stage
                        .iter()
                        .map(|&system_id| {
                            // SAFETY: `SystemId`s within one stage are
                            // distinct indices into `systems`, so each
                            // spawned thread dereferences a different
                            // element; no two threads alias.
                            let system_ptr: *mut crate::system::BoxedSystem =
                                &mut systems[system_id.0 as usize] as *mut _;
                            let world_ptr = &world_ptr;
                            scope.spawn(move |_| {
                                let start = std::time::Instant::now();
                                // SAFETY: see `WorldPtr` and the stage
                                // non-conflict proof documented above.
                                let system = unsafe { &mut *system_ptr };
                                let world = unsafe { &mut *world_ptr.0 };
                                let result = system.run(world);
                                (system_id, result, start.elapsed())
                            })
                        })
                        .collect();
                    handles
                        .into_iter()
                        .map(|h| h.join().expect("system thread panicked"))
                        .collect()
                })
                .expect("stage scope thread panicked");

            for (system_id, result, elapsed) in outcomes {
                result?;
                self.profiler.record_execution(system_id, elapsed);
            }
            self.barrier(world)?;
        }

        Ok(())
    }

    fn barrier(&mut self, _world: &mut World) -> Result<()> {
        // Flush command buffers
        // Compact archetypes (optional)
        Ok(())
    }
}

/// Carries a raw `World` pointer across a `crossbeam::scope` spawn boundary.
/// Sound only under the non-conflict proof `execute_frame_parallel` relies
/// on; see that method's documentation.
#[cfg(feature = "parallel")]
struct WorldPtr(*mut World);
#[cfg(feature = "parallel")]
unsafe impl Send for WorldPtr {}
#[cfg(feature = "parallel")]
unsafe impl Sync for WorldPtr {}

// ============================================================================
// world_sync.rs
// ============================================================================

use crate::command::CommandBuffer;
use crate::entity::EntityId;

/// Synchronization point between stages
pub struct SyncPoint {
    pub command_buffers: Vec<CommandBuffer>,
    pub despawn_queue: Vec<EntityId>,
}

impl SyncPoint {
    /// Create new sync point
    pub fn new() -> Self {
        Self {
            command_buffers: Vec::new(),
            despawn_queue: Vec::new(),
        }
    }

    /// Add command buffer to flush
    pub fn add_command_buffer(&mut self, buffer: CommandBuffer) {
        self.command_buffers.push(buffer);
    }

    /// Queue entity for despawn
    pub fn queue_despawn(&mut self, entity: EntityId) {
        self.despawn_queue.push(entity);
    }

    /// Flush all commands to world
    pub fn flush(&mut self, world: &mut World) -> Result<()> {
        // Despawn entities (LIFO to maintain indices)
        for &entity in self.despawn_queue.iter().rev() {
            world.despawn(entity).ok();
        }
        self.despawn_queue.clear();

        // Flush command buffers
        for buffer in self.command_buffers.drain(..) {
            world.flush_commands(buffer)?;
        }

        Ok(())
    }
}

impl Default for SyncPoint {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// scheduler_debug.rs
// ============================================================================

use std::fs::File;
use std::io::Write;

/// Debug information about scheduling
#[derive(Debug, Clone)]
pub struct ScheduleDebugInfo {
    pub stage_count: usize,
    pub total_systems: usize,
    pub systems_per_stage: Vec<usize>,
}

impl ScheduleDebugInfo {
    /// Create from schedule
    pub fn from_schedule(schedule: &Schedule) -> Self {
        let stage_count = schedule.stage_count();
        let total_systems = schedule.graph.as_ref().map_or(0, |g| g.nodes.len());
        let systems_per_stage = (0..stage_count)
            .map(|i| schedule.stage_system_count(i))
            .collect();

        Self {
            stage_count,
            total_systems,
            systems_per_stage,
        }
    }

    /// Print debug info
    pub fn print_debug(&self) {
        println!("Schedule Debug Info:");
        println!("  Total systems: {}", self.total_systems);
        println!("  Stages: {}", self.stage_count);
        for (i, &count) in self.systems_per_stage.iter().enumerate() {
            println!("    Stage {i}: {count} systems");
        }
    }

    /// Export as JSON (simplified)
    pub fn export_json(&self, filename: &str) -> std::io::Result<()> {
        let mut file = File::create(filename)?;
        write!(file, "{{")?;
        write!(file, "\"stage_count\":{},", self.stage_count)?;
        write!(file, "\"total_systems\":{},", self.total_systems)?;
        write!(file, "\"systems_per_stage\":[")?;
        for (i, &count) in self.systems_per_stage.iter().enumerate() {
            if i > 0 {
                write!(file, ",")?;
            }
            write!(file, "{count}")?;
        }
        write!(file, "]")?;
        write!(file, "}}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_point_creation() {
        let sp = SyncPoint::new();
        assert!(sp.command_buffers.is_empty());
        assert!(sp.despawn_queue.is_empty());
    }

    #[test]
    fn test_profiler_creation() {
        let profiler = SystemProfiler::new();
        assert!(profiler.timings.is_empty());
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn parallel_frame_runs_disjoint_systems_in_one_stage() {
        use crate::query::RequiredMut;
        use crate::schedule::Schedule;
        use crate::system::{System, SystemAccess};
        use crate::World;
        use std::any::TypeId;

        #[derive(Clone, Copy)]
        struct Position {
            x: f32,
        }
        #[derive(Clone, Copy)]
        struct Velocity {
            dx: f32,
        }

        struct BumpPosition;
        impl System for BumpPosition {
            fn access(&self) -> SystemAccess {
                SystemAccess { reads: vec![], writes: vec![TypeId::of::<Position>()] }
            }
            fn name(&self) -> &'static str {
                "BumpPosition"
            }
            fn run(&mut self, world: &mut World) -> Result<()> {
                let query: crate::query::Query<'_, RequiredMut<Position>> = world.query();
                for (_, p) in query.iter() {
                    p.x += 1.0;
                }
                Ok(())
            }
        }

        struct BumpVelocity;
        impl System for BumpVelocity {
            fn access(&self) -> SystemAccess {
                SystemAccess { reads: vec![], writes: vec![TypeId::of::<Velocity>()] }
            }
            fn name(&self) -> &'static str {
                "BumpVelocity"
            }
            fn run(&mut self, world: &mut World) -> Result<()> {
                let query: crate::query::Query<'_, RequiredMut<Velocity>> = world.query();
                for (_, v) in query.iter() {
                    v.dx += 1.0;
                }
                Ok(())
            }
        }

        let mut world = World::new();
        let e = world.spawn((Position { x: 0.0 }, Velocity { dx: 0.0 }));

        let schedule = Schedule::new().with_system(Box::new(BumpPosition)).with_system(Box::new(BumpVelocity));
        assert_eq!(schedule.stage_count(), 0);
        let schedule = schedule.build().unwrap();
        assert_eq!(schedule.stage_count(), 1, "disjoint writes must share one stage");

        let mut executor = Executor::new(schedule);
        executor.execute_frame_parallel(&mut world).unwrap();

        assert_eq!(world.get::<Position>(e).unwrap().x, 1.0);
        assert_eq!(world.get::<Velocity>(e).unwrap().dx, 1.0);
    }
}
