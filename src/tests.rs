// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! End-to-end integration tests exercising the public crate surface.

#[cfg(test)]
mod tests {
    #![allow(dead_code)]
    use crate::query::{AnyOf, Not, Optional, Query, Required, RequiredMut};
    use crate::{CommandBuffer, EcsError, Executor, Result, Schedule, System, SystemAccess, World};
    use std::any::TypeId;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Velocity {
        x: f32,
        y: f32,
    }
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Health(u32);

    #[test]
    fn spawn_despawn_roundtrip() -> Result<()> {
        let mut world = World::new();
        let entity = world.spawn((Position { x: 1.0, y: 2.0 },));
        assert!(world.is_alive(entity));

        world.despawn(entity)?;
        assert!(!world.is_alive(entity));
        Ok(())
    }

    #[test]
    fn double_despawn_fails() -> Result<()> {
        let mut world = World::new();
        let entity = world.spawn((Position { x: 1.0, y: 2.0 },));
        world.despawn(entity)?;
        assert!(world.despawn(entity).is_err());
        Ok(())
    }

    #[test]
    fn archetype_segregation_by_component_set() {
        let mut world = World::new();
        world.spawn((Position { x: 0.0, y: 0.0 }, Velocity { x: 0.0, y: 0.0 }));
        world.spawn((Position { x: 0.0, y: 0.0 }, Health(10)));
        world.spawn((Velocity { x: 0.0, y: 0.0 }, Health(10)));
        world.spawn((Position { x: 0.0, y: 0.0 }, Velocity { x: 0.0, y: 0.0 }, Health(10)));
        assert!(world.archetype_count() >= 4);
    }

    #[test]
    fn entity_count_tracks_spawn_and_despawn() -> Result<()> {
        let mut world = World::new();
        assert_eq!(world.entity_count(), 0);

        let entities: Vec<_> = (0..10).map(|_| world.spawn((Health(1),))).collect();
        assert_eq!(world.entity_count(), 10);

        for entity in entities {
            world.despawn(entity)?;
        }
        assert_eq!(world.entity_count(), 0);
        Ok(())
    }

    #[test]
    fn despawned_index_is_recycled() -> Result<()> {
        let mut world = World::new();
        let a = world.spawn((Health(1),));
        world.despawn(a)?;
        let b = world.spawn((Health(2),));
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        Ok(())
    }

    #[test]
    fn get_and_get_mut_roundtrip() -> Result<()> {
        let mut world = World::new();
        let entity = world.spawn((Position { x: 1.0, y: 2.0 },));

        assert_eq!(world.get::<Position>(entity), Some(&Position { x: 1.0, y: 2.0 }));

        world.get_mut::<Position>(entity).unwrap().x = 42.0;
        assert_eq!(world.get::<Position>(entity).unwrap().x, 42.0);
        Ok(())
    }

    #[test]
    fn add_remove_component_moves_between_archetypes() -> Result<()> {
        let mut world = World::new();
        let entity = world.spawn((Position { x: 3.0, y: 4.0 },));
        let before = world.archetype_count();

        world.add_component(entity, Velocity { x: 1.0, y: 0.0 })?;
        assert_eq!(world.archetype_count(), before + 1);
        assert_eq!(world.get::<Position>(entity), Some(&Position { x: 3.0, y: 4.0 }));

        let removed = world.remove_component::<Velocity>(entity)?;
        assert_eq!(removed, Velocity { x: 1.0, y: 0.0 });
        assert!(!world.has_component::<Velocity>(entity));
        Ok(())
    }

    #[test]
    fn query_required_matches_only_components_present() {
        let mut world = World::new();
        let moving = world.spawn((Position { x: 0.0, y: 0.0 }, Velocity { x: 1.0, y: 0.0 }));
        world.spawn((Position { x: 5.0, y: 5.0 },));

        let query: Query<'_, (Required<Position>, Required<Velocity>)> = world.query();
        let results: Vec<_> = query.iter().map(|(e, _)| e).collect();
        assert_eq!(results, vec![moving]);
    }

    #[test]
    fn query_optional_and_not_narrow_correctly() {
        let mut world = World::new();
        let with_velocity = world.spawn((Position { x: 0.0, y: 0.0 }, Velocity { x: 1.0, y: 0.0 }));
        let without_velocity = world.spawn((Position { x: 1.0, y: 1.0 },));

        let optional: Query<'_, (Required<Position>, Optional<Velocity>)> = world.query();
        let mut seen = optional.iter().map(|(e, (_, v))| (e, v.is_some())).collect::<Vec<_>>();
        seen.sort_by_key(|(e, _)| *e);
        let mut expected = vec![(with_velocity, true), (without_velocity, false)];
        expected.sort_by_key(|(e, _)| *e);
        assert_eq!(seen, expected);

        let not_query: Query<'_, (Required<Position>, Not<Velocity>)> = world.query();
        let results: Vec<_> = not_query.iter().map(|(e, _)| e).collect();
        assert_eq!(results, vec![without_velocity]);
    }

    #[test]
    fn query_any_of_matches_either_member() {
        let mut world = World::new();
        let a = world.spawn((Position { x: 0.0, y: 0.0 },));
        let b = world.spawn((Velocity { x: 1.0, y: 0.0 },));
        world.spawn_empty();

        let query: Query<'_, AnyOf<(Position, Velocity)>> = world.query();
        let mut seen: Vec<_> = query.iter().map(|(e, _)| e).collect();
        seen.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn query_mut_writes_through_shared_archetype() {
        let mut world = World::new();
        for i in 0..10 {
            world.spawn((Position { x: i as f32, y: 0.0 }, Velocity { x: 1.0, y: 0.0 }));
        }

        {
            let query: Query<'_, (RequiredMut<Position>, Required<Velocity>)> = world.query();
            for (_, (pos, vel)) in query.iter() {
                pos.x += vel.x;
            }
        }

        let query: Query<'_, Required<Position>> = world.query();
        assert!(query.iter().all(|(_, pos)| pos.x >= 1.0));
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct CallLog {
        entries: Vec<&'static str>,
    }

    struct LoggingSystem {
        name: &'static str,
    }

    impl System for LoggingSystem {
        fn access(&self) -> SystemAccess {
            let mut access = SystemAccess::empty();
            access.writes.push(TypeId::of::<CallLog>());
            access
        }

        fn name(&self) -> &'static str {
            self.name
        }

        fn run(&mut self, world: &mut World) -> Result<()> {
            let query: Query<'_, RequiredMut<CallLog>> = world.query();
            for (_, log) in query.iter() {
                log.entries.push(self.name);
            }
            Ok(())
        }
    }

    struct FailingSystem;

    impl System for FailingSystem {
        fn access(&self) -> SystemAccess {
            SystemAccess::empty()
        }

        fn name(&self) -> &'static str {
            "failing_system"
        }

        fn run(&mut self, _world: &mut World) -> Result<()> {
            Err(EcsError::ScheduleError("intentional failure".into()))
        }
    }

    #[test]
    fn executor_runs_systems_in_schedule_order() {
        let mut world = World::new();
        let entity = world.spawn((CallLog::default(),));

        let schedule = Schedule::new()
            .with_system(Box::new(LoggingSystem { name: "first" }))
            .with_system(Box::new(LoggingSystem { name: "second" }))
            .build()
            .expect("build schedule");

        let mut executor = Executor::new(schedule);
        executor.execute_frame(&mut world).expect("executor should run");

        let log = world.get::<CallLog>(entity).expect("log component exists");
        assert_eq!(log.entries, vec!["first", "second"]);
    }

    #[test]
    fn executor_propagates_system_errors() {
        let mut world = World::new();
        let entity = world.spawn((CallLog::default(),));

        let schedule = Schedule::new()
            .with_system(Box::new(LoggingSystem { name: "first" }))
            .with_system(Box::new(FailingSystem))
            .with_system(Box::new(LoggingSystem { name: "second" }))
            .build()
            .expect("build schedule");

        let mut executor = Executor::new(schedule);
        let result = executor.execute_frame(&mut world);
        assert!(result.is_err(), "executor should propagate system error");

        let log = world.get::<CallLog>(entity).expect("log component exists");
        assert_eq!(log.entries, vec!["first"]);
    }

    #[test]
    fn command_buffer_applies_through_world() -> Result<()> {
        let mut world = World::new();
        let entity = world.spawn((Health(1),));

        let mut buffer = CommandBuffer::with_capacity(4);
        buffer.add_component(entity, Position { x: 9.0, y: 9.0 });
        world.flush_commands(buffer)?;

        assert_eq!(world.get::<Position>(entity), Some(&Position { x: 9.0, y: 9.0 }));
        Ok(())
    }
}
