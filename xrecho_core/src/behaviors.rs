//! Replay behaviors.
//!
//! The objects format file may name behaviors to attach to a replayed entity
//! (`replayScripts`). Names are looked up in a [`BehaviorRegistry`] filled by
//! the embedding application; unknown names are logged and skipped.

use crate::loader::ObjectSample;
use nalgebra::Vector3;
use std::any::Any;
use std::collections::HashMap;
use std::collections::VecDeque;
use tracing::warn;
use xrecho_env::EntityHandle;

/// Extra per-entity logic run while replaying.
pub trait ReplayBehavior: Send {
    /// Name the behavior is registered under.
    fn name(&self) -> &'static str;

    /// Called once the replay target is known.
    fn attach(&mut self, _target: EntityHandle) {}

    /// Called after every pose row applied to the target.
    fn on_sample(&mut self, target: EntityHandle, sample: &ObjectSample);

    /// Called when the replay stops.
    fn detach(&mut self) {}

    fn as_any(&self) -> &dyn Any;
}

/// Creates a fresh behavior instance.
pub type BehaviorFactory = fn() -> Box<dyn ReplayBehavior>;

/// Behavior constructors by name.
#[derive(Clone, Default)]
pub struct BehaviorRegistry {
    factories: HashMap<String, BehaviorFactory>,
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the behaviors shipped with the engine.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Trail::NAME, || Box::new(Trail::default()));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: BehaviorFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Instantiates every known name, skipping unknown ones.
    pub fn instantiate(&self, names: &[String]) -> Vec<Box<dyn ReplayBehavior>> {
        names
            .iter()
            .filter_map(|name| match self.factories.get(name) {
                Some(factory) => Some(factory()),
                None => {
                    warn!("Unknown replay behavior '{}', skipping", name);
                    None
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for BehaviorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("BehaviorRegistry").field("names", &names).finish()
    }
}

// ============================================================================
// BUILT-IN BEHAVIORS
// ============================================================================

/// Keeps the most recent replayed positions of its target.
#[derive(Debug, Default)]
pub struct Trail {
    points: VecDeque<Vector3<f32>>,
}

impl Trail {
    pub const NAME: &'static str = "Trail";

    /// Points kept before the oldest is dropped.
    pub const CAPACITY: usize = 512;

    pub fn points(&self) -> impl Iterator<Item = &Vector3<f32>> {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl ReplayBehavior for Trail {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn on_sample(&mut self, _target: EntityHandle, sample: &ObjectSample) {
        let Some(position) = sample.position else {
            return;
        };
        if self.points.len() == Self::CAPACITY {
            self.points.pop_front();
        }
        self.points.push_back(position);
    }

    fn detach(&mut self) {
        self.points.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
