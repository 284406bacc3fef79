use std::any::{Any, TypeId};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Unique identifier for an entity in the world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(u32);

impl EntityId {
    /// Get the underlying integer ID (useful for debugging or logging).
    pub fn to_u32(self) -> u32 {
        self.0
    }
}

/// Type-erased view of one component storage, so entities can be removed
/// from every storage without knowing the component types.
trait ComponentStorage: Any {
    fn remove_entity(&mut self, entity: EntityId);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> ComponentStorage for BTreeMap<EntityId, T> {
    fn remove_entity(&mut self, entity: EntityId) {
        self.remove(&entity);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Entity/world container with typed component storage and a deletion queue.
///
/// - Entities are identified by `EntityId`, handed out in increasing order
/// - Components are stored per Rust type, keyed by `EntityId`
/// - Iteration is always in ascending entity order, so every system visits
///   entities in the same order from run to run
/// - Deletion is requested during a tick and carried out by
///   [`World::flush_deletions`], so no system sees a half-deleted entity
pub struct World {
    next_id: u32,
    alive: BTreeSet<EntityId>,
    pending_deletion: BTreeSet<EntityId>,
    storages: HashMap<TypeId, Box<dyn ComponentStorage>>,
}

impl World {
    /// Create a new, empty world.
    pub fn new() -> Self {
        Self {
            next_id: 1,
            alive: BTreeSet::new(),
            pending_deletion: BTreeSet::new(),
            storages: HashMap::new(),
        }
    }

    /// Spawn a new entity and return its `EntityId`.
    pub fn spawn(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.alive.insert(id);
        id
    }

    /// Despawn an entity immediately, removing it and all of its components.
    pub fn despawn(&mut self, entity: EntityId) -> bool {
        if !self.alive.remove(&entity) {
            return false;
        }
        self.pending_deletion.remove(&entity);
        for storage in self.storages.values_mut() {
            storage.remove_entity(entity);
        }
        true
    }

    /// Check if an entity is currently alive.
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.alive.contains(&entity)
    }

    /// Number of alive entities.
    pub fn len(&self) -> usize {
        self.alive.len()
    }

    /// Returns true if there are no entities in the world.
    pub fn is_empty(&self) -> bool {
        self.alive.is_empty()
    }

    /// All alive entities in ascending order.
    pub fn entities(&self) -> Vec<EntityId> {
        self.alive.iter().copied().collect()
    }

    // ------------------------------ deletion --------------------------------

    /// Queue an entity for deletion at the end of the tick.
    pub fn request_deletion(&mut self, entity: EntityId) {
        if self.is_alive(entity) {
            self.pending_deletion.insert(entity);
        }
    }

    pub fn is_requesting_deletion(&self, entity: EntityId) -> bool {
        self.pending_deletion.contains(&entity)
    }

    pub fn pending_deletions(&self) -> Vec<EntityId> {
        self.pending_deletion.iter().copied().collect()
    }

    /// Despawn every queued entity, returning them in ascending order.
    pub fn flush_deletions(&mut self) -> Vec<EntityId> {
        let doomed = std::mem::take(&mut self.pending_deletion);
        let mut rv = Vec::with_capacity(doomed.len());
        for entity in doomed {
            if self.despawn(entity) {
                rv.push(entity);
            }
        }
        if !rv.is_empty() {
            log::debug!("deleted {} entities", rv.len());
        }
        rv
    }

    // ------------------------------ components ------------------------------

    fn storage<T: Any>(&self) -> Option<&BTreeMap<EntityId, T>> {
        self.storages
            .get(&TypeId::of::<T>())
            .and_then(|s| s.as_any().downcast_ref::<BTreeMap<EntityId, T>>())
    }

    fn storage_mut<T: Any>(&mut self) -> Option<&mut BTreeMap<EntityId, T>> {
        self.storages
            .get_mut(&TypeId::of::<T>())
            .and_then(|s| s.as_any_mut().downcast_mut::<BTreeMap<EntityId, T>>())
    }

    /// Insert a component of type `T` for an entity, overwriting any existing
    /// component of that type. Inserting onto a dead entity does nothing.
    pub fn insert<T: Any>(&mut self, entity: EntityId, component: T) {
        if !self.is_alive(entity) {
            log::warn!("ignoring component insert on dead entity {:?}", entity);
            return;
        }
        let storage = self
            .storages
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(BTreeMap::<EntityId, T>::new()));
        if let Some(map) = storage.as_any_mut().downcast_mut::<BTreeMap<EntityId, T>>() {
            map.insert(entity, component);
        }
    }

    /// Remove and return a component of type `T` for an entity, if it exists.
    pub fn remove<T: Any>(&mut self, entity: EntityId) -> Option<T> {
        self.storage_mut::<T>()?.remove(&entity)
    }

    /// Get an immutable reference to a component of type `T` for an entity.
    pub fn get<T: Any>(&self, entity: EntityId) -> Option<&T> {
        self.storage::<T>()?.get(&entity)
    }

    /// Get a mutable reference to a component of type `T` for an entity.
    pub fn get_mut<T: Any>(&mut self, entity: EntityId) -> Option<&mut T> {
        self.storage_mut::<T>()?.get_mut(&entity)
    }

    pub fn has<T: Any>(&self, entity: EntityId) -> bool {
        self.get::<T>(entity).is_some()
    }

    /// Iterate over all entities that have a component of type `T`.
    ///
    /// Returns a vector of `(EntityId, &T)` pairs in ascending entity order.
    pub fn query<T: Any>(&self) -> Vec<(EntityId, &T)> {
        match self.storage::<T>() {
            Some(map) => map.iter().map(|(&e, c)| (e, c)).collect(),
            None => Vec::new(),
        }
    }

    /// Entities holding a `T`, in ascending order. Handy when the loop body
    /// needs `&mut World`.
    pub fn entities_with<T: Any>(&self) -> Vec<EntityId> {
        match self.storage::<T>() {
            Some(map) => map.keys().copied().collect(),
            None => Vec::new(),
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Health(i32);

    #[test]
    fn components_round_trip() {
        let mut world = World::new();
        let e = world.spawn();
        world.insert(e, Health(3));
        assert_eq!(world.get::<Health>(e), Some(&Health(3)));
        world.get_mut::<Health>(e).unwrap().0 = 5;
        assert_eq!(world.remove::<Health>(e), Some(Health(5)));
        assert!(!world.has::<Health>(e));
    }

    #[test]
    fn queries_are_in_entity_order() {
        let mut world = World::new();
        let ids: Vec<_> = (0..5).map(|_| world.spawn()).collect();
        for &e in ids.iter().rev() {
            world.insert(e, Health(e.to_u32() as i32));
        }
        let seen: Vec<_> = world.query::<Health>().into_iter().map(|(e, _)| e).collect();
        assert_eq!(seen, ids);
        assert_eq!(world.entities_with::<Health>(), ids);
    }

    #[test]
    fn deletion_waits_for_the_flush() {
        let mut world = World::new();
        let a = world.spawn();
        let b = world.spawn();
        world.insert(a, Health(1));
        world.request_deletion(a);
        assert!(world.is_alive(a));
        assert!(world.is_requesting_deletion(a));
        assert_eq!(world.flush_deletions(), vec![a]);
        assert!(!world.is_alive(a));
        assert!(world.get::<Health>(a).is_none());
        assert!(world.is_alive(b));
        assert!(world.flush_deletions().is_empty());
    }

    #[test]
    fn dead_entities_take_no_components() {
        let mut world = World::new();
        let e = world.spawn();
        world.despawn(e);
        world.insert(e, Health(1));
        assert!(world.get::<Health>(e).is_none());
        world.request_deletion(e);
        assert!(world.pending_deletions().is_empty());
    }
}
