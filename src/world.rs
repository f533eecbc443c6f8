//! The [`World`] is the top-level container for the ECS. It owns the entity
//! allocator, the component registry, and all archetype storage, and is the
//! sole entry point through which entities are spawned, mutated, and queried.
//!
//! # Structural mutation and row migration
//!
//! Adding or removing a component moves an entity's row from its current
//! archetype's table to the table for the target archetype (creating that
//! table on first use). The algorithm always runs in the same order --
//! **copy into the destination, then swap-remove from the source, then fix up
//! whichever entity got swapped into the vacated row** -- because reversing
//! steps corrupts the directory (the moving entity's location would be
//! overwritten before the read it depends on).

use std::collections::HashMap;

use crate::archetype::{Archetype, ArchetypeId, ColumnGrowth, ComponentVtable};
use crate::component::{ComponentInfo, ComponentRegistry, ComponentTypeId};
use crate::entity::{EntityAllocator, EntityId};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Entity location ("directory slot", occupied half)
// ---------------------------------------------------------------------------

/// Where an entity lives: which archetype and which row within that archetype.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntityLocation {
    pub archetype_id: ArchetypeId,
    pub row: usize,
}

// ---------------------------------------------------------------------------
// VtableRegistry -- maps ComponentTypeId to its ComponentVtable
// ---------------------------------------------------------------------------

/// Stores vtables for registered component types, indexed by ComponentTypeId.
#[derive(Debug, Default)]
struct VtableRegistry {
    vtables: Vec<ComponentVtable>,
}

impl VtableRegistry {
    fn new() -> Self {
        Self {
            vtables: Vec::new(),
        }
    }

    fn register<T: Clone + 'static>(&mut self, id: ComponentTypeId) {
        let idx = id.0 as usize;
        if idx >= self.vtables.len() {
            self.vtables.resize(idx + 1, ComponentVtable::new::<()>());
        }
        self.vtables[idx] = ComponentVtable::new::<T>();
    }

    fn get(&self, id: ComponentTypeId) -> &ComponentVtable {
        &self.vtables[id.0 as usize]
    }
}

// ---------------------------------------------------------------------------
// DeserializerRegistry -- type-erased JSON -> RawComponentBuf conversion
// ---------------------------------------------------------------------------

/// Type-erased function that deserializes a `serde_json::Value` into a
/// [`RawComponentBuf`] holding the component value. Returns `Err` if the JSON
/// does not match the component type's schema.
type DeserializeFn =
    Box<dyn Fn(&serde_json::Value) -> Result<RawComponentBuf, String> + Send + Sync>;

/// Registry of per-component JSON deserializers, indexed in lockstep with
/// [`ComponentRegistry`]. Exists so that [`World::set_component_by_name`] can
/// turn a `serde_json::Value` into a properly typed, properly aligned
/// component value without the caller ever naming the Rust type.
#[derive(Default)]
struct DeserializerRegistry {
    deserializers: Vec<Option<DeserializeFn>>,
}

impl DeserializerRegistry {
    fn new() -> Self {
        Self {
            deserializers: Vec::new(),
        }
    }

    fn register<T: ComponentValue>(&mut self, id: ComponentTypeId) {
        let idx = id.0 as usize;
        if idx >= self.deserializers.len() {
            self.deserializers.resize_with(idx + 1, || None);
        }
        self.deserializers[idx] = Some(Box::new(|value: &serde_json::Value| {
            let typed: T = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
            Ok(RawComponentBuf::from_value(typed))
        }));
    }

    fn deserialize(
        &self,
        id: ComponentTypeId,
        value: &serde_json::Value,
    ) -> Option<Result<RawComponentBuf, String>> {
        self.deserializers
            .get(id.0 as usize)
            .and_then(|opt| opt.as_ref())
            .map(|f| f(value))
    }
}

impl std::fmt::Debug for DeserializerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeserializerRegistry")
            .field(
                "count",
                &self.deserializers.iter().filter(|d| d.is_some()).count(),
            )
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RawComponentBuf -- properly aligned, type-erased component storage
// ---------------------------------------------------------------------------

/// A properly aligned heap buffer for moving a single component value between
/// archetype tables during a structural transition.
///
/// Uses `std::alloc::alloc` with the correct layout to guarantee alignment.
/// Automatically deallocates on drop. The component's destructor is NOT run
/// on drop -- callers that discard a buffer without moving its bytes into a
/// column must call [`RawComponentBuf::drop_value`] first, or the value leaks
/// (harmless for plain-data components, but wrong for anything owning a
/// resource).
pub(crate) struct RawComponentBuf {
    /// Pointer to the heap allocation (null for ZSTs).
    ptr: *mut u8,
    /// Layout used for allocation (size may be 0 for ZSTs).
    layout: std::alloc::Layout,
}

impl RawComponentBuf {
    /// Create a new buffer from a typed value. The value is moved into the
    /// buffer and forgotten -- ownership transfers to the buffer.
    fn from_value<T>(value: T) -> Self {
        let size = std::mem::size_of::<T>();
        let align = std::mem::align_of::<T>();
        let layout = std::alloc::Layout::from_size_align(size, align).expect("invalid layout");

        if size > 0 {
            #[allow(unsafe_code)]
            let ptr = unsafe {
                let ptr = std::alloc::alloc(layout);
                assert!(!ptr.is_null(), "allocation failed");
                std::ptr::copy_nonoverlapping(&value as *const T as *const u8, ptr, size);
                ptr
            };
            std::mem::forget(value);
            Self { ptr, layout }
        } else {
            std::mem::forget(value);
            Self {
                ptr: std::ptr::null_mut(),
                layout,
            }
        }
    }

    /// Create a buffer by taking ownership of an existing allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must have been allocated with `std::alloc::alloc(layout)` and
    /// must contain a valid, initialized component value.
    unsafe fn from_raw(ptr: *mut u8, layout: std::alloc::Layout) -> Self {
        Self { ptr, layout }
    }

    /// Get a pointer to the stored data.
    fn as_ptr(&self) -> *const u8 {
        if self.layout.size() > 0 {
            self.ptr
        } else {
            // ZST: return a dangling aligned pointer.
            self.layout.align() as *const u8
        }
    }

    /// Drop the component value in place using the provided vtable.
    ///
    /// # Safety
    ///
    /// `vtable` must describe the type whose bytes are stored in this buffer.
    #[allow(unsafe_code)]
    unsafe fn drop_value(&mut self, vtable: &ComponentVtable) {
        if vtable.size > 0 && !self.ptr.is_null() {
            (vtable.drop_fn)(self.ptr);
        }
    }
}

impl Drop for RawComponentBuf {
    fn drop(&mut self) {
        // Deallocate the heap buffer. This does NOT drop the component value;
        // the caller must have already consumed or dropped it.
        if self.layout.size() > 0 && !self.ptr.is_null() {
            #[allow(unsafe_code)]
            unsafe {
                std::alloc::dealloc(self.ptr, self.layout);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Bundle -- tuples of concrete component values for World::spawn_with
// ---------------------------------------------------------------------------

/// A value, or tuple of values (up to arity 4), that can be spawned in one
/// shot via [`World::spawn_with`]. Every field type must already be
/// registered (see [`World::register_component`]); unregistered types are a
/// programmer error and panic, matching the core spec's treatment of
/// structural operations on unregistered component types.
pub trait Bundle {
    #[doc(hidden)]
    fn into_parts(
        self,
        registry: &ComponentRegistry,
    ) -> Vec<(ComponentTypeId, RawComponentBuf, ComponentVtable)>;
}

/// Bound shared by every type usable as a component: cheap to duplicate
/// across a row copy, safe to move across threads, and serde-capable so
/// descriptors, handles, and values can cross a process boundary.
pub trait ComponentValue:
    Clone + Send + Sync + 'static + serde::Serialize + for<'de> serde::Deserialize<'de>
{
}

impl<T> ComponentValue for T where
    T: Clone + Send + Sync + 'static + serde::Serialize + for<'de> serde::Deserialize<'de>
{
}

fn bundle_part<T: ComponentValue>(
    registry: &ComponentRegistry,
    value: T,
) -> (ComponentTypeId, RawComponentBuf, ComponentVtable) {
    let id = registry.lookup::<T>().unwrap_or_else(|| {
        panic!(
            "component type '{}' used in spawn_with before registration -- call \
             World::register_component::<T>() first",
            std::any::type_name::<T>()
        )
    });
    (id, RawComponentBuf::from_value(value), ComponentVtable::new::<T>())
}

fn assert_distinct_types(parts: &[(ComponentTypeId, RawComponentBuf, ComponentVtable)]) {
    for i in 0..parts.len() {
        for j in (i + 1)..parts.len() {
            assert!(
                parts[i].0 != parts[j].0,
                "spawn_with tuple contains the same component type twice -- \
                 duplicate component types violate the archetype's sorted-set invariant"
            );
        }
    }
}

impl<A: ComponentValue> Bundle for (A,) {
    fn into_parts(
        self,
        registry: &ComponentRegistry,
    ) -> Vec<(ComponentTypeId, RawComponentBuf, ComponentVtable)> {
        vec![bundle_part(registry, self.0)]
    }
}

impl<A: ComponentValue, B: ComponentValue> Bundle for (A, B) {
    fn into_parts(
        self,
        registry: &ComponentRegistry,
    ) -> Vec<(ComponentTypeId, RawComponentBuf, ComponentVtable)> {
        let parts = vec![bundle_part(registry, self.0), bundle_part(registry, self.1)];
        assert_distinct_types(&parts);
        parts
    }
}

impl<A: ComponentValue, B: ComponentValue, C: ComponentValue> Bundle for (A, B, C) {
    fn into_parts(
        self,
        registry: &ComponentRegistry,
    ) -> Vec<(ComponentTypeId, RawComponentBuf, ComponentVtable)> {
        let parts = vec![
            bundle_part(registry, self.0),
            bundle_part(registry, self.1),
            bundle_part(registry, self.2),
        ];
        assert_distinct_types(&parts);
        parts
    }
}

impl<A: ComponentValue, B: ComponentValue, C: ComponentValue, D: ComponentValue> Bundle
    for (A, B, C, D)
{
    fn into_parts(
        self,
        registry: &ComponentRegistry,
    ) -> Vec<(ComponentTypeId, RawComponentBuf, ComponentVtable)> {
        let parts = vec![
            bundle_part(registry, self.0),
            bundle_part(registry, self.1),
            bundle_part(registry, self.2),
            bundle_part(registry, self.3),
        ];
        assert_distinct_types(&parts);
        parts
    }
}

/// A heterogeneous, runtime-built bundle of components, for call sites that
/// don't know the bundle's shape at compile time (e.g. building up a spawn
/// from a loop over optional fields). Prefer [`World::spawn_with`] with a
/// tuple when the shape is known statically.
pub struct ComponentBundle {
    entries: Vec<(ComponentTypeId, RawComponentBuf, ComponentVtable)>,
}

impl ComponentBundle {
    /// Create an empty bundle.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add a component to the bundle. The component type must already be
    /// registered in the world's registry.
    ///
    /// # Panics
    ///
    /// Panics if the component type is not registered, or if a component of
    /// the same type has already been added to this bundle.
    pub fn add<T: ComponentValue>(&mut self, registry: &ComponentRegistry, value: T) {
        let (type_id, buf, vtable) = bundle_part(registry, value);
        assert!(
            !self.entries.iter().any(|(id, _, _)| *id == type_id),
            "duplicate component type {:?} in ComponentBundle -- each component type can only be added once",
            type_id
        );
        self.entries.push((type_id, buf, vtable));
    }

    pub(crate) fn into_raw_parts(
        mut self,
    ) -> Vec<(ComponentTypeId, RawComponentBuf, ComponentVtable)> {
        std::mem::take(&mut self.entries)
    }
}

impl Default for ComponentBundle {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ComponentBundle {
    fn drop(&mut self) {
        for (_id, mut buf, vtable) in self.entries.drain(..) {
            #[allow(unsafe_code)]
            unsafe {
                buf.drop_value(&vtable);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// The top-level ECS container.
///
/// Owns the entity allocator, component registry, and all archetype storage.
/// Provides the primary API for entity lifecycle, component access, and
/// bulk iteration (see [`crate::query`]).
pub struct World {
    /// Entity ID allocator (generations, alive flags, free-list).
    pub(crate) allocator: EntityAllocator,
    /// Component type registry.
    pub(crate) registry: ComponentRegistry,
    /// Vtable registry for drop fns, indexed in lockstep with `registry`.
    vtable_registry: VtableRegistry,
    /// JSON deserializers for the name-keyed type-erased accessors, indexed
    /// in lockstep with `registry`.
    deserializer_registry: DeserializerRegistry,
    /// Default column growth policy applied to newly created archetypes.
    column_growth: ColumnGrowth,
    /// All archetypes, indexed by `ArchetypeId.0`. Archetypes are created on
    /// first use and never removed, so an `ArchetypeId` is valid for the
    /// world's entire lifetime once issued.
    pub(crate) archetypes: Vec<Archetype>,
    /// Deduplicates archetypes by their sorted component-id set.
    archetype_index: HashMap<Vec<ComponentTypeId>, ArchetypeId>,
    /// Directory: entity index -> (archetype, row). `None` for indices that
    /// are currently on the allocator's free-list or have never been used.
    entity_locations: Vec<Option<EntityLocation>>,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entity_count", &self.entity_count())
            .field("archetype_count", &self.archetypes.len())
            .finish()
    }
}

impl World {
    /// Create a new, empty world with the default column growth policy.
    pub fn new() -> Self {
        Self::with_column_growth(ColumnGrowth::default())
    }

    /// Create a new, empty world whose archetype columns grow according to
    /// `growth` instead of the default policy.
    pub fn with_column_growth(growth: ColumnGrowth) -> Self {
        let mut world = Self {
            allocator: EntityAllocator::new(),
            registry: ComponentRegistry::new(),
            vtable_registry: VtableRegistry::new(),
            deserializer_registry: DeserializerRegistry::new(),
            column_growth: growth,
            archetypes: Vec::new(),
            archetype_index: HashMap::new(),
            entity_locations: Vec::new(),
        };
        // The empty archetype always exists, at index 0, so that spawn()
        // never has to special-case "no components yet".
        world.get_or_create_archetype(&[]);
        world
    }

    /// Read-only access to the component registry.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Register a component type. Idempotent per type.
    pub fn register_component<T: ComponentValue>(&mut self, name: &str) -> ComponentTypeId {
        let id = self.registry.register::<T>(name);
        self.vtable_registry.register::<T>(id);
        self.deserializer_registry.register::<T>(id);
        id
    }

    // -- archetype management -------------------------------------------

    /// Find or create the archetype for a given sorted set of component
    /// types. `type_ids` must already be sorted ascending and deduplicated.
    fn get_or_create_archetype(&mut self, type_ids: &[ComponentTypeId]) -> ArchetypeId {
        if let Some(&id) = self.archetype_index.get(type_ids) {
            return id;
        }
        let id = ArchetypeId(self.archetypes.len() as u32);
        let infos: Vec<ComponentInfo> = type_ids
            .iter()
            .map(|tid| {
                self.registry
                    .get_info(*tid)
                    .expect("component type not registered")
                    .clone()
            })
            .collect();
        let vtables: Vec<ComponentVtable> = type_ids
            .iter()
            .map(|tid| self.vtable_registry.get(*tid).clone())
            .collect();
        tracing::debug!(
            archetype = id.0,
            components = type_ids.len(),
            "creating archetype table"
        );
        let archetype =
            Archetype::with_growth(id, type_ids.to_vec(), infos, vtables, self.column_growth);
        self.archetypes.push(archetype);
        self.archetype_index.insert(type_ids.to_vec(), id);
        id
    }

    fn location_of(&self, entity: EntityId) -> Option<EntityLocation> {
        if !self.allocator.is_alive(entity) {
            return None;
        }
        self.entity_locations
            .get(entity.index() as usize)
            .copied()
            .flatten()
    }

    fn set_location(&mut self, entity: EntityId, loc: EntityLocation) {
        let idx = entity.index() as usize;
        if idx >= self.entity_locations.len() {
            self.entity_locations.resize(idx + 1, None);
        }
        self.entity_locations[idx] = Some(loc);
    }

    fn clear_location(&mut self, entity: EntityId) {
        if let Some(slot) = self.entity_locations.get_mut(entity.index() as usize) {
            *slot = None;
        }
    }

    // -- entity lifecycle -------------------------------------------------

    /// Spawn a new entity with no components, placed in the empty archetype.
    pub fn spawn(&mut self) -> EntityId {
        let entity = self.allocator.allocate();
        let empty = self.get_or_create_archetype(&[]);
        let row = self.archetypes[empty.0 as usize].len();
        #[allow(unsafe_code)]
        unsafe {
            self.archetypes[empty.0 as usize].add_entity(entity, &[]);
        }
        self.set_location(
            entity,
            EntityLocation {
                archetype_id: empty,
                row,
            },
        );
        entity
    }

    /// Spawn a new entity from a tuple (or single value, treated as a
    /// 1-tuple) of already-registered component types.
    ///
    /// # Panics
    ///
    /// Panics if any field's type was never registered, or if the tuple
    /// names the same component type more than once.
    pub fn spawn_with<B: Bundle>(&mut self, bundle: B) -> EntityId {
        let entity = self.allocator.allocate();
        let parts = bundle.into_parts(&self.registry);
        let mut type_ids: Vec<ComponentTypeId> = parts.iter().map(|(id, _, _)| *id).collect();
        type_ids.sort();

        let archetype_id = self.get_or_create_archetype(&type_ids);

        let mut components: Vec<(ComponentTypeId, *const u8)> =
            parts.iter().map(|(id, buf, _)| (*id, buf.as_ptr())).collect();
        components.sort_by_key(|(id, _)| *id);

        #[allow(unsafe_code)]
        let row =
            unsafe { self.archetypes[archetype_id.0 as usize].add_entity(entity, &components) };
        drop(parts); // bytes already copied into the archetype's columns

        self.set_location(
            entity,
            EntityLocation {
                archetype_id,
                row,
            },
        );
        entity
    }

    /// Spawn a new entity from a runtime-built [`ComponentBundle`], for call
    /// sites that don't know the component set at compile time.
    ///
    /// # Panics
    ///
    /// Panics if the bundle names the same component type more than once
    /// (guarded against by `ComponentBundle::add` already).
    pub fn spawn_bundle(&mut self, bundle: ComponentBundle) -> EntityId {
        let entity = self.allocator.allocate();
        let parts = bundle.into_raw_parts();
        let mut type_ids: Vec<ComponentTypeId> = parts.iter().map(|(id, _, _)| *id).collect();
        type_ids.sort();

        let archetype_id = self.get_or_create_archetype(&type_ids);

        let mut components: Vec<(ComponentTypeId, *const u8)> =
            parts.iter().map(|(id, buf, _)| (*id, buf.as_ptr())).collect();
        components.sort_by_key(|(id, _)| *id);

        #[allow(unsafe_code)]
        let row =
            unsafe { self.archetypes[archetype_id.0 as usize].add_entity(entity, &components) };
        drop(parts); // bytes already copied into the archetype's columns

        self.set_location(
            entity,
            EntityLocation {
                archetype_id,
                row,
            },
        );
        entity
    }

    /// Despawn an entity, removing it from its archetype and recycling its
    /// index.
    ///
    /// A no-op if `entity` is stale (already despawned, or never spawned) --
    /// this does not assert liveness, unlike every other mutating operation.
    pub fn despawn(&mut self, entity: EntityId) {
        let Some(loc) = self.location_of(entity) else {
            return;
        };
        let archetype = &mut self.archetypes[loc.archetype_id.0 as usize];
        let swapped = archetype.remove_entity(loc.row);
        if let Some(moved_entity) = swapped {
            self.set_location(
                moved_entity,
                EntityLocation {
                    archetype_id: loc.archetype_id,
                    row: loc.row,
                },
            );
        }
        self.clear_location(entity);
        self.allocator.deallocate(entity);
    }

    /// Whether `entity` refers to a currently alive entity.
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.allocator.is_alive(entity)
    }

    /// Total number of currently alive entities.
    pub fn entity_count(&self) -> usize {
        self.allocator.alive_count()
    }

    /// Total number of archetypes created so far (including the empty one).
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    // -- typed component access -------------------------------------------

    /// Get an immutable reference to a component on an entity. Returns
    /// `None` if the entity is dead or its archetype lacks the component.
    pub fn get_component<T: 'static>(&self, entity: EntityId) -> Option<&T> {
        let loc = self.location_of(entity)?;
        let type_id = self.registry.lookup::<T>()?;
        #[allow(unsafe_code)]
        unsafe {
            self.archetypes[loc.archetype_id.0 as usize].get_component::<T>(loc.row, type_id)
        }
    }

    /// Get a mutable reference to a component on an entity.
    pub fn get_component_mut<T: 'static>(&mut self, entity: EntityId) -> Option<&mut T> {
        let loc = self.location_of(entity)?;
        let type_id = self.registry.lookup::<T>()?;
        #[allow(unsafe_code)]
        unsafe {
            self.archetypes[loc.archetype_id.0 as usize].get_component_mut::<T>(loc.row, type_id)
        }
    }

    /// Whether an entity has a given component type.
    pub fn has_component<T: 'static>(&self, entity: EntityId) -> bool {
        let Some(loc) = self.location_of(entity) else {
            return false;
        };
        let Some(type_id) = self.registry.lookup::<T>() else {
            return false;
        };
        self.archetypes[loc.archetype_id.0 as usize].has_component(type_id)
    }

    /// Insert a component on an entity. If the entity already has a
    /// component of this type, the value is overwritten in place; otherwise
    /// the entity migrates to the archetype `source ∪ {T}`.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::StaleEntity`] if `entity` is dead, or
    /// [`EcsError::UnknownComponent`] if `T` was never registered.
    pub fn insert_component<T: ComponentValue>(
        &mut self,
        entity: EntityId,
        value: T,
    ) -> Result<(), EcsError> {
        let type_id = self.require_registered::<T>()?;
        let loc = self.require_alive(entity)?;
        if self.archetypes[loc.archetype_id.0 as usize].has_component(type_id) {
            #[allow(unsafe_code)]
            let slot = unsafe {
                self.archetypes[loc.archetype_id.0 as usize]
                    .get_component_mut::<T>(loc.row, type_id)
            };
            *slot.expect("has_component just reported true") = value;
            return Ok(());
        }
        self.migrate_insert(entity, loc, type_id, RawComponentBuf::from_value(value));
        Ok(())
    }

    /// Remove a component type from an entity, migrating it to the archetype
    /// `source \ {T}`. A no-op if the entity does not have the component.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::StaleEntity`] if `entity` is dead, or
    /// [`EcsError::UnknownComponent`] if `T` was never registered.
    pub fn remove_component<T: ComponentValue>(&mut self, entity: EntityId) -> Result<(), EcsError> {
        let type_id = self.require_registered::<T>()?;
        let loc = self.require_alive(entity)?;
        if !self.archetypes[loc.archetype_id.0 as usize].has_component(type_id) {
            return Ok(());
        }
        self.migrate_remove(entity, loc, type_id);
        Ok(())
    }

    // -- name-keyed type-erased component access -----------------------------

    /// Set a component on an entity from a JSON value, keyed by the
    /// component's registered string name rather than its Rust type.
    ///
    /// The JSON is deserialized through the deserializer captured at
    /// [`World::register_component`] time. If the entity already has the
    /// component, the new value overwrites it in place; otherwise the entity
    /// migrates to the archetype that includes it.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::UnknownComponent`] if `component_name` was never
    /// registered, [`EcsError::StaleEntity`] if `entity` is dead, or
    /// [`EcsError::ComponentDeserializationError`] if `value` does not match
    /// the component's schema.
    pub fn set_component_by_name(
        &mut self,
        entity: EntityId,
        component_name: &str,
        value: &serde_json::Value,
    ) -> Result<(), EcsError> {
        let type_id = self
            .registry
            .lookup_by_name(component_name)
            .ok_or_else(|| EcsError::UnknownComponent(component_name.to_owned()))?;
        let loc = self.require_alive(entity)?;

        let raw_buf = self
            .deserializer_registry
            .deserialize(type_id, value)
            .ok_or_else(|| EcsError::UnknownComponent(component_name.to_owned()))?
            .map_err(|details| EcsError::ComponentDeserializationError {
                component: component_name.to_owned(),
                details,
            })?;

        if self.archetypes[loc.archetype_id.0 as usize].has_component(type_id) {
            let info = self.registry.get_info(type_id).expect("just looked up by name");
            let vtable = self.vtable_registry.get(type_id).clone();
            let archetype = &mut self.archetypes[loc.archetype_id.0 as usize];
            #[allow(unsafe_code)]
            unsafe {
                if let Some(ptr) = archetype.get_component_raw_mut(loc.row, type_id) {
                    (vtable.drop_fn)(ptr);
                    if info.size > 0 {
                        std::ptr::copy_nonoverlapping(raw_buf.as_ptr(), ptr, info.size);
                    }
                }
            }
            return Ok(());
        }

        self.migrate_insert(entity, loc, type_id, raw_buf);
        Ok(())
    }

    /// Remove a component from an entity by its registered string name. A
    /// no-op if the entity does not have the named component.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::UnknownComponent`] if `component_name` was never
    /// registered, or [`EcsError::StaleEntity`] if `entity` is dead.
    pub fn remove_component_by_name(
        &mut self,
        entity: EntityId,
        component_name: &str,
    ) -> Result<(), EcsError> {
        let type_id = self
            .registry
            .lookup_by_name(component_name)
            .ok_or_else(|| EcsError::UnknownComponent(component_name.to_owned()))?;
        let loc = self.require_alive(entity)?;
        if !self.archetypes[loc.archetype_id.0 as usize].has_component(type_id) {
            return Ok(());
        }
        self.migrate_remove(entity, loc, type_id);
        Ok(())
    }

    // -- migration helpers --------------------------------------------------

    fn require_alive(&self, entity: EntityId) -> Result<EntityLocation, EcsError> {
        self.location_of(entity).ok_or(EcsError::StaleEntity(entity))
    }

    fn require_registered<T: 'static>(&self) -> Result<ComponentTypeId, EcsError> {
        self.registry
            .lookup::<T>()
            .ok_or_else(|| EcsError::UnknownComponent(std::any::type_name::<T>().to_owned()))
    }

    /// Extract every component currently on `loc`'s row into raw buffers,
    /// fixing up the directory entry of whichever entity gets swapped into
    /// the vacated row.
    #[allow(unsafe_code)]
    fn extract_row(
        &mut self,
        loc: EntityLocation,
    ) -> Vec<(ComponentTypeId, RawComponentBuf)> {
        let mut extracted: Vec<(ComponentTypeId, RawComponentBuf)> = Vec::new();
        let swapped = unsafe {
            self.archetypes[loc.archetype_id.0 as usize].remove_entity_and_move(
                loc.row,
                |tid, ptr, vtable| {
                    let layout = std::alloc::Layout::from_size_align(vtable.size, vtable.align)
                        .expect("invalid component layout");
                    let buf = RawComponentBuf::from_raw(ptr as *mut u8, layout);
                    extracted.push((tid, buf));
                },
            )
        };
        if let Some(moved_entity) = swapped {
            self.set_location(
                moved_entity,
                EntityLocation {
                    archetype_id: loc.archetype_id,
                    row: loc.row,
                },
            );
        }
        extracted
    }

    /// Insert extracted (or newly built) components into `target`, returning
    /// the new row.
    #[allow(unsafe_code)]
    fn insert_row(
        &mut self,
        entity: EntityId,
        target: ArchetypeId,
        parts: Vec<(ComponentTypeId, RawComponentBuf)>,
    ) -> usize {
        let mut components: Vec<(ComponentTypeId, *const u8)> =
            parts.iter().map(|(id, buf)| (*id, buf.as_ptr())).collect();
        components.sort_by_key(|(id, _)| *id);
        let row = unsafe { self.archetypes[target.0 as usize].add_entity(entity, &components) };
        drop(parts); // bytes already copied into the new archetype's columns
        row
    }

    /// Move `entity` from its current archetype into `source ∪ {id}`,
    /// writing `new_component`'s bytes into the new column slot.
    fn migrate_insert(
        &mut self,
        entity: EntityId,
        loc: EntityLocation,
        id: ComponentTypeId,
        new_component: RawComponentBuf,
    ) {
        let mut new_types = self.archetypes[loc.archetype_id.0 as usize]
            .component_types()
            .to_vec();
        new_types.push(id);
        new_types.sort();

        let mut extracted = self.extract_row(loc);
        extracted.push((id, new_component));

        let target = self.get_or_create_archetype(&new_types);
        let row = self.insert_row(entity, target, extracted);
        self.set_location(
            entity,
            EntityLocation {
                archetype_id: target,
                row,
            },
        );
    }

    /// Move `entity` from its current archetype into `source \ {id}`,
    /// dropping the removed component's value.
    fn migrate_remove(&mut self, entity: EntityId, loc: EntityLocation, id: ComponentTypeId) {
        let new_types: Vec<ComponentTypeId> = self.archetypes[loc.archetype_id.0 as usize]
            .component_types()
            .iter()
            .copied()
            .filter(|t| *t != id)
            .collect();

        let vtable = self.vtable_registry.get(id).clone();
        let extracted = self.extract_row(loc);
        let mut kept = Vec::with_capacity(extracted.len() - 1);
        for (tid, mut buf) in extracted {
            if tid == id {
                #[allow(unsafe_code)]
                unsafe {
                    buf.drop_value(&vtable);
                }
            } else {
                kept.push((tid, buf));
            }
        }

        let target = self.get_or_create_archetype(&new_types);
        let row = self.insert_row(entity, target, kept);
        self.set_location(
            entity,
            EntityLocation {
                archetype_id: target,
                row,
            },
        );
    }

    // -- query helpers (used by query.rs) -----------------------------------

    /// Find all archetype IDs whose component set is a superset of `required`.
    pub(crate) fn matching_archetypes(&self, required: &[ComponentTypeId]) -> Vec<ArchetypeId> {
        self.archetypes
            .iter()
            .filter(|arch| required.iter().all(|req| arch.has_component(*req)))
            .map(|arch| arch.id())
            .collect()
    }

    /// Look up the `ComponentTypeId` for a Rust type.
    pub(crate) fn component_type_id<T: 'static>(&self) -> Option<ComponentTypeId> {
        self.registry.lookup::<T>()
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for World {
    fn drop(&mut self) {
        tracing::debug!(
            entities = self.entity_count(),
            archetypes = self.archetypes.len(),
            "world dropped, tearing down all archetype tables"
        );
        // Archetype's own Drop impl runs the per-column vtable drop over
        // every remaining row; nothing further to do here.
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Pos {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Vel {
        dx: f32,
        dy: f32,
    }

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Health(u32);

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Tag;

    fn setup_world() -> World {
        let mut world = World::new();
        world.register_component::<Pos>("position");
        world.register_component::<Vel>("velocity");
        world.register_component::<Health>("health");
        world.register_component::<Tag>("tag");
        world
    }

    #[test]
    fn spawn_empty_then_insert() {
        let mut world = setup_world();
        let e = world.spawn();
        assert!(world.is_alive(e));
        assert!(!world.has_component::<Pos>(e));
        world.insert_component(e, Pos { x: 1.0, y: 2.0 }).unwrap();
        assert_eq!(world.get_component::<Pos>(e), Some(&Pos { x: 1.0, y: 2.0 }));
    }

    #[test]
    fn spawn_with_single_tuple() {
        let mut world = setup_world();
        let e = world.spawn_with((Pos { x: 10.0, y: 20.0 },));
        assert_eq!(
            world.get_component::<Pos>(e),
            Some(&Pos { x: 10.0, y: 20.0 })
        );
    }

    #[test]
    fn spawn_with_pair_tuple() {
        let mut world = setup_world();
        let e = world.spawn_with((Pos { x: 0.0, y: 0.0 }, Vel { dx: 1.0, dy: 1.0 }));
        assert_eq!(world.get_component::<Pos>(e), Some(&Pos { x: 0.0, y: 0.0 }));
        assert_eq!(world.get_component::<Vel>(e), Some(&Vel { dx: 1.0, dy: 1.0 }));
    }

    #[test]
    #[should_panic(expected = "duplicate component type")]
    fn spawn_with_rejects_duplicate_types() {
        let mut world = setup_world();
        let _ = world.spawn_with((Pos { x: 0.0, y: 0.0 }, Pos { x: 1.0, y: 1.0 }));
    }

    #[test]
    fn despawn_is_silent_noop_on_stale_handle() {
        let mut world = setup_world();
        let e = world.spawn_with((Pos { x: 0.0, y: 0.0 },));
        world.despawn(e);
        assert!(!world.is_alive(e));
        world.despawn(e); // must not panic
        assert!(!world.is_alive(e));
    }

    #[test]
    fn insert_component_migrates_archetype() {
        let mut world = setup_world();
        let e = world.spawn_with((Pos { x: 1.0, y: 2.0 },));
        let before = world.archetype_count();

        world.insert_component(e, Vel { dx: 5.0, dy: 6.0 }).unwrap();

        assert!(world.has_component::<Vel>(e));
        assert_eq!(world.get_component::<Pos>(e), Some(&Pos { x: 1.0, y: 2.0 }));
        assert!(world.archetype_count() > before);
    }

    #[test]
    fn insert_component_overwrites_in_place_when_already_present() {
        let mut world = setup_world();
        let e = world.spawn_with((Pos { x: 1.0, y: 2.0 },));
        let before = world.archetype_count();

        world.insert_component(e, Pos { x: 9.0, y: 9.0 }).unwrap();

        assert_eq!(world.get_component::<Pos>(e), Some(&Pos { x: 9.0, y: 9.0 }));
        assert_eq!(world.archetype_count(), before);
    }

    #[test]
    fn remove_component_migrates_archetype() {
        let mut world = setup_world();
        let e = world.spawn_with((Pos { x: 1.0, y: 2.0 }, Vel { dx: 3.0, dy: 4.0 }));
        assert!(world.has_component::<Vel>(e));

        world.remove_component::<Vel>(e).unwrap();
        assert!(!world.has_component::<Vel>(e));
        assert_eq!(world.get_component::<Pos>(e), Some(&Pos { x: 1.0, y: 2.0 }));
    }

    #[test]
    fn remove_component_is_noop_when_absent() {
        let mut world = setup_world();
        let e = world.spawn_with((Pos { x: 1.0, y: 2.0 },));
        world.remove_component::<Vel>(e).unwrap(); // should not error or panic
        assert!(!world.has_component::<Vel>(e));
    }

    #[test]
    fn stale_entity_errors_on_mutating_ops() {
        let mut world = setup_world();
        let e = world.spawn_with((Pos { x: 0.0, y: 0.0 },));
        world.despawn(e);
        assert!(matches!(
            world.insert_component(e, Vel { dx: 1.0, dy: 1.0 }),
            Err(EcsError::StaleEntity(_))
        ));
        assert!(matches!(
            world.remove_component::<Pos>(e),
            Err(EcsError::StaleEntity(_))
        ));
    }

    #[test]
    fn unregistered_component_type_errors() {
        let mut world = World::new();
        world.register_component::<Pos>("position");
        let e = world.spawn_with((Pos { x: 0.0, y: 0.0 },));
        assert!(matches!(
            world.insert_component(e, Vel { dx: 1.0, dy: 1.0 }),
            Err(EcsError::UnknownComponent(_))
        ));
    }

    #[test]
    fn set_component_by_name_inserts_and_overwrites() {
        let mut world = setup_world();
        let e = world.spawn();

        world
            .set_component_by_name(e, "health", &serde_json::json!(100))
            .unwrap();
        assert_eq!(world.get_component::<Health>(e), Some(&Health(100)));

        world
            .set_component_by_name(e, "health", &serde_json::json!(50))
            .unwrap();
        assert_eq!(world.get_component::<Health>(e), Some(&Health(50)));
    }

    #[test]
    fn set_component_by_name_unknown_name_errors() {
        let mut world = setup_world();
        let e = world.spawn();
        assert!(matches!(
            world.set_component_by_name(e, "nonexistent", &serde_json::json!(1)),
            Err(EcsError::UnknownComponent(_))
        ));
    }

    #[test]
    fn set_component_by_name_schema_mismatch_errors() {
        let mut world = setup_world();
        let e = world.spawn();
        assert!(matches!(
            world.set_component_by_name(e, "health", &serde_json::json!("not a number")),
            Err(EcsError::ComponentDeserializationError { .. })
        ));
    }

    #[test]
    fn remove_component_by_name_roundtrip() {
        let mut world = setup_world();
        let e = world.spawn();
        world
            .set_component_by_name(e, "health", &serde_json::json!(100))
            .unwrap();
        assert!(world.has_component::<Health>(e));

        world.remove_component_by_name(e, "health").unwrap();
        assert!(!world.has_component::<Health>(e));
        // Removing again is a silent no-op.
        world.remove_component_by_name(e, "health").unwrap();
    }

    #[test]
    fn zero_sized_component_roundtrip() {
        let mut world = setup_world();
        let e = world.spawn_with((Tag,));
        assert!(world.has_component::<Tag>(e));
        assert_eq!(world.get_component::<Tag>(e), Some(&Tag));
    }

    #[test]
    fn despawn_fixes_up_swapped_row() {
        let mut world = setup_world();
        let e1 = world.spawn_with((Pos { x: 1.0, y: 1.0 },));
        let e2 = world.spawn_with((Pos { x: 2.0, y: 2.0 },));
        let e3 = world.spawn_with((Pos { x: 3.0, y: 3.0 },));

        world.despawn(e1); // e3 (last) swaps into e1's row
        assert_eq!(world.entity_count(), 2);
        assert_eq!(world.get_component::<Pos>(e2), Some(&Pos { x: 2.0, y: 2.0 }));
        assert_eq!(world.get_component::<Pos>(e3), Some(&Pos { x: 3.0, y: 3.0 }));
    }

    #[test]
    fn despawn_then_spawn_reuses_slot_with_new_generation() {
        let mut world = setup_world();
        let e = world.spawn_with((Pos { x: 0.0, y: 0.0 },));
        let old = e;
        world.despawn(e);
        let e2 = world.spawn_with((Pos { x: 1.0, y: 1.0 },));
        assert_eq!(e2.index(), old.index());
        assert_ne!(e2.generation(), old.generation());
        assert!(!world.is_alive(old));
        assert!(world.is_alive(e2));
    }

    #[test]
    fn register_component_twice_is_idempotent() {
        let mut world = World::new();
        let id1 = world.register_component::<Pos>("position");
        let id2 = world.register_component::<Pos>("position_again");
        assert_eq!(id1, id2);
    }
}
