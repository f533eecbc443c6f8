//! An archetype-based Entity Component System core.
//!
//! Entities are stored in archetypes (one per unique set of component types)
//! using a Structure-of-Arrays (SoA) layout for cache-friendly iteration.
//! Generational entity IDs enable immediate stale-reference detection.
//!
//! # Quick Start
//!
//! ```
//! use nomai_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Position { x: f32, y: f32 }
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Velocity { dx: f32, dy: f32 }
//!
//! let mut world = World::new();
//! world.register_component::<Position>("position");
//! world.register_component::<Velocity>("velocity");
//!
//! let entity = world.spawn_with((
//!     Position { x: 0.0, y: 0.0 },
//!     Velocity { dx: 1.0, dy: 0.0 },
//! ));
//!
//! assert_eq!(world.get_component::<Position>(entity), Some(&Position { x: 0.0, y: 0.0 }));
//! ```

#![deny(unsafe_code)]

#[allow(unsafe_code)]
pub mod archetype;
pub mod component;
pub mod entity;
#[allow(unsafe_code)]
pub mod query;
#[allow(unsafe_code)]
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
///
/// A stale or dead entity handle is a recoverable error everywhere *except*
/// [`world::World::despawn`] and [`world::World::is_alive`], where it is
/// expected traffic and handled silently (a no-op, and `false`,
/// respectively) rather than surfaced here.
///
/// Allocation failure is not represented in this enum: like the rest of the
/// standard library's collections, an out-of-memory condition during a
/// structural mutation aborts the process via `assert!` rather than
/// unwinding through a `Result`. See `DESIGN.md` for the reasoning.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The entity does not exist (stale generation or never allocated).
    #[error("entity {0:?} does not exist (stale or never allocated)")]
    StaleEntity(entity::EntityId),

    /// A component type was referenced that has not been registered.
    #[error("component type '{0}' is not registered")]
    UnknownComponent(String),

    /// A JSON value passed to a name-keyed setter did not match the
    /// registered component's shape.
    #[error("failed to deserialize component '{component}': {details}")]
    ComponentDeserializationError {
        /// The registered name of the component that failed to deserialize.
        component: String,
        /// The underlying `serde_json` error message.
        details: String,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::archetype::{Archetype, ArchetypeId, ColumnGrowth};
    pub use crate::component::{ComponentInfo, ComponentRegistry, ComponentTypeId};
    pub use crate::entity::EntityId;
    pub use crate::query::{Query, QueryItem, QueryIter, QueryIterMut};
    pub use crate::world::{Bundle, ComponentBundle, ComponentValue, World};
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
