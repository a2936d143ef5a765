//! Learner, persona, and memory-graph adapters (spec.md §4.13).
//!
//! All three read or write through a collaborator trait rather than this
//! crate's own `storage` tables: the knowledge base, persona store, and
//! memory graph are named in spec.md §1 as external services (vector
//! store, graph store, and a relational store beyond the ten tables this
//! core owns), so each module defines the seam it calls through and
//! leaves the concrete store to the deployment wiring it up.

pub mod learner;
pub mod memory_graph;
pub mod persona;

pub use learner::{KnowledgeCollaborator, Lesson, TaskLearner};
pub use memory_graph::{EntityNode, EntityType, GraphContext, MemoryGraph, MemoryGraphCollaborator, RelationEdge, RelationType};
pub use persona::{PersonaCollaborator, PersonaLearner, PreferenceSignal, UserPreferences};
