//! Shoal Views - index-driven entity sets and authority orchestration
//!
//! - `EntityView`: one entity's reader and its cached classification
//! - `MultiIndexView`: entity set materialized from a dynamic set of indexes
//! - `ServerView`: owned entities, their read dependencies, and migration
//!
//! Views never own readers directly; they hold `ReaderId` handles into the
//! `StreamContext` passed to every tick.

pub mod classify;
pub mod entity;
pub mod index;
pub mod logic;
pub mod multi_index;
pub mod server;

pub use classify::*;
pub use entity::EntityView;
pub use index::write_to_index;
pub use logic::{EntityLogic, EntityPatch};
pub use multi_index::MultiIndexView;
pub use server::{Migration, ServerView, TickReport};
