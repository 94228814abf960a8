//! Dependency graph
//!
//! Resolves the cross-repository dependencies of candidate changes into a
//! cycle-condensed transitive map.

mod builder;
mod closure;

pub use builder::get_depend_map_for_changes;
pub use closure::DependencyMap;
