//! Virtual Filesystem Simulator
//!
//! Previews a plan without touching the disk: a ghost projection over the
//! real listing and a two-column diff tree. Only `list_directory` reads
//! from disk.

pub mod diff;
pub mod ghost;
pub mod listing;

pub use diff::{diff_tree, DiffNode, DiffStatus, DiffTree};
pub use ghost::{project, project_with_progress, visible_in, GhostEntry, GhostKind};
pub use listing::{list_directory, FileEntry, ListingError};
