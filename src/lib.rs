//! Fixture tree generation and file change notification for watcher stress tests.

pub mod events;
pub mod fs;
pub mod generator;
pub mod util;
pub mod watcher;
