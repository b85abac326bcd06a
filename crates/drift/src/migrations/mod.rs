//! Migration System
//!
//! File discovery and authoring live in [`manager`], the naming convention in
//! [`filename`], and database application in [`runner`].

pub mod definitions;
pub mod filename;
pub mod manager;
pub mod runner;

pub use definitions::*;
pub use filename::*;
pub use manager::*;
pub use runner::*;
