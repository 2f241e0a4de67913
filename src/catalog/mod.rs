//! Schema catalog shared by every connection of a database

pub mod registry;

pub use registry::{Catalog, ViewDef};
