//! Schema migration: the version registry and the transform composer.

mod registry;
mod transform;

pub use registry::{MigrationRegistry, RegistryBuilder, TypeIdentity};
pub use transform::{build_transform, CustomFn, MigrationContext, Transform, TransformOp};
