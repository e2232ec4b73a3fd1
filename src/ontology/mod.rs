//! RDF input handling
//!
//! - **SHACL validation**: checks transformation inputs against the shapes
//!   named in `schema_files`, degrading to a syntax check when the crate is
//!   built without the `shacl` feature

pub mod shacl;

#[cfg(feature = "shacl")]
pub use shacl::ShaclEngine;
pub use shacl::{
    SchemaDetails, SchemaValidationOutcome, SchemaValidator, ShapeEngine, StructuralEngine,
};
