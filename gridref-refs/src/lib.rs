//! Reference fragments and flat manifests.
//!
//! A manifest maps zarr v2 style keys (`group/array/.zarray`, `group/array/0.0`, ...) to either a
//! literal value or a byte range inside an external resource. Decoders emit one
//! [`ReferenceFragment`] per physical record; the tree builder merges them into a single
//! [`FlatManifest`].

mod dtype;
mod fragment;
mod manifest;
mod value;
pub mod zarr;

pub use dtype::*;
pub use fragment::*;
pub use manifest::*;
pub use value::*;
pub use zarr::{ArrayMetadata, Attributes, RefStore, build_path};
