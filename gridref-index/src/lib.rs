//! Chunk indexes over merged manifests.
//!
//! [`extract_tree_chunk_index`] lists, for every chunk of every data variable, the coordinate
//! values identifying it and where its bytes live. [`index_messages`] does so one message at a
//! time so that the result can be joined to a [`SideChannelIndex`] and cross-checked with
//! [`build_idx_mapping`].

pub use chunk_index::*;
pub use mapping::*;
pub use sidecar::*;

mod chunk_index;
mod mapping;
mod sidecar;
