//! Build a single hierarchical manifest out of per-message reference fragments.
//!
//! Fragments are grouped by variable, then by `stepType` and `typeOfLevel`. Each group that
//! received fragments is merged by an [`AggregationEngine`] and the merged references are
//! assembled, prefixed by the group path, into one [`FlatManifest`](gridref_refs::FlatManifest).

pub use aggregate::*;
pub use hierarchy::*;
pub use options::*;
pub use preprocess::*;
pub use view::*;

mod aggregate;
mod hierarchy;
mod options;
mod preprocess;
#[cfg(test)]
mod test_util;
mod view;
