#![deny(missing_docs)]
//! Diagnostics for gridref.
//!
//! Recoverable conditions met while building a manifest (dropped variables, missing chunks,
//! duplicate descriptors, ...) are never errors. They are logged where they happen and counted
//! in a [`Diagnostics`] sink which callers pass explicitly into each component.

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use witchcraft_metrics::{Counter, MetricId, MetricRegistry};

/// A recoverable condition that is counted rather than raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Event {
    /// A fragment whose primary variable decoded as `unknown` was dropped.
    DroppedUnknownVariable,
    /// A categorical attribute surfaced with the value `unknown`.
    UnknownAttributeValue,
    /// A coordinate had no value at a chunk index and was left out of the record.
    DroppedCoordinate,
    /// A chunk key expected by the index was absent from the manifest.
    MissingChunk,
    /// The side-channel index contains duplicate attribute descriptors.
    DuplicateDescriptor,
    /// Computed records share the same variable/level/step/valid-time key.
    DuplicateHierarchyKey,
    /// A message produced an empty manifest or an empty chunk index.
    EmptyMessage,
}

impl Event {
    /// All events, in declaration order.
    pub const ALL: [Event; 7] = [
        Event::DroppedUnknownVariable,
        Event::UnknownAttributeValue,
        Event::DroppedCoordinate,
        Event::MissingChunk,
        Event::DuplicateDescriptor,
        Event::DuplicateHierarchyKey,
        Event::EmptyMessage,
    ];

    /// The metric name under which this event is counted.
    pub const fn name(&self) -> &'static str {
        match self {
            Event::DroppedUnknownVariable => "gridref.tree.dropped_unknown_variables",
            Event::UnknownAttributeValue => "gridref.tree.unknown_attribute_values",
            Event::DroppedCoordinate => "gridref.index.dropped_coordinates",
            Event::MissingChunk => "gridref.index.missing_chunks",
            Event::DuplicateDescriptor => "gridref.index.duplicate_descriptors",
            Event::DuplicateHierarchyKey => "gridref.index.duplicate_hierarchy_keys",
            Event::EmptyMessage => "gridref.index.empty_messages",
        }
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A diagnostics sink backed by a metric registry.
///
/// Cloning is cheap and clones share the same underlying counters, so a single sink can be
/// handed to every component of a run and inspected once the run completes.
#[derive(Default, Clone)]
pub struct Diagnostics {
    registry: Arc<MetricRegistry>,
}

impl Diagnostics {
    fn counter(&self, event: Event) -> Arc<Counter> {
        self.registry.counter(MetricId::new(event.name()))
    }

    /// Count one occurrence of `event`.
    pub fn record(&self, event: Event) {
        self.record_n(event, 1);
    }

    /// Count `n` occurrences of `event`.
    pub fn record_n(&self, event: Event, n: usize) {
        self.counter(event).add(i64::try_from(n).unwrap_or(i64::MAX));
    }

    /// The number of times `event` has been recorded.
    pub fn count(&self, event: Event) -> i64 {
        self.counter(event).count()
    }

    /// A summary of every non-zero event count, in declaration order.
    pub fn summary(&self) -> Vec<(Event, i64)> {
        Event::ALL
            .iter()
            .map(|event| (*event, self.count(*event)))
            .filter(|(_, count)| *count != 0)
            .collect()
    }
}
