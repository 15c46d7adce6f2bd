// Deletion Planning
//
// Turns resolved table locations into prefix-level deletion directives.
// This module is pure and deterministic: the same locations in the same
// order always produce the same plan.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::drops::DropEvent;
use crate::history::TableIdentifier;
use crate::resolve::{StoragePrefix, TableLocation};

/// One storage prefix scheduled for recursive removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionDirective {
    pub prefix: StoragePrefix,

    /// Every drop that resolved to `prefix`, in the order they were seen.
    pub sources: Vec<DropEvent>,
}

impl DeletionDirective {
    /// Timestamp of the first drop that produced this directive.
    pub fn first_seen(&self) -> Option<DateTime<Utc>> {
        self.sources.first().map(|event| event.timestamp)
    }

    /// Distinct tables behind this directive.
    pub fn tables(&self) -> Vec<&TableIdentifier> {
        let mut tables: Vec<&TableIdentifier> = Vec::new();
        for event in &self.sources {
            if !tables.contains(&&event.table) {
                tables.push(&event.table);
            }
        }
        tables
    }
}

/// Ordered set of directives for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionPlan {
    pub directives: Vec<DeletionDirective>,
}

impl DeletionPlan {
    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    /// Directive that will act on behalf of `drop`, if any.
    pub fn directive_for(&self, drop: &DropEvent) -> Option<&DeletionDirective> {
        self.directives
            .iter()
            .find(|d| d.sources.iter().any(|s| s.commit_id == drop.commit_id))
    }
}

/// Build a plan from resolved locations.
///
/// Locations sharing an identical prefix merge into one directive.
/// Nested prefixes are deliberately left as separate directives.
/// Directives are ordered by their first-seen drop, newest first.
pub fn build_plan<I>(locations: I) -> DeletionPlan
where
    I: IntoIterator<Item = TableLocation>,
{
    let mut directives: Vec<DeletionDirective> = Vec::new();
    let mut by_prefix: HashMap<StoragePrefix, usize> = HashMap::new();

    for location in locations {
        match by_prefix.get(&location.prefix) {
            Some(&idx) => directives[idx].sources.push(location.drop),
            None => {
                by_prefix.insert(location.prefix.clone(), directives.len());
                directives.push(DeletionDirective {
                    prefix: location.prefix,
                    sources: vec![location.drop],
                });
            }
        }
    }

    // Stable sort keeps first-seen order between equal timestamps.
    directives.sort_by(|a, b| b.first_seen().cmp(&a.first_seen()));

    DeletionPlan { directives }
}
