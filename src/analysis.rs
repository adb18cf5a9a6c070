//! Analysis tables: windowed (path, values) rows over lifetime records
//!
//! Every per-resource view is the same capability: given an analysis window
//! and a way to name owners, produce rows of (path, measurement vector) for
//! an aggregation tree. One trait covers heap, CPU, disk, whatever the
//! backend supplies; the tree does not care where rows come from.

use std::collections::HashSet;

use crate::correlator::LifetimeRecord;
use crate::impact::{net_impact, STILL_LIVE};
use crate::stack::{stack_strings, StackRef, StackResolver};
use crate::tree::{AggregationTree, TreeError};

/// Half-open analysis window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: i64,
    pub end: i64,
}

/// Maps an owner id (process) to a display name. Owners the resolver does
/// not know are excluded from analysis.
pub trait OwnerNames {
    fn name(&self, owner: u32) -> Option<&str>;
}

/// One (path, values) tuple destined for [`AggregationTree::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub path: Vec<String>,
    pub values: Vec<i64>,
}

/// A windowed view over one resource kind.
pub trait AnalysisTable {
    fn table_name(&self) -> &str;
    fn column_names(&self) -> &[String];
    /// Produce the rows attributable to `window` for owners `names` knows.
    fn rows(&mut self, window: Window, names: &dyn OwnerNames) -> Vec<Row>;
}

/// Drive a table into a fresh tree with the table's column schema.
pub fn build_table(
    table: &mut dyn AnalysisTable,
    window: Window,
    names: &dyn OwnerNames,
) -> Result<AggregationTree, TreeError> {
    let mut tree = AggregationTree::new(table.column_names().to_vec());
    for row in table.rows(window, names) {
        tree.add(&row.path, &row.values)?;
    }
    Ok(tree)
}

/// Heap (or any allocator-shaped) attribution: columns `Count`, `Size`,
/// paths of owner name, creation stack, trailing empty leaf segment.
pub struct HeapAllocations<R> {
    records: Vec<LifetimeRecord>,
    resolver: R,
    /// Allocator entry frames; everything below the first match is cut so
    /// callers aggregate at their own call site, not inside the allocator
    cut_below: HashSet<String>,
    /// Emit stacks innermost first instead of outermost first
    reverse_stacks: bool,
    column_names: Vec<String>,
}

impl<R: StackResolver> HeapAllocations<R> {
    pub fn new(records: Vec<LifetimeRecord>, resolver: R) -> Self {
        Self {
            records,
            resolver,
            cut_below: HashSet::new(),
            reverse_stacks: false,
            column_names: vec!["Count".to_string(), "Size".to_string()],
        }
    }

    /// Cut each stack below its first frame matching one of `frames`.
    pub fn with_cut_below<I, S>(mut self, frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cut_below = frames.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_reversed_stacks(mut self, reverse: bool) -> Self {
        self.reverse_stacks = reverse;
        self
    }

    fn creation_stack(&self, stack_ref: StackRef) -> Vec<String> {
        let resolved = self.resolver.resolve(stack_ref);
        let mut stack = stack_strings(resolved.as_ref());
        if let Some(end) = stack.iter().position(|frame| self.cut_below.contains(frame)) {
            stack.truncate(end + 1);
        }
        if self.reverse_stacks {
            stack.reverse();
        }
        stack
    }
}

impl<R: StackResolver> AnalysisTable for HeapAllocations<R> {
    fn table_name(&self) -> &str {
        if self.reverse_stacks {
            "HeapAllocationsReverse"
        } else {
            "HeapAllocations"
        }
    }

    fn column_names(&self) -> &[String] {
        &self.column_names
    }

    fn rows(&mut self, window: Window, names: &dyn OwnerNames) -> Vec<Row> {
        let mut rows = Vec::new();
        for record in &self.records {
            let Some(owner) = names.name(record.owner) else {
                continue;
            };

            let destroy_time = record.destroy_time.unwrap_or(STILL_LIVE);
            let size = net_impact(
                record.size,
                record.create_time,
                destroy_time,
                window.start,
                window.end,
            );
            if size == 0 {
                continue;
            }

            let mut path = Vec::new();
            path.push(owner.to_string());
            path.extend(self.creation_stack(record.stack));
            path.push(String::new());
            rows.push(Row {
                path,
                values: vec![1, size],
            });
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::LifetimeCorrelator;
    use crate::stack::{Frame, ResolvedStack};
    use std::collections::HashMap;

    struct MapResolver(HashMap<StackRef, Vec<(&'static str, &'static str)>>);

    impl StackResolver for MapResolver {
        fn resolve(&self, stack_ref: StackRef) -> Option<ResolvedStack> {
            self.0.get(&stack_ref).map(|frames| ResolvedStack {
                frames: frames
                    .iter()
                    .map(|(module, function)| Frame {
                        module: Some(module.to_string()),
                        function: Some(function.to_string()),
                    })
                    .collect(),
                idle: false,
            })
        }
    }

    struct OneOwner;

    impl OwnerNames for OneOwner {
        fn name(&self, owner: u32) -> Option<&str> {
            (owner == 42).then_some("app.exe")
        }
    }

    fn window(start: i64, end: i64) -> Window {
        Window { start, end }
    }

    fn sample_records() -> Vec<LifetimeRecord> {
        let mut c = LifetimeCorrelator::new();
        // Born in window, still open: +100
        c.record_create(1, 0x100, 100, 42, 7, 5);
        // Born before, freed in window: -40
        c.record_create(1, 0x200, 40, 42, 7, -5);
        c.record_destroy(1, 0x200, 7, 6);
        // Born and freed in window: nets to zero, no row
        c.record_create(1, 0x300, 30, 42, 7, 2);
        c.record_destroy(1, 0x300, 7, 3);
        // Unknown owner: no row
        c.record_create(1, 0x400, 10, 99, 7, 5);
        c.drain()
    }

    #[test]
    fn test_heap_rows_apply_impact_and_owner_filter() {
        let records = sample_records();
        // innermost first: alloc entry, then caller, then main
        let frames = vec![
            ("ntdll.dll", "RtlAllocateHeap"),
            ("app.exe", "helper"),
            ("app.exe", "main"),
        ];
        let mut stacks = HashMap::new();
        for r in &records {
            stacks.insert(r.stack, frames.clone());
        }

        let mut table = HeapAllocations::new(records, MapResolver(stacks));
        let rows = table.rows(window(0, 10), &OneOwner);

        assert_eq!(rows.len(), 2);
        let expected_path = vec![
            "app.exe".to_string(),
            "[Root]".to_string(),
            "app.exe!main".to_string(),
            "app.exe!helper".to_string(),
            "ntdll.dll!RtlAllocateHeap".to_string(),
            String::new(),
        ];
        assert_eq!(rows[0].path, expected_path);
        assert_eq!(rows[1].path, expected_path);
        // Completed records come out in completion order: the freed one first
        assert_eq!(rows[0].values, vec![1, -40]);
        assert_eq!(rows[1].values, vec![1, 100]);
    }

    #[test]
    fn test_heap_rows_cut_below_allocator_frame() {
        let records = sample_records();
        let mut stacks = HashMap::new();
        for r in &records {
            stacks.insert(
                r.stack,
                vec![
                    ("ntdll.dll", "RtlpAllocateHeapInternal"),
                    ("ntdll.dll", "RtlAllocateHeap"),
                    ("app.exe", "main"),
                ],
            );
        }

        let mut table = HeapAllocations::new(records, MapResolver(stacks))
            .with_cut_below(["ntdll.dll!RtlAllocateHeap"]);
        let rows = table.rows(window(0, 10), &OneOwner);

        // The internal allocator frame below the entry point is gone
        assert_eq!(
            rows[0].path,
            vec![
                "app.exe".to_string(),
                "[Root]".to_string(),
                "app.exe!main".to_string(),
                "ntdll.dll!RtlAllocateHeap".to_string(),
                String::new(),
            ]
        );
    }

    #[test]
    fn test_heap_rows_unresolved_stack_is_na() {
        let records = sample_records();
        let mut table = HeapAllocations::new(records, MapResolver(HashMap::new()));
        let rows = table.rows(window(0, 10), &OneOwner);
        assert_eq!(
            rows[0].path,
            vec!["app.exe".to_string(), "N/A".to_string(), String::new()]
        );
    }

    #[test]
    fn test_build_table_aggregates_rows() {
        let records = sample_records();
        let mut table = HeapAllocations::new(records, MapResolver(HashMap::new()));
        let tree = build_table(&mut table, window(0, 10), &OneOwner).unwrap();

        assert_eq!(tree.column_names(), &["Count", "Size"]);
        // +100 and -40 rows collapse onto the same N/A path
        assert_eq!(tree.root_values(), &[2, 60]);
        assert_eq!(tree.values_at(["app.exe", "N/A", ""]).unwrap(), &[2, 60]);
    }

    #[test]
    fn test_reversed_stacks_flip_frame_order() {
        let records = sample_records();
        let mut stacks = HashMap::new();
        for r in &records {
            stacks.insert(r.stack, vec![("lib.dll", "inner"), ("app.exe", "main")]);
        }
        let mut table =
            HeapAllocations::new(records, MapResolver(stacks)).with_reversed_stacks(true);
        assert_eq!(table.table_name(), "HeapAllocationsReverse");

        let rows = table.rows(window(0, 10), &OneOwner);
        assert_eq!(
            rows[0].path,
            vec![
                "app.exe".to_string(),
                "lib.dll!inner".to_string(),
                "app.exe!main".to_string(),
                "[Root]".to_string(),
                String::new(),
            ]
        );
    }
}
