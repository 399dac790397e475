//! Data aggregator: the flat record view for the current selection.

use std::collections::HashSet;

use hqsync_types::{Record, ScopeKey};
use tracing::warn;

use crate::catalog::Catalog;
use crate::resolver::resolve;
use crate::selection::SelectionState;

/// Read access to the records held for each scope.
pub trait RecordSource {
    /// Records of one HQ scope (live session first, month cache otherwise).
    fn records_for(&self, scope: &ScopeKey) -> Vec<Record>;

    /// Bumped whenever any scope's records may have changed.
    fn content_version(&self) -> u64;
}

/// Data-quality problems found while aggregating.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QualityReport {
    /// Records whose `sales_team`/`hq` tags disagree with their scope.
    pub mistagged: usize,
    /// Records whose `invoice_no` was already seen earlier in the view.
    pub duplicates: usize,
}

/// Concatenate the records of every resident scope, in resolver order.
///
/// Repeated invoice numbers are counted and logged but every row stays in
/// the view, so a duplicated record is never hidden from the reader.
pub fn aggregate(selection: &SelectionState, catalog: &Catalog, source: &dyn RecordSource) -> (Vec<Record>, QualityReport) {
    let mut view = Vec::new();
    let mut report = QualityReport::default();
    let mut seen: HashSet<String> = HashSet::new();

    for scope in resolve(selection, catalog) {
        for record in source.records_for(&scope) {
            if record.sales_team() != scope.team() || record.hq() != scope.hq() {
                warn!(
                    "{}: record {:?} tagged {:?}/{:?}",
                    scope,
                    record.invoice_no(),
                    record.sales_team(),
                    record.hq()
                );
                report.mistagged += 1;
            }
            if let Some(invoice) = record.invoice_no() {
                if !seen.insert(invoice.to_string()) {
                    warn!("{}: duplicate invoice {}", scope, invoice);
                    report.duplicates += 1;
                }
            }
            view.push(record);
        }
    }
    (view, report)
}

/// Memoized [`aggregate`].
#[derive(Debug, Default)]
pub struct DataAggregator {
    key: Option<(u64, u64, u64)>,
    view: Vec<Record>,
    report: QualityReport,
    recomputes: u64,
}

impl DataAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current view; recomputed only when the selection, catalog or content
    /// version changed since the last call.
    pub fn view(&mut self, selection: &SelectionState, catalog: &Catalog, source: &dyn RecordSource) -> &[Record] {
        let key = (selection.version(), catalog.version(), source.content_version());
        if self.key != Some(key) {
            let (view, report) = aggregate(selection, catalog, source);
            self.view = view;
            self.report = report;
            self.key = Some(key);
            self.recomputes += 1;
        }
        &self.view
    }

    /// Drop the memo (month change).
    pub fn reset(&mut self) {
        self.key = None;
        self.view.clear();
        self.report = QualityReport::default();
    }

    pub fn report(&self) -> &QualityReport {
        &self.report
    }

    pub fn recomputes(&self) -> u64 {
        self.recomputes
    }
}
