// ============================================================
// Layer 5 - Best Snapshot Selection
// ============================================================
// After every validation pass the epoch's val_loss and val_acc
// are offered to two independent trackers:
//
//   val_loss: improves when strictly lower  (starts at +inf)
//   val_acc:  improves when strictly higher (starts at -inf)
//
// A tie never replaces the held snapshot, so the earliest epoch
// reaching a value wins. A NaN never improves anything.
//
// Each slot holds the model state captured at its best epoch.
// The state is only materialised (the capture closure only
// runs) when a slot actually improves, once per improved slot,
// so the captured type needs no Clone. Burn records don't
// implement it. At the end of the run the slot of the
// configured metric is moved out and handed to the trainer to
// be loaded back into the model.
//
// The captured state must own its values. A module clone does
// not: BatchNorm running statistics live behind a shared handle
// and keep moving with the live model. The trainer therefore
// captures `into_record()` output.
//
// The store is generic over the captured state so it can be
// exercised without a backend.

use crate::domain::config::SelectionMetric;
use crate::domain::run::EpochMetrics;

/// Running best value of one metric.
#[derive(Debug, Clone, Copy)]
pub struct BestTracker {
    pub metric: SelectionMetric,
    pub value:  f64,
    pub epoch:  Option<usize>,
}

impl BestTracker {
    pub fn new(metric: SelectionMetric) -> Self {
        Self { metric, value: metric.worst(), epoch: None }
    }

    /// Record `value` if it strictly improves on the best so far.
    pub fn offer(&mut self, epoch: usize, value: f64) -> bool {
        if self.metric.improves(value, self.value) {
            self.value = value;
            self.epoch = Some(epoch);
            true
        } else {
            false
        }
    }
}

/// Model state frozen at one epoch.
#[derive(Debug, Clone)]
pub struct Snapshot<S> {
    pub state: S,
    pub epoch: usize,
    pub value: f64,
}

#[derive(Debug)]
struct Slot<S> {
    tracker:  BestTracker,
    snapshot: Option<Snapshot<S>>,
}

impl<S> Slot<S> {
    fn new(metric: SelectionMetric) -> Self {
        Self { tracker: BestTracker::new(metric), snapshot: None }
    }
}

/// One slot per selection metric, both updated every epoch.
#[derive(Debug)]
pub struct SnapshotStore<S> {
    loss: Slot<S>,
    acc:  Slot<S>,
}

impl<S> Default for SnapshotStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> SnapshotStore<S> {
    pub fn new() -> Self {
        Self {
            loss: Slot::new(SelectionMetric::ValLoss),
            acc:  Slot::new(SelectionMetric::ValAcc),
        }
    }

    fn slot(&self, metric: SelectionMetric) -> &Slot<S> {
        match metric {
            SelectionMetric::ValLoss => &self.loss,
            SelectionMetric::ValAcc  => &self.acc,
        }
    }

    /// Offer one epoch's validation results. `capture` runs once for
    /// every slot that improved and never otherwise.
    ///
    /// Returns the metrics whose slot was replaced.
    pub fn observe<F>(&mut self, metrics: &EpochMetrics, mut capture: F) -> Vec<SelectionMetric>
    where
        F: FnMut() -> S,
    {
        let mut improved = Vec::new();
        for slot in [&mut self.loss, &mut self.acc] {
            let metric = slot.tracker.metric;
            if slot.tracker.offer(metrics.epoch, metrics.value_of(metric)) {
                slot.snapshot = Some(Snapshot {
                    state: capture(),
                    epoch: metrics.epoch,
                    value: slot.tracker.value,
                });
                improved.push(metric);
            }
        }
        improved
    }

    /// Best value of `metric` so far, with the epoch it was reached.
    pub fn best(&self, metric: SelectionMetric) -> Option<(f64, usize)> {
        let tracker = &self.slot(metric).tracker;
        tracker.epoch.map(|epoch| (tracker.value, epoch))
    }

    /// Move the snapshot of `metric` out, consuming the store.
    pub fn take(self, metric: SelectionMetric) -> Option<Snapshot<S>> {
        match metric {
            SelectionMetric::ValLoss => self.loss.snapshot,
            SelectionMetric::ValAcc  => self.acc.snapshot,
        }
    }
}
