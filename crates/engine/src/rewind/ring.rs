use super::store::SnapshotId;

/// Fixed-capacity circular history of one section.
///
/// Slot `i` holds the snapshot for every absolute frame `f` with `f % capacity == i`;
/// which of those frames it currently represents is tracked by the frame clock,
/// not by the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRing {
    slots: Vec<Option<SnapshotId>>,
}

impl HistoryRing {
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![None; len.max(1)],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn has_history(&self) -> bool {
        self.slots.iter().any(Option::is_some)
    }

    pub fn slot_index(&self, frame: u64) -> usize {
        (frame % self.slots.len() as u64) as usize
    }

    pub fn get(&self, frame: u64) -> Option<SnapshotId> {
        self.slots[self.slot_index(frame)]
    }

    pub fn set(&mut self, frame: u64, snapshot: SnapshotId) -> Option<SnapshotId> {
        let index = self.slot_index(frame);
        self.slots[index].replace(snapshot)
    }

    pub fn take(&mut self, frame: u64) -> Option<SnapshotId> {
        let index = self.slot_index(frame);
        self.slots[index].take()
    }

    /// Most recent populated slot scanning `frame` down to `floor`, bounded to one lap.
    pub fn latest_at_or_before(&self, frame: u64, floor: u64) -> Option<(u64, SnapshotId)> {
        if floor > frame {
            return None;
        }
        let span = (frame - floor).min(self.slots.len() as u64 - 1);
        (0..=span)
            .map(|back| frame - back)
            .find_map(|candidate| self.get(candidate).map(|snapshot| (candidate, snapshot)))
    }

    pub fn drain(&mut self) -> Vec<SnapshotId> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }
}
