use crate::core::types::Tick;
use crate::storage::headers::{Header, HeaderId, MasterPointers};
use crate::storage::marker::Marker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Insert,
    Update,
    Replace,
    Remove,
}

/// Progress of a write operation, consulted by the revert path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    /// Marker built, index state untouched (or already unwound inline).
    Created,
    /// All index mutations applied.
    Indexed,
    /// Revert ran; the operation left no trace.
    Reverted,
}

/// Per-write state: enough to undo every index mutation in reverse order if
/// any later step fails.
#[derive(Debug)]
pub struct DocumentOperation {
    pub op_type: OperationType,
    pub marker: Marker,
    pub header: Option<HeaderId>,
    /// Copy of the header before the operation touched it. Set for update,
    /// replace and remove.
    pub old_data: Option<Header>,
    /// Sequence tick assigned by the log manager on submit.
    pub tick: Tick,
    pub status: OperationStatus,
}

impl DocumentOperation {
    pub fn new(op_type: OperationType, marker: Marker) -> DocumentOperation {
        DocumentOperation {
            op_type,
            marker,
            header: None,
            old_data: None,
            tick: Tick::ZERO,
            status: OperationStatus::Created,
        }
    }

    /// Bind the operation to an existing header, saving a copy of its state
    /// for the revert path.
    pub fn attach_header(&mut self, header_id: HeaderId, pool: &MasterPointers) {
        self.header = Some(header_id);
        if self.op_type != OperationType::Insert {
            self.old_data = pool.get(header_id).cloned();
        }
    }

    pub fn indexed(&mut self) {
        self.status = OperationStatus::Indexed;
    }

    pub fn is_indexed(&self) -> bool {
        self.status == OperationStatus::Indexed
    }
}
