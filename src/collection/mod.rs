pub mod collection;
pub mod merge;
pub mod open;
pub mod operation;

pub use collection::{
    CollectionReadGuard, CollectionWriteGuard, Document, DocumentCollection, DocumentResult,
    OperationOptions,
};
pub use operation::{DocumentOperation, OperationStatus, OperationType};
