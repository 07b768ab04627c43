// Plan Module
// Operator graph, slots, data set types and the loop-head capability

pub mod loop_head;
pub mod operator;
pub mod slot;
pub mod types;

// Re-export key types
pub use loop_head::{LoopHead, LoopOperator, LoopState, LoopStateCell};
pub use operator::{Operator, OperatorGraph, OperatorId, OperatorKind};
pub use slot::{InputRef, InputSlot, OutputRef, OutputSlot};
pub use types::DataSetType;
