pub mod operation;
pub mod packet;
pub mod receipt;
pub mod result;
pub mod template;

pub use operation::{
    Condition, ConditionalOp, IterationSpec, LoopOp, OperationNode, ParallelOp, StandardOp,
    TryCatchFinallyOp,
};
pub use packet::{Packet, PacketBody, PacketMetadata, KNOWN_CAPABILITIES, PROTOCOL_VERSION};
pub use receipt::{CacheStatus, Failure, Receipt, RunStatus, TokenPricing};
pub use result::{BranchTaken, LoopIteration, OpStatus, OperationResult};
pub use template::{Template, TemplateRegistration};
