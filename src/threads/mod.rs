pub mod branch;
pub mod lifecycle;
pub mod model;

pub use branch::branch_name_for;
pub use lifecycle::AcceptOutcome;
pub use model::{Message, MessageRole, Thread, ThreadKind, ThreadStatus};
