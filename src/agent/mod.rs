pub mod executor;
pub mod loop_control;
pub mod scripted;

pub use executor::{ConversationExecutor, ToolCallRecord, TurnOutcome, TurnStatus};
pub use loop_control::{LoopController, LoopLimits, LoopStats, StopReason};
pub use scripted::{ScriptedExecutor, ScriptedTurn};
