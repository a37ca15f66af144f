//! These models represent the objects passed between the agent loop, the model backend
//! and the tools it drives.
//!
//! Backends stream [`fragment::ResponseFragment`]s, which the assembler folds into
//! [`turn::Turn`]s. Tool calls travel as [`tool::ToolCallRequest`]s whose arguments stay
//! serialized until the dispatcher parses them.
pub mod fragment;
pub mod role;
pub mod tool;
pub mod turn;
