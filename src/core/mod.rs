//! Workflow definitions and their compilation into task records.

pub mod compiler;
pub mod definition;
pub mod error;
pub mod record;
pub mod tree;
pub mod types;
