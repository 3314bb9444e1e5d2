//! ClimEasy - rainfall analysis workflow service
//!
//! Accepts region selections or uploaded spreadsheets, runs them through
//! external analysis routines, hands back download references for the
//! newest spreadsheet and report, and keeps the upload and output
//! directories from growing without bound.

pub mod artifacts;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod retention;
pub mod server;
pub mod storage;
pub mod workflow;

pub use error::{WorkflowError, WorkflowResult};
pub use models::{WorkflowRequest, WorkflowResponse};
