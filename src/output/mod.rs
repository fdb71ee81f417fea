//! Engine reports
//!
//! This module combines the statistics of every engine component into one
//! snapshot and renders it for the terminal.

mod report;

pub use report::{print_report, render_report, EngineReport};
