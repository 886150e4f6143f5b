//! # sheetstep - spreadsheet edits as replayable steps
//!
//! sheetstep records every edit made to a set of dataframes as a typed step,
//! keeps an immutable [`state::State`] after each one, and transpiles the
//! whole history into an equivalent pandas script.
//!
//! ## Quick Start
//!
//! ```no_run
//! use polars::prelude::*;
//! use sheetstep::steps::{AddColumnParams, StepParams};
//! use sheetstep::steps_manager::StepsManager;
//!
//! # fn example() -> anyhow::Result<()> {
//! let df = df!("A" => [1i64, 2, 3])?;
//! let mut manager = StepsManager::new(vec![("df1".to_owned(), df)])?;
//! manager.push(StepParams::AddColumn(AddColumnParams {
//!     sheet_index: 0,
//!     column_header: "B".to_owned(),
//!     column_header_index: -1,
//! }))?;
//!
//! for line in manager.transpiled_code() {
//!     println!("{line}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Modules
//!
//! - [`steps_manager`]: the step log, undo/redo, replay and saved analyses
//! - [`steps`]: one performer per step type
//! - [`state`]: immutable sheet snapshots and their formats
//! - [`column_headers`]: stable column ids behind mutable headers
//! - [`code_chunks`]: generated code units and their footprints
//! - [`optimizer`]: chunk merging and dead-code removal
//! - [`transpiler`]: the final script, stylers included
//! - [`saved_analysis`]: on-disk analyses and their upgrade chain
//! - [`formula`], [`filter`]: spreadsheet formulas and filter conditions
//! - [`excel`]: Excel export with formats
//! - [`config`], [`logging`], [`error`]: settings, tracing setup, errors
//! - [`cli`]: the `sheetstep` command line

#![warn(clippy::all, rust_2018_idioms)]

pub mod cli;
pub mod code_chunks;
pub mod column_headers;
pub mod config;
pub mod error;
pub mod excel;
pub mod filter;
pub mod formula;
pub mod logging;
pub mod optimizer;
pub mod saved_analysis;
pub mod state;
pub mod steps;
pub mod steps_manager;
pub mod transpiler;
