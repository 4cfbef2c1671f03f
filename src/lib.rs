//! # classforge - Mapping-driven Python class refactoring
//!
//! classforge restructures Python classes and modules according to a declarative
//! mapping. It never decides *what* to move: a mapping names every member and its
//! destination, and the engine executes it verbatim or refuses.
//!
//! ## Operations
//!
//! - **Split class**: move members of one class into new classes held by composition,
//!   leaving delegating methods behind
//! - **Extract superclass**: lift shared members of sibling classes into a new base
//! - **Merge classes**: fold several classes into one, first declaration wins
//! - **Split file**: explode a module into a package, keeping the old import path
//!   working through a re-exporting shim
//!
//! ## Safety
//!
//! Every run goes through [`ops::Pipeline`]: the target is backed up before anything
//! is read, the mapping is validated before anything is written, and the written
//! output is re-parsed and checked for completeness and docstrings. Any failure after
//! the first write restores the backup and removes the files the run created.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use std::path::Path;
//!
//! use classforge::mapping::{MemberAssignment, SplitClassConfig};
//! use classforge::{Config, Pipeline, SplitClass};
//!
//! let mut destinations = BTreeMap::new();
//! destinations.insert(
//!     "Pricing".to_string(),
//!     MemberAssignment {
//!         properties: vec!["rate".into()],
//!         methods: vec!["price".into()],
//!     },
//! );
//! let mapping = SplitClassConfig {
//!     source_class: "Order".into(),
//!     destinations,
//! };
//!
//! let config = Config::load_from_current_dir();
//! let result = Pipeline::new(&config).execute(&SplitClass, Path::new("order.py"), &mapping);
//! println!("{}", result.message);
//! ```
//!
//! ## Architecture
//!
//! - [`source`] and [`syntax`]: tree-sitter based loader and the statement model
//! - [`member_analyzer`]: declared members, docstrings and method rendering
//! - [`validators`]: pre-transform mapping checks and post-transform output checks
//! - [`backup`]: copy-before-mutate backups
//! - [`tools`]: formatter, syntax checker and import checker adapters
//! - [`ops`]: the four operations and the pipeline
//! - [`import_analyzer`]: cross-module imports for package splits

pub mod backup;
pub mod config;
pub mod error;
pub mod import_analyzer;
pub mod mapping;
pub mod member_analyzer;
pub mod ops;
pub mod source;
pub mod syntax;
pub mod tools;
pub mod validators;

pub use config::Config;
pub use error::{RefactorError, Result};
pub use member_analyzer::MemberSet;
pub use ops::{
    ExtractSuperclass, MergeClasses, OperationResult, Phase, Pipeline, Refactoring, SplitClass,
    SplitFile,
};
pub use source::SourceFile;
