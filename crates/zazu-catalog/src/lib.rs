//! # zazu-catalog
//!
//! The static model catalog (`models.json`), the selector that matches a run
//! configuration against it, and the [`OptModel`] the pipeline fills in.

pub mod catalog;
pub mod opt_model;
pub mod selector;

pub use catalog::*;
pub use opt_model::*;
pub use selector::find_model;
