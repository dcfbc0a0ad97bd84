//! # cellbox testkit
//!
//! Test utilities for cellbox.
//!
//! This crate provides:
//! - A sample schema (`Foo`, `City`, `Author`, `Book`) with entity codecs
//!   and typed property constants
//! - [`TestStore`], a store on a fresh memory engine with access to the
//!   engine's counters
//! - proptest strategies for condition trees and a [`RecordingSink`] that
//!   captures how a tree is lowered
//!
//! ## Usage
//!
//! ```rust
//! use cellbox_testkit::prelude::*;
//!
//! let store = TestStore::new();
//! let foos = store.entity_box::<Foo>();
//! foos.put(&mut Foo::with_text("hello")).unwrap();
//! assert_eq!(foos.count().unwrap(), 1);
//! assert_eq!(store.stats().open_transactions(), 0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
