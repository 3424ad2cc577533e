//! Refdelta: reference-aware binary delta generation and application.
//!
//! The crate builds compact patches between two versions of a binary image.
//! Instead of matching raw bytes, it projects each image into a symbol
//! alphabet where machine-level references (absolute addresses, relative
//! branch targets) compare by the *identity* of their target rather than by
//! their encoded bytes, so code that merely shifted still matches.
//!
//! The crate provides:
//! - Patch generation (`generate`) and application (`apply`)
//! - The patch container format (`patch`)
//! - A pluggable disassembler seam for executable formats (`disasm`)
//! - File-oriented helpers (`io`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```
//! use refdelta::disasm::NoFormats;
//! use refdelta::generate::{self, GenConfig};
//! use refdelta::apply;
//!
//! let old = b"hello old world";
//! let new = b"hello new world";
//!
//! let patch = generate::generate(old, new, &NoFormats, &GenConfig::default()).unwrap();
//! let reconstructed = apply::apply(old, &patch, &NoFormats).unwrap();
//! assert_eq!(reconstructed, new);
//! ```

pub mod affinity;
pub mod apply;
pub mod disasm;
pub mod equivalence;
pub mod generate;
pub mod image;
pub mod io;
pub mod patch;
pub mod pool;
pub mod refset;
pub mod suffix_array;
pub mod varint;
pub mod view;

mod error;
pub use error::Error;

#[cfg(feature = "cli")]
pub mod cli;
