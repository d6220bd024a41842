//! License string normalization.
//!
//! - [`normalize`]: [`Normalizer`](normalize::Normalizer): parses license
//!   expressions, trove classifiers, and free-text names into canonical
//!   identifiers, with a bounded memo.
//! - [`spdx`]: identifier and variant tables, human-readable names, and the
//!   generic reference URLs used by the fallback tier.

pub mod normalize;
pub mod spdx;

pub use normalize::Normalizer;
