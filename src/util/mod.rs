//! Utility functions for common operations.
//!
//! This module provides reusable utilities for:
//!
//! - **Text processing**: code-point truncation, markup stripping, newline collapsing,
//!   terminal control-character stripping
//! - **URL handling**: feed URL validation, canonicalisation and link absolutisation
//!
//! # Examples
//!
//! ```
//! use feedwatch::util::{absolutize_link, truncate_chars};
//!
//! assert_eq!(truncate_chars("Hello World", 5), "Hello...");
//! assert_eq!(
//!     absolutize_link("/post/1", "http://a.com"),
//!     "http://a.com/post/1"
//! );
//! ```

mod links;
mod text;

pub use self::links::{
    absolutize_link, canonical_feed_url, is_absolute_link, root_url, validate_feed_url,
    UrlValidationError,
};
pub use self::text::{
    clean_description, collapse_newlines, strip_control_chars, strip_markup, truncate_chars,
    ELLIPSIS,
};
