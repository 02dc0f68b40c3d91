//! Feed polling pipeline: fetch, parse, normalize, select new items.
//!
//! - [`parser`] - Raw RSS/Atom document parsing on top of `quick-xml`
//! - [`fetcher`] - HTTP retrieval with timeout and size limit
//! - [`normalize`] - Truncation, link absolutisation, markup stripping, date parsing
//! - [`novelty`] - Watermark comparison deciding which items are unseen
//!
//! # Example
//!
//! ```ignore
//! let doc = fetcher.fetch_document(url.as_str()).await?;
//! let normalizer = Normalizer::new(&url, &info.title, &settings);
//! let selection = select_new(
//!     doc.items.iter().map(|raw| normalizer.normalize(raw)),
//!     &state,
//!     settings.batch_limit(),
//! );
//! ```

pub mod fetcher;
pub mod normalize;
pub mod novelty;
pub mod parser;

pub use fetcher::{FetchError, Fetcher};
pub use normalize::{parse_publish_date, FeedItem, ItemError, Normalizer};
pub use novelty::{select_new, Selection, Watermark, WatermarkUpdate};
pub use parser::{parse_document, DateStyle, FeedDocument, ParseError, RawDate, RawItem};
