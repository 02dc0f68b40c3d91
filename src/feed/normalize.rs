use chrono::DateTime;
use thiserror::Error;
use url::Url;

use crate::feed::parser::{DateStyle, ParseError, RawDate, RawItem};
use crate::storage::Settings;
use crate::util::{absolutize_link, clean_description, root_url, truncate_chars};

/// Fixed layout of an RSS `pubDate` once the weekday is dropped and `GMT`
/// has been rewritten to `+0000`.
const RSS_DATE_FORMAT: &str = "%d %b %Y %H:%M:%S %z";

/// Per-item failure while normalizing. Ends the scan of the current feed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ItemError {
    #[error(transparent)]
    Field(#[from] ParseError),

    #[error("cannot parse publish date {value:?}: {source}")]
    ParseDateFailure {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// A feed item ready for novelty checks and delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub chan_title: String,
    /// Title, truncated to the configured length.
    pub title: String,
    /// Absolute link.
    pub link: String,
    /// Plain-text description, truncated to the configured length.
    pub description: String,
    /// Publish date as written in the feed.
    pub pub_date: Option<String>,
    /// Publish date as epoch seconds.
    pub published: Option<i64>,
}

/// Parses a raw publish date into epoch seconds.
///
/// RSS dates use the fixed `"<weekday>, <day> <month> <year> <h>:<m>:<s> <zone>"`
/// layout with a numeric zone; a literal `GMT` zone is read as `+0000`.
/// The weekday is not checked against the date, since feeds often get it
/// wrong. Atom dates are RFC 3339.
pub fn parse_publish_date(raw: &RawDate) -> Result<i64, ItemError> {
    let value = raw.value.trim();
    let parsed = match raw.style {
        DateStyle::Rfc822 => {
            let without_weekday = value.split_once(',').map_or(value, |(_, rest)| rest.trim_start());
            DateTime::parse_from_str(&without_weekday.replace("GMT", "+0000"), RSS_DATE_FORMAT)
        }
        DateStyle::Rfc3339 => DateTime::parse_from_rfc3339(value),
    };

    parsed
        .map(|dt| dt.timestamp())
        .map_err(|source| ItemError::ParseDateFailure {
            value: raw.value.clone(),
            source,
        })
}

/// Cleans raw items of one feed according to the global settings.
pub struct Normalizer<'a> {
    root: &'a str,
    chan_title: &'a str,
    settings: &'a Settings,
}

impl<'a> Normalizer<'a> {
    pub fn new(feed_url: &'a Url, chan_title: &'a str, settings: &'a Settings) -> Self {
        Self {
            root: root_url(feed_url),
            chan_title,
            settings,
        }
    }

    pub fn normalize(&self, raw: &RawItem) -> Result<FeedItem, ItemError> {
        let title = truncate_chars(raw.title()?, self.settings.title_max_length).into_owned();
        let link = absolutize_link(raw.link()?, self.root);
        let description = clean_description(raw.description()?, self.settings.description_max_length);
        let published = raw.pub_date.as_ref().map(parse_publish_date).transpose()?;

        Ok(FeedItem {
            chan_title: self.chan_title.to_string(),
            title,
            link,
            description,
            pub_date: raw.pub_date.as_ref().map(|d| d.value.clone()),
            published,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rss_date(value: &str) -> RawDate {
        RawDate {
            value: value.to_string(),
            style: DateStyle::Rfc822,
        }
    }

    fn raw(title: &str, link: &str, description: &str, date: Option<&str>) -> RawItem {
        RawItem {
            title: Some(title.to_string()),
            link: Some(link.to_string()),
            description: Some(description.to_string()),
            pub_date: date.map(rss_date),
        }
    }

    #[test]
    fn test_gmt_zone_reads_as_utc() {
        let ts = parse_publish_date(&rss_date("Mon, 01 Jan 2024 00:00:00 GMT")).unwrap();
        assert_eq!(ts, 1_704_067_200);
    }

    #[test]
    fn test_numeric_zone_offset_applied() {
        let ts = parse_publish_date(&rss_date("Mon, 01 Jan 2024 08:00:00 +0800")).unwrap();
        assert_eq!(ts, 1_704_067_200);
    }

    #[test]
    fn test_wrong_weekday_is_ignored() {
        // 2024-01-02 is a Tuesday
        let ts = parse_publish_date(&rss_date("Mon, 02 Jan 2024 10:00:00 GMT")).unwrap();
        assert_eq!(ts, 1_704_189_600);
        assert_eq!(
            parse_publish_date(&rss_date("Tue, 02 Jan 2024 10:00:00 GMT")).unwrap(),
            ts
        );
    }

    #[test]
    fn test_atom_date() {
        let raw = RawDate {
            value: "2024-01-01T00:00:00Z".to_string(),
            style: DateStyle::Rfc3339,
        };
        assert_eq!(parse_publish_date(&raw).unwrap(), 1_704_067_200);
    }

    #[test]
    fn test_unparseable_date() {
        let err = parse_publish_date(&rss_date("yesterday")).unwrap_err();
        assert!(matches!(err, ItemError::ParseDateFailure { ref value, .. } if value == "yesterday"));
    }

    #[test]
    fn test_normalize_full_item() {
        let url = Url::parse("http://a.com/feed").unwrap();
        let settings = Settings {
            title_max_length: 5,
            description_max_length: 8,
            ..Settings::default()
        };
        let normalizer = Normalizer::new(&url, "Chan", &settings);

        let item = normalizer
            .normalize(&raw(
                "A long title",
                "/post/1",
                "<p>Hello</p>\n\n<p>World</p>",
                Some("Mon, 01 Jan 2024 00:00:00 GMT"),
            ))
            .unwrap();

        assert_eq!(
            item,
            FeedItem {
                chan_title: "Chan".to_string(),
                title: "A lon...".to_string(),
                link: "http://a.com/post/1".to_string(),
                description: "Hello\nWo...".to_string(),
                pub_date: Some("Mon, 01 Jan 2024 00:00:00 GMT".to_string()),
                published: Some(1_704_067_200),
            }
        );
    }

    #[test]
    fn test_normalize_keeps_short_fields_and_absolute_link() {
        let url = Url::parse("http://a.com/feed").unwrap();
        let settings = Settings::default();
        let normalizer = Normalizer::new(&url, "Chan", &settings);

        let item = normalizer
            .normalize(&raw("Short", "https://b.com/post/2", "plain", None))
            .unwrap();
        assert_eq!(item.title, "Short");
        assert_eq!(item.link, "https://b.com/post/2");
        assert_eq!(item.description, "plain");
        assert_eq!(item.published, None);
        assert_eq!(item.pub_date, None);
    }

    #[test]
    fn test_missing_field_is_item_error() {
        let url = Url::parse("http://a.com/feed").unwrap();
        let settings = Settings::default();
        let normalizer = Normalizer::new(&url, "Chan", &settings);

        let mut item = raw("t", "/l", "d", None);
        item.description = None;
        assert_eq!(
            normalizer.normalize(&item),
            Err(ItemError::Field(ParseError::MissingField("description")))
        );
    }
}
