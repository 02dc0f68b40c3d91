//! Raw feed document parsing.
//!
//! Turns the bytes of an RSS 2.0, RSS 1.0 (RDF) or Atom document into the
//! channel title/description and the item records in document order. Fields
//! are kept exactly as written in the document (including the publish date
//! string); cleaning them up is the normalizer's job.

use quick_xml::encoding::Decoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// Errors produced while reading a feed document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The bytes are not a well-formed RSS/Atom XML document.
    #[error("malformed feed: {0}")]
    MalformedFeed(String),
    /// A required field is absent from the channel or an item.
    #[error("missing field: {0}")]
    MissingField(&'static str),
}

impl ParseError {
    fn malformed(err: impl std::fmt::Display) -> Self {
        Self::MalformedFeed(err.to_string())
    }
}

/// Which date grammar a raw date string is expected to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateStyle {
    /// RSS `pubDate`: `Tue, 10 Jun 2003 04:00:00 GMT`
    Rfc822,
    /// Atom `published` / `updated`: `2003-12-13T18:30:02Z`
    Rfc3339,
}

/// A publish date exactly as it appeared in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDate {
    pub value: String,
    pub style: DateStyle,
}

/// One `<item>` / `<entry>` with its fields untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub pub_date: Option<RawDate>,
}

impl RawItem {
    pub fn title(&self) -> Result<&str, ParseError> {
        self.title.as_deref().ok_or(ParseError::MissingField("title"))
    }

    pub fn link(&self) -> Result<&str, ParseError> {
        self.link.as_deref().ok_or(ParseError::MissingField("link"))
    }

    pub fn description(&self) -> Result<&str, ParseError> {
        self.description
            .as_deref()
            .ok_or(ParseError::MissingField("description"))
    }
}

/// A parsed feed: channel metadata plus items, newest first by convention.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedDocument {
    pub title: Option<String>,
    pub description: Option<String>,
    pub items: Vec<RawItem>,
}

impl FeedDocument {
    /// Channel title. Absence is fatal when subscribing to a new feed.
    pub fn channel_title(&self) -> Result<&str, ParseError> {
        self.title.as_deref().ok_or(ParseError::MissingField("title"))
    }

    /// Channel description, empty when the document has none.
    pub fn channel_description(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedKind {
    Rss,
    Atom,
}

impl FeedKind {
    fn from_root(name: &str) -> Result<Self, ParseError> {
        match name {
            "rss" | "RDF" => Ok(Self::Rss),
            "feed" => Ok(Self::Atom),
            other => Err(ParseError::MalformedFeed(format!(
                "unexpected root element <{other}>"
            ))),
        }
    }

    fn entry_tag(self) -> &'static str {
        match self {
            Self::Rss => "item",
            Self::Atom => "entry",
        }
    }

    fn channel_tag(self) -> &'static str {
        match self {
            Self::Rss => "channel",
            Self::Atom => "feed",
        }
    }
}

struct Element {
    name: String,
    text: String,
}

#[derive(Default)]
struct ItemBuilder {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    content: Option<String>,
    pub_date: Option<String>,
    published: Option<String>,
    updated: Option<String>,
}

impl ItemBuilder {
    fn assign(&mut self, field: &str, text: String) {
        let slot = match field {
            "title" => &mut self.title,
            "link" if !text.is_empty() => &mut self.link,
            "description" | "summary" => &mut self.description,
            // <content> in Atom, <content:encoded> in RSS
            "content" | "encoded" => &mut self.content,
            "pubDate" => &mut self.pub_date,
            "published" => &mut self.published,
            "updated" => &mut self.updated,
            _ => return,
        };
        slot.get_or_insert(text);
    }

    fn finish(self) -> RawItem {
        let pub_date = self
            .pub_date
            .map(|value| RawDate {
                value,
                style: DateStyle::Rfc822,
            })
            .or_else(|| {
                self.published.or(self.updated).map(|value| RawDate {
                    value,
                    style: DateStyle::Rfc3339,
                })
            });

        RawItem {
            title: self.title,
            link: self.link,
            description: self.description.or(self.content),
            pub_date,
        }
    }
}

/// Parses raw feed bytes into a [`FeedDocument`].
///
/// # Errors
///
/// Returns [`ParseError::MalformedFeed`] when the bytes are not well-formed
/// XML, the root element is not `<rss>`, `<rdf:RDF>` or `<feed>`, or an
/// entity cannot be resolved. Missing fields are not an error here; they
/// surface through the accessors on [`FeedDocument`] and [`RawItem`] so the
/// caller can decide whether to skip an item or abort the whole channel.
pub fn parse_document(bytes: &[u8]) -> Result<FeedDocument, ParseError> {
    // SEC-002: quick-xml (0.37) never expands <!ENTITY> declarations; unknown
    // entities fail unescaping and are reported as a malformed feed.
    // The decoder follows the encoding named in the XML declaration.
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut doc = FeedDocument::default();
    let mut kind: Option<FeedKind> = None;
    let mut stack: Vec<Element> = Vec::new();
    let mut item: Option<ItemBuilder> = None;
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(ParseError::malformed)?;
        let decoder = reader.decoder();

        match event {
            Event::Start(e) => {
                let name = local_name(&e, decoder)?;
                let kind = match kind {
                    Some(kind) => kind,
                    None => *kind.insert(FeedKind::from_root(&name)?),
                };

                if name == kind.entry_tag() && item.is_none() {
                    item = Some(ItemBuilder::default());
                } else if name == "link" {
                    take_link_href(&e, decoder, &stack, kind, item.as_mut())?;
                }
                stack.push(Element {
                    name,
                    text: String::new(),
                });
            }
            Event::Empty(e) => {
                let name = local_name(&e, decoder)?;
                let kind = match kind {
                    Some(kind) => kind,
                    None => *kind.insert(FeedKind::from_root(&name)?),
                };
                if name == "link" {
                    take_link_href(&e, decoder, &stack, kind, item.as_mut())?;
                }
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(ParseError::malformed)?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Event::CData(c) => {
                let text = decoder.decode(&c).map_err(ParseError::malformed)?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| ParseError::malformed("unbalanced end tag"))?;
                if let Some(kind) = kind {
                    close_element(element, &mut stack, kind, &mut item, &mut doc);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if kind.is_none() {
        return Err(ParseError::malformed("document has no root element"));
    }
    if !stack.is_empty() {
        return Err(ParseError::malformed("unexpected end of document"));
    }

    Ok(doc)
}

fn close_element(
    element: Element,
    stack: &mut [Element],
    kind: FeedKind,
    item: &mut Option<ItemBuilder>,
    doc: &mut FeedDocument,
) {
    let Element { name, text } = element;

    if name == kind.entry_tag() {
        if let Some(builder) = item.take() {
            doc.items.push(builder.finish());
        }
        return;
    }

    let Some(parent) = stack.last_mut() else {
        return;
    };

    if parent.name == kind.entry_tag() {
        if let Some(builder) = item.as_mut() {
            builder.assign(&name, text);
        }
    } else if parent.name == kind.channel_tag() {
        let slot = match name.as_str() {
            "title" => &mut doc.title,
            "description" | "subtitle" => &mut doc.description,
            _ => return,
        };
        slot.get_or_insert(text);
    } else if !text.is_empty() {
        // Inline XHTML content: fold nested text into the enclosing field,
        // one line per child element
        if !parent.text.is_empty() {
            parent.text.push('\n');
        }
        parent.text.push_str(&text);
    }
}

/// Reads the `href` of an Atom `<link>` that is a direct child of an entry.
/// Links with a `rel` other than `alternate` (self, enclosure, replies) are ignored.
fn take_link_href(
    e: &BytesStart<'_>,
    decoder: Decoder,
    stack: &[Element],
    kind: FeedKind,
    item: Option<&mut ItemBuilder>,
) -> Result<(), ParseError> {
    let Some(builder) = item else {
        return Ok(());
    };
    if stack.last().map(|p| p.name.as_str()) != Some(kind.entry_tag()) {
        return Ok(());
    }

    let mut href = None;
    let mut rel = None;
    for attr in e.attributes() {
        let attr = attr.map_err(ParseError::malformed)?;
        let value = || {
            attr.decode_and_unescape_value(decoder)
                .map(|v| v.into_owned())
                .map_err(ParseError::malformed)
        };
        match attr.key.local_name().as_ref() {
            b"href" => href = Some(value()?),
            b"rel" => rel = Some(value()?),
            _ => {}
        }
    }

    if matches!(rel.as_deref(), None | Some("alternate")) {
        if let Some(href) = href {
            builder.link.get_or_insert(href);
        }
    }
    Ok(())
}

fn local_name(e: &BytesStart<'_>, decoder: Decoder) -> Result<String, ParseError> {
    decoder
        .decode(e.local_name().as_ref())
        .map(|name| name.into_owned())
        .map_err(ParseError::malformed)
}
