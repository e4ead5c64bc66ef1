//! Typed model of Notion blocks and rich text.
//!
//! The Markdown→block converter emits Notion's JSON block format and the
//! publisher sends the same format back to the API. In between, every stage
//! works on the typed [`Block`] enum so dispatch is a `match` with one arm per
//! variant instead of string-keyed field lookups on `serde_json::Value`.
//!
//! The serde layout mirrors the wire format exactly:
//!
//! ```json
//! { "type": "paragraph",
//!   "paragraph": { "rich_text": [ { "type": "text",
//!                                   "text": { "content": "hi", "link": null },
//!                                   "annotations": { "bold": false, ... } } ] } }
//! ```
//!
//! Block types this crate does not model deserialize into
//! [`Block::Unsupported`]; the post-processor replaces them with a
//! placeholder before anything is published.

use serde::{Deserialize, Serialize};

/// Maximum number of rich-text spans Notion accepts in one block.
pub const MAX_SPANS_PER_BLOCK: usize = 100;

// ── Rich text ────────────────────────────────────────────────────────────

/// Formatting flags of an inline span (Notion "annotations").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Style {
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub italic: bool,
    #[serde(default)]
    pub strikethrough: bool,
    #[serde(default)]
    pub underline: bool,
    #[serde(default)]
    pub code: bool,
    #[serde(default = "default_color")]
    pub color: String,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            bold: false,
            italic: false,
            strikethrough: false,
            underline: false,
            code: false,
            color: default_color(),
        }
    }
}

fn default_color() -> String {
    "default".to_string()
}

/// Whether a span is ordinary text or an inline equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpanKind {
    #[default]
    Text,
    Equation,
}

/// An inline run of styled, optionally hyperlinked text.
///
/// For [`SpanKind::Equation`] spans `text` holds the TeX expression and
/// `link` is always `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireSpan", into = "WireSpan")]
pub struct InlineSpan {
    pub text: String,
    pub link: Option<String>,
    pub style: Style,
    pub kind: SpanKind,
}

impl InlineSpan {
    /// Unstyled, unlinked text.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            link: None,
            style: Style::default(),
            kind: SpanKind::Text,
        }
    }

    /// Unstyled text linking to `url`.
    pub fn linked(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            link: Some(url.into()),
            ..Self::plain(text)
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireSpan {
    Text {
        text: WireText,
        #[serde(default)]
        annotations: Style,
    },
    Equation {
        equation: WireEquation,
        #[serde(default)]
        annotations: Style,
    },
}

#[derive(Serialize, Deserialize)]
struct WireText {
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    link: Option<WireLink>,
}

#[derive(Serialize, Deserialize)]
struct WireLink {
    url: String,
}

#[derive(Serialize, Deserialize)]
struct WireEquation {
    expression: String,
}

impl From<WireSpan> for InlineSpan {
    fn from(wire: WireSpan) -> Self {
        match wire {
            WireSpan::Text { text, annotations } => Self {
                text: text.content,
                link: text.link.map(|l| l.url),
                style: annotations,
                kind: SpanKind::Text,
            },
            WireSpan::Equation {
                equation,
                annotations,
            } => Self {
                text: equation.expression,
                link: None,
                style: annotations,
                kind: SpanKind::Equation,
            },
        }
    }
}

impl From<InlineSpan> for WireSpan {
    fn from(span: InlineSpan) -> Self {
        match span.kind {
            SpanKind::Text => WireSpan::Text {
                text: WireText {
                    content: span.text,
                    link: span.link.map(|url| WireLink { url }),
                },
                annotations: span.style,
            },
            SpanKind::Equation => WireSpan::Equation {
                equation: WireEquation {
                    expression: span.text,
                },
                annotations: span.style,
            },
        }
    }
}

// ── Block bodies ─────────────────────────────────────────────────────────

/// Body shared by paragraph, heading, list item, quote, toggle and callout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextBody {
    #[serde(default)]
    pub rich_text: Vec<InlineSpan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Block>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToDoBody {
    #[serde(default)]
    pub rich_text: Vec<InlineSpan>,
    #[serde(default)]
    pub checked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeBody {
    #[serde(default)]
    pub rich_text: Vec<InlineSpan>,
    #[serde(default = "plain_text_language")]
    pub language: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caption: Vec<InlineSpan>,
}

fn plain_text_language() -> String {
    "plain text".to_string()
}

/// Where an image block's bytes live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSourceType {
    #[default]
    External,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUrl {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageBody {
    #[serde(rename = "type", default)]
    pub source_type: ImageSourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<FileUrl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileUrl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caption: Vec<InlineSpan>,
}

impl ImageBody {
    /// The image reference: a URL or a path relative to the scratch directory.
    pub fn reference(&self) -> Option<&str> {
        let url = match self.source_type {
            ImageSourceType::External => self.external.as_ref(),
            ImageSourceType::File => self.file.as_ref(),
        };
        url.or(self.external.as_ref())
            .or(self.file.as_ref())
            .map(|f| f.url.as_str())
    }

    /// Point the image at an external URL, dropping any uploaded-file source.
    pub fn set_external(&mut self, url: impl Into<String>) {
        self.source_type = ImageSourceType::External;
        self.external = Some(FileUrl { url: url.into() });
        self.file = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquationBody {
    pub expression: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookmarkBody {
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caption: Vec<InlineSpan>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableBody {
    pub table_width: u32,
    #[serde(default)]
    pub has_column_header: bool,
    #[serde(default)]
    pub has_row_header: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Block>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableRowBody {
    #[serde(default)]
    pub cells: Vec<Vec<InlineSpan>>,
}

// ── Block ────────────────────────────────────────────────────────────────

/// One unit of a Notion document, in reading order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Paragraph {
        paragraph: TextBody,
    },
    #[serde(rename = "heading_1")]
    Heading1 {
        heading_1: TextBody,
    },
    #[serde(rename = "heading_2")]
    Heading2 {
        heading_2: TextBody,
    },
    #[serde(rename = "heading_3")]
    Heading3 {
        heading_3: TextBody,
    },
    BulletedListItem {
        bulleted_list_item: TextBody,
    },
    NumberedListItem {
        numbered_list_item: TextBody,
    },
    ToDo {
        to_do: ToDoBody,
    },
    Quote {
        quote: TextBody,
    },
    Toggle {
        toggle: TextBody,
    },
    Callout {
        callout: TextBody,
    },
    Code {
        code: CodeBody,
    },
    Image {
        image: ImageBody,
    },
    Equation {
        equation: EquationBody,
    },
    Divider {
        divider: Empty,
    },
    Bookmark {
        bookmark: BookmarkBody,
    },
    Table {
        table: TableBody,
    },
    TableRow {
        table_row: TableRowBody,
    },
    /// Any block type not modelled above.
    #[serde(other)]
    Unsupported,
}

impl Block {
    /// A paragraph holding `spans`.
    pub fn paragraph(spans: Vec<InlineSpan>) -> Self {
        Block::Paragraph {
            paragraph: TextBody {
                rich_text: spans,
                ..TextBody::default()
            },
        }
    }

    /// A bulleted list item holding `spans`.
    pub fn bulleted(spans: Vec<InlineSpan>) -> Self {
        Block::BulletedListItem {
            bulleted_list_item: TextBody {
                rich_text: spans,
                ..TextBody::default()
            },
        }
    }

    /// An image block pointing at `url`.
    pub fn image(url: impl Into<String>) -> Self {
        let mut image = ImageBody::default();
        image.set_external(url);
        Block::Image { image }
    }

    /// The Notion type tag, for logs and stats.
    pub fn kind(&self) -> &'static str {
        match self {
            Block::Paragraph { .. } => "paragraph",
            Block::Heading1 { .. } => "heading_1",
            Block::Heading2 { .. } => "heading_2",
            Block::Heading3 { .. } => "heading_3",
            Block::BulletedListItem { .. } => "bulleted_list_item",
            Block::NumberedListItem { .. } => "numbered_list_item",
            Block::ToDo { .. } => "to_do",
            Block::Quote { .. } => "quote",
            Block::Toggle { .. } => "toggle",
            Block::Callout { .. } => "callout",
            Block::Code { .. } => "code",
            Block::Image { .. } => "image",
            Block::Equation { .. } => "equation",
            Block::Divider { .. } => "divider",
            Block::Bookmark { .. } => "bookmark",
            Block::Table { .. } => "table",
            Block::TableRow { .. } => "table_row",
            Block::Unsupported => "unsupported",
        }
    }

    /// The block's own rich text, for variants that carry one.
    pub fn rich_text(&self) -> Option<&[InlineSpan]> {
        match self {
            Block::Paragraph { paragraph: b }
            | Block::Heading1 { heading_1: b }
            | Block::Heading2 { heading_2: b }
            | Block::Heading3 { heading_3: b }
            | Block::BulletedListItem { bulleted_list_item: b }
            | Block::NumberedListItem { numbered_list_item: b }
            | Block::Quote { quote: b }
            | Block::Toggle { toggle: b }
            | Block::Callout { callout: b } => Some(&b.rich_text),
            Block::ToDo { to_do } => Some(&to_do.rich_text),
            Block::Code { code } => Some(&code.rich_text),
            _ => None,
        }
    }

    pub fn rich_text_mut(&mut self) -> Option<&mut Vec<InlineSpan>> {
        match self {
            Block::Paragraph { paragraph: b }
            | Block::Heading1 { heading_1: b }
            | Block::Heading2 { heading_2: b }
            | Block::Heading3 { heading_3: b }
            | Block::BulletedListItem { bulleted_list_item: b }
            | Block::NumberedListItem { numbered_list_item: b }
            | Block::Quote { quote: b }
            | Block::Toggle { toggle: b }
            | Block::Callout { callout: b } => Some(&mut b.rich_text),
            Block::ToDo { to_do } => Some(&mut to_do.rich_text),
            Block::Code { code } => Some(&mut code.rich_text),
            _ => None,
        }
    }

    /// Nested child blocks (list items, toggles, table rows, ...).
    pub fn children(&self) -> &[Block] {
        match self {
            Block::Paragraph { paragraph: b }
            | Block::Heading1 { heading_1: b }
            | Block::Heading2 { heading_2: b }
            | Block::Heading3 { heading_3: b }
            | Block::BulletedListItem { bulleted_list_item: b }
            | Block::NumberedListItem { numbered_list_item: b }
            | Block::Quote { quote: b }
            | Block::Toggle { toggle: b }
            | Block::Callout { callout: b } => &b.children,
            Block::ToDo { to_do } => &to_do.children,
            Block::Table { table } => &table.children,
            _ => &[],
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<Block>> {
        match self {
            Block::Paragraph { paragraph: b }
            | Block::Heading1 { heading_1: b }
            | Block::Heading2 { heading_2: b }
            | Block::Heading3 { heading_3: b }
            | Block::BulletedListItem { bulleted_list_item: b }
            | Block::NumberedListItem { numbered_list_item: b }
            | Block::Quote { quote: b }
            | Block::Toggle { toggle: b }
            | Block::Callout { callout: b } => Some(&mut b.children),
            Block::ToDo { to_do } => Some(&mut to_do.children),
            Block::Table { table } => Some(&mut table.children),
            _ => None,
        }
    }

    /// Visit every inline span the block owns directly: rich text, captions
    /// and table cells. Children are not visited.
    pub fn for_each_span_mut(&mut self, f: &mut impl FnMut(&mut InlineSpan)) {
        let groups: Vec<&mut Vec<InlineSpan>> = match self {
            Block::Code { code } => vec![&mut code.rich_text, &mut code.caption],
            Block::Image { image } => vec![&mut image.caption],
            Block::Bookmark { bookmark } => vec![&mut bookmark.caption],
            Block::TableRow { table_row } => table_row.cells.iter_mut().collect(),
            other => other.rich_text_mut().into_iter().collect(),
        };
        for spans in groups {
            spans.iter_mut().for_each(&mut *f);
        }
    }

    /// Split a block whose rich text exceeds `max` spans into sibling blocks
    /// of the same type, each holding an order-preserving slice of at most
    /// `max` spans. Children stay attached to the last piece so they keep
    /// following the text they belonged to.
    ///
    /// Blocks within bound (or without rich text) come back unchanged as a
    /// single-element vector.
    pub fn split_rich_text(mut self, max: usize) -> Vec<Block> {
        let max = max.max(1);
        let spans = match self.rich_text_mut() {
            Some(spans) if spans.len() > max => std::mem::take(spans),
            _ => return vec![self],
        };
        let mut children = self.children_mut().map(std::mem::take);

        let piece_count = spans.len().div_ceil(max);
        let mut pieces = Vec::with_capacity(piece_count);
        for (i, chunk) in spans.chunks(max).enumerate() {
            let mut piece = self.clone();
            if let Some(rich_text) = piece.rich_text_mut() {
                *rich_text = chunk.to_vec();
            }
            if i + 1 == piece_count {
                if let (Some(slot), Some(kids)) = (piece.children_mut(), children.take()) {
                    *slot = kids;
                }
            }
            pieces.push(piece);
        }
        pieces
    }
}
