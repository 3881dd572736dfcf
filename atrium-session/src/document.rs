//! Rich-text capability behind the document panel.
//!
//! The panel only needs two operations, styling a range and inserting a
//! block, plus a way to turn the result into markup that can be published
//! as a `document-change`. [`RichTextEngine`] captures exactly that so any
//! engine can sit behind it; [`MarkupDocument`] is the bundled one.
//!
//! ```text
//! MarkupDocument
//!   blocks: [ Text{list, text, spans} | Table{rows, cols, cell} | Image{url} ]
//!                       │
//!                       ▼ render()
//!   <p>plain <b>bold</b></p><ul><li>item</li></ul><table>…</table>
//! ```

use std::collections::BTreeSet;
use std::fmt;

/// Largest table the engine will build in either dimension.
pub const MAX_TABLE_DIM: usize = 64;

/// Inline style applied over a character range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StyleKind {
    Bold,
    Italic,
    Underline,
    StrikeThrough,
    Subscript,
    Superscript,
    ForeColor(String),
    HighlightColor(String),
    FontName(String),
    /// Legacy 1–7 size scale; values outside are clamped.
    FontSize(u8),
}

impl StyleKind {
    fn open_tag(&self) -> String {
        match self {
            Self::Bold => "<b>".into(),
            Self::Italic => "<i>".into(),
            Self::Underline => "<u>".into(),
            Self::StrikeThrough => "<s>".into(),
            Self::Subscript => "<sub>".into(),
            Self::Superscript => "<sup>".into(),
            Self::ForeColor(c) => format!("<span style=\"color:{}\">", escape(c)),
            Self::HighlightColor(c) => {
                format!("<span style=\"background-color:{}\">", escape(c))
            }
            Self::FontName(n) => format!("<span style=\"font-family:{}\">", escape(n)),
            Self::FontSize(s) => format!("<font size=\"{}\">", (*s).clamp(1, 7)),
        }
    }

    fn close_tag(&self) -> &'static str {
        match self {
            Self::Bold => "</b>",
            Self::Italic => "</i>",
            Self::Underline => "</u>",
            Self::StrikeThrough => "</s>",
            Self::Subscript => "</sub>",
            Self::Superscript => "</sup>",
            Self::ForeColor(_) | Self::HighlightColor(_) | Self::FontName(_) => "</span>",
            Self::FontSize(_) => "</font>",
        }
    }
}

/// Block-level content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Paragraph,
    OrderedItem,
    UnorderedItem,
    /// Every cell starts with the inserted content.
    Table { rows: usize, cols: usize },
    /// Content is the image URL.
    Image,
    /// Appended to the last text block (a new paragraph if there is none).
    Symbol,
}

/// Character range inside one text block. `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextRange {
    pub block: usize,
    pub start: usize,
    pub end: usize,
}

impl TextRange {
    pub fn new(block: usize, start: usize, end: usize) -> Self {
        Self { block, start, end }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    BlockOutOfRange(usize),
    /// The targeted block holds no text (table or image).
    NotText(usize),
    RangeOutOfBounds { range: TextRange, len: usize },
    EmptyRange(TextRange),
    InvalidBlock(String),
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BlockOutOfRange(i) => write!(f, "Block {i} does not exist"),
            Self::NotText(i) => write!(f, "Block {i} is not a text block"),
            Self::RangeOutOfBounds { range, len } => write!(
                f,
                "Range {}..{} exceeds block {} length {len}",
                range.start, range.end, range.block
            ),
            Self::EmptyRange(range) => {
                write!(f, "Empty range {}..{} in block {}", range.start, range.end, range.block)
            }
            Self::InvalidBlock(e) => write!(f, "Invalid block: {e}"),
        }
    }
}

impl std::error::Error for DocumentError {}

/// Capability interface over a rich-text engine.
pub trait RichTextEngine {
    fn apply_style(&mut self, range: TextRange, style: StyleKind) -> Result<(), DocumentError>;

    /// Insert a block and return the index of the block that received it.
    fn insert_block(&mut self, kind: BlockKind, content: &str) -> Result<usize, DocumentError>;

    /// Markup suitable for a `document-change` payload.
    fn render(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Ordered,
    Unordered,
}

impl ListKind {
    fn tag(self) -> &'static str {
        match self {
            Self::Ordered => "ol",
            Self::Unordered => "ul",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
    style: StyleKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Block {
    Text {
        list: Option<ListKind>,
        text: String,
        spans: Vec<Span>,
    },
    Table {
        rows: usize,
        cols: usize,
        cell: String,
    },
    Image {
        url: String,
    },
}

/// In-memory engine rendering to HTML.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkupDocument {
    blocks: Vec<Block>,
}

impl MarkupDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Text of all text blocks, one per line.
    pub fn plain_text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                Block::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn push_text(&mut self, list: Option<ListKind>, content: &str) -> usize {
        self.blocks.push(Block::Text {
            list,
            text: content.to_string(),
            spans: Vec::new(),
        });
        self.blocks.len() - 1
    }
}

impl RichTextEngine for MarkupDocument {
    fn apply_style(&mut self, range: TextRange, style: StyleKind) -> Result<(), DocumentError> {
        let block = self
            .blocks
            .get_mut(range.block)
            .ok_or(DocumentError::BlockOutOfRange(range.block))?;
        let Block::Text { text, spans, .. } = block else {
            return Err(DocumentError::NotText(range.block));
        };
        let len = text.chars().count();
        if range.start >= range.end {
            return Err(DocumentError::EmptyRange(range));
        }
        if range.end > len {
            return Err(DocumentError::RangeOutOfBounds { range, len });
        }
        spans.push(Span {
            start: range.start,
            end: range.end,
            style,
        });
        Ok(())
    }

    fn insert_block(&mut self, kind: BlockKind, content: &str) -> Result<usize, DocumentError> {
        match kind {
            BlockKind::Paragraph => Ok(self.push_text(None, content)),
            BlockKind::OrderedItem => Ok(self.push_text(Some(ListKind::Ordered), content)),
            BlockKind::UnorderedItem => Ok(self.push_text(Some(ListKind::Unordered), content)),
            BlockKind::Table { rows, cols } => {
                if rows == 0 || cols == 0 || rows > MAX_TABLE_DIM || cols > MAX_TABLE_DIM {
                    return Err(DocumentError::InvalidBlock(format!(
                        "table must be 1..={MAX_TABLE_DIM} in each dimension, got {rows}x{cols}"
                    )));
                }
                self.blocks.push(Block::Table {
                    rows,
                    cols,
                    cell: content.to_string(),
                });
                Ok(self.blocks.len() - 1)
            }
            BlockKind::Image => {
                let url = content.trim();
                if url.is_empty() {
                    return Err(DocumentError::InvalidBlock("image url is empty".into()));
                }
                self.blocks.push(Block::Image { url: url.to_string() });
                Ok(self.blocks.len() - 1)
            }
            BlockKind::Symbol => {
                if content.is_empty() {
                    return Err(DocumentError::InvalidBlock("symbol is empty".into()));
                }
                if let Some(Block::Text { text, .. }) = self.blocks.last_mut() {
                    text.push_str(content);
                    return Ok(self.blocks.len() - 1);
                }
                Ok(self.push_text(None, content))
            }
        }
    }

    fn render(&self) -> String {
        let mut out = String::new();
        let mut open_list: Option<ListKind> = None;

        for block in &self.blocks {
            let list = match block {
                Block::Text { list, .. } => *list,
                _ => None,
            };
            if open_list != list {
                if let Some(prev) = open_list {
                    out.push_str(&format!("</{}>", prev.tag()));
                }
                if let Some(next) = list {
                    out.push_str(&format!("<{}>", next.tag()));
                }
                open_list = list;
            }

            match block {
                Block::Text { list, text, spans } => {
                    let tag = if list.is_some() { "li" } else { "p" };
                    out.push_str(&format!("<{tag}>"));
                    render_styled(&mut out, text, spans);
                    out.push_str(&format!("</{tag}>"));
                }
                Block::Table { rows, cols, cell } => {
                    let cell = escape(cell);
                    out.push_str("<table>");
                    for _ in 0..*rows {
                        out.push_str("<tr>");
                        for _ in 0..*cols {
                            out.push_str(&format!("<td>{cell}</td>"));
                        }
                        out.push_str("</tr>");
                    }
                    out.push_str("</table>");
                }
                Block::Image { url } => {
                    out.push_str(&format!("<img src=\"{}\"/>", escape(url)));
                }
            }
        }

        if let Some(prev) = open_list {
            out.push_str(&format!("</{}>", prev.tag()));
        }
        out
    }
}

/// Split the text at every span boundary and wrap each segment in the
/// styles covering it, so overlapping spans still nest correctly.
fn render_styled(out: &mut String, text: &str, spans: &[Span]) {
    let chars: Vec<char> = text.chars().collect();
    let mut cuts: BTreeSet<usize> = BTreeSet::new();
    cuts.insert(0);
    cuts.insert(chars.len());
    for span in spans {
        cuts.insert(span.start);
        cuts.insert(span.end);
    }

    let cuts: Vec<usize> = cuts.into_iter().collect();
    for pair in cuts.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        let active: Vec<&StyleKind> = spans
            .iter()
            .filter(|s| s.start <= start && end <= s.end)
            .map(|s| &s.style)
            .collect();
        for style in &active {
            out.push_str(&style.open_tag());
        }
        let segment: String = chars[start..end].iter().collect();
        out.push_str(&escape(&segment));
        for style in active.iter().rev() {
            out.push_str(style.close_tag());
        }
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
