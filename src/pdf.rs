//! PDF export of research sessions.
//!
//! Sessions are laid out on A4 pages in a fixed-pitch font, which makes line
//! wrapping and link placement exact without font metrics. Output is always
//! black text on white pages. Lines are placed top-down; when the next line
//! would cross the bottom margin a new page starts, until no content remains.
//!
//! URLs in the text are drawn in blue and covered by URI link annotations
//! spanning exactly their characters. URLs are found before wrapping, so a
//! URL split across lines gets one annotation per fragment, each carrying
//! the full URI. Document info carries title, author, keywords and creator.
//!
//! [`export_pdf`] renders and then records the file in the history store.
//! A failed history write is logged and does not fail the export.

use anyhow::Result;
use chrono::{DateTime, Utc};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use regex::Regex;
use std::sync::OnceLock;

use crate::config::PdfConfig;
use crate::html::html_to_text;
use crate::models::ResearchSession;
use crate::store::HistoryStore;

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 56.0;

/// Courier glyphs are 600/1000 em wide.
const CHAR_WIDTH_EM: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Style {
    Title,
    Heading,
    Body,
}

impl Style {
    fn font(&self) -> &'static str {
        match self {
            Style::Title | Style::Heading => "F2",
            Style::Body => "F1",
        }
    }

    fn size(&self) -> f32 {
        match self {
            Style::Title => 16.0,
            Style::Heading => 12.0,
            Style::Body => 10.0,
        }
    }

    fn leading(&self) -> f32 {
        self.size() * 1.4
    }

    fn char_width(&self) -> f32 {
        self.size() * CHAR_WIDTH_EM
    }

    fn columns(&self) -> usize {
        ((PAGE_WIDTH - 2.0 * MARGIN) / self.char_width()).floor() as usize
    }
}

/// A link over columns `start..end` of a wrapped line.
#[derive(Debug, Clone, PartialEq)]
struct LinkSpan {
    start: usize,
    end: usize,
    uri: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Wrapped {
    text: String,
    links: Vec<LinkSpan>,
}

#[derive(Debug, Clone)]
struct Line {
    text: String,
    links: Vec<LinkSpan>,
    style: Style,
}

impl Line {
    fn blank(style: Style) -> Self {
        Self {
            text: String::new(),
            links: Vec::new(),
            style,
        }
    }
}

/// A generated PDF.
#[derive(Debug, Clone)]
pub struct RenderedPdf {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub page_count: usize,
}

/// Result of [`export_pdf`].
#[derive(Debug, Clone)]
pub struct PdfExport {
    pub pdf: RenderedPdf,
    /// History id, or `None` if recording the export failed.
    pub history_id: Option<i64>,
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"')\]]+"#).expect("valid regex"))
}

/// Filename derived from the export date.
pub fn pdf_filename(now: DateTime<Utc>) -> String {
    format!("research-{}.pdf", now.format("%Y-%m-%d"))
}

/// Maps text into the WinAnsi character set of the standard PDF fonts.
/// Characters outside it become `?`.
fn to_winansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\u{20}'..='\u{7e}' => c as u8,
            '\u{a0}'..='\u{ff}' => c as u32 as u8,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201c}' => 0x93,
            '\u{201d}' => 0x94,
            '\u{2022}' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\u{2026}' => 0x85,
            '\t' => b' ',
            _ => b'?',
        })
        .collect()
}

/// URL spans within one word, in character columns.
fn word_links(word: &str) -> Vec<LinkSpan> {
    url_re()
        .find_iter(word)
        .map(|m| LinkSpan {
            start: word[..m.start()].chars().count(),
            end: word[..m.end()].chars().count(),
            uri: m.as_str().to_string(),
        })
        .collect()
}

/// The parts of `links` inside word columns `from..to`, moved to start at
/// line column `at`.
fn clip_links(links: &[LinkSpan], from: usize, to: usize, at: usize) -> Vec<LinkSpan> {
    links
        .iter()
        .filter_map(|l| {
            let start = l.start.max(from);
            let end = l.end.min(to);
            (start < end).then(|| LinkSpan {
                start: start - from + at,
                end: end - from + at,
                uri: l.uri.clone(),
            })
        })
        .collect()
}

/// Greedy word wrap at `columns` characters; words longer than a line are split.
fn wrap(text: &str, columns: usize) -> Vec<Wrapped> {
    let columns = columns.max(1);
    let mut lines = Vec::new();
    let mut current = Wrapped::default();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let links = word_links(word);
        let chars: Vec<char> = word.chars().collect();
        let mut offset = 0usize;

        while chars.len() - offset > columns {
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let end = offset + columns;
            lines.push(Wrapped {
                text: chars[offset..end].iter().collect(),
                links: clip_links(&links, offset, end, 0),
            });
            offset = end;
        }

        let word_len = chars.len() - offset;
        let needed = if current_len == 0 {
            word_len
        } else {
            current_len + 1 + word_len
        };
        if needed > columns {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.text.push(' ');
            current_len += 1;
        }
        current
            .links
            .extend(clip_links(&links, offset, chars.len(), current_len));
        current.text.extend(&chars[offset..]);
        current_len += word_len;
    }

    if current_len > 0 {
        lines.push(current);
    }
    lines
}

fn push_paragraphs(lines: &mut Vec<Line>, text: &str, style: Style) {
    for paragraph in text.split('\n') {
        if paragraph.trim().is_empty() {
            lines.push(Line::blank(style));
            continue;
        }
        for w in wrap(paragraph, style.columns()) {
            lines.push(Line {
                text: w.text,
                links: w.links,
                style,
            });
        }
    }
}

fn layout(session: &ResearchSession) -> Vec<Line> {
    let mut lines = Vec::new();

    push_paragraphs(&mut lines, &session.title, Style::Title);
    lines.push(Line::blank(Style::Body));
    push_paragraphs(&mut lines, &html_to_text(&session.content), Style::Body);

    if !session.citations.is_empty() {
        lines.push(Line::blank(Style::Body));
        push_paragraphs(&mut lines, "References", Style::Heading);
        for (i, c) in session.citations.iter().enumerate() {
            let entry = if c.title.is_empty() || c.title == c.url {
                format!("[{}] {}", i + 1, c.url)
            } else {
                format!("[{}] {} {}", i + 1, c.title, c.url)
            };
            push_paragraphs(&mut lines, &entry, Style::Body);
        }
    }

    if !session.assets.is_empty() {
        lines.push(Line::blank(Style::Body));
        push_paragraphs(&mut lines, "Figures", Style::Heading);
        for a in &session.assets {
            push_paragraphs(&mut lines, &format!("{} {}", a.description, a.url), Style::Body);
        }
    }

    lines
}

fn set_text_position(ops: &mut Vec<Operation>, x: f32, y: f32) {
    ops.push(Operation::new(
        "Tm",
        vec![
            1i64.into(),
            0i64.into(),
            0i64.into(),
            1i64.into(),
            x.into(),
            y.into(),
        ],
    ));
}

fn set_fill_rgb(ops: &mut Vec<Operation>, r: f32, g: f32, b: f32) {
    ops.push(Operation::new("rg", vec![r.into(), g.into(), b.into()]));
}

fn show_text(ops: &mut Vec<Operation>, text: &str) {
    ops.push(Operation::new(
        "Tj",
        vec![Object::string_literal(to_winansi(text))],
    ));
}

struct PageBuilder {
    ops: Vec<Operation>,
    annots: Vec<Object>,
}

impl PageBuilder {
    fn new() -> Self {
        Self {
            ops: vec![Operation::new("BT", vec![])],
            annots: Vec::new(),
        }
    }

    /// Draws one line with its baseline at `y`, linking its URL spans.
    fn draw_line(&mut self, doc: &mut Document, line: &Line, y: f32) {
        if line.text.is_empty() {
            return;
        }
        let style = line.style;
        self.ops.push(Operation::new(
            "Tf",
            vec![style.font().into(), style.size().into()],
        ));

        let chars: Vec<char> = line.text.chars().collect();
        let mut col = 0usize;

        for link in &line.links {
            if link.start > col {
                set_fill_rgb(&mut self.ops, 0.0, 0.0, 0.0);
                set_text_position(&mut self.ops, MARGIN + col as f32 * style.char_width(), y);
                show_text(&mut self.ops, &chars[col..link.start].iter().collect::<String>());
            }

            let x0 = MARGIN + link.start as f32 * style.char_width();
            let x1 = MARGIN + link.end as f32 * style.char_width();
            set_fill_rgb(&mut self.ops, 0.0, 0.0, 0.8);
            set_text_position(&mut self.ops, x0, y);
            show_text(
                &mut self.ops,
                &chars[link.start..link.end].iter().collect::<String>(),
            );

            let annot_id = doc.add_object(dictionary! {
                "Type" => "Annot",
                "Subtype" => "Link",
                "Rect" => vec![
                    Object::from(x0),
                    Object::from(y - 2.0),
                    Object::from(x1),
                    Object::from(y + style.size()),
                ],
                "Border" => vec![Object::from(0i64), Object::from(0i64), Object::from(0i64)],
                "A" => dictionary! {
                    "S" => "URI",
                    "URI" => Object::string_literal(link.uri.as_str()),
                },
            });
            self.annots.push(annot_id.into());
            col = link.end;
        }

        if col < chars.len() {
            set_fill_rgb(&mut self.ops, 0.0, 0.0, 0.0);
            set_text_position(&mut self.ops, MARGIN + col as f32 * style.char_width(), y);
            show_text(&mut self.ops, &chars[col..].iter().collect::<String>());
        }
    }

    fn finish(
        mut self,
        doc: &mut Document,
        pages_id: ObjectId,
        resources_id: ObjectId,
    ) -> Result<ObjectId> {
        self.ops.push(Operation::new("ET", vec![]));
        let content = Content {
            operations: self.ops,
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "Annots" => self.annots,
        });
        Ok(page_id)
    }
}

fn pdf_date(now: DateTime<Utc>) -> String {
    format!("D:{}Z", now.format("%Y%m%d%H%M%S"))
}

/// Renders a session as a paginated A4 PDF.
pub fn render_pdf(
    session: &ResearchSession,
    config: &PdfConfig,
    now: DateTime<Utc>,
) -> Result<RenderedPdf> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let body_font = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold_font = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => body_font,
            "F2" => bold_font,
        },
    });

    let top = PAGE_HEIGHT - MARGIN;
    let mut page_ids: Vec<ObjectId> = Vec::new();
    let mut page = PageBuilder::new();
    let mut y = top;

    for line in layout(session) {
        let leading = line.style.leading();
        if y - leading < MARGIN {
            page_ids.push(page.finish(&mut doc, pages_id, resources_id)?);
            page = PageBuilder::new();
            y = top;
        }
        y -= leading;
        page.draw_line(&mut doc, &line, y);
    }
    page_ids.push(page.finish(&mut doc, pages_id, resources_id)?);

    let page_count = page_ids.len();
    let kids: Vec<Object> = page_ids.into_iter().map(Object::from).collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
            "MediaBox" => vec![
                Object::from(0i64),
                Object::from(0i64),
                Object::from(PAGE_WIDTH),
                Object::from(PAGE_HEIGHT),
            ],
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(to_winansi(&session.title)),
        "Author" => Object::string_literal(to_winansi(&config.author)),
        "Subject" => Object::string_literal(to_winansi(&session.query)),
        "Keywords" => Object::string_literal(to_winansi(&config.keywords.join(", "))),
        "Creator" => Object::string_literal(format!("deep-research {}", env!("CARGO_PKG_VERSION"))),
        "CreationDate" => Object::string_literal(pdf_date(now)),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;

    Ok(RenderedPdf {
        filename: pdf_filename(now),
        bytes,
        page_count,
    })
}

/// Renders a session and records the PDF in history.
pub async fn export_pdf(
    store: &dyn HistoryStore,
    session: &ResearchSession,
    config: &PdfConfig,
) -> Result<PdfExport> {
    let pdf = render_pdf(session, config, Utc::now())?;
    tracing::info!(
        filename = %pdf.filename,
        pages = pdf.page_count,
        bytes = pdf.bytes.len(),
        "rendered pdf"
    );

    let history_id = match store.save_pdf(&pdf.bytes, &pdf.filename, &session.query).await {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!(error = %e, "failed to record pdf in history");
            None
        }
    };

    Ok(PdfExport { pdf, history_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Citation, Confidence};
    use chrono::TimeZone;

    fn session(content: String) -> ResearchSession {
        ResearchSession {
            query: "Explain entropy".to_string(),
            title: "Entropy and Disorder".to_string(),
            content,
            citations: vec![Citation {
                title: "Clausius".to_string(),
                url: "https://example.org/clausius".to_string(),
            }],
            assets: vec![],
            response_id: None,
            reasoning: None,
            confidence: Confidence::Parsed,
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap()
    }

    fn info_string(doc: &Document, key: &[u8]) -> Vec<u8> {
        let info_id = doc.trailer.get(b"Info").unwrap().as_reference().unwrap();
        let info = doc.get_object(info_id).unwrap().as_dict().unwrap();
        match info.get(key).unwrap() {
            Object::String(bytes, _) => bytes.clone(),
            other => panic!("unexpected info value {:?}", other),
        }
    }

    fn link_uris(doc: &Document) -> Vec<Vec<u8>> {
        doc.objects
            .values()
            .filter_map(|o| o.as_dict().ok())
            .filter(|d| matches!(d.get(b"Subtype"), Ok(Object::Name(n)) if n == b"Link"))
            .map(|d| {
                let action = d.get(b"A").unwrap().as_dict().unwrap();
                match action.get(b"URI").unwrap() {
                    Object::String(bytes, _) => bytes.clone(),
                    other => panic!("unexpected URI value {:?}", other),
                }
            })
            .collect()
    }

    #[test]
    fn test_wrap_respects_columns() {
        let lines: Vec<String> = wrap("aaa bbb ccc dddddddddd", 7)
            .into_iter()
            .map(|w| w.text)
            .collect();
        assert_eq!(lines, vec!["aaa bbb", "ccc", "ddddddd", "ddd"]);
        assert!(wrap("", 10).is_empty());
    }

    #[test]
    fn test_wrap_places_link_columns() {
        let lines = wrap("see https://x.y ok", 40);
        assert_eq!(lines.len(), 1);
        assert_eq!(
            lines[0].links,
            vec![LinkSpan {
                start: 4,
                end: 15,
                uri: "https://x.y".to_string(),
            }]
        );
    }

    #[test]
    fn test_wrap_split_url_keeps_full_uri_on_each_fragment() {
        let url = "https://a.b/cdefgh";
        let lines = wrap(&format!("go {}", url), 8);
        let texts: Vec<&str> = lines.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["go", "https://", "a.b/cdef", "gh"]);

        assert!(lines[0].links.is_empty());
        for fragment in &lines[1..] {
            assert_eq!(fragment.links.len(), 1);
            assert_eq!(fragment.links[0].uri, url);
            assert_eq!(fragment.links[0].start, 0);
            assert_eq!(fragment.links[0].end, fragment.text.chars().count());
        }
    }

    #[test]
    fn test_filename_from_date() {
        assert_eq!(pdf_filename(fixed_now()), "research-2024-03-09.pdf");
    }

    #[test]
    fn test_short_session_is_one_page_with_metadata() {
        let cfg = PdfConfig::default();
        let pdf = render_pdf(&session("<p>Short body [1].</p>".to_string()), &cfg, fixed_now())
            .unwrap();
        assert_eq!(pdf.page_count, 1);
        assert!(pdf.bytes.starts_with(b"%PDF-1.5"));

        let doc = Document::load_mem(&pdf.bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
        assert_eq!(info_string(&doc, b"Title"), b"Entropy and Disorder");
        assert_eq!(info_string(&doc, b"Author"), b"Deep Research");
        assert_eq!(info_string(&doc, b"Keywords"), b"research, physics");
    }

    #[test]
    fn test_long_session_paginates() {
        let body = (0..400)
            .map(|i| format!("Paragraph {} discusses the second law of thermodynamics.", i))
            .collect::<Vec<_>>()
            .join("\n");
        let pdf = render_pdf(&session(body), &PdfConfig::default(), fixed_now()).unwrap();
        assert!(pdf.page_count > 1);
        let doc = Document::load_mem(&pdf.bytes).unwrap();
        assert_eq!(doc.get_pages().len(), pdf.page_count);
    }

    #[test]
    fn test_citation_urls_get_link_annotations() {
        let pdf = render_pdf(&session("Body.".to_string()), &PdfConfig::default(), fixed_now())
            .unwrap();
        let doc = Document::load_mem(&pdf.bytes).unwrap();
        assert_eq!(link_uris(&doc), vec![b"https://example.org/clausius".to_vec()]);
    }

    #[test]
    fn test_url_longer_than_a_line_links_every_fragment() {
        let long_url = format!("https://example.org/{}", "a".repeat(100));
        let mut s = session("Body.".to_string());
        s.citations[0].url = long_url.clone();

        let pdf = render_pdf(&s, &PdfConfig::default(), fixed_now()).unwrap();
        let doc = Document::load_mem(&pdf.bytes).unwrap();
        let uris = link_uris(&doc);
        assert_eq!(uris.len(), 2);
        assert!(uris.iter().all(|u| u == long_url.as_bytes()));
    }

    #[test]
    fn test_winansi_mapping() {
        assert_eq!(to_winansi("a\u{2014}b\u{e9}\u{4e2d}"), vec![b'a', 0x97, b'b', 0xe9, b'?']);
    }
}
