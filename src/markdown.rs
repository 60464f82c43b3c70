//! Notion blocks to Markdown, and Markdown to the light HTML used in emails.
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::notion::model::{Block, RichText};

/// Render a block tree as Markdown. Top-level blocks are separated by a blank
/// line; list items nest their children with two-space indentation.
pub fn blocks_to_markdown(blocks: &[Block]) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut numbered = 0usize;
    for block in blocks {
        numbered = if block.typ == "numbered_list_item" { numbered + 1 } else { 0 };
        if let Some(md) = render_block(block, numbered.max(1), 0) {
            out.push(md);
        }
    }
    out.join("\n\n")
}

fn render_block(block: &Block, number: usize, depth: usize) -> Option<String> {
    let text = rich_text_to_markdown(&block.rich_text());
    let indent = "  ".repeat(depth);
    let body = match block.typ.as_str() {
        "paragraph" => text,
        "heading_1" => format!("# {}", text),
        "heading_2" => format!("## {}", text),
        "heading_3" => format!("### {}", text),
        "bulleted_list_item" => format!("- {}", text),
        "numbered_list_item" => format!("{}. {}", number, text),
        "to_do" => {
            let checked = block
                .payload()
                .and_then(|p| p.get("checked"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            format!("- [{}] {}", if checked { "x" } else { " " }, text)
        }
        "quote" => format!("> {}", text.replace('\n', "\n> ")),
        "callout" => {
            let icon = block
                .payload()
                .and_then(|p| p.pointer("/icon/emoji"))
                .and_then(Value::as_str)
                .map(|e| format!("{} ", e))
                .unwrap_or_default();
            format!("> {}{}", icon, text.replace('\n', "\n> "))
        }
        "code" => {
            let language = block
                .payload()
                .and_then(|p| p.get("language"))
                .and_then(Value::as_str)
                .unwrap_or("");
            let plain: String = block.rich_text().iter().map(|t| t.plain_text.as_str()).collect();
            format!("```{}\n{}\n```", language, plain)
        }
        "divider" => "---".to_string(),
        "image" => {
            let url = file_url(block)?;
            let caption = caption(block);
            format!("![{}]({})", caption, url)
        }
        "bookmark" | "embed" | "link_preview" => {
            let url = block
                .payload()
                .and_then(|p| p.get("url"))
                .and_then(Value::as_str)?;
            let caption = caption(block);
            let label = if caption.is_empty() { url.to_string() } else { caption };
            format!("[{}]({})", label, url)
        }
        _ => return None,
    };

    let mut rendered = format!("{}{}", indent, body);
    if !block.children.is_empty() {
        let child_depth = match block.typ.as_str() {
            "bulleted_list_item" | "numbered_list_item" | "to_do" => depth + 1,
            _ => depth,
        };
        let mut n = 0usize;
        for child in &block.children {
            n = if child.typ == "numbered_list_item" { n + 1 } else { 0 };
            if let Some(md) = render_block(child, n.max(1), child_depth) {
                rendered.push('\n');
                rendered.push_str(&md);
            }
        }
    }
    Some(rendered)
}

fn file_url(block: &Block) -> Option<&str> {
    let payload = block.payload()?;
    payload
        .pointer("/file/url")
        .or_else(|| payload.pointer("/external/url"))
        .and_then(Value::as_str)
}

fn caption(block: &Block) -> String {
    block
        .payload()
        .and_then(|p| p.get("caption"))
        .and_then(|v| serde_json::from_value::<Vec<RichText>>(v.clone()).ok())
        .map(|rt| rt.iter().map(|t| t.plain_text.as_str()).collect())
        .unwrap_or_default()
}

/// Apply rich-text annotations as Markdown inline markup.
pub fn rich_text_to_markdown(segments: &[RichText]) -> String {
    segments
        .iter()
        .map(|seg| {
            let mut s = seg.plain_text.clone();
            if s.trim().is_empty() {
                return s;
            }
            let a = &seg.annotations;
            if a.code {
                s = format!("`{}`", s);
            }
            if a.bold {
                s = format!("**{}**", s);
            }
            if a.italic {
                s = format!("*{}*", s);
            }
            if a.strikethrough {
                s = format!("~~{}~~", s);
            }
            if let Some(href) = seg.href.as_deref().filter(|h| !h.is_empty()) {
                s = format!("[{}]({})", s, href);
            }
            s
        })
        .collect()
}

static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6} (.+)$").unwrap());
static IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[(.*?)\]\((.+?)\)").unwrap());
static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(.+?)\]\((.+?)\)").unwrap());
static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());
static ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*(.+?)\*").unwrap());
static CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]+)`").unwrap());

/// Best-effort Markdown to HTML for email bodies: headings, images, links,
/// bold, italic, inline code and line breaks. Lists, tables and code fences
/// pass through as text.
pub fn markdown_to_email_html(markdown: &str) -> String {
    let escaped = escape_html(markdown);
    let mut out = String::with_capacity(escaped.len() + escaped.len() / 4);
    let mut prev_heading = false;
    for (i, line) in escaped.lines().enumerate() {
        if i > 0 && !prev_heading {
            out.push_str("<br>");
        }
        if let Some(caps) = HEADING.captures(line) {
            out.push_str(&format!("<h3>{}</h3>", inline_html(&caps[1])));
            prev_heading = true;
        } else {
            out.push_str(&inline_html(line));
            prev_heading = false;
        }
    }
    out
}

fn inline_html(line: &str) -> String {
    let s = CODE.replace_all(line, "<code>$1</code>");
    let s = IMAGE.replace_all(&s, r#"<img src="$2" alt="$1">"#);
    let s = LINK.replace_all(&s, r#"<a href="$2">$1</a>"#);
    let s = BOLD.replace_all(&s, "<strong>$1</strong>");
    let s = ITALIC.replace_all(&s, "<em>$1</em>");
    s.into_owned()
}

/// Escape the HTML-significant characters of `s`.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
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
