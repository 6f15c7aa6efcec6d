//! Formatting utilities (model Markdown → Telegram HTML, reply layout).

use std::sync::OnceLock;

use regex::Regex;

/// Appended to the text when the image could not be produced.
pub const IMAGE_MISSING_NOTE: &str = "(Изображение не сгенерировано, проверьте настройку агента.)";

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// All inline rules as one alternation, so each span is claimed by exactly one
/// rule and matches never overlap.
fn inline_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(concat!(
            r"\[(?P<label>[^\]\n]+)\]\((?P<url>https?://[^)\s]+)\)",
            r"|\*\*(?P<bold>[^*\n]+?)\*\*",
            r"|__(?P<bold_u>[^_\n]+?)__",
            r"|\*(?P<italic>[^*\s][^*\n]*?)\*",
            // Only at word edges, so snake_case survives.
            r"|(?P<pre>^|[\s(])_(?P<italic_u>[^_\n]+?)_(?P<post>$|[\s.,!?:;)])",
        ))
        .expect("valid regex")
    })
}

/// Length as Telegram counts it for message and caption limits.
pub fn telegram_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Convert the Markdown subset chat models usually emit to Telegram HTML.
///
/// Handles headers, bullets, bold, italic, inline code and links. Anything
/// else is passed through escaped.
pub fn markdown_to_html(input: &str) -> String {
    let mut lines = Vec::new();
    let mut in_fence = false;
    let mut fence = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with("```") {
            if in_fence {
                lines.push(format!("<pre>{}</pre>", escape_html(&fence.join("\n"))));
                fence.clear();
            }
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            fence.push(line);
            continue;
        }
        lines.push(convert_line(line));
    }
    if in_fence {
        // Unclosed fence: keep the content as a block anyway.
        lines.push(format!("<pre>{}</pre>", escape_html(&fence.join("\n"))));
    }

    let mut out = lines.join("\n");
    while out.contains("\n\n\n") {
        out = out.replace("\n\n\n", "\n\n");
    }
    out.trim().to_string()
}

fn convert_line(line: &str) -> String {
    let trimmed = line.trim_start();

    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if (1..=6).contains(&hashes) && trimmed[hashes..].starts_with(' ') {
        return format!("<b>{}</b>", convert_inline(trimmed[hashes..].trim()));
    }

    if let Some(rest) = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))
    {
        return format!("• {}", convert_inline(rest));
    }

    if trimmed.len() >= 3 && trimmed.chars().all(|c| c == '-' || c == '*') {
        return String::new();
    }

    convert_inline(line)
}

/// Inline spans. Backtick segments become `<code>` and are not touched by the
/// emphasis rules.
fn convert_inline(line: &str) -> String {
    let segments: Vec<&str> = line.split('`').collect();
    let n = segments.len();
    // An even count means the last backtick is unmatched.
    let dangling = n % 2 == 0;

    let mut out = String::new();
    for (i, seg) in segments.iter().enumerate() {
        if dangling && i == n - 1 {
            out.push('`');
            out.push_str(&convert_emphasis(seg));
        } else if i % 2 == 1 {
            out.push_str("<code>");
            out.push_str(&escape_html(seg));
            out.push_str("</code>");
        } else {
            out.push_str(&convert_emphasis(seg));
        }
    }
    out
}

/// Links and emphasis over raw (unescaped) text. Plain stretches are escaped;
/// the inside of a span is converted on its own, so nesting stays well formed.
fn convert_emphasis(text: &str) -> String {
    let mut out = String::new();
    let mut last = 0;

    for caps in inline_pattern().captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&escape_html(&text[last..whole.start()]));
        last = whole.end();

        if let (Some(label), Some(url)) = (caps.name("label"), caps.name("url")) {
            out.push_str(&format!(
                r#"<a href="{}">{}</a>"#,
                escape_html(url.as_str()),
                convert_emphasis(label.as_str())
            ));
        } else if let Some(inner) = caps.name("bold").or_else(|| caps.name("bold_u")) {
            out.push_str(&format!("<b>{}</b>", convert_emphasis(inner.as_str())));
        } else if let Some(inner) = caps.name("italic") {
            out.push_str(&format!("<i>{}</i>", convert_emphasis(inner.as_str())));
        } else if let Some(inner) = caps.name("italic_u") {
            let edge = |name: &str| caps.name(name).map_or("", |m| m.as_str());
            out.push_str(&escape_html(edge("pre")));
            out.push_str(&format!("<i>{}</i>", convert_emphasis(inner.as_str())));
            out.push_str(&escape_html(edge("post")));
        } else {
            out.push_str(&escape_html(whole.as_str()));
        }
    }

    out.push_str(&escape_html(&text[last..]));
    out
}

/// Byte offset of the longest prefix of `text` within `limit` UTF-16 units.
fn prefix_end(text: &str, limit: usize) -> usize {
    let mut units = 0;
    for (i, c) in text.char_indices() {
        units += c.len_utf16();
        if units > limit {
            return i;
        }
    }
    text.len()
}

/// Split `text` into chunks of at most `limit` UTF-16 units, preferring
/// paragraph breaks, then line breaks, then spaces.
pub fn split_text(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(2);
    let mut chunks = Vec::new();
    let mut rest = text.trim();

    while telegram_len(rest) > limit {
        let hard_end = prefix_end(rest, limit);
        let window = &rest[..hard_end];

        let cut = ["\n\n", "\n", " "]
            .iter()
            .find_map(|sep| window.rfind(sep).filter(|&i| i > 0))
            .unwrap_or(hard_end);

        chunks.push(rest[..cut].trim_end().to_string());
        rest = rest[cut..].trim_start();
    }

    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

/// One outgoing message of a reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyPart {
    /// The generated image, optionally with an HTML caption.
    Photo { caption_html: Option<String> },
    Html(String),
}

/// Lay out a generated post as Telegram messages.
///
/// With an image and a text that fits the caption limit, the whole post is a
/// single photo message. Longer texts follow the photo as separate messages.
/// Without an image, the text is sent with [`IMAGE_MISSING_NOTE`].
pub fn compose_reply(
    text: &str,
    has_image: bool,
    caption_limit: usize,
    message_limit: usize,
) -> Vec<ReplyPart> {
    let text = text.trim();

    if has_image {
        if telegram_len(text) <= caption_limit {
            let caption_html = (!text.is_empty()).then(|| markdown_to_html(text));
            return vec![ReplyPart::Photo { caption_html }];
        }

        let mut parts = vec![ReplyPart::Photo { caption_html: None }];
        parts.extend(
            split_text(text, message_limit)
                .iter()
                .map(|c| ReplyPart::Html(markdown_to_html(c))),
        );
        return parts;
    }

    let body = if text.is_empty() {
        IMAGE_MISSING_NOTE.to_string()
    } else {
        format!("{text}\n{IMAGE_MISSING_NOTE}")
    };
    split_text(&body, message_limit)
        .iter()
        .map(|c| ReplyPart::Html(markdown_to_html(c)))
        .collect()
}
