//! Pure text transforms applied while composing and sending.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::{BodyFormat, Message, Signature, SignatureId};

/// Prefix put in front of forwarded subjects.
pub const FORWARD_PREFIX: &str = "Fwd:";

static BREAK_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>|</p\s*>|</div\s*>|</li\s*>").ok());

static BLOCK_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)\s*>").ok());

static TAG_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").ok());

/// Find the selected signature in the sender's list.
///
/// `None`, or an id that is not among `signatures`, selects nothing.
pub fn find_signature(signatures: &[Signature], id: Option<SignatureId>) -> Option<&Signature> {
    let id = id?;
    signatures.iter().find(|s| s.id == id)
}

/// Append the selected signature to `body`.
pub fn append_signature(
    body: &str,
    format: BodyFormat,
    signatures: &[Signature],
    id: Option<SignatureId>,
) -> String {
    match find_signature(signatures, id) {
        Some(sig) => {
            let separator = match format {
                BodyFormat::Html => "<br />",
                BodyFormat::Plain => "\n\n",
            };
            format!("{body}{separator}{}", sig.text)
        }
        None => body.to_owned(),
    }
}

/// `[label] subject`, or `subject` when there is no label.
pub fn prefixed_subject(subject: &str, label: Option<&str>) -> String {
    match label {
        Some(label) => format!("[{label}] {subject}"),
        None => subject.to_owned(),
    }
}

/// Apply the course label to an outgoing copy, at most once.
pub fn apply_subject_prefix(outgoing: &mut Message, label: Option<&str>) {
    if outgoing.subject_prefixed {
        return;
    }
    if label.is_some() {
        outgoing.subject = prefixed_subject(&outgoing.subject, label);
        outgoing.subject_prefixed = true;
    }
}

/// `Fwd: subject`.
pub fn forward_subject(subject: &str) -> String {
    format!("{FORWARD_PREFIX} {subject}")
}

/// Escape `&`, `<`, `>`, `"` and `'`.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Render an HTML fragment as plain text.
///
/// Scripts and styles are dropped, line-level tags become newlines, every
/// other tag is removed and the common entities are decoded.
pub fn plain_text(html: &str) -> String {
    let mut text = html.to_owned();
    if let Some(re) = BLOCK_RE.as_ref() {
        text = re.replace_all(&text, "").into_owned();
    }
    if let Some(re) = BREAK_RE.as_ref() {
        text = re.replace_all(&text, "\n").into_owned();
    }
    if let Some(re) = TAG_RE.as_ref() {
        text = re.replace_all(&text, "").into_owned();
    }
    decode_entities(&text).trim().to_owned()
}

/// Plain-text alternative for a body.
pub fn plain_body(body: &str, format: BodyFormat) -> String {
    match format {
        BodyFormat::Html => plain_text(body),
        BodyFormat::Plain => body.to_owned(),
    }
}

/// HTML alternative for a body.
pub fn html_body(body: &str, format: BodyFormat) -> String {
    match format {
        BodyFormat::Html => body.to_owned(),
        BodyFormat::Plain => escape_html(body).replace('\n', "<br />\n"),
    }
}

/// Quote a question prompt, sanitized, then the last response when one is
/// known, then a link to the attempt.
pub fn quote_question(
    question_html: &str,
    response_summary: Option<&str>,
    review_url: &str,
) -> String {
    let mut body = format!("<p></p><blockquote>{}</blockquote>", quoted(question_html));
    if let Some(response) = response_summary.filter(|r| !r.trim().is_empty()) {
        body.push_str(&format!(
            "<p><em>Last response:</em></p><blockquote>{}</blockquote>",
            quoted(response)
        ));
    }
    body.push_str(&format!(
        "<p><a href=\"{}\">View the original attempt</a></p>",
        escape_html(review_url)
    ));
    body
}

fn quoted(html: &str) -> String {
    escape_html(&plain_text(html)).replace('\n', "<br />")
}
