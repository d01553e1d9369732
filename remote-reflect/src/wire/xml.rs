//! Minimal XML emitter for envelopes.
//!
//! Parsing goes through roxmltree; writing is append-only string building
//! since envelopes only ever contain elements and escaped text.

pub(crate) struct XmlWriter {
    buf: String,
}

impl XmlWriter {
    pub fn new() -> Self {
        Self {
            buf: String::with_capacity(256),
        }
    }

    pub fn open(&mut self, tag: &str) {
        self.buf.push('<');
        self.buf.push_str(tag);
        self.buf.push('>');
    }

    pub fn close(&mut self, tag: &str) {
        self.buf.push_str("</");
        self.buf.push_str(tag);
        self.buf.push('>');
    }

    /// `<tag>escaped text</tag>`
    pub fn leaf(&mut self, tag: &str, text: &str) {
        self.open(tag);
        escape_into(text, &mut self.buf);
        self.close(tag);
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

fn escape_into(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
}

/// Shortest text that parses back to the same number.
pub(crate) fn format_number(n: f64) -> String {
    n.to_string()
}
