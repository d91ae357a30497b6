//! Call-handling directives returned to call-control.

use std::borrow::Cow;

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// Spoken before dialing out to the transfer number.
pub const TRANSFER_NOTICE: &str = "Please hold while I connect you to a member of our team.";

/// Escapes text for use in XML content or a double-quoted attribute.
pub fn escape(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Pauses for a second, then opens a media stream to `stream_url`.
///
/// `parameters` arrive in the stream's start frame. When the stream ends,
/// call-control requests `action_url` for the next directive.
pub fn connect_stream(stream_url: &str, action_url: &str, parameters: &[(&str, &str)]) -> String {
    let mut xml = String::from(XML_DECLARATION);
    xml.push_str(r#"<Response><Pause length="1"/>"#);
    xml.push_str(&format!(
        r#"<Connect action="{}"><Stream url="{}">"#,
        escape(action_url),
        escape(stream_url)
    ));
    for (name, value) in parameters {
        xml.push_str(&format!(
            r#"<Parameter name="{}" value="{}"/>"#,
            escape(name),
            escape(value)
        ));
    }
    xml.push_str("</Stream></Connect></Response>");
    xml
}

/// Speaks `notice`, then dials `number`.
pub fn dial(notice: &str, number: &str) -> String {
    format!(
        "{}<Response><Say>{}</Say><Dial>{}</Dial></Response>",
        XML_DECLARATION,
        escape(notice),
        escape(number)
    )
}

pub fn hangup() -> String {
    format!("{}<Response><Hangup/></Response>", XML_DECLARATION)
}
