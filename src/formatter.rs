//! Message rendering — template substitution over chat events.
//!
//! The template is a plain string with a fixed placeholder set:
//! `{platform_emoji}`, `{platform}`, `{speaker}`, `{message}`.
//! Substitution is a single literal pass over the template: placeholder
//! text inside a speaker name or message is never expanded again, and
//! unknown placeholders pass through untouched. No length truncation
//! happens here — limits belong to the delivery side.

use crate::parser::ChatEvent;

/// A rendered message ready for delivery, paired with the event it came
/// from for retry and failure diagnostics.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Final delivered text.
    pub content: String,
    /// The chat event this message was rendered from.
    pub event: ChatEvent,
}

/// Render a chat event through a template into an [`OutboundMessage`].
pub fn format(event: ChatEvent, template: &str) -> OutboundMessage {
    let content = render(template, &event);
    OutboundMessage { content, event }
}

/// Substitute the known placeholders in `template` with fields from
/// `event`. Single pass, left to right; anything that is not a known
/// placeholder is copied verbatim, including stray `{` and unknown
/// `{tokens}`.
pub fn render(template: &str, event: &ChatEvent) -> String {
    let mut out = String::with_capacity(template.len().saturating_add(event.message.len()));
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after_open = &rest[open..];

        match after_open.find('}') {
            Some(close) => {
                let token = &after_open[1..close];
                match substitution(token, event) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&after_open[..=close]),
                }
                rest = &after_open[close.saturating_add(1)..];
            }
            None => {
                // Unclosed brace: nothing left to substitute.
                out.push_str(after_open);
                return out;
            }
        }
    }

    out.push_str(rest);
    out
}

fn substitution<'a>(token: &str, event: &'a ChatEvent) -> Option<&'a str> {
    match token {
        "platform_emoji" => Some(event.platform.emoji()),
        "platform" => Some(event.platform.name()),
        "speaker" => Some(&event.speaker),
        "message" => Some(&event.message),
        _ => None,
    }
}
