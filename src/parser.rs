//! Chat line parsing — fixed grammar over raw log lines.
//!
//! Recognizes the server's chat line format:
//!
//! ```text
//! Chat (from 'Steam_76561198093711528', entity id '1278', to 'Global'): 'Azzlaer': buenas noches
//! ```
//!
//! Anything that does not match (system messages, other channels, garbled
//! or partial lines) is not an error — it is simply not a chat line.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::tailer::RawLine;

/// Chat line grammar. The line may carry a timestamp/severity prefix, so
/// the pattern is not anchored at the start. Only the `Global` channel is
/// surfaced; whispers and team chat never reach the webhook.
static CHAT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Chat \(from '([^']+)', entity id '([^']+)', to 'Global'\): '([^']+)': (.*)$")
        .expect("chat line pattern is a valid regex")
});

/// Platform the speaker is playing on, detected from the principal prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    /// Steam principal (`Steam_` prefix).
    Steam,
    /// Xbox Live principal (`XBL_` or `Xbox_` prefix).
    Xbox,
    /// PlayStation Network principal (`PSN_` prefix).
    Psn,
    /// Anything else — unrecognized or future platforms.
    Unknown,
}

impl Platform {
    /// Detect the platform from a principal string such as
    /// `Steam_76561198093711528`. Total: unknown prefixes map to
    /// [`Platform::Unknown`] rather than failing.
    pub fn from_principal(principal: &str) -> Self {
        if principal.starts_with("Steam_") {
            Self::Steam
        } else if principal.starts_with("XBL_") || principal.starts_with("Xbox_") {
            Self::Xbox
        } else if principal.starts_with("PSN_") {
            Self::Psn
        } else {
            Self::Unknown
        }
    }

    /// Display name used for the `{platform}` template placeholder.
    pub fn name(self) -> &'static str {
        match self {
            Self::Steam => "Steam",
            Self::Xbox => "Xbox",
            Self::Psn => "PSN",
            Self::Unknown => "Unknown",
        }
    }

    /// Glyph used for the `{platform_emoji}` template placeholder.
    pub fn emoji(self) -> &'static str {
        match self {
            Self::Steam => "🧟",
            Self::Xbox => "🎮",
            Self::Psn => "🕹️",
            Self::Unknown => "❔",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A structured chat event extracted from one raw log line.
///
/// Immutable once produced. The raw source line is kept for diagnostics
/// (retry logging, permanent-failure reports).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    /// Speaker's platform.
    pub platform: Platform,
    /// Speaker display name, verbatim from the log.
    pub speaker: String,
    /// Message text, verbatim — may be empty, may contain emoji.
    pub message: String,
    /// The raw line the event was extracted from.
    pub raw: String,
}

/// Parse one raw line into a [`ChatEvent`].
///
/// Returns `None` for anything that is not a Global chat line: system
/// messages, other chat channels, and lines with unterminated quotes.
/// Callers treat `None` as "skip", never as a failure.
pub fn parse(line: &RawLine) -> Option<ChatEvent> {
    let caps = CHAT_LINE.captures(&line.text)?;
    let principal = caps.get(1)?.as_str();
    let speaker = caps.get(3)?.as_str();
    let message = caps.get(4)?.as_str();

    Some(ChatEvent {
        platform: Platform::from_principal(principal),
        speaker: speaker.to_owned(),
        message: message.to_owned(),
        raw: line.text.clone(),
    })
}
