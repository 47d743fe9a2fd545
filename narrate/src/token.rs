//! Word-level tokens and the timeline index used for highlighting.

use std::time::Duration;

/// When a token is spoken, relative to the start of the whole utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    Timed { start: Duration, end: Duration },
    /// No timestamps; never eligible for highlighting
    Untimed,
}

/// A word-level span of spoken text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub timing: Timing,
    pub trailing_whitespace: bool,
}

impl Token {
    /// Build a token from engine offsets (seconds within one chunk),
    /// rebased by `offset` onto the utterance timeline.
    ///
    /// Without a usable start time the token is untimed. A missing or
    /// inverted end collapses onto the start.
    pub fn rebased(
        text: impl Into<String>,
        start_secs: Option<f64>,
        end_secs: Option<f64>,
        trailing_whitespace: bool,
        offset: Duration,
    ) -> Self {
        let start = start_secs.and_then(|s| Duration::try_from_secs_f64(s).ok());
        let timing = match start {
            Some(start) => {
                let end = end_secs
                    .and_then(|e| Duration::try_from_secs_f64(e).ok())
                    .filter(|end| *end >= start)
                    .unwrap_or(start);
                Timing::Timed {
                    start: start + offset,
                    end: end + offset,
                }
            }
            None => Timing::Untimed,
        };

        Self {
            text: text.into(),
            timing,
            trailing_whitespace,
        }
    }

    /// Word break inserted between chunks
    pub fn separator() -> Self {
        Self {
            text: String::new(),
            timing: Timing::Untimed,
            trailing_whitespace: true,
        }
    }

    pub fn start(&self) -> Option<Duration> {
        match self.timing {
            Timing::Timed { start, .. } => Some(start),
            Timing::Untimed => None,
        }
    }

    pub fn end(&self) -> Option<Duration> {
        match self.timing {
            Timing::Timed { end, .. } => Some(end),
            Timing::Untimed => None,
        }
    }

    pub fn is_timed(&self) -> bool {
        matches!(self.timing, Timing::Timed { .. })
    }
}

/// Append-only, time-ordered token index for one utterance
#[derive(Debug, Clone, Default)]
pub struct TokenTimeline {
    tokens: Vec<Token>,
}

impl TokenTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk's tokens, already rebased onto the utterance timeline
    pub fn extend(&mut self, tokens: impl IntoIterator<Item = Token>) {
        for token in tokens {
            if let (Some(start), Some(last)) = (token.start(), self.last_timed_start()) {
                if start < last {
                    log::warn!(
                        "Token '{}' starts at {:?}, before the previous token at {:?}",
                        token.text,
                        start,
                        last
                    );
                }
            }
            self.tokens.push(token);
        }
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
    }

    /// Index of the token being spoken at `elapsed`.
    ///
    /// Once `elapsed` passes the end of the last timed token, that token
    /// stays active so trailing silence does not drop the highlight.
    pub fn active_token(&self, elapsed: Duration) -> Option<usize> {
        let mut last_timed = None;

        for (index, token) in self.tokens.iter().enumerate() {
            if let Timing::Timed { start, end } = token.timing {
                if start <= elapsed && elapsed < end {
                    return Some(index);
                }
                last_timed = Some((index, end));
            }
        }

        match last_timed {
            Some((index, end)) if elapsed >= end => Some(index),
            _ => None,
        }
    }

    /// Plain text of everything spoken up to `elapsed`.
    ///
    /// Untimed tokens are included as soon as the token before them is.
    /// A word break never doubles up, so a separator after a token that
    /// already carries trailing whitespace adds nothing.
    pub fn spoken_text(&self, elapsed: Duration) -> String {
        let mut text = String::new();

        for token in &self.tokens {
            if let Some(start) = token.start() {
                if start > elapsed {
                    break;
                }
            }
            text.push_str(&token.text);
            if token.trailing_whitespace && !text.ends_with(' ') {
                text.push(' ');
            }
        }

        text
    }

    fn last_timed_start(&self) -> Option<Duration> {
        self.tokens.iter().rev().find_map(Token::start)
    }
}
