use std::fmt::{self, Write};

use crate::future::ActorFuture;

/// Longest message rendering kept on a future, in bytes.
pub(crate) const MESSAGE_LIMIT: usize = 128;

/// Renders `msg` with `Debug`, stopping once [`MESSAGE_LIMIT`] bytes are written.
///
/// Formatting is abandoned at the limit rather than completed and cut, so large
/// payloads cost no more than a short one to send.
pub(crate) fn describe(msg: &impl fmt::Debug) -> Box<str> {
    let mut out = Capped {
        buf: String::new(),
        truncated: false,
    };
    // The only error is the one `Capped` raises at the limit.
    let _ = write!(out, "{msg:?}");
    if out.truncated {
        out.buf.push('…');
    }
    out.buf.into_boxed_str()
}

struct Capped {
    buf: String,
    truncated: bool,
}

impl Write for Capped {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = MESSAGE_LIMIT - self.buf.len();
        if s.len() <= room {
            self.buf.push_str(s);
            return Ok(());
        }
        let mut end = room;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        self.buf.push_str(&s[..end]);
        self.truncated = true;
        Err(fmt::Error)
    }
}

/// A mailbox entry: the payload plus the future its execution resolves.
pub(crate) struct Envelope<M, R> {
    pub payload: M,
    pub future: ActorFuture<R>,
}

impl<M, R> Envelope<M, R> {
    pub fn new(payload: M, future: ActorFuture<R>) -> Self {
        Self { payload, future }
    }
}

impl<M, R> fmt::Debug for Envelope<M, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("payload", &self.future.message())
            .field("state", &self.future.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_messages_render_in_full() {
        assert_eq!(&*describe(&("ping", 3)), "(\"ping\", 3)");
    }

    #[test]
    fn long_messages_are_capped() {
        let payload = vec![7_u8; 10_000];
        let rendered = describe(&payload);
        assert!(rendered.ends_with('…'));
        assert_eq!(rendered.len(), MESSAGE_LIMIT + '…'.len_utf8());
        assert!(rendered.starts_with("[7, 7, 7"));
    }

    #[test]
    fn cap_respects_char_boundaries() {
        let text = "é".repeat(200);
        let rendered = describe(&text);
        assert!(rendered.len() <= MESSAGE_LIMIT + '…'.len_utf8());
        assert!(rendered.starts_with("\"é"));
    }
}
