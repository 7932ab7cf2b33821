use thiserror::Error;

/// The engine's internal error taxonomy. No exception-type leaks past this
/// boundary: every fallible path in the engine resolves to one of these
/// variants before it reaches a chat handler.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{message}")]
    UserInput { message: String },

    #[error("quota exceeded: needed {needed} bytes, {available} available")]
    Quota { needed: u64, available: u64 },

    #[error("transient failure in {context}: {source}")]
    Transient {
        context: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{tool} failed")]
    MediaFormat { tool: &'static str, stderr_tail: String },

    #[error("task cancelled")]
    Cancelled,

    #[error("unexpected failure: {0}")]
    Fatal(Box<dyn std::error::Error + Send + Sync>),
}

impl EngineError {
    pub fn user_input(message: impl Into<String>) -> Self {
        EngineError::UserInput { message: message.into() }
    }

    pub fn transient(context: &'static str, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        EngineError::Transient { context, source: Box::new(source) }
    }

    pub fn fatal(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        EngineError::Fatal(Box::new(source))
    }

    /// Truncates stderr to the last `n` bytes on a UTF-8 boundary, per the
    /// "only the tail, never the full transcript" rule.
    pub fn media_format(tool: &'static str, stderr: &[u8]) -> Self {
        const TAIL: usize = 1000;
        let start = stderr.len().saturating_sub(TAIL);
        let mut start = start;
        while start < stderr.len() && !stderr.is_char_boundary(start) {
            start += 1;
        }
        let stderr_tail = String::from_utf8_lossy(&stderr[start..]).into_owned();
        EngineError::MediaFormat { tool, stderr_tail }
    }

    /// True for classes that, in a multi-strategy fetcher, should be consumed
    /// silently so the next strategy can run (§4.G / §7).
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transient { .. })
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::fatal(e)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_format_tail_is_at_most_1000_bytes() {
        let stderr = vec![b'x'; 5000];
        let err = EngineError::media_format("ffmpeg", &stderr);
        match err {
            EngineError::MediaFormat { stderr_tail, .. } => assert!(stderr_tail.len() <= 1000),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn media_format_tail_never_splits_a_utf8_codepoint() {
        let mut stderr = vec![b'x'; 999];
        stderr.extend_from_slice("é".as_bytes());
        let err = EngineError::media_format("ffmpeg", &stderr);
        match err {
            EngineError::MediaFormat { stderr_tail, .. } => {
                assert!(stderr_tail.is_char_boundary(stderr_tail.len()));
            }
            _ => panic!("wrong variant"),
        }
    }
}
