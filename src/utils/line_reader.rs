// Line reader for text protocols (SMTP, IMAP)
//
// Reads newline-terminated lines with a hard per-line byte budget so a
// misbehaving peer cannot make us buffer unbounded input.

use crate::error::RetrievalError;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// Maximum number of bytes accepted for a single protocol line
pub const MAX_LINE_LENGTH: usize = 8192;

/// One line of a numeric-coded response (`250-PIPELINING`, `220 ready`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumericLine {
    /// Leading run of digits, empty when the line has none
    pub code: String,
    /// Remainder of the line after the code and its separator
    pub message: String,
    /// `true` when the code was followed by `-`, i.e. more lines follow
    pub continued: bool,
}

/// A complete, possibly multi-line numeric response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumericResponse {
    /// Code of the final (non-continued) line
    pub code: String,
    /// Message part of every line, in order
    pub lines: Vec<String>,
}

impl NumericResponse {
    /// Whether any line of the response contains `token`
    pub fn mentions(&self, token: &str) -> bool {
        self.lines.iter().any(|line| line.contains(token))
    }
}

/// Split a raw protocol line into code, message and continuation flag
pub fn parse_numeric_line(raw: &[u8]) -> NumericLine {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\r', '\n']);

    let digits = line
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(idx, _)| idx)
        .unwrap_or(line.len());

    if digits == 0 {
        return NumericLine {
            code: String::new(),
            message: line.to_string(),
            continued: false,
        };
    }

    let code = line[..digits].to_string();
    let rest = &line[digits..];
    let continued = rest.starts_with('-');
    let message = if rest.is_empty() {
        String::new()
    } else {
        // Skip the single separator character (' ' or '-')
        rest[1..].to_string()
    };

    NumericLine {
        code,
        message,
        continued,
    }
}

/// Bounded line reader over an async byte stream
pub struct LineReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
        }
    }

    /// Access the underlying stream, e.g. to write a command
    pub fn get_mut(&mut self) -> &mut R {
        self.inner.get_mut()
    }

    /// Read the next `\n`-terminated line, terminator included
    pub async fn read_line(&mut self) -> Result<Vec<u8>, RetrievalError> {
        let mut line = Vec::new();
        let read = (&mut self.inner)
            .take(MAX_LINE_LENGTH as u64)
            .read_until(b'\n', &mut line)
            .await?;

        if read == 0 {
            return Err(RetrievalError::ConnectionClosed);
        }

        if line.last() != Some(&b'\n') {
            if line.len() >= MAX_LINE_LENGTH {
                return Err(RetrievalError::LineTooLong {
                    limit: MAX_LINE_LENGTH,
                });
            }
            return Err(RetrievalError::ConnectionClosed);
        }

        tracing::trace!("<< {}", String::from_utf8_lossy(&line).trim_end());
        Ok(line)
    }

    /// Read one numeric-coded line
    pub async fn read_numeric(&mut self) -> Result<NumericLine, RetrievalError> {
        let line = self.read_line().await?;
        Ok(parse_numeric_line(&line))
    }

    /// Read lines until one is not marked as continued
    pub async fn read_numeric_response(&mut self) -> Result<NumericResponse, RetrievalError> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_numeric().await?;
            lines.push(line.message);
            if !line.continued {
                return Ok(NumericResponse {
                    code: line.code,
                    lines,
                });
            }
        }
    }
}
