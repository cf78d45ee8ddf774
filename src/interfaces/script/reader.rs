use super::command::ScriptLine;
use crate::error::{EngineError, Result};
use std::io::{BufRead, BufReader, Read};

/// Reads replay commands from a JSON-lines source.
///
/// Blank lines and lines starting with `#` are skipped. Each command is
/// yielded together with its 1-based line number so errors can point at it.
pub struct ScriptReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> ScriptReader<R> {
    /// Creates a new `ScriptReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        Self {
            reader: BufReader::new(source),
        }
    }

    /// Returns an iterator that lazily reads and deserializes commands, so
    /// large scripts are never loaded into memory at once.
    pub fn commands(self) -> impl Iterator<Item = (usize, Result<ScriptLine>)> {
        self.reader
            .lines()
            .enumerate()
            .filter_map(|(index, line)| {
                let line_no = index + 1;
                match line {
                    Err(e) => Some((line_no, Err(EngineError::from(e)))),
                    Ok(text) => {
                        let text = text.trim();
                        if text.is_empty() || text.starts_with('#') {
                            return None;
                        }
                        Some((line_no, serde_json::from_str(text).map_err(EngineError::from)))
                    }
                }
            })
    }
}
