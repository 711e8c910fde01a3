//! Record reader: segments input byte streams into records.
//!
//! A record is the bytes up to (but not including) the next terminator, or
//! up to EOF when none follows; a trailing terminator does not produce an
//! extra empty record. Each record carries whether it was terminated so the
//! sink can reproduce inputs that end without one. `has_more` answers
//! truthfully without consuming, which is what the `$` address and the
//! `n`/`N` commands need.

use crate::error::{Result, SedError};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

/// One named input source.
#[derive(Debug, Clone, PartialEq)]
pub enum InputSource {
    Stdin,
    File(PathBuf),
}

impl InputSource {
    /// Name shown by `F` and used in error messages.
    pub fn display_name(&self) -> String {
        match self {
            InputSource::Stdin => "-".to_string(),
            InputSource::File(path) => path.display().to_string(),
        }
    }
}

/// A record pulled from the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub bytes: Vec<u8>,
    /// False only for a final record cut short by EOF.
    pub terminated: bool,
}

struct OpenSource {
    reader: Box<dyn BufRead>,
    name: String,
    index: usize,
}

struct Pending {
    record: Record,
    source_index: usize,
    name: String,
}

/// Pull interface over a sequence of sources.
pub struct RecordReader {
    sources: Vec<InputSource>,
    term: u8,
    separate: bool,
    next_source: usize,
    current: Option<OpenSource>,
    pending: Option<Pending>,
    /// Source index of the last consumed record.
    consumed_index: Option<usize>,
    current_name: String,
    file_changed: bool,
}

impl RecordReader {
    pub fn new(sources: Vec<InputSource>, term: u8, separate: bool) -> Self {
        Self {
            sources,
            term,
            separate,
            next_source: 0,
            current: None,
            pending: None,
            consumed_index: None,
            current_name: "-".to_string(),
            file_changed: false,
        }
    }

    /// Name of the source the last consumed record came from.
    pub fn current_file_name(&self) -> &str {
        &self.current_name
    }

    /// True when the last `next_record` crossed into a new source.
    pub fn current_file_changed(&self) -> bool {
        self.file_changed
    }

    /// Whether another record exists. In separate mode the answer is scoped
    /// to the current file, so `$` fires on each file's final record.
    pub fn has_more(&mut self) -> Result<bool> {
        self.fill_pending()?;
        match &self.pending {
            None => Ok(false),
            Some(pending) => {
                if self.separate {
                    match self.consumed_index {
                        Some(index) => Ok(pending.source_index == index),
                        None => Ok(true),
                    }
                } else {
                    Ok(true)
                }
            }
        }
    }

    /// Pull the next record, crossing file boundaries as needed.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        self.fill_pending()?;
        let Some(pending) = self.pending.take() else {
            return Ok(None);
        };
        self.file_changed = self.consumed_index != Some(pending.source_index);
        self.consumed_index = Some(pending.source_index);
        self.current_name = pending.name;
        Ok(Some(pending.record))
    }

    fn fill_pending(&mut self) -> Result<()> {
        while self.pending.is_none() {
            if self.current.is_none() {
                if self.next_source >= self.sources.len() {
                    return Ok(());
                }
                self.current = Some(self.open_source(self.next_source)?);
                self.next_source += 1;
            }

            let source = self.current.as_mut().expect("source opened above");
            let mut buf = Vec::new();
            let read = source
                .reader
                .read_until(self.term, &mut buf)
                .map_err(|e| SedError::InputRead {
                    name: source.name.clone(),
                    source: e,
                })?;
            if read == 0 {
                // Source exhausted; fall through to the next one.
                self.current = None;
                continue;
            }
            let terminated = buf.last() == Some(&self.term);
            if terminated {
                buf.pop();
            }
            self.pending = Some(Pending {
                record: Record {
                    bytes: buf,
                    terminated,
                },
                source_index: source.index,
                name: source.name.clone(),
            });
        }
        Ok(())
    }

    fn open_source(&self, index: usize) -> Result<OpenSource> {
        let source = &self.sources[index];
        let name = source.display_name();
        let reader: Box<dyn BufRead> = match source {
            InputSource::Stdin => Box::new(BufReader::new(io::stdin())),
            InputSource::File(path) => {
                let file = File::open(path).map_err(|e| SedError::InputOpen {
                    name: name.clone(),
                    source: e,
                })?;
                Box::new(BufReader::new(file))
            }
        };
        Ok(OpenSource {
            reader,
            name,
            index,
        })
    }
}
