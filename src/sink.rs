//! Output sink: a buffered byte writer with record semantics.
//!
//! The sink owns the one subtlety of sed output: a final record that arrived
//! without its terminator must leave without one. Records are written with a
//! deferred terminator — when a record is unterminated, its terminator is
//! withheld, and emitted only if more output follows. Byte-for-byte identity
//! with the input then holds for an empty script.

use crate::error::{Result, SedError};
use std::io::{BufWriter, Write};

pub struct Sink<W: Write> {
    out: BufWriter<W>,
    term: u8,
    unbuffered: bool,
    deferred_term: bool,
}

impl<W: Write> Sink<W> {
    pub fn new(writer: W, term: u8, unbuffered: bool) -> Self {
        Self {
            out: BufWriter::new(writer),
            term,
            unbuffered,
            deferred_term: false,
        }
    }

    fn settle_deferred(&mut self) -> Result<()> {
        if self.deferred_term {
            self.deferred_term = false;
            self.out
                .write_all(&[self.term])
                .map_err(SedError::OutputWrite)?;
        }
        Ok(())
    }

    /// Write raw bytes (already carrying any terminators of their own).
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.settle_deferred()?;
        self.out.write_all(bytes).map_err(SedError::OutputWrite)
    }

    /// Write a record followed by the terminator; an unterminated record
    /// defers it.
    pub fn write_record(&mut self, bytes: &[u8], terminated: bool) -> Result<()> {
        self.settle_deferred()?;
        self.out.write_all(bytes).map_err(SedError::OutputWrite)?;
        if terminated {
            self.out
                .write_all(&[self.term])
                .map_err(SedError::OutputWrite)?;
        } else {
            self.deferred_term = true;
        }
        if self.unbuffered {
            self.flush()?;
        }
        Ok(())
    }

    /// Write a buffer and make sure it ends in exactly one terminator, the
    /// rule for draining the append queue.
    pub fn write_terminated(&mut self, bytes: &[u8]) -> Result<()> {
        self.settle_deferred()?;
        self.out.write_all(bytes).map_err(SedError::OutputWrite)?;
        if bytes.last() != Some(&self.term) {
            self.out
                .write_all(&[self.term])
                .map_err(SedError::OutputWrite)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush().map_err(SedError::OutputWrite)
    }

    /// Flush and hand back the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.flush()?;
        self.out
            .into_inner()
            .map_err(|e| SedError::OutputWrite(e.into_error()))
    }
}
