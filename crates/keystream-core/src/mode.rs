//! Open-mode interpretation
//!
//! Turns an `fopen`-style mode string (`r`, `w+`, `ab`, ...) into the
//! capability set a stream is opened with.

use crate::{Result, StreamError};
use std::fmt;
use std::str::FromStr;

/// Capability set derived from a mode specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamMode {
    base: Base,
    plus: bool,
    binary: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Base {
    Read,
    Write,
    Append,
    Exclusive,
}

impl StreamMode {
    /// Parse a mode specification
    ///
    /// Accepts `r`, `r+`, `w`, `w+`, `a`, `a+`, `x` and `x+`, each with an
    /// optional `b` marker before or after the `+`.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut chars = raw.chars();
        let base = match chars.next() {
            Some('r') => Base::Read,
            Some('w') => Base::Write,
            Some('a') => Base::Append,
            Some('x') => Base::Exclusive,
            _ => return Err(StreamError::InvalidMode(raw.to_string())),
        };

        let mut plus = false;
        let mut binary = false;
        for c in chars {
            match c {
                '+' if !plus => plus = true,
                'b' if !binary => binary = true,
                _ => return Err(StreamError::InvalidMode(raw.to_string())),
            }
        }

        Ok(StreamMode { base, plus, binary })
    }

    /// Normalized specification, without the binary marker
    pub fn mode(&self) -> &'static str {
        match (self.base, self.plus) {
            (Base::Read, false) => "r",
            (Base::Read, true) => "r+",
            (Base::Write, false) => "w",
            (Base::Write, true) => "w+",
            (Base::Append, false) => "a",
            (Base::Append, true) => "a+",
            (Base::Exclusive, false) => "x",
            (Base::Exclusive, true) => "x+",
        }
    }

    pub fn allows_read(&self) -> bool {
        self.base == Base::Read || self.plus
    }

    pub fn allows_write(&self) -> bool {
        self.base != Base::Read || self.plus
    }

    pub fn allows_append(&self) -> bool {
        self.base == Base::Append
    }

    /// Opening truncates whatever is stored under the key
    pub fn implies_existing_content_deletion(&self) -> bool {
        self.base == Base::Write
    }

    pub fn allows_new_file_opening(&self) -> bool {
        self.base != Base::Read
    }

    pub fn allows_existing_file_opening(&self) -> bool {
        self.base != Base::Exclusive
    }

    pub fn implies_positioning_cursor_at_the_beginning(&self) -> bool {
        self.base != Base::Append
    }

    pub fn implies_positioning_cursor_at_the_end(&self) -> bool {
        self.base == Base::Append
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }

    /// Both directions requested on one handle
    pub fn is_read_write(&self) -> bool {
        self.allows_read() && self.allows_write()
    }
}

impl FromStr for StreamMode {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        StreamMode::parse(s)
    }
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mode())?;
        if self.binary {
            f.write_str("b")?;
        }
        Ok(())
    }
}
