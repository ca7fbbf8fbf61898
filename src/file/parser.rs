//! Cursor-based reader for code and data cells.
//!
//! This module provides the [`crate::file::parser::Parser`] type, a bounds-checked cursor over
//! a byte slice. The bytecode is an array of 4-byte little-endian cells; the data segment
//! holds global variables and NUL-terminated string literals packed into cells.
//!
//! # Usage Examples
//!
//! ```rust
//! use smxscope::Parser;
//!
//! let data = [0x2a, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff];
//! let mut parser = Parser::new(&data);
//!
//! assert_eq!(parser.read_cell()?, 42);
//! assert_eq!(parser.read_cell()?, -1);
//! assert!(!parser.has_more_data());
//! # Ok::<(), smxscope::Error>(())
//! ```

use crate::Result;

/// Size in bytes of one machine cell.
pub const CELL_SIZE: usize = 4;

/// A bounds-checked cursor over binary data.
///
/// All reads validate that enough data remains before advancing; a failed read leaves the
/// position untouched and returns [`crate::Error::OutOfBounds`].
pub struct Parser<'a> {
    /// The binary data being parsed
    data: &'a [u8],
    /// Current position within the data buffer
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new [`crate::file::parser::Parser`] from a byte slice.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Returns the length of the underlying data buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the underlying buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if at least one byte remains to be read.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Move to an absolute position.
    ///
    /// Seeking to exactly the end of the buffer is allowed; reads from there fail.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` lies beyond the end of the data.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// Returns the current position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Number of bytes left after the current position.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Runs `f` and restores the position if it fails.
    ///
    /// # Errors
    /// Propagates the error returned by `f`.
    pub fn transactional<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let saved_position = self.position;
        let result = f(self);
        if result.is_err() {
            self.position = saved_position;
        }
        result
    }

    /// Reads one little-endian cell and advances past it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than four bytes remain.
    pub fn read_cell(&mut self) -> Result<i32> {
        let value = self.peek_cell()?;
        self.position += CELL_SIZE;
        Ok(value)
    }

    /// Reads one little-endian cell without advancing.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than four bytes remain.
    pub fn peek_cell(&self) -> Result<i32> {
        let end = self
            .position
            .checked_add(CELL_SIZE)
            .ok_or(out_of_bounds_error!())?;
        let bytes = self
            .data
            .get(self.position..end)
            .ok_or(out_of_bounds_error!())?;

        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a single byte.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn read_u8(&mut self) -> Result<u8> {
        let byte = *self
            .data
            .get(self.position)
            .ok_or(out_of_bounds_error!())?;
        self.position += 1;
        Ok(byte)
    }

    /// Reads a NUL-terminated string, consuming the terminator.
    ///
    /// Invalid UTF-8 sequences are replaced rather than rejected; string literals in the data
    /// segment are frequently Latin-1.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if no terminator is found.
    pub fn read_string(&mut self) -> Result<String> {
        let rest = &self.data[self.position.min(self.data.len())..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(out_of_bounds_error!())?;

        let value = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.position += len + 1;
        Ok(value)
    }

    /// Reads `length` raw bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if not enough data remains.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(length)
            .ok_or(out_of_bounds_error!())?;
        let bytes = self
            .data
            .get(self.position..end)
            .ok_or(out_of_bounds_error!())?;
        self.position = end;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_read_cells() {
        let data = [0x01, 0x00, 0x00, 0x00, 0xfe, 0xff, 0xff, 0xff];
        let mut parser = Parser::new(&data);
        assert_eq!(parser.peek_cell().unwrap(), 1);
        assert_eq!(parser.read_cell().unwrap(), 1);
        assert_eq!(parser.read_cell().unwrap(), -2);
        assert!(matches!(parser.read_cell(), Err(Error::OutOfBounds)));
        assert_eq!(parser.pos(), 8);
    }

    #[test]
    fn test_truncated_cell() {
        let mut parser = Parser::new(&[0x01, 0x02]);
        assert!(matches!(parser.read_cell(), Err(Error::OutOfBounds)));
        assert_eq!(parser.pos(), 0);
    }

    #[test]
    fn test_parse_string() {
        let test_cases = vec![
            (vec![0x61, 0x62, 0x63, 0x00], "abc"),
            (vec![0x00], ""),
            (vec![0xE4, 0xB8, 0xAD, 0xE6, 0x96, 0x87, 0x00], "中文"),
        ];

        for (input, expected) in test_cases {
            let mut parser = Parser::new(&input);
            assert_eq!(parser.read_string().unwrap(), expected);
            assert!(!parser.has_more_data());
        }

        let mut parser = Parser::new(b"abc");
        assert!(matches!(parser.read_string(), Err(Error::OutOfBounds)));
    }

    #[test]
    fn test_seek_and_transactional() {
        let data = [0u8; 8];
        let mut parser = Parser::new(&data);
        parser.seek(8).unwrap();
        assert!(parser.seek(9).is_err());

        parser.seek(6).unwrap();
        let result = parser.transactional(|p| p.read_cell());
        assert!(result.is_err());
        assert_eq!(parser.pos(), 6);
        assert_eq!(parser.remaining(), 2);
        assert_eq!(parser.read_bytes(2).unwrap(), &[0, 0]);
    }
}
