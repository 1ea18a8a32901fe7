// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Recursive-descent parser for command lines.
//!
//! ```text
//! command     := code argbody?
//! argbody     := string-list | number-list | group-list
//! group-list  := group group*            ; groups share one element type
//! ```

use thiserror::Error;
use tracing::debug;

use super::command::{is_string_byte, ArgumentShape, Command, CommandCode};
use super::number::Number;
use super::LINE_TERMINATOR;

/// Reason a line failed to parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("command code must be exactly three letters A-Z")]
    InvalidCode,

    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("unexpected character {found:?} at {position}")]
    UnexpectedCharacter { position: usize, found: char },

    #[error("unterminated string starting at {0}")]
    UnterminatedString(usize),

    #[error("byte {byte:#04x} at {position} is not allowed in a string")]
    InvalidStringByte { position: usize, byte: u8 },

    #[error("malformed number at {0}")]
    MalformedNumber(usize),

    #[error("number at {0} does not fit in 64 bits")]
    NumberOutOfRange(usize),

    #[error("empty group at {0}")]
    EmptyGroup(usize),

    #[error("group at {0} mixes strings and numbers with earlier groups")]
    MixedGroups(usize),
}

/// Stateless command parser.
#[derive(Debug, Default, Clone, Copy)]
pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a line, discarding the failure reason.
    pub fn parse(&self, line: impl AsRef<[u8]>) -> Option<Command> {
        match self.try_parse(line) {
            Ok(cmd) => Some(cmd),
            Err(e) => {
                debug!("Rejected command line: {}", e);
                None
            }
        }
    }

    /// Parse a line. A single trailing line terminator is accepted.
    pub fn try_parse(&self, line: impl AsRef<[u8]>) -> Result<Command, ParseError> {
        let mut input = line.as_ref();
        if let Some((&LINE_TERMINATOR, rest)) = input.split_last() {
            input = rest;
        }
        Cursor::new(input).command()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupKind {
    Strings,
    Numbers,
}

struct Cursor<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn unexpected(&self) -> ParseError {
        match self.peek() {
            Some(byte) => ParseError::UnexpectedCharacter {
                position: self.pos,
                found: byte as char,
            },
            None => ParseError::UnexpectedEnd,
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), ParseError> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn command(mut self) -> Result<Command, ParseError> {
        let code = self.code()?;
        let shape = match self.peek() {
            None => ArgumentShape::None,
            Some(b'"') => ArgumentShape::Strings(self.list(Self::string)?),
            Some(b'-' | b'0'..=b'9') => ArgumentShape::Numbers(self.list(Self::number)?),
            Some(b'(') => self.groups()?,
            Some(_) => return Err(self.unexpected()),
        };
        Ok(Command::from_parts(code, shape))
    }

    fn code(&mut self) -> Result<CommandCode, ParseError> {
        let code = self
            .input
            .get(..3)
            .and_then(CommandCode::from_bytes)
            .ok_or(ParseError::InvalidCode)?;
        self.pos = 3;
        Ok(code)
    }

    /// `item (',' item)*` running to the end of input.
    fn list<T>(&mut self, item: fn(&mut Self) -> Result<T, ParseError>) -> Result<Vec<T>, ParseError> {
        let mut values = vec![item(self)?];
        while !self.at_end() {
            self.expect(b',')?;
            values.push(item(self)?);
        }
        Ok(values)
    }

    fn groups(&mut self) -> Result<ArgumentShape, ParseError> {
        let mut kind = None;
        let mut numbers = Vec::new();
        let mut strings = Vec::new();

        loop {
            let start = self.pos;
            self.expect(b'(')?;

            let this_kind = match self.peek() {
                Some(b')') => return Err(ParseError::EmptyGroup(start)),
                Some(b'"') => GroupKind::Strings,
                Some(_) => GroupKind::Numbers,
                None => return Err(ParseError::UnexpectedEnd),
            };
            if *kind.get_or_insert(this_kind) != this_kind {
                return Err(ParseError::MixedGroups(start));
            }

            match this_kind {
                GroupKind::Strings => strings.push(self.group(Self::string)?),
                GroupKind::Numbers => numbers.push(self.group(Self::number)?),
            }

            match self.peek() {
                None => break,
                Some(b'(') => continue,
                Some(_) => return Err(self.unexpected()),
            }
        }

        Ok(match kind {
            Some(GroupKind::Strings) => ArgumentShape::StringGroups(strings),
            _ => ArgumentShape::NumberGroups(numbers),
        })
    }

    /// Elements of one group up to and including the closing `)`.
    fn group<T>(&mut self, item: fn(&mut Self) -> Result<T, ParseError>) -> Result<Vec<T>, ParseError> {
        let mut values = vec![item(self)?];
        loop {
            match self.bump() {
                Some(b',') => values.push(item(self)?),
                Some(b')') => return Ok(values),
                Some(_) => {
                    self.pos -= 1;
                    return Err(self.unexpected());
                }
                None => return Err(ParseError::UnexpectedEnd),
            }
        }
    }

    fn string(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        self.expect(b'"')?;
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(ParseError::UnterminatedString(start)),
                Some(b'"') => return Ok(value),
                Some(byte) if is_string_byte(byte) => value.push(byte as char),
                Some(byte) => {
                    return Err(ParseError::InvalidStringByte {
                        position: self.pos - 1,
                        byte,
                    })
                }
            }
        }
    }

    fn digits(&mut self) -> usize {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        self.pos - start
    }

    /// `'-'? digit+ ('.' digit+)?`, which must be followed by `,`, `)` or the end.
    fn number(&mut self) -> Result<Number, ParseError> {
        let start = self.pos;
        let negative = self.peek() == Some(b'-');
        if negative {
            self.pos += 1;
        }
        if self.digits() == 0 {
            return Err(ParseError::MalformedNumber(start));
        }
        let is_float = self.peek() == Some(b'.');
        if is_float {
            self.pos += 1;
            if self.digits() == 0 {
                return Err(ParseError::MalformedNumber(start));
            }
        }
        if !matches!(self.peek(), None | Some(b',') | Some(b')')) {
            return Err(ParseError::MalformedNumber(start));
        }

        // The numeral is pure ASCII at this point.
        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| ParseError::MalformedNumber(start))?;

        if is_float {
            return text
                .parse::<f64>()
                .map(Number::Float)
                .map_err(|_| ParseError::MalformedNumber(start));
        }

        let magnitude_text = if negative { &text[1..] } else { text };
        let magnitude: u64 = magnitude_text
            .parse()
            .map_err(|_| ParseError::NumberOutOfRange(start))?;

        if !negative {
            return Ok(Number::Unsigned(magnitude));
        }
        let value = -(magnitude as i128);
        i64::try_from(value)
            .map(Number::Signed)
            .map_err(|_| ParseError::NumberOutOfRange(start))
    }
}
