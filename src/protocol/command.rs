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

//! Command model shared by the parser and the builder.

use std::fmt;

use super::builder::BuildError;
use super::number::Number;
use super::LINE_TERMINATOR;

/// Three uppercase ASCII letters naming a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandCode([u8; 3]);

impl CommandCode {
    /// Validate and wrap a code. Anything but exactly three `A`-`Z` bytes is rejected.
    pub fn new(code: &str) -> Result<Self, BuildError> {
        Self::from_bytes(code.as_bytes()).ok_or_else(|| BuildError::InvalidCode(code.to_string()))
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [a, b, c] if bytes.iter().all(u8::is_ascii_uppercase) => Some(Self([*a, *b, *c])),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        // Only uppercase ASCII is ever stored.
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for CommandCode {
    type Error = BuildError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Arguments carried by a command.
///
/// Numbers and strings never mix, and every group is non-empty.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ArgumentShape {
    #[default]
    None,
    Numbers(Vec<Number>),
    Strings(Vec<String>),
    NumberGroups(Vec<Vec<Number>>),
    StringGroups(Vec<Vec<String>>),
}

impl ArgumentShape {
    /// Number of top-level arguments, or number of groups for grouped shapes.
    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Numbers(v) => v.len(),
            Self::Strings(v) => v.len(),
            Self::NumberGroups(v) => v.len(),
            Self::StringGroups(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate(&self) -> Result<(), BuildError> {
        match self {
            Self::None => Ok(()),
            Self::Numbers(values) => {
                non_empty(values)?;
                values.iter().try_for_each(check_number)
            }
            Self::Strings(values) => {
                non_empty(values)?;
                values.iter().try_for_each(|s| check_string(s))
            }
            Self::NumberGroups(groups) => {
                non_empty(groups)?;
                for group in groups {
                    non_empty(group)?;
                    group.iter().try_for_each(check_number)?;
                }
                Ok(())
            }
            Self::StringGroups(groups) => {
                non_empty(groups)?;
                for group in groups {
                    non_empty(group)?;
                    group.iter().try_for_each(|s| check_string(s))?;
                }
                Ok(())
            }
        }
    }
}

fn non_empty<T>(values: &[T]) -> Result<(), BuildError> {
    if values.is_empty() {
        Err(BuildError::EmptySequence)
    } else {
        Ok(())
    }
}

/// Bytes allowed inside a quoted string: printable ASCII except the quote.
pub(crate) fn is_string_byte(byte: u8) -> bool {
    (0x20..=0x7E).contains(&byte) && byte != b'"'
}

pub(crate) fn check_string(value: &str) -> Result<(), BuildError> {
    if value.bytes().all(is_string_byte) {
        Ok(())
    } else {
        Err(BuildError::InvalidString(value.to_string()))
    }
}

pub(crate) fn check_number(value: &Number) -> Result<(), BuildError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(BuildError::NonFiniteNumber)
    }
}

/// A decoded or to-be-encoded remote command.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    code: CommandCode,
    shape: ArgumentShape,
}

impl Command {
    /// Create a command, checking the argument invariants.
    pub fn new(code: &str, shape: ArgumentShape) -> Result<Self, BuildError> {
        let code = CommandCode::new(code)?;
        shape.validate()?;
        Ok(Self { code, shape })
    }

    /// Command without arguments.
    pub fn bare(code: &str) -> Result<Self, BuildError> {
        Self::new(code, ArgumentShape::None)
    }

    pub(crate) fn from_parts(code: CommandCode, shape: ArgumentShape) -> Self {
        Self { code, shape }
    }

    pub fn code(&self) -> CommandCode {
        self.code
    }

    pub fn shape(&self) -> &ArgumentShape {
        &self.shape
    }

    pub fn into_shape(self) -> ArgumentShape {
        self.shape
    }

    /// Check the command code.
    pub fn is(&self, code: &str) -> bool {
        self.code.as_str() == code
    }

    pub fn argument_count(&self) -> usize {
        self.shape.len()
    }

    /// Top-level numeric argument.
    pub fn number(&self, index: usize) -> Option<Number> {
        match &self.shape {
            ArgumentShape::Numbers(values) => values.get(index).copied(),
            _ => None,
        }
    }

    /// Top-level string argument.
    pub fn string(&self, index: usize) -> Option<&str> {
        match &self.shape {
            ArgumentShape::Strings(values) => values.get(index).map(String::as_str),
            _ => None,
        }
    }

    pub fn number_group(&self, index: usize) -> Option<&[Number]> {
        match &self.shape {
            ArgumentShape::NumberGroups(groups) => groups.get(index).map(Vec::as_slice),
            _ => None,
        }
    }

    pub fn string_group(&self, index: usize) -> Option<&[String]> {
        match &self.shape {
            ArgumentShape::StringGroups(groups) => groups.get(index).map(Vec::as_slice),
            _ => None,
        }
    }

    /// Encode to wire bytes, including the line terminator.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = self.to_string().into_bytes();
        out.push(LINE_TERMINATOR);
        out
    }
}

pub(crate) fn write_string(out: &mut String, value: &str) {
    out.push('"');
    out.push_str(value);
    out.push('"');
}

fn write_list<T>(
    f: &mut fmt::Formatter<'_>,
    items: &[T],
    mut item: impl FnMut(&mut fmt::Formatter<'_>, &T) -> fmt::Result,
) -> fmt::Result {
    for (i, value) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        item(f, value)?;
    }
    Ok(())
}

/// Wire text without the terminator.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code.as_str())?;
        match &self.shape {
            ArgumentShape::None => Ok(()),
            ArgumentShape::Numbers(values) => write_list(f, values, |f, n| write!(f, "{}", n)),
            ArgumentShape::Strings(values) => {
                write_list(f, values, |f, s| write!(f, "\"{}\"", s))
            }
            ArgumentShape::NumberGroups(groups) => {
                for group in groups {
                    f.write_str("(")?;
                    write_list(f, group, |f, n| write!(f, "{}", n))?;
                    f.write_str(")")?;
                }
                Ok(())
            }
            ArgumentShape::StringGroups(groups) => {
                for group in groups {
                    f.write_str("(")?;
                    write_list(f, group, |f, s| write!(f, "\"{}\"", s))?;
                    f.write_str(")")?;
                }
                Ok(())
            }
        }
    }
}
