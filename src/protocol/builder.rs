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

//! Incremental command builder.

use thiserror::Error;

use super::command::{check_number, check_string, write_string, CommandCode};
use super::number::Number;
use super::LINE_TERMINATOR;

/// Misuse of the builder, reported where it happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("command code {0:?} must be exactly three letters A-Z")]
    InvalidCode(String),

    #[error("numbers and strings cannot be mixed in one command")]
    MixedTypes,

    #[error("string {0:?} contains characters outside the printable range or a quote")]
    InvalidString(String),

    #[error("only finite numbers can be sent")]
    NonFiniteNumber,

    #[error("nested sequences are not allowed")]
    NestedSequence,

    #[error("no sequence is open")]
    NoOpenSequence,

    #[error("a sequence needs at least one element")]
    EmptySequence,

    #[error("arguments after a sequence must go into a new sequence")]
    SequenceExpected,

    #[error("a sequence cannot follow plain arguments")]
    SequenceAfterArguments,

    #[error("last sequence is still open")]
    SequenceOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementType {
    Number,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Empty,
    Plain,
    Grouped,
}

/// Single-use builder mirroring the parser grammar.
///
/// ```
/// use btle_remote::protocol::CommandBuilder;
///
/// let mut builder = CommandBuilder::new("PWD").unwrap();
/// builder.start_sequence().unwrap();
/// builder.add_number(1).unwrap().add_number(2).unwrap();
/// builder.end_sequence().unwrap();
/// assert_eq!(builder.build().unwrap(), b"PWD(1,2)\r".to_vec());
/// ```
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    out: String,
    element_type: Option<ElementType>,
    layout: Layout,
    sequence_open: bool,
    need_comma: bool,
}

impl CommandBuilder {
    pub fn new(code: &str) -> Result<Self, BuildError> {
        let code = CommandCode::new(code)?;
        Ok(Self {
            out: code.as_str().to_string(),
            element_type: None,
            layout: Layout::Empty,
            sequence_open: false,
            need_comma: false,
        })
    }

    fn begin_element(&mut self, element_type: ElementType) -> Result<(), BuildError> {
        if self.element_type.is_some_and(|t| t != element_type) {
            return Err(BuildError::MixedTypes);
        }
        if self.layout == Layout::Grouped && !self.sequence_open {
            return Err(BuildError::SequenceExpected);
        }
        if self.layout == Layout::Empty {
            self.layout = Layout::Plain;
        }
        self.element_type = Some(element_type);
        if self.need_comma {
            self.out.push(',');
        }
        self.need_comma = true;
        Ok(())
    }

    pub fn add_number(&mut self, value: impl Into<Number>) -> Result<&mut Self, BuildError> {
        let value = value.into();
        check_number(&value)?;
        self.begin_element(ElementType::Number)?;
        self.out.push_str(&value.to_string());
        Ok(self)
    }

    pub fn add_string(&mut self, value: &str) -> Result<&mut Self, BuildError> {
        check_string(value)?;
        self.begin_element(ElementType::String)?;
        write_string(&mut self.out, value);
        Ok(self)
    }

    pub fn start_sequence(&mut self) -> Result<&mut Self, BuildError> {
        if self.sequence_open {
            return Err(BuildError::NestedSequence);
        }
        if self.layout == Layout::Plain {
            return Err(BuildError::SequenceAfterArguments);
        }
        self.layout = Layout::Grouped;
        self.sequence_open = true;
        self.need_comma = false;
        self.out.push('(');
        Ok(self)
    }

    pub fn end_sequence(&mut self) -> Result<&mut Self, BuildError> {
        if !self.sequence_open {
            return Err(BuildError::NoOpenSequence);
        }
        if !self.need_comma {
            return Err(BuildError::EmptySequence);
        }
        self.sequence_open = false;
        self.need_comma = false;
        self.out.push(')');
        Ok(self)
    }

    /// Finish the command and return the wire bytes, terminator included.
    pub fn build(self) -> Result<Vec<u8>, BuildError> {
        if self.sequence_open {
            return Err(BuildError::SequenceOpen);
        }
        let mut bytes = self.out.into_bytes();
        bytes.push(LINE_TERMINATOR);
        Ok(bytes)
    }
}
