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

//! Line-oriented command protocol.
//!
//! Every message is a three letter code optionally followed by numbers,
//! quoted strings or parenthesised groups of either, terminated by a
//! single carriage return:
//!
//! ```text
//! RTH0000\r
//! PWD122,-2.234\r
//! CMD("te","aaa")("asas")\r
//! ```

mod builder;
mod command;
mod number;
mod parser;

pub use builder::{BuildError, CommandBuilder};
pub use command::{ArgumentShape, Command, CommandCode};
pub use number::Number;
pub use parser::{ParseError, Parser};

/// Byte terminating every line on the wire.
pub const LINE_TERMINATOR: u8 = b'\r';
