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

//! Numeric argument values.

use std::fmt;

/// A numeric command argument.
///
/// Integer literals without a sign decode as [`Number::Unsigned`], negative
/// integer literals as [`Number::Signed`] and any literal containing a `.` as
/// [`Number::Float`].
#[derive(Debug, Clone, Copy)]
pub enum Number {
    Signed(i64),
    Unsigned(u64),
    Float(f64),
}

impl Number {
    /// Lossy view as a signed 64-bit integer.
    pub fn as_i64(&self) -> i64 {
        match *self {
            Self::Signed(v) => v,
            Self::Unsigned(v) => v as i64,
            Self::Float(v) => v as i64,
        }
    }

    /// Lossy view as an unsigned 64-bit integer.
    pub fn as_u64(&self) -> u64 {
        match *self {
            Self::Signed(v) => v as u64,
            Self::Unsigned(v) => v,
            Self::Float(v) => v as u64,
        }
    }

    /// Lossy view as a 32-bit integer.
    pub fn as_i32(&self) -> i32 {
        self.as_i64() as i32
    }

    /// Lossy view as a double.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Signed(v) => v as f64,
            Self::Unsigned(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    /// Lossy view as a single precision float.
    pub fn as_f32(&self) -> f32 {
        self.as_f64() as f32
    }

    /// Exact conversion to `i64`, `None` for floats and out-of-range values.
    pub fn to_i64(&self) -> Option<i64> {
        match *self {
            Self::Signed(v) => Some(v),
            Self::Unsigned(v) => i64::try_from(v).ok(),
            Self::Float(_) => None,
        }
    }

    /// Exact conversion to `u64`, `None` for floats and negative values.
    pub fn to_u64(&self) -> Option<u64> {
        match *self {
            Self::Signed(v) => u64::try_from(v).ok(),
            Self::Unsigned(v) => Some(v),
            Self::Float(_) => None,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float(_))
    }

    pub fn is_finite(&self) -> bool {
        match *self {
            Self::Float(v) => v.is_finite(),
            _ => true,
        }
    }

    /// Integer value widened to `i128`, `None` for floats.
    fn integer_value(&self) -> Option<i128> {
        match *self {
            Self::Signed(v) => Some(v as i128),
            Self::Unsigned(v) => Some(v as i128),
            Self::Float(_) => None,
        }
    }
}

/// Integers compare by value regardless of variant; floats only equal floats.
impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Float(_), _) | (_, Self::Float(_)) => false,
            _ => self.integer_value() == other.integer_value(),
        }
    }
}

/// Wire representation. Floats always carry a `.` so they decode back as floats.
impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Signed(v) => write!(f, "{}", v),
            Self::Unsigned(v) => write!(f, "{}", v),
            Self::Float(v) => {
                let text = v.to_string();
                if text.contains('.') {
                    f.write_str(&text)
                } else {
                    write!(f, "{}.0", text)
                }
            }
        }
    }
}

macro_rules! number_from {
    ($variant:ident: $($ty:ty),*) => {
        $(
            impl From<$ty> for Number {
                fn from(value: $ty) -> Self {
                    Self::$variant(value.into())
                }
            }
        )*
    };
}

number_from!(Signed: i8, i16, i32, i64);
number_from!(Unsigned: u8, u16, u32, u64);
number_from!(Float: f32, f64);
