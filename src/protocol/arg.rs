//! Command Arguments
//!
//! Every command argument travels as a RESP bulk string. [`Arg`] is the closed
//! set of argument forms the encoder knows how to stringify:
//!
//! | Variant  | Wire form                          |
//! |----------|------------------------------------|
//! | `Str`    | UTF-8 bytes                        |
//! | `Bytes`  | raw bytes                          |
//! | `Int`    | base-10 digits                     |
//! | `Float`  | shortest digits, `+Inf`/`-Inf`     |
//! | `Bool`   | `"1"` or `"0"`                     |
//! | `Nil`    | empty bulk string                  |
//! | `Custom` | whatever [`ToArg::to_arg`] returns |
//!
//! Domain types plug in through [`ToArg`]. Anything else that can be printed
//! goes through [`Arg::display`], which encodes its `Display` output.

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// A value that converts itself into a primitive [`Arg`].
///
/// The encoder calls [`to_arg`](ToArg::to_arg) once per argument. If the
/// result is itself a `Custom` argument it is not converted again; the
/// original value's `Display` output is encoded instead.
///
/// ```
/// use std::fmt;
/// use resplink::{Arg, ToArg};
///
/// struct UserId(u32);
///
/// impl fmt::Display for UserId {
///     fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
///         write!(f, "user:{}", self.0)
///     }
/// }
///
/// impl ToArg for UserId {
///     fn to_arg(&self) -> Arg {
///         Arg::from(format!("user:{}", self.0))
///     }
/// }
///
/// let arg = Arg::custom(UserId(7));
/// ```
pub trait ToArg: fmt::Display + Send + Sync {
    fn to_arg(&self) -> Arg;
}

/// A single command argument.
#[derive(Clone)]
pub enum Arg {
    Str(String),
    Bytes(Bytes),
    Int(i64),
    Float(f64),
    Bool(bool),
    Nil,
    Custom(Arc<dyn ToArg>),
}

impl Arg {
    /// Wraps a value implementing [`ToArg`].
    pub fn custom(value: impl ToArg + 'static) -> Self {
        Arg::Custom(Arc::new(value))
    }

    /// Fallback for types without a dedicated conversion: the value's
    /// `Display` output is sent as a bulk string.
    pub fn display(value: impl fmt::Display) -> Self {
        Arg::Str(value.to_string())
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Arg::Bytes(b) => f.debug_tuple("Bytes").field(b).finish(),
            Arg::Int(n) => f.debug_tuple("Int").field(n).finish(),
            Arg::Float(n) => f.debug_tuple("Float").field(n).finish(),
            Arg::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Arg::Nil => f.write_str("Nil"),
            Arg::Custom(c) => f.debug_tuple("Custom").field(&c.to_string()).finish(),
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Str(s.to_owned())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Str(s)
    }
}

impl From<&String> for Arg {
    fn from(s: &String) -> Self {
        Arg::Str(s.clone())
    }
}

impl From<&[u8]> for Arg {
    fn from(b: &[u8]) -> Self {
        Arg::Bytes(Bytes::copy_from_slice(b))
    }
}

impl<const N: usize> From<&[u8; N]> for Arg {
    fn from(b: &[u8; N]) -> Self {
        Arg::Bytes(Bytes::copy_from_slice(b))
    }
}

impl From<Vec<u8>> for Arg {
    fn from(b: Vec<u8>) -> Self {
        Arg::Bytes(Bytes::from(b))
    }
}

impl From<Bytes> for Arg {
    fn from(b: Bytes) -> Self {
        Arg::Bytes(b)
    }
}

impl From<bool> for Arg {
    fn from(b: bool) -> Self {
        Arg::Bool(b)
    }
}

impl From<f64> for Arg {
    fn from(n: f64) -> Self {
        Arg::Float(n)
    }
}

impl From<f32> for Arg {
    fn from(n: f32) -> Self {
        Arg::Float(f64::from(n))
    }
}

macro_rules! int_arg {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Arg {
                fn from(n: $t) -> Self {
                    Arg::Int(i64::from(n))
                }
            }
        )*
    };
}

int_arg!(i8, i16, i32, i64, u8, u16, u32);

// These can exceed i64; out-of-range values keep their exact digits.
macro_rules! wide_int_arg {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Arg {
                fn from(n: $t) -> Self {
                    match i64::try_from(n) {
                        Ok(n) => Arg::Int(n),
                        Err(_) => Arg::display(n),
                    }
                }
            }
        )*
    };
}

wide_int_arg!(u64, usize, isize);

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(v: Option<T>) -> Self {
        v.map_or(Arg::Nil, Into::into)
    }
}

/// Builds a `Vec<Arg>` from a list of convertible values.
///
/// ```
/// use resplink::args;
/// let args = args!["key", 42, 1.5, true, b"raw"];
/// assert_eq!(args.len(), 5);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::Arg>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::Arg::from($arg)),+]
    };
}
