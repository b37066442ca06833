//! SQL values and inline escaping.
//!
//! Mutation statements are assembled as text, so every value that ends up in
//! one goes through [`SqlValue::to_sql_inline`], which escapes quotes and
//! backslashes and renders `NULL` for absent values.

/// A database value carried through a row snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL value.
    Null,
    /// Signed integer value.
    Int(i64),
    /// Unsigned integer value (MySQL `UNSIGNED BIGINT`).
    Uint(u64),
    /// Float value.
    Float(f64),
    /// Text value.
    Text(String),
    /// Binary blob value.
    Bytes(Vec<u8>),
}

impl SqlValue {
    /// Returns the SQL representation for inline use.
    ///
    /// Text is single-quoted with backslashes, quotes, and NUL bytes
    /// escaped; blobs render as `X'..'` hex literals.
    #[must_use]
    pub fn to_sql_inline(&self) -> String {
        match self {
            Self::Null => String::from("NULL"),
            Self::Int(n) => format!("{n}"),
            Self::Uint(n) => format!("{n}"),
            Self::Float(f) => format!("{f}"),
            Self::Text(s) => format!("'{}'", escape(s)),
            Self::Bytes(b) => {
                let hex: String = b.iter().map(|byte| format!("{byte:02X}")).collect();
                format!("X'{hex}'")
            }
        }
    }

    /// Returns the text content, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Escapes a string for inclusion inside single quotes.
#[must_use]
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\0' => out.push_str("\\0"),
            _ => out.push(c),
        }
    }
    out
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        Self::Text(String::from(s))
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for SqlValue {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<u64> for SqlValue {
    fn from(n: u64) -> Self {
        Self::Uint(n)
    }
}

impl From<f64> for SqlValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Uint(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}
