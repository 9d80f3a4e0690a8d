//! Brazilian postal code (CEP) type.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`PostalCode`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PostalCodeError {
    /// The input contains no digits at all.
    #[error("postal code cannot be empty")]
    Empty,
    /// The input contains a character that is neither a digit nor a separator.
    #[error("postal code must be numeric, found {0:?}")]
    NonNumeric(char),
    /// The digit count is outside the recoverable range.
    #[error("postal code must have between {min} and {max} digits, got {len}")]
    InvalidLength {
        /// Digits found in the input.
        len: usize,
        /// Minimum recoverable digit count.
        min: usize,
        /// Canonical digit count.
        max: usize,
    },
}

/// A canonical 8-digit Brazilian postal code.
///
/// CRM exports frequently lose leading zeros (São Paulo codes start with `0`)
/// or store the value as a number, so inputs with 5 to 8 digits are padded on
/// the left. Anything shorter, longer, or containing letters is rejected.
///
/// ## Examples
///
/// ```
/// use rota_core::PostalCode;
///
/// let cep = PostalCode::parse("1310100").unwrap();
/// assert_eq!(cep.as_str(), "01310-100");
/// assert_eq!(cep.digits(), "01310100");
///
/// assert!(PostalCode::parse("1234").is_err());
/// assert!(PostalCode::parse("60000-00A").is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct PostalCode(String);

impl PostalCode {
    /// Canonical number of digits.
    pub const LENGTH: usize = 8;

    /// Shortest input that is still padded instead of rejected.
    pub const MIN_RECOVERABLE_LENGTH: usize = 5;

    /// Parse a `PostalCode`, padding short inputs with leading zeros.
    ///
    /// Hyphens, dots and whitespace are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is empty, contains any other non-digit
    /// character, or has fewer than 5 or more than 8 digits.
    pub fn parse(raw: &str) -> Result<Self, PostalCodeError> {
        let mut digits = String::with_capacity(Self::LENGTH);
        for c in raw.chars() {
            match c {
                '0'..='9' => digits.push(c),
                '-' | '.' => {}
                c if c.is_whitespace() => {}
                other => return Err(PostalCodeError::NonNumeric(other)),
            }
        }

        let len = digits.len();
        if len == 0 {
            return Err(PostalCodeError::Empty);
        }
        if !(Self::MIN_RECOVERABLE_LENGTH..=Self::LENGTH).contains(&len) {
            return Err(PostalCodeError::InvalidLength {
                len,
                min: Self::MIN_RECOVERABLE_LENGTH,
                max: Self::LENGTH,
            });
        }

        let padded = format!("{digits:0>8}");
        let (head, tail) = padded.split_at(5);
        Ok(Self(format!("{head}-{tail}")))
    }

    /// Parse a postal code that arrived as a number.
    ///
    /// # Errors
    ///
    /// Same rules as [`PostalCode::parse`]; negative numbers are non-numeric.
    pub fn from_number(value: i64) -> Result<Self, PostalCodeError> {
        if value < 0 {
            return Err(PostalCodeError::NonNumeric('-'));
        }
        Self::parse(&value.to_string())
    }

    /// The formatted code, `XXXXX-XXX`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 8 bare digits.
    #[must_use]
    pub fn digits(&self) -> String {
        self.0.replace('-', "")
    }

    /// Two-digit regional prefix.
    #[must_use]
    pub fn prefix(&self) -> u8 {
        self.0
            .bytes()
            .take(2)
            .fold(0, |acc, b| acc * 10 + (b - b'0'))
    }

    /// State abbreviation implied by the prefix, where the prefix maps to a
    /// single state.
    #[must_use]
    pub fn state_hint(&self) -> Option<&'static str> {
        match self.prefix() {
            1..=19 => Some("SP"),
            20..=28 => Some("RJ"),
            29 => Some("ES"),
            30..=39 => Some("MG"),
            40..=48 => Some("BA"),
            49 => Some("SE"),
            50..=56 => Some("PE"),
            57 => Some("AL"),
            58 => Some("PB"),
            59 => Some("RN"),
            60..=63 => Some("CE"),
            64 => Some("PI"),
            65 => Some("MA"),
            66 | 67 => Some("PA"),
            70..=72 => Some("DF"),
            74..=76 => Some("GO"),
            77 => Some("TO"),
            78 => Some("MT"),
            79 => Some("MS"),
            80..=87 => Some("PR"),
            88 | 89 => Some("SC"),
            90..=99 => Some("RS"),
            _ => None,
        }
    }
}

/// Normalize a raw postal code, returning `None` when it cannot be recovered.
#[must_use]
pub fn normalize_postal_code(raw: &str) -> Option<PostalCode> {
    PostalCode::parse(raw).ok()
}

impl fmt::Display for PostalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PostalCode {
    type Err = PostalCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PostalCode {
    type Error = PostalCodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PostalCode> for String {
    fn from(code: PostalCode) -> Self {
        code.0
    }
}

impl AsRef<str> for PostalCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// SQLx support (with postgres feature)
#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for PostalCode {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for PostalCode {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self::parse(&s)?)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for PostalCode {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}
