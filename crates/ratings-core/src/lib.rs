use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::Date;

/// Length of the " (YYYY)" annotation trailing every MovieLens title.
pub const TITLE_ANNOTATION_LEN: usize = 7;

/// Length of the fixed suffix trailing every MovieLens IMDb URL.
pub const IMDB_URL_SUFFIX_LEN: usize = 6;

pub const USER_FORMAT: RecordFormat = RecordFormat { delimiter: '|', arity: Arity::Exactly(5) };

pub const MOVIE_FORMAT: RecordFormat = RecordFormat { delimiter: '|', arity: Arity::AtLeast(5) };

pub const RATING_FORMAT: RecordFormat =
    RecordFormat { delimiter: '\t', arity: Arity::Exactly(4) };

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ParseError {
    #[error("expected {expected} fields separated by {delimiter:?}, found {found}")]
    FieldCount { expected: Arity, delimiter: char, found: usize },
    #[error("field `{field}` is not a valid integer: {value:?}")]
    InvalidInteger { field: &'static str, value: String },
    #[error("release date {value:?} does not match DD-Mon-YYYY")]
    InvalidDate { value: String },
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    #[must_use]
    pub fn accepts(self, found: usize) -> bool {
        match self {
            Self::Exactly(expected) => found == expected,
            Self::AtLeast(minimum) => found >= minimum,
        }
    }
}

impl Display for Arity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exactly(expected) => write!(f, "exactly {expected}"),
            Self::AtLeast(minimum) => write!(f, "at least {minimum}"),
        }
    }
}

/// Layout of one delimited source file.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RecordFormat {
    pub delimiter: char,
    pub arity: Arity,
}

impl RecordFormat {
    fn field_count_error(self, found: usize) -> ParseError {
        ParseError::FieldCount { expected: self.arity, delimiter: self.delimiter, found }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct UserId(pub i64);

impl Display for UserId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MovieId(pub i64);

impl Display for MovieId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Movie,
    Rating,
}

impl EntityKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Movie => "movie",
            Self::Rating => "rating",
        }
    }

    /// Table holding every row of this entity.
    #[must_use]
    pub fn table(self) -> &'static str {
        match self {
            Self::User => "users",
            Self::Movie => "movies",
            Self::Rating => "ratings",
        }
    }
}

/// A seeded user. Gender and occupation from the source file are not kept.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct User {
    pub user_id: UserId,
    pub age: i64,
    pub zipcode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Movie {
    pub movie_id: MovieId,
    pub title: String,
    pub released_at: Option<Date>,
    pub imdb_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Rating {
    pub user_id: UserId,
    pub movie_id: MovieId,
    pub score: u8,
}

/// One row staged for insertion.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    User(User),
    Movie(Movie),
    Rating(Rating),
}

impl Entity {
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::User(_) => EntityKind::User,
            Self::Movie(_) => EntityKind::Movie,
            Self::Rating(_) => EntityKind::Rating,
        }
    }
}

impl From<User> for Entity {
    fn from(value: User) -> Self {
        Self::User(value)
    }
}

impl From<Movie> for Entity {
    fn from(value: Movie) -> Self {
        Self::Movie(value)
    }
}

impl From<Rating> for Entity {
    fn from(value: Rating) -> Self {
        Self::Rating(value)
    }
}

#[must_use]
pub fn trim_line_terminator(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

/// Split one raw source line into its fields.
///
/// # Errors
/// Returns [`ParseError::FieldCount`] when the line does not satisfy the format's arity.
pub fn split_fields(line: &str, format: RecordFormat) -> Result<Vec<&str>, ParseError> {
    let fields = trim_line_terminator(line).split(format.delimiter).collect::<Vec<_>>();
    if !format.arity.accepts(fields.len()) {
        return Err(format.field_count_error(fields.len()));
    }
    Ok(fields)
}

/// Drop exactly `count` trailing characters. Values shorter than `count` become empty.
#[must_use]
pub fn strip_trailing_chars(value: &str, count: usize) -> &str {
    let keep = value.chars().count().saturating_sub(count);
    match value.char_indices().nth(keep) {
        Some((end, _)) => &value[..end],
        None => value,
    }
}

/// Parse a `DD-Mon-YYYY` release date. An empty field means the date is unknown.
///
/// # Errors
/// Returns [`ParseError::InvalidDate`] when a non-empty value does not match the pattern.
pub fn parse_release_date(raw: &str) -> Result<Option<Date>, ParseError> {
    if raw.is_empty() {
        return Ok(None);
    }
    Date::parse(raw, format_description!("[day]-[month repr:short case_sensitive:false]-[year]"))
        .map(Some)
        .map_err(|_| ParseError::InvalidDate { value: raw.to_string() })
}

fn parse_integer<T: FromStr>(field: &'static str, raw: &str) -> Result<T, ParseError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| ParseError::InvalidInteger { field, value: raw.to_string() })
}

/// Parse one `u.user` line: `user_id|age|gender|occupation|zipcode`.
///
/// # Errors
/// Returns a [`ParseError`] on a wrong field count or a non-integer id or age.
pub fn parse_user_line(line: &str) -> Result<User, ParseError> {
    let fields = split_fields(line, USER_FORMAT)?;
    let [user_id, age, _gender, _occupation, zipcode] = fields.as_slice() else {
        return Err(USER_FORMAT.field_count_error(fields.len()));
    };

    Ok(User {
        user_id: UserId(parse_integer("user_id", user_id)?),
        age: parse_integer("age", age)?,
        zipcode: (*zipcode).to_string(),
    })
}

/// Parse one `u.item` line, consuming only its first five fields.
///
/// # Errors
/// Returns a [`ParseError`] on too few fields, a non-integer id or a malformed date.
pub fn parse_movie_line(line: &str) -> Result<Movie, ParseError> {
    let fields = split_fields(line, MOVIE_FORMAT)?;
    let [movie_id, title, released_at, _video_released_at, imdb_url, ..] = fields.as_slice()
    else {
        return Err(MOVIE_FORMAT.field_count_error(fields.len()));
    };

    Ok(Movie {
        movie_id: MovieId(parse_integer("movie_id", movie_id)?),
        title: strip_trailing_chars(title, TITLE_ANNOTATION_LEN).to_string(),
        released_at: parse_release_date(released_at)?,
        imdb_url: strip_trailing_chars(imdb_url, IMDB_URL_SUFFIX_LEN).to_string(),
    })
}

/// Parse one `u.data` line: `user_id\tmovie_id\tscore\ttimestamp`. The timestamp is dropped.
///
/// # Errors
/// Returns a [`ParseError`] on a wrong field count or a non-integer id or score.
pub fn parse_rating_line(line: &str) -> Result<Rating, ParseError> {
    let fields = split_fields(line, RATING_FORMAT)?;
    let [user_id, movie_id, score, _timestamp] = fields.as_slice() else {
        return Err(RATING_FORMAT.field_count_error(fields.len()));
    };

    Ok(Rating {
        user_id: UserId(parse_integer("user_id", user_id)?),
        movie_id: MovieId(parse_integer("movie_id", movie_id)?),
        score: parse_integer("score", score)?,
    })
}
