//! Column model and monotonic type-widening inference.
//!
//! This module owns the [`SqlType`] enum (SQL Server compatible target
//! types), [`DecimalSpec`] precision/scale handling, the per-column
//! [`ColumnState`] (column + decided flag + numeric digit statistics), the
//! [`ColumnCatalog`] shared across one analysis run, and [`observe`], the
//! widening step that folds one JSON leaf into a column.
//!
//! ## Widening rules
//!
//! - Numeric family is totally ordered: Bit < TinyInt < SmallInt < Int <
//!   BigInt < Decimal < Float. A later, narrower-looking value never
//!   downgrades a decided column.
//! - Decimal precision is derived from the maximum integer-digit count and
//!   the maximum scale observed so far, rounded up to the next bound in
//!   {9, 19, 28, 38}. More than 38 required digits is a fatal error.
//! - Temporal family: Time < Date < DateTime2 < DateTimeOffset, with
//!   max-merged fractional-second scale. Time and Date together widen to
//!   DateTime2.
//! - Any other cross-family conflict falls back to VarChar, whose length
//!   covers both the old type's canonical rendering and the new value.
//! - Nullability is sticky: null or an absent key flips `nullable` to true
//!   and nothing flips it back.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow, ensure};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{ProbeError, ProbeResult};

pub const DECIMAL_MAX_PRECISION: u32 = 38;
/// SQL Server storage bounds; required precision rounds up to the next one.
const DECIMAL_PRECISION_BOUNDS: [u32; 4] = [9, 19, 28, 38];
/// Maximum fractional-second digits SQL Server keeps.
const MAX_TEMPORAL_SCALE: u8 = 7;
/// Length assigned to a VarChar column whose only evidence is an empty string.
const VARCHAR_PLACEHOLDER_LENGTH: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecimalSpec {
    pub precision: u32,
    pub scale: u32,
}

impl DecimalSpec {
    pub fn new(precision: u32, scale: u32) -> Result<Self> {
        let spec = Self { precision, scale };
        spec.ensure_valid()?;
        Ok(spec)
    }

    pub fn ensure_valid(&self) -> Result<()> {
        ensure!(self.precision > 0, "Decimal precision must be positive");
        ensure!(
            self.precision <= DECIMAL_MAX_PRECISION,
            "Decimal precision must be <= {}",
            DECIMAL_MAX_PRECISION
        );
        ensure!(
            self.scale <= self.precision,
            "Decimal scale ({}) cannot exceed precision ({})",
            self.scale,
            self.precision
        );
        Ok(())
    }

    pub fn signature(&self) -> String {
        format!("decimal({},{})", self.precision, self.scale)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Bit,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Decimal(DecimalSpec),
    Float,
    Date,
    Time(u8),
    DateTime2(u8),
    DateTimeOffset(u8),
    UniqueIdentifier,
    VarChar(u32),
}

impl SqlType {
    pub fn signature_token(&self) -> String {
        match self {
            SqlType::Bit => "bit".to_string(),
            SqlType::TinyInt => "tinyint".to_string(),
            SqlType::SmallInt => "smallint".to_string(),
            SqlType::Int => "int".to_string(),
            SqlType::BigInt => "bigint".to_string(),
            SqlType::Decimal(spec) => spec.signature(),
            SqlType::Float => "float".to_string(),
            SqlType::Date => "date".to_string(),
            SqlType::Time(scale) => format!("time({scale})"),
            SqlType::DateTime2(scale) => format!("datetime2({scale})"),
            SqlType::DateTimeOffset(scale) => format!("datetimeoffset({scale})"),
            SqlType::UniqueIdentifier => "uniqueidentifier".to_string(),
            SqlType::VarChar(length) => format!("varchar({length})"),
        }
    }

    /// Length of the canonical textual rendering, used when a column falls
    /// back to VarChar and must still cover previously accepted values.
    fn render_length(&self) -> u32 {
        match self {
            SqlType::Bit => 5,
            SqlType::TinyInt => 3,
            SqlType::SmallInt => 6,
            SqlType::Int => 11,
            SqlType::BigInt => 20,
            SqlType::Decimal(spec) => spec.precision + 2,
            SqlType::Float => 24,
            SqlType::Date => 10,
            SqlType::Time(scale) => 8 + fractional_width(*scale),
            SqlType::DateTime2(scale) => 19 + fractional_width(*scale),
            SqlType::DateTimeOffset(scale) => 25 + fractional_width(*scale),
            SqlType::UniqueIdentifier => 36,
            SqlType::VarChar(length) => *length,
        }
    }
}

fn fractional_width(scale: u8) -> u32 {
    if scale == 0 { 0 } else { 1 + u32::from(scale) }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.signature_token())
    }
}

impl FromStr for SqlType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        let (name, args) = match normalized.split_once('(') {
            Some((name, rest)) => {
                ensure!(rest.ends_with(')'), "Unbalanced parentheses in '{value}'");
                (name.trim(), Some(rest[..rest.len() - 1].to_string()))
            }
            None => (normalized.as_str(), None),
        };
        let parse_one = |args: &Option<String>| -> Result<u32> {
            args.as_deref()
                .ok_or_else(|| anyhow!("Type '{name}' requires an argument"))?
                .trim()
                .parse::<u32>()
                .map_err(|err| anyhow!("Parsing argument of '{value}': {err}"))
        };
        match name {
            "bit" => Ok(SqlType::Bit),
            "tinyint" => Ok(SqlType::TinyInt),
            "smallint" => Ok(SqlType::SmallInt),
            "int" => Ok(SqlType::Int),
            "bigint" => Ok(SqlType::BigInt),
            "float" => Ok(SqlType::Float),
            "date" => Ok(SqlType::Date),
            "uniqueidentifier" => Ok(SqlType::UniqueIdentifier),
            "time" => Ok(SqlType::Time(parse_one(&args)? as u8)),
            "datetime2" => Ok(SqlType::DateTime2(parse_one(&args)? as u8)),
            "datetimeoffset" => Ok(SqlType::DateTimeOffset(parse_one(&args)? as u8)),
            "varchar" => Ok(SqlType::VarChar(parse_one(&args)?)),
            "decimal" => {
                let args = args.ok_or_else(|| anyhow!("decimal requires (precision,scale)"))?;
                let mut parts = args.split(',').map(str::trim);
                let precision: u32 = parts
                    .next()
                    .ok_or_else(|| anyhow!("decimal requires a precision"))?
                    .parse()?;
                let scale: u32 = parts
                    .next()
                    .ok_or_else(|| anyhow!("decimal requires a scale"))?
                    .parse()?;
                ensure!(parts.next().is_none(), "decimal takes exactly two arguments");
                Ok(SqlType::Decimal(DecimalSpec::new(precision, scale)?))
            }
            other => Err(anyhow!("Unknown SQL type '{other}'")),
        }
    }
}

impl Serialize for SqlType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.signature_token())
    }
}

impl<'de> Deserialize<'de> for SqlType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        SqlType::from_str(&token).map_err(|err| de::Error::custom(err.to_string()))
    }
}

/// One inferred column: dotted-path name, SQL target type, nullability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    #[serde(rename = "datatype")]
    pub sql_type: SqlType,
    pub nullable: bool,
}

/// Maximum integer-digit count and scale observed across all numeric leaves
/// of one column. Decimal precision is recomputed from these so the result
/// does not depend on observation order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NumericStats {
    pub max_integer_digits: u32,
    pub max_scale: u32,
}

impl NumericStats {
    fn merge(&mut self, integer_digits: u32, scale: u32) {
        self.max_integer_digits = self.max_integer_digits.max(integer_digits);
        self.max_scale = self.max_scale.max(scale);
    }

    fn decimal_spec(&self, column: &str) -> ProbeResult<DecimalSpec> {
        let integer_digits = self.max_integer_digits.max(1);
        let required = integer_digits + self.max_scale;
        let precision = round_up_precision(required).ok_or(ProbeError::PrecisionOverflow {
            column: column.to_string(),
            required,
            max: DECIMAL_MAX_PRECISION,
        })?;
        Ok(DecimalSpec {
            precision,
            scale: self.max_scale,
        })
    }
}

fn round_up_precision(required: u32) -> Option<u32> {
    DECIMAL_PRECISION_BOUNDS
        .iter()
        .copied()
        .find(|bound| required <= *bound)
}

/// A column together with its decided flag and running numeric statistics.
/// Replaces the reference design's pair of string-keyed maps that could
/// drift out of sync.
#[derive(Debug, Clone)]
pub struct ColumnState {
    pub column: Column,
    pub decided: bool,
    numeric: NumericStats,
}

impl ColumnState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            column: Column {
                name: name.into(),
                sql_type: SqlType::Bit,
                nullable: false,
            },
            decided: false,
            numeric: NumericStats::default(),
        }
    }
}

/// Mapping from column name to its current best-known state. Owned by one
/// analysis run; never shared across runs.
#[derive(Debug, Default)]
pub struct ColumnCatalog {
    states: BTreeMap<String, ColumnState>,
}

impl ColumnCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a candidate column discovered on the first page.
    pub fn seed(&mut self, name: &str) {
        self.states
            .entry(name.to_string())
            .or_insert_with(|| ColumnState::new(name));
    }

    pub fn state_mut(&mut self, name: &str) -> &mut ColumnState {
        self.states
            .entry(name.to_string())
            .or_insert_with(|| ColumnState::new(name))
    }

    pub fn get(&self, name: &str) -> Option<&ColumnState> {
        self.states.get(name)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.states.keys().cloned().collect()
    }

    /// Final immutable result of a run.
    pub fn finish(self) -> BTreeMap<String, Column> {
        self.states
            .into_iter()
            .map(|(name, state)| (name, state.column))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum NumericTier {
    Bit,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Decimal,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum TemporalTier {
    Time,
    Date,
    DateTime2,
    DateTimeOffset,
}

/// Family-level view of a type, used to drive the widening merge.
enum Family {
    Numeric(NumericTier),
    Temporal(TemporalTier, u8),
    Guid,
    Text(u32),
}

fn family_of(sql_type: &SqlType) -> Family {
    match sql_type {
        SqlType::Bit => Family::Numeric(NumericTier::Bit),
        SqlType::TinyInt => Family::Numeric(NumericTier::TinyInt),
        SqlType::SmallInt => Family::Numeric(NumericTier::SmallInt),
        SqlType::Int => Family::Numeric(NumericTier::Int),
        SqlType::BigInt => Family::Numeric(NumericTier::BigInt),
        SqlType::Decimal(_) => Family::Numeric(NumericTier::Decimal),
        SqlType::Float => Family::Numeric(NumericTier::Float),
        SqlType::Date => Family::Temporal(TemporalTier::Date, 0),
        SqlType::Time(scale) => Family::Temporal(TemporalTier::Time, *scale),
        SqlType::DateTime2(scale) => Family::Temporal(TemporalTier::DateTime2, *scale),
        SqlType::DateTimeOffset(scale) => Family::Temporal(TemporalTier::DateTimeOffset, *scale),
        SqlType::UniqueIdentifier => Family::Guid,
        SqlType::VarChar(length) => Family::Text(*length),
    }
}

/// Classification of a single leaf before it is merged into the column.
struct Natural {
    sql_type: SqlType,
    /// Character length of the value's textual form, for VarChar growth.
    text_length: u32,
    /// Empty strings force the placeholder length and sticky nullability.
    force_nullable: bool,
}

/// Folds one observed leaf into the column state.
///
/// `value` is `None` when the key was absent from an otherwise well-formed
/// row; that is treated exactly like an explicit JSON null. Arrays and
/// objects must never reach this point — the flattener only emits scalar
/// leaves — so they surface as a classification error.
pub fn observe(state: &mut ColumnState, value: Option<&Value>) -> ProbeResult<()> {
    let Some(value) = value else {
        return Ok(mark_missing(state));
    };
    let natural = match value {
        Value::Null => return Ok(mark_missing(state)),
        Value::Bool(flag) => Natural {
            sql_type: SqlType::Bit,
            text_length: if *flag { 4 } else { 5 },
            force_nullable: false,
        },
        Value::Number(number) => classify_number(state, &number.to_string())?,
        Value::String(text) => classify_text(text),
        Value::Array(_) | Value::Object(_) => {
            return Err(ProbeError::Classification {
                column: state.column.name.clone(),
                value: crate::error::snippet(value),
            });
        }
    };

    if state.decided {
        state.column.sql_type = merge(state, &natural)?;
    } else {
        state.column.sql_type = natural.sql_type;
        state.decided = true;
    }
    if natural.force_nullable {
        state.column.nullable = true;
    }
    Ok(())
}

fn mark_missing(state: &mut ColumnState) {
    // Undecided columns default to Bit; the type is refined once a concrete
    // value shows up, but nullability never reverts.
    state.column.nullable = true;
}

/// Classifies a JSON number literal. Works on the literal text so digit
/// counts survive (serde_json keeps it verbatim under arbitrary_precision).
fn classify_number(state: &mut ColumnState, literal: &str) -> ProbeResult<Natural> {
    let column = state.column.name.clone();
    let text_length = literal.chars().count() as u32;
    let body = literal.strip_prefix('-').unwrap_or(literal);

    if body.contains(['e', 'E']) {
        return Ok(Natural {
            sql_type: SqlType::Float,
            text_length,
            force_nullable: false,
        });
    }

    if let Some((head, tail)) = body.split_once('.') {
        let integer_digits = (head.chars().filter(char::is_ascii_digit).count() as u32).max(1);
        let scale = tail.chars().filter(char::is_ascii_digit).count() as u32;
        let required = integer_digits + scale;
        if required > DECIMAL_MAX_PRECISION {
            return Err(ProbeError::PrecisionOverflow {
                column,
                required,
                max: DECIMAL_MAX_PRECISION,
            });
        }
        state.numeric.merge(integer_digits, scale);
        let spec = state.numeric.decimal_spec(&column)?;
        return Ok(Natural {
            sql_type: SqlType::Decimal(spec),
            text_length,
            force_nullable: false,
        });
    }

    let digits = body.chars().filter(char::is_ascii_digit).count() as u32;
    state.numeric.merge(digits, 0);
    let sql_type = match literal.parse::<i128>() {
        Ok(parsed) if (0..=255).contains(&parsed) => SqlType::TinyInt,
        Ok(parsed) if i16::try_from(parsed).is_ok() => SqlType::SmallInt,
        Ok(parsed) if i32::try_from(parsed).is_ok() => SqlType::Int,
        Ok(parsed) if i64::try_from(parsed).is_ok() => SqlType::BigInt,
        _ if digits <= DECIMAL_MAX_PRECISION => {
            SqlType::Decimal(state.numeric.decimal_spec(&column)?)
        }
        _ => SqlType::Float,
    };
    Ok(Natural {
        sql_type,
        text_length,
        force_nullable: false,
    })
}

/// Classifies a JSON string: time-only, date-only, offset timestamp, plain
/// timestamp, GUID, then VarChar, in that order.
fn classify_text(text: &str) -> Natural {
    let text_length = text.chars().count() as u32;
    if text.is_empty() {
        return Natural {
            sql_type: SqlType::VarChar(VARCHAR_PLACEHOLDER_LENGTH),
            text_length: VARCHAR_PLACEHOLDER_LENGTH,
            force_nullable: true,
        };
    }

    let sql_type = if parse_time_only(text).is_some() {
        SqlType::Time(fractional_second_digits(text))
    } else if parse_date_only(text).is_some() {
        SqlType::Date
    } else if has_offset_marker(text) && parse_offset_datetime(text).is_some() {
        SqlType::DateTimeOffset(fractional_second_digits(text))
    } else if let Some(timestamp) = parse_plain_datetime(text) {
        // A bare midnight timestamp carries no more information than a date.
        if timestamp.time() == NaiveTime::MIN {
            SqlType::Date
        } else {
            SqlType::DateTime2(fractional_second_digits(text))
        }
    } else if parse_guid(text).is_some() {
        SqlType::UniqueIdentifier
    } else {
        SqlType::VarChar(text_length)
    };
    Natural {
        sql_type,
        text_length,
        force_nullable: false,
    }
}

fn parse_time_only(value: &str) -> Option<NaiveTime> {
    const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"];
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(value, fmt).ok())
}

fn parse_date_only(value: &str) -> Option<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

fn parse_offset_datetime(value: &str) -> Option<DateTime<chrono::FixedOffset>> {
    const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f %z", "%Y-%m-%d %H:%M:%S%.f%z"];
    DateTime::parse_from_rfc3339(value).ok().or_else(|| {
        OFFSET_FORMATS
            .iter()
            .find_map(|fmt| DateTime::parse_from_str(value, fmt).ok())
    })
}

fn parse_plain_datetime(value: &str) -> Option<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

fn parse_guid(value: &str) -> Option<Uuid> {
    let trimmed = value.trim().trim_matches(|c| matches!(c, '{' | '}'));
    Uuid::parse_str(trimmed).ok()
}

/// Explicit UTC/offset marker: `Z`/`z`, a `+` offset, or a space-minus
/// offset (a plain `-` would match date separators).
fn has_offset_marker(value: &str) -> bool {
    value.contains(['Z', 'z', '+']) || value.contains(" -")
}

/// Number of fractional-second digits in a temporal literal, capped at the
/// SQL Server maximum of 7.
fn fractional_second_digits(value: &str) -> u8 {
    let mut scale = 0u8;
    let bytes = value.as_bytes();
    for (idx, byte) in bytes.iter().enumerate() {
        if *byte == b'.' {
            let run = bytes[idx + 1..]
                .iter()
                .take_while(|b| b.is_ascii_digit())
                .count();
            if run > 0 {
                scale = run.min(usize::from(MAX_TEMPORAL_SCALE)) as u8;
            }
        }
    }
    scale
}

/// Widens a decided column by one classified observation. Narrower values
/// leave the column untouched; irreconcilable families fall back to VarChar.
fn merge(state: &mut ColumnState, natural: &Natural) -> ProbeResult<SqlType> {
    let current = state.column.sql_type;
    let merged = match (family_of(&current), family_of(&natural.sql_type)) {
        (Family::Text(length), _) => SqlType::VarChar(length.max(natural.text_length)),
        (_, Family::Text(_)) => fall_back_to_varchar(&current, natural),
        (Family::Numeric(old), Family::Numeric(new)) => {
            let tier = old.max(new);
            match tier {
                NumericTier::Decimal => {
                    SqlType::Decimal(state.numeric.decimal_spec(&state.column.name)?)
                }
                NumericTier::Float => SqlType::Float,
                _ if new > old => natural.sql_type,
                _ => current,
            }
        }
        (Family::Temporal(old_tier, old_scale), Family::Temporal(new_tier, new_scale)) => {
            let scale = old_scale.max(new_scale);
            let pair = (old_tier.min(new_tier), old_tier.max(new_tier));
            match pair {
                // A column holding both bare times and bare dates needs a
                // full timestamp to represent either.
                (TemporalTier::Time, TemporalTier::Date) => SqlType::DateTime2(scale),
                _ => match old_tier.max(new_tier) {
                    TemporalTier::Time => SqlType::Time(scale),
                    TemporalTier::Date => SqlType::Date,
                    TemporalTier::DateTime2 => SqlType::DateTime2(scale),
                    TemporalTier::DateTimeOffset => SqlType::DateTimeOffset(scale),
                },
            }
        }
        (Family::Guid, Family::Guid) => SqlType::UniqueIdentifier,
        _ => fall_back_to_varchar(&current, natural),
    };
    Ok(merged)
}

fn fall_back_to_varchar(current: &SqlType, natural: &Natural) -> SqlType {
    SqlType::VarChar(current.render_length().max(natural.text_length))
}
