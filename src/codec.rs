use base64::{
    alphabet,
    engine::{general_purpose::GeneralPurpose, DecodePaddingMode, GeneralPurposeConfig},
    Engine,
};
use time::{
    format_description::BorrowedFormatItem, macros::format_description, Date, OffsetDateTime,
    PrimitiveDateTime, UtcOffset,
};

use crate::{wire, HranaError, Value};

/// Standard alphabet, unpadded on encode, padding-indifferent on decode.
const BLOB: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const DATE_TIME: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
const OFFSET: &[BorrowedFormatItem<'static>] =
    format_description!("[offset_hour sign:mandatory]:[offset_minute]");

const WITH_OFFSET: &[&[BorrowedFormatItem<'static>]] = &[
    format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond][offset_hour sign:mandatory]:[offset_minute]"
    ),
    format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond][offset_hour sign:mandatory]:[offset_minute]"
    ),
    format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]"
    ),
    format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]"
    ),
];

const WITHOUT_OFFSET: &[&[BorrowedFormatItem<'static>]] = &[
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]"),
];

const DATE_ONLY: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

pub(crate) fn encode_value(value: &Value) -> Result<wire::Value, HranaError> {
    match value {
        Value::Null => Ok(wire::Value::Null),
        Value::Integer(value) => Ok(wire::Value::Integer {
            value: value.to_string(),
        }),
        Value::Float(value) => {
            if !value.is_finite() {
                return Err(HranaError::UnsupportedType(format!(
                    "non-finite float value '{value}'"
                )));
            }
            Ok(wire::Value::Float { value: *value })
        }
        Value::Text(value) => Ok(wire::Value::Text {
            value: value.clone(),
        }),
        Value::Blob(bytes) => Ok(wire::Value::Blob {
            base64: BLOB.encode(bytes),
        }),
        Value::Timestamp(at) => Ok(wire::Value::Text {
            value: format_timestamp(*at)?,
        }),
    }
}

/// Decodes a wire value; `decltype` opts text columns into timestamp parsing.
pub(crate) fn decode_value(value: wire::Value, decltype: Option<&str>) -> Result<Value, HranaError> {
    match value {
        wire::Value::Null => Ok(Value::Null),
        wire::Value::Integer { value } => value
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|err| HranaError::Decode(format!("invalid integer value '{value}': {err}"))),
        wire::Value::Float { value } => Ok(Value::Float(value)),
        wire::Value::Blob { base64 } => BLOB
            .decode(base64.as_bytes())
            .map(Value::Blob)
            .map_err(|err| HranaError::Decode(format!("invalid base64 blob: {err}"))),
        wire::Value::Text { value } => {
            if decltype.is_some_and(is_timestamp_decltype) {
                if let Some(at) = parse_timestamp(&value) {
                    return Ok(Value::Timestamp(at));
                }
            }
            Ok(Value::Text(value))
        }
    }
}

fn is_timestamp_decltype(decltype: &str) -> bool {
    decltype.eq_ignore_ascii_case("timestamp") || decltype.eq_ignore_ascii_case("datetime")
}

/// `YYYY-MM-DD HH:MM:SS[.fraction]±HH:MM`, with trailing fraction zeros dropped.
pub fn format_timestamp(at: OffsetDateTime) -> Result<String, HranaError> {
    let encode_err = |err: time::error::Format| {
        HranaError::UnsupportedType(format!("timestamp {at} cannot be formatted: {err}"))
    };

    let mut text = at.format(DATE_TIME).map_err(encode_err)?;
    let nanos = at.nanosecond();
    if nanos != 0 {
        let fraction = format!("{nanos:09}");
        text.push('.');
        text.push_str(fraction.trim_end_matches('0'));
    }
    text.push_str(&at.format(OFFSET).map_err(encode_err)?);
    Ok(text)
}

/// Tries each supported layout in order; naive layouts are read as UTC.
pub fn parse_timestamp(text: &str) -> Option<OffsetDateTime> {
    for layout in WITH_OFFSET {
        if let Ok(at) = OffsetDateTime::parse(text, *layout) {
            return Some(at);
        }
    }
    for layout in WITHOUT_OFFSET {
        if let Ok(at) = PrimitiveDateTime::parse(text, *layout) {
            return Some(at.assume_offset(UtcOffset::UTC));
        }
    }
    Date::parse(text, DATE_ONLY)
        .ok()
        .map(|date| date.midnight().assume_utc())
}
