//! Configuration element accessors
//!
//! The core consumes already-parsed [`xmltree::Element`] trees produced by
//! the configuration collaborator. This module provides the typed attribute
//! readers shared by every `import_xml`/`export_xml` implementation, plus
//! the two small literal codecs used across the configuration surface:
//! duration strings (`"30"`, `"10s"`, `"5m"`, `"2h"`, `"1d"`) and weekday
//! digit strings (`"135"` = Monday, Wednesday, Friday).

use std::str::FromStr;

use xmltree::Element;

use crate::error::{CoreError, CoreResult};

/// Returns the attribute value if present and non-empty.
pub fn attr<'a>(element: &'a Element, name: &str) -> Option<&'a str> {
    element
        .attributes
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

/// Returns the attribute value, failing with [`CoreError::Config`] when the
/// attribute is absent or empty.
pub fn require_attr<'a>(element: &'a Element, name: &str) -> CoreResult<&'a str> {
    attr(element, name).ok_or_else(|| {
        CoreError::config(format!(
            "missing attribute '{}' on <{}>",
            name, element.name
        ))
    })
}

/// Parses an attribute into `T`, returning `default` when absent.
pub fn attr_or<T: FromStr>(element: &Element, name: &str, default: T) -> CoreResult<T> {
    match attr(element, name) {
        Some(text) => text.parse().map_err(|_| {
            CoreError::config(format!(
                "attribute '{}' on <{}> is not valid: '{}'",
                name, element.name, text
            ))
        }),
        None => Ok(default),
    }
}

/// Parses an optional attribute into `Some(T)`.
pub fn attr_opt<T: FromStr>(element: &Element, name: &str) -> CoreResult<Option<T>> {
    match attr(element, name) {
        Some(text) => text
            .parse()
            .map(Some)
            .map_err(|_| {
                CoreError::config(format!(
                    "attribute '{}' on <{}> is not valid: '{}'",
                    name, element.name, text
                ))
            }),
        None => Ok(None),
    }
}

/// Creates a bare element with the given tag name.
pub fn new_element(name: &str) -> Element {
    Element::new(name)
}

/// Sets an attribute from anything displayable.
pub fn set_attr(element: &mut Element, name: &str, value: impl ToString) {
    element
        .attributes
        .insert(name.to_string(), value.to_string());
}

/// Child elements of `parent`, in document order.
pub fn children(parent: &Element) -> impl Iterator<Item = &Element> {
    parent.children.iter().filter_map(|node| node.as_element())
}

/// Parses a duration literal into seconds.
///
/// Bare integers are seconds; the suffixes `s`, `m`, `h` and `d` scale
/// accordingly. A leading `-` is accepted only when `allow_negative` is set
/// (used by the variable time-spec offset).
pub fn parse_duration(text: &str, allow_negative: bool) -> CoreResult<i64> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(0);
    }
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) if allow_negative => (true, rest),
        Some(_) => return Err(CoreError::parse("duration", text)),
        None => (false, text),
    };
    let (digits, scale) = match body.as_bytes().last() {
        Some(b's') => (&body[..body.len() - 1], 1),
        Some(b'm') => (&body[..body.len() - 1], 60),
        Some(b'h') => (&body[..body.len() - 1], 3600),
        Some(b'd') => (&body[..body.len() - 1], 86400),
        _ => (body, 1),
    };
    let value: i64 = digits
        .parse()
        .map_err(|_| CoreError::parse("duration", text))?;
    let seconds = value * scale;
    Ok(if negative { -seconds } else { seconds })
}

/// Formats a number of seconds as the shortest exact duration literal.
pub fn format_duration(seconds: i64) -> String {
    let magnitude = seconds.abs();
    let (value, suffix) = if magnitude != 0 && magnitude % 86400 == 0 {
        (seconds / 86400, "d")
    } else if magnitude != 0 && magnitude % 3600 == 0 {
        (seconds / 3600, "h")
    } else if magnitude != 0 && magnitude % 60 == 0 {
        (seconds / 60, "m")
    } else {
        (seconds, "")
    };
    format!("{value}{suffix}")
}
