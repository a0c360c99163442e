// Path-tracking accessors over raw JSON objects.

use serde_json::{Map, Value};

use super::{TransformError, TransformErrorKind};
use crate::discovery::canonical_address;

pub(crate) struct Fields<'a> {
    obj: &'a Map<String, Value>,
    path: String,
}

impl<'a> Fields<'a> {
    pub(crate) fn root(value: &'a Value) -> Result<Self, TransformError> {
        Self::at(value, "$".to_owned())
    }

    pub(crate) fn at(value: &'a Value, path: String) -> Result<Self, TransformError> {
        match value {
            Value::Object(obj) => Ok(Self { obj, path }),
            _ => Err(TransformError::new(
                path,
                TransformErrorKind::WrongType { expected: "object" },
            )),
        }
    }

    pub(crate) fn path_of(&self, key: &str) -> String {
        format!("{}.{key}", self.path)
    }

    fn wrong_type(&self, key: &str, expected: &'static str) -> TransformError {
        TransformError::new(self.path_of(key), TransformErrorKind::WrongType { expected })
    }

    /// `null` counts as absent.
    fn get(&self, key: &str) -> Option<&'a Value> {
        self.obj.get(key).filter(|v| !v.is_null())
    }

    /// Required identifier: a non-empty string or an integer.
    pub(crate) fn id(&self, key: &str) -> Result<String, TransformError> {
        match self.get(key) {
            None => Err(TransformError::new(
                self.path_of(key),
                TransformErrorKind::Missing,
            )),
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_owned()),
            Some(Value::String(_)) => Err(TransformError::new(
                self.path_of(key),
                TransformErrorKind::Missing,
            )),
            Some(Value::Number(n)) if n.is_u64() || n.is_i64() => Ok(n.to_string()),
            Some(_) => Err(self.wrong_type(key, "string or integer")),
        }
    }

    /// Required network address. IP literals come back in canonical form,
    /// hostnames trimmed and unchanged.
    pub(crate) fn address(&self, key: &str) -> Result<String, TransformError> {
        let raw = self
            .opt_str(key)?
            .ok_or_else(|| TransformError::new(self.path_of(key), TransformErrorKind::Missing))?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TransformError::new(self.path_of(key), TransformErrorKind::Missing));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(TransformError::new(
                self.path_of(key),
                TransformErrorKind::Malformed(format!("{raw:?} contains whitespace")),
            ));
        }
        Ok(canonical_address(trimmed).unwrap_or_else(|_| trimmed.to_owned()))
    }

    pub(crate) fn opt_str(&self, key: &str) -> Result<Option<String>, TransformError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(self.wrong_type(key, "string")),
        }
    }

    /// A number, or a string holding one (`"518.200"`).
    pub(crate) fn opt_f64(&self, key: &str) -> Result<Option<f64>, TransformError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.wrong_type(key, "number")),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| self.wrong_type(key, "number")),
            Some(_) => Err(self.wrong_type(key, "number")),
        }
    }

    pub(crate) fn opt_u64(&self, key: &str) -> Result<Option<u64>, TransformError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| self.wrong_type(key, "unsigned integer")),
            Some(_) => Err(self.wrong_type(key, "unsigned integer")),
        }
    }

    pub(crate) fn opt_object(&self, key: &str) -> Result<Option<Fields<'a>>, TransformError> {
        self.get(key)
            .map(|v| Fields::at(v, self.path_of(key)))
            .transpose()
    }
}

/// Round a 0-100 percentage into a `u8`.
pub(crate) fn percent(value: f64, path: impl FnOnce() -> String) -> Result<u8, TransformError> {
    if !(0.0..=100.0).contains(&value) {
        return Err(TransformError::new(path(), TransformErrorKind::OutOfRange));
    }
    // Range checked above.
    #[allow(clippy::as_conversions, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let rounded = value.round() as u8;
    Ok(rounded)
}

/// Round a dB level into an `i32`.
pub(crate) fn level(value: f64, path: impl FnOnce() -> String) -> Result<i32, TransformError> {
    if !value.is_finite() || value.abs() > 1_000.0 {
        return Err(TransformError::new(path(), TransformErrorKind::OutOfRange));
    }
    #[allow(clippy::as_conversions, clippy::cast_possible_truncation)]
    let rounded = value.round() as i32;
    Ok(rounded)
}
