//! Response checks.
//!
//! [`evaluate`] is a pure function of a response and a [`Check`]. It never
//! panics on malformed bodies or missing fields; those become a
//! [`CheckError`], which the virtual user records as a failed request.
use std::{cell::OnceCell, fmt};

use thiserror::Error;

use crate::{
    path::{FieldPath, PathError},
    transport::Response,
    value::Value,
};

#[derive(Debug, Clone, PartialEq)]
pub enum CheckSpec {
    StatusEquals(u16),
    FieldExists(FieldPath),
    FieldEquals { path: FieldPath, expected: Value },
}

/// A predicate over a response, optionally saving what it inspected.
#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub spec: CheckSpec,
    pub save_as: Option<String>,
}

impl Check {
    pub fn status(code: u16) -> Self {
        CheckSpec::StatusEquals(code).into()
    }

    pub fn field_exists(path: &str) -> Result<Self, PathError> {
        Ok(CheckSpec::FieldExists(FieldPath::parse(path)?).into())
    }

    pub fn field_equals(path: &str, expected: impl Into<Value>) -> Result<Self, PathError> {
        Ok(CheckSpec::FieldEquals {
            path: FieldPath::parse(path)?,
            expected: expected.into(),
        }
        .into())
    }

    /// Bind the extracted value to `name` in the session when the check passes.
    pub fn save_as(mut self, name: impl Into<String>) -> Self {
        self.save_as = Some(name.into());
        self
    }

    pub fn is_status_check(&self) -> bool {
        matches!(self.spec, CheckSpec::StatusEquals(_))
    }
}

impl From<CheckSpec> for Check {
    fn from(spec: CheckSpec) -> Self {
        Self {
            spec,
            save_as: None,
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.spec {
            CheckSpec::StatusEquals(code) => write!(f, "status == {code}")?,
            CheckSpec::FieldExists(path) => write!(f, "{path} exists")?,
            CheckSpec::FieldEquals { path, expected } => write!(f, "{path} == {expected}")?,
        }
        if let Some(name) = &self.save_as {
            write!(f, " -> {name}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CheckError {
    #[error("expected status {expected}, got {actual}")]
    StatusMismatch { expected: u16, actual: u16 },
    #[error("field `{0}` not found in response body")]
    FieldNotFound(String),
    #[error("field `{path}` is {actual}, expected {expected}")]
    FieldMismatch {
        path: String,
        expected: Value,
        actual: Value,
    },
    #[error("response body is not valid JSON: {0}")]
    InvalidBody(String),
}

/// A response seen by the checks of one step.
///
/// The body is parsed at most once, on the first field check that needs it.
pub struct ResponseView<'r> {
    response: &'r Response,
    body: OnceCell<Result<Value, String>>,
}

impl<'r> ResponseView<'r> {
    pub fn new(response: &'r Response) -> Self {
        Self {
            response,
            body: OnceCell::new(),
        }
    }

    pub fn status(&self) -> u16 {
        self.response.status
    }

    pub fn body(&self) -> Result<&Value, CheckError> {
        self.body
            .get_or_init(|| Value::parse_json(&self.response.body).map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|e| CheckError::InvalidBody(e.clone()))
    }

    fn field(&self, path: &FieldPath) -> Result<&Value, CheckError> {
        path.resolve(self.body()?)
            .ok_or_else(|| CheckError::FieldNotFound(path.to_string()))
    }
}

/// Run one check against a response.
///
/// On success returns the value the check inspected: the status code for
/// status checks, the resolved field otherwise. That value is what `save_as`
/// binds.
pub fn evaluate(response: &ResponseView<'_>, check: &Check) -> Result<Value, CheckError> {
    match &check.spec {
        CheckSpec::StatusEquals(expected) => {
            let actual = response.status();
            if actual == *expected {
                Ok(Value::from(actual))
            } else {
                Err(CheckError::StatusMismatch {
                    expected: *expected,
                    actual,
                })
            }
        }
        CheckSpec::FieldExists(path) => response.field(path).cloned(),
        CheckSpec::FieldEquals { path, expected } => {
            let actual = response.field(path)?;
            if actual.loosely_eq(expected) {
                Ok(actual.clone())
            } else {
                Err(CheckError::FieldMismatch {
                    path: path.to_string(),
                    expected: expected.clone(),
                    actual: actual.clone(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn response(status: u16, body: &str) -> Response {
        Response {
            status,
            body: body.to_owned(),
            latency: Duration::from_millis(10),
        }
    }

    #[test]
    fn status_check_extracts_the_code() {
        let r = response(201, "");
        let view = ResponseView::new(&r);
        assert_eq!(evaluate(&view, &Check::status(201)), Ok(Value::from(201_u16)));
        assert_eq!(
            evaluate(&view, &Check::status(200)),
            Err(CheckError::StatusMismatch {
                expected: 200,
                actual: 201
            })
        );
    }

    #[test]
    fn field_exists_extracts_the_field() {
        let r = response(200, r#"{"id": "42", "items": [{"sku": "A"}]}"#);
        let view = ResponseView::new(&r);

        let check = Check::field_exists("$.id").unwrap().save_as("id");
        assert_eq!(evaluate(&view, &check), Ok(Value::from("42")));
        assert_eq!(check.save_as.as_deref(), Some("id"));

        let check = Check::field_exists("$.items[0].sku").unwrap();
        assert_eq!(evaluate(&view, &check), Ok(Value::from("A")));
    }

    #[test]
    fn missing_field_is_a_check_failure() {
        let r = response(200, r#"{"id": "42"}"#);
        let view = ResponseView::new(&r);
        let check = Check::field_exists("$.customer.email").unwrap();
        assert_eq!(
            evaluate(&view, &check),
            Err(CheckError::FieldNotFound("$.customer.email".to_owned()))
        );
    }

    #[test]
    fn field_equals_compares_loosely() {
        let r = response(200, r#"{"count": 1, "status": "ok"}"#);
        let view = ResponseView::new(&r);

        assert!(evaluate(&view, &Check::field_equals("$.count", "1").unwrap()).is_ok());
        assert!(evaluate(&view, &Check::field_equals("$.status", "ok").unwrap()).is_ok());
        assert!(matches!(
            evaluate(&view, &Check::field_equals("$.status", "error").unwrap()),
            Err(CheckError::FieldMismatch { .. })
        ));
    }

    #[test]
    fn non_json_body_fails_field_checks_but_not_status_checks() {
        let r = response(200, "<html>oops</html>");
        let view = ResponseView::new(&r);
        assert!(matches!(
            evaluate(&view, &Check::field_exists("$.id").unwrap()),
            Err(CheckError::InvalidBody(_))
        ));
        assert!(evaluate(&view, &Check::status(200)).is_ok());
    }

    #[test]
    fn display() {
        let check = Check::field_exists("$.id").unwrap().save_as("id");
        assert_eq!(check.to_string(), "$.id exists -> id");
        assert_eq!(Check::status(200).to_string(), "status == 200");
    }
}
