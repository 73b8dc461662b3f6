//! `${name}` placeholders in request paths, bodies and headers.
//!
//! Templates are parsed when the scenario is built, so a malformed
//! placeholder is a construction error, while a missing binding is only
//! discovered when a virtual user renders the template against its session.
//! A placeholder may carry a fallback, `${name:-fallback}`, used when the
//! session has no binding for `name`.
use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::{error::StepError, session::Session};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unterminated placeholder at byte {position} of `{template}`")]
    Unterminated { template: String, position: usize },
    #[error("empty placeholder name at byte {position} of `{template}`")]
    EmptyName { template: String, position: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Variable {
        name: String,
        fallback: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut parts = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find("${") {
            if start > 0 {
                parts.push(Part::Literal(rest[..start].to_owned()));
            }
            let position = offset + start;
            let body = &rest[start + 2..];
            let Some(end) = body.find('}') else {
                return Err(TemplateError::Unterminated {
                    template: source.to_owned(),
                    position,
                });
            };

            let (name, fallback) = match body[..end].split_once(":-") {
                Some((name, fallback)) => (name.trim(), Some(fallback.to_owned())),
                None => (body[..end].trim(), None),
            };
            if name.is_empty() {
                return Err(TemplateError::EmptyName {
                    template: source.to_owned(),
                    position,
                });
            }
            parts.push(Part::Variable {
                name: name.to_owned(),
                fallback,
            });

            let consumed = start + 2 + end + 1;
            rest = &rest[consumed..];
            offset += consumed;
        }
        if !rest.is_empty() {
            parts.push(Part::Literal(rest.to_owned()));
        }

        Ok(Self {
            source: source.to_owned(),
            parts,
        })
    }

    /// Substitute every placeholder from `session`.
    ///
    /// Fails with [`StepError::UnresolvedVariable`] on the first placeholder
    /// that has neither a binding nor a fallback.
    pub fn render(&self, session: &Session) -> Result<String, StepError> {
        let mut out = String::with_capacity(self.source.len());
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Variable { name, fallback } => match (session.get(name), fallback) {
                    (Some(value), _) => out.push_str(&value.to_string()),
                    (None, Some(fallback)) => out.push_str(fallback),
                    (None, None) => return Err(StepError::UnresolvedVariable(name.clone())),
                },
            }
        }
        Ok(out)
    }

    /// Names referenced by placeholders, in order of appearance.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|part| match part {
            Part::Variable { name, .. } => Some(name.as_str()),
            Part::Literal(_) => None,
        })
    }

    pub fn is_static(&self) -> bool {
        self.variables().next().is_none()
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl FromStr for Template {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Template::parse(s)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn session() -> Session {
        let mut s = Session::new(0);
        s.set("customerId", "c-1");
        s.set("quantity", 3_i64);
        s
    }

    #[test]
    fn renders_placeholders_in_paths_and_bodies() {
        let t = Template::parse("/api/cart/${customerId}/checkout").unwrap();
        assert_eq!(t.render(&session()).unwrap(), "/api/cart/c-1/checkout");

        let t = Template::parse(r#"{"customerId": "${customerId}", "quantity": ${quantity}}"#)
            .unwrap();
        assert_eq!(
            t.render(&session()).unwrap(),
            r#"{"customerId": "c-1", "quantity": 3}"#
        );
    }

    #[test]
    fn fallback_is_used_only_when_unbound() {
        let t = Template::parse("${quantity:-1}/${missing:-none}").unwrap();
        assert_eq!(t.render(&session()).unwrap(), "3/none");
    }

    #[test]
    fn unbound_placeholder_is_an_unresolved_variable() {
        let t = Template::parse("/api/customers/${id}").unwrap();
        let err = t.render(&session()).unwrap_err();
        assert_eq!(err, StepError::UnresolvedVariable("id".to_owned()));
    }

    #[test]
    fn static_templates_and_variable_listing() {
        let t = Template::parse("/api/products/1").unwrap();
        assert!(t.is_static());
        assert_eq!(t.render(&Session::new(0)).unwrap(), "/api/products/1");

        let t = Template::parse("${a}-${b:-x}-${a}").unwrap();
        assert_eq!(t.variables().collect::<Vec<_>>(), vec!["a", "b", "a"]);
    }

    #[test]
    fn structured_values_render_as_json() {
        let mut s = Session::new(0);
        s.set("ids", Value::Array(vec![Value::from(1_i64), Value::from(2_i64)]));
        let t = Template::parse(r#"{"ids": ${ids}}"#).unwrap();
        assert_eq!(t.render(&s).unwrap(), r#"{"ids": [1,2]}"#);
    }

    #[test]
    fn malformed_placeholders() {
        assert_eq!(
            Template::parse("/a/${id").unwrap_err(),
            TemplateError::Unterminated {
                template: "/a/${id".to_owned(),
                position: 3
            }
        );
        assert!(matches!(
            Template::parse("x${ }"),
            Err(TemplateError::EmptyName { position: 1, .. })
        ));
    }
}
