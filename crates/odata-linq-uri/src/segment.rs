//! URI segments and the query descriptor

use crate::UriBuilderSettings;
use indexmap::IndexMap;
use odata_linq_ast::{BinaryOp, ExprRef, Expression, ServiceOperation};
use odata_linq_types::ScalarValue;
use std::fmt;
use std::sync::Arc;

/// One named key value of a key segment
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub name: String,
    pub value: ScalarValue,
    /// Rendered, escaped literal
    pub literal: String,
}

/// A path segment, in URI order
#[derive(Debug, Clone, PartialEq)]
pub enum ODataUriSegment {
    EntitySet(String),
    Key(Vec<KeyValue>),
    Navigation(String),
    Property(String),
    /// Type cast to a qualified type name
    EntityType(String),
    ServiceOperation {
        operation: Arc<ServiceOperation>,
        arguments: Vec<(String, ScalarValue)>,
    },
    Count,
    Links,
    Value,
}

impl ODataUriSegment {
    /// Check whether the segment addresses a single resource
    pub fn is_singleton(&self) -> bool {
        matches!(self, Self::Key(_))
    }
}

impl fmt::Display for ODataUriSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EntitySet(name)
            | Self::Navigation(name)
            | Self::Property(name)
            | Self::EntityType(name) => f.write_str(name),
            Self::Key(values) => match values.as_slice() {
                [single] => write!(f, "({})", single.literal),
                values => {
                    let parts: Vec<String> = values
                        .iter()
                        .map(|v| format!("{}={}", v.name, v.literal))
                        .collect();
                    write!(f, "({})", parts.join(","))
                }
            },
            Self::ServiceOperation { operation, .. } => f.write_str(&operation.name),
            Self::Count => f.write_str("$count"),
            Self::Links => f.write_str("$links"),
            Self::Value => f.write_str("$value"),
        }
    }
}

/// A `$filter` clause
#[derive(Debug, Clone, PartialEq)]
pub struct FilterClause {
    pub expression: String,
    /// Predicate lambda; `None` for raw `$filter` query options
    pub lambda: Option<ExprRef>,
}

impl FilterClause {
    /// Whether the predicate's top operator is `or`
    fn is_disjunction(&self) -> bool {
        let Some(lambda) = &self.lambda else {
            return false;
        };
        match &lambda.expr {
            Expression::Lambda(l) => {
                matches!(&l.body.expr, Expression::Binary(b) if b.op == BinaryOp::Or)
            }
            _ => false,
        }
    }
}

/// An `$orderby` key
#[derive(Debug, Clone, PartialEq)]
pub struct OrderingClause {
    pub expression: String,
    /// Key selector lambda; `None` for raw `$orderby` query options
    pub selector: Option<ExprRef>,
    pub descending: bool,
}

impl fmt::Display for OrderingClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "{} desc", self.expression)
        } else {
            f.write_str(&self.expression)
        }
    }
}

/// Everything a query contributes to its URI
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryBasedODataUri {
    pub segments: Vec<ODataUriSegment>,
    pub filters: Vec<FilterClause>,
    pub order_by: Vec<OrderingClause>,
    pub select: Vec<String>,
    pub expand: Vec<String>,
    pub skip: Option<u32>,
    pub top: Option<u32>,
    pub inline_count: bool,
    /// `$inlinecount` value given with the query, instead of the settings
    /// keyword
    pub inline_count_keyword: Option<String>,
    /// Custom options, in first insertion order
    pub custom_options: IndexMap<String, String>,
}

impl QueryBasedODataUri {
    /// Check whether the path ends in a single resource
    pub fn is_singleton(&self) -> bool {
        self.segments.last().is_some_and(ODataUriSegment::is_singleton)
    }

    pub fn entity_set(&self) -> Option<&str> {
        self.segments.iter().find_map(|s| match s {
            ODataUriSegment::EntitySet(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Path part of the URI
    pub fn path(&self) -> String {
        let mut path = String::new();
        for segment in &self.segments {
            if !path.is_empty() && !matches!(segment, ODataUriSegment::Key(_)) {
                path.push('/');
            }
            path.push_str(&segment.to_string());
        }
        path
    }

    /// Query options in emission order
    pub fn options(&self, settings: &UriBuilderSettings) -> Vec<(String, String)> {
        let mut options = Vec::new();
        if !self.filters.is_empty() {
            let grouped = self.filters.len() > 1;
            let clauses: Vec<String> = self
                .filters
                .iter()
                .map(|clause| {
                    if grouped && clause.is_disjunction() {
                        format!("({})", clause.expression)
                    } else {
                        clause.expression.clone()
                    }
                })
                .collect();
            options.push(("$filter".to_string(), clauses.join(" and ")));
        }
        if self.inline_count {
            let keyword = self
                .inline_count_keyword
                .as_ref()
                .unwrap_or(&settings.inline_count_keyword);
            options.push(("$inlinecount".to_string(), keyword.clone()));
        }
        if !self.select.is_empty() {
            options.push(("$select".to_string(), self.select.join(",")));
        }
        if !self.expand.is_empty() {
            options.push(("$expand".to_string(), self.expand.join(",")));
        }
        if let Some(top) = self.top {
            options.push(("$top".to_string(), top.to_string()));
        }
        if let Some(skip) = self.skip {
            options.push(("$skip".to_string(), skip.to_string()));
        }
        if !self.order_by.is_empty() {
            let keys: Vec<String> = self.order_by.iter().map(ToString::to_string).collect();
            options.push(("$orderby".to_string(), keys.join(",")));
        }
        options.extend(
            self.custom_options
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );
        options
    }

    /// Render the relative URI
    pub fn render(&self, settings: &UriBuilderSettings) -> String {
        let path = self.path();
        let options = self.options(settings);
        if options.is_empty() {
            return path;
        }
        let query: Vec<String> = options
            .into_iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        format!("{path}?{}", query.join("&"))
    }
}

impl fmt::Display for QueryBasedODataUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(&UriBuilderSettings::default()))
    }
}
