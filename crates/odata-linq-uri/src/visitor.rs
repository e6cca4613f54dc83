//! URI segment visitor
//!
//! Walks a resolved query tree source-first and collects its path
//! segments and query options into a [`QueryBasedODataUri`]. All state of
//! one traversal lives in an accumulator created per call.

use crate::{
    ExpressionToStringConverter, FilterClause, KeyValue, ODataUriSegment, OrderingClause,
    QueryBasedODataUri,
};
use log::{debug, trace};
use odata_linq_ast::{
    AddQueryOptionExpr, AggregateExpr, ExprRef, Expression, KeyExpr, OrderByExpr, PagingExpr,
    ServiceOperationExpr,
};
use odata_linq_diagnostics::{ODL0001, ODL0004, ODL0005, ODL0006, ODL0106, QueryError, Result};
use odata_linq_types::ScalarValue;

/// Per-call traversal state
#[derive(Default)]
struct UriAccumulator {
    uri: QueryBasedODataUri,
    /// Raw `Expand` arguments, parsed when the traversal is done
    raw_expand: Vec<String>,
}

impl UriAccumulator {
    fn push(&mut self, segment: ODataUriSegment) {
        trace!("Pushing URI segment {segment}");
        self.uri.segments.push(segment);
    }

    fn set_top(&mut self, top: u32) {
        self.uri.top.get_or_insert(top);
    }

    fn set_skip(&mut self, skip: u32) {
        self.uri.skip.get_or_insert(skip);
    }

    fn add_expand(&mut self, path: &str) {
        if !self.uri.expand.iter().any(|p| p == path) {
            self.uri.expand.push(path.to_string());
        }
    }

    fn finish(mut self) -> QueryBasedODataUri {
        let raw = std::mem::take(&mut self.raw_expand);
        for path in raw.iter().flat_map(|r| r.split(',')).map(str::trim) {
            if !path.is_empty() {
                self.add_expand(path);
            }
        }
        self.uri
    }
}

/// Translates resolved query trees into OData URIs
#[derive(Debug, Clone, Copy)]
pub struct UriQueryVisitor<'a> {
    converter: ExpressionToStringConverter<'a>,
}

impl<'a> UriQueryVisitor<'a> {
    pub fn new(converter: ExpressionToStringConverter<'a>) -> Self {
        Self { converter }
    }

    /// Compute the URI descriptor of a resolved query
    pub fn compute_uri(&self, expr: &ExprRef) -> Result<QueryBasedODataUri> {
        let mut acc = UriAccumulator::default();
        self.visit(&mut acc, expr)?;
        let uri = acc.finish();
        debug!("Computed URI {uri}");
        Ok(uri)
    }

    fn visit(&self, acc: &mut UriAccumulator, expr: &ExprRef) -> Result<()> {
        match &expr.expr {
            // === Path ===
            Expression::Root(r) => acc.push(ODataUriSegment::EntitySet(r.entity_set.clone())),
            Expression::ServiceOperation(op) => self.service_operation(acc, op)?,
            Expression::Key(k) => self.key(acc, k)?,
            Expression::Property(p) => {
                self.visit(acc, &p.instance)?;
                let segment = if is_navigation(expr)? {
                    ODataUriSegment::Navigation(p.name.clone())
                } else {
                    ODataUriSegment::Property(p.name.clone())
                };
                acc.push(segment);
            }
            Expression::Links(s) => match &s.source.expr {
                Expression::Property(p) if is_navigation(&s.source)? => {
                    self.visit(acc, &p.instance)?;
                    acc.push(ODataUriSegment::Links);
                    acc.push(ODataUriSegment::Navigation(p.name.clone()));
                }
                _ => {
                    return Err(QueryError::not_supported(
                        ODL0001,
                        "Links can only be requested for a navigation property",
                    ));
                }
            },
            Expression::Value(s) => {
                self.visit(acc, &s.source)?;
                acc.push(ODataUriSegment::Value);
            }
            Expression::OfType(t) | Expression::As(t) => {
                self.visit(acc, &t.source)?;
                acc.push(ODataUriSegment::EntityType(t.type_name.clone()));
            }
            Expression::Count(a) | Expression::LongCount(a) if a.lambda.is_none() => {
                self.visit(acc, &a.source)?;
                acc.push(ODataUriSegment::Count);
            }

            // === Options ===
            Expression::Where(w) => {
                self.visit(acc, &w.source)?;
                self.add_filter(acc, &w.lambda)?;
            }
            Expression::OrderBy(o) => self.order_by(acc, o)?,
            Expression::Skip(p) => {
                self.visit(acc, &p.source)?;
                let skip = paging_count(p, "Skip")?;
                acc.set_skip(skip);
            }
            Expression::Take(p) => {
                self.visit(acc, &p.source)?;
                let top = paging_count(p, "Take")?;
                acc.set_top(top);
            }
            Expression::First(a) | Expression::FirstOrDefault(a) => self.element(acc, a, 1)?,
            Expression::Single(a) | Expression::SingleOrDefault(a) => self.element(acc, a, 2)?,
            Expression::Select(s) => {
                self.visit(acc, &s.source)?;
                self.projection(acc, &s.lambda)?;
            }
            Expression::Expand(e) => {
                self.visit(acc, &e.source)?;
                acc.raw_expand.push(e.expand.clone());
            }
            Expression::InlineCount(s) => {
                self.visit(acc, &s.source)?;
                acc.uri.inline_count = true;
            }
            Expression::AddQueryOption(o) => self.add_query_option(acc, o)?,

            other => {
                return Err(QueryError::not_supported(
                    ODL0001,
                    format!("{} cannot be expressed in an OData URI", other.name()),
                ));
            }
        }
        Ok(())
    }

    fn service_operation(&self, acc: &mut UriAccumulator, op: &ServiceOperationExpr) -> Result<()> {
        let mut arguments = Vec::with_capacity(op.arguments.len());
        for (parameter, argument) in op.operation.parameters.iter().zip(&op.arguments) {
            let value = constant_value(argument).ok_or_else(|| {
                QueryError::not_supported(
                    ODL0006,
                    format!(
                        "Argument '{}' of service operation '{}' must be a constant",
                        parameter.name, op.operation.name
                    ),
                )
            })?;
            let literal = self.converter.literal(&value)?;
            acc.uri.custom_options.insert(parameter.name.clone(), literal);
            arguments.push((parameter.name.clone(), value));
        }
        acc.push(ODataUriSegment::ServiceOperation {
            operation: op.operation.clone(),
            arguments,
        });
        Ok(())
    }

    fn key(&self, acc: &mut UriAccumulator, key: &KeyExpr) -> Result<()> {
        self.visit(acc, &key.source)?;
        let values = key
            .values
            .iter()
            .map(|(name, value)| {
                let value = constant_value(value).ok_or_else(|| {
                    QueryError::not_supported(
                        ODL0005,
                        format!("Key value '{name}' must be a constant"),
                    )
                })?;
                Ok(KeyValue {
                    name: name.clone(),
                    literal: self.converter.literal(&value)?,
                    value,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        acc.push(ODataUriSegment::Key(values));
        Ok(())
    }

    fn add_filter(&self, acc: &mut UriAccumulator, lambda: &ExprRef) -> Result<()> {
        let expression = self.converter.convert(lambda)?;
        trace!("Adding filter {expression}");
        acc.uri.filters.push(FilterClause {
            expression,
            lambda: Some(lambda.clone()),
        });
        Ok(())
    }

    fn order_by(&self, acc: &mut UriAccumulator, order: &OrderByExpr) -> Result<()> {
        self.visit(acc, &order.source)?;
        // A later OrderBy replaces any earlier ordering
        acc.uri.order_by = order
            .keys
            .iter()
            .map(|key| {
                Ok(OrderingClause {
                    expression: self.converter.convert(&key.selector)?,
                    selector: Some(key.selector.clone()),
                    descending: key.descending,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }

    /// First and Single: an optional predicate becomes a filter, the
    /// element count a `$top`
    fn element(&self, acc: &mut UriAccumulator, a: &AggregateExpr, top: u32) -> Result<()> {
        self.visit(acc, &a.source)?;
        if let Some(predicate) = &a.lambda {
            self.add_filter(acc, predicate)?;
        }
        acc.set_top(top);
        Ok(())
    }

    fn projection(&self, acc: &mut UriAccumulator, selector: &ExprRef) -> Result<()> {
        let Expression::Lambda(lambda) = &selector.expr else {
            return Err(QueryError::contract(
                ODL0106,
                format!("Select expects a lambda, found {}", selector.expr.name()),
            ));
        };
        let [parameter] = lambda.parameters.as_slice() else {
            return Err(QueryError::contract(ODL0106, "Select lambda must take one parameter"));
        };
        let projected: Vec<&ExprRef> = match &lambda.body.expr {
            Expression::Parameter(p) if p.name == *parameter => return Ok(()),
            Expression::Record(r) => r.members.iter().map(|(_, value)| value).collect(),
            _ => vec![&lambda.body],
        };
        for member in projected {
            let path = member_path(member, parameter).ok_or_else(|| {
                QueryError::not_supported(
                    ODL0004,
                    "Only member access on the range variable can be projected",
                )
            })?;
            for navigation in navigation_paths(member, parameter)? {
                acc.add_expand(&navigation);
            }
            if !acc.uri.select.contains(&path) {
                acc.uri.select.push(path);
            }
        }
        Ok(())
    }

    fn add_query_option(&self, acc: &mut UriAccumulator, option: &AddQueryOptionExpr) -> Result<()> {
        self.visit(acc, &option.source)?;
        // String constants are taken as option text, other values as literals
        let (value, is_text) = match constant_value(&option.value) {
            Some(ScalarValue::String(s)) => (s, true),
            Some(value) => (self.converter.literal(&value)?, false),
            None => {
                return Err(QueryError::not_supported(
                    ODL0006,
                    format!("Value of query option '{}' must be a constant", option.name),
                ));
            }
        };
        match option.name.as_str() {
            "$filter" => acc.uri.filters.push(FilterClause {
                expression: value,
                lambda: None,
            }),
            "$orderby" => acc.uri.order_by.extend(value.split(',').map(|key| OrderingClause {
                expression: key.trim().to_string(),
                selector: None,
                descending: false,
            })),
            "$select" => acc
                .uri
                .select
                .extend(value.split(',').map(|p| p.trim().to_string())),
            "$expand" => acc.raw_expand.push(value),
            "$top" => acc.set_top(parse_count(&option.name, &value)?),
            "$skip" => acc.set_skip(parse_count(&option.name, &value)?),
            "$inlinecount" => {
                acc.uri.inline_count = true;
                acc.uri.inline_count_keyword = Some(value);
            }
            _ => {
                let value = if is_text { self.converter.escape(&value) } else { value };
                acc.uri.custom_options.insert(option.name.clone(), value);
            }
        }
        Ok(())
    }
}

fn constant_value(expr: &ExprRef) -> Option<ScalarValue> {
    match &expr.expr {
        Expression::Constant(c) => Some(c.value.clone()),
        Expression::Null(_) => Some(ScalarValue::Null),
        _ => None,
    }
}

fn is_navigation(expr: &ExprRef) -> Result<bool> {
    let ty = expr.resolved_type()?;
    Ok(ty.is_entity() || ty.is_entity_collection())
}

/// Paths of every member on the chain of `expr` that lands on an entity
/// or an entity collection, shortest first
fn navigation_paths(expr: &ExprRef, parameter: &str) -> Result<Vec<String>> {
    let mut paths = Vec::new();
    let mut node = expr;
    while let Expression::Property(property) = &node.expr {
        if is_navigation(node)? {
            paths.extend(member_path(node, parameter));
        }
        node = &property.instance;
    }
    paths.reverse();
    Ok(paths)
}

/// `a/b` for `p.a.b` over the lambda parameter `p`
fn member_path(expr: &ExprRef, parameter: &str) -> Option<String> {
    match &expr.expr {
        Expression::Property(p) => match &p.instance.expr {
            Expression::Parameter(param) if param.name == parameter => Some(p.name.clone()),
            _ => member_path(&p.instance, parameter).map(|prefix| format!("{prefix}/{}", p.name)),
        },
        _ => None,
    }
}

fn paging_count(paging: &PagingExpr, operator: &str) -> Result<u32> {
    constant_value(&paging.count)
        .and_then(|v| v.as_i64())
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| {
            QueryError::not_supported(
                ODL0006,
                format!("{operator} count must be a non-negative constant"),
            )
        })
}

fn parse_count(name: &str, value: &str) -> Result<u32> {
    value.trim().parse().map_err(|_| {
        QueryError::not_supported(
            ODL0006,
            format!("Query option '{name}' expects a non-negative integer, got '{value}'"),
        )
    })
}
