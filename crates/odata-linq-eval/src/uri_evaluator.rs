//! Evaluation of OData URIs against an in-memory data set
//!
//! A [`QueryBasedODataUri`] is turned back into a query over its path
//! segments and options, which is then resolved and evaluated the same way
//! a LINQ query is. Server behaviour that a URI implies but a query does
//! not spell out is emulated here:
//! - key segments collapse the result to a single resource
//! - paged entity sets are ordered by key and truncated to a page
//! - `$select`/`$expand` hide members of the result

use crate::evaluator::{QueryEvaluator, collapse_singleton};
use crate::masking::{SelectExpandMask, SelectExpandMasker};
use crate::settings::EvaluationSettings;
use log::debug;
use odata_linq_ast::{
    ExprRef, Expression, OrderByExpr, OrderingKey, QueryBuilder, constant, lambda, root,
    service_operation,
};
use odata_linq_diagnostics::{ODL0105, ODL0107, QueryError, Result};
use odata_linq_model::{EntityModelSchema, QueryDataSet};
use odata_linq_semantic::QueryResolver;
use odata_linq_types::{QueryType, QueryValue};
use odata_linq_uri::{KeyValue, ODataUriSegment, QueryBasedODataUri};

/// Lambda parameter name used for rebuilt path steps
const ITERATOR: &str = "it";

/// Evaluates URIs the way an OData server would answer them
#[derive(Debug, Clone)]
pub struct ODataUriEvaluator<'a> {
    schema: &'a EntityModelSchema,
    data: &'a QueryDataSet,
    settings: EvaluationSettings,
}

/// Query rebuilt from a URI path
struct PathQuery {
    expr: ExprRef,
    /// Entity set of the current results until a navigation leaves it
    entity_set: Option<String>,
    singleton: bool,
    count: bool,
}

impl<'a> ODataUriEvaluator<'a> {
    pub fn new(schema: &'a EntityModelSchema, data: &'a QueryDataSet) -> Self {
        Self {
            schema,
            data,
            settings: EvaluationSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: EvaluationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &EvaluationSettings {
        &self.settings
    }

    /// Evaluate with the select/expand and paging switches from the settings
    pub fn evaluate_with_settings(&self, uri: &QueryBasedODataUri) -> Result<QueryValue> {
        self.evaluate(uri, self.settings.apply_select_expand, self.settings.apply_paging)
    }

    /// Evaluate a URI
    ///
    /// Structural errors (an invalid segment sequence, unknown members)
    /// are returned as `Err`; data-dependent failures such as a key that
    /// matches twice are carried by the returned value.
    pub fn evaluate(
        &self,
        uri: &QueryBasedODataUri,
        apply_select_expand: bool,
        apply_paging: bool,
    ) -> Result<QueryValue> {
        debug!("Evaluating URI {}", uri.path());
        let mut query = self.path_query(uri)?;

        for filter in &uri.filters {
            match &filter.lambda {
                Some(predicate) => query.expr = query.expr.filter(predicate.clone()),
                None => debug!("Ignoring raw $filter={}", filter.expression),
            }
        }

        if query.count {
            query.expr = query.expr.count();
        } else if !query.singleton {
            let source_type = self.resolve(&query.expr)?.resolved_type()?.clone();
            if source_type.is_entity_collection() {
                query.expr = self.order_and_page(query.expr, uri, &source_type, query.entity_set.as_deref(), apply_paging)?;
            }
        }

        let resolved = self.resolve(&query.expr)?;
        let result_type = resolved.resolved_type()?.clone();
        let mut value = QueryEvaluator::new(self.schema, self.data)
            .with_max_depth(self.settings.max_depth)
            .evaluate(&resolved)?;

        if apply_select_expand && !query.count {
            let mask = SelectExpandMask::new(&uri.select, &uri.expand);
            value = SelectExpandMasker::new(self.data).mask(&value, &mask);
        }

        if query.singleton && !query.count {
            if let QueryValue::Collection(collection) = value {
                if collection.evaluation_error().is_some() || collection.is_null() {
                    let element_type = result_type.element_type().unwrap_or(&result_type);
                    return Ok(match collection.evaluation_error() {
                        Some(error) => QueryValue::error_of(element_type, error.clone()),
                        None => QueryValue::null_of(element_type),
                    });
                }
                return Ok(collapse_singleton(collection.into_elements(), &result_type, "Key"));
            }
        }
        Ok(value)
    }

    /// Rebuild the query addressed by the path segments
    fn path_query(&self, uri: &QueryBasedODataUri) -> Result<PathQuery> {
        let mut segments = uri.segments.iter();
        let mut query = match segments.next() {
            Some(ODataUriSegment::EntitySet(name)) => PathQuery {
                expr: root(name.as_str()),
                entity_set: Some(name.clone()),
                singleton: false,
                count: false,
            },
            Some(ODataUriSegment::ServiceOperation { operation, arguments }) => PathQuery {
                expr: service_operation(
                    operation.clone(),
                    arguments.iter().map(|(_, value)| constant(value.clone())).collect(),
                ),
                entity_set: operation.entity_set.clone(),
                singleton: false,
                count: false,
            },
            Some(other) => {
                return Err(QueryError::contract(
                    ODL0107,
                    format!("A URI path cannot start with segment '{other}'"),
                ));
            }
            None => return Err(QueryError::contract(ODL0107, "The URI has no path segments")),
        };

        for segment in segments {
            match segment {
                ODataUriSegment::Key(values) => {
                    query.expr = query.expr.filter(key_predicate(values));
                    query.singleton = true;
                }
                ODataUriSegment::Navigation(name) => {
                    let current = self.resolve(&query.expr)?.resolved_type()?.clone();
                    let owner = current.element_type().unwrap_or(&current).clone();
                    let navigation = self.schema.navigation(&owner, name).ok_or_else(|| {
                        QueryError::contract(ODL0105, format!("'{owner}' has no navigation property '{name}'"))
                    })?;
                    let step = lambda(ITERATOR, |it| it.prop(name));
                    query.entity_set = None;
                    if navigation.multiplicity.is_many() {
                        query.expr = query.expr.select_many(step);
                        query.singleton = false;
                    } else {
                        query.expr = query.expr.select(step);
                    }
                }
                ODataUriSegment::Property(name) => {
                    query.expr = query.expr.select(lambda(ITERATOR, |it| it.prop(name)));
                }
                ODataUriSegment::EntityType(type_name) => {
                    query.expr = query.expr.of_type(type_name);
                }
                ODataUriSegment::Count => query.count = true,
                ODataUriSegment::Links | ODataUriSegment::Value => {}
                ODataUriSegment::EntitySet(_) | ODataUriSegment::ServiceOperation { .. } => {
                    return Err(QueryError::contract(
                        ODL0107,
                        format!("Segment '{segment}' can only start a URI path"),
                    ));
                }
            }
        }
        Ok(query)
    }

    /// Apply `$orderby`, server paging order, `$skip`, `$top` and the page
    /// size to an entity collection
    fn order_and_page(
        &self,
        source: ExprRef,
        uri: &QueryBasedODataUri,
        source_type: &QueryType,
        entity_set: Option<&str>,
        apply_paging: bool,
    ) -> Result<ExprRef> {
        let element_type = source_type.element_type().and_then(QueryType::as_entity);
        let page_size = if apply_paging {
            entity_set
                .and_then(|set| self.schema.page_size(set))
                .or_else(|| {
                    element_type
                        .and_then(|entity| self.schema.entity_set_for_type(&entity.full_name()))
                        .and_then(|set| set.page_size)
                })
                .or(self.settings.default_page_size)
        } else {
            None
        };
        let paged = page_size.is_some() || uri.skip.is_some() || uri.top.is_some();

        let mut keys: Vec<OrderingKey> = uri
            .order_by
            .iter()
            .filter_map(|clause| {
                clause.selector.as_ref().map(|selector| OrderingKey {
                    selector: selector.clone(),
                    descending: clause.descending,
                })
            })
            .collect();
        if paged {
            if let Some(entity) = element_type {
                keys.extend(entity.sorted_key_names().into_iter().map(|key| OrderingKey {
                    selector: lambda(ITERATOR, |it| it.prop(key)),
                    descending: false,
                }));
            }
        }

        let mut expr = source;
        if !keys.is_empty() {
            expr = Expression::OrderBy(OrderByExpr { source: expr, keys }).into_ref();
        }
        if let Some(skip) = uri.skip {
            expr = expr.skip(clamp_count(skip));
        }
        if let Some(top) = uri.top {
            expr = expr.take(clamp_count(top));
        }
        if let Some(page_size) = page_size {
            debug!("Limiting result to a page of {page_size}");
            expr = expr.take(clamp_count(page_size));
        }
        Ok(expr)
    }

    fn resolve(&self, expr: &ExprRef) -> Result<ExprRef> {
        QueryResolver::new(self.schema)
            .with_max_depth(self.settings.max_depth)
            .resolve(expr)
    }
}

/// `it => it.K1 == v1 && it.K2 == v2 ..`
fn key_predicate(values: &[KeyValue]) -> ExprRef {
    lambda(ITERATOR, |it| {
        values
            .iter()
            .map(|key| it.prop(&key.name).equal(&constant(key.value.clone())))
            .reduce(|all, next| all.and(&next))
            .unwrap_or_else(|| constant(true))
    })
}

fn clamp_count(count: u32) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use odata_linq_types::ScalarValue;

    #[test]
    fn test_clamp_count() {
        assert_eq!(clamp_count(5), 5);
        assert_eq!(clamp_count(u32::MAX), i32::MAX);
    }

    #[test]
    fn test_key_predicate_combines_with_and() {
        let values = vec![
            KeyValue {
                name: "OrderId".into(),
                value: ScalarValue::Int32(1),
                literal: "1".into(),
            },
            KeyValue {
                name: "ProductId".into(),
                value: ScalarValue::Int32(2),
                literal: "2".into(),
            },
        ];
        let predicate = key_predicate(&values);
        let Expression::Lambda(l) = &predicate.expr else {
            panic!("expected a lambda");
        };
        assert!(matches!(&l.body.expr, Expression::Binary(_)));
        assert_eq!(l.parameters, vec!["it".to_string()]);
    }
}
