//! One-stop translation of LINQ query trees

use log::debug;
use odata_linq_ast::ExprRef;
use odata_linq_diagnostics::Result;
use odata_linq_eval::{EvaluationSettings, ODataUriEvaluator, QueryEvaluator};
use odata_linq_model::{EntityModelSchema, QueryDataSet};
use odata_linq_semantic::QueryResolver;
use odata_linq_types::QueryValue;
use odata_linq_uri::{
    DefaultLiteralConverter, ExpressionToStringConverter, LiteralConverter, QueryBasedODataUri,
    UriBuilderSettings, UriQueryVisitor,
};

/// Resolves queries against a schema, turns them into URIs and predicts
/// their results over an in-memory data set
///
/// ```
/// use odata_linq::{QueryTranslator, QueryBuilder, constant, lambda, root};
/// use odata_linq::model::EntityModelSchema;
/// use odata_linq::types::{EntityType, PrimitiveType, StructuralProperty};
///
/// let schema = EntityModelSchema::builder()
///     .entity_type(
///         EntityType::new("NS", "Customer")
///             .with_key(["Id"])
///             .with_property(StructuralProperty::primitive("Id", PrimitiveType::Int32)),
///     )
///     .entity_set("Customers", "NS.Customer")
///     .build()?;
/// let translator = QueryTranslator::new(&schema);
/// let query = root("Customers").filter(lambda("c", |c| c.prop("Id").equal(&constant(2))));
/// assert_eq!(translator.uri_string(&query)?, "Customers?$filter=Id eq 2");
/// # Ok::<(), odata_linq::QueryError>(())
/// ```
#[derive(Clone)]
pub struct QueryTranslator<'a> {
    schema: &'a EntityModelSchema,
    literals: &'a dyn LiteralConverter,
    uri_settings: UriBuilderSettings,
    evaluation: EvaluationSettings,
}

impl std::fmt::Debug for QueryTranslator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryTranslator")
            .field("uri_settings", &self.uri_settings)
            .field("evaluation", &self.evaluation)
            .finish_non_exhaustive()
    }
}

impl<'a> QueryTranslator<'a> {
    /// Translator with the default literal forms and settings
    pub fn new(schema: &'a EntityModelSchema) -> Self {
        Self {
            schema,
            literals: &DefaultLiteralConverter,
            uri_settings: UriBuilderSettings::default(),
            evaluation: EvaluationSettings::default(),
        }
    }

    pub fn with_literal_converter(mut self, literals: &'a dyn LiteralConverter) -> Self {
        self.literals = literals;
        self
    }

    pub fn with_uri_settings(mut self, settings: UriBuilderSettings) -> Self {
        self.uri_settings = settings;
        self
    }

    pub fn with_evaluation_settings(mut self, settings: EvaluationSettings) -> Self {
        self.evaluation = settings;
        self
    }

    pub fn schema(&self) -> &EntityModelSchema {
        self.schema
    }

    /// Name parameters, inline function bodies and assign types
    pub fn resolve(&self, query: &ExprRef) -> Result<ExprRef> {
        QueryResolver::new(self.schema)
            .with_max_depth(self.evaluation.max_depth)
            .resolve(query)
    }

    /// Resolve a query and compute the URI that expresses it
    pub fn compute_uri(&self, query: &ExprRef) -> Result<QueryBasedODataUri> {
        let resolved = self.resolve(query)?;
        let converter = ExpressionToStringConverter::new(self.literals).with_settings(&self.uri_settings);
        UriQueryVisitor::new(converter).compute_uri(&resolved)
    }

    /// The relative URI text of a query
    pub fn uri_string(&self, query: &ExprRef) -> Result<String> {
        Ok(self.compute_uri(query)?.render(&self.uri_settings))
    }

    /// Evaluate a query directly over the data set
    pub fn evaluate(&self, query: &ExprRef, data: &QueryDataSet) -> Result<QueryValue> {
        let resolved = self.resolve(query)?;
        QueryEvaluator::new(self.schema, data)
            .with_max_depth(self.evaluation.max_depth)
            .evaluate(&resolved)
    }

    /// Predict what the service answers for the URI of a query: the query
    /// is translated first, then the URI is evaluated with server paging
    /// and `$select`/`$expand` masking
    pub fn predict(&self, query: &ExprRef, data: &QueryDataSet) -> Result<QueryValue> {
        let uri = self.compute_uri(query)?;
        debug!("Predicting response for {}", uri.render(&self.uri_settings));
        ODataUriEvaluator::new(self.schema, data)
            .with_settings(self.evaluation.clone())
            .evaluate_with_settings(&uri)
    }
}
