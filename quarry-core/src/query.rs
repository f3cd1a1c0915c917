//! Query construction and filtering API for document stores.
//!
//! This module provides type-safe query construction with filtering, sorting, pagination,
//! projection, and a visitor pattern for query execution across different backends.
//!
//! # Query Building
//!
//! Queries can be constructed using the fluent builder API:
//!
//! ```ignore
//! use quarry::query::{Query, Filter, SortDirection};
//!
//! let query = Query::builder()
//!     .filter(Filter::eq("name", "Alice"))
//!     .limit(10)
//!     .offset(0)
//!     .sort("created_at", SortDirection::Desc)
//!     .build();
//! ```
//!
//! # MongoDB filter documents
//!
//! The public collection API accepts MongoDB filter documents. [`Filter::parse`] turns
//! one into an [`Expr`] tree:
//!
//! ```ignore
//! use bson::doc;
//!
//! let expr = Filter::parse(&doc! { "status": "A", "qty": { "$lt": 30 } })?;
//! ```
//!
//! Supported operators: `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`,
//! `$exists`, `$not`, and the logical `$and`, `$or`, `$nor`. Field names may be
//! dotted paths into embedded documents.

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

/// Sort specification for query results.
///
/// Specifies which field to sort by and in which direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    /// The field name (or dotted path) to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    /// Equal to. An array field also matches when one of its elements is equal.
    Eq,
    /// Not equal to.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// Field equals any of the values in the operand array.
    In,
    /// Field equals none of the values in the operand array.
    Nin,
}

/// A filter expression for querying documents.
///
/// Expressions can be combined using logical operators (`And`, `Or`, `Not`)
/// to build complex filter predicates. An empty `And` matches every document.
///
/// # Example
///
/// ```ignore
/// use quarry::query::{Expr, Filter, FieldOp};
///
/// // Simple equality check
/// let expr1 = Filter::eq("status", "active");
///
/// // Complex nested expression
/// let expr2 = Filter::and(vec![
///     Filter::eq("status", "active"),
///     Filter::gt("age", 18)
/// ]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Logical NOT of an expression (inverts the result).
    Not(Box<Expr>),
    /// Checks if a field exists or doesn't exist.
    Exists(String, bool),
    /// Field comparison expression.
    Field {
        /// The field name to compare.
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The value to compare against.
        value: Bson,
    },
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: String, op: FieldOp, value: Bson) -> Self {
        Expr::Field { field, op, value }
    }

    /// An expression that matches every document.
    pub fn all() -> Self {
        Expr::And(Vec::new())
    }

    /// Combines this expression with another using logical AND.
    ///
    /// If this expression is already an AND, the other expression is appended
    /// to the list. Otherwise, a new AND expression is created.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    ///
    /// If this expression is already an OR, the other expression is appended
    /// to the list. Otherwise, a new OR expression is created.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Negates this expression (logical NOT).
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// Collects the top-level `field == value` pairs this expression pins down.
    ///
    /// Used to seed upserted documents: `{status: "A", qty: {$gt: 1}}` yields only
    /// `status: "A"`. Dotted paths and operators other than equality are ignored.
    pub fn equality_fields(&self) -> Document {
        let mut fields = Document::new();

        match self {
            Expr::Field { field, op: FieldOp::Eq, value } if !field.contains('.') => {
                fields.insert(field.clone(), value.clone());
            }
            Expr::And(exprs) => {
                for expr in exprs {
                    for (key, value) in expr.equality_fields() {
                        fields.insert(key, value);
                    }
                }
            }
            _ => {}
        }

        fields
    }
}

/// A structured query for retrieving and filtering documents.
///
/// This struct encapsulates filters, limits, offsets, sort specifications and an
/// optional projection. Use [`QueryBuilder`] for ergonomic construction.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Optional filter expression to match documents.
    pub filter: Option<Expr>,
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
    /// Number of documents to skip (for pagination).
    pub offset: Option<usize>,
    /// Sort keys, most significant first.
    pub sort: Vec<Sort>,
    /// MongoDB-style projection document (`{field: 1}` or `{field: 0}`).
    pub projection: Option<Document>,
}

impl Query {
    /// Creates a new empty query with no filters or limits.
    pub fn new() -> Self {
        Query::default()
    }

    /// Creates a new query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// Creates a query from a MongoDB filter document.
    pub fn from_filter(filter: &Document) -> StoreResult<Self> {
        Ok(Query::builder().filter(Filter::parse(filter)?).build())
    }
}

/// Helper struct for constructing filter expressions.
///
/// Provides static methods to construct common filter expressions in a type-safe manner.
/// All methods accept field names and values as `Into<String>` and `Into<Bson>` for ergonomics.
pub struct Filter;

impl Filter {
    /// Matches documents where the field equals the specified value.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    /// Matches documents where the field does not equal the specified value.
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    /// Matches documents where the field is greater than the specified value.
    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    /// Matches documents where the field is greater than or equal to the specified value.
    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    /// Matches documents where the field is less than the specified value.
    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    /// Matches documents where the field is less than or equal to the specified value.
    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    /// Matches documents where the field equals any of the given values.
    pub fn any_of(field: impl Into<String>, values: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::In, values.into())
    }

    /// Matches documents where the field equals none of the given values.
    pub fn none_of(field: impl Into<String>, values: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Nin, values.into())
    }

    /// Matches documents where the field exists.
    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    /// Matches documents where the field does not exist.
    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    /// Combines multiple expressions such that all must match for a document to be included.
    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    /// Combines multiple expressions such that any can match for a document to be included.
    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    /// Parses a MongoDB filter document into an expression tree.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidFilter`] for unknown operators or malformed operands.
    pub fn parse(filter: &Document) -> StoreResult<Expr> {
        let mut exprs = Vec::with_capacity(filter.len());

        for (key, value) in filter {
            match key.as_str() {
                "$and" => exprs.push(Expr::And(Self::parse_clauses(key, value)?)),
                "$or" => exprs.push(Expr::Or(Self::parse_clauses(key, value)?)),
                "$nor" => exprs.push(Expr::Or(Self::parse_clauses(key, value)?).not()),
                op if op.starts_with('$') => {
                    return Err(StoreError::InvalidFilter(format!("unknown top-level operator {op}")));
                }
                field => exprs.push(Self::parse_field(field, value)?),
            }
        }

        Ok(match exprs.len() {
            1 => exprs.remove(0),
            _ => Expr::And(exprs),
        })
    }

    fn parse_clauses(op: &str, value: &Bson) -> StoreResult<Vec<Expr>> {
        let Bson::Array(clauses) = value else {
            return Err(StoreError::InvalidFilter(format!("{op} requires an array")));
        };

        clauses
            .iter()
            .map(|clause| match clause {
                Bson::Document(document) => Self::parse(document),
                _ => Err(StoreError::InvalidFilter(format!("{op} clauses must be documents"))),
            })
            .collect()
    }

    fn parse_field(field: &str, value: &Bson) -> StoreResult<Expr> {
        let operators = match value {
            Bson::Document(document) if Self::is_operator_document(document) => document,
            _ => return Ok(Filter::eq(field, value.clone())),
        };

        let mut exprs = Vec::with_capacity(operators.len());

        for (op, operand) in operators {
            exprs.push(match op.as_str() {
                "$eq" => Filter::eq(field, operand.clone()),
                "$ne" => Filter::ne(field, operand.clone()),
                "$gt" => Filter::gt(field, operand.clone()),
                "$gte" => Filter::gte(field, operand.clone()),
                "$lt" => Filter::lt(field, operand.clone()),
                "$lte" => Filter::lte(field, operand.clone()),
                "$in" | "$nin" => {
                    if !matches!(operand, Bson::Array(_)) {
                        return Err(StoreError::InvalidFilter(format!("{op} requires an array")));
                    }
                    match op.as_str() {
                        "$in" => Filter::any_of(field, operand.clone()),
                        _ => Filter::none_of(field, operand.clone()),
                    }
                }
                "$exists" => Expr::Exists(field.to_string(), Self::truthy(operand)),
                "$not" => match operand {
                    Bson::Document(_) => Self::parse_field(field, operand)?.not(),
                    _ => return Err(StoreError::InvalidFilter("$not requires an operator document".into())),
                },
                other => return Err(StoreError::InvalidFilter(format!("unknown operator {other}"))),
            });
        }

        Ok(match exprs.len() {
            1 => exprs.remove(0),
            _ => Expr::And(exprs),
        })
    }

    fn is_operator_document(document: &Document) -> bool {
        document
            .keys()
            .next()
            .is_some_and(|key| key.starts_with('$'))
    }

    fn truthy(value: &Bson) -> bool {
        match value {
            Bson::Boolean(b) => *b,
            Bson::Int32(n) => *n != 0,
            Bson::Int64(n) => *n != 0,
            Bson::Double(n) => *n != 0.0,
            Bson::Null | Bson::Undefined => false,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Creates a new query builder.
    pub fn new() -> Self {
        QueryBuilder { query: Query::default() }
    }

    /// Sets the filter expression for this query.
    pub fn filter(mut self, filter: Expr) -> Self {
        self.query.filter = Some(filter);
        self
    }

    /// Sets the maximum number of documents to return.
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Sets the number of documents to skip (for pagination).
    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = Some(offset);
        self
    }

    /// Appends a sort key. Keys added first are the most significant.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort.push(Sort { field: field.into(), direction });
        self
    }

    /// Sets the projection document.
    pub fn projection(mut self, projection: Document) -> Self {
        self.query.projection = Some(projection);
        self
    }

    /// Builds and returns the final query.
    pub fn build(self) -> Query {
        self.query
    }
}

/// MongoDB-shaped options for `find` calls.
///
/// `sort` uses the wire form `{field: 1 | -1}`; keys keep their document order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<Document>,
}

impl FindOptions {
    /// Combines these options with a filter document into a [`Query`].
    pub fn into_query(self, filter: &Document) -> StoreResult<Query> {
        let mut builder = Query::builder().filter(Filter::parse(filter)?);

        if let Some(sort) = &self.sort {
            for (field, direction) in sort {
                let direction = match direction {
                    Bson::Int32(n) if *n < 0 => SortDirection::Desc,
                    Bson::Int64(n) if *n < 0 => SortDirection::Desc,
                    Bson::Double(n) if *n < 0.0 => SortDirection::Desc,
                    Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => SortDirection::Asc,
                    other => {
                        return Err(StoreError::InvalidFilter(format!(
                            "invalid sort direction for {field}: {other}"
                        )));
                    }
                };
                builder = builder.sort(field.clone(), direction);
            }
        }
        if let Some(skip) = self.skip {
            builder = builder.offset(skip as usize);
        }
        // A limit of 0 means no limit.
        if let Some(limit) = self.limit.filter(|limit| *limit > 0) {
            builder = builder.limit(limit as usize);
        }
        if let Some(projection) = self.projection {
            builder = builder.projection(projection);
        }

        Ok(builder.build())
    }
}

pub trait QueryVisitor {
    type Output;
    type Error: Into<StoreError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(
        &mut self,
        field: &str,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn empty_filter_matches_everything() {
        assert_eq!(Filter::parse(&doc! {}).unwrap(), Expr::all());
    }

    #[test]
    fn implicit_equality_and_operators() {
        let expr = Filter::parse(&doc! { "status": "A", "qty": { "$gte": 5, "$lt": 30 } }).unwrap();

        assert_eq!(
            expr,
            Expr::And(vec![
                Filter::eq("status", "A"),
                Expr::And(vec![Filter::gte("qty", 5), Filter::lt("qty", 30)]),
            ])
        );
    }

    #[test]
    fn logical_operators() {
        let expr = Filter::parse(&doc! {
            "$or": [{ "a": 1 }, { "b": { "$exists": true } }],
            "$nor": [{ "c": 2 }],
        })
        .unwrap();

        assert_eq!(
            expr,
            Expr::And(vec![
                Expr::Or(vec![Filter::eq("a", 1), Filter::exists("b")]),
                Expr::Or(vec![Filter::eq("c", 2)]).not(),
            ])
        );
    }

    #[test]
    fn embedded_document_without_operators_is_equality() {
        let expr = Filter::parse(&doc! { "size": { "h": 14, "w": 21 } }).unwrap();
        assert_eq!(expr, Filter::eq("size", doc! { "h": 14, "w": 21 }));
    }

    #[test]
    fn rejects_unknown_operators() {
        assert!(matches!(
            Filter::parse(&doc! { "a": { "$near": 1 } }),
            Err(StoreError::InvalidFilter(_))
        ));
        assert!(matches!(
            Filter::parse(&doc! { "$where": "true" }),
            Err(StoreError::InvalidFilter(_))
        ));
        assert!(matches!(
            Filter::parse(&doc! { "a": { "$in": 1 } }),
            Err(StoreError::InvalidFilter(_))
        ));
    }

    #[test]
    fn equality_fields_seed_upserts() {
        let expr = Filter::parse(&doc! { "_id": "x", "status": "A", "qty": { "$gt": 1 }, "a.b": 1 }).unwrap();
        assert_eq!(expr.equality_fields(), doc! { "_id": "x", "status": "A" });
    }

    #[test]
    fn find_options_build_sorted_paged_query() {
        let query = FindOptions {
            sort: Some(doc! { "qty": -1, "name": 1 }),
            skip: Some(2),
            limit: Some(5),
            projection: None,
        }
        .into_query(&doc! {})
        .unwrap();

        assert_eq!(
            query.sort,
            vec![
                Sort { field: "qty".into(), direction: SortDirection::Desc },
                Sort { field: "name".into(), direction: SortDirection::Asc },
            ]
        );
        assert_eq!(query.offset, Some(2));
        assert_eq!(query.limit, Some(5));
    }

    #[test]
    fn zero_limit_means_no_limit() {
        let query = FindOptions { limit: Some(0), ..Default::default() }
            .into_query(&doc! {})
            .unwrap();

        assert_eq!(query.limit, None);
    }
}
