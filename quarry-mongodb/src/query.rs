//! Query translation from quarry's expression tree to MongoDB query syntax.
//!
//! This module translates quarry's abstract query expressions into
//! MongoDB BSON documents for execution by the MongoDB query engine.

use bson::{Bson, Document, doc};

use quarry_core::{
    error::StoreError,
    query::{Expr, FieldOp, QueryVisitor, Sort, SortDirection},
};

/// Translates quarry query expressions into MongoDB query documents.
///
/// This struct implements the [`QueryVisitor`] trait to convert abstract
/// query expressions into MongoDB's native BSON query syntax.
pub(crate) struct MongoQueryTranslator;

impl MongoQueryTranslator {
    /// Translates an optional filter; no filter matches every document.
    pub fn translate(filter: Option<&Expr>) -> Result<Document, StoreError> {
        match filter {
            Some(expr) => MongoQueryTranslator.visit_expr(expr),
            None => Ok(Document::new()),
        }
    }

    /// Builds a MongoDB sort document from sort keys, preserving their order.
    pub fn sort(sort: &[Sort]) -> Option<Document> {
        if sort.is_empty() {
            return None;
        }

        let mut document = Document::new();
        for key in sort {
            document.insert(
                key.field.clone(),
                match key.direction {
                    SortDirection::Asc => 1,
                    SortDirection::Desc => -1,
                },
            );
        }

        Some(document)
    }
}

impl QueryVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = StoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        if exprs.is_empty() {
            return Ok(Document::new());
        }

        Ok(doc! {
            "$and": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        if exprs.is_empty() {
            return Ok(doc! { "$expr": false });
        }

        Ok(doc! {
            "$or": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$nor": [self.visit_expr(expr)?],
        })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: match op {
                FieldOp::Eq => doc! { "$eq": value },
                FieldOp::Ne => doc! { "$ne": value },
                FieldOp::Gt => doc! { "$gt": value },
                FieldOp::Gte => doc! { "$gte": value },
                FieldOp::Lt => doc! { "$lt": value },
                FieldOp::Lte => doc! { "$lte": value },
                FieldOp::In | FieldOp::Nin => {
                    if !matches!(value, Bson::Array(_)) {
                        return Err(StoreError::InvalidFilter("$in/$nin require an array".to_string()));
                    }
                    match op {
                        FieldOp::In => doc! { "$in": value },
                        _ => doc! { "$nin": value },
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::query::Filter;

    fn translate(filter: Document) -> Document {
        MongoQueryTranslator::translate(Some(&Filter::parse(&filter).unwrap())).unwrap()
    }

    #[test]
    fn empty_filter_translates_to_empty_document() {
        assert_eq!(translate(doc! {}), doc! {});
        assert_eq!(MongoQueryTranslator::translate(None).unwrap(), doc! {});
    }

    #[test]
    fn operators_translate_explicitly() {
        assert_eq!(translate(doc! { "status": "A" }), doc! { "status": { "$eq": "A" } });
        assert_eq!(
            translate(doc! { "status": "A", "qty": { "$in": [1, 2] } }),
            doc! { "$and": [{ "status": { "$eq": "A" } }, { "qty": { "$in": [1, 2] } }] }
        );
    }

    #[test]
    fn negation_uses_nor() {
        assert_eq!(
            translate(doc! { "qty": { "$not": { "$gt": 5 } } }),
            doc! { "$nor": [{ "qty": { "$gt": 5 } }] }
        );
    }

    #[test]
    fn sort_keeps_key_order() {
        let sort = vec![
            Sort { field: "b".into(), direction: SortDirection::Desc },
            Sort { field: "a".into(), direction: SortDirection::Asc },
        ];

        assert_eq!(MongoQueryTranslator::sort(&sort), Some(doc! { "b": -1, "a": 1 }));
        assert_eq!(MongoQueryTranslator::sort(&[]), None);
    }
}
