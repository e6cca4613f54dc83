//! Type Coercion Rules
//!
//! Implements the numeric promotion used by binary arithmetic and
//! comparison, and the assignability rules used by casts:
//! - Byte/Int16 -> Int32 -> Int64 -> Decimal
//! - Single -> Double
//! - derived entity type -> base entity type
//! - collection covariance

use crate::{PrimitiveType, QueryType};

/// Type coercion rules
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeCoercer;

impl TypeCoercer {
    /// Create a new type coercer
    pub fn new() -> Self {
        Self
    }

    /// Result type of a binary numeric operator over `left` and `right`
    ///
    /// Integral operands narrower than Int32 promote to Int32. Decimal wins
    /// over every other numeric type, then Double, Single and Int64.
    pub fn promote_numeric(&self, left: PrimitiveType, right: PrimitiveType) -> Option<PrimitiveType> {
        if !left.is_numeric() || !right.is_numeric() {
            return None;
        }
        let rank = |p: PrimitiveType| match p {
            PrimitiveType::Decimal => 5,
            PrimitiveType::Double => 4,
            PrimitiveType::Single => 3,
            PrimitiveType::Int64 => 2,
            _ => 1,
        };
        Some(match rank(left).max(rank(right)) {
            5 => PrimitiveType::Decimal,
            4 => PrimitiveType::Double,
            3 => PrimitiveType::Single,
            2 => PrimitiveType::Int64,
            _ => PrimitiveType::Int32,
        })
    }

    /// Result type of binary arithmetic over two query types
    pub fn arithmetic_result(&self, left: &QueryType, right: &QueryType) -> Option<QueryType> {
        match (left, right) {
            (QueryType::Primitive(l), QueryType::Primitive(r)) => {
                self.promote_numeric(*l, *r).map(QueryType::Primitive)
            }
            (QueryType::Any, other) | (other, QueryType::Any) if other.is_numeric() => {
                Some(other.clone())
            }
            _ => None,
        }
    }

    /// Check if a value of `from` can be used where `to` is expected
    pub fn can_implicitly_convert(&self, from: &QueryType, to: &QueryType) -> bool {
        if from == to {
            return true;
        }

        match (from, to) {
            (QueryType::Any, _) | (_, QueryType::Any) => true,

            (QueryType::Primitive(f), QueryType::Primitive(t)) => {
                f.is_numeric() && t.is_numeric() && self.promote_numeric(*f, *t) == Some(*t)
            }

            (QueryType::Entity(derived), QueryType::Entity(base)) => {
                derived.is_or_derives_from(&base.full_name())
            }

            (QueryType::Collection(f), QueryType::Collection(t)) => {
                self.can_implicitly_convert(f, t)
            }

            _ => false,
        }
    }

    /// Find the common type of two branches (conditional expressions)
    pub fn common_type(&self, a: &QueryType, b: &QueryType) -> Option<QueryType> {
        if self.can_implicitly_convert(a, b) && !b.is_any() {
            return Some(b.clone());
        }
        if self.can_implicitly_convert(b, a) {
            return Some(a.clone());
        }
        self.arithmetic_result(a, b)
    }
}
