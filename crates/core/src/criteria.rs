//! Criteria - Fluent query description for document collections
//!
//! Provides a fluent interface for narrowing, ordering, and windowing
//! document sets. Criteria are evaluated against attribute maps with
//! document-store semantics: an equality condition against an
//! array-valued field matches when the array contains the wanted value.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

use crate::document::AttributeMap;

/// Comparison operator types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    In,
    NotIn,
    Exists,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareOp::Equal => write!(f, "=="),
            CompareOp::NotEqual => write!(f, "!="),
            CompareOp::GreaterThan => write!(f, ">"),
            CompareOp::GreaterThanOrEqual => write!(f, ">="),
            CompareOp::LessThan => write!(f, "<"),
            CompareOp::LessThanOrEqual => write!(f, "<="),
            CompareOp::In => write!(f, "in"),
            CompareOp::NotIn => write!(f, "nin"),
            CompareOp::Exists => write!(f, "exists"),
        }
    }
}

/// Single field condition
#[derive(Debug, Clone)]
pub struct Condition {
    pub field: String,
    pub operator: CompareOp,
    pub value: Option<Value>,
    pub values: Vec<Value>, // For In, NotIn
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl OrderDirection {
    fn invert(self) -> Self {
        match self {
            OrderDirection::Asc => OrderDirection::Desc,
            OrderDirection::Desc => OrderDirection::Asc,
        }
    }
}

/// Sort clause
#[derive(Debug, Clone)]
pub struct OrderClause {
    pub field: String,
    pub direction: OrderDirection,
}

/// Criteria for selecting, ordering, and windowing documents
#[derive(Debug, Clone, Default)]
pub struct Criteria {
    conditions: Vec<Condition>,
    order: Vec<OrderClause>,
    limit_value: Option<usize>,
    offset_value: Option<usize>,
}

impl Criteria {
    /// Create empty criteria matching every document
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality condition
    pub fn where_eq<T: Into<Value>>(mut self, field: &str, value: T) -> Self {
        self.push_condition(field, CompareOp::Equal, Some(value.into()), Vec::new());
        self
    }

    /// Add an inequality condition
    pub fn where_ne<T: Into<Value>>(mut self, field: &str, value: T) -> Self {
        self.push_condition(field, CompareOp::NotEqual, Some(value.into()), Vec::new());
        self
    }

    /// Add a greater-than condition
    pub fn where_gt<T: Into<Value>>(mut self, field: &str, value: T) -> Self {
        self.push_condition(field, CompareOp::GreaterThan, Some(value.into()), Vec::new());
        self
    }

    /// Add a greater-than-or-equal condition
    pub fn where_gte<T: Into<Value>>(mut self, field: &str, value: T) -> Self {
        self.push_condition(
            field,
            CompareOp::GreaterThanOrEqual,
            Some(value.into()),
            Vec::new(),
        );
        self
    }

    /// Add a less-than condition
    pub fn where_lt<T: Into<Value>>(mut self, field: &str, value: T) -> Self {
        self.push_condition(field, CompareOp::LessThan, Some(value.into()), Vec::new());
        self
    }

    /// Add a less-than-or-equal condition
    pub fn where_lte<T: Into<Value>>(mut self, field: &str, value: T) -> Self {
        self.push_condition(
            field,
            CompareOp::LessThanOrEqual,
            Some(value.into()),
            Vec::new(),
        );
        self
    }

    /// Add a membership condition
    pub fn where_in<T: Into<Value>>(mut self, field: &str, values: Vec<T>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.push_condition(field, CompareOp::In, None, values);
        self
    }

    /// Add an exclusion condition
    pub fn where_not_in<T: Into<Value>>(mut self, field: &str, values: Vec<T>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.push_condition(field, CompareOp::NotIn, None, values);
        self
    }

    /// Add a field-presence condition
    pub fn where_exists(mut self, field: &str, present: bool) -> Self {
        self.push_condition(field, CompareOp::Exists, Some(Value::Bool(present)), Vec::new());
        self
    }

    /// Add equality conditions for every attribute in the map
    pub fn where_all(mut self, attrs: &AttributeMap) -> Self {
        for (field, value) in attrs {
            self = self.where_eq(field, value.clone());
        }
        self
    }

    /// Add an ascending sort key
    pub fn order_by(mut self, field: &str) -> Self {
        self.order.push(OrderClause {
            field: field.to_string(),
            direction: OrderDirection::Asc,
        });
        self
    }

    /// Add a descending sort key
    pub fn order_by_desc(mut self, field: &str) -> Self {
        self.order.push(OrderClause {
            field: field.to_string(),
            direction: OrderDirection::Desc,
        });
        self
    }

    /// Cap the number of returned documents
    pub fn limit(mut self, count: usize) -> Self {
        self.limit_value = Some(count);
        self
    }

    /// Skip leading documents
    pub fn offset(mut self, count: usize) -> Self {
        self.offset_value = Some(count);
        self
    }

    /// Window to one page of results
    pub fn paginate(mut self, per_page: usize, page: usize) -> Self {
        let page = page.max(1);
        self.limit_value = Some(per_page);
        self.offset_value = Some((page - 1) * per_page);
        self
    }

    /// Check whether any condition was added
    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }

    /// Check whether any sort key was added
    pub fn has_order(&self) -> bool {
        !self.order.is_empty()
    }

    /// Conditions in insertion order
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Sort clauses in insertion order
    pub fn order_clauses(&self) -> &[OrderClause] {
        &self.order
    }

    /// Flip every sort key; used to fetch the tail of an ordered set
    pub fn invert_order(mut self) -> Self {
        for clause in &mut self.order {
            clause.direction = clause.direction.invert();
        }
        self
    }

    /// Combine with narrower criteria
    ///
    /// Conditions and sort keys accumulate; the other side's window wins
    /// when both set one.
    pub fn merge(mut self, other: Criteria) -> Self {
        self.conditions.extend(other.conditions);
        self.order.extend(other.order);
        if other.limit_value.is_some() {
            self.limit_value = other.limit_value;
        }
        if other.offset_value.is_some() {
            self.offset_value = other.offset_value;
        }
        self
    }

    /// Check whether a document satisfies every condition
    pub fn matches(&self, attrs: &AttributeMap) -> bool {
        self.conditions.iter().all(|cond| condition_holds(cond, attrs))
    }

    /// Filter, sort, and window a document set in memory
    pub fn apply(&self, docs: Vec<AttributeMap>) -> Vec<AttributeMap> {
        let mut matched: Vec<AttributeMap> =
            docs.into_iter().filter(|doc| self.matches(doc)).collect();

        if self.has_order() {
            matched.sort_by(|a, b| self.compare_docs(a, b));
        }

        let skip = self.offset_value.unwrap_or(0);
        let take = self.limit_value.unwrap_or(usize::MAX);
        matched.into_iter().skip(skip).take(take).collect()
    }

    fn compare_docs(&self, a: &AttributeMap, b: &AttributeMap) -> Ordering {
        for clause in &self.order {
            let ordering = compare_optional(a.get(&clause.field), b.get(&clause.field));
            let ordering = match clause.direction {
                OrderDirection::Asc => ordering,
                OrderDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    fn push_condition(
        &mut self,
        field: &str,
        operator: CompareOp,
        value: Option<Value>,
        values: Vec<Value>,
    ) {
        self.conditions.push(Condition {
            field: field.to_string(),
            operator,
            value,
            values,
        });
    }
}

fn condition_holds(cond: &Condition, attrs: &AttributeMap) -> bool {
    let field_value = attrs.get(&cond.field);
    match cond.operator {
        CompareOp::Equal => equality_holds(field_value, cond.value.as_ref()),
        CompareOp::NotEqual => !equality_holds(field_value, cond.value.as_ref()),
        CompareOp::GreaterThan => ordering_holds(field_value, cond.value.as_ref(), |o| {
            o == Ordering::Greater
        }),
        CompareOp::GreaterThanOrEqual => {
            ordering_holds(field_value, cond.value.as_ref(), |o| o != Ordering::Less)
        }
        CompareOp::LessThan => {
            ordering_holds(field_value, cond.value.as_ref(), |o| o == Ordering::Less)
        }
        CompareOp::LessThanOrEqual => {
            ordering_holds(field_value, cond.value.as_ref(), |o| o != Ordering::Greater)
        }
        CompareOp::In => membership_holds(field_value, &cond.values),
        CompareOp::NotIn => !membership_holds(field_value, &cond.values),
        CompareOp::Exists => {
            let wanted = cond.value.as_ref().and_then(Value::as_bool).unwrap_or(true);
            attrs.contains_key(&cond.field) == wanted
        }
    }
}

fn equality_holds(field_value: Option<&Value>, wanted: Option<&Value>) -> bool {
    let wanted = match wanted {
        Some(w) => w,
        None => return false,
    };
    match field_value {
        // A null comparison value matches an absent or null field.
        None => wanted.is_null(),
        Some(Value::Array(items)) => {
            items.contains(wanted) || Value::Array(items.clone()) == *wanted
        }
        Some(v) => v == wanted,
    }
}

fn membership_holds(field_value: Option<&Value>, wanted: &[Value]) -> bool {
    match field_value {
        None => false,
        Some(Value::Array(items)) => items.iter().any(|item| wanted.contains(item)),
        Some(v) => wanted.contains(v),
    }
}

fn ordering_holds(
    field_value: Option<&Value>,
    wanted: Option<&Value>,
    accept: impl Fn(Ordering) -> bool,
) -> bool {
    match (field_value, wanted) {
        (Some(v), Some(w)) => compare_values(v, w).map(accept).unwrap_or(false),
        _ => false,
    }
}

/// Compare two attribute values of the same kind; mixed kinds do not order
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64().partial_cmp(&y.as_f64()),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn compare_optional(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
    }
}

/// One window of a paginated fetch
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_entries: usize,
    pub total_pages: usize,
    pub page: usize,
    pub per_page: usize,
}

impl<T> Page<T> {
    /// Assemble a page, deriving the page count from the entry count
    pub fn new(items: Vec<T>, total_entries: usize, page: usize, per_page: usize) -> Self {
        let total_pages = if per_page == 0 {
            0
        } else {
            total_entries.div_ceil(per_page)
        };
        Self {
            items,
            total_entries,
            total_pages,
            page,
            per_page,
        }
    }
}
