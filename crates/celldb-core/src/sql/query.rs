use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sql::eval::{contains_aggregate, item_contains_aggregate};
use crate::sql::format::OutputFormat;
use crate::sql::parser::{
    parse_expression, parse_expression_list, parse_order_by, parse_select_list, Expr,
    OrderByItem, SelectItem, SelectStatement,
};
use crate::util::time::TimeSpec;
use crate::value::Timestamp;

/// Parsed, immutable query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub select: Vec<SelectItem>,
    pub filter: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderByItem>,
    /// Output row naming; `None` keeps the source row name (or the group key).
    pub row_name: Option<Expr>,
    pub limit: Option<usize>,
    pub offset: usize,
    /// Rows are read as they stood at this time; `None` reads the latest cells.
    pub as_of: Option<Timestamp>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            select: vec![SelectItem::all()],
            filter: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            row_name: None,
            limit: None,
            offset: 0,
            as_of: None,
        }
    }
}

impl Query {
    pub fn from_request(req: &QueryRequest) -> Result<Self> {
        Ok(Self {
            select: match clause(&req.select) {
                Some(s) => parse_select_list(s)?,
                None => vec![SelectItem::all()],
            },
            filter: clause(&req.filter).map(parse_expression).transpose()?,
            group_by: match clause(&req.group_by) {
                Some(s) => parse_expression_list(s)?,
                None => Vec::new(),
            },
            having: clause(&req.having).map(parse_expression).transpose()?,
            order_by: match clause(&req.order_by) {
                Some(s) => parse_order_by(s)?,
                None => Vec::new(),
            },
            row_name: clause(&req.row_name).map(parse_expression).transpose()?,
            limit: req.limit,
            offset: req.offset.unwrap_or(0),
            as_of: req.as_of.as_ref().map(TimeSpec::resolve).transpose()?,
        })
    }

    /// Splits a parsed `SELECT` into its source dataset id and query.
    pub fn from_statement(stmt: SelectStatement) -> (String, Self) {
        let query = Self {
            select: stmt.items,
            filter: stmt.filter,
            group_by: stmt.group_by,
            having: stmt.having,
            order_by: stmt.order_by,
            row_name: stmt.named,
            limit: stmt.limit,
            offset: stmt.offset.unwrap_or(0),
            as_of: None,
        };
        (stmt.from, query)
    }

    /// Grouped when there is a GROUP BY or any aggregate in the output.
    pub fn is_grouped(&self) -> bool {
        !self.group_by.is_empty()
            || self.select.iter().any(item_contains_aggregate)
            || self.having.as_ref().is_some_and(contains_aggregate)
    }
}

fn clause(text: &Option<String>) -> Option<&str> {
    text.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Query as supplied over the JSON boundary; every clause is source text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QueryRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<String>,
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub having: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    /// Millis or an ISO date; cells stamped later are ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_of: Option<TimeSpec>,
    #[serde(default)]
    pub format: OutputFormat,
}

impl QueryRequest {
    pub fn select(select: impl Into<String>) -> Self {
        Self {
            select: Some(select.into()),
            ..Self::default()
        }
    }

    pub fn with_where(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_group_by(mut self, group_by: impl Into<String>) -> Self {
        self.group_by = Some(group_by.into());
        self
    }

    pub fn with_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    pub fn with_row_name(mut self, row_name: impl Into<String>) -> Self {
        self.row_name = Some(row_name.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_as_of(mut self, as_of: Timestamp) -> Self {
        self.as_of = Some(TimeSpec::Millis(as_of));
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::parser::{parse_sql, OrderDirection};

    #[test]
    fn request_defaults_to_star() {
        let q = Query::from_request(&QueryRequest::default()).unwrap();
        assert_eq!(q, Query::default());
        assert!(!q.is_grouped());
    }

    #[test]
    fn request_parses_every_clause() {
        let req: QueryRequest = serde_json::from_value(serde_json::json!({
            "select": "label, count(*) AS n",
            "where": "x > 0",
            "groupBy": "label",
            "having": "count(*) > 1",
            "orderBy": "n DESC",
            "limit": 2,
            "offset": 1,
            "format": "table"
        }))
        .unwrap();
        assert_eq!(req.format, OutputFormat::Table);
        let q = Query::from_request(&req).unwrap();
        assert!(q.is_grouped());
        assert_eq!(q.order_by[0].direction, OrderDirection::Desc);
        assert_eq!(q.limit, Some(2));
        assert_eq!(q.offset, 1);
    }

    #[test]
    fn as_of_accepts_dates() {
        let req: QueryRequest =
            serde_json::from_value(serde_json::json!({ "asOf": "2015-01-01" })).unwrap();
        let q = Query::from_request(&req).unwrap();
        assert_eq!(q.as_of, Some(1_420_070_400_000));

        let bad: QueryRequest =
            serde_json::from_value(serde_json::json!({ "asOf": "yesterday" })).unwrap();
        assert!(Query::from_request(&bad).is_err());
    }

    #[test]
    fn aggregate_without_group_by_is_grouped() {
        let q = Query::from_request(&QueryRequest::select("count(1)")).unwrap();
        assert!(q.is_grouped());
    }

    #[test]
    fn blank_clauses_are_ignored() {
        let q = Query::from_request(&QueryRequest::select("  ").with_where("")).unwrap();
        assert_eq!(q, Query::default());
    }

    #[test]
    fn unknown_request_fields_are_rejected() {
        let res: std::result::Result<QueryRequest, _> =
            serde_json::from_value(serde_json::json!({ "selct": "x" }));
        assert!(res.is_err());
    }

    #[test]
    fn statement_maps_named_to_row_name() {
        let stmt = parse_sql("SELECT x NAMED x + 'k' FROM test LIMIT 1").unwrap();
        let (from, q) = Query::from_statement(stmt);
        assert_eq!(from, "test");
        assert!(q.row_name.is_some());
        assert_eq!(q.limit, Some(1));
    }
}
