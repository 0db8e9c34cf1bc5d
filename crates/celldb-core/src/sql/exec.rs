use std::cmp::Ordering;
use std::collections::HashMap;

use crate::dataset::Dataset;
use crate::error::{CellDbError, Result};
use crate::sql::eval::{
    is_aggregate_call, AggAccumulator, EvalContext, ExprValue, FunctionResolver,
};
use crate::sql::parser::{Expr, FunctionArg, OrderByItem, OrderDirection, SelectItem};
use crate::sql::query::Query;
use crate::value::{CellValue, Row};

/// One produced row: its computed name and projected columns.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    pub row_name: String,
    pub columns: Row,
}

/// Execution knobs passed down from the engine.
#[derive(Clone, Copy)]
pub struct ExecOptions<'a> {
    pub functions: Option<&'a dyn FunctionResolver>,
    pub max_rows: usize,
}

impl Default for ExecOptions<'_> {
    fn default() -> Self {
        Self {
            functions: None,
            max_rows: usize::MAX,
        }
    }
}

struct Produced {
    row: OutputRow,
    sort_keys: Vec<CellValue>,
}

/// Runs `query` over `dataset`. Read-only; any evaluation error aborts the
/// whole call with no partial result.
pub fn execute_query(
    dataset: &dyn Dataset,
    query: &Query,
    opts: &ExecOptions<'_>,
) -> Result<Vec<OutputRow>> {
    let mut produced = if query.is_grouped() {
        execute_grouped(dataset, query, opts)?
    } else {
        execute_plain(dataset, query, opts)?
    };

    if !query.order_by.is_empty() {
        produced.sort_by(|a, b| compare_keys(&a.sort_keys, &b.sort_keys, &query.order_by));
    }

    let rows: Vec<OutputRow> = produced
        .into_iter()
        .skip(query.offset)
        .take(query.limit.unwrap_or(usize::MAX))
        .map(|p| p.row)
        .collect();
    tracing::debug!("query on {} produced {} rows", dataset.id(), rows.len());
    Ok(rows)
}

fn execute_plain(
    dataset: &dyn Dataset,
    query: &Query,
    opts: &ExecOptions<'_>,
) -> Result<Vec<Produced>> {
    // Without ORDER BY the first offset+limit rows in enumeration order are final.
    let cap = match (query.order_by.is_empty(), query.limit) {
        (true, Some(limit)) => Some(limit.saturating_add(query.offset)),
        _ => None,
    };

    let mut produced = Vec::new();
    for (name, row) in dataset.scan_as_of(query.as_of) {
        if cap.is_some_and(|cap| produced.len() >= cap) {
            break;
        }
        let ctx = EvalContext::new(&name, &row).with_functions(opts.functions);
        if let Some(filter) = &query.filter {
            if !ctx.eval(filter)?.is_truthy() {
                continue;
            }
        }
        let columns = ctx.project(&query.select)?;
        let row_name = match &query.row_name {
            Some(expr) => row_name_from(ctx.eval(expr)?)?,
            None => name.clone(),
        };
        let sort_keys = order_keys(&query.order_by, &name, &columns, &row, opts)?;
        produced.push(Produced {
            row: OutputRow { row_name, columns },
            sort_keys,
        });
        check_row_cap(produced.len(), opts)?;
    }
    Ok(produced)
}

struct Group {
    key: Vec<CellValue>,
    rows: Vec<(String, Row)>,
}

fn execute_grouped(
    dataset: &dyn Dataset,
    query: &Query,
    opts: &ExecOptions<'_>,
) -> Result<Vec<Produced>> {
    let mut groups: Vec<Group> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    if query.group_by.is_empty() {
        // Whole-table aggregation yields one row even over no input.
        groups.push(Group {
            key: Vec::new(),
            rows: Vec::new(),
        });
        index.insert(key_text(&[]), 0);
    }

    for (name, row) in dataset.scan_as_of(query.as_of) {
        let ctx = EvalContext::new(&name, &row).with_functions(opts.functions);
        if let Some(filter) = &query.filter {
            if !ctx.eval(filter)?.is_truthy() {
                continue;
            }
        }
        let mut key = Vec::with_capacity(query.group_by.len());
        for expr in &query.group_by {
            key.push(ctx.eval_scalar(expr)?.unwrap_or(CellValue::Null));
        }
        let text = key_text(&key);
        let slot = match index.get(&text) {
            Some(slot) => *slot,
            None => {
                index.insert(text, groups.len());
                groups.push(Group {
                    key,
                    rows: Vec::new(),
                });
                groups.len() - 1
            }
        };
        groups[slot].rows.push((name, row));
    }

    groups.sort_by(|a, b| compare_values(&a.key, &b.key));

    let empty = Row::new();
    let mut produced = Vec::new();
    for group in &groups {
        // Non-aggregate expressions read the group's first row.
        let (first_name, first_row) = match group.rows.first() {
            Some((name, row)) => (name.as_str(), row),
            None => ("", &empty),
        };
        let ctx = EvalContext::new(first_name, first_row).with_functions(opts.functions);

        if let Some(having) = &query.having {
            let having = substitute_aggregates(having, &group.rows, opts)?;
            if !ctx.eval(&having)?.is_truthy() {
                continue;
            }
        }

        let items = substitute_items(&query.select, &group.rows, opts)?;
        let columns = ctx.project(&items)?;
        let row_name = match &query.row_name {
            Some(expr) => {
                let expr = substitute_aggregates(expr, &group.rows, opts)?;
                row_name_from(ctx.eval(&expr)?)?
            }
            None => key_text(&group.key),
        };

        let mut order_by = Vec::with_capacity(query.order_by.len());
        for item in &query.order_by {
            order_by.push(OrderByItem {
                expr: substitute_aggregates(&item.expr, &group.rows, opts)?,
                direction: item.direction,
            });
        }
        let sort_keys = order_keys(&order_by, &row_name, &columns, first_row, opts)?;
        produced.push(Produced {
            row: OutputRow { row_name, columns },
            sort_keys,
        });
        check_row_cap(produced.len(), opts)?;
    }
    Ok(produced)
}

/// JSON array text of a group key, e.g. `["cat"]`.
fn key_text(key: &[CellValue]) -> String {
    serde_json::Value::Array(key.iter().map(CellValue::to_json).collect()).to_string()
}

fn row_name_from(value: ExprValue) -> Result<String> {
    match value {
        ExprValue::Value(CellValue::Text(s)) if !s.is_empty() => Ok(s),
        ExprValue::Value(v) if !v.is_null() && !matches!(v, CellValue::Text(_)) => {
            Ok(v.to_display_string())
        }
        other => Err(CellDbError::eval(format!(
            "row name expression produced no usable name ({other:?})"
        ))),
    }
}

fn check_row_cap(count: usize, opts: &ExecOptions<'_>) -> Result<()> {
    if count > opts.max_rows {
        return Err(CellDbError::eval(format!(
            "query produced more than {} rows",
            opts.max_rows
        )));
    }
    Ok(())
}

/// ORDER BY keys, evaluated against the output row with the source row as
/// fallback for columns that were not projected.
fn order_keys(
    order_by: &[OrderByItem],
    row_name: &str,
    output: &Row,
    source: &Row,
    opts: &ExecOptions<'_>,
) -> Result<Vec<CellValue>> {
    if order_by.is_empty() {
        return Ok(Vec::new());
    }
    let ctx = EvalContext::new(row_name, output)
        .with_fallback(source)
        .with_functions(opts.functions);
    let mut keys = Vec::with_capacity(order_by.len());
    for item in order_by {
        keys.push(ctx.eval_scalar(&item.expr)?.unwrap_or(CellValue::Null));
    }
    Ok(keys)
}

fn compare_keys(a: &[CellValue], b: &[CellValue], order_by: &[OrderByItem]) -> Ordering {
    for ((av, bv), item) in a.iter().zip(b.iter()).zip(order_by.iter()) {
        let ord = av.sort_cmp(bv);
        let ord = match item.direction {
            OrderDirection::Asc => ord,
            OrderDirection::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_values(a: &[CellValue], b: &[CellValue]) -> Ordering {
    for (av, bv) in a.iter().zip(b.iter()) {
        let ord = av.sort_cmp(bv);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

fn substitute_items(
    items: &[SelectItem],
    group_rows: &[(String, Row)],
    opts: &ExecOptions<'_>,
) -> Result<Vec<SelectItem>> {
    items
        .iter()
        .map(|item| match item {
            SelectItem::Wildcard { .. } => Ok(item.clone()),
            SelectItem::Expr {
                expr,
                alias,
                surface,
            } => Ok(SelectItem::Expr {
                expr: substitute_aggregates(expr, group_rows, opts)?,
                alias: alias.clone(),
                surface: surface.clone(),
            }),
        })
        .collect()
}

/// Replaces every aggregate call in `expr` with its value over `group_rows`.
fn substitute_aggregates(
    expr: &Expr,
    group_rows: &[(String, Row)],
    opts: &ExecOptions<'_>,
) -> Result<Expr> {
    if is_aggregate_call(expr) {
        if let Expr::Function { name, args, .. } = expr {
            return eval_aggregate(name, args, group_rows, opts).map(Expr::Literal);
        }
    }
    let sub = |e: &Expr| substitute_aggregates(e, group_rows, opts).map(Box::new);
    Ok(match expr {
        Expr::Column(_) | Expr::Literal(_) | Expr::Star => expr.clone(),
        Expr::Negate(e) => Expr::Negate(sub(e)?),
        Expr::Not(e) => Expr::Not(sub(e)?),
        Expr::BinOp { left, op, right } => Expr::BinOp {
            left: sub(left)?,
            op: *op,
            right: sub(right)?,
        },
        Expr::Is {
            expr,
            check,
            negated,
        } => Expr::Is {
            expr: sub(expr)?,
            check: *check,
            negated: *negated,
        },
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => Expr::Between {
            expr: sub(expr)?,
            low: sub(low)?,
            high: sub(high)?,
            negated: *negated,
        },
        Expr::InList {
            expr,
            list,
            negated,
        } => Expr::InList {
            expr: sub(expr)?,
            list: list
                .iter()
                .map(|e| substitute_aggregates(e, group_rows, opts))
                .collect::<Result<Vec<_>>>()?,
            negated: *negated,
        },
        Expr::Case {
            operand,
            when_clauses,
            else_clause,
        } => Expr::Case {
            operand: operand.as_deref().map(sub).transpose()?,
            when_clauses: when_clauses
                .iter()
                .map(|(w, t)| {
                    Ok((
                        substitute_aggregates(w, group_rows, opts)?,
                        substitute_aggregates(t, group_rows, opts)?,
                    ))
                })
                .collect::<Result<Vec<_>>>()?,
            else_clause: else_clause.as_deref().map(sub).transpose()?,
        },
        Expr::Cast { expr, target } => Expr::Cast {
            expr: sub(expr)?,
            target: *target,
        },
        Expr::Function {
            name,
            args,
            extract,
        } => Expr::Function {
            name: name.clone(),
            args: args
                .iter()
                .map(|a| {
                    Ok(FunctionArg {
                        expr: substitute_aggregates(&a.expr, group_rows, opts)?,
                        alias: a.alias.clone(),
                        surface: a.surface.clone(),
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            extract: extract.clone(),
        },
        Expr::Record(items) => Expr::Record(substitute_items(items, group_rows, opts)?),
    })
}

fn eval_aggregate(
    name: &str,
    args: &[FunctionArg],
    group_rows: &[(String, Row)],
    opts: &ExecOptions<'_>,
) -> Result<CellValue> {
    let lower = name.to_ascii_lowercase();
    let count_rows = args.is_empty() || matches!(&args[..], [arg] if arg.expr == Expr::Star);
    if lower == "count" && count_rows {
        return Ok(CellValue::Integer(group_rows.len() as i64));
    }
    let [arg] = args else {
        return Err(CellDbError::eval(format!(
            "{name}() takes exactly one argument"
        )));
    };

    let mut acc = AggAccumulator::new();
    for (row_name, row) in group_rows {
        let ctx = EvalContext::new(row_name, row).with_functions(opts.functions);
        if let Some(v) = ctx.eval_scalar(&arg.expr)? {
            acc.accumulate(&v);
        }
    }
    Ok(match lower.as_str() {
        "count" => acc.count_value(),
        "sum" => acc.sum_value(),
        "avg" => acc.avg(),
        "min" => acc.min_value(),
        _ => acc.max_value(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::SparseDataset;
    use crate::error::ErrorKind;
    use crate::sql::query::QueryRequest;

    const TS: i64 = 1_420_070_400_000;

    fn setup_dataset() -> SparseDataset {
        let ds = SparseDataset::new("test");
        for (row, x, y, label) in [
            ("ex1", 0, 0, "cat"),
            ("ex2", 1, 1, "dog"),
            ("ex3", 1, 2, "cat"),
            ("ex4", 6, 6, "poil"),
        ] {
            ds.record_row(
                row,
                [
                    ("x", CellValue::Integer(x), TS),
                    ("y", CellValue::Integer(y), TS),
                    ("label", CellValue::Text(label.to_string()), TS),
                ],
            )
            .unwrap();
        }
        ds.commit();
        ds
    }

    fn run(ds: &SparseDataset, req: QueryRequest) -> Vec<OutputRow> {
        let query = Query::from_request(&req).unwrap();
        execute_query(ds, &query, &ExecOptions::default()).unwrap()
    }

    fn names(rows: &[OutputRow]) -> Vec<&str> {
        rows.iter().map(|r| r.row_name.as_str()).collect()
    }

    #[test]
    fn transform_style_projection_and_naming() {
        let ds = setup_dataset();
        let rows = run(
            &ds,
            QueryRequest::select("x, y, x * 10 AS z, y + 6 AS q")
                .with_row_name("rowName() + '_transformed'")
                .with_order_by("rowName()"),
        );
        assert_eq!(
            names(&rows),
            vec![
                "ex1_transformed",
                "ex2_transformed",
                "ex3_transformed",
                "ex4_transformed"
            ]
        );
        assert_eq!(rows[3].columns.get("z"), Some(&CellValue::Integer(60)));
        assert_eq!(rows[3].columns.get("q"), Some(&CellValue::Integer(12)));
    }

    #[test]
    fn limit_cardinality_without_order() {
        let ds = setup_dataset();
        for k in 0..6 {
            let rows = run(&ds, QueryRequest::select("x").with_limit(k));
            assert_eq!(rows.len(), k.min(4), "limit {k}");
        }
        let filtered = run(&ds, QueryRequest::select("x").with_where("x = 1").with_limit(3));
        assert_eq!(names(&filtered), vec!["ex2", "ex3"]);
    }

    #[test]
    fn order_desc_with_offset() {
        let ds = setup_dataset();
        let rows = run(
            &ds,
            QueryRequest::select("x")
                .with_order_by("y DESC")
                .with_offset(1)
                .with_limit(2),
        );
        assert_eq!(names(&rows), vec!["ex3", "ex2"]);
        // y was not projected: the source row is consulted for the sort key
        assert!(rows[0].columns.get("y").is_none());
    }

    #[test]
    fn grouped_counts_and_sums() {
        let ds = setup_dataset();
        let rows = run(
            &ds,
            QueryRequest::select("label, count(*) AS n, sum(x)")
                .with_group_by("label")
                .with_order_by("n DESC, label"),
        );
        assert_eq!(names(&rows), vec!["[\"cat\"]", "[\"dog\"]", "[\"poil\"]"]);
        assert_eq!(rows[0].columns.get("n"), Some(&CellValue::Integer(2)));
        assert_eq!(rows[0].columns.get("sum(x)"), Some(&CellValue::Integer(1)));
        assert_eq!(rows[0].columns.get("label"), Some(&CellValue::Text("cat".into())));
    }

    #[test]
    fn having_filters_groups() {
        let ds = setup_dataset();
        let mut req = QueryRequest::select("count(*) AS n").with_group_by("label");
        req.having = Some("count(*) > 1".to_string());
        let rows = run(&ds, req);
        assert_eq!(names(&rows), vec!["[\"cat\"]"]);
    }

    #[test]
    fn whole_table_count_over_empty_input() {
        let ds = setup_dataset();
        let rows = run(&ds, QueryRequest::select("count(1) AS n").with_where("x > 100"));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].columns.get("n"), Some(&CellValue::Integer(0)));
    }

    #[test]
    fn evaluation_errors_abort_the_query() {
        let ds = setup_dataset();
        let query = Query::from_request(&QueryRequest::select("label * 2")).unwrap();
        let err = execute_query(&ds, &query, &ExecOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Evaluation);

        let query = Query::from_request(&QueryRequest::select("x").with_row_name("missing"))
            .unwrap();
        let err = execute_query(&ds, &query, &ExecOptions::default()).unwrap_err();
        assert!(format!("{err}").contains("row name"));
    }

    #[test]
    fn row_cap_is_enforced() {
        let ds = setup_dataset();
        let query = Query::default();
        let opts = ExecOptions {
            functions: None,
            max_rows: 2,
        };
        let err = execute_query(&ds, &query, &opts).unwrap_err();
        assert!(format!("{err}").contains("more than 2 rows"));
    }
}
