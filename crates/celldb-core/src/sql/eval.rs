use std::cmp::Ordering;

use crate::error::{CellDbError, Result};
use crate::sql::parser::{BinOperator, CastType, Expr, FunctionArg, IsCheck, SelectItem};
use crate::value::{CellValue, Column, Row};

pub const AGGREGATE_FUNCTIONS: &[&str] = &["count", "sum", "avg", "min", "max"];

/// Result of evaluating an expression.
///
/// `Absent` is what a reference to a missing column produces: it propagates
/// through operators and is dropped from projections instead of becoming null.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    Absent,
    Value(CellValue),
    Row(Row),
}

impl ExprValue {
    pub fn is_truthy(&self) -> bool {
        match self {
            ExprValue::Absent => false,
            ExprValue::Value(v) => v.is_truthy(),
            ExprValue::Row(r) => !r.is_empty(),
        }
    }

    /// Scalar view; `None` for absent values and rows.
    pub fn into_value(self) -> Option<CellValue> {
        match self {
            ExprValue::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// Lookup for user-registered functions referenced from expressions.
pub trait FunctionResolver {
    fn has_function(&self, name: &str) -> bool;

    fn call_function(&self, name: &str, args: &Row) -> Result<Row>;
}

pub struct EvalContext<'a> {
    pub row_name: &'a str,
    pub row: &'a Row,
    /// Consulted for columns missing from `row` (ORDER BY against output rows).
    pub fallback: Option<&'a Row>,
    functions: Option<&'a dyn FunctionResolver>,
}

impl<'a> EvalContext<'a> {
    pub fn new(row_name: &'a str, row: &'a Row) -> Self {
        Self {
            row_name,
            row,
            fallback: None,
            functions: None,
        }
    }

    pub fn with_functions(mut self, functions: Option<&'a dyn FunctionResolver>) -> Self {
        self.functions = functions;
        self
    }

    pub fn with_fallback(mut self, fallback: &'a Row) -> Self {
        self.fallback = Some(fallback);
        self
    }

    fn lookup(&self, name: &str) -> Option<&'a Column> {
        self.row
            .column(name)
            .or_else(|| self.fallback.and_then(|r| r.column(name)))
    }

    pub fn eval(&self, expr: &Expr) -> Result<ExprValue> {
        match expr {
            Expr::Column(name) => Ok(match self.lookup(name) {
                Some(col) => ExprValue::Value(col.value.clone()),
                None => ExprValue::Absent,
            }),
            Expr::Literal(v) => Ok(ExprValue::Value(v.clone())),
            Expr::Star => Ok(ExprValue::Row(self.row.clone())),
            Expr::Record(items) => Ok(ExprValue::Row(self.project(items)?)),
            Expr::Negate(inner) => match self.eval_scalar(inner)? {
                None => Ok(ExprValue::Absent),
                Some(v) => negate(v).map(ExprValue::Value),
            },
            Expr::Not(inner) => Ok(match self.eval(inner)? {
                ExprValue::Absent => ExprValue::Absent,
                ExprValue::Value(CellValue::Null) => ExprValue::Value(CellValue::Null),
                other => ExprValue::Value(CellValue::Bool(!other.is_truthy())),
            }),
            Expr::BinOp { left, op, right } => match op {
                BinOperator::And => {
                    if !self.eval(left)?.is_truthy() {
                        return Ok(ExprValue::Value(CellValue::Bool(false)));
                    }
                    let rv = self.eval(right)?;
                    Ok(ExprValue::Value(CellValue::Bool(rv.is_truthy())))
                }
                BinOperator::Or => {
                    if self.eval(left)?.is_truthy() {
                        return Ok(ExprValue::Value(CellValue::Bool(true)));
                    }
                    let rv = self.eval(right)?;
                    Ok(ExprValue::Value(CellValue::Bool(rv.is_truthy())))
                }
                _ => {
                    let lv = self.eval_scalar(left)?;
                    let rv = self.eval_scalar(right)?;
                    match (lv, rv) {
                        (Some(l), Some(r)) => eval_binop(&l, *op, &r).map(ExprValue::Value),
                        _ => Ok(ExprValue::Absent),
                    }
                }
            },
            Expr::Is {
                expr,
                check,
                negated,
            } => {
                let v = self.eval_scalar(expr)?;
                let hit = match (check, &v) {
                    (IsCheck::Null, None | Some(CellValue::Null)) => true,
                    (IsCheck::Null, Some(_)) => false,
                    (_, None | Some(CellValue::Null)) => false,
                    (IsCheck::True, Some(v)) => v.is_truthy(),
                    (IsCheck::False, Some(v)) => !v.is_truthy(),
                    (IsCheck::String, Some(v)) => matches!(v, CellValue::Text(_)),
                    (IsCheck::Number, Some(v)) => v.is_numeric(),
                    (IsCheck::Integer, Some(v)) => matches!(v, CellValue::Integer(_)),
                };
                Ok(ExprValue::Value(CellValue::Bool(hit != *negated)))
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let (Some(v), Some(lo), Some(hi)) = (
                    self.eval_scalar(expr)?,
                    self.eval_scalar(low)?,
                    self.eval_scalar(high)?,
                ) else {
                    return Ok(ExprValue::Absent);
                };
                if v.is_null() || lo.is_null() || hi.is_null() {
                    return Ok(ExprValue::Value(CellValue::Null));
                }
                let in_range = match (v.cmp_partial(&lo), v.cmp_partial(&hi)) {
                    (Some(lo_cmp), Some(hi_cmp)) => {
                        lo_cmp != Ordering::Less && hi_cmp != Ordering::Greater
                    }
                    _ => false,
                };
                Ok(ExprValue::Value(CellValue::Bool(in_range != *negated)))
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let Some(v) = self.eval_scalar(expr)? else {
                    return Ok(ExprValue::Absent);
                };
                if v.is_null() {
                    return Ok(ExprValue::Value(CellValue::Null));
                }
                let mut found = false;
                for item in list {
                    if let Some(iv) = self.eval_scalar(item)? {
                        if v.cmp_partial(&iv) == Some(Ordering::Equal) {
                            found = true;
                            break;
                        }
                    }
                }
                Ok(ExprValue::Value(CellValue::Bool(found != *negated)))
            }
            Expr::Case {
                operand,
                when_clauses,
                else_clause,
            } => {
                if let Some(op_expr) = operand {
                    let op_val = self.eval_scalar(op_expr)?;
                    for (when_expr, then_expr) in when_clauses {
                        let when_val = self.eval_scalar(when_expr)?;
                        if let (Some(a), Some(b)) = (&op_val, &when_val) {
                            if a.cmp_partial(b) == Some(Ordering::Equal) && !a.is_null() {
                                return self.eval(then_expr);
                            }
                        }
                    }
                } else {
                    for (cond_expr, then_expr) in when_clauses {
                        if self.eval(cond_expr)?.is_truthy() {
                            return self.eval(then_expr);
                        }
                    }
                }
                match else_clause {
                    Some(else_expr) => self.eval(else_expr),
                    None => Ok(ExprValue::Value(CellValue::Null)),
                }
            }
            Expr::Cast { expr, target } => match self.eval_scalar(expr)? {
                None => Ok(ExprValue::Absent),
                Some(v) => Ok(ExprValue::Value(cast(v, *target))),
            },
            Expr::Function {
                name,
                args,
                extract,
            } => self.eval_function(name, args, extract.as_deref()),
        }
    }

    /// Evaluates to a scalar; `None` when absent. Row values are an error here.
    pub fn eval_scalar(&self, expr: &Expr) -> Result<Option<CellValue>> {
        match self.eval(expr)? {
            ExprValue::Absent => Ok(None),
            ExprValue::Value(v) => Ok(Some(v)),
            ExprValue::Row(_) => Err(CellDbError::eval(format!(
                "expression {expr:?} produced a row where a value was expected"
            ))),
        }
    }

    /// Evaluates a select list into an output row.
    pub fn project(&self, items: &[SelectItem]) -> Result<Row> {
        let mut out = Row::new();
        let default_ts = self.row.latest_ts();
        for item in items {
            match item {
                SelectItem::Wildcard {
                    prefix,
                    rename,
                    exclusions,
                } => {
                    for col in self.row.iter() {
                        let Some(rest) = col.name.strip_prefix(prefix.as_str()) else {
                            continue;
                        };
                        if exclusions.iter().any(|ex| ex.matches(&col.name)) {
                            continue;
                        }
                        let name = match rename {
                            Some(new_prefix) => format!("{new_prefix}{rest}"),
                            None => col.name.clone(),
                        };
                        out.set(name, col.value.clone(), col.ts);
                    }
                }
                SelectItem::Expr { expr, alias, .. } => {
                    let name = item.output_name().unwrap_or_default();
                    match self.eval(expr)? {
                        ExprValue::Absent => {}
                        ExprValue::Value(v) => {
                            let ts = match expr {
                                Expr::Column(c) => self.lookup(c).map(|col| col.ts),
                                _ => None,
                            };
                            out.set(name, v, ts.unwrap_or(default_ts));
                        }
                        ExprValue::Row(row) => {
                            for col in row {
                                let col_name = match alias {
                                    Some(alias) => format!("{alias}.{}", col.name),
                                    None => col.name,
                                };
                                out.set(col_name, col.value, col.ts);
                            }
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    fn eval_function(
        &self,
        name: &str,
        args: &[FunctionArg],
        extract: Option<&str>,
    ) -> Result<ExprValue> {
        let lower = name.to_ascii_lowercase();
        if AGGREGATE_FUNCTIONS.contains(&lower.as_str()) {
            return Err(CellDbError::eval(format!(
                "aggregate function {name} used outside of a grouped query"
            )));
        }
        let value = match lower.as_str() {
            "rowname" => {
                expect_arity(name, args, 0)?;
                ExprValue::Value(CellValue::Text(self.row_name.to_string()))
            }
            "rowhash" => {
                expect_arity(name, args, 0)?;
                ExprValue::Value(CellValue::Integer(row_hash(self.row_name)))
            }
            "timestamp" => {
                expect_arity(name, args, 0)?;
                ExprValue::Value(CellValue::Integer(self.row.latest_ts()))
            }
            _ if is_scalar_function(&lower) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval_scalar(&arg.expr)?);
                }
                eval_scalar_function(&lower, name, values)?
            }
            _ => match self.functions {
                Some(resolver) if resolver.has_function(name) => {
                    let bundle = self.argument_bundle(args)?;
                    ExprValue::Row(resolver.call_function(name, &bundle)?)
                }
                _ => {
                    return Err(CellDbError::eval(format!("unknown function {name}")));
                }
            },
        };
        match (extract, value) {
            (None, value) => Ok(value),
            (Some(col), ExprValue::Row(row)) => Ok(match row.get(col) {
                Some(v) => ExprValue::Value(v.clone()),
                None => ExprValue::Absent,
            }),
            (Some(col), _) => Err(CellDbError::eval(format!(
                "cannot extract [{col}] from the scalar result of {name}"
            ))),
        }
    }

    /// Builds the argument row for a user function call.
    fn argument_bundle(&self, args: &[FunctionArg]) -> Result<Row> {
        let mut bundle = Row::new();
        let default_ts = self.row.latest_ts();
        for arg in args {
            match self.eval(&arg.expr)? {
                ExprValue::Absent => {}
                ExprValue::Row(row) => {
                    for col in row {
                        let name = match &arg.alias {
                            Some(alias) => format!("{alias}.{}", col.name),
                            None => col.name,
                        };
                        bundle.set(name, col.value, col.ts);
                    }
                }
                ExprValue::Value(v) => {
                    let name = match (&arg.alias, &arg.expr) {
                        (Some(alias), _) => alias.clone(),
                        (None, Expr::Column(c)) => c.clone(),
                        (None, _) => arg.surface.clone(),
                    };
                    bundle.set(name, v, default_ts);
                }
            }
        }
        Ok(bundle)
    }
}

/// Stable non-negative FNV-1a hash of a row name.
pub fn row_hash(name: &str) -> i64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in name.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash & (i64::MAX as u64)) as i64
}

pub fn is_aggregate_call(expr: &Expr) -> bool {
    matches!(expr, Expr::Function { name, .. } if AGGREGATE_FUNCTIONS.contains(&name.to_ascii_lowercase().as_str()))
}

/// Whether `expr` contains an aggregate call anywhere.
pub fn contains_aggregate(expr: &Expr) -> bool {
    if is_aggregate_call(expr) {
        return true;
    }
    match expr {
        Expr::Column(_) | Expr::Literal(_) | Expr::Star => false,
        Expr::Negate(e) | Expr::Not(e) | Expr::Cast { expr: e, .. } | Expr::Is { expr: e, .. } => {
            contains_aggregate(e)
        }
        Expr::BinOp { left, right, .. } => contains_aggregate(left) || contains_aggregate(right),
        Expr::Between {
            expr, low, high, ..
        } => contains_aggregate(expr) || contains_aggregate(low) || contains_aggregate(high),
        Expr::InList { expr, list, .. } => {
            contains_aggregate(expr) || list.iter().any(contains_aggregate)
        }
        Expr::Case {
            operand,
            when_clauses,
            else_clause,
        } => {
            operand.as_deref().is_some_and(contains_aggregate)
                || when_clauses
                    .iter()
                    .any(|(w, t)| contains_aggregate(w) || contains_aggregate(t))
                || else_clause.as_deref().is_some_and(contains_aggregate)
        }
        Expr::Function { args, .. } => args.iter().any(|a| contains_aggregate(&a.expr)),
        Expr::Record(items) => items.iter().any(item_contains_aggregate),
    }
}

pub fn item_contains_aggregate(item: &SelectItem) -> bool {
    match item {
        SelectItem::Wildcard { .. } => false,
        SelectItem::Expr { expr, .. } => contains_aggregate(expr),
    }
}

/// Column names an expression reads from its row context.
pub fn referenced_columns(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Column(name) => {
            if !out.contains(name) {
                out.push(name.clone());
            }
        }
        Expr::Literal(_) | Expr::Star => {}
        Expr::Negate(e) | Expr::Not(e) | Expr::Cast { expr: e, .. } | Expr::Is { expr: e, .. } => {
            referenced_columns(e, out)
        }
        Expr::BinOp { left, right, .. } => {
            referenced_columns(left, out);
            referenced_columns(right, out);
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            referenced_columns(expr, out);
            referenced_columns(low, out);
            referenced_columns(high, out);
        }
        Expr::InList { expr, list, .. } => {
            referenced_columns(expr, out);
            list.iter().for_each(|e| referenced_columns(e, out));
        }
        Expr::Case {
            operand,
            when_clauses,
            else_clause,
        } => {
            if let Some(op) = operand {
                referenced_columns(op, out);
            }
            for (w, t) in when_clauses {
                referenced_columns(w, out);
                referenced_columns(t, out);
            }
            if let Some(e) = else_clause {
                referenced_columns(e, out);
            }
        }
        Expr::Function { args, .. } => args.iter().for_each(|a| referenced_columns(&a.expr, out)),
        Expr::Record(items) => {
            for item in items {
                if let SelectItem::Expr { expr, .. } = item {
                    referenced_columns(expr, out);
                }
            }
        }
    }
}

fn expect_arity(name: &str, args: &[FunctionArg], n: usize) -> Result<()> {
    if args.len() != n {
        return Err(CellDbError::eval(format!(
            "{name}() takes {n} argument(s), got {}",
            args.len()
        )));
    }
    Ok(())
}

fn negate(v: CellValue) -> Result<CellValue> {
    match v {
        CellValue::Null => Ok(CellValue::Null),
        CellValue::Integer(i) => Ok(i
            .checked_neg()
            .map(CellValue::Integer)
            .unwrap_or(CellValue::Number(-(i as f64)))),
        CellValue::Number(n) => Ok(CellValue::Number(-n)),
        other => Err(CellDbError::eval(format!(
            "cannot negate a {} value",
            other.type_name()
        ))),
    }
}

pub(crate) fn eval_binop(lv: &CellValue, op: BinOperator, rv: &CellValue) -> Result<CellValue> {
    match op {
        BinOperator::Eq => Ok(compare(lv, rv, |o| o == Ordering::Equal)),
        BinOperator::NotEq => Ok(compare(lv, rv, |o| o != Ordering::Equal)),
        BinOperator::Lt => Ok(compare(lv, rv, |o| o == Ordering::Less)),
        BinOperator::LtEq => Ok(compare(lv, rv, |o| o != Ordering::Greater)),
        BinOperator::Gt => Ok(compare(lv, rv, |o| o == Ordering::Greater)),
        BinOperator::GtEq => Ok(compare(lv, rv, |o| o != Ordering::Less)),
        BinOperator::Like => match (lv, rv) {
            (CellValue::Null, _) | (_, CellValue::Null) => Ok(CellValue::Null),
            (CellValue::Text(text), CellValue::Text(pattern)) => {
                Ok(CellValue::Bool(like_match(text, pattern)))
            }
            _ => Ok(CellValue::Bool(false)),
        },
        BinOperator::Add
        | BinOperator::Sub
        | BinOperator::Mul
        | BinOperator::Div
        | BinOperator::Mod => arithmetic(lv, op, rv),
        BinOperator::And | BinOperator::Or => Err(CellDbError::eval(
            "logical operators are evaluated with short-circuiting",
        )),
    }
}

fn compare(lv: &CellValue, rv: &CellValue, test: impl Fn(Ordering) -> bool) -> CellValue {
    if lv.is_null() || rv.is_null() {
        return CellValue::Null;
    }
    match lv.cmp_partial(rv) {
        Some(ord) => CellValue::Bool(test(ord)),
        None => CellValue::Bool(false),
    }
}

fn arithmetic(lv: &CellValue, op: BinOperator, rv: &CellValue) -> Result<CellValue> {
    if lv.is_null() || rv.is_null() {
        return Ok(CellValue::Null);
    }
    if op == BinOperator::Add
        && (matches!(lv, CellValue::Text(_)) || matches!(rv, CellValue::Text(_)))
    {
        return Ok(CellValue::Text(format!(
            "{}{}",
            lv.to_display_string(),
            rv.to_display_string()
        )));
    }
    let symbol = match op {
        BinOperator::Add => "+",
        BinOperator::Sub => "-",
        BinOperator::Mul => "*",
        BinOperator::Div => "/",
        _ => "%",
    };
    if !lv.is_numeric() || !rv.is_numeric() {
        return Err(CellDbError::eval(format!(
            "cannot apply {symbol} to {} and {}",
            lv.type_name(),
            rv.type_name()
        )));
    }

    if let (CellValue::Integer(a), CellValue::Integer(b)) = (lv, rv) {
        let exact = match op {
            BinOperator::Add => a.checked_add(*b),
            BinOperator::Sub => a.checked_sub(*b),
            BinOperator::Mul => a.checked_mul(*b),
            BinOperator::Mod if *b == 0 => return Ok(CellValue::Null),
            BinOperator::Mod => a.checked_rem(*b),
            _ => None,
        };
        if let Some(n) = exact {
            return Ok(CellValue::Integer(n));
        }
    }

    let (a, b) = match (lv.to_f64(), rv.to_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Ok(CellValue::Null),
    };
    Ok(match op {
        BinOperator::Add => CellValue::Number(a + b),
        BinOperator::Sub => CellValue::Number(a - b),
        BinOperator::Mul => CellValue::Number(a * b),
        BinOperator::Div if b == 0.0 => CellValue::Null,
        BinOperator::Div => CellValue::Number(a / b),
        _ if b == 0.0 => CellValue::Null,
        _ => CellValue::Number(a % b),
    })
}

fn cast(v: CellValue, target: CastType) -> CellValue {
    if v.is_null() {
        return CellValue::Null;
    }
    match target {
        CastType::Integer => match v {
            CellValue::Integer(i) => CellValue::Integer(i),
            CellValue::Text(s) => match s.trim().parse::<i64>() {
                Ok(i) => CellValue::Integer(i),
                Err(_) => s
                    .trim()
                    .parse::<f64>()
                    .map(|f| CellValue::Integer(f.trunc() as i64))
                    .unwrap_or(CellValue::Null),
            },
            other => other
                .to_f64()
                .map(|f| CellValue::Integer(f.trunc() as i64))
                .unwrap_or(CellValue::Null),
        },
        CastType::Number => v.to_f64().map(CellValue::Number).unwrap_or(CellValue::Null),
        CastType::String => CellValue::Text(v.to_display_string()),
        CastType::Boolean => match v {
            CellValue::Text(s) => {
                let lower = s.to_lowercase();
                CellValue::Bool(lower == "true" || lower == "1")
            }
            other => CellValue::Bool(other.is_truthy()),
        },
    }
}

fn is_scalar_function(lower: &str) -> bool {
    matches!(
        lower,
        "abs"
            | "ceil"
            | "floor"
            | "round"
            | "sqrt"
            | "ln"
            | "exp"
            | "pow"
            | "lower"
            | "upper"
            | "length"
            | "concat"
            | "coalesce"
    )
}

fn eval_scalar_function(
    lower: &str,
    name: &str,
    args: Vec<Option<CellValue>>,
) -> Result<ExprValue> {
    match lower {
        "coalesce" => {
            let found = args.into_iter().flatten().find(|v| !v.is_null());
            return Ok(ExprValue::Value(found.unwrap_or(CellValue::Null)));
        }
        "concat" => {
            let text: String = args
                .iter()
                .flatten()
                .filter(|v| !v.is_null())
                .map(CellValue::to_display_string)
                .collect();
            return Ok(ExprValue::Value(CellValue::Text(text)));
        }
        _ => {}
    }

    let expected = if lower == "pow" { 2 } else { 1 };
    if args.len() != expected {
        return Err(CellDbError::eval(format!(
            "{name}() takes {expected} argument(s), got {}",
            args.len()
        )));
    }
    let mut values = Vec::with_capacity(expected);
    for arg in args {
        match arg {
            None => return Ok(ExprValue::Absent),
            Some(CellValue::Null) => return Ok(ExprValue::Value(CellValue::Null)),
            Some(v) => values.push(v),
        }
    }
    let first = &values[0];

    let result = match lower {
        "lower" | "upper" | "length" => {
            let CellValue::Text(s) = first else {
                return Err(CellDbError::eval(format!(
                    "{name}() expects a string, got {}",
                    first.type_name()
                )));
            };
            match lower {
                "lower" => CellValue::Text(s.to_lowercase()),
                "upper" => CellValue::Text(s.to_uppercase()),
                _ => CellValue::Integer(s.chars().count() as i64),
            }
        }
        "abs" => match first {
            CellValue::Integer(i) => i
                .checked_abs()
                .map(CellValue::Integer)
                .unwrap_or(CellValue::Number((*i as f64).abs())),
            other => CellValue::Number(numeric_arg(name, other)?.abs()),
        },
        "ceil" | "floor" | "round" => match first {
            CellValue::Integer(i) => CellValue::Integer(*i),
            other => {
                let n = numeric_arg(name, other)?;
                CellValue::Number(match lower {
                    "ceil" => n.ceil(),
                    "floor" => n.floor(),
                    _ => n.round(),
                })
            }
        },
        "sqrt" => CellValue::Number(numeric_arg(name, first)?.sqrt()),
        "ln" => CellValue::Number(numeric_arg(name, first)?.ln()),
        "exp" => CellValue::Number(numeric_arg(name, first)?.exp()),
        "pow" => {
            let base = numeric_arg(name, first)?;
            let exponent = numeric_arg(name, &values[1])?;
            CellValue::Number(base.powf(exponent))
        }
        _ => return Err(CellDbError::eval(format!("unknown function {name}"))),
    };
    Ok(ExprValue::Value(result))
}

fn numeric_arg(name: &str, v: &CellValue) -> Result<f64> {
    match v {
        CellValue::Integer(_) | CellValue::Number(_) => Ok(v.to_f64().unwrap_or(f64::NAN)),
        other => Err(CellDbError::eval(format!(
            "{name}() expects a number, got {}",
            other.type_name()
        ))),
    }
}

fn like_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    like_match_inner(&text, &pattern, 0, 0)
}

fn like_match_inner(text: &[char], pattern: &[char], ti: usize, pi: usize) -> bool {
    if pi == pattern.len() {
        return ti == text.len();
    }
    if pattern[pi] == '%' {
        let mut next_pi = pi;
        while next_pi < pattern.len() && pattern[next_pi] == '%' {
            next_pi += 1;
        }
        if next_pi == pattern.len() {
            return true;
        }
        return (ti..=text.len()).any(|start| like_match_inner(text, pattern, start, next_pi));
    }
    if ti >= text.len() {
        return false;
    }
    if pattern[pi] == '_' || pattern[pi] == text[ti] {
        return like_match_inner(text, pattern, ti + 1, pi + 1);
    }
    false
}

/// Running state for one aggregate over a group.
#[derive(Debug, Clone)]
pub struct AggAccumulator {
    pub count: u64,
    int_sum: Option<i64>,
    float_sum: f64,
    all_integers: bool,
    min: Option<CellValue>,
    max: Option<CellValue>,
}

impl AggAccumulator {
    pub fn new() -> Self {
        Self {
            count: 0,
            int_sum: Some(0),
            float_sum: 0.0,
            all_integers: true,
            min: None,
            max: None,
        }
    }

    /// Adds one non-null value.
    pub fn accumulate(&mut self, val: &CellValue) {
        if val.is_null() {
            return;
        }
        self.count += 1;
        match val {
            CellValue::Integer(i) => {
                self.int_sum = self.int_sum.and_then(|s| s.checked_add(*i));
                self.float_sum += *i as f64;
            }
            other => {
                self.all_integers = false;
                if let Some(n) = other.to_f64() {
                    self.float_sum += n;
                }
            }
        }
        if self
            .min
            .as_ref()
            .map_or(true, |m| val.sort_cmp(m) == Ordering::Less)
        {
            self.min = Some(val.clone());
        }
        if self
            .max
            .as_ref()
            .map_or(true, |m| val.sort_cmp(m) == Ordering::Greater)
        {
            self.max = Some(val.clone());
        }
    }

    pub fn count_value(&self) -> CellValue {
        CellValue::Integer(self.count as i64)
    }

    pub fn sum_value(&self) -> CellValue {
        if self.count == 0 {
            return CellValue::Null;
        }
        match (self.all_integers, self.int_sum) {
            (true, Some(sum)) => CellValue::Integer(sum),
            _ => CellValue::Number(self.float_sum),
        }
    }

    pub fn avg(&self) -> CellValue {
        if self.count == 0 {
            CellValue::Null
        } else {
            CellValue::Number(self.float_sum / self.count as f64)
        }
    }

    pub fn min_value(&self) -> CellValue {
        self.min.clone().unwrap_or(CellValue::Null)
    }

    pub fn max_value(&self) -> CellValue {
        self.max.clone().unwrap_or(CellValue::Null)
    }
}
