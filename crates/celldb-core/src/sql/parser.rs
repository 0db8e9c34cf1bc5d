use crate::error::{CellDbError, Result};
use crate::value::CellValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOperator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Like,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsCheck {
    Null,
    True,
    False,
    String,
    Number,
    Integer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastType {
    Integer,
    Number,
    String,
    Boolean,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    Literal(CellValue),
    Negate(Box<Expr>),
    Not(Box<Expr>),
    BinOp {
        left: Box<Expr>,
        op: BinOperator,
        right: Box<Expr>,
    },
    Is {
        expr: Box<Expr>,
        check: IsCheck,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Case {
        operand: Option<Box<Expr>>,
        when_clauses: Vec<(Expr, Expr)>,
        else_clause: Option<Box<Expr>>,
    },
    Cast {
        expr: Box<Expr>,
        target: CastType,
    },
    /// Built-in, aggregate or user function call; `extract` is the `[col]`
    /// suffix selecting one value from a row-valued result.
    Function {
        name: String,
        args: Vec<FunctionArg>,
        extract: Option<String>,
    },
    /// `*` inside `count(*)` or as a whole-row function argument.
    Star,
    /// Row literal `{ ... }`.
    Record(Vec<SelectItem>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionArg {
    pub expr: Expr,
    pub alias: Option<String>,
    pub surface: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclusion {
    Column(String),
    Prefix(String),
}

impl Exclusion {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Exclusion::Column(c) => c == name,
            Exclusion::Prefix(p) => name.starts_with(p.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `prefix*` (empty prefix for `*`), optionally `AS newprefix*` and
    /// `EXCLUDING (...)`.
    Wildcard {
        prefix: String,
        rename: Option<String>,
        exclusions: Vec<Exclusion>,
    },
    Expr {
        expr: Expr,
        alias: Option<String>,
        /// Source text, used as the output name when there is no alias.
        surface: String,
    },
}

impl SelectItem {
    pub fn expr(expr: Expr, alias: Option<&str>, surface: &str) -> Self {
        SelectItem::Expr {
            expr,
            alias: alias.map(str::to_string),
            surface: surface.to_string(),
        }
    }

    pub fn all() -> Self {
        SelectItem::Wildcard {
            prefix: String::new(),
            rename: None,
            exclusions: Vec::new(),
        }
    }

    /// Output column name of a non-wildcard item.
    pub fn output_name(&self) -> Option<&str> {
        match self {
            SelectItem::Wildcard { .. } => None,
            SelectItem::Expr {
                expr,
                alias,
                surface,
            } => Some(match (alias, expr) {
                (Some(alias), _) => alias,
                (None, Expr::Column(name)) => name,
                (None, _) => surface,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expr: Expr,
    pub direction: OrderDirection,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectStatement {
    pub items: Vec<SelectItem>,
    pub named: Option<Expr>,
    pub from: String,
    pub filter: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    QuotedIdent(String),
    Integer(i64),
    Float(f64),
    StringLit(String),
    Symbol(char),
    Op(&'static str),
}

#[derive(Debug, Clone)]
struct Spanned {
    tok: Token,
    start: usize,
    end: usize,
}

/// Keywords that end a select item or clause when seen after `*`.
const CLAUSE_KEYWORDS: &[&str] = &[
    "AS", "EXCLUDING", "FROM", "WHERE", "NAMED", "GROUP", "HAVING", "ORDER", "LIMIT", "OFFSET",
];

pub fn parse_expression(input: &str) -> Result<Expr> {
    let mut p = Parser::new(input)?;
    let expr = p.parse_expr()?;
    p.expect_end()?;
    Ok(expr)
}

pub fn parse_select_list(input: &str) -> Result<Vec<SelectItem>> {
    let mut p = Parser::new(input)?;
    let items = p.parse_select_items()?;
    p.expect_end()?;
    Ok(items)
}

pub fn parse_expression_list(input: &str) -> Result<Vec<Expr>> {
    let mut p = Parser::new(input)?;
    let mut out = vec![p.parse_expr()?];
    while p.eat_symbol(',') {
        out.push(p.parse_expr()?);
    }
    p.expect_end()?;
    Ok(out)
}

pub fn parse_order_by(input: &str) -> Result<Vec<OrderByItem>> {
    let mut p = Parser::new(input)?;
    let items = p.parse_order_items()?;
    p.expect_end()?;
    Ok(items)
}

pub fn parse_sql(input: &str) -> Result<SelectStatement> {
    let mut p = Parser::new(input)?;
    if matches!(p.toks.last(), Some(s) if s.tok == Token::Symbol(';')) {
        p.toks.pop();
    }
    let stmt = p.parse_select_statement()?;
    p.expect_end()?;
    Ok(stmt)
}

struct Parser<'a> {
    src: &'a str,
    toks: Vec<Spanned>,
    i: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Result<Self> {
        Ok(Self {
            src,
            toks: tokenize(src)?,
            i: 0,
        })
    }

    fn parse_select_statement(&mut self) -> Result<SelectStatement> {
        self.expect_kw("SELECT")?;
        let mut stmt = SelectStatement {
            items: self.parse_select_items()?,
            ..SelectStatement::default()
        };
        if self.eat_kw("NAMED") {
            stmt.named = Some(self.parse_expr()?);
        }
        self.expect_kw("FROM")?;
        stmt.from = self.expect_name()?;
        if self.eat_kw("WHERE") {
            stmt.filter = Some(self.parse_expr()?);
        }
        if self.eat_kw("GROUP") {
            self.expect_kw("BY")?;
            stmt.group_by.push(self.parse_expr()?);
            while self.eat_symbol(',') {
                stmt.group_by.push(self.parse_expr()?);
            }
        }
        if self.eat_kw("HAVING") {
            stmt.having = Some(self.parse_expr()?);
        }
        if self.eat_kw("ORDER") {
            self.expect_kw("BY")?;
            stmt.order_by = self.parse_order_items()?;
        }
        if self.eat_kw("LIMIT") {
            stmt.limit = Some(self.expect_count("LIMIT")?);
        }
        if self.eat_kw("OFFSET") {
            stmt.offset = Some(self.expect_count("OFFSET")?);
        }
        Ok(stmt)
    }

    fn parse_select_items(&mut self) -> Result<Vec<SelectItem>> {
        let mut items = vec![self.parse_select_item()?];
        while self.eat_symbol(',') {
            items.push(self.parse_select_item()?);
        }
        Ok(items)
    }

    fn parse_select_item(&mut self) -> Result<SelectItem> {
        if let Some(prefix) = self.peek_wildcard() {
            return self.parse_wildcard(prefix);
        }
        let start = self.cur_start();
        let expr = self.parse_expr()?;
        let surface = self.surface_since(start);
        let alias = if self.eat_kw("AS") {
            Some(self.expect_name()?)
        } else {
            None
        };
        Ok(SelectItem::Expr {
            expr,
            alias,
            surface,
        })
    }

    /// Recognises `*` or `ident*` in select-item position.
    fn peek_wildcard(&self) -> Option<String> {
        match self.toks.get(self.i) {
            Some(s) if s.tok == Token::Symbol('*') => Some(String::new()),
            Some(Spanned {
                tok: Token::Ident(name) | Token::QuotedIdent(name),
                end,
                ..
            }) => match self.toks.get(self.i + 1) {
                Some(star) if star.tok == Token::Symbol('*') && star.start == *end => {
                    if self.ends_item(self.i + 2) {
                        Some(name.clone())
                    } else {
                        None
                    }
                }
                _ => None,
            },
            _ => None,
        }
    }

    fn ends_item(&self, idx: usize) -> bool {
        match self.toks.get(idx).map(|s| &s.tok) {
            None => true,
            Some(Token::Symbol(',' | ')' | '}' | ';')) => true,
            Some(Token::Ident(word)) => CLAUSE_KEYWORDS
                .iter()
                .any(|kw| word.eq_ignore_ascii_case(kw)),
            _ => false,
        }
    }

    fn parse_wildcard(&mut self, prefix: String) -> Result<SelectItem> {
        self.i += if prefix.is_empty() { 1 } else { 2 };
        let mut rename = None;
        let mut exclusions = Vec::new();
        loop {
            if self.eat_kw("AS") {
                match self.peek_wildcard() {
                    Some(new_prefix) if !new_prefix.is_empty() => {
                        self.i += 2;
                        rename = Some(new_prefix);
                    }
                    _ => {
                        return Err(CellDbError::SqlParse(
                            "wildcard alias must have the form prefix*".to_string(),
                        ))
                    }
                }
            } else if self.eat_kw("EXCLUDING") {
                if self.eat_symbol('(') {
                    exclusions.push(self.parse_exclusion()?);
                    while self.eat_symbol(',') {
                        exclusions.push(self.parse_exclusion()?);
                    }
                    self.expect_symbol(')')?;
                } else {
                    exclusions.push(self.parse_exclusion()?);
                }
            } else {
                break;
            }
        }
        Ok(SelectItem::Wildcard {
            prefix,
            rename,
            exclusions,
        })
    }

    fn parse_exclusion(&mut self) -> Result<Exclusion> {
        let name_end = self.toks.get(self.i).map(|s| s.end);
        let name = self.expect_name()?;
        match self.toks.get(self.i) {
            Some(star) if star.tok == Token::Symbol('*') && Some(star.start) == name_end => {
                self.i += 1;
                Ok(Exclusion::Prefix(name))
            }
            _ => Ok(Exclusion::Column(name)),
        }
    }

    fn parse_order_items(&mut self) -> Result<Vec<OrderByItem>> {
        let mut items = Vec::new();
        loop {
            let expr = self.parse_expr()?;
            let direction = if self.eat_kw("DESC") {
                OrderDirection::Desc
            } else {
                self.eat_kw("ASC");
                OrderDirection::Asc
            };
            items.push(OrderByItem { expr, direction });
            if !self.eat_symbol(',') {
                break;
            }
        }
        Ok(items)
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_kw("OR") {
            let right = self.parse_and()?;
            left = binop(left, BinOperator::Or, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.eat_kw("AND") {
            let right = self.parse_not()?;
            left = binop(left, BinOperator::And, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat_kw("NOT") {
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<Expr> {
        let left = self.parse_additive()?;

        if let Some(op) = self.peek_comparison() {
            self.i += 1;
            let right = self.parse_additive()?;
            return Ok(binop(left, op, right));
        }

        if self.eat_kw("IS") {
            let negated = self.eat_kw("NOT");
            let word = self.expect_ident()?;
            let check = match word.to_ascii_uppercase().as_str() {
                "NULL" => IsCheck::Null,
                "TRUE" => IsCheck::True,
                "FALSE" => IsCheck::False,
                "STRING" => IsCheck::String,
                "NUMBER" => IsCheck::Number,
                "INTEGER" => IsCheck::Integer,
                other => {
                    return Err(CellDbError::SqlParse(format!(
                        "unsupported IS check {other}"
                    )))
                }
            };
            return Ok(Expr::Is {
                expr: Box::new(left),
                check,
                negated,
            });
        }

        let negated = self.peek_kw("NOT")
            && ["BETWEEN", "IN", "LIKE"]
                .iter()
                .any(|kw| self.peek_kw_at(self.i + 1, kw));
        if negated {
            self.i += 1;
        }

        if self.eat_kw("BETWEEN") {
            let low = self.parse_additive()?;
            self.expect_kw("AND")?;
            let high = self.parse_additive()?;
            return Ok(Expr::Between {
                expr: Box::new(left),
                low: Box::new(low),
                high: Box::new(high),
                negated,
            });
        }
        if self.eat_kw("IN") {
            self.expect_symbol('(')?;
            let mut list = vec![self.parse_expr()?];
            while self.eat_symbol(',') {
                list.push(self.parse_expr()?);
            }
            self.expect_symbol(')')?;
            return Ok(Expr::InList {
                expr: Box::new(left),
                list,
                negated,
            });
        }
        if self.eat_kw("LIKE") {
            let pattern = self.parse_additive()?;
            let like = binop(left, BinOperator::Like, pattern);
            return Ok(if negated {
                Expr::Not(Box::new(like))
            } else {
                like
            });
        }
        Ok(left)
    }

    fn peek_comparison(&self) -> Option<BinOperator> {
        match self.toks.get(self.i).map(|s| &s.tok) {
            Some(Token::Symbol('=')) => Some(BinOperator::Eq),
            Some(Token::Symbol('<')) => Some(BinOperator::Lt),
            Some(Token::Symbol('>')) => Some(BinOperator::Gt),
            Some(Token::Op("<=")) => Some(BinOperator::LtEq),
            Some(Token::Op(">=")) => Some(BinOperator::GtEq),
            Some(Token::Op("!=" | "<>")) => Some(BinOperator::NotEq),
            _ => None,
        }
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.eat_symbol('+') {
                BinOperator::Add
            } else if self.eat_symbol('-') {
                BinOperator::Sub
            } else {
                break;
            };
            let right = self.parse_multiplicative()?;
            left = binop(left, op, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat_symbol('*') {
                BinOperator::Mul
            } else if self.eat_symbol('/') {
                BinOperator::Div
            } else if self.eat_symbol('%') {
                BinOperator::Mod
            } else {
                break;
            };
            let right = self.parse_unary()?;
            left = binop(left, op, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat_symbol('-') {
            let inner = self.parse_unary()?;
            return Ok(match inner {
                Expr::Literal(CellValue::Integer(n)) => Expr::Literal(CellValue::Integer(-n)),
                Expr::Literal(CellValue::Number(n)) => Expr::Literal(CellValue::Number(-n)),
                other => Expr::Negate(Box::new(other)),
            });
        }
        if self.eat_symbol('+') {
            return self.parse_unary();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let Some(spanned) = self.toks.get(self.i).cloned() else {
            return Err(CellDbError::SqlParse(
                "unexpected end of expression".to_string(),
            ));
        };
        match spanned.tok {
            Token::Integer(n) => {
                self.i += 1;
                Ok(Expr::Literal(CellValue::Integer(n)))
            }
            Token::Float(f) => {
                self.i += 1;
                Ok(Expr::Literal(CellValue::Number(f)))
            }
            Token::StringLit(s) => {
                self.i += 1;
                Ok(Expr::Literal(CellValue::Text(s)))
            }
            Token::QuotedIdent(name) => {
                self.i += 1;
                Ok(Expr::Column(name))
            }
            Token::Symbol('(') => {
                self.i += 1;
                let inner = self.parse_expr()?;
                self.expect_symbol(')')?;
                Ok(inner)
            }
            Token::Symbol('{') => {
                self.i += 1;
                if self.eat_symbol('}') {
                    return Ok(Expr::Record(Vec::new()));
                }
                let items = self.parse_select_items()?;
                self.expect_symbol('}')?;
                Ok(Expr::Record(items))
            }
            Token::Ident(word) => {
                self.i += 1;
                let upper = word.to_ascii_uppercase();
                match upper.as_str() {
                    "TRUE" => return Ok(Expr::Literal(CellValue::Bool(true))),
                    "FALSE" => return Ok(Expr::Literal(CellValue::Bool(false))),
                    "NULL" => return Ok(Expr::Literal(CellValue::Null)),
                    "CASE" => return self.parse_case(),
                    "CAST" if self.peek_symbol('(') => return self.parse_cast(),
                    _ => {}
                }
                if self.peek_symbol('(') {
                    return self.parse_function(word);
                }
                Ok(Expr::Column(word))
            }
            other => Err(CellDbError::SqlParse(format!(
                "unexpected token {} in expression",
                describe(&other)
            ))),
        }
    }

    fn parse_function(&mut self, name: String) -> Result<Expr> {
        self.expect_symbol('(')?;
        let mut args = Vec::new();
        if !self.eat_symbol(')') {
            loop {
                args.push(self.parse_function_arg()?);
                if !self.eat_symbol(',') {
                    break;
                }
            }
            self.expect_symbol(')')?;
        }
        let extract = if self.eat_symbol('[') {
            let col = match self.toks.get(self.i).map(|s| s.tok.clone()) {
                Some(Token::StringLit(s)) => {
                    self.i += 1;
                    s
                }
                _ => self.expect_name()?,
            };
            self.expect_symbol(']')?;
            Some(col)
        } else {
            None
        };
        Ok(Expr::Function {
            name,
            args,
            extract,
        })
    }

    fn parse_function_arg(&mut self) -> Result<FunctionArg> {
        let start = self.cur_start();
        let star_alone = self.peek_symbol('*')
            && matches!(
                self.toks.get(self.i + 1).map(|s| &s.tok),
                Some(Token::Symbol(')' | ','))
            );
        let expr = if star_alone {
            self.i += 1;
            Expr::Star
        } else {
            self.parse_expr()?
        };
        let surface = self.surface_since(start);
        let alias = if self.eat_kw("AS") {
            Some(self.expect_name()?)
        } else {
            None
        };
        Ok(FunctionArg {
            expr,
            alias,
            surface,
        })
    }

    fn parse_case(&mut self) -> Result<Expr> {
        let operand = if self.peek_kw("WHEN") {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        let mut when_clauses = Vec::new();
        while self.eat_kw("WHEN") {
            let cond = self.parse_expr()?;
            self.expect_kw("THEN")?;
            let result = self.parse_expr()?;
            when_clauses.push((cond, result));
        }
        if when_clauses.is_empty() {
            return Err(CellDbError::SqlParse(
                "CASE requires at least one WHEN".to_string(),
            ));
        }
        let else_clause = if self.eat_kw("ELSE") {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        self.expect_kw("END")?;
        Ok(Expr::Case {
            operand,
            when_clauses,
            else_clause,
        })
    }

    fn parse_cast(&mut self) -> Result<Expr> {
        self.expect_symbol('(')?;
        let expr = self.parse_expr()?;
        self.expect_kw("AS")?;
        let target = match self.expect_ident()?.to_ascii_uppercase().as_str() {
            "INTEGER" | "INT" => CastType::Integer,
            "NUMBER" | "REAL" | "FLOAT" | "DOUBLE" => CastType::Number,
            "STRING" | "TEXT" | "VARCHAR" => CastType::String,
            "BOOLEAN" | "BOOL" => CastType::Boolean,
            other => {
                return Err(CellDbError::SqlParse(format!(
                    "unsupported CAST target type: {other}"
                )))
            }
        };
        self.expect_symbol(')')?;
        Ok(Expr::Cast {
            expr: Box::new(expr),
            target,
        })
    }

    fn cur_start(&self) -> usize {
        self.toks
            .get(self.i)
            .map(|s| s.start)
            .unwrap_or(self.src.len())
    }

    fn surface_since(&self, start: usize) -> String {
        let end = self
            .i
            .checked_sub(1)
            .and_then(|idx| self.toks.get(idx))
            .map(|s| s.end)
            .unwrap_or(start);
        self.src
            .get(start..end.max(start))
            .unwrap_or_default()
            .trim()
            .to_string()
    }

    fn peek_kw(&self, kw: &str) -> bool {
        self.peek_kw_at(self.i, kw)
    }

    fn peek_kw_at(&self, idx: usize, kw: &str) -> bool {
        matches!(self.toks.get(idx), Some(Spanned { tok: Token::Ident(w), .. }) if w.eq_ignore_ascii_case(kw))
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.peek_kw(kw) {
            self.i += 1;
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> Result<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(CellDbError::SqlParse(format!("expected keyword {kw}")))
        }
    }

    fn peek_symbol(&self, symbol: char) -> bool {
        matches!(self.toks.get(self.i), Some(s) if s.tok == Token::Symbol(symbol))
    }

    fn eat_symbol(&mut self, symbol: char) -> bool {
        if self.peek_symbol(symbol) {
            self.i += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: char) -> Result<()> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            Err(CellDbError::SqlParse(format!("expected symbol {symbol}")))
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.toks.get(self.i).map(|s| &s.tok) {
            Some(Token::Ident(v)) => {
                let out = v.clone();
                self.i += 1;
                Ok(out)
            }
            _ => Err(CellDbError::SqlParse("expected identifier".to_string())),
        }
    }

    /// Plain or quoted identifier.
    fn expect_name(&mut self) -> Result<String> {
        match self.toks.get(self.i).map(|s| &s.tok) {
            Some(Token::Ident(v) | Token::QuotedIdent(v)) => {
                let out = v.clone();
                self.i += 1;
                Ok(out)
            }
            _ => Err(CellDbError::SqlParse("expected identifier".to_string())),
        }
    }

    fn expect_count(&mut self, clause: &str) -> Result<usize> {
        match self.toks.get(self.i).map(|s| &s.tok) {
            Some(Token::Integer(n)) if *n >= 0 => {
                let n = usize::try_from(*n)
                    .map_err(|_| CellDbError::SqlParse(format!("{clause} is too large")))?;
                self.i += 1;
                Ok(n)
            }
            _ => Err(CellDbError::SqlParse(format!(
                "{clause} expects a non-negative integer"
            ))),
        }
    }

    fn expect_end(&self) -> Result<()> {
        match self.toks.get(self.i) {
            None => Ok(()),
            Some(s) => Err(CellDbError::SqlParse(format!(
                "unexpected trailing input at '{}'",
                self.src.get(s.start..).unwrap_or_default()
            ))),
        }
    }
}

fn binop(left: Expr, op: BinOperator, right: Expr) -> Expr {
    Expr::BinOp {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

fn describe(tok: &Token) -> String {
    match tok {
        Token::Ident(s) => s.clone(),
        Token::QuotedIdent(s) => format!("\"{s}\""),
        Token::Integer(n) => n.to_string(),
        Token::Float(f) => f.to_string(),
        Token::StringLit(s) => format!("'{s}'"),
        Token::Symbol(c) => c.to_string(),
        Token::Op(op) => op.to_string(),
    }
}

fn tokenize(input: &str) -> Result<Vec<Spanned>> {
    let mut out = Vec::new();
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let at = |i: usize| chars.get(i).map(|(_, c)| *c);
    let offset = |i: usize| chars.get(i).map(|(o, _)| *o).unwrap_or(input.len());
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i].1;
        let start = offset(i);
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if let Some(op) = ["<=", ">=", "<>", "!="]
            .into_iter()
            .find(|op| input[start..].starts_with(op))
        {
            i += 2;
            out.push(Spanned {
                tok: Token::Op(op),
                start,
                end: offset(i),
            });
            continue;
        }
        if "(),;=*+-/%<>{}[]".contains(c) {
            i += 1;
            out.push(Spanned {
                tok: Token::Symbol(c),
                start,
                end: offset(i),
            });
            continue;
        }
        if c == '\'' || c == '"' || c == '`' {
            let quote = c;
            i += 1;
            let mut s = String::new();
            let mut closed = false;
            while let Some(ch) = at(i) {
                if ch == quote {
                    if at(i + 1) == Some(quote) {
                        s.push(quote);
                        i += 2;
                        continue;
                    }
                    i += 1;
                    closed = true;
                    break;
                }
                s.push(ch);
                i += 1;
            }
            if !closed {
                return Err(CellDbError::SqlParse(format!(
                    "unterminated quoted text starting at {start}"
                )));
            }
            let tok = if quote == '\'' {
                Token::StringLit(s)
            } else {
                Token::QuotedIdent(s)
            };
            out.push(Spanned {
                tok,
                start,
                end: offset(i),
            });
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && at(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            i += 1;
            let mut is_float = c == '.';
            while let Some(ch) = at(i) {
                if ch.is_ascii_digit() {
                    i += 1;
                } else if ch == '.' && !is_float {
                    is_float = true;
                    i += 1;
                } else if (ch == 'e' || ch == 'E')
                    && (at(i + 1).is_some_and(|d| d.is_ascii_digit())
                        || (matches!(at(i + 1), Some('+' | '-'))
                            && at(i + 2).is_some_and(|d| d.is_ascii_digit())))
                {
                    is_float = true;
                    i += 2;
                } else {
                    break;
                }
            }
            let text = &input[start..offset(i)];
            let tok = if is_float {
                Token::Float(
                    text.parse()
                        .map_err(|_| CellDbError::SqlParse(format!("invalid number {text}")))?,
                )
            } else {
                match text.parse::<i64>() {
                    Ok(n) => Token::Integer(n),
                    Err(_) => Token::Float(
                        text.parse()
                            .map_err(|_| CellDbError::SqlParse(format!("invalid number {text}")))?,
                    ),
                }
            };
            out.push(Spanned {
                tok,
                start,
                end: offset(i),
            });
            continue;
        }
        if c.is_alphabetic() || c == '_' || c == '$' {
            i += 1;
            while let Some(ch) = at(i) {
                if ch.is_alphanumeric() || ch == '_' || ch == '.' || ch == '$' {
                    i += 1;
                } else {
                    break;
                }
            }
            out.push(Spanned {
                tok: Token::Ident(input[start..offset(i)].to_string()),
                start,
                end: offset(i),
            });
            continue;
        }

        return Err(CellDbError::SqlParse(format!("unexpected character {c}")));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str) -> Box<Expr> {
        Box::new(Expr::Column(name.to_string()))
    }

    fn int(n: i64) -> Box<Expr> {
        Box::new(Expr::Literal(CellValue::Integer(n)))
    }

    #[test]
    fn parses_arithmetic_with_precedence() {
        let expr = parse_expression("x + y * 10").unwrap();
        assert_eq!(
            expr,
            Expr::BinOp {
                left: col("x"),
                op: BinOperator::Add,
                right: Box::new(Expr::BinOp {
                    left: col("y"),
                    op: BinOperator::Mul,
                    right: int(10),
                }),
            }
        );
    }

    #[test]
    fn parses_select_list_with_aliases_and_surface_names() {
        let items = parse_select_list("x, y, x * 10 AS z, y+6").unwrap();
        let names: Vec<&str> = items.iter().filter_map(|i| i.output_name()).collect();
        assert_eq!(names, vec!["x", "y", "z", "y+6"]);
    }

    #[test]
    fn parses_row_name_concatenation() {
        let expr = parse_expression("rowName() + '_transformed'").unwrap();
        assert_eq!(
            expr,
            Expr::BinOp {
                left: Box::new(Expr::Function {
                    name: "rowName".to_string(),
                    args: vec![],
                    extract: None,
                }),
                op: BinOperator::Add,
                right: Box::new(Expr::Literal(CellValue::Text("_transformed".to_string()))),
            }
        );
    }

    #[test]
    fn parses_wildcards_with_exclusions_and_rename() {
        let items = parse_select_list("* EXCLUDING (adventuretime, tmp*)").unwrap();
        assert_eq!(
            items,
            vec![SelectItem::Wildcard {
                prefix: String::new(),
                rename: None,
                exclusions: vec![
                    Exclusion::Column("adventuretime".to_string()),
                    Exclusion::Prefix("tmp".to_string()),
                ],
            }]
        );

        let items = parse_select_list("svd* AS emb* EXCLUDING adventuretime").unwrap();
        assert_eq!(
            items,
            vec![SelectItem::Wildcard {
                prefix: "svd".to_string(),
                rename: Some("emb".to_string()),
                exclusions: vec![Exclusion::Column("adventuretime".to_string())],
            }]
        );
    }

    #[test]
    fn multiplication_is_not_a_wildcard() {
        let items = parse_select_list("x*2, x * y").unwrap();
        assert!(items
            .iter()
            .all(|item| matches!(item, SelectItem::Expr { .. })));
    }

    #[test]
    fn parses_function_call_with_record_and_extract() {
        let expr =
            parse_expression("classifier({{ * EXCLUDING (adventuretime)} AS features})[score]")
                .unwrap();
        let Expr::Function {
            name,
            args,
            extract,
        } = expr
        else {
            panic!("expected function call");
        };
        assert_eq!(name, "classifier");
        assert_eq!(extract.as_deref(), Some("score"));
        assert_eq!(args.len(), 1);
        let Expr::Record(items) = &args[0].expr else {
            panic!("expected record argument");
        };
        match &items[0] {
            SelectItem::Expr {
                expr: Expr::Record(inner),
                alias,
                ..
            } => {
                assert_eq!(alias.as_deref(), Some("features"));
                assert!(matches!(inner[0], SelectItem::Wildcard { .. }));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_predicates() {
        assert_eq!(
            parse_expression("adventuretime IS NOT NULL").unwrap(),
            Expr::Is {
                expr: col("adventuretime"),
                check: IsCheck::Null,
                negated: true,
            }
        );
        assert_eq!(
            parse_expression("rowHash() % 4 = 1").unwrap(),
            Expr::BinOp {
                left: Box::new(Expr::BinOp {
                    left: Box::new(Expr::Function {
                        name: "rowHash".to_string(),
                        args: vec![],
                        extract: None,
                    }),
                    op: BinOperator::Mod,
                    right: int(4),
                }),
                op: BinOperator::Eq,
                right: int(1),
            }
        );
        assert!(matches!(
            parse_expression("x NOT BETWEEN 1 AND 3").unwrap(),
            Expr::Between { negated: true, .. }
        ));
        assert!(matches!(
            parse_expression("label NOT IN ('cat', 'dog')").unwrap(),
            Expr::InList { negated: true, .. }
        ));
        assert!(matches!(
            parse_expression("NOT x > 1 AND y <= 2").unwrap(),
            Expr::BinOp {
                op: BinOperator::And,
                ..
            }
        ));
    }

    #[test]
    fn parses_count_star() {
        let expr = parse_expression("count(*)").unwrap();
        match expr {
            Expr::Function { name, args, .. } => {
                assert_eq!(name, "count");
                assert_eq!(args[0].expr, Expr::Star);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_select_statement() {
        let stmt = parse_sql(
            "SELECT label, count(*) AS n NAMED label FROM test WHERE x > 0 \
             GROUP BY label HAVING count(*) > 1 ORDER BY n DESC, label LIMIT 5 OFFSET 1;",
        )
        .unwrap();
        assert_eq!(stmt.from, "test");
        assert_eq!(stmt.items.len(), 2);
        assert_eq!(stmt.named, Some(Expr::Column("label".to_string())));
        assert_eq!(stmt.group_by, vec![Expr::Column("label".to_string())]);
        assert!(stmt.having.is_some());
        assert_eq!(stmt.order_by.len(), 2);
        assert_eq!(stmt.order_by[0].direction, OrderDirection::Desc);
        assert_eq!(stmt.order_by[1].direction, OrderDirection::Asc);
        assert_eq!(stmt.limit, Some(5));
        assert_eq!(stmt.offset, Some(1));
    }

    #[test]
    fn parses_quoted_identifiers_and_escapes() {
        assert_eq!(
            parse_expression("\"odd name\"").unwrap(),
            Expr::Column("odd name".to_string())
        );
        assert_eq!(
            parse_expression("'it''s'").unwrap(),
            Expr::Literal(CellValue::Text("it's".to_string()))
        );
        assert_eq!(
            parse_expression("-2.5e1").unwrap(),
            Expr::Literal(CellValue::Number(-25.0))
        );
    }

    #[test]
    fn rejects_malformed_input() {
        let err = parse_expression("x +").unwrap_err();
        assert!(format!("{err}").contains("unexpected end"));
        assert!(parse_expression("'open").is_err());
        assert!(parse_select_list("x y").is_err());
        assert!(parse_sql("SELECT x FROM t LIMIT -1").is_err());
    }
}
