use once_cell::sync::Lazy;
use sqlparser::ast::{
    BinaryOperator, CastKind, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, LimitClause,
    Query, Select, SelectFlavor, SelectItem, SetExpr, Spanned, Statement, TableFactor,
    TableWithJoins, UnaryOperator, Value, WildcardAdditionalOptions,
};
use sqlparser::tokenizer::Span;
use std::collections::HashSet;
use std::fmt;

use crate::api::middleware::{AppError, Position};
use crate::models::{ScalarType, TypeFamily};
use crate::parse::{ParsedStatement, SqlStatement};

/// Syntax kinds the walker classifies nodes into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlKind {
    Plus,
    Minus,
    Times,
    Divide,
    Mod,
    PlusPrefix,
    MinusPrefix,
    And,
    Or,
    Not,
    IsNull,
    IsNotNull,
    IsFalse,
    IsNotFalse,
    IsTrue,
    IsNotTrue,
    Equals,
    NotEquals,
    LessThan,
    GreaterThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Exists,
    Some,
    All,
    In,
    NotIn,
    Sum,
    Count,
    Min,
    Max,
    Avg,
    SingleValue,
    As,
    Between,
    Case,
    Cast,
    Ceil,
    Descending,
    Extract,
    Floor,
    Like,
    Position,
    TimestampAdd,
    Row,
    Values,
    Insert,
    CollectionTable,
    ArgumentAssignment,
    CreateMapping,
    DropMapping,
    CreateJob,
    AlterJob,
    DropJob,
    CreateSnapshot,
    DropSnapshot,
    ColumnDecl,
    Option,
    // Recognised, never allowed
    Limit,
    Offset,
    Fetch,
    With,
    Join,
    Over,
    ILike,
    SimilarTo,
    TryCast,
}

impl SqlKind {
    pub fn name(&self) -> &'static str {
        match self {
            SqlKind::Plus => "+",
            SqlKind::Minus => "-",
            SqlKind::Times => "*",
            SqlKind::Divide => "/",
            SqlKind::Mod => "%",
            SqlKind::PlusPrefix => "+",
            SqlKind::MinusPrefix => "-",
            SqlKind::And => "AND",
            SqlKind::Or => "OR",
            SqlKind::Not => "NOT",
            SqlKind::IsNull => "IS NULL",
            SqlKind::IsNotNull => "IS NOT NULL",
            SqlKind::IsFalse => "IS FALSE",
            SqlKind::IsNotFalse => "IS NOT FALSE",
            SqlKind::IsTrue => "IS TRUE",
            SqlKind::IsNotTrue => "IS NOT TRUE",
            SqlKind::Equals => "=",
            SqlKind::NotEquals => "<>",
            SqlKind::LessThan => "<",
            SqlKind::GreaterThan => ">",
            SqlKind::GreaterThanOrEqual => ">=",
            SqlKind::LessThanOrEqual => "<=",
            SqlKind::Exists => "EXISTS",
            SqlKind::Some => "SOME",
            SqlKind::All => "ALL",
            SqlKind::In => "IN",
            SqlKind::NotIn => "NOT IN",
            SqlKind::Sum => "SUM",
            SqlKind::Count => "COUNT",
            SqlKind::Min => "MIN",
            SqlKind::Max => "MAX",
            SqlKind::Avg => "AVG",
            SqlKind::SingleValue => "SINGLE_VALUE",
            SqlKind::As => "AS",
            SqlKind::Between => "BETWEEN",
            SqlKind::Case => "CASE",
            SqlKind::Cast => "CAST",
            SqlKind::Ceil => "CEIL",
            SqlKind::Descending => "DESC",
            SqlKind::Extract => "EXTRACT",
            SqlKind::Floor => "FLOOR",
            SqlKind::Like => "LIKE",
            SqlKind::Position => "POSITION",
            SqlKind::TimestampAdd => "TIMESTAMPADD",
            SqlKind::Row => "ROW",
            SqlKind::Values => "VALUES",
            SqlKind::Insert => "INSERT",
            SqlKind::CollectionTable => "TABLE",
            SqlKind::ArgumentAssignment => "=>",
            SqlKind::CreateMapping => "CREATE MAPPING",
            SqlKind::DropMapping => "DROP MAPPING",
            SqlKind::CreateJob => "CREATE JOB",
            SqlKind::AlterJob => "ALTER JOB",
            SqlKind::DropJob => "DROP JOB",
            SqlKind::CreateSnapshot => "CREATE SNAPSHOT",
            SqlKind::DropSnapshot => "DROP SNAPSHOT",
            SqlKind::ColumnDecl => "COLUMN",
            SqlKind::Option => "OPTIONS",
            SqlKind::Limit => "LIMIT",
            SqlKind::Offset => "OFFSET",
            SqlKind::Fetch => "FETCH",
            SqlKind::With => "WITH",
            SqlKind::Join => "JOIN",
            SqlKind::Over => "OVER",
            SqlKind::ILike => "ILIKE",
            SqlKind::SimilarTo => "SIMILAR TO",
            SqlKind::TryCast => "TRY_CAST",
        }
    }
}

/// Syntax kinds accepted anywhere in a statement
pub static SUPPORTED_KINDS: Lazy<HashSet<SqlKind>> = Lazy::new(|| {
    use SqlKind::*;
    [
        // arithmetic
        Plus, Minus, Times, Divide, Mod, PlusPrefix, MinusPrefix,
        // boolean
        And, Or, Not,
        // IS predicates
        IsNull, IsNotNull, IsFalse, IsNotFalse, IsTrue, IsNotTrue,
        // comparisons
        Equals, NotEquals, LessThan, GreaterThan, GreaterThanOrEqual, LessThanOrEqual,
        // subquery forms
        Exists, Some, All, In, NotIn,
        // aggregates
        Sum, Count, Min, Max, Avg, SingleValue,
        // miscellaneous
        As, Between, Case, Cast, Ceil, Descending, Extract, Floor, Like, Position, TimestampAdd,
        // DML
        Row, Values, Insert, CollectionTable, ArgumentAssignment,
        // DDL
        CreateMapping, DropMapping, CreateJob, AlterJob, DropJob, CreateSnapshot, DropSnapshot,
        ColumnDecl, Option,
    ]
    .into_iter()
    .collect()
});

/// Named functions and operators accepted in calls
pub static SUPPORTED_OPERATORS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // string concatenation
        "CONCAT",
        // math
        "COS", "SIN", "TAN", "COT", "ACOS", "ASIN", "ATAN", "ATAN2", "SQRT", "EXP", "LN", "LOG10",
        "RAND", "ABS", "PI", "SIGN", "POWER", "DEGREES", "RADIANS", "ROUND", "TRUNCATE",
        // strings
        "ASCII", "INITCAP", "CHAR_LENGTH", "CHARACTER_LENGTH", "LENGTH", "LOWER", "UPPER",
        "SUBSTRING",
        // dates
        "CURRENT_DATE", "CURRENT_TIMESTAMP", "LOCALTIMESTAMP", "LOCALTIME",
        // extensions
        "FILE",
    ]
    .into_iter()
    .collect()
});

/// Dialect validator: walks the whole statement and rejects anything that is
/// not explicitly supported
pub struct SqlValidator;

impl SqlValidator {
    pub fn validate(parsed: &ParsedStatement) -> Result<(), AppError> {
        let mut walker = Walker {
            fallback: parsed.position,
        };
        match &parsed.statement {
            SqlStatement::CreateMapping { columns, options, .. } => {
                walker.require(SqlKind::CreateMapping, None)?;
                if !columns.is_empty() {
                    walker.require(SqlKind::ColumnDecl, None)?;
                }
                if !options.is_empty() {
                    walker.require(SqlKind::Option, None)?;
                }
                Ok(())
            }
            SqlStatement::DropMapping { .. } => walker.require(SqlKind::DropMapping, None),
            SqlStatement::CreateJob { insert, .. } => {
                walker.require(SqlKind::CreateJob, None)?;
                walker.statement(insert)
            }
            SqlStatement::AlterJob { .. } => walker.require(SqlKind::AlterJob, None),
            SqlStatement::DropJob { .. } => walker.require(SqlKind::DropJob, None),
            SqlStatement::CreateSnapshot { .. } => walker.require(SqlKind::CreateSnapshot, None),
            SqlStatement::DropSnapshot { .. } => walker.require(SqlKind::DropSnapshot, None),
            SqlStatement::Standard(statement) => walker.statement(statement),
        }
    }
}

struct Walker {
    fallback: Position,
}

impl Walker {
    fn position(&self, span: Option<Span>) -> Position {
        match span {
            Some(span) if span.start.line > 0 => Position::new(span.start.line, span.start.column),
            _ => self.fallback,
        }
    }

    fn reject(&self, name: impl fmt::Display, span: Option<Span>) -> Result<(), AppError> {
        Err(AppError::unsupported(name, self.position(span)))
    }

    fn require(&self, kind: SqlKind, span: Option<Span>) -> Result<(), AppError> {
        if SUPPORTED_KINDS.contains(&kind) {
            Ok(())
        } else {
            self.reject(kind.name(), span)
        }
    }

    fn statement(&mut self, statement: &Statement) -> Result<(), AppError> {
        match statement {
            Statement::Query(query) => self.query(query),
            Statement::Insert(insert) => {
                self.require(SqlKind::Insert, None)?;
                if insert.on.is_some() {
                    return self.reject("ON CONFLICT", None);
                }
                if insert.returning.is_some() {
                    return self.reject("RETURNING", None);
                }
                if insert.overwrite {
                    return self.reject("OVERWRITE", None);
                }
                match &insert.source {
                    Some(source) => self.query(source),
                    None => self.reject("INSERT without a source", None),
                }
            }
            other => self.reject(node_name(other), Some(other.span())),
        }
    }

    fn query(&mut self, query: &Query) -> Result<(), AppError> {
        let Query {
            with,
            body,
            order_by: _,
            limit_clause,
            fetch,
            locks,
            for_clause,
            settings,
            format_clause,
            pipe_operators,
        } = query;
        let span = Some(query.span());
        if with.is_some() {
            return self.require(SqlKind::With, span);
        }
        if let Some(limit_clause) = limit_clause {
            match limit_clause {
                LimitClause::LimitOffset { limit, offset, .. } => {
                    if let Some(limit) = limit {
                        return self.require(SqlKind::Limit, Some(limit.span()));
                    }
                    if let Some(offset) = offset {
                        return self.require(SqlKind::Offset, Some(offset.value.span()));
                    }
                    return self.require(SqlKind::Limit, span);
                }
                LimitClause::OffsetCommaLimit { limit, .. } => {
                    return self.require(SqlKind::Limit, Some(limit.span()));
                }
            }
        }
        if fetch.is_some() {
            return self.require(SqlKind::Fetch, span);
        }
        if !locks.is_empty() {
            return self.reject("FOR UPDATE", span);
        }
        if for_clause.is_some() {
            return self.reject("FOR", span);
        }
        if settings.is_some() {
            return self.reject("SETTINGS", span);
        }
        if format_clause.is_some() {
            return self.reject("FORMAT", span);
        }
        if !pipe_operators.is_empty() {
            return self.reject("|>", span);
        }
        // ORDER BY is accepted structurally and not checked further
        self.set_expr(body)
    }

    fn set_expr(&mut self, body: &SetExpr) -> Result<(), AppError> {
        match body {
            SetExpr::Select(select) => self.select(select),
            SetExpr::Query(query) => self.query(query),
            SetExpr::Values(values) => {
                self.require(SqlKind::Values, None)?;
                for row in &values.rows {
                    self.require(SqlKind::Row, None)?;
                    for expr in row {
                        self.expr(expr)?;
                    }
                }
                Ok(())
            }
            SetExpr::SetOperation { op, .. } => self.reject(op, None),
            other => self.reject(node_name(other), None),
        }
    }

    fn select(&mut self, select: &Select) -> Result<(), AppError> {
        let Select {
            select_token: _,
            distinct: _,
            top,
            top_before_distinct: _,
            projection,
            exclude,
            into,
            from,
            lateral_views,
            prewhere,
            selection,
            group_by: _,
            cluster_by,
            distribute_by,
            sort_by,
            having,
            named_window,
            qualify,
            window_before_qualify: _,
            value_table_mode,
            connect_by,
            flavor,
        } = select;
        let span = Some(select.span());
        if !matches!(flavor, SelectFlavor::Standard) {
            return self.reject("FROM-first SELECT", span);
        }
        if top.is_some() {
            return self.reject("TOP", span);
        }
        if value_table_mode.is_some() {
            return self.reject("SELECT AS VALUE", span);
        }
        for item in projection {
            match item {
                SelectItem::UnnamedExpr(expr) => self.expr(expr)?,
                SelectItem::ExprWithAlias { expr, .. } => {
                    self.require(SqlKind::As, Some(expr.span()))?;
                    self.expr(expr)?;
                }
                SelectItem::Wildcard(options) | SelectItem::QualifiedWildcard(_, options) => {
                    self.wildcard(options, span)?
                }
            }
        }
        if exclude.is_some() {
            return self.reject("EXCLUDE", span);
        }
        if into.is_some() {
            return self.reject("INTO", span);
        }
        for table in from {
            self.table_with_joins(table)?;
        }
        if !lateral_views.is_empty() {
            return self.reject("LATERAL VIEW", span);
        }
        if let Some(prewhere) = prewhere {
            return self.reject("PREWHERE", Some(prewhere.span()));
        }
        if let Some(selection) = selection {
            self.expr(selection)?;
        }
        // GROUP BY is accepted structurally and not checked further
        if let Some(first) = cluster_by.first() {
            return self.reject("CLUSTER BY", Some(first.span()));
        }
        if let Some(first) = distribute_by.first() {
            return self.reject("DISTRIBUTE BY", Some(first.span()));
        }
        if let Some(first) = sort_by.first() {
            return self.reject("SORT BY", Some(first.expr.span()));
        }
        if let Some(having) = having {
            self.expr(having)?;
        }
        if !named_window.is_empty() {
            return self.reject("WINDOW", span);
        }
        if qualify.is_some() {
            return self.reject("QUALIFY", span);
        }
        if connect_by.is_some() {
            return self.reject("CONNECT BY", span);
        }
        Ok(())
    }

    fn wildcard(&self, options: &WildcardAdditionalOptions, span: Option<Span>) -> Result<(), AppError> {
        let WildcardAdditionalOptions {
            wildcard_token: _,
            opt_ilike,
            opt_exclude,
            opt_except,
            opt_replace,
            opt_rename,
        } = options;
        if opt_ilike.is_some() {
            return self.reject("ILIKE", span);
        }
        if opt_exclude.is_some() {
            return self.reject("EXCLUDE", span);
        }
        if opt_except.is_some() {
            return self.reject("EXCEPT", span);
        }
        if opt_replace.is_some() {
            return self.reject("REPLACE", span);
        }
        if opt_rename.is_some() {
            return self.reject("RENAME", span);
        }
        Ok(())
    }

    fn table_with_joins(&mut self, table: &TableWithJoins) -> Result<(), AppError> {
        self.relation(&table.relation)?;
        if let Some(join) = table.joins.first() {
            return self.require(SqlKind::Join, Some(join.relation.span()));
        }
        Ok(())
    }

    fn relation(&mut self, relation: &TableFactor) -> Result<(), AppError> {
        let span = Some(relation.span());
        match relation {
            TableFactor::Table {
                name,
                alias: _,
                args,
                with_hints,
                version,
                with_ordinality,
                partitions,
                json_path,
                sample,
                index_hints,
            } => {
                if sample.is_some() {
                    return self.reject("TABLESAMPLE", span);
                }
                if version.is_some() {
                    return self.reject("FOR SYSTEM_TIME", span);
                }
                if !partitions.is_empty() {
                    return self.reject("PARTITION", span);
                }
                if !with_hints.is_empty() || !index_hints.is_empty() {
                    return self.reject("table hints", span);
                }
                if *with_ordinality {
                    return self.reject("WITH ORDINALITY", span);
                }
                if json_path.is_some() {
                    return self.reject("JSON path", span);
                }
                match args {
                    Some(args) => {
                        self.require(SqlKind::CollectionTable, span)?;
                        self.function_name(&name.to_string(), span)?;
                        for arg in &args.args {
                            self.function_arg(arg)?;
                        }
                        Ok(())
                    }
                    None => Ok(()),
                }
            }
            TableFactor::Derived { subquery, .. } => self.query(subquery),
            TableFactor::TableFunction { expr, .. } => {
                self.require(SqlKind::CollectionTable, span)?;
                self.expr(expr)
            }
            TableFactor::Function { name, args, .. } => {
                self.require(SqlKind::CollectionTable, span)?;
                self.function_name(&name.to_string(), span)?;
                for arg in args {
                    self.function_arg(arg)?;
                }
                Ok(())
            }
            TableFactor::NestedJoin { table_with_joins, .. } => {
                self.table_with_joins(table_with_joins)
            }
            other => self.reject(node_name(other), span),
        }
    }

    fn function_name(&self, name: &str, span: Option<Span>) -> Result<(), AppError> {
        let upper = name.to_ascii_uppercase();
        if let Some(kind) = function_kind(&upper) {
            return self.require(kind, span);
        }
        if SUPPORTED_OPERATORS.contains(upper.as_str()) {
            Ok(())
        } else {
            self.reject(upper, span)
        }
    }

    fn function_arg(&mut self, arg: &FunctionArg) -> Result<(), AppError> {
        let arg = match arg {
            FunctionArg::Named { arg, .. } | FunctionArg::ExprNamed { arg, .. } => {
                self.require(SqlKind::ArgumentAssignment, None)?;
                arg
            }
            FunctionArg::Unnamed(arg) => arg,
        };
        match arg {
            FunctionArgExpr::Expr(expr) => self.expr(expr),
            FunctionArgExpr::QualifiedWildcard(_) | FunctionArgExpr::Wildcard => Ok(()),
        }
    }

    fn expr(&mut self, expr: &Expr) -> Result<(), AppError> {
        let span = Some(expr.span());
        match expr {
            Expr::Identifier(_) | Expr::CompoundIdentifier(_) => Ok(()),
            Expr::Value(value) => self.literal(&value.value, span),
            Expr::TypedString { .. } => self.typed_literal(expr, span),
            // Interval qualifiers are free; the operand is walked
            Expr::Interval(interval) => self.expr(&interval.value),
            Expr::Nested(inner) => self.expr(inner),
            Expr::BinaryOp { left, op, right } => {
                match binary_kind(op) {
                    Some(kind) => self.require(kind, span)?,
                    None if *op == BinaryOperator::StringConcat => {
                        self.function_name("CONCAT", span)?
                    }
                    None => return self.reject(op, span),
                }
                self.expr(left)?;
                self.expr(right)
            }
            Expr::UnaryOp { op, expr: inner } => {
                let kind = match op {
                    UnaryOperator::Plus => SqlKind::PlusPrefix,
                    UnaryOperator::Minus => SqlKind::MinusPrefix,
                    UnaryOperator::Not => SqlKind::Not,
                    other => return self.reject(other, span),
                };
                self.require(kind, span)?;
                self.expr(inner)
            }
            Expr::IsNull(inner) => self.require_then(SqlKind::IsNull, span, inner),
            Expr::IsNotNull(inner) => self.require_then(SqlKind::IsNotNull, span, inner),
            Expr::IsTrue(inner) => self.require_then(SqlKind::IsTrue, span, inner),
            Expr::IsNotTrue(inner) => self.require_then(SqlKind::IsNotTrue, span, inner),
            Expr::IsFalse(inner) => self.require_then(SqlKind::IsFalse, span, inner),
            Expr::IsNotFalse(inner) => self.require_then(SqlKind::IsNotFalse, span, inner),
            Expr::InList { expr: inner, list, negated } => {
                self.require(if *negated { SqlKind::NotIn } else { SqlKind::In }, span)?;
                self.expr(inner)?;
                for item in list {
                    self.expr(item)?;
                }
                Ok(())
            }
            Expr::InSubquery { expr: inner, subquery, negated } => {
                self.require(if *negated { SqlKind::NotIn } else { SqlKind::In }, span)?;
                self.expr(inner)?;
                self.query(subquery)
            }
            Expr::Between { expr: inner, low, high, .. } => {
                self.require(SqlKind::Between, span)?;
                self.expr(inner)?;
                self.expr(low)?;
                self.expr(high)
            }
            Expr::Like { expr: inner, pattern, .. } => {
                self.require(SqlKind::Like, span)?;
                self.expr(inner)?;
                self.expr(pattern)
            }
            Expr::ILike { .. } => self.require(SqlKind::ILike, span),
            Expr::SimilarTo { .. } => self.require(SqlKind::SimilarTo, span),
            Expr::Case { operand, conditions, else_result, .. } => {
                self.require(SqlKind::Case, span)?;
                if let Some(operand) = operand {
                    self.expr(operand)?;
                }
                for when in conditions {
                    self.expr(&when.condition)?;
                    self.expr(&when.result)?;
                }
                if let Some(else_result) = else_result {
                    self.expr(else_result)?;
                }
                Ok(())
            }
            Expr::Cast { kind, expr: inner, data_type, .. } => {
                match kind {
                    CastKind::Cast => self.require(SqlKind::Cast, span)?,
                    CastKind::DoubleColon => return self.reject("::", span),
                    _ => return self.require(SqlKind::TryCast, span),
                }
                if ScalarType::from_data_type(data_type).is_none() {
                    return self.reject(data_type, span);
                }
                self.expr(inner)
            }
            Expr::Extract { expr: inner, .. } => self.require_then(SqlKind::Extract, span, inner),
            Expr::Ceil { expr: inner, .. } => self.require_then(SqlKind::Ceil, span, inner),
            Expr::Floor { expr: inner, .. } => self.require_then(SqlKind::Floor, span, inner),
            Expr::Position { expr: inner, r#in } => {
                self.require(SqlKind::Position, span)?;
                self.expr(inner)?;
                self.expr(r#in)
            }
            Expr::Substring { expr: inner, substring_from, substring_for, .. } => {
                self.function_name("SUBSTRING", span)?;
                self.expr(inner)?;
                if let Some(from) = substring_from {
                    self.expr(from)?;
                }
                if let Some(length) = substring_for {
                    self.expr(length)?;
                }
                Ok(())
            }
            Expr::Exists { subquery, .. } => {
                self.require(SqlKind::Exists, span)?;
                self.query(subquery)
            }
            // Scalar subquery
            Expr::Subquery(query) => self.query(query),
            Expr::AnyOp { left, right, .. } => {
                self.require(SqlKind::Some, span)?;
                self.expr(left)?;
                self.expr(right)
            }
            Expr::AllOp { left, right, .. } => {
                self.require(SqlKind::All, span)?;
                self.expr(left)?;
                self.expr(right)
            }
            Expr::Tuple(items) => {
                self.require(SqlKind::Row, span)?;
                for item in items {
                    self.expr(item)?;
                }
                Ok(())
            }
            Expr::Function(function) => {
                if function.over.is_some() {
                    return self.require(SqlKind::Over, span);
                }
                if function.filter.is_some() {
                    return self.reject("FILTER", span);
                }
                if !function.within_group.is_empty() {
                    return self.reject("WITHIN GROUP", span);
                }
                self.function_name(&function.name.to_string(), span)?;
                match &function.args {
                    FunctionArguments::None => Ok(()),
                    FunctionArguments::Subquery(query) => self.query(query),
                    FunctionArguments::List(list) => {
                        for arg in &list.args {
                            self.function_arg(arg)?;
                        }
                        Ok(())
                    }
                }
            }
            other => self.reject(node_name(other), span),
        }
    }

    fn require_then(&mut self, kind: SqlKind, span: Option<Span>, inner: &Expr) -> Result<(), AppError> {
        self.require(kind, span)?;
        self.expr(inner)
    }

    fn literal(&self, value: &Value, span: Option<Span>) -> Result<(), AppError> {
        match value {
            Value::Number(..)
            | Value::SingleQuotedString(_)
            | Value::Boolean(_)
            | Value::Null
            // dynamic parameter
            | Value::Placeholder(_) => Ok(()),
            Value::HexStringLiteral(_) => self.unsupported_literal("BINARY", span),
            other => self.unsupported_literal(node_name(other), span),
        }
    }

    /// `DATE '...'`, `TIME '...'`, `TIMESTAMP '...'`
    fn typed_literal(&self, expr: &Expr, span: Option<Span>) -> Result<(), AppError> {
        let text = expr.to_string();
        let type_name = text.split('\'').next().unwrap_or_default().trim().to_string();
        let temporal = ScalarType::from_sql_name(&type_name).map(|t| t.family());
        match temporal {
            Some(TypeFamily::Date)
            | Some(TypeFamily::Time)
            | Some(TypeFamily::Timestamp)
            | Some(TypeFamily::TimestampWithTimeZone) => Ok(()),
            _ => self.unsupported_literal(type_name.to_ascii_uppercase(), span),
        }
    }

    fn unsupported_literal(&self, kind: impl fmt::Display, span: Option<Span>) -> Result<(), AppError> {
        Err(AppError::Unsupported {
            message: format!("`{}` literals are not supported", kind),
            position: self.position(span),
        })
    }
}

fn binary_kind(op: &BinaryOperator) -> Option<SqlKind> {
    let kind = match op {
        BinaryOperator::Plus => SqlKind::Plus,
        BinaryOperator::Minus => SqlKind::Minus,
        BinaryOperator::Multiply => SqlKind::Times,
        BinaryOperator::Divide => SqlKind::Divide,
        BinaryOperator::Modulo => SqlKind::Mod,
        BinaryOperator::And => SqlKind::And,
        BinaryOperator::Or => SqlKind::Or,
        BinaryOperator::Eq => SqlKind::Equals,
        BinaryOperator::NotEq => SqlKind::NotEquals,
        BinaryOperator::Lt => SqlKind::LessThan,
        BinaryOperator::Gt => SqlKind::GreaterThan,
        BinaryOperator::LtEq => SqlKind::LessThanOrEqual,
        BinaryOperator::GtEq => SqlKind::GreaterThanOrEqual,
        _ => return None,
    };
    Some(kind)
}

fn function_kind(name: &str) -> Option<SqlKind> {
    let kind = match name {
        "SUM" => SqlKind::Sum,
        "COUNT" => SqlKind::Count,
        "MIN" => SqlKind::Min,
        "MAX" => SqlKind::Max,
        "AVG" => SqlKind::Avg,
        "SINGLE_VALUE" => SqlKind::SingleValue,
        "CEIL" | "CEILING" => SqlKind::Ceil,
        "FLOOR" => SqlKind::Floor,
        "TIMESTAMPADD" => SqlKind::TimestampAdd,
        _ => return None,
    };
    Some(kind)
}

/// SQL-ish name of an AST node variant: `CreateTable` becomes `CREATE TABLE`
fn node_name<T: fmt::Debug>(node: &T) -> String {
    let debug = format!("{:?}", node);
    let mut name = String::new();
    for (i, c) in debug.chars().take_while(|c| c.is_ascii_alphanumeric()).enumerate() {
        if i > 0 && c.is_ascii_uppercase() {
            name.push(' ');
        }
        name.push(c.to_ascii_uppercase());
    }
    name
}
