// SQL expression to row expression conversion. Column references resolve
// against the fields of the one table in scope.

use rust_decimal::Decimal;
use sqlparser::ast::{
    BinaryOperator, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, Ident, UnaryOperator,
    Value as SqlValue,
};
use std::str::FromStr;

use crate::api::middleware::AppError;
use crate::engine::{BinaryOp, Expression, IsTest, ScalarFunction};
use crate::models::{ScalarType, TableField, Value};

pub struct ExprConverter<'a> {
    fields: &'a [TableField],
}

fn not_implemented(what: impl std::fmt::Display) -> AppError {
    AppError::NotImplemented(format!("{} is not implemented", what))
}

impl<'a> ExprConverter<'a> {
    pub fn new(fields: &'a [TableField]) -> Self {
        Self { fields }
    }

    fn column(&self, ident: &Ident) -> Result<Expression, AppError> {
        self.fields
            .iter()
            .position(|f| f.name == ident.value)
            .map(|index| Expression::column(index, self.fields[index].scalar_type))
            .ok_or_else(|| AppError::Validation(format!("Column '{}' not found", ident.value)))
    }

    fn boxed(&self, expr: &Expr) -> Result<Box<Expression>, AppError> {
        self.convert(expr).map(Box::new)
    }

    pub fn convert(&self, expr: &Expr) -> Result<Expression, AppError> {
        match expr {
            Expr::Identifier(ident) => self.column(ident),
            Expr::CompoundIdentifier(parts) => match parts.last() {
                Some(ident) => self.column(ident),
                None => Err(not_implemented(expr)),
            },
            Expr::Value(value) => literal(&value.value).map(Expression::Literal),
            Expr::TypedString { .. } => typed_literal(expr).map(Expression::Literal),
            Expr::Nested(inner) => self.convert(inner),
            Expr::BinaryOp { left, op, right } => {
                let op = match op {
                    BinaryOperator::Plus => BinaryOp::Plus,
                    BinaryOperator::Minus => BinaryOp::Minus,
                    BinaryOperator::Multiply => BinaryOp::Multiply,
                    BinaryOperator::Divide => BinaryOp::Divide,
                    BinaryOperator::Modulo => BinaryOp::Modulo,
                    BinaryOperator::Eq => BinaryOp::Equals,
                    BinaryOperator::NotEq => BinaryOp::NotEquals,
                    BinaryOperator::Lt => BinaryOp::LessThan,
                    BinaryOperator::LtEq => BinaryOp::LessThanOrEqual,
                    BinaryOperator::Gt => BinaryOp::GreaterThan,
                    BinaryOperator::GtEq => BinaryOp::GreaterThanOrEqual,
                    BinaryOperator::And => BinaryOp::And,
                    BinaryOperator::Or => BinaryOp::Or,
                    BinaryOperator::StringConcat => BinaryOp::Concat,
                    other => return Err(not_implemented(other)),
                };
                Ok(Expression::binary(op, self.convert(left)?, self.convert(right)?))
            }
            Expr::UnaryOp { op, expr: inner } => match op {
                UnaryOperator::Plus => self.convert(inner),
                UnaryOperator::Minus => Ok(Expression::Negate(self.boxed(inner)?)),
                UnaryOperator::Not => Ok(Expression::Not(self.boxed(inner)?)),
                other => Err(not_implemented(other)),
            },
            Expr::IsNull(inner) => self.is(IsTest::Null, false, inner),
            Expr::IsNotNull(inner) => self.is(IsTest::Null, true, inner),
            Expr::IsTrue(inner) => self.is(IsTest::True, false, inner),
            Expr::IsNotTrue(inner) => self.is(IsTest::True, true, inner),
            Expr::IsFalse(inner) => self.is(IsTest::False, false, inner),
            Expr::IsNotFalse(inner) => self.is(IsTest::False, true, inner),
            Expr::Between { expr: inner, negated, low, high, .. } => Ok(Expression::Between {
                operand: self.boxed(inner)?,
                low: self.boxed(low)?,
                high: self.boxed(high)?,
                negated: *negated,
            }),
            Expr::InList { expr: inner, list, negated, .. } => Ok(Expression::InList {
                operand: self.boxed(inner)?,
                list: list.iter().map(|e| self.convert(e)).collect::<Result<_, _>>()?,
                negated: *negated,
            }),
            Expr::Like { negated, expr: inner, pattern, escape_char, .. } => {
                if escape_char.is_some() {
                    return Err(not_implemented("LIKE ... ESCAPE"));
                }
                Ok(Expression::Like {
                    operand: self.boxed(inner)?,
                    pattern: self.boxed(pattern)?,
                    negated: *negated,
                })
            }
            Expr::Case { operand, conditions, else_result, .. } => Ok(Expression::Case {
                operand: operand.as_deref().map(|e| self.boxed(e)).transpose()?,
                branches: conditions
                    .iter()
                    .map(|when| Ok((self.convert(&when.condition)?, self.convert(&when.result)?)))
                    .collect::<Result<_, AppError>>()?,
                otherwise: else_result.as_deref().map(|e| self.boxed(e)).transpose()?,
            }),
            Expr::Cast { expr: inner, data_type, .. } => {
                let target = ScalarType::from_data_type(data_type)
                    .ok_or_else(|| not_implemented(format!("CAST to {}", data_type)))?;
                Ok(Expression::cast(self.convert(inner)?, target))
            }
            Expr::Function(function) => {
                let name = function.name.to_string();
                let scalar = ScalarFunction::by_name(&name).ok_or_else(|| not_implemented(&name))?;
                let args = match &function.args {
                    FunctionArguments::List(list) => list
                        .args
                        .iter()
                        .map(|arg| match arg {
                            FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => self.convert(e),
                            other => Err(not_implemented(other)),
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                    FunctionArguments::None => Vec::new(),
                    FunctionArguments::Subquery(_) => return Err(not_implemented("Subquery argument")),
                };
                if scalar != ScalarFunction::Concat && args.len() != 1 {
                    return Err(AppError::Validation(format!(
                        "Function {} expects 1 argument, got {}",
                        name.to_ascii_uppercase(),
                        args.len()
                    )));
                }
                Ok(Expression::Function { function: scalar, args })
            }
            other => Err(not_implemented(other)),
        }
    }

    fn is(&self, test: IsTest, negated: bool, operand: &Expr) -> Result<Expression, AppError> {
        Ok(Expression::Is {
            test,
            negated,
            operand: self.boxed(operand)?,
        })
    }
}

/// Literal value. Integers take the narrowest of INTEGER and BIGINT, numbers
/// with a fraction are DECIMAL, numbers with an exponent are DOUBLE.
pub fn literal(value: &SqlValue) -> Result<Value, AppError> {
    match value {
        SqlValue::Null => Ok(Value::Null),
        SqlValue::Boolean(b) => Ok(Value::Boolean(*b)),
        SqlValue::SingleQuotedString(s) => Ok(Value::Varchar(s.clone())),
        SqlValue::Number(text, _) => number(text),
        SqlValue::Placeholder(p) => Err(not_implemented(format!("Dynamic parameter {}", p))),
        other => Err(not_implemented(format!("Literal {}", other))),
    }
}

fn number(text: &str) -> Result<Value, AppError> {
    let invalid = || AppError::InvalidSql(format!("Invalid number: {}", text));
    if text.contains(['e', 'E']) {
        return text.parse::<f64>().map(Value::Double).map_err(|_| invalid());
    }
    if text.contains('.') {
        return Decimal::from_str(text).map(Value::Decimal).map_err(|_| invalid());
    }
    let integer = text.parse::<i64>().map_err(|_| invalid())?;
    Ok(i32::try_from(integer)
        .map(Value::Integer)
        .unwrap_or(Value::BigInt(integer)))
}

/// `DATE '...'`, `TIME '...'`, `TIMESTAMP '...'`
fn typed_literal(expr: &Expr) -> Result<Value, AppError> {
    let text = expr.to_string();
    let mut parts = text.splitn(2, '\'');
    let type_name = parts.next().unwrap_or_default().trim();
    let literal = parts.next().unwrap_or_default().trim_end_matches('\'');
    let scalar_type = ScalarType::from_sql_name(type_name)
        .ok_or_else(|| not_implemented(format!("{} literal", type_name)))?;
    scalar_type.convert(Value::Varchar(literal.to_string()))
}
