// Row Expressions
//
// Evaluated per row by sources (predicate and projection) and once by the
// planner for constant VALUES. NULL handling follows SQL three-valued logic.

use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::fmt;

use crate::api::middleware::AppError;
use crate::models::{ScalarType, TypeFamily, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
    Concat,
}

impl BinaryOp {
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Equals
                | BinaryOp::NotEquals
                | BinaryOp::LessThan
                | BinaryOp::LessThanOrEqual
                | BinaryOp::GreaterThan
                | BinaryOp::GreaterThanOrEqual
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Equals => "=",
            BinaryOp::NotEquals => "<>",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanOrEqual => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanOrEqual => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Concat => "||",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsTest {
    Null,
    True,
    False,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarFunction {
    Abs,
    Upper,
    Lower,
    CharLength,
    Concat,
}

impl ScalarFunction {
    pub fn by_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "ABS" => Some(ScalarFunction::Abs),
            "UPPER" => Some(ScalarFunction::Upper),
            "LOWER" => Some(ScalarFunction::Lower),
            "CHAR_LENGTH" | "CHARACTER_LENGTH" | "LENGTH" => Some(ScalarFunction::CharLength),
            "CONCAT" => Some(ScalarFunction::Concat),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Column {
        index: usize,
        scalar_type: ScalarType,
    },
    Literal(Value),
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Not(Box<Expression>),
    Negate(Box<Expression>),
    Is {
        test: IsTest,
        negated: bool,
        operand: Box<Expression>,
    },
    Between {
        operand: Box<Expression>,
        low: Box<Expression>,
        high: Box<Expression>,
        negated: bool,
    },
    InList {
        operand: Box<Expression>,
        list: Vec<Expression>,
        negated: bool,
    },
    Like {
        operand: Box<Expression>,
        pattern: Box<Expression>,
        negated: bool,
    },
    Case {
        operand: Option<Box<Expression>>,
        branches: Vec<(Expression, Expression)>,
        otherwise: Option<Box<Expression>>,
    },
    Cast {
        operand: Box<Expression>,
        target: ScalarType,
    },
    Function {
        function: ScalarFunction,
        args: Vec<Expression>,
    },
}

impl Expression {
    pub fn column(index: usize, scalar_type: ScalarType) -> Self {
        Expression::Column { index, scalar_type }
    }

    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn cast(operand: Expression, target: ScalarType) -> Self {
        if operand.return_type() == target {
            return operand;
        }
        Expression::Cast {
            operand: Box::new(operand),
            target,
        }
    }

    pub fn return_type(&self) -> ScalarType {
        match self {
            Expression::Column { scalar_type, .. } => *scalar_type,
            Expression::Literal(value) => value.scalar_type(),
            Expression::Binary { op, left, right } => {
                if op.is_arithmetic() {
                    arithmetic_type(left.return_type(), right.return_type())
                } else if *op == BinaryOp::Concat {
                    ScalarType::Varchar
                } else {
                    ScalarType::Boolean
                }
            }
            Expression::Negate(operand) => operand.return_type(),
            Expression::Not(_)
            | Expression::Is { .. }
            | Expression::Between { .. }
            | Expression::InList { .. }
            | Expression::Like { .. } => ScalarType::Boolean,
            Expression::Case { branches, otherwise, .. } => branches
                .iter()
                .map(|(_, result)| result.return_type())
                .chain(otherwise.iter().map(|e| e.return_type()))
                .find(|t| *t != ScalarType::Null)
                .unwrap_or(ScalarType::Null),
            Expression::Cast { target, .. } => *target,
            Expression::Function { function, args } => match function {
                ScalarFunction::Abs => args
                    .first()
                    .map(|a| a.return_type())
                    .unwrap_or(ScalarType::Null),
                ScalarFunction::Upper | ScalarFunction::Lower | ScalarFunction::Concat => {
                    ScalarType::Varchar
                }
                ScalarFunction::CharLength => ScalarType::Integer,
            },
        }
    }

    /// Predicate test: only TRUE passes, FALSE and NULL filter the row out
    pub fn is_true(&self, row: &[Value]) -> Result<bool, AppError> {
        Ok(matches!(self.eval(row)?, Value::Boolean(true)))
    }

    pub fn eval(&self, row: &[Value]) -> Result<Value, AppError> {
        match self {
            Expression::Column { index, .. } => Ok(row.get(*index).cloned().unwrap_or(Value::Null)),
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    let l = truth(left.eval(row)?)?;
                    if l == Some(false) {
                        return Ok(Value::Boolean(false));
                    }
                    let r = truth(right.eval(row)?)?;
                    Ok(match (l, r) {
                        (_, Some(false)) => Value::Boolean(false),
                        (Some(true), Some(true)) => Value::Boolean(true),
                        _ => Value::Null,
                    })
                }
                BinaryOp::Or => {
                    let l = truth(left.eval(row)?)?;
                    if l == Some(true) {
                        return Ok(Value::Boolean(true));
                    }
                    let r = truth(right.eval(row)?)?;
                    Ok(match (l, r) {
                        (_, Some(true)) => Value::Boolean(true),
                        (Some(false), Some(false)) => Value::Boolean(false),
                        _ => Value::Null,
                    })
                }
                BinaryOp::Concat => {
                    let (l, r) = (left.eval(row)?, right.eval(row)?);
                    if l.is_null() || r.is_null() {
                        return Ok(Value::Null);
                    }
                    Ok(Value::Varchar(format!("{}{}", l, r)))
                }
                op if op.is_comparison() => {
                    let (l, r) = (left.eval(row)?, right.eval(row)?);
                    if l.is_null() || r.is_null() {
                        return Ok(Value::Null);
                    }
                    let ordering = compare(&l, &r)?;
                    let result = match op {
                        BinaryOp::Equals => ordering == Ordering::Equal,
                        BinaryOp::NotEquals => ordering != Ordering::Equal,
                        BinaryOp::LessThan => ordering == Ordering::Less,
                        BinaryOp::LessThanOrEqual => ordering != Ordering::Greater,
                        BinaryOp::GreaterThan => ordering == Ordering::Greater,
                        _ => ordering != Ordering::Less,
                    };
                    Ok(Value::Boolean(result))
                }
                op => arithmetic(*op, left.eval(row)?, right.eval(row)?),
            },
            Expression::Not(operand) => Ok(match truth(operand.eval(row)?)? {
                Some(b) => Value::Boolean(!b),
                None => Value::Null,
            }),
            Expression::Negate(operand) => negate(operand.eval(row)?),
            Expression::Is { test, negated, operand } => {
                let value = operand.eval(row)?;
                let result = match test {
                    IsTest::Null => value.is_null(),
                    IsTest::True => truth(value)? == Some(true),
                    IsTest::False => truth(value)? == Some(false),
                };
                Ok(Value::Boolean(result != *negated))
            }
            Expression::Between { operand, low, high, negated } => {
                let value = operand.eval(row)?;
                let lower = three_valued_compare(&value, &low.eval(row)?, |o| o != Ordering::Less)?;
                let upper = three_valued_compare(&value, &high.eval(row)?, |o| o != Ordering::Greater)?;
                let within = match (lower, upper) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                };
                Ok(match within {
                    Some(b) => Value::Boolean(b != *negated),
                    None => Value::Null,
                })
            }
            Expression::InList { operand, list, negated } => {
                let value = operand.eval(row)?;
                if value.is_null() {
                    return Ok(Value::Null);
                }
                let mut saw_null = false;
                for item in list {
                    let candidate = item.eval(row)?;
                    if candidate.is_null() {
                        saw_null = true;
                        continue;
                    }
                    if compare(&value, &candidate)? == Ordering::Equal {
                        return Ok(Value::Boolean(!negated));
                    }
                }
                Ok(if saw_null {
                    Value::Null
                } else {
                    Value::Boolean(*negated)
                })
            }
            Expression::Like { operand, pattern, negated } => {
                let (value, pattern) = (operand.eval(row)?, pattern.eval(row)?);
                if value.is_null() || pattern.is_null() {
                    return Ok(Value::Null);
                }
                let matched = matches_pattern(&value.to_string(), &pattern.to_string(), '%', '_');
                Ok(Value::Boolean(matched != *negated))
            }
            Expression::Case { operand, branches, otherwise } => {
                let subject = match operand {
                    Some(operand) => Some(operand.eval(row)?),
                    None => None,
                };
                for (when, then) in branches {
                    let hit = match &subject {
                        Some(subject) => {
                            three_valued_compare(subject, &when.eval(row)?, |o| o == Ordering::Equal)?
                                == Some(true)
                        }
                        None => when.is_true(row)?,
                    };
                    if hit {
                        return then.eval(row);
                    }
                }
                match otherwise {
                    Some(otherwise) => otherwise.eval(row),
                    None => Ok(Value::Null),
                }
            }
            Expression::Cast { operand, target } => target.convert(operand.eval(row)?),
            Expression::Function { function, args } => {
                let values = args
                    .iter()
                    .map(|arg| arg.eval(row))
                    .collect::<Result<Vec<_>, _>>()?;
                call(*function, values)
            }
        }
    }
}

fn arithmetic_type(left: ScalarType, right: ScalarType) -> ScalarType {
    let families = (left.family(), right.family());
    match families {
        (TypeFamily::Null, _) => right,
        (_, TypeFamily::Null) => left,
        (TypeFamily::Double | TypeFamily::Real, _) | (_, TypeFamily::Double | TypeFamily::Real) => {
            ScalarType::Double
        }
        (TypeFamily::Decimal, _) | (_, TypeFamily::Decimal) => ScalarType::Decimal,
        _ => ScalarType::BigInt,
    }
}

fn truth(value: Value) -> Result<Option<bool>, AppError> {
    match value {
        Value::Boolean(b) => Ok(Some(b)),
        v if v.is_null() => Ok(None),
        other => Err(AppError::Validation(format!(
            "Expected BOOLEAN but got {} value '{}'",
            other.scalar_type(),
            other
        ))),
    }
}

fn compare(left: &Value, right: &Value) -> Result<Ordering, AppError> {
    left.compare(right).ok_or_else(|| {
        AppError::Validation(format!(
            "Cannot compare {} and {}",
            left.scalar_type(),
            right.scalar_type()
        ))
    })
}

fn three_valued_compare(
    left: &Value,
    right: &Value,
    accept: impl Fn(Ordering) -> bool,
) -> Result<Option<bool>, AppError> {
    if left.is_null() || right.is_null() {
        return Ok(None);
    }
    Ok(Some(accept(compare(left, right)?)))
}

fn arithmetic(op: BinaryOp, left: Value, right: Value) -> Result<Value, AppError> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let (lt, rt) = (left.scalar_type(), right.scalar_type());
    if !lt.is_numeric() || !rt.is_numeric() {
        return Err(AppError::Validation(format!(
            "Cannot apply '{}' to arguments of type {} and {}",
            op, lt, rt
        )));
    }

    match arithmetic_type(lt, rt) {
        ScalarType::Double => {
            let (l, r) = (left.as_f64().unwrap_or_default(), right.as_f64().unwrap_or_default());
            if matches!(op, BinaryOp::Divide | BinaryOp::Modulo) && r == 0.0 {
                return Err(division_by_zero());
            }
            Ok(Value::Double(match op {
                BinaryOp::Plus => l + r,
                BinaryOp::Minus => l - r,
                BinaryOp::Multiply => l * r,
                BinaryOp::Divide => l / r,
                _ => l % r,
            }))
        }
        ScalarType::Decimal => {
            let (l, r) = (
                left.as_decimal().unwrap_or_default(),
                right.as_decimal().unwrap_or_default(),
            );
            if matches!(op, BinaryOp::Divide | BinaryOp::Modulo) && r == Decimal::ZERO {
                return Err(division_by_zero());
            }
            let result = match op {
                BinaryOp::Plus => l.checked_add(r),
                BinaryOp::Minus => l.checked_sub(r),
                BinaryOp::Multiply => l.checked_mul(r),
                BinaryOp::Divide => l.checked_div(r),
                _ => l.checked_rem(r),
            };
            result.map(Value::Decimal).ok_or_else(|| overflow(ScalarType::Decimal))
        }
        _ => {
            let (l, r) = (left.as_i64().unwrap_or_default(), right.as_i64().unwrap_or_default());
            if matches!(op, BinaryOp::Divide | BinaryOp::Modulo) && r == 0 {
                return Err(division_by_zero());
            }
            let result = match op {
                BinaryOp::Plus => l.checked_add(r),
                BinaryOp::Minus => l.checked_sub(r),
                BinaryOp::Multiply => l.checked_mul(r),
                BinaryOp::Divide => l.checked_div(r),
                _ => l.checked_rem(r),
            };
            result.map(Value::BigInt).ok_or_else(|| overflow(ScalarType::BigInt))
        }
    }
}

fn negate(value: Value) -> Result<Value, AppError> {
    let negated = match &value {
        v if v.is_null() => Some(Value::Null),
        Value::TinyInt(v) => v.checked_neg().map(Value::TinyInt),
        Value::SmallInt(v) => v.checked_neg().map(Value::SmallInt),
        Value::Integer(v) => v.checked_neg().map(Value::Integer),
        Value::BigInt(v) => v.checked_neg().map(Value::BigInt),
        Value::Decimal(d) => Some(Value::Decimal(-*d)),
        Value::Real(f) => Some(Value::Real(-*f)),
        Value::Double(f) => Some(Value::Double(-*f)),
        other => {
            return Err(AppError::Validation(format!(
                "Cannot apply '-' to argument of type {}",
                other.scalar_type()
            )))
        }
    };
    negated.ok_or_else(|| overflow(value.scalar_type()))
}

fn call(function: ScalarFunction, args: Vec<Value>) -> Result<Value, AppError> {
    if args.iter().any(Value::is_null) {
        return Ok(Value::Null);
    }
    if function == ScalarFunction::Concat {
        return Ok(Value::Varchar(args.iter().map(|v| v.to_string()).collect()));
    }
    let arg = args.into_iter().next().unwrap_or(Value::Null);
    match function {
        ScalarFunction::Abs => abs(arg),
        ScalarFunction::Upper => Ok(Value::Varchar(arg.to_string().to_uppercase())),
        ScalarFunction::Lower => Ok(Value::Varchar(arg.to_string().to_lowercase())),
        ScalarFunction::CharLength | ScalarFunction::Concat => {
            let length = arg.to_string().chars().count();
            i32::try_from(length)
                .map(Value::Integer)
                .map_err(|_| overflow(ScalarType::Integer))
        }
    }
}

fn abs(value: Value) -> Result<Value, AppError> {
    let result = match &value {
        Value::Null => Some(Value::Null),
        Value::TinyInt(v) => v.checked_abs().map(Value::TinyInt),
        Value::SmallInt(v) => v.checked_abs().map(Value::SmallInt),
        Value::Integer(v) => v.checked_abs().map(Value::Integer),
        Value::BigInt(v) => v.checked_abs().map(Value::BigInt),
        Value::Decimal(d) => Some(Value::Decimal(d.abs())),
        Value::Real(f) => Some(Value::Real(f.abs())),
        Value::Double(f) => Some(Value::Double(f.abs())),
        other => {
            return Err(AppError::Validation(format!(
                "Cannot apply 'ABS' to argument of type {}",
                other.scalar_type()
            )))
        }
    };
    result.ok_or_else(|| overflow(value.scalar_type()))
}

fn division_by_zero() -> AppError {
    AppError::Validation("Division by zero".to_string())
}

fn overflow(scalar_type: ScalarType) -> AppError {
    AppError::Validation(format!("Numeric overflow in {} expression", scalar_type))
}

/// Wildcard match where `many` matches any run of characters and `one`
/// matches exactly one
pub fn matches_pattern(text: &str, pattern: &str, many: char, one: char) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut t, mut p) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == many {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && (pattern[p] == one || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == many)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(value: Value) -> Expression {
        Expression::Literal(value)
    }

    #[test]
    fn test_integral_arithmetic_widens_to_bigint() {
        let expr = Expression::binary(
            BinaryOp::Plus,
            Expression::column(0, ScalarType::Integer),
            lit(Value::TinyInt(2)),
        );
        assert_eq!(expr.return_type(), ScalarType::BigInt);
        assert_eq!(expr.eval(&[Value::Integer(40)]).unwrap(), Value::BigInt(42));
        assert_eq!(expr.eval(&[Value::Null]).unwrap(), Value::Null);
    }

    #[test]
    fn test_mixed_arithmetic() {
        let expr = Expression::binary(BinaryOp::Divide, lit(Value::BigInt(7)), lit(Value::Double(2.0)));
        assert_eq!(expr.eval(&[]).unwrap(), Value::Double(3.5));

        let err = Expression::binary(BinaryOp::Divide, lit(Value::BigInt(1)), lit(Value::BigInt(0)))
            .eval(&[])
            .unwrap_err();
        assert!(err.to_string().contains("Division by zero"));

        let err = Expression::binary(BinaryOp::Plus, lit(Value::BigInt(i64::MAX)), lit(Value::BigInt(1)))
            .eval(&[])
            .unwrap_err();
        assert!(err.to_string().contains("overflow"));
    }

    #[test]
    fn test_three_valued_logic() {
        let null_and_false = Expression::binary(BinaryOp::And, lit(Value::Null), lit(Value::Boolean(false)));
        assert_eq!(null_and_false.eval(&[]).unwrap(), Value::Boolean(false));

        let null_and_true = Expression::binary(BinaryOp::And, lit(Value::Null), lit(Value::Boolean(true)));
        assert_eq!(null_and_true.eval(&[]).unwrap(), Value::Null);
        assert!(!null_and_true.is_true(&[]).unwrap());

        let null_or_true = Expression::binary(BinaryOp::Or, lit(Value::Null), lit(Value::Boolean(true)));
        assert_eq!(null_or_true.eval(&[]).unwrap(), Value::Boolean(true));

        let not_null = Expression::Not(Box::new(lit(Value::Null)));
        assert_eq!(not_null.eval(&[]).unwrap(), Value::Null);
    }

    #[test]
    fn test_is_predicates() {
        let is_not_true = Expression::Is {
            test: IsTest::True,
            negated: true,
            operand: Box::new(Expression::column(0, ScalarType::Boolean)),
        };
        assert_eq!(is_not_true.eval(&[Value::Null]).unwrap(), Value::Boolean(true));
        assert_eq!(is_not_true.eval(&[Value::Boolean(true)]).unwrap(), Value::Boolean(false));
    }

    #[test]
    fn test_in_list_with_null() {
        let expr = Expression::InList {
            operand: Box::new(Expression::column(0, ScalarType::Integer)),
            list: vec![lit(Value::Integer(1)), lit(Value::Null)],
            negated: false,
        };
        assert_eq!(expr.eval(&[Value::Integer(1)]).unwrap(), Value::Boolean(true));
        assert_eq!(expr.eval(&[Value::Integer(2)]).unwrap(), Value::Null);
    }

    #[test]
    fn test_between_and_like() {
        let between = Expression::Between {
            operand: Box::new(Expression::column(0, ScalarType::BigInt)),
            low: Box::new(lit(Value::Integer(1))),
            high: Box::new(lit(Value::Integer(5))),
            negated: false,
        };
        assert!(between.is_true(&[Value::BigInt(5)]).unwrap());
        assert!(!between.is_true(&[Value::BigInt(6)]).unwrap());

        let like = Expression::Like {
            operand: Box::new(Expression::column(0, ScalarType::Varchar)),
            pattern: Box::new(lit(Value::Varchar("a_c%".into()))),
            negated: false,
        };
        assert!(like.is_true(&[Value::Varchar("abcdef".into())]).unwrap());
        assert!(!like.is_true(&[Value::Varchar("acdef".into())]).unwrap());
    }

    #[test]
    fn test_case_and_cast() {
        let case = Expression::Case {
            operand: None,
            branches: vec![(
                Expression::binary(
                    BinaryOp::GreaterThan,
                    Expression::column(0, ScalarType::BigInt),
                    lit(Value::BigInt(10)),
                ),
                lit(Value::Varchar("big".into())),
            )],
            otherwise: Some(Box::new(lit(Value::Varchar("small".into())))),
        };
        assert_eq!(case.return_type(), ScalarType::Varchar);
        assert_eq!(case.eval(&[Value::BigInt(11)]).unwrap(), Value::Varchar("big".into()));
        assert_eq!(case.eval(&[Value::BigInt(1)]).unwrap(), Value::Varchar("small".into()));

        let cast = Expression::cast(lit(Value::Varchar("12".into())), ScalarType::Integer);
        assert_eq!(cast.eval(&[]).unwrap(), Value::Integer(12));
        let bad = Expression::cast(lit(Value::Varchar("twelve".into())), ScalarType::Integer);
        assert!(bad.eval(&[]).unwrap_err().to_string().contains("Cannot convert"));
    }

    #[test]
    fn test_functions() {
        let upper = Expression::Function {
            function: ScalarFunction::Upper,
            args: vec![lit(Value::Varchar("abc".into()))],
        };
        assert_eq!(upper.eval(&[]).unwrap(), Value::Varchar("ABC".into()));

        let length = Expression::Function {
            function: ScalarFunction::by_name("char_length").unwrap(),
            args: vec![lit(Value::Varchar("héllo".into()))],
        };
        assert_eq!(length.eval(&[]).unwrap(), Value::Integer(5));

        let abs = Expression::Function {
            function: ScalarFunction::Abs,
            args: vec![lit(Value::Integer(-3))],
        };
        assert_eq!(abs.eval(&[]).unwrap(), Value::Integer(3));
    }

    #[test]
    fn test_wildcard_matching() {
        assert!(matches_pattern("data-1.json", "*.json", '*', '?'));
        assert!(matches_pattern("abc", "a?c", '*', '?'));
        assert!(!matches_pattern("abc", "a?d", '*', '?'));
        assert!(matches_pattern("", "%", '%', '_'));
        assert!(matches_pattern("aXbXc", "a%b%c", '%', '_'));
    }
}
