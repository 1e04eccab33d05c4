//! Expression compilation and evaluation for execution operators.
//!
//! Planner expressions are compiled once per operator against the input
//! schema, then evaluated per tuple. Nulls propagate through arithmetic and
//! comparisons; `AND`/`OR` use three-valued logic.

use std::cmp::Ordering;
use std::sync::Arc;

use arrow_schema::{DataType, SchemaRef};
use shardex_codec::{convert_value, Value};
use shardex_common::{Result, ShardexError};
use shardex_planner::{BinaryOp, Expr};

/// Executable expression.
pub trait PhysicalExpr: Send + Sync {
    /// Static output data type of this expression.
    fn data_type(&self) -> DataType;
    /// Evaluate against one tuple of the compiled input schema.
    fn evaluate(&self, tuple: &[Value]) -> Result<Value>;
}

/// Compile a planner expression into a runnable one.
pub fn compile_expr(expr: &Expr, input_schema: &SchemaRef) -> Result<Arc<dyn PhysicalExpr>> {
    match expr {
        Expr::Column(index) => {
            let field = input_schema.fields().get(*index).ok_or_else(|| {
                ShardexError::Construction(format!(
                    "column #{index} out of range for {} input columns",
                    input_schema.fields().len()
                ))
            })?;
            Ok(Arc::new(ColumnExpr {
                index: *index,
                dt: field.data_type().clone(),
            }))
        }

        Expr::Literal(v) => Ok(Arc::new(LiteralExpr {
            v: v.clone(),
            dt: literal_type(v),
        })),

        Expr::Cast { expr, to_type } => {
            let inner = compile_expr(expr, input_schema)?;
            Ok(Arc::new(CastExpr {
                inner,
                to_type: to_type.clone(),
            }))
        }

        Expr::Not(e) => {
            let inner = compile_expr(e, input_schema)?;
            expect_boolean("NOT", inner.as_ref())?;
            Ok(Arc::new(NotExpr { inner }))
        }

        Expr::IsNull(e) => Ok(Arc::new(IsNullExpr {
            inner: compile_expr(e, input_schema)?,
        })),

        Expr::And(a, b) | Expr::Or(a, b) => {
            let left = compile_expr(a, input_schema)?;
            let right = compile_expr(b, input_schema)?;
            let op = if matches!(expr, Expr::And(..)) {
                BoolOp::And
            } else {
                BoolOp::Or
            };
            expect_boolean("AND/OR", left.as_ref())?;
            expect_boolean("AND/OR", right.as_ref())?;
            Ok(Arc::new(BoolBinaryExpr { left, right, op }))
        }

        Expr::BinaryOp { left, op, right } => {
            let l = compile_expr(left, input_schema)?;
            let r = compile_expr(right, input_schema)?;
            let out = binary_out_type(*op, &l.data_type(), &r.data_type())?;
            Ok(Arc::new(BinaryExpr {
                left: l,
                right: r,
                op: *op,
                out,
            }))
        }
    }
}

/// Compile a predicate; it must produce booleans.
pub fn compile_predicate(expr: &Expr, input_schema: &SchemaRef) -> Result<Arc<dyn PhysicalExpr>> {
    let compiled = compile_expr(expr, input_schema)?;
    expect_boolean("predicate", compiled.as_ref())?;
    Ok(compiled)
}

/// Whether a compiled predicate accepts `tuple`; null counts as false.
pub fn accepts(predicate: &dyn PhysicalExpr, tuple: &[Value]) -> Result<bool> {
    Ok(matches!(predicate.evaluate(tuple)?, Value::Bool(true)))
}

fn expect_boolean(what: &str, e: &dyn PhysicalExpr) -> Result<()> {
    match e.data_type() {
        DataType::Boolean | DataType::Null => Ok(()),
        other => Err(ShardexError::Construction(format!(
            "{what} expects boolean, got {other}"
        ))),
    }
}

fn literal_type(v: &Value) -> DataType {
    match v {
        Value::Null => DataType::Null,
        Value::Bool(_) => DataType::Boolean,
        Value::Int(_) => DataType::Int64,
        Value::Double(_) => DataType::Float64,
        Value::Str(_) => DataType::Utf8,
        Value::Bytes(_) => DataType::Binary,
        Value::Timestamp(_) => DataType::Timestamp(arrow_schema::TimeUnit::Millisecond, None),
    }
}

fn binary_out_type(op: BinaryOp, l: &DataType, r: &DataType) -> Result<DataType> {
    if op.is_comparison() {
        return Ok(DataType::Boolean);
    }
    let numeric = |t: &DataType| matches!(t, DataType::Int64 | DataType::Float64 | DataType::Null);
    if !numeric(l) || !numeric(r) {
        return Err(ShardexError::Construction(format!(
            "arithmetic '{}' needs numeric operands, got {l} and {r}",
            op.symbol()
        )));
    }
    if *l == DataType::Float64 || *r == DataType::Float64 {
        Ok(DataType::Float64)
    } else {
        Ok(DataType::Int64)
    }
}

struct ColumnExpr {
    index: usize,
    dt: DataType,
}

impl PhysicalExpr for ColumnExpr {
    fn data_type(&self) -> DataType {
        self.dt.clone()
    }

    fn evaluate(&self, tuple: &[Value]) -> Result<Value> {
        tuple.get(self.index).cloned().ok_or_else(|| {
            ShardexError::Execution(format!("tuple has no column #{}", self.index))
        })
    }
}

struct LiteralExpr {
    v: Value,
    dt: DataType,
}

impl PhysicalExpr for LiteralExpr {
    fn data_type(&self) -> DataType {
        self.dt.clone()
    }

    fn evaluate(&self, _tuple: &[Value]) -> Result<Value> {
        Ok(self.v.clone())
    }
}

struct CastExpr {
    inner: Arc<dyn PhysicalExpr>,
    to_type: DataType,
}

impl PhysicalExpr for CastExpr {
    fn data_type(&self) -> DataType {
        self.to_type.clone()
    }

    fn evaluate(&self, tuple: &[Value]) -> Result<Value> {
        let v = self.inner.evaluate(tuple)?;
        convert_value(&self.to_type, &v).map_err(|e| ShardexError::Execution(format!("cast failed: {e}")))
    }
}

struct NotExpr {
    inner: Arc<dyn PhysicalExpr>,
}

impl PhysicalExpr for NotExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, tuple: &[Value]) -> Result<Value> {
        match self.inner.evaluate(tuple)? {
            Value::Null => Ok(Value::Null),
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(ShardexError::Execution(format!(
                "NOT expects boolean, got {}",
                other.type_name()
            ))),
        }
    }
}

struct IsNullExpr {
    inner: Arc<dyn PhysicalExpr>,
}

impl PhysicalExpr for IsNullExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, tuple: &[Value]) -> Result<Value> {
        Ok(Value::Bool(self.inner.evaluate(tuple)?.is_null()))
    }
}

#[derive(Clone, Copy)]
enum BoolOp {
    And,
    Or,
}

struct BoolBinaryExpr {
    left: Arc<dyn PhysicalExpr>,
    right: Arc<dyn PhysicalExpr>,
    op: BoolOp,
}

fn as_tristate(v: Value) -> Result<Option<bool>> {
    match v {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(b)),
        other => Err(ShardexError::Execution(format!(
            "AND/OR expects boolean, got {}",
            other.type_name()
        ))),
    }
}

impl PhysicalExpr for BoolBinaryExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, tuple: &[Value]) -> Result<Value> {
        let l = as_tristate(self.left.evaluate(tuple)?)?;
        let r = as_tristate(self.right.evaluate(tuple)?)?;
        let out = match self.op {
            BoolOp::And => match (l, r) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            BoolOp::Or => match (l, r) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
        };
        Ok(out.map(Value::Bool).unwrap_or(Value::Null))
    }
}

struct BinaryExpr {
    left: Arc<dyn PhysicalExpr>,
    right: Arc<dyn PhysicalExpr>,
    op: BinaryOp,
    out: DataType,
}

impl PhysicalExpr for BinaryExpr {
    fn data_type(&self) -> DataType {
        self.out.clone()
    }

    fn evaluate(&self, tuple: &[Value]) -> Result<Value> {
        let l = self.left.evaluate(tuple)?;
        let r = self.right.evaluate(tuple)?;
        if l.is_null() || r.is_null() {
            return Ok(Value::Null);
        }
        if self.op.is_comparison() {
            let ord = l.compare(&r).ok_or_else(|| {
                ShardexError::Execution(format!(
                    "cannot compare {} with {}",
                    l.type_name(),
                    r.type_name()
                ))
            })?;
            let b = match self.op {
                BinaryOp::Eq => ord == Ordering::Equal,
                BinaryOp::NotEq => ord != Ordering::Equal,
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::LtEq => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            };
            return Ok(Value::Bool(b));
        }
        eval_arith(self.op, &l, &r)
    }
}

fn eval_arith(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => {
            let out = match op {
                BinaryOp::Plus => a.checked_add(*b),
                BinaryOp::Minus => a.checked_sub(*b),
                BinaryOp::Multiply => a.checked_mul(*b),
                _ => {
                    if *b == 0 {
                        return Err(ShardexError::Execution("division by zero".to_string()));
                    }
                    a.checked_div(*b)
                }
            };
            out.map(Value::Int).ok_or_else(|| {
                ShardexError::Execution(format!("integer overflow in {a} {} {b}", op.symbol()))
            })
        }
        _ => {
            let (a, b) = match (as_f64(l), as_f64(r)) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(ShardexError::Execution(format!(
                        "arithmetic '{}' on {} and {}",
                        op.symbol(),
                        l.type_name(),
                        r.type_name()
                    )))
                }
            };
            let out = match op {
                BinaryOp::Plus => a + b,
                BinaryOp::Minus => a - b,
                BinaryOp::Multiply => a * b,
                _ => a / b,
            };
            Ok(Value::Double(out))
        }
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Double(d) => Some(*d),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_schema::{DataType, Field, Schema, SchemaRef};
    use shardex_codec::Value;
    use shardex_planner::{BinaryOp, Expr};

    use super::{accepts, compile_expr, compile_predicate};

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("amount", DataType::Float64, true),
            Field::new("name", DataType::Utf8, true),
        ]))
    }

    #[test]
    fn arithmetic_widens_and_propagates_null() {
        let e = Expr::binary(Expr::col(0), BinaryOp::Plus, Expr::col(1));
        let c = compile_expr(&e, &schema()).expect("compile");
        assert_eq!(c.data_type(), DataType::Float64);
        let row = vec![Value::Int(2), Value::Double(0.5), Value::Null];
        assert_eq!(c.evaluate(&row).expect("eval"), Value::Double(2.5));
        let row = vec![Value::Int(2), Value::Null, Value::Null];
        assert_eq!(c.evaluate(&row).expect("eval"), Value::Null);
    }

    #[test]
    fn integer_division_by_zero_is_an_error() {
        let e = Expr::binary(Expr::col(0), BinaryOp::Divide, Expr::lit(Value::Int(0)));
        let c = compile_expr(&e, &schema()).expect("compile");
        assert!(c.evaluate(&[Value::Int(1), Value::Null, Value::Null]).is_err());
    }

    #[test]
    fn and_or_use_three_valued_logic() {
        let null_cmp = Expr::binary(Expr::col(1), BinaryOp::Gt, Expr::lit(Value::Double(1.0)));
        let t = Expr::binary(Expr::col(0), BinaryOp::Eq, Expr::lit(Value::Int(1)));
        let row = vec![Value::Int(1), Value::Null, Value::Null];

        let and = compile_predicate(&Expr::And(Box::new(null_cmp.clone()), Box::new(t.clone())), &schema())
            .expect("and");
        assert_eq!(and.evaluate(&row).expect("eval"), Value::Null);
        assert!(!accepts(and.as_ref(), &row).expect("accepts"));

        let or = compile_predicate(&Expr::Or(Box::new(null_cmp), Box::new(t)), &schema()).expect("or");
        assert!(accepts(or.as_ref(), &row).expect("accepts"));
    }

    #[test]
    fn non_boolean_predicate_is_rejected_at_compile_time() {
        assert!(compile_predicate(&Expr::col(0), &schema()).is_err());
        let e = Expr::binary(Expr::col(2), BinaryOp::Plus, Expr::lit(Value::Int(1)));
        assert!(compile_expr(&e, &schema()).is_err());
    }

    #[test]
    fn cast_and_is_null() {
        let cast = Expr::Cast {
            expr: Box::new(Expr::col(2)),
            to_type: DataType::Int64,
        };
        let c = compile_expr(&cast, &schema()).expect("compile");
        let row = vec![Value::Int(1), Value::Null, Value::Str("42".into())];
        assert_eq!(c.evaluate(&row).expect("eval"), Value::Int(42));
        let n = compile_expr(&Expr::IsNull(Box::new(Expr::col(1))), &schema()).expect("compile");
        assert_eq!(n.evaluate(&row).expect("eval"), Value::Bool(true));
    }
}
