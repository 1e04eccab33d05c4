use arrow_schema::{DataType, Schema};
use serde::{Deserialize, Serialize};
use shardex_codec::Value;
use shardex_common::{Result, ShardexError};

/// Scalar expression over one input tuple. Columns are positional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Column(usize),
    Literal(Value),
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    Cast {
        expr: Box<Expr>,
        to_type: DataType,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    IsNull(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Divide,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
        }
    }
}

impl Expr {
    pub fn col(index: usize) -> Self {
        Expr::Column(index)
    }

    pub fn lit(v: Value) -> Self {
        Expr::Literal(v)
    }

    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Self {
        Expr::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// Check column references against `schema`.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        match self {
            Expr::Column(idx) if *idx >= schema.fields().len() => Err(ShardexError::Construction(format!(
                "column #{idx} out of range for {} input columns",
                schema.fields().len()
            ))),
            Expr::Column(_) | Expr::Literal(_) => Ok(()),
            Expr::BinaryOp { left, right, .. } | Expr::And(left, right) | Expr::Or(left, right) => {
                left.validate(schema)?;
                right.validate(schema)
            }
            Expr::Cast { expr, .. } | Expr::Not(expr) | Expr::IsNull(expr) => expr.validate(schema),
        }
    }
}

#[cfg(test)]
mod tests {
    use arrow_schema::{DataType, Field, Schema};
    use shardex_codec::Value;

    use super::{BinaryOp, Expr};

    #[test]
    fn validate_catches_out_of_range_column() {
        let schema = Schema::new(vec![Field::new("id", DataType::Int64, false)]);
        let ok = Expr::binary(Expr::col(0), BinaryOp::Lt, Expr::lit(Value::Int(3)));
        assert!(ok.validate(&schema).is_ok());
        let bad = Expr::And(Box::new(ok), Box::new(Expr::IsNull(Box::new(Expr::col(1)))));
        assert!(bad.validate(&schema).is_err());
    }
}
