use std::sync::Arc;

use futures::{future, TryStreamExt};
use shardex_codec::{convert_value, Value};
use shardex_common::{Result, ShardexError};
use shardex_planner::{FilterExec, ProjectExec};

use crate::expressions::{accepts, compile_expr, compile_predicate, PhysicalExpr};
use crate::stream::{tuple_stream, SendableTupleStream};

pub(super) fn filter(exec: &FilterExec, input: SendableTupleStream) -> Result<SendableTupleStream> {
    let schema = input.schema();
    let predicate = compile_predicate(&exec.predicate, &schema)?;
    let out = input.try_filter_map(move |tuple| {
        future::ready(accepts(predicate.as_ref(), &tuple).map(|keep| keep.then_some(tuple)))
    });
    Ok(tuple_stream(schema, out))
}

pub(super) fn project(exec: &ProjectExec, input: SendableTupleStream) -> Result<SendableTupleStream> {
    let input_schema = input.schema();
    if exec.exprs.len() != exec.schema.fields().len() {
        return Err(ShardexError::Construction(format!(
            "project has {} expressions for {} output columns",
            exec.exprs.len(),
            exec.schema.fields().len()
        )));
    }
    let exprs = exec
        .exprs
        .iter()
        .map(|e| compile_expr(e, &input_schema))
        .collect::<Result<Vec<Arc<dyn PhysicalExpr>>>>()?;
    let schema = exec.schema.clone();
    let out_schema = schema.clone();
    let out = input.and_then(move |tuple| {
        let row = exprs
            .iter()
            .zip(out_schema.fields())
            .map(|(expr, field)| {
                let v = expr.evaluate(&tuple)?;
                if v.is_null() {
                    if !field.is_nullable() {
                        return Err(ShardexError::Execution(format!(
                            "null produced for non-nullable column '{}'",
                            field.name()
                        )));
                    }
                    return Ok(Value::Null);
                }
                convert_value(field.data_type(), &v)
            })
            .collect::<Result<Vec<_>>>();
        future::ready(row)
    });
    Ok(tuple_stream(schema, out))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_schema::{DataType, Field, Schema};
    use futures::TryStreamExt;
    use shardex_codec::Value;
    use shardex_common::ShardexError;
    use shardex_planner::{BinaryOp, Expr, FilterExec, ProjectExec, ValuesExec};

    use super::{filter, project};
    use crate::ops::source::values;
    use crate::test_util::int_str_schema;

    fn three_users() -> crate::stream::SendableTupleStream {
        values(&ValuesExec {
            schema: int_str_schema(),
            rows: vec![
                vec![Value::Int(1), Value::Str("ann".into())],
                vec![Value::Int(2), Value::Null],
                vec![Value::Int(3), Value::Str("cy".into())],
            ],
        })
        .expect("values")
    }

    #[tokio::test]
    async fn filter_drops_rows_whose_predicate_is_null_or_false() {
        let pred = Expr::binary(Expr::col(1), BinaryOp::NotEq, Expr::lit(Value::Str("cy".into())));
        let rows: Vec<_> = filter(&FilterExec { predicate: pred }, three_users())
            .expect("filter")
            .try_collect()
            .await
            .expect("rows");
        assert_eq!(rows, vec![vec![Value::Int(1), Value::Str("ann".into())]]);
    }

    #[test]
    fn filter_rejects_non_boolean_predicate() {
        let err = filter(&FilterExec { predicate: Expr::col(0) }, three_users())
            .err()
            .expect("non-boolean predicate");
        assert!(matches!(err, ShardexError::Construction(_)));
    }

    #[tokio::test]
    async fn project_computes_and_converts_columns() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("double_id", DataType::Float64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        let exec = ProjectExec {
            exprs: vec![
                Expr::binary(Expr::col(0), BinaryOp::Multiply, Expr::lit(Value::Int(2))),
                Expr::col(1),
            ],
            schema,
        };
        let rows: Vec<_> = project(&exec, three_users()).expect("project").try_collect().await.expect("rows");
        assert_eq!(rows[0], vec![Value::Double(2.0), Value::Str("ann".into())]);
        assert_eq!(rows[1], vec![Value::Double(4.0), Value::Null]);
    }

    #[tokio::test]
    async fn project_fails_on_null_for_non_nullable_column() {
        let schema = Arc::new(Schema::new(vec![Field::new("name", DataType::Utf8, false)]));
        let exec = ProjectExec {
            exprs: vec![Expr::col(1)],
            schema,
        };
        let err = project(&exec, three_users())
            .expect("project")
            .try_collect::<Vec<_>>()
            .await
            .expect_err("null name");
        assert!(matches!(err, ShardexError::Execution(_)), "{err}");
    }
}
