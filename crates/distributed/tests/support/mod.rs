#![allow(dead_code)]

use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema, SchemaRef};
use shardex_codec::{encode_key, Tuple, Value};
use shardex_common::{ExecConfig, Location, PartitionId, TableId};
use shardex_distributed::Node;
use shardex_execution::{OperatorKind, Task};
use shardex_planner::{
    BinaryOp, Expr, ModifyExec, ModifyKind, PartScanExec, PhysicalOp, PlanNode, ProjectExec, TableSource,
    ValuesExec,
};
use shardex_storage::{ranges_from_boundaries, RangeDistribution, TableDefinition};

pub fn loc(host: &str) -> Location {
    Location::new(host, 7000)
}

pub fn config() -> ExecConfig {
    ExecConfig {
        batch_size_rows: 2,
        exchange_queue_capacity: 4,
        connect_timeout_ms: 500,
        lock_wait_timeout_ms: 300,
        task_cancel_grace_ms: 2000,
    }
}

pub fn orders_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("amount", DataType::Float64, true),
    ]))
}

pub fn row(id: i64, amount: f64) -> Tuple {
    vec![Value::Int(id), Value::Double(amount)]
}

/// `(id, amount)` table split at 100 and 200; `owners` holds one location
/// per partition, or a single location owning all three.
pub fn range_table(id: u64, name: &str, owners: &[Location]) -> (TableDefinition, Vec<RangeDistribution>) {
    let table = TableDefinition {
        id: TableId(id),
        name: name.to_string(),
        schema: orders_schema(),
        key_columns: vec![0],
        partition: None,
    };
    let owners: Vec<Location> = match owners {
        [only] => vec![only.clone(); 3],
        many => many.to_vec(),
    };
    let bounds = vec![encode_key(&[Value::Int(100)]), encode_key(&[Value::Int(200)])];
    let dists = ranges_from_boundaries(&bounds, &owners).expect("ranges");
    (table, dists)
}

pub fn values(rows: Vec<Tuple>) -> PlanNode {
    PlanNode::new(
        PhysicalOp::Values(ValuesExec {
            schema: orders_schema(),
            rows,
        }),
        vec![],
    )
}

pub fn scan(table: &TableDefinition, dists: &[RangeDistribution], partition: Option<PartitionId>) -> PlanNode {
    PlanNode::new(
        PhysicalOp::PartScan(PartScanExec {
            source: TableSource {
                table: table.clone(),
                distributions: dists.to_vec(),
                filter: None,
                selection: None,
            },
            partition,
        }),
        vec![],
    )
}

/// `(id, amount * 2)` over an `(id, amount)` input.
pub fn double_amount(input: PlanNode) -> PlanNode {
    PlanNode::new(
        PhysicalOp::Project(ProjectExec {
            exprs: vec![
                Expr::col(0),
                Expr::binary(Expr::col(1), BinaryOp::Multiply, Expr::lit(Value::Double(2.0))),
            ],
            schema: orders_schema(),
        }),
        vec![input],
    )
}

pub fn modify(kind: ModifyKind, table: &TableDefinition, dists: &[RangeDistribution], input: PlanNode) -> PlanNode {
    PlanNode::new(
        PhysicalOp::Modify(ModifyExec {
            kind,
            table: table.clone(),
            distributions: dists.to_vec(),
        }),
        vec![input],
    )
}

/// Rows of `table` held by `node`, in key order.
pub fn stored_rows(node: &Node, table: &TableDefinition, dists: &[RangeDistribution]) -> Vec<Tuple> {
    let codec = table.codec().expect("codec");
    let mut out = Vec::new();
    for dist in dists.iter().filter(|d| &d.location == node.location()) {
        let store = node.services().stores.instance(table.id, dist.id).expect("store");
        for kv in store.scan(&[], &[]).expect("scan") {
            out.push(codec.decode(&kv).expect("decode"));
        }
    }
    out
}

pub fn rows_in_partition(node: &Node, table: &TableDefinition, part: PartitionId) -> usize {
    let store = node.services().stores.instance(table.id, part).expect("store");
    store.scan(&[], &[]).expect("scan").len()
}

pub fn operator_names(task: &Task) -> Vec<&'static str> {
    task.operators.values().map(|op| op.name()).collect()
}

pub fn send_tags(task: &Task) -> Vec<shardex_common::Tag> {
    task.operators
        .values()
        .filter_map(|op| match &op.kind {
            OperatorKind::Send(s) => Some(s.tag),
            _ => None,
        })
        .collect()
}

pub fn receive_tags(task: &Task) -> Vec<shardex_common::Tag> {
    task.operators
        .values()
        .filter_map(|op| match &op.kind {
            OperatorKind::Receive(r) => Some(r.tag),
            _ => None,
        })
        .collect()
}
