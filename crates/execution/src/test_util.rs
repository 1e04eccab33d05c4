//! Fixtures shared by the operator and task tests.

use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema, SchemaRef};
use shardex_codec::{encode_key, Value};
use shardex_common::{ExecConfig, JobId, Location, TableId, TaskId};
use shardex_exchange::{EndpointManager, LocalNetwork};
use shardex_storage::{calc_part_id, ranges_from_boundaries, MemoryStoreService, RangeDistribution, TableDefinition};
use tokio_util::sync::CancellationToken;

use crate::context::{NodeServices, SharedTaskContext, TaskContext};

pub(crate) fn int_str_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, true),
    ]))
}

/// A node with its own private network.
pub(crate) fn local_node(host: &str) -> Arc<NodeServices> {
    node_on(&Arc::new(LocalNetwork::new()), host)
}

pub(crate) fn node_on(network: &Arc<LocalNetwork>, host: &str) -> Arc<NodeServices> {
    let location = Location::new(host, 7000);
    let endpoints = Arc::new(EndpointManager::new(location.clone()));
    network.register(endpoints.clone());
    Arc::new(NodeServices {
        location,
        endpoints,
        channels: network.clone(),
        stores: Arc::new(MemoryStoreService::new()),
        config: ExecConfig {
            batch_size_rows: 2,
            exchange_queue_capacity: 4,
            connect_timeout_ms: 500,
            ..ExecConfig::default()
        },
    })
}

pub(crate) fn task_ctx(node: Arc<NodeServices>) -> SharedTaskContext {
    Arc::new(TaskContext {
        job_id: JobId(1),
        task_id: TaskId(1),
        node,
        cancel: CancellationToken::new(),
    })
}

/// `users(id, name)` split at 10 and 20, every partition at `location`.
pub(crate) fn users_table(location: &Location) -> (TableDefinition, Vec<RangeDistribution>) {
    users_split(&[location.clone(), location.clone(), location.clone()])
}

pub(crate) fn remote_users(host: &str) -> (TableDefinition, Vec<RangeDistribution>) {
    users_table(&Location::new(host, 7000))
}

pub(crate) fn users_split(locations: &[Location]) -> (TableDefinition, Vec<RangeDistribution>) {
    let table = TableDefinition {
        id: TableId(1),
        name: "users".to_string(),
        schema: int_str_schema(),
        key_columns: vec![0],
        partition: None,
    };
    let bounds = vec![encode_key(&[Value::Int(10)]), encode_key(&[Value::Int(20)])];
    let dists = ranges_from_boundaries(&bounds, locations).expect("ranges");
    (table, dists)
}

/// Write rows straight into the owning partitions on `node`.
pub(crate) fn insert_rows(
    node: &NodeServices,
    table: &TableDefinition,
    dists: &[RangeDistribution],
    rows: &[(i64, &str)],
) {
    let codec = table.codec().expect("codec");
    for (id, name) in rows {
        let kv = codec
            .encode(&[Value::Int(*id), Value::Str(name.to_string())])
            .expect("encode");
        let part = calc_part_id(table.partition_func(), &kv.key, dists).expect("partition");
        let store = node.stores.instance(table.id, part).expect("store");
        assert!(store.insert(kv).expect("insert"));
    }
}
