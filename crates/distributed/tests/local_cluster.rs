use std::time::Duration;

use shardex_codec::{encode_key, Value};
use shardex_common::{JobId, Location, OperatorId, PartitionId, ShardexError, Tag};
use shardex_distributed::{build_job, Job, LocalCluster};
use shardex_execution::{Operator, OperatorKind, ReceiveExec, SendExec};
use shardex_planner::{ModifyKind, PhysicalOp, PlanNode, ValuesExec};
use shardex_storage::calc_part_id;
use shardex_transaction::{LockType, TransactionService, TxnState};
use tokio_util::sync::CancellationToken;

#[path = "support/mod.rs"]
mod support;

use support::{
    config, double_amount, loc, modify, orders_schema, range_table, row, rows_in_partition, scan, stored_rows,
    values,
};

/// Values at `a` sent under one tag while the root at `b` receives another,
/// so both tasks wait until the job is cancelled.
fn stalled_job(id: JobId, a: &Location, b: &Location) -> Job {
    let job = Job::new(id);
    let schema = orders_schema();
    let source = job.next_operator_id();
    let rows = PhysicalOp::Values(ValuesExec {
        schema: schema.clone(),
        rows: vec![row(1, 1.0)],
    });
    job.add_operator(a, Operator::new(source, rows.into(), vec![], schema.clone()))
        .expect("values");
    let send = job.next_operator_id();
    let to_b = SendExec {
        target: b.clone(),
        tag: Tag::new(id, OperatorId(1_000)),
    };
    job.add_operator(a, Operator::new(send, OperatorKind::Send(to_b), vec![schema.clone()], schema.clone()))
        .expect("send");
    job.link(a, source, 0, send, 0).expect("link a");

    let receive = job.next_operator_id();
    let from_a = ReceiveExec {
        source: a.clone(),
        tag: Tag::new(id, receive),
    };
    job.add_operator(b, Operator::new(receive, OperatorKind::Receive(from_a), vec![], schema.clone()))
        .expect("receive");
    let root = job.next_operator_id();
    job.add_operator(b, Operator::new(root, OperatorKind::Root, vec![schema.clone()], schema))
        .expect("root");
    job.link(b, receive, 0, root, 0).expect("link b");
    job
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn insert_routes_to_first_partition_and_counts_one() {
    let a = loc("a");
    let cluster = LocalCluster::new(&[a.clone()], config());
    let (orders, dists) = range_table(1, "orders", &[a.clone()]);

    let key = encode_key(&[Value::Int(1)]);
    assert_eq!(calc_part_id(orders.partition_func(), &key, &dists).expect("route"), PartitionId(1));

    let plan = modify(ModifyKind::Insert, &orders, &dists, values(vec![row(1, 2.0)])).at(a.clone());
    let job = build_job(JobId(1), &plan).expect("build");
    let result = cluster.runner().run(&job).await.expect("run");
    assert_eq!(result.affected_rows(), Some(1));

    let node = cluster.node(&a).expect("node");
    assert_eq!(rows_in_partition(node, &orders, PartitionId(1)), 1);
    assert_eq!(rows_in_partition(node, &orders, PartitionId(2)), 0);
    assert_eq!(rows_in_partition(node, &orders, PartitionId(3)), 0);
    assert_eq!(stored_rows(node, &orders, &dists), vec![row(1, 2.0)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cross_node_update_applies_scanned_rows() {
    let (node_a, node_b) = (loc("node-a"), loc("node-b"));
    let cluster = LocalCluster::new(&[node_a.clone(), node_b.clone()], config());
    let runner = cluster.runner();
    let (staging, staging_dists) = range_table(1, "staging", &[node_a.clone()]);
    let (orders, orders_dists) = range_table(2, "orders", &[node_b.clone()]);

    let seed_staging = modify(
        ModifyKind::Insert,
        &staging,
        &staging_dists,
        values(vec![row(1, 10.0), row(2, 20.0), row(5, 50.0), row(150, 1.5)]),
    )
    .at(node_a.clone());
    let seeded = runner.run(&build_job(JobId(1), &seed_staging).expect("build")).await.expect("seed");
    assert_eq!(seeded.affected_rows(), Some(4));

    let seed_orders = modify(ModifyKind::Insert, &orders, &orders_dists, values(vec![row(1, 0.0), row(2, 0.0), row(150, 0.0)]))
        .at(node_b.clone());
    runner.run(&build_job(JobId(2), &seed_orders).expect("build")).await.expect("seed");

    // update orders from staging: id 5 has no order, so three rows change
    let update = modify(
        ModifyKind::Update,
        &orders,
        &orders_dists,
        double_amount(scan(&staging, &staging_dists, None).at(node_a.clone())),
    )
    .at(node_b.clone());
    let job = build_job(JobId(3), &update).expect("build");
    let result = runner.run(&job).await.expect("update");
    assert_eq!(result.affected_rows(), Some(3));

    let node = cluster.node(&node_b).expect("node-b");
    assert_eq!(
        stored_rows(node, &orders, &orders_dists),
        vec![row(1, 20.0), row(2, 40.0), row(150, 3.0)]
    );
    // every endpoint of the finished jobs is gone
    assert_eq!(node.endpoints().endpoint_count(), 0);
    assert_eq!(cluster.node(&node_a).expect("node-a").endpoints().endpoint_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sum_up_adds_counts_from_every_partition_owner() {
    let (a, b, c) = (loc("a"), loc("b"), loc("c"));
    let cluster = LocalCluster::new(&[a.clone(), b.clone(), c.clone()], config());
    let (orders, dists) = range_table(1, "orders", &[a.clone(), b.clone(), c.clone()]);

    let part = |rows, at: &shardex_common::Location| modify(ModifyKind::Insert, &orders, &dists, values(rows)).at(at.clone());
    let plan = PlanNode::new(
        PhysicalOp::SumUp,
        vec![
            part(vec![row(1, 1.0), row(2, 1.0)], &a),
            part(vec![row(100, 1.0), row(150, 1.0), row(199, 1.0)], &b),
            part(vec![row(500, 1.0)], &c),
        ],
    )
    .at(a.clone());
    let job = build_job(JobId(1), &plan).expect("build");
    let result = cluster.runner().run(&job).await.expect("run");
    assert_eq!(result.affected_rows(), Some(6));
    assert_eq!(rows_in_partition(cluster.node(&b).expect("b"), &orders, PartitionId(2)), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn misrouted_row_fails_the_whole_job_with_the_routing_error() {
    let (a, b) = (loc("a"), loc("b"));
    let cluster = LocalCluster::new(&[a.clone(), b.clone()], config());
    let (orders, dists) = range_table(1, "orders", &[a.clone(), b.clone(), b.clone()]);

    // key 5 belongs to partition 1 at a, but the insert runs at b
    let plan = PlanNode::new(
        PhysicalOp::SumUp,
        vec![
            modify(ModifyKind::Insert, &orders, &dists, values(vec![row(1, 1.0)])).at(a.clone()),
            modify(ModifyKind::Insert, &orders, &dists, values(vec![row(150, 1.0), row(5, 1.0)])).at(b.clone()),
        ],
    )
    .at(a.clone());
    let job = build_job(JobId(1), &plan).expect("build");
    let err = cluster.runner().run(&job).await.expect_err("misrouted");
    assert!(matches!(err, ShardexError::Routing(_)), "unexpected error: {err}");
    let msg = err.to_string();
    assert!(msg.contains("orders"), "{msg}");
    assert!(msg.contains("a:7000"), "{msg}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_receiver_fails_the_job() {
    let (a, b) = (loc("a"), loc("b"));
    let cluster = LocalCluster::new(&[a.clone(), b.clone()], config());
    cluster.disconnect(&b);
    let plan = PlanNode::new(PhysicalOp::Root, vec![values(vec![row(1, 1.0)]).at(a.clone())]).at(b.clone());
    let job = build_job(JobId(1), &plan).expect("build");
    let err = tokio::time::timeout(Duration::from_secs(10), cluster.runner().run(&job))
        .await
        .expect("job ends")
        .expect_err("b is off the network");
    assert!(
        err.to_string().contains("could not reach location"),
        "unexpected error: {err}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn statements_run_under_table_write_locks() {
    let a = loc("a");
    let cluster = LocalCluster::new(&[a.clone()], config());
    let runner = cluster.runner();
    let txn = TransactionService::new(config());
    let (orders, dists) = range_table(1, "orders", &[a.clone()]);
    let insert = |id| modify(ModifyKind::Insert, &orders, &dists, values(vec![row(id, 1.0)])).at(a.clone());

    // implicit transaction: committed after the statement
    let s1 = txn.open_session();
    let job = build_job(JobId(1), &insert(1)).expect("build");
    let result = runner
        .run_in_transaction(&job, &txn, s1, "insert into orders values (1, 1.0)")
        .await
        .expect("insert");
    assert_eq!(result.affected_rows(), Some(1));
    assert_eq!(txn.state(s1).expect("state"), TxnState::Committed);
    assert_eq!(txn.get_mdl_info().count(), 0);

    // an explicit transaction keeps its lock after the statement
    let s2 = txn.open_session();
    let start_ts = txn.begin(s2, true).expect("begin");
    let job = build_job(JobId(2), &insert(2)).expect("build");
    runner
        .run_in_transaction(&job, &txn, s2, "insert into orders values (2, 1.0)")
        .await
        .expect("insert");
    assert!(matches!(txn.state(s2).expect("state"), TxnState::Active(_)));

    // a second writer now times out with a retryable error and runs nothing
    let s3 = txn.open_session();
    let job = build_job(JobId(3), &insert(3)).expect("build");
    let err = runner
        .run_in_transaction(&job, &txn, s3, "insert into orders values (3, 1.0)")
        .await
        .expect_err("locked");
    assert!(err.is_retryable());
    assert_eq!(txn.state(s3).expect("state"), TxnState::RolledBack);
    let node = cluster.node(&a).expect("node");
    assert_eq!(rows_in_partition(node, &orders, PartitionId(1)), 2);

    // while s2 is open its MDL entry is gone but its history is kept
    txn.register_mdl(s2, JobId(4), vec!["orders".to_string()]).expect("mdl");
    let rows: Vec<_> = txn.get_mdl_info().collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].job_id, 4);
    assert_eq!(rows[0].start_ts, start_ts);
    assert_eq!(rows[0].sql_history, "insert into orders values (2, 1.0);");

    txn.commit(s2).expect("commit");
    let s4 = txn.open_session();
    txn.begin(s4, true).expect("begin");
    txn.lock_table(s4, &["orders".to_string()], LockType::Write)
        .await
        .expect("lock free after commit");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_job_stops_tasks_at_every_location() {
    let (a, b) = (loc("a"), loc("b"));
    let cluster = LocalCluster::new(&[a.clone(), b.clone()], config());
    let job = stalled_job(JobId(1), &a, &b);
    let cancel = CancellationToken::new();
    let run = {
        let (runner, cancel) = (cluster.runner(), cancel.clone());
        tokio::spawn(async move { runner.run_with_cancel(&job, &cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!run.is_finished(), "both tasks wait for the other side");
    assert!(cluster.node(&a).expect("a").endpoints().endpoint_count() > 0);

    cancel.cancel();
    let err = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("job ends")
        .expect("join")
        .expect_err("cancelled");
    assert!(err.is_cancellation(), "unexpected error: {err}");
    assert_eq!(cluster.node(&a).expect("a").endpoints().endpoint_count(), 0);
    assert_eq!(cluster.node(&b).expect("b").endpoints().endpoint_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn killing_the_session_cancels_its_running_statement() {
    let (a, b) = (loc("a"), loc("b"));
    let cluster = LocalCluster::new(&[a.clone(), b.clone()], config());
    let txn = std::sync::Arc::new(TransactionService::new(config()));
    let session = txn.open_session();
    let run = {
        let (runner, txn) = (cluster.runner(), txn.clone());
        let job = stalled_job(JobId(2), &a, &b);
        tokio::spawn(async move { runner.run_in_transaction(&job, &txn, session, "select 1").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!run.is_finished());

    txn.kill(session).expect("kill");
    let err = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("statement ends")
        .expect("join")
        .expect_err("killed");
    assert!(err.is_cancellation(), "unexpected error: {err}");
    assert_eq!(txn.state(session).expect("state"), TxnState::RolledBack);
    assert_eq!(cluster.node(&b).expect("b").endpoints().endpoint_count(), 0);
}
