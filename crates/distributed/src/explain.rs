use std::fmt::Write;

use shardex_execution::{Operator, OperatorKind, Task};
use shardex_planner::fmt_expr;

use crate::job::Job;

/// Render a job as text: one block per task, operators in id order with
/// their links and exchange tags.
pub fn explain_job(job: &Job) -> String {
    let mut out = format!("Job {}\n", job.id());
    for task in job.tasks() {
        fmt_task(&task, &mut out);
    }
    out
}

fn fmt_task(task: &Task, out: &mut String) {
    let _ = writeln!(out, "  Task {} @{}", task.id, task.location);
    for op in task.operators.values() {
        let _ = writeln!(out, "    {}", fmt_operator(op));
    }
}

fn fmt_operator(op: &Operator) -> String {
    let detail = match &op.kind {
        OperatorKind::Values(v) => format!(" rows={}", v.rows.len()),
        OperatorKind::GetByKeys(g) => format!(" table={} keys={}", g.source.table.name, g.keys.len()),
        OperatorKind::PartScan(p) => format!(
            " table={} partition={}",
            p.source.table.name,
            p.partition.map(|id| id.to_string()).unwrap_or_else(|| "local".to_string())
        ),
        OperatorKind::Filter(f) => format!(" {}", fmt_expr(&f.predicate)),
        OperatorKind::Project(p) => format!(" exprs={}", p.exprs.len()),
        OperatorKind::HashJoin(j) => format!(" probe={:?} build={:?}", j.probe_keys, j.build_keys),
        OperatorKind::Modify(m) => format!(" {:?} table={}", m.kind, m.table.name),
        OperatorKind::Send(s) => format!(" tag={} to={}", s.tag, s.target),
        OperatorKind::Receive(r) => format!(" tag={} from={}", r.tag, r.source),
        OperatorKind::SumUp | OperatorKind::Root => String::new(),
    };
    let links: Vec<String> = op
        .outputs
        .iter()
        .filter_map(|o| o.link.map(|l| format!("{}:{}", l.operator, l.input)))
        .collect();
    if links.is_empty() {
        format!("#{} {}{detail}", op.id, op.name())
    } else {
        format!("#{} {}{detail} -> {}", op.id, op.name(), links.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_schema::{DataType, Field, Schema};
    use shardex_codec::Value;
    use shardex_common::{JobId, Location};
    use shardex_planner::{PhysicalOp, PlanNode, ValuesExec};

    use super::explain_job;
    use crate::builder::build_job;

    #[test]
    fn explain_shows_tasks_and_exchange_tags() {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let values = PlanNode::new(
            PhysicalOp::Values(ValuesExec {
                schema,
                rows: vec![vec![Value::Int(1)], vec![Value::Int(2)]],
            }),
            vec![],
        )
        .at(Location::new("a", 1));
        let plan = PlanNode::new(PhysicalOp::Root, vec![values]).at(Location::new("b", 1));
        let job = build_job(JobId(5), &plan).expect("build");
        let text = explain_job(&job);
        // ids: values 1, task a 2, receive 3, send 4, task b 5, root 6
        assert_eq!(
            text,
            "Job 5\n\
             \x20 Task 2 @a:1\n\
             \x20   #1 Values rows=2 -> 4:0\n\
             \x20   #4 Send tag=5-3 to=b:1\n\
             \x20 Task 5 @b:1\n\
             \x20   #3 Receive tag=5-3 from=a:1 -> 6:0\n\
             \x20   #6 Root\n"
        );
    }
}
