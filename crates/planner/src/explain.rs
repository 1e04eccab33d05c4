use crate::expr::Expr;
use crate::physical_plan::{PhysicalOp, PlanNode, TableSource};

/// Render a physical plan as human-readable multiline text.
pub fn explain_plan(plan: &PlanNode) -> String {
    let mut s = String::new();
    fmt_plan(plan, 0, &mut s);
    s
}

fn fmt_plan(plan: &PlanNode, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    let at = plan
        .location
        .as_ref()
        .map(|l| format!(" @{l}"))
        .unwrap_or_default();
    match &plan.op {
        PhysicalOp::Values(v) => {
            out.push_str(&format!("{pad}Values rows={}{at}\n", v.rows.len()));
        }
        PhysicalOp::GetByKeys(g) => {
            out.push_str(&format!("{pad}GetByKeys keys={}{at}\n", g.keys.len()));
            fmt_source(&g.source, &pad, out);
        }
        PhysicalOp::PartScan(p) => {
            let part = p
                .partition
                .map(|id| id.to_string())
                .unwrap_or_else(|| "all".to_string());
            out.push_str(&format!("{pad}PartScan partition={part}{at}\n"));
            fmt_source(&p.source, &pad, out);
        }
        PhysicalOp::Filter(f) => {
            out.push_str(&format!("{pad}Filter {}{at}\n", fmt_expr(&f.predicate)));
        }
        PhysicalOp::Project(p) => {
            out.push_str(&format!("{pad}Project{at}\n"));
            for (e, field) in p.exprs.iter().zip(p.schema.fields()) {
                out.push_str(&format!("{pad}  {} := {}\n", field.name(), fmt_expr(e)));
            }
        }
        PhysicalOp::HashJoin(j) => {
            out.push_str(&format!(
                "{pad}HashJoin probe={:?} build={:?}{at}\n",
                j.probe_keys, j.build_keys
            ));
        }
        PhysicalOp::Modify(m) => {
            out.push_str(&format!(
                "{pad}Modify {:?} table={} partitions={}{at}\n",
                m.kind,
                m.table.name,
                m.distributions.len()
            ));
        }
        PhysicalOp::SumUp => out.push_str(&format!("{pad}SumUp{at}\n")),
        PhysicalOp::Root => out.push_str(&format!("{pad}Root{at}\n")),
    }
    for input in &plan.inputs {
        fmt_plan(input, indent + 1, out);
    }
}

fn fmt_source(source: &TableSource, pad: &str, out: &mut String) {
    out.push_str(&format!("{pad}  table={} func={}\n", source.table.name, source.table.partition_func()));
    if let Some(f) = &source.filter {
        out.push_str(&format!("{pad}  filter={}\n", fmt_expr(f)));
    }
    if let Some(sel) = &source.selection {
        out.push_str(&format!("{pad}  selection={sel:?}\n"));
    }
}

pub fn fmt_expr(e: &Expr) -> String {
    match e {
        Expr::Column(idx) => format!("#{idx}"),
        Expr::Literal(v) => v.to_string(),
        Expr::Cast { expr, to_type } => format!("cast({} as {to_type})", fmt_expr(expr)),
        Expr::Not(x) => format!("NOT ({})", fmt_expr(x)),
        Expr::IsNull(x) => format!("({}) IS NULL", fmt_expr(x)),
        Expr::And(a, b) => format!("({}) AND ({})", fmt_expr(a), fmt_expr(b)),
        Expr::Or(a, b) => format!("({}) OR ({})", fmt_expr(a), fmt_expr(b)),
        Expr::BinaryOp { left, op, right } => {
            format!("({}) {} ({})", fmt_expr(left), op.symbol(), fmt_expr(right))
        }
    }
}
