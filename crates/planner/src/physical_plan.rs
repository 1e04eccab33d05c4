use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema, SchemaRef};
use serde::{Deserialize, Serialize};
use shardex_codec::Tuple;
use shardex_common::{Location, PartitionId, Result, ShardexError};
use shardex_storage::{validate_distributions, RangeDistribution, TableDefinition};

use crate::expr::Expr;

/// One node of the physical plan.
///
/// `location` is the node the operator must run on. A node without one runs
/// where its first input runs; a leaf must always carry a location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNode {
    #[serde(default)]
    pub location: Option<Location>,
    pub op: PhysicalOp,
    #[serde(default)]
    pub inputs: Vec<PlanNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PhysicalOp {
    /// Literal rows.
    Values(ValuesExec),
    /// Point lookups by primary key.
    GetByKeys(GetByKeysExec),
    /// Range scan of one or all partitions.
    PartScan(PartScanExec),
    /// Row filter.
    Filter(FilterExec),
    /// Projection.
    Project(ProjectExec),
    /// Inner equi-join; input 0 probes, input 1 builds.
    HashJoin(HashJoinExec),
    /// Insert, update or delete through the partition router.
    Modify(ModifyExec),
    /// Sums the row counts of its inputs.
    SumUp,
    /// Terminal collector at the coordinating location.
    Root,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuesExec {
    pub schema: SchemaRef,
    pub rows: Vec<Tuple>,
}

/// Reads whole rows of `table`; `filter` sees the full row and `selection`
/// picks output columns afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSource {
    pub table: TableDefinition,
    pub distributions: Vec<RangeDistribution>,
    #[serde(default)]
    pub filter: Option<Expr>,
    #[serde(default)]
    pub selection: Option<Vec<usize>>,
}

impl TableSource {
    pub fn output_schema(&self) -> Result<SchemaRef> {
        match &self.selection {
            None => Ok(self.table.schema.clone()),
            Some(cols) => {
                let projected = self.table.schema.project(cols).map_err(|e| {
                    ShardexError::Construction(format!("bad selection on '{}': {e}", self.table.name))
                })?;
                Ok(Arc::new(projected))
            }
        }
    }

    fn validate(&self) -> Result<()> {
        check_distributions(&self.table, &self.distributions)?;
        if let Some(f) = &self.filter {
            f.validate(&self.table.schema)?;
        }
        self.output_schema().map(|_| ())
    }
}

fn check_distributions(table: &TableDefinition, distributions: &[RangeDistribution]) -> Result<()> {
    validate_distributions(table.partition_func(), distributions).map_err(|e| match e {
        ShardexError::Construction(m) => {
            ShardexError::Construction(format!("distribution table of '{}': {m}", table.name))
        }
        other => other,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetByKeysExec {
    pub source: TableSource,
    /// Key tuples, one value per key column.
    pub keys: Vec<Tuple>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartScanExec {
    pub source: TableSource,
    /// Partition to scan; every partition in the distribution table if absent.
    #[serde(default)]
    pub partition: Option<PartitionId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterExec {
    pub predicate: Expr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectExec {
    pub exprs: Vec<Expr>,
    /// Output schema, one field per expression.
    pub schema: SchemaRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashJoinExec {
    pub probe_keys: Vec<usize>,
    pub build_keys: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModifyKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifyExec {
    pub kind: ModifyKind,
    pub table: TableDefinition,
    pub distributions: Vec<RangeDistribution>,
}

/// Schema of the row-count tuple produced by mutations and sum-up.
pub fn count_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new("count", DataType::Int64, false)]))
}

impl PhysicalOp {
    pub fn name(&self) -> &'static str {
        match self {
            PhysicalOp::Values(_) => "Values",
            PhysicalOp::GetByKeys(_) => "GetByKeys",
            PhysicalOp::PartScan(_) => "PartScan",
            PhysicalOp::Filter(_) => "Filter",
            PhysicalOp::Project(_) => "Project",
            PhysicalOp::HashJoin(_) => "HashJoin",
            PhysicalOp::Modify(_) => "Modify",
            PhysicalOp::SumUp => "SumUp",
            PhysicalOp::Root => "Root",
        }
    }

    /// Output schema given the schemas of the node's inputs. Also checks the
    /// input arity and the operator parameters against those schemas.
    pub fn output_schema(&self, inputs: &[SchemaRef]) -> Result<SchemaRef> {
        let arity = |want: usize| -> Result<()> {
            if inputs.len() != want {
                return Err(ShardexError::Construction(format!(
                    "{} expects {want} input(s), got {}",
                    self.name(),
                    inputs.len()
                )));
            }
            Ok(())
        };
        match self {
            PhysicalOp::Values(v) => {
                arity(0)?;
                if let Some(bad) = v.rows.iter().find(|r| r.len() != v.schema.fields().len()) {
                    return Err(ShardexError::Construction(format!(
                        "values row has {} cells, schema has {} columns",
                        bad.len(),
                        v.schema.fields().len()
                    )));
                }
                Ok(v.schema.clone())
            }
            PhysicalOp::GetByKeys(g) => {
                arity(0)?;
                g.source.validate()?;
                g.source.output_schema()
            }
            PhysicalOp::PartScan(p) => {
                arity(0)?;
                p.source.validate()?;
                p.source.output_schema()
            }
            PhysicalOp::Filter(f) => {
                arity(1)?;
                f.predicate.validate(&inputs[0])?;
                Ok(inputs[0].clone())
            }
            PhysicalOp::Project(p) => {
                arity(1)?;
                if p.exprs.len() != p.schema.fields().len() {
                    return Err(ShardexError::Construction(format!(
                        "project has {} expressions for {} output columns",
                        p.exprs.len(),
                        p.schema.fields().len()
                    )));
                }
                for e in &p.exprs {
                    e.validate(&inputs[0])?;
                }
                Ok(p.schema.clone())
            }
            PhysicalOp::HashJoin(j) => {
                arity(2)?;
                if j.probe_keys.is_empty() || j.probe_keys.len() != j.build_keys.len() {
                    return Err(ShardexError::Construction(
                        "hash join needs the same non-zero number of keys on both sides".to_string(),
                    ));
                }
                let (probe, build) = (&inputs[0], &inputs[1]);
                if j.probe_keys.iter().any(|&k| k >= probe.fields().len())
                    || j.build_keys.iter().any(|&k| k >= build.fields().len())
                {
                    return Err(ShardexError::Construction("hash join key out of range".to_string()));
                }
                let fields = probe
                    .fields()
                    .iter()
                    .chain(build.fields().iter())
                    .cloned()
                    .collect::<Vec<_>>();
                Ok(Arc::new(Schema::new(fields)))
            }
            PhysicalOp::Modify(m) => {
                arity(1)?;
                m.table.codec()?;
                check_distributions(&m.table, &m.distributions)?;
                let want = m.table.schema.fields().len();
                if inputs[0].fields().len() != want {
                    return Err(ShardexError::Construction(format!(
                        "{:?} into '{}' gets {} columns, expects {want}",
                        m.kind,
                        m.table.name,
                        inputs[0].fields().len()
                    )));
                }
                Ok(count_schema())
            }
            PhysicalOp::SumUp => {
                if inputs.is_empty() {
                    return Err(ShardexError::Construction("SumUp needs at least one input".to_string()));
                }
                if inputs.iter().any(|s| s.as_ref() != count_schema().as_ref()) {
                    return Err(ShardexError::Construction(
                        "SumUp inputs must be row counts".to_string(),
                    ));
                }
                Ok(count_schema())
            }
            PhysicalOp::Root => {
                arity(1)?;
                Ok(inputs[0].clone())
            }
        }
    }
}

impl PlanNode {
    pub fn new(op: PhysicalOp, inputs: Vec<PlanNode>) -> Self {
        Self {
            location: None,
            op,
            inputs,
        }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Output schema of this subtree.
    pub fn schema(&self) -> Result<SchemaRef> {
        let inputs = self
            .inputs
            .iter()
            .map(PlanNode::schema)
            .collect::<Result<Vec<_>>>()?;
        self.op.output_schema(&inputs)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_schema::{DataType, Field, Schema};
    use shardex_codec::{encode_key, Value};
    use shardex_common::{Location, ShardexError, TableId};
    use shardex_storage::{ranges_from_boundaries, TableDefinition};

    use super::{count_schema, ModifyExec, ModifyKind, PhysicalOp, PlanNode, ValuesExec};

    fn table() -> TableDefinition {
        TableDefinition {
            id: TableId(1),
            name: "orders".to_string(),
            schema: Arc::new(Schema::new(vec![
                Field::new("id", DataType::Int64, false),
                Field::new("amount", DataType::Float64, true),
            ])),
            key_columns: vec![0],
            partition: None,
        }
    }

    fn insert_plan(rows: Vec<Vec<Value>>) -> PlanNode {
        let values = PlanNode::new(
            PhysicalOp::Values(ValuesExec {
                schema: table().schema.clone(),
                rows,
            }),
            vec![],
        )
        .at(Location::new("a", 1));
        PlanNode::new(
            PhysicalOp::Modify(ModifyExec {
                kind: ModifyKind::Insert,
                table: table(),
                distributions: vec![],
            }),
            vec![values],
        )
    }

    #[test]
    fn modify_outputs_row_count() {
        let plan = insert_plan(vec![vec![Value::Int(1), Value::Double(2.0)]]);
        assert_eq!(plan.schema().expect("schema"), count_schema());
    }

    #[test]
    fn ragged_values_are_a_construction_error() {
        let plan = insert_plan(vec![vec![Value::Int(1)]]);
        assert!(plan.schema().is_err());
    }

    #[test]
    fn unsorted_distribution_table_is_a_construction_error() {
        let locs = [Location::new("a", 1), Location::new("b", 1)];
        let mut dists = ranges_from_boundaries(&[encode_key(&[Value::Int(100)])], &locs).expect("ranges");
        dists.reverse();
        let mut plan = insert_plan(vec![vec![Value::Int(150), Value::Double(1.0)]]);
        if let PhysicalOp::Modify(m) = &mut plan.op {
            m.distributions = dists;
        }
        let err = plan.schema().unwrap_err();
        assert!(matches!(err, ShardexError::Construction(_)));
        assert!(err.to_string().contains("distribution table of 'orders'"), "{err}");
    }

    #[test]
    fn root_requires_one_input() {
        assert!(PlanNode::new(PhysicalOp::Root, vec![]).schema().is_err());
    }
}
