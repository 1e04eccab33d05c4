use arrow_schema::SchemaRef;
use serde::{Deserialize, Serialize};
use shardex_common::{Location, OperatorId, PartitionId, Tag};
use shardex_planner::{
    FilterExec, GetByKeysExec, HashJoinExec, ModifyExec, PartScanExec, PhysicalOp, ProjectExec,
    ValuesExec,
};

/// Ships its single input to the receive operator named by `tag` at `target`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendExec {
    pub target: Location,
    pub tag: Tag,
}

/// Emits the stream shipped by the send operator at `source` for `tag`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveExec {
    pub source: Location,
    pub tag: Tag,
}

/// Closed set of operator kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperatorKind {
    Values(ValuesExec),
    GetByKeys(GetByKeysExec),
    PartScan(PartScanExec),
    Filter(FilterExec),
    Project(ProjectExec),
    HashJoin(HashJoinExec),
    Modify(ModifyExec),
    SumUp,
    Root,
    Send(SendExec),
    Receive(ReceiveExec),
}

impl OperatorKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperatorKind::Values(_) => "Values",
            OperatorKind::GetByKeys(_) => "GetByKeys",
            OperatorKind::PartScan(_) => "PartScan",
            OperatorKind::Filter(_) => "Filter",
            OperatorKind::Project(_) => "Project",
            OperatorKind::HashJoin(_) => "HashJoin",
            OperatorKind::Modify(_) => "Modify",
            OperatorKind::SumUp => "SumUp",
            OperatorKind::Root => "Root",
            OperatorKind::Send(_) => "Send",
            OperatorKind::Receive(_) => "Receive",
        }
    }

    /// Operators without outputs; they drive their task.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperatorKind::Send(_) | OperatorKind::Root)
    }
}

impl From<PhysicalOp> for OperatorKind {
    fn from(op: PhysicalOp) -> Self {
        match op {
            PhysicalOp::Values(x) => OperatorKind::Values(x),
            PhysicalOp::GetByKeys(x) => OperatorKind::GetByKeys(x),
            PhysicalOp::PartScan(x) => OperatorKind::PartScan(x),
            PhysicalOp::Filter(x) => OperatorKind::Filter(x),
            PhysicalOp::Project(x) => OperatorKind::Project(x),
            PhysicalOp::HashJoin(x) => OperatorKind::HashJoin(x),
            PhysicalOp::Modify(x) => OperatorKind::Modify(x),
            PhysicalOp::SumUp => OperatorKind::SumUp,
            PhysicalOp::Root => OperatorKind::Root,
        }
    }
}

/// Scheduling hints attached to an output, carried across exchanges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputHint {
    /// Partition the output's rows come from, when known.
    #[serde(default)]
    pub partition: Option<PartitionId>,
    /// The output is a row count to be summed with its siblings.
    #[serde(default)]
    pub to_sum_up: bool,
}

/// Consumer end of an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub operator: OperatorId,
    pub input: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSlot {
    pub schema: SchemaRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub schema: SchemaRef,
    #[serde(default)]
    pub link: Option<Link>,
    #[serde(default)]
    pub hint: OutputHint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operator {
    pub id: OperatorId,
    pub kind: OperatorKind,
    pub inputs: Vec<InputSlot>,
    pub outputs: Vec<Output>,
}

impl Operator {
    /// An operator with one input slot per schema in `inputs` and, unless it
    /// is terminal, a single output of `output_schema`.
    pub fn new(id: OperatorId, kind: OperatorKind, inputs: Vec<SchemaRef>, output_schema: SchemaRef) -> Self {
        let outputs = if kind.is_terminal() {
            Vec::new()
        } else {
            vec![Output {
                schema: output_schema,
                link: None,
                hint: OutputHint::default(),
            }]
        };
        Self {
            id,
            kind,
            inputs: inputs.into_iter().map(|schema| InputSlot { schema }).collect(),
            outputs,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}
