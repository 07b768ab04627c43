// Operator Slots
// Typed, indexed connection points of operators

use crate::plan::operator::OperatorId;
use crate::plan::types::DataSetType;

use std::fmt;

/// Address of an input slot within an operator graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputRef {
    pub operator: OperatorId,
    pub index: usize,
}

/// Address of an output slot within an operator graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputRef {
    pub operator: OperatorId,
    pub index: usize,
}

impl InputRef {
    pub fn new(operator: OperatorId, index: usize) -> Self {
        Self { operator, index }
    }
}

impl OutputRef {
    pub fn new(operator: OperatorId, index: usize) -> Self {
        Self { operator, index }
    }
}

impl fmt::Display for InputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.in{}", self.operator, self.index)
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.out{}", self.operator, self.index)
    }
}

/// Input of an operator; fed by at most one output
#[derive(Debug, Clone)]
pub struct InputSlot {
    name: String,
    owner: OperatorId,
    index: usize,
    data_type: DataSetType,
    /// Broadcast inputs are appended after the regular inputs
    broadcast: bool,
    occupant: Option<OutputRef>,
}

impl InputSlot {
    pub(crate) fn new(
        name: impl Into<String>,
        owner: OperatorId,
        index: usize,
        data_type: DataSetType,
    ) -> Self {
        Self {
            name: name.into(),
            owner,
            index,
            data_type,
            broadcast: false,
            occupant: None,
        }
    }

    pub(crate) fn broadcast(
        name: impl Into<String>,
        owner: OperatorId,
        index: usize,
        data_type: DataSetType,
    ) -> Self {
        Self {
            broadcast: true,
            ..Self::new(name, owner, index, data_type)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> OperatorId {
        self.owner
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn data_type(&self) -> &DataSetType {
        &self.data_type
    }

    pub fn is_broadcast(&self) -> bool {
        self.broadcast
    }

    /// The output currently feeding this input
    pub fn occupant(&self) -> Option<OutputRef> {
        self.occupant
    }

    pub fn is_connected(&self) -> bool {
        self.occupant.is_some()
    }

    pub fn address(&self) -> InputRef {
        InputRef::new(self.owner, self.index)
    }

    pub(crate) fn set_occupant(&mut self, occupant: Option<OutputRef>) {
        self.occupant = occupant;
    }
}

/// Output of an operator; may feed any number of inputs
#[derive(Debug, Clone)]
pub struct OutputSlot {
    name: String,
    owner: OperatorId,
    index: usize,
    data_type: DataSetType,
    occupied_by: Vec<InputRef>,
}

impl OutputSlot {
    pub(crate) fn new(
        name: impl Into<String>,
        owner: OperatorId,
        index: usize,
        data_type: DataSetType,
    ) -> Self {
        Self {
            name: name.into(),
            owner,
            index,
            data_type,
            occupied_by: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> OperatorId {
        self.owner
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn data_type(&self) -> &DataSetType {
        &self.data_type
    }

    /// Inputs consuming this output, in connection order
    pub fn occupied_by(&self) -> &[InputRef] {
        &self.occupied_by
    }

    pub fn is_connected(&self) -> bool {
        !self.occupied_by.is_empty()
    }

    pub fn address(&self) -> OutputRef {
        OutputRef::new(self.owner, self.index)
    }

    pub(crate) fn add_consumer(&mut self, input: InputRef) {
        if !self.occupied_by.contains(&input) {
            self.occupied_by.push(input);
        }
    }

    pub(crate) fn remove_consumer(&mut self, input: InputRef) {
        self.occupied_by.retain(|existing| *existing != input);
    }
}
