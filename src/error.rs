use std::fmt::{self, Display, Formatter};

/// Every fault the VM can raise. All of them abort the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Negative or non-integer array length.
    Allocation,
    /// A value that must be non-null was null.
    NullDereference,
    /// Array, list or string index outside `[0, length)`.
    Bounds,
    /// Divisor equal to zero.
    Division,
    /// String to number conversion failed.
    Conversion,
    /// An operand or object id of the wrong kind.
    TypeConfusion,
    /// Missing entry point or unregistered callee.
    Configuration,
    /// Operand stack underflow, unknown slot and similar stream defects.
    InvalidBytecode,
    /// Reading the input stream or writing the output stream failed.
    Io,
}

impl Display for FaultKind {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let name = match self {
            FaultKind::Allocation => "allocation",
            FaultKind::NullDereference => "null dereference",
            FaultKind::Bounds => "bounds",
            FaultKind::Division => "division",
            FaultKind::Conversion => "conversion",
            FaultKind::TypeConfusion => "type confusion",
            FaultKind::Configuration => "configuration",
            FaultKind::InvalidBytecode => "invalid bytecode",
            FaultKind::Io => "i/o",
        };
        write!(f, "{}", name)
    }
}

/// Where a fault happened: function, offset of the faulting instruction and
/// the instruction itself.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultLocation {
    pub function: String,
    pub offset: usize,
    pub instruction: String,
}

impl Display for FaultLocation {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "in {} at {}: {}",
            self.function, self.offset, self.instruction
        )
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind} error: {message}{}", display_location(.location))]
pub struct VmError {
    pub kind: FaultKind,
    pub message: String,
    pub location: Option<FaultLocation>,
}

fn display_location(location: &Option<FaultLocation>) -> String {
    match location {
        Some(location) => format!(" ({})", location),
        None => String::new(),
    }
}

impl VmError {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
        }
    }

    /// Attaches a location unless one is already present.
    pub fn at(mut self, location: FaultLocation) -> Self {
        if self.location.is_none() {
            self.location = Some(location);
        }
        self
    }

    pub fn null(message: impl Into<String>) -> Self {
        Self::new(FaultKind::NullDereference, message)
    }

    pub fn bounds(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Bounds, message)
    }

    pub fn type_confusion(message: impl Into<String>) -> Self {
        Self::new(FaultKind::TypeConfusion, message)
    }

    pub fn invalid_bytecode(message: impl Into<String>) -> Self {
        Self::new(FaultKind::InvalidBytecode, message)
    }
}

pub type VmResult<T> = std::result::Result<T, VmError>;
