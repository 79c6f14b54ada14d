use crate::{
    error::{VmError, VmResult},
    instruction::Instruction,
    value::Value,
};
use std::{
    fmt::{self, Display, Formatter},
    rc::Rc,
};

/// Static description of one function: its name, how many arguments a call
/// moves into it, and its instruction stream.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FrameTemplate {
    pub function_name: String,
    pub arg_count: usize,
    pub instructions: Vec<Instruction>,
}

impl FrameTemplate {
    pub fn new(function_name: impl Into<String>, arg_count: usize) -> Self {
        Self {
            function_name: function_name.into(),
            arg_count,
            instructions: Vec::new(),
        }
    }

    pub fn with_instructions(
        function_name: impl Into<String>,
        arg_count: usize,
        instructions: Vec<Instruction>,
    ) -> Self {
        Self {
            function_name: function_name.into(),
            arg_count,
            instructions,
        }
    }

    pub fn disassemble(&self) -> String {
        self.instructions
            .iter()
            .enumerate()
            .map(|(offset, instruction)| format!("{:0>4} {}", offset, instruction))
            .collect::<Vec<String>>()
            .join("\n")
    }
}

impl Display for FrameTemplate {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        writeln!(f, "Frame {} ({} args)", self.function_name, self.arg_count)?;
        for (offset, instruction) in self.instructions.iter().enumerate() {
            writeln!(f, "  {:0>4} {}", offset, instruction)?;
        }
        Ok(())
    }
}

/// One live activation of a template.
#[derive(Debug, Clone)]
pub struct Frame {
    pub template: Rc<FrameTemplate>,
    pub pc: usize,
    pub operand_stack: Vec<Value>,
    pub variables: Vec<Value>,
}

impl Frame {
    pub fn new(template: Rc<FrameTemplate>) -> Self {
        Self {
            template,
            pc: 0,
            operand_stack: Vec::new(),
            variables: Vec::new(),
        }
    }

    pub fn function_name(&self) -> &str {
        &self.template.function_name
    }

    pub fn is_finished(&self) -> bool {
        self.pc >= self.template.instructions.len()
    }

    pub fn push(&mut self, value: Value) {
        self.operand_stack.push(value);
    }

    pub fn pop(&mut self) -> VmResult<Value> {
        self.operand_stack
            .pop()
            .ok_or_else(|| VmError::invalid_bytecode("operand stack underflow"))
    }

    pub fn peek(&self) -> Option<&Value> {
        self.operand_stack.last()
    }

    pub fn load(&self, slot: usize) -> VmResult<Value> {
        self.variables.get(slot).cloned().ok_or_else(|| {
            VmError::invalid_bytecode(format!("variable slot {} was never stored", slot))
        })
    }

    /// Overwrites an existing slot or creates it. Slots skipped over by a
    /// store past the end start out null.
    pub fn store(&mut self, slot: usize, value: Value) {
        if slot >= self.variables.len() {
            self.variables.resize(slot + 1, Value::Null);
        }
        self.variables[slot] = value;
    }
}
