use crate::{
    error::{FaultKind, FaultLocation, VmError, VmResult},
    frame::{Frame, FrameTemplate},
    heap::Heap,
    instruction::Instruction,
    value::Value,
};
use log::{debug, trace};
use std::{
    cmp::Ordering,
    collections::HashMap,
    fmt::{self, Display, Formatter},
    io::{self, BufRead, BufReader, Stdin, Stdout, Write},
    rc::Rc,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// Function `run` starts in. It must take no arguments.
    pub entry_point: String,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            entry_point: "main".to_string(),
        }
    }
}

pub struct VirtualMachine<R: BufRead = BufReader<Stdin>, W: Write = Stdout> {
    templates: HashMap<String, Rc<FrameTemplate>>,
    heap: Heap,
    call_stack: Vec<Frame>,
    config: VmConfig,
    input: R,
    output: W,
}

impl VirtualMachine {
    /// A VM reading `stdin` and writing `stdout`.
    pub fn new() -> Self {
        Self::with_io(
            VmConfig::default(),
            BufReader::new(io::stdin()),
            io::stdout(),
        )
    }
}

impl Default for VirtualMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: BufRead, W: Write> VirtualMachine<R, W> {
    pub fn with_io(config: VmConfig, input: R, output: W) -> Self {
        Self {
            templates: HashMap::new(),
            heap: Heap::new(),
            call_stack: Vec::new(),
            config,
            input,
            output,
        }
    }

    /// Registers a template, replacing any earlier one with the same name.
    pub fn add_frame_template(&mut self, template: FrameTemplate) {
        debug!(
            "registered {} ({} args, {} instructions)",
            template.function_name,
            template.arg_count,
            template.instructions.len()
        );
        self.templates
            .insert(template.function_name.clone(), Rc::new(template));
    }

    pub fn load(&mut self, templates: impl IntoIterator<Item = FrameTemplate>) {
        for template in templates {
            self.add_frame_template(template);
        }
    }

    pub fn template(&self, name: &str) -> Option<&FrameTemplate> {
        self.templates.get(name).map(|template| template.as_ref())
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    pub fn into_output(self) -> W {
        self.output
    }

    /// Runs the entry function until the call stack empties or a fault
    /// aborts the run. Output is flushed either way.
    pub fn run(&mut self) -> VmResult<()> {
        let entry = self.entry_template()?;
        debug!("running {}", entry.function_name);

        self.call_stack.clear();
        self.call_stack.push(Frame::new(entry));
        let result = self.execute();
        self.call_stack.clear();

        let flushed = self.output.flush().map_err(io_fault);
        match &result {
            Ok(()) => debug!("halted normally"),
            Err(error) => debug!("halted with {}", error),
        }
        result.and(flushed)
    }

    fn entry_template(&self) -> VmResult<Rc<FrameTemplate>> {
        let name = &self.config.entry_point;
        let template = self.templates.get(name).ok_or_else(|| {
            VmError::new(
                FaultKind::Configuration,
                format!("no \"{}\" function", name),
            )
        })?;
        if template.arg_count != 0 {
            return Err(VmError::new(
                FaultKind::Configuration,
                format!(
                    "entry function \"{}\" must take no arguments, takes {}",
                    name, template.arg_count
                ),
            ));
        }
        Ok(Rc::clone(template))
    }

    fn execute(&mut self) -> VmResult<()> {
        while let Some(frame) = self.call_stack.last_mut() {
            if frame.is_finished() {
                self.fall_off_end();
                continue;
            }

            let template = Rc::clone(&frame.template);
            let offset = frame.pc;
            let instruction = template.instructions[offset].clone();
            frame.pc += 1;
            trace!(
                "{} {:0>4} {:<12} top: {:?}",
                template.function_name,
                offset,
                instruction.to_string(),
                frame.peek()
            );

            self.step(instruction).map_err(|error| {
                error.at(FaultLocation {
                    function: template.function_name.clone(),
                    offset,
                    instruction: template.instructions[offset].to_string(),
                })
            })?;
        }
        Ok(())
    }

    /// A callee that runs out of instructions returns null. The entry frame
    /// running out of instructions ends the run.
    fn fall_off_end(&mut self) {
        if let Some(frame) = self.call_stack.pop() {
            trace!("{} ran past its last instruction", frame.function_name());
        }
        if let Some(caller) = self.call_stack.last_mut() {
            caller.push(Value::Null);
        }
    }

    fn frame(&mut self) -> VmResult<&mut Frame> {
        self.call_stack
            .last_mut()
            .ok_or_else(|| VmError::invalid_bytecode("no active frame"))
    }

    fn push(&mut self, value: Value) -> VmResult<()> {
        self.frame()?.push(value);
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Value> {
        self.frame()?.pop()
    }

    fn binary(&mut self, operation: impl FnOnce(Value, Value) -> VmResult<Value>) -> VmResult<()> {
        let right = self.pop()?;
        let left = self.pop()?;
        let result = operation(left, right)?;
        self.push(result)
    }

    fn step(&mut self, instruction: Instruction) -> VmResult<()> {
        match instruction {
            // literals and variables
            Instruction::Push(value) => self.push(value)?,
            Instruction::Pop => {
                self.pop()?;
            }
            Instruction::Load(slot) => {
                let value = self.frame()?.load(slot)?;
                self.push(value)?;
            }
            Instruction::Store(slot) => {
                let value = self.pop()?;
                self.frame()?.store(slot, value);
            }

            // operations
            Instruction::Add => self.binary(add)?,
            Instruction::Sub => self.binary(|left, right| {
                arithmetic("-", left, right, i64::wrapping_sub, |a, b| a - b)
            })?,
            Instruction::Mul => self.binary(|left, right| {
                arithmetic("*", left, right, i64::wrapping_mul, |a, b| a * b)
            })?,
            Instruction::Div => self.binary(divide)?,
            Instruction::And => self.binary(|left, right| {
                logical("and", left, right).map(|(a, b)| Value::Bool(a && b))
            })?,
            Instruction::Or => self.binary(|left, right| {
                logical("or", left, right).map(|(a, b)| Value::Bool(a || b))
            })?,
            Instruction::Not => {
                let value = match self.pop()? {
                    Value::Bool(value) => !value,
                    Value::Null => return Err(VmError::null("cannot negate null")),
                    other => {
                        return Err(VmError::type_confusion(format!(
                            "cannot negate a {}",
                            other.type_name()
                        )))
                    }
                };
                self.push(Value::Bool(value))?;
            }
            Instruction::CmpLt => self.binary(|left, right| {
                order("<", &left, &right).map(|o| Value::Bool(o == Ordering::Less))
            })?,
            Instruction::CmpLe => self.binary(|left, right| {
                order("<=", &left, &right).map(|o| Value::Bool(o != Ordering::Greater))
            })?,
            Instruction::CmpEq => self.binary(|left, right| Ok(Value::Bool(left == right)))?,
            Instruction::CmpNe => self.binary(|left, right| Ok(Value::Bool(left != right)))?,

            // branching
            Instruction::Jmp(target) => self.jump(target)?,
            Instruction::Jmpf(target) => match self.pop()? {
                Value::Bool(false) => self.jump(target)?,
                Value::Bool(true) => {}
                Value::Null => return Err(VmError::null("cannot branch on null")),
                other => {
                    return Err(VmError::type_confusion(format!(
                        "cannot branch on a {}",
                        other.type_name()
                    )))
                }
            },

            // functions
            Instruction::Call(name) => self.call(&name)?,
            Instruction::Ret => {
                let value = self.pop()?;
                if let Some(frame) = self.call_stack.pop() {
                    trace!("return from {} with {:?}", frame.function_name(), value);
                }
                if let Some(caller) = self.call_stack.last_mut() {
                    caller.push(value);
                }
            }

            // built-ins
            Instruction::Write => {
                let value = self.pop()?;
                write!(self.output, "{}", value).map_err(io_fault)?;
            }
            Instruction::Read => {
                let line = self.read_line()?;
                self.push(Value::String(line))?;
            }
            Instruction::Len => {
                let value = self.pop()?;
                let length = self.heap.length(&value)?;
                self.push(Value::Integer(length as i64))?;
            }
            Instruction::Getc => {
                let string = self.pop()?;
                let index = self.pop()?;
                let character = char_at(&string, &index)?;
                self.push(Value::String(character.to_string()))?;
            }
            Instruction::ToInt => {
                let value = self.pop()?;
                self.push(to_int(value)?)?;
            }
            Instruction::ToDbl => {
                let value = self.pop()?;
                self.push(to_double(value)?)?;
            }
            Instruction::ToStr => {
                let value = self.pop()?;
                self.push(to_string(value)?)?;
            }

            // heap
            Instruction::AllocS => {
                let id = self.heap.alloc_struct();
                self.push(Value::Object(id))?;
            }
            Instruction::SetF(field) => {
                let value = self.pop()?;
                let object = self.pop()?;
                self.heap.set_field(&object, &field, value)?;
            }
            Instruction::GetF(field) => {
                let object = self.pop()?;
                let value = self.heap.get_field(&object, &field)?;
                self.push(value)?;
            }
            Instruction::AllocA => {
                let length = self.pop()?;
                let id = self.heap.alloc_array(&length)?;
                self.push(Value::Object(id))?;
            }
            Instruction::SetI => {
                let value = self.pop()?;
                let index = self.pop()?;
                let object = self.pop()?;
                self.heap.set_index(&object, &index, value)?;
            }
            Instruction::GetI => {
                let index = self.pop()?;
                let object = self.pop()?;
                let value = self.heap.get_index(&object, &index)?;
                self.push(value)?;
            }

            // lists
            Instruction::AllocL => {
                let id = self.heap.alloc_list();
                self.push(Value::Object(id))?;
            }
            Instruction::Append => {
                let value = self.pop()?;
                let object = self.pop()?;
                self.heap.list_append(&object, value)?;
            }
            Instruction::PopL => {
                let object = self.pop()?;
                self.heap.list_pop(&object)?;
            }
            Instruction::Clear => {
                let object = self.pop()?;
                self.heap.list_clear(&object)?;
            }
            Instruction::Max => {
                let object = self.pop()?;
                let value = self.heap.list_max(&object)?;
                self.push(value)?;
            }
            Instruction::Min => {
                let object = self.pop()?;
                let value = self.heap.list_min(&object)?;
                self.push(value)?;
            }

            // special
            Instruction::Dup => {
                let value = self.pop()?;
                self.push(value.clone())?;
                self.push(value)?;
            }
            Instruction::Nop => {}
        }
        Ok(())
    }

    fn jump(&mut self, target: usize) -> VmResult<()> {
        let frame = self.frame()?;
        if target > frame.template.instructions.len() {
            return Err(VmError::invalid_bytecode(format!(
                "jump target {} is outside {}",
                target,
                frame.function_name()
            )));
        }
        frame.pc = target;
        Ok(())
    }

    /// Moves `arg_count` values from the caller's stack onto the callee's,
    /// in pop order, then makes the callee current.
    fn call(&mut self, name: &str) -> VmResult<()> {
        let template = self.templates.get(name).cloned().ok_or_else(|| {
            VmError::new(
                FaultKind::Configuration,
                format!("call to unknown function \"{}\"", name),
            )
        })?;

        let mut callee = Frame::new(template);
        let caller = self.frame()?;
        for _ in 0..callee.template.arg_count {
            callee.push(caller.pop()?);
        }

        trace!("call {} with {:?}", name, callee.operand_stack);
        self.call_stack.push(callee);
        Ok(())
    }

    fn read_line(&mut self) -> VmResult<String> {
        let mut line = String::new();
        let bytes = self.input.read_line(&mut line).map_err(io_fault)?;
        if bytes == 0 {
            return Err(VmError::new(FaultKind::Io, "unexpected end of input"));
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(line)
    }
}

impl<R: BufRead, W: Write> Display for VirtualMachine<R, W> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let mut names = self.templates.keys().collect::<Vec<_>>();
        names.sort();
        for name in names {
            write!(f, "{}", self.templates[name])?;
        }
        Ok(())
    }
}

fn io_fault(error: io::Error) -> VmError {
    VmError::new(FaultKind::Io, error.to_string())
}

fn operand_fault(symbol: &str, left: &Value, right: &Value) -> VmError {
    if left.is_null() || right.is_null() {
        VmError::null(format!("null operand to {}", symbol))
    } else {
        VmError::type_confusion(format!(
            "cannot apply {} to {} and {}",
            symbol,
            left.type_name(),
            right.type_name()
        ))
    }
}

fn add(left: Value, right: Value) -> VmResult<Value> {
    match (left, right) {
        (Value::String(mut a), Value::String(b)) => {
            a.push_str(&b);
            Ok(Value::String(a))
        }
        (left, right) => arithmetic("+", left, right, i64::wrapping_add, |a, b| a + b),
    }
}

fn arithmetic(
    symbol: &str,
    left: Value,
    right: Value,
    integer: fn(i64, i64) -> i64,
    double: fn(f64, f64) -> f64,
) -> VmResult<Value> {
    match (&left, &right) {
        (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(integer(*a, *b))),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(double(*a, *b))),
        _ => Err(operand_fault(symbol, &left, &right)),
    }
}

fn divide(left: Value, right: Value) -> VmResult<Value> {
    match (&left, &right) {
        (Value::Integer(_), Value::Integer(0)) => {
            Err(VmError::new(FaultKind::Division, "integer division by zero"))
        }
        (Value::Double(_), Value::Double(b)) if *b == 0.0 => {
            Err(VmError::new(FaultKind::Division, "double division by zero"))
        }
        (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(a.wrapping_div(*b))),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a / b)),
        _ => Err(operand_fault("/", &left, &right)),
    }
}

fn logical(symbol: &str, left: Value, right: Value) -> VmResult<(bool, bool)> {
    match (&left, &right) {
        (Value::Bool(a), Value::Bool(b)) => Ok((*a, *b)),
        _ => Err(operand_fault(symbol, &left, &right)),
    }
}

fn order(symbol: &str, left: &Value, right: &Value) -> VmResult<Ordering> {
    match (left, right) {
        (Value::Object(_), _) | (_, Value::Object(_)) => Err(operand_fault(symbol, left, right)),
        _ => left
            .natural_cmp(right)
            .ok_or_else(|| operand_fault(symbol, left, right)),
    }
}

fn char_at(string: &Value, index: &Value) -> VmResult<char> {
    match (string, index) {
        (Value::String(s), Value::Integer(i)) => usize::try_from(*i)
            .ok()
            .and_then(|i| s.chars().nth(i))
            .ok_or_else(|| {
                VmError::bounds(format!(
                    "index {} out of range for string of length {}",
                    i,
                    s.chars().count()
                ))
            }),
        (Value::Null, _) | (_, Value::Null) => {
            Err(VmError::null("cannot get a character from null"))
        }
        _ => Err(VmError::type_confusion(format!(
            "cannot index a {} with a {}",
            string.type_name(),
            index.type_name()
        ))),
    }
}

fn conversion_fault(value: &Value, target: &str) -> VmError {
    match value {
        Value::Null => VmError::null(format!("cannot convert null to {}", target)),
        Value::String(s) => VmError::new(
            FaultKind::Conversion,
            format!("cannot convert \"{}\" to {}", s, target),
        ),
        other => VmError::type_confusion(format!(
            "cannot convert a {} to {}",
            other.type_name(),
            target
        )),
    }
}

/// 2^63, the first double past `i64::MAX`.
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

fn to_int(value: Value) -> VmResult<Value> {
    match &value {
        Value::Integer(_) => Ok(value),
        Value::Double(v) if (-I64_LIMIT..I64_LIMIT).contains(&v.trunc()) => {
            Ok(Value::Integer(v.trunc() as i64))
        }
        Value::Double(v) => Err(VmError::new(
            FaultKind::Conversion,
            format!("cannot convert {} to int", v),
        )),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| conversion_fault(&value, "int")),
        _ => Err(conversion_fault(&value, "int")),
    }
}

fn to_double(value: Value) -> VmResult<Value> {
    match &value {
        Value::Integer(v) => Ok(Value::Double(*v as f64)),
        Value::Double(_) => Ok(value),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| conversion_fault(&value, "double")),
        _ => Err(conversion_fault(&value, "double")),
    }
}

fn to_string(value: Value) -> VmResult<Value> {
    match value {
        Value::String(_) => Ok(value),
        Value::Integer(_) | Value::Double(_) | Value::Bool(_) => {
            Ok(Value::String(value.to_string()))
        }
        _ => Err(conversion_fault(&value, "string")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::FIRST_OBJECT_ID;
    use anyhow::Result;
    use std::io::Cursor;

    type TestVm = VirtualMachine<Cursor<Vec<u8>>, Vec<u8>>;

    fn test_vm(input: &str) -> TestVm {
        VirtualMachine::with_io(
            VmConfig::default(),
            Cursor::new(input.as_bytes().to_vec()),
            Vec::new(),
        )
    }

    fn main_template(instructions: Vec<Instruction>) -> FrameTemplate {
        FrameTemplate::with_instructions("main", 0, instructions)
    }

    /// Runs the templates and returns the run's result and everything written.
    fn run_templates(templates: Vec<FrameTemplate>) -> (VmResult<()>, String) {
        let mut vm = test_vm("");
        vm.load(templates);
        let result = vm.run();
        let output = String::from_utf8_lossy(vm.output()).to_string();
        (result, output)
    }

    fn run_main(instructions: Vec<Instruction>) -> (VmResult<()>, String) {
        run_templates(vec![main_template(instructions)])
    }

    fn push(value: impl Into<Value>) -> Instruction {
        Instruction::Push(value.into())
    }

    fn fault_kind(instructions: Vec<Instruction>) -> Option<FaultKind> {
        run_main(instructions).0.err().map(|error| error.kind)
    }

    #[test]
    fn test_print_blue() -> Result<()> {
        let (result, output) = run_main(vec![
            push("blue"),
            Instruction::Write,
            Instruction::Push(Value::Null),
            Instruction::Ret,
        ]);
        result?;
        assert_eq!(output, "blue");
        Ok(())
    }

    #[test]
    fn test_write_values() -> Result<()> {
        let tests = [
            (Value::Integer(-3), "-3"),
            (Value::Double(5.75), "5.75"),
            (Value::Double(2.0), "2.0"),
            (Value::Double(1e16), "1e+16"),
            (Value::Bool(true), "true"),
            (Value::Bool(false), "false"),
            (Value::Null, "null"),
            (Value::from("a b"), "a b"),
        ];

        for (value, expected) in tests {
            let (result, output) = run_main(vec![Instruction::Push(value), Instruction::Write]);
            result?;
            assert_eq!(output, expected);
        }
        Ok(())
    }

    #[test]
    fn test_arithmetic() -> Result<()> {
        let tests = [
            (push(7), push(2), Instruction::Add, "9"),
            (push(7), push(2), Instruction::Sub, "5"),
            (push(7), push(2), Instruction::Mul, "14"),
            (push(7), push(2), Instruction::Div, "3"),
            (push(-7), push(2), Instruction::Div, "-3"),
            (push(7.0), push(2.0), Instruction::Div, "3.5"),
            (push(1.5), push(2.25), Instruction::Add, "3.75"),
            (push("ab"), push("cd"), Instruction::Add, "abcd"),
            (push(2), push(3), Instruction::CmpLt, "true"),
            (push(3), push(3), Instruction::CmpLe, "true"),
            (push("b"), push("a"), Instruction::CmpLt, "false"),
            (push(true), push(false), Instruction::And, "false"),
            (push(true), push(false), Instruction::Or, "true"),
            (push(i64::MAX), push(1), Instruction::Add, "-9223372036854775808"),
        ];

        for (left, right, operation, expected) in tests {
            let (result, output) = run_main(vec![left, right, operation, Instruction::Write]);
            result?;
            assert_eq!(output, expected);
        }
        Ok(())
    }

    #[test]
    fn test_null_equality_asymmetry() -> Result<()> {
        let tests = [
            (Value::Null, Value::Null, Instruction::CmpEq, "true"),
            (Value::Null, Value::Integer(1), Instruction::CmpEq, "false"),
            (Value::Integer(1), Value::Null, Instruction::CmpEq, "false"),
            (Value::from("x"), Value::Null, Instruction::CmpNe, "true"),
            (Value::Null, Value::Null, Instruction::CmpNe, "false"),
        ];

        for (left, right, comparison, expected) in tests {
            let (result, output) = run_main(vec![
                Instruction::Push(left),
                Instruction::Push(right),
                comparison,
                Instruction::Write,
            ]);
            result?;
            assert_eq!(output, expected);
        }

        for comparison in [Instruction::CmpLt, Instruction::CmpLe] {
            let kind = fault_kind(vec![Instruction::Push(Value::Null), push(1), comparison]);
            assert_eq!(kind, Some(FaultKind::NullDereference));
        }
        Ok(())
    }

    #[test]
    fn test_operand_faults() {
        let tests = [
            (vec![push(10), push(0), Instruction::Div], FaultKind::Division),
            (vec![push(10.0), push(0.0), Instruction::Div], FaultKind::Division),
            (vec![push(1), push(1.0), Instruction::Add], FaultKind::TypeConfusion),
            (vec![push(1), push(1.0), Instruction::Div], FaultKind::TypeConfusion),
            (vec![push(1), Instruction::Push(Value::Null), Instruction::Mul], FaultKind::NullDereference),
            (vec![push(true), Instruction::Push(Value::Null), Instruction::And], FaultKind::NullDereference),
            (vec![push(1), push(true), Instruction::Or], FaultKind::TypeConfusion),
            (vec![Instruction::Push(Value::Null), Instruction::Not], FaultKind::NullDereference),
            (vec![push(1), Instruction::Jmpf(0)], FaultKind::TypeConfusion),
            (vec![Instruction::Push(Value::Null), Instruction::Jmpf(0)], FaultKind::NullDereference),
            (vec![Instruction::Pop], FaultKind::InvalidBytecode),
            (vec![Instruction::Load(0)], FaultKind::InvalidBytecode),
            (vec![Instruction::Jmp(99)], FaultKind::InvalidBytecode),
            (vec![Instruction::Call("missing".to_string())], FaultKind::Configuration),
        ];

        for (instructions, expected) in tests {
            assert_eq!(fault_kind(instructions.clone()), Some(expected), "{:?}", instructions);
        }
    }

    #[test]
    fn test_fault_location() {
        let (result, output) = run_main(vec![
            push("before"),
            Instruction::Write,
            push(10),
            push(0),
            Instruction::Div,
            push("after"),
            Instruction::Write,
        ]);

        let error = result.unwrap_err();
        assert_eq!(error.kind, FaultKind::Division);
        assert_eq!(
            error.to_string(),
            "division error: integer division by zero (in main at 4: DIV)"
        );
        assert_eq!(output, "before");
    }

    #[test]
    fn test_missing_entry_point() {
        let (result, output) = run_templates(vec![FrameTemplate::with_instructions(
            "helper",
            0,
            vec![push("never"), Instruction::Write],
        )]);
        let error = result.unwrap_err();
        assert_eq!(error.kind, FaultKind::Configuration);
        assert_eq!(error.location, None);
        assert_eq!(output, "");

        let (result, _) = run_templates(vec![FrameTemplate::with_instructions(
            "main",
            1,
            vec![],
        )]);
        assert_eq!(result.unwrap_err().kind, FaultKind::Configuration);
    }

    #[test]
    fn test_custom_entry_point() -> Result<()> {
        let config = VmConfig {
            entry_point: "start".to_string(),
        };
        let mut vm = VirtualMachine::with_io(config, Cursor::new(Vec::new()), Vec::new());
        vm.add_frame_template(FrameTemplate::with_instructions(
            "start",
            0,
            vec![push("go"), Instruction::Write],
        ));
        vm.run()?;
        assert_eq!(vm.into_output(), b"go".to_vec());
        Ok(())
    }

    #[test]
    fn test_array_scenario() -> Result<()> {
        let setup = vec![
            push(5),
            Instruction::AllocA,
            Instruction::Store(0),
            Instruction::Load(0),
            push(0),
            push("first"),
            Instruction::SetI,
            Instruction::Load(0),
            push(0),
            Instruction::GetI,
            Instruction::Write,
        ];
        let (result, output) = run_main(setup.clone());
        result?;
        assert_eq!(output, "first");

        let mut out_of_bounds = setup;
        out_of_bounds.extend([Instruction::Load(0), push(5), Instruction::GetI]);
        let (result, _) = run_main(out_of_bounds);
        assert_eq!(result.unwrap_err().kind, FaultKind::Bounds);

        assert_eq!(
            fault_kind(vec![push(-1), Instruction::AllocA]),
            Some(FaultKind::Allocation)
        );
        Ok(())
    }

    #[test]
    fn test_list_scenario() -> Result<()> {
        let list = || Instruction::Load(0);
        let (result, output) = run_main(vec![
            Instruction::AllocL,
            Instruction::Store(0),
            list(),
            push(10),
            Instruction::Append,
            list(),
            push(5),
            Instruction::Append,
            list(),
            push(20),
            Instruction::Append,
            list(),
            Instruction::Len,
            Instruction::Write,
            list(),
            Instruction::Max,
            Instruction::Write,
            list(),
            Instruction::Min,
            Instruction::Write,
            list(),
            Instruction::PopL,
            list(),
            Instruction::Len,
            Instruction::Write,
            list(),
            Instruction::Clear,
            list(),
            Instruction::Len,
            Instruction::Write,
        ]);
        result?;
        assert_eq!(output, "320520");

        assert_eq!(
            fault_kind(vec![Instruction::AllocL, Instruction::PopL]),
            Some(FaultKind::Bounds)
        );
        assert_eq!(
            fault_kind(vec![Instruction::AllocL, Instruction::Max]),
            Some(FaultKind::Bounds)
        );
        assert_eq!(
            fault_kind(vec![push(2), Instruction::AllocA, push(1), Instruction::Append]),
            Some(FaultKind::TypeConfusion)
        );
        Ok(())
    }

    #[test]
    fn test_struct_fields_and_ids() -> Result<()> {
        let (result, output) = run_main(vec![
            Instruction::AllocS,
            Instruction::Dup,
            push(3),
            Instruction::SetF("x".to_string()),
            Instruction::Dup,
            Instruction::Write,
            Instruction::GetF("x".to_string()),
            Instruction::Write,
            Instruction::AllocL,
            Instruction::Write,
        ]);
        result?;
        assert_eq!(
            output,
            format!("{}3{}", FIRST_OBJECT_ID, FIRST_OBJECT_ID + 1)
        );

        assert_eq!(
            fault_kind(vec![Instruction::Push(Value::Null), Instruction::GetF("x".to_string())]),
            Some(FaultKind::NullDereference)
        );
        Ok(())
    }

    #[test]
    fn test_recursive_sum() -> Result<()> {
        // sum(x) = 0 if x <= 0 else x + sum(x - 1)
        let sum = FrameTemplate::with_instructions(
            "sum",
            1,
            vec![
                Instruction::Store(0),
                Instruction::Load(0),
                push(0),
                Instruction::CmpLe,
                Instruction::Jmpf(7),
                push(0),
                Instruction::Ret,
                Instruction::Nop,
                Instruction::Load(0),
                Instruction::Load(0),
                push(1),
                Instruction::Sub,
                Instruction::Call("sum".to_string()),
                Instruction::Add,
                Instruction::Ret,
            ],
        );
        let main = main_template(vec![
            push(4),
            Instruction::Call("sum".to_string()),
            Instruction::Write,
            Instruction::Push(Value::Null),
            Instruction::Ret,
        ]);

        let (result, output) = run_templates(vec![sum, main]);
        result?;
        assert_eq!(output, "10");
        Ok(())
    }

    #[test]
    fn test_call_stack_discipline() -> Result<()> {
        // sub(a, b) = a - b, with the first argument stored first
        let sub = FrameTemplate::with_instructions(
            "sub",
            2,
            vec![
                Instruction::Store(0),
                Instruction::Store(1),
                Instruction::Load(0),
                Instruction::Load(1),
                Instruction::Sub,
                Instruction::Ret,
            ],
        );
        let main = main_template(vec![
            push("marker"),
            push(10),
            push(3),
            Instruction::Call("sub".to_string()),
            Instruction::Write,
            Instruction::Write,
            Instruction::Pop,
        ]);

        let (result, output) = run_templates(vec![sub, main]);
        assert_eq!(output, "7marker");
        assert_eq!(result.unwrap_err().kind, FaultKind::InvalidBytecode);
        Ok(())
    }

    #[test]
    fn test_callee_running_off_its_end_returns_null() -> Result<()> {
        let noop = FrameTemplate::with_instructions("noop", 0, vec![Instruction::Nop]);
        let main = main_template(vec![
            Instruction::Call("noop".to_string()),
            Instruction::Write,
        ]);

        let (result, output) = run_templates(vec![noop, main]);
        result?;
        assert_eq!(output, "null");
        Ok(())
    }

    #[test]
    fn test_store_past_end_pads_with_null() -> Result<()> {
        let (result, output) = run_main(vec![
            push(1),
            Instruction::Store(2),
            Instruction::Load(1),
            Instruction::Write,
            Instruction::Load(2),
            Instruction::Write,
        ]);
        result?;
        assert_eq!(output, "null1");
        Ok(())
    }

    #[test]
    fn test_builtins() -> Result<()> {
        let tests = [
            (vec![push("hello"), Instruction::Len], "5"),
            (vec![push(1), push("abc"), Instruction::Getc], "b"),
            (vec![push(" 42 "), Instruction::ToInt], "42"),
            (vec![push(-3.9), Instruction::ToInt], "-3"),
            (vec![push(2), Instruction::ToDbl], "2.0"),
            (vec![push("1.25"), Instruction::ToDbl], "1.25"),
            (vec![push(12), Instruction::ToStr], "12"),
            (vec![push(0.5), Instruction::ToStr], "0.5"),
            (vec![push(1e-5), Instruction::ToStr], "1e-05"),
            (vec![push(false), Instruction::ToStr], "false"),
        ];

        for (mut instructions, expected) in tests {
            instructions.push(Instruction::Write);
            let (result, output) = run_main(instructions);
            result?;
            assert_eq!(output, expected);
        }

        let faults = [
            (vec![push(3), push("abc"), Instruction::Getc], FaultKind::Bounds),
            (vec![push(-1), push("abc"), Instruction::Getc], FaultKind::Bounds),
            (vec![push("x1"), Instruction::ToInt], FaultKind::Conversion),
            (vec![push(1e30), Instruction::ToInt], FaultKind::Conversion),
            (vec![push(-1e19), Instruction::ToInt], FaultKind::Conversion),
            (vec![push(f64::NAN), Instruction::ToInt], FaultKind::Conversion),
            (vec![push("99999999999999999999"), Instruction::ToInt], FaultKind::Conversion),
            (vec![push("abc"), Instruction::ToDbl], FaultKind::Conversion),
            (vec![Instruction::Push(Value::Null), Instruction::ToStr], FaultKind::NullDereference),
            (vec![Instruction::Push(Value::Null), Instruction::Len], FaultKind::NullDereference),
        ];
        for (instructions, expected) in faults {
            assert_eq!(fault_kind(instructions), Some(expected));
        }
        Ok(())
    }

    #[test]
    fn test_read() -> Result<()> {
        let mut vm = test_vm("first line\r\nsecond\n");
        vm.add_frame_template(main_template(vec![
            Instruction::Read,
            Instruction::Write,
            push("|"),
            Instruction::Write,
            Instruction::Read,
            Instruction::Write,
            Instruction::Read,
        ]));

        let error = vm.run().unwrap_err();
        assert_eq!(error.kind, FaultKind::Io);
        assert_eq!(vm.output().as_slice(), b"first line|second");
        Ok(())
    }

    #[test]
    fn test_display_lists_templates_by_name() {
        let mut vm = test_vm("");
        vm.load(vec![
            main_template(vec![Instruction::Nop]),
            FrameTemplate::with_instructions("alpha", 1, vec![Instruction::Ret]),
        ]);

        let expected = "Frame alpha (1 args)\n  0000 RET\nFrame main (0 args)\n  0000 NOP\n";
        assert_eq!(vm.to_string(), expected);
        assert_eq!(vm.template("alpha").map(|t| t.arg_count), Some(1));
    }
}
