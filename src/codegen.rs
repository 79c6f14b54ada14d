use crate::{
    ast::{
        CallExpression, Expression, Extremum, ForLoop, FunDef, IfStatement, ListFunction,
        Literal, Operator, Program, Statement, StructDef, VarDef, VarRef,
    },
    frame::FrameTemplate,
    instruction::{Instruction, UNRESOLVED},
    value::Value,
    var_table::VarTable,
};
use anyhow::{bail, Context, Result};
use log::debug;
use std::collections::HashMap;

/// Lowers a whole program to one frame template per function.
pub fn generate(program: &Program) -> Result<Vec<FrameTemplate>> {
    CodeGenerator::new().generate(program)
}

/// Emits instructions for one function at a time.
///
/// Forward jumps are emitted with an `UNRESOLVED` target and patched once
/// the construct's closing `NOP` has been emitted.
#[derive(Debug, Default)]
pub struct CodeGenerator {
    template: FrameTemplate,
    var_table: VarTable,
    struct_defs: HashMap<String, StructDef>,
}

impl CodeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate(&mut self, program: &Program) -> Result<Vec<FrameTemplate>> {
        for struct_def in program.structs.iter() {
            self.add_struct(struct_def.clone());
        }
        program
            .functions
            .iter()
            .map(|fun_def| self.generate_function(fun_def))
            .collect()
    }

    /// Remembers a struct's field order for `new S(...)` expressions.
    pub fn add_struct(&mut self, struct_def: StructDef) {
        self.struct_defs.insert(struct_def.name.clone(), struct_def);
    }

    pub fn generate_function(&mut self, fun_def: &FunDef) -> Result<FrameTemplate> {
        self.template = FrameTemplate::new(fun_def.name.as_str(), fun_def.params.len());
        self.var_table = VarTable::new();
        self.var_table.push_environment();

        // The call protocol leaves the first argument on top of the stack.
        for param in fun_def.params.iter() {
            let slot = self.var_table.add(&param.name);
            self.emit(Instruction::Store(slot));
        }

        for statement in fun_def.body.iter() {
            self.generate_statement(statement)
                .with_context(|| format!("failed to generate function '{}'", fun_def.name))?;
        }

        let ends_in_return = matches!(fun_def.body.last(), Some(Statement::Return(_)));
        if fun_def.return_type.is_void() || !ends_in_return {
            self.emit(Instruction::Push(Value::Null));
            self.emit(Instruction::Ret);
        }
        self.var_table.pop_environment();

        let template = std::mem::take(&mut self.template);
        debug!(
            "generated {} ({} args, {} instructions)",
            template.function_name,
            template.arg_count,
            template.instructions.len()
        );
        Ok(template)
    }

    /// Appends `instruction` and returns its index.
    fn emit(&mut self, instruction: Instruction) -> usize {
        self.template.instructions.push(instruction);
        self.template.instructions.len() - 1
    }

    fn next_index(&self) -> usize {
        self.template.instructions.len()
    }

    /// Points the jump at `index` to `target`.
    fn patch(&mut self, index: usize, target: usize) -> Result<()> {
        match self.template.instructions.get_mut(index) {
            Some(Instruction::Jmp(old)) | Some(Instruction::Jmpf(old)) => {
                *old = target;
                Ok(())
            }
            Some(other) => bail!("cannot patch non-jump instruction {} at {}", other, index),
            None => bail!("cannot patch missing instruction at {}", index),
        }
    }

    fn resolve(&self, name: &str) -> Result<usize> {
        match self.var_table.get(name) {
            Some(slot) => Ok(slot),
            None => bail!("unknown variable '{}'", name),
        }
    }

    fn generate_block(&mut self, statements: &[Statement]) -> Result<()> {
        self.var_table.push_environment();
        for statement in statements {
            self.generate_statement(statement)?;
        }
        self.var_table.pop_environment();
        Ok(())
    }

    fn generate_statement(&mut self, statement: &Statement) -> Result<()> {
        match statement {
            Statement::VarDecl(var_def, value) => self.generate_var_decl(var_def, value.as_ref()),
            Statement::Assign(path, value) => self.generate_assign(path, value),
            Statement::ListFunction(path, function) => {
                self.generate_path(path)?;
                match function {
                    ListFunction::Append(value) => {
                        self.generate_expression(value)?;
                        self.emit(Instruction::Append);
                    }
                    ListFunction::Clear => {
                        self.emit(Instruction::Clear);
                    }
                    ListFunction::Pop => {
                        self.emit(Instruction::PopL);
                    }
                }
                Ok(())
            }
            Statement::While(condition, body) => self.generate_while(condition, body),
            Statement::For(for_loop) => self.generate_for(for_loop),
            Statement::If(if_statement) => self.generate_if(if_statement),
            Statement::Return(value) => {
                self.generate_expression(value)?;
                self.emit(Instruction::Ret);
                Ok(())
            }
            Statement::Call(call) => {
                if self.generate_call(call)? {
                    self.emit(Instruction::Pop);
                }
                Ok(())
            }
        }
    }

    fn generate_var_decl(&mut self, var_def: &VarDef, value: Option<&Expression>) -> Result<()> {
        match value {
            Some(value) => self.generate_expression(value)?,
            None if var_def.data_type.is_list() => {
                self.emit(Instruction::AllocL);
            }
            None => {
                self.emit(Instruction::Push(Value::Null));
            }
        }
        let slot = self.var_table.add(&var_def.name);
        self.emit(Instruction::Store(slot));
        Ok(())
    }

    /// Loads the value a path names: `LOAD`, then `GETF` per field, with a
    /// `GETI` after every indexed step.
    fn generate_path(&mut self, path: &[VarRef]) -> Result<()> {
        let (first, rest) = path.split_first().context("empty variable path")?;
        let slot = self.resolve(&first.name)?;
        self.emit(Instruction::Load(slot));
        self.generate_index(first)?;

        for var_ref in rest {
            self.emit(Instruction::GetF(var_ref.name.clone()));
            self.generate_index(var_ref)?;
        }
        Ok(())
    }

    fn generate_index(&mut self, var_ref: &VarRef) -> Result<()> {
        if let Some(index) = &var_ref.index {
            self.generate_expression(index)?;
            self.emit(Instruction::GetI);
        }
        Ok(())
    }

    fn generate_assign(&mut self, path: &[VarRef], value: &Expression) -> Result<()> {
        let (last, prefix) = path.split_last().context("empty assignment target")?;

        if prefix.is_empty() {
            let slot = self.resolve(&last.name)?;
            return match &last.index {
                Some(index) => {
                    self.emit(Instruction::Load(slot));
                    self.generate_expression(index)?;
                    self.generate_expression(value)?;
                    self.emit(Instruction::SetI);
                    Ok(())
                }
                None => {
                    self.generate_expression(value)?;
                    self.emit(Instruction::Store(slot));
                    Ok(())
                }
            };
        }

        self.generate_path(prefix)?;
        match &last.index {
            Some(index) => {
                self.emit(Instruction::GetF(last.name.clone()));
                self.generate_expression(index)?;
                self.generate_expression(value)?;
                self.emit(Instruction::SetI);
            }
            None => {
                self.generate_expression(value)?;
                self.emit(Instruction::SetF(last.name.clone()));
            }
        }
        Ok(())
    }

    fn generate_while(&mut self, condition: &Expression, body: &[Statement]) -> Result<()> {
        let start = self.next_index();
        self.generate_expression(condition)?;
        let exit = self.emit(Instruction::Jmpf(UNRESOLVED));

        self.generate_block(body)?;
        self.emit(Instruction::Jmp(start));

        let end = self.emit(Instruction::Nop);
        self.patch(exit, end)
    }

    fn generate_for(&mut self, for_loop: &ForLoop) -> Result<()> {
        self.var_table.push_environment();
        self.generate_var_decl(&for_loop.init, for_loop.init_value.as_ref())?;

        let condition = self.next_index();
        self.generate_expression(&for_loop.condition)?;
        let exit = self.emit(Instruction::Jmpf(UNRESOLVED));

        self.generate_block(&for_loop.body)?;
        let (path, value) = &for_loop.update;
        self.generate_assign(path, value)?;
        self.var_table.pop_environment();
        self.emit(Instruction::Jmp(condition));

        let end = self.emit(Instruction::Nop);
        self.patch(exit, end)
    }

    fn generate_if(&mut self, if_statement: &IfStatement) -> Result<()> {
        let mut exits = Vec::new();

        let branches = std::iter::once(&if_statement.if_part).chain(if_statement.else_ifs.iter());
        for branch in branches {
            self.generate_expression(&branch.condition)?;
            let skip = self.emit(Instruction::Jmpf(UNRESOLVED));
            self.generate_block(&branch.body)?;
            exits.push(self.emit(Instruction::Jmp(UNRESOLVED)));
            let next = self.emit(Instruction::Nop);
            self.patch(skip, next)?;
        }

        if let Some(else_body) = &if_statement.else_body {
            self.generate_block(else_body)?;
        }

        let end = self.emit(Instruction::Nop);
        for exit in exits {
            self.patch(exit, end)?;
        }
        Ok(())
    }

    /// Emits a call. Returns whether the call leaves a value on the stack.
    fn generate_call(&mut self, call: &CallExpression) -> Result<bool> {
        let builtin = match call.name.as_str() {
            "print" => {
                if let Some(arg) = call.args.first() {
                    self.generate_expression(arg)?;
                }
                self.emit(Instruction::Write);
                return Ok(false);
            }
            "input" => {
                self.emit(Instruction::Read);
                return Ok(true);
            }
            "itos" | "dtos" => Instruction::ToStr,
            "itod" | "stod" => Instruction::ToDbl,
            "dtoi" | "stoi" => Instruction::ToInt,
            "length" => Instruction::Len,
            "get" => Instruction::Getc,
            _ => Instruction::Call(call.name.clone()),
        };

        let expected = match builtin {
            Instruction::Call(_) => None,
            Instruction::Getc => Some(2),
            _ => Some(1),
        };
        if let Some(expected) = expected {
            if call.args.len() != expected {
                bail!(
                    "built-in '{}' takes {} argument(s), got {}",
                    call.name,
                    expected,
                    call.args.len()
                );
            }
        }

        for arg in call.args.iter() {
            self.generate_expression(arg)?;
        }
        self.emit(builtin);
        Ok(true)
    }

    fn generate_expression(&mut self, expression: &Expression) -> Result<()> {
        match expression {
            Expression::Literal(literal) => {
                self.emit(Instruction::Push(Self::literal_value(literal)));
            }
            Expression::Path(path) => self.generate_path(path)?,
            Expression::Call(call) => {
                if !self.generate_call(call)? {
                    // print used as a value still yields something to consume
                    self.emit(Instruction::Push(Value::Null));
                }
            }
            Expression::NewStruct(name, args) => self.generate_new_struct(name, args)?,
            Expression::NewArray(_, length) => {
                self.generate_expression(length)?;
                self.emit(Instruction::AllocA);
            }
            Expression::ListQuery(path, extremum) => {
                self.generate_path(path)?;
                self.emit(match extremum {
                    Extremum::Max => Instruction::Max,
                    Extremum::Min => Instruction::Min,
                });
            }
            Expression::Not(inner) => {
                self.generate_expression(inner)?;
                self.emit(Instruction::Not);
            }
            Expression::Binary(left, operator, right) => {
                self.generate_expression(left)?;
                self.generate_expression(right)?;
                self.generate_operator(*operator);
            }
        }
        Ok(())
    }

    fn generate_new_struct(&mut self, name: &str, args: &[Expression]) -> Result<()> {
        let fields = match self.struct_defs.get(name) {
            Some(struct_def) => struct_def
                .fields
                .iter()
                .map(|field| field.name.clone())
                .collect::<Vec<_>>(),
            None => bail!("unknown struct '{}'", name),
        };
        if args.len() > fields.len() {
            bail!(
                "struct '{}' has {} fields, got {} values",
                name,
                fields.len(),
                args.len()
            );
        }

        self.emit(Instruction::AllocS);
        for (field, arg) in fields.into_iter().zip(args) {
            self.emit(Instruction::Dup);
            self.generate_expression(arg)?;
            self.emit(Instruction::SetF(field));
        }
        Ok(())
    }

    fn generate_operator(&mut self, operator: Operator) {
        let instructions: &[Instruction] = match operator {
            Operator::Add => &[Instruction::Add],
            Operator::Subtract => &[Instruction::Sub],
            Operator::Multiply => &[Instruction::Mul],
            Operator::Divide => &[Instruction::Div],
            Operator::And => &[Instruction::And],
            Operator::Or => &[Instruction::Or],
            Operator::Equal => &[Instruction::CmpEq],
            Operator::NotEqual => &[Instruction::CmpNe],
            Operator::LessThan => &[Instruction::CmpLt],
            Operator::LessThanOrEqual => &[Instruction::CmpLe],
            Operator::GreaterThan => &[Instruction::CmpLe, Instruction::Not],
            Operator::GreaterThanOrEqual => &[Instruction::CmpLt, Instruction::Not],
        };
        for instruction in instructions {
            self.emit(instruction.clone());
        }
    }

    fn literal_value(literal: &Literal) -> Value {
        match literal {
            Literal::Integer(value) => Value::Integer(*value),
            Literal::Double(value) => Value::Double(*value),
            Literal::Bool(value) => Value::Bool(*value),
            Literal::String(value) => Value::String(value.replace("\\n", "\n").replace("\\t", "\t")),
            Literal::Null => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::{DataType, TypeName},
        parser::parse_source,
        vm::{VirtualMachine, VmConfig},
    };
    use std::io::Cursor;

    fn main_template(body: &str) -> Result<FrameTemplate> {
        let program = parse_source(&format!("void main() {{ {} }}", body))?;
        let mut templates = generate(&program)?;
        Ok(templates.remove(0))
    }

    fn run(source: &str) -> Result<String> {
        run_with_input(source, "")
    }

    fn run_with_input(source: &str, input: &str) -> Result<String> {
        let templates = generate(&parse_source(source)?)?;
        let mut vm = VirtualMachine::with_io(
            VmConfig::default(),
            Cursor::new(input.as_bytes().to_vec()),
            Vec::new(),
        );
        vm.load(templates);
        vm.run()?;
        Ok(String::from_utf8(vm.output().clone())?)
    }

    #[test]
    fn test_simple_instructions() -> Result<()> {
        let tests = [
            (
                "print(\"blue\");",
                vec![
                    Instruction::Push(Value::from("blue")),
                    Instruction::Write,
                    Instruction::Push(Value::Null),
                    Instruction::Ret,
                ],
            ),
            (
                "int x = 1 - 2 - 3;",
                vec![
                    Instruction::Push(Value::Integer(1)),
                    Instruction::Push(Value::Integer(2)),
                    Instruction::Push(Value::Integer(3)),
                    Instruction::Sub,
                    Instruction::Sub,
                    Instruction::Store(0),
                    Instruction::Push(Value::Null),
                    Instruction::Ret,
                ],
            ),
            (
                "bool b = 1 > 2;",
                vec![
                    Instruction::Push(Value::Integer(1)),
                    Instruction::Push(Value::Integer(2)),
                    Instruction::CmpLe,
                    Instruction::Not,
                    Instruction::Store(0),
                    Instruction::Push(Value::Null),
                    Instruction::Ret,
                ],
            ),
            (
                "list int xs; xs.append(3);",
                vec![
                    Instruction::AllocL,
                    Instruction::Store(0),
                    Instruction::Load(0),
                    Instruction::Push(Value::Integer(3)),
                    Instruction::Append,
                    Instruction::Push(Value::Null),
                    Instruction::Ret,
                ],
            ),
            (
                "string s = \"a\\tb\";",
                vec![
                    Instruction::Push(Value::from("a\tb")),
                    Instruction::Store(0),
                    Instruction::Push(Value::Null),
                    Instruction::Ret,
                ],
            ),
        ];

        for (input, expected) in tests {
            assert_eq!(main_template(input)?.instructions, expected);
        }
        Ok(())
    }

    #[test]
    fn test_while_back_patching() -> Result<()> {
        let template = main_template("int i = 0; while (i < 3) { print(i); i = i + 1; }")?;
        let instructions = &template.instructions;

        // PUSH 0; STORE 0 precede the loop, PUSH null; RET follow it
        let start = 2;
        let condition = 3;
        let body = 6;
        let loop_end = instructions.len() - 2;
        assert_eq!(loop_end - start, condition + body + 2 + 1);

        let exit = start + condition;
        let sentinel = loop_end - 1;
        assert_eq!(instructions[exit], Instruction::Jmpf(sentinel));
        assert_eq!(instructions[sentinel], Instruction::Nop);
        assert_eq!(instructions[sentinel - 1], Instruction::Jmp(start));
        assert!(instructions.iter().all(|i| i.target() != Some(UNRESOLVED)));
        Ok(())
    }

    #[test]
    fn test_if_back_patching() -> Result<()> {
        let template = main_template(
            "if (true) { print(1); } elseif (false) { print(2); } else { print(3); }",
        )?;

        let expected = vec![
            Instruction::Push(Value::Bool(true)),
            Instruction::Jmpf(5),
            Instruction::Push(Value::Integer(1)),
            Instruction::Write,
            Instruction::Jmp(14),
            Instruction::Nop,
            Instruction::Push(Value::Bool(false)),
            Instruction::Jmpf(11),
            Instruction::Push(Value::Integer(2)),
            Instruction::Write,
            Instruction::Jmp(14),
            Instruction::Nop,
            Instruction::Push(Value::Integer(3)),
            Instruction::Write,
            Instruction::Nop,
            Instruction::Push(Value::Null),
            Instruction::Ret,
        ];

        assert_eq!(template.instructions, expected);
        Ok(())
    }

    #[test]
    fn test_function_params_and_implicit_return() -> Result<()> {
        let program = parse_source("int f(int a, int b) { int c = a; }")?;
        let templates = generate(&program)?;

        assert_eq!(templates[0].function_name, "f");
        assert_eq!(templates[0].arg_count, 2);
        assert_eq!(
            templates[0].instructions,
            vec![
                Instruction::Store(0),
                Instruction::Store(1),
                Instruction::Load(0),
                Instruction::Store(2),
                Instruction::Push(Value::Null),
                Instruction::Ret,
            ]
        );
        Ok(())
    }

    #[test]
    fn test_new_struct_lowering() -> Result<()> {
        let program = parse_source(
            "struct P { int x; int y; } void main() { P p = new P(1, 2); p.y = 3; }",
        )?;
        let templates = generate(&program)?;

        assert_eq!(
            templates[0].instructions,
            vec![
                Instruction::AllocS,
                Instruction::Dup,
                Instruction::Push(Value::Integer(1)),
                Instruction::SetF("x".to_string()),
                Instruction::Dup,
                Instruction::Push(Value::Integer(2)),
                Instruction::SetF("y".to_string()),
                Instruction::Store(0),
                Instruction::Load(0),
                Instruction::Push(Value::Integer(3)),
                Instruction::SetF("y".to_string()),
                Instruction::Push(Value::Null),
                Instruction::Ret,
            ]
        );
        Ok(())
    }

    #[test]
    fn test_sibling_scopes_get_fresh_slots() -> Result<()> {
        let template = main_template(
            "if (true) { int a = 1; } else { int b = 2; } int c = 3; print(c);",
        )?;
        let stores = template
            .instructions
            .iter()
            .filter_map(|instruction| match instruction {
                Instruction::Store(slot) => Some(*slot),
                _ => None,
            })
            .collect::<Vec<_>>();

        assert_eq!(stores, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn test_generation_errors() {
        let tests = [
            ("void main() { x = 1; }", "unknown variable 'x'"),
            ("void main() { Q q = new Q(1); }", "unknown struct 'Q'"),
            (
                "void main() { int x = length(); }",
                "built-in 'length' takes 1 argument(s), got 0",
            ),
        ];

        for (input, expected) in tests {
            let program = parse_source(input).unwrap();
            let error = generate(&program).unwrap_err();
            assert_eq!(error.root_cause().to_string(), expected);
        }
    }

    #[test]
    fn test_add_struct_then_generate_function() -> Result<()> {
        let mut generator = CodeGenerator::new();
        generator.add_struct(StructDef {
            name: "S".to_string(),
            fields: vec![VarDef::new(DataType::scalar(TypeName::Int), "v")],
        });
        let fun_def = FunDef {
            return_type: DataType::scalar(TypeName::Struct("S".to_string())),
            name: "make".to_string(),
            params: vec![],
            body: vec![Statement::Return(Expression::NewStruct(
                "S".to_string(),
                vec![Expression::Literal(Literal::Integer(7))],
            ))],
        };

        let template = generator.generate_function(&fun_def)?;
        assert_eq!(template.instructions.last(), Some(&Instruction::Ret));
        assert_eq!(template.instructions.len(), 5);
        Ok(())
    }

    #[test]
    fn test_programs() -> Result<()> {
        let tests = [
            ("void main() { print(\"blue\"); }", "blue"),
            (
                r#"
int sum(int x) {
  if (x <= 0) { return 0; }
  return x + sum(x - 1);
}
void main() { print(sum(4)); }
"#,
                "10",
            ),
            (
                r#"
int fib(int n) {
  if (n < 2) { return n; }
  return fib(n - 1) + fib(n - 2);
}
void main() {
  for (int i = 0; i < 10; i = i + 1) { print(fib(i)); print(" "); }
}
"#,
                "0 1 1 2 3 5 8 13 21 34 ",
            ),
            (
                r#"
int sub(int a, int b) { return a - b; }
void main() { print(sub(10, 3)); }
"#,
                "7",
            ),
            (
                r#"
void main() {
  array int xs = new int[5];
  xs[0] = 42;
  print(xs[0]);
  print(length(xs));
}
"#,
                "425",
            ),
            (
                r#"
void main() {
  list int xs;
  xs.append(10);
  xs.append(5);
  xs.append(20);
  print(length(xs)); print(xs.max()); print(xs.min());
  xs.pop();
  print(length(xs));
  xs.clear();
  print(length(xs));
}
"#,
                "320520",
            ),
            (
                r#"
struct Node { int val; Node next; }
void main() {
  Node n = new Node(1, null);
  n.next = new Node(2, null);
  n.next.val = n.next.val * 10;
  print(n.val); print(","); print(n.next.val); print(","); print(n.next.next);
}
"#,
                "1,20,null",
            ),
            (
                r#"
struct Holder { array int xs; list double ds; }
void main() {
  Holder h = new Holder(new int[2], null);
  h.xs[1] = 7;
  print(h.xs[1]);
  list double ds;
  h.ds = ds;
  h.ds.append(1.5);
  h.ds.append(2.25);
  print(h.ds.max());
}
"#,
                "72.25",
            ),
            (
                r#"
void main() {
  int x = 5;
  if (x < 3) { print(1); } elseif (x < 6) { print(2); } else { print(3); }
  if (x > 5) { print(4); } elseif (x >= 5) { print(5); }
  if (not (x == 5) or false) { print(6); } else { print(7); }
}
"#,
                "257",
            ),
            (
                r#"
void main() {
  string s = itos(12) + dtos(0.5) + get(1, "abc");
  print(s); print("\n");
  print(stoi("41") + 1); print("\t"); print(itod(2));
}
"#,
                "120.5b\n42\t2.0",
            ),
            (
                r#"
void main() {
  int total = 0;
  int i = 0;
  while (i < 4) {
    int sq = i * i;
    total = total + sq;
    i = i + 1;
  }
  print(total);
}
"#,
                "14",
            ),
        ];

        for (input, expected) in tests {
            assert_eq!(run(input)?, expected, "program:\n{}", input);
        }
        Ok(())
    }

    #[test]
    fn test_input_program() -> Result<()> {
        let source = r#"
void main() {
  string name = input();
  int n = stoi(input());
  print("hi " + name + " " + itos(n * 2));
}
"#;
        assert_eq!(run_with_input(source, "ada\n21\n")?, "hi ada 42");
        Ok(())
    }

    #[test]
    fn test_call_statement_discards_result() -> Result<()> {
        let program = parse_source("int one() { return 1; } void main() { one(); }")?;
        let templates = generate(&program)?;

        assert_eq!(
            templates[1].instructions,
            vec![
                Instruction::Call("one".to_string()),
                Instruction::Pop,
                Instruction::Push(Value::Null),
                Instruction::Ret,
            ]
        );
        Ok(())
    }
}
