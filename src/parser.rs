use crate::{
    ast::{
        Branch, CallExpression, DataType, Expression, Extremum, ForLoop, FunDef, IfStatement,
        ListFunction, Literal, Operator, Program, Statement, StructDef, TypeName, VarDef, VarRef,
    },
    lexer::{Lexer, Token, TokenKind},
};
use anyhow::{anyhow, Context, Error, Result};
use std::slice::Iter;

static END_OF_FILE: Token = Token {
    kind: TokenKind::EndOfFile,
    lexeme: String::new(),
    line: 0,
    column: 0,
};

/// Lexes and parses a complete MyPL source file.
pub fn parse_source(source: &str) -> Result<Program> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(&tokens).parse()
}

pub struct Parser<'a> {
    pub tokens: Iter<'a, Token>,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens: tokens.iter(),
        }
    }

    pub fn parse(&mut self) -> Result<Program> {
        let mut program = Program::default();
        loop {
            match self.peek_kind(0) {
                TokenKind::EndOfFile => break,
                TokenKind::Struct => program.structs.push(self.parse_struct_def()?),
                _ => program.functions.push(self.parse_fun_def()?),
            }
        }
        Ok(program)
    }

    fn parse_struct_def(&mut self) -> Result<StructDef> {
        self.eat(TokenKind::Struct, "expecting STRUCT token in struct definition")?;
        let name = self.eat(TokenKind::Identifier, "expecting struct name")?;
        self.eat(TokenKind::LeftBrace, "expecting LBRACE token in struct definition")?;

        let mut fields = Vec::new();
        while !self.matches(TokenKind::RightBrace) {
            let data_type = self.parse_data_type()?;
            let field = self.eat(TokenKind::Identifier, "expecting field name")?;
            self.eat(TokenKind::Semicolon, "expecting SEMICOLON token after field")?;
            fields.push(VarDef::new(data_type, field.lexeme));
        }
        self.read_token();

        Ok(StructDef {
            name: name.lexeme,
            fields,
        })
    }

    fn parse_fun_def(&mut self) -> Result<FunDef> {
        let return_type = if self.matches(TokenKind::VoidType) {
            self.read_token();
            DataType::scalar(TypeName::Void)
        } else {
            self.parse_data_type()?
        };
        let name = self.eat(TokenKind::Identifier, "expecting function name")?;

        self.eat(TokenKind::LeftParentheses, "expecting LPAREN token in function")?;
        let mut params = Vec::new();
        if !self.matches(TokenKind::RightParentheses) {
            loop {
                let data_type = self.parse_data_type()?;
                let param = self.eat(TokenKind::Identifier, "expecting parameter name")?;
                params.push(VarDef::new(data_type, param.lexeme));
                if !self.matches(TokenKind::Comma) {
                    break;
                }
                self.read_token();
            }
        }
        self.eat(TokenKind::RightParentheses, "expecting RPAREN token in function")?;

        let body = self.parse_block("function")?;
        Ok(FunDef {
            return_type,
            name: name.lexeme,
            params,
            body,
        })
    }

    fn parse_data_type(&mut self) -> Result<DataType> {
        match self.peek_kind(0) {
            TokenKind::Array => {
                self.read_token();
                Ok(DataType::array(self.parse_type_name()?))
            }
            TokenKind::List => {
                self.read_token();
                Ok(DataType::list(self.parse_type_name()?))
            }
            _ => Ok(DataType::scalar(self.parse_type_name()?)),
        }
    }

    fn parse_type_name(&mut self) -> Result<TypeName> {
        let type_name = match self.peek_kind(0) {
            TokenKind::IntType => TypeName::Int,
            TokenKind::DoubleType => TypeName::Double,
            TokenKind::BoolType => TypeName::Bool,
            TokenKind::StringType => TypeName::String,
            TokenKind::Identifier => TypeName::Struct(self.peek_nth(0).lexeme.clone()),
            _ => return Err(self.error("expecting data type")),
        };
        self.read_token();
        Ok(type_name)
    }

    fn parse_block(&mut self, context: &str) -> Result<Vec<Statement>> {
        if !self.matches(TokenKind::LeftBrace) {
            return Err(self.error(&format!("expecting LBRACE token in {}", context)));
        }
        self.read_token();

        let mut statements = Vec::new();
        while !self.matches(TokenKind::RightBrace) {
            statements.push(self.parse_statement()?);
        }
        self.read_token();
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        let statement = match self.peek_kind(0) {
            TokenKind::While => return self.parse_while_statement(),
            TokenKind::If => return self.parse_if_statement(),
            TokenKind::For => return self.parse_for_statement(),
            TokenKind::Return => {
                self.read_token();
                Statement::Return(self.parse_expression()?)
            }
            TokenKind::Identifier => match self.peek_kind(1) {
                TokenKind::LeftParentheses => {
                    let name = self.read_token().lexeme.clone();
                    Statement::Call(self.parse_call(name)?)
                }
                TokenKind::Identifier => {
                    let struct_name = self.read_token().lexeme.clone();
                    let data_type = DataType::scalar(TypeName::Struct(struct_name));
                    let (var_def, value) = self.parse_var_decl_rest(data_type)?;
                    Statement::VarDecl(var_def, value)
                }
                _ => {
                    let name = self.read_token().lexeme.clone();
                    self.parse_assign_or_list_function(name)?
                }
            },
            _ => {
                let (var_def, value) = self.parse_var_decl()?;
                Statement::VarDecl(var_def, value)
            }
        };
        self.eat(TokenKind::Semicolon, "expecting SEMICOLON token in statement")?;
        Ok(statement)
    }

    fn parse_var_decl(&mut self) -> Result<(VarDef, Option<Expression>)> {
        let data_type = self.parse_data_type()?;
        self.parse_var_decl_rest(data_type)
    }

    fn parse_var_decl_rest(&mut self, data_type: DataType) -> Result<(VarDef, Option<Expression>)> {
        let name = self.eat(
            TokenKind::Identifier,
            "expecting ID token in variable declaration statement",
        )?;
        let value = if self.matches(TokenKind::Assign) {
            self.read_token();
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok((VarDef::new(data_type, name.lexeme), value))
    }

    fn parse_assign_or_list_function(&mut self, first: String) -> Result<Statement> {
        let list_functions = [TokenKind::Append, TokenKind::Clear, TokenKind::Pop];
        let (path, function) = self.parse_path(first, &list_functions)?;

        let function = match function {
            None => {
                self.eat(TokenKind::Assign, "expecting ASSIGN token in assignment statement")?;
                return Ok(Statement::Assign(path, self.parse_expression()?));
            }
            Some(function) => function,
        };

        self.eat(TokenKind::LeftParentheses, "expecting LPAREN in list function statement")?;
        let function = match function {
            TokenKind::Append => ListFunction::Append(self.parse_expression()?),
            TokenKind::Clear => ListFunction::Clear,
            _ => ListFunction::Pop,
        };
        self.eat(TokenKind::RightParentheses, "expecting RPAREN in list function statement")?;
        Ok(Statement::ListFunction(path, function))
    }

    /// Parses `first ([expr])? (. ID ([expr])?)*`. A path may end in one of
    /// `functions`, which is returned separately and stripped from the path.
    fn parse_path(
        &mut self,
        first: String,
        functions: &[TokenKind],
    ) -> Result<(Vec<VarRef>, Option<TokenKind>)> {
        let mut path = vec![self.parse_var_ref(first)?];
        let mut function = None;

        while self.matches(TokenKind::Dot) {
            self.read_token();
            if function.is_some() {
                return Err(self.error("list function call inside path expression"));
            }
            let kind = self.peek_kind(0);
            if functions.contains(&kind) {
                self.read_token();
                function = Some(kind);
                continue;
            }
            let name = self.eat(TokenKind::Identifier, "expecting ID token in path")?;
            path.push(self.parse_var_ref(name.lexeme)?);
        }

        Ok((path, function))
    }

    fn parse_var_ref(&mut self, name: String) -> Result<VarRef> {
        if !self.matches(TokenKind::LeftBracket) {
            return Ok(VarRef::named(name));
        }
        self.read_token();
        let index = self.parse_expression()?;
        self.eat(TokenKind::RightBracket, "expecting RBRACKET token in path")?;
        Ok(VarRef::indexed(name, index))
    }

    fn parse_while_statement(&mut self) -> Result<Statement> {
        self.eat(TokenKind::While, "expecting WHILE token in while statement")?;
        let condition = self.parse_condition("while statement")?;
        let body = self.parse_block("while statement")?;
        Ok(Statement::While(condition, body))
    }

    fn parse_if_statement(&mut self) -> Result<Statement> {
        self.eat(TokenKind::If, "expecting IF token in if statement")?;
        let if_part = self.parse_branch("if statement")?;

        let mut else_ifs = Vec::new();
        while self.matches(TokenKind::ElseIf) {
            self.read_token();
            else_ifs.push(self.parse_branch("elseif")?);
        }

        let else_body = if self.matches(TokenKind::Else) {
            self.read_token();
            Some(self.parse_block("else")?)
        } else {
            None
        };

        Ok(Statement::If(IfStatement {
            if_part,
            else_ifs,
            else_body,
        }))
    }

    fn parse_branch(&mut self, context: &str) -> Result<Branch> {
        let condition = self.parse_condition(context)?;
        let body = self.parse_block(context)?;
        Ok(Branch { condition, body })
    }

    fn parse_condition(&mut self, context: &str) -> Result<Expression> {
        if !self.matches(TokenKind::LeftParentheses) {
            return Err(self.error(&format!("expecting LPAREN token in {}", context)));
        }
        self.read_token();
        let condition = self.parse_expression()?;
        if !self.matches(TokenKind::RightParentheses) {
            return Err(self.error(&format!("expecting RPAREN token in {}", context)));
        }
        self.read_token();
        Ok(condition)
    }

    fn parse_for_statement(&mut self) -> Result<Statement> {
        self.eat(TokenKind::For, "expecting FOR token in for loop statement")?;
        self.eat(TokenKind::LeftParentheses, "expecting LPAREN token in for loop statement")?;

        let (init, init_value) = self.parse_var_decl()?;
        self.eat(TokenKind::Semicolon, "expecting SEMICOLON token in for loop statement")?;

        let condition = self.parse_expression()?;
        self.eat(TokenKind::Semicolon, "expecting SEMICOLON token in for loop statement")?;

        let first = self.eat(TokenKind::Identifier, "expecting ID token in for loop statement")?;
        let (path, _) = self.parse_path(first.lexeme, &[])?;
        self.eat(TokenKind::Assign, "expecting ASSIGN token in for loop statement")?;
        let value = self.parse_expression()?;
        self.eat(TokenKind::RightParentheses, "expecting RPAREN token in for loop statement")?;

        let body = self.parse_block("for loop statement")?;
        Ok(Statement::For(ForLoop {
            init,
            init_value,
            condition,
            update: (path, value),
            body,
        }))
    }

    fn parse_call(&mut self, name: String) -> Result<CallExpression> {
        let args = self.parse_arguments("call expression")?;
        Ok(CallExpression { name, args })
    }

    fn parse_arguments(&mut self, context: &str) -> Result<Vec<Expression>> {
        if !self.matches(TokenKind::LeftParentheses) {
            return Err(self.error(&format!("expecting LPAREN token in {}", context)));
        }
        self.read_token();

        let mut args = Vec::new();
        if !self.matches(TokenKind::RightParentheses) {
            args.push(self.parse_expression()?);
            while self.matches(TokenKind::Comma) {
                self.read_token();
                args.push(self.parse_expression()?);
            }
        }
        if !self.matches(TokenKind::RightParentheses) {
            return Err(self.error(&format!("expecting RPAREN token in {}", context)));
        }
        self.read_token();
        Ok(args)
    }

    /// Binary expressions nest to the right without precedence, and `not`
    /// negates everything that follows it.
    pub fn parse_expression(&mut self) -> Result<Expression> {
        if self.matches(TokenKind::Not) {
            self.read_token();
            return Ok(Expression::Not(Box::new(self.parse_expression()?)));
        }

        let first = if self.matches(TokenKind::LeftParentheses) {
            self.read_token();
            let inner = self.parse_expression()?;
            self.eat(TokenKind::RightParentheses, "expecting RPAREN token in expression")?;
            inner
        } else {
            self.parse_rvalue()?
        };

        match Self::binary_operator(self.peek_kind(0)) {
            Some(operator) => {
                self.read_token();
                let rest = self.parse_expression()?;
                Ok(Expression::binary(first, operator, rest))
            }
            None => Ok(first),
        }
    }

    fn parse_rvalue(&mut self) -> Result<Expression> {
        let token = self.peek_nth(0);
        let literal = match token.kind {
            TokenKind::New => return self.parse_new(),
            TokenKind::Identifier => {
                let name = self.read_token().lexeme.clone();
                if self.matches(TokenKind::LeftParentheses) {
                    return Ok(Expression::Call(self.parse_call(name)?));
                }
                let (path, function) =
                    self.parse_path(name, &[TokenKind::Max, TokenKind::Min])?;
                return match function {
                    None => Ok(Expression::Path(path)),
                    Some(function) => {
                        self.eat(TokenKind::LeftParentheses, "expecting LPAREN token in list rvalue")?;
                        self.eat(TokenKind::RightParentheses, "expecting RPAREN token in list rvalue")?;
                        let extremum = match function {
                            TokenKind::Max => Extremum::Max,
                            _ => Extremum::Min,
                        };
                        Ok(Expression::ListQuery(path, extremum))
                    }
                };
            }
            TokenKind::NullValue => Literal::Null,
            TokenKind::BoolValue => Literal::Bool(token.lexeme == "true"),
            TokenKind::StringValue => Literal::String(token.lexeme.clone()),
            TokenKind::IntegerValue => Literal::Integer(token.lexeme.parse().with_context(|| {
                format!(
                    "integer literal {} out of range at line {}, column {}",
                    token.lexeme, token.line, token.column
                )
            })?),
            TokenKind::DoubleValue => Literal::Double(token.lexeme.parse()?),
            _ => return Err(self.error("expecting a valid base rvalue token")),
        };
        self.read_token();
        Ok(Expression::Literal(literal))
    }

    fn parse_new(&mut self) -> Result<Expression> {
        self.eat(TokenKind::New, "expecting NEW token in new rvalue")?;
        let type_name = self.parse_type_name()?;

        if let TypeName::Struct(name) = &type_name {
            if self.matches(TokenKind::LeftParentheses) {
                let args = self.parse_arguments("new rvalue")?;
                return Ok(Expression::NewStruct(name.clone(), args));
            }
        }

        self.eat(TokenKind::LeftBracket, "expecting LBRACKET token in new rvalue")?;
        let length = self.parse_expression()?;
        self.eat(TokenKind::RightBracket, "expecting RBRACKET token in new rvalue")?;
        Ok(Expression::NewArray(type_name, Box::new(length)))
    }

    fn binary_operator(kind: TokenKind) -> Option<Operator> {
        let operator = match kind {
            TokenKind::Plus => Operator::Add,
            TokenKind::Minus => Operator::Subtract,
            TokenKind::Times => Operator::Multiply,
            TokenKind::Divide => Operator::Divide,
            TokenKind::And => Operator::And,
            TokenKind::Or => Operator::Or,
            TokenKind::Equal => Operator::Equal,
            TokenKind::NotEqual => Operator::NotEqual,
            TokenKind::LessThan => Operator::LessThan,
            TokenKind::LessThanOrEqual => Operator::LessThanOrEqual,
            TokenKind::GreaterThan => Operator::GreaterThan,
            TokenKind::GreaterThanOrEqual => Operator::GreaterThanOrEqual,
            _ => return None,
        };
        Some(operator)
    }

    fn eat(&mut self, kind: TokenKind, expectation: &str) -> Result<Token> {
        if !self.matches(kind) {
            return Err(self.error(expectation));
        }
        Ok(self.read_token().clone())
    }

    fn error(&self, expectation: &str) -> Error {
        let token = self.peek_nth(0);
        anyhow!(
            "{} found \"{}\" at line {}, column {}",
            expectation,
            token.lexeme,
            token.line,
            token.column
        )
    }

    fn matches(&self, kind: TokenKind) -> bool {
        self.peek_kind(0) == kind
    }

    fn read_token(&mut self) -> &'a Token {
        self.tokens.next().unwrap_or(&END_OF_FILE)
    }

    fn peek_nth(&self, n: usize) -> &'a Token {
        self.tokens.as_slice().get(n).unwrap_or(&END_OF_FILE)
    }

    fn peek_kind(&self, n: usize) -> TokenKind {
        self.peek_nth(n).kind
    }
}
