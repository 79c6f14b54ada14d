use anyhow::{Context, Result};
use mypl::{compile, parse_source, VirtualMachine};
use rustyline::{error::ReadlineError, Editor};

fn main() -> Result<()> {
    env_logger::init();

    println!(
        r"
Welcome to the MyPL REPL!
Struct and function definitions are kept for the session.
Anything else runs as the body of a fresh 'void main()'.
Enter 'exit' or press 'CTRL+C' to exit the REPL.
    "
    );

    let mut rl = Editor::<()>::new();
    if rl.load_history("history.txt").is_err() {
        println!("No previous history.");
    }

    let mut definitions = String::new();
    let mut entry = String::new();

    loop {
        let prompt = if entry.is_empty() { "> " } else { ". " };
        let readline = rl.readline(prompt);
        match readline {
            Ok(line) => match line.as_ref() {
                "exit" if entry.is_empty() => break,
                line => {
                    rl.add_history_entry(line);
                    entry.push_str(line);
                    entry.push('\n');

                    if brace_depth(&entry) > 0 {
                        continue;
                    }

                    if let Err(error) = evaluate(&mut definitions, &entry) {
                        eprintln!("Error: {:#}", error);
                    }
                    entry.clear();
                }
            },
            Err(ReadlineError::Interrupted) => break,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }
    rl.save_history("history.txt")?;
    Ok(())
}

/// Keeps `entry` when it only holds definitions, otherwise runs it as the
/// body of `main` against the kept definitions.
fn evaluate(definitions: &mut String, entry: &str) -> Result<()> {
    if entry.trim().is_empty() {
        return Ok(());
    }

    let extended = format!("{}{}", definitions, entry);
    if parse_source(&extended).is_ok() {
        compile(&extended)?;
        *definitions = extended;
        return Ok(());
    }

    let source = format!("{}void main() {{\n{}}}\n", definitions, entry);
    let templates = compile(&source)?;

    let mut vm = VirtualMachine::new();
    vm.load(templates);
    vm.run().context("Runtime error")?;
    println!();
    Ok(())
}

/// Open minus closed braces, ignoring braces inside string literals and
/// line comments.
fn brace_depth(source: &str) -> i64 {
    let mut depth = 0;
    for line in source.lines() {
        let mut in_string = false;
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '"' => in_string = !in_string,
                '/' if !in_string && chars.peek() == Some(&'/') => break,
                '{' if !in_string => depth += 1,
                '}' if !in_string => depth -= 1,
                _ => {}
            }
        }
    }
    depth
}
