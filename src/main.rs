use std::{fs, path::Path};

use clap::{Parser, Subcommand};
use funny::{
    config::{DEFAULT_MAX_CALL_DEPTH, InterpreterConfig},
    interpreter::{Interpreter, Val},
    logging,
    parser::parse,
    read_statements,
};
use rustyline::{Editor, error::ReadlineError, history::DefaultHistory};
use tracing::{debug, error, warn};

#[derive(Parser, Debug)]
#[command(name = "funny", version)]
#[command(about = "Interpreter for the funny scripting language")]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dump the AST of a script file as JSON
    Parser { file: String },

    /// Run a script file and print its result
    Run {
        file: String,

        #[arg(long, default_value_t = DEFAULT_MAX_CALL_DEPTH)]
        max_depth: usize,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);
    debug!(?cli, "starting");

    match cli.command {
        Some(Commands::Parser { file }) => dump_ast(&file),
        Some(Commands::Run { file, max_depth }) => {
            run(&file, InterpreterConfig::default().max_call_depth(max_depth))
        }
        None => repl(),
    }
}

fn dump_ast(file: &str) {
    if !Path::new(file).exists() {
        println!("file not found {}", file);
        return;
    }

    let data = match fs::read(file) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Error reading file '{}': {}", file, e);
            std::process::exit(1);
        }
    };

    let items = match read_statements(&data) {
        Ok(items) => items,
        Err(e) => {
            eprintln!("Parse error: {}", e);
            std::process::exit(1);
        }
    };

    // A node that cannot be serialized is a bug in the AST, not in the script.
    let json = match serde_json::to_string_pretty(&items) {
        Ok(json) => json,
        Err(e) => panic!("failed to serialize AST: {}", e),
    };
    println!("{}", json);
}

fn run(file: &str, config: InterpreterConfig) {
    let source = match fs::read_to_string(file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading file '{}': {}", file, e);
            std::process::exit(1);
        }
    };

    let program = match parse(&source) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("Parse error: {}", e);
            std::process::exit(1);
        }
    };

    let mut interpreter = Interpreter::new().with_config(config);
    match interpreter.run(&program) {
        Ok(Val::Nil) => {}
        Ok(value) => println!("{}", value),
        Err(e) => {
            if e.is_fatal() {
                error!(error = %e, "script aborted");
            }
            eprintln!("Runtime error: {}", e);
            std::process::exit(1);
        }
    }
}

fn repl() {
    println!("funny v{}", env!("CARGO_PKG_VERSION"));
    println!("Type 'quit' to exit\n");

    let mut interpret = Interpreter::new();
    let mut rl = match Editor::<(), DefaultHistory>::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    loop {
        let mut inp = String::new();

        let line = match rl.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        };

        let trim = line.trim();
        if trim.is_empty() {
            continue;
        }

        if trim == "quit" || trim == "exit" {
            println!("Goodbye!");
            break;
        }

        if let Err(err) = rl.add_history_entry(line.as_str()) {
            warn!("could not record history: {}", err);
        }
        inp.push_str(&line);
        inp.push('\n');

        while bracket_depth(&inp) > 0 {
            let line = match rl.readline("... ") {
                Ok(line) => line,
                Err(_) => break,
            };

            if let Err(err) = rl.add_history_entry(line.as_str()) {
                warn!("could not record history: {}", err);
            }
            inp.push_str(&line);
            inp.push('\n');
        }

        match parse(inp.trim()) {
            Ok(program) => match interpret.run(&program) {
                Ok(Val::Nil) => {}
                Ok(value) => println!("{}", value),
                Err(e) => eprintln!("Runtime error: {}", e),
            },
            Err(e) => eprintln!("Parse error: {}", e),
        }
    }
}

/// Open `{` and `(` outside string literals.
fn bracket_depth(s: &str) -> i32 {
    let mut depth = 0;
    let mut quote: Option<char> = None;
    let mut prev_char = ' ';

    for c in s.chars() {
        match quote {
            Some(q) if c == q && prev_char != '\\' => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '{' | '(' => depth += 1,
                '}' | ')' => depth -= 1,
                _ => {}
            },
        }
        prev_char = c;
    }

    depth
}
