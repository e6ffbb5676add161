use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Once;
use std::thread;

use clap::{Parser as ClapParser, Subcommand};

use fastcode_lang::config::Config;
use fastcode_lang::lexer::Lexer;
use fastcode_lang::runtime::Interpreter;
use fastcode_lang::Error;

#[derive(ClapParser)]
#[command(name = "fastcode", version, about = "The FastCode interpreter")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// JSON file with interpreter settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Maximum number of nested function calls
    #[arg(long, global = true)]
    max_depth: Option<usize>,

    /// Directory that top-level imports resolve against
    #[arg(long, global = true)]
    module_root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a script
    Run {
        /// Path to .fc file
        file: PathBuf,
    },
    /// Start an interactive session (the default)
    Repl,
    /// Display the token stream (debug)
    Tokenize {
        /// Path to .fc file
        file: PathBuf,
    },
    /// Parse and display the syntax tree as JSON
    Parse {
        /// Path to .fc file
        file: PathBuf,
    },
}

/// Scripts recurse through the evaluator, so they get a generous stack.
const INTERPRETER_STACK: usize = 256 * 1024 * 1024;

static TRACING_INIT: Once = Once::new();

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        // Only initialize if RUST_LOG is set
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_writer(io::stderr))
                .with(EnvFilter::from_default_env())
                .init();
        }
    });
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(code) => process::exit(code),
    };
    let module_root_given = cli.module_root.is_some();
    let command = cli.command.unwrap_or(Commands::Repl);

    let worker = thread::Builder::new()
        .name("fastcode".to_string())
        .stack_size(INTERPRETER_STACK)
        .spawn(move || match command {
            Commands::Run { file } => cmd_run(&file, config, module_root_given),
            Commands::Repl => cmd_repl(config),
            Commands::Tokenize { file } => cmd_tokenize(&file),
            Commands::Parse { file } => cmd_parse(&file),
        });

    let exit_code = match worker {
        Ok(handle) => handle.join().unwrap_or(101),
        Err(e) => {
            eprintln!("Error: cannot start interpreter thread: {}", e);
            1
        }
    };
    process::exit(exit_code);
}

fn load_config(cli: &Cli) -> Result<Config, i32> {
    let mut config = match &cli.config {
        Some(path) => Config::from_json_file(path).map_err(|e| {
            eprintln!("Error: {}", e);
            1
        })?,
        None => Config::default(),
    };
    if let Some(depth) = cli.max_depth {
        config.max_call_depth = depth;
    }
    if let Some(root) = &cli.module_root {
        config.module_root = root.clone();
    }
    Ok(config)
}

const MAX_SOURCE_SIZE: u64 = 10 * 1024 * 1024; // 10 MB

fn read_source(path: &Path) -> Result<(String, String), i32> {
    let filename = path.to_string_lossy().to_string();

    match std::fs::metadata(path) {
        Ok(meta) => {
            if meta.len() > MAX_SOURCE_SIZE {
                eprintln!(
                    "Error: file {} is too large ({} bytes, max {} bytes)",
                    filename,
                    meta.len(),
                    MAX_SOURCE_SIZE
                );
                return Err(1);
            }
        }
        Err(e) => {
            eprintln!("Error: cannot read file {}: {}", filename, e);
            return Err(1);
        }
    }

    match std::fs::read_to_string(path) {
        Ok(source) => Ok((source, filename)),
        Err(e) => {
            eprintln!("Error: cannot read file {}: {}", filename, e);
            Err(1)
        }
    }
}

fn report(err: &Error) {
    match err {
        Error::Runtime(e) if e.is_internal() => {
            eprintln!("internal error[E{:03}]: {}", e.code(), e)
        }
        Error::Runtime(e) => eprintln!("error[E{:03}]: {}", e.code(), e),
        other => eprintln!("{}", other),
    }
}

fn cmd_run(path: &Path, mut config: Config, module_root_given: bool) -> i32 {
    let (source, filename) = match read_source(path) {
        Ok(r) => r,
        Err(code) => return code,
    };

    if !module_root_given && config.module_root == Config::default().module_root {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            config.module_root = dir.to_path_buf();
        }
    }

    let mut interpreter = Interpreter::with_config(config);
    match interpreter.run_source(&source, &filename) {
        Ok(()) => 0,
        Err(e) => {
            report(&e);
            1
        }
    }
}

fn cmd_repl(config: Config) -> i32 {
    let mut interpreter = Interpreter::with_config(config);
    let show_prompts = interpreter.config().show_prompts;
    let stdin = io::stdin();
    let mut line_number = 1usize;
    let mut block = String::new();

    loop {
        if show_prompts {
            print!("{}: ", line_number);
            let _ = io::stdout().flush();
        }

        let mut line = String::new();
        match stdin.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("Error: cannot read input: {}", e);
                return 1;
            }
        }
        line_number += 1;
        block.push_str(&line);

        if block.trim().is_empty() {
            block.clear();
            continue;
        }
        if open_brackets(&block) > 0 {
            continue;
        }

        if let Err(e) = interpreter.run_source(&block, "<repl>") {
            report(&e);
        }
        block.clear();
        if interpreter.exit_requested() {
            break;
        }
    }
    0
}

/// Brackets still open at the end of `text`, ignoring string and char
/// literals and line comments.
fn open_brackets(text: &str) -> i64 {
    let mut depth = 0i64;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            '"' | '\'' => {
                while let Some(inner) = chars.next() {
                    if inner == '\\' {
                        chars.next();
                    } else if inner == c || inner == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        break;
                    }
                }
            }
            _ => {}
        }
    }
    depth
}

fn cmd_tokenize(path: &Path) -> i32 {
    let (source, filename) = match read_source(path) {
        Ok(r) => r,
        Err(code) => return code,
    };

    let tokens = match Lexer::new(&source, &filename).tokenize() {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Lexer error: {}", e);
            return 1;
        }
    };

    for tok in &tokens {
        println!("{}", tok);
    }
    0
}

fn cmd_parse(path: &Path) -> i32 {
    let (source, filename) = match read_source(path) {
        Ok(r) => r,
        Err(code) => return code,
    };

    let program = match fastcode_lang::parse_source(&source, &filename) {
        Ok(p) => p,
        Err(e) => {
            report(&e);
            return 1;
        }
    };

    match serde_json::to_string_pretty(&program) {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(e) => {
            eprintln!("Error: cannot serialize syntax tree: {}", e);
            1
        }
    }
}
