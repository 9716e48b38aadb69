use std::panic;
use std::process;

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tealang::ast::Value;
use tealang::builtinops::Arity;
use tealang::{EvalConfig, Environment, REPL_MAX_EVAL_DEPTH, eval_source};

fn main() {
    let result = panic::catch_unwind(|| {
        init_tracing();
        if let Err(err) = run_repl() {
            eprintln!("Error: {err}");
            process::exit(1);
        }
    });

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

/// Install a stderr subscriber when `RUST_LOG` is set, e.g.
/// `RUST_LOG=tealang=debug`.
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_level(true),
            )
            .with(EnvFilter::from_default_env())
            .init();
    }
}

fn run_repl() -> Result<(), ReadlineError> {
    println!("TeaLang interpreter");
    println!("Enter expressions like: (+ 1 2), [1 2 3], {{@k 1}}");
    println!("Type :help for more commands, or Ctrl+C to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;
    let env = tealang::new_environment_with_config(EvalConfig {
        max_depth: Some(REPL_MAX_EVAL_DEPTH),
        ..EvalConfig::default()
    });

    // Callable from programs as (help)
    if let Err(err) = env.register_native("help", Arity::Exact(0), |_, _| {
        print_help();
        Ok(Value::Null)
    }) {
        println!("Error: {err}");
    }

    let mut show_trace = false;

    loop {
        match rl.readline("=> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":env" => {
                        print_environment(&env);
                        continue;
                    }
                    ":trace" => {
                        show_trace = !show_trace;
                        let state = if show_trace { "on" } else { "off" };
                        println!("Full traces {state}");
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                match eval_source(line, &env) {
                    Ok(value) => println!("{value}"),
                    Err(trace) if show_trace => {
                        println!("Error: {}", trace.error());
                        for frame in trace.frames() {
                            println!("  in: {frame}");
                        }
                    }
                    Err(trace) => println!("Error: {}", trace.error()),
                }
            }

            Err(ReadlineError::Eof | ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn print_help() {
    println!("TeaLang REPL commands:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current environment bindings");
    println!("  :trace     - Toggle printing the expressions an error unwound through");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+C     - Exit the interpreter");
    println!();
    println!("Values:");
    println!("  Int: 42, -5        Float: 2.5, 1e3");
    println!("  Bool: true, false  Pattern: @key");
    println!("  List: [1 2 3]      Map: {{@a 1 @b 2}}");
    println!();
    println!("Forms:");
    println!("  (def name expr)  (fn (params) body)  (if cond then else)");
    println!("  (while cond body...)  (begin expr...)  (&& a b)  (|| a b)");
    println!("  (quote expr) or (' expr)  (eval expr)");
    println!();
    println!("Examples:");
    println!("  (def sq (fn (x) (* x x)))");
    println!("  (sq 7)");
    println!("  (def m {{@k 1}}) (@k m)");
    println!();
}

fn print_environment(env: &Environment) {
    let bindings = env.get_all_bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    // Separate native functions from user-defined values
    let mut natives = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match value {
            Value::NativeFunction(_) => natives.push(name),
            _ => user_defined.push((name, value)),
        }
    }

    if !natives.is_empty() {
        println!("Native functions ({}):", natives.len());
        // Print in columns for readability
        let mut col = 0;
        for name in natives {
            print!("  {name:<10}");
            col += 1;
            if col % 6 == 0 {
                println!();
            }
        }
        if col % 6 != 0 {
            println!();
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}
