use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;
use sxeval::Error;
use sxeval::ast::Value;
use sxeval::environment::Environment;
use sxeval::evaluator;
use sxeval::scheme::parse_program;

fn main() {
    // Use RUST_LOG to control log level, e.g. RUST_LOG=sxeval=trace shows inlining steps
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let result = panic::catch_unwind(|| {
        run_repl();
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

fn run_repl() {
    println!("sxeval Scheme evaluator");
    println!("Enter S-expressions like: (define (sq x) (* x x)) (sq 12)");
    println!("Try (expand '(sq (+ 1 2))) to see inlining without evaluation.");
    println!("Type :help for more commands, or Ctrl+C to exit.");
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(err) => {
            eprintln!("Could not initialize REPL: {err}");
            return;
        }
    };
    let env = evaluator::create_global_env();

    // Incomplete input is kept here until the expressions close
    let mut pending = String::new();

    loop {
        let prompt = if pending.is_empty() { "sxeval> " } else { "   ...> " };
        match rl.readline(prompt) {
            Ok(line) => {
                if pending.is_empty() {
                    match line.trim() {
                        "" => continue,
                        ":help" => {
                            print_help();
                            continue;
                        }
                        ":env" => {
                            print_environment(&env);
                            continue;
                        }
                        ":quit" | ":exit" => {
                            println!("Goodbye!");
                            break;
                        }
                        _ => {}
                    }
                }

                pending.push_str(&line);
                pending.push('\n');

                let exprs = match parse_program(&pending) {
                    Ok(exprs) => exprs,
                    Err(Error::ParseError(msg)) if msg.contains("Unexpected end of input") => {
                        continue;
                    }
                    Err(e) => {
                        println!("Error: {e}");
                        pending.clear();
                        continue;
                    }
                };

                let _ = rl.add_history_entry(pending.trim_end());
                pending.clear();

                // Evaluate in order, stopping at the first failure
                for expr in exprs {
                    match evaluator::eval(&expr, &env) {
                        Ok(Value::Void) => {}
                        Ok(result) => println!("{result}"),
                        Err(e) => {
                            println!("Error: {e}");
                            break;
                        }
                    }
                }
            }

            Err(ReadlineError::Interrupted) if !pending.is_empty() => {
                pending.clear();
            }
            Err(ReadlineError::Eof | ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

fn print_help() {
    println!("Commands:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current environment bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+C     - Discard pending input, or exit");
    println!();
    println!("Special forms:");
    println!("  quote define set! if lambda begin");
    println!("  let cond case and or when unless do while for");
    println!();
    println!("Examples:");
    println!("  (define (fact n) (if (= n 0) 1 (* n (fact (- n 1)))))");
    println!("  (let loop ((i 0)) (when (< i 3) (display i) (loop (+ i 1))))");
    println!("  (define (f . xs) (length arguments))");
    println!("  (expand '((lambda (x) (+ x x)) 5))");
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

    // Separate built-in functions from user-defined values
    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match value {
            Value::Primitive(_) => builtins.push(name),
            _ => user_defined.push((name, value)),
        }
    }

    if !builtins.is_empty() {
        println!("Built-in procedures ({}):", builtins.len());
        // Print in columns for readability
        let mut col = 0;
        for name in builtins {
            print!("  {name:<15}");
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
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
