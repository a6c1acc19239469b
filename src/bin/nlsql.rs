//! nlsql: ask an inventory database questions in plain English
//!
//! # Usage
//!
//! ```bash
//! # Translate one question
//! nlsql ask "Show me all parts with ER code XYZ789"
//!
//! # Teach it a correction
//! nlsql feedback "Show me all parts" "SELECT * FROM vMTL_SYSTEM_ITEMS" \
//!     --corrected "SELECT PART_NUMBER FROM vMTL_SYSTEM_ITEMS"
//!
//! # Interactive session
//! nlsql repl
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::*;
use nlsql::prelude::*;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nlsql")]
#[command(version)]
#[command(about = "Natural-language questions to SQL, learning from corrections", long_about = None)]
#[command(after_help = "EXAMPLES:
    nlsql ask 'Show me all parts with ER code XYZ789'
    nlsql ask 'active items created in 2023'
    nlsql repl")]
struct Cli {
    /// Config file (default: ./nlsql.toml, then the user config dir)
    #[arg(short, long, env = "NLSQL_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a question to SQL
    Ask {
        question: String,
    },
    /// Record whether a generated query was right
    Feedback {
        question: String,
        /// SQL that was generated for the question
        generated: String,
        /// The right SQL, if the generated one was wrong
        #[arg(long)]
        corrected: Option<String>,
    },
    /// Interactive session with correction prompts
    Repl,
    /// List the pattern store
    Patterns,
    /// Request and feedback statistics
    Stats,
    /// Write the pattern store checkpoint
    Save,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let engine = match open_engine(&cli) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    };

    let result = match &cli.command {
        Commands::Ask { question } => ask(&engine, question).await,
        Commands::Feedback {
            question,
            generated,
            corrected,
        } => feedback(&engine, question, generated, corrected.as_deref()),
        Commands::Repl => run_repl(&engine).await,
        Commands::Patterns => {
            show_patterns(&engine);
            Ok(())
        }
        Commands::Stats => {
            print!("{}", engine.stats());
            Ok(())
        }
        Commands::Save => engine.save().map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(2);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "nlsql=debug" } else { "nlsql=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_engine(cli: &Cli) -> anyhow::Result<Engine> {
    let config = Config::load(cli.config.as_deref()).context("loading config")?;
    Engine::open(config).context("starting engine")
}

async fn ask(engine: &Engine, question: &str) -> anyhow::Result<()> {
    let answer = engine.process(question).await?;
    println!("{}", answer.sql);
    eprintln!("{}", describe_route(&answer).dimmed());
    Ok(())
}

fn feedback(
    engine: &Engine,
    question: &str,
    generated: &str,
    corrected: Option<&str>,
) -> anyhow::Result<()> {
    let changes = engine.record_feedback(question, generated, corrected)?;
    show_changes(&changes);
    engine.save()?;
    Ok(())
}

fn describe_route(answer: &Translation) -> String {
    match &answer.pattern_id {
        Some(id) => format!("({} {})", answer.route, id),
        None => format!("({})", answer.route),
    }
}

fn show_changes(changes: &[Change]) {
    for change in changes {
        match change {
            Change::Unchanged => {}
            Change::SynthesisSkipped { .. } => println!("  {}", change.to_string().yellow()),
            _ => println!("  {} {}", "✓".green(), change),
        }
    }
}

fn show_patterns(engine: &Engine) {
    let store = engine.patterns();
    println!(
        "{:28} {:>8} {:>10}  {}",
        "Pattern".white().bold(),
        "Priority".white().bold(),
        "Confidence".white().bold(),
        "Template".white().bold()
    );
    println!("{}", "─".repeat(80).dimmed());
    for pattern in store.iter() {
        let id = if pattern.is_learned() {
            pattern.id.yellow()
        } else {
            pattern.id.cyan()
        };
        println!(
            "{:28} {:>8} {:>10.2}  {}",
            id,
            pattern.priority,
            pattern.confidence,
            pattern.template_text()
        );
    }
    println!();
    println!("{} pattern(s)", store.len().to_string().cyan());
}

async fn run_repl(engine: &Engine) -> anyhow::Result<()> {
    use rustyline::error::ReadlineError;
    use rustyline::DefaultEditor;

    println!("{}", "nlsql: ask about the inventory in plain English".cyan().bold());
    println!("{}", "After each answer press Enter to accept, type the right SQL, or '-' to skip.".dimmed());
    show_repl_help();

    let mut rl = DefaultEditor::new().context("starting line editor")?;
    let history_path = dirs::home_dir()
        .map(|p| p.join(".nlsql_history"))
        .unwrap_or_default();
    let _ = rl.load_history(&history_path);

    loop {
        let prompt = "nlsql> ".cyan().bold().to_string();
        let line = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("{}", "^C".dimmed());
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("{} {:?}", "Error:".red(), err);
                break;
            }
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(question);

        match question {
            ".exit" | ".quit" | "exit" | "quit" => break,
            ".help" | "help" => {
                show_repl_help();
                continue;
            }
            ".patterns" => {
                show_patterns(engine);
                continue;
            }
            ".stats" => {
                print!("{}", engine.stats());
                continue;
            }
            ".save" => {
                report(engine.save().map(|_| println!("{} saved", "✓".green())));
                continue;
            }
            _ => {}
        }

        let answer = match engine.process(question).await {
            Ok(answer) => answer,
            Err(e) => {
                eprintln!("{} {}", "✗".red(), e.to_string().red());
                continue;
            }
        };
        println!("{} {}", "→".green(), answer.sql.white().bold());
        println!("  {}", describe_route(&answer).dimmed());

        let correction = match rl.readline(&"correct? ".dimmed().to_string()) {
            Ok(line) => line.trim().to_string(),
            Err(ReadlineError::Eof) => break,
            Err(_) => continue,
        };
        let corrected = match correction.as_str() {
            "-" => continue,
            "" => None,
            sql => Some(sql),
        };
        report(
            engine
                .record_feedback(question, &answer.sql, corrected)
                .map(|changes| show_changes(&changes)),
        );
        println!();
    }

    let _ = rl.save_history(&history_path);
    engine.save()?;
    println!("{}", "Saved. Goodbye!".green());
    Ok(())
}

fn report(result: NlsqlResult<()>) {
    if let Err(e) = result {
        eprintln!("{} {}", "✗".red(), e.to_string().red());
    }
}

fn show_repl_help() {
    println!("  {}     - Exit (saves patterns)", ".exit".yellow());
    println!("  {} - List patterns", ".patterns".yellow());
    println!("  {}    - Show statistics", ".stats".yellow());
    println!("  {}     - Save patterns now", ".save".yellow());
    println!();
}
