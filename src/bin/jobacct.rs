//! CLI tool to select and print Grid Engine accounting records.
//!
//! Usage:
//!   jobacct filter '(and (owner = alice) (slots >= 8))'
//!   jobacct -s -i old/accounting select --header -- --owner 'a*' --slots 8..
//!   jobacct fields
//!
//! Records are read from `-i` files first, then from the live accounting
//! file under `$SGE_ROOT/$SGE_CELL` unless `-s` is given.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use clap::{Args, CommandFactory, Parser, Subcommand, error::ErrorKind};
use jobacct_rs::config::Paths;
use jobacct_rs::options::option_help;
use jobacct_rs::{
    AccountingFile, DEFAULT_TEMPLATE, Filter, Result, Schemas, Template, parse_filter,
    parse_options,
};
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Select and print batch job accounting records.
#[derive(Parser)]
#[command(name = "jobacct", version)]
struct Cli {
    /// Read this accounting file before the live one (repeatable)
    #[arg(short, long, value_name = "FILE")]
    include: Vec<PathBuf>,

    /// Do not read the live accounting file
    #[arg(short, long)]
    skip_accounting: bool,

    /// Log filter compilation and skipped records on stderr
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print records matching a filter expression
    Filter {
        /// e.g. '(and (owner = alice) (or (qname *= *.short) (slots <= 4)))'
        expression: String,

        #[command(flatten)]
        output: OutputArgs,
    },
    /// Print records matching filter options given after `--`
    Select {
        #[command(flatten)]
        output: OutputArgs,

        /// --and/--or/--not ... --ge, --owner GLOB, --slots 1..4, --ended-after TIME, ...
        #[arg(last = true, allow_hyphen_values = true)]
        options: Vec<String>,
    },
    /// List field names usable in filters and templates
    Fields,
}

#[derive(Args)]
struct OutputArgs {
    /// Output template, e.g. '{owner} {job_number} {maxvmem!h}'
    #[arg(short, long)]
    format: Option<String>,

    /// Print the template before the first record
    #[arg(long)]
    header: bool,

    /// Only print the first matching record
    #[arg(long, conflicts_with = "last_match")]
    first_match: bool,

    /// Only print the last matching record
    #[arg(long)]
    last_match: bool,

    /// Log and skip records that cannot be evaluated instead of stopping
    #[arg(short, long)]
    keep_going: bool,
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let schemas = match Schemas::new() {
        Ok(schemas) => schemas,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    let (compiled, output) = match cli.command {
        Command::Fields => {
            print_fields(&schemas);
            return;
        }
        Command::Filter { expression, output } => {
            (parse_filter(&expression, schemas.extended()), output)
        }
        Command::Select { output, options } => (parse_options(&options), output),
    };

    // Compile everything before touching any input.
    let filter = match compiled {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };
    let template_text = output.format.as_deref().unwrap_or(DEFAULT_TEMPLATE);
    let template = match Template::parse(template_text, schemas.extended()) {
        Ok(template) => template,
        Err(e) => {
            eprintln!("Malformed format option: {e}");
            process::exit(2);
        }
    };

    let sources = match sources(cli.include, cli.skip_accounting) {
        Ok(sources) if sources.is_empty() => Cli::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                "No source files. System accounting file skipped and no others included.",
            )
            .exit(),
        Ok(sources) => sources,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    match run(&sources, &schemas, &filter, &template, &output) {
        Ok(0) => {
            eprintln!("No matching records");
            process::exit(1);
        }
        Ok(matched) => {
            if !output.first_match && !output.last_match {
                eprintln!("Matched {matched} records");
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn print_fields(schemas: &Schemas) {
    println!("Fields:");
    for name in schemas.extended().fields() {
        let base_only = if schemas.base().contains(name) { "" } else { "  (UGE only)" };
        println!("  {name}{base_only}");
    }
    println!();
    println!("Filter options for `select`:");
    for (option, field) in option_help() {
        if field.is_empty() {
            println!("  {option}");
        } else {
            println!("  {option:<20} {field}");
        }
    }
}

fn sources(include: Vec<PathBuf>, skip_accounting: bool) -> Result<Vec<PathBuf>> {
    let mut sources = include;
    if !skip_accounting {
        sources.push(Paths::from_env()?.accounting_file());
    }
    Ok(sources)
}

/// Print matching records; returns how many matched.
fn run(
    sources: &[PathBuf],
    schemas: &Schemas,
    filter: &Filter,
    template: &Template,
    output: &OutputArgs,
) -> Result<usize> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if output.header {
        writeln!(out, "{}", template.source())?;
    }

    let mut matched = 0;
    let mut last = None;
    for path in sources {
        debug!(path = %path.display(), %filter, "scanning");
        let mut file = AccountingFile::open(path, schemas.clone())?;
        while let Some(record) = file.next() {
            let record = record?;
            let rendered = filter.matches(&record).and_then(|hit| {
                if hit {
                    template.render(&record).map(Some)
                } else {
                    Ok(None)
                }
            });
            let line = match rendered {
                Ok(Some(line)) => line,
                Ok(None) => continue,
                Err(e) if output.keep_going => {
                    warn!(path = %path.display(), line = file.line_number(), error = %e, "skipping record");
                    continue;
                }
                Err(e) => return Err(e),
            };

            matched += 1;
            if output.last_match {
                last = Some(line);
                continue;
            }
            writeln!(out, "{line}")?;
            if output.first_match {
                return Ok(matched);
            }
        }
    }
    if let Some(line) = last {
        writeln!(out, "{line}")?;
    }
    Ok(matched)
}
