use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use cnx_rs::ast::Unit;
use cnx_rs::sema::registry;
use cnx_rs::{transpile, OutputMode, OverflowPolicy, TranspileConfig};

/// Development harness over the C-Next transpiler core: feeds a
/// JSON-serialized parse tree through the semantic analyzer and code
/// generator.
#[derive(Clone, Debug, Parser)]
struct Args {
    #[command(subcommand)]
    operation: Operation,
    /// Parse tree file (JSON), `-` for stdin.
    #[arg(short, long)]
    input: PathBuf,
    /// Emit C++17 instead of C99.
    #[arg(long)]
    cpp: bool,
    /// Debug build: clamp helpers panic instead of saturating.
    #[arg(long)]
    debug: bool,
    /// Target supports C11/C++ atomics.
    #[arg(long)]
    atomic: bool,
    /// Default overflow policy for unannotated variables.
    #[arg(long, value_parser = parse_overflow, default_value = "default")]
    overflow: OverflowPolicy,
}

#[derive(Clone, Debug, Subcommand)]
enum Operation {
    /// Transpile the parse tree and print the generated source.
    Transpile,
    /// Print the effect manifest as JSON.
    DumpEffects,
    /// Build the symbol registry and print it as JSON.
    DumpSymbols,
}

fn parse_overflow(value: &str) -> Result<OverflowPolicy, String> {
    match value {
        "default" => Ok(OverflowPolicy::Default),
        "wrap" => Ok(OverflowPolicy::Wrap),
        "clamp" => Ok(OverflowPolicy::Clamp),
        other => Err(format!(
            "invalid overflow policy `{other}`, expected \
             default, wrap or clamp"
        )),
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let unit = read_unit(&args.input)?;
    let cfg = TranspileConfig {
        mode: if args.cpp {
            OutputMode::Cpp
        } else {
            OutputMode::C
        },
        debug: args.debug,
        atomic: args.atomic,
        overflow: args.overflow,
    };

    match args.operation {
        Operation::Transpile => {
            let output = transpile(&unit, &cfg)?;
            print!("{}", output.code);
        }
        Operation::DumpEffects => {
            let output = transpile(&unit, &cfg)?;
            let json = serde_json::to_string_pretty(&output.effects)?;
            println!("{json}");
        }
        Operation::DumpSymbols => {
            let reg = registry::build(&unit)?;
            let json = serde_json::to_string_pretty(&reg)?;
            println!("{json}");
        }
    }
    std::io::stdout().flush()?;
    Ok(())
}

fn read_unit(path: &PathBuf) -> Result<Unit> {
    let text = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        let mut reader = BufReader::new(
            File::open(path)
                .with_context(|| format!("opening {}", path.display()))?,
        );
        let mut buf = String::new();
        reader.read_to_string(&mut buf)?;
        buf
    };
    serde_json::from_str(&text)
        .with_context(|| format!("parsing {} as a parse tree", path.display()))
}
