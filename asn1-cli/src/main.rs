//! `asn1tools` command line tool
//!
//! Subcommands: `convert` decodes a hexstring against one codec and
//! re-encodes it with another; `shell` is an interactive loop with history
//! and command completion. Any error prints as `error: <message>` on stderr
//! with exit code 1, unless `--debug` asks for the full diagnostic.

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Result, anyhow, bail};
use asn1tools::{Asn1Error, Codec, Specification};
use clap::{Parser, Subcommand};
use log::LevelFilter;

#[derive(Parser)]
#[command(name = "asn1tools", version, about = "Various ASN.1 utilities.")]
struct Cli {
    /// Do not swallow errors; print the full diagnostic.
    #[arg(short, long)]
    debug: bool,

    /// Control the verbosity; disable(0), warning(1) and debug(2).
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=2))]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert given hexstring and print it to standard output.
    Convert {
        /// Input format.
        #[arg(short = 'i', long, default_value = "ber")]
        input_codec: String,

        /// Output format.
        #[arg(short = 'o', long, default_value = "gser")]
        output_codec: String,

        /// One or more .asn specification files, the type to convert, and
        /// the hexstring (or - to read hexstrings from standard input).
        #[arg(required = true, num_args = 3.., value_names = ["SPECIFICATION", "TYPE", "HEXSTRING"])]
        args: Vec<String>,
    },
    /// An interactive shell.
    Shell,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Off,
        1 => LevelFilter::Warn,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .format_target(false)
        .init();

    let debug = cli.debug;
    if let Err(error) = run(cli) {
        if debug {
            eprintln!("{:?}", error);
        } else {
            eprintln!("error: {}", error);
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Convert {
            input_codec,
            output_codec,
            args,
        } => do_convert(&input_codec, &output_codec, &args),
        Command::Shell => shell::run(),
    }
}

fn parse_codecs(input_codec: &str, output_codec: &str) -> Result<(Codec, Codec)> {
    let input: Codec = input_codec.parse()?;
    let output: Codec = output_codec.parse()?;
    if input == Codec::Gser {
        bail!("gser is an output-only codec");
    }
    Ok((input, output))
}

fn compile_files(
    specifications: &[String],
    input_codec: Codec,
    output_codec: Codec,
) -> Result<(Specification, Specification)> {
    let paths: Vec<PathBuf> = specifications.iter().map(PathBuf::from).collect();
    let modules = asn1tools::parse_files(&paths)?;
    let input_spec = asn1tools::compile_modules(modules.clone(), input_codec)?;
    let output_spec = asn1tools::compile_modules(modules, output_codec)?;
    Ok((input_spec, output_spec))
}

fn do_convert(input_codec: &str, output_codec: &str, args: &[String]) -> Result<()> {
    if args.len() < 3 {
        bail!("expected SPECIFICATION... TYPE HEXSTRING");
    }
    let (input, output) = parse_codecs(input_codec, output_codec)?;
    let (specifications, rest) = args.split_at(args.len() - 2);
    let type_name = &rest[0];
    let hexstring = &rest[1];

    let (input_spec, output_spec) = compile_files(specifications, input, output)?;

    if hexstring == "-" {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = line?;
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                println!("{}", line);
                continue;
            }
            match convert_hexstring(&input_spec, &output_spec, type_name, line) {
                Ok(converted) => println!("{}", converted),
                Err(ConvertError::Hex) => println!("{}", line),
                Err(ConvertError::Decode(diagnostic)) => {
                    println!("{}", line);
                    println!("{}", diagnostic);
                }
                Err(ConvertError::Other(error)) => return Err(error),
            }
        }
        Ok(())
    } else {
        match convert_hexstring(&input_spec, &output_spec, type_name, hexstring) {
            Ok(converted) => {
                println!("{}", converted);
                Ok(())
            }
            Err(ConvertError::Hex) => Err(anyhow!("'{}' is not a hexstring", hexstring)),
            Err(ConvertError::Decode(diagnostic)) => Err(anyhow!(diagnostic)),
            Err(ConvertError::Other(error)) => Err(error),
        }
    }
}

enum ConvertError {
    /// Input is not a hexstring at all
    Hex,
    /// The octets do not decode against the input codec
    Decode(String),
    Other(anyhow::Error),
}

fn convert_hexstring(
    input_spec: &Specification,
    output_spec: &Specification,
    type_name: &str,
    hexstring: &str,
) -> Result<String, ConvertError> {
    let encoded = hex::decode(hexstring).map_err(|_| ConvertError::Hex)?;
    let decoded = input_spec
        .decode(type_name, &encoded)
        .map_err(|error| match error {
            Asn1Error::Decode { .. } => ConvertError::Decode(error.to_string()),
            other => ConvertError::Other(other.into()),
        })?;
    let output = output_spec
        .encode(type_name, &decoded)
        .map_err(|error| ConvertError::Other(error.into()))?;
    if output_spec.codec().is_textual() {
        Ok(String::from_utf8_lossy(&output).trim_end().to_string())
    } else {
        Ok(hex::encode(output))
    }
}

mod shell {
    use super::{Specification, compile_files, convert_hexstring, parse_codecs};
    use anyhow::Result;
    use rustyline::Editor;
    use rustyline::completion::Completer;
    use rustyline::error::ReadlineError;
    use rustyline::highlight::Highlighter;
    use rustyline::hint::Hinter;
    use rustyline::history::DefaultHistory;
    use rustyline::validate::Validator;
    use rustyline::{Context, Helper};
    use std::path::PathBuf;

    const COMMANDS: [&str; 4] = ["compile", "convert", "help", "exit"];

    struct CommandCompleter;

    impl Completer for CommandCompleter {
        type Candidate = String;

        fn complete(
            &self,
            line: &str,
            pos: usize,
            _ctx: &Context<'_>,
        ) -> rustyline::Result<(usize, Vec<String>)> {
            let start = line[..pos].rfind(' ').map(|i| i + 1).unwrap_or(0);
            let word = &line[start..pos];
            let candidates = COMMANDS
                .iter()
                .filter(|c| c.starts_with(word))
                .map(|c| c.to_string())
                .collect();
            Ok((start, candidates))
        }
    }

    impl Hinter for CommandCompleter {
        type Hint = String;
    }
    impl Highlighter for CommandCompleter {}
    impl Validator for CommandCompleter {}
    impl Helper for CommandCompleter {}

    struct Compiled {
        input_spec: Specification,
        output_spec: Specification,
    }

    fn history_path() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".asn1tools-history.txt"))
    }

    pub fn run() -> Result<()> {
        let mut editor: Editor<CommandCompleter, DefaultHistory> = Editor::new()?;
        editor.set_helper(Some(CommandCompleter));
        let history = history_path();
        if let Some(path) = &history {
            let _ = editor.load_history(path);
        }

        let mut compiled: Option<Compiled> = None;
        println!("\nWelcome to the asn1tools shell!\n");

        loop {
            match editor.readline("$ ") {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let _ = editor.add_history_entry(line);
                    if line.starts_with("compile") {
                        compiled = handle_compile(line);
                    } else if line.starts_with("convert") {
                        handle_convert(line, compiled.as_ref());
                    } else if line == "help" {
                        println!("Commands:");
                        println!("  compile");
                        println!("  convert");
                        println!("  exit");
                        println!("  help");
                    } else if line == "exit" {
                        break;
                    } else {
                        println!("{}: command not found", line);
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(error) => return Err(error.into()),
            }
        }

        if let Some(path) = &history {
            let _ = editor.save_history(path);
        }
        Ok(())
    }

    /// `compile [-i CODEC] [-o CODEC] SPECIFICATION...`
    fn handle_compile(line: &str) -> Option<Compiled> {
        let mut input_codec = "ber".to_string();
        let mut output_codec = "gser".to_string();
        let mut specifications: Vec<String> = Vec::new();

        let mut words = line.split_whitespace().skip(1);
        while let Some(word) = words.next() {
            match word {
                "-i" | "--input-codec" => match words.next() {
                    Some(value) => input_codec = value.to_string(),
                    None => {
                        println!("error: missing value for {}", word);
                        return None;
                    }
                },
                "-o" | "--output-codec" => match words.next() {
                    Some(value) => output_codec = value.to_string(),
                    None => {
                        println!("error: missing value for {}", word);
                        return None;
                    }
                },
                other => specifications.push(other.to_string()),
            }
        }
        if specifications.is_empty() {
            println!("error: no specification files given");
            return None;
        }

        let result = parse_codecs(&input_codec, &output_codec).and_then(|(input, output)| {
            compile_files(&specifications, input, output)
        });
        match result {
            Ok((input_spec, output_spec)) => Some(Compiled {
                input_spec,
                output_spec,
            }),
            Err(error) => {
                println!("error: {}", error);
                None
            }
        }
    }

    /// `convert TYPE HEXSTRING`
    fn handle_convert(line: &str, compiled: Option<&Compiled>) {
        let Some(compiled) = compiled else {
            println!(
                "No compiled specification found. Please use the \
                 'compile' command to compile one."
            );
            return;
        };
        let words: Vec<&str> = line.split_whitespace().skip(1).collect();
        if words.len() != 2 {
            println!("error: usage: convert TYPE HEXSTRING");
            return;
        }
        let (type_name, hexstring) = (words[0], words[1]);
        match convert_hexstring(
            &compiled.input_spec,
            &compiled.output_spec,
            type_name,
            hexstring,
        ) {
            Ok(converted) => println!("{}", converted),
            Err(super::ConvertError::Hex) => {
                println!("error: '{}' is not a hexstring", hexstring)
            }
            Err(super::ConvertError::Decode(diagnostic)) => {
                println!("error: {}", diagnostic)
            }
            Err(super::ConvertError::Other(error)) => println!("error: {}", error),
        }
    }
}
