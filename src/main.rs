use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::process;

use clap::Parser;
use serde_json::Value;

use jsonvm::{ColorScheme, Dyn, EncodeError, EncodeOptions, Number};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON input file; stdin when omitted
    file: Option<String>,

    /// Indent unit, e.g. two spaces or a tab
    #[arg(long)]
    indent: Option<String>,

    /// Prefix written at the start of every indented line
    #[arg(long)]
    prefix: Option<String>,

    /// Leave <, > and & unescaped
    #[arg(long)]
    no_html_escape: bool,

    /// Colorize output with ANSI escapes
    #[arg(long)]
    color: bool,

    /// Keep map entries in hash order instead of sorting keys
    #[arg(long)]
    unordered: bool,

    /// Escape U+2028 and U+2029
    #[arg(long)]
    escape_line_separators: bool,

    /// Load encode options from a JSON file; flags override it
    #[arg(long, value_name = "FILE")]
    options: Option<String>,

    /// Print the opcode program for the input's root type instead of encoding
    #[arg(long)]
    dump: bool,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("error reading {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("invalid JSON input: {0}")]
    Parse(serde_json::Error),
    #[error("invalid options file {path}: {source}")]
    Options { path: String, source: serde_json::Error },
    #[error("invalid options file {path}: expected a JSON object, found {found}")]
    OptionsShape { path: String, found: &'static str },
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("jsonvm: {e}");
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), CliError> {
    let input = match &cli.file {
        Some(path) => fs::read_to_string(path).map_err(|source| CliError::Read { path: path.clone(), source })?,
        None => {
            let mut s = String::new();
            io::stdin()
                .read_to_string(&mut s)
                .map_err(|source| CliError::Read { path: "<stdin>".to_string(), source })?;
            s
        }
    };
    let value: Value = serde_json::from_str(&input).map_err(CliError::Parse)?;
    let root = to_dyn(value);

    if cli.dump {
        let program = match root.type_desc() {
            Some(desc) => jsonvm::compile_desc(desc)?,
            None => jsonvm::compile::<Dyn>()?,
        };
        print!("{program}");
        return Ok(());
    }

    let opts = options(cli)?;
    let mut out = jsonvm::marshal_with_options(&root, &opts)?;
    out.push(b'\n');
    io::stdout().lock().write_all(&out)?;
    Ok(())
}

fn options(cli: &Cli) -> Result<EncodeOptions, CliError> {
    let mut opts = match &cli.options {
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|source| CliError::Read { path: path.clone(), source })?;
            let value: Value =
                serde_json::from_str(&text).map_err(|source| CliError::Options { path: path.clone(), source })?;
            // Sequences would otherwise deserialize positionally into the struct.
            if !value.is_object() {
                return Err(CliError::OptionsShape { path: path.clone(), found: json_kind(&value) });
            }
            serde_json::from_value(value).map_err(|source| CliError::Options { path: path.clone(), source })?
        }
        None => EncodeOptions::default(),
    };
    if let Some(unit) = &cli.indent {
        opts.indent_unit = unit.clone();
    }
    if let Some(prefix) = &cli.prefix {
        opts.indent_prefix = prefix.clone();
    }
    if cli.no_html_escape {
        opts.escape_html = false;
    }
    if cli.color && opts.colorize.is_none() {
        opts.colorize = Some(ColorScheme::default());
    }
    if cli.unordered {
        opts.unordered_map = true;
    }
    if cli.escape_line_separators {
        opts.escape_line_separators = true;
    }
    Ok(opts)
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn to_dyn(v: Value) -> Dyn {
    match v {
        Value::Null => Dyn::null(),
        Value::Bool(b) => Dyn::new(b),
        Value::Number(n) => Dyn::new(Number::new(n.to_string())),
        Value::String(s) => Dyn::new(s),
        Value::Array(items) => Dyn::new(items.into_iter().map(to_dyn).collect::<Vec<Dyn>>()),
        Value::Object(fields) => Dyn::new(
            fields
                .into_iter()
                .map(|(k, v)| (k, to_dyn(v)))
                .collect::<HashMap<String, Dyn>>(),
        ),
    }
}
