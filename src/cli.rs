//! Minimal CLI: schema documents → (types | endpoints | preamble)
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::emit::{EmitMode, EmitOptions, Emitter, ENDPOINT_PREAMBLE};
use crate::loader;
use crate::model::Schema;
use crate::registry::EndpointRegistry;

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// load schema documents and emit TypeScript declarations or endpoint maps
#[derive(Parser, Debug)]
pub struct CommandLineInterface {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// emit `export type` declarations for every reachable record
    Types(TypesOut),
    /// emit the api interface and per-namespace url builder consts
    Endpoints(EndpointsOut),
    /// print the shared Endpoint contract type and exit
    Preamble,
}

#[derive(Args, Debug, Clone)]
struct InputSettings {
    /// One or more schema documents. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,
}

#[derive(Args, Debug)]
struct TypesOut {
    #[command(flatten)]
    input_settings: InputSettings,

    /// output .ts file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// sort records by name instead of discovery order
    #[arg(long)]
    sort: bool,
}

#[derive(Args, Debug)]
struct EndpointsOut {
    #[command(flatten)]
    input_settings: InputSettings,

    /// output .ts file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl InputSettings {
    fn load(&self) -> anyhow::Result<(Schema, EndpointRegistry)> {
        let paths = resolve_file_path_patterns(&self.input)?;
        Ok(loader::load_files(&paths)?)
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    pub fn run(&self) -> anyhow::Result<()> {
        match &self.cmd {
            Command::Types(target) => {
                let (schema, registry) = target.input_settings.load()?;
                let emitter = Emitter::with_options(
                    &schema,
                    EmitOptions { sort_by_name: target.sort },
                );
                let text = emitter.emit(&registry, EmitMode::TypesOnly)?;
                write_output(target.out.as_deref(), &text)
            }
            Command::Endpoints(target) => {
                let (schema, registry) = target.input_settings.load()?;
                let emitter = Emitter::new(&schema);
                let text = emitter.emit(&registry, EmitMode::EndpointsOnly)?;
                write_output(target.out.as_deref(), &text)
            }
            Command::Preamble => {
                println!("{ENDPOINT_PREAMBLE}");
                Ok(())
            }
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn write_output(out: Option<&Path>, text: &str) -> anyhow::Result<()> {
    match out {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, text)?;
        }
        None => print!("{text}"),
    }
    Ok(())
}

fn resolve_file_path_patterns<I>(patterns: I) -> anyhow::Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        // Minimal glob detection for the `glob` crate syntax.
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
    }

    let mut out = Vec::<PathBuf>::new();

    for raw in patterns {
        let pattern = raw.as_ref();

        if has_glob_chars(pattern) {
            let mut matched_any = false;
            for entry in glob::glob(pattern)? {
                matched_any = true;
                out.push(entry?);
            }
            if !matched_any {
                // Pattern was explicitly a glob but matched nothing -> surface as an error
                anyhow::bail!("glob pattern matched no files: {pattern}");
            }
        } else {
            // Treat as a literal path
            out.push(PathBuf::from(pattern));
        }
    }

    Ok(out)
}
