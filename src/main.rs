//! wasmbed CLI entry point.
//!
//! A small embedder on top of `wasmbed-core`: inspect, validate, precompile
//! and run WebAssembly modules, with WASI when the module imports it.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wasmbed_common::{ConfigFile, RuntimeError, Value, ValueType};
use wasmbed_core::{
    CompiledModule, Extern, ImportObject, Instance, MappedDir, SerializedModule, Store,
    WasiConfig, WasmEngine, generate_import_object, get_wasi_version, is_wasi_module,
};

/// Entry point a WASI command exports.
const START_FUNCTION: &str = "_start";

#[derive(Debug, Parser)]
#[command(name = "wasmbed", version, about = "Embed and run WebAssembly modules")]
struct Cli {
    /// TOML configuration file with `[runtime]` and `[wasi]` sections.
    #[arg(short, long, global = true, env = "WASMBED_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the imports and exports of a module.
    Inspect {
        /// `.wasm`, `.wat` or precompiled module.
        module: PathBuf,
    },
    /// Check that a file is a valid WebAssembly module.
    Validate {
        module: PathBuf,
    },
    /// Compile a module ahead of time into a serialized artifact.
    Compile {
        module: PathBuf,
        /// Where to write the artifact.
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Instantiate a module and call its entry point.
    Run(RunArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    module: PathBuf,

    /// Call this export instead of `_start`; trailing arguments become its
    /// parameters.
    #[arg(long)]
    invoke: Option<String>,

    /// Preopen a host directory under its own path.
    #[arg(long = "dir", value_name = "DIR")]
    dirs: Vec<PathBuf>,

    /// Preopen a host directory under a guest alias.
    #[arg(long = "mapdir", value_name = "ALIAS:HOST_DIR", value_parser = parse_mapdir)]
    mapped_dirs: Vec<MappedDir>,

    /// Set a guest environment variable.
    #[arg(long = "env", value_name = "KEY=VALUE")]
    envs: Vec<String>,

    /// Guest arguments, or function parameters with `--invoke`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn parse_mapdir(raw: &str) -> Result<MappedDir, String> {
    let (alias, host) = raw
        .split_once(':')
        .filter(|(alias, host)| !alias.is_empty() && !host.is_empty())
        .ok_or_else(|| format!("expected ALIAS:HOST_DIR, got {raw:?}"))?;
    Ok(MappedDir {
        alias: alias.to_string(),
        host_path: PathBuf::from(host),
    })
}

fn main() -> anyhow::Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wasmbed=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => ConfigFile::default(),
    };
    debug!(?config, "Configuration loaded");

    let engine = WasmEngine::new(&config.runtime).context("Failed to create engine")?;

    match cli.command {
        Command::Inspect { module } => {
            inspect(&load_module(&engine, &module)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate { module } => validate(&engine, &module),
        Command::Compile { module, output } => {
            compile(&engine, &module, &output)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run(args) => run(&engine, &config, args),
    }
}

/// Load a module from `.wat` text, a precompiled artifact or a binary.
fn load_module(engine: &WasmEngine, path: &Path) -> anyhow::Result<CompiledModule> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let module = if path.extension().is_some_and(|ext| ext == "wat") {
        let text = String::from_utf8(bytes).context("WAT source is not UTF-8")?;
        CompiledModule::from_wat(engine, &text)?
    } else if bytes.starts_with(b"WBDM") {
        let serialized = SerializedModule::from_bytes(bytes)?;
        CompiledModule::deserialize(engine, &serialized)?
    } else {
        CompiledModule::from_bytes(engine, &bytes)?
    };

    info!(path = %path.display(), hash = %module.content_hash(), "Module loaded");
    Ok(module)
}

fn inspect(module: &CompiledModule) {
    println!("Imports:");
    for import in module.imports() {
        match &import.signature {
            Some(signature) => println!("  {} {}.{} {signature}", import.kind, import.module, import.name),
            None => println!("  {} {}.{}", import.kind, import.module, import.name),
        }
    }

    println!("Exports:");
    for export in module.exports() {
        println!("  {} {}", export.kind, export.name);
    }

    if is_wasi_module(module) {
        println!("WASI: {:?}", get_wasi_version(module));
    }
}

fn validate(engine: &WasmEngine, path: &Path) -> anyhow::Result<ExitCode> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    if CompiledModule::validate(engine, &bytes) {
        println!("{}: valid", path.display());
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{}: invalid", path.display());
        Ok(ExitCode::FAILURE)
    }
}

fn compile(engine: &WasmEngine, path: &Path, output: &Path) -> anyhow::Result<()> {
    let module = load_module(engine, path)?;
    let serialized = module.serialize()?;

    std::fs::write(output, serialized.as_bytes())
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!(
        output = %output.display(),
        bytes = serialized.as_bytes().len(),
        "Module serialized"
    );
    Ok(())
}

fn run(engine: &WasmEngine, config: &ConfigFile, args: RunArgs) -> anyhow::Result<ExitCode> {
    let module = load_module(engine, &args.module)?;
    let store = Store::new(engine);

    let (imports, params) = if is_wasi_module(&module) {
        let version = get_wasi_version(&module);
        let wasi = wasi_config(config, &args);
        let imports = generate_import_object(version, wasi)
            .map_err(RuntimeError::from)
            .context("Failed to set up WASI")?;
        let params = if args.invoke.is_some() { args.args.clone() } else { Vec::new() };
        (imports, params)
    } else {
        (ImportObject::new(), args.args.clone())
    };

    let instance = Instance::new(&store, &module, &imports).context("Failed to instantiate module")?;

    let entry = args.invoke.as_deref().unwrap_or(START_FUNCTION);
    let values = parse_params(&instance, entry, &params)?;

    let outcome = instance.call_values(entry, &values);
    let metrics = store.metrics()?;
    debug!(
        calls = metrics.calls,
        traps = metrics.traps,
        fuel = metrics.last_fuel_consumed,
        "Execution finished"
    );

    match outcome {
        Ok(results) => {
            for value in results {
                println!("{value}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(RuntimeError::Exit { code }) => {
            info!(code, "Guest exited");
            Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
        }
        Err(err) => Err(err).with_context(|| format!("Call to {entry} failed")),
    }
}

/// WASI state for `run`: the configuration file first, then the command line.
fn wasi_config(config: &ConfigFile, args: &RunArgs) -> WasiConfig {
    let mut wasi = WasiConfig::from(&config.wasi);

    let program = args
        .module
        .file_name()
        .map_or_else(|| "wasm".to_string(), |name| name.to_string_lossy().into_owned());
    wasi.args.insert(0, program);
    if args.invoke.is_none() {
        wasi.args.extend(args.args.iter().cloned());
    }

    wasi.envs.extend(args.envs.iter().cloned());
    wasi.preopened_dirs.extend(args.dirs.iter().cloned());
    wasi.mapped_dirs.extend(args.mapped_dirs.iter().cloned());
    wasi
}

/// Parse command-line parameters against the signature of export `name`.
fn parse_params(instance: &Instance, name: &str, raw: &[String]) -> anyhow::Result<Vec<Value>> {
    let exports = instance.exports();
    let Some(export) = exports.by_name(name) else {
        bail!("module has no export named {name}");
    };
    let Extern::Function(func) = export.value() else {
        bail!("export {name} is not a function");
    };
    let Some(signature) = func.signature() else {
        bail!("export {name} has a signature this CLI cannot call");
    };

    if signature.params().len() != raw.len() {
        bail!(
            "{name} expects {} arguments ({signature}), got {}",
            signature.params().len(),
            raw.len()
        );
    }

    signature
        .params()
        .iter()
        .zip(raw)
        .map(|(ty, text)| {
            parse_value(*ty, text).with_context(|| format!("Invalid {ty} argument {text:?}"))
        })
        .collect()
}

fn parse_value(ty: ValueType, text: &str) -> anyhow::Result<Value> {
    let value = match ty {
        ValueType::I32 => Value::I32(text.parse()?),
        ValueType::I64 => Value::I64(text.parse()?),
        ValueType::F32 => Value::F32(text.parse()?),
        ValueType::F64 => Value::F64(text.parse()?),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mapdir() {
        let mapped = parse_mapdir("/data:./host").unwrap();
        assert_eq!(mapped.alias, "/data");
        assert_eq!(mapped.host_path, PathBuf::from("./host"));

        assert!(parse_mapdir("no-colon").is_err());
        assert!(parse_mapdir(":/host").is_err());
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value(ValueType::I32, "-7").unwrap(), Value::I32(-7));
        assert_eq!(parse_value(ValueType::I64, "9000000000").unwrap(), Value::I64(9_000_000_000));
        assert_eq!(parse_value(ValueType::F64, "1.5").unwrap(), Value::F64(1.5));
        assert!(parse_value(ValueType::I32, "nope").is_err());
    }

    #[test]
    fn test_wasi_config_merges_file_and_cli() {
        let file = ConfigFile::from_toml(
            r#"
            [wasi]
            args = ["--from-file"]
            env = ["A=1"]
            "#,
        )
        .unwrap();
        let cli = Cli::parse_from([
            "wasmbed", "run", "--env", "B=2", "--mapdir", "/d:/tmp", "app.wasm", "x", "-y",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };

        let wasi = wasi_config(&file, &args);
        assert_eq!(wasi.args, ["app.wasm", "--from-file", "x", "-y"]);
        assert_eq!(wasi.envs, ["A=1", "B=2"]);
        assert_eq!(wasi.mapped_dirs.len(), 1);
    }

    #[test]
    fn test_invoke_args_are_not_guest_argv() {
        let cli = Cli::parse_from(["wasmbed", "run", "--invoke", "sum", "m.wasm", "3", "4"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let wasi = wasi_config(&ConfigFile::default(), &args);
        assert_eq!(wasi.args, ["m.wasm"]);
        assert_eq!(args.args, ["3", "4"]);
    }

    #[test]
    fn test_run_invokes_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sum.wat");
        std::fs::write(
            &path,
            r#"(module (func (export "sum") (param i32 i32) (result i32)
                local.get 0 local.get 1 i32.add))"#,
        )
        .unwrap();

        let engine = WasmEngine::new(&wasmbed_common::RuntimeConfig::default()).unwrap();
        let module = load_module(&engine, &path).unwrap();
        let store = Store::new(&engine);
        let instance = Instance::new(&store, &module, &ImportObject::new()).unwrap();

        let values = parse_params(&instance, "sum", &["3".into(), "4".into()]).unwrap();
        assert_eq!(instance.call_values("sum", &values).unwrap(), [Value::I32(7)]);
        assert!(parse_params(&instance, "sum", &["3".into()]).is_err());
        assert!(parse_params(&instance, "missing", &[]).is_err());
    }
}
