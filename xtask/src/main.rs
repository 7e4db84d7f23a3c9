use std::error::Error;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{exit, Command, ExitStatus};

use appsync_binding_core::assets::{list_asset_files, stage_assets, AssetManifest};
use appsync_binding_core::contract::FieldRequest;
use appsync_binding_core::manifest::Manifest;
use appsync_binding_core::resolution::BindingTable;
use appsync_binding_core::sample::appsync_example_stack;
use appsync_binding_core::stack::Stack;
use appsync_binding_core::synth::{synthesize, SynthContext};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

type TaskResult = Result<(), Box<dyn Error>>;

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the GraphQL resolver binding workspace",
    long_about = "A unified CLI for synthesizing the deployment template, resolving\n\
                  fields against the binding table, packaging assets, and CI checks."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StackArgs {
    /// Stack manifest (JSON); the built-in employee directory stack when omitted
    #[arg(long, env = "APPSYNC_MANIFEST")]
    manifest: Option<PathBuf>,
    /// Directory that schema and asset paths resolve against
    #[arg(long, default_value = ".")]
    asset_root: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize the CloudFormation template
    Synth {
        #[command(flatten)]
        stack: StackArgs,
        /// Write the template here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Check declarations and resolver fields against the schema
    Validate {
        #[command(flatten)]
        stack: StackArgs,
    },
    /// Show which function a field routes to and the payload it receives
    Resolve {
        #[command(flatten)]
        stack: StackArgs,
        /// Parent type name, e.g. Employee
        type_name: String,
        /// Field name, e.g. employer
        field_name: String,
        /// Field arguments as a JSON object
        #[arg(long)]
        arguments: Option<String>,
        /// Parent object as a JSON object
        #[arg(long)]
        source: Option<String>,
    },
    /// Zip every layer and function asset under its content fingerprint
    PackageAssets {
        #[command(flatten)]
        stack: StackArgs,
        /// Output directory for zips and the asset manifest
        #[arg(long, default_value = "cdk.out/assets")]
        out_dir: PathBuf,
    },
    /// Build and package the field router Lambda
    PackageRouter {
        /// Compilation target triple for the Lambda binary
        #[arg(long, default_value = "x86_64-unknown-linux-gnu")]
        target: String,
        /// Build profile used for the binary
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
    },
    /// Run CI checks (fmt, clippy, tests, sample synthesis)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Validate and synthesize the shipped manifest
    Synth,
    /// Run check + synth
    All,
}

#[derive(Clone, Copy, ValueEnum)]
enum BuildProfile {
    Debug,
    Release,
}

impl BuildProfile {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    fn as_cargo_flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => None,
            Self::Release => Some("--release"),
        }
    }
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn load_stack(args: &StackArgs) -> Result<Stack, Box<dyn Error>> {
    let stack = match &args.manifest {
        Some(path) => {
            info!(manifest = %path.display(), "loading stack manifest");
            Manifest::load(path)?.into_stack()?
        }
        None => appsync_example_stack()?,
    };
    Ok(stack)
}

fn parse_json_arg(name: &str, text: Option<&str>) -> Result<Value, Box<dyn Error>> {
    match text {
        None => Ok(Value::Null),
        Some(text) => serde_json::from_str(text)
            .map_err(|error| format!("--{name} is not valid JSON: {error}").into()),
    }
}

// ── stack tasks ────────────────────────────────────────────────────

fn synth(args: &StackArgs, output: Option<&Path>) -> TaskResult {
    let stack = load_stack(args)?;
    let template = synthesize(&stack, &SynthContext::new(&args.asset_root))?;
    let json = template.to_json_pretty()?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, format!("{json}\n"))?;
            eprintln!(
                "Wrote {} resources to {}",
                template.resources.len(),
                path.display()
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn validate(args: &StackArgs) -> TaskResult {
    let stack = load_stack(args)?;
    let schema = stack.validate(&args.asset_root)?;
    let table = BindingTable::from_stack(&stack)?;

    eprintln!("Stack '{}' is valid", stack.id());
    if let Some(schema) = schema {
        eprintln!("- schema types: {}", schema.type_names().count());
    }
    for binding in table.bindings() {
        eprintln!(
            "- {}.{} -> {} ({})",
            binding.type_name, binding.field_name, binding.data_source_name, binding.function_id
        );
    }
    Ok(())
}

fn resolve(
    args: &StackArgs,
    type_name: &str,
    field_name: &str,
    arguments: Option<&str>,
    source: Option<&str>,
) -> TaskResult {
    let stack = load_stack(args)?;
    let table = BindingTable::from_stack(&stack)?;
    let request = FieldRequest::new(type_name, field_name)
        .with_arguments(parse_json_arg("arguments", arguments)?)
        .with_source(parse_json_arg("source", source)?);

    let invocation = table.resolve(request)?;
    println!("{}", serde_json::to_string_pretty(&invocation)?);
    Ok(())
}

fn package_assets(args: &StackArgs, out_dir: &Path) -> TaskResult {
    let stack = load_stack(args)?;
    let manifest = stage_assets(&stack, &args.asset_root)?;
    fs::create_dir_all(out_dir)?;

    step("Package assets");
    for asset in &manifest.assets {
        let zip_path = out_dir.join(&asset.object_key);
        if zip_path.exists() {
            eprintln!("- {} (cached) {}", asset.construct_id, asset.object_key);
            continue;
        }
        zip_asset(&args.asset_root.join(&asset.source_path), &zip_path)?;
        eprintln!("- {} -> {}", asset.construct_id, zip_path.display());
    }

    write_asset_manifest(&manifest, &out_dir.join("asset-manifest.json"))
}

fn zip_asset(source: &Path, zip_path: &Path) -> TaskResult {
    let file = fs::File::create(zip_path)?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    if source.is_file() {
        let name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| format!("asset '{}' has no file name", source.display()))?;
        zip.start_file(name, options)?;
        zip.write_all(&fs::read(source)?)?;
    } else {
        for relative in list_asset_files(source)? {
            zip.start_file(relative.as_str(), options)?;
            zip.write_all(&fs::read(source.join(&relative))?)?;
        }
    }
    zip.finish()?;
    Ok(())
}

fn write_asset_manifest(manifest: &AssetManifest, path: &Path) -> TaskResult {
    fs::write(path, serde_json::to_string_pretty(manifest)?)?;
    eprintln!("\nAsset manifest: {}", path.display());
    Ok(())
}

// ── router packaging ───────────────────────────────────────────────

fn package_router(target: &str, profile: BuildProfile) -> TaskResult {
    ensure_rust_target_installed(target)?;

    step("Build field router binary");
    let mut cargo_args = vec![
        "build",
        "-p",
        "appsync_binding_lambda",
        "--target",
        target,
        "--bin",
        "field_router",
    ];
    if let Some(flag) = profile.as_cargo_flag() {
        cargo_args.push(flag);
    }
    run_cargo(&cargo_args);

    step("Package field router zip");
    let binary_path = Path::new("target")
        .join(target)
        .join(profile.dir_name())
        .join(binary_name("field_router", target));
    let dist_dir = Path::new("dist");
    fs::create_dir_all(dist_dir)?;
    let zip_path = dist_dir.join("field_router.zip");
    package_lambda_zip(&binary_path, &zip_path)?;

    eprintln!("\nPackaged artifact:\n- {}", zip_path.display());
    Ok(())
}

fn ensure_rust_target_installed(target: &str) -> TaskResult {
    let output = match Command::new("rustup")
        .args(["target", "list", "--installed"])
        .output()
    {
        Ok(value) => value,
        Err(error) => {
            eprintln!(
                "warning: failed to run `rustup target list --installed` ({error}); continuing without target preflight"
            );
            return Ok(());
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "failed to list installed rust targets; run `rustup target list --installed` manually. details: {}",
            stderr.trim()
        )
        .into());
    }

    let installed = String::from_utf8_lossy(&output.stdout);
    if !installed.lines().any(|line| line.trim() == target) {
        return Err(format!(
            "required rust target `{target}` is not installed. install it with `rustup target add {target}`"
        )
        .into());
    }
    Ok(())
}

fn binary_name(bin_name: &str, target: &str) -> String {
    if target.contains("windows") {
        format!("{bin_name}.exe")
    } else {
        bin_name.to_string()
    }
}

fn package_lambda_zip(binary_path: &Path, zip_path: &Path) -> TaskResult {
    if !binary_path.exists() {
        return Err(format!("expected lambda binary at '{}'", binary_path.display()).into());
    }

    let binary = fs::read(binary_path)?;
    let file = fs::File::create(zip_path)?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);
    zip.start_file("bootstrap", options)?;
    zip.write_all(&binary)?;
    zip.finish()?;
    Ok(())
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    step("Test appsync_binding_core");
    run_cargo(&["test", "-p", "appsync_binding_core"]);

    step("Test appsync_binding_lambda");
    run_cargo(&["test", "-p", "appsync_binding_lambda"]);
}

fn ci_synth() -> TaskResult {
    let args = StackArgs {
        manifest: Some(PathBuf::from("stacks/employee_directory.json")),
        asset_root: PathBuf::from("."),
    };

    step("Validate shipped manifest");
    validate(&args)?;

    step("Synthesize shipped manifest");
    synth(&args, Some(Path::new("cdk.out/template.json")))
}

// ── main ───────────────────────────────────────────────────────────

fn run(command: Commands) -> TaskResult {
    match command {
        Commands::Synth { stack, output } => synth(&stack, output.as_deref()),
        Commands::Validate { stack } => validate(&stack),
        Commands::Resolve {
            stack,
            type_name,
            field_name,
            arguments,
            source,
        } => resolve(
            &stack,
            &type_name,
            &field_name,
            arguments.as_deref(),
            source.as_deref(),
        ),
        Commands::PackageAssets { stack, out_dir } => package_assets(&stack, &out_dir),
        Commands::PackageRouter { target, profile } => package_router(&target, profile),
        Commands::Ci { job } => {
            match job {
                CiJob::Check => ci_check(),
                CiJob::Synth => ci_synth()?,
                CiJob::All => {
                    ci_check();
                    ci_synth()?;
                }
            }
            eprintln!("\nCI job passed.");
            Ok(())
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    if let Err(error) = run(cli.command) {
        eprintln!("error: {error}");
        exit(1);
    }
}
