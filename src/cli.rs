use crate::{
    config::AppConfig,
    context::ManagerContext,
    deploy::{DeploymentCoordinator, RemoveReport},
    manifest::{CompileMetadata, ModManifest},
};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::{collections::HashSet, path::PathBuf};

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

struct GlobalOptions {
    format: OutputFormat,
    root: Option<PathBuf>,
    game: Option<String>,
}

enum CliCommand {
    Compile {
        source: PathBuf,
        metadata: CompileMetadata,
    },
    Deploy(String),
    Remove(String),
    List,
    Lineage(String),
    Register {
        game: String,
        root: PathBuf,
    },
    Help,
    Version,
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (global, tokens) = parse_global_options(&args)?;
    let command = parse_command(&tokens)?;
    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("layerkeep v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliCommand::Register { game, root } => {
            let mut config = AppConfig::load_or_create()?;
            let root = root
                .canonicalize()
                .with_context(|| format!("resolve game root {:?}", root))?;
            config.set_game_root(&game, root.clone());
            config.save()?;
            println!("Registered {game} at {}", root.display());
            Ok(())
        }
        command => {
            let config = AppConfig::load_or_create()?;
            let coordinator = build_coordinator(&config, &global)?;
            run_command(&coordinator, command, global.format)
        }
    }
}

fn build_coordinator(config: &AppConfig, global: &GlobalOptions) -> Result<DeploymentCoordinator> {
    let game = global
        .game
        .clone()
        .unwrap_or_else(|| config.default_game.clone());
    let root = match &global.root {
        Some(root) => root.clone(),
        None => config
            .game_root(&game)
            .map(|root| root.to_path_buf())
            .with_context(|| {
                format!("no root registered for game {game} (use --root or `layerkeep register`)")
            })?,
    };
    if !root.is_dir() {
        bail!("game root {:?} is not a directory", root);
    }
    let context = ManagerContext::new(config.manager_settings());
    Ok(DeploymentCoordinator::new(context, game, root))
}

fn parse_global_options(args: &[String]) -> Result<(GlobalOptions, Vec<String>)> {
    let mut format = OutputFormat::Text;
    let mut root = None;
    let mut game = None;
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--format=") {
            format = OutputFormat::parse(value)
                .with_context(|| format!("Unknown format: {value}"))?;
            continue;
        }
        match arg.as_str() {
            "--format" => {
                let value = iter.next().context("--format requires a value")?;
                format = OutputFormat::parse(value)
                    .with_context(|| format!("Unknown format: {value}"))?;
            }
            "--root" => {
                let value = iter.next().context("--root requires a path")?;
                root = Some(PathBuf::from(value));
            }
            "--game" => {
                let value = iter.next().context("--game requires an id")?;
                game = Some(value.to_string());
            }
            _ => {
                if let Some(value) = arg.strip_prefix("--root=") {
                    root = Some(PathBuf::from(value));
                } else if let Some(value) = arg.strip_prefix("--game=") {
                    game = Some(value.to_string());
                } else {
                    tokens.push(arg.to_string());
                }
            }
        }
    }

    Ok((GlobalOptions { format, root, game }, tokens))
}

fn parse_command(tokens: &[String]) -> Result<CliCommand> {
    let Some(head) = tokens.first() else {
        return Ok(CliCommand::Help);
    };
    let rest = tokens.get(1..).unwrap_or(&[]);
    let command = match head.as_str() {
        "help" | "--help" | "-h" => CliCommand::Help,
        "version" | "--version" | "-V" => CliCommand::Version,
        "compile" => parse_compile(rest)?,
        "deploy" => CliCommand::Deploy(single_arg(rest, "deploy requires a mod id")?),
        "remove" => CliCommand::Remove(single_arg(rest, "remove requires a mod id")?),
        "list" => CliCommand::List,
        "lineage" => CliCommand::Lineage(single_arg(rest, "lineage requires a path")?),
        "register" => {
            let (Some(game), Some(root)) = (rest.first(), rest.get(1)) else {
                bail!("register requires a game id and a root path");
            };
            CliCommand::Register {
                game: game.to_string(),
                root: PathBuf::from(root),
            }
        }
        other => bail!("Unknown command: {other} (see `layerkeep help`)"),
    };
    Ok(command)
}

fn single_arg(rest: &[String], message: &'static str) -> Result<String> {
    rest.first().cloned().context(message)
}

fn parse_compile(args: &[String]) -> Result<CliCommand> {
    let mut source = None;
    let mut metadata = CompileMetadata::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value_for = |flag: &str| -> Result<String> {
            iter.next()
                .cloned()
                .with_context(|| format!("{flag} requires a value"))
        };
        match arg.as_str() {
            "--id" => metadata.id = value_for("--id")?,
            "--name" => metadata.name = Some(value_for("--name")?),
            "--version" => metadata.version = Some(value_for("--version")?),
            "--load-order" => {
                let raw = value_for("--load-order")?;
                metadata.load_order = raw
                    .parse()
                    .with_context(|| format!("invalid load order: {raw}"))?;
            }
            "--source" => metadata.download_source = Some(value_for("--source")?),
            "--description" => metadata.description = Some(value_for("--description")?),
            value if value.starts_with("--") => bail!("Unknown compile option: {value}"),
            value => {
                if source.is_some() {
                    bail!("compile takes a single source directory");
                }
                source = Some(PathBuf::from(value));
            }
        }
    }
    let source = source.context("compile requires a source directory")?;
    if metadata.id.is_empty() {
        bail!("compile requires --id");
    }
    Ok(CliCommand::Compile { source, metadata })
}

fn run_command(
    coordinator: &DeploymentCoordinator,
    command: CliCommand,
    format: OutputFormat,
) -> Result<()> {
    match command {
        CliCommand::Compile { source, metadata } => {
            let manifest = coordinator.compile(&source, metadata)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&manifest)?),
                OutputFormat::Text => println!(
                    "Compiled {} ({} file(s), {} bytes)",
                    manifest.id,
                    manifest.files.len(),
                    manifest.total_bytes()
                ),
            }
            Ok(())
        }
        CliCommand::Deploy(mod_id) => {
            let report = coordinator.deploy(&mod_id)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => {
                    println!(
                        "Deployed {}: {} file(s) live, {} shadowed",
                        report.mod_id,
                        report.applied.len(),
                        report.shadowed.len()
                    );
                }
            }
            Ok(())
        }
        CliCommand::Remove(mod_id) => {
            let report = coordinator.remove(&mod_id)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => print_remove_report(&report),
            }
            Ok(())
        }
        CliCommand::List => list_mods(coordinator, format),
        CliCommand::Lineage(path) => show_lineage(coordinator, &path, format),
        CliCommand::Help | CliCommand::Version | CliCommand::Register { .. } => Ok(()),
    }
}

fn print_remove_report(report: &RemoveReport) {
    println!(
        "Removed {}: {} restored, {} reverted to original, {} unchanged",
        report.mod_id,
        report.restored.len(),
        report.reverted.len(),
        report.unchanged.len()
    );
    if report.is_partial() {
        println!("Skipped {} file(s):", report.skipped.len());
        for skipped in &report.skipped {
            println!("  {}: {}", skipped.path, skipped.reason);
        }
    }
}

#[derive(Serialize)]
struct ModListItem {
    id: String,
    name: String,
    version: String,
    load_order: u32,
    files: usize,
    deployed: bool,
}

impl ModListItem {
    fn new(manifest: &ModManifest, deployed: bool) -> Self {
        Self {
            id: manifest.id.clone(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            load_order: manifest.load_order,
            files: manifest.files.len(),
            deployed,
        }
    }
}

fn list_mods(coordinator: &DeploymentCoordinator, format: OutputFormat) -> Result<()> {
    let deployed = coordinator.deployed_mods()?;
    let deployed_ids: HashSet<&str> = deployed.iter().map(|entry| entry.id.as_str()).collect();
    let mut items: Vec<ModListItem> = deployed
        .iter()
        .map(|entry| ModListItem::new(entry, true))
        .collect();
    for manifest in coordinator.stored_manifests()? {
        if !deployed_ids.contains(manifest.id.as_str()) {
            items.push(ModListItem::new(&manifest, false));
        }
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&items)?),
        OutputFormat::Text => {
            for item in items {
                let deployed = if item.deployed { "x" } else { " " };
                println!(
                    "{order:>4} [{deployed}] {id:<24} {files:>5} file(s)  {name} {version}",
                    order = item.load_order,
                    id = item.id,
                    files = item.files,
                    name = item.name,
                    version = item.version
                );
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct LineageLayer {
    mod_id: String,
    content_hash: String,
    timestamp: i64,
}

fn show_lineage(
    coordinator: &DeploymentCoordinator,
    path: &str,
    format: OutputFormat,
) -> Result<()> {
    let lineage = coordinator.lineage(path)?;
    let layers: Vec<LineageLayer> = lineage
        .iter()
        .flat_map(|lineage| lineage.versions.iter())
        .map(|version| LineageLayer {
            mod_id: version.mod_id.clone(),
            content_hash: version.content_hash.clone(),
            timestamp: version.timestamp,
        })
        .collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&layers)?),
        OutputFormat::Text => {
            if layers.is_empty() {
                println!("{path}: original game content");
                return Ok(());
            }
            // Top of the stack first: that is what is live.
            for (index, layer) in layers.iter().rev().enumerate() {
                let marker = if index == 0 { "*" } else { " " };
                let short_hash = layer.content_hash.get(..12).unwrap_or(&layer.content_hash);
                println!(
                    "{marker} {id:<24} {short_hash} {stamp}",
                    id = layer.mod_id,
                    stamp = format_timestamp(layer.timestamp)
                );
            }
        }
    }
    Ok(())
}

fn format_timestamp(timestamp: i64) -> String {
    let format = time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]");
    time::OffsetDateTime::from_unix_timestamp(timestamp)
        .ok()
        .and_then(|date| date.format(&format).ok())
        .unwrap_or_else(|| "----------------".to_string())
}

fn print_help() {
    println!("layerkeep");
    println!();
    println!("Usage:");
    println!("  layerkeep [options] compile <dir> --id <id> [--name <name>] [--version <v>]");
    println!("                      [--load-order <n>] [--source <url>] [--description <text>]");
    println!("  layerkeep [options] deploy <mod-id>     Apply a stored mod to the game");
    println!("  layerkeep [options] remove <mod-id>     Take a mod back out");
    println!("  layerkeep [options] list                Deployed and stored mods");
    println!("  layerkeep [options] lineage <path>      Owners of one game file");
    println!("  layerkeep register <game-id> <root>     Remember a game root");
    println!();
    println!("Options:");
    println!("  --root <dir>                    Game root (overrides the registered root)");
    println!("  --game <id>                     Game id (defaults to the configured game)");
    println!("  --format <json|text>            Output format");
    println!("  -h, --help                      Show help");
    println!("  -V, --version                   Show version");
    println!();
    println!("Set RUST_LOG=debug for detailed logs.");
}
