use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use vlayer_core::{
    Diagnostic, DiagnosticCode, EngineConfig, Envelope, LayerSummary, Location, Report, Severity,
};
use vlayer_definition::{is_definition_path, validate_all, DefinitionDocument};
use vlayer_engine::{Engine, OpenOptions, VirtualDataset};
use vlayer_source::{lock, DataSource, FeatureLayer, SourceHandle};

/// vlayer - inspect and validate virtual layer definitions
#[derive(Parser)]
#[command(name = "vlayer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: vlayer.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Describe the layers of a definition
    Info {
        /// Definition file (.vrt.json or .vrt.toml)
        definition: PathBuf,

        /// Print the report as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Print the features of a layer
    Dump {
        /// Definition file (.vrt.json or .vrt.toml)
        definition: PathBuf,

        /// Layer to dump (default: the first one)
        #[arg(short, long)]
        layer: Option<String>,

        /// Attribute filter, e.g. "population > 1000"
        #[arg(short = 'w', long = "where")]
        filter: Option<String>,

        /// Spatial filter rectangle: minx,miny,maxx,maxy
        #[arg(short, long)]
        bbox: Option<String>,

        /// Stop after this many features
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Validate every definition below a directory
    Check {
        /// Directory to search
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Output file for report.json
        #[arg(short, long, default_value = "report.json")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load config if specified
    let config = if let Some(config_path) = &cli.config {
        EngineConfig::from_file(config_path)?
    } else if Path::new("vlayer.toml").exists() {
        EngineConfig::from_file(Path::new("vlayer.toml"))?
    } else {
        if cli.verbose {
            eprintln!("{}", "No config file found, using defaults".yellow());
        }
        EngineConfig::default()
    };

    if cli.verbose {
        eprintln!(
            "{} max depth {}, clipping {}",
            "Using".cyan(),
            config.max_open_depth,
            if config.enable_clipping { "on" } else { "off" }
        );
    }

    tracing::debug!(
        max_open_depth = config.max_open_depth,
        enable_clipping = config.enable_clipping,
        "engine configured"
    );
    let engine = Engine::new(config);
    match cli.command {
        Commands::Info { definition, json } => info_command(&engine, &definition, json),
        Commands::Dump {
            definition,
            layer,
            filter,
            bbox,
            limit,
        } => dump_command(
            &engine,
            &definition,
            layer.as_deref(),
            filter.as_deref(),
            bbox.as_deref(),
            limit,
        ),
        Commands::Check { dir, output } => check_command(&engine, &dir, &output, cli.verbose),
    }
}

fn open_definition(engine: &Engine, path: &Path) -> Result<(DefinitionDocument, VirtualDataset)> {
    let document = DefinitionDocument::from_file(path)?;
    let locator = path
        .to_str()
        .with_context(|| format!("{} is not valid UTF-8", path.display()))?;
    let dataset = engine.open(locator, OpenOptions::read_only())?;
    Ok((document, dataset))
}

/// Inspect one layer, draining its diagnostics into the report
fn summarize(name: &str, kind: &str, handle: &SourceHandle, report: &mut Report) {
    let mut layer = lock(handle);
    let ready = layer.ensure_ready();
    let schema = layer.schema();
    let capabilities = layer.capabilities();
    let (feature_count, extent) = match ready {
        Ok(()) => (
            layer.feature_count().ok(),
            if schema.geom_fields.is_empty() {
                None
            } else {
                layer.extent(0).ok().flatten()
            },
        ),
        Err(_) => (None, None),
    };
    for diagnostic in layer.take_diagnostics() {
        report.add_diagnostic(diagnostic);
    }
    report.add_layer(LayerSummary {
        name: name.to_string(),
        kind: kind.to_string(),
        geometry_type: schema.geometry_type().to_string(),
        srs: schema.srs().map(ToString::to_string),
        field_count: schema.fields.len(),
        feature_count,
        extent,
        capabilities: capabilities.names(),
    });
}

/// Info command - describe each layer of a definition
fn info_command(engine: &Engine, path: &Path, json: bool) -> Result<()> {
    let (document, dataset) = open_definition(engine, path)?;
    let mut report = Report::new();
    let mut schemas = Vec::new();

    for (name, node) in document.layer_names().into_iter().zip(&document.layers) {
        let Some(handle) = dataset.layer_by_name(name) else {
            continue;
        };
        summarize(name, node.kind(), &handle, &mut report);
        schemas.push(lock(&handle).schema());
    }

    if json {
        println!("{}", report.to_json()?);
        return Ok(());
    }

    println!("{} {}", "Definition:".bold(), path.display());
    for (summary, schema) in report.layers.iter().zip(&schemas) {
        println!();
        println!(
            "{} {} ({})",
            "Layer".bold().bright_blue(),
            summary.name.bold(),
            summary.kind
        );
        println!("  Geometry: {}", summary.geometry_type);
        if let Some(srs) = &summary.srs {
            println!("  SRS:      {}", srs);
        }
        match summary.feature_count {
            Some(count) => println!("  Features: {}", count),
            None => println!("  Features: {}", "unavailable".red()),
        }
        if let Some(extent) = &summary.extent {
            println!(
                "  Extent:   ({}, {}) - ({}, {})",
                extent.min_x, extent.min_y, extent.max_x, extent.max_y
            );
        }
        if !summary.capabilities.is_empty() {
            println!("  Capabilities: {}", summary.capabilities.join(", "));
        }
        for field in &schema.fields {
            println!("    {}: {}", field.name, field.field_type);
        }
        for field in &schema.geom_fields {
            println!("    {} {}: {}", "geometry".dimmed(), field.name, field.geometry_type);
        }
    }
    print_diagnostics(&report.diagnostics);
    Ok(())
}

fn parse_bbox(text: &str) -> Result<Envelope> {
    let values = text
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid bbox '{}'", text))?;
    match values.as_slice() {
        [min_x, min_y, max_x, max_y] => Ok(Envelope::new(*min_x, *min_y, *max_x, *max_y)),
        _ => anyhow::bail!("bbox needs four values: minx,miny,maxx,maxy"),
    }
}

/// Dump command - print the features of one layer
fn dump_command(
    engine: &Engine,
    path: &Path,
    layer: Option<&str>,
    filter: Option<&str>,
    bbox: Option<&str>,
    limit: Option<usize>,
) -> Result<()> {
    let (_, dataset) = open_definition(engine, path)?;
    let handle = match layer {
        Some(name) => dataset
            .layer_by_name(name)
            .with_context(|| format!("no layer named '{}'", name))?,
        None => dataset.layer(0).context("the definition has no layers")?,
    };

    let mut layer = lock(&handle);
    layer.ensure_ready()?;
    layer.set_attribute_filter(filter)?;
    if let Some(bbox) = bbox {
        layer.set_spatial_filter(0, Some(parse_bbox(bbox)?.to_polygon()))?;
    }
    layer.reset_reading();

    let mut printed = 0;
    while limit.map_or(true, |limit| printed < limit) {
        let Some(feature) = layer.next_feature()? else {
            break;
        };
        let fid = feature
            .fid()
            .map_or_else(|| "-".to_string(), |fid| fid.to_string());
        println!("{} {}", "Feature".bold(), fid);
        let schema = feature.schema().clone();
        for (i, field) in schema.fields.iter().enumerate() {
            match feature.field_at(i) {
                Some(value) => println!("  {} = {}", field.name, value),
                None => println!("  {} = {}", field.name, "(unset)".dimmed()),
            }
        }
        for (i, field) in schema.geom_fields.iter().enumerate() {
            match feature.geometry_at(i) {
                Some(geometry) => println!("  {} = {}", field.name, vlayer_geom::to_wkt(geometry)),
                None => println!("  {} = {}", field.name, "EMPTY".dimmed()),
            }
        }
        if let Some(style) = feature.style() {
            println!("  style = {}", style);
        }
        printed += 1;
    }
    let diagnostics = layer.take_diagnostics();
    drop(layer);

    if printed == 0 {
        println!("{}", "No features".yellow());
    }
    print_diagnostics(&diagnostics);
    Ok(())
}

/// Definition files below a directory, sorted by path
fn find_definitions(dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.to_str().is_some_and(is_definition_path))
        .collect();
    found.sort();
    found
}

/// Validate one definition file, adding its findings to the report
fn check_definition(engine: &Engine, path: &Path, report: &mut Report) {
    let file = path.display().to_string();
    let invalid = |message: String| {
        Diagnostic::new(DiagnosticCode::DefinitionInvalid, Severity::Error, message)
            .with_location(Location::new(file.clone()))
    };

    let document = match DefinitionDocument::from_file(path) {
        Ok(document) => document,
        Err(e) => {
            report.add_diagnostic(invalid(e.to_string()));
            return;
        }
    };
    let errors = validate_all(&document);
    if !errors.is_empty() {
        for error in errors {
            report.add_diagnostic(invalid(error.to_string()));
        }
        return;
    }

    let opened = path
        .to_str()
        .context("path is not valid UTF-8")
        .and_then(|locator| Ok(engine.open(locator, OpenOptions::read_only())?));
    let dataset = match opened {
        Ok(dataset) => dataset,
        Err(e) => {
            report.add_diagnostic(invalid(e.to_string()));
            return;
        }
    };
    for (name, node) in document.layer_names().into_iter().zip(&document.layers) {
        if let Some(handle) = dataset.layer_by_name(name) {
            summarize(name, node.kind(), &handle, report);
        }
    }
}

/// Check command - validate every definition below a directory
fn check_command(engine: &Engine, dir: &Path, output: &Path, verbose: bool) -> Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("{} is not a directory", dir.display());
    }
    let definitions = find_definitions(dir);
    if verbose {
        eprintln!(
            "{} {} definitions in {}",
            "Found".cyan(),
            definitions.len(),
            dir.display()
        );
    }

    let mut report = Report::new();
    for path in &definitions {
        if verbose {
            eprintln!("  {} {}...", "Checking".cyan(), path.display());
        }
        check_definition(engine, path, &mut report);
    }

    report.save_to_file(output)?;
    if verbose {
        eprintln!("{} {}", "Report saved to:".green(), output.display());
    }

    print_report_summary(&report, definitions.len());

    // Exit with error code if there are errors
    if report.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    if diagnostics.is_empty() {
        return;
    }
    println!();
    println!("{}", "Diagnostics:".bold());
    for diag in diagnostics {
        let severity_str = match diag.severity {
            Severity::Error => "ERROR".red().bold(),
            Severity::Warn => "WARN".yellow().bold(),
            Severity::Info => "INFO".cyan(),
        };
        println!("  [{}] {}: {}", severity_str, diag.code, diag.message);
        if let Some(loc) = &diag.location {
            println!("    at {}", loc);
        }
    }
}

/// Print report summary to stdout
fn print_report_summary(report: &Report, definitions: usize) {
    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Virtual Layer Check Report".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("Version: {}", report.version);
    println!("Timestamp: {}", report.timestamp);
    println!();

    println!("{}", "Summary:".bold());
    println!("  Definitions: {}", definitions);
    println!("  Layers:      {}", report.summary.layers_inspected);
    println!("  Features:    {}", report.summary.features_scanned);

    if report.summary.errors > 0 {
        println!("  Errors:   {}", format!("{}", report.summary.errors).red().bold());
    } else {
        println!("  Errors:   {}", format!("{}", report.summary.errors).green());
    }

    if report.summary.warnings > 0 {
        println!("  Warnings: {}", format!("{}", report.summary.warnings).yellow());
    } else {
        println!("  Warnings: {}", format!("{}", report.summary.warnings).green());
    }

    println!("  Info:     {}", report.summary.info);

    if report.diagnostics.is_empty() {
        println!();
        println!("{}", "✓ No issues found!".green().bold());
    } else {
        print_diagnostics(&report.diagnostics);
    }

    println!();
    println!("{}", "=".repeat(60).bright_blue());
}
