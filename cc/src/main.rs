//! composecfn - compose-file to CloudFormation transpiler
//!
//! CLI entry point: parse, compose families, render, write.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::info;

use composecfn::cli::{Cli, Command, OutputFormat};
use composecfn::compose::ComposeProject;
use composecfn::config::Config;
use composecfn::family::{BuiltFamily, ComposeFamily};
use composecfn::render::render_project;

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::WARN };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Some(Command::Render { files, output, format }) => cmd_render(&config, &files, output, format),
        Some(Command::Validate { files }) => cmd_validate(&config, &files),
        None => {
            // Default: print help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

/// Load, merge and parse the given compose files
fn load_project(files: &[PathBuf]) -> Result<ComposeProject> {
    let mut documents = Vec::new();
    for path in files {
        let content = fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
        let document =
            serde_yaml::from_str(&content).context(format!("Failed to parse {}", path.display()))?;
        documents.push(document);
    }
    let project = ComposeProject::from_documents(documents)?;
    Ok(project)
}

/// Build every family of the project, aborting on the first fatal error
fn build_families(config: &Config, project: &ComposeProject) -> Result<Vec<BuiltFamily>> {
    let service_families = project.service_families();
    let lookups = config.lookup_registry();
    let build_config = config.family_build_config();

    let mut built = Vec::new();
    for (name, services) in project.family_groupings() {
        let family = ComposeFamily::new(
            &name,
            services,
            project.secrets.clone(),
            project.volumes.clone(),
            build_config.clone(),
        )?;
        built.push(family.build_all(&service_families, &lookups)?);
    }
    Ok(built)
}

fn cmd_render(config: &Config, files: &[PathBuf], output: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    let project = load_project(files)?;
    let built = build_families(config, &project)?;

    let descriptors: Vec<_> = built.iter().map(|b| b.descriptor.clone()).collect();
    let template = render_project(&config.render.description, &descriptors)?;

    let rendered = match format {
        OutputFormat::Yaml => template.to_yaml()?,
        OutputFormat::Json => template.to_json()?,
    };

    // Render everything before touching the filesystem: a failed family
    // must not leave a partial artifact behind
    let output_path = output.unwrap_or_else(|| PathBuf::from(format.default_output()));
    write_output(&output_path, &rendered)?;

    let warning_count: usize = built.iter().map(|b| b.warnings.len()).sum();
    println!(
        "{} rendered {} families ({} resources) -> {}",
        "ok".green().bold(),
        descriptors.len(),
        template.len(),
        output_path.display()
    );
    if warning_count > 0 {
        println!("{} {warning_count} policy warnings (run with -v for details)", "warn".yellow().bold());
    }

    info!(families = descriptors.len(), resources = template.len(), "Render complete");
    Ok(())
}

fn write_output(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).context(format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, content).context(format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn cmd_validate(config: &Config, files: &[PathBuf]) -> Result<()> {
    let project = load_project(files)?;
    let service_count = project.services.len();
    let built = build_families(config, &project)?;

    println!(
        "{} {} services in {} families",
        "valid".green().bold(),
        service_count,
        built.len()
    );
    for family in &built {
        for warning in &family.warnings {
            println!("{} {}: {warning}", "warn".yellow().bold(), family.descriptor.family_name);
        }
    }
    Ok(())
}
