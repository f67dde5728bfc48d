mod config;
mod summary;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use resave_core::{LoadOptions, LoadResult, SaveFile, SizeReport};
use resave_nls::Encoding;

use crate::config::{ToolConfig, ToolConfigBuilder};
use crate::summary::SaveSummary;

#[derive(ClapParser, Debug)]
#[command(version, about = "Inspect and rewrite Skyrim and Fallout 4 savegames", long_about = None)]
struct Args {
    /// Configuration file. Defaults to `resave.toml` in the working directory.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Code page of the strings in the save.
    #[arg(short, long)]
    encoding: Option<Encoding>,

    /// Keep the Papyrus block as raw bytes.
    #[arg(long)]
    raw_papyrus: bool,

    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the header, the plugins and the size of every table.
    Info { input: PathBuf },
    /// Load, re-encode and re-load a save, failing if anything changes.
    Verify { input: PathBuf },
    /// Dump a summary of the save as YAML.
    Dump {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Load a save and write it back out.
    Rewrite { input: PathBuf, output: PathBuf },
}

fn load(path: &Path, options: &LoadOptions) -> Result<LoadResult> {
    let loaded = resave_core::load(path, options).with_context(|| format!("loading {}", path.display()))?;
    for d in loaded.save.diagnostics().entries() {
        log::warn!("{}: {:?}", path.display(), d);
    }
    if loaded.truncated {
        log::warn!("{}: the save was only partially read and cannot be written back", path.display());
    }
    Ok(loaded)
}

fn info(path: &Path, options: &LoadOptions) -> Result<()> {
    let LoadResult { save, digest, truncated } = load(path, options)?;
    let h = &save.header;

    println!("game:          {}", save.game);
    println!("player:        {} (level {})", save.text(&h.player_name), h.level);
    println!("location:      {}", save.text(&h.location));
    println!("save number:   {}", h.save_number);
    println!("form version:  {}", save.form_version);
    println!("compression:   {}", h.compression);
    println!("digest:        {:08X}", digest);
    println!("truncated:     {}", truncated);

    println!("plugins ({}):", save.plugins.full.len());
    for (i, p) in save.plugins.full.iter().enumerate() {
        println!("  {:02X} {}", i, save.text(p));
    }
    if let Some(light) = &save.plugins.light {
        println!("light plugins ({}):", light.len());
        for (i, p) in light.iter().enumerate() {
            println!("  FE:{:03X} {}", i, save.text(p));
        }
    }

    println!("change forms:  {}", save.change_forms.len());
    if let Some(p) = save.papyrus() {
        println!(
            "papyrus:       {} strings, {} scripts, {} instances, {} arrays, {} active scripts",
            p.strings.len(),
            p.scripts.len(),
            p.script_instances.len(),
            p.arrays.len(),
            p.active_scripts.len()
        );
    }

    let report = SizeReport::of_save(&save, options.parallel_threshold);
    println!("sizes:");
    for t in &report.tables {
        println!("  {:<24} {:>8} entries {:>10} bytes", t.name, t.entries, t.bytes);
    }
    Ok(())
}

fn verify(path: &Path, options: &LoadOptions) -> Result<()> {
    let original = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let first = load(path, options)?;
    if first.truncated {
        bail!("{} could not be read completely", path.display());
    }

    let encoded = first.save.encode()?;
    if encoded.digest != first.digest {
        bail!("digest changed: {:08X} -> {:08X}", first.digest, encoded.digest);
    }
    if !first.save.header.compression.is_compressed() && encoded.bytes != original {
        let at = encoded
            .bytes
            .iter()
            .zip(&original)
            .position(|(a, b)| a != b)
            .unwrap_or_else(|| encoded.bytes.len().min(original.len()));
        bail!("re-encoded bytes differ from the file at offset {:#x}", at);
    }

    let second = SaveFile::from_bytes(&encoded.bytes, options)?;
    if second.digest != first.digest {
        bail!("re-read digest differs: {:08X} -> {:08X}", first.digest, second.digest);
    }
    if second.save != first.save {
        bail!("re-read save differs from the original");
    }

    log::info!("{}: ok ({} bytes, digest {:08X})", path.display(), encoded.bytes.len(), encoded.digest);
    Ok(())
}

fn dump(path: &Path, output: Option<&Path>, options: &LoadOptions) -> Result<()> {
    let loaded = load(path, options)?;
    let summary = SaveSummary::new(&loaded.save, options.parallel_threshold);
    let yaml = serde_yaml::to_string(&summary)?;
    match output {
        Some(out) => std::fs::write(out, yaml).with_context(|| format!("writing {}", out.display()))?,
        None => print!("{}", yaml),
    }
    Ok(())
}

fn rewrite(input: &Path, output: &Path, options: &LoadOptions) -> Result<()> {
    let loaded = load(input, options)?;
    let result = resave_core::save(&loaded.save, output)
        .with_context(|| format!("writing {}", output.display()))?;
    log::info!(
        "{} -> {}: {} bytes, digest {:08X}",
        input.display(),
        output.display(),
        result.bytes_written,
        result.digest
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = ToolConfigBuilder::from_config(ToolConfig::read_or_default(args.config.as_deref())?)
        .with_verbose(args.verbose);
    if let Some(encoding) = args.encoding {
        builder = builder.with_encoding(encoding);
    }
    if args.raw_papyrus {
        builder = builder.with_decode_papyrus(false);
    }
    let config = builder.get();
    config.logger.init();

    let options = &config.load;
    match &args.command {
        Command::Info { input } => info(input, options),
        Command::Verify { input } => verify(input, options),
        Command::Dump { input, output } => dump(input, output.as_deref(), options),
        Command::Rewrite { input, output } => rewrite(input, output, options),
    }
}
