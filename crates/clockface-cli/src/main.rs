use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use clockface_core::{
    CancelToken, EnrollmentGallery, EnsembleMatcher, FaceDescriptor, GallerySearch, MatchProfile,
    Matcher, ProfileName,
};
use clockface_engine::EngineConfig;
use clockface_imaging::{Frame, QualityProfile};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "clockface", about = "Clockface face-matching diagnostics")]
struct Cli {
    /// Engine config file; its profile is used when --profile is not given
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum QualityPreset {
    Strict,
    Permissive,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the image quality gate on a photo
    Quality {
        image: PathBuf,
        #[arg(short, long, value_enum, default_value = "strict")]
        profile: QualityPreset,
    },
    /// Print a stored gallery in the current format
    Migrate { gallery: PathBuf },
    /// Score a probe descriptor against one gallery
    Score {
        #[arg(long)]
        probe: PathBuf,
        #[arg(long)]
        gallery: PathBuf,
        #[arg(short, long)]
        profile: Option<ProfileName>,
    },
    /// Identify a probe descriptor among every gallery in a directory
    Search {
        #[arg(long)]
        probe: PathBuf,
        /// Directory of <employee>.json galleries, scanned in file name order
        #[arg(long)]
        galleries: PathBuf,
        #[arg(short, long)]
        profile: Option<ProfileName>,
        #[arg(long, default_value_t = 8_000)]
        budget_ms: u64,
    },
    /// Print the match profile presets as TOML
    Profiles,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Quality { image, profile } => {
            let bytes =
                std::fs::read(&image).with_context(|| format!("reading {}", image.display()))?;
            let frame = Frame::decode(&bytes).context("decoding photo")?;
            let gate = match profile {
                QualityPreset::Strict => QualityProfile::strict(),
                QualityPreset::Permissive => QualityProfile::permissive(),
            };
            match gate.evaluate(&frame) {
                Ok(report) => println!("accepted: {report} (score {:.2})", report.score()),
                Err(rejection) => bail!("rejected: {rejection}"),
            }
        }
        Commands::Migrate { gallery } => {
            let gallery = read_gallery(&gallery)?;
            println!("{}", serde_json::to_string_pretty(&gallery)?);
        }
        Commands::Score {
            probe,
            gallery,
            profile,
        } => {
            let profile = resolve_profile(profile, cli.config.as_deref())?;
            let probe = read_probe(&probe)?;
            let gallery = read_gallery(&gallery)?;
            let verdict = EnsembleMatcher::new(&profile).score(&probe, None, &gallery);
            println!("profile:    {}", profile.name);
            println!("match:      {}", verdict.is_match);
            println!("confidence: {:.3}", verdict.confidence);
            if let Some(d) = verdict.best_distance {
                println!("best dist:  {d:.3}");
            }
            println!("{}", verdict.explanation);
        }
        Commands::Search {
            probe,
            galleries,
            profile,
            budget_ms,
        } => {
            let profile = resolve_profile(profile, cli.config.as_deref())?;
            let probe = read_probe(&probe)?;
            let candidates = read_gallery_dir(&galleries)?;
            let search = GallerySearch::new(
                profile,
                Duration::from_millis(budget_ms),
                Duration::from_millis(budget_ms / 8),
            );
            let result = search.search(&probe, None, &candidates, &CancelToken::new());

            for candidate in &result.candidates {
                println!(
                    "{:<24} {:.3}{}{}",
                    candidate.employee,
                    candidate.confidence,
                    if candidate.is_match { "  match" } else { "" },
                    if candidate.degraded { "  (distance only)" } else { "" },
                );
            }
            println!(
                "scanned {}/{}{}",
                result.scanned,
                result.total,
                if result.partial { " (partial)" } else { "" }
            );
            match result.best {
                Some(best) => println!(
                    "identified: {} ({:.3})",
                    best.employee, best.verdict.confidence
                ),
                None => println!(
                    "no match (best confidence {:.3})",
                    result.best_confidence
                ),
            }
        }
        Commands::Profiles => {
            let presets: BTreeMap<String, MatchProfile> =
                [ProfileName::Strict, ProfileName::Balanced, ProfileName::Permissive]
                    .into_iter()
                    .map(|name| (name.to_string(), name.profile()))
                    .collect();
            print!("{}", toml::to_string(&presets)?);
        }
    }

    Ok(())
}

/// `--profile` wins, then the config file, then the default.
fn resolve_profile(name: Option<ProfileName>, config: Option<&Path>) -> Result<MatchProfile> {
    if let Some(name) = name {
        return Ok(name.profile());
    }
    let config = match config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::from_env(),
    };
    Ok(config.profile.resolve())
}

fn read_probe(path: &Path) -> Result<FaceDescriptor> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let probe: FaceDescriptor = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a descriptor array", path.display()))?;
    if probe.is_empty() {
        bail!("probe descriptor {} is empty", path.display());
    }
    Ok(probe)
}

fn read_gallery(path: &Path) -> Result<EnrollmentGallery> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    EnrollmentGallery::from_json(&text).with_context(|| format!("loading {}", path.display()))
}

fn read_gallery_dir(dir: &Path) -> Result<Vec<(String, Arc<EnrollmentGallery>)>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut galleries = Vec::with_capacity(paths.len());
    for path in paths {
        let employee = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        match read_gallery(&path) {
            Ok(gallery) => galleries.push((employee, Arc::new(gallery))),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping gallery"),
        }
    }
    if galleries.is_empty() {
        bail!("no readable galleries in {}", dir.display());
    }
    Ok(galleries)
}
