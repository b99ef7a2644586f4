//! # phototag CLI - tag photos by renaming them
//!
//! Command-line front end for the phototag library. Every invocation opens
//! the library, applies one command, then flushes pending renames and
//! writes the history store.
//!
//! ## Usage
//! ```bash
//! # List images and their tags
//! phototag --root ~/Pictures ls
//!
//! # Tag a photo (renames it to "vacation @beach.jpg")
//! phototag --root ~/Pictures tag vacation.jpg beach
//!
//! # Find every photo with a tag below a directory
//! phototag --root ~/Pictures find beach --within 2024
//!
//! # Undo a rename
//! phototag --root ~/Pictures revert "vacation @beach.jpg" vacation.jpg
//! ```

use clap::{Parser, Subcommand};
use colored::*;
use phototag::{
    CommandClassifier, FlushReport, HistoryRecord, ImageId, PhotoTag, PhotoTagBuilder,
    PhotoTagError, Result, TagVisibility,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// phototag CLI - keep photo tags in the file names
#[derive(Parser)]
#[command(name = "phototag")]
#[command(version)]
#[command(about = "Tag image files by renaming them, with a tracked rename history")]
#[command(long_about = None)]
struct Cli {
    /// Root directory of the photo tree
    #[arg(short, long, global = true, default_value = ".")]
    root: PathBuf,

    /// History store file (defaults to config.txt next to the executable)
    #[arg(short, long, global = true, env = "PHOTOTAG_STORE")]
    store: Option<PathBuf>,

    /// Program suggesting a tag for an image, called with the image path
    #[arg(long, global = true, env = "PHOTOTAG_CLASSIFIER")]
    classifier: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print machine-readable JSON where supported
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List images and subdirectories
    #[command(alias = "list")]
    Ls {
        /// Directory to list (defaults to the root)
        dir: Option<PathBuf>,
    },

    /// Show the visible tags
    Tags,

    /// Add tags to the visible roster
    Register {
        /// Tags to register
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Retire tags; tags still worn by images stay searchable
    Retire {
        /// Tags to retire
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Tag an image
    Tag {
        /// Image path or name
        image: PathBuf,

        /// Tags to add
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Remove tags from an image
    Untag {
        /// Image path or name
        image: PathBuf,

        /// Tags to remove
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Remove every tag from images
    Clear {
        /// Image paths or names
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },

    /// Move images into another tracked directory
    Mv {
        /// Destination directory
        dest: PathBuf,

        /// Images to move
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },

    /// Rename an image back to an earlier name
    Revert {
        /// Image path or name
        image: PathBuf,

        /// File name to restore, e.g. "vacation @beach.jpg"
        name: String,
    },

    /// Show rename history
    History {
        /// Image path or name
        image: Option<PathBuf>,

        /// Show the history of every image, including vanished ones
        #[arg(long, conflicts_with = "image")]
        all: bool,
    },

    /// Find images wearing a tag
    Find {
        /// Tag to search for
        tag: String,

        /// Only search below this directory
        #[arg(short, long)]
        within: Option<PathBuf>,
    },

    /// Show the tags shared by images
    Common {
        /// Image paths or names
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },

    /// Ask the classifier for tag suggestions
    Suggest {
        /// Image paths or names
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },

    /// Create a subdirectory of the root
    Mkdir {
        /// Directory name
        name: String,
    },
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("phototag=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() || cli.json {
        colored::control::set_override(false);
    }

    // Run command
    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> Result<()> {
    let mut photos = open_library(&cli)?;
    let json = cli.json;

    match cli.command {
        Commands::Ls { dir } => cmd_ls(&mut photos, dir, json)?,
        Commands::Tags => cmd_tags(&photos, json)?,
        Commands::Register { tags } => cmd_register(&mut photos, tags)?,
        Commands::Retire { tags } => cmd_retire(&mut photos, tags),
        Commands::Tag { image, tags } => cmd_tag(&mut photos, &image, tags)?,
        Commands::Untag { image, tags } => cmd_untag(&mut photos, &image, tags)?,
        Commands::Clear { images } => cmd_clear(&mut photos, images)?,
        Commands::Mv { dest, images } => cmd_mv(&mut photos, &dest, images)?,
        Commands::Revert { image, name } => cmd_revert(&mut photos, &image, &name)?,
        Commands::History { image, all } => cmd_history(&photos, image, all, json)?,
        Commands::Find { tag, within } => cmd_find(&mut photos, &tag, within, json)?,
        Commands::Common { images } => cmd_common(&photos, images, json)?,
        Commands::Suggest { images } => cmd_suggest(&mut photos, images, json)?,
        Commands::Mkdir { name } => cmd_mkdir(&mut photos, &name)?,
    }

    let report = photos.close()?;
    print_flush_report(&report, json);
    Ok(())
}

/// Open the library described by the global flags
fn open_library(cli: &Cli) -> Result<PhotoTag> {
    let store = match &cli.store {
        Some(path) => path.clone(),
        None => default_store_path(),
    };

    let mut builder = PhotoTagBuilder::new();
    if let Some(program) = &cli.classifier {
        builder = builder.classifier(CommandClassifier::new(program));
    }
    builder.build(&cli.root, store)
}

/// `config.txt` beside the installed executable
fn default_store_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("config.txt")))
        .unwrap_or_else(|| PathBuf::from("config.txt"))
}

fn resolve_image(photos: &PhotoTag, path: &Path) -> Result<ImageId> {
    photos
        .image_at(path)
        .ok_or_else(|| PhotoTagError::ImageNotFound(path.display().to_string()))
}

fn image_name(photos: &PhotoTag, image: ImageId) -> String {
    photos
        .image(image)
        .map(|i| i.file_name().to_string())
        .unwrap_or_else(|| image.to_string())
}

fn image_path(photos: &PhotoTag, image: ImageId) -> String {
    photos
        .image(image)
        .map(|i| i.logical_path().display().to_string())
        .unwrap_or_else(|| image.to_string())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// List the images and subdirectories of a directory
fn cmd_ls(photos: &mut PhotoTag, dir: Option<PathBuf>, json: bool) -> Result<()> {
    let dir_id = match dir {
        Some(path) => photos
            .directory_at(&path)
            .ok_or_else(|| PhotoTagError::DirectoryNotFound(path.display().to_string()))?,
        None => photos.current_directory(),
    };

    let mirror = photos.mirror();
    let mut images: Vec<_> = mirror
        .images_in(dir_id)
        .iter()
        .filter_map(|id| mirror.image(*id))
        .collect();
    images.sort_by(|a, b| a.file_name().cmp(b.file_name()));

    let mut subdirs: Vec<&Path> = mirror
        .subdirectories(dir_id)
        .iter()
        .filter_map(|id| mirror.node(*id).map(|n| n.path()))
        .collect();
    subdirs.sort();

    if json {
        let value = json!({
            "directories": subdirs,
            "images": images.iter().map(|img| json!({
                "name": img.file_name(),
                "path": img.logical_path(),
                "tags": img.tags(),
                "pending": img.is_pending_move(),
            })).collect::<Vec<_>>(),
        });
        return print_json(&value);
    }

    for subdir in &subdirs {
        let name = subdir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        println!("{}/", name.blue().bold());
    }
    for img in &images {
        let tags: Vec<&str> = img.tags().iter().map(String::as_str).collect();
        if tags.is_empty() {
            println!("{}", img.file_name());
        } else {
            println!("{}  {}", img.file_name(), tags.join(", ").cyan());
        }
    }
    if subdirs.is_empty() && images.is_empty() {
        println!("{}", "No images found.".yellow());
    }
    Ok(())
}

/// Show the visible tags
fn cmd_tags(photos: &PhotoTag, json: bool) -> Result<()> {
    let tags = photos.visible_tags();
    if json {
        return print_json(&json!(tags));
    }
    if tags.is_empty() {
        println!("{}", "No tags registered.".yellow());
    }
    for tag in tags {
        let count = photos
            .images_with_tag(&tag, None)
            .map(|images| images.len())
            .unwrap_or(0);
        println!("{} {}", tag.cyan().bold(), format!("({} images)", count).dimmed());
    }
    Ok(())
}

fn cmd_register(photos: &mut PhotoTag, tags: Vec<String>) -> Result<()> {
    for tag in tags {
        if photos.register_tag(&tag)? {
            println!("{} Registered {}", "✓".green().bold(), tag.cyan());
        } else {
            println!("{} {} already registered", "·".dimmed(), tag.cyan());
        }
    }
    Ok(())
}

fn cmd_retire(photos: &mut PhotoTag, tags: Vec<String>) {
    for tag in tags {
        if !photos.retire_tag(&tag) {
            println!("{} Unknown tag {}", "·".dimmed(), tag.cyan());
            continue;
        }
        match photos.tag_visibility(&tag) {
            TagVisibility::Hidden => println!(
                "{} Hid {} (still worn by some images)",
                "✓".green().bold(),
                tag.cyan()
            ),
            _ => println!("{} Removed {}", "✓".green().bold(), tag.cyan()),
        }
    }
}

fn cmd_tag(photos: &mut PhotoTag, image: &Path, tags: Vec<String>) -> Result<()> {
    let id = resolve_image(photos, image)?;
    for tag in tags {
        if photos.add_tag(id, &tag)? {
            println!("{} {}", "✓".green().bold(), image_name(photos, id));
        } else {
            println!("{} Already tagged {}", "·".dimmed(), tag.cyan());
        }
    }
    Ok(())
}

fn cmd_untag(photos: &mut PhotoTag, image: &Path, tags: Vec<String>) -> Result<()> {
    let id = resolve_image(photos, image)?;
    for tag in tags {
        if photos.remove_tag(id, &tag)? {
            println!("{} {}", "✓".green().bold(), image_name(photos, id));
        } else {
            println!("{} Not tagged {}", "·".dimmed(), tag.cyan());
        }
    }
    Ok(())
}

fn cmd_clear(photos: &mut PhotoTag, images: Vec<PathBuf>) -> Result<()> {
    for image in images {
        let id = resolve_image(photos, &image)?;
        if photos.clear_tags(id)? {
            println!("{} {}", "✓".green().bold(), image_name(photos, id));
        }
    }
    Ok(())
}

fn cmd_mv(photos: &mut PhotoTag, dest: &Path, images: Vec<PathBuf>) -> Result<()> {
    for image in images {
        if photos.move_image(dest, &image) {
            println!("{} {} -> {}", "✓".green().bold(), image.display(), dest.display());
        } else {
            println!(
                "{} Cannot move {} to {}",
                "✗".red().bold(),
                image.display(),
                dest.display()
            );
        }
    }
    Ok(())
}

fn cmd_revert(photos: &mut PhotoTag, image: &Path, name: &str) -> Result<()> {
    let id = resolve_image(photos, image)?;
    photos.revert_name(id, name)?;
    println!("{} {}", "✓".green().bold(), image_name(photos, id));
    Ok(())
}

/// Show the history of one image or of everything
fn cmd_history(photos: &PhotoTag, image: Option<PathBuf>, all: bool, json: bool) -> Result<()> {
    let records: Vec<HistoryRecord> = match image {
        Some(path) if !all => {
            let id = resolve_image(photos, &path)?;
            let owner = photos
                .image(id)
                .map(|i| i.physical_path().to_path_buf())
                .unwrap_or_default();
            photos
                .image_history(id)?
                .iter()
                .map(|entry| HistoryRecord {
                    path: owner.clone(),
                    entry: entry.clone(),
                })
                .collect()
        }
        _ => photos.all_histories(),
    };

    if json {
        return print_json(&serde_json::to_value(&records)?);
    }
    if records.is_empty() {
        println!("{}", "No history recorded.".yellow());
    }
    for record in &records {
        println!(
            "{}  {} -> {}  {}",
            record.entry.timestamp.dimmed(),
            record.entry.old_name,
            record.entry.new_name.green(),
            record.path.display().to_string().dimmed()
        );
    }
    Ok(())
}

fn cmd_find(photos: &mut PhotoTag, tag: &str, within: Option<PathBuf>, json: bool) -> Result<()> {
    let within = match within {
        Some(path) => Some(
            photos
                .directory_at(&path)
                .ok_or_else(|| PhotoTagError::DirectoryNotFound(path.display().to_string()))?,
        ),
        None => None,
    };

    let Some(images) = photos.images_with_tag(tag, within) else {
        if json {
            return print_json(&serde_json::Value::Null);
        }
        println!("{} Unknown tag {}", "·".dimmed(), tag.cyan());
        return Ok(());
    };

    let mut paths: Vec<String> = images.into_iter().map(|id| image_path(photos, id)).collect();
    paths.sort();
    if json {
        return print_json(&json!(paths));
    }
    for path in paths {
        println!("{}", path);
    }
    Ok(())
}

fn cmd_common(photos: &PhotoTag, images: Vec<PathBuf>, json: bool) -> Result<()> {
    let ids = images
        .iter()
        .map(|path| resolve_image(photos, path))
        .collect::<Result<Vec<_>>>()?;
    let common = photos.common_tags(&ids)?;
    if json {
        return print_json(&json!(common));
    }
    for tag in common {
        println!("{}", tag.cyan());
    }
    Ok(())
}

fn cmd_suggest(photos: &mut PhotoTag, images: Vec<PathBuf>, json: bool) -> Result<()> {
    let mut suggestions = Vec::new();
    for path in images {
        let id = resolve_image(photos, &path)?;
        suggestions.push((image_name(photos, id), photos.suggested_tag(id)?));
    }

    if json {
        let value: serde_json::Map<String, serde_json::Value> = suggestions
            .into_iter()
            .map(|(name, tag)| (name, json!(tag)))
            .collect();
        return print_json(&serde_json::Value::Object(value));
    }
    for (name, tag) in suggestions {
        match tag {
            Some(tag) => println!("{}  {}", name, tag.cyan().bold()),
            None => println!("{}  {}", name, "no suggestion".dimmed()),
        }
    }
    Ok(())
}

fn cmd_mkdir(photos: &mut PhotoTag, name: &str) -> Result<()> {
    if photos.create_subdirectory(name)? {
        println!("{} Created {}", "✓".green().bold(), name.blue());
    } else {
        println!("{} {} already exists", "·".dimmed(), name.blue());
    }
    Ok(())
}

fn print_flush_report(report: &FlushReport, json: bool) {
    if json {
        return;
    }
    if report.renamed > 0 {
        println!(
            "{}",
            format!("Renamed {} file(s) on disk", report.renamed).dimmed()
        );
    }
    for failed in &report.failed {
        eprintln!(
            "{} {} -> {}: {} (will retry)",
            "Warning".yellow().bold(),
            failed.from.display(),
            failed.to.display(),
            failed.reason
        );
    }
}
