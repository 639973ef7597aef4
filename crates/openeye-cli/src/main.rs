use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use openeye_core::pipeline::{self, FaceDetection, TrainingReport};
use openeye_core::{DistanceMatcher, FaceLibrary, Gallery, OnnxEncoder};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "openeye", about = "OpenEye face recognition CLI", version)]
struct Cli {
    #[command(flatten)]
    paths: Paths,

    #[command(subcommand)]
    command: Commands,
}

/// Locations shared with the daemon; each falls back to its `OPENEYE_*` variable.
#[derive(Args, Clone)]
struct Paths {
    /// Faces folder (one directory of photos per person)
    #[arg(long, global = true, env = "OPENEYE_FACES_DIR", default_value = "faces")]
    faces_dir: PathBuf,

    /// Trained encodings file
    #[arg(long, global = true, env = "OPENEYE_ENCODINGS_PATH", default_value = "face_encodings.json")]
    encodings: PathBuf,

    /// Passphrase the encodings file is encrypted with
    #[arg(long, global = true, env = "OPENEYE_ENCODINGS_KEY", hide_env_values = true)]
    encodings_key: Option<String>,

    /// Directory holding det_10g.onnx and w600k_r50.onnx
    #[arg(long, global = true, env = "OPENEYE_MODEL_DIR")]
    model_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage known people
    People {
        #[command(subcommand)]
        action: PeopleAction,
    },
    /// Manage a person's photos
    Photos {
        #[command(subcommand)]
        action: PhotosAction,
    },
    /// Encode every photo and rewrite the encodings file
    Train,
    /// Recognize faces in an image file
    Recognize {
        image: PathBuf,
        /// Write a copy with face boxes drawn to this path
        #[arg(long)]
        annotate: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Parse a clarifying-questions brief and list its questions
    Questions {
        file: PathBuf,
        /// Print the parsed brief as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum PeopleAction {
    List,
    Add { name: String },
    Rename { old: String, new: String },
    /// Remove a person, their photos and their encodings
    Remove { name: String },
}

#[derive(Subcommand)]
enum PhotosAction {
    List {
        person: String,
    },
    Add {
        person: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    Remove {
        person: String,
        filename: String,
    },
}

impl Paths {
    fn library(&self) -> Result<FaceLibrary> {
        FaceLibrary::open(&self.faces_dir)
            .with_context(|| format!("cannot open faces folder {}", self.faces_dir.display()))
    }

    fn load_gallery(&self) -> Result<Gallery> {
        Gallery::load(&self.encodings, self.encodings_key.as_deref())
            .with_context(|| format!("cannot load encodings from {}", self.encodings.display()))
    }

    fn save_gallery(&self, gallery: &Gallery) -> Result<()> {
        gallery
            .save(&self.encodings, self.encodings_key.as_deref())
            .with_context(|| format!("cannot write encodings to {}", self.encodings.display()))
    }

    fn encoder(&self, gallery: &Gallery) -> Result<OnnxEncoder> {
        let dir = self.model_dir.clone().unwrap_or_else(openeye_core::default_model_dir);
        let scrfd = dir.join("det_10g.onnx");
        let arcface = dir.join("w600k_r50.onnx");
        OnnxEncoder::load(
            &scrfd.to_string_lossy(),
            &arcface.to_string_lossy(),
            gallery.detection_mode,
        )
        .context("failed to load face models")
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let paths = &cli.paths;

    match cli.command {
        Commands::People { action } => people(paths, action)?,
        Commands::Photos { action } => photos(paths, action)?,
        Commands::Train => {
            let report = train(paths)?;
            println!(
                "Training completed: {} encodings for {} people in {:.1}s ({} photos skipped)",
                report.total_encodings, report.total_people, report.training_time, report.skipped
            );
        }
        Commands::Recognize { image, annotate, json } => {
            let detections = recognize(paths, &image, annotate.as_deref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&detections)?);
            } else if detections.is_empty() {
                println!("No faces found");
            } else {
                for d in &detections {
                    let loc = &d.location;
                    println!(
                        "{:<20} {:>5.1}%  top={} right={} bottom={} left={}",
                        d.name,
                        d.confidence * 100.0,
                        loc.top,
                        loc.right,
                        loc.bottom,
                        loc.left
                    );
                }
            }
        }
        Commands::Questions { file, json } => {
            let text = fs::read_to_string(&file).with_context(|| format!("cannot read {}", file.display()))?;
            print!("{}", questions(&text, json)?);
        }
    }

    Ok(())
}

fn people(paths: &Paths, action: PeopleAction) -> Result<()> {
    let library = paths.library()?;
    match action {
        PeopleAction::List => {
            let people = library.list_people()?;
            if people.is_empty() {
                println!("No people yet");
            }
            for p in people {
                println!("{:<24} {} photo(s)", p.name, p.photo_count);
            }
        }
        PeopleAction::Add { name } => {
            let person = library.add_person(&name)?;
            println!("Added {}", person.name);
        }
        PeopleAction::Rename { old, new } => {
            let person = rename_person(paths, &library, &old, &new)?;
            println!("Renamed {old} to {}", person.name);
        }
        PeopleAction::Remove { name } => {
            let forgotten = remove_person(paths, &library, &name)?;
            println!("Removed {name} ({forgotten} encoding(s) dropped)");
        }
    }
    Ok(())
}

/// Rename the folder and relabel any trained encodings.
fn rename_person(paths: &Paths, library: &FaceLibrary, old: &str, new: &str) -> Result<openeye_core::Person> {
    let person = library.rename_person(old, new)?;
    let mut gallery = paths.load_gallery()?;
    if gallery.rename(old, &person.name) > 0 {
        paths.save_gallery(&gallery)?;
    }
    Ok(person)
}

/// Delete the folder and drop the person's encodings, so no retraining is needed.
fn remove_person(paths: &Paths, library: &FaceLibrary, name: &str) -> Result<usize> {
    library.delete_person(name)?;
    let mut gallery = paths.load_gallery()?;
    let forgotten = gallery.forget(name);
    if forgotten > 0 {
        paths.save_gallery(&gallery)?;
    }
    Ok(forgotten)
}

fn photos(paths: &Paths, action: PhotosAction) -> Result<()> {
    let library = paths.library()?;
    match action {
        PhotosAction::List { person } => {
            for photo in library.list_photos(&person)? {
                println!(
                    "{:<32} {:>9} bytes  {}",
                    photo.filename,
                    photo.size_bytes,
                    photo.uploaded_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        PhotosAction::Add { person, files } => {
            let added = add_photos(&library, &person, &files)?;
            if added == 0 {
                bail!("no valid image files (must be .jpg, .jpeg, or .png)");
            }
            println!("Added {added} photo(s) for {person}");
        }
        PhotosAction::Remove { person, filename } => {
            library.delete_photo(&person, &filename)?;
            println!("Removed {filename}");
        }
    }
    Ok(())
}

fn add_photos(library: &FaceLibrary, person: &str, files: &[PathBuf]) -> Result<usize> {
    let mut added = 0;
    for path in files {
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .with_context(|| format!("{} is not a file", path.display()))?;
        let bytes = fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
        if library.save_photo(person, &filename, &bytes)? {
            added += 1;
        } else {
            tracing::warn!(file = %path.display(), "skipping non-image file");
        }
    }
    Ok(added)
}

fn train(paths: &Paths) -> Result<TrainingReport> {
    let library = paths.library()?;
    let mut gallery = paths.load_gallery()?;
    let mut encoder = paths.encoder(&gallery)?;
    let (faces, report) = pipeline::train(&library, &mut encoder)?;
    gallery.faces = faces;
    paths.save_gallery(&gallery)?;
    Ok(report)
}

fn recognize(paths: &Paths, image_path: &Path, annotate: Option<&Path>) -> Result<Vec<FaceDetection>> {
    let gallery = paths.load_gallery()?;
    if gallery.is_empty() {
        bail!("no trained encodings; run `openeye train` first");
    }
    let mut image = image::open(image_path)
        .with_context(|| format!("cannot open image {}", image_path.display()))?
        .to_rgb8();
    let mut encoder = paths.encoder(&gallery)?;
    let detections = pipeline::recognize(&image, &gallery.faces, gallery.tolerance, &mut encoder, &DistanceMatcher)?;

    if let Some(out) = annotate {
        pipeline::annotate(&mut image, &detections);
        image
            .save(out)
            .with_context(|| format!("cannot write {}", out.display()))?;
    }
    Ok(detections)
}

fn questions(text: &str, json: bool) -> Result<String> {
    let brief = openeye_brief::parse(text)?;
    if json {
        return Ok(format!("{}\n", serde_json::to_string_pretty(&brief)?));
    }
    let mut out = String::new();
    for q in &brief.questions {
        out.push_str(&format!("{}. {}\n", q.number, q.title));
    }
    if brief.awaits_response() {
        out.push_str("(awaiting answers)\n");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use openeye_core::{Embedding, KnownFace};
    use tempfile::TempDir;

    const BRIEF: &str = include_str!("../../openeye-brief/tests/fixtures/clarifying_questions.md");

    fn paths(dir: &TempDir) -> Paths {
        Paths {
            faces_dir: dir.path().join("faces"),
            encodings: dir.path().join("enc.json"),
            encodings_key: Some("k".into()),
            model_dir: None,
        }
    }

    fn seed_gallery(paths: &Paths, names: &[&str]) {
        let faces = names
            .iter()
            .map(|n| KnownFace {
                name: n.to_string(),
                embedding: Embedding { values: vec![1.0, 0.0], model_version: None },
            })
            .collect();
        paths.save_gallery(&Gallery { faces, ..Gallery::default() }).unwrap();
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_nested_subcommands() {
        let cli = Cli::try_parse_from(["openeye", "--faces-dir", "/tmp/f", "people", "rename", "a", "b"]).unwrap();
        assert_eq!(cli.paths.faces_dir, PathBuf::from("/tmp/f"));
        assert!(matches!(cli.command, Commands::People { action: PeopleAction::Rename { .. } }));
        assert!(Cli::try_parse_from(["openeye", "photos", "add", "ann"]).is_err());
    }

    #[test]
    fn test_rename_and_remove_keep_gallery_in_sync() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        let library = paths.library().unwrap();
        library.add_person("ann").unwrap();
        library.add_person("ben").unwrap();
        seed_gallery(&paths, &["ann", "ann", "ben"]);

        let person = rename_person(&paths, &library, "ann", "Anna").unwrap();
        assert_eq!(person.name, "Anna");
        assert_eq!(remove_person(&paths, &library, "ben").unwrap(), 1);

        let gallery = paths.load_gallery().unwrap();
        assert_eq!(gallery.encodings_count(), 2);
        assert!(gallery.faces.iter().all(|f| f.name == "Anna"));
        assert!(remove_person(&paths, &library, "ben").is_err());
    }

    #[test]
    fn test_add_photos_skips_non_images() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        let library = paths.library().unwrap();
        library.add_person("ann").unwrap();
        let jpg = dir.path().join("me.JPG");
        let txt = dir.path().join("notes.txt");
        fs::write(&jpg, b"jpeg bytes").unwrap();
        fs::write(&txt, b"hello").unwrap();

        assert_eq!(add_photos(&library, "ann", &[jpg, txt]).unwrap(), 1);
        assert_eq!(library.get_person("ann").unwrap().photo_count, 1);
    }

    #[test]
    fn test_recognize_needs_trained_gallery() {
        let dir = TempDir::new().unwrap();
        let err = recognize(&paths(&dir), &dir.path().join("x.jpg"), None).unwrap_err();
        assert!(err.to_string().contains("openeye train"));
    }

    #[test]
    fn test_questions_lists_titles() {
        let out = questions(BRIEF, false).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "1. Copyright Header");
        assert_eq!(lines[4], "5. Missing Modules");
        assert_eq!(lines[5], "(awaiting answers)");

        let json: serde_json::Value = serde_json::from_str(&questions(BRIEF, true).unwrap()).unwrap();
        assert_eq!(json["questions"][1]["number"], 2);

        assert!(questions("nothing numbered", false).is_err());
    }
}
