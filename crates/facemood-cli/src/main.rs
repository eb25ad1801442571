use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facemood_auth::{AuthService, RegisterOutcome, UserStore};
use facemood_core::input::{self, ACCEPTED_EXTENSIONS};
use facemood_core::{annotate, DetectorOptions, EmotionDetector, EmotionLabels};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "facemood", about = "facemood user administration and offline emotion detection")]
struct Cli {
    /// User table CSV
    #[arg(long, global = true, default_value = "auth/users.csv")]
    users: PathBuf,

    /// ONNX emotion model
    #[arg(long, global = true, default_value = "Emotions.onnx")]
    model: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List all accounts
    Users,
    /// List registrations awaiting approval
    Pending,
    /// Approve a pending registration
    Approve { username: String },
    /// Delete an account
    Remove { username: String },
    /// Create an approved admin account
    AddAdmin {
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Run emotion detection on an image file
    Detect {
        input: PathBuf,
        /// Annotated PNG output (default: <input-stem>.annotated.png)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Comma-separated class names in model output order
        #[arg(long)]
        labels: Option<String>,
        #[arg(long, default_value_t = 0.25)]
        confidence: f32,
        /// Overlap above which same-class boxes are suppressed
        #[arg(long, default_value_t = 0.45)]
        iou: f32,
        /// Downscale inputs whose longer side exceeds this
        #[arg(long, default_value_t = 1280)]
        max_side: u32,
        /// Print detections as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let stdout = std::io::stdout();
    run(cli, &mut stdout.lock())
}

fn run(cli: Cli, out: &mut impl Write) -> Result<()> {
    tracing::debug!(users = %cli.users.display(), "opening user store");
    let auth = AuthService::new(UserStore::new(&cli.users));

    match cli.command {
        Commands::Users => {
            let users = auth.list_all()?;
            if users.is_empty() {
                writeln!(out, "No users found in the system.")?;
                return Ok(());
            }
            writeln!(out, "{:<24} {:<6} STATUS", "USERNAME", "ROLE")?;
            for user in &users {
                writeln!(out, "{:<24} {:<6} {}", user.username, user.role.as_str(), user.status_label())?;
            }
        }
        Commands::Pending => {
            let pending = auth.list_pending()?;
            if pending.is_empty() {
                writeln!(out, "No users pending approval.")?;
            }
            for user in &pending {
                writeln!(out, "{}", user.username)?;
            }
        }
        Commands::Approve { username } => {
            if !auth.approve(&username)? {
                bail!("no such user: {username}");
            }
            writeln!(out, "{username} approved.")?;
        }
        Commands::Remove { username } => {
            if !auth.remove(&username)? {
                bail!("no such user: {username}");
            }
            writeln!(out, "{username} removed.")?;
        }
        Commands::AddAdmin { username, password } => {
            if username.is_empty() || password.is_empty() {
                bail!("username and password must not be empty");
            }
            match auth.create_admin(&username, &password)? {
                RegisterOutcome::Registered => writeln!(out, "Admin {username} created.")?,
                RegisterOutcome::AlreadyExists => bail!("username already exists: {username}"),
            }
        }
        Commands::Detect { input: source, output, labels, confidence, iou, max_side, json } => {
            if !input::has_accepted_extension(&source.to_string_lossy()) {
                bail!(
                    "unsupported file type {}; expected one of {}",
                    source.display(),
                    ACCEPTED_EXTENSIONS.join(", ")
                );
            }
            let image = input::load_image(&source, Some(max_side))
                .with_context(|| format!("failed to read {}", source.display()))?;

            if !(0.0..=1.0).contains(&iou) {
                bail!("--iou must be between 0 and 1, got {iou}");
            }
            let options = DetectorOptions {
                confidence_threshold: confidence,
                iou_threshold: iou,
                labels: labels
                    .as_deref()
                    .map(EmotionLabels::parse_list)
                    .unwrap_or_default(),
                ..DetectorOptions::default()
            };
            let mut detector = EmotionDetector::load(&cli.model, options)
                .with_context(|| format!("failed to load model {}", cli.model.display()))?;
            let detections = detector.detect(&image)?;

            let output = output.unwrap_or_else(|| annotated_path(&source));
            annotate(&image, &detections)
                .save(&output)
                .with_context(|| format!("failed to write {}", output.display()))?;

            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&detections)?)?;
            } else if detections.is_empty() {
                writeln!(out, "No faces detected.")?;
            } else {
                for det in &detections {
                    writeln!(
                        out,
                        "{:<10} {:>5.1}%  x={:.0} y={:.0} w={:.0} h={:.0}",
                        det.label,
                        det.confidence * 100.0,
                        det.bbox.x,
                        det.bbox.y,
                        det.bbox.width,
                        det.bbox.height
                    )?;
                }
            }
            writeln!(out, "Annotated image written to {}", output.display())?;
        }
    }

    Ok(())
}

/// `<dir>/<stem>.annotated.png` next to the input.
fn annotated_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    input.with_file_name(format!("{stem}.annotated.png"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn run_args(dir: &TempDir, args: &[&str]) -> Result<String> {
        let users = dir.path().join("users.csv");
        let mut argv = vec!["facemood", "--users", users.to_str().unwrap()];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv)?;
        let mut out = Vec::new();
        run(cli, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_annotated_path() {
        assert_eq!(annotated_path(Path::new("/tmp/face.jpg")), PathBuf::from("/tmp/face.annotated.png"));
        assert_eq!(annotated_path(Path::new("face.png")), PathBuf::from("face.annotated.png"));
    }

    #[test]
    fn test_users_empty_store() {
        let dir = TempDir::new().unwrap();
        assert_eq!(run_args(&dir, &["users"]).unwrap(), "No users found in the system.\n");
    }

    #[test]
    fn test_add_admin_then_list() {
        let dir = TempDir::new().unwrap();
        let out = run_args(&dir, &["add-admin", "root", "--password", "toor"]).unwrap();
        assert_eq!(out, "Admin root created.\n");

        let out = run_args(&dir, &["users"]).unwrap();
        assert!(out.starts_with("USERNAME"));
        assert!(out.contains("root"));
        assert!(out.contains("admin"));
        assert!(out.contains("Approved"));

        assert!(run_args(&dir, &["add-admin", "root", "--password", "x"]).is_err());
    }

    #[test]
    fn test_pending_and_approve() {
        let dir = TempDir::new().unwrap();
        let auth = AuthService::new(UserStore::new(dir.path().join("users.csv")));
        auth.register("alice", "pw1").unwrap();

        assert_eq!(run_args(&dir, &["pending"]).unwrap(), "alice\n");
        assert_eq!(run_args(&dir, &["approve", "alice"]).unwrap(), "alice approved.\n");
        assert_eq!(run_args(&dir, &["pending"]).unwrap(), "No users pending approval.\n");
        assert!(auth.authenticate("alice", "pw1").unwrap().unwrap().approved);
    }

    #[test]
    fn test_unknown_user_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(run_args(&dir, &["approve", "ghost"]).is_err());
        assert!(run_args(&dir, &["remove", "ghost"]).is_err());
    }

    #[test]
    fn test_remove_user() {
        let dir = TempDir::new().unwrap();
        let auth = AuthService::new(UserStore::new(dir.path().join("users.csv")));
        auth.register("alice", "pw1").unwrap();

        assert_eq!(run_args(&dir, &["remove", "alice"]).unwrap(), "alice removed.\n");
        assert!(auth.list_all().unwrap().is_empty());
    }

    #[test]
    fn test_detect_rejects_unsupported_extension() {
        let dir = TempDir::new().unwrap();
        let gif = dir.path().join("anim.gif");
        std::fs::write(&gif, b"GIF89a").unwrap();
        let err = run_args(&dir, &["detect", gif.to_str().unwrap()]).unwrap_err();
        assert!(err.to_string().contains("unsupported file type"));
    }

    #[test]
    fn test_detect_iou_flag() {
        let cli = Cli::try_parse_from(["facemood", "detect", "face.jpg", "--iou", "0.6"]).unwrap();
        match cli.command {
            Commands::Detect { iou, .. } => assert!((iou - 0.6).abs() < 1e-6),
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from(["facemood", "detect", "face.jpg"]).unwrap();
        match cli.command {
            Commands::Detect { iou, .. } => assert!((iou - 0.45).abs() < 1e-6),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_detect_rejects_out_of_range_iou() {
        let dir = TempDir::new().unwrap();
        let jpg = dir.path().join("face.jpg");
        image::RgbImage::from_pixel(8, 8, image::Rgb([10, 20, 30])).save(&jpg).unwrap();
        let err = run_args(&dir, &["detect", jpg.to_str().unwrap(), "--iou", "1.5"]).unwrap_err();
        assert!(err.to_string().contains("--iou must be between 0 and 1"));
    }

    #[test]
    fn test_detect_missing_model() {
        let dir = TempDir::new().unwrap();
        let jpg = dir.path().join("face.jpg");
        image::RgbImage::from_pixel(32, 32, image::Rgb([10, 20, 30]))
            .save(&jpg)
            .unwrap();
        let model = dir.path().join("missing.onnx");

        let err = run_args(&dir, &["--model", model.to_str().unwrap(), "detect", jpg.to_str().unwrap()])
            .unwrap_err();
        assert!(err.to_string().contains("failed to load model"));
    }
}
