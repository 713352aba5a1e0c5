//! Blocking image transform pipeline.
//!
//! Runs inside `spawn_blocking`: decode, EXIF orientation fix, resize per
//! fit mode, JPEG re-encode. All paths are confined to their configured
//! roots before any filesystem access.

use anyhow::{bail, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageReader};
use path_clean::PathClean;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use super::models::{FitMode, ImageJob, ResizeConfig};

/// Filesystem roots the processor is allowed to touch.
#[derive(Debug, Clone)]
pub struct JobPaths {
    /// Where uploaded inputs live.
    pub uploads_root: PathBuf,
    /// Where processed outputs are written.
    pub processed_dir: PathBuf,
}

impl JobPaths {
    pub fn new(uploads_root: impl Into<PathBuf>, processed_dir: impl Into<PathBuf>) -> Self {
        Self {
            uploads_root: uploads_root.into().clean(),
            processed_dir: processed_dir.into().clean(),
        }
    }
}

/// Resolve `candidate` against `root` and reject anything that escapes it.
///
/// Purely lexical: joins, cleans `..`/`.` segments, then checks the prefix.
/// An absolute candidate inside the root is accepted as-is.
pub fn confine(root: &Path, candidate: &str) -> Result<PathBuf> {
    let resolved = root.join(candidate).clean();
    if !resolved.starts_with(root) {
        bail!("Path {} is outside the allowed root", candidate);
    }
    Ok(resolved)
}

/// Execute the job's transform and return the written output path.
///
/// Does not touch job status; the processor records completion or failure
/// around this call.
pub fn run_transform(job: &ImageJob, paths: &JobPaths) -> Result<PathBuf> {
    let input = confine(&paths.uploads_root, &job.input_path)?;
    if !input.is_file() {
        bail!("Input file {} does not exist", job.input_path);
    }

    let output = match &job.output_path_override {
        Some(override_path) => confine(&paths.processed_dir, override_path)?,
        None => paths.processed_dir.join(job.output_file_name()),
    };
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory {:?}", parent))?;
    }

    let img = decode_oriented(&input)?;
    let img = match job.transform.resize {
        Some(resize) => apply_resize(img, resize),
        None => img,
    };

    // JPEG has no alpha channel.
    let img = DynamicImage::ImageRgb8(img.to_rgb8());
    let file = fs::File::create(&output)
        .with_context(|| format!("Failed to create output file {:?}", output))?;
    let mut writer = BufWriter::new(file);
    let encoder = JpegEncoder::new_with_quality(&mut writer, job.transform.quality.clamp(1, 100));
    img.write_with_encoder(encoder)
        .with_context(|| format!("Failed to encode {:?}", output))?;

    Ok(output)
}

/// Decode the input and bake in its EXIF orientation so downstream crops
/// operate on upright pixels.
fn decode_oriented(input: &Path) -> Result<DynamicImage> {
    let mut decoder = ImageReader::open(input)
        .with_context(|| format!("Failed to open {:?}", input))?
        .with_guessed_format()
        .with_context(|| format!("Failed to probe format of {:?}", input))?
        .into_decoder()
        .with_context(|| format!("Failed to decode {:?}", input))?;
    let orientation = decoder
        .orientation()
        .unwrap_or(image::metadata::Orientation::NoTransforms);
    let mut img = DynamicImage::from_decoder(decoder)
        .with_context(|| format!("Failed to decode {:?}", input))?;
    img.apply_orientation(orientation);
    Ok(img)
}

fn apply_resize(img: DynamicImage, resize: ResizeConfig) -> DynamicImage {
    match resize.fit {
        // resize_to_fill crops overflow centered on both axes.
        FitMode::Cover => img.resize_to_fill(resize.width, resize.height, FilterType::Lanczos3),
        FitMode::Contain => img.resize(resize.width, resize.height, FilterType::Lanczos3),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::models::{JobKind, TransformConfig};
    use image::GenericImageView;
    use tempfile::TempDir;

    fn write_test_png(path: &Path, width: u32, height: u32) {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 0])
        });
        img.save(path).unwrap();
    }

    fn test_paths(dir: &TempDir) -> JobPaths {
        let uploads = dir.path().join("uploads");
        let processed = dir.path().join("processed");
        fs::create_dir_all(&uploads).unwrap();
        JobPaths::new(uploads, processed)
    }

    #[test]
    fn test_confine_rejects_traversal() {
        let root = Path::new("/srv/uploads");
        assert!(confine(root, "user-1/pic.png").is_ok());
        assert!(confine(root, "a/../b.png").is_ok());
        assert!(confine(root, "../etc/passwd").is_err());
        assert!(confine(root, "a/../../etc/passwd").is_err());
        assert!(confine(root, "/etc/passwd").is_err());
        // Absolute path inside the root is fine.
        assert!(confine(root, "/srv/uploads/pic.png").is_ok());
    }

    #[test]
    fn test_cover_resize_produces_exact_dimensions() {
        let dir = TempDir::new().unwrap();
        let paths = test_paths(&dir);
        write_test_png(&paths.uploads_root.join("wide.png"), 400, 100);

        let job = ImageJob::new(
            "user-1",
            JobKind::ProfilePicture,
            "wide.png",
            TransformConfig {
                resize: Some(ResizeConfig {
                    width: 64,
                    height: 64,
                    fit: FitMode::Cover,
                }),
                quality: 85,
            },
        );
        let output = run_transform(&job, &paths).unwrap();
        assert_eq!(output, paths.processed_dir.join("profile_picture-user-1.jpg"));

        let result = image::open(&output).unwrap();
        assert_eq!(result.dimensions(), (64, 64));
    }

    #[test]
    fn test_contain_resize_preserves_aspect_ratio() {
        let dir = TempDir::new().unwrap();
        let paths = test_paths(&dir);
        write_test_png(&paths.uploads_root.join("wide.png"), 400, 100);

        let mut job = ImageJob::new(
            "user-1",
            JobKind::Generic,
            "wide.png",
            TransformConfig {
                resize: Some(ResizeConfig {
                    width: 64,
                    height: 64,
                    fit: FitMode::Contain,
                }),
                quality: 85,
            },
        );
        job.output_path_override = Some("custom/out.jpg".to_string());

        let output = run_transform(&job, &paths).unwrap();
        assert_eq!(output, paths.processed_dir.join("custom/out.jpg"));
        assert_eq!(image::open(&output).unwrap().dimensions(), (64, 16));
    }

    #[test]
    fn test_input_outside_root_fails_before_any_io() {
        let dir = TempDir::new().unwrap();
        let paths = test_paths(&dir);

        let job = ImageJob::new(
            "user-1",
            JobKind::Generic,
            "../secrets.png",
            TransformConfig::default(),
        );
        let err = run_transform(&job, &paths).unwrap_err();
        assert!(err.to_string().contains("outside the allowed"));
        // No output dir was created.
        assert!(!paths.processed_dir.exists());
    }

    #[test]
    fn test_missing_input_fails() {
        let dir = TempDir::new().unwrap();
        let paths = test_paths(&dir);
        let job = ImageJob::new(
            "user-1",
            JobKind::Generic,
            "nope.png",
            TransformConfig::default(),
        );
        let err = run_transform(&job, &paths).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_rerun_overwrites_same_output() {
        let dir = TempDir::new().unwrap();
        let paths = test_paths(&dir);
        write_test_png(&paths.uploads_root.join("pic.png"), 100, 100);

        let job = ImageJob::new(
            "user-1",
            JobKind::ProfilePicture,
            "pic.png",
            TransformConfig::default(),
        );
        let first = run_transform(&job, &paths).unwrap();
        let second = run_transform(&job, &paths).unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read_dir(&paths.processed_dir).unwrap().count(), 1);
    }
}
