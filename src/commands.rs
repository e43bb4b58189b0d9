//! Subcommand handlers. Each takes its parsed arguments and the loaded
//! settings, writes its report to `Output`, and returns an exit status.

use crate::{DiffArgs, HashArgs, RmdupArgs};
use anyhow::{Context, Result};
use dialoguer::Confirm;
use imgtools::Settings;
use imgtools::core::image::load;
use imgtools::core::{
    HashConfig, HashEngine, ImageCodec, Mode, Pipeline, Progress, RemovalOutcome, RunReport,
    SimilarityComparator, Stage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

pub enum Status {
    Success,
    Failure,
}

pub struct Output<'a> {
    pub out: &'a mut dyn Write,
    pub quiet: bool,
}

/// Print `<hex>  <path>` for every image; unreadable images are reported and
/// skipped.
pub fn hash(args: &HashArgs, settings: Settings, output: &mut Output) -> Result<Status> {
    let config = match args.bits {
        Some(bits) => HashConfig::from_bits(bits)?,
        None => settings.hash,
    };
    let engine = HashEngine::new(config)?;

    let mut status = Status::Success;
    for path in &args.images {
        match engine.hash_file(&ImageCodec, path) {
            Ok(print) => writeln!(output.out, "{}  {}", print.fingerprint, path.display())?,
            Err(e) => {
                eprintln!("⚠️  {}", e);
                status = Status::Failure;
            }
        }
    }
    Ok(status)
}

/// Print the SSIM score of two images.
pub fn diff(args: &DiffArgs, settings: Settings, output: &mut Output) -> Result<Status> {
    settings.ssim.validate()?;
    let first = load(&ImageCodec, &args.first)?;
    let second = load(&ImageCodec, &args.second)?;
    let score = SimilarityComparator::new(settings.ssim)
        .compare(&first.image, &second.image)
        .with_context(|| {
            format!(
                "Failed to compare {} with {}",
                args.first.display(),
                args.second.display()
            )
        })?;

    writeln!(output.out, "{:.4}", score)?;
    if let Some(threshold) = args.threshold {
        if score < threshold {
            writeln!(
                output.out,
                "Images {} and {} differ with SSIM={:.3}",
                args.first.display(),
                args.second.display(),
                score
            )?;
            return Ok(Status::Failure);
        }
    }
    Ok(Status::Success)
}

/// Run the duplicate-removal pipeline over a directory.
pub fn rmdup(args: &RmdupArgs, mut settings: Settings, output: &mut Output) -> Result<Status> {
    apply_overrides(args, &mut settings);
    let pipeline = Pipeline::new(settings);
    let progress = BarProgress::new(output.quiet);

    if !args.json {
        writeln!(output.out, "▶ Scanning for duplicates in: {}", args.dir.display())?;
    }
    let mut report = pipeline.run(&args.dir, &progress)?;

    if !args.json {
        print_report(output.out, &report)?;
    }

    if args.interactive && report.mode == Mode::DryRun && !report.plans.is_empty() {
        let confirmed = Confirm::new()
            .with_prompt("Delete duplicates?")
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;
        if confirmed {
            pipeline.apply(&mut report);
            if !args.json {
                print_report(output.out, &report)?;
            }
        }
    }

    if args.json {
        serde_json::to_writer_pretty(&mut *output.out, &report)?;
        writeln!(output.out)?;
    }

    Ok(if report.is_success() {
        Status::Success
    } else {
        Status::Failure
    })
}

fn apply_overrides(args: &RmdupArgs, settings: &mut Settings) {
    if let Some(threshold) = args.threshold {
        settings.cluster.threshold = threshold;
    }
    if args.apply {
        settings.mode = Mode::Apply;
    } else if args.dry_run || args.interactive {
        settings.mode = Mode::DryRun;
    }
    if args.recursive {
        settings.scan.recursive = true;
    }
    if args.jobs.is_some() {
        settings.jobs = args.jobs;
    }
    if args.no_verify {
        settings.cluster.verify = false;
    }
    if let Some(score) = args.ssim_threshold {
        settings.cluster.confirm_threshold = score;
    }
}

fn print_report(out: &mut dyn Write, report: &RunReport) -> Result<()> {
    if report.plans.is_empty() {
        writeln!(out, "No duplicates found.")?;
    } else {
        writeln!(out, "Found {} duplicate group(s):", report.plans.len())?;
    }

    for (i, plan) in report.plans.iter().enumerate() {
        writeln!(out, "\n✨ Group {}:", i + 1)?;
        writeln!(out, "   🏆 Keeping → {}", plan.canonical.display())?;
        for removal in &plan.removals {
            let path = removal.path.display();
            match &removal.outcome {
                RemovalOutcome::Planned => writeln!(out, "   🗑️  [dry-run] DELETE {}", path)?,
                RemovalOutcome::Removed => writeln!(out, "   🗑️  Deleted {}", path)?,
                RemovalOutcome::Failed(reason) => {
                    writeln!(out, "   ❌ Failed to delete {}: {}", path, reason)?
                }
                RemovalOutcome::Skipped(reason) => writeln!(out, "   ⚠️  Kept {}: {}", path, reason)?,
            }
        }
    }

    writeln!(
        out,
        "\n{} image(s) scanned, {} hashed, {} unique.",
        report.scanned,
        report.hashed,
        report.unique_count()
    )?;

    if !report.failures.is_empty() {
        writeln!(out, "\n⚠️  {} file(s) had errors:", report.failures.len())?;
        for failure in &report.failures {
            writeln!(
                out,
                "   {} [{}]: {}",
                failure.path.display(),
                failure.stage,
                failure.message
            )?;
        }
    }

    if report.mode == Mode::DryRun && !report.plans.is_empty() {
        writeln!(out, "\n⚠️  Dry-run only; no files were changed.")?;
    } else if report.mode == Mode::Apply {
        writeln!(out, "\n✅ Removed {} duplicate(s).", report.removed().count())?;
    }
    Ok(())
}

const BAR_TEMPLATE: &str = "{spinner:.green} {msg} [{bar:30.cyan/blue}] {pos}/{len} ({eta})";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {msg}";

/// indicatif bars, one per stage.
struct BarProgress {
    quiet: bool,
    bar: Mutex<Option<ProgressBar>>,
}

impl BarProgress {
    fn new(quiet: bool) -> Self {
        Self {
            quiet,
            bar: Mutex::new(None),
        }
    }
}

impl Progress for BarProgress {
    fn begin(&self, stage: Stage, total: u64) {
        if self.quiet {
            return;
        }
        let bar = if total == 0 {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::with_template(SPINNER_TEMPLATE)
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            spinner
        } else {
            let bar = ProgressBar::new(total);
            bar.set_style(
                ProgressStyle::with_template(BAR_TEMPLATE)
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar
        };
        bar.set_message(match stage {
            Stage::Hash => "Hashing images…",
            Stage::Verify => "Verifying duplicates…",
            _ => "Working…",
        });
        bar.enable_steady_tick(Duration::from_millis(100));
        if let Ok(mut current) = self.bar.lock() {
            *current = Some(bar);
        }
    }

    fn advance(&self) {
        if let Ok(current) = self.bar.lock() {
            if let Some(bar) = current.as_ref() {
                bar.inc(1);
            }
        }
    }

    fn finish(&self, _stage: Stage) {
        if let Ok(mut current) = self.bar.lock() {
            if let Some(bar) = current.take() {
                bar.finish_and_clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn save_image(path: &std::path::Path, seed: u32) {
        let img = ImageBuffer::from_fn(48, 32, |x, y| {
            Rgb([((x * seed) % 256) as u8, ((y * 7 + seed) % 256) as u8, 90])
        });
        img.save(path).unwrap();
    }

    fn rmdup_args(dir: PathBuf) -> RmdupArgs {
        RmdupArgs {
            dir,
            threshold: None,
            dry_run: false,
            apply: false,
            recursive: false,
            jobs: Some(2),
            no_verify: false,
            ssim_threshold: None,
            interactive: false,
            json: false,
        }
    }

    #[test]
    fn test_hash_prints_hex_and_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.png");
        save_image(&path, 3);

        let mut buffer = Vec::new();
        let args = HashArgs {
            images: vec![path.clone()],
            bits: None,
        };
        let status = hash(
            &args,
            Settings::default(),
            &mut Output {
                out: &mut buffer,
                quiet: true,
            },
        )
        .unwrap();

        let text = String::from_utf8(buffer).unwrap();
        let (hex, printed) = text.trim_end().split_once("  ").unwrap();
        assert!(matches!(status, Status::Success));
        assert_eq!(hex.len(), 16);
        assert_eq!(printed, path.display().to_string());
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut settings = Settings::default();
        let mut args = rmdup_args(PathBuf::from("."));
        args.threshold = Some(3);
        args.apply = true;
        args.no_verify = true;
        args.ssim_threshold = Some(0.75);
        apply_overrides(&args, &mut settings);

        assert_eq!(settings.cluster.threshold, 3);
        assert_eq!(settings.mode, Mode::Apply);
        assert!(!settings.cluster.verify);
        assert_eq!(settings.cluster.confirm_threshold, 0.75);
        assert_eq!(settings.jobs, Some(2));
    }

    #[test]
    fn test_rmdup_dry_run_report() {
        let temp_dir = TempDir::new().unwrap();
        save_image(&temp_dir.path().join("a.png"), 3);
        std::fs::copy(temp_dir.path().join("a.png"), temp_dir.path().join("b.png")).unwrap();

        let mut buffer = Vec::new();
        let status = rmdup(
            &rmdup_args(temp_dir.path().to_path_buf()),
            Settings::default(),
            &mut Output {
                out: &mut buffer,
                quiet: true,
            },
        )
        .unwrap();

        let text = String::from_utf8(buffer).unwrap();
        assert!(matches!(status, Status::Success));
        assert!(text.contains("Found 1 duplicate group(s):"));
        assert!(text.contains("[dry-run] DELETE"));
        assert!(text.contains("Dry-run only"));
        assert!(temp_dir.path().join("b.png").exists());
    }
}
