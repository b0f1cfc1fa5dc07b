use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::DynamicImage;
use once_cell::sync::{Lazy, OnceCell};
use photothumb::cache::DiskCache;
use photothumb::config::{default_log_dir, load_settings_file};
use photothumb::{DecodeRequest, ImageService, ServiceConfig};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{info, warn};
use walkdir::WalkDir;

const SETTINGS_ENV: &str = "PHOTOTHUMB_SETTINGS";
const POOL_MIN_THREADS: usize = 2;
const POOL_MAX_THREADS: usize = 8;

const USAGE: &str = "usage:
  photothumb thumb <path> <side> <out>
  photothumb preview <path> <side> <out>
  photothumb warm <dir> <side>
  photothumb stats
  photothumb clear";

static WORKER_POOL: Lazy<Result<ThreadPool, String>> = Lazy::new(|| {
    let threads = num_cpus::get().clamp(POOL_MIN_THREADS, POOL_MAX_THREADS);
    ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("thumb-worker-{i}"))
        .build()
        .map_err(|e| format!("Failed to build worker pool: {e}"))
});

fn init_logging() {
    static GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
    let log_dir = default_log_dir();
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create log dir {:?}: {}", log_dir, e);
        return;
    }
    let file_appender = tracing_appender::rolling::never(&log_dir, "photothumb.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = GUARD.set(guard);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(non_blocking);
    if let Err(e) = subscriber.try_init() {
        eprintln!("Failed to init tracing subscriber: {e}");
    }
    info!(log_dir = %log_dir.display(), "logging initialized");
}

fn load_config() -> ServiceConfig {
    let Some(path) = std::env::var_os(SETTINGS_ENV) else {
        return ServiceConfig::default();
    };
    match load_settings_file(Path::new(&path)) {
        Ok(settings) => ServiceConfig::from_settings(&settings),
        Err(e) => {
            warn!(error = %e, "using default settings");
            ServiceConfig::default()
        }
    }
}

fn parse_side(raw: &str) -> Result<i32, String> {
    raw.trim()
        .parse::<i32>()
        .map_err(|e| format!("Invalid side {raw:?}: {e}"))
}

fn write_request(service: &ImageService, request: &DecodeRequest, out: &Path) -> Result<(), String> {
    let img = service.load(request);
    let dynamic = img
        .to_dynamic()
        .ok_or_else(|| "Image buffer does not match its dimensions".to_string())?;
    encodable_for(out, dynamic)
        .save(out)
        .map_err(|e| format!("Failed to write {}: {e}", out.display()))?;
    println!(
        "{} {}x{}{}",
        out.display(),
        img.width(),
        img.height(),
        if img.is_placeholder() { " (placeholder)" } else { "" }
    );
    Ok(())
}

/// JPEG has no alpha channel; flatten before handing it to that encoder.
fn encodable_for(out: &Path, img: DynamicImage) -> DynamicImage {
    let is_jpeg = out
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"));
    if is_jpeg && img.color().has_alpha() {
        DynamicImage::ImageRgb8(img.into_rgb8())
    } else {
        img
    }
}

fn stats_report(disk: &DiskCache) -> Result<String, String> {
    let stats = disk.stats().map_err(|e| e.to_string())?;
    let report = serde_json::json!({
        "dir": disk.root().display().to_string(),
        "disk": stats,
    });
    serde_json::to_string_pretty(&report).map_err(|e| e.to_string())
}

fn warm(service: &ImageService, dir: &Path, side: i32) -> Result<(), String> {
    let files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();

    let pool = WORKER_POOL.as_ref().map_err(Clone::clone)?;
    let placeholders = AtomicUsize::new(0);
    pool.install(|| {
        files.par_iter().for_each(|path| {
            if service.get_thumbnail(path, side).is_placeholder() {
                placeholders.fetch_add(1, Ordering::Relaxed);
            }
        });
    });
    let placeholders = placeholders.into_inner();
    info!(
        dir = %dir.display(),
        files = files.len(),
        placeholders,
        "warm finished"
    );
    println!(
        "warmed {} files ({} placeholders)",
        files.len(),
        placeholders
    );
    Ok(())
}

fn run(args: &[String]) -> Result<(), String> {
    let service = ImageService::new(load_config());
    match args {
        [cmd, path, side, out] if cmd == "thumb" => write_request(
            &service,
            &DecodeRequest::thumbnail(path, parse_side(side)?),
            Path::new(out),
        ),
        [cmd, path, side, out] if cmd == "preview" => write_request(
            &service,
            &DecodeRequest::preview(path, parse_side(side)?),
            Path::new(out),
        ),
        [cmd, dir, side] if cmd == "warm" => warm(&service, Path::new(dir), parse_side(side)?),
        [cmd] if cmd == "stats" => {
            println!("{}", stats_report(service.disk())?);
            Ok(())
        }
        [cmd] if cmd == "clear" => {
            let removed = service.disk().clear().map_err(|e| e.to_string())?;
            info!(files = removed.files, bytes = removed.bytes, "disk cache cleared");
            println!("removed {} files ({} bytes)", removed.files, removed.bytes);
            Ok(())
        }
        _ => Err(USAGE.to_string()),
    }
}

fn main() -> ExitCode {
    init_logging();
    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use std::time::{Duration, SystemTime};

    fn uniq_dir(label: &str) -> PathBuf {
        let ts = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("photothumb-cli-test-{label}-{ts}"));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn transparent_result_can_be_written_as_jpeg() {
        let dir = uniq_dir("rgba-jpeg");
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            12,
            8,
            image::Rgba([10, 200, 30, 0]),
        ));
        let out = dir.join("thumb.JPG");
        encodable_for(&out, rgba.clone()).save(&out).unwrap();
        let back = image::open(&out).unwrap();
        assert_eq!((back.width(), back.height()), (12, 8));

        let png = dir.join("thumb.png");
        assert!(encodable_for(&png, rgba).color().has_alpha());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn stats_report_lists_dir_and_counts() {
        let dir = uniq_dir("stats");
        let report = stats_report(&DiskCache::new(dir.join("thumbs"))).unwrap();
        let value: serde_json::Value = serde_json::from_str(&report).unwrap();
        assert_eq!(value["disk"]["files"], 0);
        assert!(value["dir"].as_str().unwrap().ends_with("thumbs"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn stats_report_survives_non_utf8_cache_dir() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = uniq_dir("non-utf8");
        let root = dir.join(OsStr::from_bytes(b"thumbs-\xff"));
        let report = stats_report(&DiskCache::new(root)).unwrap();
        assert!(report.contains("thumbs-"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
