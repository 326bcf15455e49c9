use std::fs;
use std::path::Path;

use engine_logging::{engine_error, engine_info, engine_warn};
use imgharvest_core::ScrapeOptions;
use imgharvest_engine::{ensure_output_dir, AtomicFileWriter};

/// Default scrape options from a RON file. A missing or unreadable file
/// yields the built-in defaults.
pub(crate) fn load_options(path: &Path) -> ScrapeOptions {
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return ScrapeOptions::default();
        }
        Err(err) => {
            engine_warn!("Failed to read settings from {:?}: {}", path, err);
            return ScrapeOptions::default();
        }
    };

    match ron::from_str(&content) {
        Ok(options) => {
            engine_info!("Loaded settings from {:?}", path);
            options
        }
        Err(err) => {
            engine_warn!("Failed to parse settings from {:?}: {}", path, err);
            ScrapeOptions::default()
        }
    }
}

pub(crate) fn save_options(path: &Path, options: &ScrapeOptions) {
    let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
        engine_error!("Settings path {:?} has no file name", path);
        return;
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    if let Err(err) = ensure_output_dir(&dir) {
        engine_error!("Failed to ensure settings dir {:?}: {}", dir, err);
        return;
    }

    let pretty = ron::ser::PrettyConfig::new();
    let content = match ron::ser::to_string_pretty(options, pretty) {
        Ok(text) => text,
        Err(err) => {
            engine_error!("Failed to serialize settings: {}", err);
            return;
        }
    };

    let writer = AtomicFileWriter::new(dir);
    match writer.write(filename, content.as_bytes()) {
        Ok(written) => engine_info!("Saved settings to {:?}", written),
        Err(err) => engine_error!("Failed to write settings to {:?}: {}", path, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use imgharvest_core::ResolutionWindow;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        assert_eq!(
            load_options(&dir.path().join("absent.ron")),
            ScrapeOptions::default()
        );
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("imgharvest.ron");
        fs::write(
            &path,
            "(limit: 25, convert_webp: true, resolution: (min_width: 640))",
        )
        .unwrap();

        let options = load_options(&path);
        assert_eq!(options.limit, 25);
        assert!(options.convert_webp);
        assert_eq!(options.resolution, ResolutionWindow::new((640, 0), (0, 0)));
        assert_eq!(options.output_dir, PathBuf::from("downloads"));
    }

    #[test]
    fn malformed_files_are_ignored() {
        engine_logging::initialize_for_tests();
        let dir = tempdir().unwrap();
        let path = dir.path().join("imgharvest.ron");
        fs::write(&path, "(limit: \"many\"").unwrap();
        assert_eq!(load_options(&path), ScrapeOptions::default());
    }

    #[test]
    fn saved_options_load_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("imgharvest.ron");
        let options = ScrapeOptions {
            limit: 7,
            keep_filenames: true,
            compression_quality: 60,
            output_dir: PathBuf::from("pictures"),
            ..ScrapeOptions::default()
        };

        save_options(&path, &options);
        assert_eq!(load_options(&path), options);
    }
}
