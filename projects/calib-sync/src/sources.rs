use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A video file taking part in a synchronization run
#[derive(Debug, Clone, PartialEq)]
pub struct VideoSource {
    /// Position of this video's entry in the time offsets
    pub index: usize,
    pub name: String,
    pub path: PathBuf,
}

impl VideoSource {
    pub fn new(index: usize, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        Self { index, name, path }
    }
}

/// Every `.mp4` below `video_root`, sorted by path.
pub fn list_videos(video_root: &Path) -> Vec<PathBuf> {
    let mut videos: Vec<PathBuf> = WalkDir::new(video_root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| s.to_lowercase() == "mp4")
                .unwrap_or(false)
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    videos.sort();
    videos
}

/// Resolves video names relative to `folder`, or lists the folder when no
/// names are given. Indices follow the resulting order.
pub fn resolve_sources(folder: &Path, names: &[String]) -> Result<Vec<VideoSource>> {
    let paths: Vec<PathBuf> = if names.is_empty() {
        list_videos(folder)
    } else {
        names.iter().map(|name| folder.join(name)).collect()
    };

    if paths.is_empty() {
        return Err(anyhow!("No videos found in {}", folder.display()));
    }

    Ok(paths
        .into_iter()
        .enumerate()
        .map(|(index, path)| VideoSource::new(index, path))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_resolve_named_sources() {
        let folder = Path::new("/data/session");
        let sources =
            resolve_sources(folder, &["left.mp4".to_string(), "right.MP4".to_string()]).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[1].index, 1);
        assert_eq!(sources[1].name, "right.MP4");
        assert_eq!(sources[0].path, folder.join("left.mp4"));
    }

    #[test]
    fn test_lists_mp4_files_in_order() {
        let dir = std::env::temp_dir().join(format!("calib-sync-list-{}", std::process::id()));
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("b.mp4"), b"").unwrap();
        fs::write(dir.join("a.MP4"), b"").unwrap();
        fs::write(dir.join("notes.txt"), b"").unwrap();
        fs::write(dir.join("nested").join("c.mp4"), b"").unwrap();

        let sources = resolve_sources(&dir, &[]).unwrap();
        let names: Vec<&str> = sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a.MP4", "b.mp4", "c.mp4"]);
        assert_eq!(sources[2].index, 2);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_empty_folder_is_an_error() {
        let dir = std::env::temp_dir().join(format!("calib-sync-empty-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        assert!(resolve_sources(&dir, &[]).is_err());
        fs::remove_dir_all(&dir).unwrap();
    }
}
