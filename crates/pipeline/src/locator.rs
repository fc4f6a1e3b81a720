//! Finding and relocating files the execution service produced.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use t2i2v_comfyui::history::OutputFile;

use crate::error::PipelineError;

/// `type` of files ComfyUI writes to its output directory. Previews are
/// `temp` and live elsewhere.
const OUTPUT_FILE_TYPE: &str = "output";

/// Kind of artifact a stage produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Image,
    Video,
}

impl ArtifactKind {
    /// Accepted file extensions, lowercase, without the dot.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Image => &["png", "jpg", "jpeg", "webp"],
            Self::Video => &["mp4", "webm", "mov"],
        }
    }

    /// Extension used when the source file has none.
    pub fn default_extension(self) -> &'static str {
        self.extensions()[0]
    }

    pub fn matches(self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions().contains(&e.to_lowercase().as_str()))
    }
}

/// First file the service reported for the job that is of `kind` and
/// exists under `output_dir`.
pub fn reported_artifact(
    output_dir: &Path,
    files: &[OutputFile],
    kind: ArtifactKind,
) -> Option<PathBuf> {
    files
        .iter()
        .filter(|file| file.kind.is_empty() || file.kind == OUTPUT_FILE_TYPE)
        .map(|file| output_dir.join(&file.subfolder).join(&file.filename))
        .find(|path| kind.matches(path) && path.is_file())
}

/// Locate the file produced for `prefix` under `output_dir`.
///
/// `prefix` is the service-relative filename prefix, e.g.
/// `agent_t2i2v/run_x/iter_0001/image`. Files in
/// `output_dir/<dirname(prefix)>` whose name starts with
/// `basename(prefix)` are preferred; otherwise the most recently modified
/// file of the right kind directly in `output_dir` is returned.
pub fn locate_artifact(output_dir: &Path, prefix: &str, kind: ArtifactKind) -> Option<PathBuf> {
    let prefix = prefix.trim_end_matches('/');
    let (subdir, name_prefix) = match prefix.rsplit_once('/') {
        Some((dir, name)) => (output_dir.join(dir), name),
        None => (output_dir.to_path_buf(), prefix),
    };

    let by_prefix = newest_file(&subdir, |path| {
        kind.matches(path)
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(name_prefix))
    });
    if by_prefix.is_some() {
        return by_prefix;
    }

    let fallback = newest_file(output_dir, |path| kind.matches(path));
    if let Some(path) = &fallback {
        tracing::warn!(
            prefix,
            path = %path.display(),
            "No artifact matched the prefix, using the most recent file",
        );
    }
    fallback
}

/// Most recently modified regular file in `dir` accepted by `filter`.
/// Unreadable directories and entries are ignored.
fn newest_file(dir: &Path, filter: impl Fn(&Path) -> bool) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && filter(path))
        .map(|path| {
            let modified = path
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path)
        })
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
        .map(|(_, path)| path)
}

/// Extension of `path` including the dot, or the kind's default.
pub fn extension_of(path: &Path, kind: ArtifactKind) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_else(|| kind.default_extension());
    format!(".{ext}")
}

/// Copy `from` to `to`, creating the parent directory.
pub fn copy_artifact(from: &Path, to: &Path) -> Result<(), PipelineError> {
    if let Some(parent) = to.parent() {
        crate::config::create_dir(parent)?;
    }
    std::fs::copy(from, to).map_err(PipelineError::io(to))?;
    tracing::debug!(from = %from.display(), to = %to.display(), "Artifact copied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    fn touch(path: &Path, age_secs: u64) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"data").unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(age_secs);
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }

    // -- kind --

    #[test]
    fn kind_matches_extensions_case_insensitively() {
        assert!(ArtifactKind::Image.matches(Path::new("a.PNG")));
        assert!(ArtifactKind::Image.matches(Path::new("a.webp")));
        assert!(!ArtifactKind::Image.matches(Path::new("a.mp4")));
        assert!(ArtifactKind::Video.matches(Path::new("a.mov")));
        assert!(!ArtifactKind::Video.matches(Path::new("noext")));
    }

    // -- locate --

    #[test]
    fn prefix_match_prefers_newest_in_prefix_directory() {
        let out = tempfile::tempdir().unwrap();
        let dir = out.path().join("agent/run_1/iter_0001");
        touch(&dir.join("image_00001_.png"), 30);
        touch(&dir.join("image_00002_.png"), 10);
        touch(&dir.join("other_00003_.png"), 1);
        touch(&out.path().join("newest.png"), 0);

        let found = locate_artifact(out.path(), "agent/run_1/iter_0001/image", ArtifactKind::Image);
        assert_eq!(found, Some(dir.join("image_00002_.png")));
    }

    #[test]
    fn prefix_match_ignores_wrong_kind() {
        let out = tempfile::tempdir().unwrap();
        let dir = out.path().join("agent/run_1/iter_0001");
        touch(&dir.join("video_00001.png"), 5);
        touch(&dir.join("video_00001.mp4"), 10);

        let found = locate_artifact(out.path(), "agent/run_1/iter_0001/video", ArtifactKind::Video);
        assert_eq!(found, Some(dir.join("video_00001.mp4")));
    }

    #[test]
    fn falls_back_to_newest_file_of_kind_in_output_root() {
        let out = tempfile::tempdir().unwrap();
        touch(&out.path().join("old.png"), 60);
        touch(&out.path().join("recent.jpg"), 5);
        touch(&out.path().join("newest.mp4"), 0);

        let found = locate_artifact(out.path(), "agent/run_1/iter_0001/image", ArtifactKind::Image);
        assert_eq!(found, Some(out.path().join("recent.jpg")));
    }

    #[test]
    fn nothing_found_is_none() {
        let out = tempfile::tempdir().unwrap();
        touch(&out.path().join("notes.txt"), 0);
        assert_eq!(
            locate_artifact(out.path(), "agent/x/video", ArtifactKind::Video),
            None
        );
    }

    #[test]
    fn missing_output_dir_is_none() {
        let out = tempfile::tempdir().unwrap();
        assert_eq!(
            locate_artifact(&out.path().join("absent"), "image", ArtifactKind::Image),
            None
        );
    }

    // -- reported outputs --

    fn reported(filename: &str, subfolder: &str, kind: &str) -> OutputFile {
        OutputFile {
            filename: filename.into(),
            subfolder: subfolder.into(),
            kind: kind.into(),
        }
    }

    #[test]
    fn reported_file_wins_over_directory_scan() {
        let out = tempfile::tempdir().unwrap();
        touch(&out.path().join("custom/clip_7.mp4"), 30);
        touch(&out.path().join("newer.mp4"), 0);

        let files = [
            reported("clip_7.png", "custom", "output"),
            reported("clip_7.mp4", "custom", "output"),
        ];
        assert_eq!(
            reported_artifact(out.path(), &files, ArtifactKind::Video),
            Some(out.path().join("custom/clip_7.mp4"))
        );
    }

    #[test]
    fn reported_previews_and_missing_files_are_skipped() {
        let out = tempfile::tempdir().unwrap();
        touch(&out.path().join("preview.png"), 0);

        let files = [
            reported("preview.png", "", "temp"),
            reported("gone.png", "run", "output"),
        ];
        assert_eq!(reported_artifact(out.path(), &files, ArtifactKind::Image), None);
    }

    // -- relocation --

    #[test]
    fn extension_keeps_source_or_uses_default() {
        assert_eq!(extension_of(Path::new("a/b.jpg"), ArtifactKind::Image), ".jpg");
        assert_eq!(extension_of(Path::new("a/b"), ArtifactKind::Video), ".mp4");
    }

    #[test]
    fn copy_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.png");
        fs::write(&src, b"png").unwrap();
        let dst = dir.path().join("nested/deeper/image.png");

        copy_artifact(&src, &dst).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"png");
    }
}
