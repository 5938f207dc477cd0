//! Concat demuxer descriptor file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use lenscast_common::error::LenscastResult;

static NEXT_LIST_ID: AtomicU64 = AtomicU64::new(0);

/// A transient `file '<path>'` descriptor in the system temp directory.
///
/// Removed on drop, so both the success and failure paths of a merge leave
/// no descriptor behind.
pub struct ConcatList {
    path: PathBuf,
}

impl ConcatList {
    /// Write a descriptor listing the given segments in order.
    pub fn create(segments: &[PathBuf]) -> LenscastResult<Self> {
        let id = NEXT_LIST_ID.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "lenscast-concat-{}-{id}.txt",
            std::process::id()
        ));

        let mut content = String::new();
        for segment in segments {
            content.push_str(&format!("file '{}'\n", escape_concat_path(segment)));
        }
        std::fs::write(&path, content)?;

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ConcatList {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %e, "Concat list removal failed");
        }
    }
}

/// Escape a path for the concat demuxer's single-quoted file directive.
/// A literal `'` closes the quote, emits an escaped quote, and reopens.
fn escape_concat_path(path: &Path) -> String {
    path.display().to_string().replace('\'', r"'\''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_lists_segments_in_order() {
        let segments = vec![PathBuf::from("/tmp/a.mp4"), PathBuf::from("/tmp/b.mp4")];
        let list = ConcatList::create(&segments).unwrap();
        let content = std::fs::read_to_string(list.path()).unwrap();
        assert_eq!(content, "file '/tmp/a.mp4'\nfile '/tmp/b.mp4'\n");
    }

    #[test]
    fn test_descriptor_removed_on_drop() {
        let list = ConcatList::create(&[PathBuf::from("/tmp/a.mp4")]).unwrap();
        let path = list.path().to_path_buf();
        assert!(path.exists());
        drop(list);
        assert!(!path.exists());
    }

    #[test]
    fn test_quote_escaping() {
        assert_eq!(
            escape_concat_path(Path::new("/tmp/it's here.mp4")),
            r"/tmp/it'\''s here.mp4"
        );
        assert_eq!(escape_concat_path(Path::new("/plain/path.mp4")), "/plain/path.mp4");
    }
}
