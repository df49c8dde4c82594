//! The source directory of uploaded documents.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::document::{DocumentFormat, SourceDocument};
use crate::error::{RagError, Result};

/// A file in the library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    /// Path relative to the library root, `/`-separated. Also the document id.
    pub name: String,
    /// Detected format, if the extension is recognised.
    pub format: Option<DocumentFormat>,
    /// Size in bytes.
    pub size: u64,
    /// Whether ingestion can extract text from it.
    pub supported: bool,
    /// Where the file lives on disk. `name` is lossy for non-UTF-8 paths,
    /// so reads go through this.
    #[serde(skip)]
    pub path: PathBuf,
}

impl DocumentInfo {
    fn new(name: String, path: PathBuf, size: u64) -> Self {
        let format = DocumentFormat::from_path(&name);
        let supported = format.is_some_and(DocumentFormat::is_supported);
        Self { name, format, size, supported, path }
    }
}

/// A library entry that could not be listed, e.g. a dangling link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableEntry {
    /// Library-relative path, as far as it is known.
    pub name: String,
    pub reason: String,
}

/// Everything found under the library root.
#[derive(Debug, Clone, Default)]
pub struct LibraryScan {
    /// Listed files, sorted by name.
    pub documents: Vec<DocumentInfo>,
    pub unreadable: Vec<UnreadableEntry>,
}

/// Uploaded source documents, stored as plain files under one directory.
///
/// Subdirectories are allowed when files are placed there directly; uploads
/// always land at the top level. Hidden files and directories are ignored.
#[derive(Debug, Clone)]
pub struct DocumentLibrary {
    root: PathBuf,
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

impl DocumentLibrary {
    /// A library rooted at `root`. The directory is created on first upload.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The library directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File extensions accepted for upload, without the dot.
    pub fn accepted_extensions() -> Vec<&'static str> {
        DocumentFormat::ALL.iter().flat_map(|format| format.extensions().iter().copied()).collect()
    }

    /// Reduce an uploaded file name to a bare, safe file name.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidDocument`] for empty or hidden names and
    /// for extensions that are not accepted.
    pub fn sanitize_name(name: &str) -> Result<String> {
        let base = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
        if base.is_empty() || base == ".." {
            return Err(RagError::InvalidDocument(format!("'{name}' is not a valid file name")));
        }
        if is_hidden(base) {
            return Err(RagError::InvalidDocument(format!("hidden file '{base}' is not accepted")));
        }
        if DocumentFormat::from_path(base).is_none() {
            return Err(RagError::InvalidDocument(format!(
                "'{base}' has an unsupported extension; accepted: {}",
                Self::accepted_extensions().join(", ")
            )));
        }
        Ok(base.to_string())
    }

    /// Resolve a library-relative name, refusing anything that escapes the root.
    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let escapes = name.trim().is_empty()
            || relative.components().any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(RagError::InvalidDocument(format!("'{name}' is not a library path")));
        }
        Ok(self.root.join(relative))
    }

    /// Store `content` under the sanitised `name`, replacing any existing file.
    pub async fn upload(&self, name: &str, content: &[u8]) -> Result<DocumentInfo> {
        let name = Self::sanitize_name(name)?;
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| RagError::io(&self.root, e))?;

        let path = self.root.join(&name);
        tokio::fs::write(&path, content).await.map_err(|e| RagError::io(&path, e))?;
        info!(document = %name, bytes = content.len(), "document uploaded");
        Ok(DocumentInfo::new(name, path, content.len() as u64))
    }

    /// Remove a document from the library.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DocumentNotFound`] if no such file exists.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let path = self.resolve(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(document = %name, "document deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RagError::DocumentNotFound(name.to_string()))
            }
            Err(e) => Err(RagError::io(path, e)),
        }
    }

    /// Read a document's raw bytes.
    pub async fn read(&self, name: &str) -> Result<SourceDocument> {
        let path = self.resolve(name)?;
        read_source(name, &path).await
    }

    /// Read a listed document from the path it was found at.
    pub async fn read_document(&self, info: &DocumentInfo) -> Result<SourceDocument> {
        read_source(&info.name, &info.path).await
    }

    /// Every file in the library, sorted by name. A missing root is empty.
    /// Entries that cannot be listed are logged and left out.
    pub fn list(&self) -> Result<Vec<DocumentInfo>> {
        let scan = self.scan()?;
        for entry in &scan.unreadable {
            warn!(document = %entry.name, reason = %entry.reason, "library entry not listed");
        }
        Ok(scan.documents)
    }

    /// Walk the library, keeping entries that cannot be listed.
    ///
    /// Symbolic links are followed; a dangling link or a link loop is
    /// reported in [`LibraryScan::unreadable`].
    pub fn scan(&self) -> Result<LibraryScan> {
        if !self.root.exists() {
            return Ok(LibraryScan::default());
        }
        if !self.root.is_dir() {
            return Err(RagError::Configuration(format!(
                "source directory {} is not a directory",
                self.root.display()
            )));
        }

        let mut scan = LibraryScan::default();
        let walk = WalkDir::new(&self.root).follow_links(true).into_iter().filter_entry(|entry| {
            entry.depth() == 0 || !entry.file_name().to_str().is_some_and(is_hidden)
        });
        for entry in walk {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    let size = entry.metadata().map(|m| m.len()).unwrap_or_default();
                    let name = self.relative_name(entry.path());
                    scan.documents.push(DocumentInfo::new(name, entry.into_path(), size));
                }
                Ok(_) => {}
                Err(e) => {
                    let name = e.path().map_or_else(|| self.root.display().to_string(), |p| self.relative_name(p));
                    scan.unreadable.push(UnreadableEntry { name, reason: e.to_string() });
                }
            }
        }

        scan.documents.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(
            root = %self.root.display(),
            documents = scan.documents.len(),
            unreadable = scan.unreadable.len(),
            "library listed"
        );
        Ok(scan)
    }

    fn relative_name(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/")
    }
}

async fn read_source(name: &str, path: &Path) -> Result<SourceDocument> {
    match tokio::fs::read(path).await {
        Ok(content) => Ok(SourceDocument::new(name, content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RagError::DocumentNotFound(name.to_string())),
        Err(e) => Err(RagError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn sanitize_strips_directories_and_rejects_bad_names() {
        assert_eq!(DocumentLibrary::sanitize_name("../../etc/notes.txt").unwrap(), "notes.txt");
        assert_eq!(DocumentLibrary::sanitize_name("C:\\Users\\me\\a.md").unwrap(), "a.md");
        assert!(matches!(DocumentLibrary::sanitize_name(""), Err(RagError::InvalidDocument(_))));
        assert!(matches!(DocumentLibrary::sanitize_name("dir/"), Err(RagError::InvalidDocument(_))));
        assert!(matches!(DocumentLibrary::sanitize_name(".env"), Err(RagError::InvalidDocument(_))));
        assert!(matches!(DocumentLibrary::sanitize_name("tool.exe"), Err(RagError::InvalidDocument(_))));
    }

    #[test]
    fn accepted_extensions_cover_every_format() {
        let extensions = DocumentLibrary::accepted_extensions();
        for ext in ["csv", "doc", "docx", "enex", "eml", "epub", "html", "md", "odt", "pdf", "ppt", "pptx", "txt"] {
            assert!(extensions.contains(&ext), "{ext}");
        }
    }

    #[tokio::test]
    async fn upload_list_and_delete() {
        let temp = tempfile::tempdir().unwrap();
        let library = DocumentLibrary::new(temp.path().join("source"));
        assert!(library.list().unwrap().is_empty());

        library.upload("france.txt", b"The capital of France is Paris.").await.unwrap();
        library.upload("slides.pdf", b"%PDF").await.unwrap();
        fs::create_dir_all(temp.path().join("source/nested")).unwrap();
        fs::write(temp.path().join("source/nested/b.md"), "# B").unwrap();
        fs::write(temp.path().join("source/.hidden.txt"), "secret").unwrap();

        let listed = library.list().unwrap();
        let names: Vec<&str> = listed.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["france.txt", "nested/b.md", "slides.pdf"]);
        assert!(listed[0].supported);
        assert_eq!(listed[0].size, 31);
        assert!(!listed[2].supported);

        let source = library.read("nested/b.md").await.unwrap();
        assert_eq!(source.format, Some(DocumentFormat::Markdown));

        library.delete("france.txt").await.unwrap();
        assert!(matches!(library.delete("france.txt").await, Err(RagError::DocumentNotFound(_))));
        assert!(matches!(library.delete("../outside.txt").await, Err(RagError::InvalidDocument(_))));
        assert_eq!(library.list().unwrap().len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn scan_reports_dangling_links_and_keeps_raw_paths() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("source");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("good.txt"), "fine").unwrap();
        let raw = root.join(OsStr::from_bytes(b"bad\xff.txt"));
        fs::write(&raw, "odd name").unwrap();
        std::os::unix::fs::symlink(temp.path().join("missing.txt"), root.join("ghost.txt")).unwrap();

        let scan = DocumentLibrary::new(&root).scan().unwrap();
        let names: Vec<&str> = scan.documents.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["bad\u{FFFD}.txt", "good.txt"]);
        assert_eq!(scan.documents[0].path, raw);
        assert_eq!(scan.unreadable.len(), 1);
        assert_eq!(scan.unreadable[0].name, "ghost.txt");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn read_document_uses_the_listed_path() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp = tempfile::tempdir().unwrap();
        let library = DocumentLibrary::new(temp.path());
        fs::write(temp.path().join(OsStr::from_bytes(b"bad\xff.txt")), "odd name").unwrap();

        let info = &library.list().unwrap()[0];
        assert!(matches!(library.read(&info.name).await, Err(RagError::DocumentNotFound(_))));
        let source = library.read_document(info).await.unwrap();
        assert_eq!(source.content, b"odd name");
    }
}
