//! Search-path entries a class pool resolves class names against.

use std::any::Any;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A class loader the pool can ask for `.class` resources.
///
/// Implemented by the agent for live JVM loaders and by tests for in-memory ones.
pub trait ClassLoaderHandle: Send + Sync {
    /// Returns the bytes of `resource` (e.g. `com/example/Foo.class`) or `None` if the loader has no such resource.
    fn find_resource(&self, resource: &str) -> io::Result<Option<Vec<u8>>>;

    /// Whether `other` designates the same loader.
    fn same_loader(&self, other: &dyn ClassLoaderHandle) -> bool;

    fn as_any(&self) -> &dyn Any;

    fn describe(&self) -> String {
        "class loader".to_owned()
    }
}

/// A [`ClassLoaderHandle`] wrapped as a search-path entry.
#[derive(Clone)]
pub struct LoaderClassPath(pub Arc<dyn ClassLoaderHandle>);

impl LoaderClassPath {
    pub fn new(loader: Arc<dyn ClassLoaderHandle>) -> Self {
        Self(loader)
    }

    pub fn loader(&self) -> &Arc<dyn ClassLoaderHandle> {
        &self.0
    }
}

impl PartialEq for LoaderClassPath {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.same_loader(other.0.as_ref())
    }
}

impl Eq for LoaderClassPath {}

impl fmt::Debug for LoaderClassPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LoaderClassPath").field(&self.0.describe()).finish()
    }
}

/// One search-path entry. Equality is by logical identity so an entry can be registered only once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassPath {
    /// A directory laid out by package.
    Directory(PathBuf),
    /// A jar or zip archive.
    #[cfg(feature = "archive")]
    Archive(PathBuf),
    Loader(LoaderClassPath),
}

impl ClassPath {
    /// Picks `Archive` for `.jar`/`.zip` files and `Directory` otherwise.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        #[cfg(feature = "archive")]
        {
            let is_archive = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("jar") || e.eq_ignore_ascii_case("zip"))
                .unwrap_or(false);
            if is_archive {
                return ClassPath::Archive(path);
            }
        }
        ClassPath::Directory(path)
    }

    pub fn loader(loader: Arc<dyn ClassLoaderHandle>) -> Self {
        ClassPath::Loader(LoaderClassPath(loader))
    }

    /// Looks up the class file for the dotted class `name`.
    pub fn find_class(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        let resource = resource_name(name);
        match self {
            ClassPath::Directory(dir) => read_optional(&dir.join(&resource)),
            #[cfg(feature = "archive")]
            ClassPath::Archive(archive) => read_archive_entry(archive, &resource),
            ClassPath::Loader(loader) => loader.0.find_resource(&resource),
        }
    }
}

impl fmt::Display for ClassPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassPath::Directory(p) => write!(f, "{}", p.display()),
            #[cfg(feature = "archive")]
            ClassPath::Archive(p) => write!(f, "{}", p.display()),
            ClassPath::Loader(l) => write!(f, "{}", l.0.describe()),
        }
    }
}

/// `com.example.Foo` -> `com/example/Foo.class`.
pub fn resource_name(class_name: &str) -> String {
    format!("{}.class", class_name.replace('.', "/"))
}

fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(feature = "archive")]
fn read_archive_entry(archive: &Path, resource: &str) -> io::Result<Option<Vec<u8>>> {
    use std::io::Read;
    use zip::result::ZipError;
    use zip::ZipArchive;

    let file = match fs::File::open(archive) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut zip = ZipArchive::new(io::BufReader::new(file)).map_err(zip_to_io)?;
    let mut entry = match zip.by_name(resource) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(zip_to_io(e)),
    };
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut bytes)?;
    Ok(Some(bytes))
}

#[cfg(feature = "archive")]
fn zip_to_io(e: zip::result::ZipError) -> io::Error {
    match e {
        zip::result::ZipError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}
