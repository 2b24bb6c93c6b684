use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::debug;
use zip::ZipArchive;

use crate::bytecode::ClassReader;
use crate::fixed_cache::FixedSizeCache;
use crate::ir::TypeDescription;
use crate::opcodes;

enum ClassSource {
    Directory(PathBuf),
    Jar {
        path: PathBuf,
        archive: Mutex<ZipArchive<File>>,
        entries: HashSet<String>,
    },
}

impl ClassSource {
    fn open(path: &Path) -> Result<Self> {
        if path.is_dir() {
            return Ok(ClassSource::Directory(path.to_path_buf()));
        }
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut archive =
            ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;
        let mut entries = HashSet::new();
        for index in 0..archive.len() {
            let entry = archive
                .by_index(index)
                .with_context(|| format!("failed to read {}", path.display()))?;
            if !entry.is_dir() && entry.name().ends_with(".class") {
                entries.insert(entry.name().to_string());
            }
        }
        Ok(ClassSource::Jar {
            path: path.to_path_buf(),
            archive: Mutex::new(archive),
            entries,
        })
    }

    fn read(&self, entry_name: &str) -> Result<Option<Vec<u8>>> {
        match self {
            ClassSource::Directory(root) => {
                let path = root.join(entry_name);
                if !path.is_file() {
                    return Ok(None);
                }
                fs::read(&path)
                    .map(Some)
                    .with_context(|| format!("failed to read {}", path.display()))
            }
            ClassSource::Jar {
                path,
                archive,
                entries,
            } => {
                if !entries.contains(entry_name) {
                    return Ok(None);
                }
                let mut archive = archive.lock();
                let mut entry = archive
                    .by_name(entry_name)
                    .with_context(|| format!("failed to read {}:{}", path.display(), entry_name))?;
                let mut data = Vec::new();
                entry
                    .read_to_end(&mut data)
                    .with_context(|| format!("failed to read {}:{}", path.display(), entry_name))?;
                Ok(Some(data))
            }
        }
    }
}

/// Resolves type descriptions by internal name from class directories and JARs, for matchers
/// that look at super types. Lookups, misses included, and registered classes share one
/// bounded cache, so residency never exceeds its capacity.
pub struct TypePool {
    sources: Vec<ClassSource>,
    cache: FixedSizeCache<String, Option<Arc<TypeDescription>>>,
}

impl TypePool {
    pub fn new(classpath: &[PathBuf], capacity: usize) -> Result<Self> {
        let sources = classpath
            .iter()
            .map(|path| ClassSource::open(path))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            sources,
            cache: FixedSizeCache::new(capacity),
        })
    }

    pub fn empty(capacity: usize) -> Self {
        Self {
            sources: Vec::new(),
            cache: FixedSizeCache::new(capacity),
        }
    }

    /// Hands over a class seen outside the classpath, such as the class being transformed. It
    /// replaces any cached lookup and is evicted like one.
    pub fn register(&self, description: TypeDescription) {
        self.cache
            .insert(description.name.clone(), Some(Arc::new(description)));
    }

    /// Number of descriptions and misses currently cached.
    pub fn resident(&self) -> usize {
        self.cache.len()
    }

    pub fn describe(&self, internal_name: &str) -> Option<Arc<TypeDescription>> {
        self.cache
            .compute_if_absent(internal_name.to_string(), |name| self.load(name))
    }

    fn load(&self, internal_name: &str) -> Option<Arc<TypeDescription>> {
        let entry_name = format!("{internal_name}.class");
        for source in &self.sources {
            let data = match source.read(&entry_name) {
                Ok(Some(data)) => data,
                Ok(None) => continue,
                Err(error) => {
                    debug!(class = internal_name, error = %error, "failed to read class");
                    continue;
                }
            };
            match ClassReader::new(&data).and_then(|reader| reader.type_description()) {
                Ok(description) => return Some(Arc::new(description)),
                Err(error) => {
                    debug!(class = internal_name, error = %error, "failed to parse class");
                }
            }
        }
        None
    }

    /// Every super class and interface of `description`, breadth first. Types that cannot be
    /// resolved are reported by name, flagged as interfaces when listed as one.
    pub fn super_types(&self, description: &TypeDescription) -> Vec<Arc<TypeDescription>> {
        let mut result = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = direct_super_types(description);
        let mut next = 0;
        while next < queue.len() {
            let (name, is_interface) = queue[next].clone();
            next += 1;
            if !seen.insert(name.clone()) {
                continue;
            }
            match self.describe(&name) {
                Some(super_type) => {
                    queue.extend(direct_super_types(&super_type));
                    result.push(super_type);
                }
                None => {
                    let mut unresolved = TypeDescription::new(&name);
                    unresolved.super_name = None;
                    if is_interface {
                        unresolved.access |= opcodes::ACC_INTERFACE | opcodes::ACC_ABSTRACT;
                    }
                    result.push(Arc::new(unresolved));
                }
            }
        }
        result
    }
}

fn direct_super_types(description: &TypeDescription) -> Vec<(String, bool)> {
    let super_class = description.super_name.iter().map(|name| (name.clone(), false));
    let interfaces = description.interfaces.iter().map(|name| (name.clone(), true));
    super_class.chain(interfaces).collect()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::FileOptions;
    use zip::ZipWriter;

    use super::*;
    use crate::bytecode::writer::tests::class_extending;

    #[test]
    fn resolves_super_types_across_directories_and_jars() {
        let dir = tempfile::tempdir().expect("tempdir");
        let classes = dir.path().join("classes");
        fs::create_dir_all(classes.join("com/example")).expect("create dirs");
        fs::write(
            classes.join("com/example/Base.class"),
            class_extending("com/example/Base", "java/lang/Object", &["java/io/Closeable"]),
        )
        .expect("write class");

        let jar = dir.path().join("lib.jar");
        let mut writer = ZipWriter::new(File::create(&jar).expect("create jar"));
        writer
            .start_file("java/io/Closeable.class", FileOptions::<()>::default())
            .expect("start entry");
        writer
            .write_all(&class_extending(
                "java/io/Closeable",
                "java/lang/Object",
                &["java/lang/AutoCloseable"],
            ))
            .expect("write entry");
        writer.finish().expect("finish jar");

        let pool = TypePool::new(&[classes, jar], 16).expect("type pool");
        let mut child = TypeDescription::new("com/example/Child");
        child.super_name = Some("com/example/Base".to_string());

        let names: Vec<String> = pool
            .super_types(&child)
            .iter()
            .map(|description| description.name.clone())
            .collect();
        assert_eq!(
            names,
            vec![
                "com/example/Base",
                "java/lang/Object",
                "java/io/Closeable",
                "java/lang/AutoCloseable",
            ]
        );
        assert!(pool.describe("com/example/Missing").is_none());
    }

    #[test]
    fn unresolved_interfaces_keep_their_kind() {
        let pool = TypePool::empty(4);
        let mut task = TypeDescription::new("com/example/Task");
        task.interfaces.push("java/lang/Runnable".to_string());

        let super_types = pool.super_types(&task);
        assert_eq!(super_types.len(), 2);
        assert!(!super_types[0].is_interface());
        assert!(super_types[1].is_interface());
    }

    #[test]
    fn registered_types_take_precedence() {
        let pool = TypePool::empty(4);
        let mut description = TypeDescription::new("com/example/Local");
        description.interfaces.push("java/lang/Runnable".to_string());
        pool.register(description.clone());

        assert_eq!(
            pool.describe("com/example/Local").as_deref(),
            Some(&description)
        );
    }

    #[test]
    fn residency_is_bounded_by_capacity() {
        let pool = TypePool::empty(8);
        for index in 0..200 {
            pool.register(TypeDescription::new(&format!("com/example/Generated{index}")));
            pool.describe(&format!("com/example/Missing{index}"));
        }

        assert!(pool.resident() <= 8);
        let last = TypeDescription::new("com/example/Generated199");
        pool.register(last.clone());
        assert_eq!(
            pool.describe("com/example/Generated199").as_deref(),
            Some(&last)
        );
    }
}
