use std::collections::BTreeSet;
use std::fs;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use jclassfile::class_file;
use serde::Serialize;
use tracing::{debug, warn};
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::bytecode::ClassReader;
use crate::tooling::{ClassRequest, CombiningTransformer};

/// A file found under an input, class file or resource.
#[derive(Clone, Debug)]
pub struct InputEntry {
    /// Path relative to the input root, `/`-separated.
    pub path: String,
    /// Location reported to matchers: `file:` for files, `jar:file:...!/` for JAR entries.
    pub url: String,
    pub bytes: Vec<u8>,
}

impl InputEntry {
    pub fn is_class(&self) -> bool {
        self.path.ends_with(".class") && !self.path.ends_with("module-info.class")
    }
}

/// Per-class match result printed by `jweave match`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassMatches {
    pub class_name: String,
    pub class_file_url: String,
    pub matched: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstrumentSummary {
    pub class_count: usize,
    pub transformed: usize,
    /// Classes whose rewritten form failed validation and were written unchanged.
    pub rejected: usize,
    /// Helper classes required by the transformed classes, sorted.
    pub helpers: BTreeSet<String>,
}

/// Lists every entry of a class file, JAR or directory, in a stable order.
pub fn read_inputs(input: &Path) -> Result<Vec<InputEntry>> {
    if !input.exists() {
        anyhow::bail!("input not found: {}", input.display());
    }
    let mut entries = Vec::new();
    if input.is_dir() {
        read_dir(input, input, &mut entries)?;
        return Ok(entries);
    }

    let extension = input.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    match extension {
        "class" => entries.push(read_class_file(input)?),
        "jar" => read_jar_file(input, &mut entries)?,
        _ => anyhow::bail!("unsupported input file: {}", input.display()),
    }
    Ok(entries)
}

fn read_dir(root: &Path, path: &Path, entries: &mut Vec<InputEntry>) -> Result<()> {
    let mut children = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        children.push(entry.path());
    }

    children.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for child in children {
        if child.is_dir() {
            read_dir(root, &child, entries)?;
            continue;
        }
        let bytes =
            fs::read(&child).with_context(|| format!("failed to read {}", child.display()))?;
        let relative = child.strip_prefix(root).unwrap_or(&child);
        entries.push(InputEntry {
            path: relative_key(relative),
            url: file_url(&child),
            bytes,
        });
    }
    Ok(())
}

/// A lone class file is placed at its internal name so it lands in the right package.
fn read_class_file(path: &Path) -> Result<InputEntry> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let reader =
        ClassReader::new(&bytes).with_context(|| format!("failed to parse {}", path.display()))?;
    let name = reader
        .name()
        .with_context(|| format!("failed to parse {}", path.display()))?
        .to_string();
    Ok(InputEntry {
        path: format!("{name}.class"),
        url: file_url(path),
        bytes,
    })
}

fn read_jar_file(path: &Path, entries: &mut Vec<InputEntry>) -> Result<()> {
    let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;

    // (relative path, index) of every entry that stays inside the archive root
    let mut entry_paths = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if entry.is_dir() {
            continue;
        }
        match entry.enclosed_name() {
            Some(enclosed) => entry_paths.push((relative_key(&enclosed), index)),
            None => warn!(
                jar = %path.display(),
                entry = entry.name(),
                "skipping unsafe entry path"
            ),
        }
    }

    entry_paths.sort();

    let location = canonical(path);
    for (name, index) in entry_paths {
        let mut entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        entries.push(InputEntry {
            url: jar_entry_url(&location, &name),
            path: name,
            bytes,
        });
    }
    Ok(())
}

/// Runs `transformer` over every class of `input` and writes the result to `output`: a JAR
/// when `output` ends in `.jar`, a directory otherwise. Resources are copied unchanged.
pub fn instrument_inputs(
    input: &Path,
    output: &Path,
    transformer: &CombiningTransformer,
) -> Result<InstrumentSummary> {
    let mut entries = read_inputs(input)?;
    let mut summary = InstrumentSummary::default();

    for entry in entries.iter_mut().filter(|entry| entry.is_class()) {
        summary.class_count += 1;
        let request = ClassRequest::new(&entry.bytes, &entry.url);
        let Some(transformation) = transformer.transform(&request) else {
            continue;
        };
        if let Err(error) = class_file::parse(&transformation.bytes) {
            warn!(
                entry = %entry.path,
                error = ?error,
                "rewritten class failed validation, keeping original"
            );
            summary.rejected += 1;
            continue;
        }
        debug!(entry = %entry.path, matched = ?transformation.matched, "class transformed");
        summary.transformed += 1;
        summary.helpers.extend(transformation.helpers);
        entry.bytes = transformation.bytes;
    }

    if output.extension().and_then(|ext| ext.to_str()) == Some("jar") {
        write_jar(output, &entries)?;
    } else {
        write_dir(output, &entries)?;
    }
    Ok(summary)
}

/// Matches every class of `input` without rewriting anything.
pub fn match_inputs(input: &Path, transformer: &CombiningTransformer) -> Result<Vec<ClassMatches>> {
    let mut results = Vec::new();
    for entry in read_inputs(input)?.iter().filter(|entry| entry.is_class()) {
        let request = ClassRequest::new(&entry.bytes, &entry.url);
        let matched = transformer
            .match_class(&request)
            .with_context(|| format!("failed to parse {}", entry.url))?;
        let class_name = entry
            .path
            .strip_suffix(".class")
            .unwrap_or(&entry.path)
            .replace('/', ".");
        results.push(ClassMatches {
            class_name,
            class_file_url: entry.url.clone(),
            matched,
        });
    }
    Ok(results)
}

fn write_dir(output: &Path, entries: &[InputEntry]) -> Result<()> {
    for entry in entries {
        let relative = Path::new(&entry.path);
        let enclosed = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        if !enclosed {
            anyhow::bail!("entry escapes the output directory: {}", entry.path);
        }
        let target = output.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        fs::write(&target, &entry.bytes)
            .with_context(|| format!("failed to write {}", target.display()))?;
    }
    Ok(())
}

fn write_jar(output: &Path, entries: &[InputEntry]) -> Result<()> {
    if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let file =
        fs::File::create(output).with_context(|| format!("failed to create {}", output.display()))?;
    let mut jar = ZipWriter::new(file);
    for entry in entries {
        jar.start_file(entry.path.as_str(), FileOptions::<()>::default())
            .with_context(|| format!("failed to write {}:{}", output.display(), entry.path))?;
        jar.write_all(&entry.bytes)
            .with_context(|| format!("failed to write {}:{}", output.display(), entry.path))?;
    }
    jar.finish()
        .with_context(|| format!("failed to write {}", output.display()))?;
    Ok(())
}

fn file_url(path: &Path) -> String {
    format!("file:{}", canonical(path).to_string_lossy())
}

fn jar_entry_url(jar_path: &Path, entry_name: &str) -> String {
    format!("jar:file:{}!/{}", jar_path.to_string_lossy(), entry_name)
}

/// Absolute form of `path`, or `path` itself when it cannot be resolved.
fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn relative_key(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Classpath entries sorted for a deterministic type pool.
pub fn sorted_classpath(classpath: &[PathBuf]) -> Vec<PathBuf> {
    let mut entries = classpath.to_vec();
    entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));
    entries
}
