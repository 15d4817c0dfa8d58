//! Скомпилированный вывод: детерминированные JSON артефакты и их загрузка
//!
//! Два layout'а:
//! - `single`: один файл `{version, layout, checksum, graph}`
//! - `per_service`: `index.json` с manifest и по одному unit'у с checksum на
//!   определение в `services/`, читается при первом обращении
//!
//! Одинаковые графы дают побайтно одинаковые файлы.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use common::OperationTimer;

use crate::compiled::{CompiledGraph, GraphSource, Manifest};
use crate::config::{CompilerConfig, DumpConfig, DumpLayout};
use crate::definition::Definition;
use crate::errors::{ContainerError, ContainerResult};
use crate::runtime::{Container, FactoryRegistry};

pub const FORMAT_VERSION: u32 = 1;
pub const INDEX_FILE: &str = "index.json";
pub const SERVICES_DIR: &str = "services";

#[derive(Serialize, Deserialize)]
struct SingleArtifact {
    version: u32,
    layout: DumpLayout,
    checksum: String,
    graph: CompiledGraph,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct UnitEntry {
    file: String,
    checksum: String,
}

/// Часть index, покрытая checksum
#[derive(Serialize, Deserialize)]
struct IndexBody {
    manifest: Manifest,
    units: BTreeMap<String, UnitEntry>,
}

#[derive(Serialize, Deserialize)]
struct IndexArtifact {
    version: u32,
    layout: DumpLayout,
    checksum: String,
    #[serde(flatten)]
    body: IndexBody,
}

/// Один выходной файл, путь относительно директории dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    pub path: PathBuf,
    pub contents: Vec<u8>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn pretty<T: Serialize>(value: &T) -> ContainerResult<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Имя файла unit'а: читаемый префикс и короткий hash id, чтобы разные id
/// не совпадали после замены символов
pub fn unit_file_name(id: &str) -> String {
    let readable: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let hash = sha256_hex(id.as_bytes());
    format!("{}-{}.json", readable, &hash[..8])
}

pub struct Dumper {
    layout: DumpLayout,
    file_name: String,
}

impl Dumper {
    pub fn new(config: &DumpConfig) -> Self {
        Self {
            layout: config.layout,
            file_name: config.file_name.clone(),
        }
    }

    /// Сформировать все файлы в памяти, отсортированные по пути
    pub fn render(&self, graph: &CompiledGraph) -> ContainerResult<Vec<RenderedFile>> {
        match self.layout {
            DumpLayout::Single => {
                let checksum = sha256_hex(&serde_json::to_vec(graph)?);
                let artifact = SingleArtifact {
                    version: FORMAT_VERSION,
                    layout: DumpLayout::Single,
                    checksum,
                    graph: graph.clone(),
                };
                Ok(vec![RenderedFile {
                    path: PathBuf::from(&self.file_name),
                    contents: pretty(&artifact)?,
                }])
            }
            DumpLayout::PerService => {
                let mut files = Vec::with_capacity(graph.definitions.len() + 1);
                let mut units = BTreeMap::new();

                for (id, definition) in &graph.definitions {
                    let file = format!("{}/{}", SERVICES_DIR, unit_file_name(id));
                    let contents = pretty(definition)?;
                    units.insert(
                        id.clone(),
                        UnitEntry {
                            file: file.clone(),
                            checksum: sha256_hex(&contents),
                        },
                    );
                    files.push(RenderedFile {
                        path: PathBuf::from(file),
                        contents,
                    });
                }

                let body = IndexBody {
                    manifest: graph.manifest(),
                    units,
                };
                let checksum = sha256_hex(&serde_json::to_vec(&body)?);
                let index = IndexArtifact {
                    version: FORMAT_VERSION,
                    layout: DumpLayout::PerService,
                    checksum,
                    body,
                };
                files.push(RenderedFile {
                    path: PathBuf::from(INDEX_FILE),
                    contents: pretty(&index)?,
                });

                files.sort_by(|a, b| a.path.cmp(&b.path));
                Ok(files)
            }
        }
    }

    /// Записать артефакт в `directory`, вернуть записанные пути
    pub fn write(
        &self,
        graph: &CompiledGraph,
        directory: impl AsRef<Path>,
    ) -> ContainerResult<Vec<PathBuf>> {
        let directory = directory.as_ref();
        let mut timer = OperationTimer::new("container_dump");
        timer.add_field("layout", format!("{:?}", self.layout));
        timer.add_field("definitions", graph.definitions.len());

        let result = self.write_files(graph, directory);
        timer.finish_with_result(&result);

        if let Ok(paths) = &result {
            info!(
                directory = %directory.display(),
                files = paths.len(),
                "Compiled container dumped"
            );
        }
        result
    }

    fn write_files(&self, graph: &CompiledGraph, directory: &Path) -> ContainerResult<Vec<PathBuf>> {
        let files = self.render(graph)?;

        fs::create_dir_all(directory).map_err(|e| ContainerError::io(directory, e))?;
        // Артефакт другого layout'а не должен пережить повторный dump
        let services = directory.join(SERVICES_DIR);
        remove_dir(&services)?;
        match self.layout {
            DumpLayout::Single => remove_file(&directory.join(INDEX_FILE))?,
            DumpLayout::PerService => {
                remove_file(&directory.join(&self.file_name))?;
                fs::create_dir_all(&services).map_err(|e| ContainerError::io(&services, e))?;
            }
        }

        let mut written = Vec::with_capacity(files.len());
        for file in files {
            let path = directory.join(&file.path);
            fs::write(&path, &file.contents).map_err(|e| ContainerError::io(&path, e))?;
            debug!(path = %path.display(), bytes = file.contents.len(), "Artifact file written");
            written.push(path);
        }
        Ok(written)
    }
}

fn remove_file(path: &Path) -> ContainerResult<()> {
    if path.is_file() {
        fs::remove_file(path).map_err(|e| ContainerError::io(path, e))?;
        debug!(path = %path.display(), "🧹 Stale artifact removed");
    }
    Ok(())
}

fn remove_dir(path: &Path) -> ContainerResult<()> {
    if path.is_dir() {
        fs::remove_dir_all(path).map_err(|e| ContainerError::io(path, e))?;
    }
    Ok(())
}

fn read(path: &Path) -> ContainerResult<Vec<u8>> {
    fs::read(path).map_err(|e| ContainerError::io(path, e))
}

fn check_version(version: u32, path: &Path) -> ContainerResult<()> {
    if version != FORMAT_VERSION {
        return Err(ContainerError::serialization(format!(
            "{}: unsupported format version {} (expected {})",
            path.display(),
            version,
            FORMAT_VERSION
        )));
    }
    Ok(())
}

/// Определения читаются из `services/` при первом обращении и кэшируются
struct PerServiceSource {
    directory: PathBuf,
    manifest: Manifest,
    units: BTreeMap<String, UnitEntry>,
    loaded: Mutex<HashMap<String, Arc<Definition>>>,
}

impl PerServiceSource {
    fn open(directory: &Path) -> ContainerResult<Self> {
        let path = directory.join(INDEX_FILE);
        let index: IndexArtifact = serde_json::from_slice(&read(&path)?)?;
        check_version(index.version, &path)?;

        let actual = sha256_hex(&serde_json::to_vec(&index.body)?);
        if actual != index.checksum {
            return Err(ContainerError::serialization(format!(
                "{}: index checksum mismatch",
                path.display()
            )));
        }

        debug!(units = index.body.units.len(), "📦 Per-service index loaded");
        Ok(Self {
            directory: directory.to_path_buf(),
            manifest: index.body.manifest,
            units: index.body.units,
            loaded: Mutex::new(HashMap::new()),
        })
    }

    fn load_unit(&self, id: &str) -> ContainerResult<Definition> {
        let entry = self
            .units
            .get(id)
            .ok_or_else(|| ContainerError::service_not_found(id))?;
        let path = self.directory.join(&entry.file);
        let bytes = read(&path)?;

        if sha256_hex(&bytes) != entry.checksum {
            return Err(ContainerError::serialization(format!(
                "{}: unit checksum mismatch",
                path.display()
            )));
        }
        let definition: Definition = serde_json::from_slice(&bytes)?;
        if definition.id() != id {
            return Err(ContainerError::serialization(format!(
                "{}: unit holds '{}', expected '{}'",
                path.display(),
                definition.id(),
                id
            )));
        }
        debug!(service = %id, "📦 Service unit loaded");
        Ok(definition)
    }
}

impl GraphSource for PerServiceSource {
    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn definition(&self, id: &str) -> ContainerResult<Arc<Definition>> {
        if let Some(definition) = self.loaded.lock().get(id) {
            return Ok(definition.clone());
        }
        // Чтение файла вне блокировки: параллельная загрузка одного unit'а безвредна
        let definition = Arc::new(self.load_unit(id)?);
        Ok(self
            .loaded
            .lock()
            .entry(id.to_string())
            .or_insert(definition)
            .clone())
    }
}

/// Загрузка сохранённых артефактов
pub struct CompiledContainer;

impl CompiledContainer {
    /// Загрузить из `directory` с настройками по умолчанию: `index.json`,
    /// если он есть, иначе `container.json`
    pub fn load(directory: impl AsRef<Path>, registry: FactoryRegistry) -> ContainerResult<Container> {
        let mut config = CompilerConfig::default();
        config.dump.directory = directory.as_ref().to_path_buf();
        Self::load_with_config(&config, registry)
    }

    /// Загрузить из `config.dump.directory` с учётом имени файла
    ///
    /// Поведение proxy берётся из артефакта, как было при compile.
    pub fn load_with_config(
        config: &CompilerConfig,
        registry: FactoryRegistry,
    ) -> ContainerResult<Container> {
        let directory = &config.dump.directory;

        if directory.join(INDEX_FILE).is_file() {
            let source = PerServiceSource::open(directory)?;
            return Ok(Container::from_source(Box::new(source), registry));
        }

        let graph = Self::read_graph(directory.join(&config.dump.file_name))?;
        Ok(Container::from_graph(graph, registry))
    }

    /// Прочитать и проверить single артефакт
    pub fn read_graph(path: impl AsRef<Path>) -> ContainerResult<CompiledGraph> {
        let path = path.as_ref();
        let artifact: SingleArtifact = serde_json::from_slice(&read(path)?)?;
        check_version(artifact.version, path)?;

        let actual = sha256_hex(&serde_json::to_vec(&artifact.graph)?);
        if actual != artifact.checksum {
            return Err(ContainerError::serialization(format!(
                "{}: checksum mismatch",
                path.display()
            )));
        }
        Ok(artifact.graph)
    }

    pub fn load_file(path: impl AsRef<Path>, registry: FactoryRegistry) -> ContainerResult<Container> {
        let graph = Self::read_graph(path)?;
        Ok(Container::from_graph(graph, registry))
    }
}
