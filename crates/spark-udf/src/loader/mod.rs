//! 插件加载器。
//!
//! # 设计背景（Why）
//! - 宿主在启动时把一个模块文件或一整个目录交给加载器，任何单个模块的失败都不能阻止其余模块注册；
//! - 描述符与客户端工厂的内存归模块所有，因此加载器对模块句柄做引用计数，
//!   而不是在 `unload_all` 时立即关闭动态库。
//!
//! # 逻辑解析（How）
//! 1. 路径为文件时只处理该文件；为目录时枚举其中扩展名为平台动态库扩展名的文件，并按路径排序；
//! 2. 对每个候选先读取伴随配置，`enabled = false` 直接跳过；
//! 3. 打开模块 → 解析 Schema 入口（缺失即失败）→ 调用并校验 [`AbiStamp`](crate::abi::AbiStamp)
//!    → 解析客户端工厂入口（缺失退化为仅 Schema）→ 调用并校验；
//! 4. 每个候选的结局写入 [`LoadReport`]，失败以 `warn!` 记录后继续下一个。
//!
//! # 契约说明（What）
//! - `load` 只有在路径既非文件也非目录、或目录不可枚举时返回 `Err`；
//! - 已打开的模块句柄无论部分成功与否都被记录，直到 `unload_all`；
//! - 插件列表在 `load` 期间只追加，`unload_all` 之前保持稳定，可被多线程并发读取。

mod backend;
mod module;

use std::{
    ffi::CString,
    fmt,
    path::{Path, PathBuf},
    ptr,
    sync::Arc,
};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

pub use backend::{LibloadingBackend, ModuleBackend, NativeModule};
use module::ModuleHandle;

use crate::{
    abi::{CLIENT_FACTORY_SYMBOL, FactoryExport, PluginApi, SCHEMA_SYMBOL},
    boundary,
    channel::Channel,
    client::{CallResponse, DispatchKey, GenericClient, GenericClientFactory},
    config::{LoaderConfig, PluginSettings},
    contract::CallContext,
    descriptor::PackageDescriptor,
    error::{ErrorInfo, LoadError},
    record::GenericRecord,
};

/// 单个候选模块的结局。
#[derive(Debug)]
pub enum LoadStatus {
    /// Schema 与客户端工厂均已注册。
    Loaded,
    /// 仅注册了 Schema；附带原因。
    SchemaOnly(String),
    /// 伴随配置禁用了该模块，未打开动态库。
    Disabled,
    /// 加载失败，模块未注册。
    Failed(LoadError),
}

#[derive(Debug)]
pub struct LoadOutcome {
    pub path: PathBuf,
    pub status: LoadStatus,
}

impl LoadOutcome {
    /// 是否注册了 Schema。
    pub fn is_registered(&self) -> bool {
        matches!(self.status, LoadStatus::Loaded | LoadStatus::SchemaOnly(_))
    }
}

/// 一次 `load` 的逐模块报告，按处理顺序排列。
#[derive(Debug, Default)]
pub struct LoadReport {
    outcomes: Vec<LoadOutcome>,
}

impl LoadReport {
    pub fn outcomes(&self) -> &[LoadOutcome] {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// 注册成功（含仅 Schema）的模块数。
    pub fn registered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.is_registered())
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Path, &LoadError)> {
        self.outcomes.iter().filter_map(|outcome| match &outcome.status {
            LoadStatus::Failed(err) => Some((outcome.path.as_path(), err)),
            _ => None,
        })
    }

    pub fn outcome(&self, path: &Path) -> Option<&LoadOutcome> {
        self.outcomes.iter().find(|outcome| outcome.path == path)
    }
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.outcomes {
            let path = outcome.path.display();
            match &outcome.status {
                LoadStatus::Loaded => writeln!(f, "[loaded] {path}")?,
                LoadStatus::SchemaOnly(reason) => writeln!(f, "[schema-only] {path}: {reason}")?,
                LoadStatus::Disabled => writeln!(f, "[disabled] {path}")?,
                LoadStatus::Failed(err) => writeln!(f, "[failed] {path}: {err}")?,
            }
        }
        Ok(())
    }
}

/// 已注册的插件：Schema 根、可选的客户端工厂与伴随配置。
pub struct LoadedPlugin {
    path: PathBuf,
    api: &'static PluginApi,
    factory: Option<ClientFactory>,
    settings: PluginSettings,
    module: Arc<ModuleHandle>,
}

impl LoadedPlugin {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Schema 根；借用不能长于 `self`。
    pub fn api(&self) -> &PluginApi {
        self.api
    }

    pub fn packages(&self) -> &[&PackageDescriptor] {
        self.api.packages()
    }

    pub fn client_factory(&self) -> Option<&ClientFactory> {
        self.factory.as_ref()
    }

    /// 伴随配置；未提供配置文件时为默认值。
    pub fn settings(&self) -> &PluginSettings {
        &self.settings
    }

    /// 当前仍持有该模块的对象数（含本插件）。
    pub fn module_refs(&self) -> usize {
        Arc::strong_count(&self.module)
    }
}

impl fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let packages: Vec<&str> = self.packages().iter().map(|p| p.name()).collect();
        f.debug_struct("LoadedPlugin")
            .field("path", &self.path)
            .field("packages", &packages)
            .field("client_factory", &self.factory.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}

struct FactoryInner {
    factory: Box<dyn GenericClientFactory>,
    module: Arc<ModuleHandle>,
}

/// 模块导出的客户端工厂，克隆成本为常数。
#[derive(Clone)]
pub struct ClientFactory {
    inner: Arc<FactoryInner>,
}

impl ClientFactory {
    /// 在护栏内调用模块的工厂，把通道绑定成客户端。
    pub fn create(&self, channel: Arc<dyn Channel>) -> Result<PluginClient, ErrorInfo> {
        let target = channel.target().to_string();
        let client = boundary::guard("client factory", || self.inner.factory.create(channel))
            .and_then(std::convert::identity)
            .inspect_err(|err| {
                warn!(
                    module = %self.inner.module.path().display(),
                    channel_target = %target,
                    code = %err.code(),
                    "client factory rejected channel"
                );
            })?;
        Ok(PluginClient {
            client,
            module: Arc::clone(&self.inner.module),
        })
    }

    pub fn module_path(&self) -> &Path {
        self.inner.module.path()
    }
}

impl fmt::Debug for ClientFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientFactory")
            .field("module", &self.inner.module.path())
            .finish_non_exhaustive()
    }
}

/// 由模块工厂创建的客户端；存活期间模块不会被卸载。
pub struct PluginClient {
    client: Box<dyn GenericClient>,
    module: Arc<ModuleHandle>,
}

impl GenericClient for PluginClient {
    fn call(
        &self,
        ctx: &CallContext,
        key: DispatchKey,
        request: &GenericRecord,
        mut response: CallResponse<'_>,
    ) {
        let guarded = boundary::guard("plugin client", || {
            self.client.call(ctx, key, request, response.reborrow())
        });
        if let Err(err) = guarded {
            response.fail(err);
        }
    }
}

impl fmt::Debug for PluginClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginClient")
            .field("module", &self.module.path())
            .finish_non_exhaustive()
    }
}

/// 插件加载器。
pub struct PluginLoader {
    config: LoaderConfig,
    backend: Box<dyn ModuleBackend>,
    plugins: RwLock<Vec<Arc<LoadedPlugin>>>,
    handles: RwLock<Vec<Arc<ModuleHandle>>>,
}

impl PluginLoader {
    /// 使用默认配置与 `libloading` 后端。
    pub fn new() -> Self {
        Self::with_config(LoaderConfig::default())
    }

    pub fn with_config(config: LoaderConfig) -> Self {
        Self::with_backend(config, LibloadingBackend)
    }

    pub fn with_backend(config: LoaderConfig, backend: impl ModuleBackend + 'static) -> Self {
        Self {
            config,
            backend: Box::new(backend),
            plugins: RwLock::new(Vec::new()),
            handles: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// 加载单个模块文件或目录中的全部模块。
    pub fn load(&self, path: impl AsRef<Path>) -> Result<LoadReport, LoadError> {
        let path = path.as_ref();
        let candidates = if path.is_file() {
            vec![path.to_path_buf()]
        } else if path.is_dir() {
            scan_directory(path)?
        } else {
            warn!(path = %path.display(), "plugin path is neither a file nor a directory");
            return Err(LoadError::InvalidPath {
                path: path.to_path_buf(),
            });
        };

        let mut report = LoadReport::default();
        for candidate in candidates {
            let status = self.load_one(&candidate);
            match &status {
                LoadStatus::Failed(err) => {
                    warn!(path = %candidate.display(), error = %err, "skipping plugin module")
                }
                LoadStatus::Disabled => {
                    info!(path = %candidate.display(), "plugin module disabled by settings")
                }
                LoadStatus::SchemaOnly(reason) => {
                    info!(path = %candidate.display(), reason = reason.as_str(), "plugin module registered without client factory")
                }
                LoadStatus::Loaded => {}
            }
            report.outcomes.push(LoadOutcome {
                path: candidate,
                status,
            });
        }
        Ok(report)
    }

    fn load_one(&self, path: &Path) -> LoadStatus {
        let settings = match PluginSettings::load(&self.config.settings_path(path)) {
            Ok(settings) => settings.unwrap_or_default(),
            Err(source) => {
                return LoadStatus::Failed(LoadError::Settings {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        if !settings.enabled {
            return LoadStatus::Disabled;
        }

        let module = match self.backend.open(path) {
            Ok(native) => Arc::new(ModuleHandle::new(path, native)),
            Err(err) => return LoadStatus::Failed(err),
        };
        self.handles.write().push(Arc::clone(&module));

        match self.register(path, module, settings) {
            Ok((plugin, status)) => {
                info!(
                    path = %path.display(),
                    packages = plugin.packages().len(),
                    client_factory = plugin.factory.is_some(),
                    "plugin module loaded"
                );
                self.plugins.write().push(Arc::new(plugin));
                status
            }
            Err(err) => LoadStatus::Failed(err),
        }
    }

    fn register(
        &self,
        path: &Path,
        module: Arc<ModuleHandle>,
        settings: PluginSettings,
    ) -> Result<(LoadedPlugin, LoadStatus), LoadError> {
        let schema_entry = module
            .native()
            .schema_entry()
            .ok_or_else(|| LoadError::MissingSymbol {
                path: path.to_path_buf(),
                symbol: SCHEMA_SYMBOL,
            })?;
        // SAFETY: 入口签名由二进制接口固定，模块句柄在调用期间存活；入口自身拦截 panic。
        let api_ptr = unsafe { schema_entry() };
        if api_ptr.is_null() {
            return Err(LoadError::NullEntry {
                path: path.to_path_buf(),
                symbol: SCHEMA_SYMBOL,
            });
        }
        // SAFETY: 非空指针指向模块内的静态 Schema，生命周期由 `module` 的引用计数覆盖。
        let api: &'static PluginApi = unsafe { &*api_ptr };
        api.stamp().verify(path)?;

        let (factory, status) = match self.resolve_factory(path, &module, &settings)? {
            Ok(factory) => (Some(factory), LoadStatus::Loaded),
            Err(reason) => (None, LoadStatus::SchemaOnly(reason)),
        };

        Ok((
            LoadedPlugin {
                path: path.to_path_buf(),
                api,
                factory,
                settings,
                module,
            },
            status,
        ))
    }

    /// 外层错误使模块失败；内层 `Err` 携带退化为仅 Schema 的原因。
    fn resolve_factory(
        &self,
        path: &Path,
        module: &Arc<ModuleHandle>,
        settings: &PluginSettings,
    ) -> Result<Result<ClientFactory, String>, LoadError> {
        let Some(entry) = module.native().client_factory_entry() else {
            let err = LoadError::MissingSymbol {
                path: path.to_path_buf(),
                symbol: CLIENT_FACTORY_SYMBOL,
            };
            return self.degrade(err);
        };

        let hint = settings
            .service
            .as_deref()
            .or(self.config.default_service_hint.as_deref())
            .and_then(|hint| CString::new(hint).ok());
        let hint_ptr = hint.as_ref().map_or(ptr::null(), |hint| hint.as_ptr());
        // SAFETY: 入口签名由二进制接口固定；`hint` 在调用期间存活。
        let raw = unsafe { entry(hint_ptr) };
        if raw.is_null() {
            return self.degrade(LoadError::NullEntry {
                path: path.to_path_buf(),
                symbol: CLIENT_FACTORY_SYMBOL,
            });
        }
        // SAFETY: 非空指针由模块的 `FactoryExport::into_raw` 产生，所有权在此唯一转移。
        let export = unsafe { FactoryExport::from_raw(raw) };
        export.stamp().verify(path)?;
        Ok(Ok(ClientFactory {
            inner: Arc::new(FactoryInner {
                factory: export.into_factory(),
                module: Arc::clone(module),
            }),
        }))
    }

    fn degrade(&self, err: LoadError) -> Result<Result<ClientFactory, String>, LoadError> {
        if self.config.require_client_factory {
            Err(err)
        } else {
            Ok(Err(err.to_string()))
        }
    }

    /// 释放加载器持有的全部引用；仍被外部持有的插件、工厂与客户端继续可用。
    pub fn unload_all(&self) {
        let plugins = std::mem::take(&mut *self.plugins.write());
        let handles = std::mem::take(&mut *self.handles.write());
        debug!(
            plugins = plugins.len(),
            handles = handles.len(),
            "releasing loader references"
        );
    }

    /// 已注册插件的快照。
    pub fn plugins(&self) -> Vec<Arc<LoadedPlugin>> {
        self.plugins.read().clone()
    }

    /// 已注册的客户端工厂快照，顺序与 [`PluginLoader::plugins`] 一致。
    pub fn client_factories(&self) -> Vec<ClientFactory> {
        self.plugins
            .read()
            .iter()
            .filter_map(|plugin| plugin.factory.clone())
            .collect()
    }

    /// 加载器当前持有的模块句柄数，包含注册失败但已打开的模块。
    pub fn handle_count(&self) -> usize {
        self.handles.read().len()
    }
}

impl Default for PluginLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLoader")
            .field("config", &self.config)
            .field("backend", &self.backend)
            .field("plugins", &self.plugins.read().len())
            .field("handles", &self.handles.read().len())
            .finish()
    }
}

fn scan_directory(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let entries = std::fs::read_dir(dir).map_err(|source| LoadError::Scan {
        path: dir.to_path_buf(),
        source,
    })?;
    let extension = std::env::consts::DLL_EXTENSION;
    let mut modules: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.extension().is_some_and(|ext| ext == extension))
        .collect();
    modules.sort();
    debug!(dir = %dir.display(), modules = modules.len(), "scanned plugin directory");
    Ok(modules)
}
