//! 引用计数的模块句柄。
//!
//! `LoadedPlugin`、`ClientFactory`、`PluginClient` 各自持有一份 `Arc<ModuleHandle>`，
//! 并把它声明为最后一个字段，保证模块内分配的对象先于动态库被释放。

use std::{
    fmt,
    path::{Path, PathBuf},
};

use super::backend::NativeModule;

pub(crate) struct ModuleHandle {
    path: PathBuf,
    native: Box<dyn NativeModule>,
}

impl ModuleHandle {
    pub(crate) fn new(path: &Path, native: Box<dyn NativeModule>) -> Self {
        Self {
            path: path.to_path_buf(),
            native,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn native(&self) -> &dyn NativeModule {
        self.native.as_ref()
    }
}

impl Drop for ModuleHandle {
    fn drop(&mut self) {
        tracing::debug!(path = %self.path.display(), "releasing module handle");
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
