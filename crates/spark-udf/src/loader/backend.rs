//! 动态库打开方式的接缝。
//!
//! 生产路径使用 [`LibloadingBackend`]；进程内测试可以用
//! [`crate::test_stubs::modules::StaticModuleBackend`] 把普通 Rust 函数注册成“模块入口”。

use std::{fmt, path::Path};

use libloading::Library;

use crate::{
    abi::{CLIENT_FACTORY_SYMBOL, ClientFactoryEntry, SCHEMA_SYMBOL, SchemaEntry},
    error::LoadError,
};

/// 已打开的原生模块；丢弃即关闭。
pub trait NativeModule: Send + Sync {
    /// 解析 Schema 入口；符号缺失时返回 `None`。
    fn schema_entry(&self) -> Option<SchemaEntry>;

    /// 解析客户端工厂入口；符号缺失时返回 `None`。
    fn client_factory_entry(&self) -> Option<ClientFactoryEntry>;
}

/// 打开模块文件的策略。
pub trait ModuleBackend: Send + Sync + fmt::Debug {
    fn open(&self, path: &Path) -> Result<Box<dyn NativeModule>, LoadError>;
}

/// 基于 `libloading` 的默认实现。
///
/// Unix 下以 `RTLD_NOW | RTLD_LOCAL` 打开：未解析符号在加载时即报错，且模块符号不污染全局命名空间。
#[derive(Clone, Copy, Debug, Default)]
pub struct LibloadingBackend;

impl ModuleBackend for LibloadingBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn NativeModule>, LoadError> {
        // SAFETY: 打开动态库会执行其初始化例程；加载器只打开调用方显式指定的路径。
        let library = unsafe { open_library(path) }.map_err(|err| LoadError::Open {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })?;
        Ok(Box::new(LibraryModule { library }))
    }
}

#[cfg(unix)]
unsafe fn open_library(path: &Path) -> Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_LOCAL, RTLD_NOW};

    // SAFETY: 由调用方承担初始化例程的风险。
    unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_LOCAL) }.map(Library::from)
}

#[cfg(not(unix))]
unsafe fn open_library(path: &Path) -> Result<Library, libloading::Error> {
    // SAFETY: 由调用方承担初始化例程的风险。
    unsafe { Library::new(path) }
}

struct LibraryModule {
    library: Library,
}

impl NativeModule for LibraryModule {
    fn schema_entry(&self) -> Option<SchemaEntry> {
        // SAFETY: 符号类型由二进制接口固定；取出的函数指针只在模块句柄存活期间调用。
        unsafe { self.library.get::<SchemaEntry>(SCHEMA_SYMBOL.as_bytes()) }
            .ok()
            .map(|symbol| *symbol)
    }

    fn client_factory_entry(&self) -> Option<ClientFactoryEntry> {
        // SAFETY: 同上。
        unsafe { self.library.get::<ClientFactoryEntry>(CLIENT_FACTORY_SYMBOL.as_bytes()) }
            .ok()
            .map(|symbol| *symbol)
    }
}
