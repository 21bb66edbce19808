//! 插件二进制接口。
//!
//! # 设计背景（Why）
//! - 每个插件模块按固定符号名导出两个 C 链接入口：
//!   1. [`SCHEMA_SYMBOL`]：零参数，返回 Schema 根 [`PluginApi`]；缺失即注册失败；
//!   2. [`CLIENT_FACTORY_SYMBOL`]：接收服务名提示，返回 [`FactoryExport`]；缺失时退化为仅 Schema。
//! - 两个入口的结果都以 [`AbiStamp`] 开头，加载器先校验印记再解释其余字段，
//!   防止宿主误用以不同版本本 crate 构建的模块。
//!
//! # 契约说明（What）
//! - 入口函数内部经 [`crate::boundary::guard`] 执行，panic 与构造失败一律返回空指针，不会展开穿越边界；
//! - [`PluginApi`] 归模块所有，通常是模块中的 `static`；[`FactoryExport`] 由模块分配、宿主接管，
//!   二者都只能在持有模块引用计数时访问；
//! - 插件作者只需调用 [`export_plugin!`](crate::export_plugin)。

use std::{
    ffi::{CStr, c_char},
    path::Path,
    ptr,
};

use crate::{
    boundary,
    client::{DispatchKey, GenericClientFactory},
    descriptor::{FunctionDescriptor, PackageDescriptor, ServiceDescriptor},
    error::{ErrorInfo, LoadError},
};

/// 二进制接口版本；布局或入口签名变化时递增。
pub const ABI_VERSION: u32 = 1;

/// 构建插件时链接的本 crate 版本。
pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Schema 入口符号名。
pub const SCHEMA_SYMBOL: &str = "spark_udf_create_plugin_api";

/// 客户端工厂入口符号名。
pub const CLIENT_FACTORY_SYMBOL: &str = "spark_udf_create_generic_client_factory";

/// Schema 入口签名。
pub type SchemaEntry = unsafe extern "C" fn() -> *const PluginApi;

/// 客户端工厂入口签名；`service_hint` 可以为空指针。
pub type ClientFactoryEntry =
    unsafe extern "C" fn(service_hint: *const c_char) -> *mut FactoryExport;

/// 入口结果携带的构建印记，位于结构体首部。
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AbiStamp {
    abi_version: u32,
    core_version: &'static str,
}

impl AbiStamp {
    /// 当前构建的印记。
    pub const CURRENT: AbiStamp = AbiStamp {
        abi_version: ABI_VERSION,
        core_version: CORE_VERSION,
    };

    pub const fn new(abi_version: u32, core_version: &'static str) -> Self {
        Self {
            abi_version,
            core_version,
        }
    }

    pub fn abi_version(&self) -> u32 {
        self.abi_version
    }

    pub fn core_version(&self) -> &str {
        self.core_version
    }

    /// 与宿主印记比对，不一致时返回 [`LoadError::AbiMismatch`]。
    pub fn verify(&self, path: &Path) -> Result<(), LoadError> {
        if self.abi_version == ABI_VERSION && self.core_version == CORE_VERSION {
            return Ok(());
        }
        Err(LoadError::AbiMismatch {
            path: path.to_path_buf(),
            expected_abi: ABI_VERSION,
            found_abi: self.abi_version,
            expected_core: CORE_VERSION,
            found_core: self.core_version.to_string(),
        })
    }
}

/// Schema 根：模块导出的全部包。
///
/// 同一模块内 `(service_index, function_index)` 必须唯一，跨包也不例外。
#[repr(C)]
#[derive(Debug)]
pub struct PluginApi {
    stamp: AbiStamp,
    packages: &'static [&'static PackageDescriptor],
}

impl PluginApi {
    pub const fn new(packages: &'static [&'static PackageDescriptor]) -> Self {
        Self::with_stamp(AbiStamp::CURRENT, packages)
    }

    /// 以指定印记构造，供兼容性测试模拟旧版本模块。
    pub const fn with_stamp(
        stamp: AbiStamp,
        packages: &'static [&'static PackageDescriptor],
    ) -> Self {
        Self { stamp, packages }
    }

    pub fn stamp(&self) -> AbiStamp {
        self.stamp
    }

    pub fn packages(&self) -> &[&PackageDescriptor] {
        self.packages
    }

    pub fn package(&self, name: &str) -> Option<&PackageDescriptor> {
        self.packages
            .iter()
            .copied()
            .find(|package| package.name() == name)
    }

    /// 在全部包中解析分发键。
    pub fn resolve(
        &self,
        key: DispatchKey,
    ) -> Option<(&PackageDescriptor, &ServiceDescriptor, &FunctionDescriptor)> {
        self.packages.iter().copied().find_map(|package| {
            package
                .resolve(key)
                .map(|(service, function)| (package, service, function))
        })
    }
}

/// 客户端工厂入口的结果，由模块分配、宿主经 [`FactoryExport::from_raw`] 接管。
#[repr(C)]
pub struct FactoryExport {
    stamp: AbiStamp,
    factory: Box<dyn GenericClientFactory>,
}

impl FactoryExport {
    pub fn new(factory: impl GenericClientFactory + 'static) -> Self {
        Self::with_stamp(AbiStamp::CURRENT, Box::new(factory))
    }

    pub fn with_stamp(stamp: AbiStamp, factory: Box<dyn GenericClientFactory>) -> Self {
        Self { stamp, factory }
    }

    pub fn stamp(&self) -> AbiStamp {
        self.stamp
    }

    pub fn into_factory(self) -> Box<dyn GenericClientFactory> {
        self.factory
    }

    /// 移交所有权，得到可跨边界返回的指针。
    pub fn into_raw(self) -> *mut FactoryExport {
        Box::into_raw(Box::new(self))
    }

    /// 接管入口返回的指针。
    ///
    /// # Safety
    /// `ptr` 必须非空、来自 [`FactoryExport::into_raw`]，且只能接管一次；
    /// 返回值及其工厂必须在产出它的模块卸载前释放。
    pub unsafe fn from_raw(ptr: *mut FactoryExport) -> Box<FactoryExport> {
        // SAFETY: 调用方保证指针来源与唯一所有权。
        unsafe { Box::from_raw(ptr) }
    }
}

impl std::fmt::Debug for FactoryExport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryExport")
            .field("stamp", &self.stamp)
            .finish_non_exhaustive()
    }
}

/// Schema 入口的函数体；panic 时返回空指针。
pub fn export_api(make: impl FnOnce() -> &'static PluginApi) -> *const PluginApi {
    match boundary::guard(SCHEMA_SYMBOL, make) {
        Ok(api) => api as *const PluginApi,
        Err(_) => ptr::null(),
    }
}

/// 客户端工厂入口的函数体；构造失败或 panic 时返回空指针。
///
/// # Safety
/// `service_hint` 为空指针，或指向以 NUL 结尾且在调用期间有效的字符串。
pub unsafe fn export_factory<F, M>(service_hint: *const c_char, make: M) -> *mut FactoryExport
where
    F: GenericClientFactory + 'static,
    M: FnOnce(Option<&str>) -> Result<F, ErrorInfo>,
{
    let hint = if service_hint.is_null() {
        None
    } else {
        // SAFETY: 调用方保证非空指针指向有效的 C 字符串。
        unsafe { CStr::from_ptr(service_hint) }.to_str().ok()
    };
    match boundary::guard(CLIENT_FACTORY_SYMBOL, || make(hint)) {
        Ok(Ok(factory)) => FactoryExport::new(factory).into_raw(),
        Ok(Err(err)) => {
            tracing::warn!(hint = ?hint, code = %err.code(), message = err.message(), "client factory construction failed");
            ptr::null_mut()
        }
        Err(_) => ptr::null_mut(),
    }
}

/// 为插件模块生成入口符号。
///
/// ```ignore
/// spark_udf::export_plugin! {
///     schema: &API,
///     factory: |hint: Option<&str>| build_factory(hint),
/// }
/// ```
///
/// 省略 `factory` 时模块只导出 Schema。
#[macro_export]
macro_rules! export_plugin {
    (schema: $api:expr, factory: $factory:expr $(,)?) => {
        $crate::export_plugin!(schema: $api);

        /// # Safety
        /// `service_hint` 为空指针或有效的 C 字符串。
        #[unsafe(no_mangle)]
        #[allow(improper_ctypes_definitions)]
        pub unsafe extern "C" fn spark_udf_create_generic_client_factory(
            service_hint: *const ::std::ffi::c_char,
        ) -> *mut $crate::abi::FactoryExport {
            // SAFETY: 宿主按入口契约传入提示字符串。
            unsafe { $crate::abi::export_factory(service_hint, $factory) }
        }
    };
    (schema: $api:expr $(,)?) => {
        #[unsafe(no_mangle)]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn spark_udf_create_plugin_api() -> *const $crate::abi::PluginApi {
            $crate::abi::export_api(|| $api)
        }
    };
}
