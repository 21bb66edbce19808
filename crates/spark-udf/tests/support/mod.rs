//! 集成测试共享的描述符、处理器与模块入口。
//!
//! `echo` 包提供四个函数，覆盖一元、服务端流与客户端流三种形态；
//! 入口函数以进程内 `extern "C"` 函数的形式交给 `StaticModuleBackend`。
#![allow(dead_code, improper_ctypes_definitions)]

use std::{
    ffi::c_char,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use spark_udf::{
    ABI_VERSION, AbiStamp, CallResponse, Channel, ColumnDescriptor, ColumnType, DispatchKey,
    DispatchTable, ErrorInfo, FactoryExport, FunctionDescriptor, FunctionKind, GenericRecord,
    Invocation, PackageDescriptor, PluginApi, RecordDescriptor, ServiceDescriptor, Version,
    abi::{export_api, export_factory},
    test_stubs::{
        channel::LoopbackChannel,
        modules::{StaticModule, StaticModuleBackend},
    },
};

pub static TEXT_COLUMNS: [ColumnDescriptor; 1] = [ColumnDescriptor::new(0, "text", ColumnType::String)];
pub static TEXT: RecordDescriptor = RecordDescriptor::new("Text", &TEXT_COLUMNS);

pub static NUMBER_COLUMNS: [ColumnDescriptor; 1] = [ColumnDescriptor::new(0, "value", ColumnType::Int4)];
pub static NUMBER: RecordDescriptor = RecordDescriptor::new("Number", &NUMBER_COLUMNS);

pub static ECHO_FUNCTIONS: [FunctionDescriptor; 4] = [
    FunctionDescriptor::new(0, "Echo", FunctionKind::Unary, &TEXT, &TEXT),
    FunctionDescriptor::new(1, "Increment", FunctionKind::Unary, &NUMBER, &NUMBER),
    FunctionDescriptor::new(2, "Repeat", FunctionKind::ServerStreaming, &TEXT, &TEXT),
    FunctionDescriptor::new(3, "Sum", FunctionKind::ClientStreaming, &NUMBER, &NUMBER),
];
pub static ECHO_SERVICES: [ServiceDescriptor; 1] = [ServiceDescriptor::new(0, "Echoer", &ECHO_FUNCTIONS)];
pub static ECHO_PACKAGE: PackageDescriptor =
    PackageDescriptor::new("echo", "echo.proto", Version::new(0, 3, 1), &ECHO_SERVICES);
pub static PACKAGES: [&PackageDescriptor; 1] = [&ECHO_PACKAGE];

pub static API: PluginApi = PluginApi::new(&PACKAGES);
pub static STALE_API: PluginApi =
    PluginApi::with_stamp(AbiStamp::new(ABI_VERSION + 1, "0.0.0"), &PACKAGES);

pub const ECHO: DispatchKey = DispatchKey::new(0, 0);
pub const INCREMENT: DispatchKey = DispatchKey::new(0, 1);
pub const REPEAT: DispatchKey = DispatchKey::new(0, 2);
pub const SUM: DispatchKey = DispatchKey::new(0, 3);

fn text_of(bytes: Bytes) -> Result<String, ErrorInfo> {
    String::from_utf8(bytes.to_vec()).map_err(|err| ErrorInfo::internal(err.to_string()))
}

/// 经通道往返的一元回显。
pub fn echo(invocation: Invocation<'_>, mut response: CallResponse<'_>) -> Result<(), ErrorInfo> {
    let text = invocation.request.cursor().fetch_string().unwrap_or_default();
    let reply = invocation
        .channel
        .unary(invocation.context, invocation.method, Bytes::from(text))?;
    if let Some(record) = response.record() {
        record.add_string(text_of(reply)?);
    }
    Ok(())
}

/// 本地计算的一元函数；空输入回写空值。
pub fn increment(invocation: Invocation<'_>, mut response: CallResponse<'_>) -> Result<(), ErrorInfo> {
    let value = invocation.request.cursor().fetch_int4();
    if let Some(record) = response.record() {
        match value {
            Some(value) => record.add_int4(value + 1),
            None => record.add_int4_null(),
        }
    }
    Ok(())
}

/// 服务端流：把文本重复三次；文本为 `fail` 时在第一条后失败。
pub fn repeat(invocation: Invocation<'_>, response: CallResponse<'_>) -> Result<(), ErrorInfo> {
    let stream = response
        .stream()
        .ok_or_else(|| ErrorInfo::internal("repeat expects a stream"))?;
    let text = invocation.request.cursor().fetch_string().unwrap_or_default();
    for round in 0..3 {
        if round == 1 && text == "fail" {
            return Err(ErrorInfo::unavailable("repeat interrupted"));
        }
        let mut record = GenericRecord::new();
        record.add_string(format!("{text}#{round}"));
        stream.push(record);
    }
    Ok(())
}

/// 客户端流：对每行的 `value` 求和。
pub fn sum(invocation: Invocation<'_>, mut response: CallResponse<'_>) -> Result<(), ErrorInfo> {
    let total: i32 = invocation.rows().filter_map(|mut row| row.fetch_int4()).sum();
    if let Some(record) = response.record() {
        record.add_int4(total);
    }
    Ok(())
}

pub fn echo_table() -> DispatchTable {
    let mut table = DispatchTable::new(&ECHO_PACKAGE);
    table
        .route(ECHO, echo)
        .and_then(|table| table.route(INCREMENT, increment))
        .and_then(|table| table.route(REPEAT, repeat))
        .and_then(|table| table.route(SUM, sum))
        .expect("固定路由表必须合法");
    table
}

pub fn echo_channel() -> Arc<dyn Channel> {
    Arc::new(LoopbackChannel::new("loopback:echo").on_each("/echo.Echoer/Echo", Ok))
}

pub unsafe extern "C" fn echo_schema() -> *const PluginApi {
    export_api(|| &API)
}

pub unsafe extern "C" fn stale_schema() -> *const PluginApi {
    export_api(|| &STALE_API)
}

pub unsafe extern "C" fn panicking_schema() -> *const PluginApi {
    export_api(|| panic!("schema construction failed"))
}

pub unsafe extern "C" fn echo_factory(hint: *const c_char) -> *mut FactoryExport {
    // SAFETY: 加载器传入空指针或有效的 C 字符串。
    unsafe {
        export_factory(hint, |_hint: Option<&str>| {
            Ok::<_, ErrorInfo>(echo_table().into_factory())
        })
    }
}

/// 只接受服务名提示 `Echoer` 的工厂入口。
pub unsafe extern "C" fn picky_factory(hint: *const c_char) -> *mut FactoryExport {
    // SAFETY: 同上。
    unsafe {
        export_factory(hint, |hint: Option<&str>| match hint {
            Some("Echoer") => Ok(echo_table().into_factory()),
            other => Err(ErrorInfo::invalid_argument(format!("unexpected service hint {other:?}"))),
        })
    }
}

pub const GOOD: StaticModule = StaticModule {
    schema: Some(echo_schema),
    client_factory: Some(echo_factory),
};

pub const SCHEMA_ONLY: StaticModule = StaticModule {
    schema: Some(echo_schema),
    client_factory: None,
};

pub const NO_SCHEMA: StaticModule = StaticModule {
    schema: None,
    client_factory: Some(echo_factory),
};

/// 平台动态库文件名，例如 Linux 上的 `libgood.so`。
pub fn module_name(stem: &str) -> String {
    format!("lib{stem}.{}", std::env::consts::DLL_EXTENSION)
}

/// 在目录中创建空占位文件，使其能被目录扫描发现。
pub fn touch(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, b"").expect("写入占位文件");
    path
}

/// 在 `dir` 中创建模块占位文件并登记到后端。
pub fn install(backend: &StaticModuleBackend, dir: &Path, stem: &str, module: StaticModule) -> PathBuf {
    let path = touch(dir, &module_name(stem));
    backend.register(path.clone(), module);
    path
}
