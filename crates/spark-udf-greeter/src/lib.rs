//! spark-udf 参考插件：`helloworld.Greeter`。
//!
//! # 设计定位（Why）
//! - 演示插件作者需要提供的全部内容：一张 `static` 描述符图、一张分发表和 [`spark_udf::export_plugin!`]；
//! - 六个函数覆盖一元、服务端流、客户端流、双向流四种形态，以及嵌套记录与 oneof 列。
//!
//! # 使用方式（How）
//! - 以 `cdylib` 构建后交给 `PluginLoader::load`；
//! - 宿主内测试可直接链接 `rlib`，通过 [`factory`] 构造客户端工厂。
//!
//! # 契约说明（What）
//! - 方法路径为 `/helloworld.Greeter/<Function>`，负载为 [`messages`] 中结构体的 JSON 编码；
//! - 客户端工厂只接受空提示或服务名 `Greeter`。

pub mod handlers;
pub mod messages;

use spark_udf::{
    ColumnDescriptor, ColumnType, DispatchKey, DispatchTable, ErrorInfo, FunctionDescriptor,
    FunctionKind, PackageDescriptor, PluginApi, RecordDescriptor, ServiceDescriptor, StatusCode,
    TableFactory, Version,
};

static NAME_COLUMNS: [ColumnDescriptor; 1] = [ColumnDescriptor::new(0, "name", ColumnType::String)];
static HELLO_REQUEST: RecordDescriptor = RecordDescriptor::new("HelloRequest", &NAME_COLUMNS);

static MESSAGE_COLUMNS: [ColumnDescriptor; 1] =
    [ColumnDescriptor::new(0, "message", ColumnType::String)];
static HELLO_REPLY: RecordDescriptor = RecordDescriptor::new("HelloReply", &MESSAGE_COLUMNS);

static INT_COLUMNS: [ColumnDescriptor; 1] = [ColumnDescriptor::new(0, "value", ColumnType::Int4)];
static INT_VALUE: RecordDescriptor = RecordDescriptor::new("IntValue", &INT_COLUMNS);

static COUNT_REQUEST_COLUMNS: [ColumnDescriptor; 2] = [
    ColumnDescriptor::new(0, "start", ColumnType::Int8),
    ColumnDescriptor::new(1, "count", ColumnType::Uint4),
];
static COUNT_REQUEST: RecordDescriptor = RecordDescriptor::new("CountRequest", &COUNT_REQUEST_COLUMNS);

static COUNT_REPLY_COLUMNS: [ColumnDescriptor; 1] =
    [ColumnDescriptor::new(0, "value", ColumnType::Int8)];
static COUNT_REPLY: RecordDescriptor = RecordDescriptor::new("CountReply", &COUNT_REPLY_COLUMNS);

static CHAT_COLUMNS: [ColumnDescriptor; 1] = [ColumnDescriptor::new(0, "text", ColumnType::String)];
static CHAT_MESSAGE: RecordDescriptor = RecordDescriptor::new("ChatMessage", &CHAT_COLUMNS);

static PERSON_COLUMNS: [ColumnDescriptor; 2] = [
    ColumnDescriptor::new(0, "name", ColumnType::String),
    ColumnDescriptor::new(1, "age", ColumnType::Int4),
];
static PERSON: RecordDescriptor = RecordDescriptor::new("Person", &PERSON_COLUMNS);

static DESCRIBE_REQUEST_COLUMNS: [ColumnDescriptor; 3] = [
    ColumnDescriptor::new(0, "person", ColumnType::Message).with_nested(&PERSON),
    ColumnDescriptor::new(1, "email", ColumnType::String).with_oneof(0, "contact"),
    ColumnDescriptor::new(2, "phone", ColumnType::String).with_oneof(0, "contact"),
];
static DESCRIBE_REQUEST: RecordDescriptor =
    RecordDescriptor::new("DescribeRequest", &DESCRIBE_REQUEST_COLUMNS);

static SUMMARY_COLUMNS: [ColumnDescriptor; 1] =
    [ColumnDescriptor::new(0, "summary", ColumnType::String)];
static DESCRIBE_REPLY: RecordDescriptor = RecordDescriptor::new("DescribeReply", &SUMMARY_COLUMNS);

static GREETER_FUNCTIONS: [FunctionDescriptor; 6] = [
    FunctionDescriptor::new(0, "SayHello", FunctionKind::Unary, &HELLO_REQUEST, &HELLO_REPLY),
    FunctionDescriptor::new(1, "AddIntOne", FunctionKind::Unary, &INT_VALUE, &INT_VALUE),
    FunctionDescriptor::new(
        2,
        "CountUp",
        FunctionKind::ServerStreaming,
        &COUNT_REQUEST,
        &COUNT_REPLY,
    ),
    FunctionDescriptor::new(
        3,
        "JoinNames",
        FunctionKind::ClientStreaming,
        &HELLO_REQUEST,
        &HELLO_REPLY,
    ),
    FunctionDescriptor::new(
        4,
        "Chat",
        FunctionKind::BidirectionalStreaming,
        &CHAT_MESSAGE,
        &CHAT_MESSAGE,
    ),
    FunctionDescriptor::new(5, "Describe", FunctionKind::Unary, &DESCRIBE_REQUEST, &DESCRIBE_REPLY),
];

static SERVICES: [ServiceDescriptor; 1] = [ServiceDescriptor::new(0, SERVICE_NAME, &GREETER_FUNCTIONS)];

/// `helloworld` 包。
pub static PACKAGE: PackageDescriptor =
    PackageDescriptor::new("helloworld", "greeter.proto", Version::new(1, 0, 0), &SERVICES);

static PACKAGES: [&PackageDescriptor; 1] = [&PACKAGE];

/// 模块导出的 Schema 根。
pub static API: PluginApi = PluginApi::new(&PACKAGES);

pub const SERVICE_NAME: &str = "Greeter";

pub const SAY_HELLO: DispatchKey = DispatchKey::new(0, 0);
pub const ADD_INT_ONE: DispatchKey = DispatchKey::new(0, 1);
pub const COUNT_UP: DispatchKey = DispatchKey::new(0, 2);
pub const JOIN_NAMES: DispatchKey = DispatchKey::new(0, 3);
pub const CHAT: DispatchKey = DispatchKey::new(0, 4);
pub const DESCRIBE: DispatchKey = DispatchKey::new(0, 5);

/// 全部函数都已注册的分发表。
pub fn dispatch_table() -> Result<DispatchTable, ErrorInfo> {
    let mut table = DispatchTable::new(&PACKAGE);
    table
        .route(SAY_HELLO, handlers::say_hello)?
        .route(ADD_INT_ONE, handlers::add_int_one)?
        .route(COUNT_UP, handlers::count_up)?
        .route(JOIN_NAMES, handlers::join_names)?
        .route(CHAT, handlers::chat)?
        .route(DESCRIBE, handlers::describe)?;
    Ok(table)
}

/// 客户端工厂入口的实现。
pub fn factory(service_hint: Option<&str>) -> Result<TableFactory, ErrorInfo> {
    if let Some(hint) = service_hint.filter(|hint| *hint != SERVICE_NAME) {
        return Err(ErrorInfo::new(
            StatusCode::NotFound,
            format!("package `helloworld` has no service named `{hint}`"),
        ));
    }
    tracing::debug!(hint = ?service_hint, "building greeter client factory");
    Ok(dispatch_table()?.into_factory())
}

spark_udf::export_plugin! {
    schema: &API,
    factory: factory,
}
