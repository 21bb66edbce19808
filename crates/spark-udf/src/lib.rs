#![deny(unsafe_op_in_unsafe_fn)]
#![doc = "spark-udf: 运行时从动态插件发现 Schema，并以类型擦除的列式记录发起 RPC 调用。"]
#![doc = ""]
#![doc = "== 分层 =="]
#![doc = "1. `record`/`error`：位置寻址的通用记录、游标与跨边界错误信息；"]
#![doc = "2. `descriptor`：插件内存持有的只读 Schema 图（包 → 服务 → 函数 → 记录 → 列）；"]
#![doc = "3. `stream`：流式调用使用的线程安全记录队列；"]
#![doc = "4. `contract`/`channel`/`client`：调用上下文、传输通道接缝与按 `(service, function)` 下标分发的客户端契约；"]
#![doc = "5. `abi`/`boundary`/`loader`：插件二进制边界、防展开护栏与加载器；"]
#![doc = "6. `config`/`introspect`：加载配置与面向脚本绑定的只读导出。"]
#![doc = ""]
#![doc = "== 插件内存生命周期 =="]
#![doc = "描述符与客户端工厂的内存归属于插件模块本身。加载器对模块句柄做引用计数：`unload_all` 只释放加载器自身持有的引用，"]
#![doc = "当最后一个 `LoadedPlugin`、`ClientFactory` 或 `PluginClient` 被丢弃后，动态库才真正卸载。"]

pub mod abi;
pub mod boundary;
pub mod channel;
pub mod client;
pub mod config;
pub mod contract;
pub mod descriptor;
pub mod error;
pub mod introspect;
pub mod loader;
pub mod record;
pub mod stream;
pub mod test_stubs;

pub use abi::{ABI_VERSION, AbiStamp, FactoryExport, PluginApi};
pub use channel::{Channel, ChannelCredentials, MethodPath};
pub use client::{
    CallResponse, DispatchKey, DispatchTable, FunctionHandler, GenericClient,
    GenericClientFactory, Invocation, TableClient, TableFactory,
};
pub use config::{LoaderConfig, PluginSettings};
pub use contract::{CallContext, CallContextBuilder, Cancellation, Deadline};
pub use descriptor::{
    ColumnDescriptor, ColumnType, FunctionDescriptor, FunctionKind, OneofGroup,
    PackageDescriptor, RecordDescriptor, ServiceDescriptor, Version,
};
pub use error::{ConfigError, ErrorInfo, LoadError, StatusCode};
pub use introspect::{Inspection, export_plugins, inspect_path};
pub use loader::{
    ClientFactory, LoadOutcome, LoadReport, LoadStatus, LoadedPlugin, PluginClient, PluginLoader,
};
pub use record::{Cursor, GenericRecord, Scalar, ScalarKind, ScalarType};
pub use stream::{GenericRecordStream, StreamState, StreamStatus};
