//! 通用客户端契约与插件侧的分发表实现。
//!
//! # 设计背景（Why）
//! - 宿主在运行期才知道要调用哪个函数，唯一的寻址方式是描述符给出的 `(service_index, function_index)`；
//! - 失败以值的形式挂在响应上：一元/客户端流写入响应记录的 [`ErrorInfo`]，
//!   服务端流/双向流在结束标记前追加一条失败记录，调用方总能拿到可用的记录或流。
//!
//! # 逻辑解析（How）
//! - [`GenericClientFactory`] 把外部创建的 [`Channel`] 绑定成 [`GenericClient`]；
//! - 插件通常不必手写客户端：用 [`DispatchTable`] 把分发键映射到 [`FunctionHandler`]，
//!   由 [`TableClient`] 统一完成上下文检查、响应形态校验、panic 拦截与流终止。

use std::{collections::HashMap, fmt, sync::Arc};

use tracing::{debug, warn};

use crate::{
    boundary,
    channel::{Channel, MethodPath},
    contract::CallContext,
    descriptor::{FunctionDescriptor, PackageDescriptor},
    error::{ErrorInfo, StatusCode},
    record::{Cursor, GenericRecord},
    stream::GenericRecordStream,
};

/// 一次调用的分发键。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DispatchKey {
    service_index: u32,
    function_index: u32,
}

impl DispatchKey {
    pub const fn new(service_index: u32, function_index: u32) -> Self {
        Self {
            service_index,
            function_index,
        }
    }

    pub const fn service_index(&self) -> u32 {
        self.service_index
    }

    pub const fn function_index(&self) -> u32 {
        self.function_index
    }
}

impl From<(u32, u32)> for DispatchKey {
    fn from((service_index, function_index): (u32, u32)) -> Self {
        Self::new(service_index, function_index)
    }
}

impl fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.service_index, self.function_index)
    }
}

/// 调用结果的去向：一元/客户端流写入记录，服务端流/双向流推入记录流。
#[derive(Debug)]
pub enum CallResponse<'a> {
    Record(&'a mut GenericRecord),
    Stream(&'a GenericRecordStream),
}

impl CallResponse<'_> {
    /// 以更短的生命周期重新借出，便于把响应交给下游后继续使用。
    pub fn reborrow(&mut self) -> CallResponse<'_> {
        match self {
            CallResponse::Record(record) => CallResponse::Record(&mut **record),
            CallResponse::Stream(stream) => CallResponse::Stream(*stream),
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, CallResponse::Stream(_))
    }

    pub fn record(&mut self) -> Option<&mut GenericRecord> {
        match self {
            CallResponse::Record(record) => Some(&mut **record),
            CallResponse::Stream(_) => None,
        }
    }

    pub fn stream(&self) -> Option<&GenericRecordStream> {
        match self {
            CallResponse::Record(_) => None,
            CallResponse::Stream(stream) => Some(*stream),
        }
    }

    /// 以失败结束调用：记录挂上错误；流追加一条失败记录后结束。
    pub fn fail(self, error: ErrorInfo) {
        match self {
            CallResponse::Record(record) => record.set_error(error),
            CallResponse::Stream(stream) => {
                stream.push(GenericRecord::failed(error));
                stream.end_of_stream();
            }
        }
    }
}

/// 绑定到某个通道的通用客户端。
///
/// 请求槽位按函数输入记录的列顺序排列，响应槽位按输出记录的列顺序排列。
/// 实现不得 panic 穿越调用方；任何失败都写入 `response`。
pub trait GenericClient: Send + Sync {
    fn call(
        &self,
        ctx: &CallContext,
        key: DispatchKey,
        request: &GenericRecord,
        response: CallResponse<'_>,
    );
}

/// 客户端工厂；连接建立类错误在这里暴露。
pub trait GenericClientFactory: Send + Sync {
    fn create(&self, channel: Arc<dyn Channel>) -> Result<Box<dyn GenericClient>, ErrorInfo>;
}

/// 交给处理器的单次调用视图。
pub struct Invocation<'a> {
    pub context: &'a CallContext,
    pub channel: &'a dyn Channel,
    pub method: &'a MethodPath,
    pub function: &'a FunctionDescriptor,
    pub request: &'a GenericRecord,
}

impl<'a> Invocation<'a> {
    /// 按输入记录的列数把请求切分为若干行，每行对应一条出站消息。
    ///
    /// 末尾不足一行的槽位仍作为最后一行交付，缺失的列读取为空。
    pub fn rows(&self) -> impl Iterator<Item = Cursor<'a>> + use<'a> {
        let width = self.function.input_record().columns().len().max(1);
        self.request.values().chunks(width).map(Cursor::new)
    }
}

/// 单个函数的处理逻辑。
///
/// 返回 `Err` 时由 [`TableClient`] 把错误写入响应；流式响应的结束标记也由它补齐。
pub trait FunctionHandler: Send + Sync {
    fn handle(&self, invocation: Invocation<'_>, response: CallResponse<'_>) -> Result<(), ErrorInfo>;
}

impl<F> FunctionHandler for F
where
    F: Fn(Invocation<'_>, CallResponse<'_>) -> Result<(), ErrorInfo> + Send + Sync,
{
    fn handle(&self, invocation: Invocation<'_>, response: CallResponse<'_>) -> Result<(), ErrorInfo> {
        self(invocation, response)
    }
}

struct Route {
    method: MethodPath,
    function: &'static FunctionDescriptor,
    handler: Box<dyn FunctionHandler>,
}

/// 由包描述符派生的分发表。
///
/// 方法路径 `/<package>.<service>/<function>` 与调用形态都取自描述符，处理器只关心编解码与业务。
pub struct DispatchTable {
    package: &'static PackageDescriptor,
    routes: HashMap<DispatchKey, Route>,
}

impl DispatchTable {
    pub fn new(package: &'static PackageDescriptor) -> Self {
        Self {
            package,
            routes: HashMap::new(),
        }
    }

    pub fn package(&self) -> &'static PackageDescriptor {
        self.package
    }

    /// 为分发键注册处理器。
    ///
    /// 分发键不在描述符中时返回 `NOT_FOUND`，重复注册返回 `ALREADY_EXISTS`。
    pub fn route(
        &mut self,
        key: DispatchKey,
        handler: impl FunctionHandler + 'static,
    ) -> Result<&mut Self, ErrorInfo> {
        let package = self.package;
        let (service, function) = package.resolve(key).ok_or_else(|| {
            ErrorInfo::new(
                StatusCode::NotFound,
                format!("package `{}` has no function at {key}", package.name()),
            )
        })?;
        if self.routes.contains_key(&key) {
            return Err(ErrorInfo::new(
                StatusCode::AlreadyExists,
                format!("{}.{} is already routed", service.name(), function.name()),
            ));
        }
        let method = MethodPath::new(package.name(), service.name(), function.name());
        self.routes.insert(
            key,
            Route {
                method,
                function,
                handler: Box::new(handler),
            },
        );
        Ok(self)
    }

    /// 按服务名与函数名注册处理器。
    pub fn route_by_name(
        &mut self,
        service: &str,
        function: &str,
        handler: impl FunctionHandler + 'static,
    ) -> Result<&mut Self, ErrorInfo> {
        let key = self
            .package
            .service_by_name(service)
            .and_then(|svc| svc.function_by_name(function).map(|f| svc.dispatch_key(f)))
            .ok_or_else(|| {
                ErrorInfo::new(
                    StatusCode::NotFound,
                    format!("package `{}` has no function {service}.{function}", self.package.name()),
                )
            })?;
        self.route(key, handler)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// 已注册分发键对应的方法路径。
    pub fn method(&self, key: DispatchKey) -> Option<&MethodPath> {
        self.routes.get(&key).map(|route| &route.method)
    }

    /// 冻结分发表，得到可导出的客户端工厂。
    pub fn into_factory(self) -> TableFactory {
        TableFactory {
            table: Arc::new(self),
        }
    }

    /// 直接绑定通道构造客户端，供宿主内测试使用。
    pub fn bind(self: &Arc<Self>, channel: Arc<dyn Channel>) -> TableClient {
        TableClient {
            table: Arc::clone(self),
            channel,
        }
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.routes.keys().copied().collect();
        keys.sort_unstable();
        f.debug_struct("DispatchTable")
            .field("package", &self.package.name())
            .field("routes", &keys)
            .finish()
    }
}

/// [`DispatchTable`] 的客户端工厂形态。
#[derive(Clone, Debug)]
pub struct TableFactory {
    table: Arc<DispatchTable>,
}

impl TableFactory {
    pub fn table(&self) -> &Arc<DispatchTable> {
        &self.table
    }
}

impl GenericClientFactory for TableFactory {
    fn create(&self, channel: Arc<dyn Channel>) -> Result<Box<dyn GenericClient>, ErrorInfo> {
        debug!(
            package = self.table.package.name(),
            channel_target = channel.target(),
            "binding dispatch table to channel"
        );
        Ok(Box::new(self.table.bind(channel)))
    }
}

/// 基于分发表的客户端。
#[derive(Debug)]
pub struct TableClient {
    table: Arc<DispatchTable>,
    channel: Arc<dyn Channel>,
}

impl TableClient {
    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }
}

impl GenericClient for TableClient {
    fn call(
        &self,
        ctx: &CallContext,
        key: DispatchKey,
        request: &GenericRecord,
        mut response: CallResponse<'_>,
    ) {
        if let Some(record) = response.record() {
            record.reset();
        }

        let Some(route) = self.table.routes.get(&key) else {
            warn!(%key, package = self.table.package.name(), "no handler for dispatch key");
            response.fail(ErrorInfo::unimplemented(format!(
                "no function routed at {key} in package `{}`",
                self.table.package.name()
            )));
            return;
        };

        let kind = route.function.kind();
        if kind.streams_responses() != response.is_stream() {
            let expected = if kind.streams_responses() { "a record stream" } else { "a record" };
            response.fail(ErrorInfo::invalid_argument(format!(
                "{} is {kind}; its response must be {expected}",
                route.method
            )));
            return;
        }

        if let Err(err) = ctx.check() {
            warn!(method = %route.method, code = %err.code(), "call rejected before dispatch");
            response.fail(err);
            return;
        }

        debug!(method = %route.method, %key, %kind, "dispatching call");
        let invocation = Invocation {
            context: ctx,
            channel: self.channel.as_ref(),
            method: &route.method,
            function: route.function,
            request,
        };
        let outcome = boundary::guard("dispatch handler", || {
            route.handler.handle(invocation, response.reborrow())
        })
        .and_then(std::convert::identity);

        match outcome {
            Ok(()) => {
                if let Some(stream) = response.stream() {
                    stream.end_of_stream();
                }
            }
            Err(err) => {
                warn!(method = %route.method, code = %err.code(), message = err.message(), "call failed");
                response.fail(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamStatus;

    #[test]
    fn failing_a_stream_appends_error_then_ends() {
        let stream = GenericRecordStream::new();
        CallResponse::Stream(&stream).fail(ErrorInfo::unavailable("peer went away"));

        let mut record = GenericRecord::new();
        assert_eq!(stream.try_next(&mut record), StreamStatus::Error);
        assert_eq!(record.error().map(ErrorInfo::code), Some(StatusCode::Unavailable));
        assert_eq!(stream.try_next(&mut record), StreamStatus::EndOfStream, "失败记录之后必须是流结束");
    }

    #[test]
    fn reborrow_keeps_original_usable() {
        let mut record = GenericRecord::new();
        let mut response = CallResponse::Record(&mut record);
        if let Some(inner) = response.reborrow().record() {
            inner.add_int4(3);
        }
        response.fail(ErrorInfo::internal("late failure"));
        assert_eq!(record.len(), 1);
        assert!(record.is_failed());
    }

    #[test]
    fn dispatch_key_displays_as_pair() {
        assert_eq!(DispatchKey::from((2, 5)).to_string(), "(2, 5)");
    }
}
