//! 进程内测试桩：回环通道与静态模块后端。
//!
//! # 设计定位（Why）
//! - 加载器与客户端的契约测试不应依赖真实动态库或网络服务；
//! - 插件 crate 的集成测试也需要一个能把方法路径路由到进程内应答器的通道。
//!
//! # 使用方式（How）
//! - `use spark_udf::test_stubs::channel::LoopbackChannel;` 构造通道并按方法路径注册应答器；
//! - `use spark_udf::test_stubs::modules::{StaticModule, StaticModuleBackend};` 把普通 `extern "C"` 函数
//!   登记为某个路径上的“模块”，再交给 [`PluginLoader::with_backend`](crate::loader::PluginLoader::with_backend)。
//!
//! # 契约说明（What）
//! - 桩对象只用于测试与示例；生产代码依赖它们时应显式说明。

pub mod channel {
    //! 按方法路径路由的回环通道。

    use std::{collections::HashMap, fmt, ops::ControlFlow, sync::Arc};

    use bytes::Bytes;
    use parking_lot::Mutex;

    use crate::{
        channel::{Channel, ChannelCredentials, MessageSink, MethodPath},
        contract::CallContext,
        error::ErrorInfo,
    };

    /// 应答器：接收全部请求消息，经 `sink` 逐条产出响应。
    pub type Responder = Arc<
        dyn Fn(&CallContext, Vec<Bytes>, MessageSink<'_>) -> Result<(), ErrorInfo> + Send + Sync,
    >;

    /// 回环通道。
    ///
    /// - 每次调用前检查上下文；服务端流在交付每条响应前再次检查，取消后停止交付并返回 `CANCELLED`；
    /// - 未注册的方法路径返回 `UNIMPLEMENTED`；
    /// - 所有调用的方法路径按顺序记录，便于断言分发结果。
    pub struct LoopbackChannel {
        target: String,
        credentials: ChannelCredentials,
        responders: HashMap<String, Responder>,
        calls: Mutex<Vec<String>>,
    }

    impl LoopbackChannel {
        pub fn new(target: impl Into<String>) -> Self {
            Self {
                target: target.into(),
                credentials: ChannelCredentials::Insecure,
                responders: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn with_credentials(mut self, credentials: ChannelCredentials) -> Self {
            self.credentials = credentials;
            self
        }

        /// 注册应答器。
        pub fn on<F>(mut self, method: impl Into<String>, responder: F) -> Self
        where
            F: Fn(&CallContext, Vec<Bytes>, MessageSink<'_>) -> Result<(), ErrorInfo>
                + Send
                + Sync
                + 'static,
        {
            self.responders.insert(method.into(), Arc::new(responder));
            self
        }

        /// 注册一元应答器：每条请求映射为一条响应。
        pub fn on_each<F>(self, method: impl Into<String>, map: F) -> Self
        where
            F: Fn(Bytes) -> Result<Bytes, ErrorInfo> + Send + Sync + 'static,
        {
            self.on(method, move |_ctx, requests, sink| {
                for request in requests {
                    if sink(map(request)?).is_break() {
                        break;
                    }
                }
                Ok(())
            })
        }

        /// 至今被调用过的方法路径。
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn dispatch(
            &self,
            ctx: &CallContext,
            method: &MethodPath,
            requests: Vec<Bytes>,
            sink: MessageSink<'_>,
        ) -> Result<(), ErrorInfo> {
            ctx.check()?;
            self.calls.lock().push(method.as_str().to_string());
            let responder = self.responders.get(method.as_str()).ok_or_else(|| {
                ErrorInfo::unimplemented(format!("{} has no responder for {method}", self.target))
            })?;

            let mut interrupted = None;
            let mut forward = |message: Bytes| {
                if let Err(err) = ctx.check() {
                    interrupted = Some(err);
                    return ControlFlow::Break(());
                }
                sink(message)
            };
            responder(ctx, requests, &mut forward)?;
            match interrupted {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        fn single(
            &self,
            ctx: &CallContext,
            method: &MethodPath,
            requests: Vec<Bytes>,
        ) -> Result<Bytes, ErrorInfo> {
            let mut response = None;
            self.dispatch(ctx, method, requests, &mut |message| {
                response = Some(message);
                ControlFlow::Break(())
            })?;
            response.ok_or_else(|| ErrorInfo::internal(format!("{method} produced no response")))
        }
    }

    impl fmt::Debug for LoopbackChannel {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let mut methods: Vec<&str> = self.responders.keys().map(String::as_str).collect();
            methods.sort_unstable();
            f.debug_struct("LoopbackChannel")
                .field("target", &self.target)
                .field("credentials", &self.credentials)
                .field("methods", &methods)
                .finish()
        }
    }

    impl Channel for LoopbackChannel {
        fn target(&self) -> &str {
            &self.target
        }

        fn credentials(&self) -> &ChannelCredentials {
            &self.credentials
        }

        fn unary(
            &self,
            ctx: &CallContext,
            method: &MethodPath,
            request: Bytes,
        ) -> Result<Bytes, ErrorInfo> {
            self.single(ctx, method, vec![request])
        }

        fn client_streaming(
            &self,
            ctx: &CallContext,
            method: &MethodPath,
            requests: Vec<Bytes>,
        ) -> Result<Bytes, ErrorInfo> {
            self.single(ctx, method, requests)
        }

        fn server_streaming(
            &self,
            ctx: &CallContext,
            method: &MethodPath,
            request: Bytes,
            sink: MessageSink<'_>,
        ) -> Result<(), ErrorInfo> {
            self.dispatch(ctx, method, vec![request], sink)
        }

        fn bidi_streaming(
            &self,
            ctx: &CallContext,
            method: &MethodPath,
            requests: Vec<Bytes>,
            sink: MessageSink<'_>,
        ) -> Result<(), ErrorInfo> {
            self.dispatch(ctx, method, requests, sink)
        }
    }
}

pub mod modules {
    //! 以进程内函数充当动态库入口的模块后端。

    use std::{
        collections::HashMap,
        path::{Path, PathBuf},
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use parking_lot::Mutex;

    use crate::{
        abi::{ClientFactoryEntry, SchemaEntry},
        error::LoadError,
        loader::{ModuleBackend, NativeModule},
    };

    /// 某个路径上“模块”导出的入口；`None` 模拟符号缺失。
    #[derive(Clone, Copy, Debug, Default)]
    pub struct StaticModule {
        pub schema: Option<SchemaEntry>,
        pub client_factory: Option<ClientFactoryEntry>,
    }

    /// 静态模块后端。
    ///
    /// 克隆共享同一份登记表与存活计数，测试可以在把后端交给加载器后继续观察模块是否已关闭。
    #[derive(Clone, Debug, Default)]
    pub struct StaticModuleBackend {
        modules: Arc<Mutex<HashMap<PathBuf, StaticModule>>>,
        live: Arc<AtomicUsize>,
    }

    impl StaticModuleBackend {
        pub fn new() -> Self {
            Self::default()
        }

        /// 在 `path` 上登记模块。
        pub fn register(&self, path: impl Into<PathBuf>, module: StaticModule) -> &Self {
            self.modules.lock().insert(path.into(), module);
            self
        }

        /// 已打开且尚未关闭的模块数。
        pub fn live_modules(&self) -> usize {
            self.live.load(Ordering::Acquire)
        }
    }

    impl ModuleBackend for StaticModuleBackend {
        fn open(&self, path: &Path) -> Result<Box<dyn NativeModule>, LoadError> {
            let module = self
                .modules
                .lock()
                .get(path)
                .copied()
                .ok_or_else(|| LoadError::Open {
                    path: path.to_path_buf(),
                    detail: "no static module registered at this path".to_string(),
                })?;
            self.live.fetch_add(1, Ordering::AcqRel);
            Ok(Box::new(OpenedModule {
                module,
                live: Arc::clone(&self.live),
            }))
        }
    }

    struct OpenedModule {
        module: StaticModule,
        live: Arc<AtomicUsize>,
    }

    impl NativeModule for OpenedModule {
        fn schema_entry(&self) -> Option<SchemaEntry> {
            self.module.schema
        }

        fn client_factory_entry(&self) -> Option<ClientFactoryEntry> {
            self.module.client_factory
        }
    }

    impl Drop for OpenedModule {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::AcqRel);
        }
    }
}
