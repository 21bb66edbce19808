//! 传输通道接缝。
//!
//! # 设计背景（Why）
//! - 连接建立、帧格式与 TLS 由外部传输库负责；本 crate 只规定客户端如何把一次调用交给通道；
//! - 载荷以不透明的 [`Bytes`] 交换，消息编码归插件所有，宿主无需理解线上格式。
//!
//! # 契约说明（What）
//! - 每个方法都接收 [`CallContext`]，实现必须在阻塞前后调用 [`CallContext::check`]，
//!   使取消与截止传播到传输操作；
//! - 服务端流与双向流通过 `sink` 回调逐条交付响应，回调返回 [`ControlFlow::Break`] 表示调用方不再需要后续消息；
//! - 流式方法默认返回 `UNIMPLEMENTED`，只支持一元调用的通道无需实现它们。

use std::{fmt, ops::ControlFlow};

use bytes::Bytes;

use crate::{contract::CallContext, error::ErrorInfo};

/// 通道凭据选择。
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum ChannelCredentials {
    #[default]
    Insecure,
    /// TLS；`server_name` 覆盖证书校验使用的主机名。
    Tls { server_name: Option<String> },
}

impl ChannelCredentials {
    pub fn is_secure(&self) -> bool {
        matches!(self, ChannelCredentials::Tls { .. })
    }
}

/// 传输层方法路径，形如 `/<package>.<service>/<function>`。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodPath(String);

impl MethodPath {
    /// 由描述符名称拼出方法路径；包名为空时省略包前缀。
    pub fn new(package: &str, service: &str, function: &str) -> Self {
        if package.is_empty() {
            Self(format!("/{service}/{function}"))
        } else {
            Self(format!("/{package}.{service}/{function}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MethodPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MethodPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// 响应消息回调。
pub type MessageSink<'a> = &'a mut dyn FnMut(Bytes) -> ControlFlow<()>;

/// 外部传输库创建的不透明通道。
pub trait Channel: Send + Sync + fmt::Debug {
    /// 建立通道时使用的地址字符串。
    fn target(&self) -> &str;

    fn credentials(&self) -> &ChannelCredentials;

    fn unary(
        &self,
        ctx: &CallContext,
        method: &MethodPath,
        request: Bytes,
    ) -> Result<Bytes, ErrorInfo>;

    fn client_streaming(
        &self,
        ctx: &CallContext,
        method: &MethodPath,
        requests: Vec<Bytes>,
    ) -> Result<Bytes, ErrorInfo> {
        let _ = (ctx, requests);
        Err(ErrorInfo::unimplemented(format!(
            "channel `{}` does not support client streaming for {method}",
            self.target()
        )))
    }

    fn server_streaming(
        &self,
        ctx: &CallContext,
        method: &MethodPath,
        request: Bytes,
        sink: MessageSink<'_>,
    ) -> Result<(), ErrorInfo> {
        let _ = (ctx, request, sink);
        Err(ErrorInfo::unimplemented(format!(
            "channel `{}` does not support server streaming for {method}",
            self.target()
        )))
    }

    fn bidi_streaming(
        &self,
        ctx: &CallContext,
        method: &MethodPath,
        requests: Vec<Bytes>,
        sink: MessageSink<'_>,
    ) -> Result<(), ErrorInfo> {
        let _ = (ctx, requests, sink);
        Err(ErrorInfo::unimplemented(format!(
            "channel `{}` does not support bidirectional streaming for {method}",
            self.target()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_path_includes_package_when_present() {
        assert_eq!(
            MethodPath::new("helloworld", "Greeter", "SayHello").as_str(),
            "/helloworld.Greeter/SayHello"
        );
        assert_eq!(MethodPath::new("", "Greeter", "SayHello").to_string(), "/Greeter/SayHello");
    }
}
