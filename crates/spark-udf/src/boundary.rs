//! 模块边界护栏：任何 panic 都不得展开穿越插件边界。
//!
//! 入口函数、客户端工厂与调用处理器都经由 [`guard`] 执行，捕获到的 panic
//! 折叠为 `INTERNAL` 状态的 [`ErrorInfo`] 并记录一条 `error!` 事件。

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
};

use crate::error::ErrorInfo;

/// 在 `catch_unwind` 中执行 `f`。
///
/// `scope` 是出现在日志与错误消息中的静态标签，例如 `"client_factory"`。
pub fn guard<T>(scope: &'static str, f: impl FnOnce() -> T) -> Result<T, ErrorInfo> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let detail = panic_message(payload.as_ref());
        tracing::error!(scope, detail = %detail, "panic intercepted at module boundary");
        ErrorInfo::internal(format!("{scope} panicked: {detail}"))
    })
}

/// 提取 panic 载荷中的文本；非字符串载荷返回占位描述。
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatusCode;

    #[test]
    fn guard_converts_panic_into_internal_error() {
        let result: Result<(), _> = guard("unit", || panic!("handler exploded: {}", 42));
        let err = result.expect_err("panic 必须被拦截");
        assert_eq!(err.code(), StatusCode::Internal);
        assert!(err.message().contains("handler exploded: 42"), "{err}");
    }

    #[test]
    fn guard_passes_values_through() {
        assert_eq!(guard("unit", || 7), Ok(7));
    }
}
