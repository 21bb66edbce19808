//! 调用上下文：取消、截止与调用元数据。
//!
//! 客户端必须把上下文原样交给传输通道；通道在阻塞等待前后调用 [`CallContext::check`]，
//! 从而把取消与截止传播到底层传输操作。
#[cfg(not(loom))]
use std::sync::atomic::{AtomicBool, Ordering};
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

#[cfg(loom)]
use loom::sync::atomic::{AtomicBool, Ordering};

use crate::error::ErrorInfo;

/// 调用方持有的取消令牌。
///
/// 克隆与 [`Cancellation::child`] 共享同一个取消位：宿主保留一份用于取消，另一份随
/// [`CallContext`] 进入插件，插件的处理器与通道在交付每条消息前通过 [`CallContext::check`] 观察它。
/// 取消位只存放在令牌自身的原子变量里，插件以自己链接的代码读取时也能看到宿主的写入。
///
/// 只能轮询，不提供回调：阻塞在传输上的通道需要自行定期检查。
#[derive(Clone, Debug)]
pub struct Cancellation {
    inner: Arc<CancellationState>,
}

#[derive(Debug)]
struct CancellationState {
    flag: AtomicBool,
}

impl Cancellation {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationState {
                flag: AtomicBool::new(false),
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// 置位；只有第一次置位返回 `true`。
    pub fn cancel(&self) -> bool {
        self.inner
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 交给 [`CallContext`] 的句柄，与 `self` 共享取消位。
    pub fn child(&self) -> Self {
        self.clone()
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// 截止原语，描述操作的最迟完成时间（单调时钟）。
///
/// 截止时间不会自动驱动取消；到期判定由 [`CallContext::check`] 在调用路径上完成。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Deadline {
    instant: Option<Instant>,
}

impl Deadline {
    /// 创建未设置截止时间的实例。
    pub const fn none() -> Self {
        Self { instant: None }
    }

    /// 根据绝对时间点构造截止时间。
    pub fn at(instant: Instant) -> Self {
        Self {
            instant: Some(instant),
        }
    }

    /// 从现在起经过 `timeout` 后到期；超出单调时钟范围时等同于未设置。
    pub fn after(timeout: Duration) -> Self {
        Instant::now()
            .checked_add(timeout)
            .map_or(Self::none(), Self::at)
    }

    pub fn instant(&self) -> Option<Instant> {
        self.instant
    }

    /// 距离到期的剩余时间；未设置时返回 `None`，已到期返回零。
    pub fn remaining(&self) -> Option<Duration> {
        self.instant
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        match self.instant {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }
}

/// 调用上下文，在客户端与传输通道之间传递取消、截止与调用元数据。
///
/// # 契约说明（What）
/// - `Cancellation`：通过 [`CallContext::cancellation`] 获取；取消后进行中的传输操作应尽快返回 `CANCELLED`；
/// - `Deadline`：通过 [`CallContext::deadline`] 查询；到期后应返回 `DEADLINE_EXCEEDED`；
/// - `metadata`：按插入顺序保存的键值对，由通道决定如何映射到线上头部。
///
/// # 风险提示（Trade-offs）
/// - `CallContext` 通过 [`Arc`] 共享，克隆成本为常数，可以放心交给流消费线程。
#[derive(Clone, Debug)]
pub struct CallContext {
    inner: Arc<CallContextInner>,
}

#[derive(Debug)]
struct CallContextInner {
    cancellation: Cancellation,
    deadline: Deadline,
    metadata: Vec<(String, String)>,
}

impl CallContext {
    /// 创建上下文构建器。
    pub fn builder() -> CallContextBuilder {
        CallContextBuilder::default()
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.inner.cancellation
    }

    pub fn deadline(&self) -> Deadline {
        self.inner.deadline
    }

    pub fn metadata(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner
            .metadata
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// 取消优先于截止：两者同时成立时报告 `CANCELLED`。
    pub fn check(&self) -> Result<(), ErrorInfo> {
        if self.inner.cancellation.is_cancelled() {
            return Err(ErrorInfo::cancelled("call cancelled by caller"));
        }
        if self.inner.deadline.is_expired() {
            return Err(ErrorInfo::deadline_exceeded("call deadline elapsed"));
        }
        Ok(())
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Display for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let deadline = match self.deadline().remaining() {
            Some(remaining) => format!("{remaining:?}"),
            None => "none".to_string(),
        };
        write!(
            f,
            "CallContext{{cancelled={}, deadline={}, metadata={}}}",
            self.cancellation().is_cancelled(),
            deadline,
            self.inner.metadata.len()
        )
    }
}

/// `CallContext` 构建器。
#[derive(Default)]
pub struct CallContextBuilder {
    cancellation: Cancellation,
    deadline: Deadline,
    metadata: Vec<(String, String)>,
}

impl CallContextBuilder {
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// 以相对超时设置截止时间。
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Deadline::after(timeout))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    pub fn build(self) -> CallContext {
        CallContext {
            inner: Arc::new(CallContextInner {
                cancellation: self.cancellation,
                deadline: self.deadline,
                metadata: self.metadata,
            }),
        }
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn check_reports_cancellation_before_deadline() {
        let cancellation = Cancellation::new();
        let ctx = CallContext::builder()
            .with_cancellation(cancellation.child())
            .with_deadline(Deadline::at(Instant::now()))
            .build();
        assert_eq!(
            ctx.check().map_err(|err| err.code()),
            Err(crate::StatusCode::DeadlineExceeded)
        );
        assert!(cancellation.cancel());
        assert_eq!(
            ctx.check().map_err(|err| err.code()),
            Err(crate::StatusCode::Cancelled),
            "取消必须优先于截止"
        );
    }

    #[test]
    fn default_context_is_live() {
        let ctx = CallContext::builder()
            .with_timeout(Duration::from_secs(60))
            .with_metadata("x-tenant", "alpha")
            .build();
        assert!(ctx.check().is_ok());
        assert_eq!(ctx.metadata().collect::<Vec<_>>(), vec![("x-tenant", "alpha")]);
        assert!(ctx.to_string().starts_with("CallContext{cancelled=false"));
    }

    #[test]
    fn unrepresentable_timeout_means_no_deadline() {
        let ctx = CallContext::builder().with_timeout(Duration::MAX).build();
        assert_eq!(ctx.deadline(), Deadline::none(), "超出时钟范围的超时不设截止");
        assert!(ctx.check().is_ok());
    }
}
