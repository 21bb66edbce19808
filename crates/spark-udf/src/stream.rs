//! 流式调用的记录队列。
//!
//! # 设计背景（Why）
//! - 服务端流与双向流的响应由客户端线程逐条推入，消费方在另一线程阻塞或限时拉取；
//! - 生产方无法总是得知消费方已放弃，因此关闭后的推送被静默丢弃，而不是报错。
//!
//! # 逻辑解析（How）
//! - 一把 `std::sync::Mutex` 保护队列与 `eos`/`closed` 两个标志；
//! - 流会被宿主交给插件模块推送，而模块静态链接了本 crate 的另一份副本。锁与条件变量的等待状态
//!   必须完整地存放在结构体内部（futex / pthread），不能依赖进程级的停车表，否则跨模块的唤醒会丢失；
//! - `readable` 条件变量在每次状态迁移（推送、结束、关闭）时通知消费方，
//!   `writable` 仅在有界队列上唤醒等待空位的生产方。
//!
//! # 契约说明（What）
//! - 三态生命周期：**Open** → **EndOfStream**（不再推送，缓冲仍可消费）→ **Closed**（缓冲被丢弃）；
//! - 交付顺序严格等于推送顺序；`EndOfStream` 只会在此前推送的记录全部被取走或被 `close` 丢弃后出现；
//! - `close` 可与 `push`/`next` 并发调用，任何等待者都会被唤醒并观测到终止。

use std::{
    collections::VecDeque,
    fmt,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::{error::ErrorInfo, record::GenericRecord};

/// `try_next` / `next` 的四种结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamStatus {
    /// 取到一条正常记录。
    Ok,
    /// 取到一条附带 [`ErrorInfo`] 的记录。
    Error,
    /// 队列已空且不会再有推送。
    EndOfStream,
    /// 暂无数据：非阻塞调用时队列为空，或限时等待超时。
    NotReady,
}

/// 流的外部可见状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamState {
    Open,
    EndOfStream,
    Closed,
}

struct Inner {
    queue: VecDeque<GenericRecord>,
    capacity: Option<usize>,
    eos: bool,
    closed: bool,
}

impl Inner {
    fn readable(&self) -> bool {
        !self.queue.is_empty() || self.eos || self.closed
    }

    fn is_full(&self) -> bool {
        self.capacity
            .is_some_and(|capacity| self.queue.len() >= capacity)
    }

    fn accepts_push(&self) -> bool {
        !(self.eos || self.closed)
    }
}

/// 线程安全的通用记录流。
///
/// 通常以 `Arc<GenericRecordStream>` 在客户端（生产方）与调用方（消费方）之间共享。
pub struct GenericRecordStream {
    inner: Mutex<Inner>,
    readable: Condvar,
    writable: Condvar,
}

impl GenericRecordStream {
    /// 创建无容量上限的流。
    pub fn new() -> Self {
        Self::with_capacity_limit(None)
    }

    /// 创建至多缓冲 `capacity` 条记录的流；队列满时 `push` 阻塞直至出现空位、结束或关闭。
    ///
    /// `capacity` 为 0 时按 1 处理。
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity_limit(Some(capacity.max(1)))
    }

    fn with_capacity_limit(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                capacity,
                eos: false,
                closed: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    /// 推入一条记录并唤醒一个等待中的消费方。
    ///
    /// 流已结束或已关闭时静默丢弃并返回 `false`。
    pub fn push(&self, record: GenericRecord) -> bool {
        let mut inner = self.lock();
        while inner.accepts_push() && inner.is_full() {
            inner = self
                .writable
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if !inner.accepts_push() {
            return false;
        }
        inner.queue.push_back(record);
        drop(inner);
        self.readable.notify_one();
        true
    }

    /// 标记不会再有推送，唤醒全部等待者。
    pub fn end_of_stream(&self) {
        self.lock().eos = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// 强制关闭：丢弃缓冲、拒绝后续推送并唤醒全部等待者。
    pub fn close(&self) {
        let discarded = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.eos = true;
            let discarded = inner.queue.len();
            inner.queue.clear();
            discarded
        };
        tracing::trace!(discarded, "record stream closed");
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// 非阻塞拉取。
    pub fn try_next(&self, record: &mut GenericRecord) -> StreamStatus {
        let inner = self.lock();
        if inner.readable() {
            self.deliver(inner, record)
        } else {
            StreamStatus::NotReady
        }
    }

    /// 阻塞拉取；`timeout` 为 `Some` 时最多等待该时长，超时返回 [`StreamStatus::NotReady`]。
    ///
    /// 超时换算出的截止时刻超出单调时钟范围时按无限等待处理。
    pub fn next(&self, record: &mut GenericRecord, timeout: Option<Duration>) -> StreamStatus {
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let mut inner = self.lock();
        while !inner.readable() {
            inner = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return StreamStatus::NotReady;
                    }
                    self.readable
                        .wait_timeout(inner, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .readable
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
        self.deliver(inner, record)
    }

    // 持锁方 panic 不会破坏队列不变量，中毒的锁照常使用。
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, mut inner: MutexGuard<'_, Inner>, record: &mut GenericRecord) -> StreamStatus {
        match inner.queue.pop_front() {
            Some(next) => {
                let bounded = inner.capacity.is_some();
                drop(inner);
                if bounded {
                    self.writable.notify_one();
                }
                *record = next;
                if record.is_failed() {
                    StreamStatus::Error
                } else {
                    StreamStatus::Ok
                }
            }
            None => StreamStatus::EndOfStream,
        }
    }

    /// 把队列与状态原子地转移到新流，源流随即处于“已关闭 + 已结束”，其等待者被唤醒。
    pub fn transfer(&self) -> GenericRecordStream {
        let moved = {
            let mut inner = self.lock();
            let moved = Inner {
                queue: std::mem::take(&mut inner.queue),
                capacity: inner.capacity,
                eos: inner.eos,
                closed: inner.closed,
            };
            inner.closed = true;
            inner.eos = true;
            moved
        };
        self.readable.notify_all();
        self.writable.notify_all();
        GenericRecordStream {
            inner: Mutex::new(moved),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    pub fn state(&self) -> StreamState {
        let inner = self.lock();
        if inner.closed {
            StreamState::Closed
        } else if inner.eos {
            StreamState::EndOfStream
        } else {
            StreamState::Open
        }
    }

    /// 当前缓冲的记录数。
    pub fn buffered(&self) -> usize {
        self.lock().queue.len()
    }

    /// 阻塞地逐条取出记录，直至流结束；失败记录以 `Err` 交付，之后迭代继续。
    pub fn records(&self) -> Records<'_> {
        Records { stream: self }
    }
}

impl Default for GenericRecordStream {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GenericRecordStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("GenericRecordStream")
            .field("buffered", &inner.queue.len())
            .field("capacity", &inner.capacity)
            .field("eos", &inner.eos)
            .field("closed", &inner.closed)
            .finish()
    }
}

/// [`GenericRecordStream::records`] 返回的阻塞迭代器。
pub struct Records<'a> {
    stream: &'a GenericRecordStream,
}

impl Iterator for Records<'_> {
    type Item = Result<GenericRecord, ErrorInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut record = GenericRecord::new();
        match self.stream.next(&mut record, None) {
            StreamStatus::Ok => Some(Ok(record)),
            StreamStatus::Error => record.take_error().map(Err),
            StreamStatus::EndOfStream | StreamStatus::NotReady => None,
        }
    }
}
