//! 批处理引擎
//!
//! 生产者通过 [`BatchingEngine::submit`] 把事件追加到共享缓冲区，后台只有一个
//! 工作任务负责刷新，因此任何时刻最多只有一个刷新在进行。刷新由以下条件触发：
//!
//! - 缓冲区达到 `batch_size`：立即写出完整的批次
//! - 距上一次刷新尝试经过 `period`：写出缓冲区中的全部事件
//! - 停机：写出剩余的全部事件，受 `shutdown_timeout` 限制
//!
//! 每次刷新最多取 `batch_size` 个事件，按提交顺序写出。刷新失败只会写到
//! self-log，失败批次中的事件不会重试。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::event::LogEvent;
use crate::diagnostics::Diagnostics;
use crate::error::{PgSinkError, Result};
use crate::selflog;
use crate::sinks::traits::BatchedSink;

/// 批处理参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchingOptions {
    /// 单次刷新的最大事件数，也是触发刷新的缓冲区大小
    pub batch_size: usize,
    /// 定时刷新间隔
    pub period: Duration,
    /// 停机时等待剩余事件写出的最长时间
    pub shutdown_timeout: Duration,
}

impl Default for BatchingOptions {
    fn default() -> Self {
        Self {
            batch_size: 50,
            period: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl BatchingOptions {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PgSinkError::config("batch_size must be greater than 0"));
        }
        if self.period.is_zero() {
            return Err(PgSinkError::config("period must be greater than 0"));
        }
        Ok(())
    }
}

/// 引擎状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// 缓冲区为空，没有刷新在进行
    Idle,
    /// 缓冲区中有尚未刷新的事件
    Accumulating,
    /// 正在刷新
    Flushing,
    /// 终止状态
    Stopped,
}

#[derive(Debug, Default)]
struct BufferState {
    events: VecDeque<LogEvent>,
    flushing: bool,
    stopping: bool,
    stopped: bool,
}

#[derive(Debug)]
struct Shared {
    buffer: Mutex<BufferState>,
    /// 缓冲区达到批次大小
    wake: Notify,
    /// 停机信号
    stop: Notify,
    diagnostics: Arc<Diagnostics>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 按大小或时间触发的单飞刷新引擎
#[derive(Debug)]
pub struct BatchingEngine {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    options: BatchingOptions,
    name: String,
}

impl BatchingEngine {
    /// 在当前 Tokio 运行时中启动工作任务
    pub fn start<S: BatchedSink>(
        sink: Arc<S>,
        options: BatchingOptions,
        diagnostics: Arc<Diagnostics>,
    ) -> Result<Self> {
        options.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            PgSinkError::config("A Tokio runtime is required to start the batching engine")
        })?;

        let name = sink.name();
        let shared = Arc::new(Shared {
            buffer: Mutex::new(BufferState::default()),
            wake: Notify::new(),
            stop: Notify::new(),
            diagnostics,
        });

        let worker = Worker {
            shared: shared.clone(),
            sink,
            batch_size: options.batch_size,
            name: name.clone(),
        };
        let handle = runtime.spawn(worker.run(options.period));

        info!(
            target: "quantum_pg_sink::batching",
            sink = %name,
            batch_size = options.batch_size,
            period_ms = options.period.as_millis() as u64,
            "批处理引擎已启动"
        );

        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
            options,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &BatchingOptions {
        &self.options
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.shared.diagnostics
    }

    /// 追加一个事件，从不阻塞在 I/O 上
    ///
    /// 停机开始后事件被丢弃并计入诊断数据，返回 `false`。
    pub fn submit(&self, event: LogEvent) -> bool {
        self.shared.diagnostics.increment_events_submitted();

        let full = {
            let mut state = self.shared.lock();
            if state.stopping || state.stopped {
                drop(state);
                self.shared.diagnostics.add_events_dropped_stopped(1);
                return false;
            }
            state.events.push_back(event);
            state.events.len() >= self.options.batch_size
        };

        if full {
            self.shared.wake.notify_one();
        }
        true
    }

    pub fn state(&self) -> EngineState {
        let state = self.shared.lock();
        if state.stopped {
            EngineState::Stopped
        } else if state.flushing {
            EngineState::Flushing
        } else if state.events.is_empty() {
            EngineState::Idle
        } else {
            EngineState::Accumulating
        }
    }

    /// 缓冲区中尚未取走的事件数
    pub fn buffered(&self) -> usize {
        self.shared.lock().events.len()
    }

    /// 停止接收事件，写出剩余事件后进入 `Stopped`
    ///
    /// 超时后工作任务被中止，缓冲区中剩余的事件被丢弃并写到 self-log。
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        {
            let mut state = self.shared.lock();
            if state.stopping || state.stopped {
                return Err(PgSinkError::AlreadyShutdown);
            }
            state.stopping = true;
        }

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut handle) = handle else {
            return Err(PgSinkError::AlreadyShutdown);
        };

        self.shared.stop.notify_one();

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => {
                info!(target: "quantum_pg_sink::batching", sink = %self.name, "批处理引擎已停止");
                Ok(())
            }
            Ok(Err(e)) => {
                self.abandon_remaining("Batching worker terminated unexpectedly");
                Err(PgSinkError::background_task(e.to_string()))
            }
            Err(_) => {
                handle.abort();
                warn!(
                    target: "quantum_pg_sink::batching",
                    sink = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "停机超时，剩余事件被丢弃"
                );
                self.abandon_remaining(&PgSinkError::ShutdownTimeout.to_string());
                Err(PgSinkError::ShutdownTimeout)
            }
        }
    }

    fn abandon_remaining(&self, reason: &str) {
        let remaining = {
            let mut state = self.shared.lock();
            state.stopped = true;
            state.flushing = false;
            let remaining = state.events.len();
            state.events.clear();
            remaining
        };

        if remaining > 0 {
            self.shared
                .diagnostics
                .add_events_dropped_stopped(remaining as u64);
            selflog::write_line(&self.name, &failure_message(remaining, reason));
        }
    }
}

impl Drop for BatchingEngine {
    fn drop(&mut self) {
        let signal = {
            let mut state = self.shared.lock();
            let signal = !state.stopping && !state.stopped;
            state.stopping = true;
            signal
        };
        // 工作任务在后台写出剩余事件
        if signal {
            self.shared.stop.notify_one();
        }
    }
}

fn failure_message(count: usize, error: impl std::fmt::Display) -> String {
    format!(
        "Unable to write {} log events to the database due to following error: {}",
        count, error
    )
}

fn record_outcome(diagnostics: &Diagnostics, name: &str, count: usize, result: Result<()>) {
    match result {
        Ok(()) => {
            diagnostics.add_events_written(count as u64);
            debug!(target: "quantum_pg_sink::batching", sink = %name, count, "刷新完成");
        }
        Err(e) => {
            diagnostics.increment_flush_failures();
            diagnostics.add_events_dropped_error(count as u64);
            warn!(
                target: "quantum_pg_sink::batching",
                sink = %name,
                count,
                category = e.category(),
                "刷新失败: {}",
                e
            );
            selflog::write_line(name, &failure_message(count, &e));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Size,
    Timer,
    Stop,
}

struct Worker<S> {
    shared: Arc<Shared>,
    sink: Arc<S>,
    batch_size: usize,
    name: String,
}

impl<S: BatchedSink> Worker<S> {
    async fn run(self, period: Duration) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let trigger = if self.shared.lock().stopping {
                Trigger::Stop
            } else {
                tokio::select! {
                    biased;
                    _ = self.shared.stop.notified() => Trigger::Stop,
                    _ = self.shared.wake.notified() => Trigger::Size,
                    _ = ticker.tick() => Trigger::Timer,
                }
            };

            match trigger {
                Trigger::Size => {
                    // 刷新期间到达的完整批次在这里一并写出
                    let mut flushed = false;
                    while self.shared.lock().events.len() >= self.batch_size {
                        self.flush_next().await;
                        flushed = true;
                    }
                    if flushed {
                        ticker.reset();
                    }
                }
                Trigger::Timer => {
                    let mut pending = self.shared.lock().events.len();
                    while pending > 0 {
                        let taken = self.flush_next().await;
                        if taken == 0 {
                            break;
                        }
                        pending = pending.saturating_sub(taken);
                    }
                    ticker.reset();
                }
                Trigger::Stop => {
                    while self.flush_next().await > 0 {}
                    self.shared.lock().stopped = true;
                    debug!(target: "quantum_pg_sink::batching", sink = %self.name, "工作任务退出");
                    break;
                }
            }
        }
    }

    /// 取出最多一个批次并写出，返回取出的事件数
    async fn flush_next(&self) -> usize {
        let batch: Vec<LogEvent> = {
            let mut state = self.shared.lock();
            let count = state.events.len().min(self.batch_size);
            if count == 0 {
                return 0;
            }
            state.flushing = true;
            state.events.drain(..count).collect()
        };
        let count = batch.len();
        self.shared.diagnostics.increment_flush_attempts();

        debug!(target: "quantum_pg_sink::batching", sink = %self.name, count, "开始刷新");

        // 写出任务自己记录结果，工作任务在停机超时被中止后计数仍然完整
        let sink = self.sink.clone();
        let shared = self.shared.clone();
        let name = self.name.clone();
        let emit = tokio::spawn(async move {
            let result = sink.emit_batch(batch).await;
            record_outcome(&shared.diagnostics, &name, count, result);
        });
        // sink 内部的 panic 以 JoinError 的形式返回
        if let Err(e) = emit.await {
            let error = PgSinkError::background_task(e.to_string());
            record_outcome(&self.shared.diagnostics, &self.name, count, Err(error));
        }

        self.shared.lock().flushing = false;
        count
    }
}
