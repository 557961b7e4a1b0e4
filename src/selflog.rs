//! 诊断自日志通道
//!
//! sink 内部的故障（例如刷新失败）不会传递给调用方，而是写到这里。
//! 每一行都会以 `tracing::error!` 发出（target 为 `quantum_pg_sink::selflog`），
//! 如果通过 [`enable`] 注册了处理函数，还会交给该处理函数。
//!
//! ```rust
//! quantum_pg_sink::selflog::enable(|line| eprintln!("{}", line));
//! quantum_pg_sink::selflog::disable();
//! ```

use chrono::{SecondsFormat, Utc};
use once_cell::sync::Lazy;
use std::sync::{Arc, RwLock};

/// 自日志处理函数
pub type SelfLogHandler = Arc<dyn Fn(&str) + Send + Sync>;

static HANDLER: Lazy<RwLock<Option<SelfLogHandler>>> = Lazy::new(|| RwLock::new(None));

/// 注册处理函数，替换之前注册的处理函数
pub fn enable<F>(handler: F)
where
    F: Fn(&str) + Send + Sync + 'static,
{
    if let Ok(mut guard) = HANDLER.write() {
        *guard = Some(Arc::new(handler));
    }
}

/// 移除处理函数
pub fn disable() {
    if let Ok(mut guard) = HANDLER.write() {
        *guard = None;
    }
}

pub fn is_enabled() -> bool {
    HANDLER.read().map(|guard| guard.is_some()).unwrap_or(false)
}

/// 写一行自日志：`<时间戳> [<组件>] <消息>`
pub fn write_line(component: &str, message: &str) {
    tracing::error!(target: "quantum_pg_sink::selflog", component, "{}", message);

    // 在锁外调用处理函数，处理函数内部可以再次调用 enable/disable
    let handler = HANDLER.read().ok().and_then(|guard| guard.clone());
    if let Some(handler) = handler {
        let line = format!(
            "{} [{}] {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            component,
            message
        );
        handler(&line);
    }
}

/// 测试共用的捕获处理函数，整个测试进程只注册一次
#[cfg(test)]
pub(crate) fn capture_for_tests() -> Arc<std::sync::Mutex<Vec<String>>> {
    use std::sync::Mutex;

    static CAPTURE: Lazy<Arc<Mutex<Vec<String>>>> = Lazy::new(|| {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = lines.clone();
        enable(move |line| {
            if let Ok(mut lines) = captured.lock() {
                lines.push(line.to_string());
            }
        });
        lines
    });
    CAPTURE.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_receives_prefixed_line() {
        let lines = capture_for_tests();
        assert!(is_enabled());

        write_line("selflog-test-component", "something failed");

        let lines = lines.lock().unwrap();
        let line = lines
            .iter()
            .find(|line| line.contains("[selflog-test-component]"))
            .unwrap();
        assert!(line.ends_with("[selflog-test-component] something failed"));
    }
}
