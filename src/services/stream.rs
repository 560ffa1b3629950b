//! # 流式生成聚合器
//!
//! 从生成协作方读取增量文本流，逐块累积为完整回复，并通过回调通知调用方。
//!
//! ## 回调约定
//! - 每收到一个分块调用一次 `on_chunk(chunk, accumulated)`
//! - 流结束时恰好调用一次 `on_complete` 或 `on_error`，二者只会有一个
//! - `StreamHandle::cancel()` 返回后不会再有任何回调被调用，底层传输随任务一起释放
//!
//! ## 项目绑定
//! 每个会话在启动时绑定工作流的项目纪元（`ProjectEpoch`）。
//! 每次派发回调前都会检查纪元是否仍然一致；用户中途切换了项目时，
//! 后续分块直接丢弃，会话视为已取消，不会写入其他项目的状态。
//!
//! 回调在内部锁内执行，回调中不能调用同一会话的 `cancel()`。

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::stream::{Stream, StreamExt};
use tokio::task::JoinHandle;

/// 生成协作方返回的文本流：`Ok` 为文本分块，`Err` 为传输或解析错误，流结束即生成完成
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, String>> + Send>>;

/// 打开文本流的 Future
pub type OpenFuture<'a> = Pin<Box<dyn Future<Output = Result<TextStream, String>> + Send + 'a>>;

/// 生成协作方接口
///
/// 接收渲染后的提示词，返回增量文本流。
pub trait GenerationBackend: Send + Sync {
    fn open(&self, prompt: String) -> OpenFuture<'_>;
}

/// 项目纪元
///
/// 单调递增的计数器，工作流每次切换项目（或重置）时递增。
/// 流式会话持有启动时的纪元值，派发回调前与当前值比较。
#[derive(Clone, Default)]
pub struct ProjectEpoch(Arc<AtomicU64>);

impl ProjectEpoch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// 递增纪元，使此前绑定的所有会话失效
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// 以当前纪元创建绑定
    pub fn bind(&self) -> StreamBinding {
        StreamBinding {
            epoch: self.clone(),
            bound: self.current(),
        }
    }
}

/// 会话与项目纪元的绑定
#[derive(Clone)]
pub struct StreamBinding {
    epoch: ProjectEpoch,
    bound: u64,
}

impl StreamBinding {
    pub fn is_current(&self) -> bool {
        self.epoch.current() == self.bound
    }
}

/// 回调派发闸门
///
/// `live` 为 false 后不再派发任何回调。
struct Gate {
    live: Mutex<bool>,
    binding: Option<StreamBinding>,
}

impl Gate {
    /// 派发一个中间回调；返回 false 表示会话已失效，读取循环应当停止
    fn dispatch(&self, f: impl FnOnce()) -> bool {
        let mut live = self.live.lock().unwrap_or_else(|p| p.into_inner());
        if !*live {
            return false;
        }
        if let Some(binding) = &self.binding {
            if !binding.is_current() {
                log::debug!("项目已切换，丢弃流式分块并结束会话");
                *live = false;
                return false;
            }
        }
        f();
        true
    }

    /// 派发终结回调（完成或失败），之后闸门关闭
    fn dispatch_final(&self, f: impl FnOnce()) {
        let mut live = self.live.lock().unwrap_or_else(|p| p.into_inner());
        if !*live {
            return;
        }
        *live = false;
        if let Some(binding) = &self.binding {
            if !binding.is_current() {
                return;
            }
        }
        f();
    }

    fn close(&self) {
        *self.live.lock().unwrap_or_else(|p| p.into_inner()) = false;
    }
}

/// 流式会话句柄
pub struct StreamHandle {
    gate: Arc<Gate>,
    task: JoinHandle<()>,
}

impl StreamHandle {
    /// 取消会话
    ///
    /// 返回后不会再调用任何回调；读取任务被中止，底层连接随之释放。
    pub fn cancel(&self) {
        self.gate.close();
        self.task.abort();
    }

    /// 读取任务是否已经结束
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// 流式生成聚合器
#[derive(Clone)]
pub struct StreamAggregator {
    backend: Arc<dyn GenerationBackend>,
}

impl StreamAggregator {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self { backend }
    }

    /// 启动一次流式生成
    ///
    /// # 参数
    /// - `prompt` - 渲染后的提示词
    /// - `binding` - 项目纪元绑定；`None` 表示不做项目检查
    /// - `on_chunk` - 每个分块调用一次，参数为 `(本次分块, 累积文本)`
    /// - `on_complete` - 正常结束时调用，参数为完整文本
    /// - `on_error` - 打开连接、传输或解析失败时调用
    ///
    /// # 返回值
    /// 用于取消会话的句柄
    pub fn start(
        &self,
        prompt: String,
        binding: Option<StreamBinding>,
        mut on_chunk: impl FnMut(&str, &str) + Send + 'static,
        on_complete: impl FnOnce(String) + Send + 'static,
        on_error: impl FnOnce(String) + Send + 'static,
    ) -> StreamHandle {
        let gate = Arc::new(Gate {
            live: Mutex::new(true),
            binding,
        });
        let backend = Arc::clone(&self.backend);
        let task_gate = Arc::clone(&gate);

        let task = tokio::spawn(async move {
            let mut stream = match backend.open(prompt).await {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!("打开生成流失败: {}", e);
                    task_gate.dispatch_final(move || on_error(e));
                    return;
                }
            };

            // 每次启动都从空缓冲区开始累积
            let mut buffer = String::new();
            let outcome = loop {
                match stream.next().await {
                    Some(Ok(chunk)) => {
                        buffer.push_str(&chunk);
                        if !task_gate.dispatch(|| on_chunk(&chunk, &buffer)) {
                            return;
                        }
                    }
                    Some(Err(e)) => break Err(e),
                    None => break Ok(buffer),
                }
            };

            match outcome {
                Ok(text) => task_gate.dispatch_final(move || on_complete(text)),
                Err(e) => {
                    log::warn!("生成流中断: {}", e);
                    task_gate.dispatch_final(move || on_error(e));
                }
            }
        });

        StreamHandle { gate, task }
    }
}
