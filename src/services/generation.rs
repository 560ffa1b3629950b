//! # HTTP 流式生成后端
//!
//! 通过 HTTP POST 调用生成服务，以 Server-Sent Events 的形式读取增量文本。
//!
//! ## 请求
//! ```json
//! { "model": "default", "prompt": "...", "stream": true }
//! ```
//! 配置了 `apiKeyEnv` 且该环境变量非空时，附带 `Authorization: Bearer <key>`。
//!
//! ## 响应帧
//! - `data: {"delta": "..."}` - 文本分块
//! - `data: [DONE]` - 正常结束
//! - `event: error` 后跟 `data: {"message": "..."}` - 服务端报告的错误
//!
//! 连接在收到 `[DONE]` 之前关闭视为传输错误。

use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use crate::models::settings::GenerationConfig;
use crate::services::stream::{GenerationBackend, OpenFuture, TextStream};

/// 解析出的 SSE 帧
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    Delta(String),
    Done,
    Error(String),
}

#[derive(Deserialize)]
struct DeltaPayload {
    #[serde(default)]
    delta: String,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: String,
}

/// 增量 SSE 解码器
///
/// 字节块可能在任意位置切分（包括 UTF-8 多字节字符和行中间），
/// 未完成的部分保留在缓冲区中等待下一块。
#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 输入一个字节块，返回其中完整的帧
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<SseFrame, String>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = memchr::memchr(b'\n', &self.buffer) {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    frames.push(frame);
                }
                continue;
            }
            // 注释行
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }
        frames
    }

    /// 一个事件块结束（空行），组装成帧
    fn dispatch(&mut self) -> Option<Result<SseFrame, String>> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");

        if event.as_deref() == Some("error") {
            let message = serde_json::from_str::<ErrorPayload>(&data)
                .map(|p| p.message)
                .ok()
                .filter(|m| !m.is_empty())
                .unwrap_or(data);
            return Some(Ok(SseFrame::Error(message)));
        }
        if data.trim() == "[DONE]" {
            return Some(Ok(SseFrame::Done));
        }
        Some(
            serde_json::from_str::<DeltaPayload>(&data)
                .map(|p| SseFrame::Delta(p.delta))
                .map_err(|e| format!("无法解析生成服务返回的数据: {}", e)),
        )
    }
}

/// 把 SSE 字节流转换为文本分块流
///
/// 遇到 `[DONE]` 正常结束；遇到错误帧、解析失败或在 `[DONE]` 之前断开时，
/// 产出一个 `Err` 后结束。
pub fn decode_stream<S>(body: S) -> TextStream
where
    S: Stream<Item = Result<Bytes, String>> + Send + 'static,
{
    struct State<S> {
        body: std::pin::Pin<Box<S>>,
        decoder: SseDecoder,
        pending: std::collections::VecDeque<Result<SseFrame, String>>,
        finished: bool,
    }

    let state = State {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: std::collections::VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }
            if let Some(frame) = state.pending.pop_front() {
                match frame {
                    Ok(SseFrame::Delta(text)) if text.is_empty() => continue,
                    Ok(SseFrame::Delta(text)) => return Some((Ok(text), state)),
                    Ok(SseFrame::Done) => return None,
                    Ok(SseFrame::Error(message)) | Err(message) => {
                        state.finished = true;
                        return Some((Err(message), state));
                    }
                }
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let frames = state.decoder.feed(&bytes);
                    state.pending.extend(frames);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
                None => {
                    // 末尾可能缺少空行，补一个让最后的事件块生效
                    let frames = state.decoder.feed(b"\n\n");
                    if frames.is_empty() {
                        state.finished = true;
                        return Some((Err("生成服务连接意外断开".to_string()), state));
                    }
                    state.pending.extend(frames);
                    state
                        .pending
                        .push_back(Err("生成服务连接意外断开".to_string()));
                }
            }
        }
    }))
}

/// 基于 reqwest 的生成后端
pub struct HttpGenerationBackend {
    client: reqwest::Client,
    config: Arc<GenerationConfig>,
}

impl HttpGenerationBackend {
    pub fn new(config: GenerationConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config: Arc::new(config),
        }
    }

    fn api_key(&self) -> Option<String> {
        if self.config.api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

impl GenerationBackend for HttpGenerationBackend {
    fn open(&self, prompt: String) -> OpenFuture<'_> {
        Box::pin(async move {
            let body = serde_json::json!({
                "model": self.config.model,
                "prompt": prompt,
                "stream": true,
            });

            let mut request = self
                .client
                .post(&self.config.endpoint)
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .json(&body);
            if let Some(key) = self.api_key() {
                request = request.bearer_auth(key);
            }

            log::info!("请求生成服务: {}", self.config.endpoint);
            let response = request
                .send()
                .await
                .map_err(|e| format!("无法连接生成服务: {}", e))?;

            let status = response.status();
            if !status.is_success() {
                let detail = response.text().await.unwrap_or_default();
                return Err(format!("生成服务返回错误 {}: {}", status, detail.trim()));
            }

            let bytes = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| format!("读取生成结果失败: {}", e)));
            Ok(decode_stream(bytes))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(decoder: &mut SseDecoder, input: &str) -> Vec<SseFrame> {
        decoder
            .feed(input.as_bytes())
            .into_iter()
            .map(|f| f.unwrap())
            .collect()
    }

    #[test]
    fn test_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::new();
        assert!(frames(&mut decoder, "data: {\"del").is_empty());
        assert_eq!(
            frames(&mut decoder, "ta\": \"Hi\"}\n\ndata: [DONE]\n\n"),
            vec![SseFrame::Delta("Hi".into()), SseFrame::Done]
        );
    }

    #[test]
    fn test_decoder_handles_split_utf8() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: {\"delta\": \"你好\"}\n\n".as_bytes();
        // 在"你"的第二个字节处切开
        let split = bytes.iter().position(|&b| b >= 0x80).unwrap() + 1;

        assert!(decoder.feed(&bytes[..split]).is_empty());
        let out: Vec<_> = decoder.feed(&bytes[split..]).into_iter().map(|f| f.unwrap()).collect();
        assert_eq!(out, vec![SseFrame::Delta("你好".into())]);
    }

    #[test]
    fn test_decoder_error_event_and_comments() {
        let mut decoder = SseDecoder::new();
        let out = frames(
            &mut decoder,
            ": keep-alive\r\nevent: error\r\ndata: {\"message\": \"quota exceeded\"}\r\n\r\n",
        );
        assert_eq!(out, vec![SseFrame::Error("quota exceeded".into())]);
    }

    #[test]
    fn test_decoder_rejects_malformed_data() {
        let mut decoder = SseDecoder::new();
        let out = decoder.feed(b"data: not json\n\n");
        assert!(matches!(out.as_slice(), [Err(_)]));
    }

    fn body(parts: &[&str]) -> impl Stream<Item = Result<Bytes, String>> + Send + 'static {
        let parts: Vec<Result<Bytes, String>> = parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
            .collect();
        stream::iter(parts)
    }

    #[tokio::test]
    async fn test_decode_stream_until_done() {
        let text: Vec<_> = decode_stream(body(&[
            "data: {\"delta\": \"Hel\"}\n\n",
            "data: {\"delta\": \"lo\"}\n\ndata: [DONE]\n\n",
            "data: {\"delta\": \"ignored\"}\n\n",
        ]))
        .collect()
        .await;

        assert_eq!(text, vec![Ok("Hel".to_string()), Ok("lo".to_string())]);
    }

    #[tokio::test]
    async fn test_decode_stream_without_done_is_error() {
        let text: Vec<_> = decode_stream(body(&["data: {\"delta\": \"partial\"}\n\n"]))
            .collect()
            .await;

        assert_eq!(text.len(), 2);
        assert_eq!(text[0], Ok("partial".to_string()));
        assert!(text[1].is_err());
    }

    #[tokio::test]
    async fn test_decode_stream_error_event_ends_stream() {
        let text: Vec<_> = decode_stream(body(&[
            "data: {\"delta\": \"a\"}\n\nevent: error\ndata: boom\n\n",
            "data: {\"delta\": \"b\"}\n\n",
        ]))
        .collect()
        .await;

        assert_eq!(text, vec![Ok("a".to_string()), Err("boom".to_string())]);
    }
}
