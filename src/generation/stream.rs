//! SSE 流解码
//!
//! 网络分块与行边界无关：解码器保留最后一段未完成的行，只解析以 `\n` 结束的完整行；
//! 只有 `data:` 前缀的行携带负载，其余行（注释、event: 等）忽略。
//! 完整行若 JSON 解析失败，记录后跳过，不视为错误。

use std::collections::VecDeque;

use futures_util::{stream, Stream, StreamExt};

use crate::api::ByteStream;
use crate::core::StoryError;
use crate::generation::GenerationEvent;

const DATA_PREFIX: &str = "data:";

/// 增量解码器：push 字节块，返回本次新完成的事件
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    /// buffer 中已确认不含换行的前缀长度
    scanned: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 输入一段字节，返回其中已完整的事件（按出现顺序）
    pub fn push(&mut self, chunk: &[u8]) -> Vec<GenerationEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        let mut start = 0;
        let mut cursor = self.scanned;
        while let Some(offset) = self.buffer[cursor..].iter().position(|b| *b == b'\n') {
            let end = cursor + offset;
            if let Some(event) = decode_line(&self.buffer[start..end]) {
                events.push(event);
            }
            start = end + 1;
            cursor = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        events
    }

    /// 流结束：尝试解析残留的最后一行；不完整则丢弃
    pub fn finish(&mut self) -> Option<GenerationEvent> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        if rest.is_empty() {
            return None;
        }
        let event = decode_line(&rest);
        if event.is_none() {
            tracing::debug!(bytes = rest.len(), "Dropping incomplete trailing stream fragment");
        }
        event
    }

    /// 缓冲中尚未成行的字节数
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

fn decode_line(raw: &[u8]) -> Option<GenerationEvent> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches('\r');
    let payload = line.strip_prefix(DATA_PREFIX)?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);
    if payload.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<GenerationEvent>(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!(error = %e, "Skipping undecodable stream line");
            None
        }
    }
}

/// 把原始字节流转换为事件流；传输错误以 StoryError::Transport 结束
pub fn decode_events(body: ByteStream) -> impl Stream<Item = Result<GenerationEvent, StoryError>> + Send {
    struct DecodeState {
        body: ByteStream,
        decoder: StreamDecoder,
        ready: VecDeque<GenerationEvent>,
        finished: bool,
    }

    let init = DecodeState {
        body,
        decoder: StreamDecoder::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(init, |mut st| async move {
        loop {
            if let Some(event) = st.ready.pop_front() {
                return Some((Ok(event), st));
            }
            if st.finished {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => {
                    tracing::trace!(bytes = chunk.len(), "Stream chunk");
                    let events = st.decoder.push(&chunk);
                    st.ready.extend(events);
                }
                Some(Err(e)) => {
                    st.finished = true;
                    st.ready.clear();
                    return Some((Err(StoryError::from(e)), st));
                }
                None => {
                    st.finished = true;
                    st.ready.extend(st.decoder.finish());
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use bytes::Bytes;

    const SCENARIO: &str = "data: {\"type\":\"token\",\"content\":\"Hel\"}\n\
data: {\"type\":\"token\",\"content\":\"lo\"}\n\
data: {\"type\":\"done\",\"node_id\":7,\"content\":\"Hello\",\"choices\":[],\"is_ending\":false}\n";

    fn tokens_and_done(events: &[GenerationEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| match e {
                GenerationEvent::Token { content } => format!("token:{}", content),
                GenerationEvent::Done(d) => format!("done:{}", d.node_id),
                GenerationEvent::Error { message } => format!("error:{}", message),
            })
            .collect()
    }

    #[test]
    fn test_scenario_in_order() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.push(SCENARIO.as_bytes());
        assert_eq!(
            tokens_and_done(&events),
            vec!["token:Hel", "token:lo", "done:7"]
        );
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_arbitrary_splits_match_single_read() {
        let input = format!(
            "{}data: {{\"type\":\"token\",\"content\":\"désolé ✨\"}}\r\n\n",
            SCENARIO
        );
        let bytes = input.as_bytes();
        let mut whole = StreamDecoder::new();
        let expected = whole.push(bytes);
        assert_eq!(expected.len(), 4);

        for size in 1..=bytes.len() {
            let mut decoder = StreamDecoder::new();
            let mut events = Vec::new();
            for chunk in bytes.chunks(size) {
                events.extend(decoder.push(chunk));
            }
            events.extend(decoder.finish());
            assert_eq!(events, expected, "split size {}", size);
        }
    }

    #[test]
    fn test_long_frame_in_small_chunks_keeps_only_the_tail() {
        let content = "x".repeat(4096);
        let frame = format!(
            "data: {{\"type\":\"token\",\"content\":\"{}\"}}\ndata: {{\"type\":\"tok",
            content
        );
        let mut decoder = StreamDecoder::new();
        let mut events = Vec::new();
        for chunk in frame.as_bytes().chunks(3) {
            events.extend(decoder.push(chunk));
        }
        assert_eq!(events, vec![GenerationEvent::Token { content }]);
        assert_eq!(decoder.pending_bytes(), "data: {\"type\":\"tok".len());
        assert_eq!(decoder.scanned, decoder.pending_bytes());

        let events = decoder.push(b"en\",\"content\":\"!\"}\n");
        assert_eq!(tokens_and_done(&events), vec!["token:!"]);
        assert_eq!(decoder.pending_bytes(), 0);
        assert_eq!(decoder.scanned, 0);
    }

    #[test]
    fn test_ignores_comments_and_garbage() {
        let mut decoder = StreamDecoder::new();
        let input = ": keep-alive\nevent: message\ndata: {not json}\ndata:\n\
data:{\"type\":\"error\",\"message\":\"quota\"}\n";
        let events = decoder.push(input.as_bytes());
        assert_eq!(tokens_and_done(&events), vec!["error:quota"]);
    }

    #[test]
    fn test_incomplete_tail_is_dropped() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.push(b"data: {\"type\":\"token\",\"content\":\"a\"}\ndata: {\"type\":\"tok");
        assert_eq!(events.len(), 1);
        assert!(decoder.pending_bytes() > 0);
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_unterminated_last_line_is_parsed_at_end() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder
            .push(b"data: {\"type\":\"error\",\"message\":\"x\"}")
            .is_empty());
        assert!(matches!(
            decoder.finish(),
            Some(GenerationEvent::Error { .. })
        ));
    }

    #[tokio::test]
    async fn test_decode_events_over_stream() {
        let chunks: Vec<Result<Bytes, ApiError>> = SCENARIO
            .as_bytes()
            .chunks(5)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let body: ByteStream = Box::pin(stream::iter(chunks));
        let events: Vec<GenerationEvent> = decode_events(body)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(
            tokens_and_done(&events),
            vec!["token:Hel", "token:lo", "done:7"]
        );
    }

    #[tokio::test]
    async fn test_decode_events_transport_error() {
        let chunks: Vec<Result<Bytes, ApiError>> = vec![
            Ok(Bytes::from_static(b"data: {\"type\":\"token\",\"content\":\"a\"}\n")),
            Err(ApiError::Request("reset".into())),
        ];
        let body: ByteStream = Box::pin(stream::iter(chunks));
        let results: Vec<_> = decode_events(body).collect().await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(StoryError::Transport(_))));
    }
}
